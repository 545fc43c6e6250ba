//! The simulation world.
//!
//! A [`World`] owns every body, the contact manager (and through it the broad
//! phase), and the scratch [`PhysicsContext`] threaded through each step.

use nalgebra::Vector3;
use physics_types::{BodyDef, PhysicsError, Result, WorldConfig};
use slotmap::SlotMap;
use smallvec::SmallVec;
use tracing::debug;

use crate::alloc::PhysicsContext;
use crate::body::{BodyFlags, BodyHandle, ContactLink, FixtureDef, FixtureProxy, Rigidbody};
use crate::broad_phase::BroadPhase;
use crate::contact::{Contact, ContactFlags, ContactKey};
use crate::contact_manager::ContactManager;
use crate::island::Island;

/// The simulation world containing all bodies and contacts.
#[derive(Debug)]
pub struct World {
    /// Simulation configuration.
    config: WorldConfig,
    /// Scratch allocators for one step at a time.
    context: PhysicsContext,
    /// All bodies, keyed by handle.
    bodies: SlotMap<BodyHandle, Rigidbody>,
    /// Handles in creation order; destroyed bodies leave a stale handle.
    body_order: Vec<BodyHandle>,
    /// Broad phase and contacts.
    contact_manager: ContactManager,
    /// Current simulation time.
    time: f64,
    /// Step counter.
    step_count: u64,
}

impl Default for World {
    fn default() -> Self {
        Self::build(WorldConfig::default())
    }
}

impl World {
    /// Create an empty world.
    ///
    /// # Errors
    ///
    /// Returns [`PhysicsError::InvalidConfig`] when `config` fails validation.
    pub fn new(config: WorldConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self::build(config))
    }

    fn build(config: WorldConfig) -> Self {
        Self {
            context: PhysicsContext::new(&config.allocator),
            contact_manager: ContactManager::new(config.aabb_margin),
            config,
            bodies: SlotMap::with_key(),
            body_order: Vec::new(),
            time: 0.0,
            step_count: 0,
        }
    }

    /// Simulation configuration.
    #[must_use]
    pub fn config(&self) -> &WorldConfig {
        &self.config
    }

    /// Scratch allocators (statistics for diagnostics).
    #[must_use]
    pub fn context(&self) -> &PhysicsContext {
        &self.context
    }

    /// Current simulation time.
    #[must_use]
    pub fn time(&self) -> f64 {
        self.time
    }

    /// Steps taken so far.
    #[must_use]
    pub fn step_count(&self) -> u64 {
        self.step_count
    }

    // ========================================================================
    // Bodies
    // ========================================================================

    /// Create a body. It has no fixtures, and therefore no mass, until
    /// [`World::create_fixture`] is called.
    ///
    /// # Errors
    ///
    /// Returns an error when `def` fails validation.
    pub fn create_body(&mut self, def: &BodyDef) -> Result<BodyHandle> {
        def.validate()?;
        let id = self.body_order.len();
        let handle = self.bodies.insert_with_key(|handle| Rigidbody::new(id, handle, def));
        self.body_order.push(handle);
        debug!(body = id, body_type = ?def.body_type, "body created");
        Ok(handle)
    }

    /// Attach a fixture to a body and update its mass.
    ///
    /// Returns the fixture index on the body.
    ///
    /// # Errors
    ///
    /// Returns [`PhysicsError::InvalidBody`] for a stale handle, or an error
    /// when the shape or material is invalid.
    pub fn create_fixture(&mut self, handle: BodyHandle, def: impl Into<FixtureDef>) -> Result<usize> {
        let body = self
            .bodies
            .get_mut(handle)
            .ok_or_else(|| PhysicsError::InvalidBody(format!("{handle:?}")))?;
        body.create_fixture(def.into(), self.contact_manager.broad_phase_mut())
    }

    /// Destroy a body together with its contacts and broad phase proxies.
    ///
    /// # Errors
    ///
    /// Returns [`PhysicsError::InvalidBody`] for a stale handle.
    pub fn destroy_body(&mut self, handle: BodyHandle) -> Result<Rigidbody> {
        if !self.bodies.contains_key(handle) {
            return Err(PhysicsError::InvalidBody(format!("{handle:?}")));
        }
        self.contact_manager.destroy_body(handle, &mut self.bodies);
        let body = self
            .bodies
            .remove(handle)
            .ok_or_else(|| PhysicsError::InvalidBody(format!("{handle:?}")))?;
        debug!(body = body.id(), "body destroyed");
        Ok(body)
    }

    /// Queue a force on the body created `index`-th and wake it.
    ///
    /// # Errors
    ///
    /// Returns [`PhysicsError::InvalidBodyIndex`] when no live body has that
    /// creation index.
    pub fn register_body_force(&mut self, index: usize, force: Vector3<f64>) -> Result<()> {
        let body = self
            .body_order
            .get(index)
            .and_then(|&handle| self.bodies.get_mut(handle))
            .ok_or(PhysicsError::InvalidBodyIndex(index))?;
        body.register_force(force);
        Ok(())
    }

    /// Get a body by handle.
    #[must_use]
    pub fn body(&self, handle: BodyHandle) -> Option<&Rigidbody> {
        self.bodies.get(handle)
    }

    /// Get a mutable body by handle.
    pub fn body_mut(&mut self, handle: BodyHandle) -> Option<&mut Rigidbody> {
        self.bodies.get_mut(handle)
    }

    /// Iterate over all bodies.
    pub fn bodies(&self) -> impl Iterator<Item = &Rigidbody> {
        self.bodies.values()
    }

    /// Number of live bodies.
    #[must_use]
    pub fn body_count(&self) -> usize {
        self.bodies.len()
    }

    /// Iterate over all contacts.
    pub fn contacts(&self) -> impl Iterator<Item = (ContactKey, &Contact)> {
        self.contact_manager.contacts()
    }

    /// Number of live contacts.
    #[must_use]
    pub fn contact_count(&self) -> usize {
        self.contact_manager.contact_count()
    }

    /// The broad phase.
    #[must_use]
    pub fn broad_phase(&self) -> &BroadPhase<FixtureProxy> {
        self.contact_manager.broad_phase()
    }

    // ========================================================================
    // Stepping
    // ========================================================================

    /// Advance by one configured timestep.
    ///
    /// Forces added directly with [`Rigidbody::add_force`] are cleared at the
    /// start of the frame; use [`World::register_body_force`] or
    /// [`Rigidbody::register_force`] to queue forces for the next step.
    ///
    /// # Errors
    ///
    /// Returns allocator errors from the step, or
    /// [`PhysicsError::Diverged`] when a dynamic body ends the step with a
    /// non-finite position or velocity.
    pub fn step(&mut self) -> Result<()> {
        let dt = self.config.timestep;
        self.start_frame();
        self.run_physics(dt)?;
        self.time += dt;
        self.step_count += 1;

        if let Some(body) = self
            .bodies
            .values()
            .find(|b| b.body_type().is_dynamic() && !b.is_finite())
        {
            return Err(PhysicsError::diverged(format!(
                "body {} has non-finite state at t={:.4}",
                body.id(),
                self.time
            )));
        }
        Ok(())
    }

    /// Clear force accumulators and refresh derived data of every body.
    pub fn start_frame(&mut self) {
        for body in self.bodies.values_mut() {
            body.clear_accumulators();
            body.calculate_derived_data();
        }
    }

    /// Integrate awake bodies, update contacts and solve islands.
    ///
    /// # Errors
    ///
    /// Returns [`PhysicsError::InvalidTimestep`] for a non-positive `dt`, or
    /// allocator errors from the narrow phase and solver.
    pub fn run_physics(&mut self, dt: f64) -> Result<()> {
        if !(dt > 0.0 && dt.is_finite()) {
            return Err(PhysicsError::InvalidTimestep(dt));
        }

        let gravity = self.config.gravity.acceleration;
        for &handle in &self.body_order {
            let Some(body) = self.bodies.get_mut(handle) else {
                continue;
            };
            if !body.is_awake() {
                continue;
            }
            body.calculate_force_accum();
            body.integrate(dt, &gravity);
            body.synchronize_fixtures(self.contact_manager.broad_phase_mut());
        }

        self.contact_manager.find_new_contacts(&mut self.bodies);
        self.contact_manager
            .collide(&mut self.bodies, &self.context, self.config.solver.warm_starting)?;
        self.solve(dt)
    }

    /// Partition awake bodies into islands along touching contacts and solve
    /// each island.
    ///
    /// Static bodies join islands but never extend them, and are released
    /// after each island so neighbouring islands can share them.
    ///
    /// # Errors
    ///
    /// Returns an allocator error when the scratch stack is exhausted.
    pub fn solve(&mut self, dt: f64) -> Result<()> {
        for body in self.bodies.values_mut() {
            body.flags.remove(BodyFlags::ISLAND);
        }
        let (contacts, broad_phase) = self.contact_manager.parts_mut();
        for contact in contacts.values_mut() {
            contact.set_flags(ContactFlags::ISLAND, false);
        }

        let stack = &self.context.stack;
        let mut island = Island::new(self.bodies.len(), contacts.len(), stack)?;
        let mut pending = stack.allocate::<BodyHandle>(self.bodies.len())?;
        let mut island_count = 0usize;

        for &seed in &self.body_order {
            let Some(body) = self.bodies.get_mut(seed) else {
                continue;
            };
            if body.flags.contains(BodyFlags::ISLAND)
                || body.body_type().is_static()
                || !body.is_awake()
            {
                continue;
            }

            island.clear();
            body.flags.insert(BodyFlags::ISLAND);
            pending.push(seed);

            while let Some(handle) = pending.pop() {
                let Some(body) = self.bodies.get_mut(handle) else {
                    continue;
                };
                island.add_body(body);
                if body.body_type().is_static() {
                    continue;
                }

                let links: SmallVec<[ContactLink; 8]> = body.contact_links().iter().copied().collect();
                for link in links {
                    let Some(contact) = contacts.get_mut(link.contact) else {
                        continue;
                    };
                    if contact.flags().contains(ContactFlags::ISLAND) || !contact.is_touching() {
                        continue;
                    }
                    island.add_contact(link.contact);
                    contact.set_flags(ContactFlags::ISLAND, true);

                    let Some(other) = self.bodies.get_mut(link.other) else {
                        continue;
                    };
                    if other.flags.contains(BodyFlags::ISLAND) {
                        continue;
                    }
                    other.flags.insert(BodyFlags::ISLAND);
                    pending.push(link.other);
                }
            }

            island.solve(dt, &mut self.bodies, contacts, broad_phase, &self.config, stack)?;
            island_count += 1;

            for &handle in island.bodies() {
                if let Some(body) = self.bodies.get_mut(handle) {
                    if body.body_type().is_static() {
                        body.flags.remove(BodyFlags::ISLAND);
                    }
                }
            }
        }

        debug!(islands = island_count, contacts = contacts.len(), "islands solved");
        Ok(())
    }

    // ========================================================================
    // Diagnostics
    // ========================================================================

    /// Total kinetic energy of dynamic bodies (translational part).
    #[must_use]
    pub fn total_kinetic_energy(&self) -> f64 {
        self.bodies
            .values()
            .filter(|b| b.body_type().is_dynamic())
            .map(|b| 0.5 * b.mass() * b.linear_velocity().norm_squared())
            .sum()
    }

    /// Total linear momentum of dynamic bodies.
    #[must_use]
    pub fn total_linear_momentum(&self) -> Vector3<f64> {
        self.bodies
            .values()
            .filter(|b| b.body_type().is_dynamic())
            .map(|b| b.linear_velocity() * b.mass())
            .sum()
    }
}
