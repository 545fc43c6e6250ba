//! Islands: connected groups of bodies solved together.
//!
//! The world builds one [`Island`] at a time by walking touching contacts,
//! solves it, then reuses the same storage for the next one.

use physics_types::{Result, WorldConfig};
use slotmap::SlotMap;
use tracing::debug;

use crate::alloc::{StackAllocator, StackVec};
use crate::body::{BodyHandle, FixtureProxy, Rigidbody};
use crate::broad_phase::BroadPhase;
use crate::contact::{Contact, ContactKey};
use crate::solver::{ContactSolver, SolverBody};

/// Bodies and touching contacts of one connected component.
#[derive(Debug)]
pub struct Island {
    bodies: StackVec<BodyHandle>,
    contacts: StackVec<ContactKey>,
}

impl Island {
    /// Reserve room for up to `body_capacity` bodies and `contact_capacity`
    /// contacts.
    ///
    /// # Errors
    ///
    /// Returns an allocator error when the stack cannot hold the lists.
    pub fn new(body_capacity: usize, contact_capacity: usize, stack: &StackAllocator) -> Result<Self> {
        // Fields drop in declaration order, so `bodies` is allocated last.
        let contacts = stack.allocate(contact_capacity)?;
        let bodies = stack.allocate(body_capacity)?;
        Ok(Self { bodies, contacts })
    }

    /// Add a body, recording its index within the island.
    ///
    /// # Panics
    ///
    /// Panics if the island is already at capacity.
    pub fn add_body(&mut self, body: &mut Rigidbody) {
        body.island_index = self.bodies.len();
        self.bodies.push(body.handle());
    }

    /// Add a contact.
    ///
    /// # Panics
    ///
    /// Panics if the island is already at capacity.
    pub fn add_contact(&mut self, contact: ContactKey) {
        self.contacts.push(contact);
    }

    /// Empty the island for reuse.
    pub fn clear(&mut self) {
        self.bodies.clear();
        self.contacts.clear();
    }

    /// Bodies in island order.
    #[must_use]
    pub fn bodies(&self) -> &[BodyHandle] {
        &self.bodies
    }

    /// Contacts of the island.
    #[must_use]
    pub fn contacts(&self) -> &[ContactKey] {
        &self.contacts
    }

    /// Solve the island's contacts and write the results back to its bodies.
    ///
    /// A lone body has nothing to solve against and is left untouched.
    ///
    /// # Errors
    ///
    /// Returns an allocator error when the stack cannot hold the solver state.
    pub fn solve(
        &self,
        dt: f64,
        bodies: &mut SlotMap<BodyHandle, Rigidbody>,
        contacts: &mut SlotMap<ContactKey, Contact>,
        broad_phase: &mut BroadPhase<FixtureProxy>,
        config: &WorldConfig,
        stack: &StackAllocator,
    ) -> Result<()> {
        if self.bodies.len() <= 1 {
            return Ok(());
        }

        let mut states = stack.allocate::<SolverBody>(self.bodies.len())?;
        for &handle in self.bodies.iter() {
            states.push(bodies.get(handle).map_or_else(SolverBody::default, SolverBody::new));
        }

        {
            let mut solver = ContactSolver::new(&self.contacts, contacts, bodies, &config.solver, stack)?;
            if config.solver.warm_starting {
                solver.warm_start(&mut states);
            }
            for _ in 0..config.solver.velocity_iterations {
                solver.solve_velocity_constraints(&mut states);
            }
            for _ in 0..config.solver.position_iterations {
                solver.solve_position_constraints(&mut states);
            }
            solver.check_sleep_contact(&mut states, &config.sleep, &config.gravity.up());
        }

        for (state, &handle) in states.iter_mut().zip(self.bodies.iter()) {
            let Some(body) = bodies.get_mut(handle) else {
                continue;
            };
            if body.body_type().is_static() {
                continue;
            }

            let still = state.sleep.normal_stop
                && state.sleep.tangent_stop
                && state.sleep.is_normal
                && state.linear_velocity.norm() < config.sleep.linear_threshold
                && state.angular_velocity.norm() < config.sleep.angular_threshold;

            if config.sleep.enabled && still && body.body_type().is_dynamic() {
                state.linear_velocity.fill(0.0);
                state.angular_velocity.fill(0.0);
                body.set_sleep(dt, config.sleep.time_to_sleep);
            } else {
                if !body.is_awake() {
                    debug!(body = body.id(), "woken by contact");
                }
                body.set_awake();
            }

            body.update_sweep();
            body.commit(
                state.position,
                state.position_buffer,
                state.linear_velocity,
                state.angular_velocity,
            );
            body.synchronize_fixtures(broad_phase);
        }
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::float_cmp)]
mod tests {
    use super::*;
    use crate::body::{ContactLink, FixtureDef};
    use crate::shape::Shape;
    use nalgebra::{Point3, Vector3};
    use physics_types::{BodyDef, Material};

    #[test]
    fn test_add_records_island_index() {
        let stack = StackAllocator::default();
        let mut bodies: SlotMap<BodyHandle, Rigidbody> = SlotMap::with_key();
        let a = bodies.insert_with_key(|h| Rigidbody::new(0, h, &BodyDef::dynamic()));
        let b = bodies.insert_with_key(|h| Rigidbody::new(1, h, &BodyDef::dynamic()));

        let mut island = Island::new(2, 0, &stack).unwrap();
        island.add_body(&mut bodies[b]);
        island.add_body(&mut bodies[a]);
        assert_eq!(island.bodies(), &[b, a]);
        assert_eq!(bodies[b].island_index, 0);
        assert_eq!(bodies[a].island_index, 1);

        island.clear();
        assert!(island.bodies().is_empty());
        drop(island);
        assert_eq!(stack.entry_count(), 0);
    }

    #[test]
    fn test_solve_pushes_box_out_of_ground() {
        let ctx = crate::alloc::PhysicsContext::default();
        let config = WorldConfig::default();
        let mut broad_phase = BroadPhase::new(config.aabb_margin);
        let mut bodies: SlotMap<BodyHandle, Rigidbody> = SlotMap::with_key();
        let shape = Shape::cuboid(Vector3::repeat(0.5));

        let ground = bodies.insert_with_key(|h| Rigidbody::new(0, h, &BodyDef::static_body()));
        let top = bodies.insert_with_key(|h| {
            Rigidbody::new(
                1,
                h,
                &BodyDef::dynamic()
                    .with_position(Point3::new(0.0, 0.95, 0.0))
                    .with_linear_velocity(Vector3::new(0.0, -1.0, 0.0)),
            )
        });
        for handle in [ground, top] {
            bodies[handle]
                .create_fixture(FixtureDef::new(shape.clone()), &mut broad_phase)
                .unwrap();
        }

        let material = Material::default();
        let mut contact = Contact::new(
            FixtureProxy::new(ground, 0),
            shape.kind(),
            &material,
            FixtureProxy::new(top, 0),
            shape.kind(),
            &material,
        );
        contact
            .update(&shape, bodies[ground].pose(), &shape, bodies[top].pose(), &ctx, false)
            .unwrap();
        let mut contacts = SlotMap::with_key();
        let key = contacts.insert(contact);
        bodies[ground].add_contact_link(ContactLink { other: top, contact: key });
        bodies[top].add_contact_link(ContactLink { other: ground, contact: key });

        let mut island = Island::new(2, 1, &ctx.stack).unwrap();
        island.add_body(&mut bodies[top]);
        island.add_body(&mut bodies[ground]);
        island.add_contact(key);
        island
            .solve(config.timestep, &mut bodies, &mut contacts, &mut broad_phase, &config, &ctx.stack)
            .unwrap();
        drop(island);

        let body = &bodies[top];
        assert!(body.position().y > 0.99 - config.solver.linear_slop);
        assert!(body.linear_velocity().y > -1.0);
        assert_eq!(bodies[ground].position(), Point3::origin());
        assert_eq!(ctx.stack.entry_count(), 0);
    }

    #[test]
    fn test_lone_body_is_untouched() {
        let stack = StackAllocator::default();
        let config = WorldConfig::default();
        let mut broad_phase = BroadPhase::new(0.1);
        let mut bodies: SlotMap<BodyHandle, Rigidbody> = SlotMap::with_key();
        let mut contacts = SlotMap::with_key();
        let handle = bodies.insert_with_key(|h| {
            Rigidbody::new(0, h, &BodyDef::dynamic().with_linear_velocity(Vector3::x()))
        });

        let mut island = Island::new(1, 0, &stack).unwrap();
        island.add_body(&mut bodies[handle]);
        island
            .solve(1.0 / 60.0, &mut bodies, &mut contacts, &mut broad_phase, &config, &stack)
            .unwrap();
        assert_eq!(bodies[handle].linear_velocity(), Vector3::x());
    }
}
