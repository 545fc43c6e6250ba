//! Rigid bodies and their fixtures.
//!
//! A [`Rigidbody`] owns its [`Fixture`]s (shape + material + broad phase
//! proxy) and a list of [`ContactLink`]s to the contacts it takes part in.
//! Bodies are stored in the world's slot map and referred to by
//! [`BodyHandle`]; contacts and links refer to each other by key, never by
//! reference.

use std::collections::VecDeque;

use nalgebra::{Matrix3, Matrix4, Point3, Quaternion, UnitQuaternion, Vector3};
use physics_types::{BodyDef, BodyType, MassProperties, Material, PhysicsError, Pose, Result};
use smallvec::SmallVec;
use tracing::debug;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::broad_phase::BroadPhase;
use crate::contact::ContactKey;
use crate::dynamic_tree::ProxyId;
use crate::shape::{Aabb, Shape};

slotmap::new_key_type! {
    /// Generational handle to a [`Rigidbody`] in a world.
    pub struct BodyHandle;
}

bitflags::bitflags! {
    /// Per-step bookkeeping flags of a body.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    #[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
    pub struct BodyFlags: u8 {
        /// The body has been added to the island being built.
        const ISLAND = 0b0000_0001;
    }
}

/// Identifies one child of one fixture of one body.
///
/// This is the user data stored on broad phase proxies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FixtureProxy {
    /// Owning body.
    pub body: BodyHandle,
    /// Index of the fixture on the body.
    pub fixture: usize,
    /// Child index within the fixture's shape.
    pub child: usize,
}

impl FixtureProxy {
    /// Proxy for the single child of a fixture.
    #[must_use]
    pub const fn new(body: BodyHandle, fixture: usize) -> Self {
        Self {
            body,
            fixture,
            child: 0,
        }
    }
}

/// Everything needed to attach a fixture to a body.
#[derive(Debug, Clone, PartialEq)]
pub struct FixtureDef {
    /// Collision shape.
    pub shape: Shape,
    /// Friction, restitution and density.
    pub material: Material,
}

impl FixtureDef {
    /// Fixture with the default material.
    #[must_use]
    pub fn new(shape: Shape) -> Self {
        Self {
            shape,
            material: Material::default(),
        }
    }

    /// Set the material.
    #[must_use]
    pub fn with_material(mut self, material: Material) -> Self {
        self.material = material;
        self
    }

    /// Set the density.
    #[must_use]
    pub fn with_density(mut self, density: f64) -> Self {
        self.material.density = density;
        self
    }
}

impl From<Shape> for FixtureDef {
    fn from(shape: Shape) -> Self {
        Self::new(shape)
    }
}

/// A shape attached to a body.
#[derive(Debug, Clone)]
pub struct Fixture {
    shape: Shape,
    material: Material,
    proxy: ProxyId,
    aabb: Aabb,
}

impl Fixture {
    /// Collision shape.
    #[must_use]
    pub fn shape(&self) -> &Shape {
        &self.shape
    }

    /// Material.
    #[must_use]
    pub fn material(&self) -> &Material {
        &self.material
    }

    /// Broad phase proxy.
    #[must_use]
    pub fn proxy(&self) -> ProxyId {
        self.proxy
    }

    /// Tight world AABB at the last synchronization.
    #[must_use]
    pub fn aabb(&self) -> &Aabb {
        &self.aabb
    }
}

/// Edge of the contact graph, stored on both bodies of a contact.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContactLink {
    /// The body on the other side.
    pub other: BodyHandle,
    /// The contact.
    pub contact: ContactKey,
}

/// Pose of a body at the start of the last step.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Sweep {
    /// Pose before the step.
    pub previous: Pose,
}

impl Sweep {
    /// Blend from the previous pose to `current` (`alpha` in 0..=1).
    #[must_use]
    pub fn interpolate(&self, current: &Pose, alpha: f64) -> Pose {
        self.previous.lerp(current, alpha)
    }
}

// ============================================================================
// Rigidbody
// ============================================================================

/// A rigid body.
///
/// The center of mass is the body origin; fixture mass properties are
/// accumulated about it.
#[derive(Debug, Clone)]
pub struct Rigidbody {
    id: usize,
    handle: BodyHandle,
    body_type: BodyType,

    pose: Pose,
    sweep: Sweep,
    transform: Matrix4<f64>,
    linear_velocity: Vector3<f64>,
    angular_velocity: Vector3<f64>,

    mass: f64,
    inverse_mass: f64,
    local_inverse_inertia: Matrix3<f64>,
    world_inverse_inertia: Matrix3<f64>,

    force: Vector3<f64>,
    torque: Vector3<f64>,
    pending_forces: VecDeque<Vector3<f64>>,

    linear_damping: f64,
    angular_damping: f64,
    gravity_scale: f64,
    use_gravity: bool,
    position_freeze: Vector3<f64>,
    rotation_freeze: Vector3<f64>,

    can_sleep: bool,
    awake: bool,
    sleep_time: f64,

    fixtures: Vec<Fixture>,
    contact_links: SmallVec<[ContactLink; 4]>,

    pub(crate) flags: BodyFlags,
    pub(crate) island_index: usize,
}

impl Rigidbody {
    pub(crate) fn new(id: usize, handle: BodyHandle, def: &BodyDef) -> Self {
        let mut body = Self {
            id,
            handle,
            body_type: def.body_type,
            pose: def.pose,
            sweep: Sweep { previous: def.pose },
            transform: def.pose.to_matrix(),
            linear_velocity: Vector3::zeros(),
            angular_velocity: Vector3::zeros(),
            mass: 0.0,
            inverse_mass: 0.0,
            local_inverse_inertia: Matrix3::zeros(),
            world_inverse_inertia: Matrix3::zeros(),
            force: Vector3::zeros(),
            torque: Vector3::zeros(),
            pending_forces: VecDeque::new(),
            linear_damping: def.linear_damping,
            angular_damping: def.angular_damping,
            gravity_scale: def.gravity_scale,
            use_gravity: def.use_gravity,
            position_freeze: def.position_freeze,
            rotation_freeze: def.rotation_freeze,
            can_sleep: def.can_sleep,
            awake: def.is_awake,
            sleep_time: 0.0,
            fixtures: Vec::new(),
            contact_links: SmallVec::new(),
            flags: BodyFlags::empty(),
            island_index: 0,
        };
        if !body.body_type.is_static() {
            body.linear_velocity = def.linear_velocity;
            body.angular_velocity = def.angular_velocity;
        }
        body
    }

    // ------------------------------------------------------------------
    // Identity and state
    // ------------------------------------------------------------------

    /// Creation index within the world.
    #[must_use]
    pub fn id(&self) -> usize {
        self.id
    }

    /// Handle of this body.
    #[must_use]
    pub fn handle(&self) -> BodyHandle {
        self.handle
    }

    /// Static, kinematic or dynamic.
    #[must_use]
    pub fn body_type(&self) -> BodyType {
        self.body_type
    }

    /// Current pose.
    #[must_use]
    pub fn pose(&self) -> &Pose {
        &self.pose
    }

    /// Current position.
    #[must_use]
    pub fn position(&self) -> Point3<f64> {
        self.pose.position
    }

    /// Current orientation.
    #[must_use]
    pub fn rotation(&self) -> UnitQuaternion<f64> {
        self.pose.rotation
    }

    /// Pose at the start of the last step.
    #[must_use]
    pub fn sweep(&self) -> &Sweep {
        &self.sweep
    }

    /// Homogeneous transform for renderers.
    #[must_use]
    pub fn transform_matrix(&self) -> &Matrix4<f64> {
        &self.transform
    }

    /// Linear velocity.
    #[must_use]
    pub fn linear_velocity(&self) -> Vector3<f64> {
        self.linear_velocity
    }

    /// Angular velocity (world frame).
    #[must_use]
    pub fn angular_velocity(&self) -> Vector3<f64> {
        self.angular_velocity
    }

    /// Mass, 0 for static and kinematic bodies.
    #[must_use]
    pub fn mass(&self) -> f64 {
        self.mass
    }

    /// Inverse mass.
    #[must_use]
    pub fn inverse_mass(&self) -> f64 {
        self.inverse_mass
    }

    /// World-frame inverse inertia.
    #[must_use]
    pub fn inverse_inertia(&self) -> &Matrix3<f64> {
        &self.world_inverse_inertia
    }

    /// Accumulated force for this step.
    #[must_use]
    pub fn force(&self) -> Vector3<f64> {
        self.force
    }

    /// Accumulated torque for this step.
    #[must_use]
    pub fn torque(&self) -> Vector3<f64> {
        self.torque
    }

    /// Gravity multiplier.
    #[must_use]
    pub fn gravity_scale(&self) -> f64 {
        self.gravity_scale
    }

    /// Whether gravity applies.
    #[must_use]
    pub fn use_gravity(&self) -> bool {
        self.use_gravity
    }

    /// Whether the body is simulated this step.
    #[must_use]
    pub fn is_awake(&self) -> bool {
        self.awake
    }

    /// Whether the body may fall asleep.
    #[must_use]
    pub fn can_sleep(&self) -> bool {
        self.can_sleep
    }

    /// Time spent below the sleep thresholds.
    #[must_use]
    pub fn sleep_time(&self) -> f64 {
        self.sleep_time
    }

    /// Attached fixtures.
    #[must_use]
    pub fn fixtures(&self) -> &[Fixture] {
        &self.fixtures
    }

    /// Contacts this body takes part in.
    #[must_use]
    pub fn contact_links(&self) -> &[ContactLink] {
        &self.contact_links
    }

    pub(crate) fn add_contact_link(&mut self, link: ContactLink) {
        self.contact_links.push(link);
    }

    pub(crate) fn remove_contact_link(&mut self, contact: ContactKey) {
        self.contact_links.retain(|l| l.contact != contact);
    }

    /// World position of a body-local point.
    #[must_use]
    pub fn point_in_world_space(&self, local: &Point3<f64>) -> Point3<f64> {
        self.pose.transform_point(local)
    }

    /// Whether contacts with `other` should be generated.
    ///
    /// A body never collides with itself, and at least one side must be dynamic.
    #[must_use]
    pub fn should_collide(&self, other: &Self) -> bool {
        self.handle != other.handle
            && (self.body_type.is_dynamic() || other.body_type.is_dynamic())
    }

    // ------------------------------------------------------------------
    // Setters
    // ------------------------------------------------------------------

    /// Move the body. Frozen axes keep their current coordinate.
    pub fn set_position(&mut self, position: Point3<f64>) {
        let delta = (position - self.pose.position).component_mul(&self.position_freeze);
        self.pose.position += delta;
        self.calculate_derived_data();
    }

    /// Re-orient the body. Ignored when every rotation axis is frozen.
    pub fn set_orientation(&mut self, rotation: UnitQuaternion<f64>) {
        if self.rotation_freeze == Vector3::zeros() {
            return;
        }
        self.pose.rotation = rotation;
        self.calculate_derived_data();
    }

    /// Set the linear velocity, masked by the position freeze.
    pub fn set_linear_velocity(&mut self, velocity: Vector3<f64>) {
        if self.body_type.is_static() {
            return;
        }
        self.linear_velocity = velocity.component_mul(&self.position_freeze);
    }

    /// Set the angular velocity, masked by the rotation freeze.
    pub fn set_angular_velocity(&mut self, velocity: Vector3<f64>) {
        if self.body_type.is_static() {
            return;
        }
        self.angular_velocity = velocity.component_mul(&self.rotation_freeze);
    }

    /// Set damping coefficients.
    pub fn set_damping(&mut self, linear: f64, angular: f64) {
        self.linear_damping = linear;
        self.angular_damping = angular;
    }

    /// Set mass and body-frame inertia.
    ///
    /// Only dynamic bodies carry mass; a mass of 0 makes the body immovable
    /// by forces and contacts.
    pub fn set_mass_data(&mut self, mass_properties: &MassProperties) -> Result<()> {
        mass_properties.validate()?;
        if !self.body_type.is_dynamic() {
            self.mass = 0.0;
            self.inverse_mass = 0.0;
            self.local_inverse_inertia = Matrix3::zeros();
        } else {
            self.mass = mass_properties.mass;
            self.inverse_mass = mass_properties.inverse_mass();
            self.local_inverse_inertia = mass_properties.inverse_inertia();
        }
        self.calculate_derived_data();
        Ok(())
    }

    /// Set the mass, scaling the inertia to match.
    pub fn set_mass(&mut self, mass: f64) -> Result<()> {
        if !(mass.is_finite() && mass >= 0.0) {
            return Err(PhysicsError::invalid_mass(format!("mass {mass} is not valid")));
        }
        let scale = if self.mass > 0.0 { mass / self.mass } else { 0.0 };
        let inertia = self
            .local_inverse_inertia
            .try_inverse()
            .map_or_else(Matrix3::zeros, |i| i * scale);
        self.set_mass_data(&MassProperties::new(mass, inertia))
    }

    /// Recompute mass data from the fixtures' shapes and densities.
    pub fn reset_mass_data(&mut self) -> Result<()> {
        let total = self.fixtures.iter().fold(MassProperties::infinite(), |acc, f| {
            let m = f.shape.mass_properties(f.material.density);
            MassProperties::new(acc.mass + m.mass, acc.inertia + m.inertia)
        });
        self.set_mass_data(&total)
    }

    // ------------------------------------------------------------------
    // Forces
    // ------------------------------------------------------------------

    /// Add a force through the center of mass for this step.
    pub fn add_force(&mut self, force: Vector3<f64>) {
        self.force += force;
    }

    /// Add a torque for this step.
    pub fn add_torque(&mut self, torque: Vector3<f64>) {
        self.torque += torque;
    }

    /// Add a force applied at a world-space point.
    pub fn add_force_at_point(&mut self, force: Vector3<f64>, point: &Point3<f64>) {
        self.force += force;
        self.torque += (point - self.pose.position).cross(&force);
    }

    /// Add a force applied at a body-local point.
    pub fn add_force_at_body_point(&mut self, force: Vector3<f64>, local: &Point3<f64>) {
        let point = self.point_in_world_space(local);
        self.add_force_at_point(force, &point);
    }

    /// Queue a force for the next integration and wake the body.
    pub fn register_force(&mut self, force: Vector3<f64>) {
        self.pending_forces.push_back(force);
        if !self.awake {
            debug!(body = self.id, "woken by registered force");
        }
        self.set_awake();
    }

    /// Move queued forces into the accumulator.
    pub fn calculate_force_accum(&mut self) {
        while let Some(force) = self.pending_forces.pop_front() {
            self.force += force;
        }
    }

    /// Zero the force and torque accumulators.
    pub fn clear_accumulators(&mut self) {
        self.force = Vector3::zeros();
        self.torque = Vector3::zeros();
    }

    // ------------------------------------------------------------------
    // Integration
    // ------------------------------------------------------------------

    /// Refresh the world inverse inertia and transform matrix from the pose.
    pub fn calculate_derived_data(&mut self) {
        let r = self.pose.rotation_matrix();
        self.world_inverse_inertia = r * self.local_inverse_inertia * r.transpose();
        self.transform = self.pose.to_matrix();
    }

    /// Remember the current pose as the start of the step.
    pub fn update_sweep(&mut self) {
        self.sweep.previous = self.pose;
    }

    /// Advance the body by `dt` with semi-implicit Euler.
    ///
    /// Static bodies and bodies without fixtures do not move. Kinematic
    /// bodies move with their velocity but ignore forces and gravity.
    pub fn integrate(&mut self, dt: f64, gravity: &Vector3<f64>) {
        if self.body_type.is_static() || self.fixtures.is_empty() {
            return;
        }

        if self.body_type.is_dynamic() {
            let mut acceleration = self.force * self.inverse_mass;
            if self.use_gravity {
                acceleration += gravity * self.gravity_scale;
            }
            self.linear_velocity += acceleration.component_mul(&self.position_freeze) * dt;

            let angular_acceleration = self.world_inverse_inertia * self.torque;
            self.angular_velocity +=
                angular_acceleration.component_mul(&self.rotation_freeze) * dt;

            self.linear_velocity *= 1.0 - self.linear_damping;
            self.angular_velocity *= 1.0 - self.angular_damping;
        }

        self.update_sweep();

        self.pose.position += self.linear_velocity * dt;

        let w = self.angular_velocity * dt;
        let q = self.pose.rotation.into_inner();
        let spin = Quaternion::new(0.0, w.x, w.y, w.z) * q * 0.5;
        self.pose.rotation = UnitQuaternion::new_normalize(q + spin);

        self.calculate_derived_data();
        self.clear_accumulators();
    }

    // ------------------------------------------------------------------
    // Sleep
    // ------------------------------------------------------------------

    /// Count `dt` towards sleeping; falls asleep once past `time_to_sleep`.
    pub fn set_sleep(&mut self, dt: f64, time_to_sleep: f64) {
        if !self.can_sleep {
            return;
        }
        self.sleep_time += dt;
        if self.awake && self.sleep_time > time_to_sleep {
            self.awake = false;
            self.linear_velocity = Vector3::zeros();
            self.angular_velocity = Vector3::zeros();
            debug!(body = self.id, sleep_time = self.sleep_time, "body fell asleep");
        }
    }

    /// Wake the body and reset its sleep timer.
    pub fn set_awake(&mut self) {
        self.awake = true;
        self.sleep_time = 0.0;
    }

    // ------------------------------------------------------------------
    // Fixtures
    // ------------------------------------------------------------------

    /// Attach a fixture and register it with the broad phase.
    ///
    /// Returns the fixture index.
    pub(crate) fn create_fixture(
        &mut self,
        def: FixtureDef,
        broad_phase: &mut BroadPhase<FixtureProxy>,
    ) -> Result<usize> {
        def.shape.validate()?;
        def.material.validate()?;

        let index = self.fixtures.len();
        let aabb = def.shape.compute_aabb(&self.pose);
        let proxy = broad_phase.create_proxy(aabb, FixtureProxy::new(self.handle, index));
        self.fixtures.push(Fixture {
            shape: def.shape,
            material: def.material,
            proxy,
            aabb,
        });

        if self.body_type.is_dynamic() {
            self.reset_mass_data()?;
        }
        Ok(index)
    }

    /// Remove every fixture proxy from the broad phase.
    pub(crate) fn destroy_proxies(&mut self, broad_phase: &mut BroadPhase<FixtureProxy>) {
        for fixture in &self.fixtures {
            broad_phase.destroy_proxy(fixture.proxy);
        }
    }

    /// Push the fixtures' current AABBs into the broad phase.
    pub fn synchronize_fixtures(&mut self, broad_phase: &mut BroadPhase<FixtureProxy>) {
        let displacement = self.pose.position - self.sweep.previous.position;
        for fixture in &mut self.fixtures {
            fixture.aabb = fixture.shape.compute_aabb(&self.pose);
            broad_phase.move_proxy(fixture.proxy, fixture.aabb, &displacement);
        }
    }

    /// Whether position and velocity are free of NaN and infinity.
    #[must_use]
    pub fn is_finite(&self) -> bool {
        self.pose.is_finite()
            && self.linear_velocity.iter().all(|v| v.is_finite())
            && self.angular_velocity.iter().all(|v| v.is_finite())
    }

    // ------------------------------------------------------------------
    // Island solver access
    // ------------------------------------------------------------------

    /// Write back an island's solution. Frozen axes ignore the correction
    /// and keep zero velocity.
    pub(crate) fn commit(
        &mut self,
        position: Point3<f64>,
        correction: Vector3<f64>,
        linear_velocity: Vector3<f64>,
        angular_velocity: Vector3<f64>,
    ) {
        self.pose.position = position + correction.component_mul(&self.position_freeze);
        self.linear_velocity = linear_velocity.component_mul(&self.position_freeze);
        self.angular_velocity = angular_velocity.component_mul(&self.rotation_freeze);
        self.calculate_derived_data();
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::float_cmp)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use slotmap::SlotMap;

    fn body(def: &BodyDef) -> (Rigidbody, BroadPhase<FixtureProxy>) {
        let mut handles: SlotMap<BodyHandle, ()> = SlotMap::with_key();
        let handle = handles.insert(());
        let mut broad_phase = BroadPhase::new(0.1);
        let mut body = Rigidbody::new(0, handle, def);
        body.create_fixture(FixtureDef::new(Shape::cuboid(Vector3::repeat(0.5))), &mut broad_phase)
            .unwrap();
        (body, broad_phase)
    }

    #[test]
    fn test_mass_from_density() {
        let (b, _) = body(&BodyDef::dynamic());
        assert_relative_eq!(b.mass(), 1.0);
        assert_relative_eq!(b.inverse_mass(), 1.0);
        assert_relative_eq!(b.inverse_inertia()[(0, 0)], 6.0, epsilon = 1e-12);

        let (s, _) = body(&BodyDef::static_body());
        assert_eq!(s.inverse_mass(), 0.0);
        assert_eq!(*s.inverse_inertia(), Matrix3::zeros());
    }

    #[test]
    fn test_free_fall() {
        let (mut b, _) = body(&BodyDef::dynamic());
        let g = Vector3::new(0.0, -10.0, 0.0);
        b.integrate(0.1, &g);
        assert_relative_eq!(b.linear_velocity().y, -1.0, epsilon = 1e-12);
        assert_relative_eq!(b.position().y, -0.1, epsilon = 1e-12);
        assert_relative_eq!(b.sweep().previous.position.y, 0.0);
    }

    #[test]
    fn test_gravity_scale_and_damping() {
        let def = BodyDef::dynamic().with_gravity_scale(2.0).with_damping(0.5, 0.0);
        let (mut b, _) = body(&def);
        b.integrate(0.1, &Vector3::new(0.0, -10.0, 0.0));
        assert_relative_eq!(b.linear_velocity().y, -1.0, epsilon = 1e-12);
    }

    #[test]
    fn test_freeze_mask() {
        let def = BodyDef::dynamic().with_freeze(Vector3::new(1.0, 0.0, 1.0), Vector3::zeros());
        let (mut b, _) = body(&def);
        b.add_force(Vector3::new(1.0, 5.0, 0.0));
        b.add_torque(Vector3::new(1.0, 1.0, 1.0));
        b.integrate(1.0, &Vector3::new(0.0, -10.0, 0.0));
        assert_relative_eq!(b.linear_velocity(), Vector3::new(1.0, 0.0, 0.0));
        assert_eq!(b.angular_velocity(), Vector3::zeros());
        assert_eq!(b.rotation(), UnitQuaternion::identity());
    }

    #[test]
    fn test_force_at_point_adds_torque() {
        let (mut b, _) = body(&BodyDef::dynamic());
        b.add_force_at_point(Vector3::new(0.0, 1.0, 0.0), &Point3::new(1.0, 0.0, 0.0));
        assert_relative_eq!(b.torque(), Vector3::new(0.0, 0.0, 1.0));

        b.clear_accumulators();
        b.add_force_at_body_point(Vector3::new(0.0, 0.0, 2.0), &Point3::new(0.0, 1.0, 0.0));
        assert_relative_eq!(b.torque(), Vector3::new(2.0, 0.0, 0.0));
        assert_relative_eq!(b.force(), Vector3::new(0.0, 0.0, 2.0));
    }

    #[test]
    fn test_rotation_integration_stays_unit() {
        let def = BodyDef::dynamic()
            .without_gravity()
            .with_angular_velocity(Vector3::new(0.0, 3.0, 0.0));
        let (mut b, _) = body(&def);
        for _ in 0..100 {
            b.integrate(0.01, &Vector3::zeros());
        }
        assert_relative_eq!(b.rotation().into_inner().norm(), 1.0, epsilon = 1e-12);
        assert!(b.rotation().angle() > 2.5);
    }

    #[test]
    fn test_kinematic_ignores_forces() {
        let def = BodyDef::kinematic().with_linear_velocity(Vector3::new(1.0, 0.0, 0.0));
        let (mut b, _) = body(&def);
        assert_eq!(b.inverse_mass(), 0.0);
        b.add_force(Vector3::new(0.0, 100.0, 0.0));
        b.integrate(0.5, &Vector3::new(0.0, -10.0, 0.0));
        assert_relative_eq!(b.linear_velocity(), Vector3::new(1.0, 0.0, 0.0));
        assert_relative_eq!(b.position().x, 0.5);
    }

    #[test]
    fn test_sleep_timer_and_register_force() {
        let (mut b, _) = body(&BodyDef::dynamic());
        b.set_sleep(0.2, 0.3);
        assert!(b.is_awake());
        b.set_sleep(0.2, 0.3);
        assert!(!b.is_awake());

        b.register_force(Vector3::new(0.0, 1.0, 0.0));
        assert!(b.is_awake());
        assert_eq!(b.sleep_time(), 0.0);
        b.calculate_force_accum();
        assert_relative_eq!(b.force(), Vector3::new(0.0, 1.0, 0.0));

        // Reaching the threshold exactly is not enough.
        let (mut drowsy, _) = body(&BodyDef::dynamic());
        drowsy.set_sleep(0.25, 0.5);
        drowsy.set_sleep(0.25, 0.5);
        assert!(drowsy.is_awake());
        drowsy.set_sleep(0.25, 0.5);
        assert!(!drowsy.is_awake());

        let (mut insomniac, _) = body(&BodyDef::dynamic().never_sleep());
        insomniac.set_sleep(10.0, 0.3);
        assert!(insomniac.is_awake());
    }

    #[test]
    fn test_set_mass_zero_is_immovable() {
        let (mut b, _) = body(&BodyDef::dynamic());
        b.set_mass(0.0).unwrap();
        assert_eq!(b.inverse_mass(), 0.0);
        assert_eq!(*b.inverse_inertia(), Matrix3::zeros());
        assert!(b.set_mass(-1.0).is_err());
    }

    #[test]
    fn test_synchronize_moves_proxy() {
        let (mut b, mut bp) = body(&BodyDef::dynamic());
        bp.update_pairs(&mut |_: FixtureProxy, _: FixtureProxy| {});
        b.set_position(Point3::new(3.0, 0.0, 0.0));
        b.synchronize_fixtures(&mut bp);
        assert_eq!(bp.move_count(), 1);
        assert!(bp.fat_aabb(b.fixtures()[0].proxy()).unwrap().contains(b.fixtures()[0].aabb()));
    }

    #[test]
    fn test_sweep_interpolate() {
        let sweep = Sweep {
            previous: Pose::from_position(Point3::new(0.0, 0.0, 0.0)),
        };
        let current = Pose::from_position(Point3::new(2.0, 0.0, 0.0));
        assert_relative_eq!(sweep.interpolate(&current, 0.25).position.x, 0.5);
    }
}
