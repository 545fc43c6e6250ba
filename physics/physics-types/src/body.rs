//! Rigid body description types.
//!
//! This module provides the plain data that describes a rigid body before and
//! after it enters a world: its pose, its velocity, its mass properties, and
//! the [`BodyDef`] used to create it.

use nalgebra::{Matrix3, Matrix4, Point3, UnitQuaternion, Vector3};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Position and orientation of a rigid body.
///
/// # Example
///
/// ```
/// use physics_types::Pose;
/// use nalgebra::Point3;
///
/// let pose = Pose::from_position(Point3::new(1.0, 2.0, 3.0));
/// let world = pose.transform_point(&Point3::new(1.0, 0.0, 0.0));
/// assert_eq!(world, Point3::new(2.0, 2.0, 3.0));
/// ```
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Pose {
    /// Position in world coordinates.
    pub position: Point3<f64>,
    /// Orientation as a unit quaternion.
    pub rotation: UnitQuaternion<f64>,
}

impl Default for Pose {
    fn default() -> Self {
        Self::identity()
    }
}

impl Pose {
    /// Create an identity pose (origin, no rotation).
    #[must_use]
    pub fn identity() -> Self {
        Self {
            position: Point3::origin(),
            rotation: UnitQuaternion::identity(),
        }
    }

    /// Create a pose from position only (identity rotation).
    #[must_use]
    pub fn from_position(position: Point3<f64>) -> Self {
        Self {
            position,
            rotation: UnitQuaternion::identity(),
        }
    }

    /// Create a pose from position and rotation.
    #[must_use]
    pub const fn from_position_rotation(
        position: Point3<f64>,
        rotation: UnitQuaternion<f64>,
    ) -> Self {
        Self { position, rotation }
    }

    /// Transform a point from local to world coordinates.
    #[must_use]
    pub fn transform_point(&self, local: &Point3<f64>) -> Point3<f64> {
        self.position + self.rotation * local.coords
    }

    /// Transform a vector from local to world coordinates (rotation only).
    #[must_use]
    pub fn transform_vector(&self, local: &Vector3<f64>) -> Vector3<f64> {
        self.rotation * local
    }

    /// Transform a point from world to local coordinates.
    #[must_use]
    pub fn inverse_transform_point(&self, world: &Point3<f64>) -> Point3<f64> {
        Point3::from(self.rotation.inverse() * (world - self.position))
    }

    /// Transform a vector from world to local coordinates.
    #[must_use]
    pub fn inverse_transform_vector(&self, world: &Vector3<f64>) -> Vector3<f64> {
        self.rotation.inverse() * world
    }

    /// Rotation part as a 3x3 matrix.
    #[must_use]
    pub fn rotation_matrix(&self) -> Matrix3<f64> {
        self.rotation.to_rotation_matrix().into_inner()
    }

    /// Homogeneous 4x4 transform, the form renderers consume.
    #[must_use]
    pub fn to_matrix(&self) -> Matrix4<f64> {
        let mut m = self.rotation.to_homogeneous();
        m.fixed_view_mut::<3, 1>(0, 3).copy_from(&self.position.coords);
        m
    }

    /// Interpolate between two poses.
    ///
    /// Position is interpolated linearly, rotation with SLERP.
    #[must_use]
    pub fn lerp(&self, other: &Self, t: f64) -> Self {
        let t = t.clamp(0.0, 1.0);
        Self {
            position: Point3::from(self.position.coords.lerp(&other.position.coords, t)),
            rotation: self.rotation.slerp(&other.rotation, t),
        }
    }

    /// Check if the pose contains `NaN` or `Inf` values.
    #[must_use]
    pub fn is_finite(&self) -> bool {
        self.position.coords.iter().all(|x| x.is_finite())
            && self.rotation.coords.iter().all(|x| x.is_finite())
    }
}

/// Linear and angular velocity of a rigid body.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Twist {
    /// Linear velocity in world coordinates (m/s).
    pub linear: Vector3<f64>,
    /// Angular velocity in world coordinates (rad/s).
    pub angular: Vector3<f64>,
}

impl Twist {
    /// Create a twist from linear and angular parts.
    #[must_use]
    pub const fn new(linear: Vector3<f64>, angular: Vector3<f64>) -> Self {
        Self { linear, angular }
    }

    /// Zero velocity.
    #[must_use]
    pub fn zero() -> Self {
        Self::default()
    }

    /// Velocity of a point at `offset` from the center of mass.
    #[must_use]
    pub fn velocity_at_point(&self, offset: &Vector3<f64>) -> Vector3<f64> {
        self.linear + self.angular.cross(offset)
    }

    /// Check if the twist contains `NaN` or `Inf` values.
    #[must_use]
    pub fn is_finite(&self) -> bool {
        self.linear.iter().all(|x| x.is_finite()) && self.angular.iter().all(|x| x.is_finite())
    }
}

/// How a body takes part in the simulation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum BodyType {
    /// Never moves, infinite mass.
    #[default]
    Static,
    /// Moves with its velocity, unaffected by forces and contacts.
    Kinematic,
    /// Fully simulated.
    Dynamic,
}

impl BodyType {
    /// Whether the body is fully simulated.
    #[must_use]
    pub const fn is_dynamic(self) -> bool {
        matches!(self, Self::Dynamic)
    }

    /// Whether the body never moves.
    #[must_use]
    pub const fn is_static(self) -> bool {
        matches!(self, Self::Static)
    }
}

/// Configuration used to create a rigid body.
///
/// Mirrors what a scene serializer round-trips for a body component.
///
/// # Example
///
/// ```
/// use physics_types::{BodyDef, BodyType};
/// use nalgebra::{Point3, Vector3};
///
/// let def = BodyDef::dynamic()
///     .with_position(Point3::new(0.0, 2.0, 0.0))
///     .with_linear_velocity(Vector3::new(1.0, 0.0, 0.0))
///     .with_gravity_scale(0.5);
///
/// assert_eq!(def.body_type, BodyType::Dynamic);
/// assert!(def.validate().is_ok());
/// ```
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct BodyDef {
    /// Body type.
    pub body_type: BodyType,
    /// Initial pose.
    pub pose: Pose,
    /// Initial linear velocity.
    pub linear_velocity: Vector3<f64>,
    /// Initial angular velocity.
    pub angular_velocity: Vector3<f64>,
    /// Fraction of linear velocity removed per step, in `[0, 1]`.
    pub linear_damping: f64,
    /// Fraction of angular velocity removed per step, in `[0, 1]`.
    pub angular_damping: f64,
    /// Whether the body may fall asleep.
    pub can_sleep: bool,
    /// Whether the body starts awake.
    pub is_awake: bool,
    /// Whether world gravity acts on the body.
    pub use_gravity: bool,
    /// Multiplier on world gravity.
    pub gravity_scale: f64,
    /// Per-axis translation mask: 1 leaves the axis free, 0 locks it.
    pub position_freeze: Vector3<f64>,
    /// Per-axis rotation mask: 1 leaves the axis free, 0 locks it.
    pub rotation_freeze: Vector3<f64>,
}

impl Default for BodyDef {
    fn default() -> Self {
        Self {
            body_type: BodyType::Static,
            pose: Pose::identity(),
            linear_velocity: Vector3::zeros(),
            angular_velocity: Vector3::zeros(),
            linear_damping: 0.0,
            angular_damping: 0.0,
            can_sleep: true,
            is_awake: true,
            use_gravity: true,
            gravity_scale: 1.0,
            position_freeze: Vector3::repeat(1.0),
            rotation_freeze: Vector3::repeat(1.0),
        }
    }
}

impl BodyDef {
    /// A static body definition.
    #[must_use]
    pub fn static_body() -> Self {
        Self::default()
    }

    /// A kinematic body definition.
    #[must_use]
    pub fn kinematic() -> Self {
        Self {
            body_type: BodyType::Kinematic,
            ..Default::default()
        }
    }

    /// A dynamic body definition.
    #[must_use]
    pub fn dynamic() -> Self {
        Self {
            body_type: BodyType::Dynamic,
            ..Default::default()
        }
    }

    /// Set the initial position.
    #[must_use]
    pub fn with_position(mut self, position: Point3<f64>) -> Self {
        self.pose.position = position;
        self
    }

    /// Set the initial orientation.
    #[must_use]
    pub fn with_rotation(mut self, rotation: UnitQuaternion<f64>) -> Self {
        self.pose.rotation = rotation;
        self
    }

    /// Set the initial linear velocity.
    #[must_use]
    pub fn with_linear_velocity(mut self, velocity: Vector3<f64>) -> Self {
        self.linear_velocity = velocity;
        self
    }

    /// Set the initial angular velocity.
    #[must_use]
    pub fn with_angular_velocity(mut self, velocity: Vector3<f64>) -> Self {
        self.angular_velocity = velocity;
        self
    }

    /// Set damping coefficients.
    #[must_use]
    pub fn with_damping(mut self, linear: f64, angular: f64) -> Self {
        self.linear_damping = linear;
        self.angular_damping = angular;
        self
    }

    /// Set the gravity multiplier.
    #[must_use]
    pub fn with_gravity_scale(mut self, scale: f64) -> Self {
        self.gravity_scale = scale;
        self
    }

    /// Disable gravity for this body.
    #[must_use]
    pub fn without_gravity(mut self) -> Self {
        self.use_gravity = false;
        self
    }

    /// Keep the body permanently awake.
    #[must_use]
    pub fn never_sleep(mut self) -> Self {
        self.can_sleep = false;
        self
    }

    /// Create the body asleep.
    #[must_use]
    pub fn asleep(mut self) -> Self {
        self.is_awake = false;
        self
    }

    /// Set per-axis translation and rotation masks.
    #[must_use]
    pub fn with_freeze(mut self, position: Vector3<f64>, rotation: Vector3<f64>) -> Self {
        self.position_freeze = position;
        self.rotation_freeze = rotation;
        self
    }

    /// Validate the definition.
    pub fn validate(&self) -> crate::Result<()> {
        if !self.pose.is_finite() {
            return Err(crate::PhysicsError::invalid_config("body pose must be finite"));
        }
        if !Twist::new(self.linear_velocity, self.angular_velocity).is_finite() {
            return Err(crate::PhysicsError::invalid_config(
                "body velocity must be finite",
            ));
        }
        for (name, damping) in [
            ("linear_damping", self.linear_damping),
            ("angular_damping", self.angular_damping),
        ] {
            if !(0.0..=1.0).contains(&damping) {
                return Err(crate::PhysicsError::invalid_config(format!(
                    "{name} must be in [0, 1], got {damping}"
                )));
            }
        }
        if !self.gravity_scale.is_finite() {
            return Err(crate::PhysicsError::invalid_config(
                "gravity_scale must be finite",
            ));
        }
        Ok(())
    }
}

/// Mass properties of a rigid body.
///
/// The inertia tensor is expressed about the body origin in body coordinates.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct MassProperties {
    /// Total mass in kg. Zero means infinite mass.
    pub mass: f64,
    /// Inertia tensor (kg·m²).
    pub inertia: Matrix3<f64>,
}

impl Default for MassProperties {
    fn default() -> Self {
        Self::infinite()
    }
}

impl MassProperties {
    /// Create mass properties with given values.
    #[must_use]
    pub const fn new(mass: f64, inertia: Matrix3<f64>) -> Self {
        Self { mass, inertia }
    }

    /// Infinite mass, as used by static and kinematic bodies.
    #[must_use]
    pub fn infinite() -> Self {
        Self {
            mass: 0.0,
            inertia: Matrix3::zeros(),
        }
    }

    /// Uniform solid sphere: I = (2/5) m r².
    #[must_use]
    pub fn sphere(mass: f64, radius: f64) -> Self {
        let i = 0.4 * mass * radius * radius;
        Self::new(mass, Matrix3::from_diagonal(&Vector3::repeat(i)))
    }

    /// Uniform solid box.
    ///
    /// - Ixx = (1/12) m (y² + z²)
    /// - Iyy = (1/12) m (x² + z²)
    /// - Izz = (1/12) m (x² + y²)
    #[must_use]
    pub fn cuboid(mass: f64, half_extents: Vector3<f64>) -> Self {
        let x2 = 4.0 * half_extents.x * half_extents.x;
        let y2 = 4.0 * half_extents.y * half_extents.y;
        let z2 = 4.0 * half_extents.z * half_extents.z;

        Self::new(
            mass,
            Matrix3::from_diagonal(&Vector3::new(
                mass * (y2 + z2) / 12.0,
                mass * (x2 + z2) / 12.0,
                mass * (x2 + y2) / 12.0,
            )),
        )
    }

    /// Uniform solid cylinder along the local Y axis.
    ///
    /// - Iyy = (1/2) m r²
    /// - Ixx = Izz = (1/12) m (3r² + h²)
    #[must_use]
    pub fn cylinder(mass: f64, radius: f64, height: f64) -> Self {
        let r2 = radius * radius;
        let side = mass * (3.0 * r2 + height * height) / 12.0;
        Self::new(
            mass,
            Matrix3::from_diagonal(&Vector3::new(side, 0.5 * mass * r2, side)),
        )
    }

    /// Uniform solid capsule along the local Y axis.
    ///
    /// `height` is the length of the cylindrical section between the two
    /// hemisphere centers.
    #[must_use]
    pub fn capsule(mass: f64, radius: f64, height: f64) -> Self {
        let r2 = radius * radius;
        let cylinder_volume = std::f64::consts::PI * r2 * height;
        let sphere_volume = 4.0 / 3.0 * std::f64::consts::PI * r2 * radius;
        let total = cylinder_volume + sphere_volume;
        if total <= 0.0 {
            return Self::infinite();
        }

        let m_cyl = mass * cylinder_volume / total;
        let m_hemi = 0.5 * mass * sphere_volume / total;

        let axial = 0.5 * m_cyl * r2 + 2.0 * m_hemi * 0.4 * r2;
        // Hemisphere about its own centroid, shifted out to the cap.
        let offset = 0.5 * height + 0.375 * radius;
        let side = m_cyl * (3.0 * r2 + height * height) / 12.0
            + 2.0 * m_hemi * (83.0 / 320.0 * r2 + offset * offset);

        Self::new(mass, Matrix3::from_diagonal(&Vector3::new(side, axial, side)))
    }

    /// Inverse mass, 0 for infinite mass.
    #[must_use]
    pub fn inverse_mass(&self) -> f64 {
        if self.mass <= 0.0 || self.mass.is_infinite() {
            0.0
        } else {
            1.0 / self.mass
        }
    }

    /// Inverse inertia tensor, zero when the mass is infinite or the tensor singular.
    #[must_use]
    pub fn inverse_inertia(&self) -> Matrix3<f64> {
        if self.inverse_mass() == 0.0 {
            return Matrix3::zeros();
        }
        self.inertia.try_inverse().unwrap_or_else(Matrix3::zeros)
    }

    /// Validate that the mass properties are physically valid.
    pub fn validate(&self) -> crate::Result<()> {
        if self.mass < 0.0 || self.mass.is_nan() {
            return Err(crate::PhysicsError::invalid_mass(
                "mass must be non-negative",
            ));
        }
        let eigenvalues = self.inertia.symmetric_eigenvalues();
        if eigenvalues.iter().any(|&e| e < -1e-10 || !e.is_finite()) {
            return Err(crate::PhysicsError::invalid_mass(
                "inertia tensor must be positive semi-definite",
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::float_cmp)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_pose_rotation() {
        let pose = Pose::from_position_rotation(
            Point3::origin(),
            UnitQuaternion::from_euler_angles(0.0, 0.0, std::f64::consts::FRAC_PI_2),
        );

        let world = pose.transform_vector(&Vector3::x());
        assert_relative_eq!(world.x, 0.0, epsilon = 1e-10);
        assert_relative_eq!(world.y, 1.0, epsilon = 1e-10);

        let back = pose.inverse_transform_vector(&world);
        assert_relative_eq!(back, Vector3::x(), epsilon = 1e-10);
    }

    #[test]
    fn test_pose_matrix() {
        let pose = Pose::from_position_rotation(
            Point3::new(1.0, 2.0, 3.0),
            UnitQuaternion::from_euler_angles(0.3, 0.2, 0.1),
        );
        let m = pose.to_matrix();
        let p = Point3::new(0.5, -1.0, 2.0);

        let via_matrix = m.transform_point(&p);
        let via_pose = pose.transform_point(&p);
        assert_relative_eq!(via_matrix, via_pose, epsilon = 1e-10);
    }

    #[test]
    fn test_pose_lerp() {
        let a = Pose::from_position(Point3::new(0.0, 0.0, 0.0));
        let b = Pose::from_position(Point3::new(10.0, 0.0, 0.0));
        assert_relative_eq!(a.lerp(&b, 0.5).position.x, 5.0, epsilon = 1e-10);
    }

    #[test]
    fn test_body_def_defaults() {
        let def = BodyDef::default();
        assert_eq!(def.body_type, BodyType::Static);
        assert!(def.can_sleep);
        assert!(def.is_awake);
        assert_eq!(def.position_freeze, Vector3::repeat(1.0));
    }

    #[test]
    fn test_body_def_validation() {
        assert!(BodyDef::dynamic().validate().is_ok());
        assert!(BodyDef::dynamic().with_damping(1.5, 0.0).validate().is_err());

        let mut def = BodyDef::dynamic();
        def.linear_velocity.x = f64::NAN;
        assert!(def.validate().is_err());
    }

    #[test]
    fn test_mass_properties_box() {
        let props = MassProperties::cuboid(12.0, Vector3::new(0.5, 0.5, 0.5));
        assert_relative_eq!(props.inertia[(0, 0)], 2.0, epsilon = 1e-10);
        assert_relative_eq!(props.inverse_mass(), 1.0 / 12.0, epsilon = 1e-12);
    }

    #[test]
    fn test_mass_properties_capsule_degenerates_to_sphere() {
        let capsule = MassProperties::capsule(2.0, 0.5, 0.0);
        let sphere = MassProperties::sphere(2.0, 0.5);
        assert_relative_eq!(capsule.inertia[(1, 1)], sphere.inertia[(1, 1)], epsilon = 1e-10);
    }

    #[test]
    fn test_infinite_mass() {
        let props = MassProperties::infinite();
        assert_eq!(props.inverse_mass(), 0.0);
        assert_eq!(props.inverse_inertia(), Matrix3::zeros());
        assert!(props.validate().is_ok());
        assert!(MassProperties::new(-1.0, Matrix3::identity()).validate().is_err());
    }
}
