//! Convex collision geometry.
//!
//! A [`Shape`] is one of four convex primitives. Each can report a world-space
//! [`Aabb`] for the broad phase and a [`ConvexInfo`] for the narrow phase.
//!
//! Cylinders and capsules are aligned with their local Y axis and are
//! pre-tessellated at construction into [`SEGMENTS`] angular segments: two
//! rings of rim points plus one outward axis per barrel segment. The narrow
//! phase uses the rings as a discrete support set (cylinder) and as candidate
//! contact faces (cylinder and capsule).

use std::f64::consts::TAU;

use nalgebra::{Point3, UnitQuaternion, Vector3};
use physics_types::{MassProperties, PhysicsError, Pose, Result};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::alloc::{Block, PhysicsContext};

/// Number of angular segments used to tessellate round shapes.
pub const SEGMENTS: usize = 20;

/// Padding added around every shape's tight AABB.
pub const AABB_SKIN: f64 = 0.1;

// ============================================================================
// Aabb
// ============================================================================

/// Axis-aligned bounding box.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Aabb {
    /// Minimum corner.
    pub min: Point3<f64>,
    /// Maximum corner.
    pub max: Point3<f64>,
}

impl Aabb {
    /// Create an AABB from corners.
    #[must_use]
    pub const fn new(min: Point3<f64>, max: Point3<f64>) -> Self {
        Self { min, max }
    }

    /// Create an AABB from a center and half-extents.
    #[must_use]
    pub fn from_center(center: Point3<f64>, half_extents: Vector3<f64>) -> Self {
        Self {
            min: center - half_extents,
            max: center + half_extents,
        }
    }

    /// Smallest AABB containing all `points`, or `None` for an empty set.
    #[must_use]
    pub fn from_points<'a>(points: impl IntoIterator<Item = &'a Point3<f64>>) -> Option<Self> {
        let mut iter = points.into_iter();
        let first = *iter.next()?;
        Some(iter.fold(Self::new(first, first), |aabb, p| Self {
            min: aabb.min.inf(p),
            max: aabb.max.sup(p),
        }))
    }

    /// Check whether two boxes overlap (touching counts).
    #[must_use]
    pub fn overlaps(&self, other: &Self) -> bool {
        self.min.x <= other.max.x
            && self.max.x >= other.min.x
            && self.min.y <= other.max.y
            && self.max.y >= other.min.y
            && self.min.z <= other.max.z
            && self.max.z >= other.min.z
    }

    /// Check whether `other` lies entirely inside this box.
    #[must_use]
    pub fn contains(&self, other: &Self) -> bool {
        self.min.x <= other.min.x
            && self.min.y <= other.min.y
            && self.min.z <= other.min.z
            && other.max.x <= self.max.x
            && other.max.y <= self.max.y
            && other.max.z <= self.max.z
    }

    /// Smallest box containing both.
    #[must_use]
    pub fn union(&self, other: &Self) -> Self {
        Self {
            min: self.min.inf(&other.min),
            max: self.max.sup(&other.max),
        }
    }

    /// Grow the box by `margin` on every side.
    #[must_use]
    pub fn expanded(&self, margin: f64) -> Self {
        let m = Vector3::repeat(margin);
        Self {
            min: self.min - m,
            max: self.max + m,
        }
    }

    /// Stretch the box along a displacement.
    #[must_use]
    pub fn swept(&self, displacement: &Vector3<f64>) -> Self {
        let mut out = *self;
        for i in 0..3 {
            if displacement[i] < 0.0 {
                out.min[i] += displacement[i];
            } else {
                out.max[i] += displacement[i];
            }
        }
        out
    }

    /// Center point.
    #[must_use]
    pub fn center(&self) -> Point3<f64> {
        nalgebra::center(&self.min, &self.max)
    }

    /// Half-extents along each axis.
    #[must_use]
    pub fn half_extents(&self) -> Vector3<f64> {
        (self.max - self.min) * 0.5
    }

    /// Surface area.
    #[must_use]
    pub fn surface_area(&self) -> f64 {
        let d = self.max - self.min;
        2.0 * (d.x * d.y + d.y * d.z + d.z * d.x)
    }
}

// ============================================================================
// Shape
// ============================================================================

/// Discriminant of a [`Shape`], ordered the way contact dispatch canonicalizes pairs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum ShapeKind {
    /// Sphere.
    Sphere,
    /// Box.
    Box,
    /// Cylinder.
    Cylinder,
    /// Capsule.
    Capsule,
}

/// Ring points and barrel axes of a Y-aligned round shape, in shape space.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
struct Tessellation {
    /// `SEGMENTS` top ring points followed by `SEGMENTS` bottom ring points.
    points: Vec<Point3<f64>>,
    /// Height axis, then one outward axis per barrel segment.
    axes: Vec<Vector3<f64>>,
}

impl Tessellation {
    fn new(radius: f64, height: f64) -> Self {
        let step = TAU / SEGMENTS as f64;
        let half = 0.5 * height;
        let spin = |angle: f64| UnitQuaternion::from_axis_angle(&Vector3::y_axis(), angle);

        let ring: Vec<Vector3<f64>> = (0..SEGMENTS)
            .map(|i| spin(step * i as f64) * Vector3::x() * radius)
            .collect();

        let mut points = Vec::with_capacity(2 * SEGMENTS);
        points.extend(ring.iter().map(|r| Point3::from(r + Vector3::y() * half)));
        points.extend(ring.iter().map(|r| Point3::from(r - Vector3::y() * half)));

        let mut axes = Vec::with_capacity(SEGMENTS + 1);
        axes.push(Vector3::y());
        axes.extend((0..SEGMENTS).map(|i| spin(step * (i as f64 + 0.5)) * Vector3::x()));

        Self { points, axes }
    }
}

/// Sphere primitive.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct SphereShape {
    /// Offset of the shape center in body space.
    pub center: Vector3<f64>,
    /// Radius.
    pub radius: f64,
}

/// Box primitive.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct BoxShape {
    /// Offset of the shape center in body space.
    pub center: Vector3<f64>,
    /// Half-extents along the body axes.
    pub half_extents: Vector3<f64>,
}

/// Cylinder primitive along the local Y axis.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct CylinderShape {
    /// Offset of the shape center in body space.
    pub center: Vector3<f64>,
    /// Radius.
    pub radius: f64,
    /// Full height.
    pub height: f64,
    tessellation: Tessellation,
}

/// Capsule primitive along the local Y axis.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct CapsuleShape {
    /// Offset of the shape center in body space.
    pub center: Vector3<f64>,
    /// Radius of the hemispheres and barrel.
    pub radius: f64,
    /// Distance between the two hemisphere centers.
    pub height: f64,
    tessellation: Tessellation,
}

/// Convex collision shape.
///
/// # Example
///
/// ```
/// use physics_core::shape::{Shape, ShapeKind};
/// use physics_types::Pose;
/// use nalgebra::{Point3, Vector3};
///
/// let shape = Shape::cuboid(Vector3::new(0.5, 0.5, 0.5));
/// assert_eq!(shape.kind(), ShapeKind::Box);
///
/// let aabb = shape.compute_aabb(&Pose::from_position(Point3::new(0.0, 2.0, 0.0)));
/// assert!(aabb.min.y < 1.5 && aabb.max.y > 2.5);
/// ```
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum Shape {
    /// Sphere.
    Sphere(SphereShape),
    /// Box.
    Box(BoxShape),
    /// Cylinder.
    Cylinder(CylinderShape),
    /// Capsule.
    Capsule(CapsuleShape),
}

impl Shape {
    /// Sphere of the given radius.
    #[must_use]
    pub fn sphere(radius: f64) -> Self {
        Self::Sphere(SphereShape {
            center: Vector3::zeros(),
            radius,
        })
    }

    /// Box with the given half-extents.
    #[must_use]
    pub fn cuboid(half_extents: Vector3<f64>) -> Self {
        Self::Box(BoxShape {
            center: Vector3::zeros(),
            half_extents,
        })
    }

    /// Cylinder of the given radius and full height.
    #[must_use]
    pub fn cylinder(radius: f64, height: f64) -> Self {
        Self::Cylinder(CylinderShape {
            center: Vector3::zeros(),
            radius,
            height,
            tessellation: Tessellation::new(radius, height),
        })
    }

    /// Capsule of the given radius; `height` separates the hemisphere centers.
    #[must_use]
    pub fn capsule(radius: f64, height: f64) -> Self {
        Self::Capsule(CapsuleShape {
            center: Vector3::zeros(),
            radius,
            height,
            tessellation: Tessellation::new(radius, height),
        })
    }

    /// Move the shape center away from the body origin.
    #[must_use]
    pub fn with_center(mut self, offset: Vector3<f64>) -> Self {
        match &mut self {
            Self::Sphere(s) => s.center = offset,
            Self::Box(s) => s.center = offset,
            Self::Cylinder(s) => s.center = offset,
            Self::Capsule(s) => s.center = offset,
        }
        self
    }

    /// Shape discriminant.
    #[must_use]
    pub fn kind(&self) -> ShapeKind {
        match self {
            Self::Sphere(_) => ShapeKind::Sphere,
            Self::Box(_) => ShapeKind::Box,
            Self::Cylinder(_) => ShapeKind::Cylinder,
            Self::Capsule(_) => ShapeKind::Capsule,
        }
    }

    /// Center offset in body space.
    #[must_use]
    pub fn center(&self) -> Vector3<f64> {
        match self {
            Self::Sphere(s) => s.center,
            Self::Box(s) => s.center,
            Self::Cylinder(s) => s.center,
            Self::Capsule(s) => s.center,
        }
    }

    /// Number of child shapes; primitives have exactly one.
    #[must_use]
    pub fn child_count(&self) -> usize {
        1
    }

    /// Check that all dimensions are positive and finite.
    pub fn validate(&self) -> Result<()> {
        let positive = |v: f64| v.is_finite() && v > 0.0;
        let ok = match self {
            Self::Sphere(s) => positive(s.radius),
            Self::Box(s) => s.half_extents.iter().all(|&h| positive(h)),
            Self::Cylinder(s) => positive(s.radius) && positive(s.height),
            Self::Capsule(s) => positive(s.radius) && s.height.is_finite() && s.height >= 0.0,
        };
        if !ok {
            return Err(PhysicsError::invalid_shape(format!(
                "{:?} dimensions must be positive and finite",
                self.kind()
            )));
        }
        if !self.center().iter().all(|c| c.is_finite()) {
            return Err(PhysicsError::invalid_shape("center offset must be finite"));
        }
        Ok(())
    }

    /// Enclosed volume.
    #[must_use]
    pub fn volume(&self) -> f64 {
        use std::f64::consts::PI;
        match self {
            Self::Sphere(s) => 4.0 / 3.0 * PI * s.radius.powi(3),
            Self::Box(s) => 8.0 * s.half_extents.x * s.half_extents.y * s.half_extents.z,
            Self::Cylinder(s) => PI * s.radius * s.radius * s.height,
            Self::Capsule(s) => {
                PI * s.radius * s.radius * s.height + 4.0 / 3.0 * PI * s.radius.powi(3)
            }
        }
    }

    /// Mass properties about the body origin for a uniform `density`.
    #[must_use]
    pub fn mass_properties(&self, density: f64) -> MassProperties {
        let mass = self.volume() * density;
        let local = match self {
            Self::Sphere(s) => MassProperties::sphere(mass, s.radius),
            Self::Box(s) => MassProperties::cuboid(mass, s.half_extents),
            Self::Cylinder(s) => MassProperties::cylinder(mass, s.radius, s.height),
            Self::Capsule(s) => MassProperties::capsule(mass, s.radius, s.height),
        };

        // Parallel axis theorem for off-center shapes.
        let c = self.center();
        let shift = (nalgebra::Matrix3::identity() * c.norm_squared() - c * c.transpose()) * mass;
        MassProperties::new(mass, local.inertia + shift)
    }

    /// World-space AABB at `pose`, padded by [`AABB_SKIN`].
    #[must_use]
    pub fn compute_aabb(&self, pose: &Pose) -> Aabb {
        let center = pose.transform_point(&Point3::from(self.center()));
        let half = match self {
            Self::Sphere(s) => Vector3::repeat(s.radius),
            Self::Box(s) => pose.rotation_matrix().abs() * s.half_extents,
            Self::Cylinder(s) => {
                let axis = pose.transform_vector(&Vector3::y());
                let half_height = 0.5 * s.height;
                Vector3::from_fn(|i, _| {
                    let a = axis[i];
                    (half_height * a).abs() + s.radius * (1.0 - a * a).max(0.0).sqrt()
                })
            }
            Self::Capsule(s) => {
                let axis = pose.transform_vector(&Vector3::y());
                (axis * 0.5 * s.height).abs() + Vector3::repeat(s.radius)
            }
        };
        Aabb::from_center(center, half).expanded(AABB_SKIN)
    }

    /// World-space description of the shape at `pose` for the narrow phase.
    ///
    /// Point and axis arrays are drawn from `ctx` and go back to it when the
    /// returned value drops.
    #[must_use]
    pub fn shape_info(&self, pose: &Pose, ctx: &PhysicsContext) -> ConvexInfo {
        let center = pose.transform_point(&Point3::from(self.center()));
        let mut info = ConvexInfo {
            kind: self.kind(),
            center,
            radius: 0.0,
            height: 0.0,
            half_extents: Vector3::zeros(),
            points: ctx.points.allocate(0),
            axes: ctx.vectors.allocate(0),
        };

        match self {
            Self::Sphere(s) => info.radius = s.radius,
            Self::Box(s) => {
                info.half_extents = s.half_extents;
                let mut axes = ctx.vectors.allocate(3);
                for i in 0..3 {
                    axes.push(pose.transform_vector(&Vector3::ith(i, 1.0)));
                }
                let mut points = ctx.points.allocate(8);
                for corner in 0..8 {
                    let offset = (0..3).fold(Vector3::zeros(), |acc, i| {
                        let sign = if corner & (1 << i) == 0 { -1.0 } else { 1.0 };
                        acc + axes[i] * (sign * s.half_extents[i])
                    });
                    points.push(center + offset);
                }
                info.axes = axes;
                info.points = points;
            }
            Self::Cylinder(CylinderShape {
                radius,
                height,
                tessellation,
                ..
            })
            | Self::Capsule(CapsuleShape {
                radius,
                height,
                tessellation,
                ..
            }) => {
                info.radius = *radius;
                info.height = *height;
                let mut points = ctx.points.allocate(tessellation.points.len());
                for p in &tessellation.points {
                    points.push(center + pose.transform_vector(&p.coords));
                }
                let mut axes = ctx.vectors.allocate(tessellation.axes.len());
                for a in &tessellation.axes {
                    axes.push(pose.transform_vector(a));
                }
                info.points = points;
                info.axes = axes;
            }
        }

        info
    }
}

// ============================================================================
// ConvexInfo
// ============================================================================

/// World-space support description of a shape for one narrow-phase query.
///
/// - Box: 3 axes and 8 corners.
/// - Cylinder / capsule: the height axis followed by [`SEGMENTS`] barrel axes,
///   and [`SEGMENTS`] top ring points followed by [`SEGMENTS`] bottom ones.
/// - Sphere: no arrays.
#[derive(Debug)]
pub struct ConvexInfo {
    /// Shape discriminant.
    pub kind: ShapeKind,
    /// World-space center.
    pub center: Point3<f64>,
    /// Radius (sphere, cylinder, capsule).
    pub radius: f64,
    /// Height (cylinder: full height, capsule: between hemisphere centers).
    pub height: f64,
    /// Half-extents (box).
    pub half_extents: Vector3<f64>,
    /// World-space vertices.
    pub points: Block<Point3<f64>>,
    /// World-space axes.
    pub axes: Block<Vector3<f64>>,
}

impl ConvexInfo {
    /// Height axis of a cylinder or capsule.
    #[must_use]
    pub fn height_axis(&self) -> Vector3<f64> {
        self.axes.first().copied().unwrap_or_else(Vector3::y)
    }

    /// Top ring of a cylinder or capsule.
    #[must_use]
    pub fn top_ring(&self) -> &[Point3<f64>] {
        self.points.get(..SEGMENTS).unwrap_or(&[])
    }

    /// Bottom ring of a cylinder or capsule.
    #[must_use]
    pub fn bottom_ring(&self) -> &[Point3<f64>] {
        self.points.get(SEGMENTS..2 * SEGMENTS).unwrap_or(&[])
    }

    /// Radius swept around the core: sphere and capsule radius, zero for
    /// polytopes.
    #[must_use]
    pub fn margin(&self) -> f64 {
        match self.kind {
            ShapeKind::Sphere | ShapeKind::Capsule => self.radius,
            ShapeKind::Box | ShapeKind::Cylinder => 0.0,
        }
    }

    /// Farthest point of the shape along `dir`.
    #[must_use]
    pub fn support(&self, dir: &Vector3<f64>) -> Point3<f64> {
        let core = self.core_support(dir);
        match self.kind {
            ShapeKind::Sphere | ShapeKind::Capsule => {
                core + dir.try_normalize(1e-12).unwrap_or_else(Vector3::zeros) * self.radius
            }
            ShapeKind::Box | ShapeKind::Cylinder => core,
        }
    }

    /// Farthest point of the core along `dir`.
    ///
    /// The core is the center point of a sphere and the axis segment of a
    /// capsule; boxes and cylinders are their own core.
    #[must_use]
    pub fn core_support(&self, dir: &Vector3<f64>) -> Point3<f64> {
        match self.kind {
            ShapeKind::Sphere => self.center,
            ShapeKind::Box => {
                self.axes
                    .iter()
                    .zip(self.half_extents.iter())
                    .fold(self.center, |p, (axis, &half)| {
                        let sign = if axis.dot(dir) >= 0.0 { 1.0 } else { -1.0 };
                        p + axis * (sign * half)
                    })
            }
            ShapeKind::Cylinder => {
                let axis = self.height_axis();
                let along = axis.dot(dir);
                let radial = dir - axis * along;
                let ring = if along >= 0.0 {
                    self.top_ring()
                } else {
                    self.bottom_ring()
                };
                if radial.norm_squared() < 1e-12 {
                    let sign = if along >= 0.0 { 1.0 } else { -1.0 };
                    return self.center + axis * (sign * 0.5 * self.height);
                }
                ring.iter()
                    .copied()
                    .max_by(|a, b| a.coords.dot(dir).total_cmp(&b.coords.dot(dir)))
                    .unwrap_or(self.center)
            }
            ShapeKind::Capsule => {
                let axis = self.height_axis();
                let sign = if axis.dot(dir) >= 0.0 { 1.0 } else { -1.0 };
                self.center + axis * (sign * 0.5 * self.height)
            }
        }
    }
}

// ============================================================================
// Support mappings
// ============================================================================

/// Convex set described by its support function, as consumed by GJK and EPA.
pub trait SupportMap {
    /// Farthest point along `dir`.
    fn support(&self, dir: &Vector3<f64>) -> Point3<f64>;

    /// A point inside the set.
    fn center(&self) -> Point3<f64>;
}

impl SupportMap for ConvexInfo {
    fn support(&self, dir: &Vector3<f64>) -> Point3<f64> {
        Self::support(self, dir)
    }

    fn center(&self) -> Point3<f64> {
        self.center
    }
}

/// The core of a shape, i.e. the shape shrunk by its [`ConvexInfo::margin`].
#[derive(Debug, Clone, Copy)]
pub struct Core<'a>(pub &'a ConvexInfo);

impl SupportMap for Core<'_> {
    fn support(&self, dir: &Vector3<f64>) -> Point3<f64> {
        self.0.core_support(dir)
    }

    fn center(&self) -> Point3<f64> {
        self.0.center
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::float_cmp)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn ctx() -> PhysicsContext {
        PhysicsContext::default()
    }

    #[test]
    fn test_aabb_operations() {
        let a = Aabb::from_center(Point3::origin(), Vector3::repeat(1.0));
        let b = Aabb::from_center(Point3::new(1.5, 0.0, 0.0), Vector3::repeat(1.0));
        let c = Aabb::from_center(Point3::new(5.0, 0.0, 0.0), Vector3::repeat(1.0));

        assert!(a.overlaps(&b));
        assert!(!a.overlaps(&c));
        assert!(a.expanded(0.5).contains(&a));
        assert!(!a.contains(&b));
        assert_relative_eq!(a.surface_area(), 24.0);
        assert_relative_eq!(a.union(&c).max.x, 6.0);

        let swept = a.swept(&Vector3::new(-2.0, 0.0, 3.0));
        assert_relative_eq!(swept.min.x, -3.0);
        assert_relative_eq!(swept.max.z, 4.0);
    }

    #[test]
    fn test_box_aabb_rotated() {
        let shape = Shape::cuboid(Vector3::new(1.0, 1.0, 1.0));
        let pose = Pose::from_position_rotation(
            Point3::origin(),
            UnitQuaternion::from_euler_angles(0.0, std::f64::consts::FRAC_PI_4, 0.0),
        );
        let aabb = shape.compute_aabb(&pose);
        let expected = 2.0_f64.sqrt() + AABB_SKIN;
        assert_relative_eq!(aabb.max.x, expected, epsilon = 1e-10);
        assert_relative_eq!(aabb.max.y, 1.0 + AABB_SKIN, epsilon = 1e-10);
    }

    #[test]
    fn test_cylinder_aabb_upright() {
        let shape = Shape::cylinder(0.5, 2.0);
        let aabb = shape.compute_aabb(&Pose::identity());
        assert_relative_eq!(aabb.max.y, 1.0 + AABB_SKIN, epsilon = 1e-10);
        assert_relative_eq!(aabb.max.x, 0.5 + AABB_SKIN, epsilon = 1e-10);
    }

    #[test]
    fn test_tessellation_layout() {
        let shape = Shape::cylinder(1.0, 2.0);
        let info = shape.shape_info(&Pose::identity(), &ctx());
        assert_eq!(info.points.len(), 2 * SEGMENTS);
        assert_eq!(info.axes.len(), SEGMENTS + 1);
        assert!(info.top_ring().iter().all(|p| (p.y - 1.0).abs() < 1e-12));
        assert!(info.bottom_ring().iter().all(|p| (p.y + 1.0).abs() < 1e-12));
        // Barrel axis k points between ring points k-1 and k.
        let mid = (info.points[0].coords + info.points[1].coords).xz().normalize();
        assert_relative_eq!(info.axes[1].xz(), mid, epsilon = 1e-12);
    }

    #[test]
    fn test_box_support() {
        let shape = Shape::cuboid(Vector3::new(1.0, 2.0, 3.0));
        let info = shape.shape_info(&Pose::from_position(Point3::new(10.0, 0.0, 0.0)), &ctx());
        let p = info.support(&Vector3::new(1.0, -1.0, 1.0));
        assert_relative_eq!(p, Point3::new(11.0, -2.0, 3.0), epsilon = 1e-12);
        assert_eq!(info.points.len(), 8);
    }

    #[test]
    fn test_round_supports() {
        let c = ctx();
        let sphere = Shape::sphere(2.0).shape_info(&Pose::identity(), &c);
        assert_relative_eq!(sphere.support(&Vector3::new(0.0, 3.0, 0.0)).y, 2.0);

        let cyl = Shape::cylinder(1.0, 2.0).shape_info(&Pose::identity(), &c);
        assert_relative_eq!(cyl.support(&Vector3::y()), Point3::new(0.0, 1.0, 0.0));
        let side = cyl.support(&Vector3::new(1.0, -0.1, 0.0));
        assert_relative_eq!(side, Point3::new(1.0, -1.0, 0.0), epsilon = 1e-12);

        let cap = Shape::capsule(0.5, 2.0).shape_info(&Pose::identity(), &c);
        assert_relative_eq!(cap.support(&Vector3::y()).y, 1.5, epsilon = 1e-12);
        assert_relative_eq!(cap.support(&Vector3::x()).x, 0.5, epsilon = 1e-12);
    }

    #[test]
    fn test_core_support_strips_margin() {
        let c = ctx();
        let pose = Pose::from_position(Point3::new(1.0, 2.0, 3.0));

        let sphere = Shape::sphere(0.7).shape_info(&pose, &c);
        assert_relative_eq!(sphere.margin(), 0.7);
        assert_eq!(Core(&sphere).support(&Vector3::x()), Point3::new(1.0, 2.0, 3.0));

        let cap = Shape::capsule(0.5, 2.0).shape_info(&pose, &c);
        assert_relative_eq!(cap.margin(), 0.5);
        let top = Core(&cap).support(&Vector3::new(0.3, 1.0, 0.0));
        assert_relative_eq!(top, Point3::new(1.0, 3.0, 3.0), epsilon = 1e-12);
        let full = SupportMap::support(&cap, &Vector3::y());
        assert_relative_eq!(full.y, top.y + 0.5, epsilon = 1e-12);

        let cube = Shape::cuboid(Vector3::repeat(0.5)).shape_info(&pose, &c);
        assert_eq!(cube.margin(), 0.0);
        let dir = Vector3::new(1.0, -1.0, 1.0);
        assert_eq!(Core(&cube).support(&dir), cube.support(&dir));
    }

    #[test]
    fn test_shape_info_returns_blocks() {
        let c = ctx();
        let shape = Shape::cylinder(1.0, 1.0);
        drop(shape.shape_info(&Pose::identity(), &c));
        let chunks = c.points.chunk_count();
        for _ in 0..10 {
            drop(shape.shape_info(&Pose::identity(), &c));
        }
        assert_eq!(c.points.chunk_count(), chunks);
    }

    #[test]
    fn test_mass_and_validation() {
        let shape = Shape::cuboid(Vector3::new(0.5, 0.5, 0.5));
        let props = shape.mass_properties(2.0);
        assert_relative_eq!(props.mass, 2.0);

        let offset = Shape::sphere(1.0).with_center(Vector3::new(0.0, 2.0, 0.0));
        let shifted = offset.mass_properties(1.0);
        let centered = Shape::sphere(1.0).mass_properties(1.0);
        assert!(shifted.inertia[(0, 0)] > centered.inertia[(0, 0)]);
        assert_relative_eq!(shifted.inertia[(1, 1)], centered.inertia[(1, 1)], epsilon = 1e-10);

        assert!(Shape::sphere(0.0).validate().is_err());
        assert!(Shape::capsule(0.5, 0.0).validate().is_ok());
        assert_eq!(Shape::sphere(1.0).child_count(), 1);
    }
}
