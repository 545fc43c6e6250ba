//! Narrow phase: contacts between fixtures and their manifolds.
//!
//! A [`Contact`] exists for every pair of fixtures whose fat AABBs overlap in
//! the broad phase. Each step [`Contact::update`] rebuilds its [`Manifold`]:
//!
//! 1. [`gjk`] decides whether the shapes intersect.
//! 2. [`epa`] finds the contact normal and penetration depth.
//!    Spheres and capsules are measured on their cores instead: the core
//!    distance from [`gjk::closest_points`] against the summed radii, with
//!    EPA on the cores only once those overlap.
//! 3. [`clip`] turns the normal into contact points, either one point for
//!    round features (spheres, capsule hemispheres) or a clipped face pair.
//!
//! Shape pairs are dispatched through [`ContactKind`], an exhaustive enum of
//! the ten unordered pairs of [`ShapeKind`]s. Fixtures are stored so that
//! fixture A always has the lower kind.

pub mod clip;
pub mod epa;
pub mod gjk;

use nalgebra::{Point3, Vector3};
use physics_types::{Material, Pose, Result};
use smallvec::SmallVec;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::alloc::PhysicsContext;
use crate::body::{BodyHandle, FixtureProxy};
use crate::shape::{ConvexInfo, Core, Shape, ShapeKind};

slotmap::new_key_type! {
    /// Generational handle to a [`Contact`] owned by the contact manager.
    pub struct ContactKey;
}

/// Maximum points a manifold may hold.
pub const MAX_MANIFOLD_POINTS: usize = 48;

/// |normal · axis| above which a capsule touches with a hemisphere.
const HEMISPHERE_THRESHOLD: f64 = 1e-4;

/// Smallest depth spread used to scale per-point penetration.
const MIN_DEPTH_SPREAD: f64 = 1e-8;

bitflags::bitflags! {
    /// State flags of a contact.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    #[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
    pub struct ContactFlags: u8 {
        /// The manifold has at least one point.
        const TOUCHING = 0b0000_0001;
        /// The contact has been added to the island being built.
        const ISLAND = 0b0000_0010;
    }
}

// ============================================================================
// Manifold
// ============================================================================

/// One contact point.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ManifoldPoint {
    /// Deepest point of A inside B (world space).
    pub point_a: Point3<f64>,
    /// Deepest point of B inside A (world space).
    pub point_b: Point3<f64>,
    /// Contact normal, from A towards B.
    pub normal: Vector3<f64>,
    /// Signed distance along the normal; negative when penetrating.
    pub separation: f64,
    /// Accumulated normal impulse.
    pub normal_impulse: f64,
    /// Accumulated friction impulse.
    pub tangent_impulse: Vector3<f64>,
}

impl ManifoldPoint {
    fn new(point_a: Point3<f64>, point_b: Point3<f64>, normal: Vector3<f64>, depth: f64) -> Self {
        Self {
            point_a,
            point_b,
            normal,
            separation: -depth,
            normal_impulse: 0.0,
            tangent_impulse: Vector3::zeros(),
        }
    }

    /// Penetration depth (positive when overlapping).
    #[must_use]
    pub fn penetration(&self) -> f64 {
        -self.separation
    }
}

/// Contact points of one fixture pair for one step.
#[derive(Debug, Clone, PartialEq)]
pub struct Manifold {
    points: SmallVec<[ManifoldPoint; 8]>,
    /// Contact normal from A towards B (zero when not touching).
    pub normal: Vector3<f64>,
    /// Penetration depth reported by EPA.
    pub depth: f64,
}

impl Default for Manifold {
    fn default() -> Self {
        Self {
            points: SmallVec::new(),
            normal: Vector3::zeros(),
            depth: 0.0,
        }
    }
}

impl Manifold {
    /// Append a point.
    ///
    /// # Panics
    ///
    /// Panics if the manifold already holds [`MAX_MANIFOLD_POINTS`].
    pub fn push(&mut self, point: ManifoldPoint) {
        assert!(
            self.points.len() < MAX_MANIFOLD_POINTS,
            "manifold overflow: more than {MAX_MANIFOLD_POINTS} points"
        );
        self.points.push(point);
    }

    /// Contact points.
    #[must_use]
    pub fn points(&self) -> &[ManifoldPoint] {
        &self.points
    }

    /// Contact points, mutable (solver impulses).
    pub fn points_mut(&mut self) -> &mut [ManifoldPoint] {
        &mut self.points
    }

    /// Number of points.
    #[must_use]
    pub fn len(&self) -> usize {
        self.points.len()
    }

    /// Whether there are no points.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Sum of point penetrations.
    #[must_use]
    pub fn total_penetration(&self) -> f64 {
        self.points.iter().map(ManifoldPoint::penetration).sum()
    }
}

// ============================================================================
// Dispatch
// ============================================================================

/// Unordered pair of shape kinds, named lower kind first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum ContactKind {
    /// Sphere and sphere.
    SphereSphere,
    /// Sphere and box.
    SphereBox,
    /// Sphere and cylinder.
    SphereCylinder,
    /// Sphere and capsule.
    SphereCapsule,
    /// Box and box.
    BoxBox,
    /// Box and cylinder.
    BoxCylinder,
    /// Box and capsule.
    BoxCapsule,
    /// Cylinder and cylinder.
    CylinderCylinder,
    /// Cylinder and capsule.
    CylinderCapsule,
    /// Capsule and capsule.
    CapsuleCapsule,
}

impl ContactKind {
    /// Kind of the pair and whether `(a, b)` must be swapped to put the lower
    /// kind first.
    #[must_use]
    pub fn between(a: ShapeKind, b: ShapeKind) -> (Self, bool) {
        use ShapeKind::{Box, Capsule, Cylinder, Sphere};

        let kind = match (a, b) {
            (Sphere, Sphere) => Self::SphereSphere,
            (Sphere, Box) | (Box, Sphere) => Self::SphereBox,
            (Sphere, Cylinder) | (Cylinder, Sphere) => Self::SphereCylinder,
            (Sphere, Capsule) | (Capsule, Sphere) => Self::SphereCapsule,
            (Box, Box) => Self::BoxBox,
            (Box, Cylinder) | (Cylinder, Box) => Self::BoxCylinder,
            (Box, Capsule) | (Capsule, Box) => Self::BoxCapsule,
            (Cylinder, Cylinder) => Self::CylinderCylinder,
            (Cylinder, Capsule) | (Capsule, Cylinder) => Self::CylinderCapsule,
            (Capsule, Capsule) => Self::CapsuleCapsule,
        };
        (kind, b < a)
    }
}

/// Build the manifold of two shapes, A first.
///
/// Non-intersecting or degenerate configurations give an empty manifold.
///
/// # Errors
///
/// Propagates scratch allocation failures from EPA.
pub fn collide_shapes(
    kind: ContactKind,
    shape_a: &Shape,
    pose_a: &Pose,
    shape_b: &Shape,
    pose_b: &Pose,
    ctx: &PhysicsContext,
) -> Result<Manifold> {
    let a = shape_a.shape_info(pose_a, ctx);
    let b = shape_b.shape_info(pose_b, ctx);
    let mut manifold = Manifold::default();

    let penetration = if a.margin() + b.margin() > 0.0 {
        rounded_penetration(&a, &b, ctx)?
    } else {
        match gjk::gjk(&a, &b) {
            Some(simplex) => epa::epa(&a, &b, &simplex, &ctx.stack)?,
            None => None,
        }
    };
    let Some(penetration) = penetration else {
        return Ok(manifold);
    };
    manifold.normal = penetration.normal;
    manifold.depth = penetration.depth;

    let n = penetration.normal;
    match kind {
        ContactKind::SphereSphere
        | ContactKind::SphereBox
        | ContactKind::SphereCylinder
        | ContactKind::SphereCapsule => round_point_a(&mut manifold, &a),
        ContactKind::BoxBox | ContactKind::BoxCylinder | ContactKind::CylinderCylinder => {
            clipped_points(&mut manifold, &a, &b);
        }
        ContactKind::BoxCapsule | ContactKind::CylinderCapsule => {
            if on_hemisphere(&b, &n) {
                round_point_b(&mut manifold, &b);
            } else {
                clipped_points(&mut manifold, &a, &b);
            }
        }
        ContactKind::CapsuleCapsule => {
            if on_hemisphere(&a, &n) {
                round_point_a(&mut manifold, &a);
            } else if on_hemisphere(&b, &n) {
                round_point_b(&mut manifold, &b);
            } else {
                clipped_points(&mut manifold, &a, &b);
            }
        }
    }

    Ok(manifold)
}

/// Penetration of shapes with at least one radius margin.
///
/// Separated cores give the normal along their closest points. Overlapping
/// cores fall back to EPA on the cores, and to the center line when even that
/// finds no depth.
fn rounded_penetration(
    a: &ConvexInfo,
    b: &ConvexInfo,
    ctx: &PhysicsContext,
) -> Result<Option<epa::Penetration>> {
    let margin = a.margin() + b.margin();
    let (core_a, core_b) = (Core(a), Core(b));

    if let Some(closest) = gjk::closest_points(&core_a, &core_b) {
        if closest.distance >= margin {
            return Ok(None);
        }
        if let Some(normal) = closest.normal() {
            return Ok(Some(epa::Penetration {
                normal,
                depth: margin - closest.distance,
            }));
        }
    }

    let deep = match gjk::gjk(&core_a, &core_b) {
        Some(simplex) => epa::epa(&core_a, &core_b, &simplex, &ctx.stack)?,
        None => None,
    };
    Ok(Some(deep.map_or_else(
        || epa::Penetration {
            normal: (b.center - a.center)
                .try_normalize(1e-12)
                .unwrap_or_else(Vector3::y),
            depth: margin,
        },
        |p| epa::Penetration {
            normal: p.normal,
            depth: p.depth + margin,
        },
    )))
}

fn on_hemisphere(info: &ConvexInfo, normal: &Vector3<f64>) -> bool {
    info.height_axis().dot(normal).abs() > HEMISPHERE_THRESHOLD
}

/// Single point from the support of a round A.
fn round_point_a(manifold: &mut Manifold, a: &ConvexInfo) {
    let (n, depth) = (manifold.normal, manifold.depth);
    let point_a = a.support(&n);
    manifold.push(ManifoldPoint::new(point_a, point_a - n * depth, n, depth));
}

/// Single point from the support of a round B.
fn round_point_b(manifold: &mut Manifold, b: &ConvexInfo) {
    let (n, depth) = (manifold.normal, manifold.depth);
    let point_b = b.support(&-n);
    manifold.push(ManifoldPoint::new(point_b + n * depth, point_b, n, depth));
}

/// Clip B's incident face against A's reference face.
fn clipped_points(manifold: &mut Manifold, a: &ConvexInfo, b: &ConvexInfo) {
    let n = manifold.normal;
    let (Some(reference), Some(incident)) = (clip::face_along(a, &n), clip::face_along(b, &-n))
    else {
        round_point_a(manifold, a);
        return;
    };

    let mut polygon = clip::clip_incident(&reference, &incident);
    if polygon.is_empty() {
        round_point_a(manifold, a);
        return;
    }

    let ref_n = reference.normal;
    polygon.sort_by(|p, q| p.coords.dot(&ref_n).total_cmp(&q.coords.dot(&ref_n)));

    let ref_offset = reference
        .vertices
        .first()
        .map_or(0.0, |v| v.coords.dot(&ref_n));
    let deepest = ref_offset - polygon[0].coords.dot(&ref_n);
    let ratio = if deepest < MIN_DEPTH_SPREAD {
        None
    } else {
        Some(manifold.depth / deepest)
    };

    let depth = manifold.depth;
    for p in polygon {
        let pen = ratio.map_or(depth, |r| (ref_offset - p.coords.dot(&ref_n)) * r);
        manifold.push(ManifoldPoint::new(p + ref_n * pen, p, ref_n, pen));
    }
}

// ============================================================================
// Contact
// ============================================================================

/// Persistent contact between two fixtures.
#[derive(Debug, Clone)]
pub struct Contact {
    fixture_a: FixtureProxy,
    fixture_b: FixtureProxy,
    kind: ContactKind,
    flags: ContactFlags,
    friction: f64,
    restitution: f64,
    manifold: Manifold,
}

impl Contact {
    /// Create a contact between two fixtures, reordering them so A has the
    /// lower shape kind.
    #[must_use]
    pub fn new(
        a: FixtureProxy,
        kind_a: ShapeKind,
        material_a: &Material,
        b: FixtureProxy,
        kind_b: ShapeKind,
        material_b: &Material,
    ) -> Self {
        let (kind, swapped) = ContactKind::between(kind_a, kind_b);
        let (fixture_a, fixture_b) = if swapped { (b, a) } else { (a, b) };
        Self {
            fixture_a,
            fixture_b,
            kind,
            flags: ContactFlags::empty(),
            friction: Material::mix_friction(material_a.friction, material_b.friction),
            restitution: Material::mix_restitution(material_a.restitution, material_b.restitution),
            manifold: Manifold::default(),
        }
    }

    /// Rebuild the manifold from the current shapes and poses.
    ///
    /// Accumulated impulses restart from zero unless `warm_starting` is set
    /// and the point count did not change.
    ///
    /// # Errors
    ///
    /// Propagates scratch allocation failures.
    pub fn update(
        &mut self,
        shape_a: &Shape,
        pose_a: &Pose,
        shape_b: &Shape,
        pose_b: &Pose,
        ctx: &PhysicsContext,
        warm_starting: bool,
    ) -> Result<()> {
        let mut manifold = collide_shapes(self.kind, shape_a, pose_a, shape_b, pose_b, ctx)?;

        if warm_starting && manifold.len() == self.manifold.len() {
            for (new, old) in manifold.points.iter_mut().zip(self.manifold.points()) {
                new.normal_impulse = old.normal_impulse;
                new.tangent_impulse = old.tangent_impulse;
            }
        }

        self.flags.set(ContactFlags::TOUCHING, !manifold.is_empty());
        self.manifold = manifold;
        Ok(())
    }

    /// Fixture A (lower shape kind).
    #[must_use]
    pub fn fixture_a(&self) -> FixtureProxy {
        self.fixture_a
    }

    /// Fixture B.
    #[must_use]
    pub fn fixture_b(&self) -> FixtureProxy {
        self.fixture_b
    }

    /// Child index of fixture A.
    #[must_use]
    pub fn child_a(&self) -> usize {
        self.fixture_a.child
    }

    /// Child index of fixture B.
    #[must_use]
    pub fn child_b(&self) -> usize {
        self.fixture_b.child
    }

    /// Shape pair.
    #[must_use]
    pub fn kind(&self) -> ContactKind {
        self.kind
    }

    /// Mixed friction coefficient.
    #[must_use]
    pub fn friction(&self) -> f64 {
        self.friction
    }

    /// Mixed restitution.
    #[must_use]
    pub fn restitution(&self) -> f64 {
        self.restitution
    }

    /// Whether the manifold has points.
    #[must_use]
    pub fn is_touching(&self) -> bool {
        self.flags.contains(ContactFlags::TOUCHING)
    }

    /// Current flags.
    #[must_use]
    pub fn flags(&self) -> ContactFlags {
        self.flags
    }

    /// Set or clear flags.
    pub fn set_flags(&mut self, flags: ContactFlags, value: bool) {
        self.flags.set(flags, value);
    }

    /// Current manifold.
    #[must_use]
    pub fn manifold(&self) -> &Manifold {
        &self.manifold
    }

    /// Current manifold, mutable (solver impulses).
    pub fn manifold_mut(&mut self) -> &mut Manifold {
        &mut self.manifold
    }

    /// The body on the other side from `body`.
    #[must_use]
    pub fn other(&self, body: BodyHandle) -> Option<BodyHandle> {
        if self.fixture_a.body == body {
            Some(self.fixture_b.body)
        } else if self.fixture_b.body == body {
            Some(self.fixture_a.body)
        } else {
            None
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::float_cmp)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use nalgebra::UnitQuaternion;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};
    use slotmap::SlotMap;

    fn run(a: &Shape, pose_a: &Pose, b: &Shape, pose_b: &Pose) -> Manifold {
        let ctx = PhysicsContext::default();
        let (kind, swapped) = ContactKind::between(a.kind(), b.kind());
        assert!(!swapped);
        let manifold = collide_shapes(kind, a, pose_a, b, pose_b, &ctx).unwrap();
        assert_eq!(ctx.stack.entry_count(), 0);
        manifold
    }

    fn at(x: f64, y: f64, z: f64) -> Pose {
        Pose::from_position(Point3::new(x, y, z))
    }

    #[test]
    fn test_dispatch_is_canonical() {
        let (kind, swapped) = ContactKind::between(ShapeKind::Capsule, ShapeKind::Sphere);
        assert_eq!(kind, ContactKind::SphereCapsule);
        assert!(swapped);

        let (kind, swapped) = ContactKind::between(ShapeKind::Box, ShapeKind::Cylinder);
        assert_eq!(kind, ContactKind::BoxCylinder);
        assert!(!swapped);
    }

    #[test]
    fn test_box_on_box_four_points() {
        let b = Shape::cuboid(Vector3::repeat(0.5));
        let m = run(&b, &at(0.0, 0.0, 0.0), &b, &at(0.0, 0.98, 0.0));

        assert_eq!(m.len(), 4);
        assert_relative_eq!(m.normal, Vector3::y(), epsilon = 1e-6);
        for p in m.points() {
            assert_relative_eq!(p.penetration(), 0.02, epsilon = 1e-6);
            assert_relative_eq!(p.point_b.y, 0.48, epsilon = 1e-6);
            assert_relative_eq!(p.point_a.y, 0.5, epsilon = 1e-6);
        }
        assert_relative_eq!(m.total_penetration(), 0.08, epsilon = 1e-5);
    }

    #[test]
    fn test_tilted_box_depths_scale() {
        let b = Shape::cuboid(Vector3::repeat(0.5));
        let tilt = Pose::from_position_rotation(
            Point3::new(0.0, 0.97, 0.0),
            UnitQuaternion::from_euler_angles(0.0, 0.0, 0.02),
        );
        let m = run(&b, &at(0.0, 0.0, 0.0), &b, &tilt);

        assert!(!m.is_empty());
        let deepest = m.points()[0].penetration();
        assert_relative_eq!(deepest, m.depth, epsilon = 1e-9);
        assert!(m.points().iter().all(|p| p.penetration() <= deepest + 1e-12));
    }

    #[test]
    fn test_sphere_on_box_single_point() {
        let m = run(
            &Shape::sphere(0.5),
            &at(0.2, 0.95, 0.0),
            &Shape::cuboid(Vector3::new(2.0, 0.5, 2.0)),
            &at(0.0, 0.0, 0.0),
        );
        assert_eq!(m.len(), 1);
        // Normal points from the sphere (A) down into the box (B).
        assert!(m.normal.y < -0.99);
        let p = m.points()[0];
        assert_relative_eq!(p.point_a.y, 0.45, epsilon = 1e-9);
        assert_relative_eq!(p.penetration(), 0.05, epsilon = 1e-9);
    }

    #[test]
    fn test_separated_is_empty() {
        let b = Shape::cuboid(Vector3::repeat(0.5));
        let m = run(&b, &at(0.0, 0.0, 0.0), &b, &at(0.0, 1.2, 0.0));
        assert!(m.is_empty());
    }

    #[test]
    fn test_sphere_pairs_match_analytic_depth() {
        for seed in [1, 2, 3] {
            let mut rng = StdRng::seed_from_u64(seed);
            for i in 0..2000 {
                let r1 = rng.gen_range(0.2..2.0);
                let r2 = rng.gen_range(0.2..2.0);
                // Every fourth pair sits within a hair of touching.
                let d = if i % 4 == 0 {
                    r1 + r2 + rng.gen_range(-0.01..0.01)
                } else {
                    rng.gen_range(0.05..(r1 + r2) * 1.5)
                };
                let dir = Vector3::new(
                    rng.gen_range(-1.0..1.0),
                    rng.gen_range(-1.0..1.0),
                    rng.gen_range(-1.0..1.0),
                )
                .try_normalize(1e-6)
                .unwrap_or_else(Vector3::x);

                let pose_a = at(1.0, -2.0, 0.5);
                let pose_b = Pose::from_position(pose_a.position + dir * d);
                let m = run(&Shape::sphere(r1), &pose_a, &Shape::sphere(r2), &pose_b);

                let expected = r1 + r2 - d;
                if expected.abs() < 1e-9 {
                    continue;
                }
                assert_eq!(!m.is_empty(), expected > 0.0, "depth {expected}");
                if expected > 0.0 {
                    assert!((m.depth - expected).abs() < 1e-3, "{} vs {expected}", m.depth);
                    assert!(m.normal.dot(&dir) > 0.999);
                }
            }
        }
    }

    #[test]
    fn test_capsule_lying_and_standing() {
        let floor = Shape::cuboid(Vector3::new(5.0, 0.5, 5.0));
        let capsule = Shape::capsule(0.25, 1.0);

        let lying = Pose::from_position_rotation(
            Point3::new(0.0, 0.74, 0.0),
            UnitQuaternion::from_euler_angles(0.0, 0.0, std::f64::consts::FRAC_PI_2),
        );
        let m = run(&floor, &at(0.0, 0.0, 0.0), &capsule, &lying);
        assert!(m.len() >= 2);

        let m = run(&floor, &at(0.0, 0.0, 0.0), &capsule, &at(0.0, 1.24, 0.0));
        assert_eq!(m.len(), 1);
    }

    #[test]
    fn test_cylinder_cap_on_box() {
        let floor = Shape::cuboid(Vector3::new(5.0, 0.5, 5.0));
        let m = run(
            &floor,
            &at(0.0, 0.0, 0.0),
            &Shape::cylinder(0.5, 1.0),
            &at(0.0, 0.99, 0.0),
        );
        assert!(m.len() >= 3);
        assert_relative_eq!(m.normal, Vector3::y(), epsilon = 1e-6);
    }

    #[test]
    fn test_contact_update_sets_touching() {
        let mut bodies: SlotMap<BodyHandle, ()> = SlotMap::with_key();
        let (ha, hb) = (bodies.insert(()), bodies.insert(()));
        let ctx = PhysicsContext::default();
        let b = Shape::cuboid(Vector3::repeat(0.5));
        let s = Shape::sphere(0.5);
        let material = Material::default().with_friction(0.4);

        let mut contact = Contact::new(
            FixtureProxy::new(ha, 0),
            b.kind(),
            &material,
            FixtureProxy::new(hb, 0),
            s.kind(),
            &Material::default().with_friction(0.9).with_restitution(0.3),
        );
        // The sphere becomes fixture A.
        assert_eq!(contact.fixture_a().body, hb);
        assert_eq!(contact.other(ha), Some(hb));
        assert_relative_eq!(contact.friction(), 0.6, epsilon = 1e-12);
        assert_relative_eq!(contact.restitution(), 0.3);

        contact
            .update(&s, &at(0.0, 0.9, 0.0), &b, &at(0.0, 0.0, 0.0), &ctx, false)
            .unwrap();
        assert!(contact.is_touching());

        contact
            .update(&s, &at(0.0, 3.0, 0.0), &b, &at(0.0, 0.0, 0.0), &ctx, false)
            .unwrap();
        assert!(!contact.is_touching());
        assert!(contact.manifold().is_empty());
    }
}
