//! Expanding Polytope Algorithm.
//!
//! Starting from the tetrahedron GJK leaves around the origin, repeatedly
//! pushes the face nearest the origin outwards along its normal until the
//! Minkowski-difference surface is reached. The final face gives the contact
//! normal (from A towards B) and the penetration depth.
//!
//! The expansion is exact for polytopes. Curved support maps only approach
//! their surface one face at a time, so round shapes are run on their cores
//! (see [`crate::shape::Core`]) and their radii added back afterwards.
//!
//! Face and edge scratch lists come from the [`StackAllocator`] and are
//! released on every exit path when their guards drop.

use nalgebra::{Point3, Vector3};
use physics_types::Result;
use tracing::{trace, warn};

use super::gjk::{BOUNDARY_TOLERANCE, MinkowskiPoint, Simplex};
use crate::alloc::{StackAllocator, StackVec};
use crate::shape::SupportMap;

/// Maximum expansion steps.
pub const EPA_MAX_ITERATIONS: usize = 64;

/// Maximum polytope vertices.
pub const MAX_POLYTOPE_VERTICES: usize = 100;

/// Maximum polytope faces held at once.
const MAX_FACES: usize = 2 * MAX_POLYTOPE_VERTICES;

/// Distance gain below which the polytope is considered converged.
pub const EPA_TOLERANCE: f64 = 1e-4;

const EPSILON: f64 = 1e-10;

/// Penetration of A into B.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Penetration {
    /// Unit contact normal, pointing from A towards B.
    pub normal: Vector3<f64>,
    /// Penetration depth along the normal (non-negative).
    pub depth: f64,
}

#[derive(Debug, Clone, Copy)]
struct Face {
    vertices: [usize; 3],
    normal: Vector3<f64>,
    distance: f64,
}

impl Face {
    /// Face through three polytope vertices, wound so the normal follows the
    /// right-hand rule.
    fn new(points: &[MinkowskiPoint], vertices: [usize; 3]) -> Option<Self> {
        let [a, b, c] = vertices.map(|i| points[i].point);
        let normal = (b - a).cross(&(c - a)).try_normalize(EPSILON)?;
        Some(Self {
            vertices,
            normal,
            distance: normal.dot(&a.coords),
        })
    }

    fn center(&self, points: &[MinkowskiPoint]) -> Point3<f64> {
        let sum = self
            .vertices
            .iter()
            .fold(Vector3::zeros(), |acc, &i| acc + points[i].point.coords);
        Point3::from(sum / 3.0)
    }
}

/// Expand the GJK simplex into the penetration of A into B.
///
/// Returns `Ok(None)` when the polytope degenerates or the origin turns out
/// to lie outside it.
///
/// # Errors
///
/// Propagates scratch allocation failures.
///
/// # Panics
///
/// Panics if the polytope outgrows [`MAX_POLYTOPE_VERTICES`].
pub fn epa<A, B>(
    a: &A,
    b: &B,
    simplex: &Simplex,
    stack: &StackAllocator,
) -> Result<Option<Penetration>>
where
    A: SupportMap + ?Sized,
    B: SupportMap + ?Sized,
{
    let mut points = stack.allocate::<MinkowskiPoint>(MAX_POLYTOPE_VERTICES)?;
    for p in simplex.iter() {
        points.push(*p);
    }
    pad_simplex(a, b, &mut points);
    if points.len() < 4 {
        trace!(vertices = points.len(), "epa: simplex could not be padded");
        return Ok(None);
    }

    let mut faces = stack.allocate::<Face>(MAX_FACES)?;
    let centroid = Point3::from(
        points[..4]
            .iter()
            .fold(Vector3::zeros(), |acc, p| acc + p.point.coords)
            / 4.0,
    );
    for vertices in [[0, 1, 2], [0, 3, 1], [0, 2, 3], [1, 3, 2]] {
        let Some(mut face) = Face::new(&points, vertices) else {
            trace!("epa: degenerate initial tetrahedron");
            return Ok(None);
        };
        if face.normal.dot(&(points[vertices[0]].point - centroid)) < 0.0 {
            face.vertices.swap(1, 2);
            face.normal = -face.normal;
            face.distance = -face.distance;
        }
        if face.distance < -BOUNDARY_TOLERANCE {
            trace!(distance = face.distance, "epa: origin outside initial polytope");
            return Ok(None);
        }
        face.distance = face.distance.max(0.0);
        faces.push(face);
    }

    let mut edges = stack.allocate::<(usize, usize)>(3 * MAX_FACES)?;

    for iteration in 0..EPA_MAX_ITERATIONS {
        let Some(nearest) = nearest_face(&faces) else {
            return Ok(None);
        };
        let support = MinkowskiPoint::support(a, b, &nearest.normal);
        let gain = support.point.coords.dot(&nearest.normal) - nearest.distance;

        let duplicate = points
            .iter()
            .any(|p| (p.point - support.point).norm_squared() < EPSILON);
        if gain <= EPA_TOLERANCE || duplicate {
            trace!(iteration, depth = nearest.distance, "epa: converged");
            return Ok(Some(Penetration {
                normal: nearest.normal,
                depth: nearest.distance,
            }));
        }

        assert!(
            !points.is_full(),
            "polytope overflow: more than {MAX_POLYTOPE_VERTICES} vertices"
        );
        let new_index = points.len();
        points.push(support);

        // Remove every face the new point can see and keep the horizon.
        edges.clear();
        let mut i = 0;
        while i < faces.len() {
            let face = faces[i];
            if face.normal.dot(&(support.point - face.center(&points))) > 0.0 {
                let [v0, v1, v2] = face.vertices;
                add_unique_edge(&mut edges, v0, v1);
                add_unique_edge(&mut edges, v1, v2);
                add_unique_edge(&mut edges, v2, v0);
                faces.swap_remove(i);
            } else {
                i += 1;
            }
        }

        for &(v0, v1) in edges.iter() {
            if let Some(mut face) = Face::new(&points, [v0, v1, new_index]) {
                face.distance = face.distance.max(0.0);
                faces.push(face);
            }
        }
    }

    let best = nearest_face(&faces);
    if let Some(face) = best {
        warn!(
            iterations = EPA_MAX_ITERATIONS,
            depth = face.distance,
            "epa: iteration cap reached before convergence"
        );
    }
    Ok(best.map(|face| Penetration {
        normal: face.normal,
        depth: face.distance,
    }))
}

/// Grow a GJK simplex with fewer than four points using axis supports.
fn pad_simplex<A, B>(a: &A, b: &B, points: &mut StackVec<MinkowskiPoint>)
where
    A: SupportMap + ?Sized,
    B: SupportMap + ?Sized,
{
    let directions = [
        Vector3::x(),
        -Vector3::x(),
        Vector3::y(),
        -Vector3::y(),
        Vector3::z(),
        -Vector3::z(),
    ];
    for direction in &directions {
        if points.len() >= 4 {
            return;
        }
        let candidate = MinkowskiPoint::support(a, b, direction);
        let fresh = points
            .iter()
            .all(|p| (p.point - candidate.point).norm_squared() > EPSILON);
        if fresh {
            points.push(candidate);
        }
    }
}

fn nearest_face(faces: &[Face]) -> Option<Face> {
    faces
        .iter()
        .min_by(|x, y| x.distance.total_cmp(&y.distance))
        .copied()
}

/// Record a horizon edge; an edge already present in reverse is shared by two
/// removed faces and cancels out.
fn add_unique_edge(edges: &mut StackVec<(usize, usize)>, a: usize, b: usize) {
    if let Some(pos) = edges.iter().position(|&(x, y)| x == b && y == a) {
        edges.swap_remove(pos);
    } else {
        edges.push((a, b));
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::float_cmp)]
mod tests {
    use super::*;
    use crate::alloc::PhysicsContext;
    use crate::contact::gjk::gjk;
    use crate::shape::Shape;
    use approx::assert_relative_eq;
    use physics_types::Pose;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn penetration(
        a: &Shape,
        pose_a: &Pose,
        b: &Shape,
        pose_b: &Pose,
        ctx: &PhysicsContext,
    ) -> Option<Penetration> {
        let ia = a.shape_info(pose_a, ctx);
        let ib = b.shape_info(pose_b, ctx);
        let simplex = gjk(&ia, &ib)?;
        epa(&ia, &ib, &simplex, &ctx.stack).unwrap()
    }

    #[test]
    fn test_box_box_depth() {
        let ctx = PhysicsContext::default();
        let b = Shape::cuboid(Vector3::repeat(0.5));
        let p = penetration(
            &b,
            &Pose::identity(),
            &b,
            &Pose::from_position(Point3::new(0.1, 0.9, 0.0)),
            &ctx,
        )
        .unwrap();

        assert_relative_eq!(p.depth, 0.1, epsilon = 1e-6);
        assert_relative_eq!(p.normal, Vector3::y(), epsilon = 1e-6);
        // Scratch space is back on the stack.
        assert_eq!(ctx.stack.entry_count(), 0);
        assert_eq!(ctx.stack.used(), 0);
    }

    #[test]
    fn test_aligned_box_depths() {
        let ctx = PhysicsContext::default();
        let mut rng = StdRng::seed_from_u64(3);

        for _ in 0..2000 {
            let ha = Vector3::from_fn(|_, _| rng.gen_range(0.2..1.5));
            let hb = Vector3::from_fn(|_, _| rng.gen_range(0.2..1.5));
            let reach = ha + hb;
            // Per-axis overlap, including the band just past contact.
            let overlap = reach.map(|r| rng.gen_range(0.01..r));
            let offset = Vector3::from_fn(|i, _| {
                let sign = if rng.gen_bool(0.5) { 1.0 } else { -1.0 };
                sign * (reach[i] - overlap[i])
            });

            let pose_a = Pose::from_position(Point3::new(1.0, -2.0, 0.5));
            let pose_b = Pose::from_position(pose_a.position + offset);
            let p = penetration(
                &Shape::cuboid(ha),
                &pose_a,
                &Shape::cuboid(hb),
                &pose_b,
                &ctx,
            )
            .expect("overlapping boxes must penetrate");

            let axis = overlap.imin();
            assert_relative_eq!(p.depth, overlap[axis], epsilon = 1e-6);

            let mut sorted = [overlap.x, overlap.y, overlap.z];
            sorted.sort_by(f64::total_cmp);
            if sorted[1] - sorted[0] > 1e-3 {
                let mut expected = Vector3::zeros();
                expected[axis] = offset[axis].signum();
                assert_relative_eq!(p.normal, expected, epsilon = 1e-6);
            }
        }
        assert_eq!(ctx.stack.used(), 0);
    }

    #[test]
    fn test_add_unique_edge_cancels_reversed() {
        let stack = StackAllocator::default();
        let mut edges = stack.allocate::<(usize, usize)>(8).unwrap();
        add_unique_edge(&mut edges, 0, 1);
        add_unique_edge(&mut edges, 1, 2);
        add_unique_edge(&mut edges, 1, 0);
        assert_eq!(&*edges, &[(1, 2)]);
    }
}
