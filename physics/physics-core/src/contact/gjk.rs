//! Gilbert-Johnson-Keerthi queries.
//!
//! [`gjk`] grows a simplex of Minkowski-difference support points (A - B)
//! towards the origin. Each step keeps the newest point and the features
//! adjacent to it, so the simplex evolves point, line, triangle, tetrahedron.
//! The shapes overlap when a tetrahedron encloses the origin.
//!
//! Touching shapes, degenerate simplices and runs that stop making progress
//! are all reported as "not intersecting": a contact with zero depth carries
//! no useful manifold. An origin lying on a simplex feature, within
//! [`BOUNDARY_TOLERANCE`], counts as enclosed.
//!
//! [`closest_points`] runs the distance form of the algorithm. It is used on
//! shape cores, where the contact depth of round shapes is the sum of their
//! margins minus the core distance.

use nalgebra::{Point3, Vector3};
use smallvec::SmallVec;
use tracing::trace;

use crate::shape::SupportMap;

/// Maximum simplex refinements before giving up.
pub const GJK_MAX_ITERATIONS: usize = 64;

/// Distance from a simplex feature below which the origin lies on it.
pub const BOUNDARY_TOLERANCE: f64 = 1e-9;

/// Squared distance below which two support points count as the same.
const DUPLICATE_TOLERANCE: f64 = 1e-12;

/// Smallest tetrahedron volume still treated as a solid simplex.
const VOLUME_EPSILON: f64 = 1e-8;

/// Squared core distance below which two sets count as overlapping.
const OVERLAP_TOLERANCE: f64 = 1e-14;

/// Relative gap between the distance bounds at which the search stops.
const DISTANCE_TOLERANCE: f64 = 1e-10;

const EPSILON: f64 = 1e-12;

/// A point of the Minkowski difference with the supports that produced it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MinkowskiPoint {
    /// `support_a - support_b`.
    pub point: Point3<f64>,
    /// Support of A along the search direction.
    pub support_a: Point3<f64>,
    /// Support of B against the search direction.
    pub support_b: Point3<f64>,
}

impl MinkowskiPoint {
    /// Support point of `a - b` along `direction`.
    #[must_use]
    pub fn support<A, B>(a: &A, b: &B, direction: &Vector3<f64>) -> Self
    where
        A: SupportMap + ?Sized,
        B: SupportMap + ?Sized,
    {
        let support_a = a.support(direction);
        let support_b = b.support(&-direction);
        Self {
            point: Point3::from(support_a - support_b),
            support_a,
            support_b,
        }
    }
}

/// Up to four Minkowski points, oldest first.
#[derive(Debug, Clone, Copy, Default)]
pub struct Simplex {
    points: [Option<MinkowskiPoint>; 4],
    len: usize,
}

impl Simplex {
    /// Empty simplex.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a point.
    ///
    /// # Panics
    ///
    /// Panics if the simplex already holds four points.
    pub fn push(&mut self, point: MinkowskiPoint) {
        assert!(self.len < 4, "simplex overflow");
        self.points[self.len] = Some(point);
        self.len += 1;
    }

    /// Number of points.
    #[must_use]
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether the simplex has no points.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Points, oldest first.
    pub fn iter(&self) -> impl Iterator<Item = &MinkowskiPoint> {
        self.points[..self.len].iter().flatten()
    }

    /// Whether `candidate` duplicates a point already in the simplex.
    #[must_use]
    pub fn contains_close(&self, candidate: &Point3<f64>) -> bool {
        self.iter()
            .any(|p| (p.point - candidate).norm_squared() < DUPLICATE_TOLERANCE)
    }

    fn coords(&self, i: usize) -> Vector3<f64> {
        self.points[i].map_or_else(Vector3::zeros, |p| p.point.coords)
    }

    /// Keep only the points at `keep`, in that order.
    fn retain(&mut self, keep: &[usize]) {
        let old = self.points;
        self.points = [None; 4];
        for (slot, &i) in keep.iter().enumerate() {
            self.points[slot] = old[i];
        }
        self.len = keep.len();
    }
}

// ============================================================================
// Intersection
// ============================================================================

/// Run GJK on two convex sets.
///
/// Returns the enclosing tetrahedron when the sets overlap.
#[must_use]
pub fn gjk<A, B>(a: &A, b: &B) -> Option<Simplex>
where
    A: SupportMap + ?Sized,
    B: SupportMap + ?Sized,
{
    let mut direction = b.center() - a.center();
    if direction.norm_squared() < EPSILON {
        direction = Vector3::x();
    }

    let mut first = MinkowskiPoint::support(a, b, &direction);
    if first.point.coords.norm_squared() < EPSILON {
        direction = -direction;
        first = MinkowskiPoint::support(a, b, &direction);
    }

    let mut simplex = Simplex::new();
    simplex.push(first);
    direction = -first.point.coords;
    let mut visited: SmallVec<[Point3<f64>; 16]> = SmallVec::new();
    visited.push(first.point);

    for iteration in 0..GJK_MAX_ITERATIONS {
        let reach = direction.norm();
        if reach < EPSILON {
            trace!(iteration, "gjk: origin on simplex boundary");
            return None;
        }

        let next = MinkowskiPoint::support(a, b, &direction);
        if next.point.coords.dot(&direction) <= BOUNDARY_TOLERANCE * reach
            || simplex.contains_close(&next.point)
        {
            trace!(iteration, "gjk: separated");
            return None;
        }
        // A support seen before means the search is circling the origin.
        if visited
            .iter()
            .any(|p| (p - next.point).norm_squared() < DUPLICATE_TOLERANCE)
        {
            trace!(iteration, "gjk: no progress");
            return None;
        }
        visited.push(next.point);
        simplex.push(next);

        if evolve(&mut simplex, &mut direction) {
            trace!(iteration, "gjk: origin enclosed");
            return Some(simplex);
        }
    }

    trace!(iterations = GJK_MAX_ITERATIONS, "gjk: iteration cap reached");
    None
}

/// Whether two convex sets overlap.
#[must_use]
pub fn intersects<A, B>(a: &A, b: &B) -> bool
where
    A: SupportMap + ?Sized,
    B: SupportMap + ?Sized,
{
    gjk(a, b).is_some()
}

/// Reduce the simplex to the feature nearest the origin and pick the next
/// search direction. Returns `true` when the origin is enclosed.
fn evolve(simplex: &mut Simplex, direction: &mut Vector3<f64>) -> bool {
    match simplex.len() {
        2 => line(simplex, direction),
        3 => triangle(simplex, direction),
        4 => tetrahedron(simplex, direction),
        _ => false,
    }
}

/// Component of `v` perpendicular to `edge`.
fn reject(v: &Vector3<f64>, edge: &Vector3<f64>) -> Vector3<f64> {
    let len_sq = edge.norm_squared();
    if len_sq < EPSILON {
        return *v;
    }
    v - edge * (edge.dot(v) / len_sq)
}

fn any_perpendicular(v: &Vector3<f64>) -> Vector3<f64> {
    let candidate = v.cross(&Vector3::x());
    if candidate.norm_squared() > EPSILON {
        candidate
    } else {
        v.cross(&Vector3::y())
    }
}

/// Whether the origin lies beyond the plane through `point` with outward
/// normal `normal`, by more than the boundary tolerance.
fn origin_beyond(normal: &Vector3<f64>, point: &Vector3<f64>) -> bool {
    normal.dot(&-point) > BOUNDARY_TOLERANCE * normal.norm()
}

fn line(simplex: &Simplex, direction: &mut Vector3<f64>) -> bool {
    let a = simplex.coords(0);
    let b = simplex.coords(1);
    let to_origin = reject(&-b, &(a - b));

    // The origin on the segment: any perpendicular leads to a triangle
    // whose edge holds the origin, which the tetrahedron test accepts.
    *direction = if to_origin.norm_squared() < EPSILON {
        any_perpendicular(&(a - b))
    } else {
        to_origin
    };
    false
}

fn triangle(simplex: &mut Simplex, direction: &mut Vector3<f64>) -> bool {
    let a = simplex.coords(0);
    let b = simplex.coords(1);
    let c = simplex.coords(2);
    let normal = (b - a).cross(&(c - a));

    if normal.norm_squared() < EPSILON {
        simplex.retain(&[0, 1]);
        *direction = -*direction;
        return false;
    }

    // In-plane normals of the two edges through c, pointing away from the
    // vertex opposite each edge.
    let bc_out = -reject(&(a - c), &(b - c));
    if origin_beyond(&bc_out, &c) {
        simplex.retain(&[1, 2]);
        *direction = reject(&-c, &(b - c));
        return false;
    }
    let ac_out = -reject(&(b - c), &(a - c));
    if origin_beyond(&ac_out, &c) {
        simplex.retain(&[0, 2]);
        *direction = reject(&-c, &(a - c));
        return false;
    }

    *direction = if normal.dot(&-c) >= 0.0 { normal } else { -normal };
    false
}

fn tetrahedron(simplex: &mut Simplex, direction: &mut Vector3<f64>) -> bool {
    let p = [
        simplex.coords(0),
        simplex.coords(1),
        simplex.coords(2),
        simplex.coords(3),
    ];
    let d = p[3];

    let volume = (p[0] - d).dot(&(p[1] - d).cross(&(p[2] - d)));
    if volume.abs() < VOLUME_EPSILON {
        simplex.retain(&[0, 1, 2]);
        *direction = -*direction;
        return false;
    }

    // Faces through d, each paired with the vertex it leaves out.
    for (face, opposite) in [([1, 2], 0), ([0, 2], 1), ([0, 1], 2)] {
        let (u, v) = (p[face[0]], p[face[1]]);
        let mut normal = (u - d).cross(&(v - d));
        if normal.dot(&(p[opposite] - d)) > 0.0 {
            normal = -normal;
        }
        if origin_beyond(&normal, &d) {
            simplex.retain(&[face[0], face[1], 3]);
            *direction = normal;
            return false;
        }
    }

    true
}

// ============================================================================
// Distance
// ============================================================================

/// Closest points of two separated convex sets.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClosestPoints {
    /// Point of A nearest to B.
    pub point_a: Point3<f64>,
    /// Point of B nearest to A.
    pub point_b: Point3<f64>,
    /// Distance between them.
    pub distance: f64,
}

impl ClosestPoints {
    /// Unit direction from A towards B.
    #[must_use]
    pub fn normal(&self) -> Option<Vector3<f64>> {
        (self.point_b - self.point_a).try_normalize(EPSILON)
    }
}

/// Closest points of two convex sets, or `None` when they overlap.
#[must_use]
pub fn closest_points<A, B>(a: &A, b: &B) -> Option<ClosestPoints>
where
    A: SupportMap + ?Sized,
    B: SupportMap + ?Sized,
{
    let mut direction = b.center() - a.center();
    if direction.norm_squared() < EPSILON {
        direction = Vector3::x();
    }

    let mut simplex: SmallVec<[MinkowskiPoint; 4]> = SmallVec::new();
    simplex.push(MinkowskiPoint::support(a, b, &direction));
    let mut weights = [1.0, 0.0, 0.0, 0.0];
    let mut v = simplex[0].point.coords;

    for iteration in 0..GJK_MAX_ITERATIONS {
        let v_sq = v.norm_squared();
        if v_sq < OVERLAP_TOLERANCE {
            trace!(iteration, "gjk: cores overlap");
            return None;
        }

        // v·w bounds the squared distance from below; |v|² from above.
        let w = MinkowskiPoint::support(a, b, &-v);
        let duplicate = simplex
            .iter()
            .any(|p| (p.point - w.point).norm_squared() < DUPLICATE_TOLERANCE);
        if duplicate || v_sq - v.dot(&w.point.coords) <= DISTANCE_TOLERANCE * v_sq {
            trace!(iteration, distance = v_sq.sqrt(), "gjk: distance converged");
            break;
        }

        simplex.push(w);
        let Some(nearest) = nearest_on_simplex(&simplex) else {
            trace!(iteration, "gjk: cores overlap");
            return None;
        };
        let next = nearest.point(&simplex);
        simplex = nearest.vertices().iter().map(|&i| simplex[i]).collect();
        weights = nearest.weights;

        let stalled = next.norm_squared() >= v_sq;
        v = next;
        if stalled {
            trace!(iteration, "gjk: distance stalled");
            break;
        }
    }

    let (point_a, point_b) = simplex.iter().zip(weights).fold(
        (Vector3::zeros(), Vector3::zeros()),
        |(pa, pb), (p, w)| (pa + p.support_a.coords * w, pb + p.support_b.coords * w),
    );
    Some(ClosestPoints {
        point_a: Point3::from(point_a),
        point_b: Point3::from(point_b),
        distance: v.norm(),
    })
}

/// Barycentric description of the simplex point nearest the origin.
#[derive(Debug, Clone, Copy)]
struct Nearest {
    len: usize,
    vertices: [usize; 4],
    weights: [f64; 4],
}

impl Nearest {
    fn vertex(i: usize) -> Self {
        Self {
            len: 1,
            vertices: [i, 0, 0, 0],
            weights: [1.0, 0.0, 0.0, 0.0],
        }
    }

    fn edge(i: usize, j: usize, t: f64) -> Self {
        Self {
            len: 2,
            vertices: [i, j, 0, 0],
            weights: [1.0 - t, t, 0.0, 0.0],
        }
    }

    fn face(i: usize, j: usize, k: usize, v: f64, w: f64) -> Self {
        Self {
            len: 3,
            vertices: [i, j, k, 0],
            weights: [1.0 - v - w, v, w, 0.0],
        }
    }

    fn vertices(&self) -> &[usize] {
        &self.vertices[..self.len]
    }

    fn point(&self, simplex: &[MinkowskiPoint]) -> Vector3<f64> {
        self.vertices()
            .iter()
            .zip(self.weights)
            .fold(Vector3::zeros(), |acc, (&i, w)| acc + simplex[i].point.coords * w)
    }
}

/// Clamped `num / den`, zero for a vanishing denominator.
fn ratio(num: f64, den: f64) -> f64 {
    if den.abs() < EPSILON {
        0.0
    } else {
        (num / den).clamp(0.0, 1.0)
    }
}

/// Nearest feature of the simplex, or `None` when a tetrahedron encloses the
/// origin.
fn nearest_on_simplex(simplex: &[MinkowskiPoint]) -> Option<Nearest> {
    match simplex.len() {
        0 | 1 => Some(Nearest::vertex(0)),
        2 => Some(nearest_on_segment(simplex, 0, 1)),
        3 => Some(nearest_on_triangle(simplex, 0, 1, 2)),
        _ => nearest_on_tetrahedron(simplex),
    }
}

fn nearest_on_segment(simplex: &[MinkowskiPoint], i: usize, j: usize) -> Nearest {
    let a = simplex[i].point.coords;
    let ab = simplex[j].point.coords - a;
    let t = ratio(-a.dot(&ab), ab.norm_squared());
    if t <= 0.0 {
        Nearest::vertex(i)
    } else if t >= 1.0 {
        Nearest::vertex(j)
    } else {
        Nearest::edge(i, j, t)
    }
}

/// Voronoi-region walk over a triangle (Ericson, Real-Time Collision
/// Detection, 5.1.5) with the origin as the query point.
#[allow(clippy::many_single_char_names)]
fn nearest_on_triangle(simplex: &[MinkowskiPoint], i: usize, j: usize, k: usize) -> Nearest {
    let (a, b, c) = (
        simplex[i].point.coords,
        simplex[j].point.coords,
        simplex[k].point.coords,
    );
    let ab = b - a;
    let ac = c - a;

    let d1 = ab.dot(&-a);
    let d2 = ac.dot(&-a);
    if d1 <= 0.0 && d2 <= 0.0 {
        return Nearest::vertex(i);
    }

    let d3 = ab.dot(&-b);
    let d4 = ac.dot(&-b);
    if d3 >= 0.0 && d4 <= d3 {
        return Nearest::vertex(j);
    }

    let vc = d1 * d4 - d3 * d2;
    if vc <= 0.0 && d1 >= 0.0 && d3 <= 0.0 {
        return Nearest::edge(i, j, ratio(d1, d1 - d3));
    }

    let d5 = ab.dot(&-c);
    let d6 = ac.dot(&-c);
    if d6 >= 0.0 && d5 <= d6 {
        return Nearest::vertex(k);
    }

    let vb = d5 * d2 - d1 * d6;
    if vb <= 0.0 && d2 >= 0.0 && d6 <= 0.0 {
        return Nearest::edge(i, k, ratio(d2, d2 - d6));
    }

    let va = d3 * d6 - d5 * d4;
    if va <= 0.0 && d4 - d3 >= 0.0 && d5 - d6 >= 0.0 {
        return Nearest::edge(j, k, ratio(d4 - d3, (d4 - d3) + (d5 - d6)));
    }

    let sum = va + vb + vc;
    if sum.abs() < EPSILON {
        // Collapsed triangle: fall back to its best edge.
        return [
            nearest_on_segment(simplex, i, j),
            nearest_on_segment(simplex, i, k),
            nearest_on_segment(simplex, j, k),
        ]
        .into_iter()
        .min_by(|x, y| {
            x.point(simplex)
                .norm_squared()
                .total_cmp(&y.point(simplex).norm_squared())
        })
        .unwrap_or_else(|| Nearest::vertex(i));
    }
    Nearest::face(i, j, k, vb / sum, vc / sum)
}

fn nearest_on_tetrahedron(simplex: &[MinkowskiPoint]) -> Option<Nearest> {
    let p = |i: usize| simplex[i].point.coords;
    let volume = (p(1) - p(0)).dot(&(p(2) - p(0)).cross(&(p(3) - p(0))));
    let flat = volume.abs() < VOLUME_EPSILON;

    let mut best: Option<(f64, Nearest)> = None;
    for [i, j, k, opposite] in [[0, 1, 2, 3], [0, 1, 3, 2], [0, 2, 3, 1], [1, 2, 3, 0]] {
        let normal = (p(j) - p(i)).cross(&(p(k) - p(i)));
        let origin_side = normal.dot(&-p(i));
        let opposite_side = normal.dot(&(p(opposite) - p(i)));
        if flat || origin_side * opposite_side < 0.0 {
            let candidate = nearest_on_triangle(simplex, i, j, k);
            let dist_sq = candidate.point(simplex).norm_squared();
            if best.is_none_or(|(d, _)| dist_sq < d) {
                best = Some((dist_sq, candidate));
            }
        }
    }
    best.map(|(_, nearest)| nearest)
}
