//! Contact faces and Sutherland-Hodgman clipping.
//!
//! Given a contact normal, each shape offers the face it presents along that
//! direction. The reference face (shape A) is used to clip the incident face
//! (shape B); surviving vertices become manifold points.

use nalgebra::{Point3, Vector3};
use smallvec::SmallVec;

use crate::shape::{ConvexInfo, SEGMENTS, ShapeKind};

/// Inline capacity of a clipped polygon.
pub const POLYGON_CAPACITY: usize = 2 * SEGMENTS + 8;

/// Ordered polygon vertices.
pub type Polygon = SmallVec<[Point3<f64>; POLYGON_CAPACITY]>;

const EPSILON: f64 = 1e-12;

/// Plane `normal · p = offset`; points with positive distance are outside.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Plane {
    /// Unit normal.
    pub normal: Vector3<f64>,
    /// Offset along the normal.
    pub offset: f64,
}

impl Plane {
    /// Plane through `point` with `normal`.
    #[must_use]
    pub fn new(normal: Vector3<f64>, point: &Point3<f64>) -> Self {
        Self {
            normal,
            offset: normal.dot(&point.coords),
        }
    }

    /// Signed distance of `point`.
    #[must_use]
    pub fn distance(&self, point: &Point3<f64>) -> f64 {
        self.normal.dot(&point.coords) - self.offset
    }
}

/// A planar face offered by a shape: vertices in winding order and the
/// outward normal.
#[derive(Debug, Clone, PartialEq)]
pub struct ContactFace {
    /// Vertices in order around the face.
    pub vertices: Polygon,
    /// Outward face normal.
    pub normal: Vector3<f64>,
}

impl ContactFace {
    /// Centroid of the vertices.
    #[must_use]
    pub fn center(&self) -> Point3<f64> {
        #[allow(clippy::cast_precision_loss)]
        let n = self.vertices.len().max(1) as f64;
        let sum = self
            .vertices
            .iter()
            .fold(Vector3::zeros(), |acc, p| acc + p.coords);
        Point3::from(sum / n)
    }

    /// Side planes through each edge, facing away from the face center.
    pub fn side_planes(&self) -> impl Iterator<Item = Plane> + '_ {
        let center = self.center();
        let n = self.vertices.len();
        (0..n).filter_map(move |i| {
            let a = self.vertices[i];
            let b = self.vertices[(i + 1) % n];
            let mut normal = self.normal.cross(&(b - a)).try_normalize(EPSILON)?;
            if normal.dot(&(a - center)) < 0.0 {
                normal = -normal;
            }
            Some(Plane::new(normal, &a))
        })
    }
}

/// Face of `info` that best faces `direction`.
///
/// Returns `None` for spheres, which have no faces.
#[must_use]
pub fn face_along(info: &ConvexInfo, direction: &Vector3<f64>) -> Option<ContactFace> {
    match info.kind {
        ShapeKind::Sphere => None,
        ShapeKind::Box => Some(box_face(info, direction)),
        ShapeKind::Cylinder => Some(cylinder_face(info, direction)),
        ShapeKind::Capsule => Some(barrel_face(info, direction)),
    }
}

/// Box face whose outward normal is closest to `direction`.
fn box_face(info: &ConvexInfo, direction: &Vector3<f64>) -> ContactFace {
    let mut best = (0, 1.0, f64::NEG_INFINITY);
    for (i, axis) in info.axes.iter().enumerate() {
        let d = axis.dot(direction);
        if d > best.2 {
            best = (i, 1.0, d);
        }
        if -d > best.2 {
            best = (i, -1.0, -d);
        }
    }
    let (i, sign, _) = best;
    let normal = info.axes[i] * sign;
    let (j, k) = ((i + 1) % 3, (i + 2) % 3);
    let face_center = info.center + normal * info.half_extents[i];
    let u = info.axes[j] * info.half_extents[j];
    let v = info.axes[k] * info.half_extents[k];

    let vertices = [(1.0, 1.0), (-1.0, 1.0), (-1.0, -1.0), (1.0, -1.0)]
        .into_iter()
        .map(|(su, sv)| face_center + u * su + v * sv)
        .collect();
    ContactFace { vertices, normal }
}

/// Cylinder cap when `direction` points into the cap's cone, otherwise the
/// barrel segment facing `direction`.
fn cylinder_face(info: &ConvexInfo, direction: &Vector3<f64>) -> ContactFace {
    let axis = info.height_axis();
    let rim = info
        .top_ring()
        .first()
        .and_then(|p| (p - info.center).try_normalize(EPSILON));
    let limit = rim.map_or(1.0, |r| axis.dot(&r));
    let along = axis.dot(direction);

    if along > limit {
        ContactFace {
            vertices: info.top_ring().iter().copied().collect(),
            normal: axis,
        }
    } else if along < -limit {
        ContactFace {
            vertices: info.bottom_ring().iter().copied().collect(),
            normal: -axis,
        }
    } else {
        barrel_face(info, direction)
    }
}

/// Barrel quad of a cylinder or capsule whose segment axis best faces
/// `direction`.
fn barrel_face(info: &ConvexInfo, direction: &Vector3<f64>) -> ContactFace {
    let segment = (1..info.axes.len())
        .max_by(|&a, &b| {
            info.axes[a]
                .dot(direction)
                .total_cmp(&info.axes[b].dot(direction))
        })
        .unwrap_or(1);
    let (top, bottom) = (info.top_ring(), info.bottom_ring());
    let (prev, next) = ((segment - 1) % SEGMENTS, segment % SEGMENTS);

    let vertices = [top[prev], top[next], bottom[next], bottom[prev]]
        .into_iter()
        .collect();
    ContactFace {
        vertices,
        normal: info.axes[segment],
    }
}

/// Clip a polygon against a plane, keeping the part with non-positive distance.
///
/// A polygon that lies entirely inside comes back unchanged.
#[must_use]
pub fn clip_polygon(polygon: &[Point3<f64>], plane: &Plane) -> Polygon {
    let mut out = Polygon::new();
    let Some(&last) = polygon.last() else {
        return out;
    };

    let mut prev = last;
    let mut prev_distance = plane.distance(&prev);
    for &current in polygon {
        let distance = plane.distance(&current);
        let prev_inside = prev_distance <= 0.0;
        let inside = distance <= 0.0;

        if inside != prev_inside {
            let t = prev_distance / (prev_distance - distance);
            out.push(prev + (current - prev) * t);
        }
        if inside {
            out.push(current);
        }

        prev = current;
        prev_distance = distance;
    }
    out
}

/// Clip the incident face to the side planes of the reference face, then
/// drop what lies above the reference plane.
#[must_use]
pub fn clip_incident(reference: &ContactFace, incident: &ContactFace) -> Polygon {
    let mut polygon = incident.vertices.clone();
    for plane in reference.side_planes() {
        polygon = clip_polygon(&polygon, &plane);
        if polygon.is_empty() {
            return polygon;
        }
    }

    let Some(origin) = reference.vertices.first() else {
        return Polygon::new();
    };
    let reference_plane = Plane::new(reference.normal, origin);
    polygon
        .into_iter()
        .filter(|p| reference_plane.distance(p) <= 0.0)
        .collect()
}
