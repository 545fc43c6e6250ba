//! Sequential-impulse contact solver.
//!
//! A [`ContactSolver`] works on one island. Body state lives in an
//! island-local array of [`SolverBody`] indexed by each body's island index;
//! manifold points are read from and written back to the contacts in place.
//!
//! Per island and step:
//!
//! 1. `solve_velocity_constraints` runs a fixed number of times. Each contact
//!    shares its normal impulse between points in proportion to their
//!    penetration, clamps the accumulated impulse at zero, then applies
//!    Coulomb friction bounded by `friction * normal_impulse`.
//! 2. `solve_position_constraints` pushes bodies apart along the contact
//!    normal, split by inverse mass, until penetration is within the slop.
//! 3. `check_sleep_contact` gathers the evidence the island uses to decide
//!    which bodies may fall asleep.

use nalgebra::{Matrix3, Point3, Vector3};
use physics_types::{Result, SleepConfig, SolverConfig};
use slotmap::SlotMap;

use crate::alloc::{StackAllocator, StackVec};
use crate::body::{BodyHandle, Rigidbody};
use crate::contact::{Contact, ContactKey, ManifoldPoint};

const EPSILON: f64 = 1e-12;

/// Sleep evidence gathered from contacts during one island solve.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SleepCheck {
    /// No contact reported a large relative linear velocity.
    pub normal_stop: bool,
    /// No contact reported a large relative angular velocity.
    pub tangent_stop: bool,
    /// Some contact supports the body from below.
    pub is_normal: bool,
}

impl Default for SleepCheck {
    fn default() -> Self {
        Self {
            normal_stop: true,
            tangent_stop: true,
            is_normal: false,
        }
    }
}

/// Island-local snapshot of one body.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SolverBody {
    /// Position at the start of the solve.
    pub position: Point3<f64>,
    /// Accumulated positional correction.
    pub position_buffer: Vector3<f64>,
    /// Linear velocity.
    pub linear_velocity: Vector3<f64>,
    /// Angular velocity.
    pub angular_velocity: Vector3<f64>,
    /// Sleep evidence.
    pub sleep: SleepCheck,
}

impl Default for SolverBody {
    fn default() -> Self {
        Self {
            position: Point3::origin(),
            position_buffer: Vector3::zeros(),
            linear_velocity: Vector3::zeros(),
            angular_velocity: Vector3::zeros(),
            sleep: SleepCheck::default(),
        }
    }
}

impl SolverBody {
    /// Snapshot a body's position and velocity.
    #[must_use]
    pub fn new(body: &Rigidbody) -> Self {
        Self {
            position: body.position(),
            linear_velocity: body.linear_velocity(),
            angular_velocity: body.angular_velocity(),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct VelocityConstraint {
    contact: ContactKey,
    index_a: usize,
    index_b: usize,
    center_a: Point3<f64>,
    center_b: Point3<f64>,
    inverse_mass_a: f64,
    inverse_mass_b: f64,
    inverse_inertia_a: Matrix3<f64>,
    inverse_inertia_b: Matrix3<f64>,
    friction: f64,
    restitution: f64,
}

impl VelocityConstraint {
    /// Inverse of the effective mass along `direction` at the two anchors.
    fn effective_mass(&self, ra: &Vector3<f64>, rb: &Vector3<f64>, direction: &Vector3<f64>) -> f64 {
        let ca = ra.cross(direction);
        let cb = rb.cross(direction);
        self.inverse_mass_a
            + self.inverse_mass_b
            + ca.dot(&(self.inverse_inertia_a * ca))
            + cb.dot(&(self.inverse_inertia_b * cb))
    }
}

#[derive(Debug, Clone, Copy)]
struct PositionConstraint {
    contact: ContactKey,
    index_a: usize,
    index_b: usize,
    inverse_mass_a: f64,
    inverse_mass_b: f64,
}

/// Per-contact accumulated velocity changes, applied once per contact.
#[derive(Default)]
struct VelocityDelta {
    linear_a: Vector3<f64>,
    angular_a: Vector3<f64>,
    linear_b: Vector3<f64>,
    angular_b: Vector3<f64>,
}

impl VelocityDelta {
    fn apply(
        &mut self,
        c: &VelocityConstraint,
        ra: &Vector3<f64>,
        rb: &Vector3<f64>,
        impulse: &Vector3<f64>,
    ) {
        self.linear_a -= impulse * c.inverse_mass_a;
        self.angular_a -= c.inverse_inertia_a * ra.cross(impulse);
        self.linear_b += impulse * c.inverse_mass_b;
        self.angular_b += c.inverse_inertia_b * rb.cross(impulse);
    }
}

// ============================================================================
// ContactSolver
// ============================================================================

/// Velocity and position solver for the contacts of one island.
///
/// Constraint arrays are drawn from the stack allocator and released when the
/// solver drops.
pub struct ContactSolver<'a> {
    config: &'a SolverConfig,
    contacts: &'a mut SlotMap<ContactKey, Contact>,
    velocity_constraints: StackVec<VelocityConstraint>,
    position_constraints: StackVec<PositionConstraint>,
}

impl<'a> ContactSolver<'a> {
    /// Pack constraint data for `island_contacts`.
    ///
    /// Every body referenced by those contacts must already carry its island
    /// index.
    ///
    /// # Errors
    ///
    /// Returns an allocator error when the stack cannot hold the constraints.
    pub fn new(
        island_contacts: &[ContactKey],
        contacts: &'a mut SlotMap<ContactKey, Contact>,
        bodies: &SlotMap<BodyHandle, Rigidbody>,
        config: &'a SolverConfig,
        stack: &StackAllocator,
    ) -> Result<Self> {
        let mut position_constraints = stack.allocate::<PositionConstraint>(island_contacts.len())?;
        let mut velocity_constraints = stack.allocate::<VelocityConstraint>(island_contacts.len())?;

        for &key in island_contacts {
            let Some(contact) = contacts.get(key) else {
                continue;
            };
            let (Some(body_a), Some(body_b)) = (
                bodies.get(contact.fixture_a().body),
                bodies.get(contact.fixture_b().body),
            ) else {
                continue;
            };

            velocity_constraints.push(VelocityConstraint {
                contact: key,
                index_a: body_a.island_index,
                index_b: body_b.island_index,
                center_a: body_a.position(),
                center_b: body_b.position(),
                inverse_mass_a: body_a.inverse_mass(),
                inverse_mass_b: body_b.inverse_mass(),
                inverse_inertia_a: *body_a.inverse_inertia(),
                inverse_inertia_b: *body_b.inverse_inertia(),
                friction: contact.friction(),
                restitution: contact.restitution(),
            });
            position_constraints.push(PositionConstraint {
                contact: key,
                index_a: body_a.island_index,
                index_b: body_b.island_index,
                inverse_mass_a: body_a.inverse_mass(),
                inverse_mass_b: body_b.inverse_mass(),
            });
        }

        Ok(Self {
            config,
            contacts,
            velocity_constraints,
            position_constraints,
        })
    }

    /// Number of packed contact constraints.
    #[must_use]
    pub fn constraint_count(&self) -> usize {
        self.velocity_constraints.len()
    }

    /// Apply the impulses carried over from the previous step.
    pub fn warm_start(&mut self, states: &mut [SolverBody]) {
        for c in self.velocity_constraints.iter() {
            let Some(contact) = self.contacts.get(c.contact) else {
                continue;
            };
            let mut delta = VelocityDelta::default();
            for point in contact.manifold().points() {
                let ra = point.point_a - c.center_a;
                let rb = point.point_b - c.center_b;
                let impulse = point.normal * point.normal_impulse - point.tangent_impulse;
                delta.apply(c, &ra, &rb, &impulse);
            }
            commit_delta(states, c, &delta);
        }
    }

    /// One sequential-impulse pass over every contact.
    pub fn solve_velocity_constraints(&mut self, states: &mut [SolverBody]) {
        let normal_stop = self.config.normal_stop_velocity;
        let tangent_stop = self.config.tangent_stop_velocity;

        for c in self.velocity_constraints.iter() {
            let Some(contact) = self.contacts.get_mut(c.contact) else {
                continue;
            };
            let points = contact.manifold_mut().points_mut();
            let penetration_sum: f64 = points.iter().map(ManifoldPoint::penetration).sum();
            if penetration_sum <= 0.0 {
                continue;
            }

            let (va, wa) = (states[c.index_a].linear_velocity, states[c.index_a].angular_velocity);
            let (vb, wb) = (states[c.index_b].linear_velocity, states[c.index_b].angular_velocity);
            let mut delta = VelocityDelta::default();

            for point in points.iter_mut() {
                let ra = point.point_a - c.center_a;
                let rb = point.point_b - c.center_b;
                if ra.norm_squared() == 0.0 || rb.norm_squared() == 0.0 {
                    continue;
                }

                let relative = (vb + wb.cross(&rb)) - (va + wa.cross(&ra));
                let normal = point.normal;
                let normal_speed = relative.dot(&normal);
                let share = point.penetration() / penetration_sum;

                if normal_speed < -normal_stop {
                    let k = c.effective_mass(&ra, &rb, &normal);
                    if k > EPSILON {
                        let lambda = -(1.0 + c.restitution) * normal_speed * share / k;
                        let old = point.normal_impulse;
                        point.normal_impulse = (old + lambda).max(0.0);
                        let applied = point.normal_impulse - old;
                        delta.apply(c, &ra, &rb, &(normal * applied));
                    }
                }

                let tangent_velocity = relative - normal * normal_speed;
                let Some(tangent) = tangent_velocity.try_normalize(EPSILON) else {
                    continue;
                };
                let tangent_speed = tangent.dot(&tangent_velocity);
                if tangent_speed > tangent_stop {
                    let k = c.effective_mass(&ra, &rb, &tangent);
                    if k > EPSILON {
                        let lambda = tangent_speed * share / k;
                        let old = point.tangent_impulse;
                        let max_friction = c.friction * point.normal_impulse;
                        point.tangent_impulse = (old + tangent * lambda).cap_magnitude(max_friction);
                        let applied = point.tangent_impulse - old;
                        // Friction pushes A along the sliding direction of B.
                        delta.apply(c, &ra, &rb, &(-applied));
                    }
                }
            }

            commit_delta(states, c, &delta);
        }
    }

    /// One positional correction pass over every contact.
    pub fn solve_position_constraints(&mut self, states: &mut [SolverBody]) {
        let slop = self.config.linear_slop;
        let baumgarte = self.config.baumgarte;

        for c in self.position_constraints.iter() {
            let total = c.inverse_mass_a + c.inverse_mass_b;
            if total <= 0.0 {
                continue;
            }
            let Some(contact) = self.contacts.get(c.contact) else {
                continue;
            };
            let points = contact.manifold().points();
            #[allow(clippy::cast_precision_loss)]
            let count = points.len() as f64;
            let (ratio_a, ratio_b) = (c.inverse_mass_a / total, c.inverse_mass_b / total);

            for point in points {
                let moved_a = point.point_a + states[c.index_a].position_buffer;
                let moved_b = point.point_b + states[c.index_b].position_buffer;
                let penetration = point.normal.dot(&(moved_a - moved_b));
                if penetration < slop {
                    continue;
                }

                let correction = point.normal * (penetration * baumgarte / count);
                states[c.index_a].position_buffer -= correction * ratio_a;
                states[c.index_b].position_buffer += correction * ratio_b;
            }
        }
    }

    /// Record which bodies are slow relative to their contacts and which are
    /// supported from below along `up`.
    pub fn check_sleep_contact(&self, states: &mut [SolverBody], sleep: &SleepConfig, up: &Vector3<f64>) {
        for c in self.velocity_constraints.iter() {
            let Some(contact) = self.contacts.get(c.contact) else {
                continue;
            };
            let points = contact.manifold().points();
            if points.is_empty() {
                continue;
            }

            let (a, b) = (states[c.index_a], states[c.index_b]);
            if (a.linear_velocity - b.linear_velocity).norm() > sleep.relative_linear_threshold {
                states[c.index_a].sleep.normal_stop = false;
                states[c.index_b].sleep.normal_stop = false;
            }
            if (a.angular_velocity - b.angular_velocity).norm() > sleep.relative_angular_threshold {
                states[c.index_a].sleep.tangent_stop = false;
                states[c.index_b].sleep.tangent_stop = false;
            }

            for point in points {
                let along_up = point.normal.dot(up);
                if along_up < -sleep.ground_normal_threshold {
                    states[c.index_a].sleep.is_normal = true;
                }
                if along_up > sleep.ground_normal_threshold {
                    states[c.index_b].sleep.is_normal = true;
                }
            }
        }
    }
}

fn commit_delta(states: &mut [SolverBody], c: &VelocityConstraint, delta: &VelocityDelta) {
    states[c.index_a].linear_velocity += delta.linear_a;
    states[c.index_a].angular_velocity += delta.angular_a;
    states[c.index_b].linear_velocity += delta.linear_b;
    states[c.index_b].angular_velocity += delta.angular_b;
}
