//! Core types for the rigid-body physics core.
//!
//! This crate provides the plain data shared between the physics pipeline and
//! its collaborators (renderer, scene serializer, gameplay code):
//!
//! - [`Pose`] / [`Twist`] - position, orientation and velocity of a body
//! - [`BodyDef`] - everything needed to create a rigid body
//! - [`MassProperties`] - mass and inertia, with closed forms per primitive
//! - [`Material`] - friction, restitution and density of a fixture
//! - [`WorldConfig`] - timestep, gravity, solver, sleep and allocator settings
//! - [`PhysicsError`] - the single error type of the physics crates
//!
//! # Design Philosophy
//!
//! These types are **pure data**. They have no behavior beyond validation and
//! small conversions; all simulation lives in `physics-core`.
//!
//! # Coordinate System
//!
//! - X: right
//! - Y: up
//! - Z: towards the viewer
//! - Right-handed
//!
//! # Example
//!
//! ```
//! use physics_types::{BodyDef, Material, WorldConfig};
//! use nalgebra::Point3;
//!
//! let config = WorldConfig::default();
//! assert!(config.validate().is_ok());
//!
//! let crate_body = BodyDef::dynamic().with_position(Point3::new(0.0, 1.0, 0.0));
//! let rubber = Material::default().with_restitution(0.8);
//!
//! assert!(crate_body.validate().is_ok());
//! assert!(rubber.validate().is_ok());
//! ```

#![deny(clippy::unwrap_used, clippy::expect_used)]
#![warn(missing_docs)]
#![allow(
    clippy::missing_const_for_fn,     // Many methods can't be const due to nalgebra
    clippy::suboptimal_flops,          // mul_add style changes aren't always clearer
    clippy::missing_errors_doc,        // Error docs added where non-obvious
)]

mod body;
mod config;
mod dynamics;
mod error;

pub use body::{BodyDef, BodyType, MassProperties, Pose, Twist};
pub use config::{AllocatorConfig, SleepConfig, SolverConfig, WorldConfig};
pub use dynamics::{Gravity, Material};
pub use error::PhysicsError;

// Re-export math types for convenience
pub use nalgebra::{Matrix3, Matrix4, Point3, UnitQuaternion, Vector3};

/// Result type for physics operations.
pub type Result<T> = std::result::Result<T, PhysicsError>;
