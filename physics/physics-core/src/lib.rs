//! Rigid-body physics core.
//!
//! This crate runs the collision and constraint pipeline of a 3D rigid-body
//! engine: a dynamic AABB tree broad phase, a GJK + EPA + clipping narrow
//! phase, and an island-partitioned sequential-impulse solver. Scratch memory
//! comes from explicit arena allocators owned by each [`World`].
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                          World                               │
//! │  integrate awake bodies → synchronize fixture AABBs          │
//! └─────────────────────────┬───────────────────────────────────┘
//!                           │
//!                           ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     ContactManager                           │
//! │  BroadPhase (DynamicTree) → new pairs → Contact::update      │
//! │  GJK → EPA → reference/incident clipping → Manifold          │
//! └─────────────────────────┬───────────────────────────────────┘
//!                           │
//!                           ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                   Island + ContactSolver                     │
//! │  DFS over touching contacts → velocity / position passes    │
//! │  → commit, sleep                                             │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Quick Start
//!
//! ```
//! use physics_core::{Shape, World};
//! use physics_types::{BodyDef, WorldConfig};
//! use nalgebra::{Point3, Vector3};
//!
//! let mut world = World::new(WorldConfig::default()).unwrap();
//!
//! let ground = world.create_body(&BodyDef::static_body()).unwrap();
//! world
//!     .create_fixture(ground, Shape::cuboid(Vector3::new(5.0, 0.5, 5.0)))
//!     .unwrap();
//!
//! let ball = world
//!     .create_body(&BodyDef::dynamic().with_position(Point3::new(0.0, 3.0, 0.0)))
//!     .unwrap();
//! world.create_fixture(ball, Shape::sphere(0.5)).unwrap();
//!
//! for _ in 0..120 {
//!     world.step().unwrap();
//! }
//! assert!(world.body(ball).unwrap().position().y < 3.0);
//! ```
//!
//! # Conventions
//!
//! - Y is up; gravity defaults to (0, -9.81, 0).
//! - Manifold normals point from fixture A to fixture B.
//! - Separation is negative when shapes overlap.
//! - A body's center of mass is its origin.

#![deny(clippy::unwrap_used, clippy::expect_used)]
#![warn(missing_docs)]
#![allow(
    clippy::missing_const_for_fn,     // Many methods can't be const due to nalgebra
    clippy::suboptimal_flops,          // mul_add style changes aren't always clearer
    clippy::cast_precision_loss,       // Counts converted to f64 are small
    clippy::many_single_char_names,    // Geometry reads better with a, b, c, n
    clippy::similar_names,             // point_a / point_b and friends
)]

pub mod alloc;
pub mod body;
pub mod broad_phase;
pub mod contact;
pub mod contact_manager;
pub mod dynamic_tree;
pub mod island;
pub mod shape;
pub mod solver;
pub mod world;

pub use alloc::{BlockAllocator, PhysicsContext, StackAllocator};
pub use body::{BodyHandle, ContactLink, Fixture, FixtureDef, FixtureProxy, Rigidbody, Sweep};
pub use broad_phase::{BroadPhase, PairCallback};
pub use contact::{Contact, ContactFlags, ContactKey, ContactKind, Manifold, ManifoldPoint};
pub use contact_manager::ContactManager;
pub use dynamic_tree::{BoundingSphere, BoundingVolume, DynamicTree, ProxyId};
pub use island::Island;
pub use shape::{Aabb, ConvexInfo, Core, Shape, ShapeKind, SupportMap};
pub use solver::ContactSolver;
pub use world::World;

// Re-export key types from physics-types for convenience
pub use physics_types::{
    BodyDef, BodyType, Gravity, MassProperties, Material, PhysicsError, Pose, Result, SolverConfig,
    WorldConfig,
};
