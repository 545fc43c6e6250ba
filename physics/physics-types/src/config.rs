//! Configuration types for a physics world.
//!
//! This module provides configuration types that control how a world steps:
//! timestep, gravity, solver iterations, sleeping, and scratch memory sizes.

use crate::dynamics::Gravity;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Main configuration for a physics world.
///
/// # Example
///
/// ```
/// use physics_types::{WorldConfig, SolverConfig};
///
/// let config = WorldConfig::realtime()
///     .with_solver(SolverConfig::default().iterations(20, 10));
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct WorldConfig {
    /// Fixed timestep used by `World::step` (seconds).
    pub timestep: f64,
    /// Gravity configuration.
    pub gravity: Gravity,
    /// Contact solver configuration.
    pub solver: SolverConfig,
    /// Sleep heuristics.
    pub sleep: SleepConfig,
    /// Scratch allocator sizing.
    pub allocator: AllocatorConfig,
    /// Margin added around proxy AABBs in the broad phase tree.
    pub aabb_margin: f64,
}

impl Default for WorldConfig {
    fn default() -> Self {
        Self {
            timestep: 1.0 / 60.0,
            gravity: Gravity::earth(),
            solver: SolverConfig::default(),
            sleep: SleepConfig::default(),
            allocator: AllocatorConfig::default(),
            aabb_margin: 0.1,
        }
    }
}

impl WorldConfig {
    /// Create a config with the given timestep.
    #[must_use]
    pub fn with_timestep(timestep: f64) -> Self {
        Self {
            timestep,
            ..Default::default()
        }
    }

    /// Real-time configuration (60 Hz).
    #[must_use]
    pub fn realtime() -> Self {
        Self::default()
    }

    /// Higher fidelity configuration (240 Hz, more solver iterations).
    #[must_use]
    pub fn high_accuracy() -> Self {
        Self {
            timestep: 1.0 / 240.0,
            solver: SolverConfig::high_accuracy(),
            ..Default::default()
        }
    }

    /// Set the gravity.
    #[must_use]
    pub fn with_gravity(mut self, gravity: Gravity) -> Self {
        self.gravity = gravity;
        self
    }

    /// Disable gravity.
    #[must_use]
    pub fn zero_gravity(mut self) -> Self {
        self.gravity = Gravity::zero();
        self
    }

    /// Set the solver configuration.
    #[must_use]
    pub fn with_solver(mut self, solver: SolverConfig) -> Self {
        self.solver = solver;
        self
    }

    /// Set the sleep configuration.
    #[must_use]
    pub fn with_sleep(mut self, sleep: SleepConfig) -> Self {
        self.sleep = sleep;
        self
    }

    /// Set the allocator configuration.
    #[must_use]
    pub fn with_allocator(mut self, allocator: AllocatorConfig) -> Self {
        self.allocator = allocator;
        self
    }

    /// Validate the configuration.
    pub fn validate(&self) -> crate::Result<()> {
        if !self.timestep.is_finite() || self.timestep <= 0.0 {
            return Err(crate::PhysicsError::InvalidTimestep(self.timestep));
        }
        if self.timestep > 1.0 {
            return Err(crate::PhysicsError::invalid_config(
                "timestep > 1 second is likely an error",
            ));
        }
        if !self.gravity.acceleration.iter().all(|g| g.is_finite()) {
            return Err(crate::PhysicsError::invalid_config("gravity must be finite"));
        }
        if !(self.aabb_margin >= 0.0 && self.aabb_margin.is_finite()) {
            return Err(crate::PhysicsError::invalid_config(
                "aabb_margin must be non-negative",
            ));
        }

        self.solver.validate()?;
        self.sleep.validate()?;
        self.allocator.validate()?;

        Ok(())
    }
}

/// Configuration for the contact solver.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct SolverConfig {
    /// Velocity iterations per island per step.
    pub velocity_iterations: usize,
    /// Position iterations per island per step.
    pub position_iterations: usize,
    /// Penetration tolerated before positional correction kicks in.
    pub linear_slop: f64,
    /// Fraction of the remaining penetration corrected per position iteration.
    pub baumgarte: f64,
    /// Approach speed below which no normal impulse is applied.
    pub normal_stop_velocity: f64,
    /// Sliding speed below which no friction impulse is applied.
    pub tangent_stop_velocity: f64,
    /// Seed each step's impulses with the previous step's solution.
    ///
    /// Off by default: impulses restart from zero every step.
    pub warm_starting: bool,
}

impl Default for SolverConfig {
    fn default() -> Self {
        Self {
            velocity_iterations: 10,
            position_iterations: 10,
            linear_slop: 0.001,
            baumgarte: 1.0,
            normal_stop_velocity: 1e-4,
            tangent_stop_velocity: 1e-4,
            warm_starting: false,
        }
    }
}

impl SolverConfig {
    /// More iterations, tighter slop.
    #[must_use]
    pub fn high_accuracy() -> Self {
        Self {
            velocity_iterations: 20,
            position_iterations: 20,
            linear_slop: 0.0005,
            ..Default::default()
        }
    }

    /// Set the number of solver iterations.
    #[must_use]
    pub fn iterations(mut self, velocity: usize, position: usize) -> Self {
        self.velocity_iterations = velocity;
        self.position_iterations = position;
        self
    }

    /// Enable or disable warm starting.
    #[must_use]
    pub fn with_warm_starting(mut self, enabled: bool) -> Self {
        self.warm_starting = enabled;
        self
    }

    /// Validate the solver configuration.
    pub fn validate(&self) -> crate::Result<()> {
        if self.velocity_iterations == 0 {
            return Err(crate::PhysicsError::invalid_config(
                "velocity_iterations must be at least 1",
            ));
        }
        if !(self.linear_slop >= 0.0 && self.linear_slop.is_finite()) {
            return Err(crate::PhysicsError::invalid_config(
                "linear_slop must be non-negative",
            ));
        }
        if !(0.0..=1.0).contains(&self.baumgarte) {
            return Err(crate::PhysicsError::invalid_config(
                "baumgarte must be in [0, 1]",
            ));
        }
        if self.normal_stop_velocity < 0.0 || self.tangent_stop_velocity < 0.0 {
            return Err(crate::PhysicsError::invalid_config(
                "stop velocities must be non-negative",
            ));
        }
        Ok(())
    }
}

/// Thresholds that decide when a body falls asleep.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct SleepConfig {
    /// Whether bodies may sleep at all.
    pub enabled: bool,
    /// Time a body must stay still before sleeping (seconds).
    pub time_to_sleep: f64,
    /// Linear speed below which a body counts as still.
    pub linear_threshold: f64,
    /// Angular speed below which a body counts as still.
    pub angular_threshold: f64,
    /// Relative linear speed across a contact that keeps both bodies awake.
    pub relative_linear_threshold: f64,
    /// Relative angular speed across a contact that keeps both bodies awake.
    pub relative_angular_threshold: f64,
    /// Minimum |normal · up| for a contact to count as ground support.
    pub ground_normal_threshold: f64,
}

impl Default for SleepConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            time_to_sleep: 0.3,
            linear_threshold: 1.0,
            angular_threshold: 0.1,
            relative_linear_threshold: 1.0,
            relative_angular_threshold: 1.0,
            ground_normal_threshold: 0.3,
        }
    }
}

impl SleepConfig {
    /// Sleeping disabled, every body stays awake.
    #[must_use]
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Default::default()
        }
    }

    /// Validate the sleep configuration.
    pub fn validate(&self) -> crate::Result<()> {
        let values = [
            self.time_to_sleep,
            self.linear_threshold,
            self.angular_threshold,
            self.relative_linear_threshold,
            self.relative_angular_threshold,
        ];
        if values.iter().any(|v| !(v.is_finite() && *v >= 0.0)) {
            return Err(crate::PhysicsError::invalid_config(
                "sleep thresholds must be non-negative",
            ));
        }
        if !(0.0..=1.0).contains(&self.ground_normal_threshold) {
            return Err(crate::PhysicsError::invalid_config(
                "ground_normal_threshold must be in [0, 1]",
            ));
        }
        Ok(())
    }
}

/// Sizes of the scratch allocators owned by a physics context.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct AllocatorConfig {
    /// Byte budget of the LIFO scratch stack.
    pub stack_capacity: usize,
    /// Maximum simultaneous stack allocations.
    pub max_stack_entries: usize,
    /// Bytes reserved per block allocator chunk.
    pub block_chunk_size: usize,
    /// Largest request served from the block size classes.
    pub max_block_size: usize,
}

impl Default for AllocatorConfig {
    fn default() -> Self {
        Self {
            stack_capacity: 10 * 1024 * 1024,
            max_stack_entries: 32,
            block_chunk_size: 1024 * 1024,
            max_block_size: 4096,
        }
    }
}

impl AllocatorConfig {
    /// Validate the allocator configuration.
    pub fn validate(&self) -> crate::Result<()> {
        if self.stack_capacity == 0 || self.max_stack_entries == 0 {
            return Err(crate::PhysicsError::invalid_config(
                "stack allocator needs a non-zero capacity and entry count",
            ));
        }
        if self.block_chunk_size < self.max_block_size {
            return Err(crate::PhysicsError::invalid_config(
                "block_chunk_size must hold at least one block of max_block_size",
            ));
        }
        Ok(())
    }
}
