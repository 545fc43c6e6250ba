//! Error types for physics operations.

use thiserror::Error;

/// Errors that can occur while building or stepping a physics world.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum PhysicsError {
    /// The scratch stack has no room for the requested allocation.
    #[error("stack allocator exhausted: requested {requested} bytes, {remaining} remaining")]
    StackExhausted {
        /// Bytes requested by the failed allocation.
        requested: usize,
        /// Bytes still available in the stack.
        remaining: usize,
    },

    /// Too many stack allocations are outstanding at once.
    #[error("stack allocator entry limit reached ({max} outstanding allocations)")]
    StackEntriesExhausted {
        /// Maximum number of simultaneous entries.
        max: usize,
    },

    /// A body handle does not refer to a live body.
    #[error("invalid body: {0}")]
    InvalidBody(String),

    /// A body creation index is out of range.
    #[error("invalid body index: {0}")]
    InvalidBodyIndex(usize),

    /// Invalid timestep.
    #[error("invalid timestep: {0} (must be positive and finite)")]
    InvalidTimestep(f64),

    /// Invalid configuration.
    #[error("invalid configuration: {reason}")]
    InvalidConfig {
        /// Description of the configuration error.
        reason: String,
    },

    /// Invalid mass properties.
    #[error("invalid mass properties: {reason}")]
    InvalidMassProperties {
        /// Description of what's wrong.
        reason: String,
    },

    /// Invalid shape dimensions.
    #[error("invalid shape: {reason}")]
    InvalidShape {
        /// Description of what's wrong.
        reason: String,
    },

    /// Simulation diverged (`NaN` or `Inf` detected).
    #[error("simulation diverged: {reason}")]
    Diverged {
        /// Description of what went wrong.
        reason: String,
    },
}

impl PhysicsError {
    /// Create a diverged error.
    #[must_use]
    pub fn diverged(reason: impl Into<String>) -> Self {
        Self::Diverged {
            reason: reason.into(),
        }
    }

    /// Create an invalid configuration error.
    #[must_use]
    pub fn invalid_config(reason: impl Into<String>) -> Self {
        Self::InvalidConfig {
            reason: reason.into(),
        }
    }

    /// Create an invalid mass properties error.
    #[must_use]
    pub fn invalid_mass(reason: impl Into<String>) -> Self {
        Self::InvalidMassProperties {
            reason: reason.into(),
        }
    }

    /// Create an invalid shape error.
    #[must_use]
    pub fn invalid_shape(reason: impl Into<String>) -> Self {
        Self::InvalidShape {
            reason: reason.into(),
        }
    }

    /// Check if this error comes from a scratch allocator running dry.
    #[must_use]
    pub fn is_allocator_error(&self) -> bool {
        matches!(
            self,
            Self::StackExhausted { .. } | Self::StackEntriesExhausted { .. }
        )
    }

    /// Check if this is a divergence error.
    #[must_use]
    pub fn is_diverged(&self) -> bool {
        matches!(self, Self::Diverged { .. })
    }

    /// Check if this is a configuration error.
    #[must_use]
    pub fn is_config_error(&self) -> bool {
        matches!(self, Self::InvalidConfig { .. } | Self::InvalidTimestep(_))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::float_cmp)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = PhysicsError::StackExhausted {
            requested: 4096,
            remaining: 128,
        };
        let msg = err.to_string();
        assert!(msg.contains("4096"));
        assert!(msg.contains("128"));

        let err = PhysicsError::StackEntriesExhausted { max: 32 };
        assert!(err.to_string().contains("32"));

        let err = PhysicsError::diverged("NaN in velocity");
        assert!(err.to_string().contains("NaN"));
    }

    #[test]
    fn test_error_predicates() {
        let err = PhysicsError::StackEntriesExhausted { max: 32 };
        assert!(err.is_allocator_error());
        assert!(!err.is_config_error());

        let err = PhysicsError::InvalidTimestep(-1.0);
        assert!(err.is_config_error());
        assert!(!err.is_allocator_error());

        let err = PhysicsError::diverged("test");
        assert!(err.is_diverged());
        assert!(!err.is_config_error());
    }
}
