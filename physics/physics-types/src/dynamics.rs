//! Gravity and contact material types.

use nalgebra::Vector3;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Gravity configuration for a world.
///
/// Worlds are Y-up: the default gravity points along -Y.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Gravity {
    /// Acceleration due to gravity (m/s²).
    pub acceleration: Vector3<f64>,
}

impl Default for Gravity {
    fn default() -> Self {
        Self::earth()
    }
}

impl Gravity {
    /// Standard Earth gravity (9.81 m/s² in -Y direction).
    #[must_use]
    pub fn earth() -> Self {
        Self {
            acceleration: Vector3::new(0.0, -9.81, 0.0),
        }
    }

    /// Zero gravity.
    #[must_use]
    pub fn zero() -> Self {
        Self {
            acceleration: Vector3::zeros(),
        }
    }

    /// Custom gravity vector.
    #[must_use]
    pub fn custom(acceleration: Vector3<f64>) -> Self {
        Self { acceleration }
    }

    /// The "up" direction: opposite to gravity, or +Y without gravity.
    #[must_use]
    pub fn up(&self) -> Vector3<f64> {
        self.acceleration
            .try_normalize(1e-12)
            .map_or_else(Vector3::y, |dir| -dir)
    }
}

/// Surface and bulk properties of a fixture.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Material {
    /// Coulomb friction coefficient.
    pub friction: f64,
    /// Coefficient of restitution, 0 for perfectly inelastic.
    pub restitution: f64,
    /// Density in kg/m³, used to derive mass from shape volume.
    pub density: f64,
}

impl Default for Material {
    fn default() -> Self {
        Self {
            friction: 0.5,
            restitution: 0.0,
            density: 1.0,
        }
    }
}

impl Material {
    /// Create a material.
    #[must_use]
    pub const fn new(friction: f64, restitution: f64, density: f64) -> Self {
        Self {
            friction,
            restitution,
            density,
        }
    }

    /// Set the friction coefficient.
    #[must_use]
    pub fn with_friction(mut self, friction: f64) -> Self {
        self.friction = friction;
        self
    }

    /// Set the restitution coefficient.
    #[must_use]
    pub fn with_restitution(mut self, restitution: f64) -> Self {
        self.restitution = restitution;
        self
    }

    /// Set the density.
    #[must_use]
    pub fn with_density(mut self, density: f64) -> Self {
        self.density = density;
        self
    }

    /// Friction of a contact between two materials: the geometric mean.
    #[must_use]
    pub fn mix_friction(a: f64, b: f64) -> f64 {
        (a * b).sqrt()
    }

    /// Restitution of a contact between two materials: the larger one.
    #[must_use]
    pub fn mix_restitution(a: f64, b: f64) -> f64 {
        a.max(b)
    }

    /// Validate the material.
    pub fn validate(&self) -> crate::Result<()> {
        if !(self.friction >= 0.0 && self.friction.is_finite()) {
            return Err(crate::PhysicsError::invalid_config(
                "friction must be non-negative",
            ));
        }
        if !(0.0..=1.0).contains(&self.restitution) {
            return Err(crate::PhysicsError::invalid_config(
                "restitution must be in [0, 1]",
            ));
        }
        if !(self.density >= 0.0 && self.density.is_finite()) {
            return Err(crate::PhysicsError::invalid_config(
                "density must be non-negative",
            ));
        }
        Ok(())
    }
}
