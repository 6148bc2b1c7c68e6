//! Sole geometry of the robot's feet.

use serde::{Deserialize, Serialize};

/// Foot sole dimensions and friction, used to complete footstep plans and to
/// build contact wrench cones.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Sole {
    /// Half-length of the sole along the sagittal axis, in meters.
    pub half_length: f64,
    /// Half-width of the sole along the lateral axis, in meters.
    pub half_width: f64,
    /// Coulomb friction coefficient between sole and ground.
    pub friction: f64,
}

impl Default for Sole {
    fn default() -> Self {
        Self {
            half_length: 0.112,
            half_width: 0.065,
            friction: 0.7,
        }
    }
}
