//! Inverted pendulum state of the center of mass.
//!
//! Tracks CoM position, velocity and acceleration in the world frame,
//! parameterized by the natural frequency `omega = sqrt(g / height)`.
//! Derived quantities:
//!
//! ```text
//! dcm = com + comd / omega                  (divergent component of motion)
//! zmp = com - (comdd - g_vec) / omega^2     (flat-ground approximation)
//! ```
//!
//! No solver is involved: the pendulum is pure integration and derivation,
//! advanced once per control cycle from the active MPC preview sample.

use nalgebra::Vector3;

use crate::world;

#[derive(Clone, Copy, Debug)]
pub struct Pendulum {
    com: Vector3<f64>,
    comd: Vector3<f64>,
    comdd: Vector3<f64>,
    omega: f64,
}

impl Default for Pendulum {
    fn default() -> Self {
        let mut pendulum = Self {
            com: Vector3::zeros(),
            comd: Vector3::zeros(),
            comdd: Vector3::zeros(),
            omega: 0.0,
        };
        pendulum.reset(Vector3::new(0.0, 0.0, 0.8), 0.8);
        pendulum
    }
}

impl Pendulum {
    /// Reset to a stationary state at `com`, with the natural frequency
    /// derived from `height` (CoM height above ground).
    pub fn reset(&mut self, com: Vector3<f64>, height: f64) {
        self.com = com;
        self.comd = Vector3::zeros();
        self.comdd = Vector3::zeros();
        self.set_com_height(height);
    }

    /// Re-derive the natural frequency from a new target CoM height.
    pub fn set_com_height(&mut self, height: f64) {
        assert!(height > 0.0, "CoM height must be positive");
        self.omega = (world::GRAVITY / height).sqrt();
    }

    /// Overwrite the full CoM state, keeping the current frequency.
    pub fn set_state(&mut self, com: Vector3<f64>, comd: Vector3<f64>, comdd: Vector3<f64>) {
        self.com = com;
        self.comd = comd;
        self.comdd = comdd;
    }

    /// Integrate a constant CoM jerk over `dt` (third-order Taylor update).
    pub fn integrate_com_jerk(&mut self, comddd: &Vector3<f64>, dt: f64) {
        self.com += dt * (self.comd + dt * (self.comdd / 2.0 + dt * comddd / 6.0));
        self.comd += dt * (self.comdd + dt * comddd / 2.0);
        self.comdd += dt * comddd;
    }

    pub fn com(&self) -> Vector3<f64> {
        self.com
    }

    pub fn comd(&self) -> Vector3<f64> {
        self.comd
    }

    pub fn comdd(&self) -> Vector3<f64> {
        self.comdd
    }

    /// Natural frequency of the pendulum, in Hz (rad/s).
    pub fn omega(&self) -> f64 {
        self.omega
    }

    /// Divergent component of motion.
    pub fn dcm(&self) -> Vector3<f64> {
        self.com + self.comd / self.omega
    }

    /// Zero-tilting-moment point under the flat-ground approximation.
    pub fn zmp(&self) -> Vector3<f64> {
        self.com - (self.comdd - world::gravity()) / (self.omega * self.omega)
    }
}
