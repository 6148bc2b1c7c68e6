// strider-core: contacts, footstep plans, pendulum state, filters, spatial
// algebra and the dense least-squares QP wrapper shared by the walking
// controller crates.

pub mod clamp;
pub mod contact;
pub mod error;
pub mod filters;
pub mod lsq;
pub mod pendulum;
pub mod plan;
pub mod sole;
pub mod spatial;

pub use contact::{Contact, ContactState, Hrep, Surface, SwingSettings};
pub use error::{ConfigError, PlanError, SolverError, StriderError};
pub use filters::{ExponentialMovingAverage, LeakyIntegrator, LowPassVelocityFilter};
pub use lsq::LeastSquares;
pub use pendulum::Pendulum;
pub use plan::{FootstepPlan, MpcWeightsOverride};
pub use sole::Sole;
pub use spatial::{MotionVec, Pose, Wrench};

/// World-frame constants shared across the controller.
pub mod world {
    use nalgebra::Vector3;

    /// Standard gravity magnitude in m/s^2.
    pub const GRAVITY: f64 = 9.81;

    /// Gravity vector in the world frame (z is up).
    pub fn gravity() -> Vector3<f64> {
        Vector3::new(0.0, 0.0, -GRAVITY)
    }

    /// World-frame vertical unit vector.
    pub fn e_z() -> Vector3<f64> {
        Vector3::z()
    }
}
