//! Receding-horizon CoM trajectory optimization for biped walking.
//!
//! This crate implements linear model predictive control over a footstep
//! preview window, based on "Trajectory free linear model predictive control
//! for stable walking in the presence of strong perturbations" (Wieber,
//! Humanoids 2006), with terminal DCM and ZMP constraints:
//!
//! 1. **Phase schedule**: maps the current (init SSP, DSP, target SSP)
//!    phase durations onto the discretized horizon
//! 2. **Reference trajectories**: piecewise ZMP and interpolated velocity
//!    references over the horizon
//! 3. **QP assembly**: triple-integrator dynamics, support-polygon ZMP
//!    constraints, terminal constraints, weighted tracking costs
//! 4. **Preview playback**: integrates the solved jerk trajectory into a
//!    [`strider_core::Pendulum`], one control timestep at a time

pub mod mpc;
pub mod preview;

pub use mpc::{
    ModelPredictiveControl, MpcWeights, INPUT_SIZE, NB_STEPS, SAMPLING_PERIOD, STATE_SIZE,
};
pub use preview::Preview;
