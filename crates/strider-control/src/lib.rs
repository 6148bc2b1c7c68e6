//! Walking controller pipeline.
//!
//! Ties the strider core together: loads the TOML configuration (MPC
//! weights, stabilizer gains, named footstep plans, robot model overrides),
//! anchors the selected plan to the robot's feet, and runs the fixed-rate
//! control cycle that turns measurements into CoM and foot task references.
//!
//! The crate deliberately stops short of phase orchestration: the finite
//! state machine sequencing Standing / DoubleSupport / SingleSupport phases
//! is an external collaborator that drives the plan cursor and contact
//! states through [`WalkingController`]'s accessors.

pub mod config;
pub mod controller;
pub mod gains;

pub use config::{ContactConfig, PlanConfig, PoseConfig, RobotModelConfig, WalkingConfig};
pub use controller::{CycleInputs, CycleOutputs, WalkingController};
pub use gains::{GainSurface, SharedGain};
