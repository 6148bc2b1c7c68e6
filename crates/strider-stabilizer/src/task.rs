//! Per-foot task records.
//!
//! A [`FootTask`] is the stabilizer-side record of one foot end-effector
//! task: the target pose, wrench and center of pressure it publishes for the
//! external whole-body solver, and the measured wrench and pose fed back
//! from the robot. Wrenches are expressed in the foot surface frame.

use nalgebra::{Vector2, Vector3};

use strider_core::{MotionVec, Pose, Surface, Wrench};

/// Stiffness/damping pair for a 6D end-effector task.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct TaskGains {
    pub stiffness: MotionVec,
    pub damping: MotionVec,
}

/// One foot end-effector task.
#[derive(Clone, Debug)]
pub struct FootTask {
    pub surface: Surface,
    /// Target pose published to the whole-body solver.
    pub target_pose: Pose,
    /// Measured surface pose from the kinematic observer.
    pub measured_pose: Pose,
    /// Measured contact wrench in the surface frame.
    pub measured_wrench: Wrench,
    /// Target contact wrench in the surface frame.
    pub target_wrench: Wrench,
    /// Target center of pressure in the surface frame.
    pub target_cop: Vector2<f64>,
    /// Admittance gains mapping wrench errors to velocity corrections.
    pub admittance: MotionVec,
    /// Task gains forwarded to the whole-body solver.
    pub gains: TaskGains,
    /// Task weight forwarded to the whole-body solver.
    pub weight: f64,
    /// Reference body velocity from foot force difference control.
    pub ref_vel_b: MotionVec,
}

impl FootTask {
    pub fn new(surface: Surface) -> Self {
        Self {
            surface,
            target_pose: Pose::identity(),
            measured_pose: Pose::identity(),
            measured_wrench: Wrench::zero(),
            target_wrench: Wrench::zero(),
            target_cop: Vector2::zeros(),
            admittance: MotionVec::zero(),
            gains: TaskGains::default(),
            weight: 0.0,
            ref_vel_b: MotionVec::zero(),
        }
    }

    /// Vertical pressure measured by the foot force sensor.
    pub fn measured_pressure(&self) -> f64 {
        self.measured_wrench.force.z
    }

    /// Target vertical force published to the whole-body solver.
    pub fn target_pressure(&self) -> f64 {
        self.target_wrench.force.z
    }

    pub fn set_zero_target_wrench(&mut self) {
        self.target_wrench = Wrench::zero();
        self.target_cop = Vector2::zeros();
    }

    /// Set the target force, keeping the current target couple.
    pub fn set_target_force(&mut self, force: Vector3<f64>) {
        self.target_wrench.force = force;
    }

    /// Reset task state around a new target pose.
    pub fn reset(&mut self, target_pose: Pose) {
        self.target_pose = target_pose;
        self.target_wrench = Wrench::zero();
        self.target_cop = Vector2::zeros();
        self.ref_vel_b = MotionVec::zero();
    }
}
