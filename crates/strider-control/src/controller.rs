//! Per-cycle walking control pipeline.
//!
//! [`WalkingController`] owns the footstep plan, the MPC, the pendulum and
//! the stabilizer, and wires them together once per control tick:
//!
//! ```text
//! plan cursor -> MPC preview (own, coarser cadence) -> pendulum integration
//!             -> stabilizer feedback -> CycleOutputs
//! ```
//!
//! Phase sequencing (standing / double support / single support) lives in an
//! external state machine that drives the plan cursor, the stabilizer
//! contact state and the remaining phase durations through the accessors
//! exposed here.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use nalgebra::{Vector2, Vector3};

use strider_core::clamp::clamp_warn;
use strider_core::{
    ContactState, FootstepPlan, LowPassVelocityFilter, MotionVec, Pendulum, Pose, StriderError,
    Wrench,
};
use strider_mpc::{ModelPredictiveControl, Preview, SAMPLING_PERIOD};
use strider_stabilizer::Stabilizer;

use crate::config::{RobotModelConfig, WalkingConfig};
use crate::gains::GainSurface;

/// Foot pressure below which the robot counts as airborne, in Newtons.
const CONTACT_THRESHOLD: f64 = 30.0;

/// Cutoff period of the CoM velocity estimation filter, in seconds.
const COM_VEL_FILTER_PERIOD: f64 = 0.01;

/// Measurements consumed at every control cycle.
#[derive(Clone, Debug)]
pub struct CycleInputs {
    /// Measured CoM position in the world frame.
    pub com: Vector3<f64>,
    /// Measured net contact wrench in the world frame.
    pub net_wrench: Wrench,
    /// Measured left foot wrench in the surface frame.
    pub left_foot_wrench: Wrench,
    /// Measured right foot wrench in the surface frame.
    pub right_foot_wrench: Wrench,
    /// Measured left foot surface pose.
    pub left_foot_pose: Pose,
    /// Measured right foot surface pose.
    pub right_foot_pose: Pose,
    /// Current contact state, driven by the external state machine.
    pub contact_state: ContactState,
    /// Target fraction of the weight on the left foot.
    pub left_foot_ratio: f64,
    /// Measured world vertical from the inertial sensor, when available.
    pub imu_vertical: Option<Vector3<f64>>,
}

/// References and monitoring signals published after every cycle.
#[derive(Clone, Debug)]
pub struct CycleOutputs {
    /// Desired CoM position (reference plus admittance offsets).
    pub com_position: Vector3<f64>,
    pub com_velocity: Vector3<f64>,
    pub com_acceleration: Vector3<f64>,
    /// Admittance offset component of the CoM reference.
    pub com_offset: Vector3<f64>,
    /// Per-foot targets in their surface frames.
    pub left_foot_cop: Vector2<f64>,
    pub left_foot_force: Vector3<f64>,
    pub right_foot_cop: Vector2<f64>,
    pub right_foot_force: Vector3<f64>,
    /// Per-foot reference body velocities from foot force control.
    pub left_foot_ref_vel: MotionVec,
    pub right_foot_ref_vel: MotionVec,
    /// Torso pitch reference, in radians.
    pub torso_pitch: f64,
    // Monitoring signals, for logging and telemetry only.
    pub dcm_error: Vector3<f64>,
    pub zmp_error: Vector3<f64>,
    pub mpc_failures: u32,
    pub mpc_solve_time_ms: f64,
    pub stabilizer_run_time_ms: f64,
}

/// Walking controller core, one [`WalkingController::run`] per control tick.
pub struct WalkingController {
    config: WalkingConfig,
    robot: RobotModelConfig,
    plan: FootstepPlan,
    mpc: ModelPredictiveControl,
    pendulum: Pendulum,
    stabilizer: Stabilizer,
    preview: Option<Preview>,
    com_vel_filter: LowPassVelocityFilter,
    gain_surface: Arc<GainSurface>,
    emergency_stop: Arc<AtomicBool>,

    phase_durations: (f64, f64, f64),
    last_left_pose: Pose,
    last_right_pose: Pose,
    left_foot_ratio: f64,
    left_foot_ratio_jumped: bool,
    was_airborne: bool,
    torso_pitch: f64,
    nb_mpc_failures: u32,
    preview_timer: f64,
    ctl_time: f64,
    dt: f64,
}

impl WalkingController {
    /// Build the controller from its configuration.
    ///
    /// Fatal on missing plans, unknown robot models or malformed geometry.
    pub fn new(
        config: WalkingConfig,
        robot_name: &str,
        mass: f64,
        dt: f64,
    ) -> Result<Self, StriderError> {
        config.validate()?;
        let robot = config.robot_model(robot_name)?;

        let initial_plan = config.initial_plan_name().to_owned();
        let plan_config = config
            .plans
            .get(&initial_plan)
            .ok_or_else(|| strider_core::ConfigError::UnknownPlan(initial_plan.clone()))?;
        let mut plan = plan_config.to_plan(&initial_plan, &robot)?;
        plan.complete(&robot.sole);
        plan.rewind();

        let mut stabilizer = Stabilizer::new(mass, dt);
        let mut stabilizer_config = config.stabilizer.clone();
        if let Some(admittance) = &robot.admittance {
            stabilizer_config.admittance = *admittance;
        }
        stabilizer.configure(&stabilizer_config);
        stabilizer.set_sole(&robot.sole);

        let mut mpc = ModelPredictiveControl::new(
            plan.support_contact().clone(),
            plan.target_contact().clone(),
            plan.next_contact().clone(),
        );
        mpc.configure(config.mpc);
        if let Some(overrides) = plan.mpc {
            mpc.apply_weight_overrides(&overrides);
        }

        let torso_pitch = plan.torso_pitch.unwrap_or(robot.torso_pitch);
        let phase_durations = (
            plan.single_support_duration,
            plan.double_support_duration,
            plan.single_support_duration,
        );
        let last_left_pose;
        let last_right_pose;
        {
            let (left, right) = Self::stance_pair(&plan);
            last_left_pose = left;
            last_right_pose = right;
        }

        let gain_surface = GainSurface::new(stabilizer.gains());
        let mut controller = Self {
            config,
            robot,
            plan,
            mpc,
            pendulum: Pendulum::default(),
            stabilizer,
            preview: None,
            com_vel_filter: LowPassVelocityFilter::new(dt, COM_VEL_FILTER_PERIOD),
            gain_surface,
            emergency_stop: Arc::new(AtomicBool::new(false)),
            phase_durations,
            last_left_pose,
            last_right_pose,
            left_foot_ratio: 0.5,
            left_foot_ratio_jumped: true,
            was_airborne: false,
            torso_pitch,
            nb_mpc_failures: 0,
            preview_timer: 0.0,
            ctl_time: 0.0,
            dt,
        };
        controller.reset();
        Ok(controller)
    }

    /// Poses of the plan's initial stance pair, left then right.
    fn stance_pair(plan: &FootstepPlan) -> (Pose, Pose) {
        let first = &plan.contacts()[0];
        let second = &plan.contacts()[1];
        match first.surface {
            strider_core::Surface::LeftFootCenter => (first.pose, second.pose),
            strider_core::Surface::RightFootCenter => (second.pose, first.pose),
        }
    }

    /// Reset the pendulum, stabilizer and counters around the current plan.
    pub fn reset(&mut self) {
        let contacts = self.plan.contacts();
        let com_height = clamp_warn(
            self.plan.com_height,
            self.robot.com.height_bounds[0],
            self.robot.com.height_bounds[1],
            "com_height",
        );
        let mid = 0.5 * (contacts[0].position() + contacts[1].position());
        let com = mid + Vector3::new(0.0, 0.0, com_height);
        self.pendulum.reset(com, com_height);
        self.com_vel_filter.reset(com);

        let first = contacts[0].clone();
        let second = contacts[1].clone();
        self.stabilizer.set_contact(first);
        self.stabilizer.set_contact(second);
        self.stabilizer.set_contact_state(ContactState::DoubleSupport);
        self.stabilizer.reset(&self.pendulum);

        self.preview = None;
        self.preview_timer = 0.0;
        self.nb_mpc_failures = 0;
        self.left_foot_ratio = 0.5;
        self.left_foot_ratio_jumped = true;
    }

    /// Load a named footstep plan, re-anchored to the robot's current feet,
    /// and reset the MPC weights for it.
    pub fn load_footstep_plan(&mut self, name: &str) -> Result<(), StriderError> {
        let init_height = self.plan.support_contact().z();
        let plan_config = self
            .config
            .plans
            .get(name)
            .ok_or_else(|| strider_core::ConfigError::UnknownPlan(name.into()))?;
        let mut plan = plan_config.to_plan(name, &self.robot)?;
        plan.complete(&self.robot.sole);
        plan.update_initial_transform(&self.last_left_pose, &self.last_right_pose, init_height);
        plan.rewind();

        self.mpc.configure(self.config.mpc);
        if let Some(overrides) = plan.mpc {
            self.mpc.apply_weight_overrides(&overrides);
        }
        self.torso_pitch = plan.torso_pitch.unwrap_or(self.robot.torso_pitch);
        self.phase_durations = (
            plan.single_support_duration,
            plan.double_support_duration,
            plan.single_support_duration,
        );

        let first = plan.contacts()[0].clone();
        let second = plan.contacts()[1].clone();
        self.stabilizer.set_contact(first);
        self.stabilizer.set_contact(second);

        self.plan = plan;
        log::info!("Loaded footstep plan \"{name}\"");
        Ok(())
    }

    /// Names of the available footstep plans.
    pub fn available_plans(&self) -> Vec<&str> {
        self.config.plans.keys().map(String::as_str).collect()
    }

    /// Override the phase durations previewed by the next MPC solves
    /// (remaining init single support, double support, target single
    /// support). Called by the external state machine as phases elapse.
    pub fn set_phase_durations(&mut self, init_ssp: f64, dsp: f64, target_ssp: f64) {
        self.phase_durations = (init_ssp, dsp, target_ssp);
    }

    /// Solve a new MPC preview from the current pendulum state.
    ///
    /// On failure the previous preview is kept and the failure counter
    /// increments.
    pub fn update_preview(&mut self) -> bool {
        self.mpc.set_init_state(&self.pendulum);
        let com_height = clamp_warn(
            self.plan.com_height,
            self.robot.com.height_bounds[0],
            self.robot.com.height_bounds[1],
            "com_height",
        );
        self.mpc.set_com_height(com_height);
        self.mpc.set_contacts(
            self.plan.support_contact().clone(),
            self.plan.target_contact().clone(),
            self.plan.next_contact().clone(),
        );
        let (init_ssp, dsp, target_ssp) = self.phase_durations;
        self.mpc.phase_durations(init_ssp, dsp, target_ssp);
        if self.mpc.solve() {
            self.preview = self.mpc.solution().cloned();
            true
        } else {
            self.nb_mpc_failures += 1;
            false
        }
    }

    /// Run one control cycle.
    ///
    /// Returns `None` without touching any state when the emergency stop is
    /// engaged.
    pub fn run(&mut self, inputs: &CycleInputs) -> Option<CycleOutputs> {
        if self.emergency_stop.load(Ordering::Relaxed) {
            return None;
        }
        self.ctl_time += self.dt;

        self.stabilizer.set_gains(self.gain_surface.sample());
        self.set_left_foot_ratio(inputs.left_foot_ratio);
        self.warn_if_robot_is_in_the_air(inputs);

        // CoM velocity estimation; skip the velocity update right after a
        // support switch so the anchor jump does not read as a spike.
        if self.left_foot_ratio_jumped {
            self.com_vel_filter.update_position_only(&inputs.com);
            self.left_foot_ratio_jumped = false;
        } else {
            self.com_vel_filter.update(&inputs.com);
        }
        let comd = self.com_vel_filter.vel();

        self.stabilizer.set_contact_state(inputs.contact_state);
        self.stabilizer.update_foot_measurements(
            inputs.left_foot_wrench,
            inputs.left_foot_pose,
            inputs.right_foot_wrench,
            inputs.right_foot_pose,
        );
        if let Some(vertical) = inputs.imu_vertical {
            self.stabilizer.set_measured_vertical(vertical);
        }
        self.stabilizer
            .update_state(inputs.com, comd, inputs.net_wrench, self.left_foot_ratio);
        self.last_left_pose = inputs.left_foot_pose;
        self.last_right_pose = inputs.right_foot_pose;

        // MPC previews run at their own, coarser cadence; the stabilizer
        // uses the latest available preview sample every tick.
        self.preview_timer += self.dt;
        if self.preview.is_none() || self.preview_timer >= SAMPLING_PERIOD {
            self.update_preview();
            self.preview_timer = 0.0;
        }
        if let Some(preview) = &mut self.preview {
            preview.integrate(&mut self.pendulum, self.dt);
        }

        self.stabilizer.run(&self.pendulum);
        Some(self.outputs())
    }

    fn set_left_foot_ratio(&mut self, ratio: f64) {
        let max_ratio_var = 1.5 * self.dt / self.plan.double_support_duration;
        if (ratio - self.left_foot_ratio).abs() > max_ratio_var {
            log::warn!(
                "Left foot ratio jumped from {} to {}",
                self.left_foot_ratio,
                ratio
            );
            self.left_foot_ratio_jumped = true;
        }
        self.left_foot_ratio = clamp_warn(ratio, 0.0, 1.0, "left_foot_ratio");
    }

    /// One-shot log transitions when both feet leave the ground.
    fn warn_if_robot_is_in_the_air(&mut self, inputs: &CycleInputs) {
        let left_pressure = inputs.left_foot_wrench.force.z;
        let right_pressure = inputs.right_foot_wrench.force.z;
        let airborne = left_pressure < CONTACT_THRESHOLD && right_pressure < CONTACT_THRESHOLD;
        if airborne && !self.was_airborne {
            log::warn!("Robot is in the air");
        } else if !airborne && self.was_airborne {
            log::info!("Robot is on the ground again");
        }
        self.was_airborne = airborne;
    }

    fn outputs(&self) -> CycleOutputs {
        let (com_position, com_velocity, com_acceleration) =
            self.stabilizer.com_reference(&self.pendulum);
        let left = self.stabilizer.left_foot_task();
        let right = self.stabilizer.right_foot_task();
        CycleOutputs {
            com_position,
            com_velocity,
            com_acceleration,
            com_offset: self.stabilizer.com_offset(),
            left_foot_cop: left.target_cop,
            left_foot_force: left.target_wrench.force,
            right_foot_cop: right.target_cop,
            right_foot_force: right.target_wrench.force,
            left_foot_ref_vel: left.ref_vel_b,
            right_foot_ref_vel: right.ref_vel_b,
            torso_pitch: self.torso_pitch,
            dcm_error: self.stabilizer.dcm_error(),
            zmp_error: self.stabilizer.zmpcc_error(),
            mpc_failures: self.nb_mpc_failures,
            mpc_solve_time_ms: self.mpc.build_and_solve_time_ms(),
            stabilizer_run_time_ms: self.stabilizer.run_time_ms(),
        }
    }

    // -- emergency stop --

    /// Cloneable handle for external watchdogs.
    pub fn emergency_stop_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.emergency_stop)
    }

    pub fn request_emergency_stop(&self) {
        self.emergency_stop.store(true, Ordering::Relaxed);
    }

    pub fn emergency_stopped(&self) -> bool {
        self.emergency_stop.load(Ordering::Relaxed)
    }

    // -- accessors --

    pub fn plan(&self) -> &FootstepPlan {
        &self.plan
    }

    /// Mutable plan cursor access for the external state machine.
    pub fn plan_mut(&mut self) -> &mut FootstepPlan {
        &mut self.plan
    }

    pub fn pendulum(&self) -> &Pendulum {
        &self.pendulum
    }

    pub fn stabilizer(&self) -> &Stabilizer {
        &self.stabilizer
    }

    /// Mutable stabilizer access for contact transitions (set_contact,
    /// set_swing_foot, touchdown detection).
    pub fn stabilizer_mut(&mut self) -> &mut Stabilizer {
        &mut self.stabilizer
    }

    pub fn mpc(&self) -> &ModelPredictiveControl {
        &self.mpc
    }

    pub fn preview(&self) -> Option<&Preview> {
        self.preview.as_ref()
    }

    /// Shared gain surface for UI-style tuning.
    pub fn gain_surface(&self) -> Arc<GainSurface> {
        Arc::clone(&self.gain_surface)
    }

    pub fn left_foot_ratio(&self) -> f64 {
        self.left_foot_ratio
    }

    pub fn nb_mpc_failures(&self) -> u32 {
        self.nb_mpc_failures
    }

    pub fn ctl_time(&self) -> f64 {
        self.ctl_time
    }

    pub fn torso_pitch(&self) -> f64 {
        self.torso_pitch
    }
}
