//! Desired-wrench models.
//!
//! Both models share one capability: given the reference pendulum state and
//! the measured CoM state, produce the net contact wrench that drives the
//! robot back onto the reference. They are interchangeable at runtime:
//!
//! - [`LipFeedback`] applies proportional-integral DCM feedback on the
//!   linear inverted pendulum.
//! - [`VhipFeedback`] solves a small linearized QP on the variable-height
//!   inverted pendulum, allowing corrections of the natural frequency; on
//!   solver failure it falls back to the linear model.

use nalgebra::{DMatrix, DVector, Matrix3x2, Vector2, Vector3};

use strider_core::lsq::UNBOUNDED;
use strider_core::{
    world, ExponentialMovingAverage, Hrep, LeastSquares, Pendulum, Pose, SolverError, Wrench,
};

use crate::gains::MAX_AVERAGE_DCM_ERROR;

/// Upper bound on the corrected DCM height, in meters.
const MAX_DCM_HEIGHT: f64 = 0.9;
/// Lower bound on the corrected DCM height, in meters.
const MIN_DCM_HEIGHT: f64 = 0.5;
/// Maximum total vertical force used to bound lambda, in Newtons.
const MAX_FORCE: f64 = 500.0;
/// Minimum total vertical force used to bound lambda, in Newtons.
const MIN_FORCE: f64 = 1.0;
// TODO: expose these four bounds in the [stabilizer] configuration tree.

/// Damping of the DCM height constraint in the VHIP QP.
const DCM_HEIGHT_DAMPING: f64 = 0.5;

/// Per-cycle inputs shared by the desired-wrench models.
pub struct WrenchModelInput<'a> {
    /// Reference CoM state from the MPC preview.
    pub pendulum: &'a Pendulum,
    pub measured_com: Vector3<f64>,
    pub measured_comd: Vector3<f64>,
    /// Active ZMP frame.
    pub zmp_frame: &'a Pose,
    /// ZMP support area in the ZMP frame.
    pub zmp_area: &'a Hrep,
    /// Both feet below the pressure threshold; freezes error integration.
    pub in_the_air: bool,
    pub mass: f64,
    pub dt: f64,
    pub dcm_gain: f64,
    pub dcm_integral_gain: f64,
}

/// Capability shared by the desired-wrench models.
pub trait WrenchModel {
    /// Compute the desired net contact wrench in the world frame.
    fn desired_wrench(&mut self, input: &WrenchModelInput) -> Wrench;

    /// Reset accumulated error state.
    fn reset(&mut self);
}

// ---------------------------------------------------------------------------
// Linear inverted pendulum
// ---------------------------------------------------------------------------

/// Proportional-integral DCM feedback on the linear inverted pendulum.
#[derive(Clone, Debug)]
pub struct LipFeedback {
    dcm_integrator: ExponentialMovingAverage,
    dcm_error: Vector3<f64>,
    dcm_average_error: Vector3<f64>,
}

impl LipFeedback {
    pub fn new(dt: f64, integrator_time_constant: f64) -> Self {
        let mut dcm_integrator = ExponentialMovingAverage::new(dt, integrator_time_constant);
        dcm_integrator.set_saturation(MAX_AVERAGE_DCM_ERROR);
        Self {
            dcm_integrator,
            dcm_error: Vector3::zeros(),
            dcm_average_error: Vector3::zeros(),
        }
    }

    pub fn set_integrator_time_constant(&mut self, time_constant: f64) {
        self.dcm_integrator.set_time_constant(time_constant);
    }

    pub fn integrator_time_constant(&self) -> f64 {
        self.dcm_integrator.time_constant()
    }

    /// Horizontal DCM tracking error from the last cycle.
    pub fn dcm_error(&self) -> Vector3<f64> {
        self.dcm_error
    }

    /// Leaky average of the DCM tracking error.
    pub fn dcm_average_error(&self) -> Vector3<f64> {
        self.dcm_average_error
    }
}

impl WrenchModel for LipFeedback {
    fn desired_wrench(&mut self, input: &WrenchModelInput) -> Wrench {
        let pendulum = input.pendulum;
        let omega = pendulum.omega();
        let omega2 = omega * omega;
        let com_error = pendulum.com() - input.measured_com;
        let comd_error = pendulum.comd() - input.measured_comd;
        self.dcm_error = com_error + comd_error / omega;
        self.dcm_error.z = 0.0;

        if !input.in_the_air {
            // Don't accumulate error while the robot is airborne.
            self.dcm_integrator.append(&self.dcm_error);
            self.dcm_average_error = self.dcm_integrator.eval();
        }

        let mut desired_com_accel = pendulum.comdd();
        desired_com_accel += input.dcm_gain * omega2 * self.dcm_error + omega * comd_error;
        desired_com_accel += input.dcm_integral_gain * omega2 * self.dcm_average_error;
        let desired_force = input.mass * (desired_com_accel - world::gravity());
        Wrench::new(pendulum.com().cross(&desired_force), desired_force)
    }

    fn reset(&mut self) {
        self.dcm_integrator.set_zero();
        self.dcm_error.fill(0.0);
        self.dcm_average_error.fill(0.0);
    }
}

// ---------------------------------------------------------------------------
// Variable-height inverted pendulum
// ---------------------------------------------------------------------------

/// Decision variables of the VHIP feedback QP:
/// `[dxi(3), domega, dzmp(2), dlambda, dsigma(3)]`.
const NB_VARIABLES: usize = 3 + 1 + 2 + 1 + 3;

/// DCM feedback on the variable-height inverted pendulum.
///
/// Each cycle solves a linearized least-squares problem for corrections of
/// the DCM, natural frequency, ZMP and stiffness `lambda = omega^2`, subject
/// to consistency with the measured state, the support area, and bounds
/// keeping the dynamics physical. The slack `dsigma` absorbs the virtual
/// repellent point tracking error.
#[derive(Clone, Debug)]
pub struct VhipFeedback {
    lip: LipFeedback,
    lsq: LeastSquares,
    lambda_min: f64,
    lambda_max: f64,
    vhip_omega: f64,
    vhip_lambda: f64,
    vhip_dcm: Vector3<f64>,
    vhip_zmp: Vector3<f64>,
}

impl VhipFeedback {
    pub fn new(dt: f64, integrator_time_constant: f64) -> Self {
        Self {
            lip: LipFeedback::new(dt, integrator_time_constant),
            lsq: LeastSquares::default(),
            lambda_min: 0.0,
            lambda_max: 0.0,
            vhip_omega: 0.0,
            vhip_lambda: 0.0,
            vhip_dcm: Vector3::zeros(),
            vhip_zmp: Vector3::zeros(),
        }
    }

    pub fn lip(&self) -> &LipFeedback {
        &self.lip
    }

    pub fn lip_mut(&mut self) -> &mut LipFeedback {
        &mut self.lip
    }

    /// Corrected natural frequency from the last solve.
    pub fn omega(&self) -> f64 {
        self.vhip_omega
    }

    /// Corrected stiffness from the last solve.
    pub fn lambda(&self) -> f64 {
        self.vhip_lambda
    }

    pub fn lambda_bounds(&self) -> (f64, f64) {
        (self.lambda_min, self.lambda_max)
    }

    pub fn dcm(&self) -> Vector3<f64> {
        self.vhip_dcm
    }

    pub fn zmp(&self) -> Vector3<f64> {
        self.vhip_zmp
    }

    fn solve_qp(&mut self, input: &WrenchModelInput) -> Result<Wrench, SolverError> {
        let pendulum = input.pendulum;
        let vrp_gain = input.dcm_gain + 1.0;
        let ref_omega = pendulum.omega();
        let ref_lambda = ref_omega * ref_omega;
        let com_error = input.measured_com - pendulum.com();
        let comd_error = input.measured_comd - pendulum.comd();
        let ref_com = pendulum.com();
        let ref_dcm = pendulum.com() + pendulum.comd() / ref_omega;
        let ref_zmp = pendulum.zmp();
        let ref_vrp = ref_zmp - world::gravity() / ref_lambda;

        let measured_height = input.measured_com.z - input.zmp_frame.translation.z;
        self.lambda_max = MAX_FORCE / (input.mass * measured_height);
        self.lambda_min = MIN_FORCE / (input.mass * measured_height);
        let omega_max = self.lambda_max.sqrt();
        let omega_min = self.lambda_min.sqrt();

        // Cost: minimize the VRP tracking slack.
        let mut cost = DMatrix::zeros(3, NB_VARIABLES);
        cost[(0, 7)] = 1.0;
        cost[(1, 8)] = 1.0;
        cost[(2, 9)] = (1e-3_f64).sqrt();
        let target = DVector::zeros(3);

        let nb_constraints = 3 + 3 + 1 + 4 + 1;
        let mut cons = DMatrix::zeros(nb_constraints, NB_VARIABLES);
        let mut bl = DVector::from_element(NB_VARIABLES + nb_constraints, -UNBOUNDED);
        let mut bu = DVector::from_element(NB_VARIABLES + nb_constraints, UNBOUNDED);

        // Variable bounds.
        for i in [0, 1, 2, 4, 5, 7, 8, 9] {
            bl[i] = -1.0;
            bu[i] = 1.0;
        }
        bl[3] = omega_min - ref_omega;
        bu[3] = omega_max - ref_omega;
        bl[6] = self.lambda_min - ref_lambda;
        bu[6] = self.lambda_max - ref_lambda;

        // Rotation mapping in-plane ZMP corrections to the world frame.
        let r_world_frame = input.zmp_frame.rotation.transpose();
        let r_delta_zmp: Matrix3x2<f64> = r_world_frame.fixed_view::<3, 2>(0, 0).into();

        let bound_offset = NB_VARIABLES;
        let mut row = 0;

        // Linearized VRP tracking: the slack matches the residual.
        for i in 0..3 {
            cons[(row + i, i)] = -vrp_gain;
            cons[(row + i, 7 + i)] = 1.0;
        }
        let dcm_vrp = (ref_dcm - ref_vrp) / ref_omega;
        let zmp_dcm = (ref_zmp - ref_dcm) / ref_lambda;
        cons.view_mut((row, 4), (3, 2)).copy_from(&r_delta_zmp);
        for i in 0..3 {
            cons[(row + i, 3)] = dcm_vrp[i];
            cons[(row + i, 6)] = zmp_dcm[i];
            bl[bound_offset + row + i] = 0.0;
            bu[bound_offset + row + i] = 0.0;
        }
        row += 3;

        // DCM consistency with the measured state at constant omega.
        let constant_omega_dcm = com_error + comd_error / ref_omega;
        for i in 0..3 {
            cons[(row + i, i)] = 1.0;
            cons[(row + i, 3)] = input.measured_comd[i] / (ref_omega * ref_omega);
            bl[bound_offset + row + i] = constant_omega_dcm[i];
            bu[bound_offset + row + i] = constant_omega_dcm[i];
        }
        row += 3;

        // Coupling between the omega and lambda corrections.
        cons[(row, 3)] = ref_omega * (1.0 + vrp_gain);
        cons[(row, 6)] = -1.0;
        bl[bound_offset + row] = 0.0;
        bu[bound_offset + row] = 0.0;
        row += 1;

        // Corrected ZMP stays in the support area.
        let ref_frame_zmp = input.zmp_frame.transform_point(&ref_zmp);
        if ref_frame_zmp.z.abs() > 1e-3 {
            log::warn!("Reference ZMP does not belong to the ZMP frame");
        }
        cons.view_mut((row, 4), (4, 2)).copy_from(&input.zmp_area.mat);
        let zmp_margin =
            input.zmp_area.vec - input.zmp_area.mat * ref_frame_zmp.fixed_rows::<2>(0);
        for i in 0..4 {
            bu[bound_offset + row + i] = zmp_margin[i];
        }
        row += 4;

        // Damped bound on the corrected DCM height.
        let alpha = (1.0 + DCM_HEIGHT_DAMPING) * ref_lambda * input.dt / ref_omega;
        cons[(row, 2)] = 1.0 + alpha * (1.0 - vrp_gain);
        cons[(row, 9)] = alpha;
        bl[bound_offset + row] = MIN_DCM_HEIGHT - ref_dcm.z;
        bu[bound_offset + row] = MAX_DCM_HEIGHT - ref_dcm.z;
        row += 1;
        debug_assert_eq!(row, nb_constraints);

        let x = self.lsq.solve(&cost, &target, &cons, &bl, &bu)?;

        let delta_omega = x[3];
        let delta_lambda = x[6];
        let delta_zmp: Vector2<f64> = x.fixed_rows::<2>(4).into();

        self.vhip_omega = ref_omega + delta_omega;
        self.vhip_lambda = ref_lambda + delta_lambda;
        self.vhip_dcm = input.measured_com + input.measured_comd / self.vhip_omega;
        self.vhip_zmp = ref_zmp + r_delta_zmp * delta_zmp;
        let desired_force = input.mass * self.vhip_lambda * (ref_com - self.vhip_zmp);
        Ok(Wrench::new(
            self.vhip_zmp.cross(&desired_force),
            desired_force,
        ))
    }
}

impl WrenchModel for VhipFeedback {
    fn desired_wrench(&mut self, input: &WrenchModelInput) -> Wrench {
        match self.solve_qp(input) {
            Ok(wrench) => wrench,
            Err(err) => {
                // Mandatory fallback: never drop the control output.
                log::error!("VHIP feedback QP failed to run ({err}), falling back to LIP");
                self.lip.desired_wrench(input)
            }
        }
    }

    fn reset(&mut self) {
        self.lip.reset();
    }
}

// ---------------------------------------------------------------------------
// Runtime selection
// ---------------------------------------------------------------------------

/// Desired-wrench model, selectable at configuration time and swappable at
/// runtime.
#[derive(Clone, Debug)]
pub enum TemplateModel {
    LinearInvertedPendulum(LipFeedback),
    VariableHeightInvertedPendulum(VhipFeedback),
}

impl TemplateModel {
    pub fn is_variable_height(&self) -> bool {
        matches!(self, TemplateModel::VariableHeightInvertedPendulum(_))
    }

    pub fn label(&self) -> &'static str {
        match self {
            TemplateModel::LinearInvertedPendulum(_) => "Linear inverted pendulum",
            TemplateModel::VariableHeightInvertedPendulum(_) => {
                "Variable height inverted pendulum"
            }
        }
    }

    /// The LIP feedback state backing either model.
    pub fn lip(&self) -> &LipFeedback {
        match self {
            TemplateModel::LinearInvertedPendulum(lip) => lip,
            TemplateModel::VariableHeightInvertedPendulum(vhip) => vhip.lip(),
        }
    }

    pub fn lip_mut(&mut self) -> &mut LipFeedback {
        match self {
            TemplateModel::LinearInvertedPendulum(lip) => lip,
            TemplateModel::VariableHeightInvertedPendulum(vhip) => vhip.lip_mut(),
        }
    }

    pub fn as_vhip(&self) -> Option<&VhipFeedback> {
        match self {
            TemplateModel::VariableHeightInvertedPendulum(vhip) => Some(vhip),
            TemplateModel::LinearInvertedPendulum(_) => None,
        }
    }
}

impl WrenchModel for TemplateModel {
    fn desired_wrench(&mut self, input: &WrenchModelInput) -> Wrench {
        match self {
            TemplateModel::LinearInvertedPendulum(lip) => lip.desired_wrench(input),
            TemplateModel::VariableHeightInvertedPendulum(vhip) => vhip.desired_wrench(input),
        }
    }

    fn reset(&mut self) {
        match self {
            TemplateModel::LinearInvertedPendulum(lip) => lip.reset(),
            TemplateModel::VariableHeightInvertedPendulum(vhip) => vhip.reset(),
        }
    }
}
