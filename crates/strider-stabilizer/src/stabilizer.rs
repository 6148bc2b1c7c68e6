//! Walking stabilizer.
//!
//! Closes the balance feedback loop once per control cycle: compares the
//! reference pendulum state against the measured CoM and contact wrenches,
//! computes a corrective net wrench from the active template model,
//! distributes it over the support feet under contact-stability constraints,
//! and derives the CoM and foot admittance corrections consumed by the
//! external whole-body solver.
//!
//! Based on "Stair climbing stabilization of the HRP-4 humanoid robot using
//! whole-body admittance control" (Caron et al., ICRA 2019) and "Biped
//! stabilization by linear feedback of the variable-height inverted pendulum
//! model" (Caron, ICRA 2020).

use std::time::Instant;

use nalgebra::{DMatrix, DVector, Matrix4x2, SMatrix, Vector2, Vector3, Vector4, Vector6};

use strider_core::lsq::UNBOUNDED;
use strider_core::{
    world, Contact, ContactState, Hrep, LeakyIntegrator, LeastSquares, MotionVec, Pendulum, Pose,
    Sole, Surface, Wrench,
};

use crate::gains::{
    FdqpWeights, StabilizerConfig, StabilizerGains, TemplateModelKind, MAX_ALTCC_COM_OFFSET,
    MAX_ZMPCC_COM_OFFSET, MIN_DS_PRESSURE, TOUCHDOWN_DISTANCE, TOUCHDOWN_PRESSURE,
};
use crate::model::{
    LipFeedback, TemplateModel, VhipFeedback, WrenchModel, WrenchModelInput,
};
use crate::task::{FootTask, TaskGains};

/// Contact seeking velocity, in m/s.
const MAX_TOUCHDOWN_VEL: f64 = 0.01;

/// Walking stabilizer. One [`Stabilizer::run`] call per control cycle.
pub struct Stabilizer {
    config: StabilizerConfig,
    gains: StabilizerGains,
    fdqp_weights: FdqpWeights,
    model: TemplateModel,
    contact_state: ContactState,

    left_foot_contact: Contact,
    right_foot_contact: Contact,
    left_foot_task: FootTask,
    right_foot_task: FootTask,

    contact_gains: TaskGains,
    contact_weight: f64,
    swing_foot_gains: TaskGains,
    swing_foot_weight: f64,

    measured_com: Vector3<f64>,
    measured_comd: Vector3<f64>,
    measured_wrench: Wrench,
    measured_zmp: Vector3<f64>,
    measured_vertical: Vector3<f64>,
    left_foot_ratio: f64,

    zmp_frame: Pose,
    zmp_area: Hrep,
    wrench_face_matrix: SMatrix<f64, 16, 6>,

    distrib_wrench: Wrench,
    distrib_lambda: f64,
    measured_lambda: f64,

    zmpcc_integrator: LeakyIntegrator,
    zmpcc_com_accel: Vector3<f64>,
    zmpcc_com_vel: Vector3<f64>,
    zmpcc_com_offset: Vector3<f64>,
    zmpcc_error: Vector3<f64>,

    altcc_integrator: LeakyIntegrator,
    altcc_com_accel: Vector3<f64>,
    altcc_com_vel: Vector3<f64>,
    altcc_com_offset: Vector3<f64>,

    com_offset: Vector3<f64>,
    com_vel_offset: Vector3<f64>,
    com_accel_offset: Vector3<f64>,

    vfc_z_ctrl: f64,
    vdc_z_pos: f64,
    measured_dfz: f64,
    measured_stz: f64,
    target_dfz: f64,
    target_stz: f64,

    in_the_air: bool,
    gains_clamp_warned: bool,
    lsq: LeastSquares,
    mass: f64,
    dt: f64,

    run_time_ms: f64,
    fdqp_time_ms: f64,
    desired_wrench_time_ms: f64,
}

impl Stabilizer {
    pub fn new(mass: f64, dt: f64) -> Self {
        let left_contact = Contact::new(Pose::identity(), Surface::LeftFootCenter);
        let right_contact = Contact::new(Pose::identity(), Surface::RightFootCenter);
        let mut stabilizer = Self {
            config: StabilizerConfig::default(),
            gains: StabilizerGains::default(),
            fdqp_weights: FdqpWeights::default(),
            model: TemplateModel::LinearInvertedPendulum(LipFeedback::new(dt, 5.0)),
            contact_state: ContactState::DoubleSupport,
            left_foot_contact: left_contact,
            right_foot_contact: right_contact,
            left_foot_task: FootTask::new(Surface::LeftFootCenter),
            right_foot_task: FootTask::new(Surface::RightFootCenter),
            contact_gains: TaskGains::default(),
            contact_weight: 1e5,
            swing_foot_gains: TaskGains::default(),
            swing_foot_weight: 500.0,
            measured_com: Vector3::new(0.0, 0.0, 0.8),
            measured_comd: Vector3::zeros(),
            measured_wrench: Wrench::zero(),
            measured_zmp: Vector3::zeros(),
            measured_vertical: Vector3::z(),
            left_foot_ratio: 0.5,
            zmp_frame: Pose::identity(),
            zmp_area: Hrep::from_box(0.1, 0.1),
            wrench_face_matrix: SMatrix::zeros(),
            distrib_wrench: Wrench::zero(),
            distrib_lambda: 0.0,
            measured_lambda: 0.0,
            zmpcc_integrator: LeakyIntegrator::default(),
            zmpcc_com_accel: Vector3::zeros(),
            zmpcc_com_vel: Vector3::zeros(),
            zmpcc_com_offset: Vector3::zeros(),
            zmpcc_error: Vector3::zeros(),
            altcc_integrator: LeakyIntegrator::default(),
            altcc_com_accel: Vector3::zeros(),
            altcc_com_vel: Vector3::zeros(),
            altcc_com_offset: Vector3::zeros(),
            com_offset: Vector3::zeros(),
            com_vel_offset: Vector3::zeros(),
            com_accel_offset: Vector3::zeros(),
            vfc_z_ctrl: 0.0,
            vdc_z_pos: 0.0,
            measured_dfz: 0.0,
            measured_stz: 0.0,
            target_dfz: 0.0,
            target_stz: 0.0,
            in_the_air: false,
            gains_clamp_warned: false,
            lsq: LeastSquares::default(),
            mass,
            dt,
            run_time_ms: 0.0,
            fdqp_time_ms: 0.0,
            desired_wrench_time_ms: 0.0,
        };
        stabilizer.set_sole(&Sole::default());
        stabilizer
    }

    /// Read configuration, selecting the template model and every gain.
    pub fn configure(&mut self, config: &StabilizerConfig) {
        self.fdqp_weights = config.fdqp_weights.into();
        self.gains.com_admittance = Vector3::from(config.admittance.com);
        self.gains.cop_admittance = Vector2::from(config.admittance.cop);
        self.gains.dfz_admittance = config.admittance.dfz;
        self.gains.dcm_gain = config.dcm_feedback.gain;
        self.gains.dcm_integral_gain = config.dcm_feedback.integral_gain;
        self.gains.vdc_damping = config.vdc.damping;
        self.gains.vdc_frequency = config.vdc.frequency;
        self.gains.vdc_stiffness = config.vdc.stiffness;

        self.set_template_model(config.template_model);
        self.model
            .lip_mut()
            .set_integrator_time_constant(config.dcm_feedback.integrator_time_constant);

        let contact = &config.tasks.contact;
        self.contact_gains = TaskGains {
            stiffness: MotionVec::uniform(contact.stiffness),
            damping: MotionVec::uniform(contact.damping),
        };
        self.contact_weight = contact.weight;
        let swing = &config.tasks.swing_foot;
        let swing_damping = if swing.damping > 0.0 {
            swing.damping
        } else {
            2.0 * swing.stiffness.sqrt()
        };
        self.swing_foot_gains = TaskGains {
            stiffness: MotionVec::uniform(swing.stiffness),
            damping: MotionVec::uniform(swing_damping),
        };
        self.swing_foot_weight = swing.weight;

        self.zmpcc_integrator
            .set_rate(config.zmpcc.integrator_leak_rate);
        self.altcc_integrator
            .set_rate(config.altcc.integrator_leak_rate);
        self.config = config.clone();
    }

    /// Switch the desired-wrench model at runtime.
    pub fn set_template_model(&mut self, kind: TemplateModelKind) {
        let time_constant = self.model.lip().integrator_time_constant();
        self.model = match kind {
            TemplateModelKind::Lip => {
                TemplateModel::LinearInvertedPendulum(LipFeedback::new(self.dt, time_constant))
            }
            TemplateModelKind::Vhip => TemplateModel::VariableHeightInvertedPendulum(
                VhipFeedback::new(self.dt, time_constant),
            ),
        };
    }

    pub fn template_model(&self) -> &TemplateModel {
        &self.model
    }

    /// Rebuild the contact wrench cone face matrix from the sole geometry.
    pub fn set_sole(&mut self, sole: &Sole) {
        let x = sole.half_length;
        let y = sole.half_width;
        let mu = sole.friction;
        #[rustfmt::skip]
        let face = SMatrix::<f64, 16, 6>::from_row_slice(&[
            // mx,  my,   mz,   fx,   fy,             fz,
             0.0,  0.0,  0.0, -1.0,  0.0,            -mu,
             0.0,  0.0,  0.0,  1.0,  0.0,            -mu,
             0.0,  0.0,  0.0,  0.0, -1.0,            -mu,
             0.0,  0.0,  0.0,  0.0,  1.0,            -mu,
            -1.0,  0.0,  0.0,  0.0,  0.0,             -y,
             1.0,  0.0,  0.0,  0.0,  0.0,             -y,
             0.0, -1.0,  0.0,  0.0,  0.0,             -x,
             0.0,  1.0,  0.0,  0.0,  0.0,             -x,
              mu,   mu, -1.0,   -y,   -x, -(x + y) * mu,
              mu,  -mu, -1.0,   -y,    x, -(x + y) * mu,
             -mu,   mu, -1.0,    y,   -x, -(x + y) * mu,
             -mu,  -mu, -1.0,    y,    x, -(x + y) * mu,
              mu,   mu,  1.0,    y,    x, -(x + y) * mu,
              mu,  -mu,  1.0,    y,   -x, -(x + y) * mu,
             -mu,   mu,  1.0,   -y,    x, -(x + y) * mu,
             -mu,  -mu,  1.0,   -y,   -x, -(x + y) * mu,
        ]);
        self.wrench_face_matrix = face;
    }

    /// Reset feedback state around the current contacts and pendulum.
    pub fn reset(&mut self, pendulum: &Pendulum) {
        let left_pose = self.left_foot_contact.pose;
        let right_pose = self.right_foot_contact.pose;
        self.left_foot_task.reset(left_pose);
        self.right_foot_task.reset(right_pose);
        let admittance = self.contact_admittance();
        for task in [&mut self.left_foot_task, &mut self.right_foot_task] {
            task.admittance = admittance;
            task.gains = self.contact_gains;
            task.weight = self.contact_weight;
            task.measured_pose = task.target_pose;
        }

        self.model.reset();
        self.zmpcc_integrator.set_zero();
        self.zmpcc_integrator.set_saturation(MAX_ZMPCC_COM_OFFSET);
        self.altcc_integrator.set_zero();
        self.altcc_integrator.set_saturation(MAX_ALTCC_COM_OFFSET);

        let static_force = -self.mass * world::gravity();
        self.distrib_wrench = Wrench::new(pendulum.com().cross(&static_force), static_force);

        self.zmpcc_com_accel.fill(0.0);
        self.zmpcc_com_vel.fill(0.0);
        self.zmpcc_com_offset.fill(0.0);
        self.zmpcc_error.fill(0.0);
        self.altcc_com_accel.fill(0.0);
        self.altcc_com_vel.fill(0.0);
        self.altcc_com_offset.fill(0.0);
        self.com_offset.fill(0.0);
        self.com_vel_offset.fill(0.0);
        self.com_accel_offset.fill(0.0);
        self.vfc_z_ctrl = 0.0;
        self.vdc_z_pos = 0.0;
        self.measured_dfz = 0.0;
        self.measured_stz = 0.0;
        self.target_dfz = 0.0;
        self.target_stz = 0.0;
        self.in_the_air = false;
        self.gains_clamp_warned = false;
    }

    /// Zero all feedback gains.
    pub fn disable(&mut self) {
        self.gains.disable();
    }

    // -- per-cycle inputs --

    pub fn set_contact_state(&mut self, state: ContactState) {
        self.contact_state = state;
    }

    pub fn contact_state(&self) -> ContactState {
        self.contact_state
    }

    /// Register a foot as a support contact and configure its task.
    pub fn set_contact(&mut self, contact: Contact) {
        let admittance = self.contact_admittance();
        let gains = self.contact_gains;
        let weight = self.contact_weight;
        let task = self.task_mut(contact.surface);
        task.reset(contact.pose);
        task.admittance = admittance;
        task.gains = gains;
        task.weight = weight;
        match contact.surface {
            Surface::LeftFootCenter => self.left_foot_contact = contact,
            Surface::RightFootCenter => self.right_foot_contact = contact,
        }
    }

    /// Configure a foot task for the swing phase.
    pub fn set_swing_foot(&mut self, surface: Surface) {
        let gains = self.swing_foot_gains;
        let weight = self.swing_foot_weight;
        let task = self.task_mut(surface);
        let pose = task.measured_pose;
        task.reset(pose);
        task.admittance = MotionVec::zero();
        task.gains = gains;
        task.weight = weight;
    }

    /// Feed the measured CoM state, net contact wrench (world frame) and
    /// target left-foot pressure ratio.
    pub fn update_state(
        &mut self,
        com: Vector3<f64>,
        comd: Vector3<f64>,
        wrench: Wrench,
        left_foot_ratio: f64,
    ) {
        self.measured_com = com;
        self.measured_comd = comd;
        self.measured_wrench = wrench;
        self.left_foot_ratio = left_foot_ratio;
    }

    /// Feed per-foot measurements: surface-frame wrenches and world poses.
    pub fn update_foot_measurements(
        &mut self,
        left_wrench: Wrench,
        left_pose: Pose,
        right_wrench: Wrench,
        right_pose: Pose,
    ) {
        self.left_foot_task.measured_wrench = left_wrench;
        self.left_foot_task.measured_pose = left_pose;
        self.right_foot_task.measured_wrench = right_wrench;
        self.right_foot_task.measured_pose = right_pose;
    }

    /// Feed the measured world vertical from the inertial sensor.
    pub fn set_measured_vertical(&mut self, vertical: Vector3<f64>) {
        self.measured_vertical = vertical;
    }

    /// Publish new gains (sampled once per cycle from the shared surface).
    pub fn set_gains(&mut self, gains: StabilizerGains) {
        self.gains = gains;
    }

    pub fn gains(&self) -> &StabilizerGains {
        &self.gains
    }

    // -- main loop --

    /// Run the feedback loop for one control cycle.
    pub fn run(&mut self, pendulum: &Pendulum) {
        let start = Instant::now();

        self.check_gains();
        self.check_in_the_air();
        self.update_support_foot_gains();
        self.update_zmp_frame(pendulum);

        let dw_start = Instant::now();
        let desired_wrench = self.compute_desired_wrench(pendulum);
        self.desired_wrench_time_ms = dw_start.elapsed().as_secs_f64() * 1000.0;

        self.distribute_wrench(&desired_wrench);
        self.update_com_admittance(pendulum);
        self.update_foot_force_difference_control();

        self.run_time_ms = start.elapsed().as_secs_f64() * 1000.0;
    }

    fn check_gains(&mut self) {
        let clamped = self.gains.clamp_all();
        if clamped && !self.gains_clamp_warned {
            log::warn!("Stabilizer gains out of range, clamped to safety bounds");
            self.gains_clamp_warned = true;
        } else if !clamped {
            self.gains_clamp_warned = false;
        }
    }

    fn check_in_the_air(&mut self) {
        let left_pressure = self.left_foot_task.measured_pressure();
        let right_pressure = self.right_foot_task.measured_pressure();
        self.in_the_air = left_pressure < MIN_DS_PRESSURE && right_pressure < MIN_DS_PRESSURE;
    }

    /// Admittance of a support foot task.
    fn contact_admittance(&self) -> MotionVec {
        MotionVec::new(
            Vector3::new(self.gains.cop_admittance.y, self.gains.cop_admittance.x, 0.0),
            Vector3::zeros(),
        )
    }

    fn task_mut(&mut self, surface: Surface) -> &mut FootTask {
        match surface {
            Surface::LeftFootCenter => &mut self.left_foot_task,
            Surface::RightFootCenter => &mut self.right_foot_task,
        }
    }

    fn task(&self, surface: Surface) -> &FootTask {
        match surface {
            Surface::LeftFootCenter => &self.left_foot_task,
            Surface::RightFootCenter => &self.right_foot_task,
        }
    }

    fn update_support_foot_gains(&mut self) {
        let admittance = self.contact_admittance();
        let contact_gains = self.contact_gains;
        // Single support stiffens the vertical axis for vertical drift
        // control.
        let vdc_gains = TaskGains {
            stiffness: MotionVec::new(
                contact_gains.stiffness.angular,
                Vector3::repeat(self.gains.vdc_stiffness),
            ),
            damping: contact_gains.damping,
        };
        match self.contact_state {
            ContactState::DoubleSupport => {
                for task in [&mut self.left_foot_task, &mut self.right_foot_task] {
                    task.admittance = admittance;
                    task.gains = contact_gains;
                }
            }
            ContactState::LeftFoot => {
                self.left_foot_task.admittance = admittance;
                self.left_foot_task.gains = vdc_gains;
            }
            ContactState::RightFoot => {
                self.right_foot_task.admittance = admittance;
                self.right_foot_task.gains = vdc_gains;
            }
        }
    }

    fn update_zmp_frame(&mut self, pendulum: &Pendulum) {
        let left = &self.left_foot_contact;
        let right = &self.right_foot_contact;
        match self.contact_state {
            ContactState::DoubleSupport => {
                self.zmp_frame = Pose::interpolate(&left.pose, &right.pose, 0.5);
                let xmin = left.xmin().min(right.xmin());
                let xmax = left.xmax().max(right.xmax());
                let ymin = left.ymin().min(right.ymin());
                let ymax = left.ymax().max(right.ymax());
                let t = self.zmp_frame.translation;
                self.zmp_area = Hrep {
                    mat: Matrix4x2::new(1.0, 0.0, -1.0, 0.0, 0.0, 1.0, 0.0, -1.0),
                    vec: Vector4::new(xmax - t.x, t.x - xmin, ymax - t.y, t.y - ymin),
                };
            }
            ContactState::LeftFoot => {
                self.zmp_frame = left.pose;
                self.zmp_area = left.local_hrep();
            }
            ContactState::RightFoot => {
                self.zmp_frame = right.pose;
                self.zmp_area = right.local_hrep();
            }
        }
        self.measured_zmp = self.compute_zmp(&self.measured_wrench, pendulum.omega());
    }

    /// ZMP of a world-frame wrench in the active ZMP frame.
    pub fn compute_zmp(&self, wrench: &Wrench, omega: f64) -> Vector3<f64> {
        let n: Vector3<f64> = self.zmp_frame.rotation.row(2).transpose();
        let p = self.zmp_frame.translation;
        let pressure = n.dot(&wrench.force);
        if pressure < 1.0 {
            // Fallback for monitoring only.
            return self.measured_com + world::gravity() / (omega * omega);
        }
        let moment_p = wrench.couple - p.cross(&wrench.force);
        p + n.cross(&moment_p) / pressure
    }

    fn compute_desired_wrench(&mut self, pendulum: &Pendulum) -> Wrench {
        let zmp_frame = self.zmp_frame;
        let zmp_area = self.zmp_area.clone();
        let input = WrenchModelInput {
            pendulum,
            measured_com: self.measured_com,
            measured_comd: self.measured_comd,
            zmp_frame: &zmp_frame,
            zmp_area: &zmp_area,
            in_the_air: self.in_the_air,
            mass: self.mass,
            dt: self.dt,
            dcm_gain: self.gains.dcm_gain,
            dcm_integral_gain: self.gains.dcm_integral_gain,
        };
        self.model.desired_wrench(&input)
    }

    fn distribute_wrench(&mut self, desired_wrench: &Wrench) {
        let start = Instant::now();
        match self.contact_state {
            ContactState::DoubleSupport => self.distribute_wrench_ds(desired_wrench),
            ContactState::LeftFoot => {
                self.distribute_wrench_ss(desired_wrench, Surface::LeftFootCenter);
                self.right_foot_task.set_zero_target_wrench();
            }
            ContactState::RightFoot => {
                self.distribute_wrench_ss(desired_wrench, Surface::RightFootCenter);
                self.left_foot_task.set_zero_target_wrench();
            }
        }
        self.fdqp_time_ms = start.elapsed().as_secs_f64() * 1000.0;
    }

    /// Double-support wrench distribution.
    ///
    /// Variables `x = [w_l_0, w_r_0]` (world-frame foot wrenches). Weighted
    /// minimization of net-wrench tracking, per-foot ankle torques
    /// (anisotropic weights favoring low torque over force error) and the
    /// pressure-balance error scaled by the target left/right ratio, subject
    /// to each foot wrench lying inside its contact wrench cone with a
    /// minimum vertical pressure.
    fn distribute_wrench_ds(&mut self, desired_wrench: &Wrench) {
        const NB_VAR: usize = 12;
        const COST_DIM: usize = 6 + NB_VAR + 1;
        const CONS_DIM: usize = 16 + 16 + 2;

        let x_0_lc = self.left_foot_contact.pose;
        let x_0_rc = self.right_foot_contact.pose;
        let lc_dual = x_0_lc.dual_matrix();
        let rc_dual = x_0_rc.dual_matrix();
        let lankle_dual = self.left_foot_contact.ankle_pose().dual_matrix();
        let rankle_dual = self.right_foot_contact.ankle_pose().dual_matrix();

        let mut cost = DMatrix::zeros(COST_DIM, NB_VAR);
        let mut target = DVector::zeros(COST_DIM);

        // |w_l_0 + w_r_0 - desiredWrench|^2
        let net_sqrt = self.fdqp_weights.net_wrench_sqrt;
        for i in 0..6 {
            cost[(i, i)] = net_sqrt;
            cost[(i, 6 + i)] = net_sqrt;
        }
        target
            .rows_mut(0, 6)
            .copy_from(&(net_sqrt * desired_wrench.vector()));

        // |ankle torques|^2 with anisotropic weights.
        let ankle_weights = Vector6::from_row_slice(&[1.0, 1.0, 1e-4, 1e-3, 1e-3, 1e-4]);
        let ankle_sqrt = self.fdqp_weights.ankle_torque_sqrt;
        for i in 0..6 {
            for j in 0..6 {
                cost[(6 + i, j)] = ankle_sqrt * ankle_weights[i] * lankle_dual[(i, j)];
                cost[(12 + i, 6 + j)] = ankle_sqrt * ankle_weights[i] * rankle_dual[(i, j)];
            }
        }

        // |(1 - lfr) * LFz - lfr * RFz|^2
        let lfr = self.left_foot_ratio;
        let pressure_sqrt = self.fdqp_weights.pressure_sqrt;
        for j in 0..6 {
            cost[(18, j)] = pressure_sqrt * (1.0 - lfr) * lc_dual[(5, j)];
            cost[(18, 6 + j)] = -pressure_sqrt * lfr * rc_dual[(5, j)];
        }

        let mut cons = DMatrix::zeros(CONS_DIM, NB_VAR);
        let mut bl = DVector::from_element(NB_VAR + CONS_DIM, -UNBOUNDED);
        let mut bu = DVector::from_element(NB_VAR + CONS_DIM, UNBOUNDED);

        // Contact wrench cones: CWC * w_foot <= 0.
        let lc_cone = self.wrench_face_matrix * lc_dual;
        let rc_cone = self.wrench_face_matrix * rc_dual;
        for i in 0..16 {
            for j in 0..6 {
                cons[(i, j)] = lc_cone[(i, j)];
                cons[(16 + i, 6 + j)] = rc_cone[(i, j)];
            }
            bu[NB_VAR + i] = 0.0;
            bu[NB_VAR + 16 + i] = 0.0;
        }
        // Minimum vertical pressure per foot.
        for j in 0..6 {
            cons[(32, j)] = lc_dual[(5, j)];
            cons[(33, 6 + j)] = rc_dual[(5, j)];
        }
        bl[NB_VAR + 32] = MIN_DS_PRESSURE;
        bl[NB_VAR + 33] = MIN_DS_PRESSURE;

        let x = match self.lsq.solve(&cost, &target, &cons, &bl, &bu) {
            Ok(x) => x,
            Err(err) => {
                // Keep the previous target wrenches for this cycle.
                log::error!("DS force distribution QP failed to run: {err}");
                return;
            }
        };

        let w_l_0 = Wrench::from_vector(&x.fixed_rows::<6>(0).into());
        let w_r_0 = Wrench::from_vector(&x.fixed_rows::<6>(6).into());
        self.distrib_wrench = w_l_0 + w_r_0;

        let w_l_lc = x_0_lc.dual_mul(&w_l_0);
        let w_r_rc = x_0_rc.dual_mul(&w_r_0);
        self.left_foot_task.target_cop = w_l_lc.cop();
        self.left_foot_task.target_wrench = w_l_lc;
        self.right_foot_task.target_cop = w_r_rc.cop();
        self.right_foot_task.target_wrench = w_r_rc;
    }

    /// Single-support wrench distribution: project the desired wrench onto
    /// the support foot's contact wrench cone.
    fn distribute_wrench_ss(&mut self, desired_wrench: &Wrench, surface: Surface) {
        const NB_VAR: usize = 6;
        const NB_CONS: usize = 16;

        let x_0_c = self.task(surface).target_pose;
        let dual = x_0_c.dual_matrix();

        let cost = DMatrix::identity(NB_VAR, NB_VAR);
        let target = DVector::from_iterator(6, desired_wrench.vector().iter().copied());

        let cone = self.wrench_face_matrix * dual;
        let mut cons = DMatrix::zeros(NB_CONS, NB_VAR);
        let bl = DVector::from_element(NB_VAR + NB_CONS, -UNBOUNDED);
        let mut bu = DVector::from_element(NB_VAR + NB_CONS, UNBOUNDED);
        for i in 0..NB_CONS {
            for j in 0..NB_VAR {
                cons[(i, j)] = cone[(i, j)];
            }
            bu[NB_VAR + i] = 0.0;
        }

        let x = match self.lsq.solve(&cost, &target, &cons, &bl, &bu) {
            Ok(x) => x,
            Err(err) => {
                log::error!("SS force distribution QP failed to run: {err}");
                return;
            }
        };

        let w_0 = Wrench::from_vector(&x.fixed_rows::<6>(0).into());
        let w_c = x_0_c.dual_mul(&w_0);
        let task = self.task_mut(surface);
        task.target_cop = w_c.cop();
        task.target_wrench = w_c;
        self.distrib_wrench = w_0;
    }

    fn update_com_admittance(&mut self, pendulum: &Pendulum) {
        self.update_com_zmpcc(pendulum);
        self.update_com_altitude(pendulum);
        self.com_offset = self.zmpcc_com_offset + self.altcc_com_offset;
        self.com_vel_offset = self.zmpcc_com_vel + self.altcc_com_vel;
        self.com_accel_offset = self.zmpcc_com_accel + self.altcc_com_accel;
    }

    /// CoM-ZMP compensation: leaky-integrated admittance on the gap between
    /// the distributed and measured ZMP.
    fn update_com_zmpcc(&mut self, pendulum: &Pendulum) {
        let distrib_zmp = self.compute_zmp(&self.distrib_wrench, pendulum.omega());
        self.zmpcc_error = distrib_zmp - self.measured_zmp;
        if self.config.zmpcc_only_ds && self.contact_state != ContactState::DoubleSupport {
            // Leak the stored offset to zero outside double support.
            self.zmpcc_integrator.add(&Vector3::zeros(), self.dt);
            self.zmpcc_com_accel.fill(0.0);
            self.zmpcc_com_vel.fill(0.0);
        } else {
            let r_0_c = self.zmp_frame.rotation;
            let r_c_0 = r_0_c.transpose();
            let admittance =
                Vector3::new(self.gains.com_admittance.x, self.gains.com_admittance.y, 0.0);
            let new_vel = -r_c_0 * admittance.component_mul(&(r_0_c * self.zmpcc_error));
            let new_accel = (new_vel - self.zmpcc_com_vel) / self.dt;
            self.zmpcc_integrator.add(&new_vel, self.dt);
            self.zmpcc_com_accel = new_accel;
            self.zmpcc_com_vel = new_vel;
        }
        self.zmpcc_com_offset = self.zmpcc_integrator.eval();
    }

    /// Altitude compensation: vertical velocity proportional to the gap
    /// between the distributed and measured pendulum stiffness, projected on
    /// the measured vertical. Only active under the variable-height model.
    fn update_com_altitude(&mut self, pendulum: &Pendulum) {
        let measured_height = self.measured_com.z - self.zmp_frame.translation.z;
        let pendulum_height = pendulum.com().z - self.zmp_frame.translation.z;
        self.distrib_lambda = self.distrib_wrench.force.z / (self.mass * pendulum_height);
        self.measured_lambda = self.measured_wrench.force.z / (self.mass * measured_height);
        if !self.model.is_variable_height() {
            self.altcc_integrator.add(&Vector3::zeros(), self.dt);
            self.altcc_com_accel.fill(0.0);
            self.altcc_com_vel.fill(0.0);
        } else {
            let zd = self.gains.com_admittance.z * (self.distrib_lambda - self.measured_lambda);
            let new_vel = zd * self.measured_vertical;
            let new_accel = (new_vel - self.altcc_com_vel) / self.dt;
            self.altcc_integrator.add(&new_vel, self.dt);
            self.altcc_com_accel = new_accel;
            self.altcc_com_vel = new_vel;
        }
        self.altcc_com_offset = self.altcc_integrator.eval();
    }

    /// Foot force difference control: drives the vertical force difference
    /// to its target and the sum of foot heights to the plan, splitting the
    /// correction symmetrically between the feet.
    fn update_foot_force_difference_control(&mut self) {
        let left_pressure = self.left_foot_task.measured_pressure();
        let right_pressure = self.right_foot_task.measured_pressure();
        if self.contact_state == ContactState::DoubleSupport && !self.in_the_air {
            let target_dfz = self.left_foot_task.target_pressure()
                - self.right_foot_task.target_pressure();
            let measured_dfz = left_pressure - right_pressure;
            let mut dz_ctrl = self.gains.dfz_admittance * (target_dfz - measured_dfz);

            let left_z = self.left_foot_task.measured_pose.translation.z;
            let right_z = self.right_foot_task.measured_pose.translation.z;
            self.vfc_z_ctrl = right_z - left_z;
            dz_ctrl -= self.gains.vdc_damping * self.vfc_z_ctrl;

            let left_z_target = self.left_foot_task.target_pose.translation.z;
            let right_z_target = self.right_foot_task.target_pose.translation.z;
            let dz_pos = self.gains.vdc_frequency
                * ((left_z_target + right_z_target) - (left_z + right_z));
            self.vdc_z_pos = right_z + left_z;

            let vel_force = MotionVec::new(Vector3::zeros(), Vector3::new(0.0, 0.0, dz_ctrl));
            let vel_total = MotionVec::new(Vector3::zeros(), Vector3::new(0.0, 0.0, dz_pos));
            self.left_foot_task.ref_vel_b = 0.5 * (vel_total - vel_force);
            self.right_foot_task.ref_vel_b = 0.5 * (vel_total + vel_force);

            self.measured_dfz = measured_dfz;
            self.measured_stz = left_z + right_z;
            self.target_dfz = target_dfz;
            self.target_stz = left_z_target + right_z_target;
        } else {
            self.left_foot_task.ref_vel_b = MotionVec::zero();
            self.right_foot_task.ref_vel_b = MotionVec::zero();
            self.measured_dfz = 0.0;
            self.measured_stz = 0.0;
            self.target_dfz = 0.0;
            self.target_stz = 0.0;
            self.vdc_z_pos = 0.0;
            self.vfc_z_ctrl = 0.0;
        }
    }

    // -- touchdown handling --

    /// Detect whether a swing foot has touched down on its target contact.
    pub fn detect_touchdown(&self, surface: Surface, contact: &Contact) -> bool {
        let task = self.task(surface);
        let x_c_s = task.measured_pose * contact.pose.inverse();
        let translation = x_c_s.translation;
        translation.x.abs() < TOUCHDOWN_DISTANCE
            && translation.y.abs() < TOUCHDOWN_DISTANCE
            && translation.z.abs() < TOUCHDOWN_DISTANCE
            && task.measured_pressure() > TOUCHDOWN_PRESSURE
    }

    /// Ramp up vertical pressure on a landing foot until touchdown.
    pub fn seek_touchdown(&mut self, surface: Surface) {
        let task = self.task_mut(surface);
        if task.measured_pressure() < TOUCHDOWN_PRESSURE {
            task.admittance.linear.z =
                strider_core::clamp::clamp(MAX_TOUCHDOWN_VEL / TOUCHDOWN_PRESSURE, 0.0, 1e-2);
            task.set_target_force(Vector3::new(0.0, 0.0, TOUCHDOWN_PRESSURE));
        }
    }

    // -- outputs and monitoring --

    /// Reference CoM position, velocity and acceleration with the admittance
    /// offsets applied.
    pub fn com_reference(
        &self,
        pendulum: &Pendulum,
    ) -> (Vector3<f64>, Vector3<f64>, Vector3<f64>) {
        (
            pendulum.com() + self.com_offset,
            pendulum.comd() + self.com_vel_offset,
            pendulum.comdd() + self.com_accel_offset,
        )
    }

    pub fn com_offset(&self) -> Vector3<f64> {
        self.com_offset
    }

    pub fn left_foot_task(&self) -> &FootTask {
        &self.left_foot_task
    }

    pub fn right_foot_task(&self) -> &FootTask {
        &self.right_foot_task
    }

    pub fn left_foot_contact(&self) -> &Contact {
        &self.left_foot_contact
    }

    pub fn right_foot_contact(&self) -> &Contact {
        &self.right_foot_contact
    }

    /// Net wrench distributed over the feet during the last cycle.
    pub fn distrib_wrench(&self) -> Wrench {
        self.distrib_wrench
    }

    /// ZMP of the distributed wrench (monitoring).
    pub fn zmp(&self, pendulum: &Pendulum) -> Vector3<f64> {
        self.compute_zmp(&self.distrib_wrench, pendulum.omega())
    }

    pub fn measured_zmp(&self) -> Vector3<f64> {
        self.measured_zmp
    }

    pub fn zmp_frame(&self) -> &Pose {
        &self.zmp_frame
    }

    pub fn zmp_area(&self) -> &Hrep {
        &self.zmp_area
    }

    pub fn dcm_error(&self) -> Vector3<f64> {
        self.model.lip().dcm_error()
    }

    pub fn dcm_average_error(&self) -> Vector3<f64> {
        self.model.lip().dcm_average_error()
    }

    pub fn zmpcc_error(&self) -> Vector3<f64> {
        self.zmpcc_error
    }

    pub fn distrib_lambda(&self) -> f64 {
        self.distrib_lambda
    }

    pub fn measured_lambda(&self) -> f64 {
        self.measured_lambda
    }

    pub fn in_the_air(&self) -> bool {
        self.in_the_air
    }

    pub fn foot_force_difference(&self) -> (f64, f64) {
        (self.measured_dfz, self.target_dfz)
    }

    /// Measured and target sums of foot heights (monitoring).
    pub fn foot_height_sum(&self) -> (f64, f64) {
        (self.measured_stz, self.target_stz)
    }

    /// Measured foot height difference fed to the VDC damping term.
    pub fn vfc_z_ctrl(&self) -> f64 {
        self.vfc_z_ctrl
    }

    /// Sum of measured foot heights tracked by vertical drift control.
    pub fn vdc_z_pos(&self) -> f64 {
        self.vdc_z_pos
    }

    pub fn run_time_ms(&self) -> f64 {
        self.run_time_ms
    }

    pub fn fdqp_time_ms(&self) -> f64 {
        self.fdqp_time_ms
    }

    pub fn desired_wrench_time_ms(&self) -> f64 {
        self.desired_wrench_time_ms
    }
}
