//! Linear model predictive control of the center of mass.
//!
//! One solve optimizes the horizontal CoM jerk over a fixed preview horizon:
//!
//! ```text
//! state x = [px, py, vx, vy, ax, ay]     input u = [jx, jy]
//!
//! minimize    w_jerk |u|^2
//!           + w_vel  |vel(x) - vel_ref|^2
//!           + w_zmp  |zmp(x) - zmp_ref|^2
//! subject to  x_{k+1} = A x_k + B u_k            (triple integrator)
//!             zmp(x_i) in support polygon i      (single-support samples)
//!             dcm(x_N) = zmp(x_N) = anchor       (terminal capture)
//! ```
//!
//! The support polygon active at each preview sample is selected by the
//! phase-duration schedule; see [`ModelPredictiveControl::phase_durations`].

use std::time::Instant;

use nalgebra::{DMatrix, DVector, SMatrix, Vector2};
use serde::{Deserialize, Serialize};

use strider_core::lsq::UNBOUNDED;
use strider_core::plan::MpcWeightsOverride;
use strider_core::{Contact, Hrep, LeastSquares, Pendulum, world};

use crate::preview::Preview;

/// MPC sampling period, in seconds. Preview updates run at this cadence,
/// independently from the finer control timestep.
pub const SAMPLING_PERIOD: f64 = 0.1;

/// Number of discretized preview steps.
pub const NB_STEPS: usize = 16;

/// CoM state dimension: horizontal position, velocity and acceleration.
pub const STATE_SIZE: usize = 6;

/// Input dimension: horizontal CoM jerk.
pub const INPUT_SIZE: usize = 2;

/// MPC cost weights.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct MpcWeights {
    /// Jerk (control effort) weight.
    pub jerk: f64,
    /// Velocity tracking weights per horizontal axis.
    pub vel: [f64; 2],
    /// ZMP tracking weight.
    pub zmp: f64,
}

impl Default for MpcWeights {
    fn default() -> Self {
        Self {
            jerk: 1.0,
            vel: [10.0, 10.0],
            zmp: 1000.0,
        }
    }
}

impl MpcWeights {
    /// Apply per-plan overrides on top of the configured weights.
    pub fn apply(&mut self, overrides: &MpcWeightsOverride) {
        if let Some(jerk) = overrides.jerk {
            self.jerk = jerk;
        }
        if let Some(vel) = overrides.vel {
            self.vel = vel;
        }
        if let Some(zmp) = overrides.zmp {
            self.zmp = zmp;
        }
    }
}

/// Model predictive control problem over the footstep preview window.
#[derive(Clone, Debug)]
pub struct ModelPredictiveControl {
    weights: MpcWeights,

    init_contact: Contact,
    target_contact: Contact,
    next_contact: Contact,

    init_state: DVector<f64>,
    com_height: f64,
    zeta: f64,
    dcm_from_state: SMatrix<f64, 2, STATE_SIZE>,
    zmp_from_state: SMatrix<f64, 2, STATE_SIZE>,

    nb_init_support_steps: usize,
    nb_double_support_steps: usize,
    nb_target_support_steps: usize,
    nb_next_double_support_steps: usize,
    index_to_hrep: [usize; NB_STEPS + 1],

    vel_ref: DVector<f64>,
    zmp_ref: DVector<f64>,

    lsq: LeastSquares,
    solution: Option<Preview>,
    build_and_solve_time_ms: f64,
}

impl ModelPredictiveControl {
    pub fn new(init_contact: Contact, target_contact: Contact, next_contact: Contact) -> Self {
        let mut mpc = Self {
            weights: MpcWeights::default(),
            init_contact,
            target_contact,
            next_contact,
            init_state: DVector::zeros(STATE_SIZE),
            com_height: 0.0,
            zeta: 0.0,
            dcm_from_state: SMatrix::zeros(),
            zmp_from_state: SMatrix::zeros(),
            nb_init_support_steps: 0,
            nb_double_support_steps: 0,
            nb_target_support_steps: 0,
            nb_next_double_support_steps: 0,
            index_to_hrep: [0; NB_STEPS + 1],
            vel_ref: DVector::zeros(INPUT_SIZE * (NB_STEPS + 1)),
            zmp_ref: DVector::zeros(INPUT_SIZE * (NB_STEPS + 1)),
            lsq: LeastSquares::default(),
            solution: None,
            build_and_solve_time_ms: 0.0,
        };
        mpc.set_com_height(0.8);
        mpc
    }

    /// Read cost weights from configuration.
    pub fn configure(&mut self, weights: MpcWeights) {
        self.weights = weights;
    }

    pub fn weights(&self) -> MpcWeights {
        self.weights
    }

    /// Apply per-plan weight overrides.
    pub fn apply_weight_overrides(&mut self, overrides: &MpcWeightsOverride) {
        self.weights.apply(overrides);
    }

    /// Reset the three contacts previewed over the horizon.
    pub fn set_contacts(&mut self, init: Contact, target: Contact, next: Contact) {
        self.init_contact = init;
        self.target_contact = target;
        self.next_contact = next;
    }

    /// Set the initial CoM state from the current pendulum state.
    pub fn set_init_state(&mut self, pendulum: &Pendulum) {
        let com = pendulum.com();
        let comd = pendulum.comd();
        let comdd = pendulum.comdd();
        self.init_state = DVector::from_vec(vec![com.x, com.y, comd.x, comd.y, comdd.x, comdd.y]);
    }

    /// Set the target CoM height, deriving the DCM and ZMP output maps.
    pub fn set_com_height(&mut self, height: f64) {
        self.com_height = height;
        self.zeta = height / world::GRAVITY;
        let omega_inv = self.zeta.sqrt();
        self.dcm_from_state = SMatrix::<f64, 2, STATE_SIZE>::from_row_slice(&[
            1.0, 0.0, omega_inv, 0.0, 0.0, 0.0, //
            0.0, 1.0, 0.0, omega_inv, 0.0, 0.0,
        ]);
        self.zmp_from_state = SMatrix::<f64, 2, STATE_SIZE>::from_row_slice(&[
            1.0, 0.0, 0.0, 0.0, -self.zeta, 0.0, //
            0.0, 1.0, 0.0, 0.0, 0.0, -self.zeta,
        ]);
    }

    pub fn com_height(&self) -> f64 {
        self.com_height
    }

    pub fn zeta(&self) -> f64 {
        self.zeta
    }

    /// Map the current phase durations onto the preview horizon.
    ///
    /// Durations don't have to sum up to the horizon length. If their sum is
    /// below it: with a target support phase, a second double-support segment
    /// is appended from the target contact to the next one (full preview);
    /// otherwise the first double-support segment extends to the end of the
    /// horizon (half preview). If their sum exceeds the horizon, phases are
    /// trimmed starting from the last one.
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub fn phase_durations(
        &mut self,
        init_support_duration: f64,
        double_support_duration: f64,
        target_support_duration: f64,
    ) {
        let round_steps = |duration: f64| (duration / SAMPLING_PERIOD).round().max(0.0) as usize;

        let mut so_far = 0;
        self.nb_init_support_steps = round_steps(init_support_duration).min(NB_STEPS - so_far);
        so_far += self.nb_init_support_steps;
        self.nb_double_support_steps = round_steps(double_support_duration).min(NB_STEPS - so_far);
        so_far += self.nb_double_support_steps;
        self.nb_target_support_steps = round_steps(target_support_duration).min(NB_STEPS - so_far);
        so_far += self.nb_target_support_steps;
        self.nb_next_double_support_steps = if self.nb_target_support_steps > 0 {
            NB_STEPS - so_far
        } else {
            0
        };

        let nb_init = self.nb_init_support_steps;
        let nb_dsp = self.nb_double_support_steps;
        let nb_target = self.nb_target_support_steps;
        for i in 0..=NB_STEPS {
            // The single-support polygon constraint also applies to the very
            // first sample of the following double-support phase.
            self.index_to_hrep[i] = if i < nb_init || (nb_init == 0 && i == 0) {
                0
            } else if i - nb_init < nb_dsp {
                1
            } else if nb_target > 0 {
                if i - nb_init - nb_dsp <= nb_target {
                    2
                } else if self.nb_next_double_support_steps > 0 {
                    3
                } else {
                    2
                }
            } else {
                1
            };
        }
    }

    pub fn nb_init_support_steps(&self) -> usize {
        self.nb_init_support_steps
    }

    pub fn nb_double_support_steps(&self) -> usize {
        self.nb_double_support_steps
    }

    pub fn nb_target_support_steps(&self) -> usize {
        self.nb_target_support_steps
    }

    pub fn nb_next_double_support_steps(&self) -> usize {
        self.nb_next_double_support_steps
    }

    /// Support-polygon index assigned to preview sample `i`.
    pub fn index_to_hrep(&self, i: usize) -> usize {
        self.index_to_hrep[i]
    }

    /// Compact phase schedule label for monitoring.
    pub fn phase_label(&self) -> String {
        format!(
            "ss{}-ds{}-ts{}-nds{}",
            self.nb_init_support_steps,
            self.nb_double_support_steps,
            self.nb_target_support_steps,
            self.nb_next_double_support_steps
        )
    }

    pub fn init_contact(&self) -> &Contact {
        &self.init_contact
    }

    pub fn target_contact(&self) -> &Contact {
        &self.target_contact
    }

    pub fn next_contact(&self) -> &Contact {
        &self.next_contact
    }

    pub fn vel_ref(&self) -> &DVector<f64> {
        &self.vel_ref
    }

    pub fn zmp_ref(&self) -> &DVector<f64> {
        &self.zmp_ref
    }

    /// Latest successful solution.
    pub fn solution(&self) -> Option<&Preview> {
        self.solution.as_ref()
    }

    /// Wall-clock time of the last build + solve, in milliseconds.
    pub fn build_and_solve_time_ms(&self) -> f64 {
        self.build_and_solve_time_ms
    }

    /// Reference ZMP trajectory: piecewise-constant on single-support
    /// phases, linearly interpolated across double-support phases. In half
    /// preview the endpoint is the midpoint between the two stance contacts.
    fn compute_zmp_ref(&mut self) {
        let p_0: Vector2<f64> = self.init_contact.position().fixed_rows::<2>(0).into();
        let mut p_1: Vector2<f64> = self.target_contact.position().fixed_rows::<2>(0).into();
        let p_2: Vector2<f64> = self.next_contact.position().fixed_rows::<2>(0).into();
        if self.nb_target_support_steps < 1 {
            // Half preview: settle between the two stance contacts.
            p_1 = 0.5 * (p_0 + p_1);
        }
        let nb_init = self.nb_init_support_steps;
        let nb_dsp = self.nb_double_support_steps;
        let nb_target = self.nb_target_support_steps;
        let nb_next_dsp = self.nb_next_double_support_steps;
        for i in 0..=NB_STEPS {
            let r = if i < nb_init {
                p_0
            } else if i - nb_init < nb_dsp {
                let x = (i - nb_init) as f64 / nb_dsp as f64;
                (1.0 - x) * p_0 + x * p_1
            } else if nb_target > 0 && i - nb_init - nb_dsp < nb_target {
                p_1
            } else if nb_next_dsp > 0 && nb_target > 0 {
                let j = i - nb_init - nb_dsp - nb_target;
                let x = j as f64 / nb_next_dsp as f64;
                (1.0 - x) * p_1 + x * p_2
            } else {
                p_1
            };
            self.zmp_ref.fixed_rows_mut::<2>(2 * i).copy_from(&r);
        }
    }

    /// Reference velocity trajectory: interpolates the contact reference
    /// velocities across the double-support phase.
    fn compute_vel_ref(&mut self) {
        let v_0: Vector2<f64> = self.init_contact.ref_vel.fixed_rows::<2>(0).into();
        let v_1: Vector2<f64> = self.target_contact.ref_vel.fixed_rows::<2>(0).into();
        let nb_init = self.nb_init_support_steps;
        let nb_dsp = self.nb_double_support_steps;
        for i in 0..=NB_STEPS {
            let r = if i < nb_init {
                v_0
            } else if i - nb_init < nb_dsp {
                let x = (i - nb_init) as f64 / nb_dsp as f64;
                (1.0 - x) * v_0 + x * v_1
            } else {
                v_1
            };
            self.vel_ref.fixed_rows_mut::<2>(2 * i).copy_from(&r);
        }
    }

    /// Terminal anchor: in full preview, the target contact the plan settles
    /// on at the end of the previewed step; in half preview, the reference
    /// tail (stance midpoint).
    fn terminal_anchor(&self) -> Vector2<f64> {
        if self.nb_target_support_steps > 0 {
            self.target_contact.position().fixed_rows::<2>(0).into()
        } else {
            self.zmp_ref.fixed_rows::<2>(2 * NB_STEPS).into()
        }
    }

    /// Solve the preview problem. Returns whether a solution was found; on
    /// failure the previous solution stays retrievable.
    pub fn solve(&mut self) -> bool {
        let start = Instant::now();

        self.compute_zmp_ref();
        self.compute_vel_ref();

        let hreps: [Option<Hrep>; 4] = [
            Some(self.init_contact.hrep()),
            None,
            Some(self.target_contact.hrep()),
            None,
        ];

        let n_var = STATE_SIZE * NB_STEPS + INPUT_SIZE * NB_STEPS;
        let u_offset = STATE_SIZE * NB_STEPS;
        let t = SAMPLING_PERIOD;

        // Per-step dynamics: x_{k+1} = A x_k + B u_k.
        let mut a_dyn = SMatrix::<f64, STATE_SIZE, STATE_SIZE>::identity();
        a_dyn[(0, 2)] = t;
        a_dyn[(1, 3)] = t;
        a_dyn[(0, 4)] = t * t / 2.0;
        a_dyn[(1, 5)] = t * t / 2.0;
        a_dyn[(2, 4)] = t;
        a_dyn[(3, 5)] = t;
        let mut b_dyn = SMatrix::<f64, STATE_SIZE, INPUT_SIZE>::zeros();
        b_dyn[(0, 0)] = t * t * t / 6.0;
        b_dyn[(1, 1)] = t * t * t / 6.0;
        b_dyn[(2, 0)] = t * t / 2.0;
        b_dyn[(3, 1)] = t * t / 2.0;
        b_dyn[(4, 0)] = t;
        b_dyn[(5, 1)] = t;

        // Count constraint rows: dynamics, terminal, ZMP polygons.
        let mut nb_polygon_rows = 0;
        for i in 1..=NB_STEPS {
            if self.index_to_hrep[i] % 2 == 0 {
                nb_polygon_rows += 4;
            }
        }
        let n_cons = STATE_SIZE * NB_STEPS + 4 + nb_polygon_rows;

        let mut cons = DMatrix::zeros(n_cons, n_var);
        let mut bl = DVector::from_element(n_var + n_cons, -UNBOUNDED);
        let mut bu = DVector::from_element(n_var + n_cons, UNBOUNDED);

        let state_col = |i: usize| STATE_SIZE * (i - 1);
        let mut row = 0;

        // Dynamics equalities.
        for k in 0..NB_STEPS {
            cons.view_mut((row, state_col(k + 1)), (STATE_SIZE, STATE_SIZE))
                .copy_from(&SMatrix::<f64, STATE_SIZE, STATE_SIZE>::identity());
            cons.view_mut((row, u_offset + INPUT_SIZE * k), (STATE_SIZE, INPUT_SIZE))
                .copy_from(&(-b_dyn));
            if k == 0 {
                let rhs = &a_dyn * &self.init_state;
                for j in 0..STATE_SIZE {
                    bl[n_var + row + j] = rhs[j];
                    bu[n_var + row + j] = rhs[j];
                }
            } else {
                cons.view_mut((row, state_col(k)), (STATE_SIZE, STATE_SIZE))
                    .copy_from(&(-a_dyn));
                for j in 0..STATE_SIZE {
                    bl[n_var + row + j] = 0.0;
                    bu[n_var + row + j] = 0.0;
                }
            }
            row += STATE_SIZE;
        }

        // Terminal DCM and ZMP constraints.
        let anchor = self.terminal_anchor();
        cons.view_mut((row, state_col(NB_STEPS)), (2, STATE_SIZE))
            .copy_from(&self.dcm_from_state);
        cons.view_mut((row + 2, state_col(NB_STEPS)), (2, STATE_SIZE))
            .copy_from(&self.zmp_from_state);
        for j in 0..2 {
            bl[n_var + row + j] = anchor[j];
            bu[n_var + row + j] = anchor[j];
            bl[n_var + row + 2 + j] = anchor[j];
            bu[n_var + row + 2 + j] = anchor[j];
        }
        row += 4;

        // Per-sample ZMP support polygon constraints on single-support
        // samples. Sample 0 is the fixed initial state and is skipped.
        for i in 1..=NB_STEPS {
            let hrep_index = self.index_to_hrep[i];
            if hrep_index % 2 != 0 {
                continue;
            }
            let hrep = hreps[hrep_index].as_ref().expect("single-support hrep");
            let block = hrep.mat * self.zmp_from_state;
            cons.view_mut((row, state_col(i)), (4, STATE_SIZE))
                .copy_from(&block);
            for j in 0..4 {
                bu[n_var + row + j] = hrep.vec[j];
            }
            row += 4;
        }
        debug_assert_eq!(row, n_cons);

        // Weighted least-squares cost rows.
        let n_cost = INPUT_SIZE * NB_STEPS + 2 * NB_STEPS + 2 * NB_STEPS;
        let mut cost = DMatrix::zeros(n_cost, n_var);
        let mut target = DVector::zeros(n_cost);
        let mut cost_row = 0;

        let jerk_sqrt = self.weights.jerk.sqrt();
        for k in 0..INPUT_SIZE * NB_STEPS {
            cost[(cost_row, u_offset + k)] = jerk_sqrt;
            cost_row += 1;
        }

        let vel_sqrt = [self.weights.vel[0].sqrt(), self.weights.vel[1].sqrt()];
        for i in 1..=NB_STEPS {
            for axis in 0..2 {
                cost[(cost_row, state_col(i) + 2 + axis)] = vel_sqrt[axis];
                target[cost_row] = vel_sqrt[axis] * self.vel_ref[2 * i + axis];
                cost_row += 1;
            }
        }

        let zmp_sqrt = self.weights.zmp.sqrt();
        for i in 1..=NB_STEPS {
            let block = zmp_sqrt * self.zmp_from_state;
            cost.view_mut((cost_row, state_col(i)), (2, STATE_SIZE))
                .copy_from(&block);
            target[cost_row] = zmp_sqrt * self.zmp_ref[2 * i];
            target[cost_row + 1] = zmp_sqrt * self.zmp_ref[2 * i + 1];
            cost_row += 2;
        }
        debug_assert_eq!(cost_row, n_cost);

        let result = self.lsq.solve(&cost, &target, &cons, &bl, &bu);
        self.build_and_solve_time_ms = start.elapsed().as_secs_f64() * 1000.0;

        match result {
            Ok(x) => {
                let mut state_traj = DVector::zeros(STATE_SIZE * (NB_STEPS + 1));
                state_traj
                    .rows_mut(0, STATE_SIZE)
                    .copy_from(&self.init_state);
                state_traj
                    .rows_mut(STATE_SIZE, STATE_SIZE * NB_STEPS)
                    .copy_from(&x.rows(0, STATE_SIZE * NB_STEPS));
                let input_traj = x.rows(u_offset, INPUT_SIZE * NB_STEPS).into_owned();
                self.solution = Some(Preview::new(state_traj, input_traj));
                true
            }
            Err(err) => {
                log::error!("MPC failed to solve ({}): {err}", self.phase_label());
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use nalgebra::Vector3;
    use strider_core::{Pose, Sole, Surface};

    fn contact_at(x: f64, y: f64, surface: Surface) -> Contact {
        let sole = Sole::default();
        let mut contact = Contact::new(Pose::from_translation(Vector3::new(x, y, 0.0)), surface);
        contact.half_length = sole.half_length;
        contact.half_width = sole.half_width;
        contact
    }

    fn mpc_with_stacked_contacts() -> ModelPredictiveControl {
        let c = contact_at(0.05, 0.02, Surface::LeftFootCenter);
        ModelPredictiveControl::new(c.clone(), c.clone(), c)
    }

    // ---- phase durations ----

    #[test]
    fn phase_durations_full_preview_appends_next_dsp() {
        let mut mpc = mpc_with_stacked_contacts();
        mpc.phase_durations(0.7, 0.1, 0.7);
        assert_eq!(mpc.nb_init_support_steps(), 7);
        assert_eq!(mpc.nb_double_support_steps(), 1);
        assert_eq!(mpc.nb_target_support_steps(), 7);
        assert_eq!(mpc.nb_next_double_support_steps(), 1);
        assert_eq!(mpc.phase_label(), "ss7-ds1-ts7-nds1");
    }

    #[test]
    fn phase_durations_half_preview_extends_first_dsp() {
        let mut mpc = mpc_with_stacked_contacts();
        mpc.phase_durations(0.3, 0.2, 0.0);
        assert_eq!(mpc.nb_init_support_steps(), 3);
        assert_eq!(mpc.nb_double_support_steps(), 2);
        assert_eq!(mpc.nb_target_support_steps(), 0);
        assert_eq!(mpc.nb_next_double_support_steps(), 0);
        // Samples beyond the scheduled DSP keep the double-support index.
        for i in 5..=NB_STEPS {
            assert_eq!(mpc.index_to_hrep(i), 1);
        }
    }

    #[test]
    fn phase_durations_trim_target_ssp_first() {
        let mut mpc = mpc_with_stacked_contacts();
        // 0.7 + 0.2 + 0.9 = 1.8 s > 1.6 s horizon.
        mpc.phase_durations(0.7, 0.2, 0.9);
        assert_eq!(mpc.nb_init_support_steps(), 7);
        assert_eq!(mpc.nb_double_support_steps(), 2);
        assert_eq!(mpc.nb_target_support_steps(), 7);
        assert_eq!(mpc.nb_next_double_support_steps(), 0);
    }

    #[test]
    fn phase_durations_trim_dsp_before_init_ssp() {
        let mut mpc = mpc_with_stacked_contacts();
        // Init SSP alone fits; the DSP must absorb the whole trim.
        mpc.phase_durations(1.5, 0.4, 0.0);
        assert_eq!(mpc.nb_init_support_steps(), 15);
        assert_eq!(mpc.nb_double_support_steps(), 1);
        assert_eq!(mpc.nb_target_support_steps(), 0);
    }

    #[test]
    fn phase_durations_never_trim_init_ssp_when_dsp_suffices() {
        let mut mpc = mpc_with_stacked_contacts();
        mpc.phase_durations(1.6, 0.5, 0.0);
        assert_eq!(mpc.nb_init_support_steps(), NB_STEPS);
        assert_eq!(mpc.nb_double_support_steps(), 0);
        assert_eq!(mpc.nb_target_support_steps(), 0);
    }

    #[test]
    fn hrep_indices_follow_phase_schedule() {
        let mut mpc = mpc_with_stacked_contacts();
        mpc.phase_durations(0.7, 0.1, 0.7);
        assert_eq!(mpc.index_to_hrep(0), 0);
        assert_eq!(mpc.index_to_hrep(6), 0);
        assert_eq!(mpc.index_to_hrep(7), 1);
        assert_eq!(mpc.index_to_hrep(8), 2);
        // Single-support constraint extends to the first sample of the
        // following double support.
        assert_eq!(mpc.index_to_hrep(15), 2);
        assert_eq!(mpc.index_to_hrep(16), 3);
    }

    #[test]
    fn zero_init_ssp_still_constrains_first_sample() {
        let mut mpc = mpc_with_stacked_contacts();
        mpc.phase_durations(0.0, 0.2, 0.7);
        assert_eq!(mpc.index_to_hrep(0), 0);
        assert_eq!(mpc.index_to_hrep(1), 1);
    }

    // ---- references ----

    #[test]
    fn zmp_ref_interpolates_across_dsp() {
        let init = contact_at(0.0, 0.09, Surface::LeftFootCenter);
        let target = contact_at(0.0, -0.09, Surface::RightFootCenter);
        let next = contact_at(0.2, 0.09, Surface::LeftFootCenter);
        let mut mpc = ModelPredictiveControl::new(init, target, next);
        mpc.phase_durations(0.4, 0.2, 0.7);
        mpc.set_init_state(&Pendulum::default());
        assert!(mpc.solve());
        let zmp_ref = mpc.zmp_ref();
        // Init SSP samples sit on the init contact.
        assert_relative_eq!(zmp_ref[2 * 2 + 1], 0.09, epsilon = 1e-12);
        // DSP midpoint: i = 5 is halfway through the two DSP samples.
        assert_relative_eq!(zmp_ref[2 * 5 + 1], 0.0, epsilon = 1e-12);
        // Target SSP samples sit on the target contact.
        assert_relative_eq!(zmp_ref[2 * 8 + 1], -0.09, epsilon = 1e-12);
    }

    #[test]
    fn vel_ref_interpolates_contact_velocities() {
        let mut init = contact_at(0.0, 0.09, Surface::LeftFootCenter);
        let mut target = contact_at(0.2, -0.09, Surface::RightFootCenter);
        init.ref_vel = Vector3::new(0.1, 0.0, 0.0);
        target.ref_vel = Vector3::new(0.3, 0.0, 0.0);
        let next = contact_at(0.4, 0.09, Surface::LeftFootCenter);
        let mut mpc = ModelPredictiveControl::new(init, target, next);
        mpc.phase_durations(0.4, 0.2, 0.7);
        mpc.set_init_state(&Pendulum::default());
        assert!(mpc.solve());
        let vel_ref = mpc.vel_ref();
        assert_relative_eq!(vel_ref[2 * 3], 0.1, epsilon = 1e-12);
        assert_relative_eq!(vel_ref[2 * 5], 0.2, epsilon = 1e-12);
        assert_relative_eq!(vel_ref[2 * 8], 0.3, epsilon = 1e-12);
    }

    // ---- solve ----

    #[test]
    fn stacked_contacts_and_zero_velocity_yield_zero_jerk() {
        let mut mpc = mpc_with_stacked_contacts();
        mpc.phase_durations(0.7, 0.1, 0.7);
        let mut pendulum = Pendulum::default();
        pendulum.reset(Vector3::new(0.05, 0.02, 0.8), 0.8);
        mpc.set_init_state(&pendulum);
        mpc.set_com_height(0.8);
        assert!(mpc.solve());
        let preview = mpc.solution().unwrap();
        assert!(
            preview.input_traj().amax() < 1e-4,
            "jerk should be zero, got max {}",
            preview.input_traj().amax()
        );
    }

    #[test]
    fn warmup_first_solve_settles_on_target_contact() {
        // Plan "warmup": four stepping-in-place contacts, DSP 0.1 s,
        // SSP 0.7 s; first solve previews contacts[0..2] from a
        // zero-velocity initial state.
        let contacts = [
            contact_at(0.0, 0.09, Surface::LeftFootCenter),
            contact_at(0.0, -0.09, Surface::RightFootCenter),
            contact_at(0.0, 0.09, Surface::LeftFootCenter),
            contact_at(0.0, -0.09, Surface::RightFootCenter),
        ];
        let mut mpc = ModelPredictiveControl::new(
            contacts[0].clone(),
            contacts[1].clone(),
            contacts[2].clone(),
        );
        mpc.configure(MpcWeights::default());
        mpc.phase_durations(0.7, 0.1, 0.7);
        let mut pendulum = Pendulum::default();
        pendulum.reset(Vector3::new(0.0, 0.0, 0.8), 0.8);
        mpc.set_init_state(&pendulum);
        mpc.set_com_height(0.8);
        assert!(mpc.solve());

        let preview = mpc.solution().unwrap();
        let final_state = preview.state(NB_STEPS);
        assert_relative_eq!(final_state[0], 0.0, epsilon = 1e-3);
        assert_relative_eq!(final_state[1], -0.09, epsilon = 1e-3);
    }

    #[test]
    fn solution_satisfies_single_support_zmp_constraints() {
        let init = contact_at(0.0, 0.09, Surface::LeftFootCenter);
        let target = contact_at(0.15, -0.09, Surface::RightFootCenter);
        let next = contact_at(0.3, 0.09, Surface::LeftFootCenter);
        let mut mpc = ModelPredictiveControl::new(init.clone(), target.clone(), next);
        mpc.phase_durations(0.7, 0.1, 0.7);
        let mut pendulum = Pendulum::default();
        pendulum.reset(Vector3::new(0.0, 0.05, 0.8), 0.8);
        mpc.set_init_state(&pendulum);
        assert!(mpc.solve());

        let preview = mpc.solution().unwrap();
        let zeta = mpc.zeta();
        for i in 1..=NB_STEPS {
            let hrep_index = mpc.index_to_hrep(i);
            if hrep_index % 2 != 0 {
                continue;
            }
            let state = preview.state(i);
            let zmp = Vector2::new(state[0] - zeta * state[4], state[1] - zeta * state[5]);
            let hrep = if hrep_index == 0 {
                init.hrep()
            } else {
                target.hrep()
            };
            assert!(
                hrep.contains(&zmp, 1e-5),
                "sample {i} ZMP {zmp:?} outside polygon {hrep_index}"
            );
        }
    }

    #[test]
    fn failed_solve_keeps_previous_solution() {
        let mut mpc = mpc_with_stacked_contacts();
        mpc.phase_durations(0.7, 0.1, 0.7);
        let mut pendulum = Pendulum::default();
        pendulum.reset(Vector3::new(0.05, 0.02, 0.8), 0.8);
        mpc.set_init_state(&pendulum);
        assert!(mpc.solve());
        assert!(mpc.solution().is_some());

        // A degenerate contact patch has an empty support polygon, so no
        // preview can satisfy the ZMP constraints.
        let mut degenerate = contact_at(0.05, 0.02, Surface::LeftFootCenter);
        degenerate.half_length = -0.01;
        degenerate.half_width = -0.01;
        mpc.set_contacts(degenerate.clone(), degenerate.clone(), degenerate);
        assert!(!mpc.solve());
        assert!(mpc.solution().is_some(), "previous preview must survive");
    }

    #[test]
    fn solve_time_is_reported() {
        let mut mpc = mpc_with_stacked_contacts();
        mpc.phase_durations(0.7, 0.1, 0.7);
        mpc.set_init_state(&Pendulum::default());
        assert!(mpc.solve());
        assert!(mpc.build_and_solve_time_ms() > 0.0);
    }
}
