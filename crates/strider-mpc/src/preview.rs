//! MPC solution playback.
//!
//! A [`Preview`] holds the stacked CoM state and jerk trajectories returned
//! by one MPC solve and integrates them into a [`Pendulum`], one control
//! timestep at a time. Within the horizon the stored jerk sample for the
//! current preview step is applied ("playback"); once the horizon is
//! exhausted the acceleration is held with zero jerk ("post-playback") until
//! the next solve replaces the preview.

use nalgebra::{DVector, Vector3};

use strider_core::Pendulum;

use crate::mpc::{INPUT_SIZE, NB_STEPS, SAMPLING_PERIOD, STATE_SIZE};

#[derive(Clone, Debug)]
pub struct Preview {
    state_traj: DVector<f64>,
    input_traj: DVector<f64>,
    playback_step: usize,
    playback_time: f64,
}

impl Preview {
    /// Build a preview from stacked trajectories.
    ///
    /// `state_traj` holds `NB_STEPS + 1` six-dimensional CoM states and
    /// `input_traj` holds `NB_STEPS` two-dimensional jerk samples.
    pub fn new(state_traj: DVector<f64>, input_traj: DVector<f64>) -> Self {
        debug_assert_eq!(state_traj.len(), STATE_SIZE * (NB_STEPS + 1));
        debug_assert_eq!(input_traj.len(), INPUT_SIZE * NB_STEPS);
        Self {
            state_traj,
            input_traj,
            playback_step: 0,
            playback_time: 0.0,
        }
    }

    /// All-zero trajectories holding the given initial state.
    pub fn zero_from(init_state: &DVector<f64>) -> Self {
        debug_assert_eq!(init_state.len(), STATE_SIZE);
        let mut state_traj = DVector::zeros(STATE_SIZE * (NB_STEPS + 1));
        state_traj.rows_mut(0, STATE_SIZE).copy_from(init_state);
        Self::new(state_traj, DVector::zeros(INPUT_SIZE * NB_STEPS))
    }

    pub fn state_traj(&self) -> &DVector<f64> {
        &self.state_traj
    }

    pub fn input_traj(&self) -> &DVector<f64> {
        &self.input_traj
    }

    /// Six-dimensional CoM state at preview step `i`.
    pub fn state(&self, i: usize) -> DVector<f64> {
        self.state_traj.rows(STATE_SIZE * i, STATE_SIZE).into_owned()
    }

    /// Current playback step within the horizon.
    pub fn playback_step(&self) -> usize {
        self.playback_step
    }

    /// Integrate the preview into `pendulum` over one control timestep.
    pub fn integrate(&mut self, pendulum: &mut Pendulum, dt: f64) {
        if self.playback_step < NB_STEPS {
            self.integrate_playback(pendulum, dt);
        } else {
            self.integrate_post_playback(pendulum, dt);
        }
    }

    /// Within-horizon integration: apply the stored jerk sample.
    pub fn integrate_playback(&mut self, pendulum: &mut Pendulum, dt: f64) {
        let jerk = Vector3::new(
            self.input_traj[INPUT_SIZE * self.playback_step],
            self.input_traj[INPUT_SIZE * self.playback_step + 1],
            0.0,
        );
        self.playback_time += dt;
        if self.playback_time >= (self.playback_step + 1) as f64 * SAMPLING_PERIOD {
            self.playback_step += 1;
        }
        pendulum.integrate_com_jerk(&jerk, dt);
    }

    /// Post-horizon integration: hold the acceleration with zero jerk.
    pub fn integrate_post_playback(&mut self, pendulum: &mut Pendulum, dt: f64) {
        self.playback_time += dt;
        pendulum.integrate_com_jerk(&Vector3::zeros(), dt);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn constant_jerk_preview(jerk: f64) -> Preview {
        let state_traj = DVector::zeros(STATE_SIZE * (NB_STEPS + 1));
        let input_traj = DVector::from_element(INPUT_SIZE * NB_STEPS, jerk);
        Preview::new(state_traj, input_traj)
    }

    #[test]
    fn playback_step_advances_at_sampling_period() {
        let mut preview = constant_jerk_preview(0.0);
        let mut pendulum = Pendulum::default();
        pendulum.reset(Vector3::new(0.0, 0.0, 0.8), 0.8);
        let dt = 0.005;
        let per_step = (SAMPLING_PERIOD / dt).round() as usize;
        for _ in 0..per_step {
            preview.integrate(&mut pendulum, dt);
        }
        assert_eq!(preview.playback_step(), 1);
        for _ in 0..per_step {
            preview.integrate(&mut pendulum, dt);
        }
        assert_eq!(preview.playback_step(), 2);
    }

    #[test]
    fn zero_jerk_preview_keeps_pendulum_stationary() {
        let mut preview = constant_jerk_preview(0.0);
        let mut pendulum = Pendulum::default();
        pendulum.reset(Vector3::new(0.1, -0.2, 0.8), 0.8);
        for _ in 0..100 {
            preview.integrate(&mut pendulum, 0.005);
        }
        assert_relative_eq!(pendulum.com(), Vector3::new(0.1, -0.2, 0.8), epsilon = 1e-12);
        assert_relative_eq!(pendulum.comd(), Vector3::zeros(), epsilon = 1e-12);
    }

    #[test]
    fn constant_jerk_playback_matches_closed_form() {
        let mut preview = constant_jerk_preview(0.6);
        let mut pendulum = Pendulum::default();
        pendulum.reset(Vector3::new(0.0, 0.0, 0.8), 0.8);
        let dt = 0.01;
        let n = 50; // 0.5 s, still inside the horizon
        for _ in 0..n {
            preview.integrate(&mut pendulum, dt);
        }
        let t = n as f64 * dt;
        // Piecewise integration of a constant jerk is exact.
        assert_relative_eq!(pendulum.comdd().x, 0.6 * t, epsilon = 1e-9);
        assert_relative_eq!(pendulum.comd().x, 0.3 * t * t, epsilon = 1e-9);
        assert_relative_eq!(pendulum.com().x, 0.1 * t * t * t, epsilon = 1e-9);
    }

    #[test]
    fn post_playback_holds_acceleration() {
        let mut preview = constant_jerk_preview(1.0);
        let mut pendulum = Pendulum::default();
        pendulum.reset(Vector3::new(0.0, 0.0, 0.8), 0.8);
        let dt = 0.1;
        // Exhaust the horizon.
        for _ in 0..NB_STEPS {
            preview.integrate(&mut pendulum, dt);
        }
        assert_eq!(preview.playback_step(), NB_STEPS);
        let comdd_at_horizon = pendulum.comdd();
        preview.integrate(&mut pendulum, dt);
        assert_relative_eq!(pendulum.comdd(), comdd_at_horizon, epsilon = 1e-12);
    }

    #[test]
    fn zero_from_embeds_initial_state() {
        let init = DVector::from_vec(vec![0.1, 0.2, 0.3, 0.4, 0.5, 0.6]);
        let preview = Preview::zero_from(&init);
        assert_relative_eq!(preview.state(0), init, epsilon = 1e-12);
        assert_relative_eq!(preview.state(NB_STEPS).norm(), 0.0, epsilon = 1e-12);
    }
}
