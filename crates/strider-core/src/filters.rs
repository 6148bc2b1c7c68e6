//! Small stateful filters used by the stabilizer.
//!
//! Each filter is an independent value type with an explicit contract
//! (append/add, rate or time constant, eval, set_zero, saturation) so the
//! feedback laws stay directly testable.

use nalgebra::Vector3;

fn saturate(v: &mut Vector3<f64>, bound: f64) {
    if bound > 0.0 {
        for x in v.iter_mut() {
            *x = x.clamp(-bound, bound);
        }
    }
}

// ---------------------------------------------------------------------------
// LeakyIntegrator
// ---------------------------------------------------------------------------

/// Integrator with exponential leakage toward zero.
///
/// ```text
/// x_{k+1} = (1 - rate * dt) * x_k + dt * u_k
/// ```
///
/// The stored value is clamped elementwise to the configured saturation
/// bound after every update.
#[derive(Clone, Debug)]
pub struct LeakyIntegrator {
    integral: Vector3<f64>,
    rate: f64,
    saturation: f64,
}

impl Default for LeakyIntegrator {
    fn default() -> Self {
        Self {
            integral: Vector3::zeros(),
            rate: 0.1,
            saturation: -1.0,
        }
    }
}

impl LeakyIntegrator {
    /// Append an input sample over one timestep.
    pub fn add(&mut self, value: &Vector3<f64>, dt: f64) {
        self.integral = (1.0 - self.rate * dt) * self.integral + dt * value;
        saturate(&mut self.integral, self.saturation);
    }

    /// Current integral value.
    pub fn eval(&self) -> Vector3<f64> {
        self.integral
    }

    pub fn set_zero(&mut self) {
        self.integral.fill(0.0);
    }

    /// Leak rate in Hz, clamped to be non-negative.
    pub fn set_rate(&mut self, rate: f64) {
        self.rate = rate.max(0.0);
    }

    pub fn rate(&self) -> f64 {
        self.rate
    }

    /// Symmetric elementwise saturation bound. Non-positive disables it.
    pub fn set_saturation(&mut self, saturation: f64) {
        self.saturation = saturation;
    }
}

// ---------------------------------------------------------------------------
// ExponentialMovingAverage
// ---------------------------------------------------------------------------

/// Exponential moving average with a time-constant parameterization.
///
/// ```text
/// alpha = 1 - exp(-dt / T)
/// x_{k+1} = x_k + alpha * (u_k - x_k)
/// ```
#[derive(Clone, Debug)]
pub struct ExponentialMovingAverage {
    alpha: f64,
    average: Vector3<f64>,
    dt: f64,
    saturation: f64,
    time_constant: f64,
}

impl ExponentialMovingAverage {
    pub fn new(dt: f64, time_constant: f64) -> Self {
        let mut average = Self {
            alpha: 0.0,
            average: Vector3::zeros(),
            dt,
            saturation: -1.0,
            time_constant: 0.0,
        };
        average.set_time_constant(time_constant);
        average
    }

    /// Append a new sample.
    pub fn append(&mut self, value: &Vector3<f64>) {
        self.average += self.alpha * (value - self.average);
        saturate(&mut self.average, self.saturation);
    }

    pub fn eval(&self) -> Vector3<f64> {
        self.average
    }

    pub fn set_zero(&mut self) {
        self.average.fill(0.0);
    }

    /// Averaging time constant in seconds, floored at twice the timestep.
    pub fn set_time_constant(&mut self, time_constant: f64) {
        self.time_constant = time_constant.max(2.0 * self.dt);
        self.alpha = 1.0 - (-self.dt / self.time_constant).exp();
    }

    pub fn time_constant(&self) -> f64 {
        self.time_constant
    }

    pub fn set_saturation(&mut self, saturation: f64) {
        self.saturation = saturation;
    }
}

// ---------------------------------------------------------------------------
// LowPassVelocityFilter
// ---------------------------------------------------------------------------

/// Derives a velocity estimate from position updates with first-order
/// low-pass smoothing.
#[derive(Clone, Debug)]
pub struct LowPassVelocityFilter {
    cutoff_period: f64,
    dt: f64,
    pos: Vector3<f64>,
    vel: Vector3<f64>,
}

impl LowPassVelocityFilter {
    pub fn new(dt: f64, cutoff_period: f64) -> Self {
        Self {
            cutoff_period,
            dt,
            pos: Vector3::zeros(),
            vel: Vector3::zeros(),
        }
    }

    /// Reset the filter around a new position, zeroing the velocity.
    pub fn reset(&mut self, pos: Vector3<f64>) {
        self.pos = pos;
        self.vel.fill(0.0);
    }

    /// Update from a new position measurement.
    pub fn update(&mut self, new_pos: &Vector3<f64>) {
        let x = if self.cutoff_period <= self.dt {
            1.0
        } else {
            self.dt / self.cutoff_period
        };
        let discrete_vel = (new_pos - self.pos) / self.dt;
        self.vel = x * discrete_vel + (1.0 - x) * self.vel;
        self.pos = *new_pos;
    }

    /// Update the internal position without touching the velocity estimate.
    ///
    /// Used when the position measurement is known to have jumped (e.g. the
    /// kinematic anchor frame changed) and a spurious velocity spike must be
    /// avoided.
    pub fn update_position_only(&mut self, new_pos: &Vector3<f64>) {
        self.pos = *new_pos;
    }

    pub fn vel(&self) -> Vector3<f64> {
        self.vel
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    // ---- LeakyIntegrator ----

    #[test]
    fn leaky_integrator_decays_monotonically_with_zero_input() {
        let mut integrator = LeakyIntegrator::default();
        integrator.set_rate(2.0);
        integrator.set_saturation(1.0);
        integrator.add(&Vector3::new(100.0, 0.0, 0.0), 0.05);
        let mut prev = integrator.eval().x;
        assert!(prev <= 1.0 + 1e-12);
        for _ in 0..200 {
            integrator.add(&Vector3::zeros(), 0.05);
            let cur = integrator.eval().x;
            assert!(cur >= 0.0);
            assert!(cur <= prev);
            prev = cur;
        }
        assert!(prev < 1e-6);
    }

    #[test]
    fn leaky_integrator_never_exceeds_saturation_for_bounded_input() {
        let mut integrator = LeakyIntegrator::default();
        integrator.set_rate(0.1);
        integrator.set_saturation(0.05);
        // Inputs bounded by the saturation value itself.
        for i in 0..500 {
            let u = if i % 2 == 0 { 0.05 } else { -0.03 };
            integrator.add(&Vector3::new(u, u, u), 0.01);
            let v = integrator.eval();
            assert!(v.amax() <= 0.05 + 1e-12, "saturation exceeded: {v}");
        }
    }

    #[test]
    fn leaky_integrator_rate_clamped_non_negative() {
        let mut integrator = LeakyIntegrator::default();
        integrator.set_rate(-3.0);
        assert_relative_eq!(integrator.rate(), 0.0);
    }

    #[test]
    fn leaky_integrator_set_zero() {
        let mut integrator = LeakyIntegrator::default();
        integrator.add(&Vector3::new(1.0, 1.0, 1.0), 0.1);
        integrator.set_zero();
        assert_relative_eq!(integrator.eval(), Vector3::zeros(), epsilon = 1e-12);
    }

    // ---- ExponentialMovingAverage ----

    #[test]
    fn ema_converges_to_constant_input() {
        let mut average = ExponentialMovingAverage::new(0.005, 0.5);
        let target = Vector3::new(0.02, -0.01, 0.0);
        for _ in 0..2000 {
            average.append(&target);
        }
        assert_relative_eq!(average.eval(), target, epsilon = 1e-6);
    }

    #[test]
    fn ema_time_constant_floored_at_two_timesteps() {
        let mut average = ExponentialMovingAverage::new(0.005, 0.001);
        assert_relative_eq!(average.time_constant(), 0.01, epsilon = 1e-12);
        average.set_time_constant(5.0);
        assert_relative_eq!(average.time_constant(), 5.0, epsilon = 1e-12);
    }

    #[test]
    fn ema_respects_saturation() {
        let mut average = ExponentialMovingAverage::new(0.005, 0.01);
        average.set_saturation(0.01);
        for _ in 0..1000 {
            average.append(&Vector3::new(1.0, 0.0, 0.0));
        }
        assert!(average.eval().x <= 0.01 + 1e-12);
    }

    // ---- LowPassVelocityFilter ----

    #[test]
    fn velocity_filter_tracks_constant_velocity() {
        let dt = 0.005;
        let mut filter = LowPassVelocityFilter::new(dt, 0.02);
        filter.reset(Vector3::zeros());
        let vel = Vector3::new(0.3, -0.1, 0.0);
        let mut pos = Vector3::zeros();
        for _ in 0..200 {
            pos += vel * dt;
            filter.update(&pos);
        }
        assert_relative_eq!(filter.vel(), vel, epsilon = 1e-6);
    }

    #[test]
    fn position_only_update_keeps_velocity() {
        let mut filter = LowPassVelocityFilter::new(0.005, 0.02);
        filter.reset(Vector3::zeros());
        filter.update(&Vector3::new(0.001, 0.0, 0.0));
        let vel_before = filter.vel();
        // A 10 cm jump would produce a 20 m/s spike if fed to update().
        filter.update_position_only(&Vector3::new(0.1, 0.0, 0.0));
        assert_relative_eq!(filter.vel(), vel_before, epsilon = 1e-12);
    }

    #[test]
    fn cutoff_period_below_timestep_passes_raw_velocity() {
        let mut filter = LowPassVelocityFilter::new(0.01, 0.001);
        filter.reset(Vector3::zeros());
        filter.update(&Vector3::new(0.01, 0.0, 0.0));
        assert_relative_eq!(filter.vel().x, 1.0, epsilon = 1e-12);
    }
}
