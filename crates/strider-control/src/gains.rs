//! Shared gain surface.
//!
//! Gains can be adjusted from a UI-style control surface while the control
//! loop is running. Each scalar is published as a single atomically-replaced
//! value (an `f64` bit-packed into an `AtomicU64`), so a cycle never sees a
//! torn read; the control loop samples the whole surface once per tick.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use nalgebra::{Vector2, Vector3};

use strider_stabilizer::StabilizerGains;

/// One atomically-published `f64` gain.
#[derive(Debug)]
pub struct SharedGain(AtomicU64);

impl SharedGain {
    pub fn new(value: f64) -> Self {
        Self(AtomicU64::new(value.to_bits()))
    }

    pub fn set(&self, value: f64) {
        self.0.store(value.to_bits(), Ordering::Relaxed);
    }

    pub fn get(&self) -> f64 {
        f64::from_bits(self.0.load(Ordering::Relaxed))
    }
}

/// Atomically-published stabilizer gain surface.
///
/// Clone the [`Arc`]-wrapped surface into UI threads; the controller samples
/// it once per cycle with [`GainSurface::sample`].
#[derive(Debug)]
pub struct GainSurface {
    pub com_admittance: [SharedGain; 3],
    pub cop_admittance: [SharedGain; 2],
    pub dfz_admittance: SharedGain,
    pub dcm_gain: SharedGain,
    pub dcm_integral_gain: SharedGain,
    pub vdc_damping: SharedGain,
    pub vdc_frequency: SharedGain,
    pub vdc_stiffness: SharedGain,
}

impl GainSurface {
    /// Publish an initial gain set.
    pub fn new(gains: &StabilizerGains) -> Arc<Self> {
        Arc::new(Self {
            com_admittance: [
                SharedGain::new(gains.com_admittance.x),
                SharedGain::new(gains.com_admittance.y),
                SharedGain::new(gains.com_admittance.z),
            ],
            cop_admittance: [
                SharedGain::new(gains.cop_admittance.x),
                SharedGain::new(gains.cop_admittance.y),
            ],
            dfz_admittance: SharedGain::new(gains.dfz_admittance),
            dcm_gain: SharedGain::new(gains.dcm_gain),
            dcm_integral_gain: SharedGain::new(gains.dcm_integral_gain),
            vdc_damping: SharedGain::new(gains.vdc_damping),
            vdc_frequency: SharedGain::new(gains.vdc_frequency),
            vdc_stiffness: SharedGain::new(gains.vdc_stiffness),
        })
    }

    /// Sample the currently-published scalars into a plain gain set.
    pub fn sample(&self) -> StabilizerGains {
        StabilizerGains {
            com_admittance: Vector3::new(
                self.com_admittance[0].get(),
                self.com_admittance[1].get(),
                self.com_admittance[2].get(),
            ),
            cop_admittance: Vector2::new(self.cop_admittance[0].get(), self.cop_admittance[1].get()),
            dfz_admittance: self.dfz_admittance.get(),
            dcm_gain: self.dcm_gain.get(),
            dcm_integral_gain: self.dcm_integral_gain.get(),
            vdc_damping: self.vdc_damping.get(),
            vdc_frequency: self.vdc_frequency.get(),
            vdc_stiffness: self.vdc_stiffness.get(),
        }
    }

    /// Publish a full gain set at once.
    pub fn publish(&self, gains: &StabilizerGains) {
        self.com_admittance[0].set(gains.com_admittance.x);
        self.com_admittance[1].set(gains.com_admittance.y);
        self.com_admittance[2].set(gains.com_admittance.z);
        self.cop_admittance[0].set(gains.cop_admittance.x);
        self.cop_admittance[1].set(gains.cop_admittance.y);
        self.dfz_admittance.set(gains.dfz_admittance);
        self.dcm_gain.set(gains.dcm_gain);
        self.dcm_integral_gain.set(gains.dcm_integral_gain);
        self.vdc_damping.set(gains.vdc_damping);
        self.vdc_frequency.set(gains.vdc_frequency);
        self.vdc_stiffness.set(gains.vdc_stiffness);
    }
}
