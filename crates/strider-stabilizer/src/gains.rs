//! Stabilizer gains, their safety bounds, and configuration.

use nalgebra::{Vector2, Vector3};
use serde::{Deserialize, Serialize};

// Safety bounds applied to every gain once per cycle. Out-of-range values
// are clamped, with a one-shot warning from the stabilizer.
pub const MAX_AVERAGE_DCM_ERROR: f64 = 0.05; // [m]
pub const MAX_ALTCC_COM_OFFSET: f64 = 0.05; // [m]
pub const MAX_ZMPCC_COM_OFFSET: f64 = 0.05; // [m]
pub const MAX_COM_XY_ADMITTANCE: f64 = 20.0;
pub const MAX_COM_Z_ADMITTANCE: f64 = 20.0;
pub const MAX_COP_ADMITTANCE: f64 = 0.1;
pub const MAX_DCM_I_GAIN: f64 = 100.0;
pub const MAX_DCM_P_GAIN: f64 = 10.0;
pub const MIN_DCM_P_GAIN: f64 = 1.0;
pub const MAX_DFZ_ADMITTANCE: f64 = 5e-4; // [s] / [kg]
pub const MAX_VDC_FREQUENCY: f64 = 10.0; // [Hz]
pub const MAX_VDC_STIFFNESS: f64 = 1e4;
pub const MAX_VDC_DAMPING: f64 = 100.0;

/// Minimum pressure per foot in double support, in Newtons.
pub const MIN_DS_PRESSURE: f64 = 15.0;

/// Pressure above which a foot is considered touched down, in Newtons.
pub const TOUCHDOWN_PRESSURE: f64 = 50.0;

/// Maximum pose gap for touchdown detection, in meters.
pub const TOUCHDOWN_DISTANCE: f64 = 0.03;

/// Scalar feedback gains read once per cycle.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct StabilizerGains {
    /// CoM admittance per axis (x, y used by ZMPCC, z by altitude control).
    pub com_admittance: Vector3<f64>,
    /// CoP admittance per horizontal axis of the foot frame.
    pub cop_admittance: Vector2<f64>,
    /// Foot force difference admittance.
    pub dfz_admittance: f64,
    /// DCM proportional feedback gain.
    pub dcm_gain: f64,
    /// DCM integral feedback gain.
    pub dcm_integral_gain: f64,
    /// Vertical drift control damping.
    pub vdc_damping: f64,
    /// Vertical drift control frequency.
    pub vdc_frequency: f64,
    /// Vertical stiffness of the support foot in single support.
    pub vdc_stiffness: f64,
}

impl Default for StabilizerGains {
    fn default() -> Self {
        Self {
            com_admittance: Vector3::new(0.0, 0.0, 0.0),
            cop_admittance: Vector2::new(0.01, 0.01),
            dfz_admittance: 1e-4,
            dcm_gain: 1.4,
            dcm_integral_gain: 10.0,
            vdc_damping: 0.0,
            vdc_frequency: 1.0,
            vdc_stiffness: 1000.0,
        }
    }
}

impl StabilizerGains {
    /// Clamp every gain into its safety range. Returns whether any value
    /// moved.
    pub fn clamp_all(&mut self) -> bool {
        let before = *self;
        self.com_admittance.x = self.com_admittance.x.clamp(0.0, MAX_COM_XY_ADMITTANCE);
        self.com_admittance.y = self.com_admittance.y.clamp(0.0, MAX_COM_XY_ADMITTANCE);
        self.com_admittance.z = self.com_admittance.z.clamp(0.0, MAX_COM_Z_ADMITTANCE);
        self.cop_admittance.x = self.cop_admittance.x.clamp(0.0, MAX_COP_ADMITTANCE);
        self.cop_admittance.y = self.cop_admittance.y.clamp(0.0, MAX_COP_ADMITTANCE);
        self.dfz_admittance = self.dfz_admittance.clamp(0.0, MAX_DFZ_ADMITTANCE);
        self.dcm_gain = self.dcm_gain.clamp(MIN_DCM_P_GAIN, MAX_DCM_P_GAIN);
        self.dcm_integral_gain = self.dcm_integral_gain.clamp(0.0, MAX_DCM_I_GAIN);
        self.vdc_damping = self.vdc_damping.clamp(0.0, MAX_VDC_DAMPING);
        self.vdc_frequency = self.vdc_frequency.clamp(0.0, MAX_VDC_FREQUENCY);
        self.vdc_stiffness = self.vdc_stiffness.clamp(0.0, MAX_VDC_STIFFNESS);
        *self != before
    }

    /// Zero all feedback gains (keeps the controller passive).
    pub fn disable(&mut self) {
        self.com_admittance.fill(0.0);
        self.cop_admittance.fill(0.0);
        self.dcm_gain = MIN_DCM_P_GAIN;
        self.dcm_integral_gain = 0.0;
        self.dfz_admittance = 0.0;
        self.vdc_frequency = 0.0;
        self.vdc_stiffness = 0.0;
    }
}

/// Square roots of the force distribution QP weights, pre-computed so cost
/// rows can be scaled directly.
#[derive(Clone, Copy, Debug)]
pub struct FdqpWeights {
    pub net_wrench_sqrt: f64,
    pub ankle_torque_sqrt: f64,
    pub pressure_sqrt: f64,
}

impl Default for FdqpWeights {
    fn default() -> Self {
        FdqpWeightsConfig::default().into()
    }
}

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

const fn default_net_wrench_weight() -> f64 {
    10000.0
}
const fn default_ankle_torque_weight() -> f64 {
    100.0
}
const fn default_pressure_weight() -> f64 {
    1.0
}
const fn default_integrator_leak_rate() -> f64 {
    0.1
}
const fn default_dcm_integrator_time_constant() -> f64 {
    5.0
}

/// Force distribution QP weights, as configured.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct FdqpWeightsConfig {
    #[serde(default = "default_net_wrench_weight")]
    pub net_wrench: f64,
    #[serde(default = "default_ankle_torque_weight")]
    pub ankle_torque: f64,
    #[serde(default = "default_pressure_weight")]
    pub pressure: f64,
}

impl Default for FdqpWeightsConfig {
    fn default() -> Self {
        Self {
            net_wrench: default_net_wrench_weight(),
            ankle_torque: default_ankle_torque_weight(),
            pressure: default_pressure_weight(),
        }
    }
}

impl From<FdqpWeightsConfig> for FdqpWeights {
    fn from(config: FdqpWeightsConfig) -> Self {
        Self {
            net_wrench_sqrt: config.net_wrench.sqrt(),
            ankle_torque_sqrt: config.ankle_torque.sqrt(),
            pressure_sqrt: config.pressure.sqrt(),
        }
    }
}

/// DCM feedback configuration.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct DcmFeedbackConfig {
    pub gain: f64,
    pub integral_gain: f64,
    #[serde(default = "default_dcm_integrator_time_constant")]
    pub integrator_time_constant: f64,
}

impl Default for DcmFeedbackConfig {
    fn default() -> Self {
        Self {
            gain: 1.4,
            integral_gain: 10.0,
            integrator_time_constant: default_dcm_integrator_time_constant(),
        }
    }
}

/// End-effector task gain configuration.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TaskGainsConfig {
    pub stiffness: f64,
    #[serde(default)]
    pub damping: f64,
    pub weight: f64,
}

/// Whole-body task configuration consumed by the external solver.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TasksConfig {
    pub com: ComTaskConfig,
    pub contact: TaskGainsConfig,
    pub swing_foot: TaskGainsConfig,
}

impl Default for TasksConfig {
    fn default() -> Self {
        Self {
            com: ComTaskConfig::default(),
            contact: TaskGainsConfig {
                stiffness: 1.0,
                damping: 300.0,
                weight: 100000.0,
            },
            swing_foot: TaskGainsConfig {
                stiffness: 2000.0,
                damping: 0.0,
                weight: 500.0,
            },
        }
    }
}

/// CoM task configuration.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ComTaskConfig {
    pub stiffness: [f64; 3],
    pub weight: f64,
    #[serde(default)]
    pub active_joints: Vec<String>,
}

impl Default for ComTaskConfig {
    fn default() -> Self {
        Self {
            stiffness: [1000.0, 1000.0, 100.0],
            weight: 1000.0,
            active_joints: Vec::new(),
        }
    }
}

/// Vertical drift compensation configuration.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct VdcConfig {
    pub frequency: f64,
    pub damping: f64,
    pub stiffness: f64,
}

impl Default for VdcConfig {
    fn default() -> Self {
        Self {
            frequency: 1.0,
            damping: 0.0,
            stiffness: 1000.0,
        }
    }
}

/// Leaky integrator configuration shared by the ZMPCC and altitude loops.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct IntegratorConfig {
    #[serde(default = "default_integrator_leak_rate")]
    pub integrator_leak_rate: f64,
}

impl Default for IntegratorConfig {
    fn default() -> Self {
        Self {
            integrator_leak_rate: default_integrator_leak_rate(),
        }
    }
}

/// Admittance gains, usually provided by the robot model overrides.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct AdmittanceConfig {
    pub com: [f64; 3],
    pub cop: [f64; 2],
    pub dfz: f64,
}

impl Default for AdmittanceConfig {
    fn default() -> Self {
        Self {
            com: [0.0, 0.0, 0.0],
            cop: [0.01, 0.01],
            dfz: 1e-4,
        }
    }
}

/// Desired-wrench model selector.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TemplateModelKind {
    #[default]
    Lip,
    Vhip,
}

/// Full stabilizer configuration tree.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct StabilizerConfig {
    #[serde(default)]
    pub fdqp_weights: FdqpWeightsConfig,
    #[serde(default)]
    pub dcm_feedback: DcmFeedbackConfig,
    #[serde(default)]
    pub tasks: TasksConfig,
    #[serde(default)]
    pub vdc: VdcConfig,
    #[serde(default)]
    pub altcc: IntegratorConfig,
    #[serde(default)]
    pub zmpcc: IntegratorConfig,
    #[serde(default)]
    pub admittance: AdmittanceConfig,
    #[serde(default)]
    pub template_model: TemplateModelKind,
    /// Restrict ZMP compensation to double support.
    #[serde(default)]
    pub zmpcc_only_ds: bool,
}
