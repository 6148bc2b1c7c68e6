//! Walking controller configuration.
//!
//! One TOML document loaded at startup (and on explicit reconfiguration)
//! carries the MPC weights, the stabilizer tree, the named footstep plans
//! and per-robot-model overrides. Missing required fields and malformed
//! geometry are fatal at load time.

use std::collections::BTreeMap;
use std::path::Path;

use nalgebra::Vector3;
use serde::{Deserialize, Serialize};

use strider_core::plan::MpcWeightsOverride;
use strider_core::{ConfigError, Contact, FootstepPlan, Pose, Sole, Surface, SwingSettings};
use strider_mpc::MpcWeights;
use strider_stabilizer::StabilizerConfig;

const fn default_double_support_duration() -> f64 {
    0.2
}
const fn default_single_support_duration() -> f64 {
    0.8
}
const fn default_swing_height() -> f64 {
    0.04
}
const fn default_init_dsp_duration() -> f64 {
    0.6
}
const fn default_final_dsp_duration() -> f64 {
    0.6
}
const fn default_step_width() -> f64 {
    0.18
}
const fn default_com_height_bounds() -> [f64; 2] {
    [0.5, 0.9]
}

/// Pose of a planned contact: planar translation plus yaw.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct PoseConfig {
    pub translation: [f64; 3],
    #[serde(default)]
    pub yaw: f64,
}

impl PoseConfig {
    pub fn to_pose(self) -> Pose {
        Pose::from_yaw_translation(self.yaw, Vector3::from(self.translation))
    }
}

/// One planned contact.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ContactConfig {
    pub pose: PoseConfig,
    pub surface: String,
    #[serde(default)]
    pub ref_vel: Option<[f64; 3]>,
    #[serde(default)]
    pub half_length: Option<f64>,
    #[serde(default)]
    pub half_width: Option<f64>,
    #[serde(default)]
    pub swing: Option<SwingSettings>,
}

impl ContactConfig {
    pub fn to_contact(&self) -> Result<Contact, ConfigError> {
        let surface = Surface::parse(&self.surface)
            .ok_or_else(|| ConfigError::UnknownSurface(self.surface.clone()))?;
        let mut contact = Contact::new(self.pose.to_pose(), surface);
        if let Some(ref_vel) = self.ref_vel {
            contact.ref_vel = Vector3::from(ref_vel);
        }
        contact.half_length = self.half_length.unwrap_or(0.0);
        contact.half_width = self.half_width.unwrap_or(0.0);
        contact.swing = self.swing.clone();
        Ok(contact)
    }
}

/// One named footstep plan.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PlanConfig {
    pub contacts: Vec<ContactConfig>,
    #[serde(default = "default_double_support_duration")]
    pub double_support_duration: f64,
    #[serde(default = "default_single_support_duration")]
    pub single_support_duration: f64,
    #[serde(default = "default_swing_height")]
    pub swing_height: f64,
    #[serde(default = "default_init_dsp_duration")]
    pub init_dsp_duration: f64,
    #[serde(default = "default_final_dsp_duration")]
    pub final_dsp_duration: f64,
    #[serde(default)]
    pub com_height: Option<f64>,
    #[serde(default)]
    pub torso_pitch: Option<f64>,
    #[serde(default)]
    pub mpc: Option<MpcWeightsOverride>,
}

impl PlanConfig {
    /// Instantiate the plan, patching the default CoM height and step width
    /// from the robot model.
    pub fn to_plan(&self, name: &str, robot: &RobotModelConfig) -> Result<FootstepPlan, ConfigError> {
        let mut contacts = Vec::with_capacity(self.contacts.len());
        for config in &self.contacts {
            let mut contact = config.to_contact()?;
            // Pin the lateral step width of the robot model.
            contact.pose.translation.y = match contact.surface {
                Surface::LeftFootCenter => 0.5 * robot.step_width,
                Surface::RightFootCenter => -0.5 * robot.step_width,
            };
            contacts.push(contact);
        }
        let mut plan = FootstepPlan::new(name, contacts)
            .map_err(|err| ConfigError::InvalidValue {
                field: format!("plans.{name}.contacts"),
                message: err.to_string(),
            })?;
        plan.double_support_duration = self.double_support_duration;
        plan.single_support_duration = self.single_support_duration;
        plan.swing_height = self.swing_height;
        plan.init_dsp_duration = self.init_dsp_duration;
        plan.final_dsp_duration = self.final_dsp_duration;
        plan.com_height = self.com_height.unwrap_or(robot.com.height);
        plan.torso_pitch = self.torso_pitch;
        plan.mpc = self.mpc;
        Ok(plan)
    }

    fn validate(&self, name: &str) -> Result<(), ConfigError> {
        if self.contacts.len() < 2 {
            return Err(ConfigError::InvalidValue {
                field: format!("plans.{name}.contacts"),
                message: format!("needs at least 2 contacts, got {}", self.contacts.len()),
            });
        }
        for contact in &self.contacts {
            if Surface::parse(&contact.surface).is_none() {
                return Err(ConfigError::UnknownSurface(contact.surface.clone()));
            }
        }
        if self.double_support_duration <= 0.0 || self.single_support_duration <= 0.0 {
            return Err(ConfigError::InvalidValue {
                field: format!("plans.{name}"),
                message: "phase durations must be positive".into(),
            });
        }
        Ok(())
    }
}

/// CoM parameters of a robot model.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ComConfig {
    pub height: f64,
    #[serde(default = "default_com_height_bounds")]
    pub height_bounds: [f64; 2],
    #[serde(default)]
    pub active_joints: Vec<String>,
}

impl Default for ComConfig {
    fn default() -> Self {
        Self {
            height: 0.8,
            height_bounds: default_com_height_bounds(),
            active_joints: Vec::new(),
        }
    }
}

/// Per-robot-model overrides.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RobotModelConfig {
    #[serde(default)]
    pub sole: Sole,
    #[serde(default)]
    pub com: ComConfig,
    #[serde(default = "default_step_width")]
    pub step_width: f64,
    #[serde(default)]
    pub admittance: Option<strider_stabilizer::gains::AdmittanceConfig>,
    #[serde(default)]
    pub torso_pitch: f64,
}

impl Default for RobotModelConfig {
    fn default() -> Self {
        Self {
            sole: Sole::default(),
            com: ComConfig::default(),
            step_width: default_step_width(),
            admittance: None,
            torso_pitch: 0.1,
        }
    }
}

/// Top-level configuration document.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct WalkingConfig {
    #[serde(default)]
    pub mpc: MpcWeights,
    #[serde(default)]
    pub stabilizer: StabilizerConfig,
    #[serde(default)]
    pub plans: BTreeMap<String, PlanConfig>,
    #[serde(default)]
    pub robot_models: BTreeMap<String, RobotModelConfig>,
    /// Plan loaded at startup; the first plan by name when unset.
    #[serde(default)]
    pub initial_plan: Option<String>,
}

impl WalkingConfig {
    pub fn from_str(text: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_str(&text)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.plans.is_empty() {
            return Err(ConfigError::MissingField("plans".into()));
        }
        for (name, plan) in &self.plans {
            plan.validate(name)?;
        }
        if let Some(initial) = &self.initial_plan {
            if !self.plans.contains_key(initial) {
                return Err(ConfigError::UnknownPlan(initial.clone()));
            }
        }
        for (name, robot) in &self.robot_models {
            if robot.step_width <= 0.0 {
                return Err(ConfigError::InvalidValue {
                    field: format!("robot_models.{name}.step_width"),
                    message: "must be positive".into(),
                });
            }
            let [min, max] = robot.com.height_bounds;
            if !(min < max && min > 0.0) {
                return Err(ConfigError::InvalidValue {
                    field: format!("robot_models.{name}.com.height_bounds"),
                    message: "bounds must satisfy 0 < min < max".into(),
                });
            }
        }
        Ok(())
    }

    /// Resolve the robot model overrides, erroring on unknown names.
    pub fn robot_model(&self, name: &str) -> Result<RobotModelConfig, ConfigError> {
        if self.robot_models.is_empty() {
            return Ok(RobotModelConfig::default());
        }
        self.robot_models
            .get(name)
            .cloned()
            .ok_or_else(|| ConfigError::UnknownRobotModel(name.into()))
    }

    /// Name of the plan selected at startup.
    pub fn initial_plan_name(&self) -> &str {
        self.initial_plan
            .as_deref()
            .or_else(|| self.plans.keys().next().map(String::as_str))
            .unwrap_or("")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    const SAMPLE: &str = r#"
        initial_plan = "warmup"

        [mpc]
        jerk = 1.0
        vel = [10.0, 10.0]
        zmp = 1000.0

        [stabilizer.fdqp_weights]
        net_wrench = 10000.0
        ankle_torque = 100.0
        pressure = 1.0

        [stabilizer.dcm_feedback]
        gain = 1.4
        integral_gain = 10.0
        integrator_time_constant = 5.0

        [robot_models.hrp4]
        step_width = 0.18

        [robot_models.hrp4.sole]
        half_length = 0.112
        half_width = 0.065
        friction = 0.7

        [robot_models.hrp4.com]
        height = 0.78
        height_bounds = [0.6, 0.85]

        [plans.warmup]
        double_support_duration = 0.1
        single_support_duration = 0.7
        swing_height = 0.04

        [[plans.warmup.contacts]]
        surface = "LeftFootCenter"
        pose = { translation = [0.0, 0.09, 0.0] }

        [[plans.warmup.contacts]]
        surface = "RightFootCenter"
        pose = { translation = [0.0, -0.09, 0.0] }

        [[plans.warmup.contacts]]
        surface = "LeftFootCenter"
        pose = { translation = [0.0, 0.09, 0.0] }

        [[plans.warmup.contacts]]
        surface = "RightFootCenter"
        pose = { translation = [0.0, -0.09, 0.0] }

        [plans.forward]
        double_support_duration = 0.2
        single_support_duration = 0.8

        [[plans.forward.contacts]]
        surface = "LeftFootCenter"
        pose = { translation = [0.0, 0.09, 0.0] }

        [[plans.forward.contacts]]
        surface = "RightFootCenter"
        pose = { translation = [0.0, -0.09, 0.0] }

        [[plans.forward.contacts]]
        surface = "LeftFootCenter"
        pose = { translation = [0.2, 0.09, 0.0] }
        ref_vel = [0.1, 0.0, 0.0]
    "#;

    #[test]
    fn sample_config_parses_and_validates() {
        let config = WalkingConfig::from_str(SAMPLE).unwrap();
        assert_eq!(config.initial_plan_name(), "warmup");
        assert_eq!(config.plans.len(), 2);
        assert_relative_eq!(config.mpc.zmp, 1000.0);
        let robot = config.robot_model("hrp4").unwrap();
        assert_relative_eq!(robot.com.height, 0.78);
    }

    #[test]
    fn plan_with_one_contact_is_rejected() {
        let text = r#"
            [plans.bad]
            [[plans.bad.contacts]]
            surface = "LeftFootCenter"
            pose = { translation = [0.0, 0.09, 0.0] }
        "#;
        let err = WalkingConfig::from_str(text).unwrap_err();
        assert!(err.to_string().contains("at least 2"));
    }

    #[test]
    fn unknown_surface_is_rejected() {
        let text = r#"
            [plans.bad]
            [[plans.bad.contacts]]
            surface = "Torso"
            pose = { translation = [0.0, 0.0, 0.0] }
            [[plans.bad.contacts]]
            surface = "LeftFootCenter"
            pose = { translation = [0.0, 0.09, 0.0] }
        "#;
        let err = WalkingConfig::from_str(text).unwrap_err();
        assert!(matches!(err, ConfigError::UnknownSurface(_)));
    }

    #[test]
    fn unknown_initial_plan_is_rejected() {
        let text = r#"
            initial_plan = "sprint"
            [plans.warmup]
            [[plans.warmup.contacts]]
            surface = "LeftFootCenter"
            pose = { translation = [0.0, 0.09, 0.0] }
            [[plans.warmup.contacts]]
            surface = "RightFootCenter"
            pose = { translation = [0.0, -0.09, 0.0] }
        "#;
        let err = WalkingConfig::from_str(text).unwrap_err();
        assert!(matches!(err, ConfigError::UnknownPlan(_)));
    }

    #[test]
    fn missing_plans_are_fatal() {
        let err = WalkingConfig::from_str("").unwrap_err();
        assert!(matches!(err, ConfigError::MissingField(_)));
    }

    #[test]
    fn to_plan_patches_step_width_and_com_height() {
        let config = WalkingConfig::from_str(SAMPLE).unwrap();
        let robot = config.robot_model("hrp4").unwrap();
        let plan = config.plans["warmup"].to_plan("warmup", &robot).unwrap();
        assert_relative_eq!(plan.com_height, 0.78);
        assert_relative_eq!(plan.contacts()[0].y(), 0.09);
        assert_relative_eq!(plan.contacts()[1].y(), -0.09);
        assert_relative_eq!(plan.double_support_duration, 0.1);
    }

    #[test]
    fn unknown_robot_model_is_rejected_when_models_exist() {
        let config = WalkingConfig::from_str(SAMPLE).unwrap();
        assert!(matches!(
            config.robot_model("jvrc1"),
            Err(ConfigError::UnknownRobotModel(_))
        ));
        // Without any models, defaults apply to every robot.
        let no_models = WalkingConfig {
            robot_models: BTreeMap::new(),
            ..config
        };
        assert!(no_models.robot_model("jvrc1").is_ok());
    }

    #[test]
    fn from_file_roundtrip() {
        let dir = std::env::temp_dir().join("strider_test_config");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("walking.toml");
        std::fs::write(&path, SAMPLE).unwrap();
        let config = WalkingConfig::from_file(&path).unwrap();
        assert_eq!(config.plans.len(), 2);
        let _ = std::fs::remove_file(&path);
        let _ = std::fs::remove_dir(&dir);
    }
}
