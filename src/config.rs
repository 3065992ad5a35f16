//! Import options.
//!
//! Every field has a default, so a TOML file only needs the keys it changes:
//!
//! ```toml
//! merge_fixed_joints = true
//! default_drive_type = "position"
//! natural_frequency = 25.0
//!
//! [joints.elbow_joint]
//! target = "velocity"
//! ```

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::model::{DriveTarget, DriveType};
use crate::utils::read_file;

/// Per-joint drive settings that replace the global ones.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct JointOverride {
    /// Drive target type, `none`, `position` or `velocity`.
    pub target: Option<String>,
    pub drive_type: Option<DriveType>,
    pub natural_frequency: Option<f64>,
    pub damping_ratio: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ImportConfig {
    /// Weld children of fixed joints into their parents.
    pub merge_fixed_joints: bool,
    /// Use visual shapes as collision shapes for links that have none.
    pub collision_from_visual: bool,
    /// Keep authored inertia tensors. When off the physics backend derives them.
    pub import_inertia_tensor: bool,
    /// Anchor the root link to the world.
    pub fix_base: bool,
    /// Hint for the sink: enable collisions between links of the robot.
    pub self_collision: bool,
    /// kg/m^3 used to derive mass for massless links with primitive collisions.
    /// Zero leaves it to the physics backend.
    pub density: f64,
    /// Drive target type for joints without an override.
    pub default_drive_type: String,
    /// Stiffness of velocity drives.
    pub default_drive_strength: f64,
    /// Damping of position drives on joints without authored dynamics.
    pub default_position_drive_damping: f64,
    /// Hint for the sink: stage units per meter.
    pub distance_scale: f64,
    /// Hint for the sink: world up direction.
    pub up_vector: [f64; 3],
    /// Replace authored joint damping with computed values.
    pub override_joint_dynamics: bool,
    /// Record `<mimic>` relations.
    pub parse_mimic: bool,
    /// Target natural frequency of position drives, Hz.
    pub natural_frequency: f64,
    pub damping_ratio: f64,
    pub drive_type: DriveType,
    pub joints: BTreeMap<String, JointOverride>,
}

impl Default for ImportConfig {
    fn default() -> Self {
        Self {
            merge_fixed_joints: true,
            collision_from_visual: false,
            import_inertia_tensor: true,
            fix_base: true,
            self_collision: false,
            density: 0.0,
            default_drive_type: DriveTarget::Position.to_string(),
            default_drive_strength: 1e3,
            default_position_drive_damping: 1e2,
            distance_scale: 1.0,
            up_vector: [0.0, 0.0, 1.0],
            override_joint_dynamics: false,
            parse_mimic: true,
            natural_frequency: 25.0,
            damping_ratio: 0.005,
            drive_type: DriveType::Force,
            joints: BTreeMap::new(),
        }
    }
}

impl ImportConfig {
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        Self::from_toml_str(&read_file(path.as_ref())?)
    }

    /// Reject import-wide values outside their domain.
    ///
    /// Drive numbers are checked when a joint's drive is synthesized, so a bad value
    /// only zeroes the drives it reaches and the import goes on.
    pub fn validate(&self) -> Result<(), ConfigError> {
        non_negative("density", self.density)?;
        positive("distance_scale", self.distance_scale)?;
        if self.up_vector.iter().any(|v| !v.is_finite())
            || self.up_vector.iter().all(|v| *v == 0.0)
        {
            return Err(ConfigError::invalid_parameter(
                "up_vector",
                "must be a finite non-zero vector",
            ));
        }
        Ok(())
    }

    /// Drive target type of `joint`, its override first.
    pub fn drive_target_for(&self, joint: &str) -> Result<DriveTarget, ConfigError> {
        let raw = self
            .joints
            .get(joint)
            .and_then(|o| o.target.as_deref())
            .unwrap_or(self.default_drive_type.as_str());
        raw.parse::<DriveTarget>()
            .map_err(|value| ConfigError::UnknownDriveTarget {
                joint: joint.to_string(),
                value,
            })
    }

    pub fn drive_type_for(&self, joint: &str) -> DriveType {
        self.joints
            .get(joint)
            .and_then(|o| o.drive_type)
            .unwrap_or(self.drive_type)
    }

    pub fn natural_frequency_for(&self, joint: &str) -> Result<f64, ConfigError> {
        match self.joints.get(joint).and_then(|o| o.natural_frequency) {
            Some(f) => positive(&format!("joints.{joint}.natural_frequency"), f).map(|_| f),
            None => positive("natural_frequency", self.natural_frequency)
                .map(|_| self.natural_frequency),
        }
    }

    pub fn damping_ratio_for(&self, joint: &str) -> Result<f64, ConfigError> {
        match self.joints.get(joint).and_then(|o| o.damping_ratio) {
            Some(r) => non_negative(&format!("joints.{joint}.damping_ratio"), r).map(|_| r),
            None => non_negative("damping_ratio", self.damping_ratio).map(|_| self.damping_ratio),
        }
    }

    /// Velocity drive strength and default position damping, checked.
    pub fn drive_defaults(&self) -> Result<(f64, f64), ConfigError> {
        non_negative("default_drive_strength", self.default_drive_strength)?;
        non_negative(
            "default_position_drive_damping",
            self.default_position_drive_damping,
        )?;
        Ok((
            self.default_drive_strength,
            self.default_position_drive_damping,
        ))
    }

    #[must_use]
    pub fn with_merge_fixed_joints(mut self, on: bool) -> Self {
        self.merge_fixed_joints = on;
        self
    }

    #[must_use]
    pub fn with_collision_from_visual(mut self, on: bool) -> Self {
        self.collision_from_visual = on;
        self
    }

    #[must_use]
    pub fn with_import_inertia_tensor(mut self, on: bool) -> Self {
        self.import_inertia_tensor = on;
        self
    }

    #[must_use]
    pub fn with_fix_base(mut self, on: bool) -> Self {
        self.fix_base = on;
        self
    }

    #[must_use]
    pub fn with_density(mut self, density: f64) -> Self {
        self.density = density;
        self
    }

    #[must_use]
    pub fn with_default_drive_type(mut self, target: impl Into<String>) -> Self {
        self.default_drive_type = target.into();
        self
    }

    #[must_use]
    pub fn with_default_drive_strength(mut self, strength: f64) -> Self {
        self.default_drive_strength = strength;
        self
    }

    #[must_use]
    pub fn with_default_position_drive_damping(mut self, damping: f64) -> Self {
        self.default_position_drive_damping = damping;
        self
    }

    #[must_use]
    pub fn with_override_joint_dynamics(mut self, on: bool) -> Self {
        self.override_joint_dynamics = on;
        self
    }

    #[must_use]
    pub fn with_parse_mimic(mut self, on: bool) -> Self {
        self.parse_mimic = on;
        self
    }

    #[must_use]
    pub fn with_natural_frequency(mut self, hz: f64) -> Self {
        self.natural_frequency = hz;
        self
    }

    #[must_use]
    pub fn with_damping_ratio(mut self, ratio: f64) -> Self {
        self.damping_ratio = ratio;
        self
    }

    #[must_use]
    pub fn with_drive_type(mut self, drive_type: DriveType) -> Self {
        self.drive_type = drive_type;
        self
    }

    #[must_use]
    pub fn with_joint_override(mut self, joint: impl Into<String>, o: JointOverride) -> Self {
        self.joints.insert(joint.into(), o);
        self
    }
}

fn non_negative(parameter: &str, value: f64) -> Result<(), ConfigError> {
    if value.is_finite() && value >= 0.0 {
        Ok(())
    } else {
        Err(ConfigError::invalid_parameter(
            parameter,
            format!("expected a finite non-negative number, got {value}"),
        ))
    }
}

fn positive(parameter: &str, value: f64) -> Result<(), ConfigError> {
    if value.is_finite() && value > 0.0 {
        Ok(())
    } else {
        Err(ConfigError::invalid_parameter(
            parameter,
            format!("expected a finite positive number, got {value}"),
        ))
    }
}
