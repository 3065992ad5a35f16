//! Joint drive gains from a target natural frequency.
//!
//! A drive is modelled as a single degree of freedom oscillator whose inertia is the
//! whole subtree below the joint reflected onto the joint's motion axis.

use std::f64::consts::PI;

use nalgebra::Vector6;
use tracing::{debug, error};

use crate::config::ImportConfig;
use crate::chain::link_topology;
use crate::error::{ConfigError, NotFoundError, TopologyError};
use crate::model::{Drive, DriveTarget, DriveType, Inertial, Joint, JointKind, RobotModel};
use crate::spatial_inertial::{link_spatial_inertial, subtree_spatial_inertial};

/// Outcome of a synthesis pass.
#[derive(Debug, Default)]
pub struct DriveReport {
    /// Joints that received a drive.
    pub driven: usize,
    /// Per-joint configuration problems. Those joints carry zero gains.
    pub errors: Vec<ConfigError>,
}

/// Unit motion of the joint, `[angular; linear]`, or `None` for joints without a drive.
fn motion_subspace(joint: &Joint) -> Option<Vector6<f64>> {
    let a = joint.axis;
    match joint.kind {
        JointKind::Revolute | JointKind::Continuous => {
            Some(Vector6::new(a.x, a.y, a.z, 0.0, 0.0, 0.0))
        }
        JointKind::Prismatic | JointKind::Planar | JointKind::Floating => {
            Some(Vector6::new(0.0, 0.0, 0.0, a.x, a.y, a.z))
        }
        JointKind::Fixed | JointKind::Loop(_) => None,
    }
}

/// Inertia of the subtree below `joint` as seen along its motion axis.
///
/// Reads the parent/child linkage, so the topology must have been linked.
///
/// Angular joints give a rotational inertia in kg m^2, linear joints a mass in kg. A
/// massless subtree counts as the negligible body. Joints without motion give zero.
pub fn effective_inertia(model: &RobotModel, joint: &str) -> Result<f64, NotFoundError> {
    let joint = model.joint(joint)?;
    let Some(s) = motion_subspace(joint) else {
        return Ok(0.0);
    };
    let (mut g, mass) = subtree_spatial_inertial(model, &joint.child);
    if mass <= 0.0 {
        g = link_spatial_inertial(&Inertial::negligible());
    }
    Ok((s.transpose() * g * s)[(0, 0)])
}

/// Position drive stiffness that gives `joint` a natural frequency of `frequency` Hz.
pub fn natural_stiffness(
    model: &RobotModel,
    joint: &str,
    frequency: f64,
) -> Result<f64, NotFoundError> {
    let omega = 2.0 * PI * frequency;
    Ok(effective_inertia(model, joint)? * omega * omega)
}

/// Drive numbers of one joint, every value checked.
struct DriveSettings {
    target: DriveTarget,
    drive_type: DriveType,
    natural_frequency: f64,
    damping_ratio: f64,
    velocity_strength: f64,
    position_damping: f64,
}

fn settings_for(config: &ImportConfig, joint: &str) -> Result<DriveSettings, ConfigError> {
    let (velocity_strength, position_damping) = config.drive_defaults()?;
    Ok(DriveSettings {
        target: config.drive_target_for(joint)?,
        drive_type: config.drive_type_for(joint),
        natural_frequency: config.natural_frequency_for(joint)?,
        damping_ratio: config.damping_ratio_for(joint)?,
        velocity_strength,
        position_damping,
    })
}

fn compute_drive(
    model: &RobotModel,
    joint: &Joint,
    settings: &DriveSettings,
    config: &ImportConfig,
) -> Result<Drive, NotFoundError> {
    let effective = effective_inertia(model, &joint.name)?;
    let inertia = match settings.drive_type {
        DriveType::Force => effective,
        DriveType::Acceleration => 1.0,
    };
    let omega = 2.0 * PI * settings.natural_frequency;
    let authored = joint.dynamics.map(|d| d.damping);

    let (strength, damping) = match settings.target {
        DriveTarget::None => (0.0, 0.0),
        DriveTarget::Position => {
            let damping = if config.override_joint_dynamics {
                2.0 * inertia * settings.damping_ratio * omega
            } else {
                authored.unwrap_or(settings.position_damping)
            };
            (inertia * omega * omega, damping)
        }
        DriveTarget::Velocity => {
            let damping = if config.override_joint_dynamics {
                0.0
            } else {
                authored.unwrap_or(0.0)
            };
            (settings.velocity_strength, damping)
        }
    };

    Ok(Drive {
        target: Some(settings.target),
        drive_type: settings.drive_type,
        natural_frequency: settings.natural_frequency,
        damping_ratio: settings.damping_ratio,
        effective_inertia: effective,
        strength,
        damping,
    })
}

/// Zero-gain drive for a joint whose configuration could not be applied.
fn inert_drive(config: &ImportConfig, joint: &str) -> Drive {
    Drive {
        target: None,
        drive_type: config.drive_type_for(joint),
        natural_frequency: 0.0,
        damping_ratio: 0.0,
        effective_inertia: 0.0,
        strength: 0.0,
        damping: 0.0,
    }
}

/// Compute the drive of every moving tree joint.
///
/// Links the topology first if that has not happened yet. Every pass starts from
/// scratch, so running it again with the same configuration yields the same gains.
/// Fixed and loop joints end up without a drive.
pub fn synthesize_drives(
    model: &mut RobotModel,
    config: &ImportConfig,
) -> Result<DriveReport, TopologyError> {
    if model.root_link.is_none() {
        link_topology(model)?;
    }
    let mut report = DriveReport::default();
    let mut drives = Vec::with_capacity(model.joints.len());

    for joint in model.joints.values() {
        if motion_subspace(joint).is_none() {
            drives.push((joint.name.clone(), None));
            continue;
        }
        let drive = match settings_for(config, &joint.name) {
            Ok(settings) => match compute_drive(model, joint, &settings, config) {
                Ok(d) => d,
                Err(e) => {
                    error!("no drive for joint '{}': {}", joint.name, e);
                    inert_drive(config, &joint.name)
                }
            },
            Err(e) => {
                error!("joint '{}' keeps zero drive gains: {}", joint.name, e);
                report.errors.push(e);
                inert_drive(config, &joint.name)
            }
        };
        debug!(
            "drive '{}': strength {:.4e}, damping {:.4e}",
            joint.name, drive.strength, drive.damping
        );
        drives.push((joint.name.clone(), Some(drive)));
    }

    for (name, drive) in drives {
        if let Some(joint) = model.joints.get_mut(&name) {
            report.driven += usize::from(drive.is_some());
            joint.drive = drive;
        }
    }
    Ok(report)
}
