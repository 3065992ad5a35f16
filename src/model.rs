//! In-memory robot model.
//!
//! Links, joints and materials are owned by the [`RobotModel`] maps and refer to each
//! other by name only.

use std::collections::BTreeMap;
use std::f64::consts::PI;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use nalgebra::{Isometry3, Matrix3, Rotation3, SymmetricEigen, UnitQuaternion, Vector3};
use serde::{Deserialize, Serialize};

use crate::asset::AssetRef;
use crate::error::NotFoundError;

/// Mass given to a body that would otherwise end up with none.
pub const NEGLIGIBLE_MASS: f64 = 1e-8;
/// Diagonal inertia paired with [`NEGLIGIBLE_MASS`].
pub const NEGLIGIBLE_INERTIA: f64 = 1e-4;

/// Mass properties of a link.
#[derive(Debug, Clone, PartialEq)]
pub struct Inertial {
    /// Center-of-mass frame relative to the link frame.
    pub origin: Isometry3<f64>,
    /// Mass in kg.
    pub mass: f64,
    /// Inertia tensor about the center of mass, in the `origin` frame. `None` when
    /// the descriptor gave none or tensors are not imported.
    pub inertia: Option<Matrix3<f64>>,
}

impl Default for Inertial {
    fn default() -> Self {
        Self {
            origin: Isometry3::identity(),
            mass: 0.0,
            inertia: None,
        }
    }
}

impl Inertial {
    pub fn new(mass: f64, inertia: Matrix3<f64>) -> Self {
        Self {
            origin: Isometry3::identity(),
            mass,
            inertia: Some(inertia),
        }
    }

    #[must_use]
    pub fn with_origin(mut self, origin: Isometry3<f64>) -> Self {
        self.origin = origin;
        self
    }

    /// Stand-in for a massless body.
    pub fn negligible() -> Self {
        Self::new(
            NEGLIGIBLE_MASS,
            Matrix3::from_diagonal_element(NEGLIGIBLE_INERTIA),
        )
    }

    /// Zero mass and zero (or missing) inertia.
    pub fn is_massless(&self) -> bool {
        self.mass <= 0.0 && self.inertia.map_or(true, |i| i.iter().all(|v| *v == 0.0))
    }

    /// Inertia tensor, zero when absent.
    pub fn inertia_or_zero(&self) -> Matrix3<f64> {
        self.inertia.unwrap_or_else(Matrix3::zeros)
    }

    /// Diagonal inertia and the rotation from the principal frame to the `origin` frame.
    pub fn principal_axes(&self) -> Option<(Vector3<f64>, UnitQuaternion<f64>)> {
        let inertia = self.inertia?;
        let eigen = SymmetricEigen::new(inertia);
        let mut axes = eigen.eigenvectors;
        if axes.determinant() < 0.0 {
            let flipped: Vector3<f64> = -axes.column(2).into_owned();
            axes.set_column(2, &flipped);
        }
        let rotation = UnitQuaternion::from_rotation_matrix(&Rotation3::from_matrix_unchecked(axes));
        Some((eigen.eigenvalues, rotation))
    }
}

/// Build a symmetric tensor from the six URDF components.
pub fn inertia_matrix(ixx: f64, ixy: f64, ixz: f64, iyy: f64, iyz: f64, izz: f64) -> Matrix3<f64> {
    Matrix3::new(ixx, ixy, ixz, ixy, iyy, iyz, ixz, iyz, izz)
}

/// Shape of a visual or collision element.
#[derive(Debug, Clone, PartialEq)]
pub enum Geometry {
    Box { size: Vector3<f64> },
    Cylinder { radius: f64, length: f64 },
    Capsule { radius: f64, length: f64 },
    Sphere { radius: f64 },
    Mesh { source: AssetRef, scale: Vector3<f64> },
}

impl Geometry {
    /// Enclosed volume of primitive shapes. Meshes have no known volume here.
    pub fn volume(&self) -> Option<f64> {
        match self {
            Self::Box { size } => Some(size.x * size.y * size.z),
            Self::Cylinder { radius, length } => Some(PI * radius * radius * length),
            Self::Capsule { radius, length } => {
                Some(PI * radius * radius * length + 4.0 / 3.0 * PI * radius.powi(3))
            }
            Self::Sphere { radius } => Some(4.0 / 3.0 * PI * radius.powi(3)),
            Self::Mesh { .. } => None,
        }
    }
}

/// RGBA color, components in `[0, 1]`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Color {
    pub r: f64,
    pub g: f64,
    pub b: f64,
    pub a: f64,
}

impl Color {
    pub fn new(r: f64, g: f64, b: f64, a: f64) -> Self {
        Self { r, g, b, a }
    }
}

/// A named material from the robot-level material table.
#[derive(Debug, Clone, PartialEq)]
pub struct Material {
    pub name: String,
    pub color: Option<Color>,
    pub texture: Option<AssetRef>,
}

/// Material of a visual element.
#[derive(Debug, Clone, PartialEq)]
pub enum VisualMaterial {
    /// Lookup key into [`RobotModel::materials`].
    Named(String),
    /// Anonymous material defined in place.
    Inline {
        color: Option<Color>,
        texture: Option<AssetRef>,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Visual {
    pub name: Option<String>,
    /// Pose relative to the owning link.
    pub origin: Isometry3<f64>,
    pub geometry: Geometry,
    pub material: Option<VisualMaterial>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Collision {
    pub name: Option<String>,
    /// Pose relative to the owning link.
    pub origin: Isometry3<f64>,
    pub geometry: Geometry,
}

impl From<&Visual> for Collision {
    fn from(visual: &Visual) -> Self {
        Self {
            name: visual.name.clone(),
            origin: visual.origin,
            geometry: visual.geometry.clone(),
        }
    }
}

/// Where a sensor's backend configuration comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SensorConfigRef {
    /// Name of a preset known to the sink.
    Preset(String),
    /// Configuration file on disk.
    File(PathBuf),
}

#[derive(Debug, Clone, PartialEq)]
pub struct CameraParams {
    pub update_rate: f64,
    pub width: f64,
    pub height: f64,
    pub format: Option<String>,
    pub clip_near: f64,
    pub clip_far: f64,
    pub hfov: f64,
}

/// One scan dimension of a ray sensor.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RayDimension {
    pub samples: usize,
    pub resolution: f64,
    pub min_angle: f64,
    pub max_angle: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LidarParams {
    pub update_rate: f64,
    pub horizontal: Option<RayDimension>,
    pub vertical: Option<RayDimension>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SensorKind {
    Camera(CameraParams),
    Lidar(LidarParams),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Sensor {
    pub name: String,
    /// Pose relative to the owning link.
    pub origin: Isometry3<f64>,
    pub kind: SensorKind,
    pub config: Option<SensorConfigRef>,
}

/// How a reference frame came to exist.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameSource {
    /// Declared with `<fixed_frame>`.
    Declared,
    /// A link welded into its parent through the named fixed joint.
    MergedLink { joint: String },
}

/// Named pose kept on a link without a rigid body of its own.
#[derive(Debug, Clone, PartialEq)]
pub struct ReferenceFrame {
    pub name: String,
    /// Pose relative to the owning link.
    pub pose: Isometry3<f64>,
    pub source: FrameSource,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Link {
    pub name: String,
    pub inertial: Option<Inertial>,
    pub visuals: Vec<Visual>,
    pub collisions: Vec<Collision>,
    pub sensors: Vec<Sensor>,
    pub frames: Vec<ReferenceFrame>,
    /// Parent link, `None` for the root. Filled in by the chain builder.
    pub parent: Option<String>,
    /// Tree joint connecting this link to its parent.
    pub parent_joint: Option<String>,
    /// Child links through tree joints, in joint-name order.
    pub children: Vec<String>,
}

impl Link {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            inertial: None,
            visuals: Vec::new(),
            collisions: Vec::new(),
            sensors: Vec::new(),
            frames: Vec::new(),
            parent: None,
            parent_joint: None,
            children: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_inertial(mut self, inertial: Inertial) -> Self {
        self.inertial = Some(inertial);
        self
    }

    #[must_use]
    pub fn with_collision(mut self, collision: Collision) -> Self {
        self.collisions.push(collision);
        self
    }

    pub fn is_massless(&self) -> bool {
        self.inertial.as_ref().map_or(true, Inertial::is_massless)
    }

    /// Mass, zero when unspecified.
    pub fn mass(&self) -> f64 {
        self.inertial.as_ref().map_or(0.0, |i| i.mass)
    }

    /// Has mass or geometry that a physics backend would simulate.
    pub fn has_body(&self) -> bool {
        !self.is_massless() || !self.visuals.is_empty() || !self.collisions.is_empty()
    }

    pub fn frame(&self, name: &str) -> Option<&ReferenceFrame> {
        self.frames.iter().find(|f| f.name == name)
    }

    /// Names of the links welded into this one.
    pub fn merged_link_names(&self) -> impl Iterator<Item = &str> {
        self.frames
            .iter()
            .filter(|f| matches!(f.source, FrameSource::MergedLink { .. }))
            .map(|f| f.name.as_str())
    }
}

/// Constraint type of a loop-closing joint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopMotion {
    Spherical,
    Revolute,
    Prismatic,
    Fixed,
}

impl FromStr for LoopMotion {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "spherical" => Ok(Self::Spherical),
            "revolute" | "continuous" => Ok(Self::Revolute),
            "prismatic" => Ok(Self::Prismatic),
            "fixed" => Ok(Self::Fixed),
            other => Err(other.to_string()),
        }
    }
}

/// Kinematic kind of a joint.
///
/// `Loop` joints close kinematic loops; they never take part in the spanning tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JointKind {
    Revolute,
    Continuous,
    Prismatic,
    Fixed,
    Floating,
    Planar,
    Loop(LoopMotion),
}

impl JointKind {
    /// Part of the spanning tree.
    pub fn is_tree(self) -> bool {
        !matches!(self, Self::Loop(_))
    }
}

impl fmt::Display for JointKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Revolute => "revolute",
            Self::Continuous => "continuous",
            Self::Prismatic => "prismatic",
            Self::Fixed => "fixed",
            Self::Floating => "floating",
            Self::Planar => "planar",
            Self::Loop(_) => "loop",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Limit {
    pub lower: f64,
    pub upper: f64,
    pub effort: f64,
    pub velocity: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Dynamics {
    pub damping: f64,
    pub friction: f64,
}

/// This joint follows `joint` as `multiplier * q + offset`.
#[derive(Debug, Clone, PartialEq)]
pub struct Mimic {
    pub joint: String,
    pub multiplier: f64,
    pub offset: f64,
}

/// What a joint drive tracks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DriveTarget {
    None,
    Position,
    Velocity,
}

impl FromStr for DriveTarget {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "none" => Ok(Self::None),
            "position" => Ok(Self::Position),
            "velocity" => Ok(Self::Velocity),
            _ => Err(s.to_string()),
        }
    }
}

impl fmt::Display for DriveTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::None => "none",
            Self::Position => "position",
            Self::Velocity => "velocity",
        };
        f.write_str(s)
    }
}

/// Whether drive gains act on force or directly on acceleration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DriveType {
    #[default]
    Force,
    Acceleration,
}

/// Computed drive gains of a joint.
#[derive(Debug, Clone, PartialEq)]
pub struct Drive {
    /// `None` when the configured target could not be resolved.
    pub target: Option<DriveTarget>,
    pub drive_type: DriveType,
    /// Hz.
    pub natural_frequency: f64,
    pub damping_ratio: f64,
    /// Subtree inertia reflected onto the joint axis.
    pub effective_inertia: f64,
    pub strength: f64,
    pub damping: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Joint {
    pub name: String,
    pub kind: JointKind,
    pub parent: String,
    pub child: String,
    /// Joint frame in the parent link frame.
    pub origin: Isometry3<f64>,
    /// Joint frame in the child link frame. Identity for tree joints.
    pub child_origin: Isometry3<f64>,
    /// Unit motion axis in the joint frame.
    pub axis: Vector3<f64>,
    pub dynamics: Option<Dynamics>,
    pub limit: Option<Limit>,
    pub mimic: Option<Mimic>,
    /// Joints that mimic this one.
    pub mimic_children: Vec<String>,
    /// Keep the child as its own body even when the joint is fixed.
    pub dont_collapse: bool,
    pub drive: Option<Drive>,
}

impl Joint {
    pub fn new(
        name: impl Into<String>,
        kind: JointKind,
        parent: impl Into<String>,
        child: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            kind,
            parent: parent.into(),
            child: child.into(),
            origin: Isometry3::identity(),
            child_origin: Isometry3::identity(),
            axis: Vector3::x(),
            dynamics: None,
            limit: None,
            mimic: None,
            mimic_children: Vec::new(),
            dont_collapse: false,
            drive: None,
        }
    }

    #[must_use]
    pub fn with_origin(mut self, origin: Isometry3<f64>) -> Self {
        self.origin = origin;
        self
    }

    #[must_use]
    pub fn with_axis(mut self, axis: Vector3<f64>) -> Self {
        self.axis = axis;
        self
    }

    #[must_use]
    pub fn with_limit(mut self, limit: Limit) -> Self {
        self.limit = Some(limit);
        self
    }

    #[must_use]
    pub fn with_dynamics(mut self, dynamics: Dynamics) -> Self {
        self.dynamics = Some(dynamics);
        self
    }
}

/// Where the descriptor was read from.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AssetSource {
    /// Base directory for relative asset references.
    pub asset_root: Option<PathBuf>,
    /// Descriptor path relative to `asset_root`, if read from a file.
    pub descriptor: Option<PathBuf>,
}

/// Fixed attachment of the robot base to the world.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BaseAnchor {
    /// Name of the anchoring joint.
    pub joint: String,
    /// The link held in place.
    pub link: String,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RobotModel {
    pub name: String,
    /// Resolved by the chain builder.
    pub root_link: Option<String>,
    pub links: BTreeMap<String, Link>,
    pub joints: BTreeMap<String, Joint>,
    pub materials: BTreeMap<String, Material>,
    pub source: AssetSource,
    /// Set by the collapser when the robot is fixed-base.
    pub anchor: Option<BaseAnchor>,
}

impl RobotModel {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    #[must_use]
    pub fn with_link(mut self, link: Link) -> Self {
        self.links.insert(link.name.clone(), link);
        self
    }

    #[must_use]
    pub fn with_joint(mut self, joint: Joint) -> Self {
        self.joints.insert(joint.name.clone(), joint);
        self
    }

    pub fn link(&self, name: &str) -> Result<&Link, NotFoundError> {
        self.links.get(name).ok_or_else(|| NotFoundError::link(name))
    }

    pub fn joint(&self, name: &str) -> Result<&Joint, NotFoundError> {
        self.joints.get(name).ok_or_else(|| NotFoundError::joint(name))
    }

    pub fn material(&self, name: &str) -> Result<&Material, NotFoundError> {
        self.materials
            .get(name)
            .ok_or_else(|| NotFoundError::material(name))
    }

    /// Joints of the spanning tree, in name order.
    pub fn tree_joints(&self) -> impl Iterator<Item = &Joint> {
        self.joints.values().filter(|j| j.kind.is_tree())
    }

    /// Loop-closing joints, in name order.
    pub fn loop_joints(&self) -> impl Iterator<Item = &Joint> {
        self.joints.values().filter(|j| !j.kind.is_tree())
    }
}
