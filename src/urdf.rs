use std::ops::Range;
use std::path::Path;

use nalgebra::Vector3;
use tracing::{debug, error, info, warn};
use urdf_rs::read_from_string;

use super::asset::AssetRef;
use super::config::ImportConfig;
use super::error::ParseError;
use super::extensions::{parse_document, Extensions, InertialPresence, JointAnnotations};
use super::model::{
    AssetSource, Collision, Color, Dynamics, Geometry, Inertial, Joint, JointKind, Limit, Link,
    Material, Mimic, RobotModel, Visual, VisualMaterial,
};
use super::utils::*;

/// Parse a descriptor held in memory. Relative asset references stay relative.
///
/// Failures are logged before they are returned.
pub fn parse_str(xml: &str, config: &ImportConfig) -> Result<RobotModel, ParseError> {
    parse_with_root(xml, None, config).map_err(log_parse_error)
}

/// Parse `asset_root/relative_path`, resolving asset references against `asset_root`.
pub fn parse_file(
    asset_root: impl AsRef<Path>,
    relative_path: impl AsRef<Path>,
    config: &ImportConfig,
) -> Result<RobotModel, ParseError> {
    let asset_root = asset_root.as_ref();
    let relative_path = relative_path.as_ref();
    read_file(&asset_root.join(relative_path))
        .map_err(ParseError::from)
        .and_then(|xml| parse_with_root(&xml, Some(asset_root), config))
        .map(|mut model| {
            model.source.descriptor = Some(relative_path.to_path_buf());
            model
        })
        .map_err(log_parse_error)
}

fn log_parse_error(e: ParseError) -> ParseError {
    error!("robot description rejected: {}", e);
    e
}

impl RobotModel {
    pub fn from_urdf_str(xml: &str, config: &ImportConfig) -> Result<Self, ParseError> {
        parse_str(xml, config)
    }

    pub fn from_urdf_file(
        asset_root: impl AsRef<Path>,
        relative_path: impl AsRef<Path>,
        config: &ImportConfig,
    ) -> Result<Self, ParseError> {
        parse_file(asset_root, relative_path, config)
    }
}

fn parse_with_root(
    xml: &str,
    asset_root: Option<&Path>,
    config: &ImportConfig,
) -> Result<RobotModel, ParseError> {
    // the element tree carries everything the schema types drop
    let document = parse_document(xml)?;
    let ext = Extensions::from_document(&document, asset_root)?;

    let robot = if ext.rejected_materials.is_empty() {
        read_from_string(xml)
    } else {
        read_from_string(&strip_ranges(xml, &ext.rejected_materials))
    }
    .map_err(|e| ParseError::Schema(e.to_string()))?;

    let mut model = RobotModel::new(robot.name.clone());
    model.source = AssetSource {
        asset_root: asset_root.map(Path::to_path_buf),
        descriptor: None,
    };
    for material in &ext.materials {
        model.materials.insert(material.name.clone(), material.clone());
    }

    for urdf_link in &robot.links {
        if model.links.contains_key(&urdf_link.name) {
            return Err(ParseError::DuplicateLink(urdf_link.name.clone()));
        }
        let presence = ext
            .inertials
            .get(&urdf_link.name)
            .copied()
            .unwrap_or_default();
        let link = convert_link(urdf_link, presence, asset_root, config, &mut model)?;
        model.links.insert(link.name.clone(), link);
    }

    for urdf_joint in &robot.joints {
        if model.joints.contains_key(&urdf_joint.name) {
            return Err(ParseError::DuplicateJoint(urdf_joint.name.clone()));
        }
        let annotations = ext
            .joints
            .get(&urdf_joint.name)
            .copied()
            .unwrap_or_default();
        let joint = convert_joint(urdf_joint, annotations, config)?;
        model.joints.insert(joint.name.clone(), joint);
    }

    for joint in ext.loop_joints {
        if model.joints.contains_key(&joint.name) {
            return Err(ParseError::DuplicateJoint(joint.name));
        }
        for end in [&joint.parent, &joint.child] {
            if !model.links.contains_key(end) {
                return Err(ParseError::UnknownLink {
                    element: "loop_joint",
                    name: joint.name.clone(),
                    link: end.clone(),
                });
            }
        }
        model.joints.insert(joint.name.clone(), joint);
    }

    link_mimics(&mut model);

    for decl in ext.fixed_frames {
        let link = model
            .links
            .get_mut(&decl.parent)
            .ok_or_else(|| ParseError::UnknownLink {
                element: "fixed_frame",
                name: decl.frame.name.clone(),
                link: decl.parent.clone(),
            })?;
        link.frames.push(decl.frame);
    }

    for decl in ext.sensors {
        let link = model
            .links
            .get_mut(&decl.parent)
            .ok_or_else(|| ParseError::UnknownLink {
                element: "sensor",
                name: decl.sensor.name.clone(),
                link: decl.parent.clone(),
            })?;
        link.sensors.push(decl.sensor);
    }

    info!(
        "parsed robot '{}': {} links, {} joints, {} materials",
        model.name,
        model.links.len(),
        model.joints.len(),
        model.materials.len()
    );
    Ok(model)
}

/// Copy of `xml` without the given byte ranges.
fn strip_ranges(xml: &str, ranges: &[Range<usize>]) -> String {
    let mut sorted = ranges.to_vec();
    sorted.sort_by_key(|r| r.start);
    let mut out = String::with_capacity(xml.len());
    let mut cursor = 0;
    for r in sorted {
        if r.start >= cursor {
            out.push_str(&xml[cursor..r.start]);
            cursor = r.end;
        }
    }
    out.push_str(&xml[cursor..]);
    out
}

fn convert_link(
    urdf_link: &urdf_rs::Link,
    presence: InertialPresence,
    asset_root: Option<&Path>,
    config: &ImportConfig,
    model: &mut RobotModel,
) -> Result<Link, ParseError> {
    let mut link = Link::new(urdf_link.name.clone());

    // an omitted <inertial> leaves the link massless
    if presence.inertial {
        let i = &urdf_link.inertial;
        link.inertial = Some(Inertial {
            origin: pose_to_isometry(&i.origin),
            mass: if presence.mass { i.mass.value } else { 0.0 },
            inertia: (presence.inertia && config.import_inertia_tensor)
                .then(|| urdf_inertia(&i.inertia)),
        });
    }

    for v in &urdf_link.visual {
        let material = match &v.material {
            Some(m) => visual_material(m, asset_root, model)?,
            None => None,
        };
        link.visuals.push(Visual {
            name: v.name.clone(),
            origin: pose_to_isometry(&v.origin),
            geometry: convert_geometry(&v.geometry, asset_root)?,
            material,
        });
    }

    for c in &urdf_link.collision {
        link.collisions.push(Collision {
            name: c.name.clone(),
            origin: pose_to_isometry(&c.origin),
            geometry: convert_geometry(&c.geometry, asset_root)?,
        });
    }

    Ok(link)
}

fn convert_geometry(
    geometry: &urdf_rs::Geometry,
    asset_root: Option<&Path>,
) -> Result<Geometry, ParseError> {
    let g = match geometry {
        urdf_rs::Geometry::Box { size } => Geometry::Box {
            size: Vector3::new(size[0], size[1], size[2]),
        },
        urdf_rs::Geometry::Cylinder { radius, length } => Geometry::Cylinder {
            radius: *radius,
            length: *length,
        },
        urdf_rs::Geometry::Capsule { radius, length } => Geometry::Capsule {
            radius: *radius,
            length: *length,
        },
        urdf_rs::Geometry::Sphere { radius } => Geometry::Sphere { radius: *radius },
        urdf_rs::Geometry::Mesh { filename, scale } => Geometry::Mesh {
            source: AssetRef::parse(filename, asset_root)?,
            scale: scale.as_ref().map_or_else(
                || Vector3::new(1.0, 1.0, 1.0),
                |s| Vector3::new(s[0], s[1], s[2]),
            ),
        },
    };
    Ok(g)
}

fn visual_material(
    m: &urdf_rs::Material,
    asset_root: Option<&Path>,
    model: &mut RobotModel,
) -> Result<Option<VisualMaterial>, ParseError> {
    let color = m.color.as_ref().map(|c| {
        let rgba = &c.rgba;
        Color::new(rgba[0], rgba[1], rgba[2], rgba[3])
    });
    let texture = match &m.texture {
        Some(t) => Some(AssetRef::parse(&t.filename, asset_root)?),
        None => None,
    };

    let name = m.name.trim();
    if name.is_empty() {
        if color.is_none() && texture.is_none() {
            return Ok(None);
        }
        return Ok(Some(VisualMaterial::Inline { color, texture }));
    }

    let defines = color.is_some() || texture.is_some();
    if !model.materials.contains_key(name) {
        if defines {
            // named inline definitions join the robot table
            model.materials.insert(
                name.to_string(),
                Material {
                    name: name.to_string(),
                    color,
                    texture,
                },
            );
        } else {
            warn!("visual references undeclared material '{}'", name);
        }
    }
    Ok(Some(VisualMaterial::Named(name.to_string())))
}

fn convert_joint_kind(joint: &urdf_rs::Joint) -> Result<JointKind, ParseError> {
    match joint.joint_type {
        urdf_rs::JointType::Revolute => Ok(JointKind::Revolute),
        urdf_rs::JointType::Continuous => Ok(JointKind::Continuous),
        urdf_rs::JointType::Prismatic => Ok(JointKind::Prismatic),
        urdf_rs::JointType::Fixed => Ok(JointKind::Fixed),
        urdf_rs::JointType::Floating => Ok(JointKind::Floating),
        urdf_rs::JointType::Planar => Ok(JointKind::Planar),
        #[allow(unreachable_patterns)]
        ref other => Err(ParseError::invalid_attribute(
            "type",
            format!("joint '{}'", joint.name),
            format!("unsupported joint type {other:?}"),
        )),
    }
}

fn convert_joint(
    urdf_joint: &urdf_rs::Joint,
    annotations: JointAnnotations,
    config: &ImportConfig,
) -> Result<Joint, ParseError> {
    let kind = convert_joint_kind(urdf_joint)?;
    let label = format!("joint '{}'", urdf_joint.name);

    let mut joint = Joint::new(
        urdf_joint.name.clone(),
        kind,
        urdf_joint.parent.link.clone(),
        urdf_joint.child.link.clone(),
    )
    .with_origin(pose_to_isometry(&urdf_joint.origin));
    joint.dont_collapse = annotations.dont_collapse;

    if annotations.has_axis {
        joint.axis = unit_axis(urdf_joint.axis.xyz.0).ok_or_else(|| {
            ParseError::invalid_attribute("xyz", label.clone(), "axis must be non-zero")
        })?;
    }

    match kind {
        JointKind::Revolute | JointKind::Prismatic => {
            if !annotations.has_limit {
                return Err(ParseError::missing_element("limit", label));
            }
            let l = &urdf_joint.limit;
            if l.lower > l.upper {
                return Err(ParseError::invalid_attribute(
                    "lower",
                    label,
                    format!("lower limit {} exceeds upper limit {}", l.lower, l.upper),
                ));
            }
            joint.limit = Some(Limit {
                lower: l.lower,
                upper: l.upper,
                effort: l.effort,
                velocity: l.velocity,
            });
        }
        JointKind::Continuous
        | JointKind::Fixed
        | JointKind::Floating
        | JointKind::Planar
        | JointKind::Loop(_) => {}
    }

    joint.dynamics = urdf_joint.dynamics.as_ref().map(|d| Dynamics {
        damping: d.damping,
        friction: d.friction,
    });

    if config.parse_mimic {
        joint.mimic = urdf_joint.mimic.as_ref().map(|m| Mimic {
            joint: m.joint.clone(),
            multiplier: m.multiplier.unwrap_or(1.0),
            offset: m.offset.unwrap_or(0.0),
        });
    }

    Ok(joint)
}

/// Fill `mimic_children`, dropping relations to joints that do not exist.
fn link_mimics(model: &mut RobotModel) {
    let relations: Vec<(String, String)> = model
        .joints
        .values()
        .filter_map(|j| j.mimic.as_ref().map(|m| (j.name.clone(), m.joint.clone())))
        .collect();

    for (follower, leader) in relations {
        match model.joints.get_mut(&leader) {
            Some(l) => {
                debug!("joint '{}' mimics '{}'", follower, leader);
                l.mimic_children.push(follower);
            }
            None => {
                warn!(
                    "joint '{}' mimics unknown joint '{}', dropping the relation",
                    follower, leader
                );
                if let Some(f) = model.joints.get_mut(&follower) {
                    f.mimic = None;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;
    use nalgebra::Isometry3;

    use super::*;
    use crate::asset::AssetLocation;
    use crate::model::{FrameSource, LoopMotion, SensorKind};

    const BASIC: &str = "./urdf/tests/test_basic.urdf";

    fn basic() -> RobotModel {
        parse_file("./urdf/tests", "test_basic.urdf", &ImportConfig::default()).unwrap()
    }

    #[test]
    fn from_urdf_test() {
        let model = basic();
        assert_eq!(model.name, "test_basic");
        assert_eq!(model.links.len(), 8);
        assert_eq!(model.joints.len(), 7);
        assert_eq!(
            model.source.descriptor.as_deref(),
            Some(Path::new("test_basic.urdf"))
        );
        // tree linkage is the chain builder's job
        assert!(model.links.values().all(|l| l.parent.is_none()));
    }

    #[test]
    fn defaults_are_applied() {
        let model = basic();
        let fixed = model.joint("root_to_base").unwrap();
        assert_eq!(fixed.origin, Isometry3::identity());
        assert_relative_eq!(fixed.axis, Vector3::x());

        let elbow = model.joint("elbow_joint").unwrap();
        assert_eq!(elbow.kind, JointKind::Revolute);
        let limit = elbow.limit.unwrap();
        assert_relative_eq!(limit.lower, -0.6);
        assert_relative_eq!(limit.upper, 0.6);
        assert_relative_eq!(elbow.axis, Vector3::y());
    }

    #[test]
    fn omitted_inertial_is_massless() {
        let model = basic();
        assert!(model.link("root_link").unwrap().inertial.is_none());
        assert!(model.link("root_link").unwrap().is_massless());
        assert_relative_eq!(model.link("base_link").unwrap().mass(), 10.0);
    }

    #[test]
    fn geometry_and_materials() {
        let model = basic();
        let base = model.link("base_link").unwrap();
        assert_eq!(base.collisions[0].geometry, Geometry::Sphere { radius: 0.1 });

        let palm = model.link("palm_link").unwrap();
        let Geometry::Mesh { source, scale } = &palm.visuals[0].geometry else {
            panic!("expected mesh");
        };
        assert_eq!(source.scheme.as_deref(), Some("package"));
        assert_eq!(
            source.location,
            AssetLocation::File(Path::new("./urdf/tests").join("test_basic/meshes/palm.stl"))
        );
        assert_relative_eq!(*scale, Vector3::new(1.0, 1.0, 1.0));
        assert_eq!(
            palm.visuals[0].material,
            Some(VisualMaterial::Named("blue".into()))
        );
        assert!(model.material("blue").is_ok());
    }

    #[test]
    fn inertia_tensor_can_be_dropped() {
        let config = ImportConfig::default().with_import_inertia_tensor(false);
        let model = parse_file("./urdf/tests", "test_basic.urdf", &config).unwrap();
        let inertial = model.link("base_link").unwrap().inertial.clone().unwrap();
        assert_relative_eq!(inertial.mass, 10.0);
        assert!(inertial.inertia.is_none());
    }

    #[test]
    fn read_file_and_str_agree() {
        let xml = read_file(Path::new(BASIC)).unwrap();
        let model = parse_str(&xml, &ImportConfig::default()).unwrap();
        assert_eq!(model.links.len(), basic().links.len());
        assert!(model.source.asset_root.is_none());
    }

    const EXTENDED: &str = r#"<?xml version="1.0"?>
<robot name="extended">
  <material name="red"><color rgba="1 0 0 1"/></material>
  <material><color rgba="0 1 0 1"/></material>
  <link name="base">
    <inertial><mass value="2"/><inertia ixx="1" ixy="0" ixz="0" iyy="1" iyz="0" izz="1"/></inertial>
    <visual><geometry><box size="1 1 1"/></geometry><material name="red"/></visual>
  </link>
  <link name="arm"><inertial><mass value="1"/><inertia ixx="1" ixy="0" ixz="0" iyy="1" iyz="0" izz="1"/></inertial></link>
  <link name="tip"/>
  <joint name="shoulder" type="continuous">
    <parent link="base"/><child link="arm"/><axis xyz="0 0 1"/>
  </joint>
  <joint name="finger" type="continuous">
    <parent link="arm"/><child link="tip"/>
    <mimic joint="shoulder" multiplier="2"/>
  </joint>
  <loop_joint name="closure" type="revolute">
    <link1 link="base" xyz="0 0 1"/>
    <link2 link="tip"/>
  </loop_joint>
  <fixed_frame name="flange"><parent link="arm"/><origin xyz="0 0 0.5"/></fixed_frame>
  <sensor name="cam" type="camera">
    <parent link="tip"/>
    <camera><image width="320" height="240"/></camera>
  </sensor>
</robot>"#;

    #[test]
    fn extensions_are_merged_into_the_model() {
        let model = parse_str(EXTENDED, &ImportConfig::default()).unwrap();
        assert_eq!(model.materials.len(), 1);

        let closure = model.joint("closure").unwrap();
        assert_eq!(closure.kind, JointKind::Loop(LoopMotion::Revolute));
        assert_eq!(model.loop_joints().count(), 1);

        let arm = model.link("arm").unwrap();
        assert_eq!(arm.frames[0].name, "flange");
        assert_eq!(arm.frames[0].source, FrameSource::Declared);

        let tip = model.link("tip").unwrap();
        assert!(matches!(tip.sensors[0].kind, SensorKind::Camera(_)));
    }

    #[test]
    fn mimic_relations() {
        let model = parse_str(EXTENDED, &ImportConfig::default()).unwrap();
        let finger = model.joint("finger").unwrap();
        let mimic = finger.mimic.as_ref().unwrap();
        assert_eq!(mimic.joint, "shoulder");
        assert_relative_eq!(mimic.multiplier, 2.0);
        assert_relative_eq!(mimic.offset, 0.0);
        assert_eq!(model.joint("shoulder").unwrap().mimic_children, vec!["finger"]);

        let config = ImportConfig::default().with_parse_mimic(false);
        let model = parse_str(EXTENDED, &config).unwrap();
        assert!(model.joint("finger").unwrap().mimic.is_none());
        assert!(model.joint("shoulder").unwrap().mimic_children.is_empty());
    }

    #[test]
    fn revolute_without_limit_is_rejected() {
        let xml = r#"<robot name="r">
  <link name="a"/><link name="b"/>
  <joint name="j" type="revolute"><parent link="a"/><child link="b"/></joint>
</robot>"#;
        assert!(matches!(
            parse_str(xml, &ImportConfig::default()),
            Err(ParseError::MissingElement { element: "limit", .. })
        ));
    }

    #[test]
    fn duplicate_names_are_rejected() {
        let xml = r#"<robot name="r"><link name="a"/><link name="a"/></robot>"#;
        assert!(matches!(
            parse_str(xml, &ImportConfig::default()),
            Err(ParseError::DuplicateLink(name)) if name == "a"
        ));
    }

    #[test]
    fn malformed_input() {
        assert!(matches!(
            parse_str("<robot name=\"r\"><link name=\"a\">", &ImportConfig::default()),
            Err(ParseError::Xml(_))
        ));
        let bad_mesh = r#"<robot name="r"><link name="a">
  <visual><geometry><mesh filename="package://"/></geometry></visual>
</link></robot>"#;
        assert!(matches!(
            parse_str(bad_mesh, &ImportConfig::default()),
            Err(ParseError::UnresolvableAssetRef(_))
        ));
        let orphan_frame = r#"<robot name="r"><link name="a"/>
  <fixed_frame name="f"><parent link="ghost"/></fixed_frame>
</robot>"#;
        assert!(matches!(
            parse_str(orphan_frame, &ImportConfig::default()),
            Err(ParseError::UnknownLink { element: "fixed_frame", .. })
        ));
    }

    #[test]
    fn strip_ranges_test() {
        assert_eq!(strip_ranges("abcdef", &[3..4, 0..1]), "bcef");
    }
}
