//! Descriptor content that the standard URDF schema does not carry.
//!
//! The document is read once more into a small element tree. From it come the
//! `<loop_joint>`, `<fixed_frame>` and `<sensor>` extensions, the `dont_collapse` joint
//! attribute, the robot-level material table and presence information that the schema
//! types fill with defaults (`<inertial>`, `<mass>`, `<inertia>`, `<axis>`, `<limit>`).

use std::ops::Range;
use std::path::Path;

use hashbrown::{HashMap, HashSet};
use nalgebra::Isometry3;
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use tracing::{error, warn};

use crate::asset::AssetRef;
use crate::error::ParseError;
use crate::model::{
    CameraParams, Color, FrameSource, Joint, JointKind, LidarParams, LoopMotion, Material,
    RayDimension, ReferenceFrame, Sensor, SensorConfigRef, SensorKind,
};
use crate::utils::{parse_floats, xyz_rpy_to_isometry};

/// One element of the descriptor with its byte range in the source text.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct XmlElement {
    pub name: String,
    pub attributes: Vec<(String, String)>,
    pub children: Vec<XmlElement>,
    pub text: String,
    pub span: Range<usize>,
}

impl XmlElement {
    fn from_start(e: &BytesStart, start: usize) -> Result<Self, ParseError> {
        let name = String::from_utf8(e.name().as_ref().to_vec())
            .map_err(|err| ParseError::Xml(err.to_string()))?;
        let mut attributes = Vec::new();
        for attr in e.attributes().flatten() {
            let key = String::from_utf8(attr.key.as_ref().to_vec())
                .map_err(|err| ParseError::Xml(err.to_string()))?;
            let value = attr
                .unescape_value()
                .map_err(|err| ParseError::Xml(err.to_string()))?
                .to_string();
            attributes.push((key, value));
        }
        Ok(Self {
            name,
            attributes,
            children: Vec::new(),
            text: String::new(),
            span: start..start,
        })
    }

    pub fn attr(&self, key: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn child(&self, name: &str) -> Option<&XmlElement> {
        self.children.iter().find(|c| c.name == name)
    }

    pub fn children_named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a XmlElement> {
        self.children.iter().filter(move |c| c.name == name)
    }

    fn required_attr(&self, key: &'static str) -> Result<&str, ParseError> {
        self.attr(key)
            .ok_or_else(|| ParseError::missing_attribute(key, self.label()))
    }

    /// `name` or `name 'value'` for messages.
    fn label(&self) -> String {
        match self.attr("name") {
            Some(n) => format!("{} '{}'", self.name, n),
            None => self.name.clone(),
        }
    }
}

/// Read `xml` into an element tree rooted at `<robot>`.
pub(crate) fn parse_document(xml: &str) -> Result<XmlElement, ParseError> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);
    let mut buf = Vec::new();
    let mut stack: Vec<XmlElement> = Vec::new();
    let mut root = None;

    loop {
        let start = reader.buffer_position() as usize;
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(ref e)) => stack.push(XmlElement::from_start(e, start)?),
            Ok(Event::Empty(ref e)) => {
                let mut element = XmlElement::from_start(e, start)?;
                element.span.end = reader.buffer_position() as usize;
                attach(&mut stack, &mut root, element);
            }
            Ok(Event::End(_)) => {
                let mut element = stack
                    .pop()
                    .ok_or_else(|| ParseError::Xml("unbalanced closing tag".into()))?;
                element.span.end = reader.buffer_position() as usize;
                attach(&mut stack, &mut root, element);
            }
            Ok(Event::Text(ref t)) => {
                if let Some(top) = stack.last_mut() {
                    let text = t.unescape().map_err(|e| ParseError::Xml(e.to_string()))?;
                    top.text.push_str(&text);
                }
            }
            Ok(Event::Eof) => break,
            Ok(_) => {}
            Err(e) => return Err(ParseError::Xml(e.to_string())),
        }
        buf.clear();
    }

    if let Some(open) = stack.last() {
        return Err(ParseError::Xml(format!("unclosed element <{}>", open.name)));
    }
    match root {
        Some(r) if r.name == "robot" => Ok(r),
        _ => Err(ParseError::missing_element("robot", "document")),
    }
}

fn attach(stack: &mut [XmlElement], root: &mut Option<XmlElement>, element: XmlElement) {
    match stack.last_mut() {
        Some(parent) => parent.children.push(element),
        None if root.is_none() => *root = Some(element),
        None => {}
    }
}

/// Which parts of `<inertial>` a link actually wrote.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct InertialPresence {
    pub inertial: bool,
    pub mass: bool,
    pub inertia: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct JointAnnotations {
    pub dont_collapse: bool,
    pub has_axis: bool,
    pub has_limit: bool,
}

/// A `<fixed_frame>` declaration.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct FixedFrameDecl {
    pub parent: String,
    pub frame: ReferenceFrame,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct SensorDecl {
    pub parent: String,
    pub sensor: Sensor,
}

/// Everything gathered from the element tree.
#[derive(Debug, Default)]
pub(crate) struct Extensions {
    pub materials: Vec<Material>,
    /// Byte ranges of robot-level materials that were rejected.
    pub rejected_materials: Vec<Range<usize>>,
    pub inertials: HashMap<String, InertialPresence>,
    pub joints: HashMap<String, JointAnnotations>,
    pub fixed_frames: Vec<FixedFrameDecl>,
    pub loop_joints: Vec<Joint>,
    pub sensors: Vec<SensorDecl>,
}

impl Extensions {
    pub fn from_document(root: &XmlElement, asset_root: Option<&Path>) -> Result<Self, ParseError> {
        let mut ext = Self::default();
        ext.read_materials(root, asset_root)?;

        for link in root.children_named("link") {
            let Some(name) = link.attr("name") else {
                continue;
            };
            let inertial = link.child("inertial");
            ext.inertials.insert(
                name.to_string(),
                InertialPresence {
                    inertial: inertial.is_some(),
                    mass: inertial.is_some_and(|i| i.child("mass").is_some()),
                    inertia: inertial.is_some_and(|i| i.child("inertia").is_some()),
                },
            );
        }

        for joint in root.children_named("joint") {
            let Some(name) = joint.attr("name") else {
                continue;
            };
            ext.joints.insert(
                name.to_string(),
                JointAnnotations {
                    dont_collapse: joint.attr("dont_collapse").is_some_and(is_truthy),
                    has_axis: joint.child("axis").is_some(),
                    has_limit: joint.child("limit").is_some(),
                },
            );
        }

        for frame in root.children_named("fixed_frame") {
            ext.fixed_frames.push(fixed_frame(frame)?);
        }
        for joint in root.children_named("loop_joint") {
            ext.loop_joints.push(loop_joint(joint)?);
        }
        for element in root.children_named("sensor") {
            if let Some(decl) = sensor(element, asset_root)? {
                ext.sensors.push(decl);
            }
        }
        Ok(ext)
    }

    fn read_materials(
        &mut self,
        root: &XmlElement,
        asset_root: Option<&Path>,
    ) -> Result<(), ParseError> {
        let mut seen = HashSet::new();
        for element in root.children_named("material") {
            let name = element.attr("name").map(str::trim).unwrap_or_default();
            if name.is_empty() {
                error!("skipping robot material without a name");
                self.rejected_materials.push(element.span.clone());
                continue;
            }
            if !seen.insert(name.to_string()) {
                error!("skipping duplicate material '{}'", name);
                self.rejected_materials.push(element.span.clone());
                continue;
            }
            self.materials.push(material(element, name, asset_root)?);
        }
        Ok(())
    }
}

fn is_truthy(value: &str) -> bool {
    matches!(value.trim().to_ascii_lowercase().as_str(), "true" | "1")
}

fn material(
    element: &XmlElement,
    name: &str,
    asset_root: Option<&Path>,
) -> Result<Material, ParseError> {
    let color = match element.child("color").and_then(|c| c.attr("rgba")) {
        Some(rgba) => {
            let [r, g, b, a] = parse_floats::<4>(rgba).ok_or_else(|| {
                ParseError::invalid_attribute("rgba", element.label(), "expected four numbers")
            })?;
            Some(Color::new(r, g, b, a))
        }
        None => None,
    };
    let texture = match element.child("texture").and_then(|t| t.attr("filename")) {
        Some(f) => Some(AssetRef::parse(f, asset_root)?),
        None => None,
    };
    Ok(Material {
        name: name.to_string(),
        color,
        texture,
    })
}

fn float_attr(element: &XmlElement, key: &'static str) -> Result<Option<f64>, ParseError> {
    match element.attr(key) {
        Some(v) => v
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ParseError::invalid_attribute(key, element.label(), "expected a number")),
        None => Ok(None),
    }
}

fn triple_attr(element: &XmlElement, key: &'static str) -> Result<[f64; 3], ParseError> {
    match element.attr(key) {
        Some(v) => parse_floats::<3>(v).ok_or_else(|| {
            ParseError::invalid_attribute(key, element.label(), "expected three numbers")
        }),
        None => Ok([0.0; 3]),
    }
}

/// Pose written as `xyz`/`rpy` attributes of `element`.
fn pose_attrs(element: &XmlElement) -> Result<Isometry3<f64>, ParseError> {
    Ok(xyz_rpy_to_isometry(
        triple_attr(element, "xyz")?,
        triple_attr(element, "rpy")?,
    ))
}

/// Pose of the `<origin>` child, if any.
fn origin_of(element: &XmlElement) -> Result<Option<Isometry3<f64>>, ParseError> {
    element.child("origin").map(pose_attrs).transpose()
}

fn parent_link(element: &XmlElement) -> Result<String, ParseError> {
    let parent = element
        .child("parent")
        .ok_or_else(|| ParseError::missing_element("parent", element.label()))?;
    Ok(parent.required_attr("link")?.to_string())
}

fn fixed_frame(element: &XmlElement) -> Result<FixedFrameDecl, ParseError> {
    let name = element.required_attr("name")?.to_string();
    let parent = parent_link(element)?;
    let pose = match origin_of(element)? {
        Some(p) => p,
        None => {
            warn!("fixed frame '{}' has no origin, using identity", name);
            Isometry3::identity()
        }
    };
    Ok(FixedFrameDecl {
        parent,
        frame: ReferenceFrame {
            name,
            pose,
            source: FrameSource::Declared,
        },
    })
}

fn loop_joint(element: &XmlElement) -> Result<Joint, ParseError> {
    let name = element.required_attr("name")?.to_string();
    let motion = match element.attr("type").map(str::parse::<LoopMotion>) {
        Some(Ok(m)) => m,
        Some(Err(t)) => {
            warn!("loop joint '{}' has unsupported type '{}', assuming spherical", name, t);
            LoopMotion::Spherical
        }
        None => {
            warn!("loop joint '{}' has no type, assuming spherical", name);
            LoopMotion::Spherical
        }
    };

    let endpoint = |tag: &'static str| -> Result<(String, Isometry3<f64>), ParseError> {
        let e = element
            .child(tag)
            .ok_or_else(|| ParseError::missing_element(tag, element.label()))?;
        Ok((e.required_attr("link")?.to_string(), pose_attrs(e)?))
    };
    let (link1, pose1) = endpoint("link1")?;
    let (link2, pose2) = endpoint("link2")?;

    let mut joint = Joint::new(name, JointKind::Loop(motion), link1, link2).with_origin(pose1);
    joint.child_origin = pose2;
    Ok(joint)
}

/// Value of an attribute, or else the text of a child element with the same name.
fn attr_or_child_f64(element: &XmlElement, key: &'static str) -> Result<Option<f64>, ParseError> {
    if let Some(v) = float_attr(element, key)? {
        return Ok(Some(v));
    }
    match element.child(key) {
        Some(c) => c
            .text
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ParseError::invalid_attribute(key, element.label(), "expected a number")),
        None => Ok(None),
    }
}

fn sensor_config(
    element: &XmlElement,
    asset_root: Option<&Path>,
) -> Option<SensorConfigRef> {
    let raw = element
        .attr("config")
        .or_else(|| element.attr("isaac_sim_config"))?
        .trim();
    if raw.is_empty() {
        return None;
    }
    if raw.ends_with(".json") || raw.contains('/') || raw.contains('\\') {
        let path = Path::new(raw);
        Some(SensorConfigRef::File(match asset_root {
            Some(root) if path.is_relative() => root.join(path),
            _ => path.to_path_buf(),
        }))
    } else {
        Some(SensorConfigRef::Preset(raw.to_string()))
    }
}

fn sensor(element: &XmlElement, asset_root: Option<&Path>) -> Result<Option<SensorDecl>, ParseError> {
    let name = element.required_attr("name")?.to_string();
    let parent = parent_link(element)?;
    let origin = origin_of(element)?.unwrap_or_else(Isometry3::identity);
    let sensor_type = element.attr("type").unwrap_or_default();

    let kind = match sensor_type {
        "camera" => {
            let Some(image) = element.child("camera").and_then(|c| c.child("image")) else {
                error!("camera sensor '{}' has no <camera><image> block, skipping", name);
                return Ok(None);
            };
            let clip_near = float_attr(image, "near")?.unwrap_or(0.0);
            let clip_far = float_attr(image, "far")?.unwrap_or(1000.0).max(clip_near);
            SensorKind::Camera(CameraParams {
                update_rate: attr_or_child_f64(element, "update_rate")?.unwrap_or(30.0),
                width: float_attr(image, "width")?.unwrap_or(0.0),
                height: float_attr(image, "height")?.unwrap_or(0.0),
                format: image.attr("format").map(str::to_string),
                clip_near,
                clip_far,
                hfov: float_attr(image, "hfov")?.unwrap_or(0.0),
            })
        }
        "ray" | "lidar" => {
            let ray = element.child("ray");
            let dim = |tag: &str| -> Result<Option<RayDimension>, ParseError> {
                match ray.and_then(|r| r.child(tag)) {
                    Some(d) => Ok(Some(RayDimension {
                        samples: float_attr(d, "samples")?.map_or(0, |s| s.max(0.0) as usize),
                        resolution: float_attr(d, "resolution")?.unwrap_or(0.0),
                        min_angle: float_attr(d, "min_angle")?.unwrap_or(0.0),
                        max_angle: float_attr(d, "max_angle")?.unwrap_or(0.0),
                    })),
                    None => Ok(None),
                }
            };
            SensorKind::Lidar(LidarParams {
                update_rate: attr_or_child_f64(element, "update_rate")?.unwrap_or(0.0),
                horizontal: dim("horizontal")?,
                vertical: dim("vertical")?,
            })
        }
        other => {
            warn!("sensor '{}' not imported: unsupported type '{}'", name, other);
            return Ok(None);
        }
    };

    Ok(Some(SensorDecl {
        parent,
        sensor: Sensor {
            name,
            origin,
            kind,
            config: sensor_config(element, asset_root),
        },
    }))
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use approx::assert_relative_eq;
    use nalgebra::Vector3;

    use super::*;

    const DOC: &str = r#"<?xml version="1.0"?>
<robot name="ext">
  <material name="steel"><color rgba="0.5 0.5 0.5 1"/></material>
  <material><color rgba="1 0 0 1"/></material>
  <material name="steel"><color rgba="0 0 0 1"/></material>
  <link name="a"><inertial><mass value="1"/></inertial></link>
  <link name="b"/>
  <joint name="j" type="fixed" dont_collapse="true">
    <parent link="a"/><child link="b"/>
  </joint>
  <fixed_frame name="tool">
    <parent link="b"/>
    <origin xyz="0 0 0.1"/>
  </fixed_frame>
  <loop_joint name="closure" type="spherical">
    <link1 link="a" xyz="0.1 0 0"/>
    <link2 link="b" xyz="0 0.2 0"/>
  </loop_joint>
  <sensor name="cam" type="camera" config="sensors/cam.json">
    <parent link="b"/>
    <camera><image width="640" height="480" near="0.1" far="0.05" hfov="1.2"/></camera>
  </sensor>
  <sensor name="scan" type="ray" config="Example_Rotary">
    <parent link="a"/>
    <update_rate>20</update_rate>
    <ray><horizontal samples="360" min_angle="-3.14" max_angle="3.14"/></ray>
  </sensor>
  <sensor name="imu" type="imu"><parent link="a"/></sensor>
</robot>"#;

    fn extensions() -> Extensions {
        let root = parse_document(DOC).unwrap();
        Extensions::from_document(&root, Some(Path::new("/assets"))).unwrap()
    }

    #[test]
    fn element_tree_spans_cover_source() {
        let root = parse_document(DOC).unwrap();
        let link = root.child("link").unwrap();
        assert!(DOC[link.span.clone()].contains("<link name=\"a\">"));
        assert!(DOC[link.span.clone()].trim_end().ends_with("</link>"));
    }

    #[test]
    fn rejects_documents_without_robot() {
        assert!(matches!(
            parse_document("<model/>"),
            Err(ParseError::MissingElement { element: "robot", .. })
        ));
        assert!(matches!(
            parse_document("<robot><link></robot>"),
            Err(ParseError::Xml(_))
        ));
    }

    #[test]
    fn unnamed_and_duplicate_materials_are_skipped() {
        let ext = extensions();
        assert_eq!(ext.materials.len(), 1);
        assert_eq!(ext.materials[0].color, Some(Color::new(0.5, 0.5, 0.5, 1.0)));
        assert_eq!(ext.rejected_materials.len(), 2);
    }

    #[test]
    fn presence_and_annotations() {
        let ext = extensions();
        assert_eq!(
            ext.inertials["a"],
            InertialPresence {
                inertial: true,
                mass: true,
                inertia: false
            }
        );
        assert!(!ext.inertials["b"].inertial);
        assert!(ext.joints["j"].dont_collapse);
        assert!(!ext.joints["j"].has_axis);
    }

    #[test]
    fn fixed_frames_and_loop_joints() {
        let ext = extensions();
        assert_eq!(ext.fixed_frames[0].parent, "b");
        assert_relative_eq!(
            ext.fixed_frames[0].frame.pose.translation.vector,
            Vector3::new(0.0, 0.0, 0.1)
        );

        let closure = &ext.loop_joints[0];
        assert_eq!(closure.kind, JointKind::Loop(LoopMotion::Spherical));
        assert_eq!((closure.parent.as_str(), closure.child.as_str()), ("a", "b"));
        assert_relative_eq!(closure.child_origin.translation.vector, Vector3::new(0.0, 0.2, 0.0));
    }

    #[test]
    fn sensors() {
        let ext = extensions();
        assert_eq!(ext.sensors.len(), 2);

        let cam = &ext.sensors[0].sensor;
        let SensorKind::Camera(params) = &cam.kind else {
            panic!("expected camera");
        };
        assert_eq!(params.update_rate, 30.0);
        assert_eq!(params.clip_far, params.clip_near);
        assert_eq!(
            cam.config,
            Some(SensorConfigRef::File(PathBuf::from("/assets/sensors/cam.json")))
        );

        let scan = &ext.sensors[1].sensor;
        let SensorKind::Lidar(params) = &scan.kind else {
            panic!("expected lidar");
        };
        assert_eq!(params.update_rate, 20.0);
        assert_eq!(params.horizontal.unwrap().samples, 360);
        assert!(params.vertical.is_none());
        assert_eq!(scan.config, Some(SensorConfigRef::Preset("Example_Rotary".into())));
    }

    #[test]
    fn fixed_frame_requires_parent() {
        let root = parse_document(r#"<robot name="r"><fixed_frame name="f"/></robot>"#).unwrap();
        assert!(matches!(
            Extensions::from_document(&root, None),
            Err(ParseError::MissingElement { element: "parent", .. })
        ));
    }
}
