//! Fixed-joint collapsing.
//!
//! Children of fixed joints are welded into their parents top-down. Geometry, sensors
//! and frames move with a composed pose, mass properties are combined with the
//! parallel-axis theorem and the welded link survives as a named reference frame.

use nalgebra::{Isometry3, Matrix3, Translation3, Vector3};
use tracing::{debug, info, warn};

use crate::bfs::LinkGraph;
use crate::chain::link_topology;
use crate::config::ImportConfig;
use crate::error::TopologyError;
use crate::model::{
    BaseAnchor, FrameSource, Inertial, JointKind, Link, ReferenceFrame, RobotModel,
};

/// Joint name used for the base anchor when no fixed root joint was folded.
pub const DEFAULT_ANCHOR_JOINT: &str = "root_joint";

/// One weld performed by the collapser.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergedLink {
    /// The link that no longer exists as a body.
    pub link: String,
    /// The link it was welded into.
    pub into: String,
    /// The removed fixed joint.
    pub joint: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CollapseReport {
    pub merged: Vec<MergedLink>,
    /// Non-fatal conditions, also logged.
    pub warnings: Vec<String>,
}

/// Weld fixed joints (when enabled) and anchor the base (when fixed-base).
///
/// Links the topology first if that has not happened yet and rebuilds it afterwards.
pub fn collapse_fixed_joints(
    model: &mut RobotModel,
    config: &ImportConfig,
) -> Result<CollapseReport, TopologyError> {
    if model.root_link.is_none() {
        link_topology(model)?;
    }
    let mut report = CollapseReport::default();
    let mut anchor_joint = None;

    if config.merge_fixed_joints {
        while let Some(joint) = fold_bodiless_root(model, &mut report) {
            anchor_joint = Some(joint);
        }

        let root = model.root_link.clone().ok_or(TopologyError::NoRootLink)?;
        let order: Vec<String> = LinkGraph::from_model(model)
            .bfs_names(&root)
            .into_iter()
            .map(str::to_string)
            .collect();

        for name in order {
            let Some(joint) = model
                .links
                .get(&name)
                .and_then(|l| l.parent_joint.as_ref())
                .and_then(|j| model.joints.get(j))
            else {
                continue;
            };
            if joint.kind != JointKind::Fixed {
                continue;
            }
            if joint.dont_collapse {
                debug!("keeping '{}': joint '{}' is marked dont_collapse", name, joint.name);
                continue;
            }
            let joint = joint.name.clone();
            if let Some(merged) = weld(model, &joint, config.density) {
                report.merged.push(merged);
            }
        }

        link_topology(model)?;
        info!(
            "collapsed {} fixed joints of '{}'",
            report.merged.len(),
            model.name
        );
    }

    if config.fix_base {
        if let Some(root) = model.root_link.clone() {
            model.anchor = Some(BaseAnchor {
                joint: anchor_joint.unwrap_or_else(|| DEFAULT_ANCHOR_JOINT.to_string()),
                link: root,
            });
        }
    }

    Ok(report)
}

/// Weld the child of fixed joint `joint_name` into its parent.
fn weld(model: &mut RobotModel, joint_name: &str, density: f64) -> Option<MergedLink> {
    let joint = model.joints.remove(joint_name)?;
    let Some(child) = model.links.remove(&joint.child) else {
        model.joints.insert(joint.name.clone(), joint);
        return None;
    };
    let t = joint.origin;

    let parent_inertial = model
        .links
        .get(&joint.parent)
        .and_then(|p| body_inertial(p, density));
    let child_inertial = body_inertial(&child, density).map(|i| Inertial {
        origin: t * i.origin,
        ..i
    });

    let parent = model.links.get_mut(&joint.parent)?;
    parent.inertial = Some(
        combine_inertials(parent_inertial, child_inertial).unwrap_or_else(Inertial::negligible),
    );

    parent.visuals.extend(child.visuals.into_iter().map(|mut v| {
        v.origin = t * v.origin;
        v
    }));
    parent.collisions.extend(child.collisions.into_iter().map(|mut c| {
        c.origin = t * c.origin;
        c
    }));
    parent.sensors.extend(child.sensors.into_iter().map(|mut s| {
        s.origin = t * s.origin;
        s
    }));
    parent.frames.push(ReferenceFrame {
        name: child.name.clone(),
        pose: t,
        source: FrameSource::MergedLink {
            joint: joint.name.clone(),
        },
    });
    parent.frames.extend(child.frames.into_iter().map(|mut f| {
        f.pose = t * f.pose;
        f
    }));
    parent.children.retain(|c| *c != child.name);
    parent.children.extend(child.children.iter().cloned());

    relink(model, &child.name, &joint.parent, &t);
    for grandchild in &child.children {
        if let Some(g) = model.links.get_mut(grandchild) {
            g.parent = Some(joint.parent.clone());
        }
    }

    debug!(
        "welded '{}' into '{}' through '{}'",
        child.name, joint.parent, joint.name
    );
    Some(MergedLink {
        link: child.name,
        into: joint.parent,
        joint: joint.name,
    })
}

/// Move every joint endpoint on `from` onto `to`, where `from` sits at `t` in `to`.
fn relink(model: &mut RobotModel, from: &str, to: &str, t: &Isometry3<f64>) {
    for joint in model.joints.values_mut() {
        if joint.parent == from {
            joint.parent = to.to_string();
            joint.origin = t * joint.origin;
        }
        if joint.child == from && !joint.kind.is_tree() {
            joint.child = to.to_string();
            joint.child_origin = t * joint.child_origin;
        }
    }
}

/// Fold a root without mass or geometry into the child of its first fixed joint.
///
/// Returns the name of the removed joint.
fn fold_bodiless_root(model: &mut RobotModel, report: &mut CollapseReport) -> Option<String> {
    let root_name = model.root_link.clone()?;
    let root = model.links.get(&root_name)?;
    if root.has_body() {
        return None;
    }
    let joint_name = model
        .tree_joints()
        .find(|j| j.parent == root_name && j.kind == JointKind::Fixed && !j.dont_collapse)?
        .name
        .clone();

    let joint = model.joints.remove(&joint_name)?;
    let root = model.links.remove(&root_name)?;
    // pose of the old root in the new one
    let t = joint.origin.inverse();

    let new_root = model.links.get_mut(&joint.child)?;
    new_root.frames.push(ReferenceFrame {
        name: root.name.clone(),
        pose: t,
        source: FrameSource::MergedLink {
            joint: joint.name.clone(),
        },
    });
    new_root.frames.extend(root.frames.into_iter().map(|mut f| {
        f.pose = t * f.pose;
        f
    }));
    new_root.sensors.extend(root.sensors.into_iter().map(|mut s| {
        s.origin = t * s.origin;
        s
    }));
    new_root.parent = None;
    new_root.parent_joint = None;
    for sibling in root.children.iter().filter(|c| **c != joint.child) {
        new_root.children.push(sibling.clone());
    }
    for sibling in root.children.iter().filter(|c| **c != joint.child) {
        if let Some(s) = model.links.get_mut(sibling) {
            s.parent = Some(joint.child.clone());
        }
    }
    relink(model, &root.name, &joint.child, &t);

    let message = format!(
        "root link '{}' has no mass or geometry, root reassigned to '{}'",
        root.name, joint.child
    );
    warn!("{}", message);
    report.warnings.push(message);
    report.merged.push(MergedLink {
        link: root.name,
        into: joint.child.clone(),
        joint: joint.name.clone(),
    });
    model.root_link = Some(joint.child);
    Some(joint.name)
}

/// Mass properties that take part in an accumulation, `None` for a massless body.
///
/// With a positive density a massless link gets its mass from the volume of its
/// primitive collision shapes.
fn body_inertial(link: &Link, density: f64) -> Option<Inertial> {
    if !link.is_massless() {
        return link.inertial.clone();
    }
    if density <= 0.0 {
        return None;
    }
    let mut volume = 0.0;
    let mut moment = Vector3::zeros();
    for c in &link.collisions {
        if let Some(v) = c.geometry.volume() {
            volume += v;
            moment += c.origin.translation.vector * v;
        }
    }
    if volume <= 0.0 {
        return None;
    }
    debug!(
        "deriving mass of '{}' from {:.6} m^3 of collision volume",
        link.name, volume
    );
    Some(Inertial {
        origin: Translation3::from(moment / volume).into(),
        mass: density * volume,
        inertia: None,
    })
}

/// Combine two bodies given in the same frame.
///
/// A single body is returned unchanged. Two bodies give one with its frame at the
/// combined center of mass, axis-aligned with the common frame.
pub(crate) fn combine_inertials(a: Option<Inertial>, b: Option<Inertial>) -> Option<Inertial> {
    let (a, b) = match (a, b) {
        (None, None) => return None,
        (Some(one), None) | (None, Some(one)) => return Some(one),
        (Some(a), Some(b)) => (a, b),
    };
    let mass = a.mass + b.mass;
    let ca = a.origin.translation.vector;
    let cb = b.origin.translation.vector;
    // massless pair keeps the first body's point; tensors still add
    let com = if mass > 0.0 {
        (ca * a.mass + cb * b.mass) / mass
    } else {
        ca
    };

    let inertia = if a.inertia.is_some() || b.inertia.is_some() {
        Some(shifted_inertia(&a, &com) + shifted_inertia(&b, &com))
    } else {
        None
    };
    Some(Inertial {
        origin: Translation3::from(com).into(),
        mass,
        inertia,
    })
}

/// Tensor of `body` about `point`, axes of the common frame.
fn shifted_inertia(body: &Inertial, point: &Vector3<f64>) -> Matrix3<f64> {
    let r = body.origin.rotation.to_rotation_matrix().into_inner();
    let rotated = r * body.inertia_or_zero() * r.transpose();
    let d = body.origin.translation.vector - point;
    rotated + (Matrix3::identity() * d.norm_squared() - d * d.transpose()) * body.mass
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;
    use nalgebra::UnitQuaternion;

    use super::*;
    use crate::chain::{build_chain, KinematicChain};
    use crate::model::{Collision, Geometry, Joint, LoopMotion, NEGLIGIBLE_MASS};
    use crate::urdf::parse_file;

    fn offset(x: f64, y: f64, z: f64) -> Isometry3<f64> {
        Translation3::new(x, y, z).into()
    }

    fn body(mass: f64, i: f64) -> Inertial {
        Inertial::new(mass, Matrix3::from_diagonal_element(i))
    }

    /// base -(revolute)- a -(fixed)- b -(fixed)- c -(revolute)- d
    fn fixed_chain() -> RobotModel {
        let mut model = RobotModel::new("r")
            .with_link(Link::new("base").with_inertial(body(5.0, 1.0)))
            .with_link(Link::new("a").with_inertial(body(1.0, 0.1)))
            .with_link(Link::new("b").with_inertial(body(2.0, 0.2)))
            .with_link(Link::new("c").with_inertial(body(3.0, 0.3)))
            .with_link(Link::new("d").with_inertial(body(1.0, 0.1)))
            .with_joint(Joint::new("j0", JointKind::Revolute, "base", "a"))
            .with_joint(Joint::new("j1", JointKind::Fixed, "a", "b").with_origin(offset(1.0, 0.0, 0.0)))
            .with_joint(Joint::new("j2", JointKind::Fixed, "b", "c").with_origin(offset(0.0, 1.0, 0.0)))
            .with_joint(
                Joint::new("j3", JointKind::Revolute, "c", "d").with_origin(offset(0.0, 0.0, 1.0)),
            );
        link_topology(&mut model).unwrap();
        model
    }

    #[test]
    fn chain_of_fixed_joints_leaves_one_body() {
        let mut model = fixed_chain();
        let report = collapse_fixed_joints(&mut model, &ImportConfig::default()).unwrap();
        assert_eq!(report.merged.len(), 2);
        assert!(!model.links.contains_key("b"));
        assert!(!model.links.contains_key("c"));
        assert!(!model.joints.contains_key("j1"));

        let a = model.link("a").unwrap();
        let inertial = a.inertial.clone().unwrap();
        assert_relative_eq!(inertial.mass, 6.0);

        // b at (1,0,0), c at (1,1,0)
        let com = Vector3::new((2.0 + 3.0) / 6.0, 3.0 / 6.0, 0.0);
        assert_relative_eq!(inertial.origin.translation.vector, com, epsilon = 1e-12);
        let points = [
            (1.0, Vector3::zeros(), 0.1),
            (2.0, Vector3::new(1.0, 0.0, 0.0), 0.2),
            (3.0, Vector3::new(1.0, 1.0, 0.0), 0.3),
        ];
        let mut expected = Matrix3::zeros();
        for (m, p, i) in points {
            let d: Vector3<f64> = p - com;
            expected += Matrix3::from_diagonal_element(i)
                + (Matrix3::identity() * d.norm_squared() - d * d.transpose()) * m;
        }
        assert_relative_eq!(inertial.inertia.unwrap(), expected, epsilon = 1e-12);

        let names: Vec<&str> = a.merged_link_names().collect();
        assert_eq!(names, vec!["b", "c"]);
        assert_relative_eq!(
            a.frame("c").unwrap().pose.translation.vector,
            Vector3::new(1.0, 1.0, 0.0)
        );

        // d now hangs off a, its joint origin composed through b and c
        let j3 = model.joint("j3").unwrap();
        assert_eq!(j3.parent, "a");
        assert_relative_eq!(j3.origin.translation.vector, Vector3::new(1.0, 1.0, 1.0));
        assert_eq!(model.link("d").unwrap().parent.as_deref(), Some("a"));
        assert_eq!(model.link("a").unwrap().children, vec!["d"]);
        assert!(model.tree_joints().all(|j| j.kind != JointKind::Fixed));
    }

    #[test]
    fn geometry_moves_with_composed_pose() {
        let mut model = fixed_chain();
        let rotated = Isometry3::from_parts(
            Translation3::new(0.0, 0.0, 0.0),
            UnitQuaternion::from_euler_angles(0.0, 0.0, std::f64::consts::FRAC_PI_2),
        );
        model.joints.get_mut("j1").unwrap().origin = offset(1.0, 0.0, 0.0) * rotated;
        model.links.get_mut("b").unwrap().collisions.push(Collision {
            name: None,
            origin: offset(1.0, 0.0, 0.0),
            geometry: Geometry::Sphere { radius: 0.1 },
        });
        collapse_fixed_joints(&mut model, &ImportConfig::default()).unwrap();
        let c = &model.link("a").unwrap().collisions[0];
        assert_relative_eq!(
            c.origin.translation.vector,
            Vector3::new(1.0, 1.0, 0.0),
            epsilon = 1e-12
        );
    }

    #[test]
    fn dont_collapse_keeps_the_body() {
        let mut model = fixed_chain();
        model.joints.get_mut("j2").unwrap().dont_collapse = true;
        let report = collapse_fixed_joints(&mut model, &ImportConfig::default()).unwrap();
        assert_eq!(report.merged.len(), 1);
        assert!(model.links.contains_key("c"));
        assert_eq!(model.joint("j2").unwrap().parent, "a");
        assert_relative_eq!(model.link("a").unwrap().mass(), 3.0);
    }

    #[test]
    fn disabled_merge_only_anchors() {
        let mut model = fixed_chain();
        let config = ImportConfig::default().with_merge_fixed_joints(false);
        let report = collapse_fixed_joints(&mut model, &config).unwrap();
        assert!(report.merged.is_empty());
        assert_eq!(model.links.len(), 5);
        assert_eq!(
            model.anchor,
            Some(BaseAnchor {
                joint: DEFAULT_ANCHOR_JOINT.into(),
                link: "base".into()
            })
        );
    }

    #[test]
    fn massless_accumulation_gets_negligible_body() {
        let mut model = RobotModel::new("r")
            .with_link(Link::new("base").with_inertial(body(1.0, 1.0)))
            .with_link(Link::new("a"))
            .with_link(Link::new("b"))
            .with_joint(Joint::new("j0", JointKind::Revolute, "base", "a"))
            .with_joint(Joint::new("j1", JointKind::Fixed, "a", "b"));
        collapse_fixed_joints(&mut model, &ImportConfig::default()).unwrap();
        let inertial = model.link("a").unwrap().inertial.clone().unwrap();
        assert_relative_eq!(inertial.mass, NEGLIGIBLE_MASS);
        assert!(!inertial.is_massless());
    }

    #[test]
    fn density_derives_mass_of_massless_links() {
        let mut model = RobotModel::new("r")
            .with_link(Link::new("base").with_inertial(body(1.0, 1.0)))
            .with_link(Link::new("a").with_inertial(body(1.0, 0.1)))
            .with_link(Link::new("b").with_collision(Collision {
                name: None,
                origin: Isometry3::identity(),
                geometry: Geometry::Box {
                    size: Vector3::new(0.1, 0.1, 0.1),
                },
            }))
            .with_joint(Joint::new("j0", JointKind::Revolute, "base", "a"))
            .with_joint(Joint::new("j1", JointKind::Fixed, "a", "b"));
        let config = ImportConfig::default().with_density(1000.0);
        collapse_fixed_joints(&mut model, &config).unwrap();
        assert_relative_eq!(model.link("a").unwrap().mass(), 2.0, epsilon = 1e-9);
    }

    #[test]
    fn loop_endpoints_follow_the_weld() {
        let mut model = fixed_chain().with_joint(
            Joint::new("closure", JointKind::Loop(LoopMotion::Spherical), "base", "c")
                .with_origin(offset(0.0, 0.0, 2.0)),
        );
        link_topology(&mut model).unwrap();
        collapse_fixed_joints(&mut model, &ImportConfig::default()).unwrap();
        let closure = model.joint("closure").unwrap();
        assert_eq!(closure.child, "a");
        assert_relative_eq!(
            closure.child_origin.translation.vector,
            Vector3::new(1.0, 1.0, 0.0)
        );
    }

    #[test]
    fn test_basic_root_folds_into_base() {
        let mut model =
            parse_file("./urdf/tests", "test_basic.urdf", &ImportConfig::default()).unwrap();
        build_chain(&mut model).unwrap();
        let report = collapse_fixed_joints(&mut model, &ImportConfig::default()).unwrap();

        assert_eq!(model.root_link.as_deref(), Some("base_link"));
        assert!(!model.links.contains_key("root_link"));
        assert_eq!(report.warnings.len(), 1);

        let base = model.link("base_link").unwrap();
        assert_relative_eq!(base.mass(), 10.0);
        assert_relative_eq!(
            base.inertial.as_ref().unwrap().origin.translation.vector,
            Vector3::new(0.0, 0.0, 0.05)
        );
        assert_eq!(base.merged_link_names().collect::<Vec<_>>(), vec!["root_link"]);
        assert_eq!(
            model.anchor,
            Some(BaseAnchor {
                joint: "root_to_base".into(),
                link: "base_link".into()
            })
        );

        // wrist is fixed: the palm is welded into link_2 and the fingers re-hung
        let link_2 = model.link("link_2").unwrap();
        assert_relative_eq!(link_2.mass(), 2.0);
        assert_eq!(link_2.merged_link_names().collect::<Vec<_>>(), vec!["palm_link"]);
        assert_eq!(link_2.children.len(), 3);
        assert_eq!(model.joint("finger_joint_2").unwrap().parent, "link_2");

        let chain = KinematicChain::from_model(&model).unwrap();
        assert_eq!(chain.len(), model.links.len());
        assert_eq!(chain.root.link, "base_link");
    }

    #[test]
    fn massless_bodies_keep_both_tensors() {
        let a = Inertial::new(0.0, Matrix3::from_diagonal_element(1.0));
        let b = Inertial::new(0.0, Matrix3::from_diagonal_element(2.0))
            .with_origin(Isometry3::translation(0.5, 0.0, 0.0));
        let combined = combine_inertials(Some(a), Some(b)).unwrap();
        assert_eq!(combined.mass, 0.0);
        assert_relative_eq!(
            combined.inertia.unwrap(),
            Matrix3::from_diagonal_element(3.0),
            epsilon = 1e-12
        );
        assert_relative_eq!(combined.origin.translation.vector, Vector3::zeros());
    }
}
