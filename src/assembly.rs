//! Read-only view of a finished import, handed to the stage-authoring sink.

use nalgebra::Isometry3;

use crate::chain::{ChainNode, KinematicChain};
use crate::config::ImportConfig;
use crate::error::NotFoundError;
use crate::model::{BaseAnchor, Joint, Link, Material, ReferenceFrame, RobotModel};
use crate::session::ImportSession;

/// Finished robot model with its kinematic tree.
#[derive(Debug)]
pub struct RobotAssembly {
    model: RobotModel,
    chain: KinematicChain,
    session: ImportSession,
}

impl RobotAssembly {
    pub fn new(model: RobotModel, chain: KinematicChain, session: ImportSession) -> Self {
        Self {
            model,
            chain,
            session,
        }
    }

    pub fn model(&self) -> &RobotModel {
        &self.model
    }

    pub fn chain(&self) -> &KinematicChain {
        &self.chain
    }

    pub fn session(&self) -> &ImportSession {
        &self.session
    }

    pub fn config(&self) -> &ImportConfig {
        self.session.config()
    }

    pub fn name(&self) -> &str {
        &self.model.name
    }

    pub fn root_link(&self) -> &str {
        &self.chain.root.link
    }

    pub fn anchor(&self) -> Option<&BaseAnchor> {
        self.model.anchor.as_ref()
    }

    /// Tree nodes from the root, depth first.
    pub fn depth_first(&self) -> impl Iterator<Item = &ChainNode> {
        self.chain.depth_first()
    }

    /// Links with the joint leading to them, depth first from the root.
    pub fn links_depth_first(&self) -> impl Iterator<Item = (&Link, Option<&Joint>)> {
        self.chain.depth_first().filter_map(|node| {
            let link = self.model.links.get(&node.link)?;
            let joint = node.joint.as_ref().and_then(|j| self.model.joints.get(j));
            Some((link, joint))
        })
    }

    pub fn link(&self, name: &str) -> Result<&Link, NotFoundError> {
        self.model.link(name)
    }

    pub fn joint(&self, name: &str) -> Result<&Joint, NotFoundError> {
        self.model.joint(name)
    }

    pub fn material(&self, name: &str) -> Result<&Material, NotFoundError> {
        self.model.material(name)
    }

    /// Loop-closing joints, for the sink to author as plain constraints.
    pub fn loop_joints(&self) -> impl Iterator<Item = &Joint> {
        self.model.loop_joints()
    }

    /// All reference frames on `link`, merged links and declared frames.
    pub fn reference_frames(&self, link: &str) -> Result<&[ReferenceFrame], NotFoundError> {
        Ok(&self.model.link(link)?.frames)
    }

    /// Names of the links collapsed into `link`.
    pub fn merged_links(&self, link: &str) -> Result<Vec<&str>, NotFoundError> {
        Ok(self.model.link(link)?.merged_link_names().collect())
    }

    /// The link carrying frame `name` and the frame itself.
    pub fn find_frame(&self, name: &str) -> Result<(&Link, &ReferenceFrame), NotFoundError> {
        self.model
            .links
            .values()
            .find_map(|l| l.frame(name).map(|f| (l, f)))
            .ok_or_else(|| NotFoundError::frame(name))
    }

    /// Pose of `link` in the root link frame, joints at their zero position.
    pub fn world_pose(&self, link: &str) -> Result<Isometry3<f64>, NotFoundError> {
        let mut pose = Isometry3::identity();
        let mut current = self.model.link(link)?;
        while let Some(joint) = current.parent_joint.as_ref() {
            let joint = self.model.joint(joint)?;
            pose = joint.origin * pose;
            current = self.model.link(&joint.parent)?;
        }
        Ok(pose)
    }

    /// Pose of a reference frame in the root link frame.
    pub fn frame_world_pose(&self, name: &str) -> Result<Isometry3<f64>, NotFoundError> {
        let (link, frame) = self.find_frame(name)?;
        Ok(self.world_pose(&link.name)? * frame.pose)
    }

    pub fn into_parts(self) -> (RobotModel, KinematicChain, ImportSession) {
        (self.model, self.chain, self.session)
    }
}

/// Identifier safe for scene paths: `[A-Za-z_][A-Za-z0-9_]*`.
///
/// Other characters become `_`, a leading digit gets a `_` prefix.
pub fn prim_name(name: &str) -> String {
    let mut out: String = name
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect();
    if out.is_empty() || out.starts_with(|c: char| c.is_ascii_digit()) {
        out.insert(0, '_');
    }
    out
}
