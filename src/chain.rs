//! Kinematic chain construction.
//!
//! [`link_topology`] resolves the root and writes parent/child linkage onto the links.
//! [`KinematicChain`] is the owned tree view, rebuilt from a linked model whenever it
//! is needed.

use hashbrown::HashMap;
use tracing::{debug, error, info};

use crate::bfs::LinkGraph;
use crate::error::TopologyError;
use crate::model::RobotModel;

/// One link of the spanning tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainNode {
    pub link: String,
    /// Joint from the parent node, `None` at the root.
    pub joint: Option<String>,
    pub children: Vec<ChainNode>,
}

/// Spanning tree of a robot, loop joints excluded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KinematicChain {
    pub root: ChainNode,
}

impl KinematicChain {
    /// Tree view of a model whose topology has been linked.
    pub fn from_model(model: &RobotModel) -> Result<Self, TopologyError> {
        let root = model.root_link.as_deref().ok_or(TopologyError::NoRootLink)?;
        let order = LinkGraph::from_model(model).bfs_names(root);

        // children are finished before their parent in reverse breadth-first order
        let mut built: HashMap<&str, ChainNode> = HashMap::with_capacity(order.len());
        for name in order.iter().rev().copied() {
            let link = model.links.get(name).ok_or(TopologyError::NoRootLink)?;
            let children = link
                .children
                .iter()
                .filter_map(|c| built.remove(c.as_str()))
                .collect();
            built.insert(
                name,
                ChainNode {
                    link: link.name.clone(),
                    joint: link.parent_joint.clone(),
                    children,
                },
            );
        }
        let root = built.remove(root).ok_or(TopologyError::NoRootLink)?;
        Ok(Self { root })
    }

    /// Nodes in depth-first pre-order, children in joint-name order.
    pub fn depth_first(&self) -> DepthFirst<'_> {
        DepthFirst {
            stack: vec![&self.root],
        }
    }

    pub fn len(&self) -> usize {
        self.depth_first().count()
    }

    pub fn is_empty(&self) -> bool {
        false
    }

    pub fn find(&self, link: &str) -> Option<&ChainNode> {
        self.depth_first().find(|n| n.link == link)
    }
}

pub struct DepthFirst<'a> {
    stack: Vec<&'a ChainNode>,
}

impl<'a> Iterator for DepthFirst<'a> {
    type Item = &'a ChainNode;

    fn next(&mut self) -> Option<Self::Item> {
        let node = self.stack.pop()?;
        self.stack.extend(node.children.iter().rev());
        Some(node)
    }
}

/// Find the root and write parent/child linkage onto every link.
///
/// Every check runs before the first write, so on error the model is untouched.
pub fn link_topology(model: &mut RobotModel) -> Result<(), TopologyError> {
    let root = resolve_root(model).map_err(|e| {
        error!("kinematic tree of '{}' rejected: {}", model.name, e);
        e
    })?;

    let edges: Vec<(String, String, String)> = model
        .tree_joints()
        .map(|j| (j.name.clone(), j.parent.clone(), j.child.clone()))
        .collect();
    for link in model.links.values_mut() {
        link.parent = None;
        link.parent_joint = None;
        link.children.clear();
    }
    for (joint, parent, child) in edges {
        if let Some(c) = model.links.get_mut(&child) {
            c.parent = Some(parent.clone());
            c.parent_joint = Some(joint);
        }
        if let Some(p) = model.links.get_mut(&parent) {
            p.children.push(child);
        }
    }

    debug!("root link of '{}' is '{}'", model.name, root);
    model.root_link = Some(root);
    Ok(())
}

/// Check the joint graph and name its single root.
fn resolve_root(model: &RobotModel) -> Result<String, TopologyError> {
    if model.links.is_empty() {
        return Err(TopologyError::EmptyRobot);
    }

    let mut claims: HashMap<&str, Vec<&str>> = HashMap::new();
    for joint in model.joints.values() {
        for end in [&joint.parent, &joint.child] {
            if !model.links.contains_key(end) {
                return Err(TopologyError::UndefinedLink {
                    joint: joint.name.clone(),
                    link: end.clone(),
                });
            }
        }
        if joint.kind.is_tree() {
            claims
                .entry(joint.child.as_str())
                .or_default()
                .push(joint.name.as_str());
        }
    }

    let mut contested: Vec<(&str, &Vec<&str>)> = claims
        .iter()
        .filter(|(_, joints)| joints.len() > 1)
        .map(|(link, joints)| (*link, joints))
        .collect();
    contested.sort();
    if let Some((link, joints)) = contested.first() {
        return Err(TopologyError::MultipleParents {
            link: link.to_string(),
            joints: joints.iter().map(|j| j.to_string()).collect(),
        });
    }

    let roots: Vec<&String> = model
        .links
        .keys()
        .filter(|name| !claims.contains_key(name.as_str()))
        .collect();
    let root = match roots.as_slice() {
        [] => return Err(TopologyError::NoRootLink),
        [root] => (*root).clone(),
        many => {
            return Err(TopologyError::MultipleRootLinks(
                many.iter().map(|r| r.to_string()).collect(),
            ))
        }
    };

    let reached = LinkGraph::from_model(model).bfs_names(&root);
    if reached.len() < model.links.len() {
        let missing: Vec<String> = model
            .links
            .keys()
            .filter(|n| !reached.contains(&n.as_str()))
            .cloned()
            .collect();
        return Err(TopologyError::Unreachable {
            root,
            links: missing,
        });
    }
    Ok(root)
}

/// Link the topology and return the tree view.
pub fn build_chain(model: &mut RobotModel) -> Result<KinematicChain, TopologyError> {
    link_topology(model)?;
    let chain = KinematicChain::from_model(model)?;
    info!(
        "kinematic chain of '{}': {} links, {} loop joints",
        model.name,
        chain.len(),
        model.loop_joints().count()
    );
    Ok(chain)
}
