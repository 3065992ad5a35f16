use hashbrown::{HashMap, HashSet};

use petgraph::graphmap::DiGraphMap;
use petgraph::visit::Bfs;

use crate::model::RobotModel;

/// Link names as graph nodes, tree joints as parent -> child edges.
pub(crate) struct LinkGraph<'a> {
    pub names: Vec<&'a str>,
    pub index: HashMap<&'a str, usize>,
    pub graph: DiGraphMap<usize, ()>,
}

impl<'a> LinkGraph<'a> {
    /// Graph over every link of `model`. Joints naming unknown links are left out.
    pub fn from_model(model: &'a RobotModel) -> Self {
        let names: Vec<&str> = model.links.keys().map(String::as_str).collect();
        let index: HashMap<&str, usize> = names.iter().enumerate().map(|(i, n)| (*n, i)).collect();

        let mut graph = DiGraphMap::<usize, ()>::new();
        for i in 0..names.len() {
            graph.add_node(i);
        }
        for joint in model.tree_joints() {
            if let (Some(p), Some(c)) = (
                index.get(joint.parent.as_str()),
                index.get(joint.child.as_str()),
            ) {
                graph.add_edge(*p, *c, ());
            }
        }
        Self {
            names,
            index,
            graph,
        }
    }

    /// Link names in breadth-first order from `start`.
    pub fn bfs_names(&self, start: &str) -> Vec<&'a str> {
        match self.index.get(start) {
            Some(i) => bfs(&self.graph, *i)
                .into_iter()
                .map(|n| self.names[n])
                .collect(),
            None => Vec::new(),
        }
    }
}

struct BfsIter<'a> {
    graph: &'a DiGraphMap<usize, ()>,
    bfs: Bfs<usize, HashSet<usize>>,
}

impl Iterator for BfsIter<'_> {
    type Item = usize;

    fn next(&mut self) -> Option<Self::Item> {
        self.bfs.next(self.graph)
    }
}

// every parent node is visited before its children
pub(crate) fn bfs(graph: &DiGraphMap<usize, ()>, start: usize) -> Vec<usize> {
    let bfs = Bfs::new(graph, start);
    let iter = BfsIter { graph, bfs };
    iter.collect()
}
