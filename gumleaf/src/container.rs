//! Names for the containers (files, compilation units) that trees live in.
//!
//! When a node's counterpart lives outside the pair of trees being diffed, the
//! generator tags the resulting `MoveIn`/`MoveOut` with the name of the
//! container holding that counterpart. No name, no action.

use rapidhash::RapidHashMap as HashMap;

use crate::mapping::NodeRef;
use crate::tree::TreeId;

/// Looks up a human-readable container name for a node of another tree.
pub trait ContainerResolver {
    /// Name of the container owning `node`, if known.
    fn container_name(&self, node: NodeRef) -> Option<String>;
}

/// Resolves nothing: cross-container moves are never reported.
impl ContainerResolver for () {
    fn container_name(&self, _node: NodeRef) -> Option<String> {
        None
    }
}

impl<F> ContainerResolver for F
where
    F: Fn(NodeRef) -> Option<String>,
{
    fn container_name(&self, node: NodeRef) -> Option<String> {
        self(node)
    }
}

/// A table from tree id to container name.
#[derive(Debug, Default, Clone)]
pub struct ContainerNames {
    names: HashMap<TreeId, String>,
}

impl ContainerNames {
    /// Create an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Name the container of `tree`.
    pub fn insert(&mut self, tree: TreeId, name: impl Into<String>) {
        self.names.insert(tree, name.into());
    }
}

impl FromIterator<(TreeId, String)> for ContainerNames {
    fn from_iter<I: IntoIterator<Item = (TreeId, String)>>(iter: I) -> Self {
        Self {
            names: iter.into_iter().collect(),
        }
    }
}

impl ContainerResolver for ContainerNames {
    fn container_name(&self, node: NodeRef) -> Option<String> {
        self.names.get(&node.tree).cloned()
    }
}
