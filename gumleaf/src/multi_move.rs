//! Multi-move generation.
//!
//! Turns each multi-mapping cluster into MultiMove actions, one per
//! (source, destination) edge, all edges of a cluster sharing one group id.
//! Reads the trees only for leaf tests and content hashes.

use indextree::NodeId;
use rapidhash::{RapidHashMap as HashMap, RapidHashSet as HashSet};

use crate::chawathe::EditOp;
use crate::mapping::{MultiMappingStore, NodeRef};
use crate::tree::DiffTree;
use crate::{debug, trace};

/// MultiMove actions plus lookup indexes from each endpoint to its actions.
#[derive(Debug, Default, Clone)]
pub struct MultiMoves {
    ops: Vec<EditOp>,
    by_src: HashMap<NodeId, Vec<usize>>,
    by_dst: HashMap<NodeId, Vec<usize>>,
}

impl MultiMoves {
    fn push(&mut self, src: NodeRef, dst: NodeRef, group: u32, updated: bool) {
        let index = self.ops.len();
        let op = EditOp::MultiMove {
            src,
            dst,
            group,
            updated,
        };
        debug!(%op, "emit");
        self.ops.push(op);
        self.by_src.entry(src.node).or_default().push(index);
        self.by_dst.entry(dst.node).or_default().push(index);
    }

    /// Rebuild from a list of MultiMove actions, re-deriving the indexes.
    /// Other action kinds are ignored.
    pub fn from_ops(ops: impl IntoIterator<Item = EditOp>) -> Self {
        let mut moves = Self::default();
        for op in ops {
            if let EditOp::MultiMove {
                src,
                dst,
                group,
                updated,
            } = op
            {
                moves.push(src, dst, group, updated);
            }
        }
        moves
    }

    /// The actions, in emission order.
    pub fn ops(&self) -> &[EditOp] {
        &self.ops
    }

    /// Consume into the list of actions.
    pub fn into_ops(self) -> Vec<EditOp> {
        self.ops
    }

    /// Action indexes keyed by source node.
    pub fn by_src(&self) -> &HashMap<NodeId, Vec<usize>> {
        &self.by_src
    }

    /// Action indexes keyed by destination node.
    pub fn by_dst(&self) -> &HashMap<NodeId, Vec<usize>> {
        &self.by_dst
    }

    /// Number of actions.
    pub fn len(&self) -> usize {
        self.ops.len()
    }

    /// Whether there are no actions.
    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }
}

/// Generator state for one run: the group counter and the pairs already
/// emitted.
#[derive(Debug)]
pub struct MultiMoveGenerator {
    next_group: u32,
    emitted: HashSet<(NodeRef, NodeRef)>,
}

impl Default for MultiMoveGenerator {
    fn default() -> Self {
        Self::new()
    }
}

impl MultiMoveGenerator {
    /// Group ids of this generator start at 1.
    pub fn new() -> Self {
        Self {
            next_group: 1,
            emitted: HashSet::default(),
        }
    }

    /// Emit MultiMove actions for every multi-mapping cluster between `src`
    /// and `dst`.
    ///
    /// Clusters are visited in the order their destination nodes were first
    /// added to `multi`. For each multi-mapped destination, the cluster is its
    /// source set crossed with the counterparts of the first of those sources.
    /// Endpoints outside the two trees are skipped.
    pub fn generate<S, D>(mut self, src: &S, dst: &D, multi: &MultiMappingStore) -> MultiMoves
    where
        S: DiffTree,
        D: DiffTree,
    {
        let mut moves = MultiMoves::default();
        let (src_tree, dst_tree) = (src.tree_id(), dst.tree_id());

        for (cluster_dst, srcs) in multi.multi_clusters() {
            if cluster_dst.tree != dst_tree {
                continue;
            }
            let Some(first) = srcs.first() else {
                continue;
            };
            let Some(dsts) = multi.dsts(*first) else {
                continue;
            };

            let mut fresh = false;
            for s in srcs.iter().filter(|s| s.tree == src_tree) {
                for d in dsts.iter().filter(|d| d.tree == dst_tree) {
                    if !self.emitted.insert((*s, *d)) {
                        continue;
                    }
                    let updated = src.is_leaf(s.node)
                        && dst.is_leaf(d.node)
                        && src.hash(s.node) != dst.hash(d.node);
                    moves.push(*s, *d, self.next_group, updated);
                    fresh = true;
                }
            }

            if fresh {
                trace!(group = self.next_group, dst = %cluster_dst, "cluster done");
                self.next_group += 1;
            }
        }

        debug!(
            actions = moves.len(),
            groups = self.next_group - 1,
            "multi-move generation done"
        );
        moves
    }
}
