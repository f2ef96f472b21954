//! Apply an edit script to a copy of the source tree.
//!
//! For property testing: replay(src, script(src, dst)) is isomorphic to dst
//! whenever the mapping is one-to-one.

use facet::Facet;
use indextree::{Arena, NodeId};
use rapidhash::RapidHashMap as HashMap;

use crate::chawathe::EditOp;
use crate::mapping::NodeRef;
use crate::tree::{DiffTree, NodeData, Tree};
use crate::{debug, trace};

/// Errors that can occur while replaying an edit script.
#[derive(Facet, Debug)]
#[facet(derive(Error))]
#[repr(u8)]
pub enum ReplayError {
    /// node {index} of tree {tree} is not part of the replayed tree
    UnknownNode { tree: u32, index: usize },

    /// position {position} out of bounds for {len} children
    PositionOutOfBounds { position: usize, len: usize },

    /// moving node {index} of tree {tree} would put it under itself
    Cycle { tree: u32, index: usize },

    /// replay left {count} top-level nodes, expected exactly one
    RootCount { count: usize },
}

impl ReplayError {
    fn unknown(node: NodeRef) -> Self {
        ReplayError::UnknownNode {
            tree: node.tree.0,
            index: usize::from(node.node),
        }
    }
}

struct Replayer<'a, S, D> {
    src: &'a S,
    dst: &'a D,
    arena: Arena<NodeData>,
    fake_root: NodeId,
    /// Source nodes and inserted destination nodes, by the ref they were created from
    nodes: HashMap<NodeRef, NodeId>,
}

impl<'a, S: DiffTree, D: DiffTree> Replayer<'a, S, D> {
    fn new(src: &'a S, dst: &'a D) -> Self {
        let mut arena = Arena::with_capacity(src.node_count() + 1);
        let fake_root = arena.new_node(NodeData::new("", ""));
        let mut replayer = Self {
            src,
            dst,
            arena,
            fake_root,
            nodes: HashMap::default(),
        };
        let mut stack = vec![(src.root(), fake_root)];
        while let Some((orig, parent)) = stack.pop() {
            let node = replayer
                .arena
                .new_node(NodeData::new(src.kind(orig), src.label(orig)));
            parent.append(node, &mut replayer.arena);
            replayer.nodes.insert(NodeRef::of(src, orig), node);
            let children: Vec<NodeId> = src.children(orig).collect();
            stack.extend(children.into_iter().rev().map(|c| (c, node)));
        }
        replayer
    }

    fn lookup(&self, node: NodeRef) -> Result<NodeId, ReplayError> {
        match self.nodes.get(&node) {
            Some(&id) if !self.arena[id].is_removed() => Ok(id),
            _ => Err(ReplayError::unknown(node)),
        }
    }

    fn parent_of(&self, parent: Option<NodeRef>) -> Result<NodeId, ReplayError> {
        match parent {
            Some(parent) => self.lookup(parent),
            None => Ok(self.fake_root),
        }
    }

    /// Splice `child` (detached) into `parent` at `position`.
    fn place(
        &mut self,
        parent: NodeId,
        child: NodeId,
        position: usize,
        moved: NodeRef,
    ) -> Result<(), ReplayError> {
        let len = parent.children(&self.arena).count();
        if position > len {
            return Err(ReplayError::PositionOutOfBounds { position, len });
        }
        let placed = match parent.children(&self.arena).nth(position) {
            Some(sibling) => sibling.checked_insert_before(child, &mut self.arena),
            None => parent.checked_append(child, &mut self.arena),
        };
        placed.map_err(|_| ReplayError::Cycle {
            tree: moved.tree.0,
            index: usize::from(moved.node),
        })
    }

    /// Create a replay node for destination node `node`, and its whole
    /// subtree if `deep`.
    fn materialize(&mut self, node: NodeId, deep: bool) -> NodeId {
        let dst = self.dst;
        let root = self
            .arena
            .new_node(NodeData::new(dst.kind(node), dst.label(node)));
        self.nodes.insert(NodeRef::of(dst, node), root);
        if deep {
            let mut stack = vec![(node, root)];
            while let Some((orig, copy)) = stack.pop() {
                for child in dst.children(orig) {
                    let c = self
                        .arena
                        .new_node(NodeData::new(dst.kind(child), dst.label(child)));
                    copy.append(c, &mut self.arena);
                    self.nodes.insert(NodeRef::of(dst, child), c);
                    stack.push((child, c));
                }
            }
        }
        root
    }

    fn apply(&mut self, op: &EditOp) -> Result<(), ReplayError> {
        trace!(%op, "replay");
        match op {
            EditOp::Insert {
                node,
                parent,
                position,
            }
            | EditOp::TreeInsert {
                node,
                parent,
                position,
            } => {
                if node.tree != self.dst.tree_id() || !self.dst.contains(node.node) {
                    return Err(ReplayError::unknown(*node));
                }
                let parent = self.parent_of(*parent)?;
                let deep = matches!(op, EditOp::TreeInsert { .. });
                let created = self.materialize(node.node, deep);
                self.place(parent, created, *position, *node)
            }
            EditOp::Delete { node } | EditOp::TreeDelete { node } => {
                let id = self.lookup(*node)?;
                id.remove_subtree(&mut self.arena);
                Ok(())
            }
            EditOp::Update { node, label } => {
                let id = self.lookup(*node)?;
                self.arena[id].get_mut().label.clone_from(label);
                Ok(())
            }
            EditOp::Move {
                node,
                parent: Some(parent),
                position,
            } => {
                let id = self.lookup(*node)?;
                let parent = self.lookup(*parent)?;
                id.detach(&mut self.arena);
                self.place(parent, id, *position, *node)
            }
            // Top-level reorders, cross-container moves and multi-moves do
            // not change the replayed tree.
            EditOp::Move { parent: None, .. }
            | EditOp::MoveIn { .. }
            | EditOp::MoveOut { .. }
            | EditOp::MultiMove { .. } => Ok(()),
        }
    }

    fn finish(mut self) -> Result<Tree, ReplayError> {
        let tops: Vec<NodeId> = self.fake_root.children(&self.arena).collect();
        let &[root] = tops.as_slice() else {
            return Err(ReplayError::RootCount { count: tops.len() });
        };
        root.detach(&mut self.arena);
        self.fake_root.remove(&mut self.arena);
        let mut tree = Tree::from_parts(self.src.tree_id(), self.arena, root);
        tree.recompute_metrics();
        Ok(tree)
    }
}

/// Apply `ops` in order to a fresh copy of `src`.
///
/// Inserted nodes take their kind and label from `dst`. Top-level reorders
/// (`Move` without a parent), MoveIn, MoveOut and MultiMove leave the tree
/// unchanged. The returned tree carries `src`'s tree id.
pub fn replay<S, D>(ops: &[EditOp], src: &S, dst: &D) -> Result<Tree, ReplayError>
where
    S: DiffTree,
    D: DiffTree,
{
    let mut replayer = Replayer::new(src, dst);
    for op in ops {
        replayer.apply(op)?;
    }
    let tree = replayer.finish()?;
    debug!(ops = ops.len(), nodes = tree.node_count(), "replay done");
    Ok(tree)
}
