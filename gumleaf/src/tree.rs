//! Arena-backed labeled ordered trees.
//!
//! The generators only ever read trees through [`DiffTree`]; [`Tree`] is the
//! concrete implementation shipped with the crate.

use core::fmt;
use core::hash::{Hash, Hasher};
use core::ops::Range;

use indextree::{Arena, NodeEdge, NodeId};
use rapidhash::RapidHasher;

/// Identity of a tree, e.g. one parsed file.
///
/// Node references carry the id of the tree that owns them, which is how the
/// generator tells a node of the diffed pair apart from one that lives in some
/// other container.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TreeId(pub u32);

impl fmt::Display for TreeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "t{}", self.0)
    }
}

/// Content hash of a subtree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct NodeHash(pub u64);

impl fmt::Display for NodeHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

/// Payload of one tree node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeData {
    /// Type tag (e.g. the grammar production)
    pub kind: String,
    /// Label, empty for most inner nodes
    pub label: String,
    /// Byte-offset span `[start, end)` in the parsed artifact
    pub span: Range<usize>,
    /// Subtree content hash, see [`Tree::recompute_metrics`]
    pub hash: NodeHash,
    /// Distance from the root (root is 0)
    pub depth: usize,
}

impl NodeData {
    /// A node with the given kind and label, an empty span and unset metrics.
    pub fn new(kind: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            label: label.into(),
            span: 0..0,
            hash: NodeHash::default(),
            depth: 0,
        }
    }

    /// Sets the byte span.
    pub fn with_span(mut self, start: usize, end: usize) -> Self {
        self.span = start..end;
        self
    }
}

/// Read-only view of a tree, as consumed by the edit script generators.
pub trait DiffTree {
    /// The id of this tree.
    fn tree_id(&self) -> TreeId;

    /// The root node.
    fn root(&self) -> NodeId;

    /// Whether `id` is a live node of this tree.
    fn contains(&self, id: NodeId) -> bool;

    /// Number of live nodes.
    fn node_count(&self) -> usize;

    /// Type tag of a node.
    fn kind(&self, id: NodeId) -> &str;

    /// Label of a node.
    fn label(&self, id: NodeId) -> &str;

    /// Subtree content hash of a node.
    fn hash(&self, id: NodeId) -> NodeHash;

    /// Parent of a node, `None` for the root.
    fn parent(&self, id: NodeId) -> Option<NodeId>;

    /// Children of a node, in order.
    fn children(&self, id: NodeId) -> impl Iterator<Item = NodeId> + '_;

    /// Number of children of a node.
    fn child_count(&self, id: NodeId) -> usize {
        self.children(id).count()
    }

    /// Whether a node has no children.
    fn is_leaf(&self, id: NodeId) -> bool {
        self.children(id).next().is_none()
    }

    /// Index of a node among its siblings (0 for the root).
    fn position(&self, id: NodeId) -> usize {
        match self.parent(id) {
            Some(parent) => self
                .children(parent)
                .position(|c| c == id)
                .unwrap_or_default(),
            None => 0,
        }
    }

    /// All nodes, breadth-first from the root.
    fn breadth_first(&self) -> Vec<NodeId> {
        let mut order = vec![self.root()];
        let mut next = 0;
        while next < order.len() {
            let id = order[next];
            order.extend(self.children(id));
            next += 1;
        }
        order
    }

    /// All nodes of the subtree at `id`, children before parents.
    fn post_order(&self, id: NodeId) -> Vec<NodeId> {
        let mut order = Vec::new();
        let mut stack = vec![(id, false)];
        while let Some((node, expanded)) = stack.pop() {
            if expanded {
                order.push(node);
                continue;
            }
            stack.push((node, true));
            let children: Vec<NodeId> = self.children(node).collect();
            stack.extend(children.into_iter().rev().map(|c| (c, false)));
        }
        order
    }

    /// Proper descendants of `id` (the node itself excluded), pre-order.
    fn descendants(&self, id: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut stack: Vec<NodeId> = self.children(id).collect();
        stack.reverse();
        while let Some(node) = stack.pop() {
            out.push(node);
            let mark = stack.len();
            stack.extend(self.children(node));
            stack[mark..].reverse();
        }
        out
    }
}

/// An ordered labeled tree stored in an [`indextree`] arena.
#[derive(Debug, Clone)]
pub struct Tree {
    /// Node storage
    pub arena: Arena<NodeData>,
    /// Root node
    pub root: NodeId,
    id: TreeId,
}

impl Tree {
    /// Create a tree holding a single root node.
    pub fn new(id: TreeId, root: NodeData) -> Self {
        let mut arena = Arena::new();
        let root = arena.new_node(root);
        Self { arena, root, id }
    }

    /// Wrap an existing arena. `root` must have no parent.
    pub fn from_parts(id: TreeId, arena: Arena<NodeData>, root: NodeId) -> Self {
        debug_assert!(arena[root].parent().is_none(), "root must be detached");
        Self { arena, root, id }
    }

    /// Append a child under `parent`, returning its id.
    pub fn add_child(&mut self, parent: NodeId, mut data: NodeData) -> NodeId {
        data.depth = self.get(parent).depth + 1;
        let child = self.arena.new_node(data);
        parent.append(child, &mut self.arena);
        child
    }

    /// Payload of a node.
    ///
    /// Panics if `id` is not a node of this tree.
    pub fn get(&self, id: NodeId) -> &NodeData {
        self.arena[id].get()
    }

    /// Mutable payload of a node.
    pub fn get_mut(&mut self, id: NodeId) -> &mut NodeData {
        self.arena[id].get_mut()
    }

    /// Recompute depth and subtree hashes for every node.
    ///
    /// The hash covers the node's kind and label plus its children's hashes in
    /// order, so equal hashes mean equal subtrees (up to collisions).
    pub fn recompute_metrics(&mut self) {
        let mut depth = 0usize;
        let edges: Vec<NodeEdge> = self.root.traverse(&self.arena).collect();
        for edge in edges {
            match edge {
                NodeEdge::Start(id) => {
                    self.get_mut(id).depth = depth;
                    depth += 1;
                }
                NodeEdge::End(id) => {
                    depth -= 1;
                    let mut hasher = RapidHasher::default();
                    let data = self.get(id);
                    data.kind.hash(&mut hasher);
                    data.label.hash(&mut hasher);
                    for child in id.children(&self.arena) {
                        self.get(child).hash.0.hash(&mut hasher);
                    }
                    self.get_mut(id).hash = NodeHash(hasher.finish());
                }
            }
        }
    }
}

impl DiffTree for Tree {
    fn tree_id(&self) -> TreeId {
        self.id
    }

    fn root(&self) -> NodeId {
        self.root
    }

    fn contains(&self, id: NodeId) -> bool {
        self.arena.get(id).is_some_and(|n| !n.is_removed())
    }

    fn node_count(&self) -> usize {
        self.root.descendants(&self.arena).count()
    }

    fn kind(&self, id: NodeId) -> &str {
        &self.get(id).kind
    }

    fn label(&self, id: NodeId) -> &str {
        &self.get(id).label
    }

    fn hash(&self, id: NodeId) -> NodeHash {
        self.get(id).hash
    }

    fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.arena[id].parent()
    }

    fn children(&self, id: NodeId) -> impl Iterator<Item = NodeId> + '_ {
        id.children(&self.arena)
    }

    fn position(&self, id: NodeId) -> usize {
        id.preceding_siblings(&self.arena).count() - 1
    }
}

/// Whether two trees have the same shape: equal kinds and labels, with
/// children in the same order, all the way down.
pub fn isomorphic<A: DiffTree, B: DiffTree>(a: &A, b: &B) -> bool {
    let mut stack = vec![(a.root(), b.root())];
    while let Some((x, y)) = stack.pop() {
        if a.kind(x) != b.kind(y) || a.label(x) != b.label(y) {
            return false;
        }
        let xs: Vec<NodeId> = a.children(x).collect();
        let ys: Vec<NodeId> = b.children(y).collect();
        if xs.len() != ys.len() {
            return false;
        }
        stack.extend(xs.into_iter().zip(ys));
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use facet_testhelpers::test;

    fn sample() -> (Tree, NodeId, NodeId, NodeId) {
        let mut tree = Tree::new(TreeId(0), NodeData::new("class", "Foo"));
        let root = tree.root;
        let a = tree.add_child(root, NodeData::new("method", "a").with_span(10, 20));
        let b = tree.add_child(root, NodeData::new("method", "b").with_span(21, 30));
        let c = tree.add_child(a, NodeData::new("return", ""));
        tree.recompute_metrics();
        (tree, a, b, c)
    }

    #[test]
    fn test_walk_orders() {
        let (tree, a, b, c) = sample();
        assert_eq!(tree.breadth_first(), vec![tree.root, a, b, c]);
        assert_eq!(tree.post_order(tree.root), vec![c, a, b, tree.root]);
        assert_eq!(tree.descendants(tree.root), vec![a, c, b]);
        assert!(tree.descendants(c).is_empty());
    }

    #[test]
    fn test_positions_and_depths() {
        let (tree, a, b, c) = sample();
        assert_eq!(tree.position(a), 0);
        assert_eq!(tree.position(b), 1);
        assert_eq!(tree.position(tree.root), 0);
        assert_eq!(tree.get(c).depth, 2);
        assert_eq!(tree.get(b).span, 21..30);
        assert_eq!(tree.node_count(), 4);
    }

    #[test]
    fn test_hash_tracks_content() {
        let (tree, _, _, _) = sample();
        let (mut other, a2, _, _) = sample();
        assert_eq!(tree.hash(tree.root), other.hash(other.root));

        other.get_mut(a2).label = "renamed".to_string();
        other.recompute_metrics();
        assert_ne!(tree.hash(tree.root), other.hash(other.root));
    }

    #[test]
    fn test_isomorphic() {
        let (tree, _, _, _) = sample();
        let (other, _, b, _) = sample();
        assert!(isomorphic(&tree, &other));

        let mut changed = other.clone();
        changed.get_mut(b).label = "c".to_string();
        assert!(!isomorphic(&tree, &changed));
    }
}
