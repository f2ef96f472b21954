//! Node correspondences between trees.
//!
//! A [`MappingStore`] is a partial bijection ("mono" mapping), a
//! [`MultiMappingStore`] a partial many-to-many relation. Both are supplied by
//! the caller; the generators only read them.

use core::fmt;

use facet::Facet;
use indexmap::{IndexMap, IndexSet};
use indextree::NodeId;
use rapidhash::RapidHashMap as HashMap;

use crate::tree::{DiffTree, TreeId};

/// A node of some tree, qualified by the tree that owns it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeRef {
    /// Owning tree
    pub tree: TreeId,
    /// Node within that tree
    pub node: NodeId,
}

impl NodeRef {
    /// Qualify `node` with its owning tree.
    pub fn new(tree: TreeId, node: NodeId) -> Self {
        Self { tree, node }
    }

    /// Refer to `node` in the given tree.
    pub fn of<T: DiffTree + ?Sized>(tree: &T, node: NodeId) -> Self {
        Self::new(tree.tree_id(), node)
    }
}

impl fmt::Display for NodeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.tree, usize::from(self.node))
    }
}

/// What a node is mapped to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Partner {
    /// A real node, possibly in a tree other than the diffed pair.
    Node(NodeRef),
    /// Explicitly matched to nothing: the node has no counterpart and needs
    /// no action.
    Nothing,
}

impl Partner {
    /// The partner node, if there is one.
    pub fn node(self) -> Option<NodeRef> {
        match self {
            Partner::Node(node) => Some(node),
            Partner::Nothing => None,
        }
    }
}

impl From<NodeRef> for Partner {
    fn from(node: NodeRef) -> Self {
        Partner::Node(node)
    }
}

/// Errors reported by mapping validation.
#[derive(Facet, Debug)]
#[facet(derive(Error))]
#[repr(u8)]
pub enum MappingError {
    /// node {index} of tree {tree} is already mapped
    AlreadyMapped { tree: u32, index: usize },

    /// node {index} of tree {tree} does not exist
    Dangling { tree: u32, index: usize },

    /// multi-mapping entry for node {index} of tree {tree} is not mirrored
    Unmirrored { tree: u32, index: usize },
}

impl MappingError {
    fn already_mapped(node: NodeRef) -> Self {
        MappingError::AlreadyMapped {
            tree: node.tree.0,
            index: usize::from(node.node),
        }
    }

    fn dangling(node: NodeRef) -> Self {
        MappingError::Dangling {
            tree: node.tree.0,
            index: usize::from(node.node),
        }
    }
}

/// A partial bijection between source-side and destination-side nodes.
///
/// Each side may name nodes of any tree; either side may also be
/// [`Partner::Nothing`].
#[derive(Debug, Default, Clone)]
pub struct MappingStore {
    src_to_dst: HashMap<NodeRef, Partner>,
    dst_to_src: HashMap<NodeRef, Partner>,
    /// All pairs, in insertion order
    pairs: Vec<(Partner, Partner)>,
}

impl MappingStore {
    /// Create an empty mapping.
    pub fn new() -> Self {
        Self::default()
    }

    /// Map `src` to `dst`.
    ///
    /// Neither node may already be mapped; this is checked in debug builds
    /// only. Use [`MappingStore::try_add`] for a checked insert.
    pub fn add(&mut self, src: NodeRef, dst: NodeRef) {
        debug_assert!(!self.is_src_mapped(src), "{src} is already mapped");
        debug_assert!(!self.is_dst_mapped(dst), "{dst} is already mapped");
        self.src_to_dst.insert(src, Partner::Node(dst));
        self.dst_to_src.insert(dst, Partner::Node(src));
        self.pairs.push((Partner::Node(src), Partner::Node(dst)));
    }

    /// Map `src` to `dst`, refusing nodes that are already mapped.
    pub fn try_add(&mut self, src: NodeRef, dst: NodeRef) -> Result<(), MappingError> {
        if self.is_src_mapped(src) {
            return Err(MappingError::already_mapped(src));
        }
        if self.is_dst_mapped(dst) {
            return Err(MappingError::already_mapped(dst));
        }
        self.add(src, dst);
        Ok(())
    }

    /// Record that `src` has no counterpart.
    pub fn add_unmatched_src(&mut self, src: NodeRef) {
        debug_assert!(!self.is_src_mapped(src), "{src} is already mapped");
        self.src_to_dst.insert(src, Partner::Nothing);
        self.pairs.push((Partner::Node(src), Partner::Nothing));
    }

    /// Record that `dst` has no counterpart.
    pub fn add_unmatched_dst(&mut self, dst: NodeRef) {
        debug_assert!(!self.is_dst_mapped(dst), "{dst} is already mapped");
        self.dst_to_src.insert(dst, Partner::Nothing);
        self.pairs.push((Partner::Nothing, Partner::Node(dst)));
    }

    /// Counterpart of a destination node, `None` if it is unmapped.
    #[inline]
    pub fn src_for(&self, dst: NodeRef) -> Option<Partner> {
        self.dst_to_src.get(&dst).copied()
    }

    /// Counterpart of a source node, `None` if it is unmapped.
    #[inline]
    pub fn dst_for(&self, src: NodeRef) -> Option<Partner> {
        self.src_to_dst.get(&src).copied()
    }

    /// Whether a source node is mapped (possibly to nothing).
    #[inline]
    pub fn is_src_mapped(&self, src: NodeRef) -> bool {
        self.src_to_dst.contains_key(&src)
    }

    /// Whether a destination node is mapped (possibly to nothing).
    #[inline]
    pub fn is_dst_mapped(&self, dst: NodeRef) -> bool {
        self.dst_to_src.contains_key(&dst)
    }

    /// Whether `src` and `dst` are mapped to each other.
    pub fn has(&self, src: NodeRef, dst: NodeRef) -> bool {
        self.dst_for(src) == Some(Partner::Node(dst))
    }

    /// All pairs, in insertion order.
    pub fn pairs(&self) -> impl Iterator<Item = (Partner, Partner)> + '_ {
        self.pairs.iter().copied()
    }

    /// Number of pairs.
    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    /// Whether there are no pairs.
    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    /// Check that every endpoint naming `src` or `dst` exists in that tree.
    pub fn validate<S: DiffTree, D: DiffTree>(&self, src: &S, dst: &D) -> Result<(), MappingError> {
        for node in self.pairs.iter().flat_map(|(a, b)| [a.node(), b.node()]).flatten() {
            check_exists(node, src, dst)?;
        }
        Ok(())
    }
}

fn check_exists<S: DiffTree, D: DiffTree>(
    node: NodeRef,
    src: &S,
    dst: &D,
) -> Result<(), MappingError> {
    let exists = if node.tree == src.tree_id() {
        src.contains(node.node)
    } else if node.tree == dst.tree_id() {
        dst.contains(node.node)
    } else {
        // Nodes of other trees cannot be checked from here.
        true
    };
    if exists {
        Ok(())
    } else {
        Err(MappingError::dangling(node))
    }
}

/// A many-to-many relation between source-side and destination-side nodes.
///
/// Insertion order is preserved, which makes cluster enumeration (and so
/// multi-move group ids) deterministic.
#[derive(Debug, Default, Clone)]
pub struct MultiMappingStore {
    src_to_dsts: IndexMap<NodeRef, IndexSet<NodeRef>>,
    dst_to_srcs: IndexMap<NodeRef, IndexSet<NodeRef>>,
}

impl MultiMappingStore {
    /// Create an empty relation.
    pub fn new() -> Self {
        Self::default()
    }

    /// Relate `src` and `dst`. Adding an existing pair is a no-op.
    pub fn add(&mut self, src: NodeRef, dst: NodeRef) {
        self.src_to_dsts.entry(src).or_default().insert(dst);
        self.dst_to_srcs.entry(dst).or_default().insert(src);
    }

    /// Counterparts of a source node.
    pub fn dsts(&self, src: NodeRef) -> Option<&IndexSet<NodeRef>> {
        self.src_to_dsts.get(&src)
    }

    /// Counterparts of a destination node.
    pub fn srcs(&self, dst: NodeRef) -> Option<&IndexSet<NodeRef>> {
        self.dst_to_srcs.get(&dst)
    }

    /// Whether a source node has any counterpart.
    pub fn is_src_mapped(&self, src: NodeRef) -> bool {
        self.src_to_dsts.contains_key(&src)
    }

    /// Whether a destination node has any counterpart.
    pub fn is_dst_mapped(&self, dst: NodeRef) -> bool {
        self.dst_to_srcs.contains_key(&dst)
    }

    /// Whether a source node takes part in a multi-mapping: it has several
    /// counterparts, or its only counterpart has several.
    pub fn is_src_multi_mapped(&self, src: NodeRef) -> bool {
        is_multi(&self.src_to_dsts, &self.dst_to_srcs, src)
    }

    /// Whether a destination node takes part in a multi-mapping.
    pub fn is_dst_multi_mapped(&self, dst: NodeRef) -> bool {
        is_multi(&self.dst_to_srcs, &self.src_to_dsts, dst)
    }

    /// Multi-mapped destination nodes with their source sets, in the order
    /// the destinations were first added.
    pub fn multi_clusters(&self) -> impl Iterator<Item = (NodeRef, &IndexSet<NodeRef>)> + '_ {
        self.dst_to_srcs
            .iter()
            .filter(|(dst, _)| self.is_dst_multi_mapped(**dst))
            .map(|(dst, srcs)| (*dst, srcs))
    }

    /// The one-to-one part of the relation as a [`MappingStore`].
    pub fn mono_mappings(&self) -> MappingStore {
        let mut mono = MappingStore::new();
        for (src, dsts) in &self.src_to_dsts {
            if dsts.len() != 1 || self.is_src_multi_mapped(*src) {
                continue;
            }
            if let Some(dst) = dsts.first() {
                mono.add(*src, *dst);
            }
        }
        mono
    }

    /// Number of related pairs.
    pub fn len(&self) -> usize {
        self.src_to_dsts.values().map(IndexSet::len).sum()
    }

    /// Whether the relation is empty.
    pub fn is_empty(&self) -> bool {
        self.src_to_dsts.is_empty()
    }

    /// Check that both directions mirror each other and that every endpoint
    /// naming `src` or `dst` exists in that tree.
    pub fn validate<S: DiffTree, D: DiffTree>(&self, src: &S, dst: &D) -> Result<(), MappingError> {
        for (s, dsts) in &self.src_to_dsts {
            check_exists(*s, src, dst)?;
            for d in dsts {
                check_exists(*d, src, dst)?;
                if !self.dst_to_srcs.get(d).is_some_and(|srcs| srcs.contains(s)) {
                    return Err(MappingError::Unmirrored {
                        tree: d.tree.0,
                        index: usize::from(d.node),
                    });
                }
            }
        }
        for (d, srcs) in &self.dst_to_srcs {
            let mirrored = srcs
                .iter()
                .all(|s| self.src_to_dsts.get(s).is_some_and(|dsts| dsts.contains(d)));
            if !mirrored {
                return Err(MappingError::Unmirrored {
                    tree: d.tree.0,
                    index: usize::from(d.node),
                });
            }
        }
        Ok(())
    }
}

fn is_multi(
    forward: &IndexMap<NodeRef, IndexSet<NodeRef>>,
    backward: &IndexMap<NodeRef, IndexSet<NodeRef>>,
    node: NodeRef,
) -> bool {
    let Some(partners) = forward.get(&node) else {
        return false;
    };
    if partners.len() > 1 {
        return true;
    }
    partners
        .first()
        .and_then(|p| backward.get(p))
        .is_some_and(|back| back.len() > 1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tree::{NodeData, Tree};
    use facet_testhelpers::test;

    fn tree(id: u32, leaves: usize) -> Tree {
        let mut tree = Tree::new(TreeId(id), NodeData::new("root", ""));
        for i in 0..leaves {
            tree.add_child(tree.root, NodeData::new("leaf", format!("{i}")));
        }
        tree
    }

    fn leaf(tree: &Tree, i: usize) -> NodeRef {
        let node = tree.children(tree.root).nth(i).unwrap();
        NodeRef::of(tree, node)
    }

    #[test]
    fn test_mono_lookups() {
        let src = tree(0, 2);
        let dst = tree(1, 2);
        let mut mono = MappingStore::new();
        mono.add(leaf(&src, 0), leaf(&dst, 1));
        mono.add_unmatched_src(leaf(&src, 1));

        assert!(mono.has(leaf(&src, 0), leaf(&dst, 1)));
        assert_eq!(mono.src_for(leaf(&dst, 1)), Some(Partner::Node(leaf(&src, 0))));
        assert_eq!(mono.dst_for(leaf(&src, 1)), Some(Partner::Nothing));
        assert_eq!(mono.dst_for(NodeRef::of(&src, src.root)), None);
        assert!(!mono.is_dst_mapped(leaf(&dst, 0)));
        assert_eq!(mono.len(), 2);
        assert!(mono.validate(&src, &dst).is_ok());
    }

    #[test]
    fn test_try_add_rejects_remapping() {
        let src = tree(0, 2);
        let dst = tree(1, 2);
        let mut mono = MappingStore::new();
        mono.try_add(leaf(&src, 0), leaf(&dst, 0)).unwrap();
        let err = mono.try_add(leaf(&src, 0), leaf(&dst, 1)).unwrap_err();
        assert!(matches!(err, MappingError::AlreadyMapped { tree: 0, .. }));
        assert_eq!(mono.len(), 1);
    }

    #[test]
    fn test_validate_reports_dangling() {
        let src = tree(0, 1);
        let dst = tree(1, 1);
        let bigger = tree(1, 5);
        let mut mono = MappingStore::new();
        mono.add(leaf(&src, 0), leaf(&bigger, 4));
        let err = mono.validate(&src, &dst).unwrap_err();
        assert!(matches!(err, MappingError::Dangling { tree: 1, .. }));
    }

    #[test]
    fn test_multi_mapped_detection() {
        let src = tree(0, 3);
        let dst = tree(1, 3);
        let mut multi = MultiMappingStore::new();
        // src 0 -> dst 0, dst 1
        multi.add(leaf(&src, 0), leaf(&dst, 0));
        multi.add(leaf(&src, 0), leaf(&dst, 1));
        // src 1 -> dst 2 only
        multi.add(leaf(&src, 1), leaf(&dst, 2));

        assert!(multi.is_src_multi_mapped(leaf(&src, 0)));
        assert!(multi.is_dst_multi_mapped(leaf(&dst, 0)));
        assert!(multi.is_dst_multi_mapped(leaf(&dst, 1)));
        assert!(!multi.is_src_multi_mapped(leaf(&src, 1)));
        assert!(!multi.is_dst_multi_mapped(leaf(&dst, 2)));
        assert!(!multi.is_src_multi_mapped(leaf(&src, 2)));

        let clusters: Vec<NodeRef> = multi.multi_clusters().map(|(d, _)| d).collect();
        assert_eq!(clusters, vec![leaf(&dst, 0), leaf(&dst, 1)]);

        let mono = multi.mono_mappings();
        assert_eq!(mono.len(), 1);
        assert!(mono.has(leaf(&src, 1), leaf(&dst, 2)));
        assert!(multi.validate(&src, &dst).is_ok());
    }
}
