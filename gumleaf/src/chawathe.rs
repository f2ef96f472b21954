//! Chawathe edit script generation, extended with multi-mappings.
//!
//! Generates Insert/Update/Move/Delete plus cross-container MoveIn/MoveOut from
//! a mono mapping. Based on "Change Detection in Hierarchically Structured
//! Information" (Chawathe et al., 1996), in the formulation used by GumTree.
//!
//! All structural edits are simulated on a working copy of the source tree;
//! the source and destination trees are only read. The algorithm runs in two
//! passes:
//! 1. Breadth-first over the destination: insert, update and move so that the
//!    copy converges to the destination, aligning each node's children with an
//!    LCS of the already-consistent order.
//! 2. Post-order over the copy: delete what is still unmapped and report nodes
//!    whose counterpart lives in another container.
//!
//! Nodes taking part in a multi-mapping are left alone here; they are
//! reported by [`crate::multi_move`].

use core::fmt;

use indextree::{Arena, NodeEdge, NodeId};
use rapidhash::{RapidHashMap as HashMap, RapidHashSet as HashSet};

use crate::container::ContainerResolver;
use crate::mapping::{MappingStore, MultiMappingStore, NodeRef, Partner};
use crate::tree::DiffTree;
use crate::{debug, trace};

/// Position carried by MoveIn/MoveOut actions.
pub const CROSS_CONTAINER_POSITION: usize = 1;

/// An edit operation in the script.
#[derive(Clone, PartialEq, Eq)]
pub enum EditOp {
    /// Insert a new node.
    Insert {
        /// The new node in the destination tree
        node: NodeRef,
        /// Parent: a source node, or a destination node inserted earlier.
        /// `None` when inserted at the top level.
        parent: Option<NodeRef>,
        /// Position among the parent's children at the time of insertion
        position: usize,
    },

    /// Delete a node.
    Delete {
        /// The node in the source tree
        node: NodeRef,
    },

    /// Relabel a node in place.
    Update {
        /// The node in the source tree
        node: NodeRef,
        /// The destination label
        label: String,
    },

    /// Move a node (with its subtree) under a new parent.
    Move {
        /// The moved node
        node: NodeRef,
        /// New parent, `None` for a reorder at the synthetic top level
        parent: Option<NodeRef>,
        /// Position among the new parent's children
        position: usize,
    },

    /// A destination node whose counterpart lives in another container.
    MoveIn {
        /// The counterpart in the other container
        node: NodeRef,
        /// The destination node it arrives as
        counterpart: NodeRef,
        /// Name of the container it comes from
        container: String,
        /// Always [`CROSS_CONTAINER_POSITION`]
        position: usize,
    },

    /// A source node whose counterpart lives in another container.
    MoveOut {
        /// The node in the source tree
        node: NodeRef,
        /// The counterpart in the other container
        counterpart: NodeRef,
        /// Name of the container it goes to
        container: String,
        /// Always [`CROSS_CONTAINER_POSITION`]
        position: usize,
    },

    /// Insert a whole destination subtree at once.
    TreeInsert {
        /// Root of the inserted subtree in the destination tree
        node: NodeRef,
        /// Parent, as for [`EditOp::Insert`]
        parent: Option<NodeRef>,
        /// Position among the parent's children
        position: usize,
    },

    /// Delete a whole source subtree at once.
    TreeDelete {
        /// Root of the deleted subtree in the source tree
        node: NodeRef,
    },

    /// One edge of a multi-mapping cluster.
    MultiMove {
        /// Source endpoint
        src: NodeRef,
        /// Destination endpoint
        dst: NodeRef,
        /// Cluster id, shared by every edge of one cluster
        group: u32,
        /// Both endpoints are leaves with different content
        updated: bool,
    },
}

impl EditOp {
    /// Stable action name, as used by downstream classifiers and renderers.
    pub fn name(&self) -> &'static str {
        match self {
            EditOp::Insert { .. } => "insert-node",
            EditOp::Delete { .. } => "delete-node",
            EditOp::Update { .. } => "update-node",
            EditOp::Move { .. } => "move-tree",
            EditOp::MoveIn { .. } => "move-in",
            EditOp::MoveOut { .. } => "move-out",
            EditOp::TreeInsert { .. } => "insert-tree",
            EditOp::TreeDelete { .. } => "delete-tree",
            EditOp::MultiMove { .. } => "multi-move-tree",
        }
    }

    /// The node the action is about: the inserted, deleted, updated or moved
    /// node, or the source endpoint of a multi-move.
    pub fn node(&self) -> NodeRef {
        match self {
            EditOp::Insert { node, .. }
            | EditOp::Delete { node }
            | EditOp::Update { node, .. }
            | EditOp::Move { node, .. }
            | EditOp::MoveIn { node, .. }
            | EditOp::MoveOut { node, .. }
            | EditOp::TreeInsert { node, .. }
            | EditOp::TreeDelete { node } => *node,
            EditOp::MultiMove { src, .. } => *src,
        }
    }
}

fn write_parent(f: &mut fmt::Formatter<'_>, parent: &Option<NodeRef>) -> fmt::Result {
    match parent {
        Some(parent) => write!(f, "{parent}"),
        None => write!(f, "top"),
    }
}

impl fmt::Display for EditOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
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
                write!(f, "{}({node} @{position} under ", self.name())?;
                write_parent(f, parent)?;
                write!(f, ")")
            }
            EditOp::Delete { node } | EditOp::TreeDelete { node } => {
                write!(f, "{}({node})", self.name())
            }
            EditOp::Update { node, label } => write!(f, "update-node({node} → {label:?})"),
            EditOp::Move {
                node,
                parent,
                position,
            } => {
                write!(f, "move-tree({node} @{position} under ")?;
                write_parent(f, parent)?;
                write!(f, ")")
            }
            EditOp::MoveIn {
                node,
                counterpart,
                container,
                position,
            }
            | EditOp::MoveOut {
                node,
                counterpart,
                container,
                position,
            } => write!(
                f,
                "{}({node} ↔ {counterpart} in {container} @{position})",
                self.name()
            ),
            EditOp::MultiMove {
                src,
                dst,
                group,
                updated,
            } => {
                write!(f, "multi-move-tree({src} → {dst} #{group}")?;
                if *updated {
                    write!(f, " updated")?;
                }
                write!(f, ")")
            }
        }
    }
}

impl fmt::Debug for EditOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Reuse Display implementation for Debug
        fmt::Display::fmt(self, f)
    }
}

/// Wrapper for collecting edit operations with automatic tracing.
struct Ops {
    inner: Vec<EditOp>,
}

impl Ops {
    fn new() -> Self {
        Self { inner: Vec::new() }
    }

    fn push(&mut self, op: EditOp) {
        debug!(%op, "emit");
        self.inner.push(op);
    }

    fn into_inner(self) -> Vec<EditOp> {
        self.inner
    }
}

/// Where a working-copy node came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Origin {
    /// Copy of a source node
    Src(NodeId),
    /// Placeholder for an inserted destination node
    Inserted(NodeId),
    /// The synthetic parent of the copied root
    FakeRoot,
}

#[derive(Debug, Clone)]
struct CopyNode {
    origin: Origin,
    label: String,
}

/// Mutable clone of the source tree, wrapped under a fake root.
struct WorkingCopy {
    arena: Arena<CopyNode>,
    fake_root: NodeId,
    orig_to_copy: HashMap<NodeId, NodeId>,
}

impl WorkingCopy {
    fn new<S: DiffTree>(src: &S) -> Self {
        let mut arena = Arena::with_capacity(src.node_count() + 1);
        let fake_root = arena.new_node(CopyNode {
            origin: Origin::FakeRoot,
            label: String::new(),
        });
        let mut orig_to_copy = HashMap::default();
        let mut stack = vec![(src.root(), fake_root)];
        while let Some((orig, parent)) = stack.pop() {
            let copy = arena.new_node(CopyNode {
                origin: Origin::Src(orig),
                label: src.label(orig).to_string(),
            });
            parent.append(copy, &mut arena);
            orig_to_copy.insert(orig, copy);
            let children: Vec<NodeId> = src.children(orig).collect();
            stack.extend(children.into_iter().rev().map(|c| (c, copy)));
        }
        Self {
            arena,
            fake_root,
            orig_to_copy,
        }
    }

    fn node(&self, id: NodeId) -> &CopyNode {
        self.arena[id].get()
    }

    fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.arena[id].parent()
    }

    fn children(&self, id: NodeId) -> Vec<NodeId> {
        id.children(&self.arena).collect()
    }

    fn position(&self, id: NodeId) -> usize {
        id.preceding_siblings(&self.arena).count() - 1
    }

    fn new_placeholder(&mut self, dst_node: NodeId, label: &str) -> NodeId {
        self.arena.new_node(CopyNode {
            origin: Origin::Inserted(dst_node),
            label: label.to_string(),
        })
    }

    /// Splice a detached node into `parent`'s children at `position`.
    fn insert_child(&mut self, parent: NodeId, child: NodeId, position: usize) {
        let sibling = parent.children(&self.arena).nth(position);
        match sibling {
            Some(sibling) => sibling.insert_before(child, &mut self.arena),
            None => parent.append(child, &mut self.arena),
        }
    }

    /// Hang a node with no destination-side parent off the fake root.
    fn park(&mut self, id: NodeId) {
        self.fake_root.append(id, &mut self.arena);
    }

    fn detach(&mut self, id: NodeId) {
        id.detach(&mut self.arena);
    }

    fn post_order(&self) -> Vec<NodeId> {
        self.fake_root
            .traverse(&self.arena)
            .filter_map(|edge| match edge {
                NodeEdge::End(id) => Some(id),
                NodeEdge::Start(_) => None,
            })
            .collect()
    }
}

/// The mono mapping projected onto (working copy, destination).
///
/// Destination keys are destination-tree nodes; a `None` value means the node
/// is mapped, but not to anything in the copy (foreign or nothing).
#[derive(Default)]
struct WorkingMapping {
    copy_to_dst: HashMap<NodeId, Partner>,
    dst_to_copy: HashMap<NodeId, Option<NodeId>>,
}

impl WorkingMapping {
    fn add(&mut self, copy: NodeId, dst: NodeId, dst_ref: NodeRef) {
        self.copy_to_dst.insert(copy, Partner::Node(dst_ref));
        self.dst_to_copy.insert(dst, Some(copy));
    }

    fn is_dst_mapped(&self, dst: NodeId) -> bool {
        self.dst_to_copy.contains_key(&dst)
    }

    fn copy_for(&self, dst: NodeId) -> Option<NodeId> {
        self.dst_to_copy.get(&dst).copied().flatten()
    }

    fn dst_for(&self, copy: NodeId) -> Option<Partner> {
        self.copy_to_dst.get(&copy).copied()
    }
}

/// State of one generation run.
struct Generator<'a, S, D, R: ?Sized> {
    src: &'a S,
    dst: &'a D,
    mono: &'a MappingStore,
    multi: &'a MultiMappingStore,
    resolver: &'a R,
    copy: WorkingCopy,
    mapping: WorkingMapping,
    src_in_order: HashSet<NodeId>,
    dst_in_order: HashSet<NodeId>,
    ops: Ops,
}

/// Generate the ordinary (non multi-move) part of an edit script.
///
/// `mono` must be a partial bijection whose source side names nodes of `src`
/// (or of other trees) and whose destination side names nodes of `dst` (or of
/// other trees); nodes taking part in `multi` should not also appear in
/// `mono`. Violations are not detected and give an unspecified, but
/// deterministic, script. `src` and `dst` must have distinct tree ids.
///
/// Cross-container moves are tagged with names from `resolver`; nodes whose
/// container cannot be named produce no MoveIn/MoveOut.
pub fn generate_alignment<S, D, R>(
    src: &S,
    dst: &D,
    mono: &MappingStore,
    multi: &MultiMappingStore,
    resolver: &R,
) -> Vec<EditOp>
where
    S: DiffTree,
    D: DiffTree,
    R: ContainerResolver + ?Sized,
{
    debug_assert_ne!(
        src.tree_id(),
        dst.tree_id(),
        "source and destination need distinct tree ids"
    );
    trace!(
        mono = mono.len(),
        multi = multi.len(),
        "generate_alignment start"
    );
    let mut generator = Generator::new(src, dst, mono, multi, resolver);
    generator.align_destination();
    generator.delete_leftovers();
    let ops = generator.ops.into_inner();
    debug!(total_ops = ops.len(), "generate_alignment done");
    ops
}

impl<'a, S, D, R> Generator<'a, S, D, R>
where
    S: DiffTree,
    D: DiffTree,
    R: ContainerResolver + ?Sized,
{
    fn new(
        src: &'a S,
        dst: &'a D,
        mono: &'a MappingStore,
        multi: &'a MultiMappingStore,
        resolver: &'a R,
    ) -> Self {
        let copy = WorkingCopy::new(src);
        let mut mapping = WorkingMapping::default();
        let dst_tree = dst.tree_id();
        for (s, d) in mono.pairs() {
            let Partner::Node(d_ref) = d else {
                // Source mapped to nothing: keep it out of the delete pass.
                if let Some(s_ref) = s.node()
                    && let Some(&c) = copy.orig_to_copy.get(&s_ref.node)
                    && s_ref.tree == src.tree_id()
                {
                    mapping.copy_to_dst.insert(c, Partner::Nothing);
                }
                continue;
            };
            let copy_node = s
                .node()
                .filter(|s_ref| s_ref.tree == src.tree_id())
                .and_then(|s_ref| copy.orig_to_copy.get(&s_ref.node).copied());
            if let Some(c) = copy_node {
                mapping.copy_to_dst.insert(c, Partner::Node(d_ref));
            }
            if d_ref.tree == dst_tree {
                mapping.dst_to_copy.insert(d_ref.node, copy_node);
            }
        }
        Self {
            src,
            dst,
            mono,
            multi,
            resolver,
            copy,
            mapping,
            src_in_order: HashSet::default(),
            dst_in_order: HashSet::default(),
            ops: Ops::new(),
        }
    }

    fn dst_ref(&self, id: NodeId) -> NodeRef {
        NodeRef::of(self.dst, id)
    }

    fn src_ref(&self, id: NodeId) -> NodeRef {
        NodeRef::of(self.src, id)
    }

    /// The node a working-copy node stands for, as reported in actions.
    fn origin_ref(&self, copy: NodeId) -> Option<NodeRef> {
        match self.copy.node(copy).origin {
            Origin::Src(id) => Some(self.src_ref(id)),
            Origin::Inserted(id) => Some(self.dst_ref(id)),
            Origin::FakeRoot => None,
        }
    }

    /// Phase 1: walk the destination breadth-first.
    fn align_destination(&mut self) {
        let dst_root = self.dst.root();
        for x in self.dst.breadth_first() {
            let y = self.dst.parent(x);
            // The destination root hangs off the (virtual) destination fake
            // root, which is mapped to the copy's fake root.
            let z = match y {
                Some(y) => self.mapping.copy_for(y),
                None => Some(self.copy.fake_root),
            };

            let w = if !self.mapping.is_dst_mapped(x) {
                if self.multi.is_dst_multi_mapped(self.dst_ref(x)) {
                    trace!(x = usize::from(x), "skipping multi-mapped destination");
                    continue;
                }
                self.insert(x, z)
            } else {
                let Some(w) = self.mapping.copy_for(x) else {
                    self.move_in(x);
                    continue;
                };
                if x != dst_root {
                    self.update_and_move(x, z, w);
                }
                w
            };

            self.src_in_order.insert(w);
            self.dst_in_order.insert(x);
            self.align_children(w, x);
        }
    }

    fn insert(&mut self, x: NodeId, z: Option<NodeId>) -> NodeId {
        let k = self.find_pos(x);
        let node = self.dst_ref(x);
        let parent = z.and_then(|z| self.origin_ref(z));
        self.ops.push(EditOp::Insert {
            node,
            parent,
            position: k,
        });
        let w = self.copy.new_placeholder(x, self.dst.label(x));
        self.mapping.add(w, x, node);
        match z {
            Some(z) => self.copy.insert_child(z, w, k),
            // Keep it reachable: nodes moved under it later must still be
            // visited by the delete pass.
            None => self.copy.park(w),
        }
        w
    }

    /// `x` is mapped, but not to anything in the working copy.
    fn move_in(&mut self, x: NodeId) {
        let counterpart = self.dst_ref(x);
        let Some(Partner::Node(origin)) = self.mono.src_for(counterpart) else {
            return;
        };
        if origin.tree == self.src.tree_id() {
            return;
        }
        let Some(container) = self.resolver.container_name(origin) else {
            trace!(%origin, "no container name, dropping move-in");
            return;
        };
        self.ops.push(EditOp::MoveIn {
            node: origin,
            counterpart,
            container,
            position: CROSS_CONTAINER_POSITION,
        });
    }

    fn update_and_move(&mut self, x: NodeId, z: Option<NodeId>, w: NodeId) {
        let v = self.copy.parent(w);

        let label = self.dst.label(x);
        if self.copy.node(w).label != label {
            let label = label.to_string();
            if let Some(node) = self.origin_ref(w) {
                self.ops.push(EditOp::Update {
                    node,
                    label: label.clone(),
                });
            }
            self.copy.arena[w].get_mut().label = label;
        }

        let Some(v) = v else {
            return;
        };
        match z {
            Some(z) if z != v => {
                let k = self.find_pos(x);
                let parent = self.origin_ref(z);
                if let Some(node) = self.origin_ref(w) {
                    self.ops.push(EditOp::Move {
                        node,
                        parent,
                        position: k,
                    });
                }
                self.copy.detach(w);
                self.copy.insert_child(z, w, k);
            }
            Some(_) => {}
            None => {
                // The destination parent has no copy: it was skipped as
                // multi-mapped, or its counterpart lives elsewhere. Report a
                // rootless move and leave `w` where it is, so the delete pass
                // still reaches its subtree.
                let k = self.find_pos(x);
                if let Some(node) = self.origin_ref(w) {
                    trace!(%node, position = k, "rootless move");
                    self.ops.push(EditOp::Move {
                        node,
                        parent: None,
                        position: k,
                    });
                }
            }
        }
    }

    /// Re-establish the order of `w`'s children against `x`'s.
    fn align_children(&mut self, w: NodeId, x: NodeId) {
        let w_children = self.copy.children(w);
        let x_children: Vec<NodeId> = self.dst.children(x).collect();
        for c in &w_children {
            self.src_in_order.remove(c);
        }
        for c in &x_children {
            self.dst_in_order.remove(c);
        }
        let w_set: HashSet<NodeId> = w_children.iter().copied().collect();
        let x_set: HashSet<NodeId> = x_children.iter().copied().collect();

        let dst_tree = self.dst.tree_id();
        let s1: Vec<NodeId> = w_children
            .iter()
            .copied()
            .filter(|c| {
                matches!(
                    self.mapping.dst_for(*c),
                    Some(Partner::Node(d)) if d.tree == dst_tree && x_set.contains(&d.node)
                )
            })
            .collect();
        let s2: Vec<NodeId> = x_children
            .iter()
            .copied()
            .filter(|c| self.mapping.copy_for(*c).is_some_and(|a| w_set.contains(&a)))
            .collect();

        let lcs = lcs(&s1, &s2, |a, b| self.mapping.copy_for(b) == Some(a));
        for &(a, b) in &lcs {
            self.src_in_order.insert(a);
            self.dst_in_order.insert(b);
        }
        let in_lcs: HashSet<(NodeId, NodeId)> = lcs.into_iter().collect();

        for &b in &s2 {
            for &a in &s1 {
                if self.mapping.copy_for(b) != Some(a) || in_lcs.contains(&(a, b)) {
                    continue;
                }
                self.copy.detach(a);
                let k = self.find_pos(b);
                let parent = self.origin_ref(w);
                if let Some(node) = self.origin_ref(a) {
                    self.ops.push(EditOp::Move {
                        node,
                        parent,
                        position: k,
                    });
                }
                self.copy.insert_child(w, a, k);
                self.src_in_order.insert(a);
                self.dst_in_order.insert(b);
            }
        }
    }

    /// Index in the working copy at which the counterpart of `x` belongs.
    fn find_pos(&self, x: NodeId) -> usize {
        let siblings: Vec<NodeId> = match self.dst.parent(x) {
            Some(y) => self.dst.children(y).collect(),
            None => vec![x],
        };
        if let Some(first) = siblings.iter().find(|c| self.dst_in_order.contains(*c))
            && *first == x
        {
            return 0;
        }

        let Some(xpos) = siblings.iter().position(|c| *c == x) else {
            return 0;
        };
        let Some(v) = siblings[..xpos]
            .iter()
            .rev()
            .find(|c| self.dst_in_order.contains(*c))
        else {
            return 0;
        };
        let Some(u) = self.mapping.copy_for(*v) else {
            debug_assert!(false, "in-order destination node without a copy");
            return 0;
        };
        self.copy.position(u) + 1
    }

    /// Phase 2: walk the copy post-order, deleting leftovers and reporting
    /// nodes that moved to other containers.
    fn delete_leftovers(&mut self) {
        let dst_tree = self.dst.tree_id();
        for w in self.copy.post_order() {
            let Origin::Src(orig) = self.copy.node(w).origin else {
                continue;
            };
            let node = self.src_ref(orig);

            if self.multi.is_src_multi_mapped(node) {
                let foreign: Vec<NodeRef> = self
                    .multi
                    .dsts(node)
                    .into_iter()
                    .flatten()
                    .copied()
                    .filter(|d| d.tree != dst_tree)
                    .collect();
                for counterpart in foreign {
                    self.move_out(node, counterpart);
                }
                continue;
            }

            match self.mapping.dst_for(w) {
                None => self.ops.push(EditOp::Delete { node }),
                Some(Partner::Node(counterpart)) if counterpart.tree != dst_tree => {
                    self.move_out(node, counterpart);
                }
                Some(_) => {}
            }
        }
    }

    fn move_out(&mut self, node: NodeRef, counterpart: NodeRef) {
        let Some(container) = self.resolver.container_name(counterpart) else {
            trace!(%counterpart, "no container name, dropping move-out");
            return;
        };
        self.ops.push(EditOp::MoveOut {
            node,
            counterpart,
            container,
            position: CROSS_CONTAINER_POSITION,
        });
    }
}

/// Longest common subsequence of `xs` and `ys`, where `eq(x, y)` decides
/// whether two elements correspond. Returns the matched pairs in order.
///
/// Ties prefer skipping elements of `xs`, so of several equally long
/// subsequences the one using the latest `xs` elements wins.
pub fn lcs<A, B, F>(xs: &[A], ys: &[B], eq: F) -> Vec<(A, B)>
where
    A: Copy,
    B: Copy,
    F: Fn(A, B) -> bool,
{
    let (m, n) = (xs.len(), ys.len());
    // opt[i][j] = LCS length of xs[i..] and ys[j..]
    let mut opt = vec![vec![0usize; n + 1]; m + 1];
    for i in (0..m).rev() {
        for j in (0..n).rev() {
            opt[i][j] = if eq(xs[i], ys[j]) {
                opt[i + 1][j + 1] + 1
            } else {
                opt[i + 1][j].max(opt[i][j + 1])
            };
        }
    }

    let mut pairs = Vec::with_capacity(opt[0][0]);
    let (mut i, mut j) = (0, 0);
    while i < m && j < n {
        if eq(xs[i], ys[j]) {
            pairs.push((xs[i], ys[j]));
            i += 1;
            j += 1;
        } else if opt[i + 1][j] >= opt[i][j + 1] {
            i += 1;
        } else {
            j += 1;
        }
    }
    pairs
}
