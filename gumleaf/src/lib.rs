//! # Gumleaf
//!
//! Chawathe edit scripts over labeled ordered trees, extended with
//! multi-mappings and cross-container moves.
//!
//! Gumleaf does not match trees. It takes two trees plus a node
//! correspondence computed elsewhere and produces the ordered list of edit
//! actions that turns one into the other.
//!
//! ## Pipeline
//!
//! 1. **Alignment** ([`generate_alignment`]): Insert, Update, Move, Delete,
//!    plus MoveIn/MoveOut for nodes whose counterpart lives in another
//!    container, derived from the one-to-one ("mono") mapping.
//! 2. **Multi-moves** ([`MultiMoveGenerator`]): one MultiMove per edge of every
//!    many-to-many cluster, grouped by cluster.
//! 3. **Simplification** ([`compact_subtrees`], [`prune_multi_moves`]): whole
//!    subtree inserts and deletes become TreeInsert/TreeDelete, and multi-moves
//!    implied by an ancestor's multi-move are dropped.
//!
//! ## Usage
//!
//! ```
//! use gumleaf::{EditOp, MappingStore, MultiMappingStore, NodeData, NodeRef, Tree, TreeId, diff_trees};
//!
//! // A(B, C) -> A(C, B)
//! let mut src = Tree::new(TreeId(0), NodeData::new("class", "A"));
//! let b = src.add_child(src.root, NodeData::new("field", "B"));
//! let c = src.add_child(src.root, NodeData::new("field", "C"));
//!
//! let mut dst = Tree::new(TreeId(1), NodeData::new("class", "A"));
//! let c2 = dst.add_child(dst.root, NodeData::new("field", "C"));
//! let b2 = dst.add_child(dst.root, NodeData::new("field", "B"));
//!
//! let mut mono = MappingStore::new();
//! mono.add(NodeRef::of(&src, src.root), NodeRef::of(&dst, dst.root));
//! mono.add(NodeRef::of(&src, b), NodeRef::of(&dst, b2));
//! mono.add(NodeRef::of(&src, c), NodeRef::of(&dst, c2));
//!
//! let ops = diff_trees(&src, &dst, &mono, &MultiMappingStore::new());
//! assert_eq!(ops.len(), 1);
//! assert!(matches!(ops[0], EditOp::Move { .. }));
//! ```

#![warn(missing_docs)]
#![warn(clippy::std_instead_of_core)]

pub use indextree;

mod tracing_macros;
pub(crate) use tracing_macros::{debug, trace};

/// Parallel diffing of many tree pairs
pub mod batch;
mod chawathe;
mod container;
/// Mono and multi node mappings
pub mod mapping;
mod multi_move;
/// Re-applying a script to a source tree
pub mod replay;
mod simplify;
/// Tree representation
pub mod tree;

pub use chawathe::{CROSS_CONTAINER_POSITION, EditOp, generate_alignment, lcs};
pub use container::{ContainerNames, ContainerResolver};
pub use mapping::{MappingError, MappingStore, MultiMappingStore, NodeRef, Partner};
pub use multi_move::{MultiMoveGenerator, MultiMoves};
pub use replay::{ReplayError, replay};
pub use simplify::{compact_subtrees, prune_multi_moves};
pub use tree::{DiffTree, NodeData, NodeHash, Tree, TreeId, isomorphic};

/// Which passes [`diff_with_mappings`] runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScriptConfig {
    /// Run both simplification passes
    pub simplify: bool,
    /// Emit MultiMove actions for multi-mapping clusters
    pub multi_moves: bool,
}

impl Default for ScriptConfig {
    fn default() -> Self {
        Self {
            simplify: true,
            multi_moves: true,
        }
    }
}

/// An edit script: the alignment actions and the multi-moves, kept apart
/// until the caller asks for one flat list.
#[derive(Debug, Clone, Default)]
pub struct EditScript {
    /// Alignment actions, in emission order
    pub ops: Vec<EditOp>,
    /// MultiMove actions with their lookup indexes
    pub multi_moves: MultiMoves,
}

impl EditScript {
    /// Total number of actions.
    pub fn len(&self) -> usize {
        self.ops.len() + self.multi_moves.len()
    }

    /// Whether the script has no actions at all.
    pub fn is_empty(&self) -> bool {
        self.ops.is_empty() && self.multi_moves.is_empty()
    }

    /// All actions in order: alignment actions first, then multi-moves.
    pub fn into_ops(self) -> Vec<EditOp> {
        let mut ops = self.ops;
        ops.extend(self.multi_moves.into_ops());
        ops
    }
}

/// Generate the raw, unsimplified edit script for `src` → `dst`.
///
/// See [`generate_alignment`] for the preconditions on the mappings.
pub fn generate_edit_script<S, D, R>(
    src: &S,
    dst: &D,
    mono: &MappingStore,
    multi: &MultiMappingStore,
    resolver: &R,
) -> EditScript
where
    S: DiffTree,
    D: DiffTree,
    R: ContainerResolver + ?Sized,
{
    EditScript {
        ops: generate_alignment(src, dst, mono, multi, resolver),
        multi_moves: MultiMoveGenerator::new().generate(src, dst, multi),
    }
}

/// Run both simplification passes over a script produced for `src` → `dst`.
pub fn simplify_edit_script<S, D>(script: EditScript, src: &S, dst: &D) -> EditScript
where
    S: DiffTree,
    D: DiffTree,
{
    EditScript {
        ops: compact_subtrees(script.ops, src, dst),
        multi_moves: prune_multi_moves(script.multi_moves, src, dst),
    }
}

/// Compute the final ordered action list for `src` → `dst`.
pub fn diff_with_mappings<S, D, R>(
    src: &S,
    dst: &D,
    mono: &MappingStore,
    multi: &MultiMappingStore,
    resolver: &R,
    config: &ScriptConfig,
) -> Vec<EditOp>
where
    S: DiffTree,
    D: DiffTree,
    R: ContainerResolver + ?Sized,
{
    let mut script = EditScript {
        ops: generate_alignment(src, dst, mono, multi, resolver),
        multi_moves: MultiMoves::default(),
    };
    if config.multi_moves {
        script.multi_moves = MultiMoveGenerator::new().generate(src, dst, multi);
    }
    if config.simplify {
        script = simplify_edit_script(script, src, dst);
    }
    debug!(
        ops = script.ops.len(),
        multi_moves = script.multi_moves.len(),
        "diff_with_mappings done"
    );
    script.into_ops()
}

/// [`diff_with_mappings`] with the default configuration and no container
/// names, so no MoveIn/MoveOut is ever reported.
pub fn diff_trees<S, D>(src: &S, dst: &D, mono: &MappingStore, multi: &MultiMappingStore) -> Vec<EditOp>
where
    S: DiffTree,
    D: DiffTree,
{
    diff_with_mappings(src, dst, mono, multi, &(), &ScriptConfig::default())
}
