//! Edit script simplification.
//!
//! Two independent passes:
//! - [`compact_subtrees`] folds runs of Insert (Delete) actions that cover a
//!   whole subtree into a single TreeInsert (TreeDelete).
//! - [`prune_multi_moves`] drops MultiMove actions already implied by a
//!   MultiMove of an ancestor.

use indextree::NodeId;
use rapidhash::{RapidHashMap as HashMap, RapidHashSet as HashSet};

use crate::chawathe::EditOp;
use crate::multi_move::MultiMoves;
use crate::tree::DiffTree;
use crate::{debug, trace};

/// For every node of `tree`, whether all of its proper descendants satisfy
/// `marked`. Leaves are trivially covered.
fn fully_covered<T, F>(tree: &T, marked: F) -> HashMap<NodeId, bool>
where
    T: DiffTree,
    F: Fn(NodeId) -> bool,
{
    let mut covered: HashMap<NodeId, bool> = HashMap::default();
    for node in tree.post_order(tree.root()) {
        let all = tree
            .children(node)
            .all(|c| marked(c) && covered.get(&c).copied().unwrap_or(false));
        covered.insert(node, all);
    }
    covered
}

/// What to do with one Insert or Delete.
enum Fold {
    Keep,
    Drop,
    Subtree,
}

fn fold_decision<T: DiffTree>(
    tree: &T,
    node: NodeId,
    marked: &HashSet<NodeId>,
    covered: &HashMap<NodeId, bool>,
) -> Fold {
    let is_covered = |n: NodeId| covered.get(&n).copied().unwrap_or(false);
    if let Some(parent) = tree.parent(node)
        && marked.contains(&parent)
        && is_covered(parent)
    {
        return Fold::Drop;
    }
    if !tree.is_leaf(node) && is_covered(node) {
        return Fold::Subtree;
    }
    Fold::Keep
}

/// Replace whole-subtree Insert and Delete runs with TreeInsert and
/// TreeDelete.
///
/// An Insert whose parent is inserted along with its entire subtree is
/// dropped; the topmost such Insert becomes a TreeInsert in place. Deletes
/// are folded the same way against the source tree. All other actions pass
/// through untouched and in order.
pub fn compact_subtrees<S, D>(ops: Vec<EditOp>, src: &S, dst: &D) -> Vec<EditOp>
where
    S: DiffTree,
    D: DiffTree,
{
    let (src_tree, dst_tree) = (src.tree_id(), dst.tree_id());
    let mut inserted: HashSet<NodeId> = HashSet::default();
    let mut deleted: HashSet<NodeId> = HashSet::default();
    for op in &ops {
        match op {
            EditOp::Insert { node, .. } if node.tree == dst_tree => {
                inserted.insert(node.node);
            }
            EditOp::Delete { node } if node.tree == src_tree => {
                deleted.insert(node.node);
            }
            _ => {}
        }
    }
    if inserted.is_empty() && deleted.is_empty() {
        return ops;
    }

    let inserted_covered = fully_covered(dst, |n| inserted.contains(&n));
    let deleted_covered = fully_covered(src, |n| deleted.contains(&n));

    debug!(ops = ops.len(), "compact_subtrees start");
    let compacted: Vec<EditOp> = ops
        .into_iter()
        .filter_map(|op| match op {
            EditOp::Insert {
                node,
                parent,
                position,
            } if node.tree == dst_tree => {
                match fold_decision(dst, node.node, &inserted, &inserted_covered) {
                    Fold::Keep => Some(EditOp::Insert {
                        node,
                        parent,
                        position,
                    }),
                    Fold::Drop => {
                        trace!(%node, "insert implied by parent");
                        None
                    }
                    Fold::Subtree => Some(EditOp::TreeInsert {
                        node,
                        parent,
                        position,
                    }),
                }
            }
            EditOp::Delete { node } if node.tree == src_tree => {
                match fold_decision(src, node.node, &deleted, &deleted_covered) {
                    Fold::Keep => Some(EditOp::Delete { node }),
                    Fold::Drop => {
                        trace!(%node, "delete implied by parent");
                        None
                    }
                    Fold::Subtree => Some(EditOp::TreeDelete { node }),
                }
            }
            other => Some(other),
        })
        .collect();

    debug!(ops = compacted.len(), "compact_subtrees done");
    compacted
}

/// Whether `node`'s parent is a key of `keys` and every descendant of that
/// parent is a key too. Results are cached per parent.
fn implied_by_parent<T: DiffTree>(
    tree: &T,
    keys: &HashMap<NodeId, Vec<usize>>,
    node: NodeId,
    cache: &mut HashMap<NodeId, bool>,
) -> bool {
    if !tree.contains(node) {
        return false;
    }
    let Some(parent) = tree.parent(node) else {
        return false;
    };
    if !keys.contains_key(&parent) {
        return false;
    }
    *cache.entry(parent).or_insert_with(|| {
        tree.descendants(parent)
            .iter()
            .all(|d| keys.contains_key(d))
    })
}

/// Drop MultiMove actions implied by a MultiMove of an ancestor.
///
/// A node's actions are implied on one side when its parent also has
/// actions and so does every descendant of that parent. The source side
/// and the destination side are checked separately. Candidates are kept when
/// one of them is `updated`, or when the far endpoint of one of them is not
/// implied on its own side. An action is removed only if both sides mark it.
pub fn prune_multi_moves<S, D>(moves: MultiMoves, src: &S, dst: &D) -> MultiMoves
where
    S: DiffTree,
    D: DiffTree,
{
    if moves.is_empty() {
        return moves;
    }
    let ops = moves.ops();
    let mut src_cache = HashMap::default();
    let mut dst_cache = HashMap::default();

    let endpoints = |index: usize| match ops[index] {
        EditOp::MultiMove {
            src, dst, updated, ..
        } => Some((src.node, dst.node, updated)),
        _ => None,
    };

    let mut src_marked: HashSet<usize> = HashSet::default();
    for (&node, actions) in moves.by_src() {
        if !implied_by_parent(src, moves.by_src(), node, &mut src_cache) {
            continue;
        }
        let keep = actions.iter().any(|&i| match endpoints(i) {
            Some((_, far, updated)) => {
                updated || !implied_by_parent(dst, moves.by_dst(), far, &mut dst_cache)
            }
            None => true,
        });
        if !keep {
            src_marked.extend(actions.iter().copied());
        }
    }

    let mut dst_marked: HashSet<usize> = HashSet::default();
    for (&node, actions) in moves.by_dst() {
        if !implied_by_parent(dst, moves.by_dst(), node, &mut dst_cache) {
            continue;
        }
        let keep = actions.iter().any(|&i| match endpoints(i) {
            Some((far, _, updated)) => {
                updated || !implied_by_parent(src, moves.by_src(), far, &mut src_cache)
            }
            None => true,
        });
        if !keep {
            dst_marked.extend(actions.iter().copied());
        }
    }

    debug!(
        actions = moves.len(),
        src_marked = src_marked.len(),
        dst_marked = dst_marked.len(),
        "prune_multi_moves marked"
    );
    let kept = moves
        .into_ops()
        .into_iter()
        .enumerate()
        .filter(|(i, _)| !(src_marked.contains(i) && dst_marked.contains(i)))
        .map(|(_, op)| op);
    let pruned = MultiMoves::from_ops(kept);
    debug!(actions = pruned.len(), "prune_multi_moves done");
    pruned
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mapping::{MultiMappingStore, NodeRef};
    use crate::multi_move::MultiMoveGenerator;
    use crate::tree::{NodeData, Tree, TreeId};
    use facet_testhelpers::test;

    fn insert(tree: &Tree, node: NodeId, parent: Option<NodeRef>, position: usize) -> EditOp {
        EditOp::Insert {
            node: NodeRef::of(tree, node),
            parent,
            position,
        }
    }

    #[test]
    fn test_compact_inserted_subtree() {
        let src = Tree::new(TreeId(1), NodeData::new("class", "C"));
        let mut dst = Tree::new(TreeId(2), NodeData::new("class", "C"));
        let m = dst.add_child(dst.root, NodeData::new("method", "m"));
        let a = dst.add_child(m, NodeData::new("stmt", "a"));
        let b = dst.add_child(m, NodeData::new("stmt", "b"));
        let root = Some(NodeRef::of(&src, src.root));
        let under_m = Some(NodeRef::of(&dst, m));

        let ops = vec![
            insert(&dst, m, root, 0),
            insert(&dst, a, under_m, 0),
            insert(&dst, b, under_m, 1),
        ];
        let compacted = compact_subtrees(ops, &src, &dst);
        assert_eq!(
            compacted,
            vec![EditOp::TreeInsert {
                node: NodeRef::of(&dst, m),
                parent: root,
                position: 0,
            }]
        );
    }

    #[test]
    fn test_partial_subtree_is_not_compacted() {
        let mut src = Tree::new(TreeId(1), NodeData::new("class", "C"));
        src.add_child(src.root, NodeData::new("stmt", "kept"));
        let mut dst = Tree::new(TreeId(2), NodeData::new("class", "C"));
        let m = dst.add_child(dst.root, NodeData::new("method", "m"));
        let a = dst.add_child(m, NodeData::new("stmt", "a"));
        dst.add_child(m, NodeData::new("stmt", "kept"));

        let ops = vec![
            insert(&dst, m, Some(NodeRef::of(&src, src.root)), 0),
            insert(&dst, a, Some(NodeRef::of(&dst, m)), 0),
        ];
        let compacted = compact_subtrees(ops.clone(), &src, &dst);
        assert_eq!(compacted, ops);
    }

    #[test]
    fn test_nested_subtree_keeps_only_topmost() {
        let src = Tree::new(TreeId(1), NodeData::new("class", "C"));
        let mut dst = Tree::new(TreeId(2), NodeData::new("class", "C"));
        let m = dst.add_child(dst.root, NodeData::new("method", "m"));
        let blk = dst.add_child(m, NodeData::new("block", ""));
        let s = dst.add_child(blk, NodeData::new("stmt", "s"));
        let root = Some(NodeRef::of(&src, src.root));

        let ops = vec![
            insert(&dst, m, root, 0),
            insert(&dst, blk, Some(NodeRef::of(&dst, m)), 0),
            insert(&dst, s, Some(NodeRef::of(&dst, blk)), 0),
        ];
        let compacted = compact_subtrees(ops, &src, &dst);
        assert_eq!(compacted.len(), 1);
        assert_eq!(compacted[0].name(), "insert-tree");
    }

    #[test]
    fn test_compact_deleted_subtree() {
        let mut src = Tree::new(TreeId(1), NodeData::new("class", "C"));
        let m = src.add_child(src.root, NodeData::new("method", "m"));
        let a = src.add_child(m, NodeData::new("stmt", "a"));
        let b = src.add_child(m, NodeData::new("stmt", "b"));
        let lone = src.add_child(src.root, NodeData::new("field", "f"));
        let dst = Tree::new(TreeId(2), NodeData::new("class", "C"));

        let ops = vec![
            EditOp::Delete {
                node: NodeRef::of(&src, a),
            },
            EditOp::Delete {
                node: NodeRef::of(&src, b),
            },
            EditOp::Delete {
                node: NodeRef::of(&src, m),
            },
            EditOp::Delete {
                node: NodeRef::of(&src, lone),
            },
        ];
        let compacted = compact_subtrees(ops, &src, &dst);
        assert_eq!(
            compacted,
            vec![
                EditOp::TreeDelete {
                    node: NodeRef::of(&src, m),
                },
                // A lone leaf stays a plain delete.
                EditOp::Delete {
                    node: NodeRef::of(&src, lone),
                },
            ]
        );
    }

    /// `C(m(s1, s2))` against `C(m1(s1, s2), m2(s1, s2'))` with every
    /// statement multi-mapped to both copies.
    fn duplicated_method(second_label: &str) -> (Tree, Tree, MultiMappingStore) {
        let mut src = Tree::new(TreeId(1), NodeData::new("class", "C"));
        let m = src.add_child(src.root, NodeData::new("method", "m"));
        let s1 = src.add_child(m, NodeData::new("stmt", "s1"));
        let s2 = src.add_child(m, NodeData::new("stmt", "s2"));

        let mut dst = Tree::new(TreeId(2), NodeData::new("class", "C"));
        let m1 = dst.add_child(dst.root, NodeData::new("method", "m"));
        let a1 = dst.add_child(m1, NodeData::new("stmt", "s1"));
        let a2 = dst.add_child(m1, NodeData::new("stmt", "s2"));
        let m2 = dst.add_child(dst.root, NodeData::new("method", "m"));
        let b1 = dst.add_child(m2, NodeData::new("stmt", "s1"));
        let b2 = dst.add_child(m2, NodeData::new("stmt", second_label));
        src.recompute_metrics();
        dst.recompute_metrics();

        let mut multi = MultiMappingStore::new();
        for (s, d) in [(m, m1), (m, m2), (s1, a1), (s1, b1), (s2, a2), (s2, b2)] {
            multi.add(NodeRef::of(&src, s), NodeRef::of(&dst, d));
        }
        (src, dst, multi)
    }

    #[test]
    fn test_prune_children_of_multi_moved_method() {
        let (src, dst, multi) = duplicated_method("s2");
        let moves = MultiMoveGenerator::new().generate(&src, &dst, &multi);
        assert_eq!(moves.len(), 6);

        let pruned = prune_multi_moves(moves, &src, &dst);
        let m = src.children(src.root).next().map(|m| NodeRef::of(&src, m));
        assert_eq!(pruned.len(), 2);
        assert!(pruned.ops().iter().all(|op| Some(op.node()) == m));
    }

    #[test]
    fn test_prune_keeps_updated_edges() {
        let (src, dst, multi) = duplicated_method("s2 changed");
        let moves = MultiMoveGenerator::new().generate(&src, &dst, &multi);
        let pruned = prune_multi_moves(moves, &src, &dst);

        // m's two edges plus both edges of s2, one of which is an update.
        assert_eq!(pruned.len(), 4);
        let groups: Vec<u32> = pruned
            .ops()
            .iter()
            .filter_map(|op| match op {
                EditOp::MultiMove { group, .. } => Some(*group),
                _ => None,
            })
            .collect();
        assert_eq!(groups, vec![1, 1, 3, 3]);
        assert!(
            pruned
                .ops()
                .iter()
                .any(|op| matches!(op, EditOp::MultiMove { updated: true, .. }))
        );
    }

    #[test]
    fn test_prune_without_covered_parent_is_noop() {
        let mut src = Tree::new(TreeId(1), NodeData::new("class", "C"));
        let m = src.add_child(src.root, NodeData::new("call", "m()"));
        let mut dst = Tree::new(TreeId(2), NodeData::new("class", "C"));
        let m1 = dst.add_child(dst.root, NodeData::new("call", "m()"));
        let m2 = dst.add_child(dst.root, NodeData::new("call", "m()"));
        let mut multi = MultiMappingStore::new();
        multi.add(NodeRef::of(&src, m), NodeRef::of(&dst, m1));
        multi.add(NodeRef::of(&src, m), NodeRef::of(&dst, m2));

        let moves = MultiMoveGenerator::new().generate(&src, &dst, &multi);
        let pruned = prune_multi_moves(moves.clone(), &src, &dst);
        assert_eq!(pruned.ops(), moves.ops());
    }
}
