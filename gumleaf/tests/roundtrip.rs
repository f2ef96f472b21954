//! Roundtrip tests using datatest-stable.
//!
//! Each test case is a file in `tests/roundtrip-cases/` with format:
//! ```text
//! <source tree>
//! ===
//! <destination tree>
//! ```
//!
//! Trees are written as `name(child child ...)`, with `name:label` to give a
//! node a label other than its name. Nodes with the same name in both trees
//! are mapped to each other.
//!
//! The test verifies: replay(src, script(src, dst)) is isomorphic to dst, with
//! and without simplification.

use std::collections::HashMap;
use std::path::Path;

use gumleaf::indextree::NodeId;
use gumleaf::{
    MappingStore, MultiMappingStore, NodeData, NodeRef, Tree, TreeId, diff_trees,
    generate_alignment, isomorphic, replay,
};

struct Shape {
    name: String,
    label: String,
    children: Vec<Shape>,
}

struct Parser<'a> {
    rest: &'a str,
}

impl Parser<'_> {
    fn skip_ws(&mut self) {
        self.rest = self.rest.trim_start();
    }

    fn word(&mut self) -> Result<String, String> {
        self.skip_ws();
        let end = self
            .rest
            .find(|c: char| c.is_whitespace() || c == '(' || c == ')')
            .unwrap_or(self.rest.len());
        if end == 0 {
            return Err(format!("expected a node name at {:?}", self.rest));
        }
        let (word, rest) = self.rest.split_at(end);
        self.rest = rest;
        Ok(word.to_string())
    }

    fn shape(&mut self) -> Result<Shape, String> {
        let word = self.word()?;
        let (name, label) = match word.split_once(':') {
            Some((name, label)) => (name.to_string(), label.to_string()),
            None => (word.clone(), word),
        };
        let mut children = Vec::new();
        self.skip_ws();
        if let Some(rest) = self.rest.strip_prefix('(') {
            self.rest = rest;
            loop {
                self.skip_ws();
                if let Some(rest) = self.rest.strip_prefix(')') {
                    self.rest = rest;
                    break;
                }
                if self.rest.is_empty() {
                    return Err(format!("unclosed children of {name}"));
                }
                children.push(self.shape()?);
            }
        }
        Ok(Shape {
            name,
            label,
            children,
        })
    }
}

fn build(text: &str, id: TreeId) -> Result<(Tree, HashMap<String, NodeId>), String> {
    let mut parser = Parser { rest: text };
    let shape = parser.shape()?;
    parser.skip_ws();
    if !parser.rest.is_empty() {
        return Err(format!("trailing input {:?}", parser.rest));
    }

    let mut tree = Tree::new(id, NodeData::new("node", shape.label.clone()));
    let mut names = HashMap::new();
    names.insert(shape.name.clone(), tree.root);
    let mut stack: Vec<(&Shape, NodeId)> = vec![(&shape, tree.root)];
    while let Some((shape, node)) = stack.pop() {
        for child in &shape.children {
            let child_id = tree.add_child(node, NodeData::new("node", child.label.clone()));
            if names.insert(child.name.clone(), child_id).is_some() {
                return Err(format!("duplicate node name {}", child.name));
            }
            stack.push((child, child_id));
        }
    }
    tree.recompute_metrics();
    Ok((tree, names))
}

fn run_roundtrip_test(path: &Path) -> datatest_stable::Result<()> {
    facet_testhelpers::setup();

    let content = std::fs::read_to_string(path)?;
    let parts: Vec<&str> = content.split("\n===\n").collect();
    if parts.len() != 2 {
        return Err(format!(
            "Test file must have exactly one '===' separator, found {} parts",
            parts.len()
        )
        .into());
    }

    let (src, src_names) = build(parts[0].trim(), TreeId(0))?;
    let (dst, dst_names) = build(parts[1].trim(), TreeId(1))?;

    let mut mono = MappingStore::new();
    for (name, &s) in &src_names {
        if let Some(&d) = dst_names.get(name) {
            mono.add(NodeRef::of(&src, s), NodeRef::of(&dst, d));
        }
    }
    let multi = MultiMappingStore::new();

    let raw = generate_alignment(&src, &dst, &mono, &multi, &());
    let simplified = diff_trees(&src, &dst, &mono, &multi);
    for (kind, ops) in [("raw", &raw), ("simplified", &simplified)] {
        let result = replay(ops, &src, &dst).map_err(|e| format!("{kind} replay failed: {e:?}"))?;
        if !isomorphic(&result, &dst) {
            return Err(format!(
                "Roundtrip failed for the {kind} script!\nSource: {}\nDestination: {}\nOps: {ops:?}",
                parts[0].trim(),
                parts[1].trim(),
            )
            .into());
        }
    }

    Ok(())
}

datatest_stable::harness! {
    { test = run_roundtrip_test, root = "tests/roundtrip-cases", pattern = r".*\.tree$" },
}
