//! The block structure: a DAG of course blocks plus its field side-table.

use std::collections::{HashMap, HashSet};

use serde_json::Value;
use tracing::debug;

use coursegraph_shared::{Block, BlockKey, CourseGraphError, Result};

use crate::fields::{FieldScope, FieldStore};

#[derive(Debug, Clone)]
pub(crate) struct BlockNode {
    pub(crate) block: Block,
    pub(crate) parents: Vec<BlockKey>,
    pub(crate) children: Vec<BlockKey>,
}

/// A directed acyclic graph of blocks, edges pointing parent → child.
///
/// Blocks keep their insertion order, which is also the order siblings are
/// visited in. The structure is built upstream, run through the transformer
/// pipeline once, and dropped.
#[derive(Debug, Clone, Default)]
pub struct BlockStructure {
    root: Option<BlockKey>,
    order: Vec<BlockKey>,
    pub(crate) nodes: HashMap<BlockKey, BlockNode>,
    fields: FieldStore,
}

impl BlockStructure {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a structure whose root is `root`.
    pub fn with_root(root: Block) -> Self {
        let key = root.key.clone();
        let mut structure = Self::new();
        structure.insert_node(root);
        structure.root = Some(key);
        structure
    }

    fn insert_node(&mut self, block: Block) {
        self.order.push(block.key.clone());
        self.nodes.insert(
            block.key.clone(),
            BlockNode {
                block,
                parents: Vec::new(),
                children: Vec::new(),
            },
        );
    }

    /// Add a block with no relations yet. Keys must be unique.
    pub fn add_block(&mut self, block: Block) -> Result<()> {
        if self.nodes.contains_key(&block.key) {
            return Err(CourseGraphError::graph(format!(
                "duplicate block {}",
                block.key
            )));
        }
        self.insert_node(block);
        Ok(())
    }

    /// Mark an existing block as the root.
    pub fn set_root(&mut self, key: &BlockKey) -> Result<()> {
        if !self.nodes.contains_key(key) {
            return Err(CourseGraphError::graph(format!("unknown root block {key}")));
        }
        self.root = Some(key.clone());
        Ok(())
    }

    /// Link `parent` → `child`.
    ///
    /// Both blocks must exist. Re-adding an existing edge is a no-op; an edge
    /// that would close a cycle is rejected.
    pub fn add_relation(&mut self, parent: &BlockKey, child: &BlockKey) -> Result<()> {
        for key in [parent, child] {
            if !self.nodes.contains_key(key) {
                return Err(CourseGraphError::graph(format!("unknown block {key}")));
            }
        }

        if self.children(parent).contains(child) {
            return Ok(());
        }

        if parent == child || self.reaches(child, parent) {
            return Err(CourseGraphError::graph(format!(
                "relation {parent} -> {child} would create a cycle"
            )));
        }

        if let Some(node) = self.nodes.get_mut(parent) {
            node.children.push(child.clone());
        }
        if let Some(node) = self.nodes.get_mut(child) {
            node.parents.push(parent.clone());
        }
        Ok(())
    }

    /// Whether `to` is reachable from `from` along child edges.
    pub fn reaches(&self, from: &BlockKey, to: &BlockKey) -> bool {
        let mut stack = vec![from];
        let mut seen = HashSet::new();
        while let Some(key) = stack.pop() {
            if key == to {
                return true;
            }
            if seen.insert(key) {
                stack.extend(self.children(key));
            }
        }
        false
    }

    pub fn root(&self) -> Option<&BlockKey> {
        self.root.as_ref()
    }

    pub fn get_block(&self, key: &BlockKey) -> Option<&Block> {
        self.nodes.get(key).map(|n| &n.block)
    }

    pub fn children(&self, key: &BlockKey) -> &[BlockKey] {
        self.nodes
            .get(key)
            .map(|n| n.children.as_slice())
            .unwrap_or_default()
    }

    pub fn parents(&self, key: &BlockKey) -> &[BlockKey] {
        self.nodes
            .get(key)
            .map(|n| n.parents.as_slice())
            .unwrap_or_default()
    }

    pub fn contains(&self, key: &BlockKey) -> bool {
        self.nodes.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// All block keys in insertion order.
    pub fn block_keys(&self) -> impl Iterator<Item = &BlockKey> {
        self.order.iter()
    }

    /// Keys traversals start from: the root, or every parentless block.
    pub(crate) fn start_keys(&self) -> Vec<&BlockKey> {
        match &self.root {
            Some(root) => vec![root],
            None => self
                .order
                .iter()
                .filter(|k| self.parents(k).is_empty())
                .collect(),
        }
    }

    /// Remove a block and its fields.
    ///
    /// With `keep_descendants`, the block's children are re-linked to its
    /// parents in its place. Without it, descendants left with no parent are
    /// removed too.
    pub fn remove_block(&mut self, key: &BlockKey, keep_descendants: bool) -> Option<Block> {
        let node = self.nodes.remove(key)?;
        self.order.retain(|k| k != key);
        self.fields.remove_block(key);
        if self.root.as_ref() == Some(key) {
            self.root = None;
        }

        for parent in &node.parents {
            if let Some(p) = self.nodes.get_mut(parent) {
                let pos = p.children.iter().position(|c| c == key);
                p.children.retain(|c| c != key);
                if keep_descendants {
                    let insert_at = pos.unwrap_or(p.children.len());
                    let new_children: Vec<BlockKey> = node
                        .children
                        .iter()
                        .filter(|c| !p.children.contains(c))
                        .cloned()
                        .collect();
                    for (offset, child) in new_children.into_iter().enumerate() {
                        p.children.insert(insert_at + offset, child);
                    }
                }
            }
        }

        for child in &node.children {
            let orphaned = match self.nodes.get_mut(child) {
                Some(c) => {
                    c.parents.retain(|p| p != key);
                    if keep_descendants {
                        for parent in &node.parents {
                            if !c.parents.contains(parent) {
                                c.parents.push(parent.clone());
                            }
                        }
                    }
                    c.parents.is_empty()
                }
                None => false,
            };
            if orphaned && !keep_descendants {
                self.remove_block(child, false);
            }
        }

        debug!(block = %key, keep_descendants, "removed block");
        Some(node.block)
    }

    /// Drop every block not reachable from the root. Returns how many were removed.
    pub fn prune_unreachable(&mut self) -> usize {
        let Some(root) = self.root.clone() else {
            return 0;
        };

        let mut reachable = HashSet::new();
        let mut stack = vec![root];
        while let Some(key) = stack.pop() {
            if reachable.insert(key.clone()) {
                stack.extend(self.children(&key).iter().cloned());
            }
        }

        let before = self.nodes.len();
        self.nodes.retain(|k, _| reachable.contains(k));
        self.order.retain(|k| reachable.contains(k));
        for node in self.nodes.values_mut() {
            node.parents.retain(|p| reachable.contains(p));
        }
        self.fields.retain_blocks(|k| reachable.contains(k));

        let removed = before - self.nodes.len();
        if removed > 0 {
            debug!(removed, "pruned unreachable blocks");
        }
        removed
    }

    // -----------------------------------------------------------------------
    // Transformer fields
    // -----------------------------------------------------------------------

    pub fn fields(&self) -> &FieldStore {
        &self.fields
    }

    /// Replace the side-table, e.g. with one loaded from a collect cache.
    /// Fields for blocks this structure does not contain are dropped.
    pub fn install_fields(&mut self, mut fields: FieldStore) {
        fields.retain_blocks(|k| self.nodes.contains_key(k));
        self.fields = fields;
    }

    pub fn set_transformer_block_field(
        &mut self,
        key: &BlockKey,
        scope: &FieldScope<'_>,
        field: &str,
        value: Value,
    ) -> Result<()> {
        if !self.contains(key) {
            return Err(CourseGraphError::graph(format!("unknown block {key}")));
        }
        self.fields.set_block_field(key, scope, field, value);
        Ok(())
    }

    pub fn get_transformer_block_field(
        &self,
        key: &BlockKey,
        scope: &FieldScope<'_>,
        field: &str,
    ) -> Result<&Value> {
        self.fields.block_field(key, scope, field)
    }

    pub fn get_transformer_block_field_mut(
        &mut self,
        key: &BlockKey,
        scope: &FieldScope<'_>,
        field: &str,
    ) -> Result<&mut Value> {
        self.fields.block_field_mut(key, scope, field)
    }

    pub fn set_transformer_data(&mut self, scope: &FieldScope<'_>, field: &str, value: Value) {
        self.fields.set_transformer_data(scope, field, value);
    }

    pub fn get_transformer_data(&self, scope: &FieldScope<'_>, field: &str) -> Result<Option<&Value>> {
        let root = self
            .root
            .clone()
            .unwrap_or_else(|| BlockKey::new("structure", "root"));
        self.fields.transformer_data(&root, scope, field)
    }

    pub fn set_collected_version(&mut self, transformer: &str, version: u32) {
        self.fields.set_collected_version(transformer, version);
    }

    pub fn collected_version(&self, transformer: &str) -> Option<u32> {
        self.fields.collected_version(transformer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn key(t: &str, id: &str) -> BlockKey {
        BlockKey::new(t, id)
    }

    fn container(t: &str, id: &str) -> Block {
        Block::container(key(t, id), None)
    }

    /// course -> [ch1 -> [v1, v2], ch2 -> [v2]]
    fn sample() -> BlockStructure {
        let mut s = BlockStructure::with_root(container("course", "c"));
        for b in [
            container("chapter", "ch1"),
            container("chapter", "ch2"),
            container("video", "v1"),
            container("video", "v2"),
        ] {
            s.add_block(b).unwrap();
        }
        s.add_relation(&key("course", "c"), &key("chapter", "ch1")).unwrap();
        s.add_relation(&key("course", "c"), &key("chapter", "ch2")).unwrap();
        s.add_relation(&key("chapter", "ch1"), &key("video", "v1")).unwrap();
        s.add_relation(&key("chapter", "ch1"), &key("video", "v2")).unwrap();
        s.add_relation(&key("chapter", "ch2"), &key("video", "v2")).unwrap();
        s
    }

    #[test]
    fn relations_are_recorded_both_ways() {
        let s = sample();
        assert_eq!(s.len(), 5);
        assert_eq!(s.children(&key("chapter", "ch1")).len(), 2);
        assert_eq!(s.parents(&key("video", "v2")).len(), 2);
        assert_eq!(s.root(), Some(&key("course", "c")));
    }

    #[test]
    fn duplicate_relation_is_noop() {
        let mut s = sample();
        s.add_relation(&key("course", "c"), &key("chapter", "ch1")).unwrap();
        assert_eq!(s.children(&key("course", "c")).len(), 2);
    }

    #[test]
    fn cycles_and_unknown_blocks_rejected() {
        let mut s = sample();
        let err = s
            .add_relation(&key("video", "v1"), &key("course", "c"))
            .unwrap_err();
        assert!(err.to_string().contains("cycle"));
        assert!(s.add_relation(&key("video", "v1"), &key("video", "v1")).is_err());
        assert!(s.add_relation(&key("course", "c"), &key("html", "nope")).is_err());
        assert!(s.add_block(container("video", "v1")).is_err());
    }

    #[test]
    fn remove_keeping_descendants_relinks() {
        let mut s = sample();
        s.remove_block(&key("chapter", "ch1"), true).expect("removed");
        assert!(!s.contains(&key("chapter", "ch1")));
        let course_children = s.children(&key("course", "c"));
        assert_eq!(
            course_children,
            &[key("video", "v1"), key("video", "v2"), key("chapter", "ch2")]
        );
        assert_eq!(s.parents(&key("video", "v1")), &[key("course", "c")]);
    }

    #[test]
    fn remove_without_descendants_drops_orphans_only() {
        let mut s = sample();
        s.remove_block(&key("chapter", "ch1"), false).expect("removed");
        // v1 had no other parent, v2 is still reachable through ch2.
        assert!(!s.contains(&key("video", "v1")));
        assert!(s.contains(&key("video", "v2")));
        assert_eq!(s.parents(&key("video", "v2")), &[key("chapter", "ch2")]);
    }

    #[test]
    fn prune_unreachable_blocks() {
        let mut s = sample();
        s.add_block(container("html", "stray")).unwrap();
        let scope = FieldScope::new("t", 1, 1);
        s.set_transformer_block_field(&key("html", "stray"), &scope, "f", json!(1))
            .unwrap();
        assert_eq!(s.prune_unreachable(), 1);
        assert!(!s.contains(&key("html", "stray")));
        assert_eq!(s.fields().block_field_count(), 0);
    }

    #[test]
    fn transformer_fields_do_not_touch_content() {
        let mut s = sample();
        let before = s.get_block(&key("video", "v1")).cloned();
        let scope = FieldScope::new("video_url", 1, 1);
        s.set_transformer_block_field(&key("video", "v1"), &scope, "data", json!({"a": 1}))
            .unwrap();
        assert_eq!(s.get_block(&key("video", "v1")).cloned(), before);
        assert_eq!(
            s.get_transformer_block_field(&key("video", "v1"), &scope, "data")
                .unwrap()["a"],
            1
        );
        assert!(
            s.set_transformer_block_field(&key("video", "zz"), &scope, "data", json!(1))
                .is_err()
        );
    }

    #[test]
    fn install_fields_filters_unknown_blocks() {
        let mut s = sample();
        let scope = FieldScope::new("video_url", 1, 1);
        let mut store = FieldStore::new();
        store.set_block_field(&key("video", "v1"), &scope, "data", json!(1));
        store.set_block_field(&key("video", "gone"), &scope, "data", json!(2));
        s.install_fields(store);
        assert_eq!(s.fields().block_field_count(), 1);
    }
}
