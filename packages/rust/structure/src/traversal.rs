//! Graph traversals over a [`BlockStructure`].

use std::collections::{HashMap, HashSet};

use coursegraph_shared::BlockKey;

use crate::block_structure::BlockStructure;
use crate::match_rule::MatchRule;

impl BlockStructure {
    /// Blocks in topological order: every parent before any of its children.
    ///
    /// A block is processed once all of its parents have been. Blocks failing
    /// `rule` are not yielded. With `yield_descendants_of_unyielded`, their
    /// descendants are still visited; without it, a block is skipped unless
    /// at least one of its parents was yielded. Siblings come out in
    /// insertion order.
    pub fn topological_traversal(
        &self,
        rule: &MatchRule,
        yield_descendants_of_unyielded: bool,
    ) -> Vec<BlockKey> {
        let starts = self.start_keys();
        let start_set: HashSet<&BlockKey> = starts.iter().copied().collect();

        let mut stack: Vec<&BlockKey> = starts.iter().rev().copied().collect();
        // block -> whether it was yielded
        let mut processed: HashMap<&BlockKey, bool> = HashMap::new();
        let mut out = Vec::new();

        while let Some(key) = stack.pop() {
            if processed.contains_key(key) {
                continue;
            }
            let Some(node) = self.nodes.get(key) else {
                continue;
            };

            let mut eligible = true;
            if !start_set.contains(key) {
                let mut any_yielded = false;
                let mut all_processed = true;
                for parent in &node.parents {
                    match processed.get(parent) {
                        Some(yielded) => any_yielded |= *yielded,
                        None => {
                            all_processed = false;
                            break;
                        }
                    }
                }
                if !all_processed {
                    continue;
                }
                eligible = yield_descendants_of_unyielded || any_yielded;
            }

            // Skipped blocks are still recorded so children see every parent.
            let yielded = eligible && rule.matches(&node.block);
            processed.insert(key, yielded);
            if yielded {
                out.push(key.clone());
            }
            stack.extend(node.children.iter().rev());
        }

        out
    }

    /// Blocks in post order: children before parents, each block once.
    pub fn post_order_traversal(&self, rule: &MatchRule) -> Vec<BlockKey> {
        let mut visited: HashSet<&BlockKey> = HashSet::new();
        let mut out = Vec::new();

        for start in self.start_keys() {
            // (block, children already pushed)
            let mut stack: Vec<(&BlockKey, bool)> = vec![(start, false)];
            while let Some((key, expanded)) = stack.pop() {
                if expanded {
                    if let Some(block) = self.get_block(key) {
                        if rule.matches(block) {
                            out.push(key.clone());
                        }
                    }
                    continue;
                }
                if !visited.insert(key) {
                    continue;
                }
                stack.push((key, true));
                for child in self.children(key).iter().rev() {
                    if !visited.contains(child) {
                        stack.push((child, false));
                    }
                }
            }
        }

        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use coursegraph_shared::Block;

    fn key(t: &str, id: &str) -> BlockKey {
        BlockKey::new(t, id)
    }

    fn build(blocks: &[(&str, &str)], edges: &[((&str, &str), (&str, &str))]) -> BlockStructure {
        let mut s = BlockStructure::new();
        for (t, id) in blocks {
            s.add_block(Block::container(key(t, id), None)).unwrap();
        }
        for ((pt, pid), (ct, cid)) in edges {
            s.add_relation(&key(pt, pid), &key(ct, cid)).unwrap();
        }
        s
    }

    fn assert_edges_respected(s: &BlockStructure, order: &[BlockKey]) {
        let pos: HashMap<&BlockKey, usize> = order.iter().enumerate().map(|(i, k)| (k, i)).collect();
        for parent in order {
            for child in s.children(parent) {
                if let Some(ci) = pos.get(child) {
                    assert!(pos[parent] < *ci, "{parent} must precede {child}");
                }
            }
        }
    }

    /// course -> ch1 -> [v1, seq -> v2], course -> ch2 -> seq (diamond on seq)
    fn course() -> BlockStructure {
        let mut s = build(
            &[
                ("course", "c"),
                ("chapter", "ch1"),
                ("chapter", "ch2"),
                ("video", "v1"),
                ("sequential", "seq"),
                ("video", "v2"),
            ],
            &[
                (("course", "c"), ("chapter", "ch1")),
                (("course", "c"), ("chapter", "ch2")),
                (("chapter", "ch1"), ("video", "v1")),
                (("chapter", "ch1"), ("sequential", "seq")),
                (("chapter", "ch2"), ("sequential", "seq")),
                (("sequential", "seq"), ("video", "v2")),
            ],
        );
        s.set_root(&key("course", "c")).unwrap();
        s
    }

    #[test]
    fn topological_order_respects_every_edge() {
        let s = course();
        let order = s.topological_traversal(&MatchRule::Any, false);
        assert_eq!(order.len(), 6);
        assert_edges_respected(&s, &order);
        assert_eq!(
            order,
            vec![
                key("course", "c"),
                key("chapter", "ch1"),
                key("video", "v1"),
                key("chapter", "ch2"),
                key("sequential", "seq"),
                key("video", "v2"),
            ]
        );
    }

    #[test]
    fn filtered_traversal_yields_descendants_of_unyielded() {
        let s = course();
        let videos = s.topological_traversal(&MatchRule::block_type("video"), true);
        assert_eq!(videos, vec![key("video", "v1"), key("video", "v2")]);
    }

    #[test]
    fn filtered_traversal_without_descendants_stops_at_gaps() {
        let s = course();
        let videos = s.topological_traversal(&MatchRule::block_type("video"), false);
        assert!(videos.is_empty());

        let rule = MatchRule::BlockTypes(vec!["course".into(), "chapter".into()]);
        let order = s.topological_traversal(&rule, false);
        assert_eq!(
            order,
            vec![key("course", "c"), key("chapter", "ch1"), key("chapter", "ch2")]
        );
    }

    #[test]
    fn mixed_parents_yield_when_any_parent_yielded() {
        // course -> chapter -> sequential -> video, plus course -> video
        let mut s = build(
            &[
                ("course", "c"),
                ("chapter", "ch"),
                ("sequential", "seq"),
                ("video", "x"),
            ],
            &[
                (("course", "c"), ("chapter", "ch")),
                (("chapter", "ch"), ("sequential", "seq")),
                (("sequential", "seq"), ("video", "x")),
                (("course", "c"), ("video", "x")),
            ],
        );
        s.set_root(&key("course", "c")).unwrap();

        let rule = MatchRule::BlockTypes(vec!["course".into(), "video".into()]);
        let order = s.topological_traversal(&rule, false);
        assert_eq!(order, vec![key("course", "c"), key("video", "x")]);

        // Reachable only through the unyielded chapter: skipped.
        s.add_block(Block::container(key("video", "y"), None)).unwrap();
        s.add_relation(&key("chapter", "ch"), &key("video", "y")).unwrap();
        let order = s.topological_traversal(&rule, false);
        assert_eq!(order, vec![key("course", "c"), key("video", "x")]);

        let order = s.topological_traversal(&rule, true);
        assert_eq!(order.len(), 3);
        assert!(order.contains(&key("video", "y")));
    }

    #[test]
    fn rootless_structure_starts_from_sources() {
        let s = build(
            &[("a", "1"), ("b", "2"), ("c", "3"), ("d", "4")],
            &[(("a", "1"), ("c", "3")), (("b", "2"), ("c", "3")), (("c", "3"), ("d", "4"))],
        );
        let order = s.topological_traversal(&MatchRule::Any, true);
        assert_eq!(order.len(), 4);
        assert_edges_respected(&s, &order);
        assert_eq!(order.last(), Some(&key("d", "4")));
    }

    #[test]
    fn wide_dag_respects_edges() {
        // Layered DAG where every node in layer n links to several in layer n+1.
        let mut s = BlockStructure::new();
        let layers = 5;
        let width = 4;
        for l in 0..layers {
            for w in 0..width {
                s.add_block(Block::container(key("n", &format!("{l}_{w}")), None))
                    .unwrap();
            }
        }
        for l in 0..layers - 1 {
            for w in 0..width {
                for step in [0, 1, 3] {
                    let from = key("n", &format!("{l}_{w}"));
                    let to = key("n", &format!("{}_{}", l + 1, (w + step) % width));
                    s.add_relation(&from, &to).unwrap();
                }
            }
        }
        let order = s.topological_traversal(&MatchRule::Any, true);
        assert_eq!(order.len(), layers * width);
        assert_edges_respected(&s, &order);
    }

    #[test]
    fn post_order_puts_children_first() {
        let s = course();
        let order = s.post_order_traversal(&MatchRule::Any);
        assert_eq!(order.len(), 6);
        let pos: HashMap<&BlockKey, usize> = order.iter().enumerate().map(|(i, k)| (k, i)).collect();
        for parent in &order {
            for child in s.children(parent) {
                assert!(pos[child] < pos[parent]);
            }
        }
        assert_eq!(order.last(), Some(&key("course", "c")));

        let videos = s.post_order_traversal(&MatchRule::block_type("video"));
        assert_eq!(videos, vec![key("video", "v1"), key("video", "v2")]);
    }
}
