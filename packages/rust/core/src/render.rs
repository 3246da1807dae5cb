//! Student-facing rendering of a transformed structure.

use std::collections::BTreeMap;

use serde::{Serialize, Serializer};
use serde_json::Value;

use coursegraph_shared::{BlockKey, CourseGraphError, Result};
use coursegraph_structure::{BlockStructure, FieldScope, MatchRule};

/// A transformer field to include on each rendered block.
#[derive(Debug, Clone, Copy)]
pub struct RequestedField<'a> {
    pub scope: FieldScope<'a>,
    pub field: &'a str,
}

/// One block in the rendered response.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RenderedBlock {
    pub id: BlockKey,
    #[serde(rename = "type")]
    pub block_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<BlockKey>,
    #[serde(flatten)]
    pub fields: BTreeMap<String, Value>,
}

/// Course blocks response: blocks keyed by id, in topological order.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderedCourse {
    pub root: Option<BlockKey>,
    pub blocks: Vec<RenderedBlock>,
}

impl Serialize for RenderedCourse {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        use serde::ser::SerializeStruct;

        struct Blocks<'a>(&'a [RenderedBlock]);
        impl Serialize for Blocks<'_> {
            fn serialize<S: Serializer>(&self, s: S) -> std::result::Result<S::Ok, S::Error> {
                s.collect_map(self.0.iter().map(|b| (&b.id, b)))
            }
        }

        let mut state = serializer.serialize_struct("RenderedCourse", 2)?;
        state.serialize_field("root", &self.root)?;
        state.serialize_field("blocks", &Blocks(&self.blocks))?;
        state.end()
    }
}

impl RenderedCourse {
    pub fn get(&self, key: &BlockKey) -> Option<&RenderedBlock> {
        self.blocks.iter().find(|b| &b.id == key)
    }

    pub fn to_json_pretty(&self) -> Result<String> {
        serde_json::to_string_pretty(self)
            .map_err(|e| CourseGraphError::validation(format!("failed to render course: {e}")))
    }
}

/// Render every block reachable from the root.
///
/// Requested fields that are missing or were written by another version
/// are left out of the block rather than failing the render.
pub fn render_course(
    structure: &BlockStructure,
    requested: &[RequestedField<'_>],
) -> RenderedCourse {
    let blocks = structure
        .topological_traversal(&MatchRule::Any, true)
        .into_iter()
        .filter_map(|key| {
            let block = structure.get_block(&key)?;
            let fields = requested
                .iter()
                .filter_map(|r| {
                    structure
                        .get_transformer_block_field(&key, &r.scope, r.field)
                        .ok()
                        .map(|v| (r.field.to_string(), v.clone()))
                })
                .collect();
            Some(RenderedBlock {
                block_type: block.block_type().to_string(),
                display_name: block.display_name.clone(),
                children: structure.children(&key).to_vec(),
                fields,
                id: key,
            })
        })
        .collect();

    RenderedCourse {
        root: structure.root().cloned(),
        blocks,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use coursegraph_shared::Block;
    use serde_json::json;

    fn structure() -> BlockStructure {
        let root = BlockKey::new("course", "c");
        let mut s =
            BlockStructure::with_root(Block::container(root.clone(), Some("Course".into())));
        for id in ["b", "a"] {
            let key = BlockKey::new("video", id);
            s.add_block(Block::container(key.clone(), None)).unwrap();
            s.add_relation(&root, &key).unwrap();
        }
        s
    }

    #[test]
    fn renders_in_topological_order() {
        let s = structure();
        let rendered = render_course(&s, &[]);
        let json = rendered.to_json_pretty().unwrap();

        let pos = |needle: &str| json.find(needle).unwrap();
        assert!(pos("\"course@c\": {") < pos("\"video@b\": {"));
        assert!(pos("\"video@b\": {") < pos("\"video@a\": {"));

        let course = rendered.get(&BlockKey::new("course", "c")).unwrap();
        assert_eq!(course.children.len(), 2);
        assert_eq!(course.display_name.as_deref(), Some("Course"));
    }

    #[test]
    fn includes_only_current_fields() {
        let mut s = structure();
        let current = FieldScope::new("video_url", 1, 1);
        let old = FieldScope::new("video_url", 0, 0);
        let field = "student_view_data";
        s.set_transformer_block_field(&BlockKey::new("video", "a"), &current, field, json!({"ok": true}))
            .unwrap();
        s.set_transformer_block_field(&BlockKey::new("video", "b"), &old, field, json!({"ok": false}))
            .unwrap();

        let requested = [RequestedField {
            scope: current,
            field: "student_view_data",
        }];
        let rendered = render_course(&s, &requested);
        let value: Value = serde_json::from_str(&rendered.to_json_pretty().unwrap()).unwrap();

        assert_eq!(value["root"], "course@c");
        assert_eq!(value["blocks"]["video@a"]["student_view_data"]["ok"], true);
        assert_eq!(value["blocks"]["video@a"]["type"], "video");
        assert!(value["blocks"]["video@b"].get("student_view_data").is_none());
    }
}
