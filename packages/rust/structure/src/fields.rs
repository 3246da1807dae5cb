//! Versioned, transformer-scoped field storage.
//!
//! Fields live in a side-table keyed by `(transformer, block, field)` rather
//! than on the blocks themselves, so authored content is never touched and
//! the whole table can be cached between the collect and transform phases.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use coursegraph_shared::{BlockKey, CourseGraphError, Result};

/// Identity and versions of the transformer owning a set of fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldScope<'a> {
    /// Transformer name; must be unique within a registry.
    pub name: &'a str,
    /// Version stamped onto every field this transformer writes.
    pub write_version: u32,
    /// Version this transformer requires when reading its fields back.
    pub read_version: u32,
}

impl<'a> FieldScope<'a> {
    pub fn new(name: &'a str, write_version: u32, read_version: u32) -> Self {
        Self {
            name,
            write_version,
            read_version,
        }
    }
}

/// A stored value and the writer version that produced it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VersionedField {
    pub version: u32,
    pub value: Value,
}

/// The side-table itself.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FieldStore {
    /// transformer -> block -> field -> value
    #[serde(default)]
    block_fields: BTreeMap<String, BTreeMap<BlockKey, BTreeMap<String, VersionedField>>>,
    /// transformer -> field -> value, for structure-wide data
    #[serde(default)]
    transformer_data: BTreeMap<String, BTreeMap<String, VersionedField>>,
    /// transformer -> write version of its last completed collect
    #[serde(default)]
    collected_versions: BTreeMap<String, u32>,
}

impl FieldStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `value` for `block` at the scope's write version.
    pub fn set_block_field(
        &mut self,
        block: &BlockKey,
        scope: &FieldScope<'_>,
        field: &str,
        value: Value,
    ) {
        self.block_fields
            .entry(scope.name.to_string())
            .or_default()
            .entry(block.clone())
            .or_default()
            .insert(
                field.to_string(),
                VersionedField {
                    version: scope.write_version,
                    value,
                },
            );
    }

    /// Read a block field, checking it against the scope's read version.
    pub fn block_field(
        &self,
        block: &BlockKey,
        scope: &FieldScope<'_>,
        field: &str,
    ) -> Result<&Value> {
        let stored = self
            .raw_block_field(block, scope.name, field)
            .ok_or_else(|| missing(block, scope, field))?;
        check_version(block, scope, field, stored.version)?;
        Ok(&stored.value)
    }

    /// Mutable variant of [`FieldStore::block_field`] with the same checks.
    pub fn block_field_mut(
        &mut self,
        block: &BlockKey,
        scope: &FieldScope<'_>,
        field: &str,
    ) -> Result<&mut Value> {
        let stored = self
            .block_fields
            .get_mut(scope.name)
            .and_then(|blocks| blocks.get_mut(block))
            .and_then(|fields| fields.get_mut(field))
            .ok_or_else(|| missing(block, scope, field))?;
        check_version(block, scope, field, stored.version)?;
        Ok(&mut stored.value)
    }

    /// Raw access without any version check.
    pub fn raw_block_field(
        &self,
        block: &BlockKey,
        transformer: &str,
        field: &str,
    ) -> Option<&VersionedField> {
        self.block_fields
            .get(transformer)
            .and_then(|blocks| blocks.get(block))
            .and_then(|fields| fields.get(field))
    }

    /// Store structure-wide data for a transformer.
    pub fn set_transformer_data(&mut self, scope: &FieldScope<'_>, field: &str, value: Value) {
        self.transformer_data
            .entry(scope.name.to_string())
            .or_default()
            .insert(
                field.to_string(),
                VersionedField {
                    version: scope.write_version,
                    value,
                },
            );
    }

    /// Read structure-wide data; `Ok(None)` when nothing was stored.
    ///
    /// A version mismatch is reported against `root` so the error still
    /// names a block.
    pub fn transformer_data(
        &self,
        root: &BlockKey,
        scope: &FieldScope<'_>,
        field: &str,
    ) -> Result<Option<&Value>> {
        let Some(stored) = self
            .transformer_data
            .get(scope.name)
            .and_then(|fields| fields.get(field))
        else {
            return Ok(None);
        };
        check_version(root, scope, field, stored.version)?;
        Ok(Some(&stored.value))
    }

    pub fn set_collected_version(&mut self, transformer: &str, version: u32) {
        self.collected_versions
            .insert(transformer.to_string(), version);
    }

    pub fn collected_version(&self, transformer: &str) -> Option<u32> {
        self.collected_versions.get(transformer).copied()
    }

    /// Drop every field stored for `block`.
    pub fn remove_block(&mut self, block: &BlockKey) {
        for blocks in self.block_fields.values_mut() {
            blocks.remove(block);
        }
    }

    /// Keep only fields of blocks for which `keep` returns true.
    pub fn retain_blocks(&mut self, mut keep: impl FnMut(&BlockKey) -> bool) {
        for blocks in self.block_fields.values_mut() {
            blocks.retain(|key, _| keep(key));
        }
    }

    /// Number of stored block fields across all transformers.
    pub fn block_field_count(&self) -> usize {
        self.block_fields
            .values()
            .flat_map(|blocks| blocks.values())
            .map(BTreeMap::len)
            .sum()
    }
}

fn missing(block: &BlockKey, scope: &FieldScope<'_>, field: &str) -> CourseGraphError {
    CourseGraphError::MissingBlockData {
        block: block.clone(),
        transformer: scope.name.to_string(),
        field: field.to_string(),
    }
}

fn check_version(block: &BlockKey, scope: &FieldScope<'_>, field: &str, stored: u32) -> Result<()> {
    if stored != scope.read_version {
        return Err(CourseGraphError::StaleField {
            block: block.clone(),
            transformer: scope.name.to_string(),
            field: field.to_string(),
            stored,
            expected: scope.read_version,
        });
    }
    Ok(())
}
