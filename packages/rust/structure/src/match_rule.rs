//! Declarative block filters for traversals.

use regex::Regex;

use coursegraph_shared::{Block, CourseGraphError, Result};

/// Which blocks a traversal yields.
///
/// Rules are plain data so transformers can expose and test them; `Custom`
/// takes a function pointer, never a capturing closure.
#[derive(Debug, Clone, Default)]
pub enum MatchRule {
    /// Every block.
    #[default]
    Any,
    /// Blocks of exactly this type.
    BlockType(String),
    /// Blocks of any of these types.
    BlockTypes(Vec<String>),
    /// Blocks whose id matches the pattern.
    IdMatches(Regex),
    Not(Box<MatchRule>),
    AllOf(Vec<MatchRule>),
    AnyOf(Vec<MatchRule>),
    Custom(fn(&Block) -> bool),
}

impl MatchRule {
    pub fn block_type(block_type: impl Into<String>) -> Self {
        Self::BlockType(block_type.into())
    }

    /// Build an id rule, rejecting invalid patterns.
    pub fn id_matches(pattern: &str) -> Result<Self> {
        Regex::new(pattern)
            .map(Self::IdMatches)
            .map_err(|e| CourseGraphError::parse(format!("invalid block id pattern '{pattern}': {e}")))
    }

    pub fn negate(self) -> Self {
        Self::Not(Box::new(self))
    }

    pub fn matches(&self, block: &Block) -> bool {
        match self {
            Self::Any => true,
            Self::BlockType(t) => block.key.is_type(t),
            Self::BlockTypes(types) => types.iter().any(|t| block.key.is_type(t)),
            Self::IdMatches(re) => re.is_match(&block.key.block_id),
            Self::Not(rule) => !rule.matches(block),
            Self::AllOf(rules) => rules.iter().all(|r| r.matches(block)),
            Self::AnyOf(rules) => rules.iter().any(|r| r.matches(block)),
            Self::Custom(predicate) => predicate(block),
        }
    }
}
