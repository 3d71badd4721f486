//! Storage for uploaded rule definitions.
//!
//! Rules that are not expressible as a plain rulestring (custom rule tables,
//! rule trees) are uploaded once and then looked up by name whenever a
//! simulation asks for them.
//!
//! # Architecture
//!
//! - `RuleDefinition`: the stored record (file bytes, state count, colors)
//! - `RuleLookup` trait: read-through lookup used by the simulation layer
//! - `SqliteRuleStore`: SQLite-backed storage with upsert
//! - `InMemoryRuleStore`: map-backed storage for tests and ephemeral runs
//!
//! # Example
//!
//! ```ignore
//! use caterer_rules::{RuleDefinition, RuleLookup, SqliteRuleStore};
//!
//! let store = SqliteRuleStore::open(Path::new("rules.db"))?;
//! let def = RuleDefinition::from_rule_file(&bytes)?;
//! store.upsert(&def)?;
//! let found = store.lookup(&def.name)?;
//! ```

mod definition;
mod store;

pub use definition::{is_valid_name, RuleDefinition, RuleFileError};
pub use store::{InMemoryRuleStore, RuleStoreError, SqliteRuleStore};

/// Read-through lookup of stored rules by name.
///
/// Implementations must not cache on behalf of callers.
pub trait RuleLookup: Send + Sync + 'static {
    /// Find the rule with the given name, if one was uploaded.
    fn lookup(&self, name: &str) -> Result<Option<RuleDefinition>, RuleStoreError>;
}
