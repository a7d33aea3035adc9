//! Persisted rule and certificate storage.
//!
//! The gateway only talks to storage through [`RuleStore`]: single-rule CRUD,
//! a key-ordered paginated scan of the rule table, and opaque blobs for the
//! certificate client. [`SqliteStore`] persists both to a database file;
//! [`MemoryStore`] keeps them in process memory.

mod memory;
mod pager;
mod sqlite;

#[cfg(test)]
pub(crate) mod testing;

use async_trait::async_trait;

use crate::rule::Rule;

pub use memory::MemoryStore;
pub use pager::{Page, PageCursor, Pager, PAGE_SIZE};
pub use sqlite::SqliteStore;

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;

#[derive(Debug, Clone, thiserror::Error)]
pub enum StoreError {
    #[error("storage backend unavailable: {0}")]
    Unavailable(String),
    #[error("storage query failed: {0}")]
    Query(String),
    #[error("stored data is invalid: {0}")]
    InvalidData(String),
}

/// One page of a key-ordered table scan.
#[derive(Debug, Clone, Default)]
pub struct ScanPage {
    pub rules: Vec<Rule>,
    /// Key of the last row returned, present only when more rows may follow.
    pub last_key: Option<String>,
}

#[async_trait]
pub trait RuleStore: Send + Sync + 'static {
    /// Returns the rule stored for `domain`, or `None`.
    async fn get_rule(&self, domain: &str) -> Result<Option<Rule>>;

    /// Returns up to `limit` rules with keys strictly greater than `after`.
    async fn scan_page(&self, after: Option<&str>, limit: usize) -> Result<ScanPage>;

    /// Inserts or replaces the rule keyed by `rule.from`.
    async fn put_rule(&self, rule: Rule) -> Result<()>;

    /// Removes a rule. Removing an absent rule is not an error.
    async fn delete_rule(&self, domain: &str) -> Result<()>;

    async fn get_blob(&self, key: &str) -> Result<Option<Vec<u8>>>;

    async fn put_blob(&self, key: &str, data: Vec<u8>) -> Result<()>;

    async fn delete_blob(&self, key: &str) -> Result<()>;
}
