use std::collections::BTreeMap;
use std::ops::Bound;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::trace;

use super::{Result, RuleStore, ScanPage};
use crate::rule::Rule;

/// In-process store backed by ordered maps.
///
/// Scans walk the rule table in key order, so pagination never skips or
/// repeats a row while the table is unchanged. Contents are lost when the
/// process exits.
#[derive(Debug, Default)]
pub struct MemoryStore {
    rules: RwLock<BTreeMap<String, Rule>>,
    blobs: RwLock<BTreeMap<String, Vec<u8>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a store pre-filled with `rules`, keyed by their domain.
    pub fn with_rules(rules: impl IntoIterator<Item = Rule>) -> Self {
        let rules = rules
            .into_iter()
            .map(|rule| (rule.from.clone(), rule))
            .collect();
        Self {
            rules: RwLock::new(rules),
            blobs: RwLock::default(),
        }
    }

    pub async fn rule_count(&self) -> usize {
        self.rules.read().await.len()
    }
}

#[async_trait]
impl RuleStore for MemoryStore {
    async fn get_rule(&self, domain: &str) -> Result<Option<Rule>> {
        Ok(self.rules.read().await.get(domain).cloned())
    }

    async fn scan_page(&self, after: Option<&str>, limit: usize) -> Result<ScanPage> {
        let rules = self.rules.read().await;
        let lower = match after {
            Some(key) => Bound::Excluded(key),
            None => Bound::Unbounded,
        };

        // Fetch one extra row to learn whether another page exists.
        let mut page: Vec<Rule> = rules
            .range::<str, _>((lower, Bound::Unbounded))
            .take(limit + 1)
            .map(|(_, rule)| rule.clone())
            .collect();

        let last_key = if page.len() > limit {
            page.truncate(limit);
            page.last().map(|rule| rule.from.clone())
        } else {
            None
        };

        trace!(after = ?after, count = page.len(), more = last_key.is_some(), "Scanned rule page");
        Ok(ScanPage {
            rules: page,
            last_key,
        })
    }

    async fn put_rule(&self, rule: Rule) -> Result<()> {
        self.rules.write().await.insert(rule.from.clone(), rule);
        Ok(())
    }

    async fn delete_rule(&self, domain: &str) -> Result<()> {
        self.rules.write().await.remove(domain);
        Ok(())
    }

    async fn get_blob(&self, key: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.blobs.read().await.get(key).cloned())
    }

    async fn put_blob(&self, key: &str, data: Vec<u8>) -> Result<()> {
        self.blobs.write().await.insert(key.to_string(), data);
        Ok(())
    }

    async fn delete_blob(&self, key: &str) -> Result<()> {
        self.blobs.write().await.remove(key);
        Ok(())
    }
}
