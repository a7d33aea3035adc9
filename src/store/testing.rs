//! Store doubles for unit tests.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;

use super::{MemoryStore, Result, RuleStore, ScanPage, StoreError};
use crate::rule::Rule;

/// Wraps a [`MemoryStore`] and can be told to fail or stall.
#[derive(Debug, Default)]
pub struct FlakyStore {
    pub inner: MemoryStore,
    failing: AtomicBool,
    scans_failing: AtomicBool,
    next_delete_failing: AtomicBool,
    delay_ms: AtomicUsize,
    rule_reads: AtomicUsize,
}

impl FlakyStore {
    pub fn new(inner: MemoryStore) -> Self {
        Self {
            inner,
            ..Default::default()
        }
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Fails only table scans, leaving single-rule reads and writes working.
    pub fn set_scans_failing(&self, failing: bool) {
        self.scans_failing.store(failing, Ordering::SeqCst);
    }

    /// Fails the next `delete_rule` call only.
    pub fn fail_next_delete(&self) {
        self.next_delete_failing.store(true, Ordering::SeqCst);
    }

    pub fn set_delay(&self, delay: Duration) {
        self.delay_ms
            .store(delay.as_millis() as usize, Ordering::SeqCst);
    }

    /// Number of `get_rule` calls that reached the store.
    pub fn rule_reads(&self) -> usize {
        self.rule_reads.load(Ordering::SeqCst)
    }

    async fn check(&self) -> Result<()> {
        let delay = self.delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay as u64)).await;
        }
        if self.failing.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("injected failure".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl RuleStore for FlakyStore {
    async fn get_rule(&self, domain: &str) -> Result<Option<Rule>> {
        self.rule_reads.fetch_add(1, Ordering::SeqCst);
        self.check().await?;
        self.inner.get_rule(domain).await
    }

    async fn scan_page(&self, after: Option<&str>, limit: usize) -> Result<ScanPage> {
        self.check().await?;
        if self.scans_failing.load(Ordering::SeqCst) {
            return Err(StoreError::Query("injected scan failure".to_string()));
        }
        self.inner.scan_page(after, limit).await
    }

    async fn put_rule(&self, rule: Rule) -> Result<()> {
        self.check().await?;
        self.inner.put_rule(rule).await
    }

    async fn delete_rule(&self, domain: &str) -> Result<()> {
        self.check().await?;
        if self.next_delete_failing.swap(false, Ordering::SeqCst) {
            return Err(StoreError::Query("injected delete failure".to_string()));
        }
        self.inner.delete_rule(domain).await
    }

    async fn get_blob(&self, key: &str) -> Result<Option<Vec<u8>>> {
        self.check().await?;
        self.inner.get_blob(key).await
    }

    async fn put_blob(&self, key: &str, data: Vec<u8>) -> Result<()> {
        self.check().await?;
        self.inner.put_blob(key, data).await
    }

    async fn delete_blob(&self, key: &str) -> Result<()> {
        self.check().await?;
        self.inner.delete_blob(key).await
    }
}
