//! Write-side operations on the rule table.
//!
//! Every mutation validates and normalizes the rule, writes it to the store
//! and then refreshes the redirect cache. A failed refresh is logged; the
//! write itself has already succeeded and the next periodic refresh catches up.

use std::collections::HashSet;

use chrono::Utc;
use tracing::{error, info};

use crate::cache::RedirectCache;
use crate::error::AppError;
use crate::rule::Rule;
use crate::store::{Page, PageCursor};

#[derive(Clone)]
pub struct RuleAdmin {
    cache: RedirectCache,
}

impl RuleAdmin {
    pub fn new(cache: RedirectCache) -> Self {
        Self { cache }
    }

    pub fn cache(&self) -> &RedirectCache {
        &self.cache
    }

    /// Reads a rule straight from the store.
    pub async fn get(&self, domain: &str) -> Result<Rule, AppError> {
        let domain = domain.trim().to_ascii_lowercase();
        self.fetch(&domain)
            .await?
            .ok_or(AppError::NotFound(domain))
    }

    pub async fn create(&self, mut rule: Rule) -> Result<Rule, AppError> {
        rule.validate()?;
        rule.normalize();

        if self.fetch(&rule.from).await?.is_some() {
            return Err(AppError::Conflict(rule.from));
        }

        let now = Utc::now();
        rule.created_at = Some(now);
        rule.modified_at = Some(now);
        self.put(rule.clone()).await?;

        info!(domain = %rule.from, code = rule.code, "Redirect created");
        self.refresh().await;
        Ok(rule)
    }

    /// Replaces the rule stored for `domain`.
    ///
    /// A different `redirect_from` in `rule` renames the entry: the new domain
    /// is written first, then the old one removed. If the removal fails the new
    /// entry is taken out again and the error returned.
    pub async fn update(&self, domain: &str, mut rule: Rule) -> Result<Rule, AppError> {
        let domain = domain.trim().to_ascii_lowercase();
        rule.validate()?;
        rule.normalize();

        let existing = self
            .fetch(&domain)
            .await?
            .ok_or_else(|| AppError::NotFound(domain.clone()))?;

        let renamed = rule.from != domain;
        if renamed && self.fetch(&rule.from).await?.is_some() {
            return Err(AppError::Conflict(rule.from));
        }

        rule.created_at = existing.created_at;
        rule.modified_at = Some(Utc::now());
        self.put(rule.clone()).await?;

        if renamed {
            if let Err(e) = self.cache.store().delete_rule(&domain).await {
                // Undo the new entry so the old domain stays the only one
                if let Err(undo) = self.cache.store().delete_rule(&rule.from).await {
                    error!(domain = %rule.from, error = %undo, "Rolling back renamed redirect failed");
                }
                self.refresh().await;
                return Err(AppError::store(format!("deleting renamed redirect {domain}"), e));
            }
            info!(from = %domain, to = %rule.from, "Redirect renamed");
        } else {
            info!(domain = %rule.from, "Redirect updated");
        }

        self.refresh().await;
        Ok(rule)
    }

    pub async fn delete(&self, domain: &str) -> Result<(), AppError> {
        let domain = domain.trim().to_ascii_lowercase();
        if self.fetch(&domain).await?.is_none() {
            return Err(AppError::NotFound(domain));
        }

        self.cache
            .store()
            .delete_rule(&domain)
            .await
            .map_err(|e| AppError::store(format!("deleting redirect {domain}"), e))?;

        info!(domain = %domain, "Redirect deleted");
        self.refresh().await;
        Ok(())
    }

    pub async fn list_page(&self, cursor: Option<&PageCursor>) -> Result<Page, AppError> {
        self.cache.pager().page(cursor).await
    }

    pub async fn export(&self) -> Result<Vec<Rule>, AppError> {
        self.cache.pager().export_all().await
    }

    /// Replaces the whole rule table with `rules`.
    ///
    /// Nothing is written unless every rule is valid.
    pub async fn import(&self, rules: Vec<Rule>) -> Result<usize, AppError> {
        let mut prepared = Vec::with_capacity(rules.len());
        let mut seen = HashSet::new();
        for mut rule in rules {
            rule.validate()?;
            rule.normalize();
            if !seen.insert(rule.from.clone()) {
                return Err(AppError::Validation(format!(
                    "domain '{}' appears more than once",
                    rule.from
                )));
            }
            prepared.push(rule);
        }

        let existing = self.export().await?;
        for rule in &existing {
            self.cache
                .store()
                .delete_rule(&rule.from)
                .await
                .map_err(|e| AppError::store(format!("truncating redirect {}", rule.from), e))?;
        }

        let now = Utc::now();
        let count = prepared.len();
        for mut rule in prepared {
            rule.created_at.get_or_insert(now);
            rule.modified_at = Some(now);
            self.put(rule).await?;
        }

        info!(count, removed = existing.len(), "Redirects imported");
        self.refresh().await;
        Ok(count)
    }

    async fn fetch(&self, domain: &str) -> Result<Option<Rule>, AppError> {
        self.cache
            .store()
            .get_rule(domain)
            .await
            .map_err(|e| AppError::store(format!("loading redirect {domain}"), e))
    }

    async fn put(&self, rule: Rule) -> Result<(), AppError> {
        let context = format!("storing redirect {}", rule.from);
        self.cache
            .store()
            .put_rule(rule)
            .await
            .map_err(|e| AppError::store(context, e))
    }

    async fn refresh(&self) {
        if let Err(e) = self.cache.update().await {
            error!(error = %e, "Cache refresh after write failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::cache::DEFAULT_STORE_TIMEOUT;
    use crate::rule::testing::rule;
    use crate::rule::PathEntry;
    use crate::store::testing::FlakyStore;
    use crate::store::{MemoryStore, RuleStore};

    fn admin() -> (RuleAdmin, Arc<FlakyStore>) {
        let store = Arc::new(FlakyStore::new(MemoryStore::new()));
        let cache = RedirectCache::new(store.clone(), DEFAULT_STORE_TIMEOUT);
        (RuleAdmin::new(cache), store)
    }

    #[tokio::test]
    async fn test_create_normalizes_and_refreshes_cache() {
        let (admin, _) = admin();
        let mut new = Rule::new("Example.COM", "https://www.example.com", 301);
        new.path_entries = vec![PathEntry::new("/a", "/x"), PathEntry::new("/a/b", "/y")];

        let created = admin.create(new).await.unwrap();

        assert_eq!(created.from, "example.com");
        assert_eq!(created.path_entries[0].from, "/a/b");
        assert!(created.created_at.is_some());
        assert!(admin.cache().allow_host_policy("example.com").is_ok());
    }

    #[tokio::test]
    async fn test_create_existing_is_conflict() {
        let (admin, _) = admin();
        admin.create(rule("a.com")).await.unwrap();
        assert!(matches!(
            admin.create(rule("a.com")).await,
            Err(AppError::Conflict(_))
        ));
    }

    #[tokio::test]
    async fn test_create_rejects_invalid_code() {
        let (admin, store) = admin();
        let mut bad = rule("a.com");
        bad.code = 303;
        assert!(matches!(admin.create(bad).await, Err(AppError::Validation(_))));
        assert_eq!(store.inner.rule_count().await, 0);
    }

    #[tokio::test]
    async fn test_update_keeps_created_at() {
        let (admin, _) = admin();
        let created = admin.create(rule("a.com")).await.unwrap();

        let mut changed = rule("a.com");
        changed.to = "https://elsewhere.example".to_string();
        let updated = admin.update("a.com", changed).await.unwrap();

        assert_eq!(updated.created_at, created.created_at);
        assert_eq!(admin.get("a.com").await.unwrap().to, "https://elsewhere.example");
    }

    #[tokio::test]
    async fn test_update_missing_is_not_found() {
        let (admin, _) = admin();
        assert!(admin.update("a.com", rule("a.com")).await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_update_with_new_domain_renames() {
        let (admin, _) = admin();
        admin.create(rule("old.com")).await.unwrap();

        admin.update("old.com", rule("new.com")).await.unwrap();

        assert!(admin.get("old.com").await.unwrap_err().is_not_found());
        assert_eq!(admin.get("new.com").await.unwrap().from, "new.com");
        assert_eq!(admin.cache().domains(), ["new.com"]);
    }

    #[tokio::test]
    async fn test_failed_rename_rolls_back_new_domain() {
        let (admin, store) = admin();
        admin.create(rule("old.com")).await.unwrap();

        store.fail_next_delete();
        let result = admin.update("old.com", rule("new.com")).await;

        assert!(matches!(result, Err(AppError::Store { .. })));
        assert!(store.inner.get_rule("new.com").await.unwrap().is_none());
        assert!(admin.get("old.com").await.is_ok());
        assert_eq!(admin.cache().domains(), ["old.com"]);
    }

    #[tokio::test]
    async fn test_rename_onto_existing_is_conflict() {
        let (admin, _) = admin();
        admin.create(rule("a.com")).await.unwrap();
        admin.create(rule("b.com")).await.unwrap();

        assert!(matches!(
            admin.update("a.com", rule("b.com")).await,
            Err(AppError::Conflict(_))
        ));
        assert!(admin.get("a.com").await.is_ok());
    }

    #[tokio::test]
    async fn test_delete() {
        let (admin, _) = admin();
        admin.create(rule("a.com")).await.unwrap();

        admin.delete("a.com").await.unwrap();
        assert!(admin.cache().is_empty());
        assert!(admin.delete("a.com").await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_import_truncates_table() {
        let (admin, _) = admin();
        admin.create(rule("stale.com")).await.unwrap();

        let count = admin
            .import(vec![rule("a.com"), rule("b.com")])
            .await
            .unwrap();

        assert_eq!(count, 2);
        assert_eq!(admin.cache().domains(), ["a.com", "b.com"]);
        assert!(admin.get("stale.com").await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_import_validates_before_writing() {
        let (admin, _) = admin();
        admin.create(rule("keep.com")).await.unwrap();

        let mut bad = rule("b.com");
        bad.code = 306;
        let result = admin.import(vec![rule("a.com"), bad]).await;

        assert!(matches!(result, Err(AppError::Validation(_))));
        assert_eq!(admin.cache().domains(), ["keep.com"]);
    }

    #[tokio::test]
    async fn test_import_rejects_duplicates() {
        let (admin, _) = admin();
        let result = admin.import(vec![rule("a.com"), rule("A.com")]).await;
        assert!(matches!(result, Err(AppError::Validation(_))));
    }

    #[tokio::test]
    async fn test_write_survives_failed_refresh() {
        let (admin, store) = admin();
        store.set_scans_failing(true);

        admin.create(rule("a.com")).await.unwrap();

        assert!(store.inner.get_rule("a.com").await.unwrap().is_some());
        assert!(admin.cache().is_empty());
    }
}
