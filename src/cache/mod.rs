//! In-memory redirect cache in front of the rule store.
//!
//! Request handlers read an immutable snapshot (`domain -> Arc<Rule>`); a
//! refresh builds a whole new map and swaps it in, and a cache miss installs a
//! copy-on-write successor holding the extra rule. Readers that already hold a
//! snapshot are never disturbed by either.
//!
//! The cache also fronts certificate storage for the ACME client (see
//! [`certs`]) and runs the periodic refresh task (see [`observer`]).

mod certs;
mod observer;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use tokio::sync::watch;
use tracing::{debug, info};

use crate::error::AppError;
use crate::rule::Rule;
use crate::store::{Pager, RuleStore};

use observer::ObserverHandle;

/// Default ceiling for certificate store operations.
pub const DEFAULT_STORE_TIMEOUT: Duration = Duration::from_secs(60);

type Snapshot = HashMap<String, Arc<Rule>>;

/// Shared handle to the redirect cache. Cloning is cheap.
#[derive(Clone)]
pub struct RedirectCache {
    inner: Arc<Inner>,
}

struct Inner {
    store: Arc<dyn RuleStore>,
    pager: Pager,
    snapshot: RwLock<Arc<Snapshot>>,
    observer: Mutex<Option<ObserverHandle>>,
    store_timeout: Duration,
    generation: watch::Sender<u64>,
}

impl RedirectCache {
    pub fn new(store: Arc<dyn RuleStore>, store_timeout: Duration) -> Self {
        let (generation, _) = watch::channel(0);
        Self {
            inner: Arc::new(Inner {
                pager: Pager::new(store.clone()),
                store,
                snapshot: RwLock::new(Arc::default()),
                observer: Mutex::new(None),
                store_timeout,
                generation,
            }),
        }
    }

    pub fn store(&self) -> &Arc<dyn RuleStore> {
        &self.inner.store
    }

    pub fn pager(&self) -> &Pager {
        &self.inner.pager
    }

    /// Finds the rule for `domain`, falling back to the store on a miss.
    pub async fn lookup(&self, domain: &str) -> Result<Arc<Rule>, AppError> {
        if let Some(rule) = self.cached(domain)? {
            return Ok(rule);
        }

        let rule = self
            .inner
            .store
            .get_rule(domain)
            .await
            .map_err(|e| AppError::store(format!("loading redirect for {domain}"), e))?
            .ok_or_else(|| AppError::NotFound(domain.to_string()))?;

        if rule.from != domain {
            return Err(AppError::Inconsistent {
                requested: domain.to_string(),
                found: rule.from,
            });
        }

        let rule = Arc::new(rule);
        {
            let mut snapshot = self.inner.snapshot.write();
            Arc::make_mut(&mut snapshot).insert(domain.to_string(), rule.clone());
        }
        let generation = self.bump_generation();
        debug!(domain, generation, "Cached redirect after miss");

        Ok(rule)
    }

    fn cached(&self, domain: &str) -> Result<Option<Arc<Rule>>, AppError> {
        let snapshot = self.current();
        match snapshot.get(domain) {
            Some(rule) if rule.from != domain => Err(AppError::Inconsistent {
                requested: domain.to_string(),
                found: rule.from.clone(),
            }),
            Some(rule) => Ok(Some(rule.clone())),
            None => Ok(None),
        }
    }

    /// Reloads every rule from the store and swaps in a fresh snapshot.
    ///
    /// On failure the previous snapshot stays in place.
    pub async fn update(&self) -> Result<usize, AppError> {
        let rules = self.inner.pager.export_all().await?;

        let snapshot: Snapshot = rules
            .into_iter()
            .map(|rule| (rule.from.clone(), Arc::new(rule)))
            .collect();
        let count = snapshot.len();

        *self.inner.snapshot.write() = Arc::new(snapshot);
        let generation = self.bump_generation();

        info!(count, generation, "Redirect cache refreshed");
        Ok(count)
    }

    /// Succeeds only for domains present in the current snapshot.
    pub fn allow_host_policy(&self, domain: &str) -> Result<(), AppError> {
        if self.current().contains_key(domain) {
            Ok(())
        } else {
            Err(AppError::HostNotConfigured(domain.to_string()))
        }
    }

    pub fn domains(&self) -> Vec<String> {
        let mut domains: Vec<_> = self.current().keys().cloned().collect();
        domains.sort();
        domains
    }

    pub fn rules(&self) -> Vec<Arc<Rule>> {
        self.current().values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.current().len()
    }

    pub fn is_empty(&self) -> bool {
        self.current().is_empty()
    }

    /// Watch channel carrying the snapshot generation.
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.inner.generation.subscribe()
    }

    fn current(&self) -> Arc<Snapshot> {
        self.inner.snapshot.read().clone()
    }

    fn bump_generation(&self) -> u64 {
        let mut generation = 0;
        self.inner.generation.send_modify(|value| {
            *value += 1;
            generation = *value;
        });
        generation
    }
}
