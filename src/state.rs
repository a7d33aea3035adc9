//! Shared application state for administrative API handlers.

use sha2::{Digest, Sha256};

use crate::admin::RuleAdmin;
use crate::cache::RedirectCache;
use crate::metrics::Metrics;

/// Shared application state, cloneable across handlers.
///
/// Only a digest of the API token is kept; presented tokens are hashed and
/// compared digest to digest.
#[derive(Clone)]
pub struct AppState {
    pub cache: RedirectCache,
    pub admin: RuleAdmin,
    pub metrics: Metrics,
    token_digest: [u8; 32],
}

impl AppState {
    pub fn new(cache: RedirectCache, api_token: &str, metrics: Metrics) -> Self {
        Self {
            admin: RuleAdmin::new(cache.clone()),
            cache,
            metrics,
            token_digest: digest(api_token),
        }
    }

    pub fn token_matches(&self, presented: &str) -> bool {
        digest(presented) == self.token_digest
    }
}

fn digest(token: &str) -> [u8; 32] {
    let mut out = [0u8; 32];
    out.copy_from_slice(&Sha256::digest(token.as_bytes()));
    out
}
