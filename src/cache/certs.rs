//! Certificate storage for the ACME client.
//!
//! Every call runs the store operation on its own task and races it against
//! the caller's `cancel` future and the configured ceiling. Whichever loses is
//! left alone: a store write that outlives its caller still completes.

use std::future::Future;

use tokio::time;
use tracing::{debug, warn};

use super::RedirectCache;
use crate::error::AppError;
use crate::store::{self, StoreError};

impl RedirectCache {
    /// Returns stored certificate data, or [`AppError::CacheMiss`] when
    /// nothing (or an empty value) is stored under `key`.
    pub async fn get_certificate(
        &self,
        key: &str,
        cancel: impl Future<Output = ()>,
    ) -> Result<Vec<u8>, AppError> {
        let store = self.inner.store.clone();
        let owned = key.to_string();
        let data = self
            .race("loading certificate", key, cancel, async move {
                store.get_blob(&owned).await
            })
            .await?;

        match data {
            Some(data) if !data.is_empty() => Ok(data),
            _ => {
                debug!(key, "Certificate cache miss");
                Err(AppError::CacheMiss)
            }
        }
    }

    pub async fn put_certificate(
        &self,
        key: &str,
        data: Vec<u8>,
        cancel: impl Future<Output = ()>,
    ) -> Result<(), AppError> {
        let store = self.inner.store.clone();
        let owned = key.to_string();
        self.race("storing certificate", key, cancel, async move {
            store.put_blob(&owned, data).await
        })
        .await
    }

    pub async fn delete_certificate(
        &self,
        key: &str,
        cancel: impl Future<Output = ()>,
    ) -> Result<(), AppError> {
        let store = self.inner.store.clone();
        let owned = key.to_string();
        self.race("deleting certificate", key, cancel, async move {
            store.delete_blob(&owned).await
        })
        .await
    }

    async fn race<T, F>(
        &self,
        action: &str,
        key: &str,
        cancel: impl Future<Output = ()>,
        op: F,
    ) -> Result<T, AppError>
    where
        T: Send + 'static,
        F: Future<Output = store::Result<T>> + Send + 'static,
    {
        let task = tokio::spawn(op);
        tokio::pin!(cancel);

        tokio::select! {
            biased;
            _ = &mut cancel => {
                debug!(key, action, "Certificate store call cancelled");
                Err(AppError::Cancelled)
            }
            joined = task => match joined {
                Ok(result) => result.map_err(|e| AppError::store(format!("{action} {key}"), e)),
                Err(e) => Err(AppError::store(
                    format!("{action} {key}"),
                    StoreError::Unavailable(e.to_string()),
                )),
            },
            _ = time::sleep(self.inner.store_timeout) => {
                warn!(key, action, "Certificate store call timed out");
                Err(AppError::Timeout)
            }
        }
    }
}
