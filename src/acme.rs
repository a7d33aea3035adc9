//! Automatic certificates for every configured domain.
//!
//! [`CertificateManager`] keeps one rustls-acme state per domain in the
//! redirect cache and is installed as the TLS listener's certificate resolver.
//! Orders, renewals and account keys are persisted through [`AcmeStorage`],
//! which stores them as blobs via the cache's certificate adapter.
//!
//! Challenges are answered with TLS-ALPN-01 only.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::future;
use std::sync::Arc;

use async_trait::async_trait;
use futures::StreamExt;
use parking_lot::RwLock;
use rustls::server::{ClientHello, ResolvesServerCert};
use rustls::sign::CertifiedKey;
use rustls::ServerConfig;
use rustls_acme::{AccountCache, AcmeConfig as AcmeClientConfig, CertCache, ResolvesServerCertAcme};
use sha2::{Digest, Sha256};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::cache::RedirectCache;
use crate::config::AcmeConfig;
use crate::error::AppError;

/// ALPN protocols offered by the TLS listener.
pub const ALPN_PROTOCOLS: [&[u8]; 3] = [b"h2", b"http/1.1", b"acme-tls/1"];

/// ACME client storage backed by the redirect cache.
#[derive(Clone)]
pub struct AcmeStorage {
    cache: RedirectCache,
}

impl AcmeStorage {
    pub fn new(cache: RedirectCache) -> Self {
        Self { cache }
    }

    async fn load(&self, key: String) -> Result<Option<Vec<u8>>, AppError> {
        match self.cache.get_certificate(&key, future::pending()).await {
            Ok(data) => Ok(Some(data)),
            Err(AppError::CacheMiss) => Ok(None),
            Err(e) => {
                error!(key = %key, error = %e, "Failed to load ACME data");
                Err(e)
            }
        }
    }

    async fn store(&self, key: String, data: &[u8]) -> Result<(), AppError> {
        self.cache
            .put_certificate(&key, data.to_vec(), future::pending())
            .await
            .inspect_err(|e| error!(key = %key, error = %e, "Failed to store ACME data"))
    }
}

/// Stable storage key for a set of names under one ACME directory.
pub fn storage_key(kind: &str, names: &[String], directory_url: &str) -> String {
    let mut hasher = Sha256::new();
    for name in names {
        hasher.update(name.as_bytes());
        hasher.update([0]);
    }
    hasher.update(directory_url.as_bytes());
    let digest = hasher.finalize();

    let hex: String = digest.iter().map(|b| format!("{:02x}", b)).collect();
    format!("{}:{}", kind, hex)
}

#[async_trait]
impl CertCache for AcmeStorage {
    type EC = AppError;

    async fn load_cert(
        &self,
        domains: &[String],
        directory_url: &str,
    ) -> Result<Option<Vec<u8>>, Self::EC> {
        self.load(storage_key("cert", domains, directory_url)).await
    }

    async fn store_cert(
        &self,
        domains: &[String],
        directory_url: &str,
        cert: &[u8],
    ) -> Result<(), Self::EC> {
        info!(domains = ?domains, "Storing ACME certificate");
        self.store(storage_key("cert", domains, directory_url), cert)
            .await
    }
}

#[async_trait]
impl AccountCache for AcmeStorage {
    type EA = AppError;

    async fn load_account(
        &self,
        contact: &[String],
        directory_url: &str,
    ) -> Result<Option<Vec<u8>>, Self::EA> {
        self.load(storage_key("account", contact, directory_url))
            .await
    }

    async fn store_account(
        &self,
        contact: &[String],
        directory_url: &str,
        account: &[u8],
    ) -> Result<(), Self::EA> {
        self.store(storage_key("account", contact, directory_url), account)
            .await
    }
}

struct DomainState {
    resolver: Arc<ResolvesServerCertAcme>,
    task: JoinHandle<()>,
}

/// Per-domain ACME states, kept in step with the redirect cache.
pub struct CertificateManager {
    cache: RedirectCache,
    settings: AcmeConfig,
    states: RwLock<HashMap<String, DomainState>>,
}

impl CertificateManager {
    pub fn new(cache: RedirectCache, settings: AcmeConfig) -> Arc<Self> {
        if settings.directory.is_none() && !settings.production {
            warn!(
                "Using Let's Encrypt staging environment - certificates will NOT be trusted by browsers. \
                 Set acme.production = true for production use."
            );
        }

        Arc::new(Self {
            cache,
            settings,
            states: RwLock::new(HashMap::new()),
        })
    }

    /// Domains with a running ACME state, sorted.
    pub fn managed_domains(&self) -> Vec<String> {
        let mut domains: Vec<_> = self.states.read().keys().cloned().collect();
        domains.sort();
        domains
    }

    /// Starts states for new cache domains and stops states for removed ones.
    pub fn sync(&self) {
        let wanted: HashSet<String> = self.cache.domains().into_iter().collect();
        let mut states = self.states.write();

        states.retain(|domain, state| {
            let keep = wanted.contains(domain);
            if !keep {
                state.task.abort();
                info!(domain = %domain, "Stopped certificate management");
            }
            keep
        });

        for domain in wanted {
            if !states.contains_key(&domain) {
                let state = self.start(&domain);
                states.insert(domain, state);
            }
        }
    }

    fn start(&self, domain: &str) -> DomainState {
        let mut config = AcmeClientConfig::new([domain]).cache(AcmeStorage::new(self.cache.clone()));
        if let Some(email) = &self.settings.email {
            config = config.contact_push(format!("mailto:{}", email));
        }
        config = match &self.settings.directory {
            Some(url) => config.directory(url),
            None => config.directory_lets_encrypt(self.settings.production),
        };

        let mut state = config.state();
        let resolver = state.resolver();

        let name = domain.to_string();
        let task = tokio::spawn(async move {
            loop {
                match state.next().await {
                    Some(Ok(event)) => {
                        info!(domain = %name, event = ?event, "ACME event");
                    }
                    Some(Err(err)) => {
                        error!(domain = %name, error = %err, "ACME error");
                    }
                    None => {
                        debug!(domain = %name, "ACME state stream ended");
                        break;
                    }
                }
            }
        });

        info!(domain = %domain, "Started certificate management");
        DomainState { resolver, task }
    }

    /// Re-syncs after every cache generation. Runs until aborted.
    pub fn spawn_sync_loop(self: &Arc<Self>) -> JoinHandle<()> {
        let manager = Arc::clone(self);
        let mut generations = self.cache.subscribe();

        tokio::spawn(async move {
            manager.sync();
            while generations.changed().await.is_ok() {
                manager.sync();
            }
        })
    }

    /// TLS configuration that resolves certificates through this manager.
    pub fn server_config(self: &Arc<Self>) -> Result<Arc<ServerConfig>, rustls::Error> {
        let provider = Arc::new(rustls::crypto::aws_lc_rs::default_provider());
        let mut config = ServerConfig::builder_with_provider(provider)
            .with_safe_default_protocol_versions()?
            .with_no_client_auth()
            .with_cert_resolver(self.clone());
        config.alpn_protocols = ALPN_PROTOCOLS.iter().map(|p| p.to_vec()).collect();
        Ok(Arc::new(config))
    }

    /// Stops every ACME state.
    pub fn shutdown(&self) {
        for (_, state) in self.states.write().drain() {
            state.task.abort();
        }
    }
}

impl fmt::Debug for CertificateManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CertificateManager")
            .field("domains", &self.managed_domains())
            .finish()
    }
}

impl ResolvesServerCert for CertificateManager {
    fn resolve(&self, client_hello: ClientHello<'_>) -> Option<Arc<CertifiedKey>> {
        let Some(name) = client_hello.server_name().map(str::to_ascii_lowercase) else {
            debug!("TLS handshake without SNI rejected");
            return None;
        };

        if let Err(e) = self.cache.allow_host_policy(&name) {
            debug!(domain = %name, reason = %e, "TLS handshake rejected");
            return None;
        }

        let resolver = self
            .states
            .read()
            .get(&name)
            .map(|state| state.resolver.clone());
        match resolver {
            Some(resolver) => resolver.resolve(client_hello),
            None => {
                debug!(domain = %name, "No certificate state yet");
                None
            }
        }
    }
}
