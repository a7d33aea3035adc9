//! Listener startup.
//!
//! Three listeners share one graceful-shutdown trigger:
//! - plain HTTP redirects
//! - TLS redirects, certificates from the ACME certificate manager
//! - the administrative API

use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use axum_server::tls_rustls::RustlsConfig;
use axum_server::Handle;

use crate::acme::CertificateManager;
use crate::config::AppConfig;
use crate::rule::Scheme;
use crate::state::AppState;

use super::{api, redirect, shutdown};

/// Server startup error
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("Failed to bind server: {0}")]
    Bind(#[from] std::io::Error),

    #[error("Invalid listen address: {0}")]
    Address(String),

    #[error("Failed to load TLS configuration: {0}")]
    TlsConfig(String),

    #[error("Server error: {0}")]
    Server(String),
}

/// Start every configured listener.
///
/// Blocks until all listeners have shut down.
pub async fn start_servers(
    config: &AppConfig,
    state: AppState,
    certs: Option<Arc<CertificateManager>>,
) -> Result<(), ServerError> {
    let http_addr = listen_addr(&config.http.host, config.http.port, "http")?;
    let admin_addr = listen_addr(&config.admin.host, config.admin.port, "admin")?;

    let http_app = redirect::router(state.cache.clone(), Scheme::Http, &state.metrics);
    let admin_app = api::router(state.clone(), config.admin.cors_origin.as_deref());

    let http_handle = Handle::new();
    let admin_handle = Handle::new();
    let mut handles = vec![http_handle.clone(), admin_handle.clone()];

    let tls = match (config.https.enabled, certs) {
        (true, Some(manager)) => {
            let addr = listen_addr(&config.http.host, config.https.port, "https")?;
            let server_config = manager
                .server_config()
                .map_err(|e| ServerError::TlsConfig(e.to_string()))?;
            let handle = Handle::new();
            handles.push(handle.clone());
            Some((addr, RustlsConfig::from_config(server_config), handle))
        }
        (true, None) => {
            return Err(ServerError::TlsConfig(
                "HTTPS enabled without a certificate manager".to_string(),
            ))
        }
        (false, _) => {
            tracing::warn!("HTTPS listener disabled - redirects served on plain HTTP only");
            None
        }
    };

    shutdown::setup_shutdown_handler(handles);

    let https_app = redirect::router(state.cache.clone(), Scheme::Https, &state.metrics);
    let tls_server = async move {
        match tls {
            Some((addr, rustls_config, handle)) => {
                start_tls_server(https_app, addr, rustls_config, handle).await
            }
            None => Ok(()),
        }
    };

    tokio::try_join!(
        start_plain_server(http_app, http_addr, http_handle, "redirect"),
        tls_server,
        start_plain_server(admin_app, admin_addr, admin_handle, "admin API"),
    )?;

    Ok(())
}

fn listen_addr(host: &str, port: u16, section: &str) -> Result<SocketAddr, ServerError> {
    format!("{}:{}", host, port).parse().map_err(|e| {
        ServerError::Address(format!("Invalid {}.host or {}.port: {}", section, section, e))
    })
}

async fn start_plain_server(
    app: Router,
    addr: SocketAddr,
    handle: Handle,
    name: &'static str,
) -> Result<(), ServerError> {
    tracing::info!(%addr, listener = name, "Starting HTTP server");

    axum_server::bind(addr)
        .handle(handle)
        .serve(app.into_make_service())
        .await
        .map_err(|e| ServerError::Server(e.to_string()))?;

    tracing::debug!(listener = name, "HTTP server stopped");
    Ok(())
}

/// Start the TLS redirect listener with certificates from the ACME manager.
async fn start_tls_server(
    app: Router,
    addr: SocketAddr,
    rustls_config: RustlsConfig,
    handle: Handle,
) -> Result<(), ServerError> {
    tracing::info!(%addr, "Starting HTTPS server (ACME)");

    axum_server::bind_rustls(addr, rustls_config)
        .handle(handle)
        .serve(app.into_make_service())
        .await
        .map_err(|e| ServerError::Server(e.to_string()))?;

    tracing::debug!("HTTPS server stopped");
    Ok(())
}
