//! Veer - domain-based HTTP/HTTPS redirect gateway
//!
//! Answers every request on its redirect listeners by looking up the request's
//! host in an in-memory cache of redirect rules and replying with the rule's
//! status code and computed `Location`. TLS certificates for every configured
//! domain are obtained automatically over ACME; rules are managed through a
//! token-protected JSON API and persisted in SQLite.

pub mod acme;
pub mod admin;
pub mod cache;
pub mod config;
pub mod error;
pub mod http;
pub mod metrics;
pub mod middleware;
pub mod rule;
pub mod state;
pub mod store;

pub use error::AppError;
