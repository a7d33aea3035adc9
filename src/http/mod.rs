//! HTTP listeners.
//!
//! - **Redirect listeners**: plain HTTP and TLS, answering every request from
//!   the redirect cache
//! - **Administrative API**: token-protected JSON management of the rules
//!
//! All listeners shut down gracefully on SIGTERM/SIGINT.

pub mod api;
pub mod redirect;
mod server;
mod shutdown;

pub use server::{start_servers, ServerError};
