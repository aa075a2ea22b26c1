//! Admin API
//!
//! Read-mostly HTTP endpoints for inspecting and probing the proxy pool.

pub mod handlers;
pub mod routes;
pub mod server;

pub use server::{ApiServer, AppState};
