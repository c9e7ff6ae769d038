//! HTTP server wiring for the lineage engine.
//!
//! Wraps [`lineage_api::api_router`] in Basic auth and loads the runtime
//! [`ServerConfig`]. The `lineage` binary in `main.rs` is a thin shell
//! around this crate.

pub mod auth;
pub mod config;
pub mod error;

pub use config::ServerConfig;
pub use error::Error;

use std::sync::Arc;

use axum::{Router, middleware};
use lineage_core::store::DocumentStore;
use lineage_engine::{LineageService, MatchScorer};

use auth::{AuthConfig, require_auth};

/// Build the full application router: every API route behind Basic auth.
pub fn router<S, M>(service: Arc<LineageService<S, M>>, auth: Arc<AuthConfig>) -> Router
where
  S: DocumentStore + 'static,
  M: MatchScorer + 'static,
{
  lineage_api::api_router(service).layer(middleware::from_fn_with_state(auth, require_auth))
}

// ─── Integration tests ────────────────────────────────────────────────────────
