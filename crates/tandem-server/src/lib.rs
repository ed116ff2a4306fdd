//! HTTP server for tandem shared editing.
//!
//! Wraps the [`tandem_api`] router with Basic authentication and request
//! tracing, over a [`SqliteStore`]-backed [`SharedEdits`] service.
//!
//! [`SqliteStore`]: tandem_store_sqlite::SqliteStore

pub mod auth;

use std::{path::PathBuf, sync::Arc};

use axum::{Router, middleware};
use serde::Deserialize;
use tandem_core::store::PostStore;
use tandem_sync::{SharedEdits, SyncSettings};
use tower_http::trace::TraceLayer;

use auth::{AuthConfig, UserConfig};

// ─── Configuration ────────────────────────────────────────────────────────────

/// Runtime server configuration, deserialised from `config.toml`.
#[derive(Deserialize, Clone)]
pub struct ServerConfig {
  pub host:         String,
  pub port:         u16,
  pub store_path:   PathBuf,
  #[serde(default)]
  pub users:        Vec<UserConfig>,
  #[serde(default)]
  pub shared_edits: SyncSettings,
}

// ─── Application state ────────────────────────────────────────────────────────

/// Everything the router needs.
#[derive(Clone)]
pub struct AppState<S> {
  pub edits: SharedEdits<S>,
  pub auth:  Arc<AuthConfig>,
}

// ─── Router ───────────────────────────────────────────────────────────────────

/// Build an axum [`Router`] serving the shared-edits API behind Basic auth.
pub fn router<S>(state: AppState<S>) -> Router
where
  S: PostStore + 'static,
{
  tandem_api::router(state.edits)
    .layer(middleware::from_fn_with_state(state.auth, auth::require_editor))
    .layer(TraceLayer::new_for_http())
}

// ─── Integration tests ────────────────────────────────────────────────────────
