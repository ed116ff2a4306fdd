//! JSON HTTP API for shared editing.
//!
//! Exposes an axum [`Router`] backed by a [`SharedEdits`] service. The caller
//! authenticates requests and inserts an [`Editor`] into the request
//! extensions; TLS and transport concerns are also the caller's.
//!
//! # Mounting
//!
//! ```rust,ignore
//! let app = tandem_api::router(edits).layer(auth_layer);
//! ```

pub mod edits;
pub mod editor;
pub mod error;
pub mod lifecycle;
pub mod recovery;
pub mod stream;

use axum::{
  Router,
  routing::{get, put},
};
use tandem_core::store::PostStore;
use tandem_sync::{SharedEdits, kv::KeyValue};

pub use editor::Editor;
pub use error::{ApiError, ClientAction, ErrorCode};

/// Build the shared-edits router for `edits`.
///
/// The returned `Router<()>` can be nested or merged into any parent router
/// regardless of its own state type.
pub fn router<S, K>(edits: SharedEdits<S, K>) -> Router<()>
where
  S: PostStore + 'static,
  K: KeyValue + 'static,
{
  Router::new()
    .route(
      "/shared_edits/p/{post_id}",
      get(edits::latest::<S, K>).put(edits::submit::<S, K>),
    )
    .route("/shared_edits/p/{post_id}/commit", put(edits::commit::<S, K>))
    // Lifecycle
    .route("/shared_edits/p/{post_id}/enable", put(lifecycle::enable::<S, K>))
    .route("/shared_edits/p/{post_id}/disable", put(lifecycle::disable::<S, K>))
    .route("/shared_edits/p/{post_id}/reset", put(lifecycle::reset::<S, K>))
    // Recovery
    .route("/shared_edits/p/{post_id}/recover", put(recovery::recover::<S, K>))
    .route("/shared_edits/p/{post_id}/health", get(recovery::health::<S, K>))
    // Subscription
    .route("/shared_edits/p/{post_id}/stream", get(stream::handler::<S, K>))
    .with_state(edits)
}
