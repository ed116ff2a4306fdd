//! The shared-edits service: revision acceptance, compaction, deferred commit
//! scheduling, and corruption recovery over any [`PostStore`] backend.
//!
//! [`SharedEdits`] is cheap to clone; every clone shares the same engine,
//! locks, hub, and key-value store.
//!
//! [`PostStore`]: tandem_core::store::PostStore

mod commit;
mod lifecycle;
mod recovery;
mod revise;
mod scheduler;
mod service;

pub mod config;
pub mod error;
pub mod kv;
pub mod limiter;
pub mod locks;
pub mod transport;

pub use commit::Commit;
pub use config::SyncSettings;
pub use error::{Error, Result};
pub use recovery::{HealthReport, Recovery, VersionGap};
pub use revise::{AcceptedEdit, EditPayload, EditRequest, LatestState};
pub use service::SharedEdits;
pub use transport::{ChannelMessage, Hub};

#[cfg(test)]
mod tests;
