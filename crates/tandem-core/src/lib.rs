//! Core types and trait definitions for the tandem shared-editing engine.
//!
//! This crate is deliberately free of HTTP and database dependencies. It owns
//! the revision data model, the two document engines (the yrs-backed merge
//! engine and the positional patch engine), and the state validator that
//! guards everything entering the revision log.

// We intentionally use native `async fn` in traits (stabilised in Rust 1.75).
// Suppress the advisory lint about `Send` bounds on the returned futures.
#![allow(async_fn_in_trait)]

pub mod error;
pub mod hash;
pub mod merge;
pub mod patch;
pub mod post;
pub mod revision;
pub mod store;
pub mod validation;

pub use error::{Error, Result};
