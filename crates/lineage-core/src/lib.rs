//! Core types and trait definitions for the policy document lineage engine.
//!
//! This crate is free of HTTP, database and scoring dependencies.
//! All other crates depend on it; it depends on nothing proprietary.

// We intentionally use native `async fn` in traits (stabilised in Rust 1.75).
// Suppress the advisory lint about `Send` bounds on the returned futures.
#![allow(async_fn_in_trait)]

pub mod analysis;
pub mod document;
pub mod error;
pub mod lineage;
pub mod memory;
pub mod store;

pub use error::{Error, Result};
