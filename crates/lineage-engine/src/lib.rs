//! The document lineage engine.
//!
//! Decides which policy documents collected at different times are successive
//! editions of the same document, and keeps one versioned chain per document:
//!
//! - [`features`] turns a pair of analysis records into a fixed-order vector.
//! - [`scorer`] wraps the pretrained classifier behind [`MatchScorer`] and owns
//!   the obvious-mismatch pre-filter.
//! - [`grouper`] builds lineages from scratch via connected components.
//! - [`merger`] grafts freshly grouped chains onto preserved lineages via
//!   bipartite matching.
//! - [`mutator`] performs manual reparenting while keeping chain invariants.
//! - [`service`] sequences all of the above per site.
//!
//! Everything talks to storage through [`lineage_core::store::DocumentStore`].

pub mod config;
pub mod error;
pub mod features;
pub mod grouper;
pub mod merger;
pub mod mutator;
pub mod scorer;
pub mod service;

#[cfg(test)]
mod testing;

pub use config::EngineConfig;
pub use error::{Error, Result};
pub use scorer::{MatchScorer, PairScorer};
pub use service::LineageService;
