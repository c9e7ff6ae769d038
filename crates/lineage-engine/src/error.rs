//! Error type for `lineage-engine`.

use thiserror::Error;
use uuid::Uuid;

use crate::scorer::ScorerError;

#[derive(Debug, Error)]
pub enum Error {
  /// A referenced document or predecessor does not resolve.
  #[error("document not found: {0}")]
  NotFound(Uuid),

  /// A lineage invariant is violated. Raised, never auto-corrected.
  #[error("lineage {lineage_id:?} is inconsistent: {reason}")]
  InconsistentState {
    lineage_id: Option<Uuid>,
    reason:     String,
  },

  /// The classifier cannot be loaded or evaluated; the whole batch is void.
  #[error("match scorer unavailable: {0}")]
  ScorerUnavailable(String),

  #[error("document {document} follows {actual:?}, not {claimed:?}")]
  PredecessorMismatch {
    document: Uuid,
    claimed:  Option<Uuid>,
    actual:   Option<Uuid>,
  },

  #[error("linking {document} after {new_predecessor} would create a cycle")]
  WouldCreateCycle {
    document:        Uuid,
    new_predecessor: Uuid,
  },

  #[error("document {document} is a {found:?}, cannot join a {expected:?} lineage")]
  DocumentTypeMismatch {
    document: Uuid,
    expected: String,
    found:    String,
  },

  #[error("core error: {0}")]
  Core(lineage_core::Error),

  #[error("store error: {0}")]
  Store(#[source] Box<dyn std::error::Error + Send + Sync>),
}

impl Error {
  pub(crate) fn store<E>(e: E) -> Self
  where
    E: std::error::Error + Send + Sync + 'static,
  {
    Self::Store(Box::new(e))
  }

  pub(crate) fn inconsistent(lineage_id: Option<Uuid>, reason: impl Into<String>) -> Self {
    Self::InconsistentState { lineage_id, reason: reason.into() }
  }
}

impl From<lineage_core::Error> for Error {
  fn from(e: lineage_core::Error) -> Self {
    match e {
      lineage_core::Error::InconsistentState { lineage_id, reason } => {
        Self::InconsistentState { lineage_id: Some(lineage_id), reason }
      }
      other => Self::Core(other),
    }
  }
}

impl From<ScorerError> for Error {
  fn from(e: ScorerError) -> Self { Self::ScorerUnavailable(e.to_string()) }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
