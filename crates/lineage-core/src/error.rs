//! Error types for `lineage-core`.

use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum Error {
  /// A lineage invariant does not hold. Never auto-corrected.
  #[error("lineage {lineage_id} is inconsistent: {reason}")]
  InconsistentState { lineage_id: Uuid, reason: String },

  #[error("unknown classification status: {0:?}")]
  UnknownClassificationStatus(String),
}

impl Error {
  pub(crate) fn inconsistent(lineage_id: Uuid, reason: impl Into<String>) -> Self {
    Self::InconsistentState { lineage_id, reason: reason.into() }
  }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
