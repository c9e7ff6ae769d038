//! Error type for `lineage-store-sqlite`.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
  #[error("core error: {0}")]
  Core(#[from] lineage_core::Error),

  #[error("database error: {0}")]
  Database(#[from] tokio_rusqlite::Error),

  #[error("json error: {0}")]
  Json(#[from] serde_json::Error),

  #[error("uuid parse error: {0}")]
  Uuid(#[from] uuid::Error),

  #[error("date/time parse error: {0}")]
  DateParse(String),

  #[error("integer out of range for column {0}")]
  OutOfRange(&'static str),

  #[error("document {0} already exists")]
  Duplicate(uuid::Uuid),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
