//! Handlers for `/sites` endpoints.
//!
//! | Method | Path | Notes |
//! |--------|------|-------|
//! | `GET`  | `/sites/{id}/lineages` | Every lineage touching the site, verified |
//! | `POST` | `/sites/{id}/process` | Group and graft the site's documents |
//! | `POST` | `/sites/{id}/reprocess` | Also covers every site sharing a lineage |
//! | `POST` | `/sites/{id}/clear` | Blank lineage fields, drop analysis records |

use std::sync::Arc;

use axum::{
  Json,
  extract::{Path, State},
};
use lineage_core::{lineage::Lineage, store::DocumentStore};
use lineage_engine::{
  LineageService, MatchScorer,
  service::{ClearReport, ProcessReport},
};
use uuid::Uuid;

use crate::error::ApiError;

/// `GET /sites/{id}/lineages`
pub async fn lineages<S, M>(
  State(service): State<Arc<LineageService<S, M>>>,
  Path(id): Path<Uuid>,
) -> Result<Json<Vec<Lineage>>, ApiError>
where
  S: DocumentStore,
  M: MatchScorer,
{
  Ok(Json(service.verify_site(id).await?))
}

/// `POST /sites/{id}/process`
pub async fn process<S, M>(
  State(service): State<Arc<LineageService<S, M>>>,
  Path(id): Path<Uuid>,
) -> Result<Json<ProcessReport>, ApiError>
where
  S: DocumentStore,
  M: MatchScorer,
{
  Ok(Json(service.process_site(id).await?))
}

/// `POST /sites/{id}/reprocess`
pub async fn reprocess<S, M>(
  State(service): State<Arc<LineageService<S, M>>>,
  Path(id): Path<Uuid>,
) -> Result<Json<Vec<ProcessReport>>, ApiError>
where
  S: DocumentStore,
  M: MatchScorer,
{
  Ok(Json(service.reprocess_site(id).await?))
}

/// `POST /sites/{id}/clear`
pub async fn clear<S, M>(
  State(service): State<Arc<LineageService<S, M>>>,
  Path(id): Path<Uuid>,
) -> Result<Json<ClearReport>, ApiError>
where
  S: DocumentStore,
  M: MatchScorer,
{
  Ok(Json(service.clear_site(id).await?))
}
