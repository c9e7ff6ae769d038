//! Handler for `GET /lineages/{id}`: the verified chain, head first.

use std::sync::Arc;

use axum::{
  Json,
  extract::{Path, State},
};
use lineage_core::{lineage::Lineage, store::DocumentStore};
use lineage_engine::{LineageService, MatchScorer};
use uuid::Uuid;

use crate::error::ApiError;

/// `GET /lineages/{id}`
pub async fn get_one<S, M>(
  State(service): State<Arc<LineageService<S, M>>>,
  Path(id): Path<Uuid>,
) -> Result<Json<Lineage>, ApiError>
where
  S: DocumentStore,
  M: MatchScorer,
{
  Ok(Json(service.lineage(id).await?))
}
