//! Handlers for `/documents` endpoints.
//!
//! | Method | Path | Notes |
//! |--------|------|-------|
//! | `GET`  | `/documents/{id}` | 404 if not found |
//! | `POST` | `/documents/{id}/lineage/new` | Body: [`StartNewBody`] |
//! | `POST` | `/documents/{id}/lineage` | Body: [`UpdateBody`] |

use std::sync::Arc;

use axum::{
  Json,
  extract::{Path, State},
};
use lineage_core::{document::DocumentVersion, store::DocumentStore};
use lineage_engine::{LineageService, MatchScorer, mutator::Mutation};
use serde::Deserialize;
use uuid::Uuid;

use crate::error::ApiError;

// ─── Get one ──────────────────────────────────────────────────────────────────

/// `GET /documents/{id}`
pub async fn get_one<S, M>(
  State(service): State<Arc<LineageService<S, M>>>,
  Path(id): Path<Uuid>,
) -> Result<Json<DocumentVersion>, ApiError>
where
  S: DocumentStore,
  M: MatchScorer,
{
  Ok(Json(service.document(id).await?))
}

// ─── Start new lineage ────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct StartNewBody {
  /// The predecessor the caller believes the document currently has.
  pub old_predecessor:         Option<Uuid>,
  /// Move every later version of the chain along with the document.
  #[serde(default)]
  pub include_later_documents: bool,
}

/// `POST /documents/{id}/lineage/new`
pub async fn start_new<S, M>(
  State(service): State<Arc<LineageService<S, M>>>,
  Path(id): Path<Uuid>,
  Json(body): Json<StartNewBody>,
) -> Result<Json<Mutation>, ApiError>
where
  S: DocumentStore,
  M: MatchScorer,
{
  let mutation = service
    .start_new_lineage(id, body.old_predecessor, body.include_later_documents)
    .await?;
  Ok(Json(mutation))
}

// ─── Update lineage ───────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct UpdateBody {
  pub old_predecessor:         Option<Uuid>,
  /// `null` detaches the document into a new lineage.
  pub new_predecessor:         Option<Uuid>,
  #[serde(default)]
  pub include_later_documents: bool,
}

/// `POST /documents/{id}/lineage`
pub async fn update<S, M>(
  State(service): State<Arc<LineageService<S, M>>>,
  Path(id): Path<Uuid>,
  Json(body): Json<UpdateBody>,
) -> Result<Json<Mutation>, ApiError>
where
  S: DocumentStore,
  M: MatchScorer,
{
  let mutation = service
    .update_lineage(
      id,
      body.old_predecessor,
      body.new_predecessor,
      body.include_later_documents,
    )
    .await?;
  Ok(Json(mutation))
}
