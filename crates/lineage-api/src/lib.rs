//! JSON REST API for the lineage engine.
//!
//! Exposes an axum [`Router`] backed by a [`LineageService`] over any
//! [`lineage_core::store::DocumentStore`]. Auth, TLS, and transport concerns
//! are the caller's responsibility.
//!
//! # Mounting
//!
//! ```rust,ignore
//! .nest("/api", lineage_api::api_router(service.clone()))
//! ```

pub mod documents;
pub mod error;
pub mod lineages;
pub mod sites;

use std::sync::Arc;

use axum::{
  Router,
  routing::{get, post},
};
use lineage_core::store::DocumentStore;
use lineage_engine::{LineageService, MatchScorer};
use tower_http::trace::TraceLayer;

pub use error::ApiError;

/// Build a fully-materialised API router for `service`.
///
/// The returned `Router<()>` can be nested into any parent router regardless
/// of its own state type.
pub fn api_router<S, M>(service: Arc<LineageService<S, M>>) -> Router<()>
where
  S: DocumentStore + 'static,
  M: MatchScorer + 'static,
{
  Router::new()
    // Documents
    .route("/documents/{id}", get(documents::get_one::<S, M>))
    .route("/documents/{id}/lineage", post(documents::update::<S, M>))
    .route("/documents/{id}/lineage/new", post(documents::start_new::<S, M>))
    // Lineages
    .route("/lineages/{id}", get(lineages::get_one::<S, M>))
    // Sites
    .route("/sites/{id}/lineages", get(sites::lineages::<S, M>))
    .route("/sites/{id}/process", post(sites::process::<S, M>))
    .route("/sites/{id}/reprocess", post(sites::reprocess::<S, M>))
    .route("/sites/{id}/clear", post(sites::clear::<S, M>))
    .layer(TraceLayer::new_for_http())
    .with_state(service)
}

#[cfg(test)]
mod tests {
  use std::collections::BTreeSet;

  use axum::{
    body::Body,
    http::{Request, StatusCode, header},
  };
  use chrono::{TimeZone, Utc};
  use lineage_core::{
    analysis::AnalysisRecord,
    document::DocumentVersion,
    memory::MemoryStore,
  };
  use lineage_engine::{
    EngineConfig,
    features::FeatureVector,
    scorer::{HeuristicScorer, ScorerError},
  };
  use serde_json::{Value, json};
  use tower::ServiceExt as _;
  use uuid::Uuid;

  use super::*;

  struct Offline;

  impl MatchScorer for Offline {
    fn score(&self, _: &FeatureVector) -> Result<f64, ScorerError> {
      Err(ScorerError::Unavailable("model offline".into()))
    }
  }

  fn app<M: MatchScorer + 'static>(store: &Arc<MemoryStore>, model: M) -> Router {
    let service = LineageService::new(store.clone(), model, EngineConfig::default());
    api_router(Arc::new(service))
  }

  fn doc(site_id: Uuid, secs: i64) -> DocumentVersion {
    DocumentVersion::new(site_id, "formulary", None, Utc.timestamp_opt(secs, 0).unwrap())
  }

  /// Link `docs` into one lineage in order; the last is current.
  fn link(docs: &mut [DocumentVersion]) -> Uuid {
    let lineage_id = Uuid::new_v4();
    let mut previous = None;
    let last = docs.len() - 1;
    for (i, d) in docs.iter_mut().enumerate() {
      d.lineage_id = Some(lineage_id);
      d.previous_version_id = previous;
      d.is_current_version = i == last;
      previous = Some(d.id);
    }
    lineage_id
  }

  async fn seed(store: &MemoryStore, docs: &[DocumentVersion]) {
    for d in docs {
      store.insert_document(d.clone()).await.unwrap();
    }
  }

  async fn send(app: Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let req = Request::builder()
      .method(method)
      .uri(uri)
      .header(header::CONTENT_TYPE, "application/json")
      .body(body.map_or_else(Body::empty, |b| Body::from(b.to_string())))
      .unwrap();
    let resp = app.oneshot(req).await.unwrap();
    let status = resp.status();
    let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    let value = if bytes.is_empty() {
      Value::Null
    } else {
      serde_json::from_slice(&bytes).unwrap_or(Value::Null)
    };
    (status, value)
  }

  // ── Documents ────────────────────────────────────────────────────────────

  #[tokio::test]
  async fn get_document_returns_stored_version() {
    let store = Arc::new(MemoryStore::new());
    let d = doc(Uuid::new_v4(), 1);
    seed(&store, &[d.clone()]).await;

    let (status, body) = send(app(&store, HeuristicScorer::new()), "GET", &format!("/documents/{}", d.id), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["id"], json!(d.id));
    assert_eq!(body["document_type"], "formulary");
  }

  #[tokio::test]
  async fn missing_document_is_404_with_error_body() {
    let store = Arc::new(MemoryStore::new());
    let uri = format!("/documents/{}", Uuid::new_v4());

    let (status, body) = send(app(&store, HeuristicScorer::new()), "GET", &uri, None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(body["error"].as_str().unwrap().contains("not found"));
  }

  #[tokio::test]
  async fn start_new_lineage_then_read_it_back() {
    let store = Arc::new(MemoryStore::new());
    let mut docs = vec![doc(Uuid::new_v4(), 1), doc(Uuid::new_v4(), 2)];
    let old_lineage = link(&mut docs);
    seed(&store, &docs).await;
    let app = app(&store, HeuristicScorer::new());

    let (status, body) = send(
      app.clone(),
      "POST",
      &format!("/documents/{}/lineage/new", docs[1].id),
      Some(json!({ "old_predecessor": docs[0].id })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let new_lineage = body["lineage_id"].as_str().unwrap().to_string();

    let (status, body) = send(app.clone(), "GET", &format!("/lineages/{new_lineage}"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["chain"][0]["id"], json!(docs[1].id));

    let (status, body) = send(app, "GET", &format!("/lineages/{old_lineage}"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["chain"].as_array().unwrap().len(), 1);
    assert_eq!(body["chain"][0]["is_current_version"], true);
  }

  #[tokio::test]
  async fn stale_predecessor_is_409() {
    let store = Arc::new(MemoryStore::new());
    let mut docs = vec![doc(Uuid::new_v4(), 1), doc(Uuid::new_v4(), 2), doc(Uuid::new_v4(), 3)];
    link(&mut docs);
    seed(&store, &docs).await;

    let (status, _) = send(
      app(&store, HeuristicScorer::new()),
      "POST",
      &format!("/documents/{}/lineage", docs[2].id),
      Some(json!({
        "old_predecessor": docs[0].id,
        "new_predecessor": null,
        "include_later_documents": false,
      })),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
  }

  #[tokio::test]
  async fn cycle_is_409() {
    let store = Arc::new(MemoryStore::new());
    let mut docs = vec![doc(Uuid::new_v4(), 1), doc(Uuid::new_v4(), 2), doc(Uuid::new_v4(), 3)];
    link(&mut docs);
    seed(&store, &docs).await;

    let (status, body) = send(
      app(&store, HeuristicScorer::new()),
      "POST",
      &format!("/documents/{}/lineage", docs[1].id),
      Some(json!({
        "old_predecessor": docs[0].id,
        "new_predecessor": docs[2].id,
        "include_later_documents": true,
      })),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert!(body["error"].as_str().unwrap().contains("cycle"));
  }

  // ── Lineages ─────────────────────────────────────────────────────────────

  #[tokio::test]
  async fn broken_lineage_is_500() {
    let store = Arc::new(MemoryStore::new());
    let mut docs = vec![doc(Uuid::new_v4(), 1), doc(Uuid::new_v4(), 2)];
    let lineage_id = link(&mut docs);
    docs[0].is_current_version = true;
    seed(&store, &docs).await;

    let (status, body) = send(app(&store, HeuristicScorer::new()), "GET", &format!("/lineages/{lineage_id}"), None).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert!(body["error"].as_str().unwrap().contains("current versions"));
  }

  // ── Sites ────────────────────────────────────────────────────────────────

  #[tokio::test]
  async fn process_with_unavailable_scorer_is_503() {
    let store = Arc::new(MemoryStore::new());
    let site = Uuid::new_v4();
    let docs = vec![doc(site, 1), doc(site, 2)];
    seed(&store, &docs).await;
    for d in &docs {
      store.upsert_analysis_record(AnalysisRecord::for_document(d)).await.unwrap();
    }

    let (status, _) = send(app(&store, Offline), "POST", &format!("/sites/{site}/process"), None).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(store.writes(), 0);
  }

  #[tokio::test]
  async fn process_then_list_site_lineages() {
    let store = Arc::new(MemoryStore::new());
    let site = Uuid::new_v4();
    let docs = vec![doc(site, 1), doc(site, 2)];
    seed(&store, &docs).await;
    for (i, d) in docs.iter().enumerate() {
      let record = AnalysisRecord {
        name: Some(if i == 0 { "Medicare Formulary" } else { "Dental Fee Schedule" }.into()),
        focus_tags: BTreeSet::from([format!("tag-{i}")]),
        ..AnalysisRecord::for_document(d)
      };
      store.upsert_analysis_record(record).await.unwrap();
    }
    let app = app(&store, HeuristicScorer::new());

    let (status, body) = send(app.clone(), "POST", &format!("/sites/{site}/process"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["documents"], 2);

    let (status, body) = send(app, "GET", &format!("/sites/{site}/lineages"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body.as_array().unwrap().len(), 2);
  }

  #[tokio::test]
  async fn clear_reports_what_it_blanked() {
    let store = Arc::new(MemoryStore::new());
    let site = Uuid::new_v4();
    let mut docs = vec![doc(site, 1), doc(site, 2)];
    link(&mut docs);
    seed(&store, &docs).await;

    let (status, body) = send(app(&store, HeuristicScorer::new()), "POST", &format!("/sites/{site}/clear"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["documents_cleared"], 2);
    assert_eq!(body["records_deleted"], 0);
  }
}
