//! The `DocumentStore` trait.
//!
//! The trait is implemented by storage backends (e.g. `lineage-store-sqlite`)
//! and by the in-memory [`MemoryStore`](crate::memory::MemoryStore). The
//! lineage engine depends on this abstraction, not on any concrete backend.

use std::future::Future;

use uuid::Uuid;

use crate::{
  analysis::AnalysisRecord,
  document::{DocumentVersion, LineageUpdate},
};

/// Abstraction over the shared document store.
///
/// The only atomicity a backend guarantees is per record: one
/// [`update_document`](DocumentStore::update_document) call reads, modifies
/// and returns one row as a unit. Chain walks are sequences of such calls and
/// are not transactional as a whole.
///
/// All methods return `Send` futures so the trait can be used in multi-threaded
/// async runtimes (e.g. tokio with `axum`).
pub trait DocumentStore: Send + Sync {
  type Error: std::error::Error + Send + Sync + 'static;

  // ── Documents ─────────────────────────────────────────────────────────

  /// Persist a new version. Returns an error if the id is already taken.
  fn insert_document(
    &self,
    doc: DocumentVersion,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + '_;

  /// Retrieve a version by id. Returns `None` if not found.
  fn get_document(
    &self,
    id: Uuid,
  ) -> impl Future<Output = Result<Option<DocumentVersion>, Self::Error>> + Send + '_;

  /// Atomically apply `update` to one version and return it as written.
  /// Returns `None` if no version has this id.
  fn update_document(
    &self,
    id: Uuid,
    update: LineageUpdate,
  ) -> impl Future<Output = Result<Option<DocumentVersion>, Self::Error>> + Send + '_;

  /// Every version whose `previous_version_id` is `id`. A healthy chain
  /// yields at most one.
  fn find_successors(
    &self,
    id: Uuid,
  ) -> impl Future<Output = Result<Vec<DocumentVersion>, Self::Error>> + Send + '_;

  /// All versions collected from a site, in no particular order.
  fn list_site_documents(
    &self,
    site_id: Uuid,
  ) -> impl Future<Output = Result<Vec<DocumentVersion>, Self::Error>> + Send + '_;

  /// All versions carrying `lineage_id`, in no particular order.
  fn list_lineage(
    &self,
    lineage_id: Uuid,
  ) -> impl Future<Output = Result<Vec<DocumentVersion>, Self::Error>> + Send + '_;

  /// Every site holding a version whose lineage also has a member on
  /// `site_id`. Includes `site_id` itself when it has any lineaged version.
  fn sites_sharing_lineages(
    &self,
    site_id: Uuid,
  ) -> impl Future<Output = Result<Vec<Uuid>, Self::Error>> + Send + '_;

  // ── Analysis records ──────────────────────────────────────────────────

  /// Insert or wholesale replace the record for `(document_id, site_id)`.
  fn upsert_analysis_record(
    &self,
    record: AnalysisRecord,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + '_;

  fn list_analysis_records(
    &self,
    site_id: Uuid,
  ) -> impl Future<Output = Result<Vec<AnalysisRecord>, Self::Error>> + Send + '_;

  /// Delete every record for a site; returns how many were removed.
  fn delete_analysis_records(
    &self,
    site_id: Uuid,
  ) -> impl Future<Output = Result<usize, Self::Error>> + Send + '_;
}
