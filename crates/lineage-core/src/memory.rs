//! [`MemoryStore`]: an in-process [`DocumentStore`] used as a test fake.
//!
//! Behaves like a backend with per-record atomicity: each call takes the lock
//! once and releases it before returning. It also counts document writes and
//! can be told to start failing after a number of writes, which lets tests
//! observe the state a crash mid-walk leaves behind.

use std::{
  collections::{BTreeMap, BTreeSet},
  sync::{
    Mutex, MutexGuard,
    atomic::{AtomicUsize, Ordering},
  },
};

use thiserror::Error;
use uuid::Uuid;

use crate::{
  analysis::AnalysisRecord,
  document::{DocumentVersion, LineageUpdate},
  store::DocumentStore,
};

#[derive(Debug, Error)]
pub enum MemoryError {
  #[error("document {0} already exists")]
  Duplicate(Uuid),

  #[error("memory store lock poisoned")]
  Poisoned,

  #[error("injected write failure")]
  Injected,
}

#[derive(Default)]
struct State {
  documents: BTreeMap<Uuid, DocumentVersion>,
  records:   BTreeMap<(Uuid, Uuid), AnalysisRecord>,
}

/// A [`DocumentStore`] held entirely in memory.
#[derive(Default)]
pub struct MemoryStore {
  state:      Mutex<State>,
  writes:     AtomicUsize,
  fail_after: Mutex<Option<usize>>,
}

impl MemoryStore {
  pub fn new() -> Self { Self::default() }

  /// Number of successful `update_document` calls so far.
  pub fn writes(&self) -> usize { self.writes.load(Ordering::SeqCst) }

  /// Make every `update_document` call after the next `n` fail.
  pub fn fail_writes_after(&self, n: usize) {
    if let Ok(mut slot) = self.fail_after.lock() {
      *slot = Some(self.writes() + n);
    }
  }

  /// Snapshot of every stored version, ordered by id.
  pub fn documents(&self) -> Vec<DocumentVersion> {
    self
      .lock()
      .map(|s| s.documents.values().cloned().collect())
      .unwrap_or_default()
  }

  fn lock(&self) -> Result<MutexGuard<'_, State>, MemoryError> {
    self.state.lock().map_err(|_| MemoryError::Poisoned)
  }

  fn write_allowed(&self) -> Result<(), MemoryError> {
    let limit = *self.fail_after.lock().map_err(|_| MemoryError::Poisoned)?;
    match limit {
      Some(limit) if self.writes() >= limit => Err(MemoryError::Injected),
      _ => Ok(()),
    }
  }
}

impl DocumentStore for MemoryStore {
  type Error = MemoryError;

  async fn insert_document(&self, doc: DocumentVersion) -> Result<(), MemoryError> {
    let mut state = self.lock()?;
    if state.documents.contains_key(&doc.id) {
      return Err(MemoryError::Duplicate(doc.id));
    }
    state.documents.insert(doc.id, doc);
    Ok(())
  }

  async fn get_document(&self, id: Uuid) -> Result<Option<DocumentVersion>, MemoryError> {
    Ok(self.lock()?.documents.get(&id).cloned())
  }

  async fn update_document(
    &self,
    id: Uuid,
    update: LineageUpdate,
  ) -> Result<Option<DocumentVersion>, MemoryError> {
    self.write_allowed()?;
    let mut state = self.lock()?;
    let Some(doc) = state.documents.get_mut(&id) else {
      return Ok(None);
    };
    update.apply(doc);
    let written = doc.clone();
    self.writes.fetch_add(1, Ordering::SeqCst);
    Ok(Some(written))
  }

  async fn find_successors(&self, id: Uuid) -> Result<Vec<DocumentVersion>, MemoryError> {
    Ok(
      self
        .lock()?
        .documents
        .values()
        .filter(|d| d.previous_version_id == Some(id))
        .cloned()
        .collect(),
    )
  }

  async fn list_site_documents(
    &self,
    site_id: Uuid,
  ) -> Result<Vec<DocumentVersion>, MemoryError> {
    Ok(
      self
        .lock()?
        .documents
        .values()
        .filter(|d| d.site_id == site_id)
        .cloned()
        .collect(),
    )
  }

  async fn list_lineage(&self, lineage_id: Uuid) -> Result<Vec<DocumentVersion>, MemoryError> {
    Ok(
      self
        .lock()?
        .documents
        .values()
        .filter(|d| d.lineage_id == Some(lineage_id))
        .cloned()
        .collect(),
    )
  }

  async fn sites_sharing_lineages(&self, site_id: Uuid) -> Result<Vec<Uuid>, MemoryError> {
    let state = self.lock()?;
    let lineages: BTreeSet<Uuid> = state
      .documents
      .values()
      .filter(|d| d.site_id == site_id)
      .filter_map(|d| d.lineage_id)
      .collect();
    let sites: BTreeSet<Uuid> = state
      .documents
      .values()
      .filter(|d| d.lineage_id.is_some_and(|l| lineages.contains(&l)))
      .map(|d| d.site_id)
      .collect();
    Ok(sites.into_iter().collect())
  }

  async fn upsert_analysis_record(&self, record: AnalysisRecord) -> Result<(), MemoryError> {
    self
      .lock()?
      .records
      .insert((record.document_id, record.site_id), record);
    Ok(())
  }

  async fn list_analysis_records(
    &self,
    site_id: Uuid,
  ) -> Result<Vec<AnalysisRecord>, MemoryError> {
    Ok(
      self
        .lock()?
        .records
        .values()
        .filter(|r| r.site_id == site_id)
        .cloned()
        .collect(),
    )
  }

  async fn delete_analysis_records(&self, site_id: Uuid) -> Result<usize, MemoryError> {
    let mut state = self.lock()?;
    let before = state.records.len();
    state.records.retain(|(_, site), _| *site != site_id);
    Ok(before - state.records.len())
  }
}
