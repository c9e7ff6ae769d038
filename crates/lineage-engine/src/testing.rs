//! Fixtures shared by the engine's unit tests.
//!
//! Scoring is made table-driven by giving every record a "slot": a record in
//! slot `n` carries `n` focus tags, and [`TableScorer`] reads the two tag-set
//! sizes back out of the feature vector to look the pair up.

use std::collections::{BTreeSet, HashMap};

use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use lineage_core::{
  analysis::AnalysisRecord,
  document::DocumentVersion,
  lineage::Lineage,
  memory::MemoryStore,
  store::DocumentStore,
};
use uuid::Uuid;

use crate::{
  config::MatchingConfig,
  features::{FeatureLayout, FeatureVector},
  scorer::{MatchScorer, PairScorer, ScorerError},
};

pub(crate) struct TableScorer {
  table: HashMap<(usize, usize), f64>,
  left:  usize,
  right: usize,
}

impl TableScorer {
  /// Unlisted slot pairs score 0.
  pub(crate) fn new(entries: impl IntoIterator<Item = ((usize, usize), f64)>) -> Self {
    let table = entries
      .into_iter()
      .map(|((a, b), p)| ((a.min(b), a.max(b)), p))
      .collect();
    let index = |name: &str| {
      FeatureLayout::index_of(name).unwrap_or_else(|| panic!("no feature {name}"))
    };
    Self {
      table,
      left: index("focus_tags.left_len"),
      right: index("focus_tags.right_len"),
    }
  }
}

impl MatchScorer for TableScorer {
  fn score(&self, features: &FeatureVector) -> Result<f64, ScorerError> {
    let slot = |i: usize| features.get(i).unwrap_or(0.0) as usize;
    let (a, b) = (slot(self.left), slot(self.right));
    Ok(self.table.get(&(a.min(b), a.max(b))).copied().unwrap_or(0.0))
  }
}

/// Fails every call.
pub(crate) struct OfflineScorer;

impl MatchScorer for OfflineScorer {
  fn score(&self, _: &FeatureVector) -> Result<f64, ScorerError> {
    Err(ScorerError::Unavailable("model offline".into()))
  }
}

pub(crate) fn table(
  entries: impl IntoIterator<Item = ((usize, usize), f64)>,
) -> PairScorer<TableScorer> {
  PairScorer::new(TableScorer::new(entries), MatchingConfig::default())
}

pub(crate) fn at(secs: i64) -> DateTime<Utc> {
  Utc.timestamp_opt(secs, 0).unwrap()
}

pub(crate) fn date(year: i32, month: u32, day: u32) -> Option<NaiveDate> {
  NaiveDate::from_ymd_opt(year, month, day)
}

pub(crate) fn version(
  site_id: Uuid,
  document_type: &str,
  effective_date: Option<NaiveDate>,
  secs: i64,
) -> DocumentVersion {
  DocumentVersion::new(site_id, document_type, effective_date, at(secs))
}

pub(crate) fn record(doc: &DocumentVersion, slot: usize) -> AnalysisRecord {
  AnalysisRecord {
    focus_tags: (1..=slot).map(|i| format!("slot-{i}")).collect::<BTreeSet<_>>(),
    ..AnalysisRecord::for_document(doc)
  }
}

/// Link `docs` into one lineage in the order given; the last is current.
pub(crate) fn linked(mut docs: Vec<DocumentVersion>) -> (Uuid, Vec<DocumentVersion>) {
  let lineage_id = Uuid::new_v4();
  let mut previous = None;
  let last = docs.len().saturating_sub(1);
  for (i, doc) in docs.iter_mut().enumerate() {
    doc.lineage_id = Some(lineage_id);
    doc.previous_version_id = previous;
    doc.confidence = previous.map(|_| 0.8);
    doc.is_current_version = i == last;
    previous = Some(doc.id);
  }
  (lineage_id, docs)
}

pub(crate) async fn seed(store: &MemoryStore, docs: &[DocumentVersion]) {
  for doc in docs {
    store.insert_document(doc.clone()).await.unwrap();
  }
}

/// Verified chain order of a lineage.
pub(crate) async fn chain(store: &MemoryStore, lineage_id: Uuid) -> Vec<Uuid> {
  let members = store.list_lineage(lineage_id).await.unwrap();
  Lineage::from_members(lineage_id, members).unwrap().ids()
}

pub(crate) async fn fetch(store: &MemoryStore, id: Uuid) -> DocumentVersion {
  store.get_document(id).await.unwrap().unwrap()
}
