//! Document versions: the unit a lineage operates on.
//!
//! A version is created with no lineage assignment and acquires one through
//! grouping, merging or a manual edit. Versions are never deleted by the
//! lineage engine; only the four lineage fields ever change, and always
//! through a [`LineageUpdate`].

use std::cmp::Ordering;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumString};
use uuid::Uuid;

use crate::{Error, Result};

// ─── Classification ──────────────────────────────────────────────────────────

/// Where a version is in the human review workflow.
#[derive(
  Debug,
  Clone,
  Copy,
  PartialEq,
  Eq,
  Default,
  Serialize,
  Deserialize,
  Display,
  EnumString,
  AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ClassificationStatus {
  #[default]
  Pending,
  Queued,
  Classified,
  /// Reviewed by an operator. Approved versions that already carry a lineage
  /// are frozen against automatic re-lineage.
  Approved,
}

impl ClassificationStatus {
  /// Parse the stored snake_case form.
  pub fn parse(s: &str) -> Result<Self> {
    s.parse()
      .map_err(|_| Error::UnknownClassificationStatus(s.to_owned()))
  }
}

// ─── DocumentVersion ─────────────────────────────────────────────────────────

/// One collected edition of a policy document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentVersion {
  pub id:                    Uuid,
  pub site_id:               Uuid,
  pub document_type:         String,
  pub effective_date:        Option<NaiveDate>,
  /// When the crawler first ingested this version. Breaks effective-date ties.
  pub collected_at:          DateTime<Utc>,
  pub classification_status: ClassificationStatus,
  pub lineage_id:            Option<Uuid>,
  pub previous_version_id:   Option<Uuid>,
  pub is_current_version:    bool,
  /// Score of the edge to `previous_version_id`; `None` for a chain head.
  pub confidence:            Option<f64>,
}

impl DocumentVersion {
  /// A freshly ingested version with no lineage assignment.
  pub fn new(
    site_id: Uuid,
    document_type: impl Into<String>,
    effective_date: Option<NaiveDate>,
    collected_at: DateTime<Utc>,
  ) -> Self {
    Self {
      id: Uuid::new_v4(),
      site_id,
      document_type: document_type.into(),
      effective_date,
      collected_at,
      classification_status: ClassificationStatus::default(),
      lineage_id: None,
      previous_version_id: None,
      is_current_version: false,
      confidence: None,
    }
  }

  /// Approved and already lineaged: excluded from automatic re-matching.
  pub fn is_frozen(&self) -> bool {
    self.classification_status == ClassificationStatus::Approved
      && self.lineage_id.is_some()
  }

  pub fn chain_key(&self) -> ChainKey {
    ChainKey::new(self.effective_date, self.collected_at, self.id)
  }
}

// ─── Chain ordering ──────────────────────────────────────────────────────────

/// Total order used to lay members out along a chain.
///
/// Effective date ascending with undated versions after dated ones, then
/// ingestion time, then id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChainKey {
  effective_date: Option<NaiveDate>,
  collected_at:   DateTime<Utc>,
  id:             Uuid,
}

impl ChainKey {
  pub fn new(
    effective_date: Option<NaiveDate>,
    collected_at: DateTime<Utc>,
    id: Uuid,
  ) -> Self {
    Self { effective_date, collected_at, id }
  }
}

impl Ord for ChainKey {
  fn cmp(&self, other: &Self) -> Ordering {
    let by_date = match (self.effective_date, other.effective_date) {
      (Some(a), Some(b)) => a.cmp(&b),
      (Some(_), None) => Ordering::Less,
      (None, Some(_)) => Ordering::Greater,
      (None, None) => Ordering::Equal,
    };
    by_date
      .then_with(|| self.collected_at.cmp(&other.collected_at))
      .then_with(|| self.id.cmp(&other.id))
  }
}

impl PartialOrd for ChainKey {
  fn partial_cmp(&self, other: &Self) -> Option<Ordering> { Some(self.cmp(other)) }
}

// ─── LineageUpdate ───────────────────────────────────────────────────────────

/// A partial write of the lineage fields of one [`DocumentVersion`].
///
/// The outer `Option` of each field means "leave unchanged"; the inner value
/// is what gets written. A store applies one update to one record atomically.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LineageUpdate {
  pub lineage_id:          Option<Option<Uuid>>,
  pub previous_version_id: Option<Option<Uuid>>,
  pub is_current_version:  Option<bool>,
  pub confidence:          Option<Option<f64>>,
}

impl LineageUpdate {
  pub fn new() -> Self { Self::default() }

  /// Blank every lineage field.
  pub fn clear() -> Self {
    Self {
      lineage_id:          Some(None),
      previous_version_id: Some(None),
      is_current_version:  Some(false),
      confidence:          Some(None),
    }
  }

  pub fn lineage(mut self, lineage_id: Option<Uuid>) -> Self {
    self.lineage_id = Some(lineage_id);
    self
  }

  pub fn previous(mut self, previous_version_id: Option<Uuid>) -> Self {
    self.previous_version_id = Some(previous_version_id);
    self
  }

  pub fn current(mut self, is_current: bool) -> Self {
    self.is_current_version = Some(is_current);
    self
  }

  pub fn confidence(mut self, confidence: Option<f64>) -> Self {
    self.confidence = Some(confidence);
    self
  }

  pub fn is_empty(&self) -> bool {
    self.lineage_id.is_none()
      && self.previous_version_id.is_none()
      && self.is_current_version.is_none()
      && self.confidence.is_none()
  }

  /// Whether applying this update to `doc` would change anything.
  pub fn changes(&self, doc: &DocumentVersion) -> bool {
    let mut probe = doc.clone();
    self.apply(&mut probe);
    probe != *doc
  }

  pub fn apply(&self, doc: &mut DocumentVersion) {
    if let Some(lineage_id) = self.lineage_id {
      doc.lineage_id = lineage_id;
    }
    if let Some(previous) = self.previous_version_id {
      doc.previous_version_id = previous;
    }
    if let Some(current) = self.is_current_version {
      doc.is_current_version = current;
    }
    if let Some(confidence) = self.confidence {
      doc.confidence = confidence;
    }
  }
}

#[cfg(test)]
mod tests {
  use std::str::FromStr;

  use chrono::TimeZone;

  use super::*;

  fn at(secs: i64) -> DateTime<Utc> { Utc.timestamp_opt(secs, 0).unwrap() }

  fn date(y: i32, m: u32, d: u32) -> Option<NaiveDate> {
    NaiveDate::from_ymd_opt(y, m, d)
  }

  #[test]
  fn classification_status_string_forms() {
    assert_eq!(ClassificationStatus::Approved.as_ref(), "approved");
    assert_eq!(
      ClassificationStatus::from_str("classified").unwrap(),
      ClassificationStatus::Classified
    );
    assert!(matches!(
      ClassificationStatus::parse("bogus"),
      Err(Error::UnknownClassificationStatus(s)) if s == "bogus"
    ));
  }

  #[test]
  fn chain_key_orders_dated_before_undated() {
    let a = ChainKey::new(date(2024, 1, 1), at(50), Uuid::new_v4());
    let b = ChainKey::new(None, at(10), Uuid::new_v4());
    assert!(a < b);
  }

  #[test]
  fn chain_key_breaks_date_ties_by_collection_time() {
    let early = ChainKey::new(date(2024, 1, 1), at(10), Uuid::from_u128(9));
    let late  = ChainKey::new(date(2024, 1, 1), at(20), Uuid::from_u128(1));
    assert!(early < late);

    let same_a = ChainKey::new(date(2024, 1, 1), at(10), Uuid::from_u128(1));
    let same_b = ChainKey::new(date(2024, 1, 1), at(10), Uuid::from_u128(2));
    assert!(same_a < same_b);
  }

  #[test]
  fn update_applies_only_set_fields() {
    let mut doc = DocumentVersion::new(Uuid::new_v4(), "formulary", None, at(0));
    let lineage = Uuid::new_v4();
    doc.confidence = Some(0.7);

    let update = LineageUpdate::new().lineage(Some(lineage)).current(true);
    assert!(update.changes(&doc));
    update.apply(&mut doc);

    assert_eq!(doc.lineage_id, Some(lineage));
    assert!(doc.is_current_version);
    assert_eq!(doc.confidence, Some(0.7));
    assert!(!update.changes(&doc));
  }

  #[test]
  fn clear_blanks_everything() {
    let mut doc = DocumentVersion::new(Uuid::new_v4(), "formulary", None, at(0));
    doc.lineage_id = Some(Uuid::new_v4());
    doc.previous_version_id = Some(Uuid::new_v4());
    doc.is_current_version = true;
    doc.confidence = Some(0.9);

    LineageUpdate::clear().apply(&mut doc);
    assert_eq!(doc.lineage_id, None);
    assert_eq!(doc.previous_version_id, None);
    assert!(!doc.is_current_version);
    assert_eq!(doc.confidence, None);
  }
}
