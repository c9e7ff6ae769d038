//! Encoding and decoding helpers between Rust domain types and the plain-text
//! representations stored in SQLite columns.
//!
//! Timestamps are stored as RFC 3339 strings and dates as ISO 8601. Tag sets
//! and embeddings are stored as compact JSON. UUIDs are stored as hyphenated
//! lowercase strings.

use std::collections::BTreeSet;

use chrono::{DateTime, NaiveDate, Utc};
use lineage_core::{
  analysis::AnalysisRecord,
  document::{ClassificationStatus, DocumentVersion},
};
use uuid::Uuid;

use crate::{Error, Result};

// ─── Uuid ─────────────────────────────────────────────────────────────────────

pub fn encode_uuid(id: Uuid) -> String { id.hyphenated().to_string() }

pub fn decode_uuid(s: &str) -> Result<Uuid> { Ok(Uuid::parse_str(s)?) }

fn decode_opt_uuid(s: Option<String>) -> Result<Option<Uuid>> {
  s.as_deref().map(decode_uuid).transpose()
}

// ─── DateTime<Utc> / NaiveDate ───────────────────────────────────────────────

pub fn encode_dt(dt: DateTime<Utc>) -> String { dt.to_rfc3339() }

pub fn decode_dt(s: &str) -> Result<DateTime<Utc>> {
  DateTime::parse_from_rfc3339(s)
    .map(|dt| dt.with_timezone(&Utc))
    .map_err(|e| Error::DateParse(e.to_string()))
}

pub fn encode_date(d: NaiveDate) -> String { d.format("%Y-%m-%d").to_string() }

pub fn decode_date(s: &str) -> Result<NaiveDate> {
  NaiveDate::parse_from_str(s, "%Y-%m-%d").map_err(|e| Error::DateParse(e.to_string()))
}

// ─── Integers ────────────────────────────────────────────────────────────────

pub fn encode_count(n: Option<u64>, column: &'static str) -> Result<Option<i64>> {
  n.map(|v| i64::try_from(v).map_err(|_| Error::OutOfRange(column)))
    .transpose()
}

fn decode_count(n: Option<i64>, column: &'static str) -> Result<Option<u64>> {
  n.map(|v| u64::try_from(v).map_err(|_| Error::OutOfRange(column)))
    .transpose()
}

// ─── JSON columns ────────────────────────────────────────────────────────────

pub fn encode_tags(tags: &BTreeSet<String>) -> Result<String> {
  Ok(serde_json::to_string(tags)?)
}

fn decode_tags(s: &str) -> Result<BTreeSet<String>> { Ok(serde_json::from_str(s)?) }

pub fn encode_embedding(e: Option<&[f32]>) -> Result<Option<String>> {
  Ok(e.map(|v| serde_json::to_string(v)).transpose()?)
}

fn decode_embedding(s: Option<String>) -> Result<Option<Vec<f32>>> {
  Ok(s.as_deref().map(serde_json::from_str::<Vec<f32>>).transpose()?)
}

// ─── Row types ───────────────────────────────────────────────────────────────

/// Column list shared by every `documents` SELECT, in [`RawDocument`] order.
pub const DOCUMENT_COLUMNS: &str = "id, site_id, document_type, effective_date, \
  collected_at, classification_status, lineage_id, previous_version_id, \
  is_current_version, confidence";

/// Raw values read directly from a `documents` row.
pub struct RawDocument {
  pub id:                    String,
  pub site_id:               String,
  pub document_type:         String,
  pub effective_date:        Option<String>,
  pub collected_at:          String,
  pub classification_status: String,
  pub lineage_id:            Option<String>,
  pub previous_version_id:   Option<String>,
  pub is_current_version:    bool,
  pub confidence:            Option<f64>,
}

impl RawDocument {
  pub fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      id:                    row.get(0)?,
      site_id:               row.get(1)?,
      document_type:         row.get(2)?,
      effective_date:        row.get(3)?,
      collected_at:          row.get(4)?,
      classification_status: row.get(5)?,
      lineage_id:            row.get(6)?,
      previous_version_id:   row.get(7)?,
      is_current_version:    row.get(8)?,
      confidence:            row.get(9)?,
    })
  }

  pub fn into_document(self) -> Result<DocumentVersion> {
    Ok(DocumentVersion {
      id:                    decode_uuid(&self.id)?,
      site_id:               decode_uuid(&self.site_id)?,
      document_type:         self.document_type,
      effective_date:        self.effective_date.as_deref().map(decode_date).transpose()?,
      collected_at:          decode_dt(&self.collected_at)?,
      classification_status: ClassificationStatus::parse(&self.classification_status)?,
      lineage_id:            decode_opt_uuid(self.lineage_id)?,
      previous_version_id:   decode_opt_uuid(self.previous_version_id)?,
      is_current_version:    self.is_current_version,
      confidence:            self.confidence,
    })
  }
}

/// Column list shared by every `analysis_records` SELECT.
pub const RECORD_COLUMNS: &str = "document_id, site_id, document_type, \
  effective_date, collected_at, name, link_text, element_text, parent_text, \
  sibling_text, filename, pathname, focus_tags, reference_tags, embedding, \
  file_size, token_count";

/// Raw values read directly from an `analysis_records` row.
pub struct RawAnalysisRecord {
  pub document_id:    String,
  pub site_id:        String,
  pub document_type:  String,
  pub effective_date: Option<String>,
  pub collected_at:   String,
  pub name:           Option<String>,
  pub link_text:      Option<String>,
  pub element_text:   Option<String>,
  pub parent_text:    Option<String>,
  pub sibling_text:   Option<String>,
  pub filename:       Option<String>,
  pub pathname:       Option<String>,
  pub focus_tags:     String,
  pub reference_tags: String,
  pub embedding:      Option<String>,
  pub file_size:      Option<i64>,
  pub token_count:    Option<i64>,
}

impl RawAnalysisRecord {
  pub fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      document_id:    row.get(0)?,
      site_id:        row.get(1)?,
      document_type:  row.get(2)?,
      effective_date: row.get(3)?,
      collected_at:   row.get(4)?,
      name:           row.get(5)?,
      link_text:      row.get(6)?,
      element_text:   row.get(7)?,
      parent_text:    row.get(8)?,
      sibling_text:   row.get(9)?,
      filename:       row.get(10)?,
      pathname:       row.get(11)?,
      focus_tags:     row.get(12)?,
      reference_tags: row.get(13)?,
      embedding:      row.get(14)?,
      file_size:      row.get(15)?,
      token_count:    row.get(16)?,
    })
  }

  pub fn into_record(self) -> Result<AnalysisRecord> {
    Ok(AnalysisRecord {
      document_id:    decode_uuid(&self.document_id)?,
      site_id:        decode_uuid(&self.site_id)?,
      document_type:  self.document_type,
      effective_date: self.effective_date.as_deref().map(decode_date).transpose()?,
      collected_at:   decode_dt(&self.collected_at)?,
      name:           self.name,
      link_text:      self.link_text,
      element_text:   self.element_text,
      parent_text:    self.parent_text,
      sibling_text:   self.sibling_text,
      filename:       self.filename,
      pathname:       self.pathname,
      focus_tags:     decode_tags(&self.focus_tags)?,
      reference_tags: decode_tags(&self.reference_tags)?,
      embedding:      decode_embedding(self.embedding)?,
      file_size:      decode_count(self.file_size, "file_size")?,
      token_count:    decode_count(self.token_count, "token_count")?,
    })
  }
}
