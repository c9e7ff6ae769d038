//! Analysis records: the derived feature bundle used only for matching.
//!
//! One record exists per (document, site). Records are built by upstream
//! crawl, classification and tagging collaborators and are rebuilt wholesale
//! whenever the extracted content changes; they are never authoritative
//! document state.

use std::collections::BTreeSet;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::document::{ChainKey, DocumentVersion};

/// Everything the feature extractor needs to compare two documents.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AnalysisRecord {
  pub document_id:    Uuid,
  pub site_id:        Uuid,
  pub document_type:  String,
  pub effective_date: Option<NaiveDate>,
  pub collected_at:   DateTime<Utc>,

  // ── Text ────────────────────────────────────────────────────────────────
  /// Document title as extracted from the file.
  pub name:           Option<String>,
  /// Anchor text of the link the document was found through.
  pub link_text:      Option<String>,
  pub element_text:   Option<String>,
  pub parent_text:    Option<String>,
  pub sibling_text:   Option<String>,
  pub filename:       Option<String>,
  /// URL path the document was downloaded from.
  pub pathname:       Option<String>,

  // ── Tags ────────────────────────────────────────────────────────────────
  #[serde(default)]
  pub focus_tags:     BTreeSet<String>,
  #[serde(default)]
  pub reference_tags: BTreeSet<String>,

  // ── Content ─────────────────────────────────────────────────────────────
  pub embedding:      Option<Vec<f32>>,
  pub file_size:      Option<u64>,
  pub token_count:    Option<u64>,
}

impl AnalysisRecord {
  /// An empty record keyed to `doc`; text, tags and content left blank.
  pub fn for_document(doc: &DocumentVersion) -> Self {
    Self {
      document_id: doc.id,
      site_id: doc.site_id,
      document_type: doc.document_type.clone(),
      effective_date: doc.effective_date,
      collected_at: doc.collected_at,
      ..Self::default()
    }
  }

  pub fn chain_key(&self) -> ChainKey {
    ChainKey::new(self.effective_date, self.collected_at, self.document_id)
  }
}
