//! [`SqliteStore`]: the SQLite implementation of [`DocumentStore`].

use std::path::Path;

use rusqlite::OptionalExtension as _;
use uuid::Uuid;

use lineage_core::{
  analysis::AnalysisRecord,
  document::{DocumentVersion, LineageUpdate},
  store::DocumentStore,
};

use crate::{
  encode::{
    DOCUMENT_COLUMNS, RECORD_COLUMNS, RawAnalysisRecord, RawDocument, decode_uuid,
    encode_count, encode_date, encode_dt, encode_embedding, encode_tags, encode_uuid,
  },
  schema::SCHEMA,
  Error, Result,
};

// ─── Store ───────────────────────────────────────────────────────────────────

/// A document store backed by a single SQLite file.
///
/// Cloning is cheap: the inner connection is reference-counted.
#[derive(Clone)]
pub struct SqliteStore {
  conn: tokio_rusqlite::Connection,
}

impl SqliteStore {
  /// Open (or create) a store at `path` and run schema initialisation.
  pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
    let conn = tokio_rusqlite::Connection::open(path).await?;
    let store = Self { conn };
    store.init_schema().await?;
    Ok(store)
  }

  /// Open an in-memory store for tests.
  pub async fn open_in_memory() -> Result<Self> {
    let conn = tokio_rusqlite::Connection::open_in_memory().await?;
    let store = Self { conn };
    store.init_schema().await?;
    Ok(store)
  }

  async fn init_schema(&self) -> Result<()> {
    self
      .conn
      .call(|conn| {
        conn.execute_batch(SCHEMA)?;
        Ok(())
      })
      .await?;
    Ok(())
  }

  /// Run `SELECT <columns> FROM documents WHERE <column> = ?1`.
  async fn select_documents(
    &self,
    column: &'static str,
    value:  String,
  ) -> Result<Vec<DocumentVersion>> {
    let raws: Vec<RawDocument> = self
      .conn
      .call(move |conn| {
        let sql = format!(
          "SELECT {DOCUMENT_COLUMNS} FROM documents WHERE {column} = ?1
           ORDER BY collected_at, id"
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
          .query_map(rusqlite::params![value], RawDocument::from_row)?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    raws.into_iter().map(RawDocument::into_document).collect()
  }
}

// ─── DocumentStore impl ──────────────────────────────────────────────────────

impl DocumentStore for SqliteStore {
  type Error = Error;

  // ── Documents ─────────────────────────────────────────────────────────────

  async fn insert_document(&self, doc: DocumentVersion) -> Result<()> {
    let id              = doc.id;
    let id_str          = encode_uuid(doc.id);
    let site_str        = encode_uuid(doc.site_id);
    let effective_str   = doc.effective_date.map(encode_date);
    let collected_str   = encode_dt(doc.collected_at);
    let status_str      = doc.classification_status.as_ref().to_owned();
    let lineage_str     = doc.lineage_id.map(encode_uuid);
    let previous_str    = doc.previous_version_id.map(encode_uuid);
    let document_type   = doc.document_type;
    let is_current      = doc.is_current_version;
    let confidence      = doc.confidence;

    let inserted = self
      .conn
      .call(move |conn| {
        let n = conn.execute(
          "INSERT INTO documents (
             id, site_id, document_type, effective_date, collected_at,
             classification_status, lineage_id, previous_version_id,
             is_current_version, confidence
           ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
           ON CONFLICT(id) DO NOTHING",
          rusqlite::params![
            id_str,
            site_str,
            document_type,
            effective_str,
            collected_str,
            status_str,
            lineage_str,
            previous_str,
            is_current,
            confidence,
          ],
        )?;
        Ok(n)
      })
      .await?;

    if inserted == 0 {
      return Err(Error::Duplicate(id));
    }
    Ok(())
  }

  async fn get_document(&self, id: Uuid) -> Result<Option<DocumentVersion>> {
    let id_str = encode_uuid(id);

    let raw: Option<RawDocument> = self
      .conn
      .call(move |conn| {
        Ok(conn
          .query_row(
            &format!("SELECT {DOCUMENT_COLUMNS} FROM documents WHERE id = ?1"),
            rusqlite::params![id_str],
            RawDocument::from_row,
          )
          .optional()?)
      })
      .await?;

    raw.map(RawDocument::into_document).transpose()
  }

  async fn update_document(
    &self,
    id:     Uuid,
    update: LineageUpdate,
  ) -> Result<Option<DocumentVersion>> {
    let id_str = encode_uuid(id);

    // Each column is written only when its "set" flag is true, so one
    // statement covers every shape of partial update.
    let set_lineage    = update.lineage_id.is_some();
    let lineage_str    = update.lineage_id.flatten().map(encode_uuid);
    let set_previous   = update.previous_version_id.is_some();
    let previous_str   = update.previous_version_id.flatten().map(encode_uuid);
    let set_current    = update.is_current_version.is_some();
    let is_current     = update.is_current_version.unwrap_or(false);
    let set_confidence = update.confidence.is_some();
    let confidence     = update.confidence.flatten();

    let raw: Option<RawDocument> = self
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;
        let changed = tx.execute(
          "UPDATE documents SET
             lineage_id          = CASE WHEN ?2 THEN ?3 ELSE lineage_id END,
             previous_version_id = CASE WHEN ?4 THEN ?5 ELSE previous_version_id END,
             is_current_version  = CASE WHEN ?6 THEN ?7 ELSE is_current_version END,
             confidence          = CASE WHEN ?8 THEN ?9 ELSE confidence END
           WHERE id = ?1",
          rusqlite::params![
            id_str,
            set_lineage,
            lineage_str,
            set_previous,
            previous_str,
            set_current,
            is_current,
            set_confidence,
            confidence,
          ],
        )?;
        let row = if changed == 0 {
          None
        } else {
          tx.query_row(
            &format!("SELECT {DOCUMENT_COLUMNS} FROM documents WHERE id = ?1"),
            rusqlite::params![id_str],
            RawDocument::from_row,
          )
          .optional()?
        };
        tx.commit()?;
        Ok(row)
      })
      .await?;

    raw.map(RawDocument::into_document).transpose()
  }

  async fn find_successors(&self, id: Uuid) -> Result<Vec<DocumentVersion>> {
    self.select_documents("previous_version_id", encode_uuid(id)).await
  }

  async fn list_site_documents(&self, site_id: Uuid) -> Result<Vec<DocumentVersion>> {
    self.select_documents("site_id", encode_uuid(site_id)).await
  }

  async fn list_lineage(&self, lineage_id: Uuid) -> Result<Vec<DocumentVersion>> {
    self.select_documents("lineage_id", encode_uuid(lineage_id)).await
  }

  async fn sites_sharing_lineages(&self, site_id: Uuid) -> Result<Vec<Uuid>> {
    let site_str = encode_uuid(site_id);

    let raws: Vec<String> = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare(
          "SELECT DISTINCT site_id FROM documents
           WHERE lineage_id IN (
             SELECT lineage_id FROM documents
             WHERE site_id = ?1 AND lineage_id IS NOT NULL
           )
           ORDER BY site_id",
        )?;
        let rows = stmt
          .query_map(rusqlite::params![site_str], |row| row.get(0))?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    raws.iter().map(|s| decode_uuid(s)).collect()
  }

  // ── Analysis records ──────────────────────────────────────────────────────

  async fn upsert_analysis_record(&self, record: AnalysisRecord) -> Result<()> {
    let document_str   = encode_uuid(record.document_id);
    let site_str       = encode_uuid(record.site_id);
    let effective_str  = record.effective_date.map(encode_date);
    let collected_str  = encode_dt(record.collected_at);
    let focus_str      = encode_tags(&record.focus_tags)?;
    let reference_str  = encode_tags(&record.reference_tags)?;
    let embedding_str  = encode_embedding(record.embedding.as_deref())?;
    let file_size      = encode_count(record.file_size, "file_size")?;
    let token_count    = encode_count(record.token_count, "token_count")?;
    let AnalysisRecord {
      document_type,
      name,
      link_text,
      element_text,
      parent_text,
      sibling_text,
      filename,
      pathname,
      ..
    } = record;

    self
      .conn
      .call(move |conn| {
        conn.execute(
          "INSERT OR REPLACE INTO analysis_records (
             document_id, site_id, document_type, effective_date, collected_at,
             name, link_text, element_text, parent_text, sibling_text,
             filename, pathname, focus_tags, reference_tags, embedding,
             file_size, token_count
           ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17)",
          rusqlite::params![
            document_str,
            site_str,
            document_type,
            effective_str,
            collected_str,
            name,
            link_text,
            element_text,
            parent_text,
            sibling_text,
            filename,
            pathname,
            focus_str,
            reference_str,
            embedding_str,
            file_size,
            token_count,
          ],
        )?;
        Ok(())
      })
      .await?;
    Ok(())
  }

  async fn list_analysis_records(&self, site_id: Uuid) -> Result<Vec<AnalysisRecord>> {
    let site_str = encode_uuid(site_id);

    let raws: Vec<RawAnalysisRecord> = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare(&format!(
          "SELECT {RECORD_COLUMNS} FROM analysis_records WHERE site_id = ?1
           ORDER BY collected_at, document_id"
        ))?;
        let rows = stmt
          .query_map(rusqlite::params![site_str], RawAnalysisRecord::from_row)?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    raws.into_iter().map(RawAnalysisRecord::into_record).collect()
  }

  async fn delete_analysis_records(&self, site_id: Uuid) -> Result<usize> {
    let site_str = encode_uuid(site_id);

    let removed = self
      .conn
      .call(move |conn| {
        let n = conn.execute(
          "DELETE FROM analysis_records WHERE site_id = ?1",
          rusqlite::params![site_str],
        )?;
        Ok(n)
      })
      .await?;

    tracing::debug!(%site_id, removed, "deleted analysis records");
    Ok(removed)
  }
}
