//! SQL schema for the lineage SQLite store.
//!
//! Executed once at connection startup via `PRAGMA user_version`. Future
//! migrations will be gated on that version number.

/// Full schema DDL; idempotent thanks to `CREATE TABLE IF NOT EXISTS`.
pub const SCHEMA: &str = "
PRAGMA journal_mode = WAL;

-- One row per collected document version. Rows are never deleted by the
-- lineage engine; only the four lineage columns are ever updated.
-- previous_version_id is not a foreign key: chain surgery
-- rewrites it hop by hop and a row may briefly point at a moved version.
CREATE TABLE IF NOT EXISTS documents (
    id                    TEXT PRIMARY KEY,
    site_id               TEXT NOT NULL,
    document_type         TEXT NOT NULL,
    effective_date        TEXT,            -- ISO 8601 date or NULL
    collected_at          TEXT NOT NULL,   -- RFC 3339 UTC
    classification_status TEXT NOT NULL DEFAULT 'pending',
    lineage_id            TEXT,
    previous_version_id   TEXT,
    is_current_version    INTEGER NOT NULL DEFAULT 0,
    confidence            REAL
);

-- Derived, rebuildable matching features; one row per (document, site).
CREATE TABLE IF NOT EXISTS analysis_records (
    document_id     TEXT NOT NULL,
    site_id         TEXT NOT NULL,
    document_type   TEXT NOT NULL,
    effective_date  TEXT,
    collected_at    TEXT NOT NULL,
    name            TEXT,
    link_text       TEXT,
    element_text    TEXT,
    parent_text     TEXT,
    sibling_text    TEXT,
    filename        TEXT,
    pathname        TEXT,
    focus_tags      TEXT NOT NULL DEFAULT '[]',   -- JSON array
    reference_tags  TEXT NOT NULL DEFAULT '[]',   -- JSON array
    embedding       TEXT,                          -- JSON array of floats
    file_size       INTEGER,
    token_count     INTEGER,
    PRIMARY KEY (document_id, site_id)
);

CREATE INDEX IF NOT EXISTS documents_site_idx     ON documents(site_id);
CREATE INDEX IF NOT EXISTS documents_lineage_idx  ON documents(lineage_id);
CREATE INDEX IF NOT EXISTS documents_previous_idx ON documents(previous_version_id);
CREATE INDEX IF NOT EXISTS analysis_site_idx      ON analysis_records(site_id);

PRAGMA user_version = 1;
";
