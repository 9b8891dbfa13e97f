use rusqlite::Connection;

use crate::error::StorageError;

pub const SCHEMA_VERSION: i32 = 1;

pub fn init_schema(conn: &Connection) -> Result<(), StorageError> {
    conn.execute_batch(
        "
        PRAGMA journal_mode = WAL;
        PRAGMA synchronous = NORMAL;
        PRAGMA foreign_keys = ON;
        PRAGMA cache_size = -32000;
        PRAGMA busy_timeout = 5000;
    ",
    )?;
    conn.execute_batch(SCHEMA_SQL)?;
    tracing::debug!(version = SCHEMA_VERSION, "directory schema ready");
    Ok(())
}

// pni and service_id hold the textual identifier form ("PNI:<uuid>" for PNIs,
// the bare uuid for ACIs), so `service_id = pni` holds exactly when the slot
// mirrors the record's PNI.
const SCHEMA_SQL: &str = "
CREATE TABLE IF NOT EXISTS schema_version (
    version INTEGER PRIMARY KEY,
    applied_at INTEGER NOT NULL
);
INSERT OR IGNORE INTO schema_version (version, applied_at) VALUES (1, unixepoch());

CREATE TABLE IF NOT EXISTS records (
    record_id BLOB PRIMARY KEY CHECK (length(record_id) = 16),
    e164 TEXT UNIQUE,
    pni TEXT UNIQUE CHECK (pni IS NULL OR substr(pni, 1, 4) = 'PNI:'),
    service_id TEXT UNIQUE,
    created_at INTEGER NOT NULL DEFAULT (CAST(unixepoch('now','subsec') * 1000 AS INTEGER))
);

CREATE TABLE IF NOT EXISTS record_fields (
    record_id BLOB NOT NULL CHECK (length(record_id) = 16),
    field_key TEXT NOT NULL,
    value BLOB NOT NULL,
    PRIMARY KEY (record_id, field_key)
);

CREATE TABLE IF NOT EXISTS remapped_records (
    old_id BLOB PRIMARY KEY CHECK (length(old_id) = 16),
    new_id BLOB NOT NULL CHECK (length(new_id) = 16),
    remapped_at INTEGER NOT NULL DEFAULT (CAST(unixepoch('now','subsec') * 1000 AS INTEGER))
);
CREATE INDEX IF NOT EXISTS idx_remapped_new ON remapped_records (new_id);

CREATE TABLE IF NOT EXISTS reconcile_journal (
    seq INTEGER PRIMARY KEY,
    journal_id BLOB NOT NULL UNIQUE CHECK (length(journal_id) = 16),
    target_id BLOB NOT NULL CHECK (length(target_id) = 16),
    inserted INTEGER NOT NULL,
    op_count INTEGER NOT NULL,
    payload BLOB NOT NULL,
    breadcrumbs BLOB NOT NULL,
    checksum BLOB NOT NULL CHECK (length(checksum) = 32),
    committed_at INTEGER NOT NULL DEFAULT (CAST(unixepoch('now','subsec') * 1000 AS INTEGER))
);
CREATE INDEX IF NOT EXISTS idx_journal_target ON reconcile_journal (target_id);
";
