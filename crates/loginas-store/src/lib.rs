//! Durable `SQLite` implementation of the audit record store.
//!
//! # Schema
//!
//! One table, `login_audit`, with columns: `entity_id`, `admin_id`,
//! `admin_username`, `customer_id`, `customer_email`, `token_hash`,
//! `ip_address`, `status`, `store_id`, `created_at`, `expires_at`,
//! `used_at`. Timestamps are stored as UTC RFC 3339 text at second
//! granularity.
//!
//! Two properties the schema enforces rather than trusting callers:
//!
//! - A partial `UNIQUE` index over `token_hash` where `status = 'pending'`
//!   makes "two records never share a hash while both pending" a database
//!   invariant, not caller discipline.
//! - Every terminal status change runs as
//!   `UPDATE ... WHERE entity_id = ? AND status = 'pending'` and reports
//!   whether a row changed, so at most one caller ever wins a transition —
//!   the single-flight guarantee for concurrent redemption attempts.
//!
//! The database runs in WAL mode so redemption reads do not block issuance
//! writes.

use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};
use loginas_core::record::{AuditRecord, RecordId, TokenStatus};
use loginas_core::store::{AuditQuery, AuditStore, StoreError, DEFAULT_QUERY_LIMIT};
use loginas_core::token::TokenHash;
use rusqlite::{params, Connection, OptionalExtension};
use tracing::info;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS login_audit (
    entity_id      INTEGER PRIMARY KEY AUTOINCREMENT,
    admin_id       INTEGER NOT NULL,
    admin_username TEXT NOT NULL,
    customer_id    INTEGER NOT NULL,
    customer_email TEXT NOT NULL,
    token_hash     TEXT NOT NULL,
    ip_address     TEXT,
    status         TEXT NOT NULL
                   CHECK (status IN ('pending', 'success', 'expired', 'failed')),
    store_id       INTEGER NOT NULL,
    created_at     TEXT NOT NULL,
    expires_at     TEXT NOT NULL,
    used_at        TEXT
);

CREATE INDEX IF NOT EXISTS idx_login_audit_token_hash
    ON login_audit (token_hash);

CREATE UNIQUE INDEX IF NOT EXISTS idx_login_audit_pending_hash
    ON login_audit (token_hash)
    WHERE status = 'pending';

CREATE INDEX IF NOT EXISTS idx_login_audit_created_at
    ON login_audit (created_at);
";

const SELECT_COLUMNS: &str = "entity_id, admin_id, admin_username, customer_id, \
     customer_email, token_hash, ip_address, status, store_id, created_at, \
     expires_at, used_at";

/// `SQLite`-backed [`AuditStore`].
pub struct SqliteAuditStore {
    conn: Arc<Mutex<Connection>>,
}

impl std::fmt::Debug for SqliteAuditStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteAuditStore").finish_non_exhaustive()
    }
}

impl SqliteAuditStore {
    /// Opens (or creates) the store at `path` and initializes the schema.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Persistence`] if the database cannot be opened
    /// or the schema cannot be applied.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref();
        let conn = Connection::open(path).map_err(persistence)?;
        conn.pragma_update(None, "journal_mode", "wal")
            .map_err(persistence)?;
        conn.busy_timeout(Duration::from_secs(5)).map_err(persistence)?;
        let store = Self::from_connection(conn)?;
        info!(path = %path.display(), "opened audit store");
        Ok(store)
    }

    /// Opens an in-memory store, for tests and tooling.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Persistence`] if the schema cannot be applied.
    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory().map_err(persistence)?;
        Self::from_connection(conn)
    }

    fn from_connection(conn: Connection) -> Result<Self, StoreError> {
        conn.execute_batch(SCHEMA).map_err(persistence)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>, StoreError> {
        self.conn.lock().map_err(|_| StoreError::LockPoisoned)
    }
}

impl AuditStore for SqliteAuditStore {
    fn create(&self, mut record: AuditRecord) -> Result<AuditRecord, StoreError> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO login_audit (admin_id, admin_username, customer_id, \
             customer_email, token_hash, ip_address, status, store_id, \
             created_at, expires_at, used_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            params![
                record.admin_id,
                record.admin_username,
                record.customer_id,
                record.customer_email,
                record.token_hash.as_str(),
                record.ip_address,
                record.status.as_str(),
                record.store_id,
                encode_instant(record.created_at),
                encode_instant(record.expires_at),
                record.used_at.map(encode_instant),
            ],
        )
        .map_err(|err| match err {
            rusqlite::Error::SqliteFailure(code, _)
                if code.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                StoreError::DuplicatePendingHash
            },
            other => persistence(other),
        })?;
        record.id = conn.last_insert_rowid();
        Ok(record)
    }

    fn find_pending_by_hash(&self, hash: &TokenHash) -> Result<Option<AuditRecord>, StoreError> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {SELECT_COLUMNS} FROM login_audit \
                 WHERE token_hash = ?1 AND status = 'pending' \
                 ORDER BY entity_id DESC LIMIT 1"
            ))
            .map_err(persistence)?;
        stmt.query_row(params![hash.as_str()], row_to_record)
            .optional()
            .map_err(persistence)
    }

    fn transition(
        &self,
        id: RecordId,
        to: TokenStatus,
        used_at: Option<DateTime<Utc>>,
    ) -> Result<bool, StoreError> {
        if !TokenStatus::Pending.can_transition_to(to) {
            return Ok(false);
        }
        let conn = self.lock()?;
        let changed = conn
            .execute(
                "UPDATE login_audit SET status = ?2, used_at = ?3 \
                 WHERE entity_id = ?1 AND status = 'pending'",
                params![id, to.as_str(), used_at.map(encode_instant)],
            )
            .map_err(persistence)?;
        Ok(changed == 1)
    }

    fn query(&self, query: &AuditQuery) -> Result<Vec<AuditRecord>, StoreError> {
        let mut sql = format!("SELECT {SELECT_COLUMNS} FROM login_audit");
        let mut clauses: Vec<String> = Vec::new();
        let mut args: Vec<Box<dyn rusqlite::types::ToSql>> = Vec::new();

        if let Some(status) = query.status {
            args.push(Box::new(status.as_str().to_string()));
            clauses.push(format!("status = ?{}", args.len()));
        }
        if let Some(after) = query.created_after {
            args.push(Box::new(encode_instant(after)));
            clauses.push(format!("created_at >= ?{}", args.len()));
        }
        if let Some(before) = query.created_before {
            args.push(Box::new(encode_instant(before)));
            clauses.push(format!("created_at <= ?{}", args.len()));
        }
        if !clauses.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&clauses.join(" AND "));
        }
        let limit = query.limit.unwrap_or(DEFAULT_QUERY_LIMIT);
        sql.push_str(&format!(" ORDER BY entity_id DESC LIMIT {limit}"));

        let conn = self.lock()?;
        let mut stmt = conn.prepare(&sql).map_err(persistence)?;
        let rows = stmt
            .query_map(
                rusqlite::params_from_iter(args.iter().map(|arg| &**arg)),
                row_to_record,
            )
            .map_err(persistence)?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(persistence)
    }
}

fn persistence(err: impl std::fmt::Display) -> StoreError {
    StoreError::Persistence {
        message: err.to_string(),
    }
}

fn encode_instant(instant: DateTime<Utc>) -> String {
    instant.to_rfc3339_opts(SecondsFormat::Secs, true)
}

fn decode_instant(
    index: usize,
    value: &str,
) -> Result<DateTime<Utc>, rusqlite::Error> {
    DateTime::parse_from_rfc3339(value)
        .map(|instant| instant.with_timezone(&Utc))
        .map_err(|err| {
            rusqlite::Error::FromSqlConversionFailure(
                index,
                rusqlite::types::Type::Text,
                Box::new(err),
            )
        })
}

fn row_to_record(row: &rusqlite::Row<'_>) -> rusqlite::Result<AuditRecord> {
    let token_hash: String = row.get(5)?;
    let status: String = row.get(7)?;
    let status = TokenStatus::parse(&status).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            7,
            rusqlite::types::Type::Text,
            format!("unknown status: {status}").into(),
        )
    })?;
    let created_at: String = row.get(9)?;
    let expires_at: String = row.get(10)?;
    let used_at: Option<String> = row.get(11)?;

    Ok(AuditRecord {
        id: row.get(0)?,
        admin_id: row.get(1)?,
        admin_username: row.get(2)?,
        customer_id: row.get(3)?,
        customer_email: row.get(4)?,
        token_hash: TokenHash::from_hex(token_hash),
        ip_address: row.get(6)?,
        status,
        store_id: row.get(8)?,
        created_at: decode_instant(9, &created_at)?,
        expires_at: decode_instant(10, &expires_at)?,
        used_at: used_at
            .map(|value| decode_instant(11, &value))
            .transpose()?,
    })
}
