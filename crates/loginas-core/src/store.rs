//! Audit record store contract and the in-memory reference implementation.
//!
//! The store is the only shared mutable resource in the system, so it is
//! also where the single-flight guarantee lives: every terminal status
//! change goes through [`AuditStore::transition`], a conditional
//! compare-and-swap that succeeds for at most one caller per record. A
//! read-then-write `save` would reopen the replay window and is deliberately
//! not part of the contract.

use std::sync::Mutex;

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::record::{AuditRecord, RecordId, TokenStatus};
use crate::token::TokenHash;

/// Errors from audit store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The backing store failed.
    #[error("audit store operation failed: {message}")]
    Persistence {
        /// Backend-specific description.
        message: String,
    },

    /// A pending record with the same token hash already exists. Two
    /// records must never be pending for one hash at the same time.
    #[error("a pending record already exists for this token hash")]
    DuplicatePendingHash,

    /// An internal lock was poisoned by a panicking thread.
    #[error("internal lock poisoned")]
    LockPoisoned,
}

/// Filter for audit log queries, newest records first.
#[derive(Debug, Clone, Default)]
pub struct AuditQuery {
    /// Restrict to a single status.
    pub status: Option<TokenStatus>,
    /// Restrict to records created at or after this instant.
    pub created_after: Option<DateTime<Utc>>,
    /// Restrict to records created at or before this instant.
    pub created_before: Option<DateTime<Utc>>,
    /// Maximum number of records to return; `None` means the store default.
    pub limit: Option<usize>,
}

impl AuditQuery {
    /// Restricts the query to one status.
    #[must_use]
    pub const fn with_status(mut self, status: TokenStatus) -> Self {
        self.status = Some(status);
        self
    }

    /// Restricts the query to records created at or after `instant`.
    #[must_use]
    pub const fn created_after(mut self, instant: DateTime<Utc>) -> Self {
        self.created_after = Some(instant);
        self
    }

    /// Restricts the query to records created at or before `instant`.
    #[must_use]
    pub const fn created_before(mut self, instant: DateTime<Utc>) -> Self {
        self.created_before = Some(instant);
        self
    }

    /// Caps the number of returned records.
    #[must_use]
    pub const fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    fn matches(&self, record: &AuditRecord) -> bool {
        if let Some(status) = self.status {
            if record.status != status {
                return false;
            }
        }
        if let Some(after) = self.created_after {
            if record.created_at < after {
                return false;
            }
        }
        if let Some(before) = self.created_before {
            if record.created_at > before {
                return false;
            }
        }
        true
    }
}

/// Durable CRUD over [`AuditRecord`] with the atomic conditional transition
/// required for single-use enforcement.
pub trait AuditStore: Send + Sync {
    /// Persists a new record and returns it with its assigned identity.
    /// The incoming `id` is ignored.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::DuplicatePendingHash`] if a pending record with
    /// the same hash exists, or [`StoreError::Persistence`] on backend
    /// failure.
    fn create(&self, record: AuditRecord) -> Result<AuditRecord, StoreError>;

    /// Point lookup of the most recent record with the given hash that is
    /// still pending.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Persistence`] on backend failure.
    fn find_pending_by_hash(&self, hash: &TokenHash) -> Result<Option<AuditRecord>, StoreError>;

    /// Conditionally transitions a record out of `Pending`.
    ///
    /// The update applies only where the record's current status is still
    /// `Pending`; returns `true` if this call performed the transition and
    /// `false` if the record was already resolved (or does not exist). At
    /// most one caller per record ever observes `true`.
    ///
    /// `used_at` is persisted with the transition and must be `Some` exactly
    /// when `to` is [`TokenStatus::Success`].
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Persistence`] on backend failure.
    fn transition(
        &self,
        id: RecordId,
        to: TokenStatus,
        used_at: Option<DateTime<Utc>>,
    ) -> Result<bool, StoreError>;

    /// Audit log view: records matching `query`, newest first.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Persistence`] on backend failure.
    fn query(&self, query: &AuditQuery) -> Result<Vec<AuditRecord>, StoreError>;
}

/// Default result cap applied when a query does not set its own limit.
pub const DEFAULT_QUERY_LIMIT: usize = 100;

/// In-memory audit store for tests and embedding.
///
/// Mirrors the durable store's semantics exactly — assigned ids, pending
/// hash uniqueness, conditional transitions — behind one mutex, so engine
/// behavior observed against it carries over to the SQLite implementation.
#[derive(Debug, Default)]
pub struct MemoryAuditStore {
    inner: Mutex<MemoryInner>,
}

#[derive(Debug, Default)]
struct MemoryInner {
    rows: Vec<AuditRecord>,
    next_id: RecordId,
}

impl MemoryAuditStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl AuditStore for MemoryAuditStore {
    fn create(&self, mut record: AuditRecord) -> Result<AuditRecord, StoreError> {
        let mut inner = self.inner.lock().map_err(|_| StoreError::LockPoisoned)?;

        let duplicate = inner.rows.iter().any(|row| {
            row.status == TokenStatus::Pending && row.token_hash == record.token_hash
        });
        if duplicate {
            return Err(StoreError::DuplicatePendingHash);
        }

        inner.next_id += 1;
        record.id = inner.next_id;
        inner.rows.push(record.clone());
        Ok(record)
    }

    fn find_pending_by_hash(&self, hash: &TokenHash) -> Result<Option<AuditRecord>, StoreError> {
        let inner = self.inner.lock().map_err(|_| StoreError::LockPoisoned)?;
        Ok(inner
            .rows
            .iter()
            .rev()
            .find(|row| row.status == TokenStatus::Pending && row.token_hash == *hash)
            .cloned())
    }

    fn transition(
        &self,
        id: RecordId,
        to: TokenStatus,
        used_at: Option<DateTime<Utc>>,
    ) -> Result<bool, StoreError> {
        let mut inner = self.inner.lock().map_err(|_| StoreError::LockPoisoned)?;
        let Some(row) = inner.rows.iter_mut().find(|row| row.id == id) else {
            return Ok(false);
        };
        if !row.status.can_transition_to(to) {
            return Ok(false);
        }
        row.status = to;
        row.used_at = used_at;
        Ok(true)
    }

    fn query(&self, query: &AuditQuery) -> Result<Vec<AuditRecord>, StoreError> {
        let inner = self.inner.lock().map_err(|_| StoreError::LockPoisoned)?;
        let limit = query.limit.unwrap_or(DEFAULT_QUERY_LIMIT);
        Ok(inner
            .rows
            .iter()
            .rev()
            .filter(|row| query.matches(row))
            .take(limit)
            .cloned()
            .collect())
    }
}
