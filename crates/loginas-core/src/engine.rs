//! Token lifecycle engine: issuance, validation, and terminal transitions.
//!
//! # Two-Phase Redemption
//!
//! Validation and commit are deliberately separate. [`TokenEngine::validate`]
//! only confirms eligibility (pending, unexpired); the record stays pending
//! until the downstream impersonation step has actually succeeded and the
//! caller commits with [`TokenEngine::mark_used`]. A failed login attempt
//! therefore lands in `Failed`, not a misleading `Success`.
//!
//! # Failure Semantics
//!
//! Issuance-time errors surface to the caller. Persistence failures during
//! terminal transitions (expire / mark used / mark failed) are logged and
//! swallowed: the caller already holds the in-memory decision it needs, and
//! a storage hiccup must not crash the login flow. Redemption always
//! resolves to exactly one of proceed or rejected; every rejection is
//! indistinguishable from every other by design.

use std::sync::Arc;

use thiserror::Error;
use tracing::{error, info, warn};

use crate::clock::Clock;
use crate::config::EngineConfig;
use crate::directory::{AdminIdentity, CustomerDirectory, DirectoryError, IssueRequest, LoginSink};
use crate::record::{AuditRecord, RecordId, TokenStatus};
use crate::store::{AuditStore, StoreError};
use crate::token::{TokenError, TokenSecret};

/// Errors from token issuance.
#[derive(Debug, Error)]
pub enum IssueError {
    /// The feature is switched off in configuration.
    #[error("login as customer feature is disabled")]
    Disabled,

    /// No identified admin in the request context.
    #[error("unable to identify admin user")]
    Unauthenticated,

    /// The target customer account does not exist.
    #[error("customer does not exist: {customer_id}")]
    CustomerNotFound {
        /// The customer id that was requested.
        customer_id: i64,
    },

    /// The customer directory failed for a reason other than a miss.
    #[error("customer lookup failed: {0}")]
    Directory(String),

    /// Secret generation failed.
    #[error(transparent)]
    Token(#[from] TokenError),

    /// The audit record could not be persisted. No usable secret is
    /// returned in this case.
    #[error("failed to persist audit record: {0}")]
    Persistence(#[from] StoreError),
}

/// Result of a successful issuance: the raw secret (delivered to the
/// admin's browser exactly once) and the identity of its audit record.
#[derive(Debug)]
pub struct Issued {
    /// The one-time secret. Not retained by the engine.
    pub secret: TokenSecret,
    /// Identity of the pending audit record.
    pub record_id: RecordId,
}

impl Issued {
    /// Assembles the one-time login URL for the storefront redemption
    /// endpoint. This is the single place the raw secret leaves the
    /// issuance path.
    #[must_use]
    pub fn login_url(&self, base_url: &str) -> String {
        format!(
            "{}/loginascustomer/login/process?token={}",
            base_url.trim_end_matches('/'),
            self.secret.expose()
        )
    }
}

/// Outcome of a redemption attempt.
#[derive(Debug)]
pub enum Redemption {
    /// The token was valid and the customer session was established.
    Proceed {
        /// The resolved audit record (status `Success`).
        record: AuditRecord,
        /// Storefront path to route the customer to.
        redirect: String,
    },
    /// The token was invalid, expired, already consumed, never issued, the
    /// feature is disabled, or the login step failed — intentionally
    /// indistinguishable.
    Rejected,
}

impl Redemption {
    /// Whether this outcome is a proceed.
    #[must_use]
    pub const fn is_proceed(&self) -> bool {
        matches!(self, Self::Proceed { .. })
    }
}

/// Orchestrates issuance, validation, and terminal-state transitions over
/// the audit store.
pub struct TokenEngine<S> {
    store: S,
    clock: Arc<dyn Clock>,
    directory: Arc<dyn CustomerDirectory>,
    config: EngineConfig,
}

impl<S: AuditStore> TokenEngine<S> {
    /// Creates an engine over `store` with the given collaborators.
    pub fn new(
        store: S,
        clock: Arc<dyn Clock>,
        directory: Arc<dyn CustomerDirectory>,
        config: EngineConfig,
    ) -> Self {
        Self {
            store,
            clock,
            directory,
            config,
        }
    }

    /// Returns the engine configuration.
    #[must_use]
    pub const fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Returns the underlying store.
    #[must_use]
    pub const fn store(&self) -> &S {
        &self.store
    }

    /// Issues a one-time token for `request.customer_id` on behalf of
    /// `admin`.
    ///
    /// Builds a `Pending` audit record snapshotting the admin username,
    /// customer email, caller IP, and store scope, with
    /// `expires_at = now + token_lifetime`. The raw secret is returned to
    /// the caller and never retained.
    ///
    /// # Errors
    ///
    /// [`IssueError::Disabled`] when the feature is off,
    /// [`IssueError::Unauthenticated`] without an identified admin,
    /// [`IssueError::CustomerNotFound`] when the customer does not resolve,
    /// [`IssueError::Token`] on entropy failure, and
    /// [`IssueError::Persistence`] when the record cannot be stored.
    pub fn issue(
        &self,
        admin: &AdminIdentity,
        request: &IssueRequest,
    ) -> Result<Issued, IssueError> {
        if !self.config.enabled {
            return Err(IssueError::Disabled);
        }
        if !admin.is_identified() {
            return Err(IssueError::Unauthenticated);
        }

        let customer = self
            .directory
            .get_by_id(request.customer_id)
            .map_err(|err| match err {
                DirectoryError::NotFound { customer_id } => {
                    IssueError::CustomerNotFound { customer_id }
                },
                DirectoryError::Lookup(message) => IssueError::Directory(message),
            })?;

        let secret = TokenSecret::generate()?;
        let token_hash = secret.hash();

        let now = self.clock.now_utc();
        let record = self.store.create(AuditRecord {
            id: 0,
            admin_id: admin.admin_id,
            admin_username: admin.admin_username.clone(),
            customer_id: customer.id,
            customer_email: customer.email,
            token_hash,
            ip_address: request.ip_address.clone(),
            status: TokenStatus::Pending,
            store_id: request.store_id,
            created_at: now,
            expires_at: now + self.config.token_lifetime(),
            used_at: None,
        })?;

        info!(
            record_id = record.id,
            admin_id = admin.admin_id,
            customer_id = customer.id,
            store_id = request.store_id,
            "issued impersonation token"
        );

        Ok(Issued {
            secret,
            record_id: record.id,
        })
    }

    /// Validates a presented secret.
    ///
    /// Returns the still-`Pending` record when the secret matches an
    /// unexpired pending record; validation never marks success. Returns
    /// `None` when the secret is unknown, already consumed, or expired —
    /// the cases are indistinguishable to the caller. An expired record is
    /// transitioned to `Expired` on the way out, consuming the slot.
    ///
    /// Store failures resolve to `None` (fail-closed rejection) and are
    /// logged.
    pub fn validate(&self, secret: &TokenSecret) -> Option<AuditRecord> {
        let hash = secret.hash();
        let record = match self.store.find_pending_by_hash(&hash) {
            Ok(Some(record)) => record,
            Ok(None) => return None,
            Err(err) => {
                error!(error = %err, "audit store lookup failed during validation");
                return None;
            },
        };

        let now = self.clock.now_utc();
        if record.is_expired_at(now) {
            match self.store.transition(record.id, TokenStatus::Expired, None) {
                Ok(true) => {
                    info!(record_id = record.id, "token expired before redemption");
                },
                Ok(false) => {
                    // Another caller resolved the record first; either way
                    // this secret is spent.
                },
                Err(err) => {
                    error!(
                        record_id = record.id,
                        error = %err,
                        "failed to persist expired transition"
                    );
                },
            }
            return None;
        }

        Some(record)
    }

    /// Commits a successful redemption: `Pending -> Success` with
    /// `used_at = now`.
    ///
    /// Returns whether this caller won the transition. `false` means the
    /// record was already resolved (concurrent redeemer, expiry) or the
    /// store failed; both are logged and neither crashes the login flow.
    pub fn mark_used(&self, record: &AuditRecord) -> bool {
        let used_at = self.clock.now_utc();
        match self
            .store
            .transition(record.id, TokenStatus::Success, Some(used_at))
        {
            Ok(true) => {
                info!(
                    record_id = record.id,
                    customer_id = record.customer_id,
                    admin_id = record.admin_id,
                    "customer logged in via impersonation token"
                );
                true
            },
            Ok(false) => {
                warn!(
                    record_id = record.id,
                    "token already resolved; success transition skipped"
                );
                false
            },
            Err(err) => {
                error!(record_id = record.id, error = %err, "failed to mark token as used");
                false
            },
        }
    }

    /// Records a failed redemption: `Pending -> Failed`, no `used_at`.
    ///
    /// Same return and failure semantics as [`Self::mark_used`].
    pub fn mark_failed(&self, record: &AuditRecord) -> bool {
        match self.store.transition(record.id, TokenStatus::Failed, None) {
            Ok(true) => {
                warn!(record_id = record.id, "token marked as failed");
                true
            },
            Ok(false) => {
                warn!(
                    record_id = record.id,
                    "token already resolved; failed transition skipped"
                );
                false
            },
            Err(err) => {
                error!(record_id = record.id, error = %err, "failed to mark token as failed");
                false
            },
        }
    }

    /// Full redemption flow: validate, establish the customer session via
    /// `sink`, then commit.
    ///
    /// A sink failure after successful validation moves the record to
    /// `Failed`. Losing the commit race to a concurrent redeemer resolves
    /// to [`Redemption::Rejected`] — at most one redemption path proceeds
    /// per issued token.
    pub fn redeem(&self, secret: &TokenSecret, sink: &dyn LoginSink) -> Redemption {
        if !self.config.enabled {
            return Redemption::Rejected;
        }

        let Some(record) = self.validate(secret) else {
            return Redemption::Rejected;
        };

        if let Err(err) = sink.establish_session(record.customer_id) {
            error!(
                record_id = record.id,
                customer_id = record.customer_id,
                error = %err,
                "impersonation failed after validation"
            );
            self.mark_failed(&record);
            return Redemption::Rejected;
        }

        if self.mark_used(&record) {
            let mut resolved = record;
            resolved.status = TokenStatus::Success;
            resolved.used_at = Some(self.clock.now_utc());
            Redemption::Proceed {
                record: resolved,
                redirect: self.config.redirect_page.clone(),
            }
        } else {
            Redemption::Rejected
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::{DateTime, TimeZone, Utc};

    use super::*;
    use crate::clock::ManualClock;
    use crate::directory::{CustomerSnapshot, SinkError, StaticDirectory};
    use crate::store::{AuditQuery, MemoryAuditStore};

    struct OkSink;

    impl LoginSink for OkSink {
        fn establish_session(&self, _customer_id: i64) -> Result<(), SinkError> {
            Ok(())
        }
    }

    struct FailingSink;

    impl LoginSink for FailingSink {
        fn establish_session(&self, _customer_id: i64) -> Result<(), SinkError> {
            Err(SinkError::new("session backend unavailable"))
        }
    }

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 8, 7, 12, 0, 0).unwrap()
    }

    fn admin() -> AdminIdentity {
        AdminIdentity {
            admin_id: 7,
            admin_username: "ops.admin".to_string(),
        }
    }

    fn request() -> IssueRequest {
        IssueRequest {
            customer_id: 42,
            ip_address: Some("203.0.113.9".to_string()),
            store_id: 1,
        }
    }

    fn engine_at(
        t: DateTime<Utc>,
        config: EngineConfig,
    ) -> (TokenEngine<MemoryAuditStore>, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(t));
        let directory = StaticDirectory::new().with_customer(CustomerSnapshot {
            id: 42,
            email: "customer@example.com".to_string(),
            website_id: Some(1),
        });
        let engine = TokenEngine::new(
            MemoryAuditStore::new(),
            Arc::clone(&clock) as Arc<dyn Clock>,
            Arc::new(directory),
            config,
        );
        (engine, clock)
    }

    fn default_engine() -> (TokenEngine<MemoryAuditStore>, Arc<ManualClock>) {
        engine_at(t0(), EngineConfig::default())
    }

    #[test]
    fn issue_creates_pending_record_with_snapshots() {
        let (engine, _clock) = default_engine();

        let issued = engine.issue(&admin(), &request()).unwrap();
        assert!(issued.record_id > 0);

        let rows = engine.store().query(&AuditQuery::default()).unwrap();
        assert_eq!(rows.len(), 1);
        let record = &rows[0];
        assert_eq!(record.status, TokenStatus::Pending);
        assert_eq!(record.admin_id, 7);
        assert_eq!(record.admin_username, "ops.admin");
        assert_eq!(record.customer_id, 42);
        assert_eq!(record.customer_email, "customer@example.com");
        assert_eq!(record.ip_address.as_deref(), Some("203.0.113.9"));
        assert_eq!(record.store_id, 1);
        assert_eq!(record.created_at, t0());
        assert_eq!(record.expires_at, t0() + chrono::Duration::minutes(5));
        assert_eq!(record.used_at, None);
    }

    #[test]
    fn issue_without_ip_is_not_an_error() {
        let (engine, _clock) = default_engine();
        let issued = engine
            .issue(
                &admin(),
                &IssueRequest {
                    customer_id: 42,
                    ip_address: None,
                    store_id: 1,
                },
            )
            .unwrap();
        assert!(issued.record_id > 0);
    }

    #[test]
    fn issue_never_persists_the_raw_secret() {
        let (engine, _clock) = default_engine();
        let issued = engine.issue(&admin(), &request()).unwrap();
        let raw = issued.secret.expose();

        let rows = engine.store().query(&AuditQuery::default()).unwrap();
        let record = &rows[0];
        assert_ne!(record.token_hash.as_str(), raw);
        // Nothing else on the record can carry the secret; double-check the
        // serialized form as a whole.
        let serialized = serde_json::to_string(record).unwrap();
        assert!(!serialized.contains(raw));
        assert_eq!(record.token_hash, issued.secret.hash());
    }

    #[test]
    fn issue_when_disabled_fails() {
        let config = EngineConfig {
            enabled: false,
            ..EngineConfig::default()
        };
        let (engine, _clock) = engine_at(t0(), config);
        let err = engine.issue(&admin(), &request()).unwrap_err();
        assert!(matches!(err, IssueError::Disabled));
    }

    #[test]
    fn issue_requires_identified_admin() {
        let (engine, _clock) = default_engine();
        let err = engine
            .issue(
                &AdminIdentity {
                    admin_id: 0,
                    admin_username: String::new(),
                },
                &request(),
            )
            .unwrap_err();
        assert!(matches!(err, IssueError::Unauthenticated));
    }

    #[test]
    fn issue_requires_existing_customer() {
        let (engine, _clock) = default_engine();
        let err = engine
            .issue(
                &admin(),
                &IssueRequest {
                    customer_id: 999,
                    ip_address: None,
                    store_id: 1,
                },
            )
            .unwrap_err();
        assert!(matches!(err, IssueError::CustomerNotFound { customer_id: 999 }));
    }

    #[test]
    fn login_url_embeds_secret_once() {
        let (engine, _clock) = default_engine();
        let issued = engine.issue(&admin(), &request()).unwrap();
        let url = issued.login_url("https://store.example.com/");
        assert_eq!(
            url,
            format!(
                "https://store.example.com/loginascustomer/login/process?token={}",
                issued.secret.expose()
            )
        );
    }

    // Scenario A: issue at T0, validate at T0+1min, mark used.
    #[test]
    fn validate_then_mark_used_within_lifetime() {
        let (engine, clock) = default_engine();
        let issued = engine.issue(&admin(), &request()).unwrap();

        clock.advance(chrono::Duration::minutes(1));
        let record = engine.validate(&issued.secret).unwrap();
        // Validation does not itself mark success.
        assert_eq!(record.status, TokenStatus::Pending);

        assert!(engine.mark_used(&record));
        let rows = engine.store().query(&AuditQuery::default()).unwrap();
        assert_eq!(rows[0].status, TokenStatus::Success);
        assert_eq!(rows[0].used_at, Some(t0() + chrono::Duration::minutes(1)));
    }

    // Scenario B: validate after expiry consumes the slot.
    #[test]
    fn validate_after_expiry_rejects_and_expires_record() {
        let (engine, clock) = default_engine();
        let issued = engine.issue(&admin(), &request()).unwrap();

        clock.advance(chrono::Duration::minutes(6));
        assert!(engine.validate(&issued.secret).is_none());

        let rows = engine.store().query(&AuditQuery::default()).unwrap();
        assert_eq!(rows[0].status, TokenStatus::Expired);
        assert_eq!(rows[0].used_at, None);

        // Repeated validation attempts stay rejected and do not flap the
        // status.
        assert!(engine.validate(&issued.secret).is_none());
        let rows = engine.store().query(&AuditQuery::default()).unwrap();
        assert_eq!(rows[0].status, TokenStatus::Expired);
    }

    // Scenario C: a never-issued secret validates to nothing and mutates
    // nothing.
    #[test]
    fn validate_unknown_secret_is_rejected_without_side_effects() {
        let (engine, _clock) = default_engine();
        let phantom = TokenSecret::generate().unwrap();
        assert!(engine.validate(&phantom).is_none());
        assert!(engine.store().query(&AuditQuery::default()).unwrap().is_empty());
    }

    // Scenario D: a consumed secret cannot validate again.
    #[test]
    fn validate_after_success_is_rejected() {
        let (engine, clock) = default_engine();
        let issued = engine.issue(&admin(), &request()).unwrap();

        clock.advance(chrono::Duration::minutes(1));
        let record = engine.validate(&issued.secret).unwrap();
        assert!(engine.mark_used(&record));

        assert!(engine.validate(&issued.secret).is_none());
    }

    #[test]
    fn boundary_instant_is_still_valid() {
        let (engine, clock) = default_engine();
        let issued = engine.issue(&admin(), &request()).unwrap();

        // now == expires_at: still redeemable.
        clock.set(t0() + chrono::Duration::minutes(5));
        let record = engine.validate(&issued.secret).unwrap();
        assert_eq!(record.status, TokenStatus::Pending);

        // One second past the deadline: expired.
        clock.advance(chrono::Duration::seconds(1));
        assert!(engine.validate(&issued.secret).is_none());
    }

    #[test]
    fn mark_used_loses_cleanly_after_resolution() {
        let (engine, clock) = default_engine();
        let issued = engine.issue(&admin(), &request()).unwrap();
        clock.advance(chrono::Duration::minutes(1));

        let record = engine.validate(&issued.secret).unwrap();
        assert!(engine.mark_used(&record));
        // Second commit observes the resolved record and reports the loss.
        assert!(!engine.mark_used(&record));
        assert!(!engine.mark_failed(&record));

        let rows = engine.store().query(&AuditQuery::default()).unwrap();
        assert_eq!(rows[0].status, TokenStatus::Success);
    }

    #[test]
    fn redeem_happy_path_proceeds_with_redirect() {
        let (engine, clock) = default_engine();
        let issued = engine.issue(&admin(), &request()).unwrap();
        clock.advance(chrono::Duration::minutes(2));

        match engine.redeem(&issued.secret, &OkSink) {
            Redemption::Proceed { record, redirect } => {
                assert_eq!(record.status, TokenStatus::Success);
                assert_eq!(record.customer_id, 42);
                assert_eq!(redirect, "customer/account");
            },
            Redemption::Rejected => panic!("expected proceed"),
        }
    }

    #[test]
    fn redeem_sink_failure_marks_failed() {
        let (engine, _clock) = default_engine();
        let issued = engine.issue(&admin(), &request()).unwrap();

        assert!(!engine.redeem(&issued.secret, &FailingSink).is_proceed());

        let rows = engine.store().query(&AuditQuery::default()).unwrap();
        assert_eq!(rows[0].status, TokenStatus::Failed);
        assert_eq!(rows[0].used_at, None);
    }

    #[test]
    fn redeem_when_disabled_is_rejected() {
        let (engine, _clock) = default_engine();
        let issued = engine.issue(&admin(), &request()).unwrap();

        let disabled = EngineConfig {
            enabled: false,
            ..EngineConfig::default()
        };
        let (disabled_engine, _c) = engine_at(t0(), disabled);
        // Fresh engine shares no store, but even a valid-looking secret
        // must reject without touching storage when disabled.
        assert!(!disabled_engine.redeem(&issued.secret, &OkSink).is_proceed());
    }

    #[test]
    fn redeem_twice_proceeds_exactly_once() {
        let (engine, clock) = default_engine();
        let issued = engine.issue(&admin(), &request()).unwrap();
        clock.advance(chrono::Duration::minutes(1));

        assert!(engine.redeem(&issued.secret, &OkSink).is_proceed());
        assert!(!engine.redeem(&issued.secret, &OkSink).is_proceed());
    }

    #[test]
    fn concurrent_commits_yield_exactly_one_success() {
        let (engine, clock) = default_engine();
        let issued = engine.issue(&admin(), &request()).unwrap();
        clock.advance(chrono::Duration::minutes(1));

        // Both contenders validate the same pending record, as in a replayed
        // or double-clicked redemption URL.
        let record_a = engine.validate(&issued.secret).unwrap();
        let record_b = engine.validate(&issued.secret).unwrap();
        assert_eq!(record_a.id, record_b.id);

        let engine = Arc::new(engine);
        let mut handles = Vec::new();
        for record in [record_a, record_b] {
            let engine = Arc::clone(&engine);
            handles.push(std::thread::spawn(move || engine.mark_used(&record)));
        }
        let wins: Vec<bool> = handles.into_iter().map(|h| h.join().unwrap()).collect();

        assert_eq!(wins.iter().filter(|won| **won).count(), 1);
        let rows = engine.store().query(&AuditQuery::default()).unwrap();
        assert_eq!(rows[0].status, TokenStatus::Success);
    }

    #[test]
    fn issued_hashes_are_unique_per_pending_record() {
        let (engine, _clock) = default_engine();
        let a = engine.issue(&admin(), &request()).unwrap();
        let b = engine.issue(&admin(), &request()).unwrap();
        assert_ne!(a.secret.hash(), b.secret.hash());

        let pending = engine
            .store()
            .query(&AuditQuery::default().with_status(TokenStatus::Pending))
            .unwrap();
        assert_eq!(pending.len(), 2);
        assert_ne!(pending[0].token_hash, pending[1].token_hash);
    }
}
