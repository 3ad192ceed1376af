//! Core contracts and lifecycle engine for admin-to-customer impersonation
//! tokens.
//!
//! This crate implements the security-critical half of a "login as customer"
//! feature: a privileged administrator requests a one-time credential for a
//! customer account, the credential travels to the storefront as a URL
//! parameter, and the storefront redeems it exactly once to establish a
//! customer session — all without the customer's password, and with a durable
//! audit trail of who impersonated whom.
//!
//! # Architecture
//!
//! ```text
//! AdminIdentity + IssueRequest
//!        |
//!        v
//! TokenEngine::issue ──> TokenSecret (to the admin's browser, once)
//!        |                    |
//!        |  AuditRecord       |  ?token=<secret>
//!        v  (PENDING)         v
//!   AuditStore <── TokenEngine::validate / redeem
//!                     |
//!                     +── LoginSink::establish_session
//!                     +── TokenEngine::mark_used / mark_failed
//! ```
//!
//! # Security Model
//!
//! - Secrets are 32 bytes from the OS CSPRNG, hex-encoded; only their
//!   SHA-256 digest is ever persisted or logged.
//! - Records move `Pending -> {Success | Expired | Failed}` exactly once;
//!   every terminal transition is a conditional compare-and-swap at the
//!   store, so concurrent redeemers cannot both win.
//! - Rejection is deliberately opaque: an invalid, expired, consumed, or
//!   never-issued token all redeem to the same outcome.
//!
//! Durable storage lives in a sibling crate; this crate ships an in-memory
//! [`store::MemoryAuditStore`] for tests and embedding.

pub mod clock;
pub mod config;
pub mod directory;
pub mod engine;
pub mod record;
pub mod store;
pub mod token;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{ConfigError, EngineConfig};
pub use directory::{
    AdminIdentity, CustomerDirectory, CustomerSnapshot, DirectoryError, IssueRequest, LoginSink,
    SinkError, StaticDirectory,
};
pub use engine::{Issued, IssueError, Redemption, TokenEngine};
pub use record::{AuditRecord, RecordId, TokenStatus};
pub use store::{AuditQuery, AuditStore, MemoryAuditStore, StoreError};
pub use token::{TokenError, TokenHash, TokenSecret};
