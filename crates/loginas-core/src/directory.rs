//! Collaborator contracts: customer lookup, admin context, login sink.
//!
//! Admin and customer identity are explicit inputs to every engine call —
//! there is no ambient "current session" global. The caller (an HTTP
//! controller, a CLI, a test) resolves its own context and passes it in.

use std::collections::HashMap;

use thiserror::Error;

/// Errors from customer directory lookups.
#[derive(Debug, Error)]
pub enum DirectoryError {
    /// No customer exists with the given id.
    #[error("customer not found: {customer_id}")]
    NotFound {
        /// The customer id that was requested.
        customer_id: i64,
    },

    /// The directory backend failed.
    #[error("customer lookup failed: {0}")]
    Lookup(String),
}

/// Snapshot of a customer account at issuance time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CustomerSnapshot {
    /// Customer id.
    pub id: i64,
    /// Customer email, copied onto the audit record.
    pub email: String,
    /// Website scope the account belongs to, when scoped.
    pub website_id: Option<i64>,
}

/// Read-only lookup of customer accounts.
pub trait CustomerDirectory: Send + Sync {
    /// Resolves a customer by id.
    ///
    /// # Errors
    ///
    /// Returns [`DirectoryError::NotFound`] if the account does not exist,
    /// or [`DirectoryError::Lookup`] on backend failure.
    fn get_by_id(&self, customer_id: i64) -> Result<CustomerSnapshot, DirectoryError>;
}

/// Fixed in-memory directory for tests and tooling.
#[derive(Debug, Default)]
pub struct StaticDirectory {
    customers: HashMap<i64, CustomerSnapshot>,
}

impl StaticDirectory {
    /// Creates an empty directory.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a customer, replacing any existing entry with the same id.
    #[must_use]
    pub fn with_customer(mut self, customer: CustomerSnapshot) -> Self {
        self.customers.insert(customer.id, customer);
        self
    }
}

impl CustomerDirectory for StaticDirectory {
    fn get_by_id(&self, customer_id: i64) -> Result<CustomerSnapshot, DirectoryError> {
        self.customers
            .get(&customer_id)
            .cloned()
            .ok_or(DirectoryError::NotFound { customer_id })
    }
}

/// The authenticated admin requesting impersonation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdminIdentity {
    /// Admin user id; must be positive for an identified admin.
    pub admin_id: i64,
    /// Admin username, snapshotted onto the audit record.
    pub admin_username: String,
}

impl AdminIdentity {
    /// Whether this context identifies a real admin user.
    #[must_use]
    pub fn is_identified(&self) -> bool {
        self.admin_id > 0 && !self.admin_username.is_empty()
    }
}

/// Per-request issuance parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IssueRequest {
    /// Target customer id.
    pub customer_id: i64,
    /// Requesting admin's IP address, when known. Absence is not an error.
    pub ip_address: Option<String>,
    /// Website/store scope the login URL will target.
    pub store_id: i64,
}

/// Error surfaced by a [`LoginSink`] when session establishment fails.
#[derive(Debug, Error)]
#[error("impersonation failed: {0}")]
pub struct SinkError(pub String);

impl SinkError {
    /// Creates a sink error from any displayable cause.
    #[must_use]
    pub fn new(cause: impl std::fmt::Display) -> Self {
        Self(cause.to_string())
    }
}

/// Downstream impersonation trigger: turns a validated record into a
/// logged-in customer session.
///
/// Implementations live outside the core (storefront session plumbing). The
/// engine calls this between `validate` and `mark_used`; a failure here
/// moves the record to `Failed` rather than burning it as a success.
pub trait LoginSink {
    /// Establishes a customer session for `customer_id`.
    ///
    /// # Errors
    ///
    /// Returns [`SinkError`] if the session could not be established.
    fn establish_session(&self, customer_id: i64) -> Result<(), SinkError>;
}
