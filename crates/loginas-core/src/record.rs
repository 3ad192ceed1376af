//! Audit record model: one row per issuance-to-redemption lifecycle.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::token::TokenHash;

/// Store-assigned record identity. Zero until the record has been created.
pub type RecordId = i64;

/// Lifecycle status of an audit record.
///
/// `Pending` is the only initial state; the other three are terminal and a
/// record never leaves them. The store enforces this with conditional
/// transitions (see [`crate::store::AuditStore::transition`]); this type
/// encodes which transitions are legal at all.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenStatus {
    /// Issued, not yet redeemed or lapsed.
    Pending,
    /// Redeemed: the impersonation session was established.
    Success,
    /// Lapsed before redemption.
    Expired,
    /// Redemption was attempted but the downstream login step errored.
    Failed,
}

impl TokenStatus {
    /// Stable string form used for persistence and display.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Success => "success",
            Self::Expired => "expired",
            Self::Failed => "failed",
        }
    }

    /// Parses the stable string form.
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "pending" => Some(Self::Pending),
            "success" => Some(Self::Success),
            "expired" => Some(Self::Expired),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }

    /// Whether this status is terminal.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        !matches!(self, Self::Pending)
    }

    /// Whether a transition from `self` to `next` is legal. The only legal
    /// moves are `Pending` to a terminal state.
    #[must_use]
    pub const fn can_transition_to(self, next: Self) -> bool {
        matches!(self, Self::Pending) && next.is_terminal()
    }
}

impl std::fmt::Display for TokenStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One audit record per issuance attempt.
///
/// Admin username and customer email are denormalized snapshots taken at
/// issuance time so the audit trail stays meaningful even if the admin or
/// customer account is later renamed or deleted. The record carries the
/// token's digest, never the secret itself.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditRecord {
    /// Store-assigned identity; zero until created.
    pub id: RecordId,
    /// Issuing admin's id.
    pub admin_id: i64,
    /// Issuing admin's username, snapshotted at issuance.
    pub admin_username: String,
    /// Target customer's id.
    pub customer_id: i64,
    /// Target customer's email, snapshotted at issuance.
    pub customer_email: String,
    /// SHA-256 digest of the secret. The secret itself is never stored.
    pub token_hash: TokenHash,
    /// Requesting admin's IP, when known.
    pub ip_address: Option<String>,
    /// Lifecycle status.
    pub status: TokenStatus,
    /// Website/store scope the login targets.
    pub store_id: i64,
    /// Issuance time (UTC).
    pub created_at: DateTime<Utc>,
    /// Expiry deadline, set exactly once at creation.
    pub expires_at: DateTime<Utc>,
    /// Redemption time; set iff status is `Success`.
    pub used_at: Option<DateTime<Utc>>,
}

impl AuditRecord {
    /// Expiry policy: a record is expired strictly *after* its deadline.
    /// The boundary instant `now == expires_at` is still valid.
    #[must_use]
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;
    use crate::token::TokenSecret;

    fn record_expiring_at(expires_at: DateTime<Utc>) -> AuditRecord {
        AuditRecord {
            id: 1,
            admin_id: 7,
            admin_username: "ops.admin".to_string(),
            customer_id: 42,
            customer_email: "customer@example.com".to_string(),
            token_hash: TokenSecret::from_presented("t").hash(),
            ip_address: None,
            status: TokenStatus::Pending,
            store_id: 1,
            created_at: expires_at - chrono::Duration::minutes(5),
            expires_at,
            used_at: None,
        }
    }

    #[test]
    fn only_pending_can_transition() {
        for next in [TokenStatus::Success, TokenStatus::Expired, TokenStatus::Failed] {
            assert!(TokenStatus::Pending.can_transition_to(next));
        }
        for terminal in [TokenStatus::Success, TokenStatus::Expired, TokenStatus::Failed] {
            for next in [
                TokenStatus::Pending,
                TokenStatus::Success,
                TokenStatus::Expired,
                TokenStatus::Failed,
            ] {
                assert!(!terminal.can_transition_to(next));
            }
        }
        // Pending -> Pending is not a transition.
        assert!(!TokenStatus::Pending.can_transition_to(TokenStatus::Pending));
    }

    #[test]
    fn status_string_roundtrip() {
        for status in [
            TokenStatus::Pending,
            TokenStatus::Success,
            TokenStatus::Expired,
            TokenStatus::Failed,
        ] {
            assert_eq!(TokenStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(TokenStatus::parse("revoked"), None);
    }

    #[test]
    fn status_serde_uses_lowercase_strings() {
        let json = serde_json::to_string(&TokenStatus::Pending).unwrap();
        assert_eq!(json, "\"pending\"");
        let back: TokenStatus = serde_json::from_str("\"expired\"").unwrap();
        assert_eq!(back, TokenStatus::Expired);
    }

    #[test]
    fn expiry_is_strictly_after_deadline() {
        let deadline = Utc.with_ymd_and_hms(2026, 8, 7, 12, 5, 0).unwrap();
        let record = record_expiring_at(deadline);

        assert!(!record.is_expired_at(deadline - chrono::Duration::seconds(1)));
        // Boundary instant is still valid.
        assert!(!record.is_expired_at(deadline));
        assert!(record.is_expired_at(deadline + chrono::Duration::seconds(1)));
    }
}
