//! Engine configuration, loadable from TOML.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors from configuration loading and validation.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The file could not be read.
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    /// The TOML was invalid.
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    /// The values parsed but are not usable.
    #[error("invalid config: {0}")]
    Validation(String),
}

/// Configuration for the token lifecycle engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Master switch. When disabled, issuance errors and redemption
    /// rejects — indistinguishably from an invalid token.
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// Token lifetime in minutes; `expires_at = created_at + lifetime`.
    #[serde(default = "default_token_lifetime_minutes")]
    pub token_lifetime_minutes: u32,

    /// Storefront path the customer lands on after a successful login.
    #[serde(default = "default_redirect_page")]
    pub redirect_page: String,

    /// Default result cap for audit log queries.
    #[serde(default = "default_audit_query_limit")]
    pub audit_query_limit: usize,
}

fn default_enabled() -> bool {
    true
}

fn default_token_lifetime_minutes() -> u32 {
    5
}

fn default_redirect_page() -> String {
    "customer/account".to_string()
}

fn default_audit_query_limit() -> usize {
    crate::store::DEFAULT_QUERY_LIMIT
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            token_lifetime_minutes: default_token_lifetime_minutes(),
            redirect_page: default_redirect_page(),
            audit_query_limit: default_audit_query_limit(),
        }
    }
}

impl EngineConfig {
    /// Parses configuration from a TOML string and validates it.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] on invalid TOML or
    /// [`ConfigError::Validation`] on unusable values.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Loads configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Io`] if the file cannot be read, plus the
    /// errors of [`Self::from_toml`].
    pub fn from_file(path: &std::path::Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Validation`] if the token lifetime is zero or
    /// the redirect page is empty.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.token_lifetime_minutes == 0 {
            return Err(ConfigError::Validation(
                "token_lifetime_minutes must be at least 1".to_string(),
            ));
        }
        if self.redirect_page.is_empty() {
            return Err(ConfigError::Validation(
                "redirect_page must not be empty".to_string(),
            ));
        }
        Ok(())
    }

    /// Token lifetime as a [`chrono::Duration`].
    #[must_use]
    pub fn token_lifetime(&self) -> chrono::Duration {
        chrono::Duration::minutes(i64::from(self.token_lifetime_minutes))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let config = EngineConfig::default();
        assert!(config.enabled);
        assert_eq!(config.token_lifetime_minutes, 5);
        assert_eq!(config.redirect_page, "customer/account");
        assert_eq!(config.audit_query_limit, 100);
    }

    #[test]
    fn empty_toml_yields_defaults() {
        let config = EngineConfig::from_toml("").unwrap();
        assert_eq!(config, EngineConfig::default());
    }

    #[test]
    fn partial_toml_overrides_only_named_fields() {
        let config = EngineConfig::from_toml("token_lifetime_minutes = 15\n").unwrap();
        assert_eq!(config.token_lifetime_minutes, 15);
        assert_eq!(config.redirect_page, "customer/account");
        assert!(config.enabled);
    }

    #[test]
    fn zero_lifetime_is_rejected() {
        let err = EngineConfig::from_toml("token_lifetime_minutes = 0\n").unwrap_err();
        assert!(matches!(err, ConfigError::Validation(_)));
    }

    #[test]
    fn empty_redirect_is_rejected() {
        let err = EngineConfig::from_toml("redirect_page = \"\"\n").unwrap_err();
        assert!(matches!(err, ConfigError::Validation(_)));
    }

    #[test]
    fn toml_roundtrip() {
        let config = EngineConfig {
            enabled: false,
            token_lifetime_minutes: 30,
            redirect_page: "sales/order/history".to_string(),
            audit_query_limit: 25,
        };
        let rendered = toml::to_string(&config).unwrap();
        let parsed: EngineConfig = toml::from_str(&rendered).unwrap();
        assert_eq!(parsed, config);
    }
}
