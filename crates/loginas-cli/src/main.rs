//! loginas - operator CLI for the impersonation token engine.
//!
//! Issues one-time login tokens, redeems them, and inspects the audit log,
//! against a local `SQLite` audit store. The customer snapshot for issuance
//! is operator-supplied; in production deployments the storefront's own
//! customer directory fills that role.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use loginas_core::{
    AdminIdentity, AuditQuery, AuditRecord, AuditStore, Clock, CustomerSnapshot, EngineConfig,
    IssueRequest, LoginSink, Redemption, SinkError, StaticDirectory, SystemClock, TokenEngine,
    TokenSecret, TokenStatus,
};
use loginas_store::SqliteAuditStore;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// loginas - admin-to-customer impersonation tokens
#[derive(Parser, Debug)]
#[command(name = "loginas")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Path to the SQLite audit store
    #[arg(long, default_value = "loginas.db")]
    db: PathBuf,

    /// Path to an engine configuration file (TOML); defaults apply if absent
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "warn")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Issue a one-time login token for a customer
    Issue {
        /// Target customer id
        #[arg(long)]
        customer_id: i64,

        /// Target customer email (snapshotted onto the audit record)
        #[arg(long)]
        customer_email: String,

        /// Issuing admin id
        #[arg(long)]
        admin_id: i64,

        /// Issuing admin username
        #[arg(long)]
        admin_username: String,

        /// Website/store scope for the login
        #[arg(long, default_value_t = 1)]
        store_id: i64,

        /// Requesting admin's IP address
        #[arg(long)]
        ip: Option<String>,

        /// Storefront base URL; when set, prints the full login URL
        #[arg(long)]
        base_url: Option<String>,
    },

    /// Redeem a presented token
    Redeem {
        /// The raw token value from the login URL
        token: String,
    },

    /// List audit log records, newest first
    Log {
        /// Filter by status (pending, success, expired, failed)
        #[arg(long, value_parser = parse_status)]
        status: Option<TokenStatus>,

        /// Only records created at or after this RFC 3339 instant
        #[arg(long, value_parser = parse_instant)]
        since: Option<DateTime<Utc>>,

        /// Only records created at or before this RFC 3339 instant
        #[arg(long, value_parser = parse_instant)]
        until: Option<DateTime<Utc>>,

        /// Maximum number of records
        #[arg(long)]
        limit: Option<usize>,

        /// Emit JSON instead of a table
        #[arg(long)]
        json: bool,
    },
}

fn parse_status(value: &str) -> std::result::Result<TokenStatus, String> {
    TokenStatus::parse(value)
        .ok_or_else(|| format!("unknown status '{value}' (expected pending, success, expired, or failed)"))
}

fn parse_instant(value: &str) -> std::result::Result<DateTime<Utc>, String> {
    DateTime::parse_from_rfc3339(value)
        .map(|instant| instant.with_timezone(&Utc))
        .map_err(|err| format!("invalid RFC 3339 instant '{value}': {err}"))
}

/// Sink used by the CLI: the actual storefront session lives out of
/// process, so redemption here only reports the decision.
struct ReportingSink;

impl LoginSink for ReportingSink {
    fn establish_session(&self, customer_id: i64) -> std::result::Result<(), SinkError> {
        tracing::info!(customer_id, "session establishment delegated to storefront");
        Ok(())
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::registry()
        .with(EnvFilter::try_new(&cli.log_level).unwrap_or_else(|_| EnvFilter::new("warn")))
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    let config = match &cli.config {
        Some(path) => EngineConfig::from_file(path)
            .with_context(|| format!("failed to load config from {}", path.display()))?,
        None => EngineConfig::default(),
    };

    let store = SqliteAuditStore::open(&cli.db)
        .with_context(|| format!("failed to open audit store at {}", cli.db.display()))?;

    match cli.command {
        Commands::Issue {
            customer_id,
            customer_email,
            admin_id,
            admin_username,
            store_id,
            ip,
            base_url,
        } => {
            let directory = StaticDirectory::new().with_customer(CustomerSnapshot {
                id: customer_id,
                email: customer_email,
                website_id: None,
            });
            let engine = engine_over(store, directory, config);

            let issued = engine
                .issue(
                    &AdminIdentity {
                        admin_id,
                        admin_username,
                    },
                    &IssueRequest {
                        customer_id,
                        ip_address: ip,
                        store_id,
                    },
                )
                .context("token issuance failed")?;

            println!("record id: {}", issued.record_id);
            match base_url {
                Some(base) => println!("login url: {}", issued.login_url(&base)),
                None => println!("token:     {}", issued.secret.expose()),
            }
        },

        Commands::Redeem { token } => {
            let engine = engine_over(store, StaticDirectory::new(), config);
            let presented = TokenSecret::from_presented(token);
            match engine.redeem(&presented, &ReportingSink) {
                Redemption::Proceed { record, redirect } => {
                    println!("proceed: customer {} ({})", record.customer_id, record.customer_email);
                    println!("redirect: {redirect}");
                },
                Redemption::Rejected => {
                    println!("rejected: login link is invalid or has expired");
                    std::process::exit(1);
                },
            }
        },

        Commands::Log {
            status,
            since,
            until,
            limit,
            json,
        } => {
            let query = AuditQuery {
                status,
                created_after: since,
                created_before: until,
                limit: Some(limit.unwrap_or(config.audit_query_limit)),
            };
            let records = store.query(&query).context("audit log query failed")?;
            if json {
                println!("{}", serde_json::to_string_pretty(&records)?);
            } else {
                print_log_table(&records);
            }
        },
    }

    Ok(())
}

fn engine_over(
    store: SqliteAuditStore,
    directory: StaticDirectory,
    config: EngineConfig,
) -> TokenEngine<SqliteAuditStore> {
    TokenEngine::new(
        store,
        Arc::new(SystemClock) as Arc<dyn Clock>,
        Arc::new(directory),
        config,
    )
}

fn print_log_table(records: &[AuditRecord]) {
    if records.is_empty() {
        println!("no audit records match");
        return;
    }
    println!(
        "{:>6}  {:<8}  {:>9}  {:<28}  {:<18}  {:<20}  {:<20}",
        "id", "status", "customer", "email", "admin", "created", "used"
    );
    for record in records {
        println!(
            "{:>6}  {:<8}  {:>9}  {:<28}  {:<18}  {:<20}  {:<20}",
            record.id,
            record.status.to_string(),
            record.customer_id,
            record.customer_email,
            record.admin_username,
            record.created_at.format("%Y-%m-%d %H:%M:%S"),
            record
                .used_at
                .map_or_else(|| "-".to_string(), |t| t.format("%Y-%m-%d %H:%M:%S").to_string()),
        );
    }
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory;

    use super::*;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parses_issue_command() {
        let cli = Cli::parse_from([
            "loginas",
            "--db",
            "/tmp/audit.db",
            "issue",
            "--customer-id",
            "42",
            "--customer-email",
            "customer@example.com",
            "--admin-id",
            "7",
            "--admin-username",
            "ops.admin",
        ]);
        match cli.command {
            Commands::Issue {
                customer_id,
                store_id,
                ..
            } => {
                assert_eq!(customer_id, 42);
                assert_eq!(store_id, 1);
            },
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn parses_log_filters() {
        let cli = Cli::parse_from([
            "loginas",
            "log",
            "--status",
            "expired",
            "--since",
            "2026-08-01T00:00:00Z",
            "--limit",
            "10",
        ]);
        match cli.command {
            Commands::Log {
                status,
                since,
                limit,
                ..
            } => {
                assert_eq!(status, Some(TokenStatus::Expired));
                assert!(since.is_some());
                assert_eq!(limit, Some(10));
            },
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn rejects_unknown_status() {
        assert!(parse_status("revoked").is_err());
        assert_eq!(parse_status("pending"), Ok(TokenStatus::Pending));
    }
}
