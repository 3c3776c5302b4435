use anyhow::{Context, Result};
use std::env;
use std::path::PathBuf;
use std::time::Duration;
use url::Url;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Environment {
    Dev,
    Staging,
    Prod,
}

impl Environment {
    pub fn from_str(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "prod" | "production" => Self::Prod,
            "staging" => Self::Staging,
            _ => Self::Dev,
        }
    }

    pub fn is_dev(&self) -> bool {
        matches!(self, Self::Dev)
    }
}

/// Which ledger binding the process talks to
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LedgerMode {
    /// JSON-RPC against a real node
    Rpc,
    /// Process-local ledger, for local development without a chain
    Memory,
}

impl LedgerMode {
    pub fn from_str(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "memory" | "mem" | "in-memory" => Self::Memory,
            _ => Self::Rpc,
        }
    }
}

#[derive(Debug, Clone)]
pub struct LedgerSettings {
    pub mode: LedgerMode,
    pub rpc_url: Url,
    pub deployment_file: PathBuf,
    /// `from` address used when the caller has no linked wallet
    pub default_sender: Option<String>,
    pub request_timeout: Duration,
    pub confirmation_timeout: Duration,
    pub poll_interval: Duration,
    pub gas_limit: u64,
}

#[derive(Debug, Clone)]
pub struct ReconcileSettings {
    /// Zero disables the background pass
    pub interval: Duration,
    pub batch_size: i64,
    pub max_elapsed: Duration,
    /// Records younger than this may still have a mirror awaiting confirmation
    pub settle_after: Duration,
}

#[derive(Debug, Clone)]
pub struct Settings {
    pub env: Environment,
    pub server_addr: String,

    // Database
    pub database_url: String,
    pub database_max_connections: u32,

    // Redis
    pub redis_url: String,
    pub redis_cache_ttl_seconds: u64,

    // CORS
    pub cors_allow_origins: Vec<String>,

    // Auth
    pub jwt_secret: String,
    pub jwt_issuer: Option<String>,

    // Ledger
    pub ledger: LedgerSettings,

    // Uploads
    pub upload_dir: PathBuf,

    // Repair
    pub reconcile: ReconcileSettings,
}

fn parse_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

impl Settings {
    pub fn from_env() -> Result<Self> {
        let env = Environment::from_str(&env::var("ENV").unwrap_or_else(|_| "dev".to_string()));
        let server_addr = env::var("SERVER_ADDR").unwrap_or_else(|_| "0.0.0.0:8080".to_string());

        // Database
        let database_url = env::var("DATABASE_URL").context("DATABASE_URL must be set")?;
        let database_max_connections = parse_or("DATABASE_MAX_CONNECTIONS", 10);

        // Redis
        let redis_url =
            env::var("REDIS_URL").unwrap_or_else(|_| "redis://redis:6379/0".to_string());
        let redis_cache_ttl_seconds = parse_or("REDIS_CACHE_TTL_SECONDS", 30);

        // CORS
        let cors_allow_origins = env::var("CORS_ALLOW_ORIGINS")
            .unwrap_or_else(|_| "http://localhost:3000".to_string())
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        // Auth
        let jwt_secret = env::var("JWT_SECRET").context("JWT_SECRET must be set")?;
        let jwt_issuer = env::var("JWT_ISSUER").ok().filter(|s| !s.is_empty());

        // Ledger
        let rpc_url = env::var("LEDGER_RPC_URL")
            .unwrap_or_else(|_| "http://127.0.0.1:7545".to_string());
        let ledger = LedgerSettings {
            mode: LedgerMode::from_str(
                &env::var("LEDGER_MODE").unwrap_or_else(|_| "rpc".to_string()),
            ),
            rpc_url: Url::parse(&rpc_url).context("LEDGER_RPC_URL is not a valid URL")?,
            deployment_file: env::var("LEDGER_DEPLOYMENT_FILE")
                .unwrap_or_else(|_| "contracts/deployment_info.json".to_string())
                .into(),
            default_sender: env::var("LEDGER_DEFAULT_SENDER")
                .ok()
                .filter(|s| !s.is_empty()),
            request_timeout: Duration::from_secs(parse_or("LEDGER_REQUEST_TIMEOUT_SECONDS", 10)),
            confirmation_timeout: Duration::from_secs(parse_or(
                "LEDGER_CONFIRMATION_TIMEOUT_SECONDS",
                60,
            )),
            poll_interval: Duration::from_millis(parse_or("LEDGER_POLL_INTERVAL_MILLIS", 500)),
            gas_limit: parse_or("LEDGER_GAS_LIMIT", 2_000_000),
        };

        let upload_dir = env::var("UPLOAD_DIR")
            .unwrap_or_else(|_| "uploads".to_string())
            .into();

        let reconcile = ReconcileSettings {
            interval: Duration::from_secs(parse_or("RECONCILE_INTERVAL_SECONDS", 0)),
            batch_size: parse_or("RECONCILE_BATCH_SIZE", 50),
            max_elapsed: Duration::from_secs(parse_or("RECONCILE_MAX_ELAPSED_SECONDS", 30)),
            settle_after: Duration::from_secs(parse_or(
                "RECONCILE_SETTLE_SECONDS",
                ledger.confirmation_timeout.as_secs() * 2,
            )),
        };

        Ok(Settings {
            env,
            server_addr,
            database_url,
            database_max_connections,
            redis_url,
            redis_cache_ttl_seconds,
            cors_allow_origins,
            jwt_secret,
            jwt_issuer,
            ledger,
            upload_dir,
            reconcile,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn environment_parsing_defaults_to_dev() {
        assert_eq!(Environment::from_str("PRODUCTION"), Environment::Prod);
        assert_eq!(Environment::from_str("staging"), Environment::Staging);
        assert_eq!(Environment::from_str("whatever"), Environment::Dev);
    }

    #[test]
    fn ledger_mode_parsing() {
        assert_eq!(LedgerMode::from_str("memory"), LedgerMode::Memory);
        assert_eq!(LedgerMode::from_str("RPC"), LedgerMode::Rpc);
        assert_eq!(LedgerMode::from_str(""), LedgerMode::Rpc);
    }
}
