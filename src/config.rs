use anyhow::{Context, Result};
use clap::Parser;
use std::{env, str::FromStr, time::Duration};

use crate::{models::ids::OwnerId, services::attributes::DEFAULT_ATTRIBUTE_PREFIX};

/// Centralized application configuration.
/// Combines environment variables and CLI arguments.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub storage_dir: String,
    pub database_url: String,
    pub owner_id: OwnerId,
    pub connections: usize,
    pub max_leases: usize,
    pub lease_timeout: Duration,
    pub session_lifetime: Duration,
    pub max_object_size: u64,
    pub default_timestamp: bool,
    pub attribute_prefix: String,
    pub attribute_deny: Vec<String>,
}

/// Command-line + environment configuration.
#[derive(Parser, Debug, Default)]
#[command(author, version, about = "Multipart upload gateway for content-addressed object storage")]
pub struct Args {
    /// Host to bind to (overrides UPLOAD_GW_HOST)
    #[arg(long)]
    pub host: Option<String>,

    /// Port to bind to (overrides UPLOAD_GW_PORT)
    #[arg(long)]
    pub port: Option<u16>,

    /// Directory where object payloads are stored (overrides UPLOAD_GW_STORAGE_DIR)
    #[arg(long)]
    pub storage_dir: Option<String>,

    /// Metadata database URL (overrides UPLOAD_GW_DATABASE_URL)
    #[arg(long)]
    pub database_url: Option<String>,

    /// Owner identity used for uploads without a bearer token (overrides UPLOAD_GW_OWNER_ID)
    #[arg(long)]
    pub owner_id: Option<String>,

    /// Number of pooled storage connections (overrides UPLOAD_GW_CONNECTIONS)
    #[arg(long)]
    pub connections: Option<usize>,

    /// Maximum number of concurrent leases (overrides UPLOAD_GW_MAX_LEASES)
    #[arg(long)]
    pub max_leases: Option<usize>,

    /// Seconds to wait for a pooled connection (overrides UPLOAD_GW_LEASE_TIMEOUT)
    #[arg(long)]
    pub lease_timeout: Option<u64>,

    /// Session token lifetime in seconds (overrides UPLOAD_GW_SESSION_LIFETIME)
    #[arg(long)]
    pub session_lifetime: Option<u64>,

    /// Largest accepted payload in bytes (overrides UPLOAD_GW_MAX_OBJECT_SIZE)
    #[arg(long)]
    pub max_object_size: Option<u64>,

    /// Add a Timestamp attribute when the request has none (overrides UPLOAD_GW_DEFAULT_TIMESTAMP)
    #[arg(long)]
    pub default_timestamp: bool,

    /// Header prefix marking object attributes (overrides UPLOAD_GW_ATTRIBUTE_PREFIX)
    #[arg(long)]
    pub attribute_prefix: Option<String>,

    /// Comma-separated attribute keys to drop (overrides UPLOAD_GW_ATTRIBUTE_DENY)
    #[arg(long)]
    pub attribute_deny: Option<String>,

    /// Run migrations and exit
    #[arg(long)]
    pub migrate: bool,
}

fn env_parse<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match lookup(key) {
        Some(value) => value
            .trim()
            .parse::<T>()
            .with_context(|| format!("parsing {} value `{}`", key, value)),
        None => Ok(default),
    }
}

fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

impl AppConfig {
    /// Parse environment variables + CLI args into AppConfig and migrate flag.
    pub fn from_env_and_args() -> Result<(Self, bool)> {
        let args = Args::parse();
        let migrate = args.migrate;
        let cfg = Self::resolve(args, |key| env::var(key).ok())?;
        Ok((cfg, migrate))
    }

    /// Merge CLI arguments over values from `lookup`, then defaults.
    pub fn resolve(args: Args, lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        // --- Environment fallback ---
        let env_host = lookup("UPLOAD_GW_HOST").unwrap_or_else(|| "0.0.0.0".into());
        let env_port = env_parse(&lookup, "UPLOAD_GW_PORT", 8082u16)?;
        let env_storage =
            lookup("UPLOAD_GW_STORAGE_DIR").unwrap_or_else(|| "./data/objects".into());
        let env_db = lookup("UPLOAD_GW_DATABASE_URL")
            .unwrap_or_else(|| "sqlite://./data/meta/upload_gateway.db".into());
        let env_owner = lookup("UPLOAD_GW_OWNER_ID").unwrap_or_else(|| "gateway".into());
        let env_connections = env_parse(&lookup, "UPLOAD_GW_CONNECTIONS", 4usize)?;
        let env_max_leases = env_parse(&lookup, "UPLOAD_GW_MAX_LEASES", 64usize)?;
        let env_lease_timeout = env_parse(&lookup, "UPLOAD_GW_LEASE_TIMEOUT", 5u64)?;
        let env_session = env_parse(&lookup, "UPLOAD_GW_SESSION_LIFETIME", 60u64)?;
        let env_max_size = env_parse(&lookup, "UPLOAD_GW_MAX_OBJECT_SIZE", 4u64 << 30)?;
        let env_timestamp = env_parse(&lookup, "UPLOAD_GW_DEFAULT_TIMESTAMP", false)?;
        let env_prefix = lookup("UPLOAD_GW_ATTRIBUTE_PREFIX")
            .unwrap_or_else(|| DEFAULT_ATTRIBUTE_PREFIX.into());
        let env_deny = lookup("UPLOAD_GW_ATTRIBUTE_DENY").unwrap_or_default();

        // --- Merge ---
        let owner = args.owner_id.unwrap_or(env_owner);
        let owner_id = owner
            .parse::<OwnerId>()
            .with_context(|| format!("invalid owner id `{}`", owner))?;

        Ok(Self {
            host: args.host.unwrap_or(env_host),
            port: args.port.unwrap_or(env_port),
            storage_dir: args.storage_dir.unwrap_or(env_storage),
            database_url: args.database_url.unwrap_or(env_db),
            owner_id,
            connections: args.connections.unwrap_or(env_connections),
            max_leases: args.max_leases.unwrap_or(env_max_leases),
            lease_timeout: Duration::from_secs(args.lease_timeout.unwrap_or(env_lease_timeout)),
            session_lifetime: Duration::from_secs(args.session_lifetime.unwrap_or(env_session)),
            max_object_size: args.max_object_size.unwrap_or(env_max_size),
            default_timestamp: args.default_timestamp || env_timestamp,
            attribute_prefix: args.attribute_prefix.unwrap_or(env_prefix),
            attribute_deny: split_list(&args.attribute_deny.unwrap_or(env_deny)),
        })
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
