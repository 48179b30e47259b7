use crate::error::{Error, Result};
use dotenvy::dotenv;
use std::env;
use std::sync::OnceLock;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct Config {
    pub server_address: String,
    pub database_url: String,
    pub redis_url: String,
    pub jwt_secret: String,
    pub db_max_connections: u32,
    pub log_format: String,
    pub tab_switch_limit: i32,
    pub snapshot_limit: usize,
    pub heartbeat_interval_seconds: u64,
    pub disconnect_grace_seconds: u64,
    pub submit_grace_seconds: i64,
    pub session_ttl_seconds: u64,
    pub autosave_ttl_seconds: u64,
    pub flush_interval_seconds: u64,
    pub sweep_interval_seconds: u64,
}

pub static CONFIG: OnceLock<Config> = OnceLock::new();

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenv().ok();

        Ok(Self {
            server_address: get_env("SERVER_ADDRESS")?,
            database_url: get_env("DATABASE_URL")?,
            redis_url: get_env("REDIS_URL")?,
            jwt_secret: get_env("JWT_SECRET")?,
            db_max_connections: get_env_or("DB_MAX_CONNECTIONS", 50)?,
            log_format: env::var("LOG_FORMAT").unwrap_or_else(|_| "text".to_string()),
            tab_switch_limit: get_env_or("TAB_SWITCH_LIMIT", 3)?,
            snapshot_limit: get_env_or("SNAPSHOT_LIMIT", 10)?,
            heartbeat_interval_seconds: get_env_or("HEARTBEAT_INTERVAL_SECONDS", 15)?,
            disconnect_grace_seconds: get_env_or("DISCONNECT_GRACE_SECONDS", 300)?,
            submit_grace_seconds: get_env_or("SUBMIT_GRACE_SECONDS", 120)?,
            session_ttl_seconds: get_env_or("SESSION_TTL_SECONDS", 7200)?,
            autosave_ttl_seconds: get_env_or("AUTOSAVE_TTL_SECONDS", 10800)?,
            flush_interval_seconds: get_env_or("FLUSH_INTERVAL_SECONDS", 5)?,
            sweep_interval_seconds: get_env_or("SWEEP_INTERVAL_SECONDS", 60)?,
        })
    }

    pub fn policy(&self) -> ProctoringPolicy {
        ProctoringPolicy {
            tab_switch_limit: self.tab_switch_limit,
            snapshot_limit: self.snapshot_limit.max(1),
            heartbeat_interval: Duration::from_secs(self.heartbeat_interval_seconds.max(1)),
            disconnect_grace: Duration::from_secs(self.disconnect_grace_seconds),
            submit_grace: chrono::Duration::seconds(self.submit_grace_seconds),
            session_ttl: Duration::from_secs(self.session_ttl_seconds),
            autosave_ttl: Duration::from_secs(self.autosave_ttl_seconds),
        }
    }
}

/// Tunables shared by the lifecycle, presence and autosave services.
#[derive(Debug, Clone)]
pub struct ProctoringPolicy {
    /// An attempt is terminated once its tab-switch count goes above this value.
    pub tab_switch_limit: i32,
    /// Capacity of the per-attempt snapshot ring buffer.
    pub snapshot_limit: usize,
    pub heartbeat_interval: Duration,
    /// How long a dropped connection may stay away before the attempt is auto-submitted.
    pub disconnect_grace: Duration,
    /// Allowance past the exam window end before a submission is flagged as late.
    pub submit_grace: chrono::Duration,
    pub session_ttl: Duration,
    pub autosave_ttl: Duration,
}

impl ProctoringPolicy {
    /// Read deadline for a live connection: two missed heartbeats.
    pub fn heartbeat_timeout(&self) -> Duration {
        self.heartbeat_interval * 2
    }

    /// Presence outlives a single read deadline so a slow heartbeat does not free the slot.
    pub fn presence_ttl(&self) -> Duration {
        self.heartbeat_timeout() * 2
    }
}

impl Default for ProctoringPolicy {
    fn default() -> Self {
        Self {
            tab_switch_limit: 3,
            snapshot_limit: 10,
            heartbeat_interval: Duration::from_secs(15),
            disconnect_grace: Duration::from_secs(300),
            submit_grace: chrono::Duration::minutes(2),
            session_ttl: Duration::from_secs(2 * 60 * 60),
            autosave_ttl: Duration::from_secs(3 * 60 * 60),
        }
    }
}

fn get_env(name: &str) -> Result<String> {
    env::var(name).map_err(|_| Error::Config(format!("Missing environment variable: {}", name)))
}

fn get_env_or<T>(name: &str, default: T) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(name) {
        Ok(raw) => raw
            .parse()
            .map_err(|e| Error::Config(format!("Invalid value for {}: {}", name, e))),
        Err(_) => Ok(default),
    }
}

pub fn init_config() -> Result<()> {
    let config = Config::from_env()?;
    CONFIG
        .set(config)
        .map_err(|_| Error::Config("Configuration has already been initialized".to_string()))?;
    Ok(())
}

pub fn get_config() -> &'static Config {
    CONFIG
        .get()
        .expect("Configuration has not been initialized")
}
