use std::env;
use std::fmt::Display;
use std::net::{IpAddr, SocketAddr};
use std::str::FromStr;
use std::time::Duration;

use lockwarden_application::LockConfiguration;
use lockwarden_core::AppError;
use lockwarden_infrastructure::RedisSupervisorSettings;
use tracing_subscriber::EnvFilter;
use url::Url;

/// Redis quorum settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RedisStorageConfig {
    pub urls: Vec<String>,
    pub key_prefix: String,
    pub supervisor: RedisSupervisorSettings,
}

/// Where lock records are stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LockStorageBackend {
    Redis(RedisStorageConfig),
    Memory,
}

#[derive(Debug, Clone)]
pub struct ApiConfig {
    pub api_host: String,
    pub api_port: u16,
    pub lock_configuration: LockConfiguration,
    pub storage_backend: LockStorageBackend,
}

impl ApiConfig {
    pub fn load() -> Result<Self, AppError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Builds the configuration from a variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, AppError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let api_host = lookup("API_HOST").unwrap_or_else(|| "127.0.0.1".to_owned());
        let api_port = parse_var(&lookup, "API_PORT", 3000_u16)?;

        let defaults = LockConfiguration::default();
        let lock_configuration = LockConfiguration {
            drift_factor: parse_var(&lookup, "LOCK_DRIFT_FACTOR", defaults.drift_factor)?,
            retry_count: parse_var(&lookup, "LOCK_RETRY_COUNT", defaults.retry_count)?,
            retry_delay: parse_millis(&lookup, "LOCK_RETRY_DELAY_MS", defaults.retry_delay)?,
            retry_jitter: parse_millis(&lookup, "LOCK_RETRY_JITTER_MS", defaults.retry_jitter)?,
            automatic_extension_threshold: parse_millis(
                &lookup,
                "LOCK_AUTO_EXTENSION_THRESHOLD_MS",
                defaults.automatic_extension_threshold,
            )?,
            default_ttl: parse_millis(&lookup, "LOCK_TTL_MS", defaults.default_ttl)?,
        };
        lock_configuration.validate()?;

        let storage_backend = match lookup("LOCK_STORAGE_BACKEND")
            .unwrap_or_else(|| "redis".to_owned())
            .trim()
        {
            "redis" => LockStorageBackend::Redis(redis_storage_config(&lookup)?),
            "memory" => LockStorageBackend::Memory,
            other => {
                return Err(AppError::Validation(format!(
                    "LOCK_STORAGE_BACKEND must be either 'redis' or 'memory', got '{other}'"
                )));
            }
        };

        Ok(Self {
            api_host,
            api_port,
            lock_configuration,
            storage_backend,
        })
    }

    pub fn socket_address(&self) -> Result<SocketAddr, AppError> {
        let host = IpAddr::from_str(&self.api_host).map_err(|error| {
            AppError::Internal(format!("invalid API_HOST '{}': {error}", self.api_host))
        })?;
        Ok(SocketAddr::from((host, self.api_port)))
    }
}

pub fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .compact()
        .init();
}

fn redis_storage_config<F>(lookup: &F) -> Result<RedisStorageConfig, AppError>
where
    F: Fn(&str) -> Option<String>,
{
    let urls = match non_empty(lookup, "LOCK_REDIS_URLS") {
        Some(urls) => urls
            .split(',')
            .map(str::trim)
            .filter(|url| !url.is_empty())
            .map(str::to_owned)
            .collect(),
        None => vec![single_node_url(lookup)?],
    };

    let defaults = RedisSupervisorSettings::default();
    let supervisor = RedisSupervisorSettings {
        reconnect_delay: parse_millis(lookup, "REDIS_RECONNECT_DELAY_MS", defaults.reconnect_delay)?,
        health_check_interval: parse_millis(
            lookup,
            "REDIS_HEALTH_CHECK_INTERVAL_MS",
            defaults.health_check_interval,
        )?,
        command_timeout: parse_millis(lookup, "REDIS_COMMAND_TIMEOUT_MS", defaults.command_timeout)?,
    };

    Ok(RedisStorageConfig {
        urls,
        key_prefix: non_empty(lookup, "LOCK_KEY_PREFIX").unwrap_or_else(|| "lock".to_owned()),
        supervisor,
    })
}

fn single_node_url<F>(lookup: &F) -> Result<String, AppError>
where
    F: Fn(&str) -> Option<String>,
{
    let host = non_empty(lookup, "REDIS_HOST").ok_or_else(|| {
        AppError::Validation("LOCK_REDIS_URLS or REDIS_HOST is required".to_owned())
    })?;
    let host = host.trim();
    let port = parse_var(lookup, "REDIS_PORT", 6379_u16)?;
    let tls = parse_var(lookup, "REDIS_TLS", false)?;

    // The redis client verifies the certificate against the host it dials.
    if let Some(server_name) = non_empty(lookup, "REDIS_SERVER_NAME")
        && !server_name.trim().eq_ignore_ascii_case(host)
    {
        return Err(AppError::Validation(format!(
            "REDIS_SERVER_NAME '{}' must name the dialled host '{host}'; set REDIS_HOST to the certificate name",
            server_name.trim()
        )));
    }

    let scheme = if tls { "rediss" } else { "redis" };
    let mut url = Url::parse(&format!("{scheme}://{host}:{port}/"))
        .map_err(|error| AppError::Validation(format!("invalid REDIS_HOST '{host}': {error}")))?;
    if let Some(password) = lookup("REDIS_PASSWORD").filter(|password| !password.is_empty()) {
        url.set_password(Some(&password)).map_err(|()| {
            AppError::Validation(format!("REDIS_PASSWORD cannot be set for host '{host}'"))
        })?;
    }

    Ok(url.into())
}

fn non_empty<F>(lookup: &F, name: &str) -> Option<String>
where
    F: Fn(&str) -> Option<String>,
{
    lookup(name).filter(|value| !value.trim().is_empty())
}

fn parse_var<F, T>(lookup: &F, name: &str, default: T) -> Result<T, AppError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: Display,
{
    match non_empty(lookup, name) {
        Some(value) => value
            .trim()
            .parse::<T>()
            .map_err(|error| AppError::Validation(format!("invalid {name}: {error}"))),
        None => Ok(default),
    }
}

fn parse_millis<F>(lookup: &F, name: &str, default: Duration) -> Result<Duration, AppError>
where
    F: Fn(&str) -> Option<String>,
{
    match non_empty(lookup, name) {
        Some(_) => parse_var(lookup, name, 0_u64).map(Duration::from_millis),
        None => Ok(default),
    }
}
