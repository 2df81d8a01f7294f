use crate::health::HealthCheckSettings;
use crate::load_balancer::{Strategy, UnknownStrategy};
use std::env;
use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("at least one backend must be specified (BACKENDS)")]
    NoBackends,
    #[error("invalid backend URL {url}: {reason}")]
    InvalidBackend { url: String, reason: String },
    #[error(transparent)]
    UnknownStrategy(#[from] UnknownStrategy),
    #[error("{name} must be a valid duration (e.g. 10s, 1m, 2m30s): {source}")]
    InvalidDuration {
        name: &'static str,
        #[source]
        source: humantime::DurationError,
    },
    #[error("{0} must be positive")]
    NonPositiveDuration(&'static str),
    #[error("PORT must be a valid number")]
    InvalidPort,
    #[error("HEALTH_CHECK_PATH must start with '/': {0}")]
    InvalidHealthPath(String),
}

#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub backends: Vec<String>,
    pub strategy: Strategy,
    pub health_check: HealthCheckSettings,
    pub proxy_timeout: Duration,
    pub shutdown_grace_period: Duration,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Construye y valida la configuración desde cualquier fuente de variables.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        // Parsea los backends desde un string separado por comas
        let backends = lookup("BACKENDS")
            .map(|list| {
                list.split(',')
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect::<Vec<String>>()
            })
            .unwrap_or_default();

        if backends.is_empty() {
            return Err(ConfigError::NoBackends);
        }

        let backends = backends
            .iter()
            .map(|url| normalize_backend(url))
            .collect::<Result<Vec<_>, _>>()?;

        let strategy = lookup("LOAD_BALANCER_STRATEGY")
            .unwrap_or_else(|| "round-robin".to_string())
            .parse::<Strategy>()?;

        let port = lookup("PORT")
            .unwrap_or_else(|| "8080".to_string())
            .trim()
            .parse::<u16>()
            .map_err(|_| ConfigError::InvalidPort)?;

        let path = lookup("HEALTH_CHECK_PATH").unwrap_or_else(|| "/health".to_string());
        if !path.starts_with('/') {
            return Err(ConfigError::InvalidHealthPath(path));
        }

        let health_check = HealthCheckSettings {
            interval: duration(&lookup, "HEALTH_CHECK_INTERVAL", "30s")?,
            timeout: duration(&lookup, "HEALTH_CHECK_TIMEOUT", "5s")?,
            path,
        };

        Ok(Config {
            port,
            backends,
            strategy,
            health_check,
            proxy_timeout: duration(&lookup, "PROXY_TIMEOUT", "30s")?,
            shutdown_grace_period: duration(&lookup, "SHUTDOWN_GRACE_PERIOD", "30s")?,
        })
    }
}

fn duration<F>(lookup: &F, name: &'static str, default: &str) -> Result<Duration, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let raw = lookup(name).unwrap_or_else(|| default.to_string());
    let value = humantime::parse_duration(raw.trim())
        .map_err(|source| ConfigError::InvalidDuration { name, source })?;

    if value.is_zero() {
        return Err(ConfigError::NonPositiveDuration(name));
    }
    Ok(value)
}

/// Acepta URLs http(s) absolutas con host; quita la barra final.
fn normalize_backend(raw: &str) -> Result<String, ConfigError> {
    let invalid = |reason: &str| ConfigError::InvalidBackend {
        url: raw.to_string(),
        reason: reason.to_string(),
    };

    let url = reqwest::Url::parse(raw).map_err(|e| invalid(&e.to_string()))?;

    if !matches!(url.scheme(), "http" | "https") {
        return Err(invalid("scheme must be http or https"));
    }
    if url.host_str().is_none() {
        return Err(invalid("missing host"));
    }
    if url.query().is_some() || url.fragment().is_some() {
        return Err(invalid("query and fragment are not allowed"));
    }

    Ok(url.as_str().trim_end_matches('/').to_string())
}
