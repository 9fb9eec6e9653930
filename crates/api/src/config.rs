//! Binary configuration, read from environment variables.
//!
//! | Variable             | Default                      |
//! |----------------------|------------------------------|
//! | `BIND_ADDR`          | `0.0.0.0:8080`               |
//! | `JWT_SECRET`         | insecure dev secret          |
//! | `DATABASE_URL`       | unset: in-memory job store   |
//! | `WORKER_COUNT`       | 4                            |
//! | `POLL_INTERVAL_MS`   | 250                          |
//! | `ARTIFACT_DIR`       | `/tmp/kitchenline-artifacts` |
//! | `MAX_RUN_SECS`       | 1800                         |
//! | `RECONSTRUCTION_URL` | unset: ar-generate disabled  |
//! | `MEDIA_BASE_URL`     | unset: ar-generate disabled  |
//! | `SEARCH_API_URL`     | unset: no website discovery  |
//! | `SEARCH_API_KEY`     | empty                        |
//! | `ENHANCER_URL`       | unset: images kept as-is     |
//! | `EXTRACTOR_URL`      | unset: heuristic parser only |
//! | `LOG_FORMAT`         | `json`                       |

use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use kitchenline_observability::LogFormat;

pub const DEV_JWT_SECRET: &str = "dev-secret";

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{var}={value:?} is invalid: {reason}")]
    Invalid {
        var: &'static str,
        value: String,
        reason: String,
    },
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub bind_addr: SocketAddr,
    pub jwt_secret: String,
    /// Whether `jwt_secret` is the built-in development value.
    pub insecure_jwt_secret: bool,
    pub database_url: Option<String>,
    pub workers: usize,
    pub poll_interval: Duration,
    pub artifact_dir: PathBuf,
    pub max_run_time: Duration,
    pub reconstruction_url: Option<String>,
    /// Public prefix under which uploaded videos can be downloaded.
    pub media_base_url: Option<String>,
    pub search_api_url: Option<String>,
    pub search_api_key: String,
    pub enhancer_url: Option<String>,
    /// Menu structuring service; the heuristic parser remains the fallback.
    pub extractor_url: Option<String>,
    pub log_format: LogFormat,
}

fn parse<T>(var: &'static str, raw: Option<String>, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match raw {
        None => Ok(default),
        Some(value) => value.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
            var,
            reason: e.to_string(),
            value,
        }),
    }
}

fn positive(var: &'static str, raw: Option<String>, default: u64) -> Result<u64, ConfigError> {
    let value = parse(var, raw.clone(), default)?;
    if value == 0 {
        return Err(ConfigError::Invalid {
            var,
            value: raw.unwrap_or_default(),
            reason: "must be greater than zero".to_string(),
        });
    }
    Ok(value)
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary variable source. Empty values count as unset.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let jwt_secret = get("JWT_SECRET");
        let insecure_jwt_secret = jwt_secret.is_none();

        Ok(Self {
            bind_addr: parse("BIND_ADDR", get("BIND_ADDR"), SocketAddr::from(([0, 0, 0, 0], 8080)))?,
            jwt_secret: jwt_secret.unwrap_or_else(|| DEV_JWT_SECRET.to_string()),
            insecure_jwt_secret,
            database_url: get("DATABASE_URL"),
            workers: positive("WORKER_COUNT", get("WORKER_COUNT"), 4)? as usize,
            poll_interval: Duration::from_millis(positive("POLL_INTERVAL_MS", get("POLL_INTERVAL_MS"), 250)?),
            artifact_dir: get("ARTIFACT_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("/tmp/kitchenline-artifacts")),
            max_run_time: Duration::from_secs(positive("MAX_RUN_SECS", get("MAX_RUN_SECS"), 1800)?),
            reconstruction_url: get("RECONSTRUCTION_URL"),
            media_base_url: get("MEDIA_BASE_URL"),
            search_api_url: get("SEARCH_API_URL"),
            search_api_key: get("SEARCH_API_KEY").unwrap_or_default(),
            enhancer_url: get("ENHANCER_URL"),
            extractor_url: get("EXTRACTOR_URL"),
            log_format: parse("LOG_FORMAT", get("LOG_FORMAT"), LogFormat::default())?,
        })
    }

    /// ar-generate needs both a reconstruction service and a place it can
    /// download videos from.
    pub fn ar_generate_enabled(&self) -> bool {
        self.reconstruction_url.is_some() && self.media_base_url.is_some()
    }
}
