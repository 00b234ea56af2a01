use std::env;
use std::path::PathBuf;
use std::time::Duration;

use crate::error::AppError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Compact,
    Json,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub http_port: u16,
    pub log_level: String,
    pub log_format: LogFormat,
    pub event_buffer_size: usize,
    pub tracking_seed: u64,
    pub duplicate_guard: bool,
    pub geocode_timeout: Duration,
    pub notify_timeout: Duration,
    pub geocoder_url: Option<String>,
    pub geocoder_api_key: Option<String>,
    pub geocoder_requires_key: bool,
    pub gazetteer_path: Option<PathBuf>,
    pub notify_webhook_url: Option<String>,
    pub static_dir: String,
}

impl Config {
    pub fn from_env() -> Result<Self, AppError> {
        let _ = dotenvy::dotenv();

        let log_format = match env::var("LOG_FORMAT").as_deref() {
            Ok("json") => LogFormat::Json,
            Ok("compact") | Err(_) => LogFormat::Compact,
            Ok(other) => {
                return Err(AppError::Internal(format!("invalid LOG_FORMAT: {other}")));
            }
        };

        Ok(Self {
            http_port: parse_or_default("HTTP_PORT", 3000)?,
            log_level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            log_format,
            event_buffer_size: parse_or_default("EVENT_BUFFER_SIZE", 1024)?,
            tracking_seed: parse_or_default("TRACKING_SEED", 100_000)?,
            duplicate_guard: parse_or_default("DUPLICATE_GUARD", true)?,
            geocode_timeout: Duration::from_millis(parse_or_default("GEOCODE_TIMEOUT_MS", 5_000)?),
            notify_timeout: Duration::from_millis(parse_or_default("NOTIFY_TIMEOUT_MS", 3_000)?),
            geocoder_url: optional("GEOCODER_URL"),
            geocoder_api_key: optional("GEOCODER_API_KEY"),
            geocoder_requires_key: parse_or_default("GEOCODER_REQUIRES_KEY", false)?,
            gazetteer_path: optional("GAZETTEER_PATH").map(PathBuf::from),
            notify_webhook_url: optional("NOTIFY_WEBHOOK_URL"),
            static_dir: env::var("STATIC_DIR").unwrap_or_else(|_| "static".to_string()),
        })
    }
}

fn optional(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn parse_or_default<T>(key: &str, default: T) -> Result<T, AppError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(key) {
        Ok(raw) => raw
            .parse::<T>()
            .map_err(|err| AppError::Internal(format!("invalid {key}: {err}"))),
        Err(_) => Ok(default),
    }
}
