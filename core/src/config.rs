use std::path::PathBuf;
use std::time::Duration;

use crate::error::{ServingError, ServingResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServingMode {
    /// Requests are persisted as `pending` and scored by the background worker.
    Deferred,
    /// Requests are scored on the request path and persisted already completed.
    Inline,
}

impl ServingMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ServingMode::Deferred => "deferred",
            ServingMode::Inline => "inline",
        }
    }
}

#[derive(Debug, Clone)]
pub struct ServingConfig {
    pub test_mode: bool,
    pub database_url: Option<String>,
    pub api_addr: String,
    pub cors_origin: String,
    pub artifacts_dir: PathBuf,
    pub builtin_models: bool,
    pub default_model: String,
    pub mode: ServingMode,
    pub poll_interval: Duration,
    pub batch_size: u64,
    pub inference_timeout: Duration,
    pub inference_concurrency: usize,
    pub db_max_connections: u32,
    pub db_min_connections: u32,
    pub db_acquire_timeout: Duration,
}

impl ServingConfig {
    pub fn from_env() -> ServingResult<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the configuration from any key lookup; `from_env` passes the process environment.
    pub fn from_lookup<F>(lookup: F) -> ServingResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let test_mode = lookup("ENV")
            .map(|value| value.trim().eq_ignore_ascii_case("test"))
            .unwrap_or(false);

        let database_url = lookup("DATABASE_URL")
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty());
        if database_url.is_none() && !test_mode {
            return Err(ServingError::config(
                "DATABASE_URL is required (set ENV=test for the in-memory ledger)",
            ));
        }

        let api_addr = lookup("SERVING_API_ADDR")
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
            .unwrap_or_else(|| "127.0.0.1:8000".to_string());
        let cors_origin = lookup("SERVING_CORS_ORIGIN").unwrap_or_else(|| {
            "http://localhost:8501,http://127.0.0.1:8501".to_string()
        });
        let artifacts_dir = lookup("SERVING_ARTIFACTS_DIR")
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
            .map(PathBuf::from)
            .unwrap_or_else(default_artifacts_dir);
        let builtin_models = parse_bool(lookup("SERVING_BUILTIN_MODELS"), test_mode);
        let default_model = lookup("SERVING_DEFAULT_MODEL")
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
            .unwrap_or_else(|| "random_forest_e04".to_string());
        let mode = normalize_mode(lookup("SERVING_MODE").as_deref());

        let poll_interval_ms = lookup("SERVING_POLL_INTERVAL_MS")
            .and_then(|value| value.trim().parse::<u64>().ok())
            .map(clamp_poll_interval)
            .unwrap_or(5000);
        let batch_size = lookup("SERVING_BATCH_SIZE")
            .and_then(|value| value.trim().parse::<u64>().ok())
            .map(clamp_batch_size)
            .unwrap_or(100);
        let inference_timeout_ms = lookup("SERVING_INFERENCE_TIMEOUT_MS")
            .and_then(|value| value.trim().parse::<u64>().ok())
            .map(clamp_inference_timeout)
            .unwrap_or(2000);
        let inference_concurrency = lookup("SERVING_INFERENCE_CONCURRENCY")
            .and_then(|value| value.trim().parse::<usize>().ok())
            .map(clamp_inference_concurrency)
            .unwrap_or(2);

        let db_max_connections = lookup("SERVING_DB_MAX_CONNECTIONS")
            .and_then(|value| value.trim().parse::<u32>().ok())
            .map(|value| value.clamp(1, 200))
            .unwrap_or(10);
        let db_min_connections = lookup("SERVING_DB_MIN_CONNECTIONS")
            .and_then(|value| value.trim().parse::<u32>().ok())
            .unwrap_or(1)
            .min(db_max_connections);
        let db_acquire_timeout_ms = lookup("SERVING_DB_ACQUIRE_TIMEOUT_MS")
            .and_then(|value| value.trim().parse::<u64>().ok())
            .map(|value| value.clamp(100, 60_000))
            .unwrap_or(3000);

        Ok(ServingConfig {
            test_mode,
            database_url,
            api_addr,
            cors_origin,
            artifacts_dir,
            builtin_models,
            default_model,
            mode,
            poll_interval: Duration::from_millis(poll_interval_ms),
            batch_size,
            inference_timeout: Duration::from_millis(inference_timeout_ms),
            inference_concurrency,
            db_max_connections,
            db_min_connections,
            db_acquire_timeout: Duration::from_millis(db_acquire_timeout_ms),
        })
    }

    /// In-memory ledger, built-in models, tight worker timings.
    pub fn for_tests() -> Self {
        ServingConfig {
            test_mode: true,
            database_url: None,
            api_addr: "127.0.0.1:0".to_string(),
            cors_origin: "*".to_string(),
            artifacts_dir: default_artifacts_dir(),
            builtin_models: true,
            default_model: "random_forest_e04".to_string(),
            mode: ServingMode::Deferred,
            poll_interval: Duration::from_millis(100),
            batch_size: 100,
            inference_timeout: Duration::from_millis(2000),
            inference_concurrency: 2,
            db_max_connections: 5,
            db_min_connections: 1,
            db_acquire_timeout: Duration::from_millis(3000),
        }
    }

    pub fn inference_timeout_ms(&self) -> u64 {
        self.inference_timeout.as_millis() as u64
    }
}

fn parse_bool(value: Option<String>, default: bool) -> bool {
    value
        .map(|value| matches!(value.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes"))
        .unwrap_or(default)
}

fn normalize_mode(value: Option<&str>) -> ServingMode {
    let mode = value.unwrap_or("deferred").trim().to_ascii_lowercase();
    if mode == "inline" {
        ServingMode::Inline
    } else {
        ServingMode::Deferred
    }
}

fn default_artifacts_dir() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("artifacts")
}

fn clamp_poll_interval(value: u64) -> u64 {
    let normalized = if value < 100 { 100 } else { value };
    normalized.min(600_000)
}

fn clamp_batch_size(value: u64) -> u64 {
    let normalized = if value < 1 { 1 } else { value };
    normalized.min(1000)
}

fn clamp_inference_timeout(value: u64) -> u64 {
    let normalized = if value < 10 { 10 } else { value };
    normalized.min(60_000)
}

fn clamp_inference_concurrency(value: usize) -> usize {
    let normalized = if value < 1 { 1 } else { value };
    normalized.min(64)
}
