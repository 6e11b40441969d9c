use std::path::PathBuf;
use std::time::Duration;

/// Application-level constants
pub const APP_NAME: &str = "ChronoScan";
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default tracing filter when RUST_LOG is not set.
pub fn default_log_filter() -> String {
    "info,chronoscan=debug".to_string()
}

/// Get the application data directory
/// ~/ChronoScan/ on all platforms (user-visible)
pub fn app_data_dir() -> PathBuf {
    let home = dirs::home_dir().expect("Cannot determine home directory");
    home.join("ChronoScan")
}

/// Default SQLite database location
pub fn default_database_path() -> PathBuf {
    app_data_dir().join("chronoscan.db")
}

/// Default root directory for stored image objects
pub fn default_storage_root() -> PathBuf {
    app_data_dir().join("objects")
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingVar(&'static str),

    #[error("Invalid value for {name}: {value}")]
    InvalidVar { name: &'static str, value: String },
}

/// Runtime settings, read once at startup and shared via the app context.
#[derive(Debug, Clone)]
pub struct Settings {
    pub bind_addr: String,
    pub database_path: PathBuf,
    pub storage_root: PathBuf,
    /// General provider (Gemini-style generateContent API).
    pub gemini_api_key: String,
    pub gemini_base_url: String,
    pub gemini_model: String,
    pub gemini_flash_model: String,
    /// Specialized provider (MedGemma-style :predict endpoint).
    pub medgemma_endpoint: String,
    pub medgemma_token: String,
    /// Timeout for processing-class calls (captioning, summaries, reports).
    pub processing_timeout: Duration,
    /// Total allowance for one conversational streaming turn.
    pub chat_timeout: Duration,
    pub retry_max: u32,
    pub retry_delay: Duration,
}

impl Settings {
    /// Build settings from the environment. Only the provider credentials
    /// are required; everything else has a default.
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            bind_addr: env_or("CHRONOSCAN_BIND_ADDR", "127.0.0.1:8787"),
            database_path: env_path_or("CHRONOSCAN_DB_PATH", default_database_path),
            storage_root: env_path_or("CHRONOSCAN_STORAGE_ROOT", default_storage_root),
            gemini_api_key: env_required("GEMINI_API_KEY")?,
            gemini_base_url: env_or(
                "GEMINI_BASE_URL",
                "https://generativelanguage.googleapis.com",
            ),
            gemini_model: env_or("GEMINI_MODEL", "gemini-2.5-pro"),
            gemini_flash_model: env_or("GEMINI_FLASH_MODEL", "gemini-2.5-flash"),
            medgemma_endpoint: env_required("MEDGEMMA_ENDPOINT")?,
            medgemma_token: env_required("MEDGEMMA_ACCESS_TOKEN")?,
            processing_timeout: Duration::from_secs(env_u64(
                "CHRONOSCAN_PROCESSING_TIMEOUT_SECS",
                300,
            )?),
            chat_timeout: Duration::from_secs(env_u64("CHRONOSCAN_CHAT_TIMEOUT_SECS", 120)?),
            retry_max: env_u64("CHRONOSCAN_RETRY_MAX", 1)? as u32,
            retry_delay: Duration::from_millis(env_u64("CHRONOSCAN_RETRY_DELAY_MS", 2000)?),
        })
    }
}

fn env_or(name: &str, default: &str) -> String {
    std::env::var(name).unwrap_or_else(|_| default.to_string())
}

fn env_path_or(name: &str, default: fn() -> PathBuf) -> PathBuf {
    std::env::var(name).map(PathBuf::from).unwrap_or_else(|_| default())
}

fn env_required(name: &'static str) -> Result<String, ConfigError> {
    std::env::var(name)
        .ok()
        .filter(|v| !v.is_empty())
        .ok_or(ConfigError::MissingVar(name))
}

fn env_u64(name: &'static str, default: u64) -> Result<u64, ConfigError> {
    match std::env::var(name) {
        Ok(raw) => raw.parse().map_err(|_| ConfigError::InvalidVar {
            name,
            value: raw.clone(),
        }),
        Err(_) => Ok(default),
    }
}
