//! services/api/src/config.rs
//!
//! Defines the application's configuration structure and loading logic.
//!
//! All configuration is loaded from environment variables at startup. The `.env`
//! file is used for local development.

use course_catalog_core::mutation::DEFAULT_MAX_UPLOAD_BYTES;
use course_catalog_core::Group;
use std::net::SocketAddr;
use std::path::PathBuf;
use tracing::Level;

/// A custom error type for configuration loading failures.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing the environment variable {0}")]
    MissingVar(String),
    #[error("Invalid value for the environment variable {0}: {1}")]
    InvalidValue(String, String),
}

/// Where lesson metadata lives.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StoreBackend {
    Postgres,
    Memory,
}

/// How an administrator credential was supplied.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AdminCredential {
    /// An argon2 PHC string.
    Hash(String),
    /// A plain password, hashed once at startup.
    Password(String),
}

/// Holds all configuration loaded from the environment at startup.
#[derive(Clone, Debug)]
pub struct Config {
    pub bind_address: SocketAddr,
    pub log_level: Level,
    pub store_backend: StoreBackend,
    pub database_url: Option<String>,
    pub blob_root: PathBuf,
    pub public_base_url: String,
    pub session_file: PathBuf,
    pub catalog_path: Option<PathBuf>,
    pub max_upload_bytes: u64,
    /// Empty when no credential is configured; the built-in ones are used then.
    pub admin_credentials: Vec<(Group, AdminCredential)>,
    pub pdfium_library_path: Option<PathBuf>,
    pub thumbnail_cache_capacity: usize,
    pub cors_origin: String,
    /// Marks the session cookie `Secure`; on when the public URL is HTTPS.
    pub secure_cookies: bool,
}

impl Config {
    /// Loads configuration from environment variables.
    ///
    /// It will look for a `.env` file in the current directory for development,
    /// but this is skipped in test environments to ensure tests are hermetic.
    pub fn from_env() -> Result<Self, ConfigError> {
        // Only load from .env in non-test mode to avoid contamination.
        if !cfg!(test) {
            dotenvy::dotenv().ok();
        }
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the configuration from any key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        // --- Server Settings ---
        let bind_address_str =
            lookup("BIND_ADDRESS").unwrap_or_else(|| "127.0.0.1:3000".to_string());
        let bind_address = bind_address_str.parse::<SocketAddr>().map_err(|e| {
            ConfigError::InvalidValue("BIND_ADDRESS".to_string(), e.to_string())
        })?;

        let log_level_str = lookup("RUST_LOG").unwrap_or_else(|| "INFO".to_string());
        let log_level = log_level_str.parse::<Level>().map_err(|_| {
            ConfigError::InvalidValue(
                "RUST_LOG".to_string(),
                format!("'{}' is not a valid log level", log_level_str),
            )
        })?;

        // --- Storage Settings ---
        let store_backend = match lookup("STORE_BACKEND")
            .unwrap_or_else(|| "postgres".to_string())
            .to_lowercase()
            .as_str()
        {
            "postgres" => StoreBackend::Postgres,
            "memory" => StoreBackend::Memory,
            other => {
                return Err(ConfigError::InvalidValue(
                    "STORE_BACKEND".to_string(),
                    format!("'{}' is not one of postgres, memory", other),
                ))
            }
        };

        let database_url = lookup("DATABASE_URL");
        if store_backend == StoreBackend::Postgres && database_url.is_none() {
            return Err(ConfigError::MissingVar("DATABASE_URL".to_string()));
        }

        let blob_root = lookup("BLOB_ROOT")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("./data/blobs"));
        let public_base_url = lookup("PUBLIC_BASE_URL")
            .unwrap_or_else(|| format!("http://{}", bind_address))
            .trim_end_matches('/')
            .to_string();
        let session_file = lookup("SESSION_FILE")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("./data/session.json"));
        let catalog_path = lookup("CATALOG_PATH").map(PathBuf::from);

        // --- Upload and Credential Settings ---
        let max_upload_bytes = parse_number(&lookup, "MAX_UPLOAD_BYTES", DEFAULT_MAX_UPLOAD_BYTES)?;
        if max_upload_bytes == 0 {
            return Err(ConfigError::InvalidValue(
                "MAX_UPLOAD_BYTES".to_string(),
                "must be greater than zero".to_string(),
            ));
        }

        let mut admin_credentials = Vec::new();
        for group in Group::ALL {
            if let Some(hash) = lookup(&format!("ADMIN_PASSWORD_HASH_{}", group)) {
                admin_credentials.push((group, AdminCredential::Hash(hash)));
            } else if let Some(password) = lookup(&format!("ADMIN_PASSWORD_{}", group)) {
                admin_credentials.push((group, AdminCredential::Password(password)));
            }
        }

        // --- Thumbnail and Web Settings ---
        let pdfium_library_path = lookup("PDFIUM_LIBRARY_PATH").map(PathBuf::from);
        let thumbnail_cache_capacity = parse_number(&lookup, "THUMBNAIL_CACHE_CAPACITY", 0usize)?;
        let cors_origin =
            lookup("CORS_ORIGIN").unwrap_or_else(|| "http://localhost:5173".to_string());
        let secure_cookies = public_base_url.starts_with("https://");

        Ok(Self {
            bind_address,
            log_level,
            store_backend,
            database_url,
            blob_root,
            public_base_url,
            session_file,
            catalog_path,
            max_upload_bytes,
            admin_credentials,
            pdfium_library_path,
            thumbnail_cache_capacity,
            cors_origin,
            secure_cookies,
        })
    }
}

fn parse_number<F, T>(lookup: &F, key: &str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map_err(|e| ConfigError::InvalidValue(key.to_string(), e.to_string())),
        None => Ok(default),
    }
}
