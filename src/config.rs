// Client configuration
use std::path::PathBuf;

use thiserror::Error;

use crate::token::TokenVerification;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid value for {name}: {value}")]
    InvalidValue { name: &'static str, value: String },

    #[error("Missing base url")]
    MissingBaseUrl,
}

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub base_url: String,
    pub timeout_ms: u64,
    // Shared HS256 secret. `None` trusts backend tokens opaquely.
    pub jwt_secret: Option<String>,
    // Seconds before `exp` at which an access token already counts as stale.
    pub token_expiry_leeway_secs: i64,
    // Where the signed-in session is persisted between runs, if anywhere.
    pub session_file: Option<PathBuf>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8080".to_string(),
            timeout_ms: 30_000,
            jwt_secret: None,
            token_expiry_leeway_secs: 0,
            session_file: None,
        }
    }
}

impl ClientConfig {
    // Defaults overridden by `RENTAL_*` and `JWT_SECRET` environment
    // variables, after loading a `.env` file if one exists.
    pub fn from_env() -> Result<Self, ConfigError> {
        let _ = dotenvy::dotenv();
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut cfg = Self::default();

        if let Some(url) = lookup("RENTAL_API_BASE_URL") {
            if url.trim().is_empty() {
                return Err(ConfigError::MissingBaseUrl);
            }
            cfg.base_url = url.trim_end_matches('/').to_string();
        }
        if let Some(val) = lookup("RENTAL_HTTP_TIMEOUT_MS") {
            cfg.timeout_ms = val.parse().map_err(|_| ConfigError::InvalidValue {
                name: "RENTAL_HTTP_TIMEOUT_MS",
                value: val.clone(),
            })?;
        }
        if let Some(secret) = lookup("JWT_SECRET") {
            if !secret.is_empty() {
                cfg.jwt_secret = Some(secret);
            }
        }
        if let Some(val) = lookup("RENTAL_TOKEN_EXPIRY_LEEWAY_SECS") {
            cfg.token_expiry_leeway_secs = val.parse().map_err(|_| ConfigError::InvalidValue {
                name: "RENTAL_TOKEN_EXPIRY_LEEWAY_SECS",
                value: val.clone(),
            })?;
        }
        if let Some(path) = lookup("RENTAL_SESSION_FILE") {
            cfg.session_file = Some(PathBuf::from(path));
        }

        Ok(cfg)
    }

    pub fn token_verification(&self) -> TokenVerification {
        match &self.jwt_secret {
            Some(secret) => TokenVerification::SharedSecret(secret.clone()),
            None => TokenVerification::Opaque,
        }
    }
}
