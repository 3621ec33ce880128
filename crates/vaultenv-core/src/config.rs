//! Session configuration.
//!
//! All inputs are resolved once, either from the process environment via
//! [`SessionConfig::from_env`] or built explicitly, and then handed to
//! [`crate::AuthSession::new`]. Nothing here is read lazily later on.

use std::path::PathBuf;
use std::time::Duration;

use crate::error::{Error, Result};

/// Role used for the assertion audience and the store login
pub const DEFAULT_CLIENT_ROLE: &str = "cloud_builder";

/// Namespace under `secret/` holding pipeline secrets
pub const DEFAULT_APP_ROLE: &str = "kapwing_processor";

/// Destination when secrets are written to a file
pub const DEFAULT_OUTPUT_FILE: &str = "/workspace/.ci.env";

/// Prefix of the assertion audience, joined with the client role
pub const DEFAULT_AUDIENCE_BASE: &str = "http://vault";

/// Host of the IAM credentials API (signJwt)
pub const DEFAULT_IAM_BASE_URL: &str = "https://iamcredentials.googleapis.com";

/// Where `load_secrets` sends each `KEY=VALUE` pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutputMode {
    /// Set into the current process environment
    Env,
    /// Write `KEY=VALUE` lines to a file
    File(PathBuf),
}

impl OutputMode {
    /// Parse the `SECRET_OUTPUT` value. `file_path` is used for `"file"`.
    pub fn parse(mode: &str, file_path: impl Into<PathBuf>) -> Result<Self> {
        match mode.trim().to_ascii_lowercase().as_str() {
            "env" => Ok(OutputMode::Env),
            "file" => Ok(OutputMode::File(file_path.into())),
            other => Err(Error::Config(format!(
                "unknown secret output mode '{}' (expected 'env' or 'file')",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub vault_addr: String,
    pub client_role: String,
    pub app_role: String,
    /// Role whose `kv/data/{db_role}/mongodb` entry is loaded. `None` skips it.
    pub db_role: Option<String>,
    pub service_account_email: Option<String>,
    pub output: OutputMode,
    pub audience_base: String,
    pub iam_base_url: String,
    pub request_timeout: Option<Duration>,
}

impl SessionConfig {
    /// Config with defaults for everything but the store address.
    pub fn new(vault_addr: impl Into<String>) -> Self {
        Self {
            vault_addr: trim_base_url(vault_addr.into()),
            client_role: DEFAULT_CLIENT_ROLE.to_string(),
            app_role: DEFAULT_APP_ROLE.to_string(),
            db_role: Some(DEFAULT_CLIENT_ROLE.to_string()),
            service_account_email: None,
            output: OutputMode::Env,
            audience_base: DEFAULT_AUDIENCE_BASE.to_string(),
            iam_base_url: DEFAULT_IAM_BASE_URL.to_string(),
            request_timeout: None,
        }
    }

    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary variable lookup.
    ///
    /// `DB_ROLE` falls back to the client role when unset; an empty value
    /// disables the database credential fetch.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let vault_addr = lookup("VAULT_ADDR")
            .filter(|v| !v.trim().is_empty())
            .ok_or_else(|| Error::Config("VAULT_ADDR is required".to_string()))?;

        let mut config = Self::new(vault_addr);

        if let Some(role) = non_empty(lookup("CLIENT_ROLE")) {
            config.client_role = role;
        }
        if let Some(role) = non_empty(lookup("APP_ROLE")) {
            config.app_role = role;
        }
        config.db_role = match lookup("DB_ROLE") {
            Some(role) if role.trim().is_empty() => None,
            Some(role) => Some(role),
            None => Some(config.client_role.clone()),
        };
        config.service_account_email = non_empty(lookup("SERVICE_ACCOUNT_EMAIL"));

        let output_file =
            non_empty(lookup("SECRET_OUTPUT_FILE")).unwrap_or_else(|| DEFAULT_OUTPUT_FILE.to_string());
        config.output = match non_empty(lookup("SECRET_OUTPUT")) {
            Some(mode) => OutputMode::parse(&mode, output_file)?,
            None => OutputMode::Env,
        };

        if let Some(base) = non_empty(lookup("VAULT_AUDIENCE_BASE")) {
            config.audience_base = trim_base_url(base);
        }
        if let Some(url) = non_empty(lookup("IAM_CREDENTIALS_URL")) {
            config.iam_base_url = trim_base_url(url);
        }
        if let Some(secs) = non_empty(lookup("VAULT_REQUEST_TIMEOUT_SECS")) {
            let secs: u64 = secs.trim().parse().map_err(|_| {
                Error::Config(format!("VAULT_REQUEST_TIMEOUT_SECS must be an integer, got '{}'", secs))
            })?;
            config.request_timeout = Some(Duration::from_secs(secs));
        }

        Ok(config)
    }

    /// Assertion audience: `{audience_base}/{client_role}`
    pub fn audience(&self) -> String {
        format!("{}/{}", self.audience_base, self.client_role)
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

pub(crate) fn trim_base_url(url: String) -> String {
    url.trim().trim_end_matches('/').to_string()
}
