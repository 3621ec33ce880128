//! Core library for vaultenv.
//!
//! Turns ambient GCP identity into a short-lived secret store token, loads
//! pipeline secrets with it into the environment or an env file, and revokes
//! the token afterwards.
//!
//! ```no_run
//! # async fn run() -> vaultenv_core::Result<()> {
//! use vaultenv_core::{AuthSession, SessionConfig};
//!
//! let config = SessionConfig::from_env()?;
//! let mut session = AuthSession::new(config)?;
//! session.login_default().await?;
//! session.load_configured_secrets().await?;
//! session.logout().await?;
//! # Ok(())
//! # }
//! ```

pub mod api;
pub mod auth;
pub mod config;
pub mod error;
pub mod models;
pub mod session;
pub mod sink;

pub use api::VaultClient;
pub use auth::{BaseCredential, ClaimSet, CredentialSource, GcpCredentialSource, SignedAssertion};
pub use config::{OutputMode, SessionConfig};
pub use error::{Error, Result};
pub use models::{DatabaseCredentials, SecretEntry, SessionToken};
pub use session::{AuthSession, LoadRequest, LoadSummary, DB_PASSWORD_KEY, DB_USERNAME_KEY};
pub use sink::SecretSink;

// Callers need these to use `AuthSession::request` and inspect errors.
pub use reqwest::{Method, StatusCode};
