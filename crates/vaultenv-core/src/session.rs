//! The credential-exchange session.
//!
//! An `AuthSession` walks the trust chain in order:
//! ambient credential -> signed assertion -> store token -> secret reads ->
//! revocation. The credential and assertion are derived on first use and
//! cached for the life of the session; a new session is the only way to
//! re-derive them.

use reqwest::{Client, Method, StatusCode};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::api::VaultClient;
use crate::auth::{
    AssertionSigner, BaseCredential, ClaimSet, CredentialSource, GcpCredentialSource, SignedAssertion,
    CLOUD_PLATFORM_SCOPE,
};
use crate::config::{OutputMode, SessionConfig};
use crate::error::{Error, Result};
use crate::models::SessionToken;
use crate::sink::SecretSink;

/// Env names the database credential pair is emitted under
pub const DB_USERNAME_KEY: &str = "MONGODB_USERNAME";
pub const DB_PASSWORD_KEY: &str = "MONGODB_PASSWORD";

/// Parameters of one `load_secrets` call.
#[derive(Debug, Clone)]
pub struct LoadRequest {
    pub app_role: String,
    pub db_role: Option<String>,
    pub output: OutputMode,
}

impl LoadRequest {
    pub fn from_config(config: &SessionConfig) -> Self {
        Self {
            app_role: config.app_role.clone(),
            db_role: config.db_role.clone(),
            output: config.output.clone(),
        }
    }
}

/// Number of pairs written by `load_secrets`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LoadSummary {
    pub keys: usize,
    pub entries: usize,
}

pub struct AuthSession {
    config: SessionConfig,
    credential_source: Box<dyn CredentialSource>,
    signer: AssertionSigner,
    vault: VaultClient,
    principal: Option<String>,
    credential: Option<BaseCredential>,
    assertion: Option<SignedAssertion>,
    token: Option<SessionToken>,
}

impl AuthSession {
    /// Session backed by GCP Application Default Credentials.
    pub fn new(config: SessionConfig) -> Result<Self> {
        let client = Self::http_client(&config)?;
        let source = GcpCredentialSource::new(client.clone());
        Ok(Self::with_parts(config, client, Box::new(source)))
    }

    /// Session using a caller-provided identity source.
    pub fn with_credential_source(config: SessionConfig, source: Box<dyn CredentialSource>) -> Result<Self> {
        let client = Self::http_client(&config)?;
        Ok(Self::with_parts(config, client, source))
    }

    fn with_parts(config: SessionConfig, client: Client, credential_source: Box<dyn CredentialSource>) -> Self {
        Self {
            signer: AssertionSigner::new(client.clone(), config.iam_base_url.clone()),
            vault: VaultClient::new(client, config.vault_addr.clone()),
            principal: config.service_account_email.clone(),
            config,
            credential_source,
            credential: None,
            assertion: None,
            token: None,
        }
    }

    fn http_client(config: &SessionConfig) -> Result<Client> {
        let mut builder = Client::builder();
        if let Some(timeout) = config.request_timeout {
            builder = builder.timeout(timeout);
        }
        Ok(builder.build()?)
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Service account the assertion is signed for, once known.
    pub fn principal(&self) -> Option<&str> {
        self.principal.as_deref()
    }

    /// Current store token, if logged in.
    pub fn token(&self) -> Option<&SessionToken> {
        self.token.as_ref()
    }

    // ===== Identity =====

    /// Acquire and refresh the ambient credential.
    ///
    /// Adopts the credential's service account as principal when none was
    /// configured.
    pub async fn get_credentials(&mut self) -> Result<&BaseCredential> {
        let mut credential = self.credential_source.load().await?;
        self.credential_source
            .refresh(&mut credential, CLOUD_PLATFORM_SCOPE)
            .await?;

        if self.principal.is_none() {
            if let Some(ref email) = credential.service_account_email {
                debug!(principal = %email, "Using service account from ambient credentials");
                self.principal = Some(email.clone());
            }
        }

        Ok(&*self.credential.insert(credential))
    }

    /// Cached credential, acquired on first access.
    pub async fn credentials(&mut self) -> Result<&BaseCredential> {
        if self.credential.is_none() {
            self.get_credentials().await?;
        }
        self.credential
            .as_ref()
            .ok_or_else(|| Error::Identity("credential unavailable".to_string()))
    }

    /// Sign a fresh assertion for the principal.
    pub async fn get_jwt(&mut self) -> Result<&SignedAssertion> {
        self.credentials().await?;
        let principal = self.principal.clone().ok_or_else(|| {
            Error::Identity(
                "no service account email configured and none discovered from ambient credentials"
                    .to_string(),
            )
        })?;
        let credential = self
            .credential
            .as_ref()
            .ok_or_else(|| Error::Identity("credential unavailable".to_string()))?;

        let claims = ClaimSet::issued_now(self.config.audience(), principal);
        let assertion = self.signer.sign(credential, claims).await?;
        debug!(expires_at = %assertion.expires_at(), "Obtained signed assertion");
        Ok(&*self.assertion.insert(assertion))
    }

    /// Cached assertion, signed on first access.
    ///
    /// A cached assertion past its expiry is an error; start a new session.
    pub async fn jwt(&mut self) -> Result<&SignedAssertion> {
        if self.assertion.is_none() {
            self.get_jwt().await?;
        }
        match self.assertion {
            Some(ref assertion) if assertion.is_expired() => Err(Error::AssertionExpired {
                expired_at: assertion.expires_at(),
            }),
            Some(ref assertion) => Ok(assertion),
            None => Err(Error::Identity("assertion unavailable".to_string())),
        }
    }

    // ===== Store session =====

    /// Exchange the assertion for a store token under `role`.
    ///
    /// Every call performs a fresh login; the newest token replaces the old.
    pub async fn login(&mut self, role: &str) -> Result<&SessionToken> {
        let jwt = self.jwt().await?.as_str().to_string();
        let token = self.vault.login(role, &jwt).await?;
        info!(role = %role, "Logged in to secret store");
        Ok(&*self.token.insert(token))
    }

    /// `login` with the configured client role.
    pub async fn login_default(&mut self) -> Result<&SessionToken> {
        let role = self.config.client_role.clone();
        self.login(&role).await
    }

    /// Revoke the session token at the store.
    ///
    /// The response status is logged and returned; a non-success status is
    /// not an error. Local state is left untouched.
    pub async fn logout(&self) -> Result<StatusCode> {
        let token = self.token.as_ref().ok_or(Error::NotAuthenticated)?;
        let status = self.vault.revoke_self(token.as_str()).await?;
        if status.is_success() {
            info!(status = %status, "Revoked secret store token");
        } else {
            warn!(status = %status, "Secret store token revocation was not accepted");
        }
        Ok(status)
    }

    fn resolve_token<'a>(&'a self, token: Option<&'a str>) -> Result<&'a str> {
        token
            .or_else(|| self.token.as_ref().map(SessionToken::as_str))
            .ok_or(Error::NotAuthenticated)
    }

    // ===== Secret access =====

    /// Load every secret under `request.app_role`, plus the database pair
    /// when `request.db_role` is set, into the requested output.
    ///
    /// Keys are processed in listing order. Any failure aborts the load;
    /// pairs already emitted stay emitted and an opened file is closed.
    pub async fn load_secrets(&self, request: &LoadRequest, token: Option<&str>) -> Result<LoadSummary> {
        let token = self.resolve_token(token)?;
        let keys = self.vault.list_keys(&request.app_role, token).await?;
        debug!(app_role = %request.app_role, keys = keys.len(), "Listed secrets");

        let mut sink = SecretSink::open(&request.output)?;
        let mut summary = LoadSummary {
            keys: keys.len(),
            entries: 0,
        };

        for key in &keys {
            let entries = self.vault.read_secret(&request.app_role, key, token).await?;
            for entry in &entries {
                sink.emit(&entry.key, &entry.value)?;
            }
            summary.entries += entries.len();
        }

        if let Some(ref db_role) = request.db_role {
            let creds = self.vault.read_database_credentials(db_role, token).await?;
            sink.emit(DB_USERNAME_KEY, &creds.username)?;
            sink.emit(DB_PASSWORD_KEY, &creds.password)?;
            summary.entries += 2;
        }

        if let Some(path) = sink.path() {
            info!(path = %path.display(), entries = summary.entries, "Wrote secrets to file");
        } else {
            info!(entries = summary.entries, "Loaded secrets into environment");
        }
        sink.finish()?;

        Ok(summary)
    }

    /// `load_secrets` with the configured roles and output.
    pub async fn load_configured_secrets(&self) -> Result<LoadSummary> {
        let request = LoadRequest::from_config(&self.config);
        self.load_secrets(&request, None).await
    }

    /// GET `v1/{path}` and return the decoded body.
    pub async fn get_secret(&self, path: &str, token: Option<&str>) -> Result<Value> {
        let token = self.resolve_token(token)?;
        self.vault.get(path, token).await
    }

    /// POST `data` to `v1/{path}` and return the decoded body.
    pub async fn update_secret(&self, path: &str, data: &Value, token: Option<&str>) -> Result<Value> {
        let token = self.resolve_token(token)?;
        self.vault.post(path, data, token).await
    }

    /// Arbitrary call against `{store}/{path}`.
    pub async fn request(&self, method: Method, path: &str, data: &Value, token: Option<&str>) -> Result<Value> {
        let token = self.resolve_token(token)?;
        self.vault.request(method, path, data, token).await
    }
}
