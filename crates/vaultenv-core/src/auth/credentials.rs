use std::fmt;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use gcp_auth::TokenProvider;
use reqwest::Client;
use serde::Deserialize;
use tokio::sync::OnceCell;
use tracing::{debug, error};

use crate::error::{Error, Result};

/// OAuth scope requested for the ambient credential
pub const CLOUD_PLATFORM_SCOPE: &str = "https://www.googleapis.com/auth/cloud-platform";

/// Default metadata server host on GCE/GKE/Cloud Build
const DEFAULT_METADATA_HOST: &str = "metadata.google.internal";

/// Metadata lookups fail fast off-GCP
const METADATA_TIMEOUT_SECS: u64 = 2;

/// Ambient cloud credential plus the principal it belongs to, if known.
#[derive(Clone, Default)]
pub struct BaseCredential {
    access_token: Option<String>,
    refreshed_at: Option<DateTime<Utc>>,
    pub service_account_email: Option<String>,
}

impl BaseCredential {
    pub fn new(service_account_email: Option<String>) -> Self {
        Self {
            access_token: None,
            refreshed_at: None,
            service_account_email,
        }
    }

    /// Store a freshly issued access token
    pub fn set_access_token(&mut self, token: impl Into<String>) {
        self.access_token = Some(token.into());
        self.refreshed_at = Some(Utc::now());
    }

    /// Bearer token, available once the credential has been refreshed
    pub fn access_token(&self) -> Result<&str> {
        self.access_token
            .as_deref()
            .ok_or_else(|| Error::Identity("credential has not been refreshed".to_string()))
    }

    pub fn refreshed_at(&self) -> Option<DateTime<Utc>> {
        self.refreshed_at
    }
}

impl fmt::Debug for BaseCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BaseCredential")
            .field("access_token", &self.access_token.as_ref().map(|_| "<redacted>"))
            .field("refreshed_at", &self.refreshed_at)
            .field("service_account_email", &self.service_account_email)
            .finish()
    }
}

/// Provider of ambient cloud identity.
///
/// `load` discovers the credential and, when possible, its principal.
/// `refresh` obtains an access token for it under `scope`.
#[async_trait]
pub trait CredentialSource: Send + Sync {
    async fn load(&self) -> Result<BaseCredential>;

    async fn refresh(&self, credential: &mut BaseCredential, scope: &str) -> Result<()>;
}

#[derive(Debug, Deserialize)]
struct ServiceAccountKeyFile {
    client_email: Option<String>,
}

/// Application Default Credentials via `gcp_auth`.
pub struct GcpCredentialSource {
    http: Client,
    provider: OnceCell<Arc<dyn TokenProvider>>,
}

impl GcpCredentialSource {
    pub fn new(http: Client) -> Self {
        Self {
            http,
            provider: OnceCell::new(),
        }
    }

    async fn provider(&self) -> Result<&Arc<dyn TokenProvider>> {
        self.provider
            .get_or_try_init(|| async {
                debug!("Initializing GCP authentication provider");
                gcp_auth::provider().await.map_err(|e| {
                    error!(error = %e, "Failed to initialize GCP auth");
                    Error::Identity(format!("GCP auth initialization failed: {}", e))
                })
            })
            .await
    }

    /// Principal from a service account key file or the metadata server.
    async fn discover_email(&self) -> Option<String> {
        if let Ok(path) = std::env::var("GOOGLE_APPLICATION_CREDENTIALS") {
            if let Some(email) = Self::email_from_key_file(Path::new(&path)) {
                return Some(email);
            }
        }
        self.email_from_metadata().await
    }

    fn email_from_key_file(path: &Path) -> Option<String> {
        let contents = std::fs::read_to_string(path).ok()?;
        let key: ServiceAccountKeyFile = serde_json::from_str(&contents).ok()?;
        key.client_email
    }

    async fn email_from_metadata(&self) -> Option<String> {
        let host = std::env::var("GCE_METADATA_HOST").unwrap_or_else(|_| DEFAULT_METADATA_HOST.to_string());
        let url = format!(
            "http://{}/computeMetadata/v1/instance/service-accounts/default/email",
            host
        );

        let response = self
            .http
            .get(&url)
            .header("Metadata-Flavor", "Google")
            .timeout(Duration::from_secs(METADATA_TIMEOUT_SECS))
            .send()
            .await;

        match response {
            Ok(r) if r.status().is_success() => {
                let email = r.text().await.ok()?.trim().to_string();
                (!email.is_empty()).then_some(email)
            }
            Ok(r) => {
                debug!(status = %r.status(), "Metadata server did not return a service account");
                None
            }
            Err(e) => {
                debug!(error = %e, "Metadata server unavailable");
                None
            }
        }
    }
}

#[async_trait]
impl CredentialSource for GcpCredentialSource {
    async fn load(&self) -> Result<BaseCredential> {
        self.provider().await?;
        let email = self.discover_email().await;
        debug!(principal = ?email, "Loaded ambient GCP credentials");
        Ok(BaseCredential::new(email))
    }

    async fn refresh(&self, credential: &mut BaseCredential, scope: &str) -> Result<()> {
        let provider = self.provider().await?;
        let token = provider.token(&[scope]).await.map_err(|e| {
            error!(error = %e, "Failed to get GCP access token");
            Error::Identity(format!("GCP token acquisition failed: {}", e))
        })?;
        credential.set_access_token(token.as_str());
        Ok(())
    }
}
