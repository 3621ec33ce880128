use std::fmt;

use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::BaseCredential;
use crate::error::{Error, Result};

/// Lifetime of a signed assertion in seconds.
/// The IAM signJwt API rejects anything longer than 15 minutes.
pub const ASSERTION_LIFETIME_SECS: i64 = 900;

/// Claims of the JWT presented to the store's GCP login.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClaimSet {
    aud: String,
    sub: String,
    iat: i64,
    exp: i64,
}

impl ClaimSet {
    /// `exp` is always `iat + ASSERTION_LIFETIME_SECS`.
    pub fn new(audience: impl Into<String>, subject: impl Into<String>, issued_at: i64) -> Self {
        Self {
            aud: audience.into(),
            sub: subject.into(),
            iat: issued_at,
            exp: issued_at + ASSERTION_LIFETIME_SECS,
        }
    }

    pub fn issued_now(audience: impl Into<String>, subject: impl Into<String>) -> Self {
        Self::new(audience, subject, Utc::now().timestamp())
    }

    pub fn audience(&self) -> &str {
        &self.aud
    }

    pub fn subject(&self) -> &str {
        &self.sub
    }

    pub fn issued_at(&self) -> i64 {
        self.iat
    }

    pub fn expires_at(&self) -> i64 {
        self.exp
    }
}

/// A JWT signed by the identity provider on behalf of a principal.
#[derive(Clone)]
pub struct SignedAssertion {
    jwt: String,
    claims: ClaimSet,
}

impl SignedAssertion {
    pub fn new(jwt: impl Into<String>, claims: ClaimSet) -> Self {
        Self {
            jwt: jwt.into(),
            claims,
        }
    }

    pub fn as_str(&self) -> &str {
        &self.jwt
    }

    pub fn claims(&self) -> &ClaimSet {
        &self.claims
    }

    pub fn expires_at(&self) -> DateTime<Utc> {
        DateTime::from_timestamp(self.claims.exp, 0).unwrap_or_default()
    }

    pub fn is_expired(&self) -> bool {
        Utc::now().timestamp() >= self.claims.exp
    }
}

impl fmt::Debug for SignedAssertion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SignedAssertion")
            .field("jwt", &"<redacted>")
            .field("claims", &self.claims)
            .finish()
    }
}

#[derive(Debug, Serialize)]
struct SignJwtRequest {
    payload: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SignJwtResponse {
    signed_jwt: Option<String>,
}

/// Client for the IAM credentials `signJwt` endpoint.
#[derive(Clone)]
pub struct AssertionSigner {
    client: Client,
    base_url: String,
}

impl AssertionSigner {
    pub fn new(client: Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: crate::config::trim_base_url(base_url.into()),
        }
    }

    fn sign_url(&self, principal: &str) -> String {
        format!(
            "{}/v1/projects/-/serviceAccounts/{}:signJwt",
            self.base_url, principal
        )
    }

    /// Have the identity provider sign `claims` as `claims.subject()`.
    pub async fn sign(&self, credential: &BaseCredential, claims: ClaimSet) -> Result<SignedAssertion> {
        let url = self.sign_url(claims.subject());
        let payload = serde_json::to_string(&claims)
            .map_err(|e| Error::Identity(format!("Failed to encode claim set: {}", e)))?;

        debug!(url = %url, audience = %claims.audience(), "Requesting signed assertion");

        let response = self
            .client
            .post(&url)
            .bearer_auth(credential.access_token()?)
            .json(&SignJwtRequest { payload })
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::from_status(status, &url, &body));
        }
        let body = response.text().await?;

        let parsed: SignJwtResponse = serde_json::from_str(&body)
            .map_err(|e| Error::DataShape(format!("signJwt response from {}: {}", url, e)))?;
        let jwt = parsed
            .signed_jwt
            .ok_or_else(|| Error::Identity("signJwt response has no signedJwt".to_string()))?;

        Ok(SignedAssertion::new(jwt, claims))
    }
}
