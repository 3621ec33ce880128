//! HTTP client for the secret store.
//!
//! Every authenticated call carries the session token in `X-Vault-Token`.
//! Non-success responses become [`Error::Transport`] with the status and
//! (truncated) body; nothing is retried.

use reqwest::{Client, Method, RequestBuilder};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::debug;

use crate::error::{Error, Result};
use crate::models::{
    DatabaseCredentials, KvV2Response, ListResponse, LoginResponse, SecretEntry, SecretResponse,
    SessionToken,
};

/// Header carrying the store token
pub const TOKEN_HEADER: &str = "X-Vault-Token";

/// Client for one secret store address.
/// Clone is cheap - reqwest::Client uses Arc internally for connection pooling.
#[derive(Clone)]
pub struct VaultClient {
    client: Client,
    base_url: String,
}

impl VaultClient {
    pub fn new(client: Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: crate::config::trim_base_url(base_url.into()),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    fn v1_url(&self, path: &str) -> String {
        format!("{}/v1/{}", self.base_url, path.trim_start_matches('/'))
    }

    fn list_method() -> Method {
        Method::from_bytes(b"LIST").unwrap_or(Method::GET)
    }

    /// Send the request and return the body of a successful response.
    async fn send(request: RequestBuilder, method: &Method, url: &str) -> Result<String> {
        debug!(method = %method, url = %url, "Secret store request");
        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::from_status(status, url, &body));
        }
        Ok(response.text().await?)
    }

    fn decode<T: DeserializeOwned>(body: &str, url: &str) -> Result<T> {
        serde_json::from_str(body).map_err(|e| Error::DataShape(format!("response from {}: {}", url, e)))
    }

    /// Decode an arbitrary response body; empty bodies (204) become `null`.
    fn decode_value(body: &str, url: &str) -> Result<Value> {
        if body.trim().is_empty() {
            return Ok(Value::Null);
        }
        Self::decode(body, url)
    }

    fn authed(&self, method: Method, url: &str, token: &str) -> RequestBuilder {
        self.client.request(method, url).header(TOKEN_HEADER, token)
    }

    // ===== Authentication =====

    /// Exchange a signed assertion for a store token (`auth/gcp/login`).
    pub async fn login(&self, role: &str, jwt: &str) -> Result<SessionToken> {
        let url = self.v1_url("auth/gcp/login");
        let request = self
            .client
            .post(&url)
            .form(&[("role", role), ("jwt", jwt)]);
        let body = Self::send(request, &Method::POST, &url).await?;
        let parsed: LoginResponse = Self::decode(&body, &url)?;
        Ok(SessionToken::new(parsed.auth.client_token))
    }

    /// Revoke the token used to make the call. Returns the response status
    /// without treating non-success as an error.
    pub async fn revoke_self(&self, token: &str) -> Result<reqwest::StatusCode> {
        let url = self.v1_url("auth/token/revoke-self");
        debug!(url = %url, "Revoking store token");
        let response = self.authed(Method::POST, &url, token).send().await?;
        Ok(response.status())
    }

    // ===== Secrets =====

    /// Key names under `secret/{app_role}`, in store order.
    pub async fn list_keys(&self, app_role: &str, token: &str) -> Result<Vec<String>> {
        let url = self.v1_url(&format!("secret/{}", app_role));
        let method = Self::list_method();
        let request = self.authed(method.clone(), &url, token);
        let body = Self::send(request, &method, &url).await?;
        let parsed: ListResponse = Self::decode(&body, &url)?;
        Ok(parsed.data.keys)
    }

    /// Fields of `secret/{app_role}/{key}`; an empty payload yields no entries.
    pub async fn read_secret(&self, app_role: &str, key: &str, token: &str) -> Result<Vec<SecretEntry>> {
        let url = self.v1_url(&format!("secret/{}/{}", app_role, key));
        let request = self.authed(Method::GET, &url, token);
        let body = Self::send(request, &Method::GET, &url).await?;
        let parsed: SecretResponse = Self::decode(&body, &url)?;
        Ok(parsed.into_entries())
    }

    /// Username/password pair at `kv/data/{db_role}/mongodb`.
    pub async fn read_database_credentials(&self, db_role: &str, token: &str) -> Result<DatabaseCredentials> {
        let url = self.v1_url(&format!("kv/data/{}/mongodb", db_role));
        let request = self.authed(Method::GET, &url, token);
        let body = Self::send(request, &Method::GET, &url).await?;
        let parsed: KvV2Response<DatabaseCredentials> = Self::decode(&body, &url)?;
        Ok(parsed.data.data)
    }

    // ===== Pass-through =====

    /// GET `{store}/v1/{path}`
    pub async fn get(&self, path: &str, token: &str) -> Result<Value> {
        let url = self.v1_url(path);
        let body = Self::send(self.authed(Method::GET, &url, token), &Method::GET, &url).await?;
        Self::decode_value(&body, &url)
    }

    /// POST `data` as JSON to `{store}/v1/{path}`
    pub async fn post(&self, path: &str, data: &Value, token: &str) -> Result<Value> {
        let url = self.v1_url(path);
        let request = self.authed(Method::POST, &url, token).json(data);
        let body = Self::send(request, &Method::POST, &url).await?;
        Self::decode_value(&body, &url)
    }

    /// Any method against `{store}/{path}`. A `null` body sends no payload.
    pub async fn request(&self, method: Method, path: &str, data: &Value, token: &str) -> Result<Value> {
        let url = self.url(path);
        let mut request = self.authed(method.clone(), &url, token);
        if !data.is_null() {
            request = request.json(data);
        }
        let body = Self::send(request, &method, &url).await?;
        Self::decode_value(&body, &url)
    }
}
