//! Wire types for the secret store and the values handed back to callers.

use std::fmt;

use serde::Deserialize;
use serde_json::{Map, Value};

/// Token issued by the store at login. Never printed.
#[derive(Clone, PartialEq, Eq)]
pub struct SessionToken(String);

impl SessionToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for SessionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SessionToken(<redacted>)")
    }
}

/// One `KEY=VALUE` pair read from the store.
#[derive(Clone, PartialEq, Eq)]
pub struct SecretEntry {
    pub key: String,
    pub value: String,
}

impl SecretEntry {
    /// Strings are taken verbatim; any other JSON value uses its JSON text.
    pub fn from_json(key: impl Into<String>, value: &Value) -> Self {
        let value = match value {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        Self {
            key: key.into(),
            value,
        }
    }
}

impl fmt::Debug for SecretEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SecretEntry")
            .field("key", &self.key)
            .field("value", &"<redacted>")
            .finish()
    }
}

/// `kv/data/{role}/mongodb` credential pair
#[derive(Clone, Deserialize)]
pub struct DatabaseCredentials {
    pub username: String,
    pub password: String,
}

impl fmt::Debug for DatabaseCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DatabaseCredentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

// ============================================================================
// Store responses
// ============================================================================

#[derive(Debug, Deserialize)]
pub(crate) struct LoginResponse {
    pub auth: LoginAuth,
}

#[derive(Debug, Deserialize)]
pub(crate) struct LoginAuth {
    pub client_token: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ListResponse {
    pub data: ListData,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ListData {
    pub keys: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct SecretResponse {
    #[serde(default)]
    pub data: Option<Map<String, Value>>,
}

impl SecretResponse {
    /// Entries in the order the store returned them; `null`/missing is empty.
    pub fn into_entries(self) -> Vec<SecretEntry> {
        self.data
            .unwrap_or_default()
            .iter()
            .map(|(k, v)| SecretEntry::from_json(k.as_str(), v))
            .collect()
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct KvV2Response<T> {
    pub data: KvV2Data<T>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct KvV2Data<T> {
    pub data: T,
}
