#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;
use vaultenv_core::{AuthSession, BaseCredential, CredentialSource, OutputMode, Result, SessionConfig};
use wiremock::matchers::{method, path, path_regex};
use wiremock::{Mock, MockServer, ResponseTemplate};

pub const PRINCIPAL: &str = "ci-builder@test-project.iam.gserviceaccount.com";
pub const ACCESS_TOKEN: &str = "ya29.test-access-token";
pub const SIGNED_JWT: &str = "eyJhbGciOiJSUzI1NiJ9.claims.signature";
pub const VAULT_TOKEN: &str = "hvs.test-token";

/// Credential source with a fixed principal that counts its calls.
#[derive(Clone, Default)]
pub struct StaticCredentialSource {
    pub email: Option<String>,
    pub loads: Arc<AtomicUsize>,
    pub refreshes: Arc<AtomicUsize>,
}

impl StaticCredentialSource {
    pub fn with_email(email: &str) -> Self {
        Self {
            email: Some(email.to_string()),
            ..Default::default()
        }
    }

    pub fn loads(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }

    pub fn refreshes(&self) -> usize {
        self.refreshes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CredentialSource for StaticCredentialSource {
    async fn load(&self) -> Result<BaseCredential> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        Ok(BaseCredential::new(self.email.clone()))
    }

    async fn refresh(&self, credential: &mut BaseCredential, _scope: &str) -> Result<()> {
        self.refreshes.fetch_add(1, Ordering::SeqCst);
        credential.set_access_token(ACCESS_TOKEN);
        Ok(())
    }
}

/// Config pointing both the store and the IAM API at `server`.
pub fn config_for(server: &MockServer) -> SessionConfig {
    let mut config = SessionConfig::new(server.uri());
    config.iam_base_url = server.uri();
    config.output = OutputMode::Env;
    config
}

pub fn session_for(server: &MockServer, source: StaticCredentialSource) -> AuthSession {
    AuthSession::with_credential_source(config_for(server), Box::new(source)).unwrap()
}

pub async fn mount_sign_jwt(server: &MockServer) {
    Mock::given(method("POST"))
        .and(path_regex(r"^/v1/projects/-/serviceAccounts/.+:signJwt$"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "keyId": "abc123",
            "signedJwt": SIGNED_JWT,
        })))
        .mount(server)
        .await;
}

pub async fn mount_login(server: &MockServer, token: &str) {
    Mock::given(method("POST"))
        .and(path("/v1/auth/gcp/login"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "auth": {"client_token": token, "lease_duration": 3600, "renewable": true}
        })))
        .mount(server)
        .await;
}

/// Mock signing and login, then log in.
pub async fn logged_in_session(server: &MockServer) -> AuthSession {
    mount_sign_jwt(server).await;
    mount_login(server, VAULT_TOKEN).await;
    let mut session = session_for(server, StaticCredentialSource::with_email(PRINCIPAL));
    session.login("cloud_builder").await.unwrap();
    session
}

/// Serve one connection with `status` and a body cut short of its
/// Content-Length, so reading the body fails after the status line.
pub async fn truncated_body_server(status: u16) -> String {
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        let mut request = Vec::new();
        let mut buf = [0u8; 1024];
        let header_end = loop {
            if let Some(pos) = request.windows(4).position(|w| w == b"\r\n\r\n") {
                break pos + 4;
            }
            let n = stream.read(&mut buf).await.unwrap();
            if n == 0 {
                return;
            }
            request.extend_from_slice(&buf[..n]);
        };
        // drain the request body so closing does not reset the connection
        let head = String::from_utf8_lossy(&request[..header_end]).to_ascii_lowercase();
        let body_len: usize = head
            .lines()
            .find_map(|line| line.strip_prefix("content-length:"))
            .and_then(|len| len.trim().parse().ok())
            .unwrap_or(0);
        let mut received = request.len() - header_end;
        while received < body_len {
            let n = stream.read(&mut buf).await.unwrap();
            if n == 0 {
                break;
            }
            received += n;
        }
        let response = format!(
            "HTTP/1.1 {} Error\r\nContent-Type: application/json\r\nContent-Length: 1000\r\n\r\n{{\"errors\":",
            status
        );
        stream.write_all(response.as_bytes()).await.unwrap();
        stream.shutdown().await.unwrap();
    });
    format!("http://{}", addr)
}
