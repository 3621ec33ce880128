mod common;

use common::*;
use serde_json::{json, Value};
use vaultenv_core::{Error, StatusCode};
use wiremock::matchers::{body_string_contains, header, method, path, path_regex};
use wiremock::{Mock, MockServer, ResponseTemplate};

#[tokio::test]
async fn test_get_credentials_refreshes_once_and_adopts_principal() {
    let server = MockServer::start().await;
    let source = StaticCredentialSource::with_email(PRINCIPAL);
    let mut session = session_for(&server, source.clone());

    assert!(session.principal().is_none());
    let credential = session.credentials().await.unwrap();
    assert_eq!(credential.access_token().unwrap(), ACCESS_TOKEN);
    assert_eq!(session.principal(), Some(PRINCIPAL));

    // cached after the first derivation
    session.credentials().await.unwrap();
    assert_eq!(source.loads(), 1);
    assert_eq!(source.refreshes(), 1);
}

#[tokio::test]
async fn test_configured_principal_wins_over_discovered() {
    let server = MockServer::start().await;
    let mut config = config_for(&server);
    config.service_account_email = Some("override@other.iam.gserviceaccount.com".into());
    let mut session = vaultenv_core::AuthSession::with_credential_source(
        config,
        Box::new(StaticCredentialSource::with_email(PRINCIPAL)),
    )
    .unwrap();

    session.credentials().await.unwrap();
    assert_eq!(session.principal(), Some("override@other.iam.gserviceaccount.com"));
}

#[tokio::test]
async fn test_signed_assertion_claims() {
    let server = MockServer::start().await;
    mount_sign_jwt(&server).await;
    let mut session = session_for(&server, StaticCredentialSource::with_email(PRINCIPAL));

    let assertion = session.jwt().await.unwrap();
    assert_eq!(assertion.as_str(), SIGNED_JWT);
    let claims = assertion.claims().clone();
    assert_eq!(claims.expires_at() - claims.issued_at(), 900);
    assert_eq!(claims.audience(), "http://vault/cloud_builder");
    assert_eq!(claims.subject(), PRINCIPAL);

    let requests = server.received_requests().await.unwrap();
    assert_eq!(requests.len(), 1);
    let request = &requests[0];
    assert_eq!(
        request.url.path(),
        format!("/v1/projects/-/serviceAccounts/{}:signJwt", PRINCIPAL)
    );
    assert_eq!(
        request.headers.get("authorization").unwrap().to_str().unwrap(),
        format!("Bearer {}", ACCESS_TOKEN)
    );

    let body: Value = serde_json::from_slice(&request.body).unwrap();
    let payload: Value = serde_json::from_str(body["payload"].as_str().unwrap()).unwrap();
    assert_eq!(payload["aud"], "http://vault/cloud_builder");
    assert_eq!(payload["sub"], PRINCIPAL);
    assert_eq!(
        payload["exp"].as_i64().unwrap() - payload["iat"].as_i64().unwrap(),
        900
    );
}

#[tokio::test]
async fn test_jwt_without_principal_is_identity_error() {
    let server = MockServer::start().await;
    let mut session = session_for(&server, StaticCredentialSource::default());

    let err = session.jwt().await.unwrap_err();
    assert!(matches!(err, Error::Identity(_)));
    assert!(server.received_requests().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_signing_failure_is_transport_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path_regex(r":signJwt$"))
        .respond_with(ResponseTemplate::new(403).set_body_string("iam.serviceAccounts.signJwt denied"))
        .mount(&server)
        .await;
    let mut session = session_for(&server, StaticCredentialSource::with_email(PRINCIPAL));

    let err = session.jwt().await.unwrap_err();
    assert_eq!(err.status(), Some(StatusCode::FORBIDDEN));
    assert!(err.to_string().contains("signJwt denied"));
}

#[tokio::test]
async fn test_signing_response_without_jwt() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path_regex(r":signJwt$"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"keyId": "abc"})))
        .mount(&server)
        .await;
    let mut session = session_for(&server, StaticCredentialSource::with_email(PRINCIPAL));

    assert!(matches!(session.jwt().await.unwrap_err(), Error::Identity(_)));
}

#[tokio::test]
async fn test_login_posts_role_and_jwt_as_form() {
    let server = MockServer::start().await;
    mount_sign_jwt(&server).await;
    Mock::given(method("POST"))
        .and(path("/v1/auth/gcp/login"))
        .and(body_string_contains("role=deployer"))
        .and(body_string_contains(format!("jwt={}", SIGNED_JWT)))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "auth": {"client_token": VAULT_TOKEN}
        })))
        .expect(1)
        .mount(&server)
        .await;
    let mut session = session_for(&server, StaticCredentialSource::with_email(PRINCIPAL));

    let token = session.login("deployer").await.unwrap();
    assert_eq!(token.as_str(), VAULT_TOKEN);
    assert_eq!(session.token().unwrap().as_str(), VAULT_TOKEN);
}

#[tokio::test]
async fn test_login_twice_issues_two_tokens_and_signs_once() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path_regex(r":signJwt$"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"signedJwt": SIGNED_JWT})))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/v1/auth/gcp/login"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"auth": {"client_token": "hvs.first"}})))
        .up_to_n_times(1)
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/v1/auth/gcp/login"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"auth": {"client_token": "hvs.second"}})))
        .expect(1)
        .mount(&server)
        .await;

    let mut session = session_for(&server, StaticCredentialSource::with_email(PRINCIPAL));
    let first = session.login("cloud_builder").await.unwrap().clone();
    let second = session.login("cloud_builder").await.unwrap().clone();

    assert_eq!(first.as_str(), "hvs.first");
    assert_eq!(second.as_str(), "hvs.second");
    assert_eq!(session.token().unwrap().as_str(), "hvs.second");
}

#[tokio::test]
async fn test_login_failure_carries_status_and_body() {
    let server = MockServer::start().await;
    mount_sign_jwt(&server).await;
    Mock::given(method("POST"))
        .and(path("/v1/auth/gcp/login"))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({"errors": ["invalid role"]})))
        .mount(&server)
        .await;
    let mut session = session_for(&server, StaticCredentialSource::with_email(PRINCIPAL));

    let err = session.login("nope").await.unwrap_err();
    match err {
        Error::Transport { status, body, .. } => {
            assert_eq!(status, StatusCode::BAD_REQUEST);
            assert!(body.contains("invalid role"));
        }
        other => panic!("expected transport error, got {other:?}"),
    }
    assert!(session.token().is_none());
}

#[tokio::test]
async fn test_login_response_missing_token_is_data_shape() {
    let server = MockServer::start().await;
    mount_sign_jwt(&server).await;
    Mock::given(method("POST"))
        .and(path("/v1/auth/gcp/login"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"auth": null})))
        .mount(&server)
        .await;
    let mut session = session_for(&server, StaticCredentialSource::with_email(PRINCIPAL));

    assert!(matches!(session.login("cloud_builder").await.unwrap_err(), Error::DataShape(_)));
}

#[tokio::test]
async fn test_logout_revokes_with_session_token() {
    let server = MockServer::start().await;
    let session = logged_in_session(&server).await;
    Mock::given(method("POST"))
        .and(path("/v1/auth/token/revoke-self"))
        .and(header("X-Vault-Token", VAULT_TOKEN))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;

    let status = session.logout().await.unwrap();
    assert_eq!(status, StatusCode::NO_CONTENT);
    // local state is kept
    assert_eq!(session.token().unwrap().as_str(), VAULT_TOKEN);
}

#[tokio::test]
async fn test_logout_reports_rejection_without_error() {
    let server = MockServer::start().await;
    let session = logged_in_session(&server).await;
    Mock::given(method("POST"))
        .and(path("/v1/auth/token/revoke-self"))
        .respond_with(ResponseTemplate::new(403).set_body_string("permission denied"))
        .mount(&server)
        .await;

    assert_eq!(session.logout().await.unwrap(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_signing_error_status_kept_when_body_is_cut_short() {
    let addr = truncated_body_server(429).await;
    let mut config = vaultenv_core::SessionConfig::new("http://127.0.0.1:9");
    config.iam_base_url = addr;
    let mut session = vaultenv_core::AuthSession::with_credential_source(
        config,
        Box::new(StaticCredentialSource::with_email(PRINCIPAL)),
    )
    .unwrap();

    let err = session.jwt().await.unwrap_err();
    assert!(matches!(err, Error::Transport { .. }), "got {err:?}");
    assert_eq!(err.status(), Some(StatusCode::TOO_MANY_REQUESTS));
}
