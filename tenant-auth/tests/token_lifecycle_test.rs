//! Integration tests for issuing, verifying and refreshing credentials.

mod common;

use common::{password_hash, tenant, user, TestApp, PASSWORD};
use std::time::Duration;
use tenant_auth::dtos::{AuthenticateRequest, RefreshTokenRequest, VerifyTokenRequest};
use tenant_auth::models::AuditEventType;
use tenant_auth::services::RevocationStore;
use tenant_auth::{AuthError, ErrorKind};

fn verify(token: &str) -> VerifyTokenRequest {
    VerifyTokenRequest {
        access_token: token.to_string(),
    }
}

fn refresh(tenant_id: &str, user_id: &str, token: &str) -> RefreshTokenRequest {
    RefreshTokenRequest {
        tenant_id: tenant_id.to_string(),
        user_id: user_id.to_string(),
        refresh_token: token.to_string(),
    }
}

// ============================================================================
// Authenticate / Verify
// ============================================================================

#[tokio::test]
async fn test_authenticate_then_verify() {
    let app = TestApp::spawn();
    let pair = app.login("acme", "alice").await;

    assert_eq!(pair.token_type, "Bearer");
    assert_eq!(pair.expires_in, 900);
    assert_eq!(pair.access_token.split('.').count(), 3);
    assert!(pair.refresh_expires_at > pair.access_expires_at);

    let verified = app.service.verify_token(verify(&pair.access_token)).await.unwrap();
    assert!(verified.valid);
    assert_eq!(verified.tenant_id, "acme");
    assert_eq!(verified.user_id, "alice");
    assert_eq!(app.audit.count(AuditEventType::LoginSucceeded), 1);
}

#[tokio::test]
async fn test_wrong_password_is_rejected_and_audited() {
    let app = TestApp::spawn();
    let err = app
        .service
        .authenticate(AuthenticateRequest {
            tenant_id: "acme".to_string(),
            user_id: "alice".to_string(),
            password: "not the password".to_string(),
            password_hash: password_hash(),
        })
        .await
        .unwrap_err();

    assert!(matches!(err, AuthError::InvalidCredentials));
    assert_eq!(app.audit.count(AuditEventType::LoginFailed), 1);
    assert!(app.access_store.is_empty());
}

#[tokio::test]
async fn test_invalid_identifiers_are_validation_errors() {
    let app = TestApp::spawn();
    for (tenant_id, user_id) in [("", "alice"), ("acme", ""), ("ac:me", "alice")] {
        let err = app
            .service
            .authenticate(AuthenticateRequest {
                tenant_id: tenant_id.to_string(),
                user_id: user_id.to_string(),
                password: PASSWORD.to_string(),
                password_hash: password_hash(),
            })
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation, "{}/{}", tenant_id, user_id);
    }
}

#[tokio::test]
async fn test_token_from_another_secret_never_verifies() {
    let app = TestApp::spawn();
    let other = TestApp::with_env(&[("JWT_SECRET", "a-completely-different-signing-secret!")]);

    let pair = other.login("acme", "alice").await;
    let err = app
        .service
        .verify_token(verify(&pair.access_token))
        .await
        .unwrap_err();
    assert!(matches!(err, AuthError::SignatureInvalid));
}

#[tokio::test]
async fn test_garbage_token_is_malformed() {
    let app = TestApp::spawn();
    let err = app
        .service
        .verify_token(verify("definitely.not.ajwt"))
        .await
        .unwrap_err();
    assert!(matches!(err, AuthError::Malformed));
}

#[tokio::test]
async fn test_short_lived_token_expires_rather_than_revokes() {
    let app = TestApp::with_env(&[
        ("ACCESS_TOKEN_TTL_SECONDS", "1"),
        ("REFRESH_TOKEN_TTL_SECONDS", "60"),
    ]);
    let pair = app.login("acme", "alice").await;

    assert!(app.service.verify_token(verify(&pair.access_token)).await.unwrap().valid);

    tokio::time::sleep(Duration::from_millis(2100)).await;

    let err = app
        .service
        .verify_token(verify(&pair.access_token))
        .await
        .unwrap_err();
    assert!(matches!(err, AuthError::Expired));
}

#[tokio::test]
async fn test_tokens_issued_in_the_same_second_are_distinct() {
    let app = TestApp::spawn();
    let first = app.login("acme", "alice").await;
    let second = app.login("acme", "alice").await;
    assert_ne!(first.access_token, second.access_token);

    let revoked = app
        .service
        .access_tokens()
        .revoke_token(&first.access_token, "alice")
        .await
        .unwrap();
    assert!(revoked);
    assert!(app.service.verify_token(verify(&second.access_token)).await.is_ok());
}

// ============================================================================
// Refresh
// ============================================================================

#[tokio::test]
async fn test_refresh_issues_new_pair_and_retires_old_one() {
    let app = TestApp::spawn();
    let pair = app.login("acme", "alice").await;

    let next = app
        .service
        .refresh_token(refresh("acme", "alice", &pair.refresh_token))
        .await
        .unwrap();
    assert_ne!(next.refresh_token, pair.refresh_token);
    assert_ne!(next.access_token, pair.access_token);

    let refresh_tokens = app.service.refresh_tokens();
    let (acme, alice) = (tenant("acme"), user("alice"));
    let err = refresh_tokens
        .validate(&acme, &alice, &pair.refresh_token)
        .await
        .unwrap_err();
    assert!(matches!(err, AuthError::Revoked));
    assert!(refresh_tokens
        .validate(&acme, &alice, &next.refresh_token)
        .await
        .is_ok());

    // The access credential of the consumed pair is revoked with it
    let err = app
        .service
        .verify_token(verify(&pair.access_token))
        .await
        .unwrap_err();
    assert!(matches!(err, AuthError::Revoked));
    assert!(app.service.verify_token(verify(&next.access_token)).await.is_ok());
    assert_eq!(app.audit.count(AuditEventType::TokenRefreshed), 1);
}

#[tokio::test]
async fn test_failed_rotation_leaves_user_logged_out() {
    let app = TestApp::spawn();
    let pair = app.login("acme", "alice").await;
    app.refresh_faults.fail_puts(true);

    let err = app
        .service
        .refresh_token(refresh("acme", "alice", &pair.refresh_token))
        .await
        .unwrap_err();
    assert!(matches!(err, AuthError::Store(_)));
    assert!(err.is_retryable());

    // The old refresh credential was consumed before the successor failed
    let err = app
        .service
        .refresh_tokens()
        .validate(&tenant("acme"), &user("alice"), &pair.refresh_token)
        .await
        .unwrap_err();
    assert!(matches!(err, AuthError::Revoked));

    // and its access credential went with it
    let err = app
        .service
        .verify_token(verify(&pair.access_token))
        .await
        .unwrap_err();
    assert!(matches!(err, AuthError::Revoked));

    // No successor was stored, and every access credential is already revoked
    assert_eq!(app.refresh_store.len(), 1);
    let still_live = app
        .access_store
        .revoke_all(&tenant("acme"), &user("alice"), "test")
        .await
        .unwrap();
    assert_eq!(still_live, 0);
    assert_eq!(app.audit.count(AuditEventType::TokenRefreshed), 0);
}

#[tokio::test]
async fn test_refresh_for_another_user_is_rejected() {
    let app = TestApp::spawn();
    let pair = app.login("acme", "alice").await;

    let err = app
        .service
        .refresh_token(refresh("acme", "mallory", &pair.refresh_token))
        .await
        .unwrap_err();
    assert!(matches!(err, AuthError::OwnerMismatch));

    // Alice's credential is untouched
    assert!(app
        .service
        .refresh_token(refresh("acme", "alice", &pair.refresh_token))
        .await
        .is_ok());
}

#[tokio::test]
async fn test_refresh_in_another_tenant_is_unknown() {
    let app = TestApp::spawn();
    let pair = app.login("acme", "alice").await;

    let err = app
        .service
        .refresh_token(refresh("globex", "alice", &pair.refresh_token))
        .await
        .unwrap_err();
    assert!(matches!(err, AuthError::UnknownCredential));
}

#[tokio::test]
async fn test_replaying_a_rotated_refresh_token_revokes_the_session_family() {
    let app = TestApp::spawn();
    let pair = app.login("acme", "alice").await;
    let next = app
        .service
        .refresh_token(refresh("acme", "alice", &pair.refresh_token))
        .await
        .unwrap();

    let err = app
        .service
        .refresh_token(refresh("acme", "alice", &pair.refresh_token))
        .await
        .unwrap_err();
    assert!(matches!(err, AuthError::Revoked));
    assert_eq!(app.audit.count(AuditEventType::RefreshReuseDetected), 1);

    let err = app
        .service
        .verify_token(verify(&next.access_token))
        .await
        .unwrap_err();
    assert!(matches!(err, AuthError::Revoked));

    let err = app
        .service
        .refresh_token(refresh("acme", "alice", &next.refresh_token))
        .await
        .unwrap_err();
    assert!(matches!(err, AuthError::Revoked));
}

#[tokio::test]
async fn test_explicitly_revoked_refresh_token_does_not_trigger_reuse_handling() {
    let app = TestApp::spawn();
    let first = app.login("acme", "alice").await;
    let second = app.login("acme", "alice").await;

    app.service
        .refresh_tokens()
        .revoke_token(&tenant("acme"), &user("alice"), &first.refresh_token, "alice")
        .await
        .unwrap();

    let err = app
        .service
        .refresh_token(refresh("acme", "alice", &first.refresh_token))
        .await
        .unwrap_err();
    assert!(matches!(err, AuthError::Revoked));
    assert_eq!(app.audit.count(AuditEventType::RefreshReuseDetected), 0);
    assert!(app.service.verify_token(verify(&second.access_token)).await.is_ok());
}
