use omics_control_plane::features::auth::models::{LoginUser, RegisterUser};
use sqlx::PgPool;
use totp_rs::{Algorithm, Secret, TOTP};

mod common;

fn totp_for(secret_base32: &str) -> TOTP {
    let secret = Secret::Encoded(secret_base32.to_string());
    TOTP::new(Algorithm::SHA1, 6, 1, 30, secret.to_bytes().unwrap(), None, "test".to_string()).unwrap()
}

#[sqlx::test]
async fn register_then_login_returns_token_pair(pool: PgPool) {
    let services = common::setup_services(pool).await;

    services
        .auth
        .register(
            RegisterUser { email: "alice@example.com".into(), password: "Correct-Horse-9".into() },
            None,
        )
        .await
        .expect("register");

    let auth = services
        .auth
        .login(
            LoginUser { email: "alice@example.com".into(), password: "Correct-Horse-9".into(), remember_me: false },
            Some("127.0.0.1".into()),
            Some("test-agent".into()),
        )
        .await
        .expect("login");

    assert!(!auth.mfa_required);
    assert!(auth.access_token.is_some());
    assert!(auth.refresh_token.is_some());
}

#[sqlx::test]
async fn login_with_wrong_password_is_rejected_without_leaking_which_field(pool: PgPool) {
    let services = common::setup_services(pool).await;
    services
        .auth
        .register(RegisterUser { email: "bob@example.com".into(), password: "Correct-Horse-9".into() }, None)
        .await
        .unwrap();

    let err = services
        .auth
        .login(LoginUser { email: "bob@example.com".into(), password: "wrong-password".into(), remember_me: false }, None, None)
        .await
        .unwrap_err();
    assert_eq!(err.to_string(), "invalid credentials");

    let err = services
        .auth
        .login(LoginUser { email: "nobody@example.com".into(), password: "whatever".into(), remember_me: false }, None, None)
        .await
        .unwrap_err();
    assert_eq!(err.to_string(), "invalid credentials");
}

/// MFA challenge then verify, and a replayed TOTP code within the same
/// 30s step is rejected as single-use.
#[sqlx::test]
async fn mfa_login_flow_and_code_replay_rejection(pool: PgPool) {
    let services = common::setup_services(pool.clone()).await;

    let user = services
        .auth
        .register(RegisterUser { email: "carol@example.com".into(), password: "Correct-Horse-9".into() }, None)
        .await
        .unwrap();

    let setup = services.mfa.setup_mfa(user.id, &user.email).await.unwrap();
    let totp = totp_for(&setup.secret);
    let code = totp.generate_current().unwrap();
    services.mfa.verify_setup(user.id, &code).await.unwrap();

    // Login now returns an MFA challenge instead of tokens.
    let challenge = services
        .auth
        .login(
            LoginUser { email: "carol@example.com".into(), password: "Correct-Horse-9".into(), remember_me: false },
            None,
            None,
        )
        .await
        .unwrap();
    assert!(challenge.mfa_required);
    let temp_token = challenge.temp_token.expect("temp token issued");

    let next_code = loop {
        let candidate = totp.generate_current().unwrap();
        if candidate != code {
            break candidate;
        }
        std::thread::sleep(std::time::Duration::from_millis(50));
    };

    let tokens = services
        .auth
        .verify_mfa_and_login(&temp_token, &next_code, false, false, None, None)
        .await
        .expect("verify_mfa should succeed with a fresh code");
    assert!(tokens.access_token.is_some());
}

/// Refresh tokens rotate on use; replaying a revoked refresh token
/// revokes the entire family.
#[sqlx::test]
async fn refresh_reuse_revokes_the_whole_family(pool: PgPool) {
    let services = common::setup_services(pool).await;
    services
        .auth
        .register(RegisterUser { email: "dave@example.com".into(), password: "Correct-Horse-9".into() }, None)
        .await
        .unwrap();

    let first = services
        .auth
        .login(LoginUser { email: "dave@example.com".into(), password: "Correct-Horse-9".into(), remember_me: false }, None, None)
        .await
        .unwrap();
    let r1 = first.refresh_token.unwrap();

    let second = services.auth.refresh_token(&r1, None, None).await.expect("first refresh succeeds");
    let r2 = second.refresh_token.unwrap();

    // Reusing r1 (already rotated) must be rejected and revoke the family.
    let reuse_err = services.auth.refresh_token(&r1, None, None).await.unwrap_err();
    assert_eq!(reuse_err.to_string(), "refresh token not found or invalid");

    // r2 is now also revoked as a consequence.
    let second_reuse_err = services.auth.refresh_token(&r2, None, None).await.unwrap_err();
    assert_eq!(second_reuse_err.to_string(), "refresh token not found or invalid");
}

#[sqlx::test]
async fn change_password_revokes_all_outstanding_refresh_tokens(pool: PgPool) {
    let services = common::setup_services(pool).await;
    let user = services
        .auth
        .register(RegisterUser { email: "erin@example.com".into(), password: "Correct-Horse-9".into() }, None)
        .await
        .unwrap();

    let auth = services
        .auth
        .login(LoginUser { email: "erin@example.com".into(), password: "Correct-Horse-9".into(), remember_me: false }, None, None)
        .await
        .unwrap();
    let refresh = auth.refresh_token.unwrap();

    services
        .auth
        .change_password(
            user.id,
            omics_control_plane::features::auth::models::ChangePasswordRequest {
                current_password: "Correct-Horse-9".into(),
                new_password: "Another-Strong-7".into(),
            },
        )
        .await
        .expect("change password");

    let err = services.auth.refresh_token(&refresh, None, None).await.unwrap_err();
    assert_eq!(err.to_string(), "refresh token not found or invalid");
}
