use axum::{
    body::{to_bytes, Body},
    http::{Request, StatusCode},
    Router,
};
use sqlx::PgPool;
use tower::util::ServiceExt;

mod common;

async fn test_app(pool: PgPool) -> Router {
    let services = common::setup_services(pool).await;
    omics_control_plane::features::auth::routes::public_auth_routes().with_state(services.auth.clone())
}

#[sqlx::test]
async fn post_register_returns_201_with_the_response_envelope(pool: PgPool) {
    let app = test_app(pool).await;

    let payload = serde_json::json!({
        "email": "api-user@example.com",
        "password": "Correct-Horse-9"
    });

    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/register")
                .header("content-type", "application/json")
                .body(Body::from(payload.to_string()))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::CREATED);
    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json["ok"], true);
    assert_eq!(json["user"]["email"], "api-user@example.com");
}

#[sqlx::test]
async fn post_register_with_weak_password_is_rejected(pool: PgPool) {
    let app = test_app(pool).await;

    let payload = serde_json::json!({
        "email": "weak@example.com",
        "password": "short"
    });

    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/register")
                .header("content-type", "application/json")
                .body(Body::from(payload.to_string()))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[sqlx::test]
async fn duplicate_registration_returns_conflict(pool: PgPool) {
    let app = test_app(pool.clone()).await;
    let payload = serde_json::json!({"email": "dup@example.com", "password": "Correct-Horse-9"});

    let first = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/register")
                .header("content-type", "application/json")
                .body(Body::from(payload.to_string()))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(first.status(), StatusCode::CREATED);

    let second = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/register")
                .header("content-type", "application/json")
                .body(Body::from(payload.to_string()))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(second.status(), StatusCode::CONFLICT);
}
