// Router-level tests that need no database: auth boundaries, validation,
// envelope shape, rate limiting and the SSE handshake.
use axum::body::Body;
use axum::http::{Request, StatusCode};
use base64::{engine::general_purpose, Engine as _};
use mongodb::bson::oid::ObjectId;
use serde_json::json;
use serial_test::serial;
use tower::ServiceExt;

mod common;

#[tokio::test]
async fn test_health_reports_service_and_dependencies() {
    let app = common::create_test_app().await;

    let response = app
        .router
        .clone()
        .oneshot(common::get("/health", None))
        .await
        .unwrap();

    // Healthy with a local MongoDB, degraded without one; both carry the
    // same body shape.
    let status = response.status();
    assert!(
        status == StatusCode::OK || status == StatusCode::SERVICE_UNAVAILABLE,
        "unexpected health status: {status}"
    );
    let body = common::response_json(response).await;
    assert_eq!(body["service"], "questcoder-api");
    assert!(body["dependencies"]["mongodb"].is_object());
}

#[tokio::test]
async fn test_responses_carry_csp_and_trace_headers() {
    let app = common::create_test_app().await;

    let response = app
        .router
        .clone()
        .oneshot(common::get("/health", None))
        .await
        .unwrap();

    assert!(response.headers().contains_key("content-security-policy"));
    assert!(response.headers().contains_key("x-trace-id"));
}

#[tokio::test]
#[serial]
async fn test_metrics_requires_basic_auth() {
    let app = common::create_test_app().await;

    let response = app
        .router
        .clone()
        .oneshot(common::get("/metrics", None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let wrong = general_purpose::STANDARD.encode("admin:wrong");
    let response = app
        .router
        .clone()
        .oneshot(
            Request::builder()
                .uri("/metrics")
                .header("authorization", format!("Basic {}", wrong))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let default_credentials = general_purpose::STANDARD.encode("admin:changeme");
    let response = app
        .router
        .clone()
        .oneshot(
            Request::builder()
                .uri("/metrics")
                .header("authorization", format!("Basic {}", default_credentials))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_gamification_routes_require_token() {
    let app = common::create_test_app().await;

    for uri in [
        "/gamification/profile",
        "/gamification/badges",
        "/gamification/leaderboard",
        "/gamification/stream",
    ] {
        let response = app
            .router
            .clone()
            .oneshot(common::get(uri, None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED, "{uri}");

        let body = common::response_json(response).await;
        assert_eq!(body["success"], json!(false));
        assert!(body["message"].is_string());
        assert_eq!(body["data"], json!(null));
    }
}

#[tokio::test]
async fn test_garbage_token_rejected() {
    let app = common::create_test_app().await;

    let response = app
        .router
        .clone()
        .oneshot(common::get(
            "/gamification/profile",
            Some("not-a-real-token"),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_admin_routes_reject_non_admin() {
    let app = common::create_test_app().await;
    let token = common::user_token(&app.state, &ObjectId::new());

    let response = app
        .router
        .clone()
        .oneshot(common::get("/admin/badges", Some(&token)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    let body = common::response_json(response).await;
    assert_eq!(body["success"], json!(false));
}

#[tokio::test]
async fn test_create_badge_validation_rejects_bad_payload() {
    let app = common::create_test_app().await;
    let token = common::admin_token(&app.state, &ObjectId::new());

    // Threshold below 1 and negative reward both fail validation before any
    // database access.
    let response = app
        .router
        .clone()
        .oneshot(common::post_json(
            "/admin/badges",
            Some(&token),
            json!({
                "name": "Streaker",
                "description": "Keep a streak",
                "criteria_kind": "streak_days",
                "threshold": 0,
                "xp_reward": -10
            }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let body = common::response_json(response).await;
    assert_eq!(body["success"], json!(false));
    assert!(body["message"]
        .as_str()
        .unwrap()
        .contains("Threshold must be at least 1"));
}

#[tokio::test]
async fn test_activity_rejects_malformed_json() {
    let app = common::create_test_app().await;
    let token = common::user_token(&app.state, &ObjectId::new());

    let response = app
        .router
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/gamification/activity")
                .header("content-type", "application/json")
                .header("authorization", format!("Bearer {}", token))
                .body(Body::from("{not json"))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let body = common::response_json(response).await;
    assert_eq!(body["success"], json!(false));
}

#[tokio::test]
async fn test_activity_rejects_empty_problem_id() {
    let app = common::create_test_app().await;
    let token = common::user_token(&app.state, &ObjectId::new());

    let response = app
        .router
        .clone()
        .oneshot(common::post_json(
            "/gamification/activity",
            Some(&token),
            json!({
                "kind": "solved",
                "problem_id": "",
                "difficulty": "easy"
            }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let body = common::response_json(response).await;
    assert!(body["message"]
        .as_str()
        .unwrap()
        .contains("problem_id must be 1-200 characters"));
}

#[tokio::test]
async fn test_claim_rejects_malformed_badge_id() {
    let app = common::create_test_app().await;
    let token = common::user_token(&app.state, &ObjectId::new());

    let response = app
        .router
        .clone()
        .oneshot(common::post_json(
            "/gamification/badges/not-an-objectid/claim",
            Some(&token),
            json!({}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let body = common::response_json(response).await;
    assert!(body["message"].as_str().unwrap().contains("badge_id"));
}

#[tokio::test]
async fn test_leaderboard_rejects_unknown_board_and_window() {
    let app = common::create_test_app().await;
    let token = common::user_token(&app.state, &ObjectId::new());

    let response = app
        .router
        .clone()
        .oneshot(common::get(
            "/gamification/leaderboard?board=elo",
            Some(&token),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = app
        .router
        .clone()
        .oneshot(common::get(
            "/gamification/leaderboard?window=fortnight",
            Some(&token),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_rank_rejects_malformed_user_id() {
    let app = common::create_test_app().await;
    let token = common::user_token(&app.state, &ObjectId::new());

    let response = app
        .router
        .clone()
        .oneshot(common::get(
            "/gamification/users/banana/rank",
            Some(&token),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let body = common::response_json(response).await;
    assert!(body["message"].as_str().unwrap().contains("user_id"));
}

#[tokio::test]
async fn test_sse_handshake() {
    let app = common::create_test_app().await;
    let token = common::user_token(&app.state, &ObjectId::new());

    let response = app
        .router
        .clone()
        .oneshot(common::get("/gamification/stream", Some(&token)))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let content_type = response
        .headers()
        .get("content-type")
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();
    assert!(content_type.starts_with("text/event-stream"));
}

#[tokio::test]
#[serial]
async fn test_per_user_rate_limit_returns_429() {
    std::env::set_var("RATE_LIMIT_PER_USER", "2");
    std::env::remove_var("RATE_LIMIT_DISABLED");

    let app = common::create_test_app().await;
    let token = common::user_token(&app.state, &ObjectId::new());

    // The bogus board short-circuits each request with a 400 before any
    // database access; only the third hits the window limit.
    for expected in [
        StatusCode::BAD_REQUEST,
        StatusCode::BAD_REQUEST,
        StatusCode::TOO_MANY_REQUESTS,
    ] {
        let response = app
            .router
            .clone()
            .oneshot(common::get(
                "/gamification/leaderboard?board=bogus",
                Some(&token),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), expected);
    }

    std::env::remove_var("RATE_LIMIT_PER_USER");
}

#[tokio::test]
#[serial]
async fn test_rate_limit_disabled_escape_hatch() {
    std::env::set_var("RATE_LIMIT_DISABLED", "1");
    std::env::set_var("RATE_LIMIT_PER_USER", "1");

    let app = common::create_test_app().await;
    let token = common::user_token(&app.state, &ObjectId::new());

    for _ in 0..5 {
        let response = app
            .router
            .clone()
            .oneshot(common::get(
                "/gamification/leaderboard?board=bogus",
                Some(&token),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    std::env::remove_var("RATE_LIMIT_DISABLED");
    std::env::remove_var("RATE_LIMIT_PER_USER");
}
