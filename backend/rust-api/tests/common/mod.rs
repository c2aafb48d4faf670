#![allow(dead_code)]

use axum::body::Body;
use axum::http::{Request, Response};
use axum::Router;
use http_body_util::BodyExt;
use mongodb::bson::oid::ObjectId;
use std::sync::Arc;

use questcoder_api::{
    config::{Config, GamificationConfig},
    create_router,
    middlewares::auth::{JwtClaims, JwtService},
    services::AppState,
};

pub struct TestApp {
    pub router: Router,
    pub state: Arc<AppState>,
}

/// Router plus state against a lazily-connected MongoDB client. No IO
/// happens during construction, so tests that never touch the database can
/// run without one.
pub async fn create_test_app() -> TestApp {
    create_test_app_with(test_config("questcoder_test")).await
}

pub async fn create_test_app_with(config: Config) -> TestApp {
    // Initialize tracing for tests
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();

    let mongo_client = mongodb::Client::with_uri_str(&config.mongo_uri)
        .await
        .expect("Failed to create test MongoDB client");

    let state = Arc::new(AppState::new(config, mongo_client));

    TestApp {
        router: create_router(state.clone()),
        state,
    }
}

pub fn test_config(database: &str) -> Config {
    Config {
        mongo_uri: std::env::var("TEST_MONGO_URI")
            .unwrap_or_else(|_| "mongodb://localhost:27017".to_string()),
        mongo_database: database.to_string(),
        jwt_secret: "test-secret".to_string(),
        gamification: GamificationConfig::default(),
    }
}

/// URI of a live MongoDB for end-to-end tests; absent means skip them.
pub fn live_mongo_uri() -> Option<String> {
    std::env::var("TEST_MONGO_URI").ok()
}

/// Unique database name so parallel test binaries cannot collide.
pub fn unique_test_database() -> String {
    format!("questcoder_test_{}", ObjectId::new().to_hex())
}

pub fn mint_token(state: &AppState, user_id: &str, role: &str) -> String {
    let now = chrono::Utc::now().timestamp();
    JwtService::new(&state.config.jwt_secret)
        .generate_token(JwtClaims {
            sub: user_id.to_string(),
            role: role.to_string(),
            exp: (now + 3600) as usize,
            iat: now as usize,
        })
        .expect("Failed to mint test token")
}

pub fn user_token(state: &AppState, user_id: &ObjectId) -> String {
    mint_token(state, &user_id.to_hex(), "user")
}

pub fn admin_token(state: &AppState, user_id: &ObjectId) -> String {
    mint_token(state, &user_id.to_hex(), "admin")
}

pub fn get(uri: &str, token: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder().method("GET").uri(uri);
    if let Some(token) = token {
        builder = builder.header("authorization", format!("Bearer {}", token));
    }
    builder.body(Body::empty()).unwrap()
}

pub fn post_json(uri: &str, token: Option<&str>, body: serde_json::Value) -> Request<Body> {
    let mut builder = Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json");
    if let Some(token) = token {
        builder = builder.header("authorization", format!("Bearer {}", token));
    }
    builder.body(Body::from(body.to_string())).unwrap()
}

pub async fn response_json(response: Response<Body>) -> serde_json::Value {
    let bytes = response
        .into_body()
        .collect()
        .await
        .expect("Failed to read response body")
        .to_bytes();
    serde_json::from_slice(&bytes).expect("Response body is not JSON")
}
