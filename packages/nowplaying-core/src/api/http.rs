//! HTTP route handlers.
//!
//! All handlers are thin - they delegate to the manager and the store.

use axum::{
    extract::{Query, State},
    http::{header, HeaderValue, Method, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::{json, Value};
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::api::native::{native_commands_handler, publish_now_playing};
use crate::api::response::{api_error, api_success};
use crate::api::ws::ws_handler;
use crate::api::{AppState, AuthQuery};
use crate::error::PlaybackError;
use crate::playback::HandlerConfig;
use crate::protocol_constants::{HANDLER_NONE, SERVICE_ID};
use crate::store::HandlerSettings;

// ─────────────────────────────────────────────────────────────────────────────
// Router
// ─────────────────────────────────────────────────────────────────────────────

/// Creates the Axum router with all routes.
pub fn create_router(state: AppState) -> Router {
    let cors = cors_layer(&state.config.trusted_origins);

    Router::new()
        .route("/health", get(health_check))
        .route("/api/handler", get(get_handler).put(put_handler))
        .route("/api/native/now-playing", post(publish_now_playing))
        .route("/api/native/commands", get(native_commands_handler))
        .route("/ws", get(ws_handler))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn cors_layer(trusted_origins: &[String]) -> CorsLayer {
    let origin = if trusted_origins.is_empty() {
        AllowOrigin::any()
    } else {
        log::info!("CORS trusted origins: {:?}", trusted_origins);
        let trusted = trusted_origins.to_vec();
        AllowOrigin::predicate(move |origin: &HeaderValue, _| {
            let origin = origin.to_str().unwrap_or("");
            trusted.iter().any(|allowed| origin.starts_with(allowed))
        })
    };

    CorsLayer::new()
        .allow_origin(origin)
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION])
        .allow_credentials(false)
}

/// Rejects the request unless `auth` carries the configured client token.
pub(crate) fn require_token(state: &AppState, auth: &AuthQuery) -> Result<(), Response> {
    if state.is_authorized(auth.token.as_deref()) {
        Ok(())
    } else {
        Err(api_error(StatusCode::UNAUTHORIZED, "unauthorized", "invalid token").into_response())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Handlers
// ─────────────────────────────────────────────────────────────────────────────

/// Liveness probe with the active handler name.
async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    api_success(json!({
        "status": "ok",
        "service": SERVICE_ID,
        "handler": state.manager.active_name(),
    }))
}

fn handler_status(state: &AppState) -> Value {
    json!({
        "name": state.manager.active_name().unwrap_or_else(|| HANDLER_NONE.to_string()),
        "state": state.manager.state(),
        "available": state.manager.available_handlers(),
    })
}

/// GET /api/handler
async fn get_handler(State(state): State<AppState>) -> impl IntoResponse {
    api_success(handler_status(&state))
}

#[derive(Debug, Deserialize)]
struct ActivateRequest {
    name: String,
    #[serde(default)]
    config: Value,
}

/// PUT /api/handler
///
/// Activates `name` with `config`. The selection and blob are persisted only
/// after activation succeeded, so a rejected config leaves the stored
/// settings untouched.
async fn put_handler(
    State(state): State<AppState>,
    Query(auth): Query<AuthQuery>,
    Json(payload): Json<ActivateRequest>,
) -> Response {
    if let Err(rejection) = require_token(&state, &auth) {
        return rejection;
    }

    let config = HandlerConfig::new(payload.config);
    if let Err(e) = state.manager.activate(&payload.name, config.clone()).await {
        return e.into_response();
    }

    let settings = HandlerSettings::new(state.store.as_ref());
    let persisted = if payload.name == HANDLER_NONE {
        settings.record_deactivation()
    } else {
        settings.record_activation(&payload.name, &config)
    };
    if let Err(e) = persisted {
        return PlaybackError::from(e).into_response();
    }

    api_success(handler_status(&state)).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    use crate::api::test_support::{spawn_server, test_state};
    use crate::state::Config;

    #[tokio::test]
    async fn health_reports_service_and_handler() {
        let (state, _store) = test_state(Config::default());
        let addr = spawn_server(state).await;

        let body: Value = reqwest::get(format!("http://{addr}/health"))
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(body["status"], "ok");
        assert_eq!(body["service"], SERVICE_ID);
        assert_eq!(body["handler"], Value::Null);
    }

    #[tokio::test]
    async fn put_handler_activates_and_persists() {
        let (state, store) = test_state(Config::default());
        let manager = Arc::clone(&state.manager);
        let addr = spawn_server(state).await;
        let client = reqwest::Client::new();

        let response = client
            .put(format!("http://{addr}/api/handler"))
            .json(&json!({"name": "native", "config": {}}))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 200);
        let body: Value = response.json().await.unwrap();
        assert_eq!(body["name"], "native");
        assert_eq!(body["state"], "active");

        assert_eq!(manager.active_name().as_deref(), Some("native"));
        let settings = HandlerSettings::new(store.as_ref());
        assert_eq!(settings.active_handler().as_deref(), Some("native"));

        let response = client
            .put(format!("http://{addr}/api/handler"))
            .json(&json!({"name": "none"}))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 200);
        assert_eq!(settings.active_handler(), None);
        assert!(settings.handler_config("native").is_some());
    }

    #[tokio::test]
    async fn invalid_config_is_rejected_and_not_persisted() {
        let (state, store) = test_state(Config::default());
        let addr = spawn_server(state).await;

        let response = reqwest::Client::new()
            .put(format!("http://{addr}/api/handler"))
            .json(&json!({"name": "native", "config": "nope"}))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 400);
        let body: Value = response.json().await.unwrap();
        assert_eq!(body["error"], "config_invalid");
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn handler_switch_requires_token_when_configured() {
        let config = Config {
            client_token: Some("secret".into()),
            ..Config::default()
        };
        let (state, _store) = test_state(config);
        let addr = spawn_server(state).await;
        let client = reqwest::Client::new();

        let response = client
            .put(format!("http://{addr}/api/handler"))
            .json(&json!({"name": "none"}))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 401);

        let response = client
            .put(format!("http://{addr}/api/handler?token=secret"))
            .json(&json!({"name": "none"}))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 200);
    }

    #[tokio::test]
    async fn native_push_feeds_active_handler() {
        let (state, _store) = test_state(Config::default());
        let manager = Arc::clone(&state.manager);
        manager
            .activate("native", HandlerConfig::default())
            .await
            .unwrap();
        let addr = spawn_server(state).await;

        let response = reqwest::Client::new()
            .post(format!("http://{addr}/api/native/now-playing"))
            .json(&json!({"title": "Pushed", "isPlaying": true}))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 200);

        let mut snapshot = None;
        for _ in 0..50 {
            snapshot = manager.get_snapshot().await;
            if snapshot.is_some() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(snapshot.unwrap().track.name, "Pushed");
    }
}
