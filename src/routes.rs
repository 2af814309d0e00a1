use axum::{
    extract::{Path, State},
    http::StatusCode,
    middleware, Json, Router,
};
use serde::{Deserialize, Serialize};

use crate::auth::middleware::{Claims, JwtSecret};
use crate::state::AppState;
use crate::ws::handler as ws_handler;
use crate::ws::registry::ClientCounts;

/// Inject the JWT secret into request extensions so the Claims extractor can find it.
async fn inject_jwt_secret(
    State(state): State<AppState>,
    mut req: axum::http::Request<axum::body::Body>,
    next: middleware::Next,
) -> axum::response::Response {
    req.extensions_mut()
        .insert(JwtSecret(state.jwt_secret.clone()));
    next.run(req).await
}

/// GET /api/realtime/stats — connected-client counts, total plus a
/// per-device-class breakdown (web vs mobile reporting). JWT required.
async fn realtime_stats(State(state): State<AppState>, _claims: Claims) -> Json<ClientCounts> {
    Json(state.gateway.connected_clients())
}

#[derive(Debug, Serialize)]
struct SubscriberCountResponse {
    topic: String,
    subscribers: usize,
}

/// GET /api/realtime/topics/{topic}/subscribers — membership count for one
/// topic. Reporting only; broadcast delivery does not consult this. JWT required.
async fn topic_subscribers(
    State(state): State<AppState>,
    _claims: Claims,
    Path(topic): Path<String>,
) -> Json<SubscriberCountResponse> {
    let subscribers = state.gateway.subscriber_count(&topic);
    Json(SubscriberCountResponse { topic, subscribers })
}

#[derive(Debug, Deserialize)]
struct SubscriptionRequest {
    topics: Vec<String>,
}

/// POST /api/realtime/subscriptions — opt the calling user's connection into
/// topics. JWT required. No-op if the user has no active connection.
async fn subscribe_topics(
    State(state): State<AppState>,
    claims: Claims,
    Json(body): Json<SubscriptionRequest>,
) -> StatusCode {
    state.gateway.subscribe(&claims.sub, &body.topics);
    StatusCode::NO_CONTENT
}

/// DELETE /api/realtime/subscriptions — drop topics from the calling user's
/// connection. JWT required.
async fn unsubscribe_topics(
    State(state): State<AppState>,
    claims: Claims,
    Json(body): Json<SubscriptionRequest>,
) -> StatusCode {
    state.gateway.unsubscribe(&claims.sub, &body.topics);
    StatusCode::NO_CONTENT
}

/// Build the full axum Router with all routes and middleware.
pub fn build_router(state: AppState) -> Router {
    // WebSocket endpoint (auth via query param or Authorization header)
    let ws_routes = Router::new().route("/ws", axum::routing::get(ws_handler::ws_upgrade));

    // Reporting and subscription endpoints consumed by feature services
    let api_routes = Router::new()
        .route("/api/realtime/stats", axum::routing::get(realtime_stats))
        .route(
            "/api/realtime/topics/{topic}/subscribers",
            axum::routing::get(topic_subscribers),
        )
        .route(
            "/api/realtime/subscriptions",
            axum::routing::post(subscribe_topics).delete(unsubscribe_topics),
        );

    // Health check
    let health = Router::new().route("/health", axum::routing::get(health_check));

    Router::new()
        .merge(ws_routes)
        .merge(api_routes)
        .merge(health)
        .layer(middleware::from_fn_with_state(
            state.clone(),
            inject_jwt_secret,
        ))
        .with_state(state)
}

/// Basic health check endpoint
async fn health_check() -> &'static str {
    "ok"
}
