use axum::{
    extract::{
        ws::{CloseFrame, Message, WebSocketUpgrade},
        Query, State,
    },
    http::HeaderMap,
    response::Response,
};
use serde::Deserialize;

use crate::auth::jwt;
use crate::state::AppState;
use crate::ws::actor;

/// Rejected handshakes close with the policy-violation code and a short
/// reason string the client can act on.
const CLOSE_POLICY_VIOLATION: u16 = 1008;
const REASON_AUTH_REQUIRED: &str = "Authentication required";
const REASON_INVALID_TOKEN: &str = "Invalid token";

/// Query parameters for WebSocket connection.
#[derive(Debug, Default, Deserialize)]
pub struct WsAuthQuery {
    pub token: Option<String>,
}

/// GET /ws?token=JWT
/// WebSocket upgrade endpoint. The bearer token comes from the `token`
/// query parameter or an Authorization header; an optional `device-id`
/// header labels the client class for coarse counting. On auth failure the
/// upgrade is accepted and immediately closed with code 1008 — registry
/// state is never touched before the gate passes. Each handshake attempt is
/// independent; the client reconnects with a fresh token.
pub async fn ws_upgrade(
    State(state): State<AppState>,
    Query(params): Query<WsAuthQuery>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> Response {
    let token = params.token.or_else(|| {
        headers
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
            .map(str::to_string)
    });

    let Some(token) = token else {
        tracing::warn!("WebSocket handshake without credentials");
        return reject(ws, REASON_AUTH_REQUIRED);
    };

    match jwt::validate_access_token(&state.jwt_secret, &token) {
        Ok(claims) => {
            let device_tag = headers
                .get("device-id")
                .and_then(|v| v.to_str().ok())
                .map(str::to_string);

            tracing::info!(
                identity = %claims.sub,
                device_tag = ?device_tag,
                "WebSocket connection authenticated"
            );

            ws.on_upgrade(move |socket| actor::run_connection(socket, state, claims.sub, device_tag))
        }
        Err(e) => {
            tracing::warn!(error = %e, "WebSocket auth failed");
            reject(ws, REASON_INVALID_TOKEN)
        }
    }
}

/// Accept the upgrade, then immediately close it with 1008 and a reason.
fn reject(ws: WebSocketUpgrade, reason: &'static str) -> Response {
    ws.on_upgrade(move |mut socket| async move {
        let close_frame = CloseFrame {
            code: CLOSE_POLICY_VIOLATION,
            reason: reason.into(),
        };
        let _ = socket.send(Message::Close(Some(close_frame))).await;
    })
}
