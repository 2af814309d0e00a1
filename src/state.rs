use std::sync::Arc;

use crate::ws::gateway::RealtimeGateway;

/// Shared application state passed to all handlers via axum State extractor.
#[derive(Clone)]
pub struct AppState {
    /// JWT signing secret (256-bit random key)
    pub jwt_secret: Vec<u8>,
    /// The real-time connection and broadcast core
    pub gateway: Arc<RealtimeGateway>,
}
