//! Shared application state

use sqlx::PgPool;
use std::sync::Arc;

use crate::auth::JwtManager;
use crate::config::Config;
use crate::support::{PgSupportStore, SupportService};
use crate::websocket::{WebSocketState, WsRealtimeGateway};

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub jwt: JwtManager,
    pub support: SupportService,
    pub ws_state: WebSocketState,
}

impl AppState {
    /// Production wiring: Postgres store and directory, WebSocket fan-out
    pub fn new(config: Config, pool: PgPool) -> Self {
        let ws_state = WebSocketState::new();
        let store = Arc::new(PgSupportStore::new(pool));
        let support = SupportService::new(
            store.clone(),
            store,
            Arc::new(WsRealtimeGateway::new(ws_state.clone())),
        )
        .with_deadline(config.support_op_timeout());

        Self::with_support(config, support, ws_state)
    }

    /// Wire a prebuilt support service (used by tests with the in-memory store)
    pub fn with_support(
        config: Config,
        support: SupportService,
        ws_state: WebSocketState,
    ) -> Self {
        let jwt = JwtManager::new(&config.jwt_secret, config.jwt_expiry_hours);
        Self {
            config: Arc::new(config),
            jwt,
            support,
            ws_state,
        }
    }
}
