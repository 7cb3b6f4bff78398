//! WebSocket transport for support chat events
//!
//! - **Connection**: an authenticated socket and its topic subscriptions
//! - **Room**: topic pub/sub (one per thread, plus the manager pool)
//! - **Gateway**: the support core's realtime sink, publishing into rooms
//! - **Handler**: Axum upgrade route and client event routing

pub mod connection;
pub mod events;
pub mod gateway;
pub mod handler;
pub mod room;
pub mod state;

pub use gateway::WsRealtimeGateway;
pub use handler::ws_handler;
pub use room::Topic;
pub use state::WebSocketState;
