//! Support chat between students and support managers
//!
//! - `thread`, `ledger` and `rating` hold the pure domain rules
//! - `store` persists threads behind a per-thread lock
//! - `service` orchestrates operations and publishes through `realtime`

pub mod error;
pub mod ledger;
pub mod model;
pub mod rating;
pub mod realtime;
pub mod service;
pub mod store;
pub mod thread;
pub mod view;

pub use error::{SupportError, SupportResult};
pub use realtime::{NoopGateway, RealtimeGateway};
pub use service::SupportService;
pub use store::{Directory, MemoryStore, PgSupportStore, SupportStore};
