//! telemetry relay: one mqtt device in, many dashboard viewers out.
//!
//! the binary in main.rs wires these together; `viewer` is the client-side
//! half and is not used by the server at all.

pub mod api;
pub mod bridge;
pub mod config;
pub mod domain;
pub mod error;
pub mod gateway;
pub mod store;
pub mod viewer;

pub use api::{router, AppState};
pub use bridge::{TelemetryBridge, ViewerId, ViewerSession};
pub use config::RelayConfig;
pub use domain::{Reading, TelemetryPayload, ViewerEvent, ViewerRequest};
pub use store::ReadingStore;
