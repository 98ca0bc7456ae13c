//! Axum web adapter and composition root.
//!
//! Handlers delegate to the shared [`state::AppContext`]; this crate is the
//! only place domain errors are mapped to HTTP status codes.

pub mod bootstrap;
pub mod error;
pub mod routes;
pub mod setup;
pub mod state;

mod dto;
mod handlers;
mod sse;

pub use bootstrap::{ServerConfig, bootstrap};
pub use error::HttpError;
pub use routes::create_router;
pub use setup::{AutoSetupManager, EngineSetupConfig};
pub use state::{AppContext, AppState};
