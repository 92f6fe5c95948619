//! Kaizen API - HTTP Surface and Tool Handlers
//!
//! Thin adapters over the facade client: an axum router for namespace and
//! entity CRUD plus a dashboard aggregate, and the tool-protocol handler set
//! consumed by an external RPC host. No stack traces cross either boundary.

pub mod error;
pub mod routes;
pub mod tools;

pub use error::{ApiError, ApiResult};
pub use routes::router;
pub use tools::ToolHandlers;
