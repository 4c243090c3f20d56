//! HTTP transport: health, info and JSON-RPC endpoints.

mod api;
mod auth;
mod error;
mod handlers;
mod server;

pub use api::{HealthResponse, NotFoundResponse, ServerInfo};
pub use auth::require_auth;
pub use error::ServerError;
pub use handlers::{get_health, get_info, not_found, post_rpc, status_for, AppState};
pub use server::HttpServer;
