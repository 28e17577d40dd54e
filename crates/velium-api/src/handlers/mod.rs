//! HTTP API handlers — exposes gateway state as JSON.

pub mod sessions;
pub mod status;

use std::sync::Arc;

use axum::http::StatusCode;

use velium_core::SessionId;
use velium_services::Gateway;

#[derive(Clone)]
pub struct ApiState {
    pub gateway: Arc<Gateway>,
}

/// Parse a hex-encoded 16-byte session ID.
fn parse_session_id(hex_str: &str) -> Result<SessionId, (StatusCode, String)> {
    SessionId::from_hex(hex_str).map_err(|e| (StatusCode::BAD_REQUEST, e.to_string()))
}

pub use sessions::{handle_session_drop, handle_session_inspect, handle_session_list};
pub use status::handle_status;
