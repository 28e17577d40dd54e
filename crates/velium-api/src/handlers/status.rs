//! /status handler.

use axum::extract::State;
use axum::Json;
use serde::Serialize;

use super::ApiState;

#[derive(Serialize)]
pub struct StatusResponse {
    pub sessions: usize,
    pub tcp_clients: usize,
    pub udp_clients: usize,
}

pub async fn handle_status(State(state): State<ApiState>) -> Json<StatusResponse> {
    let gateway = &state.gateway;
    Json(StatusResponse {
        sessions: gateway.session_count(),
        tcp_clients: gateway.tcp().client_count(),
        udp_clients: gateway.udp().client_count(),
    })
}
