pub mod handlers;

use axum::routing::get;
use axum::Router;
use tower_http::cors::{Any, CorsLayer};

pub use handlers::ApiState;

pub fn router(state: ApiState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let api_routes = Router::new()
        .route("/status", get(handlers::handle_status))
        .route("/sessions", get(handlers::handle_session_list))
        .route(
            "/sessions/{id}",
            get(handlers::handle_session_inspect).delete(handlers::handle_session_drop),
        )
        .with_state(state);

    Router::new().nest("/api", api_routes).layer(cors)
}

pub async fn serve(state: ApiState, port: u16) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(format!("127.0.0.1:{}", port)).await?;
    tracing::info!(port, "API listening on 127.0.0.1");
    axum::serve(listener, router(state)).await?;
    Ok(())
}
