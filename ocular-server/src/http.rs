// HTTP router and shared application state

use crate::debug_sink::DebugSink;
use crate::gallery::{gallery_ws_handler, image_file_handler, list_images_handler};
use crate::protocol::ResultFraming;
use crate::session_loop::SessionContext;
use crate::websocket::ws_handler;
use axum::{extract::State, response::IntoResponse, routing::get, Json, Router};
use ocular_eye::DetectionAdapter;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

/// State shared by every handler
pub struct AppState {
    pub adapter: DetectionAdapter,
    pub debug_sink: Option<DebugSink>,
    pub framing: ResultFraming,
    /// Where the debug sink writes, served by the gallery
    pub debug_dir: PathBuf,
}

impl AppState {
    pub fn session_context(&self) -> SessionContext {
        SessionContext {
            adapter: self.adapter.clone(),
            debug_sink: self.debug_sink.clone(),
            framing: self.framing,
        }
    }
}

pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/ws", get(ws_handler))
        .route("/api/images", get(list_images_handler))
        .route("/images/ws", get(gallery_ws_handler))
        .route("/images/:name", get(image_file_handler))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub model: String,
    pub device: String,
    pub version: String,
}

async fn health_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(HealthResponse {
        status: "healthy".to_string(),
        model: state.adapter.model_name().to_string(),
        device: state.adapter.device().to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}
