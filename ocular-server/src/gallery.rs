// Browsing saved debug images

use crate::http::AppState;
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Path, Query, State,
    },
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use std::path::Path as FsPath;
use std::sync::Arc;
use std::time::SystemTime;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

const DEFAULT_PAGE_SIZE: usize = 50;
const MAX_PAGE_SIZE: usize = 500;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageParams {
    page: Option<usize>,
    page_size: Option<usize>,
}

/// One page of saved image names, newest first
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImagePage {
    pub images: Vec<String>,
    pub total_pages: usize,
    pub current_page: usize,
}

/// Notification pushed to gallery clients
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum GalleryEvent {
    #[serde(rename = "new_image")]
    NewImage { file: String },
}

/// Slice `names` (already sorted) into the requested page
pub fn paginate(names: Vec<String>, page: usize, page_size: usize) -> ImagePage {
    let page = page.max(1);
    let page_size = page_size.clamp(1, MAX_PAGE_SIZE);
    let total_pages = names.len().div_ceil(page_size);
    let images = names
        .into_iter()
        .skip((page - 1).saturating_mul(page_size))
        .take(page_size)
        .collect();

    ImagePage {
        images,
        total_pages,
        current_page: page,
    }
}

/// List images in `dir`, newest first. A missing directory is empty.
pub async fn list_images(dir: &FsPath, page: usize, page_size: usize) -> std::io::Result<ImagePage> {
    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Ok(paginate(Vec::new(), page, page_size))
        }
        Err(e) => return Err(e),
    };

    let mut files: Vec<(SystemTime, String)> = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        let name = match entry.file_name().into_string() {
            Ok(name) => name,
            Err(_) => continue,
        };
        if content_type(&name).is_none() {
            continue;
        }
        let metadata = entry.metadata().await?;
        if !metadata.is_file() {
            continue;
        }
        let modified = metadata.modified().unwrap_or(SystemTime::UNIX_EPOCH);
        files.push((modified, name));
    }

    files.sort_by(|a, b| b.0.cmp(&a.0).then_with(|| b.1.cmp(&a.1)));
    let names = files.into_iter().map(|(_, name)| name).collect();
    Ok(paginate(names, page, page_size))
}

fn content_type(name: &str) -> Option<&'static str> {
    let ext = FsPath::new(name).extension()?.to_str()?.to_ascii_lowercase();
    match ext.as_str() {
        "jpg" | "jpeg" => Some("image/jpeg"),
        "png" => Some("image/png"),
        "webp" => Some("image/webp"),
        "bmp" => Some("image/bmp"),
        _ => None,
    }
}

/// A served name must be a single plain path component
fn is_safe_name(name: &str) -> bool {
    !name.is_empty()
        && !name.contains("..")
        && !name.contains('/')
        && !name.contains('\\')
        && !name.starts_with('.')
}

pub async fn list_images_handler(
    Query(params): Query<PageParams>,
    State(state): State<Arc<AppState>>,
) -> Response {
    let page = params.page.unwrap_or(1);
    let page_size = params.page_size.unwrap_or(DEFAULT_PAGE_SIZE);

    match list_images(&state.debug_dir, page, page_size).await {
        Ok(listing) => Json(listing).into_response(),
        Err(e) => {
            error!("Error reading images directory {:?}: {}", state.debug_dir, e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(serde_json::json!({ "error": "Could not read images directory" })),
            )
                .into_response()
        }
    }
}

pub async fn image_file_handler(
    Path(name): Path<String>,
    State(state): State<Arc<AppState>>,
) -> Response {
    if !is_safe_name(&name) {
        return (StatusCode::BAD_REQUEST, "Invalid path").into_response();
    }
    let mime = match content_type(&name) {
        Some(mime) => mime,
        None => return (StatusCode::NOT_FOUND, "Not found").into_response(),
    };

    match tokio::fs::read(state.debug_dir.join(&name)).await {
        Ok(data) => ([(header::CONTENT_TYPE, mime)], data).into_response(),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            (StatusCode::NOT_FOUND, "Not found").into_response()
        }
        Err(e) => {
            error!("Failed to read image {}: {}", name, e);
            (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error").into_response()
        }
    }
}

pub async fn gallery_ws_handler(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> Response {
    let events = state.debug_sink.as_ref().map(|sink| sink.subscribe());
    ws.on_upgrade(move |socket| handle_gallery_socket(socket, events))
}

async fn handle_gallery_socket(socket: WebSocket, events: Option<broadcast::Receiver<String>>) {
    info!("Gallery client connected");
    let (mut sender, mut receiver) = socket.split();

    let Some(mut events) = events else {
        // Nothing will ever be announced; hold the socket until the client leaves
        while let Some(Ok(msg)) = receiver.next().await {
            if matches!(msg, Message::Close(_)) {
                break;
            }
        }
        info!("Gallery client disconnected");
        return;
    };

    loop {
        tokio::select! {
            event = events.recv() => match event {
                Ok(file) => {
                    let json = match serde_json::to_string(&GalleryEvent::NewImage { file }) {
                        Ok(json) => json,
                        Err(e) => {
                            error!("Failed to serialize gallery event: {}", e);
                            continue;
                        }
                    };
                    if let Err(e) = sender.send(Message::Text(json)).await {
                        debug!("Gallery client send failed: {}", e);
                        break;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!("Gallery client lagged, skipped {} notifications", skipped);
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
            msg = receiver.next() => match msg {
                Some(Ok(Message::Close(_))) | None | Some(Err(_)) => break,
                Some(Ok(_)) => {}
            },
        }
    }
    info!("Gallery client disconnected");
}
