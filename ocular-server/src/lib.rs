//! ocular-server: streaming object detection over WebSocket
//!
//! Each connection is a session that buffers binary frames, applies
//! settings updates between batches, and runs one batched inference call
//! per `{"type": "batch_complete"}` release.

pub mod batch;
pub mod config;
pub mod debug_sink;
pub mod error;
pub mod gallery;
pub mod http;
pub mod protocol;
pub mod session;
pub mod session_loop;
pub mod websocket;

pub use config::{ConfigError, ServerConfig};
pub use error::SessionError;
pub use http::{create_router, AppState};
pub use protocol::{Inbound, Outbound, ResultFraming};
pub use session_loop::{run_session, SessionContext};
