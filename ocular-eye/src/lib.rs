//! ocular-eye: vision side of the ocular detection server
//!
//! Decodes client frames, defines the detection engine boundary, and wraps
//! engines in an async adapter that runs one batched call per release.

pub mod adapter;
pub mod codec;
pub mod config;
pub mod detection;
pub mod engine;
pub mod error;
pub mod models;
pub mod utils;

pub use adapter::DetectionAdapter;
pub use codec::{decode_batch, decode_frame, DecodedImage};
pub use config::{Device, EngineSettings};
pub use detection::{BatchResult, Detection, DetectionParams, Roi};
pub use engine::DetectionEngine;
pub use error::EyeError;
