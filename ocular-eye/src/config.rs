//! Configuration for ocular-eye

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

/// Compute device requested for inference
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Device {
    /// Use CUDA when available, fall back to CPU
    Auto,
    Cpu,
    Cuda,
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Device::Auto => write!(f, "auto"),
            Device::Cpu => write!(f, "cpu"),
            Device::Cuda => write!(f, "cuda"),
        }
    }
}

impl FromStr for Device {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "auto" => Ok(Device::Auto),
            "cpu" => Ok(Device::Cpu),
            "cuda" | "gpu" => Ok(Device::Cuda),
            other => Err(format!("Unknown device '{}' (expected auto, cpu or cuda)", other)),
        }
    }
}

/// Detection engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineSettings {
    /// Path to the ONNX model weights
    pub path: PathBuf,
    /// Optional class-name file, one label per line (COCO names otherwise)
    pub labels_path: Option<PathBuf>,
    /// Compute device
    pub device: Device,
    /// Square model input edge in pixels
    pub input_size: u32,
    /// Run one dummy prediction before accepting connections
    pub warm_up: bool,
}

impl Default for EngineSettings {
    fn default() -> Self {
        let path = dirs::home_dir()
            .map(|mut p| {
                p.push(".ocular");
                p.push("models");
                p.push("yolov8x-worldv2.onnx");
                p
            })
            .unwrap_or_else(|| PathBuf::from("./models/yolov8x-worldv2.onnx"));

        Self {
            path,
            labels_path: None,
            device: Device::Auto,
            input_size: 640,
            warm_up: true,
        }
    }
}

impl EngineSettings {
    /// Validate configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.path.as_os_str().is_empty() {
            return Err("Model path cannot be empty".to_string());
        }

        if self.input_size == 0 || self.input_size > 4096 {
            return Err("Input size must be between 1 and 4096".to_string());
        }

        if self.input_size % 32 != 0 {
            return Err("Input size must be a multiple of 32".to_string());
        }

        Ok(())
    }

    /// Model identity derived from the weights file name
    pub fn model_name(&self) -> String {
        self.path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "unknown".to_string())
    }
}
