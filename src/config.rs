use anyhow::{Context, Result};
use alignreid_vision::{Device, InputShape, Normalization, Pooling, DEFAULT_PARTS};
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub static CONFIG_PATH: Lazy<PathBuf> = Lazy::new(|| match option_env!("ALIGNREID_CONFIG_PATH") {
    Some(path) => PathBuf::from(path),
    None => directories::ProjectDirs::from("", "", "alignreid")
        .map(|dirs| dirs.config_dir().join("config.toml"))
        .unwrap_or_else(|| PathBuf::from("alignreid.toml")),
});

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub model: PathBuf,
    pub device: Device,
    pub parts: usize,
    pub pooling: Pooling,
    pub input_height: u32,
    pub input_width: u32,
    pub mean: [f32; 3],
    pub std: [f32; 3],
    pub workers: usize,
    pub timeout_secs: Option<u64>,
}

impl Default for Config {
    fn default() -> Self {
        let shape = InputShape::default();
        let norm = Normalization::default();
        Self {
            model: PathBuf::from("models/alignedreid_resnet50.onnx"),
            device: Device::Cpu,
            parts: DEFAULT_PARTS,
            pooling: Pooling::Max,
            input_height: shape.height,
            input_width: shape.width,
            mean: norm.mean,
            std: norm.std,
            workers: 1,
            timeout_secs: None,
        }
    }
}

impl Config {
    pub fn input_shape(&self) -> InputShape {
        InputShape {
            height: self.input_height,
            width: self.input_width,
        }
    }

    pub fn normalization(&self) -> Normalization {
        Normalization {
            mean: self.mean,
            std: self.std,
        }
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_secs.map(Duration::from_secs)
    }

    pub fn validate(&self) -> Result<()> {
        if self.parts == 0 {
            anyhow::bail!("parts must be at least 1");
        }
        if self.input_height == 0 || self.input_width == 0 {
            anyhow::bail!(
                "input size must be non-zero, got {}x{}",
                self.input_height,
                self.input_width
            );
        }
        if self.std.iter().any(|&s| s == 0.0) {
            anyhow::bail!("normalization std must be non-zero");
        }
        Ok(())
    }
}

pub fn load_config(path: Option<&Path>) -> Result<Config> {
    let path = path.unwrap_or(&CONFIG_PATH);
    if !path.exists() {
        return Ok(Config::default());
    }
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("reading config at {}", path.display()))?;
    toml::from_str(&raw).with_context(|| format!("parsing config {}", path.display()))
}
