use std::fmt;
use std::path::Path;
use std::str::FromStr;

use anyhow::{Context, Result};
#[allow(unused_imports)]
use ort::{
    ep::{self, ExecutionProvider},
    session::{
        builder::{GraphOptimizationLevel, SessionBuilder},
        Session,
    },
};
use serde::{Deserialize, Serialize};

/// Accelerator the extractor session is placed on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Device {
    #[default]
    Cpu,
    Cuda(i32),
    OpenVino,
}

impl FromStr for Device {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let s = s.trim().to_ascii_lowercase();
        match s.as_str() {
            "cpu" => Ok(Self::Cpu),
            "cuda" | "gpu" => Ok(Self::Cuda(0)),
            "openvino" => Ok(Self::OpenVino),
            _ => match s.strip_prefix("cuda:") {
                Some(id) => id
                    .parse()
                    .map(Self::Cuda)
                    .map_err(|_| format!("invalid cuda device id '{id}'")),
                None => Err(format!(
                    "unknown device '{s}', expected cpu, cuda[:id] or openvino"
                )),
            },
        }
    }
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Cpu => write!(f, "cpu"),
            Self::Cuda(id) => write!(f, "cuda:{id}"),
            Self::OpenVino => write!(f, "openvino"),
        }
    }
}

impl TryFrom<String> for Device {
    type Error = String;

    fn try_from(value: String) -> std::result::Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Device> for String {
    fn from(device: Device) -> Self {
        device.to_string()
    }
}

pub fn session_builder(device: Device) -> Result<SessionBuilder> {
    #[allow(unused_mut)]
    let mut builder =
        Session::builder()?.with_optimization_level(GraphOptimizationLevel::Level3)?;

    match device {
        Device::Cpu => {}
        Device::OpenVino => {
            #[cfg(feature = "openvino")]
            {
                let ep = ep::OpenVINO::default();
                if ep.is_available()? {
                    ep.register(&mut builder)?;
                } else {
                    log::warn!("openvino requested, onnx runtime not compiled with openvino")
                }
            }
            #[cfg(not(feature = "openvino"))]
            log::warn!("openvino requested but the openvino feature is disabled, using cpu");
        }
        Device::Cuda(_id) => {
            #[cfg(feature = "cuda")]
            {
                let ep = ep::CUDA::default().with_device_id(_id);
                if ep.is_available()? {
                    ep.register(&mut builder)?;
                } else {
                    log::warn!("cuda requested, onnx runtime not compiled with cuda")
                }
            }
            #[cfg(not(feature = "cuda"))]
            log::warn!("cuda requested but the cuda feature is disabled, using cpu");
        }
    }

    Ok(builder)
}

/// Loads the re-identification backbone. The model must emit the (1, C, H, W) map
/// of its last convolutional stage as its first output.
pub fn reid_session(model: &Path, device: Device) -> Result<Session> {
    session_builder(device)?
        .commit_from_file(model)
        .with_context(|| format!("load reid model {}", model.display()))
}
