use crate::error::{Error, Result};
use burn::prelude::*;
use burn::record::{FullPrecisionSettings, NamedMpkFileRecorder};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

pub type Element = f32;

#[cfg(feature = "wgpu")]
pub type MainBackend = burn::backend::wgpu::Wgpu<Element, i32>;
#[cfg(all(feature = "tch", not(feature = "wgpu")))]
pub type MainBackend = burn::backend::libtorch::LibTorch<Element>;
#[cfg(all(feature = "ndarray", not(any(feature = "wgpu", feature = "tch"))))]
pub type MainBackend = burn::backend::NdArray<Element, i32>;

/// Weights are stored in full precision so that a reloaded checkpoint
/// reproduces the evaluated model exactly.
pub type RecorderTy = NamedMpkFileRecorder<FullPrecisionSettings>;

/// Which device the experiment runs on.
///
/// The backend itself is chosen at compile time through the crate features,
/// the device within that backend is chosen at runtime from the configuration.
/// Configuration files use the command-line spelling (`cpu`, `cuda:1`, `mps`).
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub enum DeviceKind {
    #[default]
    Cpu,
    Cuda(usize),
    Mps,
}

impl fmt::Display for DeviceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceKind::Cpu => write!(f, "cpu"),
            DeviceKind::Cuda(index) => write!(f, "cuda:{index}"),
            DeviceKind::Mps => write!(f, "mps"),
        }
    }
}

impl From<DeviceKind> for String {
    fn from(kind: DeviceKind) -> Self {
        kind.to_string()
    }
}

impl TryFrom<String> for DeviceKind {
    type Error = Error;

    fn try_from(s: String) -> Result<Self> {
        s.parse()
    }
}

impl FromStr for DeviceKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "cpu" => Ok(DeviceKind::Cpu),
            "cuda" | "gpu" => Ok(DeviceKind::Cuda(0)),
            "mps" => Ok(DeviceKind::Mps),
            other => other
                .strip_prefix("cuda:")
                .and_then(|index| index.parse().ok())
                .map(DeviceKind::Cuda)
                .ok_or_else(|| Error::InvalidDevice(s.to_string())),
        }
    }
}

pub trait MainDevice: Backend {
    fn main_device(kind: DeviceKind) -> Result<<Self as Backend>::Device>;
}

#[cfg(all(feature = "ndarray", not(any(feature = "wgpu", feature = "tch"))))]
impl MainDevice for MainBackend {
    fn main_device(kind: DeviceKind) -> Result<<Self as Backend>::Device> {
        match kind {
            DeviceKind::Cpu => Ok(burn::backend::ndarray::NdArrayDevice::Cpu),
            other => Err(Error::UnsupportedDevice {
                device: other,
                backend: "ndarray",
            }),
        }
    }
}

#[cfg(all(feature = "tch", not(feature = "wgpu")))]
impl MainDevice for MainBackend {
    fn main_device(kind: DeviceKind) -> Result<<Self as Backend>::Device> {
        use burn::backend::libtorch::LibTorchDevice;
        Ok(match kind {
            DeviceKind::Cpu => LibTorchDevice::Cpu,
            DeviceKind::Cuda(index) => LibTorchDevice::Cuda(index),
            DeviceKind::Mps => LibTorchDevice::Mps,
        })
    }
}

#[cfg(feature = "wgpu")]
impl MainDevice for MainBackend {
    fn main_device(kind: DeviceKind) -> Result<<Self as Backend>::Device> {
        use burn::backend::wgpu::WgpuDevice;
        Ok(match kind {
            DeviceKind::Cpu => WgpuDevice::Cpu,
            DeviceKind::Cuda(index) => WgpuDevice::DiscreteGpu(index),
            DeviceKind::Mps => WgpuDevice::DefaultDevice,
        })
    }
}

#[cfg(not(feature = "_has-backend"))]
mod err {
    use super::*;
    std::compile_error!(
        "No backend selected. Enable one of the `ndarray`, `wgpu` or `tch` features."
    );

    // pretend to fallback to ndarray (to avoid too many other unrelated errors)
    pub type MainBackend = burn::backend::NdArray<Element, i32>;
    impl MainDevice for MainBackend {
        fn main_device(_kind: DeviceKind) -> Result<<Self as Backend>::Device> {
            Ok(Default::default())
        }
    }
}
#[cfg(not(feature = "_has-backend"))]
pub use err::*;
