//! Device - DLPack-Compatible `(device_type, device_id)` Pair

use std::fmt;
use std::str::FromStr;

use crate::error::{Result, RtError};

/// DLPack device type codes.
pub mod device_type {
    pub const CPU: i32 = 1;
    pub const CUDA: i32 = 2;
    pub const CUDA_HOST: i32 = 3;
    pub const OPENCL: i32 = 4;
    pub const VULKAN: i32 = 7;
    pub const METAL: i32 = 8;
    pub const VPI: i32 = 9;
    pub const ROCM: i32 = 10;
    pub const ROCM_HOST: i32 = 11;
    pub const EXT_DEV: i32 = 12;
    pub const CUDA_MANAGED: i32 = 13;
    pub const ONE_API: i32 = 14;
    pub const WEBGPU: i32 = 15;
    pub const HEXAGON: i32 = 16;
    pub const MAIA: i32 = 17;
}

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Device {
    pub device_type: i32,
    pub device_id: i32,
}

pub const DEVICE_CPU: Device = Device { device_type: device_type::CPU, device_id: 0 };

impl Device {
    pub const fn new(device_type: i32, device_id: i32) -> Device {
        Device { device_type, device_id }
    }

    /// Pack into a stable bit pattern for hashing.
    pub fn to_bits(&self) -> u64 {
        (self.device_type as u32 as u64) | ((self.device_id as u32 as u64) << 32)
    }

    fn type_str(device_type: i32) -> &'static str {
        use device_type::*;
        match device_type {
            CPU => "cpu",
            CUDA => "cuda",
            CUDA_HOST => "cuda_host",
            OPENCL => "opencl",
            VULKAN => "vulkan",
            METAL => "mps",
            VPI => "vpi",
            ROCM => "rocm",
            ROCM_HOST => "rocm_host",
            EXT_DEV => "ext_dev",
            CUDA_MANAGED => "cuda_managed",
            ONE_API => "oneapi",
            WEBGPU => "webgpu",
            HEXAGON => "hexagon",
            MAIA => "maia",
            _ => "unknown",
        }
    }

    fn type_from_str(name: &str) -> Option<i32> {
        use device_type::*;
        Some(match name {
            "cpu" | "llvm" => CPU,
            "cuda" | "nvptx" => CUDA,
            "cuda_host" => CUDA_HOST,
            "opencl" | "cl" | "sdaccel" => OPENCL,
            "vulkan" => VULKAN,
            "mps" | "metal" => METAL,
            "vpi" => VPI,
            "rocm" => ROCM,
            "rocm_host" => ROCM_HOST,
            "ext_dev" => EXT_DEV,
            "cuda_managed" => CUDA_MANAGED,
            "oneapi" => ONE_API,
            "webgpu" => WEBGPU,
            "hexagon" => HEXAGON,
            "maia" => MAIA,
            _ => return None,
        })
    }

    pub fn parse(source: &str) -> Result<Device> {
        let fail = || RtError::value_error(format!("Cannot convert to `Device` from string: {source}"));
        let (name, id) = match source.rfind(':') {
            Some(pos) => {
                let id: i32 = source[pos + 1..].parse().map_err(|_| fail())?;
                if id < 0 {
                    return Err(fail());
                }
                (&source[..pos], id)
            }
            None => (source, 0),
        };
        match Device::type_from_str(name) {
            Some(device_type) => Ok(Device::new(device_type, id)),
            None => Err(fail()),
        }
    }
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", Device::type_str(self.device_type), self.device_id)
    }
}

impl FromStr for Device {
    type Err = RtError;
    fn from_str(s: &str) -> Result<Device> {
        Device::parse(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_layout() {
        assert_eq!(std::mem::size_of::<Device>(), 8);
    }

    #[test]
    fn test_parse_with_and_without_id() {
        assert_eq!(Device::parse("cpu").unwrap(), DEVICE_CPU);
        assert_eq!(Device::parse("cuda:3").unwrap(), Device::new(device_type::CUDA, 3));
    }

    #[test]
    fn test_aliases() {
        assert_eq!(Device::parse("llvm").unwrap().device_type, device_type::CPU);
        assert_eq!(Device::parse("metal:1").unwrap(), Device::new(device_type::METAL, 1));
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(Device::parse("warp9").is_err());
        assert!(Device::parse("cuda:-1").is_err());
        assert_eq!(Device::parse("cuda:x").unwrap_err().kind, "ValueError");
    }

    #[test]
    fn test_display() {
        assert_eq!(Device::new(device_type::ROCM, 2).to_string(), "rocm:2");
    }
}
