/// Compute device selection
///
/// The candle `Device` is the backend capability (allocation, transfer,
/// gradients); this module only turns the `--device` string into one.
use std::fmt;
use std::str::FromStr;

use candle_core::Device;

/// Parsed `--device` value
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceSpec {
    Cpu,
    Cuda(usize),
    Metal(usize),
}

impl FromStr for DeviceSpec {
    type Err = crate::ForecastError;

    fn from_str(s: &str) -> crate::Result<Self> {
        let s = s.trim().to_ascii_lowercase();
        let (kind, ordinal) = match s.split_once(':') {
            Some((kind, ordinal)) => {
                let ordinal = ordinal.parse::<usize>().map_err(|_| {
                    crate::ForecastError::Config(format!("invalid device ordinal in '{}'", s))
                })?;
                (kind, ordinal)
            }
            None => (s.as_str(), 0),
        };

        match kind {
            "cpu" => Ok(DeviceSpec::Cpu),
            "cuda" | "gpu" => Ok(DeviceSpec::Cuda(ordinal)),
            "metal" | "mps" => Ok(DeviceSpec::Metal(ordinal)),
            _ => Err(crate::ForecastError::Config(format!(
                "unknown device '{}'. Must be cpu, cuda[:N] or metal[:N]",
                s
            ))),
        }
    }
}

impl fmt::Display for DeviceSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceSpec::Cpu => write!(f, "cpu"),
            DeviceSpec::Cuda(n) => write!(f, "cuda:{}", n),
            DeviceSpec::Metal(n) => write!(f, "metal:{}", n),
        }
    }
}

impl DeviceSpec {
    /// Open the device, failing with a resource error when the backend is
    /// missing from this build or the ordinal does not exist
    pub fn open(&self) -> crate::Result<Device> {
        let device = match self {
            DeviceSpec::Cpu => Ok(Device::Cpu),
            DeviceSpec::Cuda(n) => Device::new_cuda(*n),
            DeviceSpec::Metal(n) => Device::new_metal(*n),
        };

        device.map_err(|e| {
            crate::ForecastError::Resource(format!("device {} unavailable: {}", self, e))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_device_strings() {
        assert_eq!("cpu".parse::<DeviceSpec>().unwrap(), DeviceSpec::Cpu);
        assert_eq!("cuda".parse::<DeviceSpec>().unwrap(), DeviceSpec::Cuda(0));
        assert_eq!("cuda:6".parse::<DeviceSpec>().unwrap(), DeviceSpec::Cuda(6));
        assert_eq!("Metal:1".parse::<DeviceSpec>().unwrap(), DeviceSpec::Metal(1));
    }

    #[test]
    fn test_parse_rejects_unknown() {
        assert!(matches!(
            "tpu:0".parse::<DeviceSpec>(),
            Err(crate::ForecastError::Config(_))
        ));
        assert!("cuda:x".parse::<DeviceSpec>().is_err());
    }

    #[test]
    fn test_open_cpu() {
        let device = DeviceSpec::Cpu.open().unwrap();
        assert!(device.is_cpu());
    }

    #[cfg(not(feature = "cuda"))]
    #[test]
    fn test_missing_backend_is_resource_error() {
        let err = DeviceSpec::Cuda(0).open().unwrap_err();
        assert!(matches!(err, crate::ForecastError::Resource(_)));
    }
}
