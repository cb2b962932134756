pub mod data;
pub mod device;
pub mod industrial;

pub use data::{DeviceMessage, RuleEngineResult, Verdict};
pub use device::{CodecError, DeviceKind, DeviceValue};
pub use industrial::{
    Alert, AlertLevel, DataQuality, DiagnosticData, EnvironmentalReadings, IndustrialSystemData,
    SystemHealth,
};
