//! 设备值模型与编解码。
//!
//! 线上格式：`base64(MessagePack(DeviceValue))`。解码失败一律返回 `CodecError`，
//! 由调用方映射为 "Unknown device type." 判定，不会 panic。

use crate::industrial::IndustrialSystemData;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Serialize};

/// 编解码错误。
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("invalid base64: {0}")]
    Base64(String),
    #[error("invalid payload: {0}")]
    Payload(String),
    #[error("encode failed: {0}")]
    Encode(String),
}

/// 设备类型标签。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeviceKind {
    Dummy,
    Sensor,
    Industrial,
}

impl DeviceKind {
    pub fn as_str(self) -> &'static str {
        match self {
            DeviceKind::Dummy => "dummy",
            DeviceKind::Sensor => "sensor",
            DeviceKind::Industrial => "industrial",
        }
    }
}

/// 设备上报值（封闭的 tagged union）。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum DeviceValue {
    Dummy {
        byte_value: u8,
        int_value: i32,
        active: bool,
    },
    Sensor {
        data: Vec<u8>,
        active: bool,
    },
    Industrial(IndustrialSystemData),
}

impl DeviceValue {
    pub fn kind(&self) -> DeviceKind {
        match self {
            DeviceValue::Dummy { .. } => DeviceKind::Dummy,
            DeviceValue::Sensor { .. } => DeviceKind::Sensor,
            DeviceValue::Industrial(_) => DeviceKind::Industrial,
        }
    }

    pub fn decode(encoded: &str) -> Result<Self, CodecError> {
        let bytes = STANDARD
            .decode(encoded.trim())
            .map_err(|err| CodecError::Base64(err.to_string()))?;
        Self::decode_bytes(&bytes)
    }

    pub fn decode_bytes(bytes: &[u8]) -> Result<Self, CodecError> {
        rmp_serde::from_slice(bytes).map_err(|err| CodecError::Payload(err.to_string()))
    }

    pub fn encode(&self) -> Result<String, CodecError> {
        let bytes =
            rmp_serde::to_vec_named(self).map_err(|err| CodecError::Encode(err.to_string()))?;
        Ok(STANDARD.encode(bytes))
    }
}
