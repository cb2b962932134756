use crate::device::{CodecError, DeviceValue};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// 代理队列投递的设备消息（接收后不可变）。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceMessage {
    pub device_id: Uuid,
    /// base64 编码的二进制信封。
    pub value: String,
    /// 毫秒时间戳。
    pub timestamp: u64,
}

impl DeviceMessage {
    pub fn new(device_id: Uuid, value: impl Into<String>, timestamp: u64) -> Self {
        Self {
            device_id,
            value: value.into(),
            timestamp,
        }
    }

    /// 由设备值编码构造消息。
    pub fn from_value(device_id: Uuid, value: &DeviceValue, timestamp: u64) -> Result<Self, CodecError> {
        Ok(Self::new(device_id, value.encode()?, timestamp))
    }

    /// 从 JSON 信封解析。
    pub fn from_json(payload: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(payload)
    }

    pub fn decode_value(&self) -> Result<DeviceValue, CodecError> {
        DeviceValue::decode(&self.value)
    }
}

/// 规则引擎判定。
///
/// `Warning` 仅为提示，消费方不应视为失败。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Verdict {
    Ok,
    Error,
    Warning,
}

impl Verdict {
    pub fn is_failure(self) -> bool {
        matches!(self, Verdict::Error)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Verdict::Ok => "Ok",
            Verdict::Error => "Error",
            Verdict::Warning => "Warning",
        }
    }
}

/// 单次评估结果（每次评估新建，不持久化）。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleEngineResult {
    pub device_id: Uuid,
    pub message: String,
    pub engine_verdict: Verdict,
}

impl RuleEngineResult {
    pub fn new(verdict: Verdict, message: impl Into<String>) -> Self {
        Self {
            device_id: Uuid::nil(),
            message: message.into(),
            engine_verdict: verdict,
        }
    }

    pub fn ok(message: impl Into<String>) -> Self {
        Self::new(Verdict::Ok, message)
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::new(Verdict::Error, message)
    }

    pub fn warning(message: impl Into<String>) -> Self {
        Self::new(Verdict::Warning, message)
    }

    /// 未知或无法解码的设备类型。
    pub fn unknown_device_type() -> Self {
        Self::error("Unknown device type.")
    }

    /// 标记所属设备。
    pub fn for_device(mut self, device_id: Uuid) -> Self {
        self.device_id = device_id;
        self
    }

    pub fn verdict(&self) -> Verdict {
        self.engine_verdict
    }

    pub fn to_json(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }
}
