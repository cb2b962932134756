//! 工业系统设备数据。

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// 数据质量，数值越大越差。
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum DataQuality {
    Excellent = 0,
    Good = 1,
    Average = 2,
    Poor = 3,
    Bad = 4,
    Corrupted = 5,
}

impl DataQuality {
    pub fn level(self) -> i32 {
        self as i32
    }
}

impl Default for DataQuality {
    fn default() -> Self {
        Self::Good
    }
}

/// 告警级别。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AlertLevel {
    None,
    Info,
    Warning,
    Critical,
    Emergency,
}

impl AlertLevel {
    pub fn is_critical(self) -> bool {
        matches!(self, AlertLevel::Critical | AlertLevel::Emergency)
    }
}

/// 环境读数（温度 °C，湿度 %，气压 Pa）。
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct EnvironmentalReadings {
    pub temperature: f32,
    pub humidity: f32,
    pub pressure: f32,
    #[serde(default)]
    pub light_level: f32,
    #[serde(default)]
    pub noise_level: f32,
    #[serde(default)]
    pub quality: DataQuality,
}

/// 系统健康状态（百分比字段取值 0-100）。
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SystemHealth {
    pub cpu_load: f32,
    pub memory_usage: f32,
    #[serde(default)]
    pub storage_usage: f32,
    pub battery_level: f32,
    #[serde(default)]
    pub uptime: u64,
    #[serde(default)]
    pub active_processes: Vec<String>,
    #[serde(default)]
    pub status_flags: HashMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    pub alert_id: String,
    pub level: AlertLevel,
    pub source: String,
    #[serde(default)]
    pub timestamp: u64,
    #[serde(default)]
    pub acknowledged: bool,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct DiagnosticData {
    #[serde(default)]
    pub warnings: Vec<Alert>,
    #[serde(default)]
    pub system_params: HashMap<String, String>,
    #[serde(default)]
    pub logs: Vec<String>,
}

/// 工业系统上报值。
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct IndustrialSystemData {
    pub system_id: String,
    #[serde(default)]
    pub system_name: String,
    /// 秒级时间戳。
    #[serde(default)]
    pub timestamp: u64,
    #[serde(default)]
    pub environment: Option<EnvironmentalReadings>,
    #[serde(default)]
    pub system_health: Option<SystemHealth>,
    #[serde(default)]
    pub diagnostics: Option<DiagnosticData>,
    #[serde(default)]
    pub error_count: u32,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

impl IndustrialSystemData {
    pub fn status_flag(&self, key: &str) -> Option<&str> {
        self.system_health
            .as_ref()
            .and_then(|health| health.status_flags.get(key))
            .map(String::as_str)
    }
}
