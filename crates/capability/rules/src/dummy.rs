//! Dummy 设备规则。
//!
//! 即时评估顺序：活跃 → 边界 → 比值 → 校验和 → 历史偏离 → 效率。
//! 窗口评估顺序：活跃比例 → 组校验和 → 波动提示。

use crate::stats::ValueHistory;
use crate::{DeviceValueProcessor, lock_recover, no_values};
use domain::{DeviceKind, DeviceValue, RuleEngineResult};
use std::sync::Mutex;

pub const BYTE_MIN: u8 = 1;
pub const BYTE_MAX: u8 = 255;
pub const INT_MIN: i32 = 0;
pub const INT_MAX: i32 = 16_544;
/// `int / byte` 比值上限。
pub const CRITICAL_RATIO: f64 = 500.0;
pub const CHECKSUM_MODULUS: u32 = 12_289;
pub const CHECKSUM_LIMIT: u32 = 12_000;
/// 历史偏离阈值（相对均值）。
pub const DEVIATION_LIMIT: f64 = 0.5;
pub const MIN_HISTORY: usize = 3;
pub const MIN_ACTIVE_RATIO: f64 = 0.7;
const GROUP_SEED: u64 = 17;
const GROUP_MODULUS: u64 = 100_003;
const GROUP_MIN_EXCLUSIVE: u64 = 1_000;
const GROUP_MAX: u64 = 90_000;

/// 两个字段的位混合校验和，落在 `[0, 12289)`。
pub fn checksum(byte_value: u8, int_value: i32) -> u32 {
    let mut mixed = u32::from(byte_value).wrapping_mul(0x9E37_79B1) ^ (int_value as u32);
    mixed ^= mixed >> 15;
    mixed = mixed.wrapping_mul(0x85EB_CA6B);
    mixed ^= mixed >> 13;
    mixed % CHECKSUM_MODULUS
}

/// 组校验和（仅活跃条目参与）。
pub fn group_checksum<'a>(entries: impl IntoIterator<Item = &'a (u8, i32)>) -> u64 {
    entries.into_iter().fold(GROUP_SEED, |acc, (byte_value, int_value)| {
        let term = 7 * u64::from(*byte_value) + (*int_value).max(0) as u64;
        (acc * 31 + term) % GROUP_MODULUS
    })
}

/// 效率百分比：`(byte / 255) * (1 - int / 16544) * 100`。
pub fn efficiency(byte_value: u8, int_value: i32) -> f64 {
    f64::from(byte_value) / f64::from(BYTE_MAX)
        * (1.0 - f64::from(int_value) / f64::from(INT_MAX))
        * 100.0
}

#[derive(Default)]
struct DummyHistory {
    bytes: ValueHistory,
    ints: ValueHistory,
}

/// Dummy 处理器。
pub struct DummyProcessor {
    history: Mutex<DummyHistory>,
}

impl DummyProcessor {
    pub fn new() -> Self {
        Self {
            history: Mutex::new(DummyHistory::default()),
        }
    }

    fn evaluate_reading(&self, byte_value: u8, int_value: i32, active: bool) -> RuleEngineResult {
        if !active {
            return RuleEngineResult::error("Device is not active.");
        }
        if let Some(violation) = bounds_violation(byte_value, int_value) {
            return RuleEngineResult::error(format!("Device data out of bounds: {violation}"));
        }

        let ratio = f64::from(int_value) / f64::from(byte_value);
        if ratio > CRITICAL_RATIO {
            return RuleEngineResult::warning(format!(
                "Critical value ratio: {ratio:.1} > {CRITICAL_RATIO}"
            ));
        }

        let sum = checksum(byte_value, int_value);
        if sum >= CHECKSUM_LIMIT {
            return RuleEngineResult::error(format!(
                "Invalid checksum: {sum} outside [0, {CHECKSUM_LIMIT})"
            ));
        }

        let anomaly = {
            let mut history = lock_recover(&self.history);
            let anomaly = history_anomaly(&history, byte_value, int_value);
            history.bytes.push(f64::from(byte_value));
            history.ints.push(f64::from(int_value));
            anomaly
        };
        if let Some(note) = anomaly {
            return RuleEngineResult::warning(note);
        }

        let efficiency = efficiency(byte_value, int_value);
        if byte_value > 100 && int_value < 1024 {
            RuleEngineResult::ok(format!("Device data is valid. Efficiency: {efficiency:.1}%"))
        } else {
            RuleEngineResult::ok(format!(
                "Device data is within tolerance. Efficiency: {efficiency:.1}%"
            ))
        }
    }
}

impl Default for DummyProcessor {
    fn default() -> Self {
        Self::new()
    }
}

impl DeviceValueProcessor for DummyProcessor {
    fn kind(&self) -> DeviceKind {
        DeviceKind::Dummy
    }

    fn evaluate_one(&self, value: &DeviceValue) -> RuleEngineResult {
        match value {
            DeviceValue::Dummy {
                byte_value,
                int_value,
                active,
            } => self.evaluate_reading(*byte_value, *int_value, *active),
            _ => RuleEngineResult::unknown_device_type(),
        }
    }

    fn evaluate_window(&self, values: &[DeviceValue]) -> RuleEngineResult {
        if values.is_empty() {
            return no_values();
        }
        let mut total = 0usize;
        let mut active = Vec::new();
        for value in values {
            if let DeviceValue::Dummy {
                byte_value,
                int_value,
                active: is_active,
            } = value
            {
                total += 1;
                if *is_active {
                    active.push((*byte_value, *int_value));
                }
            }
        }
        if total == 0 {
            return RuleEngineResult::unknown_device_type();
        }

        let active_ratio = active.len() as f64 / total as f64;
        if active_ratio < MIN_ACTIVE_RATIO {
            return RuleEngineResult::error(format!(
                "Too many inactive readings: {:.0}% active ({} of {total})",
                active_ratio * 100.0,
                active.len()
            ));
        }

        let group = group_checksum(&active);
        if group <= GROUP_MIN_EXCLUSIVE || group > GROUP_MAX {
            return RuleEngineResult::error(format!(
                "Invalid group checksum: {group} outside ({GROUP_MIN_EXCLUSIVE}, {GROUP_MAX}]"
            ));
        }

        let min = active.iter().map(|(_, int_value)| *int_value).min();
        let max = active.iter().map(|(_, int_value)| *int_value).max();
        if let (Some(min), Some(max)) = (min, max) {
            let spread = i64::from(max) - i64::from(min);
            if spread as f64 > f64::from(INT_MAX) * 0.5 {
                return RuleEngineResult::ok(format!(
                    "Device data is valid. High variation across readings: {min}..{max}"
                ));
            }
        }

        RuleEngineResult::ok(format!("Device data is valid. {} readings checked", active.len()))
    }
}

fn bounds_violation(byte_value: u8, int_value: i32) -> Option<String> {
    if byte_value < BYTE_MIN {
        return Some(format!("byteValue {byte_value} below minimum {BYTE_MIN}"));
    }
    if int_value < INT_MIN {
        return Some(format!("intValue {int_value} below minimum {INT_MIN}"));
    }
    if int_value > INT_MAX {
        return Some(format!("intValue {int_value} exceeds maximum {INT_MAX}"));
    }
    None
}

fn history_anomaly(history: &DummyHistory, byte_value: u8, int_value: i32) -> Option<String> {
    if history.ints.len() < MIN_HISTORY {
        return None;
    }
    let byte_deviation = history.bytes.relative_deviation(f64::from(byte_value));
    let int_deviation = history.ints.relative_deviation(f64::from(int_value));
    let exceeded = |deviation: Option<f64>| deviation.is_some_and(|d| d > DEVIATION_LIMIT);
    if exceeded(byte_deviation) || exceeded(int_deviation) {
        Some(format!(
            "Anomalous reading: deviation from history byte {:.0}%, int {:.0}%",
            byte_deviation.unwrap_or(0.0) * 100.0,
            int_deviation.unwrap_or(0.0) * 100.0
        ))
    } else {
        None
    }
}
