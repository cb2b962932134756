//! Sensor 设备规则（字节帧）。
//!
//! 帧格式：
//!
//! ```text
//! [0]      0xAA 帧头
//! [1]      传感器类型
//! [2]      固件版本
//! [3..5]   读数（小端定点）
//! [5..9]   可选时间戳（u32 小端，秒；帧长 >= 11 时存在）
//! [len-2]  校验和 = sum(bytes[0..len-2]) mod 256
//! [len-1]  0x55 帧尾
//! ```

use crate::stats::{self, ValueHistory};
use crate::{DeviceValueProcessor, lock_recover, no_values};
use domain::{DeviceKind, DeviceValue, RuleEngineResult};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use std::sync::Mutex;

pub const FRAME_HEADER: u8 = 0xAA;
pub const FRAME_FOOTER: u8 = 0x55;
pub const MIN_FRAME_LEN: usize = 7;
pub const TIMESTAMP_FRAME_LEN: usize = 11;
pub const FIRMWARE_FLOOR: u8 = 0x10;
const FUTURE_TOLERANCE_SECS: i64 = 60;
const ANOMALY_SIGMA: f64 = 3.0;
const MIN_ANOMALY_SAMPLES: usize = 3;
pub const MIN_VALID_RATIO: f64 = 0.7;

/// 已知传感器类型（封闭查找表）。
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum SensorKind {
    Temperature,
    Humidity,
    Pressure,
    Light,
    Co2,
    HeartRate,
}

impl SensorKind {
    pub const ALL: [SensorKind; 6] = [
        SensorKind::Temperature,
        SensorKind::Humidity,
        SensorKind::Pressure,
        SensorKind::Light,
        SensorKind::Co2,
        SensorKind::HeartRate,
    ];

    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0x01 => Some(SensorKind::Temperature),
            0x02 => Some(SensorKind::Humidity),
            0x03 => Some(SensorKind::Pressure),
            0x04 => Some(SensorKind::Light),
            0x05 => Some(SensorKind::Co2),
            0x06 => Some(SensorKind::HeartRate),
            _ => None,
        }
    }

    pub fn code(self) -> u8 {
        match self {
            SensorKind::Temperature => 0x01,
            SensorKind::Humidity => 0x02,
            SensorKind::Pressure => 0x03,
            SensorKind::Light => 0x04,
            SensorKind::Co2 => 0x05,
            SensorKind::HeartRate => 0x06,
        }
    }

    pub fn unit(self) -> &'static str {
        match self {
            SensorKind::Temperature => "°C",
            SensorKind::Humidity => "%",
            SensorKind::Pressure => "hPa",
            SensorKind::Light => "lux",
            SensorKind::Co2 => "ppm",
            SensorKind::HeartRate => "bpm",
        }
    }

    /// 合法取值范围（闭区间）。
    pub fn range(self) -> (f64, f64) {
        match self {
            SensorKind::Temperature => (-40.0, 125.0),
            SensorKind::Humidity => (0.0, 100.0),
            SensorKind::Pressure => (300.0, 1100.0),
            SensorKind::Light => (0.0, 60_000.0),
            SensorKind::Co2 => (250.0, 5_000.0),
            SensorKind::HeartRate => (30.0, 220.0),
        }
    }

    /// 小端定点解码。
    pub fn decode(self, raw: [u8; 2]) -> f64 {
        match self {
            SensorKind::Temperature => f64::from(i16::from_le_bytes(raw)) * 0.01,
            SensorKind::Humidity => f64::from(u16::from_le_bytes(raw)) * 0.01,
            SensorKind::Pressure => f64::from(u16::from_le_bytes(raw)) * 0.1,
            SensorKind::Light | SensorKind::Co2 | SensorKind::HeartRate => {
                f64::from(u16::from_le_bytes(raw))
            }
        }
    }

    fn comfort(self, value: f64) -> &'static str {
        match self {
            SensorKind::Temperature if (18.0..=26.0).contains(&value) => "comfortable",
            SensorKind::Temperature => "outside comfort range",
            SensorKind::Humidity if (30.0..=60.0).contains(&value) => "comfortable",
            SensorKind::Humidity => "outside comfort range",
            SensorKind::Pressure if (980.0..=1040.0).contains(&value) => "normal",
            SensorKind::Pressure => "unusual",
            SensorKind::Light if (300.0..=1_000.0).contains(&value) => "adequate",
            SensorKind::Light if value < 300.0 => "dim",
            SensorKind::Light => "bright",
            SensorKind::Co2 if value < 1_000.0 => "good air",
            SensorKind::Co2 if value < 2_000.0 => "stale air",
            SensorKind::Co2 => "poor air",
            SensorKind::HeartRate if (60.0..=100.0).contains(&value) => "resting",
            SensorKind::HeartRate if value < 60.0 => "low",
            SensorKind::HeartRate => "elevated",
        }
    }
}

impl fmt::Display for SensorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SensorKind::Temperature => "Temperature",
            SensorKind::Humidity => "Humidity",
            SensorKind::Pressure => "Pressure",
            SensorKind::Light => "Light",
            SensorKind::Co2 => "CO2",
            SensorKind::HeartRate => "HeartRate",
        };
        f.write_str(name)
    }
}

/// 帧校验失败原因。
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum FrameError {
    #[error("Invalid frame length: {0} bytes, expected at least 7")]
    Length(usize),
    #[error("Invalid frame header: 0x{0:02X}")]
    Header(u8),
    #[error("Invalid frame footer: 0x{0:02X}")]
    Footer(u8),
    #[error("Unknown sensor type: 0x{0:02X}")]
    UnknownType(u8),
    #[error("{kind} out of range: {value:.2} not in [{min}, {max}]")]
    OutOfRange {
        kind: SensorKind,
        value: f64,
        min: f64,
        max: f64,
    },
    #[error("Invalid checksum: expected 0x{expected:02X}, got 0x{actual:02X}")]
    Checksum { expected: u8, actual: u8 },
}

/// 解析后的帧内容。
#[derive(Debug, Clone, PartialEq)]
pub struct SensorReading {
    pub kind: SensorKind,
    pub firmware: u8,
    pub value: f64,
    pub timestamp: Option<u32>,
}

/// 校验和：`bytes[len-2] == sum(bytes[0..len-2]) mod 256`。
pub fn verify_checksum(bytes: &[u8]) -> bool {
    if bytes.len() < 2 {
        return false;
    }
    let (body, trailer) = bytes.split_at(bytes.len() - 2);
    frame_sum(body) == trailer[0]
}

fn frame_sum(body: &[u8]) -> u8 {
    body.iter().fold(0u8, |acc, byte| acc.wrapping_add(*byte))
}

/// 结构、类型与范围检查（不含校验和）。
pub fn parse_frame(data: &[u8]) -> Result<SensorReading, FrameError> {
    if data.len() < MIN_FRAME_LEN {
        return Err(FrameError::Length(data.len()));
    }
    if data[0] != FRAME_HEADER {
        return Err(FrameError::Header(data[0]));
    }
    let footer = data[data.len() - 1];
    if footer != FRAME_FOOTER {
        return Err(FrameError::Footer(footer));
    }
    let kind = SensorKind::from_code(data[1]).ok_or(FrameError::UnknownType(data[1]))?;
    let value = kind.decode([data[3], data[4]]);
    let (min, max) = kind.range();
    if !(min..=max).contains(&value) {
        return Err(FrameError::OutOfRange {
            kind,
            value,
            min,
            max,
        });
    }
    let timestamp = (data.len() >= TIMESTAMP_FRAME_LEN)
        .then(|| u32::from_le_bytes([data[5], data[6], data[7], data[8]]));
    Ok(SensorReading {
        kind,
        firmware: data[2],
        value,
        timestamp,
    })
}

/// 完整帧校验（结构 + 校验和）。
pub fn validate_frame(data: &[u8]) -> Result<SensorReading, FrameError> {
    let reading = parse_frame(data)?;
    if !verify_checksum(data) {
        return Err(FrameError::Checksum {
            expected: frame_sum(&data[..data.len() - 2]),
            actual: data[data.len() - 2],
        });
    }
    Ok(reading)
}

/// 变异系数分档。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Consistency {
    Excellent,
    Good,
    Fair,
    Poor,
}

impl Consistency {
    pub fn from_cv(cv: f64) -> Self {
        if cv < 0.05 {
            Consistency::Excellent
        } else if cv < 0.15 {
            Consistency::Good
        } else if cv < 0.30 {
            Consistency::Fair
        } else {
            Consistency::Poor
        }
    }

    pub fn score(self) -> f64 {
        match self {
            Consistency::Excellent => 1.0,
            Consistency::Good => 0.75,
            Consistency::Fair => 0.5,
            Consistency::Poor => 0.25,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Consistency::Excellent => "excellent",
            Consistency::Good => "good",
            Consistency::Fair => "fair",
            Consistency::Poor => "poor",
        }
    }
}

/// 单一类型的窗口聚合。
#[derive(Debug, Clone, PartialEq)]
pub struct KindSummary {
    pub count: usize,
    pub min: f64,
    pub max: f64,
    pub mean: f64,
    pub std: f64,
    pub consistency: Consistency,
}

impl KindSummary {
    fn from_values(values: &[f64]) -> Option<Self> {
        let mean = stats::mean(values.iter().copied())?;
        let min = values.iter().copied().fold(f64::INFINITY, f64::min);
        let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        let std = stats::sample_std(values);
        Some(Self {
            count: values.len(),
            min,
            max,
            mean,
            std,
            consistency: Consistency::from_cv(stats::coefficient_of_variation(std, mean)),
        })
    }
}

/// 窗口聚合结果。
#[derive(Debug, Clone, PartialEq)]
pub struct WindowSummary {
    pub unique: usize,
    pub duplicates: usize,
    pub valid: usize,
    pub kinds: BTreeMap<SensorKind, KindSummary>,
}

impl WindowSummary {
    pub fn valid_ratio(&self) -> f64 {
        if self.unique == 0 {
            0.0
        } else {
            self.valid as f64 / self.unique as f64
        }
    }

    /// 可靠性：有效率、类型多样性、一致性的加权。
    pub fn reliability(&self) -> f64 {
        let diversity = self.kinds.len() as f64 / SensorKind::ALL.len() as f64;
        let consistency =
            stats::mean(self.kinds.values().map(|summary| summary.consistency.score()))
                .unwrap_or(0.0);
        0.5 * self.valid_ratio() + 0.2 * diversity + 0.3 * consistency
    }
}

/// 跨类型相关性（未接入计算，恒为空）。
pub fn correlated_pairs(_kinds: &BTreeMap<SensorKind, KindSummary>) -> Vec<(SensorKind, SensorKind)> {
    Vec::new()
}

/// Sensor 处理器。
pub struct SensorProcessor {
    history: Mutex<HashMap<SensorKind, ValueHistory>>,
}

impl SensorProcessor {
    pub fn new() -> Self {
        Self {
            history: Mutex::new(HashMap::new()),
        }
    }

    /// 按给定当前时间（秒）评估单帧。
    pub fn evaluate_frame(&self, data: &[u8], active: bool, now_secs: i64) -> RuleEngineResult {
        if data.len() < MIN_FRAME_LEN {
            return RuleEngineResult::error(FrameError::Length(data.len()).to_string());
        }
        if !active {
            return RuleEngineResult::error("Device is not active.");
        }
        let reading = match validate_frame(data) {
            Ok(reading) => reading,
            Err(err) => return RuleEngineResult::error(err.to_string()),
        };

        let mut notes = Vec::new();
        if reading.firmware < FIRMWARE_FLOOR {
            notes.push(format!(
                "warning: outdated firmware 0x{:02X} < 0x{FIRMWARE_FLOOR:02X}",
                reading.firmware
            ));
        }

        let stability = {
            let mut history = lock_recover(&self.history);
            let history = history.entry(reading.kind).or_default();
            if let Some(note) = anomaly_note(history, &reading) {
                notes.push(note);
            }
            let stability = history
                .relative_deviation(reading.value)
                .map(|deviation| (1.0 - deviation).clamp(0.0, 1.0) * 100.0)
                .unwrap_or(100.0);
            history.push(reading.value);
            stability
        };

        if let Some(timestamp) = reading.timestamp {
            if timestamp == 0 {
                notes.push("warning: missing timestamp".to_string());
            } else if i64::from(timestamp) > now_secs + FUTURE_TOLERANCE_SECS {
                notes.push(format!("warning: timestamp {timestamp} is in the future"));
            }
        }

        let mut message = format!(
            "Sensor data is valid. {} {:.2} {} ({}), stability {stability:.0}%",
            reading.kind,
            reading.value,
            reading.kind.unit(),
            reading.kind.comfort(reading.value),
        );
        for note in notes {
            message.push_str("; ");
            message.push_str(&note);
        }
        RuleEngineResult::ok(message)
    }

    /// 窗口聚合（去重、逐帧校验，不写入历史）。
    pub fn summarize(values: &[DeviceValue]) -> Option<WindowSummary> {
        let mut seen: HashSet<&[u8]> = HashSet::new();
        let mut duplicates = 0usize;
        let mut valid = 0usize;
        let mut per_kind: BTreeMap<SensorKind, Vec<f64>> = BTreeMap::new();

        for value in values {
            let DeviceValue::Sensor { data, active } = value else {
                continue;
            };
            if !seen.insert(data.as_slice()) {
                duplicates += 1;
                continue;
            }
            if !active {
                continue;
            }
            if let Ok(reading) = validate_frame(data) {
                valid += 1;
                per_kind.entry(reading.kind).or_default().push(reading.value);
            }
        }
        if seen.is_empty() {
            return None;
        }

        let kinds = per_kind
            .into_iter()
            .filter_map(|(kind, values)| KindSummary::from_values(&values).map(|s| (kind, s)))
            .collect();
        Some(WindowSummary {
            unique: seen.len(),
            duplicates,
            valid,
            kinds,
        })
    }
}

impl Default for SensorProcessor {
    fn default() -> Self {
        Self::new()
    }
}

impl DeviceValueProcessor for SensorProcessor {
    fn kind(&self) -> DeviceKind {
        DeviceKind::Sensor
    }

    fn evaluate_one(&self, value: &DeviceValue) -> RuleEngineResult {
        match value {
            DeviceValue::Sensor { data, active } => {
                self.evaluate_frame(data, *active, chrono::Utc::now().timestamp())
            }
            _ => RuleEngineResult::unknown_device_type(),
        }
    }

    fn evaluate_window(&self, values: &[DeviceValue]) -> RuleEngineResult {
        if values.is_empty() {
            return no_values();
        }
        let Some(summary) = Self::summarize(values) else {
            return RuleEngineResult::unknown_device_type();
        };

        let valid_ratio = summary.valid_ratio();
        if valid_ratio < MIN_VALID_RATIO {
            return RuleEngineResult::error(format!(
                "Too many invalid sensor frames: {:.0}% valid ({} of {})",
                valid_ratio * 100.0,
                summary.valid,
                summary.unique
            ));
        }

        let mut message = format!(
            "Sensor data is reliable. Reliability: {:.2}",
            summary.reliability()
        );
        for (kind, stats) in &summary.kinds {
            message.push_str(&format!(
                "; {kind}: n={} min={:.2} max={:.2} mean={:.2} std={:.2} ({})",
                stats.count,
                stats.min,
                stats.max,
                stats.mean,
                stats.std,
                stats.consistency.as_str()
            ));
        }
        let correlated = correlated_pairs(&summary.kinds);
        if !correlated.is_empty() {
            let pairs: Vec<String> = correlated
                .iter()
                .map(|(left, right)| format!("{left}/{right}"))
                .collect();
            message.push_str(&format!("; highly correlated: {}", pairs.join(", ")));
        }
        if summary.duplicates > 0 {
            message.push_str(&format!("; {} duplicates skipped", summary.duplicates));
        }
        RuleEngineResult::ok(message)
    }
}

fn anomaly_note(history: &ValueHistory, reading: &SensorReading) -> Option<String> {
    if history.len() < MIN_ANOMALY_SAMPLES {
        return None;
    }
    let mean = history.mean()?;
    let std = history.population_std()?;
    if std <= 0.0 {
        return None;
    }
    let deviation = (reading.value - mean).abs();
    (deviation > ANOMALY_SIGMA * std).then(|| {
        format!(
            "anomaly: {} {:.2} deviates {:.1} sigma from mean {mean:.2}",
            reading.kind,
            reading.value,
            deviation / std
        )
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_fixed_point() {
        let temperature = SensorKind::Temperature.decode((-1234i16).to_le_bytes());
        assert!((temperature + 12.34).abs() < 1e-9);
        let pressure = SensorKind::Pressure.decode(10_132u16.to_le_bytes());
        assert!((pressure - 1013.2).abs() < 1e-9);
        assert_eq!(SensorKind::Co2.decode(800u16.to_le_bytes()), 800.0);
    }

    #[test]
    fn checksum_needs_trailer() {
        assert!(!verify_checksum(&[]));
        assert!(!verify_checksum(&[0x01]));
        assert!(verify_checksum(&[0x00, 0x55]));
    }

    #[test]
    fn consistency_buckets() {
        assert_eq!(Consistency::from_cv(0.01), Consistency::Excellent);
        assert_eq!(Consistency::from_cv(0.10), Consistency::Good);
        assert_eq!(Consistency::from_cv(0.20), Consistency::Fair);
        assert_eq!(Consistency::from_cv(0.50), Consistency::Poor);
    }

    #[test]
    fn correlation_is_inactive() {
        assert!(correlated_pairs(&BTreeMap::new()).is_empty());
    }
}
