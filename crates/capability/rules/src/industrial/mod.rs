//! Industrial 设备规则。
//!
//! 即时评估并行执行四项检查（环境、系统健康、诊断、元数据），外加错误计数上限；
//! 任一失败时所有失败信息以 `"; "` 拼接为一条 Error。
//! 窗口评估见 [`window`]。

pub mod window;

use crate::{DeviceValueProcessor, no_values};
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use domain::{DataQuality, DeviceKind, DeviceValue, IndustrialSystemData, RuleEngineResult};

pub const MAX_TEMPERATURE: f32 = 85.0;
pub const MIN_TEMPERATURE: f32 = -20.0;
pub const MAX_HUMIDITY: f32 = 95.0;
pub const CRITICAL_CPU_LOAD: f32 = 90.0;
pub const CRITICAL_MEMORY_USAGE: f32 = 95.0;
pub const LOW_BATTERY_THRESHOLD: f32 = 15.0;
pub const MAX_ERROR_COUNT: u32 = 50;
const MAX_SERVICE_AGE_DAYS: f64 = 180.0;
const MAX_ERROR_LOGS: usize = 5;
const REQUIRED_PROCESSES: [&str; 3] = ["monitor", "controller", "dataLogger"];

/// 单项检查结果：`Ok(())` 通过，`Err(message)` 失败。
pub(crate) type CheckOutcome = Result<(), String>;

pub(crate) fn outcome(errors: Vec<String>) -> CheckOutcome {
    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors.join("; "))
    }
}

/// Industrial 处理器（无内部状态）。
#[derive(Debug, Default)]
pub struct IndustrialProcessor;

impl IndustrialProcessor {
    pub fn new() -> Self {
        Self
    }

    /// 按给定当前时间评估单条数据。
    pub fn evaluate_at(&self, data: &IndustrialSystemData, now: DateTime<Utc>) -> RuleEngineResult {
        let ((environment, health), (diagnostics, metadata)) = rayon::join(
            || rayon::join(|| check_environment(data), || check_system_health(data)),
            || rayon::join(|| check_diagnostics(data), || check_metadata(data, now)),
        );

        let mut errors: Vec<String> = [environment, health, diagnostics, metadata]
            .into_iter()
            .filter_map(Result::err)
            .collect();
        if data.error_count > MAX_ERROR_COUNT {
            errors.push(format!(
                "Error count exceeds threshold: {} > {MAX_ERROR_COUNT}",
                data.error_count
            ));
        }

        if errors.is_empty() {
            RuleEngineResult::ok(format!("All checks passed for device {}", data.system_id))
        } else {
            RuleEngineResult::error(errors.join("; "))
        }
    }
}

impl DeviceValueProcessor for IndustrialProcessor {
    fn kind(&self) -> DeviceKind {
        DeviceKind::Industrial
    }

    fn evaluate_one(&self, value: &DeviceValue) -> RuleEngineResult {
        match value {
            DeviceValue::Industrial(data) => self.evaluate_at(data, Utc::now()),
            _ => RuleEngineResult::unknown_device_type(),
        }
    }

    fn evaluate_window(&self, values: &[DeviceValue]) -> RuleEngineResult {
        if values.is_empty() {
            return no_values();
        }
        let data: Vec<&IndustrialSystemData> = values
            .iter()
            .filter_map(|value| match value {
                DeviceValue::Industrial(data) => Some(data),
                _ => None,
            })
            .collect();
        if data.is_empty() {
            return RuleEngineResult::error("No industrial device values found");
        }
        window::evaluate(&data)
    }
}

fn check_environment(data: &IndustrialSystemData) -> CheckOutcome {
    let Some(env) = data.environment.as_ref() else {
        return Err("Environmental readings missing".to_string());
    };
    let mut errors = Vec::new();

    if env.temperature > MAX_TEMPERATURE {
        errors.push(format!(
            "Temperature too high: {}°C > {MAX_TEMPERATURE}°C",
            env.temperature
        ));
    } else if env.temperature < MIN_TEMPERATURE {
        errors.push(format!(
            "Temperature too low: {}°C < {MIN_TEMPERATURE}°C",
            env.temperature
        ));
    }
    if env.humidity > MAX_HUMIDITY {
        errors.push(format!("Humidity too high: {}% > {MAX_HUMIDITY}%", env.humidity));
    }
    match env.quality {
        DataQuality::Corrupted => errors.push("Environmental data is corrupted".to_string()),
        DataQuality::Bad => errors.push("Environmental data quality is bad".to_string()),
        _ => {}
    }
    if env.temperature > 50.0 && env.pressure < 90_000.0 {
        errors.push(format!(
            "Critical condition: High temperature ({}°C) with low pressure ({} Pa)",
            env.temperature, env.pressure
        ));
    }
    outcome(errors)
}

fn check_system_health(data: &IndustrialSystemData) -> CheckOutcome {
    let Some(health) = data.system_health.as_ref() else {
        return Err("System health data missing".to_string());
    };
    let mut errors = Vec::new();

    if health.cpu_load > CRITICAL_CPU_LOAD {
        errors.push(format!(
            "CPU load critical: {}% > {CRITICAL_CPU_LOAD}%",
            health.cpu_load
        ));
    }
    if health.memory_usage > CRITICAL_MEMORY_USAGE {
        errors.push(format!(
            "Memory usage critical: {}% > {CRITICAL_MEMORY_USAGE}%",
            health.memory_usage
        ));
    }
    if health.battery_level < LOW_BATTERY_THRESHOLD {
        errors.push(format!(
            "Battery level low: {}% < {LOW_BATTERY_THRESHOLD}%",
            health.battery_level
        ));
    }

    if health.active_processes.is_empty() {
        errors.push("No active processes running".to_string());
    } else {
        for required in REQUIRED_PROCESSES {
            let needle = required.to_lowercase();
            let running = health
                .active_processes
                .iter()
                .any(|process| process.to_lowercase().contains(&needle));
            if !running {
                errors.push(format!("Critical process '{required}' not running"));
            }
        }
    }

    if let Some(state) = health.status_flags.get("systemState") {
        if state != "running" {
            errors.push(format!("System not in running state: {state}"));
        }
    }
    if health
        .status_flags
        .get("errorState")
        .is_some_and(|flag| flag == "true")
    {
        errors.push("System in error state".to_string());
    }
    outcome(errors)
}

fn check_diagnostics(data: &IndustrialSystemData) -> CheckOutcome {
    let Some(diagnostics) = data.diagnostics.as_ref() else {
        return Ok(());
    };
    let mut errors = Vec::new();

    let critical: Vec<_> = diagnostics
        .warnings
        .iter()
        .filter(|alert| alert.level.is_critical())
        .collect();
    if !critical.is_empty() {
        errors.push(format!(
            "Has {} critical/emergency warnings",
            critical.len()
        ));
        for alert in critical.iter().take(3) {
            errors.push(format!(
                "Warning [{}]: {} (Level: {:?})",
                alert.alert_id, alert.source, alert.level
            ));
        }
    }

    if let Some(status) = diagnostics.system_params.get("firmwareStatus") {
        if status != "current" && status != "up-to-date" {
            errors.push(format!("Firmware not up to date: {status}"));
        }
    }
    if let Some(status) = diagnostics.system_params.get("calibrationStatus") {
        if status != "calibrated" {
            errors.push(format!("System not properly calibrated: {status}"));
        }
    }

    let error_logs = diagnostics
        .logs
        .iter()
        .filter(|line| {
            let upper = line.to_uppercase();
            upper.contains("ERROR") || upper.contains("CRITICAL") || upper.contains("FATAL")
        })
        .count();
    if error_logs > MAX_ERROR_LOGS {
        errors.push(format!("High number of error logs: {error_logs} entries"));
    }
    outcome(errors)
}

fn check_metadata(data: &IndustrialSystemData, now: DateTime<Utc>) -> CheckOutcome {
    let metadata = &data.metadata;
    if metadata.is_empty() {
        return Ok(());
    }
    let mut errors = Vec::new();

    if let Some(status) = metadata.get("maintenanceStatus") {
        if status == "required" || status == "overdue" {
            errors.push(format!("Maintenance {status}"));
        }
    }
    if let Some(serviced_at) = metadata.get("lastServiceDate").and_then(|raw| parse_date(raw)) {
        let days = (now - serviced_at).num_seconds() as f64 / 86_400.0;
        if days > MAX_SERVICE_AGE_DAYS {
            errors.push(format!("Last service too old: {days:.0} days ago"));
        }
    }
    if let Some(mode) = metadata.get("operatingMode") {
        if mode != "normal" && mode != "optimal" {
            errors.push(format!("System not in normal operating mode: {mode}"));
        }
    }
    outcome(errors)
}

/// 支持 RFC3339、`%Y-%m-%d %H:%M:%S`、`%Y-%m-%dT%H:%M:%S` 与 `%Y-%m-%d`；无时区按 UTC。
pub fn parse_date(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(parsed) = DateTime::parse_from_rfc3339(raw) {
        return Some(parsed.with_timezone(&Utc));
    }
    for format in ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S"] {
        if let Ok(parsed) = NaiveDateTime::parse_from_str(raw, format) {
            return Some(parsed.and_utc());
        }
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|parsed| parsed.and_utc())
}
