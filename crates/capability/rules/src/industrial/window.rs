//! Industrial 窗口分析：按 system_id 分组，组间并行，组内四项分析并行。
//!
//! - 趋势：温度 / 气压 / CPU 变化率（每小时），温度振荡
//! - 异常：10 样本滚动 z-score（温度 3σ，CPU 2σ 且 > 70），质量骤降
//! - 故障预测：近 5 条样本的加权风险分，过热 / 过载启发式
//! - 状态模式：状态抖动、质量劣化或抖动、错误计数跳变

use super::{CheckOutcome, outcome};
use crate::stats::{mean, population_std, slope_per_hour, strictly_rising};
use domain::{IndustrialSystemData, RuleEngineResult};
use rayon::prelude::*;
use std::collections::BTreeMap;

const MIN_TREND_SAMPLES: usize = 3;
const MIN_OSCILLATION_SAMPLES: usize = 6;
const ANOMALY_WINDOW: usize = 10;
const MIN_PATTERN_SAMPLES: usize = 5;
const RISK_SAMPLES: usize = 5;
const TEMPERATURE_SLOPE_LIMIT: f64 = 5.0;
const PRESSURE_SLOPE_LIMIT: f64 = 500.0;
const CPU_SLOPE_LIMIT: f64 = 15.0;

/// 评估所有分组；输入已过滤为 Industrial 数据且非空。
pub fn evaluate(values: &[&IndustrialSystemData]) -> RuleEngineResult {
    let mut groups: BTreeMap<&str, Vec<&IndustrialSystemData>> = BTreeMap::new();
    for data in values.iter().copied() {
        groups.entry(data.system_id.as_str()).or_default().push(data);
    }

    let group_errors: Vec<Vec<String>> = groups
        .par_iter()
        .map(|(system_id, group)| {
            let mut sorted = group.clone();
            sorted.sort_by_key(|data| data.timestamp);
            analyze_group(&sorted)
                .into_iter()
                .map(|message| format!("Device {system_id}: {message}"))
                .collect()
        })
        .collect();
    let errors: Vec<String> = group_errors.into_iter().flatten().collect();

    if errors.is_empty() {
        RuleEngineResult::ok(format!(
            "All trend checks passed for {} devices",
            groups.len()
        ))
    } else {
        RuleEngineResult::error(errors.join("; "))
    }
}

/// 单组四项分析，返回失败信息。
pub fn analyze_group(values: &[&IndustrialSystemData]) -> Vec<String> {
    let ((trends, anomalies), (prediction, patterns)) = rayon::join(
        || rayon::join(|| analyze_trends(values), || detect_anomalies(values)),
        || rayon::join(|| predict_failures(values), || analyze_status_patterns(values)),
    );
    [trends, anomalies, prediction, patterns]
        .into_iter()
        .filter_map(Result::err)
        .collect()
}

fn temperatures(values: &[&IndustrialSystemData]) -> Vec<f64> {
    values
        .iter()
        .filter_map(|data| data.environment.as_ref())
        .map(|env| f64::from(env.temperature))
        .collect()
}

fn cpu_loads(values: &[&IndustrialSystemData]) -> Vec<f64> {
    values
        .iter()
        .filter_map(|data| data.system_health.as_ref())
        .map(|health| f64::from(health.cpu_load))
        .collect()
}

fn qualities(values: &[&IndustrialSystemData]) -> Vec<i32> {
    values
        .iter()
        .filter_map(|data| data.environment.as_ref())
        .map(|env| env.quality.level())
        .collect()
}

/// 首末两点的变化率（每小时）；不足两点为 0。
fn trend(points: &[(u64, f64)]) -> f64 {
    match (points.first(), points.last()) {
        (Some(first), Some(last)) if points.len() >= 2 => slope_per_hour(*first, *last),
        _ => 0.0,
    }
}

fn analyze_trends(values: &[&IndustrialSystemData]) -> CheckOutcome {
    if values.len() < MIN_TREND_SAMPLES {
        return Ok(());
    }
    let mut errors = Vec::new();

    let temperature_points: Vec<(u64, f64)> = values
        .iter()
        .filter_map(|data| {
            data.environment
                .as_ref()
                .map(|env| (data.timestamp, f64::from(env.temperature)))
        })
        .collect();
    let temperature_trend = trend(&temperature_points);
    if temperature_trend > TEMPERATURE_SLOPE_LIMIT {
        errors.push(format!(
            "Rapidly increasing temperature trend: +{temperature_trend:.1}°C/hour"
        ));
    } else if temperature_trend < -TEMPERATURE_SLOPE_LIMIT {
        errors.push(format!(
            "Rapidly decreasing temperature trend: {temperature_trend:.1}°C/hour"
        ));
    }

    let pressure_points: Vec<(u64, f64)> = values
        .iter()
        .filter_map(|data| {
            data.environment
                .as_ref()
                .map(|env| (data.timestamp, f64::from(env.pressure)))
        })
        .collect();
    let pressure_trend = trend(&pressure_points);
    if pressure_trend.abs() > PRESSURE_SLOPE_LIMIT {
        errors.push(format!(
            "Significant pressure change: {pressure_trend:.0} Pa/hour"
        ));
    }

    let cpu_points: Vec<(u64, f64)> = values
        .iter()
        .filter_map(|data| {
            data.system_health
                .as_ref()
                .map(|health| (data.timestamp, f64::from(health.cpu_load)))
        })
        .collect();
    let cpu_trend = trend(&cpu_points);
    if cpu_trend > CPU_SLOPE_LIMIT {
        errors.push(format!(
            "Rapidly increasing CPU load trend: +{cpu_trend:.1}%/hour"
        ));
    }

    if oscillates(&temperatures(values)) {
        errors.push("Abnormal temperature oscillations detected".to_string());
    }
    outcome(errors)
}

/// 相邻差分符号翻转次数超过样本数的三分之一；温度样本不足 6 个时不判定。
fn oscillates(series: &[f64]) -> bool {
    if series.len() < MIN_OSCILLATION_SAMPLES {
        return false;
    }
    let changes = series
        .windows(3)
        .filter(|w| (w[1] - w[0]) * (w[2] - w[1]) < 0.0)
        .count();
    changes as f64 > series.len() as f64 / 3.0
}

/// 滚动窗口 z-score：返回被判定异常的样本数。
fn rolling_anomalies(series: &[f64], sigma: f64, floor: f64) -> usize {
    if series.len() < ANOMALY_WINDOW {
        return 0;
    }
    (ANOMALY_WINDOW..series.len())
        .filter(|&index| {
            let window = &series[index - ANOMALY_WINDOW..index];
            let (Some(window_mean), Some(window_std)) =
                (mean(window.iter().copied()), population_std(window.iter().copied()))
            else {
                return false;
            };
            let current = series[index];
            (current - window_mean).abs() > sigma * window_std && current > floor
        })
        .count()
}

fn detect_anomalies(values: &[&IndustrialSystemData]) -> CheckOutcome {
    if values.len() < ANOMALY_WINDOW {
        return Ok(());
    }
    let mut errors = Vec::new();

    // 读数为 0 视为缺失
    let non_zero = |series: Vec<f64>| -> Vec<f64> {
        series.into_iter().filter(|value| *value != 0.0).collect()
    };
    let temperature = rolling_anomalies(&non_zero(temperatures(values)), 3.0, f64::NEG_INFINITY);
    if temperature > 0 {
        errors.push(format!("Detected {temperature} temperature anomalies"));
    }
    let cpu = rolling_anomalies(&non_zero(cpu_loads(values)), 2.0, 70.0);
    if cpu > 0 {
        errors.push(format!("Detected {cpu} CPU load anomalies"));
    }

    let qualities = qualities(values);
    if qualities.len() >= MIN_PATTERN_SAMPLES && qualities.windows(2).any(|w| w[1] - w[0] >= 2) {
        errors.push("Significant data quality drops detected".to_string());
    }
    outcome(errors)
}

/// 近 5 条样本的加权风险分，取值 `[0, 1]`。
pub fn risk_score(values: &[&IndustrialSystemData]) -> f64 {
    let recent = &values[values.len().saturating_sub(RISK_SAMPLES)..];
    let average = |items: Vec<f64>| mean(items).unwrap_or(0.0);

    let temperature = average(
        recent
            .iter()
            .filter_map(|data| data.environment.as_ref())
            .map(|env| ((f64::from(env.temperature) - 50.0) / 35.0).clamp(0.0, 1.0))
            .collect(),
    );
    let cpu = average(
        recent
            .iter()
            .filter_map(|data| data.system_health.as_ref())
            .map(|health| (f64::from(health.cpu_load) / 100.0).min(1.0))
            .collect(),
    );
    let battery = average(
        recent
            .iter()
            .filter_map(|data| data.system_health.as_ref())
            .filter(|health| health.battery_level > 0.0)
            .map(|health| ((25.0 - f64::from(health.battery_level)) / 25.0).clamp(0.0, 1.0))
            .collect(),
    );
    let errors = average(
        recent
            .iter()
            .map(|data| (f64::from(data.error_count) / 50.0).min(1.0))
            .collect(),
    );
    let quality = average(
        recent
            .iter()
            .filter_map(|data| data.environment.as_ref())
            .map(|env| f64::from(env.quality.level()) / 5.0)
            .collect(),
    );
    let alerts = average(
        recent
            .iter()
            .filter_map(|data| data.diagnostics.as_ref())
            .map(|diagnostics| {
                let critical = diagnostics
                    .warnings
                    .iter()
                    .filter(|alert| alert.level.is_critical())
                    .count();
                (critical as f64 / 3.0).min(1.0)
            })
            .collect(),
    );

    temperature * 0.25 + cpu * 0.15 + battery * 0.10 + errors * 0.20 + quality * 0.10 + alerts * 0.20
}

fn overheating_risk(values: &[&IndustrialSystemData]) -> bool {
    if values.len() < 3 {
        return false;
    }
    let temperatures = temperatures(values);
    if temperatures.len() < 3 {
        return false;
    }
    let high_temperature = temperatures.last().is_some_and(|last| *last > 70.0);
    let high_cpu = cpu_loads(values).last().is_some_and(|last| *last > 80.0);
    high_temperature && (strictly_rising(&temperatures) || high_cpu)
}

fn overload_risk(values: &[&IndustrialSystemData]) -> bool {
    if values.len() < 3 {
        return false;
    }
    let cpu = cpu_loads(values);
    if cpu.len() < 3 {
        return false;
    }
    let memory: Vec<f64> = values
        .iter()
        .filter_map(|data| data.system_health.as_ref())
        .map(|health| f64::from(health.memory_usage))
        .collect();
    let cpu_overload = strictly_rising(&cpu) && cpu.last().is_some_and(|last| *last > 85.0);
    let memory_overload =
        strictly_rising(&memory) && memory.last().is_some_and(|last| *last > 90.0);
    cpu_overload || memory_overload
}

fn predict_failures(values: &[&IndustrialSystemData]) -> CheckOutcome {
    if values.len() < RISK_SAMPLES {
        return Ok(());
    }
    let mut errors = Vec::new();

    let risk = risk_score(values);
    if risk > 0.8 {
        errors.push(format!(
            "High risk of system failure: {:.0}% risk score",
            risk * 100.0
        ));
    } else if risk > 0.5 {
        errors.push(format!(
            "Medium risk of system failure: {:.0}% risk score",
            risk * 100.0
        ));
    }
    if overheating_risk(values) {
        errors.push("System shows signs of overheating risk".to_string());
    }
    if overload_risk(values) {
        errors.push("System shows signs of overload risk".to_string());
    }
    outcome(errors)
}

fn changes<T: PartialEq>(series: &[T]) -> usize {
    series.windows(2).filter(|w| w[0] != w[1]).count()
}

fn status_flapping(values: &[&IndustrialSystemData]) -> bool {
    let states: Vec<&str> = values
        .iter()
        .filter_map(|data| data.status_flag("systemState"))
        .collect();
    states.len() >= MIN_PATTERN_SAMPLES && changes(&states) as f64 > states.len() as f64 * 0.3
}

fn quality_pattern(values: &[&IndustrialSystemData]) -> bool {
    let qualities = qualities(values);
    if qualities.len() < MIN_PATTERN_SAMPLES {
        return false;
    }
    let degrading = qualities.windows(2).all(|w| w[1] >= w[0]);
    if degrading && qualities.last() > qualities.first() {
        return true;
    }
    changes(&qualities) as f64 > qualities.len() as f64 * 0.4
}

/// 相邻样本错误计数增量超过 10，或在 0 与 > 20 之间频繁翻转。
fn error_count_pattern(values: &[&IndustrialSystemData]) -> bool {
    let counts: Vec<u32> = values.iter().map(|data| data.error_count).collect();
    if counts.len() < MIN_PATTERN_SAMPLES {
        return false;
    }
    if counts
        .windows(2)
        .any(|w| i64::from(w[1]) - i64::from(w[0]) > 10)
    {
        return true;
    }
    let has_zero = counts.contains(&0);
    let has_large = counts.iter().any(|count| *count > 20);
    if !has_zero || !has_large {
        return false;
    }
    let low: Vec<bool> = counts.iter().map(|count| *count < 5).collect();
    changes(&low) as f64 > counts.len() as f64 * 0.3
}

fn analyze_status_patterns(values: &[&IndustrialSystemData]) -> CheckOutcome {
    if values.len() < MIN_PATTERN_SAMPLES {
        return Ok(());
    }
    let mut errors = Vec::new();
    if status_flapping(values) {
        errors.push("Detected abnormal patterns in system status flags".to_string());
    }
    if quality_pattern(values) {
        errors.push("Detected abnormal patterns in data quality".to_string());
    }
    if error_count_pattern(values) {
        errors.push("Detected abnormal error count patterns".to_string());
    }
    outcome(errors)
}
