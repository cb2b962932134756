use domain::{
    Alert, AlertLevel, DataQuality, DeviceValue, DiagnosticData, EnvironmentalReadings,
    IndustrialSystemData, SystemHealth, Verdict,
};
use iot_rules::{DeviceValueProcessor, IndustrialProcessor, ProcessorRegistry};
use std::collections::HashMap;

fn healthy(system_id: &str) -> IndustrialSystemData {
    IndustrialSystemData {
        system_id: system_id.to_string(),
        system_name: "press line".to_string(),
        timestamp: 1_700_000_000,
        environment: Some(EnvironmentalReadings {
            temperature: 25.0,
            humidity: 45.0,
            pressure: 101_325.0,
            light_level: 500.0,
            noise_level: 40.0,
            quality: DataQuality::Good,
        }),
        system_health: Some(SystemHealth {
            cpu_load: 40.0,
            memory_usage: 50.0,
            storage_usage: 30.0,
            battery_level: 80.0,
            uptime: 86_400,
            active_processes: vec![
                "monitor".to_string(),
                "Controller-main".to_string(),
                "datalogger".to_string(),
            ],
            status_flags: HashMap::from([("systemState".to_string(), "running".to_string())]),
        }),
        diagnostics: Some(DiagnosticData::default()),
        error_count: 0,
        metadata: HashMap::new(),
    }
}

/// 同一系统按时间递增的样本序列。
fn series(system_id: &str, step_secs: u64, count: usize) -> Vec<IndustrialSystemData> {
    (0..count)
        .map(|index| {
            let mut data = healthy(system_id);
            data.timestamp += step_secs * index as u64;
            data
        })
        .collect()
}

fn wrap(values: Vec<IndustrialSystemData>) -> Vec<DeviceValue> {
    values.into_iter().map(DeviceValue::Industrial).collect()
}

fn set_temperature(data: &mut IndustrialSystemData, temperature: f32) {
    if let Some(env) = data.environment.as_mut() {
        env.temperature = temperature;
    }
}

#[test]
fn healthy_system_passes() {
    let processor = IndustrialProcessor::new();
    let result = processor.evaluate_one(&DeviceValue::Industrial(healthy("line-1")));
    assert_eq!(result.verdict(), Verdict::Ok);
    assert_eq!(result.message, "All checks passed for device line-1");
}

#[test]
fn critical_cpu_load_is_error() {
    let registry = ProcessorRegistry::new();
    let mut data = healthy("line-1");
    if let Some(health) = data.system_health.as_mut() {
        health.cpu_load = 95.0;
    }
    let result = registry.evaluate_one(&DeviceValue::Industrial(data));
    assert_eq!(result.verdict(), Verdict::Error);
    assert_eq!(result.message, "CPU load critical: 95% > 90%");
}

#[test]
fn failures_from_all_checks_are_joined() {
    let processor = IndustrialProcessor::new();
    let mut data = healthy("line-1");
    data.environment = None;
    data.error_count = 51;
    data.metadata
        .insert("operatingMode".to_string(), "degraded".to_string());
    if let Some(health) = data.system_health.as_mut() {
        health.active_processes = vec!["monitor".to_string()];
        health
            .status_flags
            .insert("errorState".to_string(), "true".to_string());
    }

    let result = processor.evaluate_one(&DeviceValue::Industrial(data));
    assert_eq!(result.verdict(), Verdict::Error);
    assert_eq!(
        result.message,
        "Environmental readings missing; \
         Critical process 'controller' not running; \
         Critical process 'dataLogger' not running; \
         System in error state; \
         System not in normal operating mode: degraded; \
         Error count exceeds threshold: 51 > 50"
    );
}

#[test]
fn hot_and_low_pressure_is_critical() {
    let processor = IndustrialProcessor::new();
    let mut data = healthy("line-1");
    data.environment = Some(EnvironmentalReadings {
        temperature: 60.0,
        humidity: 40.0,
        pressure: 85_000.0,
        quality: DataQuality::Bad,
        ..EnvironmentalReadings::default()
    });
    let result = processor.evaluate_one(&DeviceValue::Industrial(data));
    assert_eq!(result.verdict(), Verdict::Error);
    assert!(result.message.contains("Environmental data quality is bad"));
    assert!(result.message.contains("Critical condition: High temperature (60°C)"));
}

#[test]
fn stable_window_passes() {
    let processor = IndustrialProcessor::new();
    let result = processor.evaluate_window(&wrap(series("line-1", 600, 12)));
    assert_eq!(result.verdict(), Verdict::Ok);
    assert_eq!(result.message, "All trend checks passed for 1 devices");
}

#[test]
fn rising_temperature_trend_is_flagged() {
    let processor = IndustrialProcessor::new();
    let mut values = series("line-1", 900, 5);
    for (index, data) in values.iter_mut().enumerate() {
        set_temperature(data, 25.0 + 2.5 * index as f32);
    }
    // 乱序输入按时间排序后再分析
    values.reverse();

    let result = processor.evaluate_window(&wrap(values));
    assert_eq!(result.verdict(), Verdict::Error);
    assert_eq!(
        result.message,
        "Device line-1: Rapidly increasing temperature trend: +10.0°C/hour"
    );
}

#[test]
fn only_failing_group_is_reported() {
    let processor = IndustrialProcessor::new();
    let mut values = series("line-1", 600, 6);
    let mut failing = series("line-2", 600, 6);
    for (index, data) in failing.iter_mut().enumerate() {
        data.error_count = (index as u32) * 12;
    }
    values.extend(failing);

    let result = processor.evaluate_window(&wrap(values));
    assert_eq!(result.verdict(), Verdict::Error);
    assert!(result.message.starts_with("Device line-2: "));
    assert!(result.message.contains("Detected abnormal error count patterns"));
    assert!(!result.message.contains("line-1"));
}

#[test]
fn decreasing_error_count_is_not_a_jump() {
    let processor = IndustrialProcessor::new();
    let mut values = series("line-1", 600, 5);
    for (data, count) in values.iter_mut().zip([40u32, 20, 5, 3, 1]) {
        data.error_count = count;
    }
    let result = processor.evaluate_window(&wrap(values));
    assert_eq!(result.verdict(), Verdict::Ok, "{}", result.message);
}

#[test]
fn high_risk_signals_predict_failure() {
    let processor = IndustrialProcessor::new();
    let critical = Alert {
        alert_id: "a1".to_string(),
        level: AlertLevel::Critical,
        source: "spindle".to_string(),
        timestamp: 0,
        acknowledged: false,
    };
    let mut values = series("line-1", 10, 5);
    for data in &mut values {
        set_temperature(data, 84.0);
        if let Some(env) = data.environment.as_mut() {
            env.quality = DataQuality::Bad;
        }
        if let Some(health) = data.system_health.as_mut() {
            health.cpu_load = 99.0;
            health.battery_level = 5.0;
        }
        data.error_count = 50;
        data.diagnostics = Some(DiagnosticData {
            warnings: vec![critical.clone(); 3],
            ..DiagnosticData::default()
        });
    }

    let result = processor.evaluate_window(&wrap(values));
    assert_eq!(result.verdict(), Verdict::Error);
    assert!(result.message.contains("High risk of system failure: 95% risk score"));
    assert!(result.message.contains("System shows signs of overheating risk"));
}

#[test]
fn window_without_industrial_values_is_error() {
    let processor = IndustrialProcessor::new();
    let result = processor.evaluate_window(&[DeviceValue::Dummy {
        byte_value: 1,
        int_value: 1,
        active: true,
    }]);
    assert_eq!(result.verdict(), Verdict::Error);
    assert_eq!(result.message, "No industrial device values found");
}

fn set_cpu(data: &mut IndustrialSystemData, cpu_load: f32) {
    if let Some(health) = data.system_health.as_mut() {
        health.cpu_load = cpu_load;
    }
}

fn set_quality(data: &mut IndustrialSystemData, quality: DataQuality) {
    if let Some(env) = data.environment.as_mut() {
        env.quality = quality;
    }
}

fn set_state(data: &mut IndustrialSystemData, state: &str) {
    if let Some(health) = data.system_health.as_mut() {
        health
            .status_flags
            .insert("systemState".to_string(), state.to_string());
    }
}

/// 窗口评估结果；期望单条失败信息时传 `Some`。
fn assert_window(values: Vec<IndustrialSystemData>, expected: Option<&str>) {
    let processor = IndustrialProcessor::new();
    let result = processor.evaluate_window(&wrap(values));
    match expected {
        Some(message) => {
            assert_eq!(result.verdict(), Verdict::Error);
            assert_eq!(result.message, format!("Device line-1: {message}"));
        }
        None => assert_eq!(result.verdict(), Verdict::Ok, "{}", result.message),
    }
}

#[test]
fn window_without_environment_readings_passes() {
    let mut values = series("line-1", 600, 6);
    for data in &mut values {
        data.environment = None;
    }
    assert_window(values, None);
}

#[test]
fn temperature_oscillation_needs_more_than_a_third_of_flips() {
    // 两次翻转，恰好三分之一
    let mut values = series("line-1", 600, 6);
    for (data, temperature) in values.iter_mut().zip([25.0, 27.0, 25.0, 26.0, 27.0, 28.0]) {
        set_temperature(data, temperature);
    }
    assert_window(values, None);

    let mut values = series("line-1", 600, 6);
    for (data, temperature) in values.iter_mut().zip([25.0, 27.0, 25.0, 27.0, 25.0, 27.0]) {
        set_temperature(data, temperature);
    }
    assert_window(values, Some("Abnormal temperature oscillations detected"));
}

#[test]
fn flapping_system_state_is_flagged() {
    let with_states = |states: [&str; 10]| {
        let mut values = series("line-1", 600, 10);
        for (data, state) in values.iter_mut().zip(states) {
            set_state(data, state);
        }
        values
    };

    // 10 个样本 3 次切换，不超过 30%
    let steady = [
        "running", "idle", "running", "idle", "idle", "idle", "idle", "idle", "idle", "idle",
    ];
    assert_window(with_states(steady), None);

    let flapping = [
        "running", "idle", "running", "idle", "running", "running", "running", "running",
        "running", "running",
    ];
    assert_window(
        with_states(flapping),
        Some("Detected abnormal patterns in system status flags"),
    );
}

#[test]
fn degrading_quality_is_flagged() {
    let mut values = series("line-1", 600, 5);
    let degrading = [
        DataQuality::Good,
        DataQuality::Good,
        DataQuality::Average,
        DataQuality::Average,
        DataQuality::Poor,
    ];
    for (data, quality) in values.iter_mut().zip(degrading) {
        set_quality(data, quality);
    }
    assert_window(values, Some("Detected abnormal patterns in data quality"));
}

#[test]
fn flapping_quality_is_flagged() {
    // 5 个样本 2 次切换，不超过 40%
    let mut values = series("line-1", 600, 5);
    let steady = [
        DataQuality::Good,
        DataQuality::Average,
        DataQuality::Good,
        DataQuality::Good,
        DataQuality::Good,
    ];
    for (data, quality) in values.iter_mut().zip(steady) {
        set_quality(data, quality);
    }
    assert_window(values, None);

    let mut values = series("line-1", 600, 5);
    let flapping = [
        DataQuality::Good,
        DataQuality::Average,
        DataQuality::Good,
        DataQuality::Average,
        DataQuality::Good,
    ];
    for (data, quality) in values.iter_mut().zip(flapping) {
        set_quality(data, quality);
    }
    assert_window(values, Some("Detected abnormal patterns in data quality"));
}

#[test]
fn two_level_quality_drop_is_an_anomaly() {
    let mut values = series("line-1", 600, 10);
    set_quality(&mut values[4], DataQuality::Average);
    assert_window(values, None);

    let mut values = series("line-1", 600, 10);
    set_quality(&mut values[4], DataQuality::Poor);
    assert_window(values, Some("Significant data quality drops detected"));
}

#[test]
fn rising_cpu_above_85_is_overload() {
    let mut values = series("line-1", 7_200, 5);
    for (data, cpu) in values.iter_mut().zip([60.0, 70.0, 78.0, 82.0, 85.0]) {
        set_cpu(data, cpu);
    }
    assert_window(values, None);

    let mut values = series("line-1", 7_200, 5);
    for (data, cpu) in values.iter_mut().zip([60.0, 70.0, 78.0, 82.0, 86.0]) {
        set_cpu(data, cpu);
    }
    assert_window(values, Some("System shows signs of overload risk"));
}

#[test]
fn rising_memory_above_90_is_overload() {
    let set_memory = |values: &mut [IndustrialSystemData], usage: [f32; 5]| {
        for (data, memory) in values.iter_mut().zip(usage) {
            if let Some(health) = data.system_health.as_mut() {
                health.memory_usage = memory;
            }
        }
    };

    let mut values = series("line-1", 600, 5);
    set_memory(&mut values, [70.0, 80.0, 85.0, 88.0, 90.0]);
    assert_window(values, None);

    let mut values = series("line-1", 600, 5);
    set_memory(&mut values, [70.0, 80.0, 85.0, 88.0, 91.0]);
    assert_window(values, Some("System shows signs of overload risk"));
}

#[test]
fn temperature_spike_beyond_three_sigma_is_an_anomaly() {
    let baseline = |last: f32| {
        let mut values = series("line-1", 3_600, 11);
        for (index, data) in values.iter_mut().enumerate().take(10) {
            set_temperature(data, 20.0 + 0.1 * index as f32);
        }
        set_temperature(&mut values[10], last);
        values
    };

    assert_window(baseline(21.0), None);
    assert_window(baseline(40.0), Some("Detected 1 temperature anomalies"));
}

#[test]
fn cpu_spike_counts_only_above_70() {
    let baseline = |last: f32| {
        let mut values = series("line-1", 3_600, 11);
        for (index, data) in values.iter_mut().enumerate().take(10) {
            set_cpu(data, 40.0 + index as f32);
        }
        set_cpu(&mut values[10], last);
        values
    };

    assert_window(baseline(70.0), None);
    assert_window(baseline(80.0), Some("Detected 1 CPU load anomalies"));
}
