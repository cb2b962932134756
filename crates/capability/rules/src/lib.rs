//! # 规则处理器
//!
//! 每种设备类型一个处理器，提供两种评估节奏：
//!
//! - `evaluate_one`：单条消息即时评估；
//! - `evaluate_window`：设备窗口聚合评估。
//!
//! 处理器为进程内单例，内部历史队列由各自的互斥锁保护。
//! 评估从不返回 `Err`，所有结果都以判定（Ok / Warning / Error）表达。

pub mod dummy;
pub mod industrial;
pub mod sensor;
pub mod stats;

use domain::{DeviceKind, DeviceValue, RuleEngineResult};
use std::sync::{Arc, Mutex, MutexGuard};

pub use dummy::DummyProcessor;
pub use industrial::IndustrialProcessor;
pub use sensor::{SensorKind, SensorProcessor, verify_checksum};
pub use stats::ValueHistory;

/// 设备值处理器抽象。
pub trait DeviceValueProcessor: Send + Sync {
    fn kind(&self) -> DeviceKind;

    fn evaluate_one(&self, value: &DeviceValue) -> RuleEngineResult;

    /// 聚合评估；非本类型的条目被跳过。
    fn evaluate_window(&self, values: &[DeviceValue]) -> RuleEngineResult;
}

/// 按设备类型分派的处理器集合。
#[derive(Clone)]
pub struct ProcessorRegistry {
    dummy: Arc<DummyProcessor>,
    sensor: Arc<SensorProcessor>,
    industrial: Arc<IndustrialProcessor>,
}

impl ProcessorRegistry {
    pub fn new() -> Self {
        Self {
            dummy: Arc::new(DummyProcessor::new()),
            sensor: Arc::new(SensorProcessor::new()),
            industrial: Arc::new(IndustrialProcessor::new()),
        }
    }

    pub fn processor(&self, kind: DeviceKind) -> &dyn DeviceValueProcessor {
        match kind {
            DeviceKind::Dummy => self.dummy.as_ref(),
            DeviceKind::Sensor => self.sensor.as_ref(),
            DeviceKind::Industrial => self.industrial.as_ref(),
        }
    }

    pub fn evaluate_one(&self, value: &DeviceValue) -> RuleEngineResult {
        self.processor(value.kind()).evaluate_one(value)
    }

    /// 解码后评估；解码失败归为未知设备类型。
    pub fn evaluate_encoded(&self, encoded: &str) -> RuleEngineResult {
        match DeviceValue::decode(encoded) {
            Ok(value) => self.evaluate_one(&value),
            Err(_) => RuleEngineResult::unknown_device_type(),
        }
    }

    /// 以第一条值的类型选择处理器。
    pub fn evaluate_window(&self, values: &[DeviceValue]) -> RuleEngineResult {
        match values.first() {
            Some(first) => self.processor(first.kind()).evaluate_window(values),
            None => no_values(),
        }
    }

    /// 解码后聚合评估；无法解码的条目被跳过。
    pub fn evaluate_encoded_window<'a>(
        &self,
        encoded: impl IntoIterator<Item = &'a str>,
    ) -> RuleEngineResult {
        let mut seen = false;
        let mut values = Vec::new();
        for item in encoded {
            seen = true;
            if let Ok(value) = DeviceValue::decode(item) {
                values.push(value);
            }
        }
        if !seen {
            return no_values();
        }
        if values.is_empty() {
            return RuleEngineResult::unknown_device_type();
        }
        self.evaluate_window(&values)
    }
}

impl Default for ProcessorRegistry {
    fn default() -> Self {
        Self::new()
    }
}

pub(crate) fn no_values() -> RuleEngineResult {
    RuleEngineResult::error("No values to process")
}

/// 获取锁；上一次评估 panic 导致的中毒直接恢复。
pub(crate) fn lock_recover<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
