//! # 规则引擎编排
//!
//! ```text
//! 设备队列 ──► handle() ──► 解码 ──► evaluate_one ──► 发布 instant
//!                  └──────► 追加到设备窗口
//!
//! 聚合调度器 ──► evaluate_windows() ──► evaluate_window ──► 发布 continuous
//!                                        └──► 清空超出容量的窗口
//! ```
//!
//! 单条消息的处理失败（解析、解码、规则 panic、发布）只记录日志与计数，不影响消费循环。

pub mod window;

use async_trait::async_trait;
use domain::{DeviceMessage, RuleEngineResult};
use iot_broker::{DeviceMessageHandler, ResultDestination, ResultPublisher};
use iot_rules::ProcessorRegistry;
use iot_scheduler::{PeriodicScheduler, PeriodicTask, SchedulerError, TaskError};
use iot_telemetry::{
    record_aggregate_evaluation, record_decode_failure, record_instant_evaluation,
    record_message_malformed, record_message_received, record_publish_failure,
    record_publish_success, record_verdict, record_window_cleared,
};
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

pub use window::DeviceWindows;

/// 默认窗口容量。
pub const DEFAULT_WINDOW_CAPACITY: usize = 30;

struct EngineInner {
    registry: ProcessorRegistry,
    windows: DeviceWindows,
    publisher: Arc<dyn ResultPublisher>,
    window_capacity: usize,
}

/// 规则引擎（可克隆句柄）。
#[derive(Clone)]
pub struct RuleEngine {
    inner: Arc<EngineInner>,
}

impl RuleEngine {
    pub fn new(publisher: Arc<dyn ResultPublisher>, window_capacity: usize) -> Self {
        Self::with_registry(ProcessorRegistry::new(), publisher, window_capacity)
    }

    pub fn with_registry(
        registry: ProcessorRegistry,
        publisher: Arc<dyn ResultPublisher>,
        window_capacity: usize,
    ) -> Self {
        Self {
            inner: Arc::new(EngineInner {
                registry,
                windows: DeviceWindows::new(),
                publisher,
                window_capacity,
            }),
        }
    }

    pub fn windows(&self) -> &DeviceWindows {
        &self.inner.windows
    }

    pub fn window_capacity(&self) -> usize {
        self.inner.window_capacity
    }

    /// 单条消息即时评估（结果已带 device_id）。
    pub fn evaluate_message(&self, message: &DeviceMessage) -> RuleEngineResult {
        let result = match message.decode_value() {
            Ok(value) => guarded(|| self.inner.registry.evaluate_one(&value)),
            Err(err) => {
                record_decode_failure();
                warn!(
                    target: "iot.engine",
                    device_id = %message.device_id,
                    error = %err,
                    "device_value_decode_failed"
                );
                RuleEngineResult::unknown_device_type()
            }
        };
        result.for_device(message.device_id)
    }

    /// 处理一条已解析的设备消息：即时评估、发布，并追加到设备窗口。
    pub async fn process(&self, message: DeviceMessage) {
        let result = self.evaluate_message(&message);
        record_instant_evaluation();
        record_verdict(result.verdict().as_str());
        debug!(
            target: "iot.engine",
            device_id = %message.device_id,
            verdict = result.verdict().as_str(),
            "instant_evaluated"
        );
        self.publish(ResultDestination::Instant, &result).await;
        self.inner.windows.append(message);
    }

    /// 评估全部非空窗口并发布；随后清空超出容量的窗口。返回评估的设备数。
    pub async fn evaluate_windows(&self) -> usize {
        let snapshot = self.inner.windows.snapshot();
        let evaluated = snapshot.len();
        for (device_id, messages) in snapshot {
            let result = self.evaluate_window(device_id, &messages);
            record_aggregate_evaluation();
            record_verdict(result.verdict().as_str());
            debug!(
                target: "iot.engine",
                device_id = %device_id,
                window_len = messages.len(),
                verdict = result.verdict().as_str(),
                "window_evaluated"
            );
            self.publish(ResultDestination::Continuous, &result).await;
        }

        for device_id in self.inner.windows.clear_overflowing(self.inner.window_capacity) {
            record_window_cleared();
            debug!(
                target: "iot.engine",
                device_id = %device_id,
                capacity = self.inner.window_capacity,
                "window_cleared"
            );
        }
        evaluated
    }

    fn evaluate_window(&self, device_id: Uuid, messages: &[DeviceMessage]) -> RuleEngineResult {
        guarded(|| {
            self.inner
                .registry
                .evaluate_encoded_window(messages.iter().map(|message| message.value.as_str()))
        })
        .for_device(device_id)
    }

    async fn publish(&self, destination: ResultDestination, result: &RuleEngineResult) {
        match self.inner.publisher.publish(destination, result).await {
            Ok(()) => {
                record_publish_success();
                info!(
                    target: "iot.engine",
                    device_id = %result.device_id,
                    destination = destination.as_str(),
                    verdict = result.verdict().as_str(),
                    "verdict_published"
                );
            }
            Err(err) => {
                record_publish_failure();
                warn!(
                    target: "iot.engine",
                    device_id = %result.device_id,
                    destination = destination.as_str(),
                    error = %err,
                    "verdict_publish_failed"
                );
            }
        }
    }

    /// 创建驱动窗口评估的调度器（未启动）。
    pub fn aggregate_scheduler(&self, period: Duration) -> Result<PeriodicScheduler, SchedulerError> {
        let task = Arc::new(AggregateTask::new(self.clone()));
        PeriodicScheduler::new("aggregate-evaluation", task, period, true)
    }
}

#[async_trait]
impl DeviceMessageHandler for RuleEngine {
    async fn handle(&self, payload: &[u8]) {
        record_message_received();
        match DeviceMessage::from_json(payload) {
            Ok(message) => self.process(message).await,
            Err(err) => {
                record_message_malformed();
                warn!(
                    target: "iot.engine",
                    payload_size = payload.len(),
                    error = %err,
                    "device_message_malformed"
                );
            }
        }
    }
}

/// 周期窗口评估任务。
pub struct AggregateTask {
    engine: RuleEngine,
}

impl AggregateTask {
    pub fn new(engine: RuleEngine) -> Self {
        Self { engine }
    }
}

#[async_trait]
impl PeriodicTask for AggregateTask {
    async fn run(&self) -> Result<(), TaskError> {
        let evaluated = self.engine.evaluate_windows().await;
        debug!(target: "iot.engine", devices = evaluated, "aggregate_tick");
        Ok(())
    }
}

/// 规则评估中的 panic 转为 `Error` 判定。
fn guarded(evaluate: impl FnOnce() -> RuleEngineResult) -> RuleEngineResult {
    catch_unwind(AssertUnwindSafe(evaluate)).unwrap_or_else(|panic| {
        let reason = panic
            .downcast_ref::<&str>()
            .map(|message| (*message).to_string())
            .or_else(|| panic.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "unknown panic".to_string());
        warn!(target: "iot.engine", reason = %reason, "rule_evaluation_panicked");
        RuleEngineResult::error(format!("Rule evaluation failed: {reason}"))
    })
}
