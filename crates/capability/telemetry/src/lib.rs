//! 日志初始化与进程内计数器。

use serde::Serialize;
use std::sync::OnceLock;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing_subscriber::{EnvFilter, fmt};

/// 指标快照。
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub messages_received: u64,
    pub messages_malformed: u64,
    pub decode_failures: u64,
    pub instant_evaluations: u64,
    pub aggregate_evaluations: u64,
    pub verdict_ok: u64,
    pub verdict_warning: u64,
    pub verdict_error: u64,
    pub publish_success: u64,
    pub publish_failure: u64,
    pub windows_cleared: u64,
    pub broker_connect_attempts: u64,
    pub broker_connect_failures: u64,
    pub scheduler_action_failures: u64,
}

/// 引擎计数器。
pub struct EngineMetrics {
    messages_received: AtomicU64,
    messages_malformed: AtomicU64,
    decode_failures: AtomicU64,
    instant_evaluations: AtomicU64,
    aggregate_evaluations: AtomicU64,
    verdict_ok: AtomicU64,
    verdict_warning: AtomicU64,
    verdict_error: AtomicU64,
    publish_success: AtomicU64,
    publish_failure: AtomicU64,
    windows_cleared: AtomicU64,
    broker_connect_attempts: AtomicU64,
    broker_connect_failures: AtomicU64,
    scheduler_action_failures: AtomicU64,
}

impl EngineMetrics {
    pub fn new() -> Self {
        Self {
            messages_received: AtomicU64::new(0),
            messages_malformed: AtomicU64::new(0),
            decode_failures: AtomicU64::new(0),
            instant_evaluations: AtomicU64::new(0),
            aggregate_evaluations: AtomicU64::new(0),
            verdict_ok: AtomicU64::new(0),
            verdict_warning: AtomicU64::new(0),
            verdict_error: AtomicU64::new(0),
            publish_success: AtomicU64::new(0),
            publish_failure: AtomicU64::new(0),
            windows_cleared: AtomicU64::new(0),
            broker_connect_attempts: AtomicU64::new(0),
            broker_connect_failures: AtomicU64::new(0),
            scheduler_action_failures: AtomicU64::new(0),
        }
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            messages_received: self.messages_received.load(Ordering::Relaxed),
            messages_malformed: self.messages_malformed.load(Ordering::Relaxed),
            decode_failures: self.decode_failures.load(Ordering::Relaxed),
            instant_evaluations: self.instant_evaluations.load(Ordering::Relaxed),
            aggregate_evaluations: self.aggregate_evaluations.load(Ordering::Relaxed),
            verdict_ok: self.verdict_ok.load(Ordering::Relaxed),
            verdict_warning: self.verdict_warning.load(Ordering::Relaxed),
            verdict_error: self.verdict_error.load(Ordering::Relaxed),
            publish_success: self.publish_success.load(Ordering::Relaxed),
            publish_failure: self.publish_failure.load(Ordering::Relaxed),
            windows_cleared: self.windows_cleared.load(Ordering::Relaxed),
            broker_connect_attempts: self.broker_connect_attempts.load(Ordering::Relaxed),
            broker_connect_failures: self.broker_connect_failures.load(Ordering::Relaxed),
            scheduler_action_failures: self.scheduler_action_failures.load(Ordering::Relaxed),
        }
    }
}

impl Default for EngineMetrics {
    fn default() -> Self {
        Self::new()
    }
}

static METRICS: OnceLock<EngineMetrics> = OnceLock::new();

/// 获取全局指标实例。
pub fn metrics() -> &'static EngineMetrics {
    METRICS.get_or_init(EngineMetrics::new)
}

/// 初始化 tracing（默认 info）。
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt().with_env_filter(filter).try_init();
}

/// 记录收到的设备消息。
pub fn record_message_received() {
    metrics().messages_received.fetch_add(1, Ordering::Relaxed);
}

/// 记录无法解析的消息信封。
pub fn record_message_malformed() {
    metrics().messages_malformed.fetch_add(1, Ordering::Relaxed);
}

/// 记录设备值解码失败。
pub fn record_decode_failure() {
    metrics().decode_failures.fetch_add(1, Ordering::Relaxed);
}

pub fn record_instant_evaluation() {
    metrics().instant_evaluations.fetch_add(1, Ordering::Relaxed);
}

pub fn record_aggregate_evaluation() {
    metrics()
        .aggregate_evaluations
        .fetch_add(1, Ordering::Relaxed);
}

/// 按判定记录（取值 "Ok" / "Warning" / "Error"）。
pub fn record_verdict(verdict: &str) {
    let metrics = metrics();
    let counter = match verdict {
        "Ok" => &metrics.verdict_ok,
        "Warning" => &metrics.verdict_warning,
        _ => &metrics.verdict_error,
    };
    counter.fetch_add(1, Ordering::Relaxed);
}

pub fn record_publish_success() {
    metrics().publish_success.fetch_add(1, Ordering::Relaxed);
}

pub fn record_publish_failure() {
    metrics().publish_failure.fetch_add(1, Ordering::Relaxed);
}

/// 记录窗口溢出清空次数。
pub fn record_window_cleared() {
    metrics().windows_cleared.fetch_add(1, Ordering::Relaxed);
}

pub fn record_broker_connect_attempt() {
    metrics()
        .broker_connect_attempts
        .fetch_add(1, Ordering::Relaxed);
}

pub fn record_broker_connect_failure() {
    metrics()
        .broker_connect_failures
        .fetch_add(1, Ordering::Relaxed);
}

pub fn record_scheduler_action_failure() {
    metrics()
        .scheduler_action_failures
        .fetch_add(1, Ordering::Relaxed);
}
