//! # 周期调度原语
//!
//! 单定时器、自重排的周期任务：
//!
//! ```text
//! start(due) ──► sleep(due) ──► run() ──► 重排 ──► sleep(next) ──► run() ...
//!                                  │
//!                                  └── 失败 / panic ──► on_error 回调（不中断循环）
//! ```
//!
//! - `relative = true`：每次固定等待 `interval`，不扣除任务耗时；
//! - `relative = false`：等待 `max(0, interval - elapsed)`，补偿漂移。
//!
//! 任一时刻最多只有一个待触发的调用；`start` / `stop` 幂等，`stop` 可在任务内部调用。
//! 时间源为 `tokio::time::Instant`，测试中可用暂停时钟替代。

use async_trait::async_trait;
use futures::FutureExt;
use iot_telemetry::record_scheduler_action_failure;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock, Weak};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::{debug, warn};

/// 调度器配置错误。
#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
    #[error("interval must be positive")]
    NonPositiveInterval,
    #[error("no tokio runtime available: {0}")]
    NoRuntime(String),
}

/// 周期任务执行错误。
#[derive(Debug, thiserror::Error)]
pub enum TaskError {
    #[error("task failed: {0}")]
    Failed(String),
    #[error("task panicked: {0}")]
    Panicked(String),
}

impl TaskError {
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed(message.into())
    }
}

/// 周期任务抽象。
#[async_trait]
pub trait PeriodicTask: Send + Sync {
    async fn run(&self) -> Result<(), TaskError>;
}

/// 任务失败回调。
pub type ErrorHandler = Arc<dyn Fn(&TaskError) + Send + Sync>;

/// 单次 start 对应的取消标记。
struct RunGuard {
    cancelled: AtomicBool,
    wake: Notify,
}

impl RunGuard {
    fn new() -> Self {
        Self {
            cancelled: AtomicBool::new(false),
            wake: Notify::new(),
        }
    }

    fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
        self.wake.notify_one();
    }

    fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }
}

struct SchedulerInner {
    name: String,
    task: Arc<dyn PeriodicTask>,
    interval_nanos: AtomicU64,
    relative: bool,
    last_run_nanos: AtomicU64,
    on_error: RwLock<Option<ErrorHandler>>,
    runtime: Handle,
    current: Mutex<Option<Arc<RunGuard>>>,
}

impl SchedulerInner {
    fn interval(&self) -> Duration {
        Duration::from_nanos(self.interval_nanos.load(Ordering::Acquire))
    }

    fn report(&self, err: &TaskError) {
        record_scheduler_action_failure();
        warn!(target: "iot.scheduler", scheduler = %self.name, error = %err, "scheduled_action_failed");
        let handler = self
            .on_error
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone();
        if let Some(handler) = handler {
            handler(err);
        }
    }
}

impl Drop for SchedulerInner {
    fn drop(&mut self) {
        let guard = self
            .current
            .get_mut()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        if let Some(guard) = guard {
            guard.cancel();
        }
    }
}

/// 周期调度器（可克隆句柄，克隆共享同一定时器）。
#[derive(Clone)]
pub struct PeriodicScheduler {
    inner: Arc<SchedulerInner>,
}

impl PeriodicScheduler {
    /// 创建调度器；需在 tokio 运行时内调用。
    pub fn new(
        name: impl Into<String>,
        task: Arc<dyn PeriodicTask>,
        interval: Duration,
        relative: bool,
    ) -> Result<Self, SchedulerError> {
        let runtime =
            Handle::try_current().map_err(|err| SchedulerError::NoRuntime(err.to_string()))?;
        Self::with_runtime(name, task, interval, relative, runtime)
    }

    /// 指定运行时创建（可在运行时之外的线程中 start/stop）。
    pub fn with_runtime(
        name: impl Into<String>,
        task: Arc<dyn PeriodicTask>,
        interval: Duration,
        relative: bool,
        runtime: Handle,
    ) -> Result<Self, SchedulerError> {
        let interval_nanos = interval_to_nanos(interval)?;
        Ok(Self {
            inner: Arc::new(SchedulerInner {
                name: name.into(),
                task,
                interval_nanos: AtomicU64::new(interval_nanos),
                relative,
                last_run_nanos: AtomicU64::new(0),
                on_error: RwLock::new(None),
                runtime,
                current: Mutex::new(None),
            }),
        })
    }

    /// 注册任务失败回调（覆盖旧回调）。
    pub fn on_error(&self, handler: impl Fn(&TaskError) + Send + Sync + 'static) {
        let mut slot = self
            .inner
            .on_error
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *slot = Some(Arc::new(handler));
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn interval(&self) -> Duration {
        self.inner.interval()
    }

    /// 修改周期；只影响下一次重排，不影响已在等待的触发。
    pub fn set_interval(&self, interval: Duration) -> Result<(), SchedulerError> {
        let nanos = interval_to_nanos(interval)?;
        self.inner.interval_nanos.swap(nanos, Ordering::AcqRel);
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.inner
            .current
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .is_some()
    }

    /// 最近一次任务执行耗时。
    pub fn last_run_duration(&self) -> Duration {
        Duration::from_nanos(self.inner.last_run_nanos.load(Ordering::Acquire))
    }

    /// 立即触发首轮。
    pub fn start(&self) -> bool {
        self.start_after(Duration::ZERO)
    }

    /// 延迟 `due` 后触发首轮；已运行时为空操作并返回 `false`。
    pub fn start_after(&self, due: Duration) -> bool {
        let mut current = self
            .inner
            .current
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if current.is_some() {
            return false;
        }
        let guard = Arc::new(RunGuard::new());
        *current = Some(guard.clone());
        drop(current);

        debug!(target: "iot.scheduler", scheduler = %self.inner.name, due_ms = due.as_millis() as u64, "scheduler_started");
        let weak = Arc::downgrade(&self.inner);
        self.inner.runtime.spawn(run_loop(weak, guard, due));
        true
    }

    /// 取消待触发的调用；可重复调用，可在任务内部调用。
    pub fn stop(&self) -> bool {
        let guard = self
            .inner
            .current
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        match guard {
            Some(guard) => {
                guard.cancel();
                debug!(target: "iot.scheduler", scheduler = %self.inner.name, "scheduler_stopped");
                true
            }
            None => false,
        }
    }
}

async fn run_loop(weak: Weak<SchedulerInner>, guard: Arc<RunGuard>, due: Duration) {
    let mut delay = due;
    loop {
        if !wait_or_cancel(&guard, delay).await {
            break;
        }
        let Some(inner) = weak.upgrade() else {
            break;
        };

        let started_at = Instant::now();
        let outcome = AssertUnwindSafe(inner.task.run()).catch_unwind().await;
        let elapsed = started_at.elapsed();
        inner
            .last_run_nanos
            .store(elapsed.as_nanos().min(u64::MAX as u128) as u64, Ordering::Release);

        match outcome {
            Ok(Ok(())) => {}
            Ok(Err(err)) => inner.report(&err),
            Err(panic) => inner.report(&TaskError::Panicked(panic_message(panic.as_ref()))),
        }

        if guard.is_cancelled() {
            break;
        }
        let interval = inner.interval();
        delay = if inner.relative {
            interval
        } else {
            interval.saturating_sub(elapsed)
        };
    }
}

/// 等待 `delay`；被取消时返回 `false`。
async fn wait_or_cancel(guard: &RunGuard, delay: Duration) -> bool {
    if guard.is_cancelled() {
        return false;
    }
    tokio::select! {
        _ = tokio::time::sleep(delay) => !guard.is_cancelled(),
        _ = guard.wake.notified() => false,
    }
}

fn interval_to_nanos(interval: Duration) -> Result<u64, SchedulerError> {
    if interval.is_zero() {
        return Err(SchedulerError::NonPositiveInterval);
    }
    Ok(interval.as_nanos().min(u64::MAX as u128) as u64)
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Noop;

    #[async_trait]
    impl PeriodicTask for Noop {
        async fn run(&self) -> Result<(), TaskError> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn zero_interval_is_rejected() {
        let result = PeriodicScheduler::new("noop", Arc::new(Noop), Duration::ZERO, true);
        assert!(matches!(result, Err(SchedulerError::NonPositiveInterval)));

        let scheduler =
            PeriodicScheduler::new("noop", Arc::new(Noop), Duration::from_secs(1), true)
                .expect("scheduler");
        assert!(scheduler.set_interval(Duration::ZERO).is_err());
        assert_eq!(scheduler.interval(), Duration::from_secs(1));
    }

    #[test]
    fn requires_runtime() {
        let result = PeriodicScheduler::new("noop", Arc::new(Noop), Duration::from_secs(1), true);
        assert!(matches!(result, Err(SchedulerError::NoRuntime(_))));
    }

    #[test]
    fn panic_message_extracts_payload() {
        let boxed: Box<dyn std::any::Any + Send> = Box::new("boom");
        assert_eq!(panic_message(boxed.as_ref()), "boom");
        let boxed: Box<dyn std::any::Any + Send> = Box::new(String::from("bang"));
        assert_eq!(panic_message(boxed.as_ref()), "bang");
    }
}
