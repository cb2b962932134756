//! AMQP 连接管理。
//!
//! ```text
//! Disconnected ──(重连调度器触发)──► Connecting ──成功──► Connected
//!      ▲                                  │                   │
//!      └──────────────失败────────────────┘                   │
//!      └────────连接错误 / 通道关闭 / 消费流结束（重置计数，重新调度）──┘
//! ```
//!
//! 重连次数达到上限后停止调度，保持 `Disconnected`，不再自动恢复。
//! 每次连接成功递增 generation；旧连接上的错误或消费流结束不影响新连接。

use crate::error::BrokerError;
use crate::topology::{BrokerSettings, declare_topology};
use crate::{DeviceMessageHandler, ResultDestination, ResultPublisher};
use async_trait::async_trait;
use domain::RuleEngineResult;
use futures::StreamExt;
use iot_scheduler::{PeriodicScheduler, PeriodicTask, TaskError};
use iot_telemetry::{record_broker_connect_attempt, record_broker_connect_failure};
use lapin::options::{BasicConsumeOptions, BasicPublishOptions};
use lapin::types::FieldTable;
use lapin::{BasicProperties, Channel, Connection, ConnectionProperties, Consumer};
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, Weak};
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{debug, error, info, warn};

/// 连接状态。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

impl ConnectionState {
    pub fn as_str(self) -> &'static str {
        match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
        }
    }

    fn to_u8(self) -> u8 {
        match self {
            ConnectionState::Disconnected => 0,
            ConnectionState::Connecting => 1,
            ConnectionState::Connected => 2,
        }
    }

    fn from_u8(value: u8) -> Self {
        match value {
            1 => ConnectionState::Connecting,
            2 => ConnectionState::Connected,
            _ => ConnectionState::Disconnected,
        }
    }
}

struct ConsumerRegistration {
    handler: Arc<dyn DeviceMessageHandler>,
    scheduler: PeriodicScheduler,
}

struct BrokerInner {
    settings: BrokerSettings,
    state: AtomicU8,
    attempts: AtomicU32,
    generation: AtomicU64,
    exhausted: AtomicBool,
    closed: AtomicBool,
    connection: Mutex<Option<Arc<Connection>>>,
    channel: Mutex<Option<Channel>>,
    reconnect: OnceLock<PeriodicScheduler>,
    consumer: Mutex<Option<ConsumerRegistration>>,
    consumer_bound: AtomicBool,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl BrokerInner {
    fn set_state(&self, state: ConnectionState) {
        self.state.store(state.to_u8(), Ordering::Release);
    }

    fn state(&self) -> ConnectionState {
        ConnectionState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// 仍处于打开状态的通道；发现已关闭的通道时按连接丢失处理。
    fn live_channel(&self) -> Option<Channel> {
        let channel = lock(&self.channel).clone()?;
        if channel.status().connected() {
            return Some(channel);
        }
        self.handle_connection_error("channel closed");
        None
    }

    fn stop_reconnect(&self) {
        if let Some(scheduler) = self.reconnect.get() {
            scheduler.stop();
        }
    }

    async fn try_connect(self: &Arc<Self>) {
        if self.closed.load(Ordering::Acquire) || self.state() == ConnectionState::Connected {
            self.stop_reconnect();
            return;
        }

        let attempt = self.attempts.fetch_add(1, Ordering::AcqRel) + 1;
        record_broker_connect_attempt();
        self.set_state(ConnectionState::Connecting);
        debug!(target: "iot.broker", attempt, "broker_connect_attempt");

        match self.open().await {
            Ok((connection, channel)) => {
                let connection = Arc::new(connection);
                *lock(&self.connection) = Some(connection.clone());
                *lock(&self.channel) = Some(channel);
                let generation = self.generation.fetch_add(1, Ordering::AcqRel) + 1;
                self.attempts.store(0, Ordering::Release);
                self.set_state(ConnectionState::Connected);
                self.stop_reconnect();

                let weak = Arc::downgrade(self);
                connection.on_error(move |err| {
                    if let Some(inner) = weak.upgrade() {
                        inner.connection_lost(generation, &err.to_string());
                    }
                });
                info!(
                    target: "iot.broker",
                    attempt,
                    exchange = %self.settings.exchange,
                    "broker_connected"
                );
            }
            Err(err) => {
                record_broker_connect_failure();
                self.set_state(ConnectionState::Disconnected);
                warn!(
                    target: "iot.broker",
                    attempt,
                    max_attempts = self.settings.reconnect_max_attempts,
                    error = %err,
                    "broker_connect_failed"
                );
                if attempt >= self.settings.reconnect_max_attempts {
                    self.stop_reconnect();
                    self.exhausted.store(true, Ordering::Release);
                    error!(
                        target: "iot.broker",
                        attempts = attempt,
                        "broker_reconnect_exhausted"
                    );
                }
            }
        }
    }

    async fn open(&self) -> Result<(Connection, Channel), BrokerError> {
        let connection = Connection::connect(&self.settings.uri, ConnectionProperties::default())
            .await
            .map_err(|err| BrokerError::Connect(err.to_string()))?;
        let channel = connection
            .create_channel()
            .await
            .map_err(|err| BrokerError::Connect(err.to_string()))?;
        declare_topology(&channel, &self.settings).await?;
        Ok((connection, channel))
    }

    /// 仅当 `generation` 仍是当前连接时处理丢失。
    fn connection_lost(&self, generation: u64, reason: &str) {
        if self.generation.load(Ordering::Acquire) != generation {
            debug!(target: "iot.broker", generation, error = %reason, "stale_connection_event");
            return;
        }
        self.handle_connection_error(reason);
    }

    /// 已建立的连接出错：清理通道，重新开始有界重连并重新注册消费者。
    /// 只有 `Connected -> Disconnected` 的那一次调用生效。
    fn handle_connection_error(&self, reason: &str) {
        if self.closed.load(Ordering::Acquire) {
            return;
        }
        let lost = self.state.compare_exchange(
            ConnectionState::Connected.to_u8(),
            ConnectionState::Disconnected.to_u8(),
            Ordering::AcqRel,
            Ordering::Acquire,
        );
        if lost.is_err() {
            return;
        }
        warn!(target: "iot.broker", error = %reason, "broker_connection_lost");
        lock(&self.channel).take();
        lock(&self.connection).take();
        self.attempts.store(0, Ordering::Release);
        self.exhausted.store(false, Ordering::Release);
        self.consumer_bound.store(false, Ordering::Release);

        if let Some(scheduler) = self.reconnect.get() {
            scheduler.start();
        }
        if let Some(registration) = lock(&self.consumer).as_ref() {
            registration.scheduler.start();
        }
    }

    async fn bind_consumer(self: &Arc<Self>) -> Result<(), TaskError> {
        if self.consumer_bound.load(Ordering::Acquire) {
            self.stop_consumer_registration();
            return Ok(());
        }
        let Some(channel) = self.live_channel() else {
            debug!(target: "iot.broker", "consumer_waiting_for_channel");
            return Ok(());
        };
        let Some(handler) = lock(&self.consumer)
            .as_ref()
            .map(|registration| registration.handler.clone())
        else {
            return Ok(());
        };

        let generation = self.generation.load(Ordering::Acquire);
        let consumer_tag = format!("rule-engine-{}", uuid::Uuid::new_v4());
        let consumer = channel
            .basic_consume(
                &self.settings.device_queue,
                &consumer_tag,
                BasicConsumeOptions {
                    no_ack: true,
                    ..BasicConsumeOptions::default()
                },
                FieldTable::default(),
            )
            .await
            .map_err(|err| TaskError::failed(BrokerError::Consume(err.to_string()).to_string()))?;

        tokio::spawn(consume_loop(
            consumer,
            handler,
            Arc::downgrade(self),
            generation,
        ));
        self.consumer_bound.store(true, Ordering::Release);
        self.stop_consumer_registration();
        info!(
            target: "iot.broker",
            queue = %self.settings.device_queue,
            consumer_tag = %consumer_tag,
            "consumer_registered"
        );
        Ok(())
    }

    fn stop_consumer_registration(&self) {
        if let Some(registration) = lock(&self.consumer).as_ref() {
            registration.scheduler.stop();
        }
    }
}

/// 消费流结束即视为所属连接丢失，触发重连与消费者重新绑定。
async fn consume_loop(
    mut consumer: Consumer,
    handler: Arc<dyn DeviceMessageHandler>,
    inner: Weak<BrokerInner>,
    generation: u64,
) {
    while let Some(delivery) = consumer.next().await {
        match delivery {
            Ok(delivery) => handler.handle(&delivery.data).await,
            Err(err) => {
                warn!(target: "iot.broker", error = %err, "consumer_stream_failed");
                break;
            }
        }
    }
    debug!(target: "iot.broker", generation, "consumer_stream_closed");
    if let Some(inner) = inner.upgrade() {
        inner.connection_lost(generation, "consumer stream closed");
    }
}

struct ReconnectTask {
    inner: Weak<BrokerInner>,
}

#[async_trait]
impl PeriodicTask for ReconnectTask {
    async fn run(&self) -> Result<(), TaskError> {
        if let Some(inner) = self.inner.upgrade() {
            inner.try_connect().await;
        }
        Ok(())
    }
}

struct ConsumerTask {
    inner: Weak<BrokerInner>,
}

#[async_trait]
impl PeriodicTask for ConsumerTask {
    async fn run(&self) -> Result<(), TaskError> {
        match self.inner.upgrade() {
            Some(inner) => inner.bind_consumer().await,
            None => Ok(()),
        }
    }
}

/// 消息代理连接（可克隆句柄）。
#[derive(Clone)]
pub struct BrokerConnection {
    inner: Arc<BrokerInner>,
}

impl BrokerConnection {
    /// 创建连接管理器（不立即连接）；需在 tokio 运行时内调用。
    pub fn new(settings: BrokerSettings) -> Result<Self, BrokerError> {
        let period = settings.reconnect_period;
        let inner = Arc::new(BrokerInner {
            settings,
            state: AtomicU8::new(ConnectionState::Disconnected.to_u8()),
            attempts: AtomicU32::new(0),
            generation: AtomicU64::new(0),
            exhausted: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            connection: Mutex::new(None),
            channel: Mutex::new(None),
            reconnect: OnceLock::new(),
            consumer: Mutex::new(None),
            consumer_bound: AtomicBool::new(false),
        });
        let task = Arc::new(ReconnectTask {
            inner: Arc::downgrade(&inner),
        });
        let scheduler = PeriodicScheduler::new("broker-reconnect", task, period, true)?;
        // 刚创建，必然为空
        let _ = inner.reconnect.set(scheduler);
        Ok(Self { inner })
    }

    /// 启动有界重连；已在重连中时为空操作。
    pub fn start(&self) {
        self.inner.closed.store(false, Ordering::Release);
        if let Some(scheduler) = self.inner.reconnect.get() {
            if scheduler.start() {
                info!(
                    target: "iot.broker",
                    period_ms = self.inner.settings.reconnect_period.as_millis() as u64,
                    max_attempts = self.inner.settings.reconnect_max_attempts,
                    "broker_reconnect_started"
                );
            }
        }
    }

    pub fn settings(&self) -> &BrokerSettings {
        &self.inner.settings
    }

    pub fn state(&self) -> ConnectionState {
        self.inner.state()
    }

    pub fn is_connected(&self) -> bool {
        self.inner.live_channel().is_some()
    }

    /// 当前轮次已尝试的连接次数（成功后清零）。
    pub fn attempts(&self) -> u32 {
        self.inner.attempts.load(Ordering::Acquire)
    }

    /// 是否已达到重连上限。
    pub fn is_exhausted(&self) -> bool {
        self.inner.exhausted.load(Ordering::Acquire)
    }

    pub fn is_reconnecting(&self) -> bool {
        self.inner
            .reconnect
            .get()
            .is_some_and(PeriodicScheduler::is_running)
    }

    pub fn is_consumer_bound(&self) -> bool {
        self.inner.consumer_bound.load(Ordering::Acquire)
    }

    /// 注册设备消息处理器；通道就绪前由独立调度器重试，绑定后自停。重复注册为空操作。
    pub fn register_consumer(
        &self,
        handler: Arc<dyn DeviceMessageHandler>,
    ) -> Result<(), BrokerError> {
        let mut slot = lock(&self.inner.consumer);
        if slot.is_some() {
            debug!(target: "iot.broker", "consumer_already_registered");
            return Ok(());
        }
        let task = Arc::new(ConsumerTask {
            inner: Arc::downgrade(&self.inner),
        });
        let scheduler = PeriodicScheduler::new(
            "broker-consumer",
            task,
            self.inner.settings.reconnect_period,
            true,
        )?;
        *slot = Some(ConsumerRegistration {
            handler,
            scheduler: scheduler.clone(),
        });
        drop(slot);
        scheduler.start();
        Ok(())
    }

    /// 停止全部调度并关闭连接（尽力而为）。
    pub async fn close(&self) {
        self.inner.closed.store(true, Ordering::Release);
        self.inner.stop_reconnect();
        self.inner.stop_consumer_registration();
        lock(&self.inner.channel).take();
        let connection = lock(&self.inner.connection).take();
        self.inner.set_state(ConnectionState::Disconnected);
        if let Some(connection) = connection {
            if let Err(err) = connection.close(200, "rule engine shutdown").await {
                warn!(target: "iot.broker", error = %err, "broker_close_failed");
            }
        }
        info!(target: "iot.broker", "broker_closed");
    }
}

#[async_trait]
impl ResultPublisher for BrokerConnection {
    async fn publish(
        &self,
        destination: ResultDestination,
        result: &RuleEngineResult,
    ) -> Result<(), BrokerError> {
        let channel = self.inner.live_channel().ok_or(BrokerError::NotConnected)?;
        let payload = result
            .to_json()
            .map_err(|err| BrokerError::Serialize(err.to_string()))?;
        let routing_key = self.inner.settings.queue_for(destination);
        let properties = BasicProperties::default()
            .with_delivery_mode(2)
            .with_message_id(uuid::Uuid::new_v4().to_string().into())
            .with_timestamp(now_epoch_secs())
            .with_content_type("application/json".into());

        channel
            .basic_publish(
                &self.inner.settings.exchange,
                routing_key,
                BasicPublishOptions::default(),
                &payload,
                properties,
            )
            .await
            .map_err(|err| BrokerError::Publish(err.to_string()))?;
        debug!(
            target: "iot.broker",
            destination = destination.as_str(),
            routing_key = %routing_key,
            payload_size = payload.len(),
            "result_published"
        );
        Ok(())
    }
}

fn now_epoch_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|duration| duration.as_secs())
        .unwrap_or_default()
}
