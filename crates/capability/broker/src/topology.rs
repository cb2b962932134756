//! 连接参数与拓扑声明。
//!
//! ```text
//! exchange (direct, durable)
//!   ├── routing_key        → device_queue
//!   ├── instant_queue      → instant_queue
//!   └── continuous_queue   → continuous_queue
//! ```

use crate::ResultDestination;
use crate::error::BrokerError;
use iot_config::EngineConfig;
use lapin::options::{ExchangeDeclareOptions, QueueBindOptions, QueueDeclareOptions};
use lapin::types::FieldTable;
use lapin::{Channel, ExchangeKind};
use std::time::Duration;

/// 消息代理连接参数。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerSettings {
    pub uri: String,
    pub exchange: String,
    pub device_queue: String,
    pub instant_queue: String,
    pub continuous_queue: String,
    pub routing_key: String,
    pub reconnect_period: Duration,
    pub reconnect_max_attempts: u32,
}

impl BrokerSettings {
    pub fn from_config(config: &EngineConfig) -> Self {
        Self {
            uri: config.amqp_uri(),
            exchange: config.exchange.clone(),
            device_queue: config.device_queue.clone(),
            instant_queue: config.instant_queue.clone(),
            continuous_queue: config.continuous_queue.clone(),
            routing_key: config.routing_key.clone(),
            reconnect_period: config.reconnect_period(),
            reconnect_max_attempts: config.reconnect_max_attempts,
        }
    }

    /// 结果队列名（同时作为发布时的 routing key）。
    pub fn queue_for(&self, destination: ResultDestination) -> &str {
        match destination {
            ResultDestination::Instant => &self.instant_queue,
            ResultDestination::Continuous => &self.continuous_queue,
        }
    }

    /// `(queue, routing_key)` 绑定列表。
    pub fn bindings(&self) -> Vec<(&str, &str)> {
        vec![
            (self.device_queue.as_str(), self.routing_key.as_str()),
            (self.instant_queue.as_str(), self.instant_queue.as_str()),
            (self.continuous_queue.as_str(), self.continuous_queue.as_str()),
        ]
    }
}

/// 声明交换机、队列与绑定（均为 durable，可重复声明）。
pub async fn declare_topology(channel: &Channel, settings: &BrokerSettings) -> Result<(), BrokerError> {
    channel
        .exchange_declare(
            &settings.exchange,
            ExchangeKind::Direct,
            ExchangeDeclareOptions {
                durable: true,
                ..ExchangeDeclareOptions::default()
            },
            FieldTable::default(),
        )
        .await
        .map_err(|err| BrokerError::Topology(err.to_string()))?;

    for (queue, routing_key) in settings.bindings() {
        channel
            .queue_declare(
                queue,
                QueueDeclareOptions {
                    durable: true,
                    ..QueueDeclareOptions::default()
                },
                FieldTable::default(),
            )
            .await
            .map_err(|err| BrokerError::Topology(err.to_string()))?;
        channel
            .queue_bind(
                queue,
                &settings.exchange,
                routing_key,
                QueueBindOptions::default(),
                FieldTable::default(),
            )
            .await
            .map_err(|err| BrokerError::Topology(err.to_string()))?;
    }
    Ok(())
}
