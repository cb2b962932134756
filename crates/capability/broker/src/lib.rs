//! # 消息代理能力
//!
//! - [`BrokerConnection`]：AMQP 连接管理（有界重连、拓扑声明、发布、消费注册）
//! - [`DeviceMessageHandler`]：设备消息回调
//! - [`ResultPublisher`]：判定结果发布
//!
//! 发布为 at-most-once：未连接时立即失败，不做重试与缓存。

pub mod connection;
pub mod error;
pub mod topology;

use async_trait::async_trait;
use domain::RuleEngineResult;

pub use connection::{BrokerConnection, ConnectionState};
pub use error::BrokerError;
pub use topology::BrokerSettings;

/// 结果发布目标。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResultDestination {
    /// 单条消息即时判定
    Instant,
    /// 窗口聚合判定
    Continuous,
}

impl ResultDestination {
    pub fn as_str(self) -> &'static str {
        match self {
            ResultDestination::Instant => "instant",
            ResultDestination::Continuous => "continuous",
        }
    }
}

/// 设备消息处理器（原始消息体）。
#[async_trait]
pub trait DeviceMessageHandler: Send + Sync {
    async fn handle(&self, payload: &[u8]);
}

/// 判定结果发布器。
#[async_trait]
pub trait ResultPublisher: Send + Sync {
    async fn publish(
        &self,
        destination: ResultDestination,
        result: &RuleEngineResult,
    ) -> Result<(), BrokerError>;
}
