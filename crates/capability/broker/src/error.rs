//! 消息代理错误类型定义

use iot_scheduler::SchedulerError;

/// 消息代理错误
#[derive(Debug, thiserror::Error)]
pub enum BrokerError {
    /// 通道不存在或已关闭
    #[error("broker not connected")]
    NotConnected,

    /// 建立连接失败
    #[error("connect failed: {0}")]
    Connect(String),

    /// 交换机 / 队列 / 绑定声明失败
    #[error("topology declaration failed: {0}")]
    Topology(String),

    #[error("publish failed: {0}")]
    Publish(String),

    #[error("consume failed: {0}")]
    Consume(String),

    #[error("serialization failed: {0}")]
    Serialize(String),

    #[error("scheduler error: {0}")]
    Scheduler(#[from] SchedulerError),
}
