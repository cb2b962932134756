use async_trait::async_trait;
use domain::RuleEngineResult;
use iot_broker::{
    BrokerConnection, BrokerError, BrokerSettings, ConnectionState, DeviceMessageHandler,
    ResultDestination, ResultPublisher,
};
use iot_config::EngineConfig;
use std::sync::Arc;
use std::time::Duration;

/// 指向无人监听端口的连接参数。
fn unreachable_settings(max_attempts: u32) -> BrokerSettings {
    let config = EngineConfig {
        amqp_host: "127.0.0.1".to_string(),
        amqp_port: 1,
        reconnect_period_ms: 10,
        reconnect_max_attempts: max_attempts,
        ..EngineConfig::default()
    };
    BrokerSettings::from_config(&config)
}

struct NoopHandler;

#[async_trait]
impl DeviceMessageHandler for NoopHandler {
    async fn handle(&self, _payload: &[u8]) {}
}

#[tokio::test]
async fn publish_fails_fast_when_not_connected() {
    let broker = BrokerConnection::new(unreachable_settings(3)).expect("broker");
    assert_eq!(broker.state(), ConnectionState::Disconnected);
    assert!(!broker.is_connected());

    let result = broker
        .publish(ResultDestination::Instant, &RuleEngineResult::ok("fine"))
        .await;
    assert!(matches!(result, Err(BrokerError::NotConnected)));
}

#[tokio::test]
async fn reconnect_stops_at_attempt_cap() {
    let broker = BrokerConnection::new(unreachable_settings(3)).expect("broker");
    broker.start();

    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    while !broker.is_exhausted() && tokio::time::Instant::now() < deadline {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    assert!(broker.is_exhausted());
    assert_eq!(broker.attempts(), 3);
    assert_eq!(broker.state(), ConnectionState::Disconnected);
    assert!(!broker.is_reconnecting());

    // 达到上限后不再尝试
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(broker.attempts(), 3);
}

#[tokio::test]
async fn consumer_registration_is_idempotent_and_waits_for_channel() {
    let broker = BrokerConnection::new(unreachable_settings(1)).expect("broker");
    broker
        .register_consumer(Arc::new(NoopHandler))
        .expect("first registration");
    broker
        .register_consumer(Arc::new(NoopHandler))
        .expect("second registration");

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(!broker.is_consumer_bound());
    broker.close().await;
    assert_eq!(broker.state(), ConnectionState::Disconnected);
}

#[test]
fn construction_requires_runtime() {
    let result = BrokerConnection::new(unreachable_settings(1));
    assert!(matches!(result, Err(BrokerError::Scheduler(_))));
}
