//! 规则引擎进程：消费设备数据队列，发布即时与聚合判定。

mod status;

use iot_broker::{BrokerConnection, BrokerSettings};
use iot_config::EngineConfig;
use iot_engine::RuleEngine;
use iot_telemetry::init_tracing;
use std::sync::Arc;
use tracing::info;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // 加载本地 .env（如存在），便于直接 cargo run 启动
    dotenvy::dotenv().ok();
    // 从环境变量加载运行配置
    let config = EngineConfig::from_env()?;
    // 初始化结构化日志
    init_tracing();

    // 代理连接：后台有界重连
    let broker = BrokerConnection::new(BrokerSettings::from_config(&config))?;
    broker.start();

    // 引擎通过代理连接发布判定
    let engine = RuleEngine::new(Arc::new(broker.clone()), config.window_capacity);
    let aggregate = engine.aggregate_scheduler(config.aggregate_period())?;
    aggregate.start_after(config.aggregate_period());

    // 通道就绪后绑定消费者
    broker.register_consumer(Arc::new(engine.clone()))?;

    let status_server = match config.http_addr.as_deref() {
        Some(addr) => {
            status::spawn(
                addr,
                status::StatusState {
                    broker: broker.clone(),
                },
            )
            .await
        }
        None => None,
    };

    info!(
        target: "iot.rule_engine",
        exchange = %config.exchange,
        device_queue = %config.device_queue,
        aggregate_period_ms = config.aggregate_period_ms,
        window_capacity = config.window_capacity,
        "rule_engine_started"
    );

    tokio::signal::ctrl_c().await?;
    info!(target: "iot.rule_engine", "rule_engine_stopping");

    aggregate.stop();
    broker.close().await;
    if let Some(handle) = status_server {
        handle.abort();
    }
    info!(target: "iot.rule_engine", "rule_engine_stopped");
    Ok(())
}
