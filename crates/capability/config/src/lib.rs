//! 规则引擎运行配置加载。

use std::env;
use std::time::Duration;

/// 配置加载错误。
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid value for {0}: {1}")]
    Invalid(String, String),
}

/// 规则引擎运行配置。
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub amqp_host: String,
    pub amqp_port: u16,
    pub amqp_username: String,
    pub amqp_password: String,
    pub amqp_vhost: String,
    pub exchange: String,
    pub device_queue: String,
    pub instant_queue: String,
    pub continuous_queue: String,
    pub routing_key: String,
    pub reconnect_period_ms: u64,
    pub reconnect_max_attempts: u32,
    pub aggregate_period_ms: u64,
    pub window_capacity: usize,
    /// 状态端点监听地址；`None` 表示关闭。
    pub http_addr: Option<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            amqp_host: "localhost".to_string(),
            amqp_port: 5672,
            amqp_username: "guest".to_string(),
            amqp_password: "guest".to_string(),
            amqp_vhost: "/".to_string(),
            exchange: "iot_exchange".to_string(),
            device_queue: "device_data_queue".to_string(),
            instant_queue: "instant_analysis_queue".to_string(),
            continuous_queue: "continuous_analysis_queue".to_string(),
            routing_key: "iot_device_data".to_string(),
            reconnect_period_ms: 3_000,
            reconnect_max_attempts: 40,
            aggregate_period_ms: 10_000,
            window_capacity: 30,
            http_addr: Some("127.0.0.1:14624".to_string()),
        }
    }
}

impl EngineConfig {
    /// 从环境变量读取配置（未设置的项使用默认值）。
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let amqp_host = read_string_with_default("RULE_ENGINE_AMQP_HOST", &defaults.amqp_host);
        let amqp_port = read_u16_with_default("RULE_ENGINE_AMQP_PORT", defaults.amqp_port)?;
        let amqp_username =
            read_string_with_default("RULE_ENGINE_AMQP_USERNAME", &defaults.amqp_username);
        let amqp_password =
            read_string_with_default("RULE_ENGINE_AMQP_PASSWORD", &defaults.amqp_password);
        let amqp_vhost = read_string_with_default("RULE_ENGINE_AMQP_VHOST", &defaults.amqp_vhost);
        let exchange = read_string_with_default("RULE_ENGINE_EXCHANGE", &defaults.exchange);
        let device_queue =
            read_string_with_default("RULE_ENGINE_DEVICE_QUEUE", &defaults.device_queue);
        let instant_queue =
            read_string_with_default("RULE_ENGINE_INSTANT_QUEUE", &defaults.instant_queue);
        let continuous_queue =
            read_string_with_default("RULE_ENGINE_CONTINUOUS_QUEUE", &defaults.continuous_queue);
        let routing_key =
            read_string_with_default("RULE_ENGINE_ROUTING_KEY", &defaults.routing_key);
        let reconnect_period_ms = read_positive_u64_with_default(
            "RULE_ENGINE_RECONNECT_PERIOD_MS",
            defaults.reconnect_period_ms,
        )?;
        let reconnect_max_attempts = read_positive_u64_with_default(
            "RULE_ENGINE_RECONNECT_MAX_ATTEMPTS",
            u64::from(defaults.reconnect_max_attempts),
        )?;
        let reconnect_max_attempts = u32::try_from(reconnect_max_attempts).map_err(|_| {
            ConfigError::Invalid(
                "RULE_ENGINE_RECONNECT_MAX_ATTEMPTS".to_string(),
                reconnect_max_attempts.to_string(),
            )
        })?;
        let aggregate_period_ms = read_positive_u64_with_default(
            "RULE_ENGINE_AGGREGATE_PERIOD_MS",
            defaults.aggregate_period_ms,
        )?;
        let window_capacity = read_positive_u64_with_default(
            "RULE_ENGINE_WINDOW_CAPACITY",
            defaults.window_capacity as u64,
        )? as usize;
        let http_addr = match env::var("RULE_ENGINE_HTTP_ADDR") {
            Ok(value) if value.trim().is_empty() => None,
            Ok(value) => Some(value),
            Err(_) => defaults.http_addr,
        };

        Ok(Self {
            amqp_host,
            amqp_port,
            amqp_username,
            amqp_password,
            amqp_vhost,
            exchange,
            device_queue,
            instant_queue,
            continuous_queue,
            routing_key,
            reconnect_period_ms,
            reconnect_max_attempts,
            aggregate_period_ms,
            window_capacity,
            http_addr,
        })
    }

    /// AMQP 连接 URI（vhost `/` 编码为 `%2f`）。
    pub fn amqp_uri(&self) -> String {
        let vhost = if self.amqp_vhost == "/" {
            "%2f".to_string()
        } else {
            self.amqp_vhost.trim_start_matches('/').to_string()
        };
        format!(
            "amqp://{}:{}@{}:{}/{}",
            self.amqp_username, self.amqp_password, self.amqp_host, self.amqp_port, vhost
        )
    }

    pub fn reconnect_period(&self) -> Duration {
        Duration::from_millis(self.reconnect_period_ms)
    }

    pub fn aggregate_period(&self) -> Duration {
        Duration::from_millis(self.aggregate_period_ms)
    }
}

fn read_string_with_default(key: &str, default: &str) -> String {
    match env::var(key) {
        Ok(value) if !value.trim().is_empty() => value,
        _ => default.to_string(),
    }
}

fn read_u16_with_default(key: &str, default: u16) -> Result<u16, ConfigError> {
    let value = match env::var(key) {
        Ok(value) => value,
        Err(_) => return Ok(default),
    };
    value
        .parse::<u16>()
        .map_err(|_| ConfigError::Invalid(key.to_string(), value))
}

/// 读取正整数；0 视为非法。
fn read_positive_u64_with_default(key: &str, default: u64) -> Result<u64, ConfigError> {
    let value = match env::var(key) {
        Ok(value) => value,
        Err(_) => return Ok(default),
    };
    match value.parse::<u64>() {
        Ok(parsed) if parsed > 0 => Ok(parsed),
        _ => Err(ConfigError::Invalid(key.to_string(), value)),
    }
}
