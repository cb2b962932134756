use async_trait::async_trait;
use domain::{DeviceMessage, DeviceValue, RuleEngineResult, Verdict};
use iot_broker::{BrokerError, DeviceMessageHandler, ResultDestination, ResultPublisher};
use iot_engine::{DEFAULT_WINDOW_CAPACITY, RuleEngine};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use uuid::Uuid;

/// 记录所有发布结果的内存发布器。
#[derive(Default)]
struct RecordingPublisher {
    published: Mutex<Vec<(ResultDestination, RuleEngineResult)>>,
}

impl RecordingPublisher {
    fn to(&self, destination: ResultDestination) -> Vec<RuleEngineResult> {
        self.published
            .lock()
            .expect("published")
            .iter()
            .filter(|(target, _)| *target == destination)
            .map(|(_, result)| result.clone())
            .collect()
    }
}

#[async_trait]
impl ResultPublisher for RecordingPublisher {
    async fn publish(
        &self,
        destination: ResultDestination,
        result: &RuleEngineResult,
    ) -> Result<(), BrokerError> {
        self.published
            .lock()
            .expect("published")
            .push((destination, result.clone()));
        Ok(())
    }
}

struct FailingPublisher;

#[async_trait]
impl ResultPublisher for FailingPublisher {
    async fn publish(
        &self,
        _destination: ResultDestination,
        _result: &RuleEngineResult,
    ) -> Result<(), BrokerError> {
        Err(BrokerError::NotConnected)
    }
}

fn dummy_payload(device_id: Uuid, timestamp: u64) -> Vec<u8> {
    let value = DeviceValue::Dummy {
        byte_value: 150,
        int_value: 500,
        active: true,
    };
    let message = DeviceMessage::from_value(device_id, &value, timestamp).expect("encode");
    serde_json::to_vec(&message).expect("json")
}

#[tokio::test]
async fn every_message_gets_an_instant_verdict() {
    let publisher = Arc::new(RecordingPublisher::default());
    let engine = RuleEngine::new(publisher.clone(), DEFAULT_WINDOW_CAPACITY);
    let device_id = Uuid::new_v4();

    engine.handle(&dummy_payload(device_id, 1_000)).await;

    let instant = publisher.to(ResultDestination::Instant);
    assert_eq!(instant.len(), 1);
    assert_eq!(instant[0].device_id, device_id);
    assert_eq!(instant[0].verdict(), Verdict::Ok);
    assert_eq!(engine.windows().len_of(device_id), 1);
}

#[tokio::test]
async fn overflowing_window_is_evaluated_once_then_cleared() {
    let publisher = Arc::new(RecordingPublisher::default());
    let engine = RuleEngine::new(publisher.clone(), 30);
    let device_id = Uuid::new_v4();

    for index in 0..31 {
        engine.handle(&dummy_payload(device_id, 1_000 + index)).await;
    }
    assert_eq!(publisher.to(ResultDestination::Instant).len(), 31);

    assert_eq!(engine.evaluate_windows().await, 1);
    let continuous = publisher.to(ResultDestination::Continuous);
    assert_eq!(continuous.len(), 1);
    assert_eq!(continuous[0].device_id, device_id);
    assert_eq!(continuous[0].verdict(), Verdict::Ok);
    assert_eq!(continuous[0].message, "Device data is valid. 31 readings checked");
    assert_eq!(engine.windows().len_of(device_id), 0);

    // 清空后的窗口在下一轮被跳过
    assert_eq!(engine.evaluate_windows().await, 0);
    assert_eq!(publisher.to(ResultDestination::Continuous).len(), 1);
}

#[tokio::test]
async fn window_within_capacity_is_kept() {
    let publisher = Arc::new(RecordingPublisher::default());
    let engine = RuleEngine::new(publisher.clone(), 30);
    let device_id = Uuid::new_v4();
    for index in 0..5 {
        engine.handle(&dummy_payload(device_id, index)).await;
    }

    engine.evaluate_windows().await;
    engine.evaluate_windows().await;
    assert_eq!(publisher.to(ResultDestination::Continuous).len(), 2);
    assert_eq!(engine.windows().len_of(device_id), 5);
}

#[tokio::test]
async fn each_device_is_evaluated_separately() {
    let publisher = Arc::new(RecordingPublisher::default());
    let engine = RuleEngine::new(publisher.clone(), DEFAULT_WINDOW_CAPACITY);
    let first = Uuid::new_v4();
    let second = Uuid::new_v4();
    for index in 0..3 {
        engine.handle(&dummy_payload(first, index)).await;
        engine.handle(&dummy_payload(second, index)).await;
    }

    assert_eq!(engine.evaluate_windows().await, 2);
    let mut devices: Vec<Uuid> = publisher
        .to(ResultDestination::Continuous)
        .iter()
        .map(|result| result.device_id)
        .collect();
    devices.sort();
    let mut expected = vec![first, second];
    expected.sort();
    assert_eq!(devices, expected);
}

#[tokio::test]
async fn malformed_payload_is_dropped() {
    let publisher = Arc::new(RecordingPublisher::default());
    let engine = RuleEngine::new(publisher.clone(), DEFAULT_WINDOW_CAPACITY);

    engine.handle(b"not json").await;
    engine.handle(br#"{"deviceId":"nope","value":"","timestamp":1}"#).await;

    assert!(publisher.published.lock().expect("published").is_empty());
    assert_eq!(engine.windows().device_count(), 0);
}

#[tokio::test]
async fn undecodable_value_is_unknown_device_type() {
    let publisher = Arc::new(RecordingPublisher::default());
    let engine = RuleEngine::new(publisher.clone(), DEFAULT_WINDOW_CAPACITY);
    let device_id = Uuid::new_v4();
    let message = DeviceMessage::new(device_id, "!!not-base64!!", 1);

    engine
        .handle(&serde_json::to_vec(&message).expect("json"))
        .await;

    let instant = publisher.to(ResultDestination::Instant);
    assert_eq!(instant.len(), 1);
    assert_eq!(instant[0].device_id, device_id);
    assert_eq!(instant[0].verdict(), Verdict::Error);
    assert_eq!(instant[0].message, "Unknown device type.");

    engine.evaluate_windows().await;
    let continuous = publisher.to(ResultDestination::Continuous);
    assert_eq!(continuous.len(), 1);
    assert_eq!(continuous[0].message, "Unknown device type.");
}

#[tokio::test]
async fn publish_failures_do_not_interrupt_processing() {
    let engine = RuleEngine::new(Arc::new(FailingPublisher), 2);
    let device_id = Uuid::new_v4();
    for index in 0..3 {
        engine.handle(&dummy_payload(device_id, index)).await;
    }
    assert_eq!(engine.windows().len_of(device_id), 3);

    assert_eq!(engine.evaluate_windows().await, 1);
    assert_eq!(engine.windows().len_of(device_id), 0);
}

#[tokio::test(start_paused = true)]
async fn aggregate_scheduler_drives_window_evaluation() {
    let publisher = Arc::new(RecordingPublisher::default());
    let engine = RuleEngine::new(publisher.clone(), DEFAULT_WINDOW_CAPACITY);
    let device_id = Uuid::new_v4();
    for index in 0..3 {
        engine.handle(&dummy_payload(device_id, index)).await;
    }

    let scheduler = engine
        .aggregate_scheduler(Duration::from_secs(10))
        .expect("scheduler");
    scheduler.start_after(Duration::from_secs(10));

    tokio::time::sleep(Duration::from_secs(5)).await;
    assert!(publisher.to(ResultDestination::Continuous).is_empty());

    tokio::time::sleep(Duration::from_secs(6)).await;
    assert_eq!(publisher.to(ResultDestination::Continuous).len(), 1);

    tokio::time::sleep(Duration::from_secs(10)).await;
    assert_eq!(publisher.to(ResultDestination::Continuous).len(), 2);
    scheduler.stop();
}
