use domain::{DeviceMessage, DeviceValue, IndustrialSystemData, RuleEngineResult, Verdict};
use uuid::Uuid;

#[test]
fn device_message_parses_camel_case_envelope() {
    let device_id = Uuid::new_v4();
    let value = DeviceValue::Sensor {
        data: vec![0xAA, 0x01, 0x20, 0x10, 0x09, 0x84, 0x55],
        active: true,
    };
    let encoded = value.encode().expect("encode");
    let json = format!(
        r#"{{"deviceId":"{}","value":"{}","timestamp":1700000000000}}"#,
        device_id, encoded
    );

    let message = DeviceMessage::from_json(json.as_bytes()).expect("parse");
    assert_eq!(message.device_id, device_id);
    assert_eq!(message.timestamp, 1_700_000_000_000);
    assert_eq!(message.decode_value().expect("decode"), value);
}

#[test]
fn industrial_value_round_trips_through_message() {
    let device_id = Uuid::new_v4();
    let value = DeviceValue::Industrial(IndustrialSystemData {
        system_id: "SYS_1".to_string(),
        error_count: 3,
        ..Default::default()
    });
    let message = DeviceMessage::from_value(device_id, &value, 42).expect("message");
    assert_eq!(message.decode_value().expect("decode"), value);
}

#[test]
fn result_serializes_with_engine_verdict() {
    let device_id = Uuid::new_v4();
    let result = RuleEngineResult::warning("ratio high").for_device(device_id);
    let json: serde_json::Value =
        serde_json::from_slice(&result.to_json().expect("json")).expect("value");

    assert_eq!(json["deviceId"], device_id.to_string());
    assert_eq!(json["engineVerdict"], "Warning");
    assert_eq!(json["message"], "ratio high");
    assert!(!Verdict::Warning.is_failure());
    assert!(Verdict::Error.is_failure());
}

#[test]
fn unknown_device_type_is_error() {
    let result = RuleEngineResult::unknown_device_type();
    assert_eq!(result.verdict(), Verdict::Error);
    assert_eq!(result.message, "Unknown device type.");
    assert!(result.device_id.is_nil());
}
