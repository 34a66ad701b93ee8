//! Library lifecycle: initialization, registries, logging and teardown.

mod common;

use std::sync::{Arc, Mutex};

use cirrus::{
    Agent, AgentFlags, LogLevel, Plugin, Status, Value, ValueType, Version,
};
use common::{test_env, Recorder};

#[test]
fn initialize_validates_the_id() {
    let _env = test_env();
    assert!(matches!(
        Agent::initialize("", None, AgentFlags::empty()),
        Err(Status::BadParameter)
    ));
    let agent = Agent::initialize("valid-app", None, AgentFlags::SINGLE_THREAD).unwrap();
    assert_eq!(agent.id(), "valid-app");
    assert_eq!(agent.device_id().len(), 36);
}

#[test]
fn registries_reject_duplicates_regardless_of_insertion_order() {
    let _env = test_env();
    let agent = Agent::initialize("test-app", None, AgentFlags::SINGLE_THREAD).unwrap();

    // allocations out of alphabetical order keep the binary search honest
    agent.action_allocate("beta").unwrap();
    agent.action_allocate("alpha").unwrap();
    agent.action_allocate("gamma").unwrap();
    assert_eq!(agent.action_allocate("ALPHA").err(), Some(Status::Exists));
    assert_eq!(agent.action_allocate("Gamma").err(), Some(Status::Exists));
    assert_eq!(agent.action_allocate("").err(), Some(Status::BadParameter));

    agent.telemetry_allocate("zeta", ValueType::Null).unwrap();
    agent.telemetry_allocate("eta", ValueType::Null).unwrap();
    assert_eq!(
        agent.telemetry_allocate("ZETA", ValueType::Null).err(),
        Some(Status::Exists)
    );

    agent.alarm_register("low").unwrap();
    assert_eq!(agent.alarm_register("LOW").err(), Some(Status::Exists));
}

#[test]
fn action_parameter_schema_rules() {
    let _env = test_env();
    let agent = Agent::initialize("test-app", None, AgentFlags::SINGLE_THREAD).unwrap();
    let action = agent.action_allocate("schema").unwrap();

    action
        .parameter_add("ok", cirrus::ParamDirection::IN, ValueType::Int32)
        .unwrap();
    // duplicate names are case-insensitive
    assert_eq!(
        action.parameter_add("OK", cirrus::ParamDirection::IN, ValueType::Int32),
        Err(Status::BadRequest)
    );
    // shell metacharacters are rejected
    for bad in ["a=b", "a\\b", "a;b", "a&b", "a|b"] {
        assert_eq!(
            action.parameter_add(bad, cirrus::ParamDirection::IN, ValueType::Int32),
            Err(Status::BadRequest),
            "name {bad:?} should be rejected"
        );
    }

    for i in 0..(cirrus::PARAMETER_MAX - 1) {
        action
            .parameter_add(
                &format!("p{i}"),
                cirrus::ParamDirection::IN,
                ValueType::Bool,
            )
            .unwrap();
    }
    assert_eq!(
        action.parameter_add("one-too-many", cirrus::ParamDirection::IN, ValueType::Bool),
        Err(Status::Full)
    );
}

#[test]
fn action_options_round_trip() {
    let _env = test_env();
    let agent = Agent::initialize("test-app", None, AgentFlags::SINGLE_THREAD).unwrap();
    let action = agent.action_allocate("opted").unwrap();
    action.option_set("retry", Value::Bool(true)).unwrap();
    assert_eq!(
        action.option_get("retry", false, ValueType::Bool).unwrap(),
        Value::Bool(true)
    );
    assert_eq!(
        action.option_get("absent", false, ValueType::Bool),
        Err(Status::NotFound)
    );
}

#[test]
fn config_map_accepts_and_converts_values() {
    let _env = test_env();
    let agent = Agent::initialize("test-app", None, AgentFlags::SINGLE_THREAD).unwrap();
    agent.config_set("limit", Value::String("128".into())).unwrap();
    assert_eq!(
        agent.config_get("limit", true, ValueType::UInt64).unwrap(),
        Value::UInt64(128)
    );
    assert_eq!(
        agent.config_get("limit", false, ValueType::UInt64),
        Err(Status::BadRequest)
    );
}

#[test]
fn log_callback_receives_filtered_messages() {
    let _env = test_env();
    let agent = Agent::initialize("test-app", None, AgentFlags::SINGLE_THREAD).unwrap();
    let captured = Arc::new(Mutex::new(Vec::new()));
    let sink = captured.clone();
    agent.log_callback_set(Some(Box::new(move |level, source, message| {
        assert!(!source.file.is_empty());
        sink.lock().unwrap().push((level, message.to_string()));
    })));

    // INFO default: trace-level registration chatter is filtered
    let action = agent.action_allocate("quiet").unwrap();
    let _ = action.register_callback(|_| Status::Success, 0);
    assert!(captured
        .lock()
        .unwrap()
        .iter()
        .all(|(level, _)| *level <= LogLevel::Info));

    agent.log_level_set_str("trace").unwrap();
    let action = agent.action_allocate("loud").unwrap();
    let _ = action.register_callback(|_| Status::Success, 0);
    assert!(captured
        .lock()
        .unwrap()
        .iter()
        .any(|(level, message)| *level == LogLevel::Trace
            && message.contains("registering action loud")));

    assert_eq!(agent.log_level_set_str("bogus"), Err(Status::NotFound));
}

#[test]
fn terminate_withdraws_every_entity() {
    let _env = test_env();
    let recorder = Recorder::new("recorder", 0);
    let agent = Agent::initialize_with_plugins(
        "test-app",
        None,
        AgentFlags::SINGLE_THREAD,
        vec![recorder.clone() as Arc<dyn Plugin>],
    )
    .unwrap();

    agent.action_allocate("act").unwrap();
    agent.telemetry_allocate("tel", ValueType::Null).unwrap();
    agent.alarm_register("alm").unwrap();

    agent.terminate(0).unwrap();

    let ops: Vec<String> = recorder
        .event_names()
        .into_iter()
        .map(|(_, op, _)| op)
        .collect();
    assert!(ops.contains(&"action_deregister".to_string()));
    assert!(ops.contains(&"telemetry_deregister".to_string()));
    assert!(ops.contains(&"alarm_deregister".to_string()));
    assert!(ops.contains(&"client_disconnect".to_string()));
}

#[test]
fn version_is_packed_from_the_crate_version() {
    let version = Agent::version();
    let expected: Vec<u8> = Agent::version_str()
        .split('.')
        .map(|part| part.parse().unwrap())
        .collect();
    assert_eq!(version.major(), expected[0]);
    assert_eq!(version.minor(), expected[1]);
    assert_eq!(version.patch(), expected[2]);
    assert_eq!(version, Version::new(expected[0], expected[1], expected[2], 0));
}

#[test]
fn timestamps_are_epoch_milliseconds() {
    // 2020-01-01 as a sanity floor
    assert!(Agent::timestamp_now() > 1_577_836_800_000);
}
