//! Telemetry, alarm, event and attribute publication through the
//! pipeline.

mod common;

use std::sync::Arc;

use cirrus::{
    Agent, AgentFlags, ItemState, Plugin, Status, Value, ValueType,
};
use common::{test_env, Recorder, TestEnv};

fn agent_with_recorder() -> (TestEnv, Agent, Arc<Recorder>) {
    let env = test_env();
    let recorder = Recorder::new("recorder", 0);
    let agent = Agent::initialize_with_plugins(
        "test-app",
        None,
        AgentFlags::SINGLE_THREAD,
        vec![recorder.clone() as Arc<dyn Plugin>],
    )
    .unwrap();
    (env, agent, recorder)
}

#[test]
fn declared_type_mismatch_never_reaches_the_pipeline() {
    let (_env, agent, recorder) = agent_with_recorder();
    let telemetry = agent.telemetry_allocate("t", ValueType::Int32).unwrap();

    assert_eq!(
        telemetry.publish(Value::String("nope".into()), None, 0),
        Err(Status::BadRequest)
    );
    assert!(recorder.recorded().lock().unwrap().telemetry.is_empty());
    assert!(!recorder
        .event_names()
        .iter()
        .any(|(_, op, _)| op == "telemetry_publish"));

    telemetry.publish(Value::Int32(7), None, 0).unwrap();
    let recorded = recorder.recorded();
    let recorded = recorded.lock().unwrap();
    assert_eq!(recorded.telemetry.len(), 1);
    assert_eq!(recorded.telemetry[0].0, "t");
    assert_eq!(recorded.telemetry[0].1, Value::Int32(7));
}

#[test]
fn null_declared_type_accepts_anything() {
    let (_env, agent, recorder) = agent_with_recorder();
    let telemetry = agent.telemetry_allocate("any", ValueType::Null).unwrap();
    telemetry.publish(Value::String("text".into()), None, 0).unwrap();
    telemetry.publish(Value::Float64(2.5), None, 0).unwrap();
    assert_eq!(recorder.recorded().lock().unwrap().telemetry.len(), 2);
}

#[test]
fn pre_stamped_timestamp_is_consumed_by_one_publish() {
    let (_env, agent, recorder) = agent_with_recorder();
    let telemetry = agent.telemetry_allocate("stamped", ValueType::Int32).unwrap();

    telemetry.timestamp_set(1234).unwrap();
    telemetry.publish(Value::Int32(1), None, 0).unwrap();
    telemetry.publish(Value::Int32(2), None, 0).unwrap();

    let recorded = recorder.recorded();
    let recorded = recorded.lock().unwrap();
    assert_eq!(recorded.telemetry[0].2, Some(1234));
    assert_eq!(recorded.telemetry[1].2, None);
}

#[test]
fn failed_publish_retains_the_pre_stamp() {
    let (_env, agent, recorder) = agent_with_recorder();
    let telemetry = agent.telemetry_allocate("retry", ValueType::Int32).unwrap();

    telemetry.timestamp_set(99).unwrap();
    recorder.set_result(Status::ExecutionError);
    assert_eq!(
        telemetry.publish(Value::Int32(1), None, 0),
        Err(Status::ExecutionError)
    );
    recorder.set_result(Status::Success);
    telemetry.publish(Value::Int32(1), None, 0).unwrap();

    let recorded = recorder.recorded();
    let recorded = recorded.lock().unwrap();
    // the retry still carries the stamp the failed attempt could not use
    assert_eq!(recorded.telemetry.last().unwrap().2, Some(99));
}

#[test]
fn registration_failure_leaves_the_stream_pending() {
    let (_env, agent, recorder) = agent_with_recorder();
    let telemetry = agent.telemetry_allocate("pending", ValueType::Int32).unwrap();

    recorder.set_result(Status::TryAgain);
    assert_eq!(telemetry.register(0), Err(Status::TryAgain));
    assert_eq!(telemetry.state(), ItemState::RegisterPending);

    recorder.set_result(Status::Success);
    telemetry.register(0).unwrap();
    assert_eq!(telemetry.state(), ItemState::Registered);

    telemetry.deregister(0).unwrap();
    assert_eq!(telemetry.state(), ItemState::Deregistered);
    assert_eq!(telemetry.deregister(0), Err(Status::NotInitialized));
}

#[test]
fn duplicate_stream_names_are_rejected() {
    let (_env, agent, _recorder) = agent_with_recorder();
    agent.telemetry_allocate("cpu", ValueType::Float32).unwrap();
    assert_eq!(
        agent
            .telemetry_allocate("CPU", ValueType::Float32)
            .err(),
        Some(Status::Exists)
    );
}

#[test]
fn telemetry_options_round_trip() {
    let (_env, agent, _recorder) = agent_with_recorder();
    let telemetry = agent.telemetry_allocate("opted", ValueType::Null).unwrap();
    telemetry.option_set("interval", Value::UInt32(60)).unwrap();
    assert_eq!(
        telemetry.option_get("interval", false, ValueType::UInt32).unwrap(),
        Value::UInt32(60)
    );
}

#[test]
fn alarms_publish_severity_and_message() {
    let (_env, agent, recorder) = agent_with_recorder();
    let alarm = agent.alarm_register("overheat").unwrap();

    alarm.publish(3, Some("too hot"), None).unwrap();
    alarm.publish(1, None, None).unwrap();

    let recorded = recorder.recorded();
    {
        let recorded = recorded.lock().unwrap();
        assert_eq!(recorded.alarms.len(), 2);
        assert_eq!(recorded.alarms[0].0, "overheat");
        assert_eq!(recorded.alarms[0].1.severity, 3);
        assert_eq!(recorded.alarms[0].1.message.as_deref(), Some("too hot"));
        assert_eq!(recorded.alarms[1].1.severity, 1);
        assert_eq!(recorded.alarms[1].1.message, None);
    }

    alarm.deregister().unwrap();
}

#[test]
fn alarm_names_can_be_reused_after_deregister() {
    let (_env, agent, _recorder) = agent_with_recorder();
    agent.alarm_register("flood").unwrap().deregister().unwrap();
    // a second registration under the same name is fine afterwards
    let again = agent.alarm_register("flood").unwrap();
    again.publish(2, None, None).unwrap();

    assert_eq!(
        agent.alarm_register("flood").err(),
        Some(Status::Exists)
    );
}

#[test]
fn events_and_attributes_are_thin_producers() {
    let (_env, agent, recorder) = agent_with_recorder();
    agent.event_publish("device rebooted", None, 0).unwrap();
    agent
        .attribute_publish("fw_version", Value::String("2.1.0".into()), None, 0)
        .unwrap();
    assert_eq!(agent.event_publish("", None, 0), Err(Status::BadParameter));

    let recorded = recorder.recorded();
    let recorded = recorded.lock().unwrap();
    assert_eq!(recorded.events_published, vec!["device rebooted".to_string()]);
    assert_eq!(
        recorded.attributes,
        vec![("fw_version".to_string(), Value::String("2.1.0".into()))]
    );
}
