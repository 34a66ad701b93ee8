#![allow(dead_code)]

//! Shared fixtures for the integration tests: an isolated on-disk
//! environment per test and a recording plugin that captures every
//! pipeline traversal.

use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use once_cell::sync::Lazy;
use tempfile::TempDir;

use cirrus::{
    AgentContext, AlarmPayload, Deadline, Operation, OptionsMap, Plugin, PluginInfo, Status, Step,
    Value, Version,
};

static ENV_MUTEX: Lazy<Mutex<()>> = Lazy::new(|| Mutex::new(()));

/// Holds the environment-variable lock for the duration of a test so the
/// directory overrides cannot race between tests in this binary.
pub struct TestEnv {
    _guard: MutexGuard<'static, ()>,
    _dir: TempDir,
    pub config_dir: PathBuf,
    pub runtime_dir: PathBuf,
}

/// Point `CIRRUS_CONFIG_DIR` / `CIRRUS_RUNTIME_DIR` at a fresh temp
/// directory.
pub fn test_env() -> TestEnv {
    let guard = ENV_MUTEX.lock().unwrap_or_else(|e| e.into_inner());
    let dir = TempDir::new().unwrap();
    let config_dir = dir.path().join("config");
    let runtime_dir = dir.path().join("runtime");
    std::fs::create_dir_all(&config_dir).unwrap();
    std::fs::create_dir_all(&runtime_dir).unwrap();
    std::env::set_var("CIRRUS_CONFIG_DIR", &config_dir);
    std::env::set_var("CIRRUS_RUNTIME_DIR", &runtime_dir);
    TestEnv {
        _guard: guard,
        _dir: dir,
        config_dir,
        runtime_dir,
    }
}

/// One `execute` invocation seen by the recorder.
#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    pub plugin: String,
    pub op: String,
    pub step: Step,
}

/// Snapshot of a completed action request.
#[derive(Debug, Clone)]
pub struct Completion {
    pub action: String,
    pub result: Option<Status>,
    pub error: Option<String>,
    pub parameters: Vec<(String, Option<Value>)>,
}

impl Completion {
    pub fn parameter(&self, name: &str) -> Option<&Value> {
        self.parameters
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .and_then(|(_, v)| v.as_ref())
    }
}

#[derive(Debug, Clone)]
pub struct FileOp {
    pub upload: bool,
    pub path: PathBuf,
    pub name: String,
    pub global: bool,
}

#[derive(Debug, Default)]
pub struct Recorded {
    pub events: Vec<Event>,
    pub completions: Vec<Completion>,
    pub telemetry: Vec<(String, Value, Option<u64>)>,
    pub alarms: Vec<(String, AlarmPayload)>,
    pub events_published: Vec<String>,
    pub attributes: Vec<(String, Value)>,
    pub files: Vec<FileOp>,
}

/// A plugin that records everything it sees and answers with a
/// configurable status.
pub struct Recorder {
    name: String,
    order: i32,
    result: Mutex<Status>,
    pub recorded: Arc<Mutex<Recorded>>,
}

impl Recorder {
    pub fn new(name: &str, order: i32) -> Arc<Self> {
        Arc::new(Recorder {
            name: name.to_string(),
            order,
            result: Mutex::new(Status::Success),
            recorded: Arc::new(Mutex::new(Recorded::default())),
        })
    }

    pub fn set_result(&self, status: Status) {
        *self.result.lock().unwrap() = status;
    }

    pub fn recorded(&self) -> Arc<Mutex<Recorded>> {
        self.recorded.clone()
    }

    /// Block until `predicate` holds over the recorded data, panicking
    /// after five seconds.
    pub fn wait_until<F>(&self, what: &str, predicate: F)
    where
        F: Fn(&Recorded) -> bool,
    {
        let deadline = Instant::now() + Duration::from_secs(5);
        loop {
            {
                let recorded = self.recorded.lock().unwrap();
                if predicate(&recorded) {
                    return;
                }
            }
            assert!(Instant::now() < deadline, "timed out waiting for {what}");
            std::thread::sleep(Duration::from_millis(10));
        }
    }

    pub fn completions(&self) -> Vec<Completion> {
        self.recorded.lock().unwrap().completions.clone()
    }

    pub fn event_names(&self) -> Vec<(String, String, Step)> {
        self.recorded
            .lock()
            .unwrap()
            .events
            .iter()
            .map(|e| (e.plugin.clone(), e.op.clone(), e.step))
            .collect()
    }
}

impl Plugin for Recorder {
    fn info(&self) -> PluginInfo {
        PluginInfo {
            name: self.name.clone(),
            order: self.order,
            version: Version::new(1, 0, 0, 0),
            min_version: None,
            max_version: None,
        }
    }

    fn execute(
        &self,
        _ctx: &AgentContext,
        op: &Operation<'_>,
        step: Step,
        _deadline: &Deadline,
        _options: Option<&OptionsMap>,
    ) -> Status {
        let mut recorded = self.recorded.lock().unwrap();
        recorded.events.push(Event {
            plugin: self.name.clone(),
            op: op.name().to_string(),
            step,
        });
        if step == Step::During {
            match op {
                Operation::ActionComplete { request } => {
                    recorded.completions.push(Completion {
                        action: request.name().to_string(),
                        result: request.result(),
                        error: request.error_message().map(str::to_string),
                        parameters: request
                            .parameters()
                            .map(|(name, value)| (name.to_string(), value.cloned()))
                            .collect(),
                    });
                }
                Operation::TelemetryPublish {
                    name,
                    value,
                    timestamp,
                } => {
                    recorded
                        .telemetry
                        .push((name.to_string(), (*value).clone(), *timestamp));
                }
                Operation::AlarmPublish { name, payload } => {
                    recorded.alarms.push((name.to_string(), (*payload).clone()));
                }
                Operation::EventPublish { message } => {
                    recorded.events_published.push(message.to_string());
                }
                Operation::AttributePublish { name, value } => {
                    recorded
                        .attributes
                        .push((name.to_string(), (*value).clone()));
                }
                Operation::FileUpload { transfer } => {
                    recorded.files.push(FileOp {
                        upload: true,
                        path: transfer.path.clone(),
                        name: transfer.name.clone(),
                        global: transfer.use_global_store,
                    });
                }
                Operation::FileDownload { transfer } => {
                    recorded.files.push(FileOp {
                        upload: false,
                        path: transfer.path.clone(),
                        name: transfer.name.clone(),
                        global: transfer.use_global_store,
                    });
                }
                _ => {}
            }
        }
        *self.result.lock().unwrap()
    }
}
