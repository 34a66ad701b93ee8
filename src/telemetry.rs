//! Telemetry streams: named, typed samples published to the cloud.

use std::sync::{Arc, Mutex};

use crate::action::ItemState;
use crate::agent::{Agent, AgentCore};
use crate::log::{agent_log, LogLevel};
use crate::options::OptionsMap;
use crate::plugins::Operation;
use crate::status::Status;
use crate::util::name_cmp;
use crate::value::{Value, ValueType};
use crate::{NAME_MAX, TELEMETRY_MAX};

pub(crate) struct TelemetryState {
    pub(crate) declared: ValueType,
    pub(crate) options: OptionsMap,
    pub(crate) item_state: ItemState,
    /// One-shot pre-stamp, consumed by the next publish.
    pub(crate) timestamp: Option<u64>,
}

pub(crate) struct TelemetryBody {
    name: String,
    pub(crate) state: Mutex<TelemetryState>,
}

impl TelemetryBody {
    pub(crate) fn name(&self) -> &str {
        &self.name
    }
}

/// Handle to a telemetry stream.
pub struct Telemetry {
    core: Arc<AgentCore>,
    body: Arc<TelemetryBody>,
}

impl Agent {
    /// Create a telemetry stream.  `declared_type` constrains the type of
    /// published values; `Null` accepts any type.  The registry stays
    /// sorted alphabetically (case-insensitive).
    pub fn telemetry_allocate(
        &self,
        name: &str,
        declared_type: ValueType,
    ) -> Result<Telemetry, Status> {
        if name.is_empty() {
            return Err(Status::BadParameter);
        }
        if name.len() > NAME_MAX {
            return Err(Status::OutOfRange);
        }
        let core = self.core();
        let mut registry = core.telemetry.lock().map_err(|_| Status::Failure)?;
        match registry.binary_search_by(|body| name_cmp(body.name(), name)) {
            Ok(_) => Err(Status::Exists),
            Err(idx) => {
                if registry.len() >= TELEMETRY_MAX {
                    agent_log!(
                        core.log,
                        LogLevel::Error,
                        "no remaining space (max: {TELEMETRY_MAX}) for telemetry: {name}"
                    );
                    return Err(Status::Full);
                }
                let body = Arc::new(TelemetryBody {
                    name: name.to_string(),
                    state: Mutex::new(TelemetryState {
                        declared: declared_type,
                        options: OptionsMap::new(),
                        item_state: ItemState::Unregistered,
                        timestamp: None,
                    }),
                });
                registry.insert(idx, body.clone());
                Ok(Telemetry {
                    core: core.clone(),
                    body,
                })
            }
        }
    }

    /// Publish a named device attribute (a persistent key/value on the
    /// cloud side, as opposed to a stream of samples).
    pub fn attribute_publish(
        &self,
        name: &str,
        value: Value,
        options: Option<&OptionsMap>,
        max_time_out_ms: u64,
    ) -> Result<(), Status> {
        if name.is_empty() {
            return Err(Status::BadParameter);
        }
        let result = self.core().plugins.perform(
            &Operation::AttributePublish {
                name,
                value: &value,
            },
            options,
            max_time_out_ms,
        );
        if result == Status::Success {
            Ok(())
        } else {
            Err(result)
        }
    }
}

impl Telemetry {
    pub fn name(&self) -> &str {
        self.body.name()
    }

    pub fn state(&self) -> ItemState {
        self.body
            .state
            .lock()
            .map(|state| state.item_state)
            .unwrap_or_default()
    }

    pub fn option_set(&self, name: &str, value: Value) -> Result<(), Status> {
        let mut state = self.body.state.lock().map_err(|_| Status::Failure)?;
        state.options.set(name, value)
    }

    pub fn option_get(&self, name: &str, convert: bool, ty: ValueType) -> Result<Value, Status> {
        let state = self.body.state.lock().map_err(|_| Status::Failure)?;
        state.options.get(name, convert, ty)
    }

    /// Pre-stamp the next sample with an explicit epoch-millisecond
    /// timestamp.  One-shot: consumed by the next successful publish.
    pub fn timestamp_set(&self, timestamp_ms: u64) -> Result<(), Status> {
        let mut state = self.body.state.lock().map_err(|_| Status::Failure)?;
        state.timestamp = Some(timestamp_ms);
        Ok(())
    }

    /// Announce the stream to the transport.
    pub fn register(&self, max_time_out_ms: u64) -> Result<(), Status> {
        let declared = {
            let state = self.body.state.lock().map_err(|_| Status::Failure)?;
            state.declared
        };
        let result = self.core.plugins.perform(
            &Operation::TelemetryRegister {
                name: self.body.name(),
                declared_type: declared,
            },
            None,
            max_time_out_ms,
        );
        let mut state = self.body.state.lock().map_err(|_| Status::Failure)?;
        if result == Status::Success {
            state.item_state = ItemState::Registered;
            Ok(())
        } else {
            state.item_state = ItemState::RegisterPending;
            Err(result)
        }
    }

    /// Publish one sample.  A non-`Null` declared type must match the
    /// value's type exactly; mismatches are rejected before the pipeline
    /// is invoked.
    pub fn publish(
        &self,
        value: Value,
        options: Option<&OptionsMap>,
        max_time_out_ms: u64,
    ) -> Result<(), Status> {
        let timestamp = {
            let state = self.body.state.lock().map_err(|_| Status::Failure)?;
            if state.declared != ValueType::Null && state.declared != value.value_type() {
                return Err(Status::BadRequest);
            }
            state.timestamp
        };

        // publishes serialise so plugins see samples one at a time
        let _gate = self.core.telemetry_gate.lock().map_err(|_| Status::Failure)?;
        let result = self.core.plugins.perform(
            &Operation::TelemetryPublish {
                name: self.body.name(),
                value: &value,
                timestamp,
            },
            options,
            max_time_out_ms,
        );
        if result == Status::Success {
            if let Ok(mut state) = self.body.state.lock() {
                state.timestamp = None;
            }
            Ok(())
        } else {
            Err(result)
        }
    }

    /// Withdraw the stream from the transport.
    pub fn deregister(&self, max_time_out_ms: u64) -> Result<(), Status> {
        {
            let state = self.body.state.lock().map_err(|_| Status::Failure)?;
            if state.item_state == ItemState::Deregistered {
                return Err(Status::NotInitialized);
            }
        }
        let result = self.core.plugins.perform(
            &Operation::TelemetryDeregister {
                name: self.body.name(),
            },
            None,
            max_time_out_ms,
        );
        let mut state = self.body.state.lock().map_err(|_| Status::Failure)?;
        if result == Status::Success {
            state.item_state = ItemState::Deregistered;
            Ok(())
        } else {
            state.item_state = ItemState::DeregisterPending;
            Err(result)
        }
    }

    /// Deregister and remove the stream from the registry.
    pub fn free(self, max_time_out_ms: u64) -> Result<(), Status> {
        let _ = self.deregister(max_time_out_ms);
        let mut registry = self.core.telemetry.lock().map_err(|_| Status::Failure)?;
        match registry
            .iter()
            .position(|body| Arc::ptr_eq(body, &self.body))
        {
            Some(idx) => {
                registry.remove(idx);
                Ok(())
            }
            None => Err(Status::NotFound),
        }
    }
}
