//! Alarms and events: thin producers over the plugin pipeline.
//!
//! An alarm is just a named handle; each publication carries the
//! severity, an optional message and per-publish options (location,
//! time_stamp, republish, max_time_out are the ones transports commonly
//! consume).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::agent::{Agent, AgentCore};
use crate::log::{agent_log, LogLevel};
use crate::options::OptionsMap;
use crate::plugins::Operation;
use crate::status::Status;
use crate::util::name_cmp;
use crate::{ALARM_MAX, NAME_MAX};

/// Payload of one alarm publication.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlarmPayload {
    pub severity: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

pub(crate) struct AlarmBody {
    name: String,
    active: AtomicBool,
}

impl AlarmBody {
    pub(crate) fn name(&self) -> &str {
        &self.name
    }
}

/// Handle to a registered alarm.
pub struct Alarm {
    core: Arc<AgentCore>,
    body: Arc<AlarmBody>,
}

impl Agent {
    /// Register a named alarm.  The registry stays sorted alphabetically
    /// (case-insensitive); duplicates are rejected.
    pub fn alarm_register(&self, name: &str) -> Result<Alarm, Status> {
        if name.is_empty() {
            return Err(Status::BadParameter);
        }
        if name.len() > NAME_MAX {
            return Err(Status::OutOfRange);
        }
        let core = self.core();
        let body = {
            let mut registry = core.alarms.lock().map_err(|_| Status::Failure)?;
            match registry.binary_search_by(|body| name_cmp(body.name(), name)) {
                Ok(_) => return Err(Status::Exists),
                Err(idx) => {
                    if registry.len() >= ALARM_MAX {
                        agent_log!(
                            core.log,
                            LogLevel::Error,
                            "no remaining space (max: {ALARM_MAX}) for alarm: {name}"
                        );
                        return Err(Status::Full);
                    }
                    let body = Arc::new(AlarmBody {
                        name: name.to_string(),
                        active: AtomicBool::new(true),
                    });
                    registry.insert(idx, body.clone());
                    body
                }
            }
        };
        core.plugins
            .perform(&Operation::AlarmRegister { name }, None, 0);
        Ok(Alarm {
            core: core.clone(),
            body,
        })
    }

    /// Publish a free-form device event message.
    pub fn event_publish(
        &self,
        message: &str,
        options: Option<&OptionsMap>,
        max_time_out_ms: u64,
    ) -> Result<(), Status> {
        if message.is_empty() {
            return Err(Status::BadParameter);
        }
        let result = self.core().plugins.perform(
            &Operation::EventPublish { message },
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

impl Alarm {
    pub fn name(&self) -> &str {
        self.body.name()
    }

    /// Publish the alarm at the given severity, optionally with a
    /// message.
    pub fn publish(
        &self,
        severity: u32,
        message: Option<&str>,
        options: Option<&OptionsMap>,
    ) -> Result<(), Status> {
        if !self.body.active.load(Ordering::Acquire) {
            return Err(Status::NotInitialized);
        }
        let payload = AlarmPayload {
            severity,
            message: message.map(str::to_string),
        };
        let result = self.core.plugins.perform(
            &Operation::AlarmPublish {
                name: self.body.name(),
                payload: &payload,
            },
            options,
            0,
        );
        if result == Status::Success {
            Ok(())
        } else {
            Err(result)
        }
    }

    /// Remove the alarm from the registry; the handle becomes inert.
    pub fn deregister(self) -> Result<(), Status> {
        let mut registry = self.core.alarms.lock().map_err(|_| Status::Failure)?;
        match registry
            .iter()
            .position(|body| Arc::ptr_eq(body, &self.body))
        {
            Some(idx) => {
                registry.remove(idx);
                self.body.active.store(false, Ordering::Release);
                drop(registry);
                self.core.plugins.perform(
                    &Operation::AlarmDeregister {
                        name: self.body.name(),
                    },
                    None,
                    0,
                );
                Ok(())
            }
            None => Err(Status::NotFound),
        }
    }
}
