//! Cloud-invokable actions: definitions, parameter schema and the sorted
//! registry.
//!
//! An action is registered by the application with either a callback or a
//! shell command as its execution method; requests arriving from the
//! transport are matched against the registry by case-insensitive name
//! (requests carry names only, never object identity).

use std::sync::{Arc, Mutex};

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

use crate::agent::{Agent, AgentCore};
use crate::dispatch::ActionRequest;
use crate::log::agent_log;
use crate::log::LogLevel;
use crate::options::OptionsMap;
use crate::plugins::Operation;
use crate::status::Status;
use crate::util::name_cmp;
use crate::value::{Value, ValueType};
use crate::{ACTION_MAX, COMMAND_LINE_MAX, NAME_MAX, PARAMETER_MAX};

/// Characters that may not appear in parameter names; they would break
/// the `--name=value` shell marshalling.
pub(crate) const FORBIDDEN_NAME_CHARS: [char; 5] = ['=', '\\', ';', '&', '|'];

bitflags! {
    /// Behavioural flags of an action.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct ActionFlags: u8 {
        /// Fire-and-forget: command output is not captured.
        const NO_RETURN = 0x01;
        /// Serialised with every other action process-wide.
        const EXCLUSIVE_APP = 0x02;
        /// Device-wide exclusivity; implies application exclusivity.
        const EXCLUSIVE_DEVICE = 0x04 | 0x02;
        /// The transport may truncate the service name.
        const TRUNCATE_SERVICE = 0x08;
        /// Command execution is not subject to a time limit.
        const NO_TIME_LIMIT = 0x10;
    }
}

bitflags! {
    /// Direction of an action parameter.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct ParamDirection: u8 {
        const IN = 0x01;
        const OUT = 0x02;
        /// Input that must carry a value on every request; implies IN.
        const IN_REQUIRED = 0x04;
        /// Output the execution must fill in; implies OUT.
        const OUT_REQUIRED = 0x08;
    }
}

/// Registration state of an action, telemetry stream or alarm.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ItemState {
    #[default]
    Unregistered,
    RegisterPending,
    Registered,
    DeregisterPending,
    Deregistered,
}

/// Schema entry for one declared parameter.
#[derive(Debug, Clone)]
pub(crate) struct ParamDef {
    pub(crate) name: String,
    pub(crate) direction: ParamDirection,
    pub(crate) ty: ValueType,
}

/// Callback execution method.  The request is mutable so OUT parameters
/// can be filled in.
pub type ActionCallback = Arc<dyn Fn(&mut ActionRequest) -> Status + Send + Sync>;

/// How an action executes.  Setting one method clears the other.
#[derive(Default)]
pub(crate) enum ExecMethod {
    #[default]
    None,
    Callback(ActionCallback),
    Command(String),
}

impl Clone for ExecMethod {
    fn clone(&self) -> Self {
        match self {
            ExecMethod::None => ExecMethod::None,
            ExecMethod::Callback(cb) => ExecMethod::Callback(cb.clone()),
            ExecMethod::Command(cmd) => ExecMethod::Command(cmd.clone()),
        }
    }
}

#[derive(Default)]
pub(crate) struct ActionState {
    pub(crate) flags: ActionFlags,
    pub(crate) time_limit_ms: u64,
    pub(crate) exec: ExecMethod,
    pub(crate) options: OptionsMap,
    pub(crate) parameters: Vec<ParamDef>,
    pub(crate) item_state: ItemState,
}

pub(crate) struct ActionBody {
    name: String,
    pub(crate) state: Mutex<ActionState>,
}

/// Immutable view of an action taken by a worker before execution, so the
/// registry lock is not held while the action runs.
pub(crate) struct ActionSnapshot {
    pub(crate) name: String,
    pub(crate) flags: ActionFlags,
    pub(crate) time_limit_ms: u64,
    pub(crate) exec: ExecMethod,
    pub(crate) parameters: Vec<ParamDef>,
}

impl ActionBody {
    pub(crate) fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn snapshot(&self) -> ActionSnapshot {
        let state = match self.state.lock() {
            Ok(state) => state,
            Err(poisoned) => poisoned.into_inner(),
        };
        ActionSnapshot {
            name: self.name.clone(),
            flags: state.flags,
            time_limit_ms: state.time_limit_ms,
            exec: state.exec.clone(),
            parameters: state.parameters.clone(),
        }
    }
}

/// Handle to a registered (or not yet registered) action.
pub struct Action {
    core: Arc<AgentCore>,
    body: Arc<ActionBody>,
}

impl Agent {
    /// Create an action definition in the registry.  The registry stays
    /// sorted alphabetically (case-insensitive); duplicate names are
    /// rejected.
    pub fn action_allocate(&self, name: &str) -> Result<Action, Status> {
        if name.is_empty() {
            return Err(Status::BadParameter);
        }
        if name.len() > NAME_MAX {
            return Err(Status::OutOfRange);
        }
        let core = self.core();
        let mut actions = core.actions.lock().map_err(|_| Status::Failure)?;
        match actions.binary_search_by(|body| name_cmp(body.name(), name)) {
            Ok(_) => Err(Status::Exists),
            Err(idx) => {
                if actions.len() >= ACTION_MAX {
                    agent_log!(
                        core.log,
                        LogLevel::Error,
                        "no remaining space (max: {ACTION_MAX}) for action: {name}"
                    );
                    return Err(Status::Full);
                }
                let body = Arc::new(ActionBody {
                    name: name.to_string(),
                    state: Mutex::new(ActionState::default()),
                });
                actions.insert(idx, body.clone());
                Ok(Action {
                    core: core.clone(),
                    body,
                })
            }
        }
    }
}

impl Action {
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

    /// Declare a parameter.  Names may not contain `= \ ; & |` and must
    /// be unique within the action (case-insensitive).  A required
    /// direction implies the corresponding plain direction.
    pub fn parameter_add(
        &self,
        name: &str,
        direction: ParamDirection,
        ty: ValueType,
    ) -> Result<(), Status> {
        if name.is_empty() {
            return Err(Status::BadParameter);
        }
        if name.contains(&FORBIDDEN_NAME_CHARS[..]) {
            agent_log!(
                self.core.log,
                LogLevel::Error,
                "invalid character in parameter name: {name}"
            );
            return Err(Status::BadRequest);
        }
        if name.len() > NAME_MAX {
            return Err(Status::OutOfRange);
        }
        let mut state = self.body.state.lock().map_err(|_| Status::Failure)?;
        if state.parameters.len() >= PARAMETER_MAX {
            agent_log!(
                self.core.log,
                LogLevel::Error,
                "maximum parameters reached: {PARAMETER_MAX}"
            );
            return Err(Status::Full);
        }
        if state
            .parameters
            .iter()
            .any(|p| name_cmp(&p.name, name) == std::cmp::Ordering::Equal)
        {
            agent_log!(
                self.core.log,
                LogLevel::Error,
                "parameter already exists: {name}"
            );
            return Err(Status::BadRequest);
        }
        let mut direction = direction;
        if direction.contains(ParamDirection::IN_REQUIRED) {
            direction |= ParamDirection::IN;
        }
        if direction.contains(ParamDirection::OUT_REQUIRED) {
            direction |= ParamDirection::OUT;
        }
        state.parameters.push(ParamDef {
            name: name.to_string(),
            direction,
            ty,
        });
        Ok(())
    }

    pub fn flags_set(&self, flags: ActionFlags) -> Result<(), Status> {
        let mut state = self.body.state.lock().map_err(|_| Status::Failure)?;
        state.flags = flags;
        Ok(())
    }

    /// Maximum execution time for the command method.  Zero disables the
    /// limit (equivalent to setting [`ActionFlags::NO_TIME_LIMIT`]).
    pub fn time_limit_set(&self, duration_ms: u64) -> Result<(), Status> {
        let mut state = self.body.state.lock().map_err(|_| Status::Failure)?;
        if duration_ms == 0 {
            state.flags |= ActionFlags::NO_TIME_LIMIT;
        } else {
            state.flags -= ActionFlags::NO_TIME_LIMIT;
        }
        state.time_limit_ms = duration_ms;
        Ok(())
    }

    pub fn option_set(&self, name: &str, value: Value) -> Result<(), Status> {
        let mut state = self.body.state.lock().map_err(|_| Status::Failure)?;
        state.options.set(name, value)
    }

    pub fn option_get(&self, name: &str, convert: bool, ty: ValueType) -> Result<Value, Status> {
        let state = self.body.state.lock().map_err(|_| Status::Failure)?;
        state.options.get(name, convert, ty)
    }

    /// Install a callback as the execution method (clearing any command)
    /// and register the action with the transport.
    pub fn register_callback<F>(&self, callback: F, max_time_out_ms: u64) -> Result<(), Status>
    where
        F: Fn(&mut ActionRequest) -> Status + Send + Sync + 'static,
    {
        {
            let mut state = self.body.state.lock().map_err(|_| Status::Failure)?;
            state.exec = ExecMethod::Callback(Arc::new(callback));
        }
        self.register(max_time_out_ms)
    }

    /// Install a shell command template as the execution method (clearing
    /// any callback) and register the action with the transport.
    pub fn register_command(&self, command: &str, max_time_out_ms: u64) -> Result<(), Status> {
        if command.is_empty() {
            return Err(Status::BadParameter);
        }
        if command.len() > COMMAND_LINE_MAX {
            return Err(Status::OutOfRange);
        }
        {
            let mut state = self.body.state.lock().map_err(|_| Status::Failure)?;
            state.exec = ExecMethod::Command(command.to_string());
        }
        self.register(max_time_out_ms)
    }

    fn register(&self, max_time_out_ms: u64) -> Result<(), Status> {
        agent_log!(
            self.core.log,
            LogLevel::Trace,
            "registering action {}",
            self.body.name()
        );
        let result = self.core.plugins.perform(
            &Operation::ActionRegister {
                name: self.body.name(),
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

    /// Withdraw the action from the transport.  On pipeline failure the
    /// state moves to `DeregisterPending` so it can be retried.
    pub fn deregister(&self, max_time_out_ms: u64) -> Result<(), Status> {
        {
            let state = self.body.state.lock().map_err(|_| Status::Failure)?;
            if state.item_state == ItemState::Deregistered {
                return Err(Status::NotInitialized);
            }
        }
        let result = self.core.plugins.perform(
            &Operation::ActionDeregister {
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

    /// Deregister and remove the action from the registry.  Requests
    /// already queued under this name will complete with `NotFound`.
    pub fn free(self, max_time_out_ms: u64) -> Result<(), Status> {
        let _ = self.deregister(max_time_out_ms);
        let mut actions = self.core.actions.lock().map_err(|_| Status::Failure)?;
        match actions
            .iter()
            .position(|body| Arc::ptr_eq(body, &self.body))
        {
            Some(idx) => {
                actions.remove(idx);
                Ok(())
            }
            None => Err(Status::NotFound),
        }
    }
}
