//! Plugin infrastructure.
//!
//! Every library operation (register, publish, connect, file transfer,
//! request completion) fans out through the ordered list of enabled
//! plugins, once per step: before, during, after.  A transport plugin
//! implements the wire protocol behind these callbacks; the core never
//! speaks to the network itself.  The aggregated result of a traversal is
//! the numerically highest status any plugin returned, so an error in any
//! phase surfaces to the caller.

pub mod loader;

use std::fmt;
use std::sync::{Arc, RwLock};

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};

use crate::alarm::AlarmPayload;
use crate::dispatch::ActionRequest;
use crate::file::FileTransfer;
use crate::options::OptionsMap;
use crate::status::Status;
use crate::util::Deadline;
use crate::value::{Value, ValueType};
use crate::PLUGIN_MAX;

/// Library/plugin version packed as four 8-bit fields
/// (major.minor.patch.tweak).  The packed representation keeps ordering
/// comparisons a single integer compare.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Version(u32);

impl Version {
    pub const fn new(major: u8, minor: u8, patch: u8, tweak: u8) -> Self {
        Version(
            ((major as u32) << 24) | ((minor as u32) << 16) | ((patch as u32) << 8) | tweak as u32,
        )
    }

    pub const fn major(&self) -> u8 {
        (self.0 >> 24) as u8
    }

    pub const fn minor(&self) -> u8 {
        (self.0 >> 16) as u8
    }

    pub const fn patch(&self) -> u8 {
        (self.0 >> 8) as u8
    }

    pub const fn tweak(&self) -> u8 {
        self.0 as u8
    }

    pub const fn packed(&self) -> u32 {
        self.0
    }

    pub const fn from_packed(raw: u32) -> Self {
        Version(raw)
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}.{}.{}.{}",
            self.major(),
            self.minor(),
            self.patch(),
            self.tweak()
        )
    }
}

/// The running library's version, taken from the crate version.
pub fn library_version() -> Version {
    static VERSION: Lazy<Version> = Lazy::new(|| {
        let mut parts = env!("CARGO_PKG_VERSION")
            .split('.')
            .map(|part| part.parse::<u8>().unwrap_or(0));
        Version::new(
            parts.next().unwrap_or(0),
            parts.next().unwrap_or(0),
            parts.next().unwrap_or(0),
            0,
        )
    });
    *VERSION
}

/// Identity and compatibility data reported by a plugin.
#[derive(Debug, Clone)]
pub struct PluginInfo {
    pub name: String,
    /// Position in the enabled list; lower runs earlier.
    pub order: i32,
    pub version: Version,
    /// Oldest supported library version; `None` means unbounded.
    pub min_version: Option<Version>,
    /// Newest supported library version; `None` means unbounded.
    pub max_version: Option<Version>,
}

/// Pipeline phase.  Every operation traverses the enabled plugins three
/// times, once per step, in this order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Step {
    Before,
    During,
    After,
}

pub(crate) const STEPS: [Step; 3] = [Step::Before, Step::During, Step::After];

/// A library operation being fanned out to the plugins, with borrowed
/// payload.  Transport plugins match on the variant and marshal the
/// payload onto the wire during the `During` step.
#[derive(Debug)]
pub enum Operation<'a> {
    ClientConnect,
    ClientDisconnect,
    /// Periodic main-loop tick.
    Iteration,
    ActionRegister {
        name: &'a str,
    },
    ActionDeregister {
        name: &'a str,
    },
    /// An action request finished (or failed validation); the request
    /// carries the result status and any diagnostic message.
    ActionComplete {
        request: &'a ActionRequest,
    },
    TelemetryRegister {
        name: &'a str,
        declared_type: ValueType,
    },
    TelemetryDeregister {
        name: &'a str,
    },
    TelemetryPublish {
        name: &'a str,
        value: &'a Value,
        timestamp: Option<u64>,
    },
    AlarmRegister {
        name: &'a str,
    },
    AlarmDeregister {
        name: &'a str,
    },
    AlarmPublish {
        name: &'a str,
        payload: &'a AlarmPayload,
    },
    EventPublish {
        message: &'a str,
    },
    AttributePublish {
        name: &'a str,
        value: &'a Value,
    },
    FileUpload {
        transfer: &'a FileTransfer,
    },
    FileDownload {
        transfer: &'a FileTransfer,
    },
}

impl Operation<'_> {
    /// Stable identifier used in diagnostics.
    pub fn name(&self) -> &'static str {
        match self {
            Operation::ClientConnect => "client_connect",
            Operation::ClientDisconnect => "client_disconnect",
            Operation::Iteration => "iteration",
            Operation::ActionRegister { .. } => "action_register",
            Operation::ActionDeregister { .. } => "action_deregister",
            Operation::ActionComplete { .. } => "action_complete",
            Operation::TelemetryRegister { .. } => "telemetry_register",
            Operation::TelemetryDeregister { .. } => "telemetry_deregister",
            Operation::TelemetryPublish { .. } => "telemetry_publish",
            Operation::AlarmRegister { .. } => "alarm_register",
            Operation::AlarmDeregister { .. } => "alarm_deregister",
            Operation::AlarmPublish { .. } => "alarm_publish",
            Operation::EventPublish { .. } => "event_publish",
            Operation::AttributePublish { .. } => "attribute_publish",
            Operation::FileUpload { .. } => "file_upload",
            Operation::FileDownload { .. } => "file_download",
        }
    }
}

/// Read-only view of the agent handed to plugin callbacks.
#[derive(Clone)]
pub struct AgentContext {
    pub(crate) app_id: String,
    pub(crate) device_id: String,
    pub(crate) config: Arc<RwLock<OptionsMap>>,
}

impl AgentContext {
    /// The application (client) id the agent was initialized with.
    pub fn id(&self) -> &str {
        &self.app_id
    }

    /// The device correlation id read from (or written to) the device-id
    /// file.
    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    /// Look up a configuration value by dotted key.
    pub fn config_get(&self, name: &str, convert: bool, ty: ValueType) -> Result<Value, Status> {
        let config = self.config.read().map_err(|_| Status::Failure)?;
        config.get(name, convert, ty)
    }
}

/// A transport (or other) adapter fielding library operations.
///
/// All callbacks take `&self`; plugins requiring mutable state use
/// interior mutability.  Only `execute` is mandatory.
pub trait Plugin: Send + Sync {
    fn info(&self) -> PluginInfo;

    fn initialize(&self, _ctx: &AgentContext) -> Status {
        Status::Success
    }

    fn terminate(&self, _ctx: &AgentContext) -> Status {
        Status::Success
    }

    fn enable(&self, _ctx: &AgentContext) -> Status {
        Status::Success
    }

    fn disable(&self, _ctx: &AgentContext, _force: bool) -> Status {
        Status::Success
    }

    /// Handle one step of one operation.  `deadline` is the shared budget
    /// for the whole traversal; long-running work should watch it.
    fn execute(
        &self,
        ctx: &AgentContext,
        op: &Operation<'_>,
        step: Step,
        deadline: &Deadline,
        options: Option<&OptionsMap>,
    ) -> Status;
}

struct LoadedPlugin {
    plugin: Arc<dyn Plugin>,
    name: String,
}

struct EnabledPlugin {
    plugin: Arc<dyn Plugin>,
    name: String,
    order: i32,
}

#[derive(Default)]
struct PluginSet {
    loaded: Vec<LoadedPlugin>,
    enabled: Vec<EnabledPlugin>,
}

/// Owner of the loaded/enabled plugin lists and the perform traversal.
pub(crate) struct PluginRegistry {
    ctx: AgentContext,
    set: RwLock<PluginSet>,
}

impl PluginRegistry {
    pub(crate) fn new(ctx: AgentContext) -> Self {
        PluginRegistry {
            ctx,
            set: RwLock::new(PluginSet::default()),
        }
    }

    /// Register a plugin with the library and run its initialize callback.
    /// The plugin still needs to be enabled before it sees operations.
    pub(crate) fn load(&self, plugin: Arc<dyn Plugin>) -> Result<(), Status> {
        let info = plugin.info();
        let version = library_version();
        if info.min_version.is_some_and(|min| min > version)
            || info.max_version.is_some_and(|max| max < version)
        {
            return Err(Status::NotSupported);
        }
        let mut set = self.set.write().map_err(|_| Status::Failure)?;
        if set.loaded.len() >= PLUGIN_MAX {
            return Err(Status::Full);
        }
        if set.loaded.iter().any(|entry| entry.name == info.name) {
            return Err(Status::Exists);
        }
        plugin.initialize(&self.ctx);
        set.loaded.push(LoadedPlugin {
            plugin,
            name: info.name,
        });
        Ok(())
    }

    /// Enable a loaded plugin, inserting it into the ordered enabled list.
    pub(crate) fn enable(&self, name: &str) -> Result<(), Status> {
        let mut set = self.set.write().map_err(|_| Status::Failure)?;
        if set.enabled.len() >= PLUGIN_MAX {
            return Err(Status::Full);
        }
        if set.enabled.iter().any(|entry| entry.name == name) {
            return Err(Status::Exists);
        }
        let entry = set
            .loaded
            .iter()
            .find(|entry| entry.name == name)
            .ok_or(Status::NotFound)?;
        let plugin = entry.plugin.clone();
        let order = plugin.info().order;

        let result = plugin.enable(&self.ctx);
        if result != Status::Success {
            return Err(result);
        }
        // stable on equal order: the newcomer goes after existing peers
        let idx = set.enabled.partition_point(|entry| entry.order <= order);
        set.enabled.insert(
            idx,
            EnabledPlugin {
                plugin,
                name: name.to_string(),
                order,
            },
        );
        Ok(())
    }

    /// Disable a plugin.  It is removed from the enabled list when its
    /// disable callback succeeds, or unconditionally when `force` is set.
    pub(crate) fn disable(&self, name: &str, force: bool) -> Result<(), Status> {
        let mut set = self.set.write().map_err(|_| Status::Failure)?;
        let idx = set
            .enabled
            .iter()
            .position(|entry| entry.name == name)
            .ok_or(Status::NotFound)?;
        let result = set.enabled[idx].plugin.disable(&self.ctx, force);
        if result == Status::Success || force {
            set.enabled.remove(idx);
        }
        if result == Status::Success {
            Ok(())
        } else {
            Err(result)
        }
    }

    /// Forcefully disable every enabled plugin.
    pub(crate) fn disable_all(&self) {
        if let Ok(mut set) = self.set.write() {
            while let Some(entry) = set.enabled.pop() {
                entry.plugin.disable(&self.ctx, true);
            }
        }
    }

    /// Run every loaded plugin's terminate callback, newest first.
    pub(crate) fn terminate_all(&self) {
        if let Ok(mut set) = self.set.write() {
            while let Some(entry) = set.loaded.pop() {
                entry.plugin.terminate(&self.ctx);
            }
        }
    }

    /// Disable (forced), terminate and drop a single plugin.
    pub(crate) fn unload(&self, name: &str) -> Result<(), Status> {
        let mut set = self.set.write().map_err(|_| Status::Failure)?;
        let idx = set
            .loaded
            .iter()
            .position(|entry| entry.name == name)
            .ok_or(Status::NotFound)?;
        if let Some(pos) = set.enabled.iter().position(|entry| entry.name == name) {
            let entry = set.enabled.remove(pos);
            entry.plugin.disable(&self.ctx, true);
        }
        let entry = set.loaded.remove(idx);
        entry.plugin.terminate(&self.ctx);
        Ok(())
    }

    pub(crate) fn enabled_count(&self) -> usize {
        self.set.read().map(|set| set.enabled.len()).unwrap_or(0)
    }

    /// Fan one operation out through the enabled plugins, three steps in
    /// order, aggregating the numerically highest status.  The deadline
    /// is the caller's budget plus any `max_time_out` option; a total of
    /// zero means no limit.  When the budget runs out the remaining
    /// steps are skipped.
    pub(crate) fn perform(
        &self,
        op: &Operation<'_>,
        options: Option<&OptionsMap>,
        max_time_out_ms: u64,
    ) -> Status {
        let extra = options
            .and_then(|opts| opts.get_u64("max_time_out", true).ok())
            .unwrap_or(0);
        let deadline = Deadline::new_ms(max_time_out_ms.saturating_add(extra));

        let set = match self.set.read() {
            Ok(set) => set,
            Err(_) => return Status::Failure,
        };
        let mut result = Status::Success;
        for step in STEPS {
            if deadline.exceeded() {
                break;
            }
            for entry in &set.enabled {
                let interim = entry
                    .plugin
                    .execute(&self.ctx, op, step, &deadline, options);
                if interim > result {
                    result = interim;
                }
            }
        }
        result
    }
}
