//! Core library for Cirrus, the device-side half of a cloud connectivity
//! agent.  This crate wires together the typed value system, the sorted
//! entity registries, the request dispatcher and the plugin pipeline.  It
//! deliberately speaks no wire protocol itself: transports are plugins
//! that field every library operation in three phases (before, during,
//! after) and carry the payloads to the cloud.
//!
//! A minimal embedding looks like:
//!
//! ```no_run
//! use cirrus::{Agent, AgentFlags, ParamDirection, Status, ValueType};
//!
//! let agent = Agent::initialize("my-app", None, AgentFlags::empty())?;
//! let action = agent.action_allocate("reboot")?;
//! action.parameter_add("delay", ParamDirection::IN, ValueType::UInt32)?;
//! let _ = action.register_callback(|_req| Status::Success, 0);
//! agent.connect(5000)?;
//! # Ok::<(), cirrus::Status>(())
//! ```

mod action;
mod agent;
mod alarm;
pub mod base64;
pub mod checksum;
mod config;
mod dispatch;
mod file;
mod location;
mod log;
mod options;
pub mod plugins;
mod status;
mod telemetry;
mod util;
mod value;

pub use action::{Action, ActionCallback, ActionFlags, ItemState, ParamDirection};
pub use agent::{Agent, AgentFlags};
pub use alarm::{Alarm, AlarmPayload};
pub use checksum::{file_checksum, ChecksumAlgorithm};
pub use dispatch::ActionRequest;
pub use file::{FileProgress, FileProgressCallback, FileStore, FileTransfer};
pub use location::{Location, LocationSource};
pub use log::{LogCallback, LogLevel, LogSource};
pub use options::OptionsMap;
pub use plugins::{
    library_version, AgentContext, Operation, Plugin, PluginInfo, Step, Version,
};
pub use status::Status;
pub use util::Deadline;
pub use value::{ConversionLevel, Value, ValueType};

/// Maximum length of an entity, option or parameter name.
pub const NAME_MAX: usize = 255;
/// Maximum length of a client/device identifier.
pub const ID_MAX: usize = 36;
/// Maximum entries in one options map.
pub const OPTION_MAX: usize = 64;
/// Maximum registered actions.
pub const ACTION_MAX: usize = 255;
/// Maximum parameters per action.
pub const PARAMETER_MAX: usize = 32;
/// Maximum registered telemetry streams.
pub const TELEMETRY_MAX: usize = 255;
/// Maximum registered alarms.
pub const ALARM_MAX: usize = 255;
/// Maximum loaded plugins.
pub const PLUGIN_MAX: usize = 8;
/// Maximum action requests waiting or in flight.
pub const ACTION_QUEUE_MAX: usize = 32;
/// Worker threads draining the request queue in threaded mode.
pub const WORKER_THREADS: usize = 4;
/// Maximum length of a rendered action command line.
pub const COMMAND_LINE_MAX: usize = 4096;
/// Bytes of stdout/stderr captured from an executed command.
pub const COMMAND_OUTPUT_MAX: usize = 1024;
/// Maximum length of a formatted log message.
pub const LOG_MSG_MAX: usize = 16 * 1024;
