//! The process-wide agent handle.
//!
//! An [`Agent`] owns every registry (actions, telemetry, alarms), the
//! configuration map, the plugin registry, the request queue and the
//! worker threads.  Entity handles returned by the allocation calls keep
//! the shared core alive, so they stay valid for the lifetime of the
//! library.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::thread::JoinHandle;
use std::time::Duration;

use bitflags::bitflags;

use crate::action::ActionBody;
use crate::alarm::AlarmBody;
use crate::config::{self, Directories};
use crate::dispatch::{self, RequestQueue};
use crate::log::{agent_log, LogCallback, LogFacility, LogLevel};
use crate::options::OptionsMap;
use crate::plugins::{
    loader, AgentContext, Operation, Plugin, PluginRegistry, Version,
};
use crate::status::Status;
use crate::telemetry::TelemetryBody;
use crate::value::{Value, ValueType};
use crate::WORKER_THREADS;

bitflags! {
    /// Library-wide behaviour flags given to [`Agent::initialize`].
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct AgentFlags: u8 {
        /// No worker pool: requests are processed cooperatively inside
        /// `loop_iteration` / `loop_forever`.
        const SINGLE_THREAD = 0x01;
    }
}

/// Shared state behind every handle the library gives out.
pub(crate) struct AgentCore {
    app_id: String,
    device_id: String,
    pub(crate) dirs: Directories,
    cfg_file_path: Mutex<Option<PathBuf>>,
    pub(crate) config: Arc<RwLock<OptionsMap>>,
    pub(crate) log: LogFacility,
    pub(crate) actions: Mutex<Vec<Arc<ActionBody>>>,
    pub(crate) telemetry: Mutex<Vec<Arc<TelemetryBody>>>,
    /// Serialises telemetry publishes across threads.
    pub(crate) telemetry_gate: Mutex<()>,
    pub(crate) alarms: Mutex<Vec<Arc<AlarmBody>>>,
    pub(crate) plugins: PluginRegistry,
    pub(crate) queue: RequestQueue,
    /// Exclusive actions take the write side; everything else reads.
    pub(crate) exclusive: RwLock<()>,
    to_quit: AtomicBool,
    pub(crate) flags: AgentFlags,
}

impl AgentCore {
    pub(crate) fn quitting(&self) -> bool {
        self.to_quit.load(Ordering::Acquire)
    }

    pub(crate) fn set_quit(&self, quit: bool) {
        self.to_quit.store(quit, Ordering::Release);
    }

    pub(crate) fn app_id(&self) -> &str {
        &self.app_id
    }

    pub(crate) fn configuration_file(&self) -> Option<PathBuf> {
        self.cfg_file_path.lock().ok().and_then(|path| path.clone())
    }
}

#[derive(Default)]
struct LoopThreads {
    main: Option<JoinHandle<()>>,
    workers: Vec<JoinHandle<()>>,
}

/// The library handle.
pub struct Agent {
    core: Arc<AgentCore>,
    threads: Mutex<LoopThreads>,
}

/// Pipeline iteration plus, in single-thread mode, cooperative request
/// processing.  Shared between the public method and the main thread.
fn iteration(core: &Arc<AgentCore>, max_time_out_ms: u64) -> Status {
    let result = core
        .plugins
        .perform(&Operation::Iteration, None, max_time_out_ms);
    if result == Status::Success && core.flags.contains(AgentFlags::SINGLE_THREAD) {
        // requests must be processed here since no workers exist
        dispatch::process_pending(core, max_time_out_ms);
    }
    result
}

impl Agent {
    /// Initialize the library for application `id`, reading (or creating)
    /// the device-id file under the runtime directory.  `cfg_path`
    /// overrides the app-specific configuration file read at connect.
    pub fn initialize(
        id: &str,
        cfg_path: Option<&Path>,
        flags: AgentFlags,
    ) -> Result<Agent, Status> {
        Self::initialize_with_plugins(id, cfg_path, flags, Vec::new())
    }

    /// [`Agent::initialize`] plus a set of built-in plugins, which are
    /// loaded, initialized and enabled before the handle is returned.
    pub fn initialize_with_plugins(
        id: &str,
        cfg_path: Option<&Path>,
        flags: AgentFlags,
        plugins: Vec<Arc<dyn Plugin>>,
    ) -> Result<Agent, Status> {
        if id.is_empty() {
            return Err(Status::BadParameter);
        }
        let dirs = Directories::resolve();
        let log = LogFacility::new();
        let device_id = config::load_or_create_device_id(&dirs.runtime_dir, &log)?;
        let config_map = Arc::new(RwLock::new(OptionsMap::new()));
        let ctx = AgentContext {
            app_id: id.to_string(),
            device_id: device_id.clone(),
            config: config_map.clone(),
        };
        let core = Arc::new(AgentCore {
            app_id: id.to_string(),
            device_id,
            dirs,
            cfg_file_path: Mutex::new(cfg_path.map(Path::to_path_buf)),
            config: config_map,
            log,
            actions: Mutex::new(Vec::new()),
            telemetry: Mutex::new(Vec::new()),
            telemetry_gate: Mutex::new(()),
            alarms: Mutex::new(Vec::new()),
            plugins: PluginRegistry::new(ctx),
            queue: RequestQueue::new(),
            exclusive: RwLock::new(()),
            to_quit: AtomicBool::new(false),
            flags,
        });
        for plugin in plugins {
            let name = plugin.info().name;
            if let Err(err) = core.plugins.load(plugin) {
                agent_log!(
                    core.log,
                    LogLevel::Error,
                    "failed to load built-in plugin {name}: {err}"
                );
                continue;
            }
            if let Err(err) = core.plugins.enable(&name) {
                agent_log!(
                    core.log,
                    LogLevel::Error,
                    "failed to enable built-in plugin {name}: {err}"
                );
            }
        }
        Ok(Agent {
            core,
            threads: Mutex::new(LoopThreads::default()),
        })
    }

    pub(crate) fn core(&self) -> &Arc<AgentCore> {
        &self.core
    }

    /// The application (client) id given at initialize.
    pub fn id(&self) -> &str {
        &self.core.app_id
    }

    /// The device correlation id from the device-id file.
    pub fn device_id(&self) -> &str {
        &self.core.device_id
    }

    pub fn log_callback_set(&self, callback: Option<Box<LogCallback>>) {
        self.core.log.set_callback(callback);
    }

    pub fn log_level_set(&self, level: LogLevel) {
        self.core.log.set_level(level);
    }

    /// Set the log level by its case-insensitive textual name.
    pub fn log_level_set_str(&self, name: &str) -> Result<(), Status> {
        self.core.log.set_level_str(name)
    }

    /// Store a configuration value in the agent's config map.
    pub fn config_set(&self, name: &str, value: Value) -> Result<(), Status> {
        let mut config = self.core.config.write().map_err(|_| Status::Failure)?;
        config.set(name, value)
    }

    /// Look up a configuration value by dotted key.
    pub fn config_get(&self, name: &str, convert: bool, ty: ValueType) -> Result<Value, Status> {
        let config = self.core.config.read().map_err(|_| Status::Failure)?;
        config.get(name, convert, ty)
    }

    /// Override the app-specific configuration file read at connect.
    pub fn configuration_file_set(&self, path: &Path) -> Result<(), Status> {
        if path.as_os_str().is_empty() {
            return Err(Status::BadParameter);
        }
        let mut cfg = self.core.cfg_file_path.lock().map_err(|_| Status::Failure)?;
        *cfg = Some(path.to_path_buf());
        Ok(())
    }

    /// Load the configuration files, apply the configured log level, run
    /// the CLIENT_CONNECT pipeline operation and, in threaded mode, start
    /// the processing loop.
    pub fn connect(&self, max_time_out_ms: u64) -> Result<(), Status> {
        let core = &self.core;
        if config::load_connect_configuration(core) != Status::Success {
            agent_log!(
                core.log,
                LogLevel::Error,
                "failed getting connect configuration"
            );
        }
        if let Ok(config) = core.config.read() {
            if let Ok(level) = config.get_string("log_level", false) {
                let _ = core.log.set_level_str(&level);
            }
        }

        let result = core
            .plugins
            .perform(&Operation::ClientConnect, None, max_time_out_ms);
        if result != Status::Success {
            agent_log!(core.log, LogLevel::Error, "failed to connect");
            return Err(Status::Failure);
        }
        agent_log!(core.log, LogLevel::Notice, "connected successfully");
        if !core.flags.contains(AgentFlags::SINGLE_THREAD) {
            if self.loop_start().is_err() {
                agent_log!(core.log, LogLevel::Error, "failed to start main loop");
            }
        }
        Ok(())
    }

    /// Stop the loop and run the CLIENT_DISCONNECT pipeline operation.
    pub fn disconnect(&self, max_time_out_ms: u64) -> Result<(), Status> {
        if !self.core.flags.contains(AgentFlags::SINGLE_THREAD) {
            let _ = self.loop_stop(false);
        }
        let result = self
            .core
            .plugins
            .perform(&Operation::ClientDisconnect, None, max_time_out_ms);
        if result == Status::Success {
            Ok(())
        } else {
            Err(result)
        }
    }

    /// One cooperative iteration: pipeline tick plus (single-thread mode)
    /// at most one queued request.
    pub fn loop_iteration(&self, max_time_out_ms: u64) -> Result<(), Status> {
        let result = iteration(&self.core, max_time_out_ms);
        if result == Status::Success {
            Ok(())
        } else {
            Err(result)
        }
    }

    /// Iterate until an iteration fails or `loop_stop` is called.
    pub fn loop_forever(&self) -> Result<(), Status> {
        let mut result = Status::Success;
        while result == Status::Success && !self.core.quitting() {
            result = iteration(&self.core, 1000);
        }
        if result == Status::Success {
            Ok(())
        } else {
            Err(result)
        }
    }

    /// Spawn the main thread and the worker pool.  `NotSupported` in
    /// single-thread mode; calling again while running is a no-op.
    pub fn loop_start(&self) -> Result<(), Status> {
        if self.core.flags.contains(AgentFlags::SINGLE_THREAD) {
            return Err(Status::NotSupported);
        }
        let mut threads = self.threads.lock().map_err(|_| Status::Failure)?;
        self.core.set_quit(false);
        if threads.main.is_some() {
            return Ok(());
        }
        let main_core = self.core.clone();
        threads.main = Some(std::thread::spawn(move || {
            while !main_core.quitting() {
                let _ = iteration(&main_core, 1000);
                // pace the tick when plugins return immediately
                std::thread::sleep(Duration::from_millis(50));
            }
        }));
        for _ in 0..WORKER_THREADS {
            let worker_core = self.core.clone();
            threads
                .workers
                .push(std::thread::spawn(move || dispatch::worker_main(worker_core)));
        }
        Ok(())
    }

    /// Signal the loop to stop.  With `force` unset the calling thread
    /// joins the main and worker threads; with `force` set the handles
    /// are abandoned and the threads exit at their next quit check.
    pub fn loop_stop(&self, force: bool) -> Result<(), Status> {
        self.core.set_quit(true);
        self.core.queue.wake_all();
        if self.core.flags.contains(AgentFlags::SINGLE_THREAD) {
            return Err(Status::NotSupported);
        }
        let mut threads = self.threads.lock().map_err(|_| Status::Failure)?;
        let main = threads.main.take();
        let workers = std::mem::take(&mut threads.workers);
        drop(threads);
        if !force {
            if let Some(handle) = main {
                let _ = handle.join();
            }
            for handle in workers {
                let _ = handle.join();
            }
        }
        Ok(())
    }

    /// Tear the library down: deregister every entity, disconnect if
    /// still connected, then disable and terminate all plugins.
    pub fn terminate(self, max_time_out_ms: u64) -> Result<(), Status> {
        let core = &self.core;

        let telemetry: Vec<_> = core
            .telemetry
            .lock()
            .map(|mut registry| registry.drain(..).collect())
            .unwrap_or_default();
        for body in telemetry {
            core.plugins.perform(
                &Operation::TelemetryDeregister { name: body.name() },
                None,
                max_time_out_ms,
            );
        }

        let actions: Vec<_> = core
            .actions
            .lock()
            .map(|mut registry| registry.drain(..).collect())
            .unwrap_or_default();
        for body in actions {
            core.plugins.perform(
                &Operation::ActionDeregister { name: body.name() },
                None,
                max_time_out_ms,
            );
        }

        let alarms: Vec<_> = core
            .alarms
            .lock()
            .map(|mut registry| registry.drain(..).collect())
            .unwrap_or_default();
        for body in alarms {
            core.plugins.perform(
                &Operation::AlarmDeregister { name: body.name() },
                None,
                max_time_out_ms,
            );
        }

        if !core.quitting() {
            let _ = self.disconnect(max_time_out_ms);
        }
        core.plugins.disable_all();
        core.plugins.terminate_all();
        Ok(())
    }

    /// Register a plugin instance (built-in style).  The plugin must
    /// still be enabled to receive operations.
    pub fn plugin_load(&self, plugin: Arc<dyn Plugin>) -> Result<(), Status> {
        self.core.plugins.load(plugin)
    }

    /// Load a plugin from a shared object and enable it.
    ///
    /// # Safety
    ///
    /// Runs code from the shared object; the caller must trust the file.
    /// See [`loader::load_external`].
    pub unsafe fn plugin_load_external(&self, path: &Path) -> Result<(), Status> {
        let plugin = loader::load_external(path)?;
        let name = plugin.info().name;
        self.core.plugins.load(Arc::new(plugin))?;
        self.core.plugins.enable(&name)
    }

    pub fn plugin_enable(&self, name: &str) -> Result<(), Status> {
        self.core.plugins.enable(name)
    }

    pub fn plugin_disable(&self, name: &str, force: bool) -> Result<(), Status> {
        self.core.plugins.disable(name, force)
    }

    pub fn plugin_unload(&self, name: &str) -> Result<(), Status> {
        self.core.plugins.unload(name)
    }

    /// Number of currently enabled plugins.
    pub fn plugin_enabled_count(&self) -> usize {
        self.core.plugins.enabled_count()
    }

    /// Current time as epoch milliseconds, the timestamp format used
    /// throughout the library.
    pub fn timestamp_now() -> u64 {
        chrono::Utc::now().timestamp_millis().max(0) as u64
    }

    /// The library version, packed major.minor.patch.tweak.
    pub fn version() -> Version {
        crate::plugins::library_version()
    }

    pub fn version_str() -> &'static str {
        env!("CARGO_PKG_VERSION")
    }
}

impl Drop for Agent {
    fn drop(&mut self) {
        self.core.set_quit(true);
        self.core.queue.wake_all();
        if let Ok(mut threads) = self.threads.lock() {
            if let Some(handle) = threads.main.take() {
                let _ = handle.join();
            }
            for handle in threads.workers.drain(..) {
                let _ = handle.join();
            }
        }
    }
}
