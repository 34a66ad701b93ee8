//! External plugin loading.
//!
//! A plugin shipped as a shared object exports two well-known symbols:
//!
//! - `cirrus_plugin_info: fn() -> PluginInfo` — queried before the plugin
//!   is accepted, so an incompatible library version can be rejected
//!   without constructing the plugin.
//! - `cirrus_plugin_load: fn() -> Box<dyn Plugin>` — constructs the
//!   plugin instance.
//!
//! The loaded library must outlive every call into the plugin, so the
//! wrapper keeps the `libloading::Library` alive alongside the boxed
//! instance and drops it last.

use std::path::Path;

use libloading::{Library, Symbol};

use super::{library_version, AgentContext, Operation, Plugin, PluginInfo, Step};
use crate::options::OptionsMap;
use crate::status::Status;
use crate::util::Deadline;

pub(crate) const INFO_SYMBOL: &[u8] = b"cirrus_plugin_info";
pub(crate) const LOAD_SYMBOL: &[u8] = b"cirrus_plugin_load";

type InfoFn = unsafe fn() -> PluginInfo;
type LoadFn = unsafe fn() -> Box<dyn Plugin>;

/// A plugin backed by a shared object.  Field order matters: the plugin
/// instance must drop before the library that contains its code.
pub struct ExternalPlugin {
    inner: Box<dyn Plugin>,
    _library: Library,
}

impl Plugin for ExternalPlugin {
    fn info(&self) -> PluginInfo {
        self.inner.info()
    }

    fn initialize(&self, ctx: &AgentContext) -> Status {
        self.inner.initialize(ctx)
    }

    fn terminate(&self, ctx: &AgentContext) -> Status {
        self.inner.terminate(ctx)
    }

    fn enable(&self, ctx: &AgentContext) -> Status {
        self.inner.enable(ctx)
    }

    fn disable(&self, ctx: &AgentContext, force: bool) -> Status {
        self.inner.disable(ctx, force)
    }

    fn execute(
        &self,
        ctx: &AgentContext,
        op: &Operation<'_>,
        step: Step,
        deadline: &Deadline,
        options: Option<&OptionsMap>,
    ) -> Status {
        self.inner.execute(ctx, op, step, deadline, options)
    }
}

/// Open a shared object and wrap the plugin it exports.
///
/// # Safety
///
/// Loading and running code from an arbitrary shared object is inherently
/// unsafe; the caller must trust the file.  The exported functions must
/// match the `InfoFn`/`LoadFn` signatures and be built against the same
/// plugin ABI as this crate.
pub unsafe fn load_external(path: &Path) -> Result<ExternalPlugin, Status> {
    let library = Library::new(path).map_err(|_| Status::NotExecutable)?;
    let info = {
        let info_fn: Symbol<InfoFn> = library.get(INFO_SYMBOL).map_err(|_| Status::NotExecutable)?;
        info_fn()
    };
    let version = library_version();
    if info.min_version.is_some_and(|min| min > version)
        || info.max_version.is_some_and(|max| max < version)
    {
        return Err(Status::NotSupported);
    }
    let inner = {
        let load_fn: Symbol<LoadFn> = library.get(LOAD_SYMBOL).map_err(|_| Status::NotExecutable)?;
        load_fn()
    };
    Ok(ExternalPlugin {
        inner,
        _library: library,
    })
}
