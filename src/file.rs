//! File transfer scaffold: archive-then-upload and download staging.
//!
//! The core prepares the local side of a transfer (archiving directories,
//! resolving default paths and names, creating the download directory)
//! and hands a [`FileTransfer`] payload to the plugin pipeline; the
//! transport performs the actual movement of bytes and reports progress
//! through the caller's callback.

use std::fmt;
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::UNIX_EPOCH;

use bitflags::bitflags;
use uuid::Uuid;

use crate::agent::{Agent, AgentCore};
use crate::log::{agent_log, LogLevel};
use crate::options::OptionsMap;
use crate::plugins::Operation;
use crate::status::Status;

const UPLOAD_SUBDIR: &str = "upload";
const DOWNLOAD_SUBDIR: &str = "download";

bitflags! {
    /// Cloud-side storage selector.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct FileStore: u8 {
        /// Use the account-global file store instead of the device scope.
        const GLOBAL = 0x01;
    }
}

/// Progress report delivered to the transfer callback.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FileProgress {
    pub status: Status,
    /// 0.0 ..= 100.0
    pub percentage: f32,
    pub completed: bool,
}

/// Callback invoked by the transport as the transfer advances.
pub type FileProgressCallback = dyn Fn(&FileProgress) + Send + Sync;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TransferKind {
    Upload,
    Download,
}

/// Payload handed to the plugin pipeline for FILE_PUT / FILE_GET.
pub struct FileTransfer {
    /// Local path; for directory uploads, the substituted archive path.
    pub path: PathBuf,
    /// Cloud-side file name.
    pub name: String,
    pub use_global_store: bool,
    pub callback: Option<Arc<FileProgressCallback>>,
}

impl fmt::Debug for FileTransfer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FileTransfer")
            .field("path", &self.path)
            .field("name", &self.name)
            .field("use_global_store", &self.use_global_store)
            .field("callback", &self.callback.is_some())
            .finish()
    }
}

impl Agent {
    /// Upload a file or directory.  Directories are archived (top-level
    /// regular files only) and the archive is uploaded in their place.
    /// `name` defaults to the basename, or for a directory the path with
    /// separators replaced by dashes plus a `.tar` suffix.
    pub fn file_upload(
        &self,
        name: Option<&str>,
        path: &Path,
        callback: Option<Arc<FileProgressCallback>>,
        store: FileStore,
        options: Option<&OptionsMap>,
        max_time_out_ms: u64,
    ) -> Result<(), Status> {
        transfer(
            self.core(),
            TransferKind::Upload,
            name,
            path,
            callback,
            store,
            options,
            max_time_out_ms,
        )
    }

    /// Download a file from the cloud into `path` (relative paths resolve
    /// under the runtime download directory).  The destination directory
    /// is created when absent.
    pub fn file_download(
        &self,
        name: Option<&str>,
        path: &Path,
        callback: Option<Arc<FileProgressCallback>>,
        store: FileStore,
        options: Option<&OptionsMap>,
        max_time_out_ms: u64,
    ) -> Result<(), Status> {
        transfer(
            self.core(),
            TransferKind::Download,
            name,
            path,
            callback,
            store,
            options,
            max_time_out_ms,
        )
    }
}

/// Default cloud name for a directory upload: the path with separators
/// replaced by dashes, plus `.tar`.
fn directory_default_name(path: &Path) -> String {
    let mut name: String = path
        .to_string_lossy()
        .trim_matches('/')
        .replace('/', "-");
    name.push_str(".tar");
    name
}

#[allow(clippy::too_many_arguments)]
fn transfer(
    core: &Arc<AgentCore>,
    kind: TransferKind,
    name: Option<&str>,
    path: &Path,
    callback: Option<Arc<FileProgressCallback>>,
    store: FileStore,
    options: Option<&OptionsMap>,
    max_time_out_ms: u64,
) -> Result<(), Status> {
    if path.as_os_str().is_empty() {
        return Err(Status::BadParameter);
    }

    // relative paths resolve under the runtime upload/download area
    let mut local_path = if path.is_absolute() {
        path.to_path_buf()
    } else {
        let subdir = match kind {
            TransferKind::Upload => UPLOAD_SUBDIR,
            TransferKind::Download => DOWNLOAD_SUBDIR,
        };
        core.dirs.runtime_dir.join(subdir).join(path)
    };

    let cloud_name = match name {
        Some(name) if !name.is_empty() => name.to_string(),
        _ => {
            if local_path.is_dir() {
                directory_default_name(&local_path)
            } else {
                local_path
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .ok_or(Status::BadParameter)?
            }
        }
    };

    match kind {
        TransferKind::Upload => {
            if local_path.is_dir() {
                local_path = archive_directory(core, &local_path)?;
            } else if !local_path.is_file() {
                agent_log!(
                    core.log,
                    LogLevel::Error,
                    "upload source does not exist: {}",
                    local_path.display()
                );
                return Err(Status::FileOpenFailed);
            }
        }
        TransferKind::Download => {
            if let Some(parent) = local_path.parent() {
                if !parent.as_os_str().is_empty() && !parent.exists() {
                    agent_log!(
                        core.log,
                        LogLevel::Info,
                        "creating directory {}",
                        parent.display()
                    );
                    if fs::create_dir_all(parent).is_err() {
                        agent_log!(
                            core.log,
                            LogLevel::Error,
                            "failed to create directory {}",
                            parent.display()
                        );
                        return Err(Status::Failure);
                    }
                }
            }
        }
    }

    let payload = FileTransfer {
        path: local_path,
        name: cloud_name,
        use_global_store: store.contains(FileStore::GLOBAL),
        callback,
    };
    let op = match kind {
        TransferKind::Upload => Operation::FileUpload { transfer: &payload },
        TransferKind::Download => Operation::FileDownload { transfer: &payload },
    };
    let result = core.plugins.perform(&op, options, max_time_out_ms);
    if result == Status::Success {
        Ok(())
    } else {
        Err(result)
    }
}

/// Bundle the top-level regular files of `dir` into an uncompressed tar
/// archive under the runtime directory and return the archive path.  No
/// recursion; entries are recorded with mode 0644 and the source mtime.
fn archive_directory(core: &Arc<AgentCore>, dir: &Path) -> Result<PathBuf, Status> {
    let archive_path = core
        .dirs
        .runtime_dir
        .join(format!("file-{}.tar", Uuid::new_v4()));
    let archive_file = File::create(&archive_path).map_err(|_| Status::FileOpenFailed)?;
    let mut builder = tar::Builder::new(archive_file);

    let entries = fs::read_dir(dir).map_err(|_| Status::IoError)?;
    let mut archived = false;
    for entry in entries.flatten() {
        let file_type = match entry.file_type() {
            Ok(ft) => ft,
            Err(_) => continue,
        };
        if !file_type.is_file() {
            continue;
        }
        let meta = entry.metadata().map_err(|_| Status::IoError)?;
        let mtime = meta
            .modified()
            .ok()
            .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
            .map(|d| d.as_secs())
            .unwrap_or(0);

        let mut header = tar::Header::new_gnu();
        header.set_size(meta.len());
        header.set_entry_type(tar::EntryType::Regular);
        header.set_mode(0o644);
        header.set_mtime(mtime);

        let source = File::open(entry.path()).map_err(|_| Status::FileOpenFailed)?;
        builder
            .append_data(&mut header, entry.file_name(), source)
            .map_err(|_| Status::IoError)?;
        archived = true;
    }
    builder.finish().map_err(|_| Status::IoError)?;
    if !archived {
        let _ = fs::remove_file(&archive_path);
        return Err(Status::NotFound);
    }
    agent_log!(
        core.log,
        LogLevel::Debug,
        "archived {} into {}",
        dir.display(),
        archive_path.display()
    );
    Ok(archive_path)
}
