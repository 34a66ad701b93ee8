//! Configuration loading and device identity.
//!
//! At connect time two JSON files are read: the shared
//! `cirrus-connect.cfg` under the configuration directory, then either an
//! explicitly set file or `{id}.cfg`.  Scalar leaves flatten into dotted
//! keys in the agent's configuration map; a file that fails to parse is
//! logged and startup continues.  Directories are overridable through
//! `CIRRUS_CONFIG_DIR` / `CIRRUS_RUNTIME_DIR`.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Context;
use serde_json::Value as JsonValue;
use uuid::Uuid;

use crate::agent::AgentCore;
use crate::log::{agent_log, LogFacility, LogLevel};
use crate::options::OptionsMap;
use crate::status::Status;
use crate::value::Value;
use crate::ID_MAX;

pub(crate) const CONNECT_CONFIG_FILE: &str = "cirrus-connect.cfg";
pub(crate) const CONFIG_FILE_EXT: &str = "cfg";
pub(crate) const DEVICE_ID_FILE: &str = "cirrus-device-id";
pub(crate) const CONFIG_DIR_ENV: &str = "CIRRUS_CONFIG_DIR";
pub(crate) const RUNTIME_DIR_ENV: &str = "CIRRUS_RUNTIME_DIR";
const DEFAULT_CONFIG_DIR: &str = "/etc/cirrus";
const DEFAULT_RUNTIME_DIR: &str = "/var/lib/cirrus";

/// Resolved on-disk locations used by the agent.
#[derive(Debug, Clone)]
pub(crate) struct Directories {
    pub(crate) config_dir: PathBuf,
    pub(crate) runtime_dir: PathBuf,
}

impl Directories {
    pub(crate) fn resolve() -> Self {
        let config_dir = env::var_os(CONFIG_DIR_ENV)
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_DIR));
        let runtime_dir = env::var_os(RUNTIME_DIR_ENV)
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_RUNTIME_DIR));
        Directories {
            config_dir,
            runtime_dir,
        }
    }
}

fn read_json(path: &Path) -> anyhow::Result<JsonValue> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("failed to read configuration '{}'", path.display()))?;
    serde_json::from_str(&content)
        .with_context(|| format!("invalid JSON configuration in '{}'", path.display()))
}

/// Flatten scalar leaves of `json` into `map` under dotted keys.  Arrays
/// and nulls are skipped.
pub(crate) fn flatten_into(
    map: &mut OptionsMap,
    prefix: &str,
    json: &JsonValue,
    log: &LogFacility,
) {
    let JsonValue::Object(object) = json else {
        return;
    };
    for (key, item) in object {
        let full_key = if prefix.is_empty() {
            key.clone()
        } else {
            format!("{prefix}.{key}")
        };
        let value = match item {
            JsonValue::Bool(v) => Some(Value::Bool(*v)),
            JsonValue::Number(n) => {
                if let Some(v) = n.as_i64() {
                    Some(Value::Int64(v))
                } else {
                    n.as_f64().map(Value::Float64)
                }
            }
            JsonValue::String(s) => Some(Value::String(s.clone())),
            JsonValue::Object(_) => {
                flatten_into(map, &full_key, item, log);
                None
            }
            JsonValue::Array(_) | JsonValue::Null => None,
        };
        if let Some(value) = value {
            agent_log!(log, LogLevel::Debug, "configuration: {full_key} = {value:?}");
            if let Err(err) = map.set(&full_key, value) {
                agent_log!(
                    log,
                    LogLevel::Warning,
                    "could not store configuration key {full_key}: {err}"
                );
            }
        }
    }
}

/// Read the connect configuration files into the agent's config map.
/// `NotFound` when neither file existed; individual parse failures are
/// logged and skipped.
pub(crate) fn load_connect_configuration(core: &AgentCore) -> Status {
    let global = core.dirs.config_dir.join(CONNECT_CONFIG_FILE);
    let specific = core.configuration_file().unwrap_or_else(|| {
        core.dirs
            .config_dir
            .join(format!("{}.{}", core.app_id(), CONFIG_FILE_EXT))
    });

    let mut loaded_any = false;
    for path in [global, specific] {
        agent_log!(
            core.log,
            LogLevel::Trace,
            "looking for configuration file: {}",
            path.display()
        );
        if !path.is_file() {
            continue;
        }
        match read_json(&path) {
            Ok(json) => {
                if let Ok(mut config) = core.config.write() {
                    flatten_into(&mut config, "", &json, &core.log);
                    loaded_any = true;
                }
            }
            Err(err) => {
                agent_log!(
                    core.log,
                    LogLevel::Error,
                    "failed to parse configuration file: {} ({err:#})",
                    path.display()
                );
            }
        }
    }
    if loaded_any {
        Status::Success
    } else {
        Status::NotFound
    }
}

/// Read the device-id file, generating and persisting a fresh UUID when
/// the file is absent or empty.
pub(crate) fn load_or_create_device_id(
    runtime_dir: &Path,
    log: &LogFacility,
) -> Result<String, Status> {
    if !runtime_dir.is_dir() {
        fs::create_dir_all(runtime_dir).map_err(|_| Status::Failure)?;
    }
    let path = runtime_dir.join(DEVICE_ID_FILE);
    let mut id = fs::read_to_string(&path).unwrap_or_default();
    id = id.trim().to_string();
    if id.len() > ID_MAX {
        let mut cut = ID_MAX;
        while !id.is_char_boundary(cut) {
            cut -= 1;
        }
        id.truncate(cut);
    }
    if !id.is_empty() {
        agent_log!(log, LogLevel::Info, "device id: {id}");
        return Ok(id);
    }

    let fresh = Uuid::new_v4().to_string();
    if fs::write(&path, &fresh).is_err() {
        agent_log!(log, LogLevel::Error, "failed to create file: {}", path.display());
        return Err(Status::Failure);
    }
    agent_log!(log, LogLevel::Info, "generated device id: {fresh}");
    Ok(fresh)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::ValueType;

    #[test]
    fn nested_objects_flatten_to_dotted_keys() {
        let json: JsonValue = serde_json::json!({
            "log_level": "DEBUG",
            "cloud": {
                "host": "api.example.com",
                "port": 8883,
                "qos": { "default": 1 }
            },
            "enabled": true,
            "rate": 2.5,
            "ignored_list": [1, 2, 3],
            "ignored_null": null
        });
        let log = LogFacility::new();
        let mut map = OptionsMap::new();
        flatten_into(&mut map, "", &json, &log);

        assert_eq!(map.get_string("log_level", false).unwrap(), "DEBUG");
        assert_eq!(map.get_string("cloud.host", false).unwrap(), "api.example.com");
        assert_eq!(map.get_i64("cloud.port", false).unwrap(), 8883);
        assert_eq!(map.get_i64("cloud.qos.default", false).unwrap(), 1);
        assert_eq!(map.get_bool("enabled", false).unwrap(), true);
        assert_eq!(map.get_f64("rate", false).unwrap(), 2.5);
        assert_eq!(
            map.get("ignored_list", false, ValueType::Null),
            Err(Status::NotFound)
        );
        assert_eq!(
            map.get("ignored_null", false, ValueType::Null),
            Err(Status::NotFound)
        );
    }

    #[test]
    fn device_id_round_trips_through_the_file() {
        let dir = tempfile::tempdir().unwrap();
        let log = LogFacility::new();
        let first = load_or_create_device_id(dir.path(), &log).unwrap();
        assert_eq!(first.len(), 36);
        assert!(first
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-'));
        let second = load_or_create_device_id(dir.path(), &log).unwrap();
        assert_eq!(first, second);

        let on_disk = fs::read_to_string(dir.path().join(DEVICE_ID_FILE)).unwrap();
        assert_eq!(on_disk.trim(), first);
    }
}
