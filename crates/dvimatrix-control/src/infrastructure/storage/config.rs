//! JSON-based configuration persistence for the matrix controller.
//!
//! Reads and writes [`MatrixConfig`] to the platform-appropriate config file:
//! - Windows:  `%APPDATA%\DVImatrix848\setup.json`
//! - Linux:    `~/.config/DVImatrix848/setup.json`
//! - macOS:    `~/Library/Application Support/DVImatrix848/setup.json`
//!
//! # File layout (for beginners)
//!
//! ```json
//! {
//!     "INPUTS": ["Laptop", "Camera", "..."],
//!     "OUTPUTS": ["Beamer", "Stream", "..."],
//!     "serial": { "port": "/dev/ttyUSB0", "sleep": 0.25 },
//!     "generic": { "fetchstate": "always", "emergencystore": true },
//!     "matrix": { "0": 2, "1": 0 },
//!     "defaultmatrix": { "0": 0, "1": 1 }
//! }
//! ```
//!
//! `matrix` is the routing the controller last knew about; `defaultmatrix` is
//! the emergency routing that `restore` brings back.  Keys are output indices
//! and values are input indices, both zero-based.
//!
//! # Loading never fails
//!
//! The file is often edited by hand, so [`load`] is forgiving.  Each of the
//! six sections is parsed on its own from a `serde_json::Value`.  A section
//! that is missing or has the wrong shape falls back to its default and adds
//! a [`ConfigWarning`] naming the section and the file.  Only [`save`] can
//! return an error.
//!
//! # Saving only what is known
//!
//! [`to_json`] omits empty label sets, empty tables and an absent port, so a
//! config written before the first connection does not overwrite hand-made
//! entries with empty placeholders.  The `generic` section and
//! `serial.sleep` are always written.

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use dvimatrix_core::{FetchPolicy, LabelSet, MatrixLabels, RoutingTable};
use serde::Serialize;
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::infrastructure::serial::DEFAULT_SETTLE_INTERVAL;

/// Name of the application directory below the platform config base.
const APP_DIR: &str = "DVImatrix848";

/// Name of the config file inside [`APP_DIR`].
const CONFIG_FILE: &str = "setup.json";

/// Directory below the config directory that holds the log file.
const LOG_DIR: &str = "Logs";

/// Name of the default log file inside [`LOG_DIR`].
const LOG_FILE: &str = "DVImatrix.log";

/// Label count used when a label section has to be generated.
const DEFAULT_LABEL_COUNT: usize = 8;

const INPUTS: &str = "INPUTS";
const OUTPUTS: &str = "OUTPUTS";
const SERIAL: &str = "serial";
const SERIAL_PORT: &str = "serial.port";
const SERIAL_SLEEP: &str = "serial.sleep";
const GENERIC: &str = "generic";
const FETCHSTATE: &str = "generic.fetchstate";
const EMERGENCYSTORE: &str = "generic.emergencystore";
const MATRIX: &str = "matrix";
const DEFAULTMATRIX: &str = "defaultmatrix";

/// Error type for configuration file operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The platform config directory could not be determined.
    #[error("could not determine platform config directory")]
    NoPlatformConfigDir,

    /// A file system I/O error occurred.
    #[error("I/O error accessing config at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The config could not be serialized to JSON.
    #[error("failed to serialize config: {0}")]
    Serialize(#[from] serde_json::Error),
}

// ── Config schema types ───────────────────────────────────────────────────────

/// The `serial` section.
#[derive(Debug, Clone, PartialEq)]
pub struct SerialConfig {
    /// Device name to connect to at startup.
    pub port: Option<String>,
    /// Minimum quiet time between two commands.
    pub settle_interval: Duration,
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            port: None,
            settle_interval: DEFAULT_SETTLE_INTERVAL,
        }
    }
}

/// Everything the controller persists between runs.
#[derive(Debug, Clone, PartialEq)]
pub struct MatrixConfig {
    pub labels: MatrixLabels,
    pub serial: SerialConfig,
    pub fetch_policy: FetchPolicy,
    /// Whether `store` may overwrite the emergency routing.
    pub emergency_store: bool,
    /// Live routing table.
    pub matrix: RoutingTable,
    /// Emergency routing table.
    pub default_matrix: RoutingTable,
}

impl Default for MatrixConfig {
    fn default() -> Self {
        Self {
            labels: MatrixLabels {
                inputs: LabelSet::default_inputs(DEFAULT_LABEL_COUNT),
                outputs: LabelSet::default_outputs(DEFAULT_LABEL_COUNT),
            },
            serial: SerialConfig::default(),
            fetch_policy: FetchPolicy::default(),
            emergency_store: true,
            matrix: RoutingTable::new(),
            default_matrix: RoutingTable::new(),
        }
    }
}

// ── Warnings ──────────────────────────────────────────────────────────────────

/// A defaulting decision taken while loading a config file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigWarning {
    /// The file could not be read or is not valid JSON.
    Unreadable { path: PathBuf, reason: String },
    /// The top level of the file is not a JSON object.
    NotAnObject { path: PathBuf },
    /// A section or sub-key is absent.
    MissingSection { section: &'static str, path: PathBuf },
    /// A section or sub-key is present but unusable.
    InvalidSection {
        section: &'static str,
        path: PathBuf,
        reason: String,
    },
}

impl ConfigWarning {
    /// The section this warning is about, if it concerns a single section.
    pub fn section(&self) -> Option<&'static str> {
        match self {
            Self::MissingSection { section, .. } | Self::InvalidSection { section, .. } => {
                Some(section)
            }
            Self::Unreadable { .. } | Self::NotAnObject { .. } => None,
        }
    }
}

impl fmt::Display for ConfigWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unreadable { path, reason } => {
                write!(f, "config file error in {}: {reason}", path.display())
            }
            Self::NotAnObject { path } => {
                write!(f, "illegal config file {}: not a JSON object", path.display())
            }
            Self::MissingSection { section, path } => {
                write!(f, "no '{section}' in configuration {}", path.display())
            }
            Self::InvalidSection {
                section,
                path,
                reason,
            } => write!(
                f,
                "invalid '{section}' in configuration {}: {reason}",
                path.display()
            ),
        }
    }
}

/// Result of [`load`]: the usable config plus every defaulting decision.
#[derive(Debug, Clone, PartialEq)]
pub struct LoadedConfig {
    pub config: MatrixConfig,
    pub warnings: Vec<ConfigWarning>,
}

// ── Loading ───────────────────────────────────────────────────────────────────

/// Loads the config at `path`, defaulting whatever is missing or invalid.
///
/// Every warning is also logged at `warn` level.
pub fn load(path: &Path) -> LoadedConfig {
    let mut warnings = Vec::new();
    let value = match std::fs::read_to_string(path) {
        Ok(content) => match serde_json::from_str::<Value>(&content) {
            Ok(value) => value,
            Err(e) => {
                warnings.push(ConfigWarning::Unreadable {
                    path: path.to_path_buf(),
                    reason: e.to_string(),
                });
                Value::Object(Map::new())
            }
        },
        Err(e) => {
            warnings.push(ConfigWarning::Unreadable {
                path: path.to_path_buf(),
                reason: e.to_string(),
            });
            Value::Object(Map::new())
        }
    };

    let mut loaded = from_json(&value, path);
    warnings.append(&mut loaded.warnings);
    for warning in &warnings {
        warn!("{warning}");
    }
    info!("loaded configuration from {}", path.display());
    LoadedConfig {
        config: loaded.config,
        warnings,
    }
}

/// Builds a config from an already parsed JSON document.
///
/// `path` is only used to label warnings.  Nothing is logged.
pub fn from_json(value: &Value, path: &Path) -> LoadedConfig {
    let mut parser = SectionParser {
        path,
        warnings: Vec::new(),
    };
    let empty = Map::new();
    let root = match value {
        Value::Object(map) => map,
        // A file containing only `null` is treated like an empty file.
        Value::Null => &empty,
        _ => {
            parser.warnings.push(ConfigWarning::NotAnObject {
                path: path.to_path_buf(),
            });
            &empty
        }
    };

    let defaults = MatrixConfig::default();
    let inputs = parser
        .labels(root, INPUTS)
        .unwrap_or(defaults.labels.inputs);
    let outputs = parser
        .labels(root, OUTPUTS)
        .unwrap_or(defaults.labels.outputs);
    let serial = parser.serial(root);
    let (fetch_policy, emergency_store) = parser.generic(root);
    let matrix = parser.table(root, MATRIX);
    let default_matrix = parser.table(root, DEFAULTMATRIX);

    LoadedConfig {
        config: MatrixConfig {
            labels: MatrixLabels { inputs, outputs },
            serial,
            fetch_policy,
            emergency_store,
            matrix,
            default_matrix,
        },
        warnings: parser.warnings,
    }
}

/// Collects warnings while the sections are parsed one by one.
struct SectionParser<'a> {
    path: &'a Path,
    warnings: Vec<ConfigWarning>,
}

impl SectionParser<'_> {
    fn missing(&mut self, section: &'static str) {
        self.warnings.push(ConfigWarning::MissingSection {
            section,
            path: self.path.to_path_buf(),
        });
    }

    fn invalid(&mut self, section: &'static str, reason: impl Into<String>) {
        self.warnings.push(ConfigWarning::InvalidSection {
            section,
            path: self.path.to_path_buf(),
            reason: reason.into(),
        });
    }

    fn labels(&mut self, root: &Map<String, Value>, section: &'static str) -> Option<LabelSet> {
        let Some(value) = root.get(section) else {
            self.missing(section);
            return None;
        };
        let Value::Array(items) = value else {
            self.invalid(section, "expected a list of names");
            return None;
        };
        if items.is_empty() {
            self.invalid(section, "the list is empty");
            return None;
        }
        let mut names = Vec::with_capacity(items.len());
        for item in items {
            match item {
                Value::String(name) => names.push(name.clone()),
                other => {
                    self.invalid(section, format!("{other} is not a string"));
                    return None;
                }
            }
        }
        Some(LabelSet::new(names))
    }

    fn serial(&mut self, root: &Map<String, Value>) -> SerialConfig {
        let mut serial = SerialConfig::default();
        let section = match root.get(SERIAL) {
            Some(Value::Object(section)) => section,
            Some(_) => {
                self.invalid(SERIAL, "expected an object");
                return serial;
            }
            None => {
                self.missing(SERIAL);
                return serial;
            }
        };

        match section.get("port") {
            None | Some(Value::Null) => {}
            Some(Value::String(port)) if !port.is_empty() => serial.port = Some(port.clone()),
            Some(Value::String(_)) => {}
            Some(other) => self.invalid(SERIAL_PORT, format!("{other} is not a device name")),
        }

        match section.get("sleep") {
            None | Some(Value::Null) => {}
            Some(value) => match value.as_f64().and_then(|s| Duration::try_from_secs_f64(s).ok()) {
                Some(interval) => serial.settle_interval = interval,
                None => self.invalid(
                    SERIAL_SLEEP,
                    format!("{value} is not a non-negative number of seconds"),
                ),
            },
        }
        serial
    }

    fn generic(&mut self, root: &Map<String, Value>) -> (FetchPolicy, bool) {
        let mut policy = FetchPolicy::default();
        let mut emergency_store = true;
        let section = match root.get(GENERIC) {
            Some(Value::Object(section)) => section,
            Some(_) => {
                self.invalid(GENERIC, "expected an object");
                return (policy, emergency_store);
            }
            None => {
                self.missing(GENERIC);
                return (policy, emergency_store);
            }
        };

        match section.get("fetchstate") {
            Some(Value::String(value)) => policy = FetchPolicy::from_config_str(value),
            Some(other) => self.invalid(FETCHSTATE, format!("{other} is not a string")),
            None => self.missing(FETCHSTATE),
        }

        match section.get("emergencystore") {
            Some(Value::Bool(allowed)) => emergency_store = *allowed,
            Some(other) => self.invalid(EMERGENCYSTORE, format!("{other} is not a boolean")),
            None => self.missing(EMERGENCYSTORE),
        }
        (policy, emergency_store)
    }

    fn table(&mut self, root: &Map<String, Value>, section: &'static str) -> RoutingTable {
        let mut table = RoutingTable::new();
        let entries = match root.get(section) {
            Some(Value::Object(entries)) => entries,
            Some(Value::Null) => return table,
            Some(_) => {
                self.invalid(section, "expected an object of output: input pairs");
                return table;
            }
            None => {
                self.missing(section);
                return table;
            }
        };

        for (key, value) in entries {
            let Ok(output) = key.parse::<usize>() else {
                debug!("{section}: dropping non-integer key '{key}'");
                continue;
            };
            let Some(input) = value.as_u64().and_then(|i| usize::try_from(i).ok()) else {
                debug!("{section}: dropping '{key}': {value} is not an input index");
                continue;
            };
            table.set(output, input);
        }
        table
    }
}

// ── Saving ────────────────────────────────────────────────────────────────────

/// Renders `config` as the JSON document [`save`] writes.
pub fn to_json(config: &MatrixConfig) -> Value {
    let mut root = Map::new();

    let mut generic = Map::new();
    generic.insert(
        "fetchstate".to_string(),
        Value::from(config.fetch_policy.as_config_str()),
    );
    generic.insert("emergencystore".to_string(), Value::from(config.emergency_store));
    root.insert(GENERIC.to_string(), Value::Object(generic));

    // The settle interval always has a value, and zero is a valid one.
    let mut serial = Map::new();
    if let Some(port) = &config.serial.port {
        serial.insert("port".to_string(), Value::from(port.as_str()));
    }
    serial.insert(
        "sleep".to_string(),
        Value::from(config.serial.settle_interval.as_secs_f64()),
    );
    root.insert(SERIAL.to_string(), Value::Object(serial));

    insert_labels(&mut root, INPUTS, &config.labels.inputs);
    insert_labels(&mut root, OUTPUTS, &config.labels.outputs);
    insert_table(&mut root, MATRIX, &config.matrix);
    insert_table(&mut root, DEFAULTMATRIX, &config.default_matrix);

    Value::Object(root)
}

fn insert_labels(root: &mut Map<String, Value>, section: &str, labels: &LabelSet) {
    if !labels.is_empty() {
        root.insert(section.to_string(), Value::from(labels.as_slice().to_vec()));
    }
}

fn insert_table(root: &mut Map<String, Value>, section: &str, table: &RoutingTable) {
    if !table.is_empty() {
        let entries: Map<String, Value> = table
            .iter()
            .map(|route| (route.output.to_string(), Value::from(route.input)))
            .collect();
        root.insert(section.to_string(), Value::Object(entries));
    }
}

/// Persists `config` to `path` as JSON indented by four spaces.
///
/// Creates the parent directory if it does not exist.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] for file-system failures or
/// [`ConfigError::Serialize`] if serialization fails.
pub fn save(path: &Path, config: &MatrixConfig) -> Result<(), ConfigError> {
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        std::fs::create_dir_all(dir).map_err(|source| ConfigError::Io {
            path: dir.to_path_buf(),
            source,
        })?;
    }

    let mut content = Vec::new();
    let formatter = serde_json::ser::PrettyFormatter::with_indent(b"    ");
    let mut serializer = serde_json::Serializer::with_formatter(&mut content, formatter);
    to_json(config).serialize(&mut serializer)?;
    content.push(b'\n');

    std::fs::write(path, content).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    info!("saved configuration to {}", path.display());
    Ok(())
}

// ── Config location ───────────────────────────────────────────────────────────

/// Determines the platform-appropriate directory for the config file.
///
/// # Errors
///
/// Returns [`ConfigError::NoPlatformConfigDir`] when the platform config base
/// directory cannot be determined from the environment.
pub fn config_dir() -> Result<PathBuf, ConfigError> {
    platform_config_dir().ok_or(ConfigError::NoPlatformConfigDir)
}

/// Resolves the full path to the default config file.
///
/// # Errors
///
/// Returns [`ConfigError::NoPlatformConfigDir`] if the base directory cannot be
/// determined.
pub fn config_file_path() -> Result<PathBuf, ConfigError> {
    Ok(config_dir()?.join(CONFIG_FILE))
}

/// The log file used when none is given on the command line.
///
/// Only Windows has one, `Logs\DVImatrix.log` in the config directory, since
/// the application has no console there.  Elsewhere logs go to stderr.
pub fn default_log_file() -> Option<PathBuf> {
    if cfg!(target_os = "windows") {
        config_dir().ok().and_then(|dir| log_file_in(&dir))
    } else {
        None
    }
}

/// Creates `<dir>/Logs` if needed and returns the log file path inside it.
///
/// Returns `None` when the directory cannot be created.
pub fn log_file_in(dir: &Path) -> Option<PathBuf> {
    let logs = dir.join(LOG_DIR);
    match std::fs::create_dir_all(&logs) {
        Ok(()) => Some(logs.join(LOG_FILE)),
        Err(e) => {
            debug!("cannot create log directory {}: {e}", logs.display());
            None
        }
    }
}

fn platform_config_dir() -> Option<PathBuf> {
    #[cfg(target_os = "windows")]
    {
        std::env::var_os("APPDATA").map(|p| PathBuf::from(p).join(APP_DIR))
    }

    #[cfg(target_os = "linux")]
    {
        let base = std::env::var_os("XDG_CONFIG_HOME")
            .map(PathBuf::from)
            .or_else(|| std::env::var_os("HOME").map(|h| PathBuf::from(h).join(".config")))?;
        Some(base.join(APP_DIR))
    }

    #[cfg(target_os = "macos")]
    {
        std::env::var_os("HOME").map(|h| {
            PathBuf::from(h)
                .join("Library")
                .join("Application Support")
                .join(APP_DIR)
        })
    }

    #[cfg(not(any(target_os = "windows", target_os = "linux", target_os = "macos")))]
    {
        None
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use uuid::Uuid;

    fn path() -> PathBuf {
        PathBuf::from("/etc/dvimatrix/setup.json")
    }

    fn complete() -> Value {
        json!({
            "INPUTS": ["a", "b"],
            "OUTPUTS": ["x", "y", "z"],
            "serial": { "port": "COM3", "sleep": 0.5 },
            "generic": { "fetchstate": "interactive", "emergencystore": false },
            "matrix": { "0": 1, "2": 0 },
            "defaultmatrix": { "1": 1 }
        })
    }

    fn sections(warnings: &[ConfigWarning]) -> Vec<&'static str> {
        warnings.iter().filter_map(ConfigWarning::section).collect()
    }

    // ── Defaults ──────────────────────────────────────────────────────────────

    #[test]
    fn test_matrix_config_default_is_eight_by_eight() {
        let cfg = MatrixConfig::default();
        assert_eq!(cfg.labels.inputs.get(0), Some("IN#0"));
        assert_eq!(cfg.labels.outputs.get(7), Some("OUT#7"));
        assert_eq!(cfg.labels.outputs.len(), 8);
        assert_eq!(cfg.fetch_policy, FetchPolicy::Always);
        assert!(cfg.emergency_store);
        assert_eq!(cfg.serial.settle_interval, Duration::from_millis(250));
    }

    // ── from_json ─────────────────────────────────────────────────────────────

    #[test]
    fn test_complete_document_loads_without_warnings() {
        // Arrange / Act
        let loaded = from_json(&complete(), &path());

        // Assert
        assert!(loaded.warnings.is_empty(), "{:?}", loaded.warnings);
        let cfg = loaded.config;
        assert_eq!(cfg.labels.inputs.as_slice(), ["a", "b"]);
        assert_eq!(cfg.labels.outputs.len(), 3);
        assert_eq!(cfg.serial.port.as_deref(), Some("COM3"));
        assert_eq!(cfg.serial.settle_interval, Duration::from_millis(500));
        assert_eq!(cfg.fetch_policy, FetchPolicy::Interactive);
        assert!(!cfg.emergency_store);
        assert_eq!(cfg.matrix, RoutingTable::from([(0, 1), (2, 0)]));
        assert_eq!(cfg.default_matrix, RoutingTable::from([(1, 1)]));
    }

    #[test]
    fn test_missing_outputs_yields_default_labels_and_one_warning() {
        // Arrange
        let mut doc = complete();
        doc.as_object_mut().unwrap().remove("OUTPUTS");

        // Act
        let loaded = from_json(&doc, &path());

        // Assert
        let outputs: Vec<&str> = loaded.config.labels.outputs.iter().collect();
        assert_eq!(
            outputs,
            ["OUT#0", "OUT#1", "OUT#2", "OUT#3", "OUT#4", "OUT#5", "OUT#6", "OUT#7"]
        );
        assert_eq!(
            loaded.warnings,
            vec![ConfigWarning::MissingSection {
                section: "OUTPUTS",
                path: path(),
            }]
        );
        assert_eq!(
            loaded.warnings[0].to_string(),
            "no 'OUTPUTS' in configuration /etc/dvimatrix/setup.json"
        );
    }

    #[test]
    fn test_empty_document_warns_for_every_section() {
        let loaded = from_json(&json!({}), &path());

        assert_eq!(
            sections(&loaded.warnings),
            ["INPUTS", "OUTPUTS", "serial", "generic", "matrix", "defaultmatrix"]
        );
        assert_eq!(loaded.config, MatrixConfig::default());
    }

    #[test]
    fn test_non_object_document_is_reported_and_defaulted() {
        let loaded = from_json(&json!([1, 2, 3]), &path());

        assert_eq!(
            loaded.warnings[0],
            ConfigWarning::NotAnObject { path: path() }
        );
        assert_eq!(loaded.config, MatrixConfig::default());
    }

    #[test]
    fn test_missing_generic_subkeys_warn_separately() {
        let mut doc = complete();
        doc["generic"] = json!({});

        let loaded = from_json(&doc, &path());

        assert_eq!(
            sections(&loaded.warnings),
            ["generic.fetchstate", "generic.emergencystore"]
        );
        assert_eq!(loaded.config.fetch_policy, FetchPolicy::Always);
        assert!(loaded.config.emergency_store);
    }

    #[test]
    fn test_fetchstate_is_parsed_by_prefix_case_insensitively() {
        for (text, expected) in [
            ("NEVER", FetchPolicy::Never),
            ("automatic", FetchPolicy::Automatic),
            ("Interactive-only", FetchPolicy::Interactive),
            ("whenever", FetchPolicy::Always),
        ] {
            let mut doc = complete();
            doc["generic"]["fetchstate"] = json!(text);
            let loaded = from_json(&doc, &path());
            assert_eq!(loaded.config.fetch_policy, expected, "for {text:?}");
        }
    }

    #[test]
    fn test_invalid_label_sections_fall_back_to_defaults() {
        let mut doc = complete();
        doc["INPUTS"] = json!([]);
        doc["OUTPUTS"] = json!("Beamer");

        let loaded = from_json(&doc, &path());

        assert_eq!(sections(&loaded.warnings), ["INPUTS", "OUTPUTS"]);
        assert_eq!(loaded.config.labels.inputs.len(), 8);
        assert_eq!(loaded.config.labels.outputs.len(), 8);
    }

    #[test]
    fn test_negative_sleep_is_rejected() {
        let mut doc = complete();
        doc["serial"]["sleep"] = json!(-1.0);

        let loaded = from_json(&doc, &path());

        assert_eq!(sections(&loaded.warnings), ["serial.sleep"]);
        assert_eq!(loaded.config.serial.settle_interval, DEFAULT_SETTLE_INTERVAL);
        assert_eq!(loaded.config.serial.port.as_deref(), Some("COM3"));
    }

    #[test]
    fn test_non_integer_matrix_keys_are_dropped_silently() {
        let mut doc = complete();
        doc["matrix"] = json!({ "0": 3, "one": 1, "2": "x", "-1": 0, "5": 4 });

        let loaded = from_json(&doc, &path());

        assert!(loaded.warnings.is_empty());
        assert_eq!(loaded.config.matrix, RoutingTable::from([(0, 3), (5, 4)]));
    }

    #[test]
    fn test_null_matrix_means_empty_without_warning() {
        let mut doc = complete();
        doc["matrix"] = Value::Null;

        let loaded = from_json(&doc, &path());

        assert!(loaded.warnings.is_empty());
        assert!(loaded.config.matrix.is_empty());
    }

    // ── to_json ───────────────────────────────────────────────────────────────

    #[test]
    fn test_to_json_omits_empty_sections() {
        // Arrange
        let cfg = MatrixConfig {
            labels: MatrixLabels {
                inputs: LabelSet::new(Vec::new()),
                outputs: LabelSet::new(Vec::new()),
            },
            serial: SerialConfig {
                port: None,
                settle_interval: Duration::ZERO,
            },
            ..MatrixConfig::default()
        };

        // Act
        let doc = to_json(&cfg);

        // Assert
        assert_eq!(
            doc,
            json!({
                "generic": { "fetchstate": "always", "emergencystore": true },
                "serial": { "sleep": 0.0 }
            })
        );
    }

    #[test]
    fn test_zero_sleep_survives_save_and_load() {
        let dir = std::env::temp_dir().join(format!("dvimatrix_test_{}", Uuid::new_v4()));
        let path = dir.join(CONFIG_FILE);
        let cfg = MatrixConfig {
            serial: SerialConfig {
                port: None,
                settle_interval: Duration::ZERO,
            },
            matrix: RoutingTable::from([(0, 0)]),
            default_matrix: RoutingTable::from([(0, 0)]),
            ..MatrixConfig::default()
        };

        save(&path, &cfg).expect("save");
        let loaded = load(&path);

        assert!(loaded.warnings.is_empty(), "{:?}", loaded.warnings);
        assert_eq!(loaded.config.serial.settle_interval, Duration::ZERO);
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_to_json_writes_port_sleep_and_tables() {
        let cfg = MatrixConfig {
            serial: SerialConfig {
                port: Some("/dev/ttyUSB0".to_string()),
                settle_interval: Duration::from_millis(250),
            },
            fetch_policy: FetchPolicy::Automatic,
            matrix: RoutingTable::from([(0, 2)]),
            ..MatrixConfig::default()
        };

        let doc = to_json(&cfg);

        assert_eq!(doc["serial"], json!({ "port": "/dev/ttyUSB0", "sleep": 0.25 }));
        assert_eq!(doc["generic"]["fetchstate"], json!("auto"));
        assert_eq!(doc["matrix"], json!({ "0": 2 }));
        assert!(doc.get("defaultmatrix").is_none());
        assert_eq!(doc["INPUTS"][0], json!("IN#0"));
    }

    // ── load / save on disk ───────────────────────────────────────────────────

    #[test]
    fn test_load_missing_file_reports_unreadable_and_defaults() {
        // Arrange
        let path = std::env::temp_dir().join(format!("dvimatrix_missing_{}.json", Uuid::new_v4()));

        // Act
        let loaded = load(&path);

        // Assert
        assert!(matches!(loaded.warnings[0], ConfigWarning::Unreadable { .. }));
        assert_eq!(loaded.warnings.len(), 7);
        assert_eq!(loaded.config, MatrixConfig::default());
    }

    #[test]
    fn test_load_malformed_json_reports_unreadable() {
        let dir = std::env::temp_dir().join(format!("dvimatrix_test_{}", Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join(CONFIG_FILE);
        std::fs::write(&path, "{ not json").unwrap();

        let loaded = load(&path);

        assert!(matches!(loaded.warnings[0], ConfigWarning::Unreadable { .. }));
        assert_eq!(loaded.config, MatrixConfig::default());
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_save_then_load_restores_config() {
        // Arrange
        let dir = std::env::temp_dir().join(format!("dvimatrix_test_{}", Uuid::new_v4()));
        let path = dir.join("nested").join(CONFIG_FILE);
        let cfg = MatrixConfig {
            serial: SerialConfig {
                port: Some("COM7".to_string()),
                settle_interval: Duration::from_millis(500),
            },
            fetch_policy: FetchPolicy::Never,
            emergency_store: false,
            matrix: RoutingTable::from([(0, 7), (7, 0)]),
            default_matrix: RoutingTable::from([(3, 3)]),
            ..MatrixConfig::default()
        };

        // Act
        save(&path, &cfg).expect("save");
        let loaded = load(&path);

        // Assert
        assert!(loaded.warnings.is_empty(), "{:?}", loaded.warnings);
        assert_eq!(loaded.config, cfg);
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_save_indents_with_four_spaces() {
        let dir = std::env::temp_dir().join(format!("dvimatrix_test_{}", Uuid::new_v4()));
        let path = dir.join(CONFIG_FILE);

        save(&path, &MatrixConfig::default()).unwrap();
        let text = std::fs::read_to_string(&path).unwrap();

        assert!(text.contains("\n    \"generic\": {\n        \""), "{text}");
        assert!(text.ends_with("}\n"));
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_log_file_in_creates_logs_directory() {
        let dir = std::env::temp_dir().join(format!("dvimatrix_test_{}", Uuid::new_v4()));

        let path = log_file_in(&dir).expect("writable temp dir");

        assert_eq!(path, dir.join("Logs").join("DVImatrix.log"));
        assert!(dir.join("Logs").is_dir());
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_config_file_path_ends_with_setup_json() {
        if let Ok(path) = config_file_path() {
            assert!(path.ends_with("DVImatrix848/setup.json"));
        }
    }
}
