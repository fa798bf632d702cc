//! User settings stored as JSON in the config directory

use crate::constants::*;
use crate::error::ConfigError;
use crate::utils::string_as_bool;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::Level;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase", deny_unknown_fields)]
pub struct Settings {
    // Mirror
    pub map_path: PathBuf,

    // Server
    pub map_server: String,
    #[serde(rename = "mapServerListURL")]
    pub map_server_list_url: String,
    pub verify_certificates: bool,
    pub certificate_bundle: String,
    pub request_timeout_secs: u64,

    // Logging
    #[serde(deserialize_with = "deserialize_log_level")]
    pub log_level: String,
    pub log_to_file: bool,

    // Matching
    pub filename_case_sensitive: bool,
    pub filter_case_sensitive: bool,

    // Behaviour
    pub remove_unknown_maps: bool,
    pub auto_import: bool,

    /// Further config file to load after this one
    #[serde(skip_serializing_if = "Option::is_none")]
    pub config_file: Option<PathBuf>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            map_path: PathBuf::from(DEFAULT_MAP_PATH),
            map_server: DEFAULT_MAP_SERVER.to_string(),
            map_server_list_url: DEFAULT_MAP_LIST_PATH.to_string(),
            verify_certificates: true,
            certificate_bundle: String::new(),
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
            log_level: "info".to_string(),
            log_to_file: true,
            filename_case_sensitive: true,
            filter_case_sensitive: false,
            remove_unknown_maps: false,
            auto_import: true,
            config_file: None,
        }
    }
}

impl Settings {
    /// Config file used when none is given explicitly
    pub fn default_config_file() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(DEFAULT_CONFIG_FILE)
    }

    /// Load settings from `path`, following nested `configFile` references.
    ///
    /// Each nested file is layered over the settings loaded so far: only the
    /// keys it names change. A missing top-level file yields defaults. Any
    /// parse error, unknown key or bad value fails the whole load.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let mut settings = match Self::read_layer(path) {
            Ok(layer) => Self::default().layered(path, layer)?,
            Err(ConfigError::Read { source, .. }) if source.kind() == std::io::ErrorKind::NotFound => {
                Self::default()
            }
            Err(e) => return Err(e),
        };

        let mut visited = vec![path.to_path_buf()];
        while let Some(next) = settings.config_file.clone() {
            if visited.iter().any(|p| p == &next) {
                break;
            }
            if visited.len() > MAX_CONFIG_DEPTH {
                return Err(ConfigError::TooDeep(MAX_CONFIG_DEPTH));
            }
            let layer = Self::read_layer(&next)?;
            settings = settings.layered(&next, layer)?;
            visited.push(next);
        }
        settings.config_file = Some(visited.last().cloned().unwrap_or_else(|| path.to_path_buf()));
        Ok(settings)
    }

    /// Raw JSON object of one config file
    fn read_layer(path: &Path) -> Result<Map<String, Value>, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&text).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            message: e.to_string(),
        })
    }

    /// Apply the keys present in `layer` over these settings.
    ///
    /// `configFile` is only carried over when the layer names it, so a chain
    /// ends at the first file without one.
    fn layered(&self, path: &Path, layer: Map<String, Value>) -> Result<Self, ConfigError> {
        let mut merged = match serde_json::to_value(self) {
            Ok(Value::Object(map)) => map,
            _ => Map::new(),
        };
        merged.remove("configFile");
        merged.extend(layer);
        let mut settings: Self = serde_json::from_value(Value::Object(merged)).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        settings.validate()?;
        Ok(settings)
    }

    /// Write settings as pretty JSON, leaving out the `configFile` key
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let mut to_write = self.clone();
        to_write.config_file = None;
        let json = serde_json::to_string_pretty(&to_write).map_err(|e| ConfigError::Write {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| ConfigError::Write {
                path: path.to_path_buf(),
                message: e.to_string(),
            })?;
        }
        std::fs::write(path, json).map_err(|e| ConfigError::Write {
            path: path.to_path_buf(),
            message: e.to_string(),
        })
    }

    /// Effective settings rendered as pretty JSON
    pub fn to_json(&self) -> String {
        serde_json::to_string_pretty(self).unwrap_or_default()
    }

    /// Apply `NAME VALUE` overrides; either all of them apply or none does
    pub fn with_overrides(&self, overrides: &[(String, String)]) -> Result<Self, ConfigError> {
        let mut next = self.clone();
        for (name, value) in overrides {
            next.set(name, value)?;
        }
        next.validate()?;
        Ok(next)
    }

    /// Set one option from its string form, by its config-file key
    pub fn set(&mut self, name: &str, value: &str) -> Result<(), ConfigError> {
        let invalid = |message: String| ConfigError::InvalidValue {
            name: name.to_string(),
            value: value.to_string(),
            message,
        };
        let flag = || string_as_bool(value).map_err(invalid);
        match name {
            "mapPath" => self.map_path = PathBuf::from(value),
            "mapServer" => self.map_server = value.to_string(),
            "mapServerListURL" => self.map_server_list_url = value.to_string(),
            "verifyCertificates" => self.verify_certificates = flag()?,
            "certificateBundle" => self.certificate_bundle = value.to_string(),
            "requestTimeoutSecs" => {
                self.request_timeout_secs = value.trim().parse().map_err(|e: std::num::ParseIntError| invalid(e.to_string()))?
            }
            "logLevel" => {
                self.log_level = match value.trim().parse::<i64>() {
                    Ok(n) => log_level_name(n).to_string(),
                    Err(_) => value.trim().to_string(),
                }
            }
            "logToFile" => self.log_to_file = flag()?,
            "filenameCaseSensitive" => self.filename_case_sensitive = flag()?,
            "filterCaseSensitive" => self.filter_case_sensitive = flag()?,
            "removeUnknownMaps" => self.remove_unknown_maps = flag()?,
            "autoImport" => self.auto_import = flag()?,
            "configFile" => self.config_file = Some(PathBuf::from(value)),
            _ => return Err(ConfigError::UnknownOption(name.to_string())),
        }
        Ok(())
    }

    /// Check values serde can't: log level and mirror path
    pub fn validate(&mut self) -> Result<(), ConfigError> {
        if Level::from_str(&self.log_level).is_err() {
            return Err(ConfigError::InvalidValue {
                name: "logLevel".into(),
                value: self.log_level.clone(),
                message: "expected one of error, warn, info, debug, trace".into(),
            });
        }
        if self.map_path.as_os_str().is_empty() {
            self.map_path = PathBuf::from(".");
        }
        Ok(())
    }
}

/// Level name for the numeric levels older config files store (0 = error .. 3 = debug)
fn log_level_name(level: i64) -> &'static str {
    match level {
        i64::MIN..=0 => "error",
        1 => "warn",
        2 => "info",
        3 => "debug",
        _ => "trace",
    }
}

fn deserialize_log_level<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum LogLevelValue {
        Number(i64),
        Name(String),
    }
    Ok(match LogLevelValue::deserialize(deserializer)? {
        LogLevelValue::Number(n) => log_level_name(n).to_string(),
        LogLevelValue::Name(name) => name,
    })
}
