//! Normalization and validation of raw catalog records into map entries

use crate::error::ValidationError;
use crate::types::{Level, MapEntry, MapType, RawMapRecord};
use serde_json::Value;
use std::fmt;
use tracing::{debug, warn};

/// Where a record came from, used to label log lines
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    Remote,
    Local,
    Imported,
}

impl fmt::Display for Origin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Remote => "remote",
            Self::Local => "local",
            Self::Imported => "imported",
        })
    }
}

/// Split a catalog URL `/<...>/<id>/<filename>` into id, encoded and decoded file name
pub fn split_url(url: &str) -> Result<(String, String, String), ValidationError> {
    if url.len() < 6 {
        return Err(ValidationError::UrlTooShort(url.to_string()));
    }
    if !url.starts_with('/') {
        return Err(ValidationError::UrlNotAbsolute(url.to_string()));
    }
    let parts: Vec<&str> = url.split('/').collect();
    if parts.len() < 2 {
        return Err(ValidationError::UrlSegments(url.to_string()));
    }
    let id = parts[parts.len() - 2];
    let encoded = parts[parts.len() - 1];
    if id.is_empty() {
        return Err(ValidationError::EmptyId(url.to_string()));
    }
    if encoded.is_empty() {
        return Err(ValidationError::EmptyFilename(url.to_string()));
    }
    let decoded = urlencoding::decode_binary(encoded.as_bytes());
    let filename = String::from_utf8_lossy(&decoded).into_owned();
    if filename.is_empty() {
        return Err(ValidationError::EmptyDecodedFilename(url.to_string()));
    }
    Ok((id.to_string(), encoded.to_string(), filename))
}

/// Validate a record given as arbitrary JSON
pub fn validate_value(value: Value, origin: Origin, now: f64) -> Result<MapEntry, ValidationError> {
    let raw: RawMapRecord =
        serde_json::from_value(value).map_err(|e| ValidationError::Malformed(e.to_string()))?;
    validate_record(raw, origin, now)
}

/// Turn a raw record into a map entry, defaulting the fields that may be missing.
///
/// `id`, `filename` and the derived `types`/`names` are always recomputed from
/// `url` and `levels`, whatever the record claims.
pub fn validate_record(raw: RawMapRecord, origin: Origin, now: f64) -> Result<MapEntry, ValidationError> {
    let url = raw.url.ok_or(ValidationError::MissingUrl)?;
    let (id, filename_encoded, filename) = split_url(&url)?;

    let raw_levels = raw.levels.ok_or(ValidationError::MissingLevels)?;
    if raw_levels.is_empty() {
        return Err(ValidationError::EmptyLevels);
    }
    let mut levels = Vec::with_capacity(raw_levels.len());
    let mut types = 0u8;
    let mut names: Vec<String> = Vec::new();
    for raw_level in raw_levels {
        let code = raw_level.kind.ok_or(ValidationError::LevelWithoutType)?;
        let name = raw_level.name.ok_or(ValidationError::LevelWithoutName)?;
        let kind = MapType::from_code(&code).ok_or(ValidationError::UnknownMapType(code))?;
        types |= kind.bit();
        if !names.contains(&name) {
            names.push(name.clone());
        }
        levels.push(Level { kind, name });
    }

    let mtime = match raw.mtime {
        Some(mtime) => mtime,
        None => {
            warn!(%origin, map = %filename, "Map has missing mtime, faking it");
            now
        }
    };

    let size = match raw.size {
        Some(size) if size >= 1 => size,
        Some(size) => {
            warn!(%origin, map = %filename, size, "Map has invalid size, will use downloaded size");
            -1
        }
        None => {
            warn!(%origin, map = %filename, "Map has missing size, will use downloaded size");
            -1
        }
    };

    let hidden = match raw.hidden {
        Some(h) if h > 0 => 1,
        _ => 0,
    };

    Ok(MapEntry {
        id,
        url,
        filename_encoded,
        filename,
        size,
        mtime,
        levels,
        types,
        names,
        hidden,
    })
}

/// Validate a whole batch; bad records are logged and dropped
pub fn validate_all(values: Vec<Value>, origin: Origin, now: f64) -> Vec<MapEntry> {
    let total = values.len();
    debug!(%origin, total, "Validating map list");
    let entries: Vec<MapEntry> = values
        .into_iter()
        .filter_map(|value| {
            let shown = value.to_string();
            match validate_value(value, origin, now) {
                Ok(entry) => Some(entry),
                Err(e) => {
                    warn!(%origin, record = %shown, error = %e, "Failed to validate map");
                    None
                }
            }
        })
        .collect();
    if entries.len() < total {
        warn!(%origin, invalid = total - entries.len(), total, "Map list has invalid entries");
    }
    debug!(%origin, valid = entries.len(), total, "Validated map list");
    entries
}
