//! Common types and data structures

use crate::utils::format_timestamp;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// Game mode a level is built for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MapType {
    SinglePlayer,
    ChallengeMode,
    MultiPlayer,
}

/// Bit position and short code of each map type, in display order
const MAP_TYPE_TABLE: [(MapType, u8, &str); 3] = [
    (MapType::SinglePlayer, 1 << 0, "SP"),
    (MapType::ChallengeMode, 1 << 1, "CM"),
    (MapType::MultiPlayer, 1 << 2, "MP"),
];

impl MapType {
    pub fn bit(self) -> u8 {
        MAP_TYPE_TABLE
            .iter()
            .find(|(t, _, _)| *t == self)
            .map(|(_, bit, _)| *bit)
            .unwrap_or(0)
    }

    pub fn code(self) -> &'static str {
        MAP_TYPE_TABLE
            .iter()
            .find(|(t, _, _)| *t == self)
            .map(|(_, _, code)| *code)
            .unwrap_or("UN")
    }

    /// Parse a short code such as `sp` or `MP`, ignoring case
    pub fn from_code(code: &str) -> Option<Self> {
        let code = code.trim();
        MAP_TYPE_TABLE
            .iter()
            .find(|(_, _, c)| c.eq_ignore_ascii_case(code))
            .map(|(t, _, _)| *t)
    }

    /// Render a type mask as `[SP,CM,MP]`; absent types become `fill` when given
    pub fn describe_mask(mask: u8, fill: Option<&str>) -> String {
        let parts: Vec<&str> = MAP_TYPE_TABLE
            .iter()
            .filter_map(|(_, bit, code)| {
                if mask & bit != 0 {
                    Some(*code)
                } else {
                    fill
                }
            })
            .collect();
        format!("[{}]", parts.join(","))
    }
}

impl fmt::Display for MapType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

impl FromStr for MapType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_code(s).ok_or_else(|| format!("map type {} can't be parsed", s))
    }
}

impl Serialize for MapType {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.code())
    }
}

impl<'de> Deserialize<'de> for MapType {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let code = String::deserialize(deserializer)?;
        code.parse().map_err(serde::de::Error::custom)
    }
}

/// One level contained in a map file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Level {
    #[serde(rename = "type")]
    pub kind: MapType,
    pub name: String,
}

/// A validated catalog record describing one downloadable map file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MapEntry {
    pub id: String,
    pub url: String,
    pub filename_encoded: String,
    pub filename: String,
    /// Byte count, `-1` until known
    pub size: i64,
    pub mtime: f64,
    pub levels: Vec<Level>,
    pub types: u8,
    pub names: Vec<String>,
    pub hidden: u8,
}

impl MapEntry {
    pub fn is_hidden(&self) -> bool {
        self.hidden > 0
    }

    /// Same content as `other`: equal mtime, equal known size and equal levels
    pub fn same_content(&self, other: &MapEntry) -> bool {
        self.mtime == other.mtime
            && self.levels == other.levels
            && self.size == other.size
            && self.size >= 1
            && other.size >= 1
    }

    /// Short label used in log lines: `"file.lvl": ["Level"] [SP]`
    pub fn label(&self) -> String {
        let names: Vec<String> = self.names.iter().map(|n| format!("\"{}\"", n)).collect();
        format!(
            "\"{}\": [{}] {}",
            self.filename,
            names.join(", "),
            MapType::describe_mask(self.types, None)
        )
    }

    /// One-line listing description
    pub fn describe(&self) -> String {
        let names: Vec<String> = self.names.iter().map(|n| format!("\"{}\"", n)).collect();
        format!(
            "{} ({}) \"{}\": [{}] ({})",
            MapType::describe_mask(self.types, Some("  ")),
            if self.is_hidden() { ' ' } else { '*' },
            self.filename,
            names.join(", "),
            format_timestamp(self.mtime)
        )
    }
}

/// Level as it appears in an unvalidated record
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RawLevel {
    #[serde(rename = "type")]
    pub kind: Option<String>,
    pub name: Option<String>,
}

/// Catalog record as published by the server or stored in an index file
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RawMapRecord {
    pub url: Option<String>,
    pub id: Option<String>,
    pub filename: Option<String>,
    #[serde(alias = "modifiedTime")]
    pub mtime: Option<f64>,
    pub size: Option<i64>,
    pub levels: Option<Vec<RawLevel>>,
    pub hidden: Option<i64>,
}
