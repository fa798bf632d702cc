//! Error types for olmappy

use std::path::PathBuf;

/// Result type for mirror operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while operating on the map mirror
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("transfer of {url} failed: {message}")]
    Transfer { url: String, message: String },

    #[error("failed to parse {what}: {message}")]
    Parse { what: String, message: String },

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("update of {map} rejected: {message}")]
    Update { map: String, message: String },

    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to write map list {path}: {message}")]
    JsonWrite { path: PathBuf, message: String },

    #[error("{operation}: no filter specified, use --all to apply to all maps")]
    EmptyFilter { operation: &'static str },

    #[error("remote map list {url} has no valid entries")]
    EmptyCatalog { url: String },
}

impl Error {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    pub fn transfer(url: impl Into<String>, message: impl ToString) -> Self {
        Self::Transfer {
            url: url.into(),
            message: message.to_string(),
        }
    }

    pub fn parse(what: impl Into<String>, message: impl ToString) -> Self {
        Self::Parse {
            what: what.into(),
            message: message.to_string(),
        }
    }

    pub fn update(map: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Update {
            map: map.into(),
            message: message.into(),
        }
    }

    /// Process exit status for a run that failed with this error
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Config(_) => 3,
            Self::EmptyFilter { .. } => 4,
            _ => 1,
        }
    }
}

/// Errors raised while loading, overriding or writing configuration
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("config file {path} could not be read: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("config file {path} could not be parsed: {message}")]
    Parse { path: PathBuf, message: String },

    #[error("unknown configuration option '{0}'")]
    UnknownOption(String),

    #[error("invalid value '{value}' for option '{name}': {message}")]
    InvalidValue {
        name: String,
        value: String,
        message: String,
    },

    #[error("config file {path} could not be written: {message}")]
    Write { path: PathBuf, message: String },

    #[error("config files nest deeper than {0} levels")]
    TooDeep(usize),
}

/// A catalog record that does not describe a well-formed map
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("record is malformed: {0}")]
    Malformed(String),

    #[error("missing URL")]
    MissingUrl,

    #[error("malformed URL '{0}': too short, expected at least /i/a.b")]
    UrlTooShort(String),

    #[error("malformed URL '{0}': does not start with /")]
    UrlNotAbsolute(String),

    #[error("malformed URL '{0}': expected at least 2 parts: id/filename")]
    UrlSegments(String),

    #[error("malformed URL '{0}': empty ID part in id/filename")]
    EmptyId(String),

    #[error("malformed URL '{0}': empty FILENAME part in id/filename")]
    EmptyFilename(String),

    #[error("malformed URL '{0}': decoded FILENAME part was empty")]
    EmptyDecodedFilename(String),

    #[error("LEVELS part missing")]
    MissingLevels,

    #[error("LEVELS part empty")]
    EmptyLevels,

    #[error("LEVEL without a type")]
    LevelWithoutType,

    #[error("LEVEL without a name")]
    LevelWithoutName,

    #[error("map type '{0}' can't be parsed")]
    UnknownMapType(String),

    #[error("backing file {0} is missing")]
    MissingFile(PathBuf),

    #[error("file size differs, expected: {expected}, got: {actual}")]
    SizeMismatch { expected: i64, actual: u64 },
}
