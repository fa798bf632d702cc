//! Application constants and defaults

pub const APP_NAME: &str = "olmappy";
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

pub const DEFAULT_MAP_SERVER: &str = "https://overloadmaps.com";
pub const DEFAULT_MAP_LIST_PATH: &str = "/data/all.json";
pub const DEFAULT_MAP_PATH: &str = "/usr/share/Revival/Overload";
pub const DEFAULT_CONFIG_FILE: &str = "olmappy.json";
pub const DEFAULT_EXPORT_FILE: &str = "olmappyExport.json";
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 60;

/// Name of the persisted local index inside the mirror root
pub const INDEX_FILE_NAME: &str = "olmappyIndex.json";
pub const HIDDEN_DIR: &str = "hidden";
pub const REPLACED_DIR: &str = "replaced";

pub const HIDDEN_SUFFIX: &str = "_hidden";
pub const REPLACED_SUFFIX: &str = "_replaced";
/// Id used when archiving files that have no catalog identity
pub const UNKNOWN_ID: &str = "UNKNOWNID";

/// Suffix of in-flight downloads, renamed away once verified
pub const PARTIAL_SUFFIX: &str = ".part";
pub const DOWNLOAD_CHUNK_SIZE: usize = 64 * 1024;

/// Nested `configFile` references followed before giving up
pub const MAX_CONFIG_DEPTH: usize = 8;
