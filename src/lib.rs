//! olmappy - keeps a local mirror of an Overload map catalog
//!
//! The library holds the catalog engine: validation, filtering, the local
//! index, reconciliation against the remote catalog and file placement. The
//! `olmappy` binary wraps it in a command line.

pub mod constants;
pub mod error;
pub mod filter;
pub mod index;
pub mod placement;
pub mod reconcile;
pub mod remote;
pub mod settings;
pub mod sync;
pub mod types;
pub mod utils;
pub mod validate;

pub use error::{ConfigError, Error, Result, ValidationError};
pub use filter::{MapFilter, StringMatch};
pub use index::LocalIndex;
pub use placement::Layout;
pub use remote::{HttpMapServer, MapServer, RemoteCatalog};
pub use settings::Settings;
pub use sync::{HideImportReport, HideReport, ImportReport, Mirror, MirrorOptions, UpdateReport};
pub use types::{Level, MapEntry, MapType};
