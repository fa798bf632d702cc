//! Remote map server access and the validated remote catalog

use crate::constants::{APP_NAME, APP_VERSION, DOWNLOAD_CHUNK_SIZE};
use crate::error::{ConfigError, Error, Result};
use crate::index::names_equal;
use crate::settings::Settings;
use crate::types::MapEntry;
use crate::validate::{validate_all, Origin};
use serde_json::Value;
use std::io::{Read, Write};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Transport used to reach the map server
pub trait MapServer {
    /// Location of the catalog, for messages
    fn catalog_url(&self) -> String;

    /// Fetch the raw catalog; anything but a 2xx JSON array is an error
    fn fetch_catalog(&self) -> Result<Vec<Value>>;

    /// Stream the map at `url_path` into `out`, returning the bytes written
    fn download(&self, url_path: &str, out: &mut dyn Write) -> Result<u64>;
}

/// Map server reached over HTTP(S)
pub struct HttpMapServer {
    client: reqwest::blocking::Client,
    base_url: String,
    list_path: String,
}

impl HttpMapServer {
    pub fn new(settings: &Settings) -> Result<Self> {
        let timeout = match settings.request_timeout_secs {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        };
        let mut builder = reqwest::blocking::Client::builder()
            .user_agent(format!("{}/{}", APP_NAME, APP_VERSION))
            .timeout(timeout)
            .danger_accept_invalid_certs(!settings.verify_certificates);

        if !settings.certificate_bundle.is_empty() {
            let path = std::path::PathBuf::from(&settings.certificate_bundle);
            let pem = std::fs::read(&path).map_err(|source| ConfigError::Read {
                path: path.clone(),
                source,
            })?;
            let cert = reqwest::Certificate::from_pem(&pem).map_err(|e| ConfigError::InvalidValue {
                name: "certificateBundle".into(),
                value: settings.certificate_bundle.clone(),
                message: e.to_string(),
            })?;
            builder = builder.add_root_certificate(cert);
        }

        let client = builder
            .build()
            .map_err(|e| Error::transfer(&settings.map_server, e))?;
        Ok(Self {
            client,
            base_url: settings.map_server.trim_end_matches('/').to_string(),
            list_path: settings.map_server_list_url.clone(),
        })
    }

    fn url_for(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }
}

impl MapServer for HttpMapServer {
    fn catalog_url(&self) -> String {
        self.url_for(&self.list_path)
    }

    fn fetch_catalog(&self) -> Result<Vec<Value>> {
        let url = self.catalog_url();
        debug!(%url, "Querying remote map list");
        let response = self
            .client
            .get(&url)
            .send()
            .map_err(|e| Error::transfer(&url, e))?;
        if !response.status().is_success() {
            return Err(Error::transfer(&url, format!("HTTP {}", response.status())));
        }
        response
            .json::<Vec<Value>>()
            .map_err(|e| Error::parse(format!("remote json map list {}", url), e))
    }

    fn download(&self, url_path: &str, out: &mut dyn Write) -> Result<u64> {
        let url = self.url_for(url_path);
        debug!(%url, "Attempting to download");
        let mut response = self
            .client
            .get(&url)
            .send()
            .map_err(|e| Error::transfer(&url, e))?;
        if !response.status().is_success() {
            return Err(Error::transfer(&url, format!("HTTP {}", response.status())));
        }

        let mut buf = vec![0u8; DOWNLOAD_CHUNK_SIZE];
        let mut written: u64 = 0;
        loop {
            let n = response.read(&mut buf).map_err(|e| Error::transfer(&url, e))?;
            if n == 0 {
                break;
            }
            out.write_all(&buf[..n])
                .map_err(|e| Error::transfer(&url, format!("write failed: {}", e)))?;
            written += n as u64;
        }
        out.flush()
            .map_err(|e| Error::transfer(&url, format!("write failed: {}", e)))?;
        Ok(written)
    }
}

/// Validated, deduplicated view of the remote catalog
#[derive(Debug, Clone)]
pub struct RemoteCatalog {
    url: String,
    entries: Vec<MapEntry>,
    filename_case_sensitive: bool,
}

impl RemoteCatalog {
    /// Fetch and validate the catalog. A catalog without a single valid
    /// record is an error.
    pub fn fetch(server: &dyn MapServer, filename_case_sensitive: bool, now: f64) -> Result<Self> {
        let url = server.catalog_url();
        let values = server.fetch_catalog()?;
        info!(%url, entries = values.len(), "Retrieved remote map list");
        let catalog = Self::from_entries(
            url.clone(),
            validate_all(values, Origin::Remote, now),
            filename_case_sensitive,
        );
        if catalog.entries.is_empty() {
            warn!(%url, "Remote map list has no valid entries");
            return Err(Error::EmptyCatalog { url });
        }
        info!(%url, unique = catalog.entries.len(), "Remote map list ready");
        Ok(catalog)
    }

    /// Build from validated entries; records sharing a file name collapse
    /// into the most recently modified one.
    pub fn from_entries(url: String, validated: Vec<MapEntry>, filename_case_sensitive: bool) -> Self {
        let mut entries: Vec<MapEntry> = Vec::with_capacity(validated.len());
        for entry in validated {
            let existing = entries
                .iter()
                .position(|m| names_equal(&m.filename, &entry.filename, filename_case_sensitive));
            match existing {
                None => entries.push(entry),
                Some(pos) if entries[pos].mtime < entry.mtime => {
                    warn!(map = %entry.label(), older = %entries[pos].label(), "Remote map is newer than conflicting map, replacing it");
                    entries[pos] = entry;
                }
                Some(pos) => {
                    warn!(map = %entry.label(), newer = %entries[pos].label(), "Remote map is older than conflicting map, ignoring it");
                }
            }
        }
        Self {
            url,
            entries,
            filename_case_sensitive,
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn entries(&self) -> &[MapEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn find_by_filename(&self, filename: &str) -> Option<&MapEntry> {
        self.entries
            .iter()
            .find(|m| names_equal(&m.filename, filename, self.filename_case_sensitive))
    }
}
