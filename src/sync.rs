//! Mirror operations: import, update, hide/unhide, hide-import and listings

use crate::constants::{PARTIAL_SUFFIX, UNKNOWN_ID};
use crate::error::{Error, Result};
use crate::filter::MapFilter;
use crate::index::{check_backing_file, write_map_list, LocalIndex};
use crate::placement::{move_file, strip_decoration, Layout};
use crate::reconcile::{reconcile, Reconciled};
use crate::remote::{MapServer, RemoteCatalog};
use crate::settings::Settings;
use crate::types::{MapEntry, RawMapRecord};
use crate::utils::{format_bytes, now_timestamp};
use serde_json::Value;
use std::fmt;
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Mirror behaviour taken from the settings
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MirrorOptions {
    pub filename_case_sensitive: bool,
    pub remove_unknown_maps: bool,
    pub auto_import: bool,
}

impl Default for MirrorOptions {
    fn default() -> Self {
        Self {
            filename_case_sensitive: true,
            remove_unknown_maps: false,
            auto_import: true,
        }
    }
}

impl From<&Settings> for MirrorOptions {
    fn from(settings: &Settings) -> Self {
        Self {
            filename_case_sensitive: settings.filename_case_sensitive,
            remove_unknown_maps: settings.remove_unknown_maps,
            auto_import: settings.auto_import,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ImportReport {
    pub imported: usize,
    pub already: usize,
    pub ignored: usize,
    pub archived: usize,
    pub mismatched: usize,
    pub filtered: usize,
    pub failed: usize,
}

impl ImportReport {
    fn add(&mut self, other: ImportReport) {
        self.imported += other.imported;
        self.already += other.already;
        self.ignored += other.ignored;
        self.archived += other.archived;
        self.mismatched += other.mismatched;
        self.filtered += other.filtered;
        self.failed += other.failed;
    }
}

impl fmt::Display for ImportReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "IMPORT: {} imported, {} already indexed, {} ignored, {} replaced, {} mismatched, {} filtered, {} failed to import",
            self.imported, self.already, self.ignored, self.archived, self.mismatched, self.filtered, self.failed
        )
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UpdateReport {
    pub new: usize,
    pub updated: usize,
    pub failed: usize,
    pub unchanged: usize,
    pub archived: usize,
    pub filtered: usize,
    /// Result of the import pass run before updating, if any
    pub import: Option<ImportReport>,
}

impl fmt::Display for UpdateReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "UPDATE: {} new, {} updated, {} failed, {} unchanged, {} archived, {} filtered",
            self.new, self.updated, self.failed, self.unchanged, self.archived, self.filtered
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HideReport {
    pub hide: bool,
    pub changed: usize,
    pub already: usize,
    pub unchanged: usize,
    pub failed: usize,
}

impl fmt::Display for HideReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (name, state) = if self.hide { ("HIDE", "hidden") } else { ("UNHIDE", "unhidden") };
        write!(
            f,
            "{}: {} {}, {} already {}, {} unchanged, {} failed to {}",
            name,
            self.changed,
            state,
            self.already,
            state,
            self.unchanged,
            self.failed,
            name.to_lowercase()
        )
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HideImportReport {
    pub hidden: usize,
    pub unhidden: usize,
    pub unchanged: usize,
    pub not_present: usize,
    pub filtered: usize,
    pub invalid: usize,
    pub failed: usize,
}

impl fmt::Display for HideImportReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "HIDEIMPORT: {} hidden, {} unhidden, {} unchanged, {} not present, {} filtered, {} invalid, {} failed to change",
            self.hidden, self.unhidden, self.unchanged, self.not_present, self.filtered, self.invalid, self.failed
        )
    }
}

/// Files of one mirror directory that the index doesn't know about
#[derive(Debug, Default)]
struct DirScan {
    unindexed: Vec<String>,
    already: usize,
    failed: usize,
}

/// A local map mirror bound to a map server.
///
/// The remote catalog is fetched at most once, on first use.
pub struct Mirror<S: MapServer> {
    layout: Layout,
    index: LocalIndex,
    server: S,
    remote: Option<RemoteCatalog>,
    options: MirrorOptions,
    now: f64,
}

impl<S: MapServer> Mirror<S> {
    /// Create the mirror directories if needed and load the index
    pub fn open(layout: Layout, server: S, options: MirrorOptions) -> Result<Self> {
        layout.ensure_dirs()?;
        let now = now_timestamp();
        let index = LocalIndex::load(&layout, options.filename_case_sensitive, now);
        info!(root = %layout.root().display(), maps = index.len(), "Opened map mirror");
        Ok(Self {
            layout,
            index,
            server,
            remote: None,
            options,
            now,
        })
    }

    pub fn layout(&self) -> &Layout {
        &self.layout
    }

    pub fn index(&self) -> &LocalIndex {
        &self.index
    }

    pub fn server(&self) -> &S {
        &self.server
    }

    /// Persist the index now
    pub fn save(&self) -> Result<()> {
        self.index.save()
    }

    fn persist(&self) {
        if let Err(e) = self.index.save() {
            warn!(error = %e, "Map list could not be saved");
        }
    }

    fn take_remote(&mut self) -> Result<RemoteCatalog> {
        match self.remote.take() {
            Some(catalog) => Ok(catalog),
            None => RemoteCatalog::fetch(&self.server, self.options.filename_case_sensitive, self.now),
        }
    }

    /// The remote catalog, fetched on first call
    pub fn remote(&mut self) -> Result<&RemoteCatalog> {
        let catalog = self.take_remote()?;
        Ok(&*self.remote.insert(catalog))
    }

    // ---- update ----

    /// Bring every filtered remote map into the mirror.
    ///
    /// Runs an import first when auto-import is on. Per-map failures are
    /// logged and counted; the index is written after every change.
    pub fn update(&mut self, filter: &MapFilter) -> Result<UpdateReport> {
        let mut report = UpdateReport::default();
        if self.options.auto_import {
            report.import = Some(self.import(filter)?);
        }

        let remote = self.take_remote()?;
        for candidate in remote.entries() {
            if !filter.matches(candidate) {
                report.filtered += 1;
                continue;
            }
            let mut incoming = candidate.clone();
            let previous = match reconcile(&mut incoming, &mut self.index, &self.layout) {
                Ok(Reconciled::Unchanged) => {
                    report.unchanged += 1;
                    continue;
                }
                Ok(Reconciled::New { archived }) => {
                    if archived > 0 {
                        report.archived += archived;
                        self.persist();
                    }
                    incoming.hidden = 0;
                    None
                }
                Ok(Reconciled::Updated { previous }) => Some(previous),
                Err(e) => {
                    warn!(map = %incoming.label(), error = %e, "Remote map could not be updated");
                    report.failed += 1;
                    continue;
                }
            };

            if let Err(e) = self.fetch_map(&mut incoming) {
                warn!(map = %incoming.label(), error = %e, "Remote map could not be updated");
                report.failed += 1;
                continue;
            }
            debug!(map = %incoming.label(), "Successfully added map");
            match previous {
                Some(previous) => {
                    self.index.supersede(&previous, incoming);
                    report.updated += 1;
                }
                None => {
                    self.index.insert(incoming);
                    report.new += 1;
                }
            }
            self.persist();
        }
        self.remote = Some(remote);

        info!("{}", report);
        Ok(report)
    }

    /// Download `entry` to its placement through a partial file.
    ///
    /// The partial file only replaces the target once its size checks out. An
    /// unknown size is taken from the download.
    fn fetch_map(&self, entry: &mut MapEntry) -> Result<()> {
        let target = self.layout.current_path(entry);
        let part = partial_path(&target);
        info!(map = %entry.label(), path = %target.display(), "Downloading map");

        let written = match self.download_to(&entry.url, &part) {
            Ok(n) => n,
            Err(e) => {
                let _ = fs::remove_file(&part);
                return Err(e);
            }
        };
        debug!(map = %entry.label(), size = %format_bytes(written), "Download finished");
        if entry.size < 0 {
            entry.size = written as i64;
        } else if written != entry.size as u64 {
            let _ = fs::remove_file(&part);
            return Err(Error::update(
                entry.label(),
                format!("downloaded {} bytes, expected {}", written, entry.size),
            ));
        }

        if target.is_file() && !self.is_indexed_path(&target) {
            if let Err(e) = self.layout.archive_file(&target, UNKNOWN_ID) {
                let _ = fs::remove_file(&part);
                return Err(e);
            }
        }
        fs::rename(&part, &target).map_err(|e| {
            let _ = fs::remove_file(&part);
            Error::io(&target, e)
        })?;

        if let Err(e) = check_backing_file(&self.layout, entry) {
            let _ = fs::remove_file(&target);
            return Err(Error::update(entry.label(), e.to_string()));
        }
        Ok(())
    }

    fn download_to(&self, url: &str, part: &Path) -> Result<u64> {
        let mut file = File::create(part).map_err(|e| Error::io(part, e))?;
        let written = self.server.download(url, &mut file)?;
        file.sync_all().map_err(|e| Error::io(part, e))?;
        Ok(written)
    }

    fn is_indexed_path(&self, path: &Path) -> bool {
        self.index
            .entries()
            .iter()
            .any(|m| self.layout.current_path(m) == path)
    }

    // ---- import ----

    /// Adopt files already in the mirror that the index doesn't list yet.
    ///
    /// Files are matched by name against the remote catalog. Unmatched files
    /// are archived when `remove_unknown_maps` is set, otherwise ignored.
    pub fn import(&mut self, filter: &MapFilter) -> Result<ImportReport> {
        let remote = self.take_remote()?;
        let mut report = ImportReport::default();
        let root = self.layout.root().to_path_buf();
        let hidden_dir = self.layout.hidden_dir();
        report.add(self.import_dir(&root, false, &remote, filter));
        report.add(self.import_dir(&hidden_dir, true, &remote, filter));
        self.remote = Some(remote);

        info!("{}", report);
        Ok(report)
    }

    fn import_dir(&mut self, dir: &Path, hidden: bool, remote: &RemoteCatalog, filter: &MapFilter) -> ImportReport {
        let scan = self.unindexed_files(dir, hidden);
        let mut report = ImportReport {
            already: scan.already,
            failed: scan.failed,
            ..ImportReport::default()
        };

        for fname in scan.unindexed {
            let path = dir.join(&fname);
            debug!(path = %path.display(), "IMPORT: file not yet known");
            let lookup = if hidden { strip_decoration(&fname) } else { Some(fname.clone()) };
            let found = lookup.as_deref().and_then(|name| remote.find_by_filename(name));

            let Some(found) = found else {
                if self.options.remove_unknown_maps {
                    match self.layout.archive_file(&path, UNKNOWN_ID) {
                        Ok(outcome) => {
                            info!(path = %path.display(), archive = %outcome.path().display(), "IMPORT: file not on remote map list, replaced");
                            report.archived += 1;
                        }
                        Err(e) => {
                            warn!(path = %path.display(), error = %e, "IMPORT: file not on remote map list, failed to replace");
                            report.failed += 1;
                        }
                    }
                } else {
                    info!(path = %path.display(), "IMPORT: file not on remote map list, ignoring");
                    report.ignored += 1;
                }
                continue;
            };

            if !filter.matches(found) {
                debug!(path = %path.display(), "IMPORT: file filtered out");
                report.filtered += 1;
                continue;
            }
            if let Some(existing) = self
                .index
                .find_by_id(&found.id)
                .or_else(|| self.index.find_by_filename(&found.filename))
            {
                warn!(path = %path.display(), existing = %existing.label(), "IMPORT: map is already indexed under another file, ignoring");
                report.ignored += 1;
                continue;
            }

            let mut entry = found.clone();
            entry.hidden = u8::from(hidden);
            match check_backing_file(&self.layout, &entry) {
                Ok(()) => {
                    info!(path = %path.display(), map = %entry.label(), "IMPORT: file imported");
                    self.index.insert(entry);
                    self.persist();
                    report.imported += 1;
                }
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "IMPORT: file did not match info from server");
                    report.mismatched += 1;
                }
            }
        }
        debug!(dir = %dir.display(), "{}", report);
        report
    }

    /// Regular files in `dir` that are not indexed, sorted by name
    fn unindexed_files(&self, dir: &Path, hidden: bool) -> DirScan {
        let mut scan = DirScan::default();
        let read_dir = match fs::read_dir(dir) {
            Ok(rd) => rd,
            Err(e) => {
                warn!(dir = %dir.display(), error = %e, "Failed to scan directory");
                return scan;
            }
        };
        let index_name = self.index.path().file_name().map(|n| n.to_os_string());

        for dir_entry in read_dir {
            let dir_entry = match dir_entry {
                Ok(d) => d,
                Err(e) => {
                    warn!(dir = %dir.display(), error = %e, "Failed to classify directory entry");
                    scan.failed += 1;
                    continue;
                }
            };
            let path = dir_entry.path();
            match fs::symlink_metadata(&path) {
                Ok(meta) if meta.is_file() => {}
                Ok(_) => {
                    debug!(path = %path.display(), "Ignoring non-file");
                    continue;
                }
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Failed to classify file");
                    scan.failed += 1;
                    continue;
                }
            }
            let os_name = dir_entry.file_name();
            if Some(&os_name) == index_name.as_ref() {
                continue;
            }
            let name = os_name.to_string_lossy().into_owned();
            if is_scratch_file(&name) {
                continue;
            }

            let known = if hidden {
                self.index.find_by_hidden_filename(&name)
            } else {
                self.index.find_by_filename(&name)
            };
            match known {
                Some(_) => {
                    debug!(path = %path.display(), "File already in index");
                    scan.already += 1;
                }
                None => {
                    debug!(path = %path.display(), "File not in index");
                    scan.unindexed.push(name);
                }
            }
        }
        scan.unindexed.sort();
        scan
    }

    // ---- hide / unhide ----

    /// Hide (or unhide) every indexed map passing `filter`.
    ///
    /// Refuses an empty filter unless it was built with `apply_to_all`.
    pub fn set_hidden(&mut self, filter: &MapFilter, hide: bool) -> Result<HideReport> {
        let operation = if hide { "HIDE" } else { "UNHIDE" };
        if !filter.permits_bulk_change() {
            return Err(Error::EmptyFilter { operation });
        }

        let mut report = HideReport {
            hide,
            changed: 0,
            already: 0,
            unchanged: 0,
            failed: 0,
        };
        for pos in 0..self.index.len() {
            let Some(entry) = self.index.get(pos) else { break };
            if !filter.matches(entry) {
                report.unchanged += 1;
                continue;
            }
            if entry.is_hidden() == hide {
                debug!(map = %entry.label(), "{}: map is already {}", operation, state_name(hide));
                report.already += 1;
                continue;
            }
            match self.move_entry(pos, hide) {
                Ok(()) => report.changed += 1,
                Err(e) => {
                    warn!(error = %e, "{}: map failed to {}", operation, operation.to_lowercase());
                    report.failed += 1;
                }
            }
        }
        info!("{}", report);
        Ok(report)
    }

    /// Move the backing file of the entry at `pos` and swap in the flipped entry
    fn move_entry(&mut self, pos: usize, hide: bool) -> Result<()> {
        let Some(entry) = self.index.get(pos) else {
            return Ok(());
        };
        let src = self.layout.current_path(entry);
        let dst = self.layout.resolve(entry, hide, false);
        if src != dst {
            move_file(&src, &dst)?;
        }
        let mut moved = entry.clone();
        moved.hidden = u8::from(hide);
        info!(map = %moved.label(), "Map is now {}", state_name(hide).to_uppercase());
        self.index.replace(pos, moved);
        self.persist();
        Ok(())
    }

    // ---- hide-import ----

    /// Apply hidden states from an exported map list.
    ///
    /// Records are matched against the index by url, else id, else file name,
    /// and must agree with the local entry on size and mtime. The filter is
    /// applied to the matched local entry.
    pub fn hide_import(&mut self, filter: &MapFilter, records: Vec<Value>, reverse: bool) -> HideImportReport {
        let mut report = HideImportReport::default();
        for value in records {
            let shown = value.to_string();
            let record: RawMapRecord = match serde_json::from_value(value) {
                Ok(r) => r,
                Err(e) => {
                    warn!(record = %shown, error = %e, "HIDEIMPORT: map record is malformed, ignored as invalid");
                    report.invalid += 1;
                    continue;
                }
            };

            let pos = if let Some(url) = &record.url {
                self.index.entries().iter().position(|m| &m.url == url)
            } else if let Some(id) = &record.id {
                self.index.position_by_id(id)
            } else if let Some(filename) = &record.filename {
                self.index.position_by_filename(filename)
            } else {
                warn!(record = %shown, "HIDEIMPORT: map lacks a proper identification, ignored as invalid");
                report.invalid += 1;
                continue;
            };
            let Some(pos) = pos else {
                debug!(record = %shown, "HIDEIMPORT: map is not locally available, ignored");
                report.not_present += 1;
                continue;
            };
            let Some(local) = self.index.get(pos) else { continue };

            if !filter.matches(local) {
                report.filtered += 1;
                continue;
            }
            if record.size.is_some_and(|size| size != local.size) {
                warn!(map = %local.label(), "HIDEIMPORT: map has different size than ours, ignored as invalid");
                report.invalid += 1;
                continue;
            }
            if record.mtime.is_some_and(|mtime| mtime != local.mtime) {
                warn!(map = %local.label(), "HIDEIMPORT: map has different mtime than ours, ignored as invalid");
                report.invalid += 1;
                continue;
            }
            let Some(hidden) = record.hidden else {
                warn!(map = %local.label(), "HIDEIMPORT: map has no hidden state to import, ignored as invalid");
                report.invalid += 1;
                continue;
            };

            let hide = (hidden > 0) != reverse;
            if local.is_hidden() == hide {
                debug!(map = %local.label(), "HIDEIMPORT: map kept as {}", state_name(hide).to_uppercase());
                report.unchanged += 1;
                continue;
            }
            match self.move_entry(pos, hide) {
                Ok(()) if hide => report.hidden += 1,
                Ok(()) => report.unhidden += 1,
                Err(e) => {
                    warn!(error = %e, "HIDEIMPORT: map failed to change to {}", state_name(hide).to_uppercase());
                    report.failed += 1;
                }
            }
        }
        info!("{}", report);
        report
    }

    // ---- listings ----

    /// Indexed maps passing `filter`
    pub fn list_local(&self, filter: &MapFilter) -> Vec<&MapEntry> {
        let maps = filter.apply(self.index.entries());
        debug!(listed = maps.len(), total = self.index.len(), "LISTLOCAL");
        maps
    }

    /// Remote maps passing `filter`
    pub fn list_remote(&mut self, filter: &MapFilter) -> Result<Vec<MapEntry>> {
        let remote = self.remote()?;
        let maps: Vec<MapEntry> = filter.apply(remote.entries()).into_iter().cloned().collect();
        debug!(listed = maps.len(), total = remote.len(), "LISTREMOTE");
        Ok(maps)
    }

    /// Visible files that the index doesn't know about
    pub fn list_ignored(&self) -> Vec<String> {
        let scan = self.unindexed_files(self.layout.root(), false);
        debug!(ignored = scan.unindexed.len(), indexed = scan.already, failed = scan.failed, "LISTIGNORED");
        scan.unindexed
    }

    /// Write the filtered local entries as a map list to `path`
    pub fn export(&self, filter: &MapFilter, path: &Path) -> Result<usize> {
        let maps: Vec<MapEntry> = self.list_local(filter).into_iter().cloned().collect();
        write_map_list(path, &maps)?;
        info!(path = %path.display(), exported = maps.len(), "EXPORT: wrote map list");
        Ok(maps.len())
    }
}

fn state_name(hidden: bool) -> &'static str {
    if hidden {
        "hidden"
    } else {
        "unhidden"
    }
}

/// Sibling path a download is written to before it is moved into place
fn partial_path(target: &Path) -> PathBuf {
    let name = target
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    target.with_file_name(format!(".{}{}", name, PARTIAL_SUFFIX))
}

/// Our own temporaries: partial downloads and pending index writes
fn is_scratch_file(name: &str) -> bool {
    name.starts_with('.') && (name.ends_with(PARTIAL_SUFFIX) || name.ends_with(".tmp"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use std::io::Write;
    use tempfile::TempDir;

    struct NoServer;

    impl MapServer for NoServer {
        fn catalog_url(&self) -> String {
            "test://none".into()
        }

        fn fetch_catalog(&self) -> Result<Vec<Value>> {
            Err(Error::transfer("test://none", "offline"))
        }

        fn download(&self, url_path: &str, _out: &mut dyn Write) -> Result<u64> {
            Err(Error::transfer(url_path, "offline"))
        }
    }

    fn mirror(temp: &TempDir) -> Mirror<NoServer> {
        Mirror::open(Layout::new(temp.path()), NoServer, MirrorOptions::default()).unwrap()
    }

    #[test]
    fn test_partial_path_is_hidden_sibling() {
        assert_eq!(
            partial_path(Path::new("/maps/MyMap.lvl")),
            PathBuf::from("/maps/.MyMap.lvl.part")
        );
        assert!(is_scratch_file(".MyMap.lvl.part"));
        assert!(is_scratch_file(".olmappyIndex.json.42.tmp"));
        assert!(!is_scratch_file("MyMap.lvl"));
    }

    #[test]
    fn test_unindexed_files_skips_index_and_scratch() {
        let temp = TempDir::new().unwrap();
        let m = mirror(&temp);
        fs::write(temp.path().join("b.lvl"), b"b").unwrap();
        fs::write(temp.path().join("a.lvl"), b"a").unwrap();
        fs::write(temp.path().join(".c.lvl.part"), b"c").unwrap();
        m.save().unwrap();

        let scan = m.unindexed_files(temp.path(), false);
        assert_eq!(scan.unindexed, vec!["a.lvl".to_string(), "b.lvl".to_string()]);
        assert_eq!(m.list_ignored(), scan.unindexed);
    }

    #[test]
    fn test_offline_update_fails_as_a_whole() {
        let temp = TempDir::new().unwrap();
        let mut m = mirror(&temp);
        let err = m.update(&MapFilter::new()).unwrap_err();
        assert!(matches!(err, Error::Transfer { .. }));
        assert_eq!(err.exit_code(), 1);
    }

    #[test]
    fn test_empty_filter_refused_before_touching_anything() {
        let temp = TempDir::new().unwrap();
        let mut m = mirror(&temp);
        let err = m.set_hidden(&MapFilter::new(), true).unwrap_err();
        assert!(matches!(err, Error::EmptyFilter { operation: "HIDE" }));
        assert_eq!(err.exit_code(), 4);
        assert!(m.set_hidden(&MapFilter::new().apply_to_all(true), false).is_ok());
    }

    #[test]
    fn test_report_lines() {
        let report = HideReport {
            hide: true,
            changed: 0,
            already: 1,
            unchanged: 2,
            failed: 0,
        };
        assert_eq!(
            report.to_string(),
            "HIDE: 0 hidden, 1 already hidden, 2 unchanged, 0 failed to hide"
        );
        let update = UpdateReport {
            new: 1,
            ..UpdateReport::default()
        };
        assert!(update.to_string().starts_with("UPDATE: 1 new, 0 updated, 0 failed"));
    }
}
