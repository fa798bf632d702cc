//! Local index of the maps present in the mirror, persisted as a JSON list

use crate::constants::UNKNOWN_ID;
use crate::error::{Error, Result, ValidationError};
use crate::placement::{files_identical, Layout};
use crate::types::MapEntry;
use crate::validate::{validate_all, Origin};
use serde_json::Value;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Compare file names, optionally ignoring case
pub fn names_equal(a: &str, b: &str, case_sensitive: bool) -> bool {
    if case_sensitive {
        a == b
    } else {
        a.to_lowercase() == b.to_lowercase()
    }
}

/// Read a JSON map list without validating the records
pub fn read_map_list(path: &Path) -> Result<Vec<Value>> {
    let text = fs::read_to_string(path).map_err(|e| Error::io(path, e))?;
    let list: Vec<Value> = serde_json::from_str(&text)
        .map_err(|e| Error::parse(format!("json map list {}", path.display()), e))?;
    debug!(path = %path.display(), entries = list.len(), "Read json map list");
    Ok(list)
}

/// Write a JSON map list in full, replacing the previous file atomically
pub fn write_map_list(path: &Path, entries: &[MapEntry]) -> Result<()> {
    let json = serde_json::to_string_pretty(entries).map_err(|e| Error::JsonWrite {
        path: path.to_path_buf(),
        message: e.to_string(),
    })?;

    let temp_name = format!(
        ".{}.{}.tmp",
        path.file_name()
            .map(|n| n.to_string_lossy())
            .unwrap_or_default(),
        std::process::id()
    );
    let temp_path = path.with_file_name(temp_name);

    let mut file = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(&temp_path)
        .map_err(|e| Error::io(&temp_path, e))?;
    file.write_all(json.as_bytes())
        .and_then(|_| file.sync_all())
        .map_err(|e| {
            let _ = fs::remove_file(&temp_path);
            Error::io(&temp_path, e)
        })?;
    fs::rename(&temp_path, path).map_err(|e| Error::io(path, e))?;

    debug!(path = %path.display(), entries = entries.len(), "Wrote json map list");
    Ok(())
}

/// Check that the file backing `entry` exists with the recorded size
pub fn check_backing_file(layout: &Layout, entry: &MapEntry) -> std::result::Result<(), ValidationError> {
    let path = layout.current_path(entry);
    let actual = fs::metadata(&path)
        .map_err(|_| ValidationError::MissingFile(path.clone()))?
        .len();
    if entry.size < 0 || actual != entry.size as u64 {
        return Err(ValidationError::SizeMismatch {
            expected: entry.size,
            actual,
        });
    }
    Ok(())
}

/// Remove or archive a copy of `entry` sitting at its opposite placement
fn resolve_shadow(layout: &Layout, entry: &MapEntry) {
    let path = layout.current_path(entry);
    let shadow = layout.resolve(entry, !entry.is_hidden(), false);
    if !shadow.is_file() {
        return;
    }
    debug!(shadow = %shadow.display(), path = %path.display(), "File present but shadowed");
    match files_identical(&path, &shadow) {
        Ok(true) => {
            info!(shadow = %shadow.display(), "Deleting shadow copy");
            if let Err(e) = fs::remove_file(&shadow) {
                warn!(shadow = %shadow.display(), error = %e, "Failed to delete shadow copy");
            }
        }
        Ok(false) => {
            warn!(shadow = %shadow.display(), "Shadow copy differs, replacing it");
            if let Err(e) = layout.archive_file(&shadow, UNKNOWN_ID) {
                warn!(shadow = %shadow.display(), error = %e, "Failed to replace shadow copy");
            }
        }
        Err(e) => warn!(shadow = %shadow.display(), error = %e, "Failed to compare shadow copy"),
    }
}

/// The set of maps believed to exist on disk.
///
/// The index is the only writer of its backing file and only ever swaps
/// whole entries.
#[derive(Debug)]
pub struct LocalIndex {
    entries: Vec<MapEntry>,
    path: PathBuf,
    filename_case_sensitive: bool,
    loaded: bool,
}

impl LocalIndex {
    /// Empty, not yet loaded index persisted at `path`
    pub fn new(path: impl Into<PathBuf>, filename_case_sensitive: bool) -> Self {
        Self {
            entries: Vec::new(),
            path: path.into(),
            filename_case_sensitive,
            loaded: false,
        }
    }

    /// Load the index of `layout` and revalidate it against the files on disk.
    ///
    /// An unreadable or corrupt index file yields an empty, loaded index.
    pub fn load(layout: &Layout, filename_case_sensitive: bool, now: f64) -> Self {
        let mut index = Self::new(layout.index_path(), filename_case_sensitive);
        let values = match read_map_list(&index.path) {
            Ok(values) => values,
            Err(e) => {
                warn!(path = %index.path.display(), error = %e, "Map list could not be read, starting empty");
                Vec::new()
            }
        };
        index.loaded = true;

        let total = values.len();
        let checked: Vec<MapEntry> = validate_all(values, Origin::Local, now)
            .into_iter()
            .filter(|entry| match check_backing_file(layout, entry) {
                Ok(()) => true,
                Err(e) => {
                    warn!(map = %entry.label(), error = %e, "Failed to validate local map");
                    false
                }
            })
            .collect();
        if checked.len() < total {
            warn!(invalid = total - checked.len(), total, "Local map list has entries that were not correct");
        }

        for entry in checked {
            let existing = index
                .position_by_id(&entry.id)
                .or_else(|| index.position_by_filename(&entry.filename));
            match existing {
                None => {
                    resolve_shadow(layout, &entry);
                    index.entries.push(entry);
                }
                Some(pos) if index.entries[pos].same_content(&entry) => {
                    warn!(map = %index.entries[pos].label(), "Map is already present, ignoring duplicate");
                }
                Some(pos) => {
                    warn!(
                        map = %index.entries[pos].label(),
                        conflicting = %entry.label(),
                        "Map is already present, ignoring conflicting entry"
                    );
                }
            }
        }
        debug!(unique = index.entries.len(), "Local map list loaded");
        index
    }

    pub fn is_loaded(&self) -> bool {
        self.loaded
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn filename_case_sensitive(&self) -> bool {
        self.filename_case_sensitive
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[MapEntry] {
        &self.entries
    }

    pub fn get(&self, pos: usize) -> Option<&MapEntry> {
        self.entries.get(pos)
    }

    pub fn position_by_id(&self, id: &str) -> Option<usize> {
        self.entries.iter().position(|m| m.id == id)
    }

    pub fn position_by_filename(&self, filename: &str) -> Option<usize> {
        self.entries
            .iter()
            .position(|m| names_equal(&m.filename, filename, self.filename_case_sensitive))
    }

    pub fn find_by_id(&self, id: &str) -> Option<&MapEntry> {
        self.position_by_id(id).map(|pos| &self.entries[pos])
    }

    pub fn find_by_filename(&self, filename: &str) -> Option<&MapEntry> {
        self.position_by_filename(filename).map(|pos| &self.entries[pos])
    }

    pub fn find_by_url(&self, url: &str) -> Option<&MapEntry> {
        self.entries.iter().find(|m| m.url == url)
    }

    /// Look up by the decorated name a map has while hidden
    pub fn find_by_hidden_filename(&self, name: &str) -> Option<&MapEntry> {
        self.entries.iter().find(|m| {
            let hidden = Layout::decorated_name(&m.filename, &m.id, true, false);
            names_equal(&hidden, name, self.filename_case_sensitive)
        })
    }

    pub fn insert(&mut self, entry: MapEntry) {
        self.entries.push(entry);
    }

    pub fn remove(&mut self, pos: usize) -> MapEntry {
        self.entries.remove(pos)
    }

    /// Swap the entry at `pos` for `entry`, returning the old one
    pub fn replace(&mut self, pos: usize, entry: MapEntry) -> MapEntry {
        std::mem::replace(&mut self.entries[pos], entry)
    }

    /// Replace `previous` (matched by id and file name) with `entry`
    pub fn supersede(&mut self, previous: &MapEntry, entry: MapEntry) {
        let pos = self.entries.iter().position(|m| {
            m.id == previous.id && names_equal(&m.filename, &previous.filename, self.filename_case_sensitive)
        });
        match pos {
            Some(pos) => {
                self.entries.remove(pos);
            }
            None => debug!(map = %previous.label(), "Superseded map was no longer indexed"),
        }
        self.entries.push(entry);
    }

    /// Persist the whole index
    pub fn save(&self) -> Result<()> {
        write_map_list(&self.path, &self.entries)?;
        info!(path = %self.path.display(), entries = self.entries.len(), "Wrote map list");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Level, MapType};
    use serde_json::json;
    use tempfile::TempDir;

    fn entry(id: &str, filename: &str, size: i64, hidden: u8) -> MapEntry {
        MapEntry {
            id: id.into(),
            url: format!("/data/{}/{}", id, filename),
            filename_encoded: filename.into(),
            filename: filename.into(),
            size,
            mtime: 100.0,
            levels: vec![Level {
                kind: MapType::SinglePlayer,
                name: "L".into(),
            }],
            types: 1,
            names: vec!["L".into()],
            hidden,
        }
    }

    fn setup() -> (TempDir, Layout) {
        let temp = TempDir::new().unwrap();
        let layout = Layout::new(temp.path());
        layout.ensure_dirs().unwrap();
        (temp, layout)
    }

    fn place(layout: &Layout, m: &MapEntry, content: &[u8]) {
        fs::write(layout.current_path(m), content).unwrap();
    }

    #[test]
    fn test_missing_index_loads_empty() {
        let (_temp, layout) = setup();
        let index = LocalIndex::load(&layout, true, 0.0);
        assert!(index.is_loaded());
        assert!(index.is_empty());
    }

    #[test]
    fn test_corrupt_index_loads_empty() {
        let (_temp, layout) = setup();
        fs::write(layout.index_path(), "{ not json").unwrap();
        let index = LocalIndex::load(&layout, true, 0.0);
        assert!(index.is_loaded());
        assert!(index.is_empty());
    }

    #[test]
    fn test_save_and_reload() {
        let (_temp, layout) = setup();
        let visible = entry("1", "One.lvl", 3, 0);
        let hidden = entry("2", "Two.lvl", 4, 1);
        place(&layout, &visible, b"abc");
        place(&layout, &hidden, b"abcd");

        let mut index = LocalIndex::new(layout.index_path(), true);
        index.insert(visible.clone());
        index.insert(hidden.clone());
        index.save().unwrap();

        let reloaded = LocalIndex::load(&layout, true, 0.0);
        assert_eq!(reloaded.entries(), &[visible, hidden]);
    }

    #[test]
    fn test_revalidation_drops_missing_and_mismatched_files() {
        let (_temp, layout) = setup();
        let good = entry("1", "Good.lvl", 3, 0);
        let wrong_size = entry("2", "Wrong.lvl", 10, 0);
        let missing = entry("3", "Missing.lvl", 3, 0);
        place(&layout, &good, b"abc");
        place(&layout, &wrong_size, b"abc");
        write_map_list(&layout.index_path(), &[good.clone(), wrong_size, missing]).unwrap();

        let index = LocalIndex::load(&layout, true, 0.0);
        assert_eq!(index.entries(), &[good]);
    }

    #[test]
    fn test_duplicates_are_dropped() {
        let (_temp, layout) = setup();
        let first = entry("1", "Same.lvl", 3, 0);
        let same_id = entry("1", "Same.lvl", 3, 0);
        let same_name = entry("9", "Same.lvl", 3, 0);
        place(&layout, &first, b"abc");
        write_map_list(&layout.index_path(), &[first.clone(), same_id, same_name]).unwrap();

        let index = LocalIndex::load(&layout, true, 0.0);
        assert_eq!(index.entries(), &[first]);
        assert!(layout.current_path(&index.entries()[0]).exists());
    }

    #[test]
    fn test_invalid_records_are_dropped() {
        let (_temp, layout) = setup();
        let good = entry("1", "Good.lvl", 3, 0);
        place(&layout, &good, b"abc");
        let list = json!([good, {"url": "nope"}]);
        fs::write(layout.index_path(), list.to_string()).unwrap();

        let index = LocalIndex::load(&layout, true, 0.0);
        assert_eq!(index.len(), 1);
    }

    #[test]
    fn test_identical_shadow_copy_is_deleted() {
        let (_temp, layout) = setup();
        let m = entry("1", "One.lvl", 3, 1);
        place(&layout, &m, b"abc");
        let shadow = layout.resolve(&m, false, false);
        fs::write(&shadow, b"abc").unwrap();
        write_map_list(&layout.index_path(), &[m]).unwrap();

        let index = LocalIndex::load(&layout, true, 0.0);
        assert_eq!(index.len(), 1);
        assert!(!shadow.exists());
    }

    #[test]
    fn test_differing_shadow_copy_is_archived() {
        let (_temp, layout) = setup();
        let m = entry("1", "One.lvl", 3, 0);
        place(&layout, &m, b"abc");
        let shadow = layout.resolve(&m, true, false);
        fs::write(&shadow, b"other").unwrap();
        write_map_list(&layout.index_path(), &[m]).unwrap();

        LocalIndex::load(&layout, true, 0.0);
        assert!(!shadow.exists());
        let archived = layout
            .replaced_dir()
            .join(format!("One.lvl_1_hidden_{}_replaced", UNKNOWN_ID));
        assert_eq!(fs::read(archived).unwrap(), b"other");
    }

    #[test]
    fn test_dropped_duplicate_leaves_files_alone() {
        let (_temp, layout) = setup();
        let kept = entry("1", "One.lvl", 3, 0);
        let dropped = entry("9", "One.lvl", 3, 1);
        place(&layout, &kept, b"abc");
        place(&layout, &dropped, b"abc");
        write_map_list(&layout.index_path(), &[kept.clone(), dropped.clone()]).unwrap();

        let index = LocalIndex::load(&layout, true, 0.0);
        assert_eq!(index.entries(), &[kept.clone()]);
        assert!(layout.current_path(&kept).exists());
        assert!(layout.current_path(&dropped).exists());
    }

    #[test]
    fn test_lookups() {
        let mut index = LocalIndex::new("unused.json", false);
        index.insert(entry("42", "MyMap.lvl", 3, 1));
        assert!(index.find_by_id("42").is_some());
        assert!(index.find_by_filename("mymap.LVL").is_some());
        assert!(index.find_by_hidden_filename("MyMap.lvl_42_hidden").is_some());
        assert!(index.find_by_url("/data/42/MyMap.lvl").is_some());
        assert!(index.find_by_id("43").is_none());

        let strict = LocalIndex::new("unused.json", true);
        assert!(strict.find_by_filename("mymap.LVL").is_none());
    }

    #[test]
    fn test_supersede_swaps_whole_entry() {
        let mut index = LocalIndex::new("unused.json", true);
        let old = entry("42", "MyMap.lvl", 3, 0);
        index.insert(entry("1", "Other.lvl", 3, 0));
        index.insert(old.clone());
        let mut new = old.clone();
        new.mtime = 200.0;
        index.supersede(&old, new.clone());
        assert_eq!(index.len(), 2);
        assert_eq!(index.find_by_id("42"), Some(&new));
    }
}
