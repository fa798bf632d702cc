//! File placement inside the mirror: visible, hidden and replaced locations

use crate::constants::*;
use crate::error::{Error, Result};
use crate::types::MapEntry;
use std::ffi::OsString;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Where an archived file ended up
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArchiveOutcome {
    /// Source was moved to this path
    Moved(PathBuf),
    /// An identical archive already existed at this path; the source was removed
    Deduplicated(PathBuf),
}

impl ArchiveOutcome {
    pub fn path(&self) -> &Path {
        match self {
            Self::Moved(p) | Self::Deduplicated(p) => p,
        }
    }
}

/// Directory layout of a map mirror
#[derive(Debug, Clone)]
pub struct Layout {
    root: PathBuf,
}

impl Layout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn hidden_dir(&self) -> PathBuf {
        self.root.join(HIDDEN_DIR)
    }

    pub fn replaced_dir(&self) -> PathBuf {
        self.root.join(REPLACED_DIR)
    }

    pub fn index_path(&self) -> PathBuf {
        self.root.join(INDEX_FILE_NAME)
    }

    /// Create the mirror root and its hidden/replaced subdirectories
    pub fn ensure_dirs(&self) -> Result<()> {
        for dir in [self.root.clone(), self.hidden_dir(), self.replaced_dir()] {
            fs::create_dir_all(&dir).map_err(|e| Error::io(&dir, e))?;
        }
        Ok(())
    }

    /// On-disk file name for a map in the given state
    pub fn decorated_name(filename: &str, id: &str, hidden: bool, replaced: bool) -> String {
        if replaced {
            format!("{}_{}{}", filename, id, REPLACED_SUFFIX)
        } else if hidden {
            format!("{}_{}{}", filename, id, HIDDEN_SUFFIX)
        } else {
            filename.to_string()
        }
    }

    /// Path of `entry` when placed as hidden and/or replaced; replaced wins
    pub fn resolve(&self, entry: &MapEntry, hidden: bool, replaced: bool) -> PathBuf {
        let name = Self::decorated_name(&entry.filename, &entry.id, hidden, replaced);
        if replaced {
            self.replaced_dir().join(name)
        } else if hidden {
            self.hidden_dir().join(name)
        } else {
            self.root.join(name)
        }
    }

    /// Path where `entry` currently lives according to its hidden flag
    pub fn current_path(&self, entry: &MapEntry) -> PathBuf {
        self.resolve(entry, entry.is_hidden(), false)
    }

    /// Move an indexed map's backing file into the replaced area
    pub fn archive_entry(&self, entry: &MapEntry) -> Result<ArchiveOutcome> {
        let src = self.current_path(entry);
        let dst = self.resolve(entry, false, true);
        archive(&src, &dst)
    }

    /// Move an arbitrary file into the replaced area, decorated with `id`
    pub fn archive_file(&self, src: &Path, id: &str) -> Result<ArchiveOutcome> {
        let basename = src
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let dst = self
            .replaced_dir()
            .join(Self::decorated_name(&basename, id, false, true));
        archive(src, &dst)
    }
}

/// Move `src` to `dst` without ever overwriting an existing archive.
///
/// An identical file already at the target makes the move unnecessary and the
/// source is deleted; a different one makes us retry as `dst_1`, `dst_2`, ...
pub fn archive(src: &Path, dst: &Path) -> Result<ArchiveOutcome> {
    warn!(src = %src.display(), dst = %dst.display(), "Replacing file");
    let mut target = dst.to_path_buf();
    let mut index = 1u32;
    loop {
        if target.is_file() {
            if files_identical(src, &target).map_err(|e| Error::io(&target, e))? {
                warn!(target = %target.display(), "Archive already exists and is identical, removing source only");
                fs::remove_file(src).map_err(|e| Error::io(src, e))?;
                return Ok(ArchiveOutcome::Deduplicated(target));
            }
            let mut name: OsString = dst.as_os_str().to_owned();
            name.push(format!("_{}", index));
            let next = PathBuf::from(name);
            index += 1;
            debug!(target = %target.display(), next = %next.display(), "Archive name taken, retrying");
            target = next;
        } else {
            fs::rename(src, &target).map_err(|e| Error::io(src, e))?;
            return Ok(ArchiveOutcome::Moved(target));
        }
    }
}

/// Rename `src` to `dst`, refusing to clobber an existing destination
pub fn move_file(src: &Path, dst: &Path) -> Result<()> {
    if dst.exists() {
        return Err(Error::io(
            dst,
            io::Error::new(io::ErrorKind::AlreadyExists, "destination already exists"),
        ));
    }
    fs::rename(src, dst).map_err(|e| Error::io(src, e))?;
    debug!(src = %src.display(), dst = %dst.display(), "Renamed map file");
    Ok(())
}

/// Byte-for-byte comparison of two files
pub fn files_identical(a: &Path, b: &Path) -> io::Result<bool> {
    if fs::metadata(a)?.len() != fs::metadata(b)?.len() {
        return Ok(false);
    }
    Ok(fs::read(a)? == fs::read(b)?)
}

/// Recover the catalog file name from a hidden or replaced file name.
///
/// `Foo.lvl_42_hidden` becomes `Foo.lvl`. Returns `None` for names that carry
/// no decoration or have no extension to anchor on.
pub fn strip_decoration(name: &str) -> Option<String> {
    let idx_last = name.rfind('_')?;
    if idx_last < 1 {
        return None;
    }
    let suffix = &name[idx_last..];
    if suffix != HIDDEN_SUFFIX && suffix != REPLACED_SUFFIX {
        return None;
    }
    let base = &name[..idx_last];
    let idx_dot = base.rfind('.')?;
    if idx_dot < 1 {
        return None;
    }
    match base.rfind('_') {
        Some(idx_id) if idx_id > idx_dot => Some(base[..idx_id].to_string()),
        _ => Some(base.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Level, MapType};
    use tempfile::TempDir;

    fn entry(id: &str, filename: &str) -> MapEntry {
        MapEntry {
            id: id.into(),
            url: format!("/{}/{}", id, filename),
            filename_encoded: filename.into(),
            filename: filename.into(),
            size: 4,
            mtime: 1.0,
            levels: vec![Level {
                kind: MapType::SinglePlayer,
                name: "L".into(),
            }],
            types: 1,
            names: vec!["L".into()],
            hidden: 0,
        }
    }

    #[test]
    fn test_resolve_paths() {
        let layout = Layout::new("/maps");
        let m = entry("42", "MyMap.lvl");
        assert_eq!(layout.resolve(&m, false, false), PathBuf::from("/maps/MyMap.lvl"));
        assert_eq!(
            layout.resolve(&m, true, false),
            PathBuf::from("/maps/hidden/MyMap.lvl_42_hidden")
        );
        assert_eq!(
            layout.resolve(&m, true, true),
            PathBuf::from("/maps/replaced/MyMap.lvl_42_replaced")
        );
    }

    #[test]
    fn test_strip_decoration() {
        assert_eq!(strip_decoration("MyMap.lvl_42_hidden").as_deref(), Some("MyMap.lvl"));
        assert_eq!(strip_decoration("My_Map.lvl_42_replaced").as_deref(), Some("My_Map.lvl"));
        assert_eq!(strip_decoration("MyMap.lvl_hidden").as_deref(), Some("MyMap.lvl"));
        assert_eq!(strip_decoration("MyMap.lvl"), None);
        assert_eq!(strip_decoration("MyMap.lvl_42_replaced_1"), None);
        assert_eq!(strip_decoration("noext_42_hidden"), None);
    }

    #[test]
    fn test_strip_inverts_decoration() {
        let name = Layout::decorated_name("Some Map.lvl", "1234", true, false);
        assert_eq!(strip_decoration(&name).as_deref(), Some("Some Map.lvl"));
    }

    #[test]
    fn test_archive_moves_when_free() {
        let temp = TempDir::new().unwrap();
        let layout = Layout::new(temp.path());
        layout.ensure_dirs().unwrap();
        let m = entry("42", "MyMap.lvl");
        fs::write(layout.current_path(&m), b"data").unwrap();

        let outcome = layout.archive_entry(&m).unwrap();
        assert_eq!(outcome, ArchiveOutcome::Moved(layout.resolve(&m, false, true)));
        assert!(!layout.current_path(&m).exists());
        assert_eq!(fs::read(outcome.path()).unwrap(), b"data");
    }

    #[test]
    fn test_archive_identical_removes_source() {
        let temp = TempDir::new().unwrap();
        let layout = Layout::new(temp.path());
        layout.ensure_dirs().unwrap();
        let m = entry("42", "MyMap.lvl");
        fs::write(layout.current_path(&m), b"data").unwrap();
        fs::write(layout.resolve(&m, false, true), b"data").unwrap();

        let outcome = layout.archive_entry(&m).unwrap();
        assert_eq!(outcome, ArchiveOutcome::Deduplicated(layout.resolve(&m, false, true)));
        assert!(!layout.current_path(&m).exists());
    }

    #[test]
    fn test_archive_different_gets_numeric_suffix() {
        let temp = TempDir::new().unwrap();
        let layout = Layout::new(temp.path());
        layout.ensure_dirs().unwrap();
        let m = entry("42", "MyMap.lvl");
        let replaced = layout.resolve(&m, false, true);
        fs::write(&replaced, b"old!").unwrap();
        fs::write(replaced.with_file_name("MyMap.lvl_42_replaced_1"), b"old2").unwrap();
        fs::write(layout.current_path(&m), b"new!").unwrap();

        let outcome = layout.archive_entry(&m).unwrap();
        let expected = replaced.with_file_name("MyMap.lvl_42_replaced_2");
        assert_eq!(outcome, ArchiveOutcome::Moved(expected.clone()));
        assert_eq!(fs::read(&replaced).unwrap(), b"old!");
        assert_eq!(fs::read(&expected).unwrap(), b"new!");
    }

    #[test]
    fn test_archive_missing_source_fails() {
        let temp = TempDir::new().unwrap();
        let layout = Layout::new(temp.path());
        layout.ensure_dirs().unwrap();
        assert!(layout.archive_entry(&entry("42", "Gone.lvl")).is_err());
    }

    #[test]
    fn test_move_file_refuses_to_overwrite() {
        let temp = TempDir::new().unwrap();
        let a = temp.path().join("a");
        let b = temp.path().join("b");
        fs::write(&a, b"a").unwrap();
        fs::write(&b, b"b").unwrap();
        assert!(move_file(&a, &b).is_err());
        assert_eq!(fs::read(&a).unwrap(), b"a");
        assert_eq!(fs::read(&b).unwrap(), b"b");
    }
}
