//! Classification of incoming catalog entries against the local index

use crate::error::Result;
use crate::index::{names_equal, LocalIndex};
use crate::placement::Layout;
use crate::types::MapEntry;
use tracing::{debug, info, warn};

/// How an incoming entry relates to what is indexed
#[derive(Debug, Clone, PartialEq)]
pub enum Classification {
    /// Neither the id nor the file name is known
    New,
    /// Same identity, same content
    Unchanged,
    /// Same identity, different content
    Updated { previous: MapEntry },
    /// Id and file name point at different (or missing) entries
    Conflict { losers: Vec<MapEntry> },
}

/// What remains to be done for an incoming entry after reconciliation
#[derive(Debug, Clone, PartialEq)]
pub enum Reconciled {
    Unchanged,
    /// Fetch as a new map; `archived` conflicting maps were moved out of the way
    New { archived: usize },
    /// Fetch and supersede `previous`
    Updated { previous: MapEntry },
}

/// Classify `incoming` by looking it up by id and by file name independently
pub fn classify(incoming: &MapEntry, index: &LocalIndex) -> Classification {
    let by_id = index.position_by_id(&incoming.id);
    let by_name = index.position_by_filename(&incoming.filename);

    match (by_id, by_name) {
        (None, None) => Classification::New,
        (Some(a), Some(b)) if a == b => {
            let existing = &index.entries()[a];
            if incoming.same_content(existing) {
                Classification::Unchanged
            } else {
                Classification::Updated {
                    previous: existing.clone(),
                }
            }
        }
        (id_match, name_match) => {
            let losers = [id_match, name_match]
                .into_iter()
                .flatten()
                .map(|pos| index.entries()[pos].clone())
                .collect();
            Classification::Conflict { losers }
        }
    }
}

/// Classify `incoming` and apply the index side of the result.
///
/// Conflicts always favour the incoming entry: every loser is archived and
/// dropped from the index before the incoming entry proceeds as new. An
/// update inherits the local hidden state. A failed archive leaves the index
/// untouched for that loser and aborts this entry.
pub fn reconcile(incoming: &mut MapEntry, index: &mut LocalIndex, layout: &Layout) -> Result<Reconciled> {
    match classify(incoming, index) {
        Classification::New => {
            info!(map = %incoming.label(), "Found NEW map");
            Ok(Reconciled::New { archived: 0 })
        }
        Classification::Unchanged => {
            debug!(map = %incoming.label(), "Existing map is unchanged");
            Ok(Reconciled::Unchanged)
        }
        Classification::Updated { previous } => {
            incoming.hidden = previous.hidden;
            info!(map = %incoming.label(), "Found UPDATED map");
            Ok(Reconciled::Updated { previous })
        }
        Classification::Conflict { losers } => {
            let mut archived = 0;
            for loser in losers {
                warn!(
                    map = %incoming.label(),
                    existing = %loser.label(),
                    "Map conflicts with existing map, replacing it"
                );
                let outcome = layout.archive_entry(&loser)?;
                debug!(archive = %outcome.path().display(), "Archived conflicting map");
                remove_entry(index, &loser);
                archived += 1;
            }
            info!(map = %incoming.label(), "Found NEW map");
            Ok(Reconciled::New { archived })
        }
    }
}

fn remove_entry(index: &mut LocalIndex, entry: &MapEntry) {
    let case_sensitive = index.filename_case_sensitive();
    let pos = index
        .entries()
        .iter()
        .position(|m| m.id == entry.id && names_equal(&m.filename, &entry.filename, case_sensitive));
    if let Some(pos) = pos {
        index.remove(pos);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Level, MapType};
    use pretty_assertions::assert_eq;
    use rstest::rstest;
    use std::fs;
    use tempfile::TempDir;

    fn entry(id: &str, filename: &str) -> MapEntry {
        MapEntry {
            id: id.into(),
            url: format!("/{}/{}", id, filename),
            filename_encoded: filename.into(),
            filename: filename.into(),
            size: 1000,
            mtime: 100.0,
            levels: vec![Level {
                kind: MapType::SinglePlayer,
                name: "Level1".into(),
            }],
            types: 1,
            names: vec!["Level1".into()],
            hidden: 0,
        }
    }

    fn index_with(entries: &[MapEntry]) -> LocalIndex {
        let mut index = LocalIndex::new("unused.json", true);
        for e in entries {
            index.insert(e.clone());
        }
        index
    }

    #[test]
    fn test_unknown_entry_is_new() {
        let index = index_with(&[entry("1", "Other.lvl")]);
        assert_eq!(classify(&entry("42", "MyMap.lvl"), &index), Classification::New);
    }

    #[test]
    fn test_identical_entry_is_unchanged() {
        let index = index_with(&[entry("42", "MyMap.lvl")]);
        assert_eq!(classify(&entry("42", "MyMap.lvl"), &index), Classification::Unchanged);
    }

    #[rstest]
    #[case::mtime(|m: &mut MapEntry| m.mtime = 101.0)]
    #[case::size(|m: &mut MapEntry| m.size = 999)]
    #[case::levels(|m: &mut MapEntry| m.levels[0].name = "Level2".into())]
    #[case::unknown_size(|m: &mut MapEntry| m.size = -1)]
    fn test_changed_content_is_updated(#[case] change: fn(&mut MapEntry)) {
        let old = entry("42", "MyMap.lvl");
        let index = index_with(&[old.clone()]);
        let mut incoming = entry("42", "MyMap.lvl");
        change(&mut incoming);
        assert_eq!(classify(&incoming, &index), Classification::Updated { previous: old });
    }

    #[test]
    fn test_same_id_new_name_conflicts() {
        let old = entry("42", "MyMap.lvl");
        let index = index_with(&[old.clone()]);
        assert_eq!(
            classify(&entry("42", "MyMapV2.lvl"), &index),
            Classification::Conflict { losers: vec![old] }
        );
    }

    #[test]
    fn test_same_name_new_id_conflicts() {
        let old = entry("42", "MyMap.lvl");
        let index = index_with(&[old.clone()]);
        assert_eq!(
            classify(&entry("43", "MyMap.lvl"), &index),
            Classification::Conflict { losers: vec![old] }
        );
    }

    #[test]
    fn test_split_identity_conflicts_with_both() {
        let a = entry("42", "A.lvl");
        let b = entry("7", "B.lvl");
        let index = index_with(&[a.clone(), b.clone()]);
        assert_eq!(
            classify(&entry("42", "B.lvl"), &index),
            Classification::Conflict { losers: vec![a, b] }
        );
    }

    #[test]
    fn test_update_inherits_hidden_state() {
        let temp = TempDir::new().unwrap();
        let layout = Layout::new(temp.path());
        let mut old = entry("42", "MyMap.lvl");
        old.hidden = 1;
        let mut index = index_with(&[old.clone()]);
        let mut incoming = entry("42", "MyMap.lvl");
        incoming.mtime = 200.0;

        let result = reconcile(&mut incoming, &mut index, &layout).unwrap();
        assert_eq!(result, Reconciled::Updated { previous: old });
        assert_eq!(incoming.hidden, 1);
        // the previous entry stays until the new file has landed
        assert_eq!(index.len(), 1);
    }

    #[test]
    fn test_conflict_archives_loser_and_removes_it() {
        let temp = TempDir::new().unwrap();
        let layout = Layout::new(temp.path());
        layout.ensure_dirs().unwrap();
        let old = entry("42", "MyMap.lvl");
        fs::write(layout.current_path(&old), b"old").unwrap();
        let mut index = index_with(&[old.clone()]);
        let mut incoming = entry("42", "MyMapV2.lvl");

        let result = reconcile(&mut incoming, &mut index, &layout).unwrap();
        assert_eq!(result, Reconciled::New { archived: 1 });
        assert!(index.is_empty());
        assert!(!layout.current_path(&old).exists());
        assert_eq!(fs::read(layout.resolve(&old, false, true)).unwrap(), b"old");
    }

    #[test]
    fn test_failed_archive_keeps_index() {
        let temp = TempDir::new().unwrap();
        let layout = Layout::new(temp.path());
        layout.ensure_dirs().unwrap();
        let old = entry("42", "MyMap.lvl");
        let mut index = index_with(&[old.clone()]);
        let mut incoming = entry("42", "MyMapV2.lvl");

        assert!(reconcile(&mut incoming, &mut index, &layout).is_err());
        assert_eq!(index.entries(), &[old]);
    }
}
