//! Filtering logic for map entries

use crate::types::{MapEntry, MapType};

/// A single string constraint, either substring or exact match
#[derive(Debug, Clone, PartialEq)]
pub struct StringMatch {
    value: String,
    exact: bool,
    /// Per-constraint override of the filter-wide case sensitivity
    case_sensitive: Option<bool>,
}

impl StringMatch {
    pub fn contains(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            exact: false,
            case_sensitive: None,
        }
    }

    pub fn exact(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            exact: true,
            case_sensitive: None,
        }
    }

    pub fn with_case_sensitivity(mut self, case_sensitive: bool) -> Self {
        self.case_sensitive = Some(case_sensitive);
        self
    }

    fn matches(&self, s: &str, default_case_sensitive: bool) -> bool {
        if self.case_sensitive.unwrap_or(default_case_sensitive) {
            self.compare(&self.value, s)
        } else {
            self.compare(&self.value.to_lowercase(), &s.to_lowercase())
        }
    }

    fn compare(&self, wanted: &str, s: &str) -> bool {
        if self.exact {
            wanted == s
        } else {
            s.contains(wanted)
        }
    }
}

/// Composable predicate over map entries.
///
/// Every active constraint category must hold; within a list of string
/// constraints one match suffices.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MapFilter {
    names: Vec<StringMatch>,
    filenames: Vec<StringMatch>,
    types: u8,
    before: Option<f64>,
    after: Option<f64>,
    only_hidden: bool,
    only_visible: bool,
    apply_to_all: bool,
    filter_case_sensitive: bool,
    filename_case_sensitive: bool,
}

impl MapFilter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Case sensitivity for level-name and file-name constraints.
    ///
    /// File names are only matched case-sensitively when both flags are set.
    pub fn case_sensitivity(mut self, filter_case_sensitive: bool, filename_case_sensitive: bool) -> Self {
        self.filter_case_sensitive = filter_case_sensitive;
        self.filename_case_sensitive = filename_case_sensitive && filter_case_sensitive;
        self
    }

    pub fn name(mut self, m: StringMatch) -> Self {
        self.names.push(m);
        self
    }

    pub fn filename(mut self, m: StringMatch) -> Self {
        self.filenames.push(m);
        self
    }

    pub fn map_type(mut self, t: MapType) -> Self {
        self.types |= t.bit();
        self
    }

    pub fn before(mut self, ts: f64) -> Self {
        self.before = Some(ts);
        self
    }

    pub fn after(mut self, ts: f64) -> Self {
        self.after = Some(ts);
        self
    }

    pub fn only_hidden(mut self, yes: bool) -> Self {
        self.only_hidden = yes;
        self
    }

    pub fn only_visible(mut self, yes: bool) -> Self {
        self.only_visible = yes;
        self
    }

    pub fn apply_to_all(mut self, yes: bool) -> Self {
        self.apply_to_all = yes;
        self
    }

    /// No selecting constraint is active. Hidden-state flags don't count:
    /// `--unhidden` alone still selects every visible map.
    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
            && self.filenames.is_empty()
            && self.types == 0
            && self.before.is_none()
            && self.after.is_none()
    }

    /// Whether a destructive bulk operation may run with this filter
    pub fn permits_bulk_change(&self) -> bool {
        self.apply_to_all || !self.is_empty()
    }

    pub fn matches(&self, m: &MapEntry) -> bool {
        if self.types != 0 {
            if m.types & self.types == 0 {
                return false;
            }
            if !self.names.is_empty() {
                let found = m.levels.iter().any(|l| {
                    l.kind.bit() & self.types != 0 && self.match_any(&self.names, &l.name, self.filter_case_sensitive)
                });
                if !found {
                    return false;
                }
            }
        } else if !m.names.iter().any(|n| self.match_any(&self.names, n, self.filter_case_sensitive)) {
            return false;
        }

        if !self.match_any(&self.filenames, &m.filename, self.filename_case_sensitive) {
            return false;
        }
        if let Some(before) = self.before {
            if m.mtime >= before {
                return false;
            }
        }
        if let Some(after) = self.after {
            if m.mtime < after {
                return false;
            }
        }
        if self.only_hidden && !m.is_hidden() {
            return false;
        }
        if self.only_visible && m.is_hidden() {
            return false;
        }
        true
    }

    /// Keep only the entries passing this filter
    pub fn apply<'a>(&self, entries: impl IntoIterator<Item = &'a MapEntry>) -> Vec<&'a MapEntry> {
        entries.into_iter().filter(|m| self.matches(m)).collect()
    }

    fn match_any(&self, list: &[StringMatch], s: &str, case_sensitive: bool) -> bool {
        list.is_empty() || list.iter().any(|f| f.matches(s, case_sensitive))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Level;

    fn map(filename: &str, mtime: f64, hidden: u8, levels: &[(MapType, &str)]) -> MapEntry {
        let levels: Vec<Level> = levels
            .iter()
            .map(|(kind, name)| Level {
                kind: *kind,
                name: name.to_string(),
            })
            .collect();
        let mut names: Vec<String> = Vec::new();
        for l in &levels {
            if !names.contains(&l.name) {
                names.push(l.name.clone());
            }
        }
        MapEntry {
            id: "1".into(),
            url: format!("/1/{}", filename),
            filename_encoded: filename.into(),
            filename: filename.into(),
            size: 10,
            mtime,
            types: levels.iter().fold(0, |acc, l| acc | l.kind.bit()),
            levels,
            names,
            hidden,
        }
    }

    fn sample() -> Vec<MapEntry> {
        vec![
            map("Alpha.lvl", 100.0, 0, &[(MapType::SinglePlayer, "Cave Run"), (MapType::MultiPlayer, "Arena")]),
            map("Beta.lvl", 200.0, 1, &[(MapType::ChallengeMode, "Cave Dash")]),
            map("Gamma.lvl", 300.0, 0, &[(MapType::MultiPlayer, "Dome")]),
        ]
    }

    fn filenames(found: Vec<&MapEntry>) -> Vec<&str> {
        found.iter().map(|m| m.filename.as_str()).collect()
    }

    #[test]
    fn test_empty_filter_passes_everything() {
        let maps = sample();
        let filter = MapFilter::new();
        assert!(filter.is_empty());
        assert!(!filter.permits_bulk_change());
        assert_eq!(filter.apply(&maps).len(), 3);
    }

    #[test]
    fn test_apply_to_all_permits_bulk_change() {
        let filter = MapFilter::new().apply_to_all(true);
        assert!(filter.is_empty());
        assert!(filter.permits_bulk_change());
    }

    #[test]
    fn test_hidden_flags_alone_keep_filter_empty() {
        assert!(MapFilter::new().only_visible(true).is_empty());
        assert!(!MapFilter::new().after(1.0).is_empty());
    }

    #[test]
    fn test_name_contains_ignores_case_by_default() {
        let maps = sample();
        let filter = MapFilter::new().name(StringMatch::contains("cave"));
        assert_eq!(filenames(filter.apply(&maps)), vec!["Alpha.lvl", "Beta.lvl"]);
    }

    #[test]
    fn test_name_case_sensitive() {
        let maps = sample();
        let filter = MapFilter::new()
            .case_sensitivity(true, true)
            .name(StringMatch::contains("cave"));
        assert!(filter.apply(&maps).is_empty());
    }

    #[test]
    fn test_exact_name_and_or_across_constraints() {
        let maps = sample();
        let filter = MapFilter::new()
            .name(StringMatch::exact("dome"))
            .name(StringMatch::exact("Cave"));
        assert_eq!(filenames(filter.apply(&maps)), vec!["Gamma.lvl"]);
    }

    #[test]
    fn test_name_must_match_on_level_of_filtered_type() {
        let maps = sample();
        // "Cave Run" is SP, so an MP type filter must not match it by name
        let filter = MapFilter::new()
            .map_type(MapType::MultiPlayer)
            .name(StringMatch::contains("cave"));
        assert!(filter.apply(&maps).is_empty());

        let filter = MapFilter::new()
            .map_type(MapType::MultiPlayer)
            .name(StringMatch::contains("arena"));
        assert_eq!(filenames(filter.apply(&maps)), vec!["Alpha.lvl"]);
    }

    #[test]
    fn test_type_filter() {
        let maps = sample();
        let filter = MapFilter::new().map_type(MapType::MultiPlayer);
        assert_eq!(filenames(filter.apply(&maps)), vec!["Alpha.lvl", "Gamma.lvl"]);
    }

    #[test]
    fn test_filename_filter() {
        let maps = sample();
        let filter = MapFilter::new().filename(StringMatch::exact("beta.lvl"));
        assert_eq!(filenames(filter.apply(&maps)), vec!["Beta.lvl"]);
    }

    #[test]
    fn test_time_range() {
        let maps = sample();
        let filter = MapFilter::new().after(100.0).before(300.0);
        assert_eq!(filenames(filter.apply(&maps)), vec!["Alpha.lvl", "Beta.lvl"]);
        let filter = MapFilter::new().after(150.0);
        assert_eq!(filenames(filter.apply(&maps)), vec!["Beta.lvl", "Gamma.lvl"]);
    }

    #[test]
    fn test_hidden_state_filters() {
        let maps = sample();
        assert_eq!(filenames(MapFilter::new().only_hidden(true).apply(&maps)), vec!["Beta.lvl"]);
        assert_eq!(
            filenames(MapFilter::new().only_visible(true).apply(&maps)),
            vec!["Alpha.lvl", "Gamma.lvl"]
        );
    }

    #[test]
    fn test_filtering_is_idempotent() {
        let maps = sample();
        let filter = MapFilter::new()
            .name(StringMatch::contains("a"))
            .only_visible(true);
        let once = filter.apply(&maps);
        let twice = filter.apply(once.iter().copied());
        assert_eq!(once, twice);
    }
}
