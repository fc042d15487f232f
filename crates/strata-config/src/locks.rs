//! Lock lists: which attributes and child elements descendants may not change.
//!
//! Locks accumulate down the hierarchy. A level can only add to what its
//! ancestors locked. Each entry remembers whether an ancestor defined it, so
//! that re-serializing a level only writes the locks that level introduced.

use std::collections::BTreeSet;

use indexmap::IndexMap;

/// Attribute names that carry lock lists rather than values.
pub const LOCK_ATTRIBUTES: &str = "lockAttributes";
pub const LOCK_ALL_ATTRIBUTES_EXCEPT: &str = "lockAllAttributesExcept";
pub const LOCK_ELEMENTS: &str = "lockElements";
pub const LOCK_ALL_ELEMENTS_EXCEPT: &str = "lockAllElementsExcept";
pub const LOCK_ITEM: &str = "lockItem";

/// Locks everything when it appears in an inclusion list.
pub const LOCK_ALL: &str = "*";

pub fn is_lock_keyword(name: &str) -> bool {
    matches!(
        name,
        LOCK_ATTRIBUTES
            | LOCK_ALL_ATTRIBUTES_EXCEPT
            | LOCK_ELEMENTS
            | LOCK_ALL_ELEMENTS_EXCEPT
            | LOCK_ITEM
    )
}

/// Split a lock list on `,` `;` `:` and trim entries.
///
/// Returns an error message when the list names nothing.
pub fn parse_lock_list(text: &str) -> Result<Vec<String>, String> {
    let names: Vec<String> = text
        .split([',', ';', ':'])
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect();
    if names.is_empty() {
        Err("The lock list must not be empty".to_string())
    } else {
        Ok(names)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LockEntry {
    /// An ancestor level already locked this name.
    pub defined_in_parent: bool,
    /// The current level named it.
    pub set_here: bool,
}

/// Effective locks of one kind (attributes or elements) on one element.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LockList {
    entries: IndexMap<String, LockEntry>,
    /// Names exempt from an exclusion list; everything else is locked.
    exceptions: Option<BTreeSet<String>>,
    /// `exceptions` as it stood before the current level.
    parent_exceptions: Option<BTreeSet<String>>,
}

impl LockList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_locked(&self, name: &str) -> bool {
        self.entries.contains_key(name)
            || self.entries.contains_key(LOCK_ALL)
            || self
                .exceptions
                .as_ref()
                .is_some_and(|ex| !ex.contains(name))
    }

    /// Whether an ancestor (not the current level) locked `name`.
    pub fn is_locked_by_parent(&self, name: &str) -> bool {
        let by_entry = |n: &str| self.entries.get(n).is_some_and(|e| e.defined_in_parent);
        by_entry(name)
            || by_entry(LOCK_ALL)
            || self
                .parent_exceptions
                .as_ref()
                .is_some_and(|ex| !ex.contains(name))
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty() && self.exceptions.is_none()
    }

    /// Move to the next level: everything so far becomes parent-defined.
    pub fn begin_level(&mut self) {
        for entry in self.entries.values_mut() {
            entry.defined_in_parent = true;
            entry.set_here = false;
        }
        self.parent_exceptions = self.exceptions.clone();
    }

    /// Add an inclusion list at the current level.
    pub fn add_inclusion<I, S>(&mut self, names: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        for name in names {
            self.entries
                .entry(name.into())
                .or_insert(LockEntry {
                    defined_in_parent: false,
                    set_here: false,
                })
                .set_here = true;
        }
    }

    /// Add an exclusion list at the current level. Consecutive exclusion
    /// lists intersect their exceptions.
    pub fn add_exclusion<I, S>(&mut self, names: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let names: BTreeSet<String> = names.into_iter().map(Into::into).collect();
        self.exceptions = Some(match self.exceptions.take() {
            Some(existing) => existing.intersection(&names).cloned().collect(),
            None => names,
        });
    }

    /// The inclusion entries, in the order they were first named.
    pub fn entries(&self) -> impl Iterator<Item = (&str, LockEntry)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), *v))
    }

    pub fn exceptions(&self) -> Option<&BTreeSet<String>> {
        self.exceptions.as_ref()
    }

    /// Effective locked subset of `candidates`.
    pub fn locked_names<'a>(&self, candidates: impl IntoIterator<Item = &'a str>) -> Vec<String> {
        candidates
            .into_iter()
            .filter(|name| self.is_locked(name))
            .map(str::to_string)
            .collect()
    }

    /// Inclusion entries to write for this level.
    ///
    /// Entries an ancestor defined are written only when `include_touched`
    /// is set and the level named them again.
    pub fn local_inclusions(&self, include_touched: bool) -> Vec<&str> {
        self.entries
            .iter()
            .filter(|(_, e)| !e.defined_in_parent || (include_touched && e.set_here))
            .map(|(k, _)| k.as_str())
            .collect()
    }

    /// Exclusion list to write for this level, if it differs from the parent's.
    pub fn local_exclusion(&self) -> Option<&BTreeSet<String>> {
        match &self.exceptions {
            Some(ex) if self.parent_exceptions.as_ref() != Some(ex) => Some(ex),
            _ => None,
        }
    }
}

/// `lockItem` state of one element.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ItemLock {
    pub locked: bool,
    pub defined_in_parent: bool,
}

impl ItemLock {
    pub fn begin_level(&mut self) {
        if self.locked {
            self.defined_in_parent = true;
        }
    }

    /// Locked by an ancestor.
    pub fn locked_by_parent(&self) -> bool {
        self.locked && self.defined_in_parent
    }
}

/// Join names the way lock lists are written back.
pub fn format_lock_list<'a>(names: impl IntoIterator<Item = &'a str>) -> String {
    names.into_iter().collect::<Vec<_>>().join(",")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_lock_list_separators() {
        assert_eq!(
            parse_lock_list(" a, b;c : d ").unwrap(),
            ["a", "b", "c", "d"]
        );
        assert!(parse_lock_list(" ,; ").is_err());
    }

    #[test]
    fn test_inclusion_and_star() {
        let mut locks = LockList::new();
        locks.add_inclusion(["value"]);
        assert!(locks.is_locked("value"));
        assert!(!locks.is_locked("key"));

        locks.add_inclusion([LOCK_ALL]);
        assert!(locks.is_locked("key"));
    }

    #[test]
    fn test_exclusion_unions_with_ancestor_inclusion() {
        // Ancestor locks A; this level locks everything except A and B.
        let mut locks = LockList::new();
        locks.add_inclusion(["a"]);
        locks.begin_level();
        locks.add_exclusion(["a", "b"]);

        let locked = locks.locked_names(["a", "b", "c"]);
        assert_eq!(locked, ["a", "c"]);
    }

    #[test]
    fn test_consecutive_exclusions_intersect() {
        let mut locks = LockList::new();
        locks.add_exclusion(["a", "b"]);
        locks.begin_level();
        locks.add_exclusion(["b", "c"]);

        assert!(locks.is_locked("a"));
        assert!(!locks.is_locked("b"));
        assert!(locks.is_locked("c"));
        assert_eq!(
            locks.local_exclusion().map(|s| s.iter().cloned().collect::<Vec<_>>()),
            Some(vec!["b".to_string()])
        );
    }

    #[test]
    fn test_local_inclusions_skip_parent_entries() {
        let mut locks = LockList::new();
        locks.add_inclusion(["a"]);
        locks.begin_level();
        locks.add_inclusion(["a", "b"]);

        assert_eq!(locks.local_inclusions(false), ["b"]);
        assert_eq!(locks.local_inclusions(true), ["a", "b"]);
        assert!(locks.is_locked_by_parent("a"));
        assert!(!locks.is_locked_by_parent("b"));
    }

    #[test]
    fn test_unchanged_exclusion_is_not_written() {
        let mut locks = LockList::new();
        locks.add_exclusion(["a"]);
        locks.begin_level();
        assert_eq!(locks.local_exclusion(), None);
        locks.add_exclusion(["a", "z"]);
        assert_eq!(locks.local_exclusion(), None);
    }
}
