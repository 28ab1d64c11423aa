use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Restrictions offered to users when building their profile
pub const STANDARD_RESTRICTIONS: [&str; 9] = [
    "Milk",
    "Egg",
    "Peanuts",
    "Tree Nuts",
    "Fish",
    "Shellfish",
    "Soy",
    "Wheat",
    "Gelatin",
];

/// Case-insensitive set of dietary restriction names.
///
/// Names are trimmed and lower-cased on insertion; blank names are dropped. Iteration
/// order is sorted, so matching over a set is deterministic.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "Vec<String>", into = "Vec<String>")]
pub struct RestrictionSet {
    names: BTreeSet<String>,
}

impl RestrictionSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a set from display names
    pub fn from_names<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut set = Self::new();
        for name in names {
            set.insert(name.as_ref());
        }
        set
    }

    /// Every entry of [`STANDARD_RESTRICTIONS`]
    pub fn standard() -> Self {
        Self::from_names(STANDARD_RESTRICTIONS)
    }

    /// Insert a name. Returns false for blank or duplicate names.
    pub fn insert(&mut self, name: &str) -> bool {
        let normalized = name.trim().to_lowercase();
        if normalized.is_empty() {
            return false;
        }
        self.names.insert(normalized)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.names.contains(&name.trim().to_lowercase())
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    /// Lower-cased names in sorted order
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.names.iter().map(String::as_str)
    }
}

impl From<Vec<String>> for RestrictionSet {
    fn from(names: Vec<String>) -> Self {
        Self::from_names(names)
    }
}

impl From<RestrictionSet> for Vec<String> {
    fn from(set: RestrictionSet) -> Self {
        set.names.into_iter().collect()
    }
}

impl<S: AsRef<str>> FromIterator<S> for RestrictionSet {
    fn from_iter<T: IntoIterator<Item = S>>(iter: T) -> Self {
        Self::from_names(iter)
    }
}
