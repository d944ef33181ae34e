//! Named variable store for one unit of work.

use crate::error::{Error, Result};
use crate::ragged::Ragged;
use std::collections::HashMap;

/// Mapping from semantic variable name to ragged array.
///
/// A store is seeded from the input source for one chunk or file, mutated
/// stage by stage by the pipeline and dropped once its outputs have been
/// extracted.
#[derive(Debug, Clone, Default)]
pub struct VariableStore {
    vars: HashMap<String, Ragged>,
}

impl VariableStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts or replaces a variable.
    pub fn insert(&mut self, name: impl Into<String>, value: Ragged) {
        self.vars.insert(name.into(), value);
    }

    /// Looks up a variable.
    ///
    /// # Errors
    /// Returns [`Error::MissingKey`] if the variable is absent.
    pub fn get(&self, name: &str) -> Result<&Ragged> {
        self.vars
            .get(name)
            .ok_or_else(|| Error::MissingKey(name.to_string()))
    }

    /// Removes a variable and returns it.
    ///
    /// # Errors
    /// Returns [`Error::MissingKey`] if the variable is absent.
    pub fn take(&mut self, name: &str) -> Result<Ragged> {
        self.vars
            .remove(name)
            .ok_or_else(|| Error::MissingKey(name.to_string()))
    }

    /// Resolves several variables in order.
    ///
    /// # Errors
    /// Returns [`Error::MissingKey`] for the first absent name.
    pub fn gather<S: AsRef<str>>(&self, names: &[S]) -> Result<Vec<&Ragged>> {
        names.iter().map(|name| self.get(name.as_ref())).collect()
    }

    /// Returns true if the variable exists.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.vars.contains_key(name)
    }

    /// Number of variables.
    #[must_use]
    pub fn len(&self) -> usize {
        self.vars.len()
    }

    /// Returns true if the store holds no variables.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }

    /// Iterates the variable names in arbitrary order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.vars.keys().map(String::as_str)
    }
}

impl FromIterator<(String, Ragged)> for VariableStore {
    fn from_iter<I: IntoIterator<Item = (String, Ragged)>>(iter: I) -> Self {
        Self {
            vars: iter.into_iter().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ragged::ValueKind;

    #[test]
    fn test_store_operations() {
        let mut store = VariableStore::new();
        assert!(store.is_empty());

        store.insert("edep", Ragged::from_lists(ValueKind::Float64, vec![vec![1.0]]));
        store.insert("vol", Ragged::from_lists(ValueKind::Int64, vec![vec![7.0]]));
        assert_eq!(store.len(), 2);
        assert!(store.contains("edep"));

        let gathered = store.gather(&["vol", "edep"]).unwrap();
        assert_eq!(gathered[0].kind(), ValueKind::Int64);

        assert_eq!(
            store.gather(&["edep", "posx"]).unwrap_err(),
            Error::MissingKey("posx".to_string())
        );

        let taken = store.take("edep").unwrap();
        assert_eq!(taken.len(), 1);
        assert!(!store.contains("edep"));
    }
}
