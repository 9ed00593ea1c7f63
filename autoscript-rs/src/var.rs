//! Variable store.
//!
//! The shared, mutable namespace a script run works against.  Units read
//! their arguments from it and may write state back into it.  Entries keep
//! insertion order; overwriting a name keeps its original slot.
//!
//! Reads never fail: [`VarStore::read_string`] and [`VarStore::read_typed`]
//! return the caller's default for missing names and, for typed reads, for
//! values that do not coerce.  Whether a missing argument is an error is each
//! unit's own decision.

use std::collections::HashMap;

use crate::script::value::{FromValue, Value};

/// Insertion-ordered name → [`Value`] map.
#[derive(Debug, Default, Clone)]
pub struct VarStore {
    entries: Vec<(String, Value)>,
    index: HashMap<String, usize>,
}

impl VarStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set (or overwrite) a variable.
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        let name = name.into();
        let value = value.into();
        match self.index.get(&name) {
            Some(&i) => self.entries[i].1 = value,
            None => {
                self.index.insert(name.clone(), self.entries.len());
                self.entries.push((name, value));
            }
        }
    }

    /// Get the raw value of a variable.
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.index.get(name).map(|&i| &self.entries[i].1)
    }

    /// The variable as text, or `default` if it is not set.
    pub fn read_string(&self, name: &str, default: &str) -> String {
        self.get(name).map_or_else(|| default.to_owned(), Value::as_str)
    }

    /// The variable coerced to `T`, or `default` if it is not set or does not
    /// coerce.
    pub fn read_typed<T: FromValue>(&self, name: &str, default: T) -> T {
        self.get(name).and_then(T::from_value).unwrap_or(default)
    }

    /// Remove a variable.  Returns `true` if it existed.
    pub fn unset(&mut self, name: &str) -> bool {
        let Some(i) = self.index.remove(name) else { return false };
        self.entries.remove(i);
        for slot in self.index.values_mut() {
            if *slot > i {
                *slot -= 1;
            }
        }
        true
    }

    /// Returns `true` if the variable is set.
    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    /// Iterate over all variables in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<K: Into<String>, V: Into<Value>> Extend<(K, V)> for VarStore {
    fn extend<I: IntoIterator<Item = (K, V)>>(&mut self, iter: I) {
        for (k, v) in iter {
            self.set(k, v);
        }
    }
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for VarStore {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut vars = VarStore::new();
        vars.extend(iter);
        vars
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
