//! Editable view over a function call's JSON-encoded `arguments`.

use indexmap::IndexMap;
use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ArgumentsError {
    #[error("argument `{0}` is already defined")]
    DuplicateKey(String),
    #[error("no argument at index {0}")]
    OutOfRange(usize),
}

/// Ordered key/value entries of a JSON object.
///
/// Entry order is the order in which keys appear in the source string and is
/// preserved when re-serializing. Entries with an empty key are kept while
/// editing (a freshly added row starts empty) but dropped on serialization.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ArgumentEntries {
    entries: Vec<(String, Value)>,
}

impl ArgumentEntries {
    /// Malformed or non-object input yields no entries.
    pub fn parse(arguments: &str) -> Self {
        match serde_json::from_str::<IndexMap<String, Value>>(arguments) {
            Ok(map) => Self {
                entries: map.into_iter().collect(),
            },
            Err(_) => Self::default(),
        }
    }

    pub fn entries(&self) -> &[(String, Value)] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.entries.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    pub fn push_empty(&mut self) {
        self.entries
            .push((String::new(), Value::String(String::new())));
    }

    pub fn insert(&mut self, key: impl Into<String>, value: Value) -> Result<(), ArgumentsError> {
        let key = key.into();
        self.ensure_unique(&key, None)?;
        self.entries.push((key, value));
        Ok(())
    }

    pub fn set_key(&mut self, index: usize, key: impl Into<String>) -> Result<(), ArgumentsError> {
        let key = key.into();
        if index >= self.entries.len() {
            return Err(ArgumentsError::OutOfRange(index));
        }
        self.ensure_unique(&key, Some(index))?;
        self.entries[index].0 = key;
        Ok(())
    }

    pub fn set_value(&mut self, index: usize, value: Value) -> Result<(), ArgumentsError> {
        let entry = self
            .entries
            .get_mut(index)
            .ok_or(ArgumentsError::OutOfRange(index))?;
        entry.1 = value;
        Ok(())
    }

    pub fn remove(&mut self, index: usize) -> Result<(String, Value), ArgumentsError> {
        if index >= self.entries.len() {
            return Err(ArgumentsError::OutOfRange(index));
        }
        Ok(self.entries.remove(index))
    }

    pub fn to_arguments_string(&self) -> String {
        let object: IndexMap<&str, &Value> = self
            .entries
            .iter()
            .filter(|(key, _)| !key.is_empty())
            .map(|(key, value)| (key.as_str(), value))
            .collect();
        serde_json::to_string(&object).unwrap_or_else(|_| "{}".to_string())
    }

    fn ensure_unique(&self, key: &str, skip: Option<usize>) -> Result<(), ArgumentsError> {
        if key.is_empty() {
            return Ok(());
        }
        let taken = self
            .entries
            .iter()
            .enumerate()
            .any(|(i, (existing, _))| Some(i) != skip && existing == key);
        if taken {
            return Err(ArgumentsError::DuplicateKey(key.to_string()));
        }
        Ok(())
    }
}

impl FromIterator<(String, Value)> for ArgumentEntries {
    fn from_iter<T: IntoIterator<Item = (String, Value)>>(iter: T) -> Self {
        let mut entries = Self::default();
        for (key, value) in iter {
            match entries.entries.iter_mut().find(|(k, _)| !k.is_empty() && *k == key) {
                Some(existing) => existing.1 = value,
                None => entries.entries.push((key, value)),
            }
        }
        entries
    }
}
