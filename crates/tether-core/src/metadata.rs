//! Call headers.
//!
//! Headers are ordered ASCII key/value pairs sent once when a call is opened.
//! Keys are lowercase `[a-z0-9-_.]`; values are printable ASCII. Validation
//! happens on insertion so that a `Metadata` value is always encodable.

use crate::constants::MAX_HEADER_FIELD_LEN;
use crate::error::MetadataError;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Metadata {
    entries: Vec<(String, String)>,
}

impl Metadata {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a header, replacing any existing value for the key.
    pub fn insert(
        &mut self,
        key: impl Into<String>,
        value: impl Into<String>,
    ) -> Result<(), MetadataError> {
        let key = key.into();
        let value = value.into();
        validate_key(&key)?;
        validate_value(&key, &value)?;

        match self.entries.iter_mut().find(|(k, _)| *k == key) {
            Some(entry) => entry.1 = value,
            None => self.entries.push((key, value)),
        }
        Ok(())
    }

    /// Merge every header of `other` into `self`; `other` wins on conflicts.
    pub fn merge(&mut self, other: &Metadata) {
        for (key, value) in &other.entries {
            match self.entries.iter_mut().find(|(k, _)| k == key) {
                Some(entry) => entry.1.clone_from(value),
                None => self.entries.push((key.clone(), value.clone())),
            }
        }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

fn validate_key(key: &str) -> Result<(), MetadataError> {
    if key.is_empty() {
        return Err(MetadataError::EmptyKey);
    }
    if key.len() > MAX_HEADER_FIELD_LEN {
        return Err(MetadataError::TooLong {
            len: key.len(),
            max: MAX_HEADER_FIELD_LEN,
        });
    }
    let valid = key
        .bytes()
        .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || matches!(b, b'-' | b'_' | b'.'));
    if !valid {
        return Err(MetadataError::InvalidKey(key.to_string()));
    }
    Ok(())
}

fn validate_value(key: &str, value: &str) -> Result<(), MetadataError> {
    if value.len() > MAX_HEADER_FIELD_LEN {
        return Err(MetadataError::TooLong {
            len: value.len(),
            max: MAX_HEADER_FIELD_LEN,
        });
    }
    if !value.bytes().all(|b| (0x20..0x7F).contains(&b)) {
        return Err(MetadataError::InvalidValue {
            key: key.to_string(),
        });
    }
    Ok(())
}
