//! Per-key metadata storage

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::types::KeyId;

/// Human-readable metadata attached to a key at creation
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyMetadata {
    /// Display name
    pub name: String,
    /// Content URI describing the permission
    pub uri: String,
}

impl KeyMetadata {
    pub fn new(name: impl Into<String>, uri: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            uri: uri.into(),
        }
    }
}

/// Metadata store for all keys ever created
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MetadataStore {
    entries: HashMap<KeyId, KeyMetadata>,
}

impl MetadataStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store metadata for a key, overwriting any previous entry
    pub fn set(&mut self, key: KeyId, metadata: KeyMetadata) {
        self.entries.insert(key, metadata);
    }

    pub fn get(&self, key: KeyId) -> Option<&KeyMetadata> {
        self.entries.get(&key)
    }

    pub fn name_of(&self, key: KeyId) -> Option<&str> {
        self.entries.get(&key).map(|m| m.name.as_str())
    }

    pub fn uri_of(&self, key: KeyId) -> Option<&str> {
        self.entries.get(&key).map(|m| m.uri.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_and_get() {
        let mut store = MetadataStore::new();
        let key = KeyId::new(0);

        assert!(store.get(key).is_none());

        store.set(key, KeyMetadata::new("Admin", "meta://admin"));
        assert_eq!(store.name_of(key), Some("Admin"));
        assert_eq!(store.uri_of(key), Some("meta://admin"));
    }

    #[test]
    fn test_overwrite() {
        let mut store = MetadataStore::new();
        let key = KeyId::new(3);

        store.set(key, KeyMetadata::new("Old", ""));
        store.set(key, KeyMetadata::new("New", "meta://new"));
        assert_eq!(store.name_of(key), Some("New"));
    }
}
