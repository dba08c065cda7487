//! Fixed mapping from fragment keys to map layers.

use std::fmt;

use crate::map::MapView;

/// Errors that can occur while building a [`LayerRegistry`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    /// The same key was registered twice.
    DuplicateKey(String),
    /// The same layer handle was registered under two keys.
    DuplicateLayer(String),
    /// The key is empty or contains a fragment separator.
    InvalidKey(String),
}

impl fmt::Display for RegistryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RegistryError::DuplicateKey(key) => write!(f, "Duplicate layer key: {}", key),
            RegistryError::DuplicateLayer(key) => {
                write!(f, "Layer under key {} is already registered", key)
            }
            RegistryError::InvalidKey(key) => write!(f, "Invalid layer key: {:?}", key),
        }
    }
}

impl std::error::Error for RegistryError {}

/// Characters that separate fields in a fragment and so cannot appear in keys.
const RESERVED: &[char] = &['-', '/', '#'];

/// Ordered key -> layer mapping, fixed at construction.
///
/// Definition order is the order keys appear in generated fragments.
#[derive(Debug, Clone)]
pub struct LayerRegistry<L> {
    entries: Vec<(String, L)>,
}

impl<L: PartialEq> LayerRegistry<L> {
    pub fn new<K: Into<String>>(
        entries: impl IntoIterator<Item = (K, L)>,
    ) -> Result<Self, RegistryError> {
        let mut registry = Self {
            entries: Vec::new(),
        };

        for (key, layer) in entries {
            let key = key.into();
            if key.is_empty() || key.contains(RESERVED) {
                return Err(RegistryError::InvalidKey(key));
            }
            if registry.get(&key).is_some() {
                return Err(RegistryError::DuplicateKey(key));
            }
            if registry.key_of(&layer).is_some() {
                return Err(RegistryError::DuplicateLayer(key));
            }
            registry.entries.push((key, layer));
        }

        Ok(registry)
    }

    pub fn get(&self, key: &str) -> Option<&L> {
        self.entries
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, layer)| layer)
    }

    /// Reverse lookup: the key a layer was registered under.
    pub fn key_of(&self, layer: &L) -> Option<&str> {
        self.entries
            .iter()
            .find(|(_, l)| l == layer)
            .map(|(key, _)| key.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &L)> {
        self.entries.iter().map(|(key, layer)| (key.as_str(), layer))
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(key, _)| key.as_str())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Keys of all registered layers currently attached to `map`.
    pub fn active_keys<M>(&self, map: &M) -> Vec<String>
    where
        M: MapView<Layer = L>,
    {
        self.entries
            .iter()
            .filter(|(_, layer)| map.has_layer(layer))
            .map(|(key, _)| key.clone())
            .collect()
    }
}
