//! Concrete configuration sources

use std::collections::HashMap;

use super::ConfigSource;

/// Reads settings from the process environment
#[derive(Debug, Default, Clone, Copy)]
pub struct EnvSource;

impl ConfigSource for EnvSource {
    fn lookup(&self, name: &str) -> Option<String> {
        std::env::var(name).ok()
    }
}

/// Reads settings the way ifupdown exports them: `IF_QT_<NAME>`, with the
/// interface name taken from `IFACE`
#[derive(Debug, Default, Clone, Copy)]
pub struct IfupdownSource;

impl IfupdownSource {
    /// Environment variable name for a setting
    pub fn variable_name(name: &str) -> String {
        if name == "INTERFACE" {
            "IFACE".to_string()
        } else {
            format!("IF_QT_{}", name)
        }
    }
}

impl ConfigSource for IfupdownSource {
    fn lookup(&self, name: &str) -> Option<String> {
        std::env::var(Self::variable_name(name)).ok()
    }
}

/// In-memory settings, used for `-c NAME VALUE` pairs and config files
#[derive(Debug, Default, Clone)]
pub struct MapSource {
    values: HashMap<String, String>,
}

impl MapSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a value, replacing any earlier one
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.values.insert(name.into(), value.into());
    }

    /// Builder-style [`insert`](Self::insert)
    pub fn with(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.insert(name, value);
        self
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl ConfigSource for MapSource {
    fn lookup(&self, name: &str) -> Option<String> {
        self.values.get(name).cloned()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for MapSource {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut source = MapSource::new();
        for (name, value) in iter {
            source.insert(name, value);
        }
        source
    }
}

/// Consults each layer in order and returns the first hit
#[derive(Default)]
pub struct LayeredSource {
    layers: Vec<Box<dyn ConfigSource>>,
}

impl LayeredSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a lower-priority layer
    pub fn push(&mut self, layer: impl ConfigSource + 'static) {
        self.layers.push(Box::new(layer));
    }
}

impl ConfigSource for LayeredSource {
    fn lookup(&self, name: &str) -> Option<String> {
        self.layers.iter().find_map(|layer| layer.lookup(name))
    }
}
