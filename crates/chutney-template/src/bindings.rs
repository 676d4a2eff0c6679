//! Layered variable bindings.

use std::collections::{BTreeMap, BTreeSet};

/// Where a binding came from. Lookups try layers in declaration order, so a
/// node-specific value beats a global one, which beats an environment
/// override, which beats a declared default.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum BindingSource {
    Node,
    Global,
    Environment,
    Default,
}

/// Variable bindings for one render.
#[derive(Debug, Clone, Default)]
pub struct Bindings {
    layers: BTreeMap<BindingSource, BTreeMap<String, String>>,
}

impl Bindings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, source: BindingSource, name: impl Into<String>, value: impl Into<String>) {
        self.layers
            .entry(source)
            .or_default()
            .insert(name.into(), value.into());
    }

    pub fn extend<I, K, V>(&mut self, source: BindingSource, values: I)
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let layer = self.layers.entry(source).or_default();
        for (k, v) in values {
            layer.insert(k.into(), v.into());
        }
    }

    /// Value and the layer that supplied it.
    pub fn lookup(&self, name: &str) -> Option<(&str, BindingSource)> {
        self.layers
            .iter()
            .find_map(|(source, layer)| layer.get(name).map(|v| (v.as_str(), *source)))
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.lookup(name).map(|(v, _)| v)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.lookup(name).is_some()
    }

    /// Every bound name across all layers.
    pub fn names(&self) -> BTreeSet<&str> {
        self.layers
            .values()
            .flat_map(|layer| layer.keys().map(String::as_str))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn precedence_follows_layers() {
        let mut b = Bindings::new();
        b.set(BindingSource::Default, "connlimit", "60");
        b.set(BindingSource::Environment, "connlimit", "80");
        assert_eq!(b.lookup("connlimit"), Some(("80", BindingSource::Environment)));

        b.set(BindingSource::Global, "connlimit", "90");
        b.set(BindingSource::Node, "connlimit", "100");
        assert_eq!(b.lookup("connlimit"), Some(("100", BindingSource::Node)));

        assert_eq!(b.get("missing"), None);
        assert_eq!(b.names().into_iter().collect::<Vec<_>>(), vec!["connlimit"]);
    }
}
