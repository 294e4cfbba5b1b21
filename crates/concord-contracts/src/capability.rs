//! Declared agent capabilities.
//!
//! Capabilities are static configuration: the bus reads them to find a
//! replacement for a failed agent but never computes or changes them.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

/// A named skill an agent declares, e.g. "rust", "database", "frontend".
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Capability(pub String);

impl Capability {
    /// Construct a capability from any string-like value.
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }
}

/// The full set of capabilities declared for one agent.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CapabilitySet {
    inner: HashSet<Capability>,
}

impl CapabilitySet {
    /// Add a capability to this set.
    pub fn grant(&mut self, capability: Capability) {
        self.inner.insert(capability);
    }

    /// Return true if the set contains the given capability.
    pub fn has(&self, capability: &Capability) -> bool {
        self.inner.contains(capability)
    }

    /// Return true if the two sets share at least one capability.
    ///
    /// An empty set overlaps nothing, including another empty set.
    pub fn overlaps(&self, other: &CapabilitySet) -> bool {
        self.inner.iter().any(|c| other.inner.contains(c))
    }

    /// Return an iterator over all declared capabilities.
    pub fn all(&self) -> impl Iterator<Item = &Capability> {
        self.inner.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}

impl<S: Into<String>> FromIterator<S> for CapabilitySet {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        Self {
            inner: iter.into_iter().map(Capability::new).collect(),
        }
    }
}
