//! Capability model for plugin views.
//!
//! Capabilities are assigned by the host at install time and enforced at the
//! bridge edge. A manifest cannot grant itself anything:
//! - Native views get read, write and navigate
//! - Sandboxed views get read and navigate
//! - Enterprise policy may strip any of them

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// A named permission a view may hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Capability {
    Read,
    Write,
    Navigate,
}

impl Capability {
    pub const ALL: [Capability; 3] = [Self::Read, Self::Write, Self::Navigate];

    /// Returns the policy/config name for this capability.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Read => "read",
            Self::Write => "write",
            Self::Navigate => "navigate",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.name() == name)
    }

    /// Capability a `view.data.*` operation requires.
    pub fn for_data_operation(operation: &str) -> Option<Self> {
        match operation {
            "query" | "get" => Some(Self::Read),
            "create" | "update" | "delete" => Some(Self::Write),
            _ => None,
        }
    }
}

/// Set of capabilities granted to a view.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapabilitySet {
    granted: BTreeSet<Capability>,
}

impl CapabilitySet {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Full trust: everything granted.
    pub fn native_default() -> Self {
        Self::from_iter(Capability::ALL)
    }

    /// Isolated views may read and ask to navigate, but not write.
    pub fn sandboxed_default() -> Self {
        Self::from_iter([Capability::Read, Capability::Navigate])
    }

    pub fn is_granted(&self, capability: Capability) -> bool {
        self.granted.contains(&capability)
    }

    pub fn grant(&mut self, capability: Capability) {
        self.granted.insert(capability);
    }

    pub fn revoke(&mut self, capability: Capability) {
        self.granted.remove(&capability);
    }

    pub fn iter(&self) -> impl Iterator<Item = Capability> + '_ {
        self.granted.iter().copied()
    }

    pub fn len(&self) -> usize {
        self.granted.len()
    }

    pub fn is_empty(&self) -> bool {
        self.granted.is_empty()
    }
}

impl FromIterator<Capability> for CapabilitySet {
    fn from_iter<I: IntoIterator<Item = Capability>>(iter: I) -> Self {
        Self {
            granted: iter.into_iter().collect(),
        }
    }
}
