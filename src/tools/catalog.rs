//! Unified tool catalog built from per-backend tool lists
//!
//! A catalog is an immutable snapshot: it is built in one pass by
//! [`ToolCatalog::merge`] and replaced wholesale on the next refresh.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use super::definition::{ToolDescriptor, ToolSpec};

/// Separator between backend id and tool name for qualified names
pub const QUALIFIER_SEPARATOR: &str = "__";

/// What to do when two backends advertise the same tool name
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CollisionPolicy {
    /// First registered backend keeps the name; later duplicates are dropped
    #[default]
    Reject,
    /// Later duplicates are exposed as `<backend>__<name>`
    Qualify,
}

impl CollisionPolicy {
    /// Parse from string representation
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "reject" | "first-wins" | "first_wins" => Some(Self::Reject),
            "qualify" | "prefix" => Some(Self::Qualify),
            _ => None,
        }
    }
}

/// How a colliding tool was handled
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CollisionOutcome {
    /// Dropped from the catalog
    Rejected,
    /// Exposed under this qualified name
    Qualified(String),
}

/// A name collision observed while merging
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Collision {
    pub name: String,
    /// Backend that kept the name
    pub kept_by: String,
    /// Backend whose tool lost
    pub backend: String,
    pub outcome: CollisionOutcome,
}

/// Immutable snapshot of every tool the router can dispatch
#[derive(Debug, Clone, Default)]
pub struct ToolCatalog {
    tools: Vec<ToolDescriptor>,
    index: HashMap<String, usize>,
    sources: Vec<String>,
}

impl ToolCatalog {
    /// Create an empty catalog
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge per-backend tool lists in the given (registration) order.
    ///
    /// Same input always yields the same catalog and collision list.
    pub fn merge(
        policy: CollisionPolicy,
        lists: Vec<(String, Vec<ToolSpec>)>,
    ) -> (Self, Vec<Collision>) {
        let mut catalog = Self::new();
        let mut collisions = Vec::new();

        for (backend, specs) in lists {
            catalog.sources.push(backend.clone());

            for spec in specs {
                let descriptor = ToolDescriptor::from_spec(spec, backend.clone());
                let Some(kept_by) = catalog.get(&descriptor.name).map(|t| t.backend.clone()) else {
                    catalog.push(descriptor);
                    continue;
                };

                let outcome = match policy {
                    CollisionPolicy::Reject => CollisionOutcome::Rejected,
                    CollisionPolicy::Qualify => {
                        let qualified = format!("{}{}{}", backend, QUALIFIER_SEPARATOR, descriptor.name);
                        if catalog.contains(&qualified) {
                            CollisionOutcome::Rejected
                        } else {
                            catalog.push(descriptor.clone().renamed(qualified.clone()));
                            CollisionOutcome::Qualified(qualified)
                        }
                    }
                };

                match &outcome {
                    CollisionOutcome::Rejected => log::warn!(
                        "Tool '{}' from backend '{}' rejected: name already owned by '{}'",
                        descriptor.name,
                        backend,
                        kept_by
                    ),
                    CollisionOutcome::Qualified(q) => log::info!(
                        "Tool '{}' from backend '{}' exposed as '{}' (name owned by '{}')",
                        descriptor.name,
                        backend,
                        q,
                        kept_by
                    ),
                }

                collisions.push(Collision {
                    name: descriptor.name,
                    kept_by,
                    backend: backend.clone(),
                    outcome,
                });
            }
        }

        (catalog, collisions)
    }

    fn push(&mut self, descriptor: ToolDescriptor) {
        self.index.insert(descriptor.name.clone(), self.tools.len());
        self.tools.push(descriptor);
    }

    /// Get a tool by unified name
    pub fn get(&self, name: &str) -> Option<&ToolDescriptor> {
        self.index.get(name).map(|&i| &self.tools[i])
    }

    /// Check if a tool exists
    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    /// All tools in catalog order
    pub fn all(&self) -> impl Iterator<Item = &ToolDescriptor> {
        self.tools.iter()
    }

    /// Tool names in catalog order
    pub fn names(&self) -> Vec<&str> {
        self.tools.iter().map(|t| t.name.as_str()).collect()
    }

    /// Tools owned by one backend
    pub fn by_backend(&self, backend: &str) -> Vec<&ToolDescriptor> {
        self.tools.iter().filter(|t| t.backend == backend).collect()
    }

    /// Backends whose tool lists went into this snapshot, in merge order
    pub fn sources(&self) -> &[String] {
        &self.sources
    }

    /// Wire specs advertised to callers, in catalog order
    pub fn specs(&self) -> Vec<ToolSpec> {
        self.tools.iter().map(ToolDescriptor::to_spec).collect()
    }

    /// Get number of tools
    pub fn len(&self) -> usize {
        self.tools.len()
    }

    /// Check if catalog is empty
    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// SHA-256 over the ordered specs; changes whenever the advertised catalog does
    pub fn fingerprint(&self) -> String {
        fingerprint_specs(&self.specs())
    }
}

/// Fingerprint of an advertised tool list, order-sensitive.
///
/// A router's `tools.list` fingerprint equals this over the specs it returns.
pub fn fingerprint_specs(specs: &[ToolSpec]) -> String {
    let mut hasher = Sha256::new();
    for spec in specs {
        hasher.update(spec.name.as_bytes());
        hasher.update([0u8]);
        hasher.update(spec.description.as_bytes());
        hasher.update([0u8]);
        hasher.update(spec.input_schema.to_string().as_bytes());
        hasher.update([0xffu8]);
    }
    hex::encode(hasher.finalize())
}
