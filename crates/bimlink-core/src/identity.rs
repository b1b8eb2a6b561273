//! Geometry identity: stable element GUIDs vs. per-load local ids
//!
//! A GUID survives reloads of the same source model. A local id is handed out
//! by the rendering engine for one loaded model instance only, so an
//! [`IdentityMap`] is rebuilt on every load and tagged with a generation.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::warn;

/// Per-load geometry identifier assigned by the rendering engine
pub type LocalId = u32;

/// Handle of a loaded model inside the rendering engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ModelId(pub u32);

impl std::fmt::Display for ModelId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One element as listed by the rendering engine
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ElementIdentity {
    pub local_id: LocalId,
    /// Missing or blank when the source element carries no GlobalId
    pub guid: Option<String>,
}

impl ElementIdentity {
    pub fn new(local_id: LocalId, guid: impl Into<String>) -> Self {
        Self {
            local_id,
            guid: Some(guid.into()),
        }
    }
}

/// A resolved element inside a specific load of a model
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ElementRef {
    pub model: ModelId,
    pub generation: u64,
    pub local_id: LocalId,
}

/// GUID <-> local id table for one loaded model instance
#[derive(Debug, Clone)]
pub struct IdentityMap {
    model: ModelId,
    generation: u64,
    by_guid: HashMap<String, LocalId>,
    by_local: HashMap<LocalId, String>,
}

impl IdentityMap {
    /// Build from the engine's element listing.
    ///
    /// Elements without a usable GUID are skipped. If two local ids report
    /// the same GUID the first one is kept.
    pub fn build<I>(model: ModelId, generation: u64, elements: I) -> Self
    where
        I: IntoIterator<Item = ElementIdentity>,
    {
        let mut map = Self {
            model,
            generation,
            by_guid: HashMap::new(),
            by_local: HashMap::new(),
        };

        for element in elements {
            let Some(guid) = element.guid.map(|g| g.trim().to_string()) else {
                continue;
            };
            if guid.is_empty() {
                continue;
            }
            if let Some(existing) = map.by_guid.get(&guid) {
                warn!(
                    model = %model,
                    guid = %guid,
                    kept = existing,
                    ignored = element.local_id,
                    "Duplicate GUID in model"
                );
                continue;
            }
            map.by_local.insert(element.local_id, guid.clone());
            map.by_guid.insert(guid, element.local_id);
        }

        map
    }

    pub fn model(&self) -> ModelId {
        self.model
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn len(&self) -> usize {
        self.by_guid.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_guid.is_empty()
    }

    /// GUID -> local id
    pub fn lookup(&self, guid: &str) -> Option<LocalId> {
        self.by_guid.get(guid.trim()).copied()
    }

    /// GUID -> element reference tagged with this map's generation
    pub fn element(&self, guid: &str) -> Option<ElementRef> {
        self.lookup(guid).map(|local_id| ElementRef {
            model: self.model,
            generation: self.generation,
            local_id,
        })
    }

    /// Local id -> GUID
    pub fn guid_of(&self, local_id: LocalId) -> Option<&str> {
        self.by_local.get(&local_id).map(|s| s.as_str())
    }

    /// GUID of a previously resolved element, or `None` if the reference
    /// belongs to another model or an older load
    pub fn guid_of_ref(&self, element: &ElementRef) -> Option<&str> {
        if element.model != self.model || element.generation != self.generation {
            return None;
        }
        self.guid_of(element.local_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Vec<ElementIdentity> {
        vec![
            ElementIdentity::new(5, "G1"),
            ElementIdentity::new(6, "G3"),
            ElementIdentity {
                local_id: 7,
                guid: None,
            },
            ElementIdentity::new(8, "  "),
        ]
    }

    #[test]
    fn test_build_skips_missing_guids() {
        let map = IdentityMap::build(ModelId(0), 1, sample());
        assert_eq!(map.model(), ModelId(0));
        assert_eq!(map.len(), 2);
        assert_eq!(map.lookup("G1"), Some(5));
        assert_eq!(map.lookup("G2"), None);
        assert_eq!(map.guid_of(6), Some("G3"));
        assert_eq!(map.guid_of(7), None);
    }

    #[test]
    fn test_duplicate_guid_keeps_first() {
        let map = IdentityMap::build(
            ModelId(0),
            1,
            vec![ElementIdentity::new(1, "G1"), ElementIdentity::new(2, "G1")],
        );
        assert_eq!(map.lookup("G1"), Some(1));
        assert_eq!(map.guid_of(2), None);
    }

    #[test]
    fn test_stale_reference_does_not_resolve() {
        let first = IdentityMap::build(ModelId(0), 1, sample());
        let stale = first.element("G1").unwrap();

        let reloaded = IdentityMap::build(ModelId(0), 2, vec![ElementIdentity::new(5, "G9")]);
        assert_eq!(reloaded.guid_of_ref(&stale), None);
        assert_eq!(reloaded.lookup("G1"), None);
    }
}
