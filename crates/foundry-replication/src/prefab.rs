//! Named entity factories used to build the local counterpart of an entity
//! announced by another peer.

use std::collections::BTreeMap;
use std::fmt;

use crate::entity::{EntityBuilder, NetworkEntity};
use crate::error::ReplicationError;

type Factory = Box<dyn Fn(EntityBuilder<'_>) -> Result<NetworkEntity, ReplicationError>>;

/// Maps prefab names to functions that attach the prefab's components.
///
/// A factory must attach the same components, in the same order, as the code
/// that created the original entity, so slot indices line up.
#[derive(Default)]
pub struct PrefabRegistry {
    factories: BTreeMap<String, Factory>,
}

impl PrefabRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `factory` under `name`, replacing any previous one.
    pub fn register(
        &mut self,
        name: impl Into<String>,
        factory: impl Fn(EntityBuilder<'_>) -> Result<NetworkEntity, ReplicationError> + 'static,
    ) {
        self.factories.insert(name.into(), Box::new(factory));
    }

    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }

    /// Build an entity from the prefab `name`.
    pub fn build(
        &self,
        name: &str,
        builder: EntityBuilder<'_>,
    ) -> Result<NetworkEntity, ReplicationError> {
        let factory = self
            .factories
            .get(name)
            .ok_or_else(|| ReplicationError::UnknownPrefab(name.to_string()))?;
        factory(builder.prefab(name))
    }
}

impl fmt::Debug for PrefabRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.factories.keys()).finish()
    }
}
