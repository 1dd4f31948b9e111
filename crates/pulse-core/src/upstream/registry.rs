use std::{collections::HashMap, sync::Arc};
use thiserror::Error;

use crate::types::{ResourceKey, UpstreamTarget};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RegistryError {
    #[error("no upstreams configured")]
    Empty,
    #[error("duplicate upstream id: {0}")]
    DuplicateId(String),
}

/// Immutable table of every configured upstream, in configuration order.
///
/// Built once at startup. Lookups by id are O(1).
#[derive(Debug, Clone)]
pub struct EndpointRegistry {
    targets: Vec<Arc<UpstreamTarget>>,
    by_id: HashMap<Arc<str>, usize>,
}

impl EndpointRegistry {
    /// # Errors
    ///
    /// Returns [`RegistryError`] if `targets` is empty or contains a duplicate id.
    pub fn from_targets(targets: Vec<UpstreamTarget>) -> Result<Self, RegistryError> {
        if targets.is_empty() {
            return Err(RegistryError::Empty);
        }

        let mut by_id = HashMap::with_capacity(targets.len());
        let mut shared = Vec::with_capacity(targets.len());
        for (index, target) in targets.into_iter().enumerate() {
            if by_id.insert(Arc::clone(&target.id), index).is_some() {
                return Err(RegistryError::DuplicateId(target.id.to_string()));
            }
            shared.push(Arc::new(target));
        }

        Ok(Self { targets: shared, by_id })
    }

    #[must_use]
    pub fn get(&self, upstream_id: &str) -> Option<&Arc<UpstreamTarget>> {
        self.by_id.get(upstream_id).map(|&index| &self.targets[index])
    }

    #[must_use]
    pub fn all(&self) -> &[Arc<UpstreamTarget>] {
        &self.targets
    }

    /// Pairs every target with every requested key it can serve.
    ///
    /// Keys no target serves produce no pairs. Repeated keys produce one pair.
    #[must_use]
    pub fn targets_for(&self, keys: &[ResourceKey]) -> Vec<(Arc<UpstreamTarget>, ResourceKey)> {
        let mut unique: Vec<&ResourceKey> = Vec::with_capacity(keys.len());
        for key in keys {
            if !unique.contains(&key) {
                unique.push(key);
            }
        }

        self.targets
            .iter()
            .flat_map(|target| {
                unique
                    .iter()
                    .copied()
                    .filter(|key| target.serves(key))
                    .map(|key| (Arc::clone(target), key.clone()))
            })
            .collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.targets.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }
}
