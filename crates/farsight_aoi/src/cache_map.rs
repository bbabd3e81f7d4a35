//! Arena-backed store of entity caches with stable handles.
//!
//! The known-entity queue needs to reference cache entries across inserts
//! and removals, so entries live in a generational arena: a handle is an
//! (index, generation) pair and resolving a handle whose slot was recycled
//! yields `None` instead of another entity's state.

use std::collections::HashMap;

use farsight_wire::{BinaryWriter, WireError};

use crate::entity_cache::EntityCache;
use crate::error::AoiError;
use crate::types::EntityId;

/// Stable reference to one arena slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CacheHandle {
    index: u32,
    generation: u32,
}

#[derive(Debug)]
struct Slot {
    generation: u32,
    cache: Option<EntityCache>,
}

/// All cache entries for one witness, indexed by entity id.
#[derive(Debug, Default)]
pub struct EntityCacheMap {
    slots: Vec<Slot>,
    free: Vec<u32>,
    by_id: HashMap<EntityId, CacheHandle>,
}

impl EntityCacheMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }

    /// Inserts a fresh cache for `id`. Fails if the entity is already
    /// tracked; callers re-adding during a re-centre use [`find_mut`]
    /// instead.
    ///
    /// [`find_mut`]: Self::find_mut
    pub fn add(&mut self, cache: EntityCache) -> Result<CacheHandle, AoiError> {
        let id = cache.id();
        if self.by_id.contains_key(&id) {
            return Err(AoiError::AlreadyInAoi(id));
        }
        let handle = match self.free.pop() {
            Some(index) => {
                let slot = &mut self.slots[index as usize];
                slot.cache = Some(cache);
                CacheHandle {
                    index,
                    generation: slot.generation,
                }
            }
            None => {
                let index = self.slots.len() as u32;
                self.slots.push(Slot {
                    generation: 0,
                    cache: Some(cache),
                });
                CacheHandle {
                    index,
                    generation: 0,
                }
            }
        };
        self.by_id.insert(id, handle);
        Ok(handle)
    }

    /// Removes the cache for `id` and returns it. The slot's generation is
    /// bumped so stale queue handles resolve to `None`.
    pub fn del(&mut self, id: EntityId) -> Result<EntityCache, AoiError> {
        let handle = self.by_id.remove(&id).ok_or(AoiError::NotInAoi(id))?;
        let slot = &mut self.slots[handle.index as usize];
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(handle.index);
        slot.cache.take().ok_or(AoiError::NotInAoi(id))
    }

    pub fn handle_of(&self, id: EntityId) -> Option<CacheHandle> {
        self.by_id.get(&id).copied()
    }

    pub fn find(&self, id: EntityId) -> Option<&EntityCache> {
        self.by_id.get(&id).and_then(|h| self.resolve(*h))
    }

    pub fn find_mut(&mut self, id: EntityId) -> Option<&mut EntityCache> {
        let handle = *self.by_id.get(&id)?;
        self.resolve_mut(handle)
    }

    pub fn resolve(&self, handle: CacheHandle) -> Option<&EntityCache> {
        let slot = self.slots.get(handle.index as usize)?;
        if slot.generation != handle.generation {
            return None;
        }
        slot.cache.as_ref()
    }

    pub fn resolve_mut(&mut self, handle: CacheHandle) -> Option<&mut EntityCache> {
        let slot = self.slots.get_mut(handle.index as usize)?;
        if slot.generation != handle.generation {
            return None;
        }
        slot.cache.as_mut()
    }

    /// Read-only traversal over every live entry.
    pub fn visit<F: FnMut(&EntityCache)>(&self, mut f: F) {
        for slot in &self.slots {
            if let Some(cache) = &slot.cache {
                f(cache);
            }
        }
    }

    /// Mutating traversal over every live entry.
    pub fn mutate<F: FnMut(&mut EntityCache)>(&mut self, mut f: F) {
        for slot in &mut self.slots {
            if let Some(cache) = &mut slot.cache {
                f(cache);
            }
        }
    }

    /// Ids of every live entry, collected so callers can mutate the map
    /// while iterating.
    pub fn ids(&self) -> Vec<EntityId> {
        self.by_id.keys().copied().collect()
    }

    /// Streams every entry for witness offload, count-prefixed.
    pub fn write_to_stream(&self, w: &mut BinaryWriter) -> Result<(), WireError> {
        w.write_u32(self.len() as u32);
        self.visit(|cache| cache.write_to_stream(w));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_find_del() {
        let mut map = EntityCacheMap::new();
        let handle = map.add(EntityCache::new(5)).unwrap();
        assert_eq!(map.find(5).map(|c| c.id()), Some(5));
        assert_eq!(map.resolve(handle).map(|c| c.id()), Some(5));

        let cache = map.del(5).unwrap();
        assert_eq!(cache.id(), 5);
        assert!(map.find(5).is_none());
        assert!(map.resolve(handle).is_none());
    }

    #[test]
    fn test_duplicate_add_rejected() {
        let mut map = EntityCacheMap::new();
        map.add(EntityCache::new(5)).unwrap();
        assert!(matches!(
            map.add(EntityCache::new(5)),
            Err(AoiError::AlreadyInAoi(5))
        ));
    }

    #[test]
    fn test_stale_handle_does_not_alias_recycled_slot() {
        let mut map = EntityCacheMap::new();
        let old = map.add(EntityCache::new(1)).unwrap();
        map.del(1).unwrap();
        let new = map.add(EntityCache::new(2)).unwrap();
        // Slot reused, generation differs.
        assert!(map.resolve(old).is_none());
        assert_eq!(map.resolve(new).map(|c| c.id()), Some(2));
    }

    #[test]
    fn test_missing_lookup_is_none_not_error() {
        let map = EntityCacheMap::new();
        assert!(map.find(99).is_none());
    }
}
