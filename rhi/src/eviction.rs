//! LRU bookkeeping for evictable textures.
//!
//! The [`EvictionManager`] only tracks recency and resident bytes. Deciding
//! what to evict and performing the eviction happens in the texture
//! registry, which walks [`EvictionManager::lru_order`] from the
//! least-recently-used end.

use std::num::NonZeroUsize;

use lru::LruCache;

use crate::resources::TextureKey;

/// Bounded recency list of resident evictable textures.
pub struct EvictionManager {
    lru: LruCache<TextureKey, u64>,
    resident_bytes: u64,
}

impl EvictionManager {
    /// Create a list holding at most `capacity` textures.
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            lru: LruCache::new(capacity),
            resident_bytes: 0,
        }
    }

    /// Add a texture as most recently used. Returns false if the list is full.
    pub fn insert(&mut self, key: TextureKey, bytes: u64) -> bool {
        if self.lru.get(&key).is_some() {
            return true;
        }
        if self.lru.len() >= self.lru.cap().get() {
            return false;
        }
        self.lru.put(key, bytes);
        self.resident_bytes += bytes;
        true
    }

    /// Remove a texture. Returns false if it was not on the list.
    pub fn remove(&mut self, key: TextureKey) -> bool {
        match self.lru.pop(&key) {
            Some(bytes) => {
                self.resident_bytes -= bytes;
                true
            }
            None => false,
        }
    }

    /// Mark a texture as most recently used.
    pub fn touch(&mut self, key: TextureKey) -> bool {
        self.lru.get(&key).is_some()
    }

    pub fn contains(&self, key: TextureKey) -> bool {
        self.lru.contains(&key)
    }

    /// Keys from least to most recently used.
    pub fn lru_order(&self) -> Vec<TextureKey> {
        self.lru.iter().rev().map(|(key, _)| *key).collect()
    }

    pub fn len(&self) -> usize {
        self.lru.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lru.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.lru.cap().get()
    }

    /// Driver memory held by the textures on the list.
    pub fn resident_bytes(&self) -> u64 {
        self.resident_bytes
    }

    /// Forget every entry.
    pub fn clear(&mut self) {
        self.lru.clear();
        self.resident_bytes = 0;
    }
}

impl std::fmt::Debug for EvictionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EvictionManager")
            .field("len", &self.lru.len())
            .field("capacity", &self.lru.cap())
            .field("resident_bytes", &self.resident_bytes)
            .finish()
    }
}
