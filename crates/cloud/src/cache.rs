//! LRU cache of decoded archive tiles.

use crate::tile_index::TileId;
use lru::LruCache;
use std::num::NonZeroUsize;
use std::sync::Arc;
use zonestats_core::Raster;

/// Key for cached tiles: archive tile and year.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TileKey {
    pub tile: TileId,
    pub year: i32,
}

/// LRU cache storing decoded tiles.
pub struct TileCache {
    inner: LruCache<TileKey, Arc<Raster<f32>>>,
}

impl TileCache {
    /// Create a new cache with the given capacity (number of tiles).
    pub fn new(capacity: usize) -> Self {
        let cap = NonZeroUsize::new(capacity.max(1)).unwrap_or(NonZeroUsize::MIN);
        Self {
            inner: LruCache::new(cap),
        }
    }

    /// Get a cached tile, if present.
    pub fn get(&mut self, key: &TileKey) -> Option<Arc<Raster<f32>>> {
        self.inner.get(key).cloned()
    }

    /// Insert a tile into the cache.
    pub fn insert(&mut self, key: TileKey, tile: Arc<Raster<f32>>) {
        self.inner.put(key, tile);
    }

    /// Number of tiles currently cached.
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    /// Whether the cache is empty.
    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    /// Clear all cached tiles.
    pub fn clear(&mut self) {
        self.inner.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(west: i32, year: i32) -> TileKey {
        TileKey {
            tile: TileId {
                north: 10,
                west,
                size: 10,
            },
            year,
        }
    }

    #[test]
    fn test_cache_insert_get() {
        let mut cache = TileCache::new(2);
        cache.insert(key(20, 2019), Arc::new(Raster::filled(2, 2, 1.0)));
        assert!(cache.get(&key(20, 2019)).is_some());
        assert!(cache.get(&key(20, 2020)).is_none());
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_cache_eviction() {
        let mut cache = TileCache::new(2);
        let (k1, k2, k3) = (key(0, 2019), key(10, 2019), key(20, 2019));

        cache.insert(k1, Arc::new(Raster::new(1, 1)));
        cache.insert(k2, Arc::new(Raster::new(1, 1)));
        cache.insert(k3, Arc::new(Raster::new(1, 1))); // evicts k1

        assert!(cache.get(&k1).is_none());
        assert!(cache.get(&k2).is_some());
        assert!(cache.get(&k3).is_some());
    }
}
