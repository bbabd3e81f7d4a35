//! Priority scheduling queue over cache handles.
//!
//! A binary min-heap keyed by cache priority: lower priority means more
//! urgent. The heap is maintained with explicit sift operations over a
//! `Vec` because the witness update loop pops a run of entries, processes
//! some, and re-pushes the survivors; `std::collections::BinaryHeap` cannot
//! express that drain cheaply.
//!
//! Entries whose handle no longer resolves (the cache was deleted) are
//! treated as infinitely non-urgent and fall out on pop. No ordering is
//! guaranteed among entries of equal priority.

use crate::cache_map::{CacheHandle, EntityCacheMap};

#[derive(Debug, Default)]
pub struct KnownEntityQueue {
    heap: Vec<CacheHandle>,
}

impl KnownEntityQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    fn key(&self, map: &EntityCacheMap, handle: CacheHandle) -> f64 {
        map.resolve(handle).map(|c| c.priority()).unwrap_or(f64::INFINITY)
    }

    /// Adds a handle, restoring the heap property.
    pub fn push(&mut self, handle: CacheHandle, map: &EntityCacheMap) {
        self.heap.push(handle);
        self.sift_up(self.heap.len() - 1, map);
    }

    /// Priority at the front of the queue, if any live entry remains.
    pub fn front_priority(&self, map: &EntityCacheMap) -> Option<f64> {
        self.heap
            .first()
            .map(|h| self.key(map, *h))
            .filter(|p| p.is_finite())
    }

    /// Removes and returns the most urgent handle. Stale handles are
    /// discarded silently.
    pub fn pop(&mut self, map: &EntityCacheMap) -> Option<CacheHandle> {
        loop {
            if self.heap.is_empty() {
                return None;
            }
            let last = self.heap.len() - 1;
            self.heap.swap(0, last);
            let handle = self.heap.pop()?;
            if last > 0 {
                self.sift_down(0, map);
            }
            if map.resolve(handle).is_some() {
                return Some(handle);
            }
        }
    }

    fn sift_up(&mut self, mut i: usize, map: &EntityCacheMap) {
        while i > 0 {
            let parent = (i - 1) / 2;
            if self.key(map, self.heap[i]) < self.key(map, self.heap[parent]) {
                self.heap.swap(i, parent);
                i = parent;
            } else {
                break;
            }
        }
    }

    fn sift_down(&mut self, mut i: usize, map: &EntityCacheMap) {
        let n = self.heap.len();
        loop {
            let left = 2 * i + 1;
            let right = 2 * i + 2;
            let mut smallest = i;
            if left < n && self.key(map, self.heap[left]) < self.key(map, self.heap[smallest]) {
                smallest = left;
            }
            if right < n && self.key(map, self.heap[right]) < self.key(map, self.heap[smallest]) {
                smallest = right;
            }
            if smallest == i {
                return;
            }
            self.heap.swap(i, smallest);
            i = smallest;
        }
    }

    /// Rebuilds the heap after a batch of priority mutations.
    pub fn make_heap(&mut self, map: &EntityCacheMap) {
        for i in (0..self.heap.len() / 2).rev() {
            self.sift_down(i, map);
        }
    }

    /// Verifies the heap property. Test and diagnostics helper.
    pub fn is_heap(&self, map: &EntityCacheMap) -> bool {
        (1..self.heap.len()).all(|i| {
            let parent = (i - 1) / 2;
            self.key(map, self.heap[parent]) <= self.key(map, self.heap[i])
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity_cache::EntityCache;

    fn add_with_priority(map: &mut EntityCacheMap, id: u32, priority: f64) -> CacheHandle {
        let mut cache = EntityCache::new(id);
        cache.set_priority(priority);
        map.add(cache).unwrap()
    }

    #[test]
    fn test_pops_in_priority_order() {
        let mut map = EntityCacheMap::new();
        let mut queue = KnownEntityQueue::new();
        for (id, p) in [(1u32, 5.0), (2, 1.0), (3, 9.0), (4, 3.0), (5, 7.0)] {
            let h = add_with_priority(&mut map, id, p);
            queue.push(h, &map);
            assert!(queue.is_heap(&map));
        }

        let mut order = Vec::new();
        while let Some(h) = queue.pop(&map) {
            order.push(map.resolve(h).unwrap().id());
        }
        assert_eq!(order, vec![2, 4, 1, 5, 3]);
    }

    #[test]
    fn test_stale_handles_fall_out() {
        let mut map = EntityCacheMap::new();
        let mut queue = KnownEntityQueue::new();
        let h1 = add_with_priority(&mut map, 1, 1.0);
        let h2 = add_with_priority(&mut map, 2, 2.0);
        queue.push(h1, &map);
        queue.push(h2, &map);

        map.del(1).unwrap();
        let popped = queue.pop(&map).unwrap();
        assert_eq!(map.resolve(popped).unwrap().id(), 2);
        assert!(queue.pop(&map).is_none());
    }

    #[test]
    fn test_make_heap_after_mutation() {
        let mut map = EntityCacheMap::new();
        let mut queue = KnownEntityQueue::new();
        let handles: Vec<_> = (0..10u32)
            .map(|i| {
                let h = add_with_priority(&mut map, i + 1, i as f64);
                queue.push(h, &map);
                h
            })
            .collect();

        for (i, h) in handles.iter().enumerate() {
            if let Some(cache) = map.resolve_mut(*h) {
                cache.set_priority((10 - i) as f64);
            }
        }
        queue.make_heap(&map);
        assert!(queue.is_heap(&map));
        assert_eq!(map.resolve(queue.pop(&map).unwrap()).unwrap().id(), 10);
    }

    #[test]
    fn test_front_priority() {
        let mut map = EntityCacheMap::new();
        let mut queue = KnownEntityQueue::new();
        assert!(queue.front_priority(&map).is_none());
        let h = add_with_priority(&mut map, 1, 4.5);
        queue.push(h, &map);
        assert_eq!(queue.front_priority(&map), Some(4.5));
    }
}
