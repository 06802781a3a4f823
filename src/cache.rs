//! # Result Cache
//!
//! Memoizes the final value computed for a cell address. An entry is
//! valid only while the cube's data version, rules version and every
//! dimension's structure version match the [`VersionStamp`] recorded
//! with it; a stale entry is evicted lazily on the lookup that finds it.
//! Writes, structural commits and rule registry changes each bump a
//! version counter, which makes every affected entry unreachable
//! without walking the cache.
//!
//! Eviction is LRU with a configurable capacity, implemented as a
//! touch-counter queue: every access pushes a fresh (key, touch) pair
//! and eviction pops until it finds a pair whose touch is current.

use crate::address::GeneralAddress;
use crate::value::CellValue;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};

/// Versions a cached value depends on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct VersionStamp {
    pub data: u64,
    pub rules: u64,
    /// One structure version per cube dimension, in cube order
    pub structure: Box<[u64]>,
}

struct CacheEntry {
    value: CellValue,
    stamp: VersionStamp,
    touch: u64,
}

struct CacheInner {
    map: HashMap<GeneralAddress, CacheEntry>,
    order: VecDeque<(GeneralAddress, u64)>,
    touch: u64,
}

/// Bounded, version-checked result cache for one cube.
pub(crate) struct ResultCache {
    capacity: usize,
    inner: Mutex<CacheInner>,
}

impl ResultCache {
    pub fn new(capacity: usize) -> Self {
        ResultCache {
            capacity: capacity.max(1),
            inner: Mutex::new(CacheInner {
                map: HashMap::new(),
                order: VecDeque::new(),
                touch: 0,
            }),
        }
    }

    /// Valid cached value for `addr`, or `None`. A hit refreshes the
    /// entry's LRU position; a version mismatch evicts the entry.
    pub fn lookup(&self, addr: &GeneralAddress, current: &VersionStamp) -> Option<CellValue> {
        let mut inner = self.inner.lock();
        let entry = inner.map.get(addr)?;
        if entry.stamp != *current {
            inner.map.remove(addr);
            return None;
        }
        let value = entry.value;
        inner.touch += 1;
        let touch = inner.touch;
        if let Some(entry) = inner.map.get_mut(addr) {
            entry.touch = touch;
        }
        inner.order.push_back((addr.clone(), touch));
        Some(value)
    }

    /// Record the computed value under the stamp it was computed with.
    pub fn publish(&self, addr: GeneralAddress, value: CellValue, stamp: VersionStamp) {
        let mut inner = self.inner.lock();
        inner.touch += 1;
        let touch = inner.touch;
        inner.order.push_back((addr.clone(), touch));
        inner.map.insert(
            addr,
            CacheEntry {
                value,
                stamp,
                touch,
            },
        );
        while inner.map.len() > self.capacity {
            match inner.order.pop_front() {
                Some((key, touch)) => {
                    let current = inner.map.get(&key).map(|e| e.touch);
                    if current == Some(touch) {
                        inner.map.remove(&key);
                    }
                    // otherwise the pair is stale: the key was touched
                    // again later or already evicted
                }
                None => break,
            }
        }
    }

    pub fn len(&self) -> usize {
        self.inner.lock().map.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stamp(data: u64) -> VersionStamp {
        VersionStamp {
            data,
            rules: 1,
            structure: vec![1, 1].into_boxed_slice(),
        }
    }

    fn addr(coords: &[u32]) -> GeneralAddress {
        GeneralAddress::new(coords.to_vec())
    }

    #[test]
    fn test_publish_then_lookup() {
        let cache = ResultCache::new(10);
        cache.publish(addr(&[1, 2]), CellValue::Value(5.0), stamp(1));
        assert_eq!(
            cache.lookup(&addr(&[1, 2]), &stamp(1)),
            Some(CellValue::Value(5.0))
        );
        assert_eq!(cache.lookup(&addr(&[9, 9]), &stamp(1)), None);
    }

    #[test]
    fn test_version_mismatch_evicts() {
        let cache = ResultCache::new(10);
        cache.publish(addr(&[1, 2]), CellValue::Value(5.0), stamp(1));
        // a write bumped the data version
        assert_eq!(cache.lookup(&addr(&[1, 2]), &stamp(2)), None);
        assert_eq!(cache.len(), 0);
        // and the old stamp no longer finds it either
        assert_eq!(cache.lookup(&addr(&[1, 2]), &stamp(1)), None);
    }

    #[test]
    fn test_structure_version_participates() {
        let cache = ResultCache::new(10);
        cache.publish(addr(&[1]), CellValue::Value(5.0), stamp(1));
        let bumped = VersionStamp {
            data: 1,
            rules: 1,
            structure: vec![2, 1].into_boxed_slice(),
        };
        assert_eq!(cache.lookup(&addr(&[1]), &bumped), None);
    }

    #[test]
    fn test_lru_eviction_prefers_cold_entries() {
        let cache = ResultCache::new(2);
        cache.publish(addr(&[1]), CellValue::Value(1.0), stamp(1));
        cache.publish(addr(&[2]), CellValue::Value(2.0), stamp(1));
        // touch [1] so [2] is the coldest
        assert!(cache.lookup(&addr(&[1]), &stamp(1)).is_some());
        cache.publish(addr(&[3]), CellValue::Value(3.0), stamp(1));

        assert_eq!(cache.len(), 2);
        assert!(cache.lookup(&addr(&[1]), &stamp(1)).is_some());
        assert!(cache.lookup(&addr(&[2]), &stamp(1)).is_none());
        assert!(cache.lookup(&addr(&[3]), &stamp(1)).is_some());
    }

    #[test]
    fn test_no_value_results_are_cacheable() {
        let cache = ResultCache::new(4);
        cache.publish(addr(&[1]), CellValue::None, stamp(1));
        assert_eq!(cache.lookup(&addr(&[1]), &stamp(1)), Some(CellValue::None));
    }
}
