//! A per-directory, TTL'd, byte-budgeted cache of child name -> [Type].
//! Each `DirInode` owns one; `LookUpChild` consults it before going to the
//! store, and negative (`Nonexistent`) entries let repeated lookups of a
//! name that doesn't exist skip the store entirely.
use std::time::{Duration, Instant};

use lru::LruCache;
use parking_lot::Mutex;

use crate::core_descriptor::Type;
use crate::name::Name;

/// The approximate per-entry overhead charged against a [TypeCache]'s byte
/// budget: a `Name` is two heap strings plus the map/LRU bookkeeping. We
/// don't track this precisely - it only has to be a reasonable proxy so
/// the cache doesn't grow unbounded on directories with huge fan-out.
const ENTRY_OVERHEAD_BYTES: usize = 64;

struct Entry {
    kind: Type,
    inserted_at: Instant,
}

/// Configuration governing a [TypeCache]'s lifetime and capacity, set once
/// at mount time (see `MountConfig` in `config.rs`).
#[derive(Clone, Copy, Debug)]
pub struct TypeCacheConfig {
    pub ttl: Duration,
    pub max_size_bytes: usize,
    /// Whether `Type::Nonexistent` may be cached at all. When false,
    /// [TypeCache::insert] silently drops negative entries, so repeated
    /// misses always re-check the store.
    pub enable_nonexistent_type_cache: bool,
}

impl Default for TypeCacheConfig {
    fn default() -> Self {
        TypeCacheConfig {
            ttl: Duration::from_secs(60),
            max_size_bytes: 4 << 20,
            enable_nonexistent_type_cache: false,
        }
    }
}

/// A bounded, TTL'd map from a child's [Name] to its last-known [Type].
///
/// Capacity is enforced by estimated byte size rather than entry count
/// (directories can have wildly different name lengths), evicting in LRU
/// order. Expiry is checked lazily on [TypeCache::get]; an expired entry
/// is treated as absent and removed.
pub struct TypeCache {
    config: TypeCacheConfig,
    entries: Mutex<LruCache<Name, Entry>>,
    size_bytes: Mutex<usize>,
}

impl TypeCache {
    pub fn new(config: TypeCacheConfig) -> TypeCache {
        TypeCache {
            config,
            // Unbounded by count; we evict by estimated byte size instead.
            entries: Mutex::new(LruCache::unbounded()),
            size_bytes: Mutex::new(0),
        }
    }

    fn entry_cost(name: &Name) -> usize {
        ENTRY_OVERHEAD_BYTES + name.key().len() + name.bucket().len()
    }

    /// Records `name`'s type. A `Nonexistent` entry is dropped silently if
    /// `enable_nonexistent_type_cache` is false. Evicts LRU entries first
    /// if needed to stay within `max_size_bytes`.
    pub fn insert(&self, name: Name, kind: Type) {
        if kind == Type::Nonexistent && !self.config.enable_nonexistent_type_cache {
            return;
        }

        let cost = Self::entry_cost(&name);
        let mut entries = self.entries.lock();
        let mut size = self.size_bytes.lock();

        // Re-inserting an existing name doesn't change the byte total
        // (the cost only depends on the name, which is unchanged); only a
        // genuinely new name needs budget accounted for.
        let already_present = entries.contains(&name);
        let added_cost = if already_present { 0 } else { cost };

        while *size + added_cost > self.config.max_size_bytes {
            match entries.pop_lru() {
                Some((evicted_name, _)) => {
                    *size = size.saturating_sub(Self::entry_cost(&evicted_name));
                }
                None => break,
            }
        }

        entries.put(
            name,
            Entry {
                kind,
                inserted_at: Instant::now(),
            },
        );
        *size += added_cost;
    }

    /// Looks up `name`'s cached type, if any and unexpired. An expired
    /// entry is evicted and treated as a miss.
    pub fn get(&self, name: &Name) -> Option<Type> {
        let mut entries = self.entries.lock();
        let expired = match entries.peek(name) {
            Some(entry) => entry.inserted_at.elapsed() > self.config.ttl,
            None => return None,
        };
        if expired {
            if let Some((evicted_name, _)) = entries.pop_entry(name) {
                let mut size = self.size_bytes.lock();
                *size = size.saturating_sub(Self::entry_cost(&evicted_name));
            }
            return None;
        }
        entries.get(name).map(|e| e.kind)
    }

    /// Removes any cached entry for `name`, e.g. after a create/delete
    /// that the dispatch layer already knows invalidates it.
    pub fn erase(&self, name: &Name) {
        let mut entries = self.entries.lock();
        if let Some((evicted_name, _)) = entries.pop_entry(name) {
            let mut size = self.size_bytes.lock();
            *size = size.saturating_sub(Self::entry_cost(&evicted_name));
        }
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

trait LruCacheExt<K, V> {
    fn pop_entry(&mut self, k: &K) -> Option<(K, V)>;
}

impl<K: std::hash::Hash + Eq + Clone, V> LruCacheExt<K, V> for LruCache<K, V> {
    fn pop_entry(&mut self, k: &K) -> Option<(K, V)> {
        self.pop(k).map(|v| (k.clone(), v))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn name(rel: &str) -> Name {
        let root = Name::new_root("");
        Name::new_file(&root, rel)
    }

    fn cfg(ttl: Duration, max_size_bytes: usize, enable_nonexistent: bool) -> TypeCacheConfig {
        TypeCacheConfig {
            ttl,
            max_size_bytes,
            enable_nonexistent_type_cache: enable_nonexistent,
        }
    }

    #[test]
    fn insert_then_get() {
        let cache = TypeCache::new(cfg(Duration::from_secs(60), 1 << 20, true));
        let n = name("a");
        cache.insert(n.clone(), Type::RegularFile);
        assert_eq!(cache.get(&n), Some(Type::RegularFile));
    }

    #[test]
    fn nonexistent_entries_gated_by_config() {
        let cache = TypeCache::new(cfg(Duration::from_secs(60), 1 << 20, false));
        let n = name("missing");
        cache.insert(n.clone(), Type::Nonexistent);
        assert_eq!(cache.get(&n), None);
        assert!(cache.is_empty());
    }

    #[test]
    fn nonexistent_entries_cached_when_enabled() {
        let cache = TypeCache::new(cfg(Duration::from_secs(60), 1 << 20, true));
        let n = name("missing");
        cache.insert(n.clone(), Type::Nonexistent);
        assert_eq!(cache.get(&n), Some(Type::Nonexistent));
    }

    #[test]
    fn expired_entry_treated_as_miss() {
        let cache = TypeCache::new(cfg(Duration::from_millis(1), 1 << 20, true));
        let n = name("a");
        cache.insert(n.clone(), Type::RegularFile);
        std::thread::sleep(Duration::from_millis(10));
        assert_eq!(cache.get(&n), None);
        assert!(cache.is_empty());
    }

    #[test]
    fn erase_removes_entry() {
        let cache = TypeCache::new(cfg(Duration::from_secs(60), 1 << 20, true));
        let n = name("a");
        cache.insert(n.clone(), Type::RegularFile);
        cache.erase(&n);
        assert_eq!(cache.get(&n), None);
    }

    #[test]
    fn eviction_respects_byte_budget() {
        // Budget big enough for exactly one small entry.
        let budget = ENTRY_OVERHEAD_BYTES + 1;
        let cache = TypeCache::new(cfg(Duration::from_secs(60), budget, true));
        let a = name("a");
        let b = name("b");
        cache.insert(a.clone(), Type::RegularFile);
        cache.insert(b.clone(), Type::RegularFile);
        // Inserting b should have evicted a (LRU).
        assert_eq!(cache.get(&a), None);
        assert_eq!(cache.get(&b), Some(Type::RegularFile));
    }
}
