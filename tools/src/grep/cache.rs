//! Result cache for forward-mode queries.
//!
//! - Key: SHA-256 over the length-prefixed query fields
//! - Storage: in-process map, LRU eviction by access tick
//! - TTL measured from insertion; reads do not extend it

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

use sha2::{Digest, Sha256};

use super::engine::FileMatchSet;
use super::query::DEFAULT_GLOB;

/// Canonical query digest.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey(String);

impl CacheKey {
    /// Key for a forward-mode query.
    ///
    /// A missing or blank glob hashes the same as the default glob.
    #[must_use]
    pub fn for_query(
        pattern: &str,
        root: &Path,
        glob: Option<&str>,
        case_insensitive: bool,
        context_lines: usize,
    ) -> Self {
        let glob = glob
            .map(str::trim)
            .filter(|g| !g.is_empty())
            .unwrap_or(DEFAULT_GLOB);
        let case_flag: &[u8] = if case_insensitive { b"1" } else { b"0" };
        let context = context_lines.to_string();
        let fields: [&[u8]; 6] = [
            b"grep",
            pattern.as_bytes(),
            root.as_os_str().as_encoded_bytes(),
            glob.as_bytes(),
            case_flag,
            context.as_bytes(),
        ];

        let mut hasher = Sha256::new();
        for field in fields {
            // Field contents are arbitrary, so each one carries its length.
            hasher.update((field.len() as u64).to_le_bytes());
            hasher.update(field);
        }
        Self(hex_encode(&hasher.finalize()))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

fn hex_encode(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

/// What a forward-mode search stores.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GrepCacheEntry {
    pub matches: Vec<FileMatchSet>,
    pub capped: bool,
}

/// Result cache collaborator.
pub trait GrepCache: Send + Sync {
    fn get_grep(&self, key: &CacheKey) -> Option<GrepCacheEntry>;
    fn set_grep(&self, key: CacheKey, entry: GrepCacheEntry);
}

struct Slot {
    entry: GrepCacheEntry,
    inserted_at: Instant,
    last_access: u64,
}

#[derive(Default)]
struct CacheState {
    slots: HashMap<CacheKey, Slot>,
    tick: u64,
}

impl CacheState {
    fn next_tick(&mut self) -> u64 {
        self.tick += 1;
        self.tick
    }
}

/// In-memory LRU with a TTL.
pub struct MemoryGrepCache {
    state: Mutex<CacheState>,
    max_entries: usize,
    ttl: Duration,
}

impl MemoryGrepCache {
    #[must_use]
    pub fn new(max_entries: usize, ttl: Duration) -> Self {
        Self {
            state: Mutex::new(CacheState::default()),
            max_entries,
            ttl,
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .slots
            .len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl std::fmt::Debug for MemoryGrepCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryGrepCache")
            .field("entries", &self.len())
            .field("max_entries", &self.max_entries)
            .field("ttl", &self.ttl)
            .finish()
    }
}

impl GrepCache for MemoryGrepCache {
    fn get_grep(&self, key: &CacheKey) -> Option<GrepCacheEntry> {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        let expired = state
            .slots
            .get(key)
            .map(|slot| slot.inserted_at.elapsed() >= self.ttl)?;
        if expired {
            state.slots.remove(key);
            return None;
        }
        let tick = state.next_tick();
        let slot = state.slots.get_mut(key)?;
        slot.last_access = tick;
        Some(slot.entry.clone())
    }

    fn set_grep(&self, key: CacheKey, entry: GrepCacheEntry) {
        if self.max_entries == 0 {
            return;
        }
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        let tick = state.next_tick();
        state.slots.insert(
            key,
            Slot {
                entry,
                inserted_at: Instant::now(),
                last_access: tick,
            },
        );
        while state.slots.len() > self.max_entries {
            let Some(oldest) = state
                .slots
                .iter()
                .min_by_key(|(_, slot)| slot.last_access)
                .map(|(key, _)| key.clone())
            else {
                break;
            };
            state.slots.remove(&oldest);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{CacheKey, GrepCache, GrepCacheEntry, MemoryGrepCache};
    use std::path::Path;
    use std::time::Duration;

    fn entry(capped: bool) -> GrepCacheEntry {
        GrepCacheEntry {
            matches: Vec::new(),
            capped,
        }
    }

    fn key(pattern: &str) -> CacheKey {
        CacheKey::for_query(pattern, Path::new("/repo"), None, false, 0)
    }

    #[test]
    fn key_is_deterministic_hex() {
        let a = key("TODO");
        let b = key("TODO");
        assert_eq!(a, b);
        assert_eq!(a.as_str().len(), 64);
        assert!(a.as_str().chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn default_glob_spellings_share_a_key() {
        let root = Path::new("/repo");
        let none = CacheKey::for_query("x", root, None, false, 0);
        let blank = CacheKey::for_query("x", root, Some(" "), false, 0);
        let explicit = CacheKey::for_query("x", root, Some("**/*"), false, 0);
        assert_eq!(none, blank);
        assert_eq!(none, explicit);
    }

    #[test]
    fn every_field_changes_the_key() {
        let root = Path::new("/repo");
        let base = CacheKey::for_query("x", root, None, false, 0);
        assert_ne!(base, CacheKey::for_query("y", root, None, false, 0));
        assert_ne!(base, CacheKey::for_query("x", Path::new("/other"), None, false, 0));
        assert_ne!(base, CacheKey::for_query("x", root, Some("*.rs"), false, 0));
        assert_ne!(base, CacheKey::for_query("x", root, None, true, 0));
        assert_ne!(base, CacheKey::for_query("x", root, None, false, 2));
    }

    #[test]
    fn newlines_in_fields_do_not_collide() {
        let root = Path::new("/repo");
        let split = CacheKey::for_query("a\n/repo", Path::new("b"), None, false, 0);
        let plain = CacheKey::for_query("a", Path::new("/repo\nb"), None, false, 0);
        assert_ne!(split, plain);

        let spilled = CacheKey::for_query("x\n**/*.rs", root, None, false, 0);
        let globbed = CacheKey::for_query("x", root, Some("**/*.rs"), false, 0);
        assert_ne!(spilled, globbed);
    }

    #[test]
    fn get_returns_stored_entry() {
        let cache = MemoryGrepCache::new(4, Duration::from_secs(60));
        cache.set_grep(key("a"), entry(true));
        assert!(cache.get_grep(&key("a")).unwrap().capped);
        assert!(cache.get_grep(&key("b")).is_none());
    }

    #[test]
    fn least_recently_used_is_evicted() {
        let cache = MemoryGrepCache::new(2, Duration::from_secs(60));
        cache.set_grep(key("a"), entry(false));
        cache.set_grep(key("b"), entry(false));
        assert!(cache.get_grep(&key("a")).is_some());
        cache.set_grep(key("c"), entry(false));
        assert_eq!(cache.len(), 2);
        assert!(cache.get_grep(&key("a")).is_some());
        assert!(cache.get_grep(&key("b")).is_none());
        assert!(cache.get_grep(&key("c")).is_some());
    }

    #[test]
    fn expired_entries_miss_and_are_removed() {
        let cache = MemoryGrepCache::new(4, Duration::ZERO);
        cache.set_grep(key("a"), entry(false));
        assert!(cache.get_grep(&key("a")).is_none());
        assert!(cache.is_empty());
    }

    #[test]
    fn zero_capacity_stores_nothing() {
        let cache = MemoryGrepCache::new(0, Duration::from_secs(60));
        cache.set_grep(key("a"), entry(false));
        assert!(cache.is_empty());
    }
}
