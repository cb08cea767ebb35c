//! `Engine`: the single handle tying clock, slab heap, hash index, item
//! manager, and zipmap operations together (spec §9: "no hidden
//! singletons… all operations are methods on it").
//!
//! This is the crate's only public entry point besides the submodule types
//! themselves — it hides the `ItemRef`/refcount bookkeeping that
//! `item::ItemManager` exposes at a lower level (alloc → link → release the
//! caller's own pin) behind the value-in, value-out operation set from
//! spec §4.2/§4.3/§6.

use crate::clock::{Clock, SystemClock};
use crate::config::Config;
use crate::error::Result;
use crate::item::{AnnexResult, DeleteResult, DeltaResult, ItemManager};
use crate::metrics::EngineStats;
use crate::zipmap::{
    self, ZmapAddResult, ZmapDeltaResult, ZmapGetResult, ZmapReplaceResult, ZmapSetResult,
};

/// Outcome of `Engine::set`: the only failure mode is an allocation that
/// couldn't be satisfied even after eviction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetResult {
    Ok,
    NoMemory,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddResult {
    Ok,
    Exists,
    NoMemory,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplaceResult {
    Ok,
    NotFound,
    NoMemory,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CasResult {
    Ok,
    Exists,
    NotFound,
    NoMemory,
}

/// The engine handle. Generic over `Clock` so tests can drive expiry with
/// `ManualClock`; production callers use the `Engine::new` constructor,
/// which wires up a `SystemClock`.
pub struct Engine<C: Clock = SystemClock> {
    items: ItemManager<C>,
}

impl Engine<SystemClock> {
    /// Validate `config` and construct an engine backed by the system
    /// clock. Configuration errors are fatal at start-up (spec §7), never
    /// surfaced at runtime.
    pub fn new(config: Config) -> Result<Self> {
        Self::with_clock(config, SystemClock::new())
    }
}

impl<C: Clock> Engine<C> {
    pub fn with_clock(config: Config, clock: C) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            items: ItemManager::new(config, clock),
        })
    }

    pub fn stats(&self) -> &EngineStats {
        &self.items.stats
    }

    /// `get(key)`: returns the stored value, or `None` if absent or
    /// expired. Expired entries are unlinked as a side effect (spec §4.2).
    pub fn get(&mut self, key: &[u8]) -> Option<Vec<u8>> {
        let head = self.items.get(key)?;
        let value = self.items.value_of(head);
        self.items.remove(head);
        Some(value)
    }

    pub fn contains(&mut self, key: &[u8]) -> bool {
        self.get(key).is_some()
    }

    /// `set(item)`: store `value` under `key` unconditionally, displacing
    /// any prior value.
    pub fn set(&mut self, key: &[u8], value: &[u8], exptime: u32) -> SetResult {
        match self.items.alloc(key, exptime, value) {
            Some(r) => {
                self.items.set(r);
                self.items.remove(r);
                SetResult::Ok
            }
            None => SetResult::NoMemory,
        }
    }

    /// `add(item)`: store only when `key` is absent.
    pub fn add(&mut self, key: &[u8], value: &[u8], exptime: u32) -> AddResult {
        let r = match self.items.alloc(key, exptime, value) {
            Some(r) => r,
            None => return AddResult::NoMemory,
        };
        let outcome = match self.items.add(r) {
            crate::item::AddResult::Ok => AddResult::Ok,
            crate::item::AddResult::Exists => AddResult::Exists,
        };
        self.items.remove(r);
        outcome
    }

    /// `replace(item)`: store only when `key` is present.
    pub fn replace(&mut self, key: &[u8], value: &[u8], exptime: u32) -> ReplaceResult {
        let r = match self.items.alloc(key, exptime, value) {
            Some(r) => r,
            None => return ReplaceResult::NoMemory,
        };
        let outcome = match self.items.replace(r) {
            crate::item::ReplaceResult::Ok => ReplaceResult::Ok,
            crate::item::ReplaceResult::NotFound => ReplaceResult::NotFound,
        };
        self.items.remove(r);
        outcome
    }

    /// `cas(item)`: replace `key`'s value only if its current CAS equals
    /// `expected_cas` (read via `Engine::cas_of`).
    pub fn cas(&mut self, key: &[u8], value: &[u8], exptime: u32, expected_cas: u64) -> CasResult {
        let r = match self.items.alloc(key, exptime, value) {
            Some(r) => r,
            None => return CasResult::NoMemory,
        };
        let outcome = match self.items.cas(r, expected_cas) {
            crate::item::CasResult::Ok => CasResult::Ok,
            crate::item::CasResult::Exists => CasResult::Exists,
            crate::item::CasResult::NotFound => CasResult::NotFound,
        };
        self.items.remove(r);
        outcome
    }

    /// Current CAS value stored for `key`, for a subsequent `cas` call.
    /// `None` if the key is absent.
    pub fn cas_of(&mut self, key: &[u8]) -> Option<u64> {
        let head = self.items.get(key)?;
        let cas = self.items.cas_of(head);
        self.items.remove(head);
        Some(cas)
    }

    pub fn delete(&mut self, key: &[u8]) -> DeleteResult {
        self.items.delete(key)
    }

    pub fn append(&mut self, key: &[u8], delta: &[u8]) -> AnnexResult {
        self.items.append(key, delta)
    }

    pub fn prepend(&mut self, key: &[u8], delta: &[u8]) -> AnnexResult {
        self.items.prepend(key, delta)
    }

    pub fn delta(&mut self, key: &[u8], delta: i64) -> DeltaResult {
        self.items.delta(key, delta)
    }

    pub fn zmap_init(&mut self, primary_key: &[u8]) -> bool {
        zipmap::zmap_init(&mut self.items, primary_key)
    }

    pub fn zmap_len(&mut self, primary_key: &[u8]) -> Option<u32> {
        zipmap::zmap_len(&mut self.items, primary_key)
    }

    pub fn zmap_set(&mut self, primary_key: &[u8], skey: &[u8], value: Vec<u8>) -> ZmapSetResult {
        zipmap::zmap_set(&mut self.items, primary_key, skey, value)
    }

    pub fn zmap_add(&mut self, primary_key: &[u8], skey: &[u8], value: Vec<u8>) -> ZmapAddResult {
        zipmap::zmap_add(&mut self.items, primary_key, skey, value)
    }

    pub fn zmap_replace(
        &mut self,
        primary_key: &[u8],
        skey: &[u8],
        value: Vec<u8>,
    ) -> ZmapReplaceResult {
        zipmap::zmap_replace(&mut self.items, primary_key, skey, value)
    }

    pub fn zmap_delete(&mut self, primary_key: &[u8], skey: &[u8]) -> zipmap::ZmapDeleteResult {
        zipmap::zmap_delete(&mut self.items, primary_key, skey)
    }

    pub fn zmap_get(&mut self, primary_key: &[u8], skey: &[u8]) -> ZmapGetResult {
        zipmap::zmap_get(&mut self.items, primary_key, skey)
    }

    pub fn zmap_exists(&mut self, primary_key: &[u8], skey: &[u8]) -> bool {
        zipmap::zmap_exists(&mut self.items, primary_key, skey)
    }

    pub fn zmap_get_all(&mut self, primary_key: &[u8]) -> Option<Vec<(Vec<u8>, Vec<u8>)>> {
        zipmap::zmap_get_all(&mut self.items, primary_key)
    }

    pub fn zmap_get_keys(&mut self, primary_key: &[u8]) -> Option<Vec<Vec<u8>>> {
        zipmap::zmap_get_keys(&mut self.items, primary_key)
    }

    pub fn zmap_get_vals(&mut self, primary_key: &[u8]) -> Option<Vec<Vec<u8>>> {
        zipmap::zmap_get_vals(&mut self.items, primary_key)
    }

    pub fn zmap_get_multiple(
        &mut self,
        primary_key: &[u8],
        keys: &[Vec<u8>],
    ) -> Option<Vec<Option<Vec<u8>>>> {
        zipmap::zmap_get_multiple(&mut self.items, primary_key, keys)
    }

    pub fn zmap_delta(&mut self, primary_key: &[u8], skey: &[u8], delta: i64) -> ZmapDeltaResult {
        zipmap::zmap_delta(&mut self.items, primary_key, skey, delta)
    }

    pub fn zmap_set_numeric(&mut self, primary_key: &[u8], skey: &[u8], value: i64) -> ZmapSetResult {
        zipmap::zmap_set_numeric(&mut self.items, primary_key, skey, value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::config::Config;

    fn engine() -> Engine<ManualClock> {
        Engine::with_clock(Config::scenario_default(), ManualClock::new(0)).unwrap()
    }

    fn engine_with_cas() -> Engine<ManualClock> {
        let mut cfg = Config::scenario_default();
        cfg.use_cas = true;
        Engine::with_clock(cfg, ManualClock::new(0)).unwrap()
    }

    #[test]
    fn scenario_1_set_then_get() {
        let mut e = engine();
        assert_eq!(e.set(b"foo", b"bar", 0), SetResult::Ok);
        assert_eq!(e.get(b"foo"), Some(b"bar".to_vec()));
    }

    #[test]
    fn scenario_2_larger_unchained_value_round_trips() {
        let mut e = engine();
        e.set(b"foobar", b"foobarfoobar", 0);
        assert_eq!(e.get(b"foobar"), Some(b"foobarfoobar".to_vec()));
    }

    #[test]
    fn scenario_3_replace_then_add_conflict() {
        let mut e = engine();
        e.set(b"foobar", b"foobarfoobar", 0);
        assert_eq!(e.replace(b"foobar", b"baz", 0), ReplaceResult::Ok);
        assert_eq!(e.add(b"foobar", b"qux", 0), AddResult::Exists);
        assert_eq!(e.get(b"foobar"), Some(b"baz".to_vec()));
    }

    #[test]
    fn scenario_4_append_forms_a_chain() {
        let mut e = engine();
        e.set(b"foo", b"bar", 0);
        let tail = vec![b'o'; 940];
        assert_eq!(e.append(b"foo", &tail), AnnexResult::Ok);
        let value = e.get(b"foo").unwrap();
        assert_eq!(value.len(), 943);
        assert_eq!(&value[..3], b"bar");
        assert!(value[3..].iter().all(|&b| b == b'o'));
    }

    #[test]
    fn scenario_5_zipmap_lifecycle() {
        let mut e = engine();
        assert!(e.zmap_init(b"z"));
        e.zmap_set(b"z", b"a", b"1".to_vec());
        e.zmap_set(b"z", b"b", b"2".to_vec());
        e.zmap_set(b"z", b"a", b"11".to_vec());
        assert_eq!(e.zmap_len(b"z"), Some(2));
        assert_eq!(e.zmap_get(b"z", b"a"), ZmapGetResult::Found(b"11".to_vec()));
        e.zmap_delete(b"z", b"a");
        assert_eq!(e.zmap_len(b"z"), Some(1));
    }

    #[test]
    fn delete_removes_key() {
        let mut e = engine();
        e.set(b"foo", b"bar", 0);
        assert_eq!(e.delete(b"foo"), DeleteResult::Ok);
        assert_eq!(e.get(b"foo"), None);
        assert_eq!(e.delete(b"foo"), DeleteResult::NotFound);
    }

    #[test]
    fn cas_round_trip_through_engine() {
        let mut e = engine_with_cas();
        e.set(b"foo", b"bar", 0);
        let cas = e.cas_of(b"foo").unwrap();
        assert_eq!(e.cas(b"foo", b"baz", 0, cas), CasResult::Ok);
        assert_eq!(e.get(b"foo"), Some(b"baz".to_vec()));

        // stale cas is rejected and leaves the store unchanged.
        assert_eq!(e.cas(b"foo", b"nope", 0, cas), CasResult::Exists);
        assert_eq!(e.get(b"foo"), Some(b"baz".to_vec()));
    }

    #[test]
    fn stats_track_hits_and_misses() {
        let mut e = engine();
        e.set(b"foo", b"bar", 0);
        e.get(b"foo");
        e.get(b"missing");
        assert_eq!(e.stats().hits, 1);
        assert_eq!(e.stats().misses, 1);
    }
}
