// End-to-end scenarios seeded by the cache engine's spec (see spec.md §8).
// Config throughout: slab_size = 1056 (32-byte header + 1024 payload),
// profile = {128, 256, 512, 1024}, use_cas = false, prealloc = true,
// maxbytes = 8448 (~8 slabs), chaining enabled.

use ccache_core::clock::ManualClock;
use ccache_core::config::Config;
use ccache_core::engine::{AddResult, CasResult, Engine, ReplaceResult, SetResult};
use ccache_core::item::{AnnexResult, DeleteResult, DeltaResult};
use ccache_core::zipmap::{ZmapDeleteResult, ZmapGetResult, ZmapSetResult};

fn engine() -> Engine<ManualClock> {
    Engine::with_clock(Config::scenario_default(), ManualClock::new(0)).unwrap()
}

#[test]
fn scenario_1_set_then_get_small_value() {
    let mut e = engine();
    assert_eq!(e.set(b"foo", b"bar", 0), SetResult::Ok);
    assert_eq!(e.get(b"foo"), Some(b"bar".to_vec()));
}

#[test]
fn scenario_2_unchained_value_round_trips() {
    let mut e = engine();
    assert_eq!(e.set(b"foobar", b"foobarfoobar", 0), SetResult::Ok);
    let value = e.get(b"foobar").unwrap();
    assert_eq!(value.len(), 12);
    assert_eq!(value, b"foobarfoobar");
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
fn scenario_4_append_grows_into_a_chain() {
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
    assert_eq!(e.zmap_set(b"z", b"a", b"1".to_vec()), ZmapSetResult::Ok);
    assert_eq!(e.zmap_set(b"z", b"b", b"2".to_vec()), ZmapSetResult::Ok);
    assert_eq!(e.zmap_set(b"z", b"a", b"11".to_vec()), ZmapSetResult::Ok);
    assert_eq!(e.zmap_len(b"z"), Some(2));
    assert_eq!(e.zmap_get(b"z", b"a"), ZmapGetResult::Found(b"11".to_vec()));
    assert_eq!(e.zmap_delete(b"z", b"a"), ZmapDeleteResult::Ok);
    assert_eq!(e.zmap_len(b"z"), Some(1));
}

#[test]
fn scenario_6_lru_eviction_reclaims_oldest_touched_slabs() {
    let mut e = engine();
    // 1000-byte values need the 1024-byte class: 1 item/slab (1024/1024),
    // 8 slabs total -> heap holds 8 live values at a time.
    let value = vec![b'x'; 1000];
    for i in 0..2048u32 {
        let key = format!("key-{i}");
        assert_eq!(e.set(key.as_bytes(), &value, 0), SetResult::Ok);
    }
    // The oldest-touched keys were evicted long ago.
    assert!(e.get(b"key-0").is_none());
    assert!(e.get(b"key-1").is_none());
    // The most recent insertions are still resolvable.
    assert_eq!(e.get(b"key-2047"), Some(value.clone()));
    assert_eq!(e.get(b"key-2046"), Some(value));
    assert!(e.stats().evictions_lru > 0);
}

#[test]
fn boundary_value_equal_to_largest_class_minus_header_stays_unchained() {
    let mut e = engine();
    // item_ntotal(nkey=1, nbyte, use_cas=false) must be <= 1024 to stay in
    // class 4 without chaining: 48 + 1 + nbyte <= 1024 -> nbyte <= 975.
    let value = vec![b'a'; 975];
    e.set(b"k", &value, 0);
    assert_eq!(e.get(b"k"), Some(value));
}

#[test]
fn boundary_value_one_byte_larger_chains_with_two_nodes() {
    let mut e = engine();
    let value = vec![b'a'; 976];
    e.set(b"k", &value, 0);
    assert_eq!(e.get(b"k"), Some(value));
}

#[test]
fn delete_then_get_reports_not_found_and_frees_the_chunk() {
    let mut e = engine();
    e.set(b"foo", b"bar", 0);
    assert_eq!(e.delete(b"foo"), DeleteResult::Ok);
    assert!(e.get(b"foo").is_none());
    assert_eq!(e.delete(b"foo"), DeleteResult::NotFound);
}

#[test]
fn expiration_is_lazy_and_opportunistic_on_get() {
    let mut e = engine();
    e.set(b"foo", b"bar", 5);
    assert_eq!(e.get(b"foo"), Some(b"bar".to_vec()));
    // advance past exptime by reconstructing with a later clock isn't
    // possible through the public Engine API directly; exercised instead
    // at the item-manager layer (see src/item/manager.rs tests) where the
    // clock is reachable. Here we just check that a never-expiring value
    // (exptime = 0) survives indefinitely.
    let mut never = engine();
    never.set(b"immortal", b"bar", 0);
    assert_eq!(never.get(b"immortal"), Some(b"bar".to_vec()));
}

#[test]
fn cas_mismatch_leaves_the_store_unchanged() {
    let mut cfg = Config::scenario_default();
    cfg.use_cas = true;
    let mut e = Engine::with_clock(cfg, ManualClock::new(0)).unwrap();
    e.set(b"foo", b"bar", 0);
    let real_cas = e.cas_of(b"foo").unwrap();
    assert_eq!(e.cas(b"foo", b"evil", 0, real_cas + 1), CasResult::Exists);
    assert_eq!(e.get(b"foo"), Some(b"bar".to_vec()));
    assert_eq!(e.cas(b"foo", b"good", 0, real_cas), CasResult::Ok);
    assert_eq!(e.get(b"foo"), Some(b"good".to_vec()));
}

#[test]
fn delta_increments_and_decrements_with_zero_floor() {
    let mut e = engine();
    e.set(b"n", b"10", 0);
    assert_eq!(e.delta(b"n", 5), DeltaResult::Ok);
    assert_eq!(e.get(b"n"), Some(b"15".to_vec()));
    assert_eq!(e.delta(b"n", -100), DeltaResult::Ok);
    assert_eq!(e.get(b"n"), Some(b"0".to_vec()));
}

#[test]
fn zipmap_numeric_delta_round_trips() {
    let mut e = engine();
    e.zmap_init(b"z");
    e.zmap_set_numeric(b"z", b"n", 42);
    assert_eq!(
        e.zmap_delta(b"z", b"n", 8),
        ccache_core::zipmap::ZmapDeltaResult::Ok(50)
    );
    assert_eq!(
        e.zmap_delta(b"z", b"n", -8),
        ccache_core::zipmap::ZmapDeltaResult::Ok(42)
    );
}

#[test]
fn zipmap_bulk_iteration_returns_every_entry() {
    let mut e = engine();
    e.zmap_init(b"z");
    e.zmap_set(b"z", b"a", b"1".to_vec());
    e.zmap_set(b"z", b"b", b"2".to_vec());
    e.zmap_set(b"z", b"c", b"3".to_vec());
    let mut keys = e.zmap_get_keys(b"z").unwrap();
    keys.sort();
    assert_eq!(keys, vec![b"a".to_vec(), b"b".to_vec(), b"c".to_vec()]);
    let all = e.zmap_get_all(b"z").unwrap();
    assert_eq!(all.len(), 3);
}
