use std::cell::Cell;
use std::collections::HashMap;
use std::rc::Rc;

use proptest::prelude::*;

use super::{FnKeys, MapKey, PageMap};
use crate::memory::Arena;
use crate::units::{KB, MB};

fn arena() -> Arena {
    Arena::new(4 * MB).unwrap()
}

fn colliding<'a>(arena: &'a Arena) -> PageMap<'a, u64, u64, FnKeys<u64>> {
    PageMap::with_strategy(arena, 8, FnKeys::new(|_| 0, |a, b| a == b)).unwrap()
}

fn free_cursor<K, V, S>(map: &PageMap<'_, K, V, S>) -> usize {
    map.header().unwrap().free
}

#[test]
fn put_get_overwrite() {
    let arena = arena();
    let mut map = PageMap::new(&arena);
    assert!(map.is_null());
    assert_eq!(map.get(&1u32), None);

    assert_eq!(map.put(1u32, "one").unwrap(), None);
    assert_eq!(map.put(2, "two").unwrap(), None);
    assert_eq!(map.put(1, "uno").unwrap(), Some("one"));
    assert_eq!(map.len(), 2);
    assert_eq!(map.get(&1), Some(&"uno"));
    assert!(map.contains_key(&2));
    assert!(!map.contains_key(&3));

    *map.get_mut(&2).unwrap() = "dos";
    assert_eq!(map.get(&2), Some(&"dos"));
}

#[test]
fn new_table_has_room_for_overflow() {
    let arena = arena();
    let map: PageMap<'_, u32, u32> = PageMap::with_capacity(&arena, 0).unwrap();
    assert_eq!(map.capacity(), 16);
    let map: PageMap<'_, u32, u32> = PageMap::with_capacity(&arena, 9).unwrap();
    assert_eq!(map.capacity(), 32);
    assert_eq!(free_cursor(&map), 16);
}

#[test]
fn forced_collision_delete_middle_link() {
    let arena = arena();
    let mut map = colliding(&arena);
    for key in 1..=5 {
        map.put(key, key * 10).unwrap();
    }
    // key 1 sits in the bucket, 2..=5 are chained behind it
    assert_eq!(free_cursor(&map), 8 + 4);

    assert_eq!(map.remove(&3), Some(30));
    assert_eq!(map.len(), 4);
    for key in [1, 2, 4, 5] {
        assert_eq!(map.get(&key), Some(&(key * 10)), "key {key}");
    }
    assert_eq!(map.get(&3), None);
    // the last link moved into the hole and was the latest append
    assert_eq!(free_cursor(&map), 8 + 3);
}

#[test]
fn forced_collision_delete_bucket_head() {
    let arena = arena();
    let mut map = colliding(&arena);
    for key in 1..=3 {
        map.put(key, key).unwrap();
    }
    assert_eq!(map.remove(&1), Some(1));
    assert_eq!(map.len(), 2);
    assert_eq!(map.get(&2), Some(&2));
    assert_eq!(map.get(&3), Some(&3));
    // the first link was pulled up, it was not the latest append
    assert_eq!(free_cursor(&map), 8 + 2);

    assert_eq!(map.remove(&2), Some(2));
    assert_eq!(map.remove(&3), Some(3));
    assert!(map.is_empty());
    assert_eq!(map.remove(&3), None);
    // only the link vacated last was given back
    assert_eq!(free_cursor(&map), 8 + 1);
}

#[test]
fn forced_collision_delete_tail_and_missing() {
    let arena = arena();
    let mut map = colliding(&arena);
    for key in 1..=4 {
        map.put(key, key).unwrap();
    }
    assert_eq!(map.remove(&9), None);
    assert_eq!(map.remove(&4), Some(4));
    assert_eq!(map.len(), 3);
    assert_eq!(map.keys().copied().collect::<Vec<_>>(), [1, 2, 3]);

    map.put(4, 40).unwrap();
    assert_eq!(map.get(&4), Some(&40));
}

#[test]
fn iteration_is_bucket_then_chain_order() {
    let arena = arena();
    let mut map = PageMap::with_strategy(
        &arena,
        8,
        FnKeys::new(|key: &u64| *key % 4, |a, b| a == b),
    )
    .unwrap();
    for key in [6, 3, 2, 1, 5] {
        map.put(key, ()).unwrap();
    }
    let keys: Vec<_> = map.keys().copied().collect();
    // buckets 1, 2 and 3, each followed by its chain
    assert_eq!(keys, [1, 5, 6, 2, 3]);
    assert_eq!(map.iter().len(), 5);
}

#[test]
fn growth_preserves_content() {
    let arena = arena();
    let mut map = PageMap::new(&arena);
    let mut capacities = Vec::new();
    for key in 0..5000u64 {
        map.put(key, key * 3).unwrap();
        if capacities.last() != Some(&map.capacity()) {
            capacities.push(map.capacity());
        }
    }
    assert!(capacities.len() > 3, "{capacities:?}");
    assert_eq!(map.len(), 5000);
    for key in 0..5000u64 {
        assert_eq!(map.get(&key), Some(&(key * 3)));
    }
    assert_eq!(map.iter().count(), 5000);
}

#[test]
fn growth_under_collisions() {
    let arena = arena();
    let mut map = colliding(&arena);
    for key in 0..100 {
        map.put(key, key).unwrap();
    }
    assert_eq!(map.len(), 100);
    for key in 0..100 {
        assert_eq!(map.get(&key), Some(&key));
    }
}

#[test]
fn string_keys() {
    let arena = arena();
    let mut map = PageMap::new(&arena);
    for word in ["alpha", "beta", "gamma", "delta"] {
        map.put(word.to_string(), word.len()).unwrap();
    }
    assert_eq!(map.get(&"gamma".to_string()), Some(&5));
    assert_eq!(map.remove(&"beta".to_string()), Some(4));
    assert_eq!(map.len(), 3);
}

#[test]
fn float_keys_compare_bitwise() {
    let arena = arena();
    let mut map = PageMap::new(&arena);
    map.put(f64::NAN, 1).unwrap();
    map.put(0.0f64, 2).unwrap();
    map.put(-0.0f64, 3).unwrap();
    assert_eq!(map.get(&f64::NAN), Some(&1));
    assert_eq!(map.get(&0.0), Some(&2));
    assert_eq!(map.get(&-0.0), Some(&3));
}

#[derive(Debug, Clone, PartialEq, crate::MapKey)]
struct Point {
    x: i32,
    y: i32,
}

#[derive(Debug, Clone, PartialEq, crate::MapKey)]
enum Shape {
    Dot,
    Line(Point, Point),
    Named { name: String },
}

#[test]
fn derived_keys() {
    let arena = arena();
    let mut map = PageMap::new(&arena);
    let a = Point { x: 1, y: 2 };
    let b = Point { x: 2, y: 1 };
    assert_ne!(a.key_hash(), b.key_hash());

    map.put(Shape::Dot, 0).unwrap();
    map.put(Shape::Line(a.clone(), b.clone()), 1).unwrap();
    map.put(Shape::Named { name: "x".into() }, 2).unwrap();
    assert_eq!(map.get(&Shape::Line(a, b)), Some(&1));
    assert_eq!(map.get(&Shape::Named { name: "x".into() }), Some(&2));
    assert_eq!(map.get(&Shape::Dot), Some(&0));
    assert_eq!(map.len(), 3);
}

#[derive(Debug, Clone, Copy, crate::MapKey)]
struct Sample {
    at: u32,
    reading: f64,
}

#[derive(Debug, Clone, Copy, crate::MapKey)]
enum Reading {
    Missing,
    Value(f64),
    Pair { low: f32, high: f32 },
}

#[test]
fn derived_keys_compare_fields_as_keys() {
    let arena = arena();
    let mut map = PageMap::new(&arena);
    let nan = Sample { at: 1, reading: f64::NAN };
    map.put(nan, 1).unwrap();
    assert_eq!(map.put(nan, 2).unwrap(), Some(1));
    assert_eq!(map.len(), 1);
    assert_eq!(map.get(&nan), Some(&2));
    assert_eq!(map.get(&Sample { at: 2, reading: f64::NAN }), None);

    let mut zeros = PageMap::new(&arena);
    zeros.put(Sample { at: 0, reading: 0.0 }, 'p').unwrap();
    zeros.put(Sample { at: 0, reading: -0.0 }, 'n').unwrap();
    assert_eq!(zeros.len(), 2);

    let mut readings = PageMap::new(&arena);
    readings.put(Reading::Missing, 0).unwrap();
    readings.put(Reading::Value(f64::NAN), 1).unwrap();
    readings.put(Reading::Pair { low: f32::NAN, high: 1.0 }, 2).unwrap();
    assert_eq!(readings.get(&Reading::Missing), Some(&0));
    assert_eq!(readings.get(&Reading::Value(f64::NAN)), Some(&1));
    assert_eq!(readings.get(&Reading::Pair { low: f32::NAN, high: 1.0 }), Some(&2));
    assert!(!Reading::Missing.key_eq(&Reading::Value(0.0)));
    assert!(!Reading::Value(1.0).key_eq(&Reading::Pair { low: 1.0, high: 1.0 }));
}

#[test]
fn unrepresentable_capacity_is_out_of_memory() {
    let arena = arena();
    for capacity in [usize::MAX / 2 + 2, usize::MAX] {
        let err = PageMap::<u8, u8>::with_capacity(&arena, capacity).unwrap_err();
        assert!(err.is_out_of_memory(), "{err}");
    }
    assert!(!arena.is_leaking());
}

#[test]
fn huge_reserve_is_out_of_memory() {
    let arena = arena();
    let mut map = PageMap::new(&arena);
    for key in 0..20u32 {
        map.put(key, key).unwrap();
    }
    assert!(map.reserve(usize::MAX).unwrap_err().is_out_of_memory());
    assert!(map.bulk_loader(usize::MAX).is_err());
    assert!(map.reserve(usize::MAX / 2 + 2).unwrap_err().is_out_of_memory());

    // the map is untouched by the failed growth
    assert_eq!(map.len(), 20);
    assert_eq!(map.get(&7), Some(&7));
    map.put(20, 20).unwrap();

    let mut null = PageMap::<u64, u64>::new(&arena);
    assert!(null.reserve(usize::MAX).unwrap_err().is_out_of_memory());
    assert!(null.is_null());
}

#[test]
#[should_panic(expected = "out of bounds")]
fn table_index_is_always_checked() {
    let arena = arena();
    let map = PageMap::<u8, u8>::with_capacity(&arena, 8).unwrap();
    let _ = map.slot(map.capacity());
}

#[test]
fn tuple_and_array_keys() {
    let arena = arena();
    let mut map = PageMap::new(&arena);
    map.put((1u8, 'a'), 1).unwrap();
    map.put((1u8, 'b'), 2).unwrap();
    assert_eq!(map.get(&(1, 'b')), Some(&2));

    let mut arrays = PageMap::new(&arena);
    arrays.put([1u16, 2, 3], "x").unwrap();
    assert_eq!(arrays.get(&[1, 2, 3]), Some(&"x"));
    assert_eq!(arrays.get(&[3, 2, 1]), None);
}

#[test]
fn bulk_loader_inserts_without_lookup() {
    let arena = arena();
    let mut map = PageMap::new(&arena);
    {
        let mut loader = map.bulk_loader(100).unwrap();
        for key in 0..300u32 {
            loader.direct_put(key, key + 1).unwrap();
        }
        assert_eq!(loader.len(), 300);
    }
    for key in 0..300u32 {
        assert_eq!(map.get(&key), Some(&(key + 1)));
    }
}

#[cfg(feature = "assertions")]
#[test]
#[should_panic(expected = "already present")]
fn bulk_loader_rejects_duplicates() {
    let arena = arena();
    let mut map = PageMap::new(&arena);
    let mut loader = map.bulk_loader(2).unwrap();
    loader.direct_put(1u8, 1).unwrap();
    loader.direct_put(1u8, 2).unwrap();
}

#[test]
fn from_pairs_keeps_the_last_duplicate() {
    let arena = arena();
    let map = PageMap::from_pairs(&arena, [(1, 'a'), (2, 'b'), (1, 'c')]).unwrap();
    assert_eq!(map.len(), 2);
    assert_eq!(map.get(&1), Some(&'c'));
}

#[test]
fn take_and_free() {
    let arena = arena();
    let mut map = PageMap::from_pairs(&arena, (0..10).map(|i| (i, i))).unwrap();
    let moved = map.take();
    assert!(map.is_null());
    assert_eq!(map.len(), 0);
    assert_eq!(map.get(&1), None);
    assert_eq!(moved.len(), 10);
    drop(moved);

    map.put(1, 1).unwrap();
    map.free();
    map.free();
    assert!(map.is_null());
    assert!(!arena.is_leaking());
}

#[test]
fn entries_are_dropped_once() {
    let arena = arena();
    let drops = Rc::new(Cell::new(0));

    struct Counted(Rc<Cell<usize>>);
    impl Drop for Counted {
        fn drop(&mut self) {
            self.0.set(self.0.get() + 1);
        }
    }

    let mut map = PageMap::new(&arena);
    for key in 0..100u32 {
        map.put(key, Counted(Rc::clone(&drops))).unwrap();
    }
    // rehashing moves entries without dropping them
    assert_eq!(drops.get(), 0);
    drop(map.remove(&7));
    assert_eq!(drops.get(), 1);
    map.put(8, Counted(Rc::clone(&drops))).unwrap();
    assert_eq!(drops.get(), 2);
    drop(map);
    assert_eq!(drops.get(), 101);
    assert!(!arena.is_leaking());
}

#[test]
fn debug_output() {
    let arena = Arena::new(64 * KB).unwrap();
    let mut map = PageMap::new(&arena);
    map.put(1u8, 'x').unwrap();
    assert_eq!(format!("{map:?}"), "{1: 'x'}");
}

#[derive(Debug, Clone)]
enum Op {
    Put(u16, u32),
    Get(u16),
    Remove(u16),
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        3 => (0u16..256, any::<u32>()).prop_map(|(k, v)| Op::Put(k, v)),
        2 => (0u16..256).prop_map(Op::Get),
        2 => (0u16..256).prop_map(Op::Remove),
    ]
}

fn check_against_reference<S: super::KeyStrategy<u16>>(
    mut map: PageMap<'_, u16, u32, S>,
    ops: Vec<Op>,
) -> Result<(), TestCaseError> {
    let mut reference = HashMap::new();
    for op in ops {
        match op {
            Op::Put(key, value) => {
                prop_assert_eq!(map.put(key, value).unwrap(), reference.insert(key, value));
            }
            Op::Get(key) => {
                prop_assert_eq!(map.get(&key), reference.get(&key));
            }
            Op::Remove(key) => {
                prop_assert_eq!(map.remove(&key), reference.remove(&key));
            }
        }
        prop_assert_eq!(map.len(), reference.len());
    }
    let mut seen: Vec<_> = map.iter().map(|(k, v)| (*k, *v)).collect();
    let mut expected: Vec<_> = reference.into_iter().collect();
    seen.sort_unstable();
    expected.sort_unstable();
    prop_assert_eq!(seen, expected);
    Ok(())
}

proptest! {
    #[test]
    fn matches_std_hash_map(ops in prop::collection::vec(op(), 1..2000)) {
        let arena = arena();
        check_against_reference(PageMap::new(&arena), ops)?;
    }

    #[test]
    fn matches_std_hash_map_with_weak_hash(ops in prop::collection::vec(op(), 1..1000)) {
        let arena = arena();
        let map = PageMap::with_strategy(
            &arena,
            0,
            FnKeys::new(|key: &u16| u64::from(*key % 5), |a, b| a == b),
        )
        .unwrap();
        check_against_reference(map, ops)?;
    }
}
