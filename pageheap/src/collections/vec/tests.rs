use std::cell::Cell;
use std::rc::Rc;

use super::PageVec;
use crate::memory::Arena;
use crate::units::{BASE_PAGE_SIZE, KB};

fn arena() -> Arena {
    Arena::new(256 * KB).unwrap()
}

#[test]
fn null_vec_allocates_on_first_push() {
    let arena = arena();
    let mut vec = PageVec::new(&arena);
    assert!(vec.is_null());
    assert_eq!(vec.len(), 0);
    assert_eq!(vec.capacity(), 0);
    assert_eq!(vec.as_slice(), &[] as &[u64]);

    vec.push(7u64).unwrap();
    assert!(!vec.is_null());
    assert!(vec.capacity() >= 9, "first allocation reserves n | 8");
    assert_eq!(vec.as_slice(), &[7]);
}

#[test]
fn capacity_fills_the_run() {
    let arena = arena();
    let vec: PageVec<'_, u32> = PageVec::with_capacity(&arena, 10).unwrap();
    let handle = vec.page_handle();
    assert_eq!(handle.page_count(), 1);
    // the header is 32 bytes, the rest of the page holds elements
    assert_eq!(vec.capacity(), (BASE_PAGE_SIZE - 32) / 4);
}

#[test]
fn growth_keeps_elements() {
    let arena = arena();
    let mut vec = PageVec::new(&arena);
    for i in 0..1000u64 {
        vec.push(i).unwrap();
    }
    assert_eq!(vec.len(), 1000);
    assert!(vec.iter().copied().eq(0..1000));
    assert_eq!(vec.pop(), Some(999));
    assert_eq!(vec[998], 998);
}

#[test]
fn growth_is_at_least_a_quarter() {
    let arena = arena();
    let mut vec: PageVec<'_, u64> = PageVec::with_capacity(&arena, 200).unwrap();
    let capacity = vec.capacity();
    for i in 0..capacity {
        vec.push(i as u64).unwrap();
    }
    vec.push(0).unwrap();
    assert!(vec.capacity() >= capacity + capacity / 4);
}

#[test]
fn extend_get_set() {
    let arena = arena();
    let mut vec = PageVec::from_slice(&arena, &[1, 2, 3]).unwrap();
    vec.extend_from_slice(&[4, 5]).unwrap();
    vec.extend_from_slice(&[]).unwrap();
    assert_eq!(vec.len(), 5);
    assert_eq!(vec.get(4), Some(&5));
    assert_eq!(vec.get(5), None);
    assert_eq!(vec.set(0, 10), 1);
    *vec.get_mut(1).unwrap() = 20;
    vec.as_mut_slice()[2] = 30;
    assert_eq!(vec.as_slice(), &[10, 20, 30, 4, 5]);
}

#[test]
#[should_panic(expected = "out of bounds")]
fn set_out_of_bounds_panics() {
    let arena = arena();
    let mut vec = PageVec::from_slice(&arena, &[1]).unwrap();
    vec.set(1, 2);
}

#[test]
fn with_len_is_defaulted() {
    let arena = arena();
    let vec: PageVec<'_, i32> = PageVec::with_len(&arena, 100).unwrap();
    assert_eq!(vec.len(), 100);
    assert!(vec.iter().all(|v| *v == 0));
}

#[test]
fn take_leaves_null() {
    let arena = arena();
    let mut vec = PageVec::from_slice(&arena, &[1, 2]).unwrap();
    let moved = vec.take();
    assert!(vec.is_null());
    assert!(vec.is_empty());
    assert_eq!(moved.as_slice(), &[1, 2]);

    // a taken vec is an empty vec and can be reused
    vec.push(3).unwrap();
    assert_eq!(vec.as_slice(), &[3]);
}

#[test]
fn try_clone_is_independent() {
    let arena = arena();
    let mut vec = PageVec::from_slice(&arena, &[String::from("a"), String::from("b")]).unwrap();
    let copy = vec.try_clone().unwrap();
    vec.set(0, String::from("z"));
    assert_eq!(copy[0], "a");
    assert_ne!(copy.page_handle(), vec.page_handle());

    let empty: PageVec<'_, u8> = PageVec::new(&arena);
    assert!(empty.try_clone().unwrap().is_null());
}

#[test]
fn free_is_idempotent_and_returns_pages() {
    let arena = arena();
    let mut vec = PageVec::from_slice(&arena, &[1u8; 600]).unwrap();
    assert!(arena.is_leaking());
    vec.free();
    vec.free();
    assert!(vec.is_null());
    assert!(!arena.is_leaking());
}

#[test]
fn elements_are_dropped_once() {
    let arena = arena();
    let drops = Rc::new(Cell::new(0));

    struct Counted(Rc<Cell<usize>>);
    impl Drop for Counted {
        fn drop(&mut self) {
            self.0.set(self.0.get() + 1);
        }
    }

    let mut vec = PageVec::new(&arena);
    for _ in 0..50 {
        vec.push(Counted(Rc::clone(&drops))).unwrap();
    }
    // growth moves the elements without dropping them
    assert_eq!(drops.get(), 0);
    drop(vec.pop());
    assert_eq!(drops.get(), 1);
    drop(vec);
    assert_eq!(drops.get(), 50);
    assert!(!arena.is_leaking());
}

#[test]
fn out_of_memory_keeps_the_vec() {
    let arena = Arena::new(4 * KB).unwrap();
    let mut vec: PageVec<'_, u64> = PageVec::from_slice(&arena, &[1, 2, 3]).unwrap();
    let err = vec.extend_from_slice(&[0; 1024]).unwrap_err();
    assert!(err.is_out_of_memory());
    assert_eq!(vec.as_slice(), &[1, 2, 3]);
}

#[test]
fn debug_and_eq() {
    let arena = arena();
    let a = PageVec::from_slice(&arena, &[1, 2]).unwrap();
    let b = PageVec::from_slice(&arena, &[1, 2]).unwrap();
    assert_eq!(a, b);
    assert_eq!(format!("{a:?}"), "[1, 2]");
}

#[cfg(feature = "trace")]
#[test]
fn growth_moves_the_trace_record() {
    let arena = arena();
    let mut vec = PageVec::new(&arena);
    for i in 0..200u32 {
        vec.push(i).unwrap();
    }
    assert_eq!(arena.tracer().len(), 1);
    let report = arena.leak_report();
    assert!(report.contains("vec"), "{report}");
    drop(vec);
    assert!(!arena.tracer().has_leak());
}
