//! Tests for the typed single-threaded layer: `LocalChunkPool`, `PoolBox<T>` and `PoolRc<T>`.
//!
//! These verify that values routed through the pool are dropped exactly once, that chunks are
//! released when the last owner goes away and that the pool outlives its handles when needed.

#![allow(
    clippy::arithmetic_side_effects,
    clippy::cast_possible_truncation,
    clippy::cast_possible_wrap,
    clippy::indexing_slicing,
    reason = "test code doesn't need the same rigor as production code"
)]

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use chunk_pool::{ChunkPool, DropPolicy, Error, LocalChunkPool, PoolBox, PoolRc};
use new_zealand::nz;

/// An object of ten 32-bit integers whose construction and destruction always go through a
/// per-type pool.
struct Particle {
    stuff: [i32; 10],
}

thread_local! {
    static PARTICLE_POOL: LocalChunkPool = LocalChunkPool::from(
        ChunkPool::new(nz!(10240), nz!(10240)).expect("first block must be allocatable"),
    );
}

impl Particle {
    fn new_pooled(seed: i32) -> PoolBox<Self> {
        PARTICLE_POOL
            .with(|pool| pool.insert(Self { stuff: [seed; 10] }))
            .unwrap()
    }

    fn pooled_count() -> usize {
        PARTICLE_POOL.with(LocalChunkPool::len)
    }
}

#[test]
fn per_type_pool_routes_all_instances() {
    let particles: Vec<_> = (0..1000).map(Particle::new_pooled).collect();

    assert_eq!(Particle::pooled_count(), 1000);
    assert!(particles.iter().enumerate().all(|(i, p)| p.stuff[9] == i as i32));

    drop(particles);
    assert_eq!(Particle::pooled_count(), 0);

    let growth = PARTICLE_POOL.with(|pool| pool.stats().growth_count);
    assert!(growth >= 1);
}

#[derive(Debug)]
struct DropCounter {
    drops: Rc<Cell<usize>>,
}

impl Drop for DropCounter {
    fn drop(&mut self) {
        self.drops.set(self.drops.get() + 1);
    }
}

#[test]
fn unique_and_shared_values_drop_once() {
    let pool = LocalChunkPool::new().unwrap();
    let drops = Rc::new(Cell::new(0));

    let boxes: Vec<_> = (0..50)
        .map(|_| {
            pool.insert(DropCounter {
                drops: Rc::clone(&drops),
            })
            .unwrap()
        })
        .collect();

    let shared = pool
        .insert_shared(DropCounter {
            drops: Rc::clone(&drops),
        })
        .unwrap();
    let clones: Vec<_> = (0..10).map(|_| shared.clone()).collect();

    assert_eq!(pool.len(), 51);

    drop(boxes);
    assert_eq!(drops.get(), 50);

    drop(clones);
    assert_eq!(drops.get(), 50);
    assert_eq!(PoolRc::strong_count(&shared), 1);

    drop(shared);
    assert_eq!(drops.get(), 51);
    assert!(pool.is_empty());
}

#[test]
fn optional_shared_handles_behave_like_nullable_pointers() {
    let pool = LocalChunkPool::new().unwrap();

    // Assigning into an empty slot takes a reference.
    let value = pool.insert_shared("first".to_string()).unwrap();
    let mut slot: Option<PoolRc<String>> = Some(value.clone());
    assert_eq!(PoolRc::strong_count(&value), 2);

    // Reassigning releases the old value's reference.
    let replacement = pool.insert_shared("second".to_string()).unwrap();
    slot = Some(replacement.clone());
    assert_eq!(PoolRc::strong_count(&value), 1);
    assert_eq!(slot.as_deref().map(String::as_str), Some("second"));

    // Setting to null releases the reference.
    drop(slot.take());
    assert_eq!(PoolRc::strong_count(&replacement), 1);
    assert!(slot.is_none());

    drop(value);
    drop(replacement);
    assert!(pool.is_empty());
}

#[test]
fn values_may_own_other_pooled_values() {
    struct Node {
        value: u32,
        next: Option<PoolBox<Node>>,
    }

    let pool = LocalChunkPool::new().unwrap();
    let mut head: Option<PoolBox<Node>> = None;

    for value in 0..500 {
        head = Some(pool.insert(Node { value, next: head }).unwrap());
    }

    assert_eq!(pool.len(), 500);

    let mut sum = 0;
    let mut cursor = head.as_deref();
    while let Some(node) = cursor {
        sum += node.value;
        cursor = node.next.as_deref();
    }
    assert_eq!(sum, (0..500).sum::<u32>());

    // Dropping the head drops the whole list recursively through the pool.
    drop(head);
    assert!(pool.is_empty());
}

#[test]
fn shared_values_can_form_graphs() {
    let pool = LocalChunkPool::new().unwrap();

    let leaf = pool.insert_shared(RefCell::new(vec![1, 2])).unwrap();
    let left = pool.insert_shared((leaf.clone(), "left")).unwrap();
    let right = pool.insert_shared((leaf.clone(), "right")).unwrap();

    left.0.borrow_mut().push(3);

    assert_eq!(*right.0.borrow(), vec![1, 2, 3]);
    assert_eq!(PoolRc::strong_count(&leaf), 3);

    drop(left);
    drop(right);
    assert_eq!(PoolRc::strong_count(&leaf), 1);

    let vec = PoolRc::try_unwrap(leaf).unwrap().into_inner();
    assert_eq!(vec, vec![1, 2, 3]);
    assert!(pool.is_empty());
}

#[test]
fn over_aligned_values_are_rejected() {
    #[repr(align(32))]
    struct Wide {
        _bytes: [u8; 32],
    }

    let pool = LocalChunkPool::new().unwrap();

    assert!(matches!(
        pool.insert(Wide { _bytes: [0; 32] }),
        Err(Error::UnsupportedAlignment { align: 32, .. })
    ));
    assert!(matches!(
        pool.insert_shared(Wide { _bytes: [0; 32] }),
        Err(Error::UnsupportedAlignment { .. })
    ));
}

#[test]
fn strict_pool_outlives_its_values() {
    let pool = LocalChunkPool::from(
        ChunkPool::builder()
            .drop_policy(DropPolicy::MustNotLeakChunks)
            .build()
            .unwrap(),
    );

    let value = pool.insert(1_u64).unwrap();

    // The pool handle goes away first; the value keeps the pool alive, so no chunk leaks.
    drop(pool);
    assert_eq!(*value, 1);
    drop(value);
}
