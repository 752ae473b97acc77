// Copyright (c) 2025 vecbridge Contributors
// Licensed under the MIT License. See LICENSE file for details.

//! Concurrency tests for the handle registry.
//!
//! Many searches may share one index; a mutation excludes them. Training
//! one handle must not stop searches on another.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Barrier;
use std::thread;

use vecbridge::config::IndexSpec;
use vecbridge::{BridgeError, HandleRegistry};

fn rows(count: usize, dim: usize, seed: usize) -> Vec<f32> {
    (0..count * dim)
        .map(|i| (((i + seed * 1013) as f32) * 0.113).cos())
        .collect()
}

#[test]
fn test_concurrent_searches_and_adds() {
    let dim = 8;
    let registry = HandleRegistry::new();
    let handle = registry.create(&IndexSpec::Flat { dim }).unwrap();
    registry
        .add_with_ids(handle, &rows(10, dim, 0), &(0..10).collect::<Vec<_>>())
        .unwrap();

    let writers = 4;
    let batches = 25;
    let barrier = Barrier::new(writers + 4);

    thread::scope(|s| {
        for w in 0..writers {
            let registry = &registry;
            let barrier = &barrier;
            s.spawn(move || {
                barrier.wait();
                for b in 0..batches {
                    let base = 1000 * (w as i64 + 1) + 2 * b as i64;
                    registry
                        .add_with_ids(handle, &rows(2, dim, w * 100 + b), &[base, base + 1])
                        .unwrap();
                }
            });
        }
        for _ in 0..4 {
            let registry = &registry;
            let barrier = &barrier;
            s.spawn(move || {
                barrier.wait();
                for _ in 0..50 {
                    let results = registry.search(handle, &rows(1, dim, 0), 5).unwrap();
                    // The initial ten vectors are always visible.
                    assert!(results.ids().iter().all(|&id| id != -1));
                }
            });
        }
    });

    let total = registry.with_read(handle, |i| i.ntotal()).unwrap();
    assert_eq!(total, 10 + writers * batches * 2);
}

#[test]
fn test_batches_are_atomic_to_readers() {
    let dim = 4;
    let registry = HandleRegistry::new();
    let handle = registry.create(&IndexSpec::Hnsw { dim, m: 8 }).unwrap();
    let done = AtomicBool::new(false);

    thread::scope(|s| {
        s.spawn(|| {
            for b in 0..40 {
                let ids: Vec<i64> = (0..5).map(|i| b * 5 + i).collect();
                registry
                    .add_with_ids(handle, &rows(5, dim, b as usize), &ids)
                    .unwrap();
            }
            done.store(true, Ordering::Release);
        });
        s.spawn(|| {
            while !done.load(Ordering::Acquire) {
                let n = registry.with_read(handle, |i| i.ntotal()).unwrap();
                assert_eq!(n % 5, 0, "observed a partially applied batch");
            }
        });
    });
}

#[test]
fn test_training_one_handle_does_not_block_others() {
    let dim = 16;
    let registry = HandleRegistry::new();
    let ivf = registry
        .create(&IndexSpec::IvfPq {
            dim,
            nlist: 32,
            m: 4,
            nbits: 8,
        })
        .unwrap();
    let flat = registry.create(&IndexSpec::Flat { dim }).unwrap();
    registry.add_with_ids(flat, &rows(3, dim, 9), &[1, 2, 3]).unwrap();

    let training = rows(2000, dim, 1);
    thread::scope(|s| {
        s.spawn(|| registry.train(ivf, &training).unwrap());
        s.spawn(|| {
            for _ in 0..100 {
                let results = registry.search(flat, &rows(1, dim, 9), 3).unwrap();
                assert_eq!(results.ids().len(), 3);
            }
        });
    });
    assert!(registry.with_read(ivf, |i| i.is_trained()).unwrap());
}

#[test]
fn test_free_races_with_search() {
    let registry = HandleRegistry::new();
    let handle = registry.create(&IndexSpec::Flat { dim: 2 }).unwrap();
    registry.add_with_ids(handle, &[1.0, 0.0], &[1]).unwrap();

    thread::scope(|s| {
        for _ in 0..4 {
            s.spawn(|| {
                for _ in 0..200 {
                    match registry.search(handle, &[1.0, 0.0], 1) {
                        Ok(results) => assert_eq!(results.ids(), &[1]),
                        Err(BridgeError::UnknownHandle(_)) => break,
                        Err(e) => panic!("unexpected error: {}", e),
                    }
                }
            });
        }
        s.spawn(|| registry.free(handle).unwrap());
    });

    assert!(registry.is_empty());
    assert!(matches!(
        registry.search(handle, &[1.0, 0.0], 1),
        Err(BridgeError::UnknownHandle(_))
    ));
}

#[test]
fn test_concurrent_create_and_free() {
    let registry = HandleRegistry::new();
    thread::scope(|s| {
        for t in 0..8 {
            let registry = &registry;
            s.spawn(move || {
                for i in 0..50 {
                    let h = registry
                        .create(&IndexSpec::Flat { dim: 1 + (t + i) % 5 })
                        .unwrap();
                    assert_eq!(
                        registry.with_read(h, |idx| idx.dimension()).unwrap(),
                        1 + (t + i) % 5
                    );
                    registry.free(h).unwrap();
                }
            });
        }
    });
    assert!(registry.is_empty());
}

#[test]
fn test_concurrent_writes_to_one_path() {
    let dim = 32;
    let registry = HandleRegistry::new();
    let handle = registry.create(&IndexSpec::Flat { dim }).unwrap();
    let n = 2000;
    registry
        .add_with_ids(handle, &rows(n, dim, 3), &(0..n as i64).collect::<Vec<_>>())
        .unwrap();

    let dir = tempfile::tempdir().expect("failed to create temp dir");
    let path = dir.path().join("shared.vbix");
    let barrier = Barrier::new(4);

    thread::scope(|s| {
        for _ in 0..4 {
            let (registry, barrier, path) = (&registry, &barrier, &path);
            s.spawn(move || {
                barrier.wait();
                for _ in 0..10 {
                    registry.write_index(handle, path).unwrap();
                }
            });
        }
        // Readers only ever see a complete file.
        s.spawn(|| {
            for _ in 0..20 {
                if path.exists() {
                    let h = registry.read_index(&path).unwrap();
                    assert_eq!(registry.with_read(h, |i| i.ntotal()).unwrap(), n);
                    registry.free(h).unwrap();
                }
            }
        });
    });

    let entries: Vec<_> = std::fs::read_dir(dir.path()).unwrap().collect();
    assert_eq!(entries.len(), 1, "temporary files left behind");
    let h = registry.read_index(&path).unwrap();
    assert_eq!(registry.with_read(h, |i| i.ntotal()).unwrap(), n);
}
