//! Multi-threaded access.

use lattice_index::BPlusTree;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::thread;

#[test]
fn concurrent_read_saturation() {
    let t: BPlusTree<i64, i64> = BPlusTree::new_in_memory(8, 8).unwrap();
    for k in 0..2000i64 {
        assert!(t.insert(&k, &(k * 10)).unwrap());
    }

    thread::scope(|s| {
        for worker in 0..8u64 {
            let tree = &t;
            s.spawn(move || {
                let mut rng = StdRng::seed_from_u64(worker);
                for _ in 0..1000 {
                    let key = rng.random_range(0..4000i64);
                    let got = tree.get(&key).unwrap();
                    if key < 2000 {
                        assert_eq!(got, Some(key * 10), "key {key}");
                    } else {
                        assert_eq!(got, None, "key {key}");
                    }
                }
            });
        }
    });
}

#[test]
fn concurrent_disjoint_inserts() {
    let t: BPlusTree<i64, i64> = BPlusTree::new_in_memory(4, 4).unwrap();
    const PER_THREAD: i64 = 250;

    thread::scope(|s| {
        for worker in 0..4i64 {
            let tree = &t;
            s.spawn(move || {
                let base = worker * PER_THREAD;
                for k in base..base + PER_THREAD {
                    assert!(tree.insert(&k, &(k * 2)).unwrap(), "key {k}");
                }
            });
        }
    });

    for k in 0..4 * PER_THREAD {
        assert_eq!(t.get(&k).unwrap(), Some(k * 2), "key {k}");
    }
    let keys: Vec<_> = t.iter().unwrap().map(|(k, _)| k).collect();
    assert_eq!(keys, (0..4 * PER_THREAD).collect::<Vec<_>>());
}

#[test]
fn concurrent_inserts_of_same_keys() {
    let t: BPlusTree<i64, i64> = BPlusTree::new_in_memory(4, 4).unwrap();
    const KEYS: i64 = 300;

    // Every thread tries the same key set; exactly one wins each key.
    let winners: Vec<i64> = thread::scope(|s| {
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let tree = &t;
                s.spawn(move || {
                    let mut won = 0i64;
                    for k in 0..KEYS {
                        if tree.insert(&k, &(k + 1)).unwrap() {
                            won += 1;
                        }
                    }
                    won
                })
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });

    assert_eq!(winners.iter().sum::<i64>(), KEYS);
    for k in 0..KEYS {
        assert_eq!(t.get(&k).unwrap(), Some(k + 1));
    }
}

#[test]
fn concurrent_readers_during_writes() {
    let t: BPlusTree<i64, i64> = BPlusTree::new_in_memory(8, 8).unwrap();
    for k in 0..1000i64 {
        t.insert(&k, &k).unwrap();
    }

    thread::scope(|s| {
        // Writers extend the key space upward.
        for worker in 0..2i64 {
            let tree = &t;
            s.spawn(move || {
                let base = 1000 + worker * 500;
                for k in base..base + 500 {
                    assert!(tree.insert(&k, &k).unwrap());
                }
            });
        }
        // Readers only ever observe fully inserted entries.
        for worker in 0..4u64 {
            let tree = &t;
            s.spawn(move || {
                let mut rng = StdRng::seed_from_u64(100 + worker);
                for _ in 0..2000 {
                    let key = rng.random_range(0..1000i64);
                    assert_eq!(tree.get(&key).unwrap(), Some(key), "stable key {key}");
                }
            });
        }
    });

    for k in 0..2000i64 {
        assert_eq!(t.get(&k).unwrap(), Some(k), "key {k}");
    }
}

#[test]
fn concurrent_disjoint_removals() {
    let t: BPlusTree<i64, i64> = BPlusTree::new_in_memory(4, 4).unwrap();
    const KEYS: i64 = 800;
    for k in 0..KEYS {
        t.insert(&k, &k).unwrap();
    }

    thread::scope(|s| {
        for worker in 0..4i64 {
            let tree = &t;
            s.spawn(move || {
                // Each worker owns keys congruent to it mod 4, and leaves
                // every multiple of 8 in place.
                for k in (worker..KEYS).step_by(4) {
                    if k % 8 != 0 {
                        tree.remove(&k).unwrap();
                    }
                }
            });
        }
    });

    for k in 0..KEYS {
        let expected = if k % 8 == 0 { Some(k) } else { None };
        assert_eq!(t.get(&k).unwrap(), expected, "key {k}");
    }
    let keys: Vec<_> = t.iter().unwrap().map(|(k, _)| k).collect();
    assert_eq!(keys, (0..KEYS).filter(|k| k % 8 == 0).collect::<Vec<_>>());
}

#[test]
fn scans_stay_sorted_under_concurrent_writes() {
    let t: BPlusTree<i64, i64> = BPlusTree::new_in_memory(8, 8).unwrap();
    for k in (0..500i64).map(|k| k * 4) {
        t.insert(&k, &k).unwrap();
    }

    thread::scope(|s| {
        let tree = &t;
        s.spawn(move || {
            for k in (0..500i64).map(|k| k * 4 + 1) {
                tree.insert(&k, &k).unwrap();
            }
        });
        for _ in 0..4 {
            let tree = &t;
            s.spawn(move || {
                for _ in 0..50 {
                    // A scan may end early under contention, but whatever
                    // it yields must be strictly ascending.
                    let seen: Vec<_> = tree.iter().unwrap().map(|(k, _)| k).collect();
                    assert!(seen.windows(2).all(|w| w[0] < w[1]), "unsorted scan");
                }
            });
        }
    });
}
