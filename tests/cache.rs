mod common;

use std::fs;

use carbotax::cache::{LruCache, PersistentCache};
use common::temp_root;

#[test]
fn keeps_the_most_recently_touched_keys() {
    let capacity = 4;
    let mut cache = LruCache::new(capacity);
    for key in 0..capacity as u64 {
        cache.set(key, key * 10);
    }
    // Touch the oldest so key 1 becomes the eviction candidate.
    assert_eq!(cache.get(&0), Some(&0));

    cache.set(100, 1000);
    assert_eq!(cache.len(), capacity);
    assert!(cache.contains(&0));
    assert!(!cache.contains(&1));
    for key in [2, 3, 100] {
        assert!(cache.contains(&key));
    }
}

#[test]
fn round_trip_skips_empty_values() {
    let (_temp, root) = temp_root();
    let path = root.join("children.json");
    {
        let mut cache: PersistentCache<u64, Vec<u64>> = PersistentCache::open(path.clone(), 10, 100);
        cache.set(1, vec![2, 3]);
        cache.set(4, vec![5]);
        cache.set(6, Vec::new());
        cache.save().unwrap();
    }

    let mut reloaded: PersistentCache<u64, Vec<u64>> = PersistentCache::open(path.clone(), 10, 100);
    assert_eq!(reloaded.len(), 2);
    assert_eq!(reloaded.get(&1), Some(&vec![2, 3]));
    assert_eq!(reloaded.get(&4), Some(&vec![5]));
    assert!(!reloaded.contains(&6));
}

#[test]
fn saves_in_batches_of_new_keys() {
    let (_temp, root) = temp_root();
    let path = root.join("batched.json");
    let mut cache: PersistentCache<u64, Vec<u64>> = PersistentCache::open(path.clone(), 10, 2);

    cache.set(1, vec![1]);
    assert!(!path.as_std_path().exists());
    assert!(cache.is_dirty());

    cache.set(2, vec![2]);
    assert!(path.as_std_path().exists());
    assert!(!cache.is_dirty());

    // Overwriting a known key does not count towards the next batch.
    cache.set(2, vec![2, 2]);
    assert!(!cache.is_dirty());
}

#[test]
fn corrupt_file_starts_empty() {
    let (_temp, root) = temp_root();
    let path = root.join("broken.json");
    fs::write(path.as_std_path(), b"{not json").unwrap();

    let cache: PersistentCache<u64, Vec<u64>> = PersistentCache::open(path.clone(), 10, 10);
    assert!(cache.is_empty());
}

#[test]
fn unparseable_keys_are_skipped() {
    let (_temp, root) = temp_root();
    let path = root.join("keys.json");
    fs::write(path.as_std_path(), br#"{"12": [1], "abc": [2], "13": null}"#).unwrap();

    let cache: PersistentCache<u64, Vec<u64>> = PersistentCache::open(path.clone(), 10, 10);
    assert_eq!(cache.len(), 1);
    assert!(cache.contains(&12));
}

#[test]
fn clear_removes_backing_file() {
    let (_temp, root) = temp_root();
    let path = root.join("clear.json");
    let mut cache: PersistentCache<u64, Vec<u64>> = PersistentCache::open(path.clone(), 10, 1);
    cache.set(1, vec![1]);
    assert!(path.as_std_path().exists());

    cache.clear().unwrap();
    assert!(cache.is_empty());
    assert!(!path.as_std_path().exists());
}

#[test]
fn drop_flushes_pending_entries() {
    let (_temp, root) = temp_root();
    let path = root.join("drop.json");
    {
        let mut cache: PersistentCache<u64, Vec<u64>> = PersistentCache::open(path.clone(), 10, 50);
        cache.set(7, vec![8]);
    }
    let mut reloaded: PersistentCache<u64, Vec<u64>> = PersistentCache::open(path.clone(), 10, 50);
    assert_eq!(reloaded.get(&7), Some(&vec![8]));
}

#[test]
fn reload_keeps_recency_order() {
    let (_temp, root) = temp_root();
    let path = root.join("recency.json");
    {
        let mut cache: PersistentCache<u64, Vec<u64>> = PersistentCache::open(path.clone(), 3, 100);
        cache.set(30, vec![3]);
        cache.set(20, vec![2]);
        cache.set(10, vec![1]);
        // Recency is now 20 < 30 < 10, which is not key order.
        assert!(cache.get(&30).is_some());
        assert!(cache.get(&10).is_some());
        cache.save().unwrap();
    }

    let mut reloaded: PersistentCache<u64, Vec<u64>> = PersistentCache::open(path.clone(), 3, 100);
    let order: Vec<u64> = reloaded.iter().map(|(key, _)| *key).collect();
    assert_eq!(order, vec![20, 30, 10]);

    reloaded.set(40, vec![4]);
    assert!(!reloaded.contains(&20));
    assert!(reloaded.contains(&30));
    assert!(reloaded.contains(&10));
    assert!(reloaded.contains(&40));
}

#[test]
fn in_memory_cache_never_touches_disk() {
    let mut cache: PersistentCache<u64, Vec<u64>> = PersistentCache::in_memory(2);
    cache.set(1, vec![1]);
    cache.save().unwrap();
    assert!(cache.path().is_none());
    assert!(!cache.is_dirty());
}
