use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier, Mutex};
use std::thread;
use std::time::Duration;

use lungo::{BoxError, CacheBuilder, CacheError, CacheLoader, FnLoader, LoadingCache};

/// Loads `"v{key}"`; the bulk form also returns key 99, which nobody asked
/// for.  Clones share their counters.
#[derive(Clone, Default)]
struct Bulk {
    loads: Arc<AtomicUsize>,
    bulk_calls: Arc<Mutex<Vec<Vec<u32>>>>,
    fail_bulk: bool,
}

impl CacheLoader<u32, String> for Bulk {
    fn load(&self, key: &u32) -> Result<Option<String>, BoxError> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        Ok((*key != 0).then(|| format!("v{key}")))
    }

    fn load_all(&self, keys: &[u32]) -> Result<HashMap<u32, String>, BoxError> {
        self.bulk_calls.lock().unwrap().push(keys.to_vec());
        if self.fail_bulk {
            return Err("bulk backend down".into());
        }
        let mut loaded: HashMap<u32, String> = keys.iter().map(|k| (*k, format!("v{k}"))).collect();
        loaded.insert(99, "extra".to_string());
        Ok(loaded)
    }
}

fn bulk_cache(loader: &Bulk) -> LoadingCache<u32, String> {
    CacheBuilder::new(100).build_with_loader(loader.clone())
}

#[test]
fn get_loads_once_and_caches() {
    let loader = Bulk::default();
    let cache = bulk_cache(&loader);

    assert_eq!(cache.get(&1).unwrap().as_deref().map(String::as_str), Some("v1"));
    assert_eq!(cache.get(&1).unwrap().as_deref().map(String::as_str), Some("v1"));
    assert_eq!(loader.loads.load(Ordering::SeqCst), 1);

    let stats = cache.stats();
    assert_eq!((stats.hits, stats.misses), (1, 1));
    assert_eq!(stats.load_successes, 1);
}

#[test]
fn absent_load_caches_nothing() {
    let loader = Bulk::default();
    let cache = bulk_cache(&loader);

    assert_eq!(cache.get(&0).unwrap(), None);
    assert!(!cache.contains_key(&0));
    assert_eq!(cache.get(&0).unwrap(), None);
    assert_eq!(loader.loads.load(Ordering::SeqCst), 2);
}

#[test]
fn load_error_is_returned_and_not_cached() {
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);
    let cache: LoadingCache<u32, u32> = CacheBuilder::new(10).build_with_loader(FnLoader::new(move |_key: &u32| {
        counter.fetch_add(1, Ordering::SeqCst);
        Err("unavailable".into())
    }));

    assert!(matches!(cache.get(&1), Err(CacheError::Load(_))));
    assert!(matches!(cache.get(&1), Err(CacheError::Load(_))));
    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert_eq!(cache.estimated_size(), 0);
    assert_eq!(cache.stats().load_failures, 2);
}

// ---------------------------------------------------------------------------
// Bulk loading
// ---------------------------------------------------------------------------

#[test]
fn get_all_preserves_caller_order() {
    let loader = Bulk::default();
    let cache = bulk_cache(&loader);
    cache.put(1, "one".to_string()).unwrap();
    cache.put(2, "two".to_string()).unwrap();

    let result = cache.get_all([1, 3, 2]).unwrap();
    let keys: Vec<u32> = result.keys().copied().collect();
    assert_eq!(keys, vec![1, 3, 2]);
    assert_eq!(result[&3].as_str(), "v3");
    assert_eq!(result[&1].as_str(), "one");

    // Only the miss reached the loader, in one call.
    assert_eq!(*loader.bulk_calls.lock().unwrap(), vec![vec![3]]);
    assert_eq!(loader.loads.load(Ordering::SeqCst), 0);
}

#[test]
fn get_all_caches_extra_keys_without_returning_them() {
    let loader = Bulk::default();
    let cache = bulk_cache(&loader);

    let result = cache.get_all([5, 6]).unwrap();
    assert_eq!(result.len(), 2);
    assert!(!result.contains_key(&99));
    assert_eq!(cache.get_if_present(&99).as_deref().map(String::as_str), Some("extra"));
}

#[test]
fn get_all_collapses_duplicates() {
    let loader = Bulk::default();
    let cache = bulk_cache(&loader);

    let result = cache.get_all([4, 4, 7, 4]).unwrap();
    assert_eq!(result.keys().copied().collect::<Vec<_>>(), vec![4, 7]);
    assert_eq!(*loader.bulk_calls.lock().unwrap(), vec![vec![4, 7]]);
}

#[test]
fn get_all_failure_fails_everything_and_inserts_nothing() {
    let loader = Bulk {
        fail_bulk: true,
        ..Bulk::default()
    };
    let cache = bulk_cache(&loader);
    cache.put(1, "one".to_string()).unwrap();

    assert!(matches!(cache.get_all([1, 2, 3]), Err(CacheError::Load(_))));
    assert!(!cache.contains_key(&2));
    assert!(!cache.contains_key(&3));
    assert!(cache.contains_key(&1));
    assert_eq!(cache.stats().load_failures, 1);
}

#[test]
fn get_all_without_bulk_loader_loads_each_key() {
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);
    let cache: LoadingCache<u32, u32> = CacheBuilder::new(10).build_with_loader(FnLoader::new(move |key: &u32| {
        counter.fetch_add(1, Ordering::SeqCst);
        Ok((*key % 2 == 1).then_some(key * 10))
    }));

    let result = cache.get_all([3, 2, 1]).unwrap();
    assert_eq!(result.keys().copied().collect::<Vec<_>>(), vec![3, 1]);
    assert_eq!(*result[&3], 30);
    assert_eq!(calls.load(Ordering::SeqCst), 3);
    assert!(!cache.contains_key(&2));
}

#[test]
fn plain_cache_get_all_uses_the_given_function() {
    let cache: lungo::Cache<u32, u32> = CacheBuilder::new(10).build();
    cache.put(2, 20).unwrap();
    let result = cache
        .get_all([1, 2], |missing| {
            assert_eq!(missing, &[1]);
            Ok(missing.iter().map(|k| (*k, k * 10)).collect())
        })
        .unwrap();
    assert_eq!(result.values().map(|v| **v).collect::<Vec<_>>(), vec![10, 20]);
}

// ---------------------------------------------------------------------------
// Single flight
// ---------------------------------------------------------------------------

#[test]
fn concurrent_loads_run_once() {
    const THREADS: usize = 8;
    let calls = Arc::new(AtomicUsize::new(0));
    let cache: lungo::Cache<u32, u32> = CacheBuilder::new(10).build();
    let barrier = Arc::new(Barrier::new(THREADS));

    let handles: Vec<_> = (0..THREADS)
        .map(|_| {
            let cache = cache.clone();
            let calls = Arc::clone(&calls);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                cache
                    .get_with(1, |k| {
                        calls.fetch_add(1, Ordering::SeqCst);
                        thread::sleep(Duration::from_millis(50));
                        Some(k * 100)
                    })
                    .unwrap()
            })
        })
        .collect();

    let values: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    let first = values[0].clone().unwrap();
    assert!(values.iter().all(|v| v.as_ref().is_some_and(|v| Arc::ptr_eq(v, &first))));
}

#[test]
fn waiters_see_the_loader_error() {
    const THREADS: usize = 4;
    let cache: lungo::Cache<u32, u32> = CacheBuilder::new(10).build();
    let barrier = Arc::new(Barrier::new(THREADS));

    let handles: Vec<_> = (0..THREADS)
        .map(|_| {
            let cache = cache.clone();
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                cache.try_get_with(1, |_| {
                    thread::sleep(Duration::from_millis(50));
                    Err("boom".into())
                })
            })
        })
        .collect();

    for handle in handles {
        assert!(handle.join().unwrap().is_err());
    }
    assert!(!cache.contains_key(&1));
}

#[test]
fn panicking_computation_releases_the_key() {
    let cache: lungo::Cache<u32, u32> = CacheBuilder::new(10).build();
    let worker = cache.clone();
    let crashed = thread::spawn(move || worker.get_with(1, |_| panic!("loader bug")));
    assert!(crashed.join().is_err());

    assert!(!cache.contains_key(&1));
    assert_eq!(cache.get_with(1, |_| Some(7)).unwrap().as_deref(), Some(&7));
    assert_eq!(cache.stats().load_failures, 1);
}

#[test]
fn panicking_loader_fails_the_waiting_caller() {
    let entered = Arc::new(Barrier::new(2));
    let release = Arc::new(Barrier::new(2));
    let cache: lungo::Cache<u32, u32> = CacheBuilder::new(10).build();

    let crashed = {
        let (cache, entered, release) = (cache.clone(), Arc::clone(&entered), Arc::clone(&release));
        thread::spawn(move || {
            cache.get_with(1, |_| {
                entered.wait();
                release.wait();
                panic!("loader bug")
            })
        })
    };
    entered.wait();
    let waiter = {
        let cache = cache.clone();
        thread::spawn(move || cache.get_with(1, |_| Some(9)))
    };
    thread::sleep(Duration::from_millis(50));
    release.wait();

    assert!(crashed.join().is_err());
    assert!(matches!(waiter.join().unwrap(), Err(CacheError::Load(_)) | Ok(Some(_))));
    assert_eq!(cache.get_with(1, |_| Some(9)).unwrap().as_deref(), Some(&9));
}
