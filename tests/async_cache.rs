mod common;

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier, Mutex};
use std::thread;
use std::time::Duration;

use common::RecordingListener;
use futures::executor::block_on;
use lungo::{
    AsyncCacheLoader, Blocking, BoxError, CacheBuilder, CacheError, CacheLoader, Executor, Expiry, FakeTicker,
    RemovalCause, ValueFuture,
};

fn async_cache(ticker: &FakeTicker, listener: &RecordingListener<u32, u32>) -> lungo::AsyncCache<u32, u32> {
    CacheBuilder::new(100)
        .expire_after_write(Duration::from_secs(60))
        .ticker(ticker.clone())
        .removal_listener_impl(listener.clone())
        .build_async()
}

// ---------------------------------------------------------------------------
// In-flight values
// ---------------------------------------------------------------------------

#[test]
fn pending_values_never_expire() {
    let ticker = FakeTicker::new();
    let listener = RecordingListener::new();
    let cache = async_cache(&ticker, &listener);

    let pending = ValueFuture::new();
    cache.put(1, pending.clone()).unwrap();
    for _ in 0..10 {
        ticker.advance(Duration::from_secs(600));
        let seen = cache.get_if_present(&1).expect("pending entry is present");
        assert!(ValueFuture::ptr_eq(&seen, &pending));
        cache.clean_up();
    }
    let loaded = cache.get_with(1, |_| panic!("must not load over a pending value"));
    assert!(ValueFuture::ptr_eq(&loaded, &pending));
    assert_eq!(cache.policy().weighted_size(), 0);

    // The lifetime starts when the value arrives.
    pending.complete(5);
    assert_eq!(cache.policy().weighted_size(), 1);
    ticker.advance(Duration::from_secs(59));
    assert!(cache.contains_key(&1));
    ticker.advance(Duration::from_secs(1));
    assert!(!cache.contains_key(&1));
    assert_eq!(listener.len(), 0);
}

#[test]
fn completing_without_a_value_drops_the_mapping_silently() {
    let ticker = FakeTicker::new();
    let listener = RecordingListener::new();
    let cache = async_cache(&ticker, &listener);

    let absent = ValueFuture::new();
    let failed = ValueFuture::new();
    let cancelled = ValueFuture::new();
    cache.put(1, absent.clone()).unwrap();
    cache.put(2, failed.clone()).unwrap();
    cache.put(3, cancelled.clone()).unwrap();
    assert_eq!(cache.estimated_size(), 3);

    absent.complete_with(Ok(None));
    failed.complete_exceptionally(CacheError::load("nope"));
    cancelled.cancel();

    assert_eq!(cache.estimated_size(), 0);
    assert_eq!(listener.len(), 0);
}

#[test]
fn replaced_pending_value_is_reported_once_it_completes() {
    let ticker = FakeTicker::new();
    let listener = RecordingListener::new();
    let cache = async_cache(&ticker, &listener);

    let first = ValueFuture::new();
    cache.put(1, first.clone()).unwrap();
    let previous = cache.put(1, ValueFuture::completed(2)).unwrap().unwrap();
    assert!(ValueFuture::ptr_eq(&previous, &first));
    assert_eq!(listener.len(), 0);

    first.complete(7);
    let events = listener.events();
    assert_eq!(events.len(), 1);
    assert_eq!((events[0].0, *events[0].1, events[0].2), (1, 7, RemovalCause::Replaced));
    assert_eq!(*cache.get_if_present(&1).unwrap().join().unwrap().unwrap(), 2);
}

#[test]
fn removed_pending_value_is_not_reported_if_cancelled() {
    let ticker = FakeTicker::new();
    let listener = RecordingListener::new();
    let cache = async_cache(&ticker, &listener);

    let pending = ValueFuture::new();
    cache.put(1, pending.clone()).unwrap();
    cache.invalidate(&1);
    pending.cancel();
    assert_eq!(listener.len(), 0);
    assert!(!cache.contains_key(&1));
}

// ---------------------------------------------------------------------------
// Single flight
// ---------------------------------------------------------------------------

#[test]
fn concurrent_callers_share_one_future() {
    const THREADS: usize = 8;
    let cache: lungo::AsyncCache<u32, u32> = CacheBuilder::new(10).build_async();
    let source = ValueFuture::new();
    let starts = Arc::new(AtomicUsize::new(0));
    let barrier = Arc::new(Barrier::new(THREADS));

    let handles: Vec<_> = (0..THREADS)
        .map(|_| {
            let cache = cache.clone();
            let source = source.clone();
            let starts = Arc::clone(&starts);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                cache.get_with_async(1, |_, _| {
                    starts.fetch_add(1, Ordering::SeqCst);
                    source
                })
            })
        })
        .collect();

    let futures: Vec<ValueFuture<u32>> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    assert_eq!(starts.load(Ordering::SeqCst), 1);
    assert!(futures.iter().all(|f| ValueFuture::ptr_eq(f, &futures[0])));
    assert!(!futures[0].is_done());

    source.complete(42);
    assert!(futures.iter().all(|f| f.peek_value().as_deref() == Some(&42)));
    assert_eq!(cache.stats().load_successes, 1);
}

#[test]
fn get_with_runs_on_the_executor() {
    let cache: lungo::AsyncCache<u32, String> = CacheBuilder::new(10).build_async();
    let future = cache.get_with(3, |k| Ok(Some(k.to_string())));
    assert_eq!(block_on(future).unwrap().as_deref().map(String::as_str), Some("3"));
    assert!(cache.synchronous().contains_key(&3));
}

#[test]
fn rejected_expiry_on_completion_fails_the_waiters() {
    struct RejectAll;
    impl Expiry<u32, u32> for RejectAll {
        fn expire_after_create(&self, _: &u32, _: &u32, _: u64) -> Result<Option<Duration>, BoxError> {
            Err("no lifetime".into())
        }
    }

    let cache: lungo::AsyncCache<u32, u32> = CacheBuilder::new(10).expire_after(RejectAll).build_async();
    let future = cache.get_with(1, |_| Ok(Some(1)));
    assert!(matches!(future.join(), Err(CacheError::Expiry(_))));
    assert!(!cache.contains_key(&1));
}

// ---------------------------------------------------------------------------
// Conditional writes by identity
// ---------------------------------------------------------------------------

#[test]
fn replace_if_and_remove_if_compare_future_identity() {
    let cache: lungo::AsyncCache<u32, u32> = CacheBuilder::new(10).build_async();
    let original = ValueFuture::completed(1);
    cache.put(1, original.clone()).unwrap();

    let lookalike = ValueFuture::completed(1);
    assert!(!cache.replace_if(1, &lookalike, ValueFuture::completed(2)).unwrap());
    assert!(cache.replace_if(1, &original, lookalike.clone()).unwrap());
    assert!(!cache.remove_if(&1, &original));
    assert!(cache.remove_if(&1, &lookalike));
    assert!(cache.get_if_present(&1).is_none());
}

#[test]
fn compute_if_absent_keeps_existing_futures() {
    let cache: lungo::AsyncCache<u32, u32> = CacheBuilder::new(10).build_async();
    let first = cache
        .compute_if_absent(1, |_| Some(ValueFuture::completed(10)))
        .unwrap()
        .unwrap();
    let second = cache
        .compute_if_absent(1, |_| panic!("key is present"))
        .unwrap()
        .unwrap();
    assert!(ValueFuture::ptr_eq(&first, &second));
    assert!(cache.compute_if_absent(2, |_| None).unwrap().is_none());
    assert!(!cache.contains_key(&2));
}

#[test]
fn replace_returns_previous_future() {
    let cache: lungo::AsyncCache<u32, u32> = CacheBuilder::new(10).build_async();
    assert!(cache.replace(1, ValueFuture::completed(1)).unwrap().is_none());
    let first = ValueFuture::completed(1);
    cache.put(1, first.clone()).unwrap();
    let previous = cache.replace(1, ValueFuture::completed(2)).unwrap().unwrap();
    assert!(ValueFuture::ptr_eq(&previous, &first));
    let removed = cache.remove(&1).unwrap();
    assert_eq!(removed.peek_value().as_deref(), Some(&2));
}

#[test]
fn synchronous_view_waits_for_values() {
    let cache: lungo::AsyncCache<u32, u32> = CacheBuilder::new(10).build_async();
    let pending = ValueFuture::new();
    cache.put(1, pending.clone()).unwrap();

    let view = cache.synchronous();
    let completer = thread::spawn(move || {
        thread::sleep(Duration::from_millis(20));
        pending.complete(9);
    });
    assert_eq!(view.get_if_present(&1).as_deref(), Some(&9));
    completer.join().unwrap();
}

// ---------------------------------------------------------------------------
// Bulk and loaders
// ---------------------------------------------------------------------------

#[test]
fn async_get_all_joins_pending_and_loaded_values() {
    let cache: lungo::AsyncCache<u32, u32> = CacheBuilder::new(10).build_async();
    let pending = ValueFuture::new();
    cache.put(2, pending.clone()).unwrap();

    let all = cache.get_all([3, 2, 1], |missing| {
        assert_eq!(missing, &[3, 1]);
        Ok(missing.iter().map(|k| (*k, k * 10)).collect())
    });
    pending.complete(20);
    let all = block_on(all).unwrap();
    assert_eq!(all.into_iter().map(|(k, v)| (k, *v)).collect::<Vec<_>>(), vec![(3, 30), (2, 20), (1, 10)]);
}

struct Squares;

impl CacheLoader<u32, u32> for Squares {
    fn load(&self, key: &u32) -> Result<Option<u32>, BoxError> {
        Ok(Some(key * key))
    }
}

#[test]
fn blocking_loader_backs_an_async_loading_cache() {
    let cache: lungo::AsyncLoadingCache<u32, u32> =
        CacheBuilder::new(10).build_async_with_loader(Blocking::new(Squares));

    assert_eq!(*cache.get(&4).join().unwrap().unwrap(), 16);
    let all = block_on(cache.get_all([5, 4])).unwrap();
    assert_eq!(all.into_iter().map(|(k, v)| (k, *v)).collect::<Vec<_>>(), vec![(5, 25), (4, 16)]);
}

/// Completes nothing by itself; the test resolves the futures it hands out.
/// Clones share the record.
#[derive(Clone, Default)]
struct Deferred {
    handed_out: Arc<Mutex<HashMap<u32, ValueFuture<u32>>>>,
}

impl AsyncCacheLoader<u32, u32> for Deferred {
    fn async_load(&self, key: &u32, _executor: &Arc<dyn Executor>) -> ValueFuture<u32> {
        let future = ValueFuture::new();
        self.handed_out.lock().unwrap().insert(*key, future.clone());
        future
    }
}

#[test]
fn async_loader_futures_are_stored_until_they_complete() {
    let loader = Deferred::default();
    let cache: lungo::AsyncLoadingCache<u32, u32> = CacheBuilder::new(10).build_async_with_loader(loader.clone());

    let first = cache.get(&1);
    let again = cache.get(&1);
    assert!(ValueFuture::ptr_eq(&first, &again));
    assert!(!first.is_done());

    let source = loader.handed_out.lock().unwrap()[&1].clone();
    source.complete(11);
    assert_eq!(first.peek_value().as_deref(), Some(&11));
    assert_eq!(cache.synchronous().get_if_present(&1).as_deref(), Some(&11));
}

#[test]
fn panicking_computation_fails_the_shared_future() {
    let cache: lungo::AsyncCache<u32, u32> = CacheBuilder::new(10).build_async();
    let worker = cache.clone();
    let crashed = thread::spawn(move || {
        worker.get_with(1, |_| panic!("loader bug"));
    });
    assert!(crashed.join().is_err());

    assert!(!cache.contains_key(&1));
    assert_eq!(*cache.get_with(1, |_| Ok(Some(7))).join().unwrap().unwrap(), 7);
}

#[test]
fn panicking_future_factory_releases_the_key() {
    let cache: lungo::AsyncCache<u32, u32> = CacheBuilder::new(10).build_async();
    let worker = cache.clone();
    let crashed = thread::spawn(move || {
        worker.get_with_async(1, |_, _| panic!("factory bug"));
    });
    assert!(crashed.join().is_err());

    assert!(!cache.contains_key(&1));
    assert_eq!(*cache.get_with_async(1, |_, _| ValueFuture::completed(7)).join().unwrap().unwrap(), 7);
}
