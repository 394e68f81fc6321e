use super::*;
use crate::action::LazyAction;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

#[tokio::test]
async fn single_flight_fifty_concurrent_callers() {
    let calls = Arc::new(AtomicUsize::new(0));
    let store: MemoryStore<String> = MemoryStore::new(Duration::from_secs(60), Duration::from_secs(60), Duration::from_secs(60));

    let calls_for_op = calls.clone();
    let executor = Arc::new(
        idempotent::<String, String, String>(move |_input: &String| {
            let calls_for_op = calls_for_op.clone();
            LazyAction::from_async(move || {
                let calls_for_op = calls_for_op.clone();
                async move {
                    calls_for_op.fetch_add(1, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(20)).await;
                    Ok::<String, String>("tx_1".to_string())
                }
            })
        })
        .key(|input: &String| input.clone())
        .policy(Policy::default().with_on_pending(OnPending::Wait))
        .store(store)
        .build(),
    );

    let mut handles = Vec::new();
    for _ in 0..50 {
        let executor = executor.clone();
        handles.push(tokio::spawn(async move {
            executor.run("key-a".to_string()).await
        }));
    }

    let mut from_cache_count = 0;
    let mut fresh_count = 0;
    for handle in handles {
        let outcome = handle.await.unwrap().unwrap();
        assert_eq!(outcome.value, "tx_1");
        if outcome.from_cache {
            from_cache_count += 1;
        } else {
            fresh_count += 1;
        }
    }

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(fresh_count, 1);
    assert_eq!(from_cache_count, 49);
}

#[tokio::test]
async fn retention_within_ttl_serves_from_cache() {
    let store: MemoryStore<i32> = MemoryStore::new(Duration::from_secs(60), Duration::from_secs(60), Duration::from_secs(60));
    let calls = Arc::new(AtomicUsize::new(0));
    let calls2 = calls.clone();

    let executor = idempotent::<i32, i32, String>(move |input: &i32| {
        let calls2 = calls2.clone();
        let input = *input;
        LazyAction::from_async(move || {
            let calls2 = calls2.clone();
            async move {
                calls2.fetch_add(1, Ordering::SeqCst);
                Ok::<i32, String>(input * 2)
            }
        })
    })
    .key(|input: &i32| input.to_string())
    .store(store)
    .build();

    let first = executor.run(5).await.unwrap();
    assert_eq!(first.value, 10);
    assert!(!first.from_cache);

    let second = executor.run(5).await.unwrap();
    assert_eq!(second.value, 10);
    assert!(second.from_cache);

    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn collision_detection_on_input_fingerprint() {
    let store: MemoryStore<i32> = MemoryStore::new(Duration::from_secs(60), Duration::from_secs(60), Duration::from_secs(60));

    // Every input shares the same key but the fingerprint reflects the
    // actual payload, so a second call with a different input must conflict.
    let executor = idempotent::<i32, i32, String>(|input: &i32| {
        let input = *input;
        LazyAction::from_async(move || async move { Ok::<i32, String>(input) })
    })
    .key(|_input: &i32| "shared-key".to_string())
    .fingerprint(|input: &i32| input.to_le_bytes().to_vec())
    .policy(Policy::default().with_input_fingerprint(true))
    .store(store)
    .build();

    let first = executor.run(1).await.unwrap();
    assert_eq!(first.value, 1);

    let collided = executor.run(2).await;
    assert!(matches!(collided, Err(IdempotencyError::Conflict)));
}

#[tokio::test]
async fn on_pending_fail_returns_in_flight_error() {
    let store: MemoryStore<i32> = MemoryStore::new(Duration::from_secs(60), Duration::from_secs(60), Duration::from_secs(60));

    // Claim the key manually to simulate an in-flight sibling.
    store.claim("busy", Utc::now(), None).await;

    let executor = idempotent::<i32, i32, String>(|input: &i32| {
        let input = *input;
        LazyAction::from_async(move || async move { Ok::<i32, String>(input) })
    })
    .key(|_input: &i32| "busy".to_string())
    .policy(Policy::default().with_on_pending(OnPending::Fail))
    .store(store)
    .build();

    let result = executor.run(1).await;
    assert!(matches!(result, Err(IdempotencyError::InFlight)));
}

#[tokio::test]
async fn stuck_pending_lease_is_eventually_reclaimed_under_wait() {
    let store: MemoryStore<i32> = MemoryStore::new(
        Duration::from_secs(60),
        Duration::from_secs(60),
        Duration::from_millis(20),
    );

    // Claim the key and never complete/fail it, simulating a holder that
    // crashed mid-flight.
    store.claim("stuck", Utc::now(), None).await;

    let executor = idempotent::<i32, i32, String>(|input: &i32| {
        let input = *input;
        LazyAction::from_async(move || async move { Ok::<i32, String>(input) })
    })
    .key(|_input: &i32| "stuck".to_string())
    .policy(
        Policy::default()
            .with_on_pending(OnPending::Wait)
            .with_pending_lease(Duration::from_millis(20)),
    )
    .store(store)
    .build();

    // Must make eventual progress rather than spin forever once the lease
    // has elapsed; bound the wait generously so a hang fails the test
    // instead of hanging the suite.
    let result = tokio::time::timeout(Duration::from_secs(2), executor.run(1)).await;
    let outcome = result
        .expect("run() must not spin forever against an expired lease")
        .unwrap();
    assert_eq!(outcome.value, 1);
    assert!(!outcome.from_cache);
}
