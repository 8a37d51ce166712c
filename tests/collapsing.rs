//! End-to-end collapsing through the number-to-words executor.

mod common;

use request_collapser::words::{number_to_words, number_words_mapping, NumbersToWords};
use request_collapser::{
    BatchExecutor, Collapser, CollapserConfig, ContextPropagator, Error, ExecutionScope,
};
use std::collections::HashMap;
use std::time::Duration;

const REQUESTS: u64 = 1000;

fn numbers_collapser() -> Collapser<u64, request_collapser::words::NumberWord, String> {
    Collapser::new(CollapserConfig::new("numbers"), number_words_mapping())
        .expect("Failed to create collapser")
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_collapses_requests_from_one_thread() {
    common::init_tracing();
    let collapser = numbers_collapser();
    let scope = ExecutionScope::initialize().unwrap();

    let mut pending = HashMap::new();
    for number in 0..REQUESTS {
        pending.insert(number, collapser.submit(number).unwrap());
        // pause halfway so the requests cannot all land in one window
        if number == REQUESTS / 2 {
            tokio::time::sleep(Duration::from_secs(1)).await;
        }
    }

    assert_eq!(pending.len(), REQUESTS as usize);
    for (number, fut) in pending {
        let word = fut.await.unwrap();
        assert_eq!(word, number_to_words(number));
    }

    let calls = collapser.invocation_count();
    assert!(calls > 1, "expected more than one batch, got {}", calls);
    assert!(calls < REQUESTS, "expected batching, got {} calls", calls);

    let log = scope.request_log();
    assert_eq!(log.len() as u64, calls);
    assert_eq!(log.total_units() as u64, REQUESTS);
    scope.shutdown();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_collapses_requests_fanned_out_to_workers() {
    common::init_tracing();
    let collapser = numbers_collapser();
    let propagator = ContextPropagator::new().unwrap();
    let scope = ExecutionScope::initialize().unwrap();

    let mut pending = HashMap::new();
    for number in 0..REQUESTS {
        let c = collapser.clone();
        let handle = propagator.spawn(async move { c.submit(number)?.await });
        pending.insert(number, handle);
        if number == REQUESTS / 2 {
            tokio::time::sleep(Duration::from_secs(1)).await;
        }
    }

    for (number, handle) in pending {
        let word = handle.await.unwrap().unwrap().unwrap();
        assert_eq!(word, number_to_words(number));
    }

    let calls = collapser.invocation_count();
    assert!(calls > 1, "expected more than one batch, got {}", calls);
    assert!(calls < REQUESTS, "expected batching, got {} calls", calls);
    // nested submissions were accounted to the parent scope
    assert_eq!(scope.request_log().total_units() as u64, REQUESTS);
    scope.shutdown();
}

#[tokio::test]
async fn test_fan_out_without_scope_cannot_collapse() {
    common::init_tracing();
    let collapser = numbers_collapser();
    let c = collapser.clone();
    let result = tokio::spawn(async move { c.submit(1).map(|_| ()) })
        .await
        .unwrap();
    assert!(matches!(result, Err(Error::NoActiveScope)));
}

#[tokio::test]
async fn test_spaced_requests_are_not_batched() {
    common::init_tracing();
    let collapser = Collapser::new(
        CollapserConfig::new("numbers").with_window(Duration::from_millis(10)),
        number_words_mapping(),
    )
    .unwrap();
    let scope = ExecutionScope::initialize().unwrap();

    for number in 0..5 {
        assert_eq!(
            collapser.submit(number).unwrap().await.unwrap(),
            number_to_words(number)
        );
        tokio::time::sleep(Duration::from_millis(30)).await;
    }

    assert_eq!(collapser.invocation_count(), 5);
    scope.shutdown();
}

#[tokio::test]
async fn test_batched_value_matches_direct_call() {
    common::init_tracing();
    let collapser = numbers_collapser();
    let scope = ExecutionScope::initialize().unwrap();

    let pending: Vec<_> = (0..20).map(|n| collapser.submit(n).unwrap()).collect();
    let mut batched = Vec::new();
    for fut in pending {
        batched.push(fut.await.unwrap());
    }

    let direct = NumbersToWords.execute(vec![7]).await.unwrap();
    assert_eq!(batched[7], direct[0].word);
    assert_eq!(collapser.invocation_count(), 1);
    scope.shutdown();
}

#[tokio::test]
async fn test_reset_stats_between_runs() {
    common::init_tracing();
    let collapser = numbers_collapser();
    let scope = ExecutionScope::initialize().unwrap();
    collapser.submit(1).unwrap().await.unwrap();
    assert_eq!(collapser.invocation_count(), 1);

    collapser.reset_stats();
    assert_eq!(collapser.invocation_count(), 0);
    assert_eq!(collapser.stats().submitted, 0);
    scope.shutdown();
}
