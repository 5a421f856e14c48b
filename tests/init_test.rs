mod helpers;

use std::sync::Arc;

use helpers::*;
use tempfile::TempDir;
use traitsense::artifacts::{ArtifactSource, EMBEDDINGS_FILE, TRAITS_FILE};
use traitsense::{Error, InitState};

#[tokio::test]
async fn concurrent_ensure_ready_loads_model_once() {
    let tmp = TempDir::new().unwrap();
    let source = write_fake_artifacts(tmp.path(), &sample_corpus(), TEST_DIMS);
    let (factory, counters) = fake_factory(TEST_DIMS);
    let fetcher = Arc::new(CountingFetcher::new(0));
    let matcher = test_matcher(source, factory, Arc::clone(&fetcher));

    assert_eq!(matcher.state(), InitState::Uninitialized);

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let m = matcher.clone();
            tokio::spawn(async move { m.ensure_ready(None).await })
        })
        .collect();
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    assert_eq!(matcher.state(), InitState::Ready);
    assert_eq!(counters.loads(), 1);
    assert_eq!(fetcher.calls(), 2, "each artifact fetched once");
    assert_eq!(matcher.reference_corpus().unwrap().len(), sample_corpus().len());
}

#[tokio::test]
async fn progress_is_monotonic_and_ends_at_100() {
    let tmp = TempDir::new().unwrap();
    let source = write_fake_artifacts(tmp.path(), &sample_corpus(), TEST_DIMS);
    let (factory, _counters) = fake_factory(TEST_DIMS);
    let matcher = test_matcher(source, factory, Arc::new(CountingFetcher::new(0)));

    let (sink, seen) = recorder();
    matcher.ensure_ready(Some(sink)).await.unwrap();

    let seen = seen.lock().unwrap();
    let percents: Vec<f32> = seen.iter().map(|(p, _)| *p).collect();
    assert!(percents.windows(2).all(|w| w[0] <= w[1]), "not monotonic: {percents:?}");
    assert_eq!(percents.first(), Some(&5.0));
    assert_eq!(seen.last().unwrap(), &(100.0, "ready".to_string()));
    // The fake model reports 50%, which lands at 15 + 0.7 * 50.
    assert!(
        percents.iter().any(|p| (p - 50.0).abs() < 1e-3),
        "stage 2 not remapped: {percents:?}"
    );
    assert!(percents.contains(&85.0));
}

#[tokio::test]
async fn caller_joining_in_flight_startup_receives_its_progress() {
    let tmp = TempDir::new().unwrap();
    let source = write_fake_artifacts(tmp.path(), &sample_corpus(), TEST_DIMS);
    let (factory, counters) = fake_factory(TEST_DIMS);
    let matcher = test_matcher(source, factory, Arc::new(CountingFetcher::new(0)));

    let (sink_a, seen_a) = recorder();
    let first = {
        let m = matcher.clone();
        tokio::spawn(async move { m.ensure_ready(Some(sink_a)).await })
    };

    // The fake model takes 30 ms to load; join while it is loading.
    let mut polls = 0;
    while matcher.state() != InitState::ModelLoading {
        polls += 1;
        assert!(polls < 1000, "startup never reached model loading");
        tokio::time::sleep(std::time::Duration::from_millis(1)).await;
    }
    let (sink_b, seen_b) = recorder();
    matcher.ensure_ready(Some(sink_b)).await.unwrap();
    first.await.unwrap().unwrap();

    assert_eq!(counters.loads(), 1);
    let seen_b = seen_b.lock().unwrap();
    assert!(seen_b.iter().any(|(p, _)| *p == 85.0), "{seen_b:?}");
    assert_eq!(seen_b.last().unwrap(), &(100.0, "ready".to_string()));
    assert_eq!(seen_a.lock().unwrap().last().unwrap(), &(100.0, "ready".to_string()));
}

#[tokio::test]
async fn ensure_ready_when_ready_reports_100_immediately() {
    let tmp = TempDir::new().unwrap();
    let source = write_fake_artifacts(tmp.path(), &sample_corpus(), TEST_DIMS);
    let (factory, counters) = fake_factory(TEST_DIMS);
    let matcher = test_matcher(source, factory, Arc::new(CountingFetcher::new(0)));
    matcher.ensure_ready(None).await.unwrap();

    let (sink, seen) = recorder();
    matcher.ensure_ready(Some(sink)).await.unwrap();
    assert_eq!(seen.lock().unwrap().as_slice(), &[(100.0, "ready".to_string())]);
    assert_eq!(counters.loads(), 1);
}

#[tokio::test]
async fn model_failure_moves_to_failed_and_next_call_refetches() {
    let tmp = TempDir::new().unwrap();
    let source = write_fake_artifacts(tmp.path(), &sample_corpus(), TEST_DIMS);
    let (factory, counters) = flaky_factory(TEST_DIMS, 1);
    let fetcher = Arc::new(CountingFetcher::new(0));
    let matcher = test_matcher(source, factory, Arc::clone(&fetcher));

    let err = matcher.ensure_ready(None).await.unwrap_err();
    assert!(matches!(err, Error::ModelLoad(_)), "got {err:?}");
    assert_eq!(matcher.state(), InitState::Failed);
    assert!(matcher.reference_corpus().is_none());

    matcher.ensure_ready(None).await.unwrap();
    assert_eq!(matcher.state(), InitState::Ready);
    assert_eq!(counters.loads(), 2);
    // The buffer went to the worker on the first attempt, so stage 1 ran again.
    assert_eq!(fetcher.calls(), 4);
}

#[tokio::test]
async fn every_attached_caller_sees_the_same_failure() {
    let tmp = TempDir::new().unwrap();
    let source = write_fake_artifacts(tmp.path(), &sample_corpus(), TEST_DIMS);
    let (factory, counters) = failing_factory();
    let matcher = test_matcher(source, factory, Arc::new(CountingFetcher::new(0)));

    let (a, b) = tokio::join!(matcher.ensure_ready(None), matcher.ensure_ready(None));
    assert!(matches!(a, Err(Error::ModelLoad(_))));
    assert!(matches!(b, Err(Error::ModelLoad(_))));
    assert_eq!(counters.loads(), 1);
    assert_ne!(matcher.state(), InitState::Ready);
}

#[tokio::test]
async fn transient_fetch_errors_are_retried() {
    let tmp = TempDir::new().unwrap();
    let source = write_fake_artifacts(tmp.path(), &sample_corpus(), TEST_DIMS);
    let (factory, _counters) = fake_factory(TEST_DIMS);
    let fetcher = Arc::new(CountingFetcher::new(2));
    let matcher = test_matcher(source, factory, Arc::clone(&fetcher));

    matcher.ensure_ready(None).await.unwrap();
    assert_eq!(fetcher.calls(), 4);
}

#[tokio::test]
async fn missing_artifacts_fail_after_retry_budget() {
    let tmp = TempDir::new().unwrap();
    let source = ArtifactSource::new(tmp.path().to_str().unwrap(), TRAITS_FILE, EMBEDDINGS_FILE);
    let (factory, counters) = fake_factory(TEST_DIMS);
    let matcher = test_matcher(source, factory, Arc::new(CountingFetcher::new(0)));

    match matcher.ensure_ready(None).await.unwrap_err() {
        Error::NetworkFetch { attempts, .. } => assert_eq!(attempts, 4),
        other => panic!("unexpected error: {other:?}"),
    }
    assert_eq!(matcher.state(), InitState::Failed);
    assert_eq!(counters.loads(), 0, "model is never touched when data fails");
}

#[tokio::test]
async fn preloaded_data_is_used_by_ensure_ready() {
    let tmp = TempDir::new().unwrap();
    let source = write_fake_artifacts(tmp.path(), &sample_corpus(), TEST_DIMS);
    let (factory, counters) = fake_factory(TEST_DIMS);
    let fetcher = Arc::new(CountingFetcher::new(0));
    let matcher = test_matcher(source, factory, Arc::clone(&fetcher));

    matcher.preload_data().await.unwrap();
    assert_eq!(matcher.state(), InitState::DataLoaded);
    assert_eq!(counters.loads(), 0);

    // A second preload is a no-op.
    matcher.preload_data().await.unwrap();
    matcher.ensure_ready(None).await.unwrap();
    assert_eq!(fetcher.calls(), 2);
}

#[tokio::test]
async fn dimension_mismatch_is_rejected() {
    let tmp = TempDir::new().unwrap();
    let source = write_fake_artifacts(tmp.path(), &sample_corpus(), 16);
    let (factory, _counters) = fake_factory(TEST_DIMS);
    let matcher = test_matcher(source, factory, Arc::new(CountingFetcher::new(0)));

    let err = matcher.ensure_ready(None).await.unwrap_err();
    assert!(matches!(err, Error::InvalidArtifact(_)), "got {err:?}");
    assert_eq!(matcher.state(), InitState::Failed);
}

#[tokio::test]
async fn truncated_embedding_binary_is_rejected() {
    let tmp = TempDir::new().unwrap();
    let source = write_fake_artifacts(tmp.path(), &sample_corpus(), TEST_DIMS);
    let bin = tmp.path().join(EMBEDDINGS_FILE);
    let bytes = std::fs::read(&bin).unwrap();
    std::fs::write(&bin, &bytes[..bytes.len() - 4 * TEST_DIMS]).unwrap();

    let (factory, _counters) = fake_factory(TEST_DIMS);
    let matcher = test_matcher(source, factory, Arc::new(CountingFetcher::new(0)));
    let err = matcher.ensure_ready(None).await.unwrap_err();
    assert!(matches!(err, Error::WorkerProtocol(_)), "got {err:?}");
}
