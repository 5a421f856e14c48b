#![allow(dead_code)]

use std::path::Path;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::future::BoxFuture;
use futures::FutureExt;
use traitsense::artifacts::{
    ArtifactFetcher, ArtifactSource, DefaultFetcher, RetryPolicy, EMBEDDINGS_FILE, TRAITS_FILE,
};
use traitsense::corpus::{EmbeddingMatrix, TraitCorpusEntry};
use traitsense::embedding::{l2_normalize, EmbeddingProvider, ProviderFactory};
use traitsense::{ProgressFn, TraitMatcher};

pub const TEST_DIMS: usize = 64;

/// Deterministic bag-of-characters embedding: texts sharing characters score higher.
pub fn fake_embedding(text: &str, dims: usize) -> Vec<f32> {
    let mut v = vec![0.0f32; dims];
    for c in text.chars().filter(|c| !c.is_whitespace()) {
        v[(c as usize).wrapping_mul(2_654_435_761) % dims] += 1.0;
    }
    l2_normalize(&v)
}

/// Provider backed by [`fake_embedding`] that counts every text it embeds.
pub struct FakeProvider {
    pub dims: usize,
    pub embedded: Arc<AtomicUsize>,
}

impl FakeProvider {
    pub fn new(dims: usize) -> Self {
        Self {
            dims,
            embedded: Arc::new(AtomicUsize::new(0)),
        }
    }
}

impl EmbeddingProvider for FakeProvider {
    fn embed(&self, text: &str) -> anyhow::Result<Vec<f32>> {
        self.embedded.fetch_add(1, Ordering::SeqCst);
        Ok(fake_embedding(text, self.dims))
    }

    fn dimensions(&self) -> usize {
        self.dims
    }
}

/// Call counters shared with a factory built by [`fake_factory`].
#[derive(Clone, Default)]
pub struct Counters {
    pub loads: Arc<AtomicUsize>,
    pub embedded: Arc<AtomicUsize>,
}

impl Counters {
    pub fn loads(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }

    pub fn embedded(&self) -> usize {
        self.embedded.load(Ordering::SeqCst)
    }
}

/// Factory whose first `failures` loads fail. Each load reports 50% progress
/// and takes a little while so concurrent callers overlap.
pub fn flaky_factory(dims: usize, failures: usize) -> (ProviderFactory, Counters) {
    let counters = Counters::default();
    let c = counters.clone();
    let factory: ProviderFactory = Arc::new(move |on_progress: &dyn Fn(f32, &str)| {
        let n = c.loads.fetch_add(1, Ordering::SeqCst);
        on_progress(50.0, "loading fake model");
        std::thread::sleep(Duration::from_millis(30));
        anyhow::ensure!(n >= failures, "fake model load failure #{}", n + 1);
        Ok(Arc::new(FakeProvider {
            dims,
            embedded: Arc::clone(&c.embedded),
        }) as Arc<dyn EmbeddingProvider>)
    });
    (factory, counters)
}

pub fn fake_factory(dims: usize) -> (ProviderFactory, Counters) {
    flaky_factory(dims, 0)
}

pub fn failing_factory() -> (ProviderFactory, Counters) {
    flaky_factory(TEST_DIMS, usize::MAX)
}

/// Provider that panics on every call.
pub struct PanickingProvider;

impl EmbeddingProvider for PanickingProvider {
    fn embed(&self, _text: &str) -> anyhow::Result<Vec<f32>> {
        panic!("inference exploded")
    }

    fn dimensions(&self) -> usize {
        TEST_DIMS
    }
}

pub fn panicking_factory() -> ProviderFactory {
    Arc::new(|_on_progress: &dyn Fn(f32, &str)| {
        Ok(Arc::new(PanickingProvider) as Arc<dyn EmbeddingProvider>)
    })
}

/// A small family corpus in dataset order.
pub fn sample_corpus() -> Vec<TraitCorpusEntry> {
    [
        ("lamiaceae", "茎四棱形"),
        ("lamiaceae", "叶对生"),
        ("lamiaceae", "唇形花冠"),
        ("rosaceae", "花五基数"),
        ("rosaceae", "托叶明显"),
        ("poaceae", "秆圆柱形中空"),
        ("poaceae", "叶鞘包秆"),
        ("asteraceae", "头状花序"),
    ]
    .into_iter()
    .map(|(f, t)| TraitCorpusEntry::new(f, t))
    .collect()
}

/// Write the artifact pair for `corpus` into `dir` using [`fake_embedding`].
pub fn write_fake_artifacts(
    dir: &Path,
    corpus: &[TraitCorpusEntry],
    dims: usize,
) -> ArtifactSource {
    let rows = corpus
        .iter()
        .map(|e| fake_embedding(&e.r#trait, dims))
        .collect();
    let matrix = EmbeddingMatrix::from_rows(rows, dims).unwrap();
    traitsense::precompute::write_artifacts(dir, corpus, &matrix).unwrap();
    ArtifactSource::new(dir.to_str().unwrap(), TRAITS_FILE, EMBEDDINGS_FILE)
}

/// Reads from disk, failing the first `failures` calls and counting all of them.
pub struct CountingFetcher {
    inner: DefaultFetcher,
    failures: AtomicU32,
    pub calls: AtomicU32,
}

impl CountingFetcher {
    pub fn new(failures: u32) -> Self {
        Self {
            inner: DefaultFetcher::new(),
            failures: AtomicU32::new(failures),
            calls: AtomicU32::new(0),
        }
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

impl ArtifactFetcher for CountingFetcher {
    fn fetch<'a>(&'a self, location: &'a str) -> BoxFuture<'a, Result<Vec<u8>, String>> {
        async move {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let remaining = self.failures.load(Ordering::SeqCst);
            if remaining > 0 {
                self.failures.store(remaining - 1, Ordering::SeqCst);
                return Err("connection reset by peer".to_string());
            }
            self.inner.fetch(location).await
        }
        .boxed()
    }
}

pub fn fast_retry() -> RetryPolicy {
    RetryPolicy {
        retries: 3,
        base_delay: Duration::from_millis(1),
    }
}

/// A matcher over `source` with the given factory and fetcher.
pub fn test_matcher(
    source: ArtifactSource,
    factory: ProviderFactory,
    fetcher: Arc<CountingFetcher>,
) -> TraitMatcher {
    TraitMatcher::new(source, fast_retry(), fetcher, factory).unwrap()
}

/// Progress sink that records every update.
pub fn recorder() -> (ProgressFn, Arc<Mutex<Vec<(f32, String)>>>) {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let s = Arc::clone(&seen);
    let sink: ProgressFn = Arc::new(move |percent: f32, stage: &str| {
        s.lock().unwrap().push((percent, stage.to_string()))
    });
    (sink, seen)
}

pub fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}
