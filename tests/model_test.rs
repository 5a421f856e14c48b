//! End-to-end checks against the real bge-small-zh-v1.5 model.
//!
//! Run `traitsense model download` first, then `cargo test -- --ignored`.

mod helpers;

use std::sync::Arc;

use helpers::*;
use tempfile::TempDir;
use traitsense::artifacts::{ArtifactSource, EMBEDDINGS_FILE, TRAITS_FILE};
use traitsense::config::TraitSenseConfig;
use traitsense::corpus::TraitCorpusEntry;
use traitsense::embedding::{create_provider, provider_factory};
use traitsense::precompute::{embed_corpus, write_artifacts};

#[tokio::test]
#[ignore = "requires the downloaded embedding model"]
async fn woody_query_prefers_woody_habits() {
    let config = TraitSenseConfig::default();
    let tmp = TempDir::new().unwrap();
    let source = ArtifactSource::new(tmp.path().to_str().unwrap(), TRAITS_FILE, EMBEDDINGS_FILE);
    let matcher = test_matcher(
        source,
        provider_factory(config.embedding.clone()),
        Arc::new(CountingFetcher::new(0)),
    );

    let corpus = strings(&["草本", "灌木", "乔木"]);
    let results = matcher.search("多年生木本植物", &corpus).await;
    // No artifacts in the temp dir, so initialization fails before search.
    assert!(results.is_err());

    let provider = create_provider(&config.embedding, &|_, _| {}).unwrap();
    let entries: Vec<TraitCorpusEntry> = corpus
        .iter()
        .map(|t| TraitCorpusEntry::new("habit", t.as_str()))
        .collect();
    let matrix = embed_corpus(provider.as_ref(), &entries, 100, |_, _| {}).unwrap();
    write_artifacts(tmp.path(), &entries, &matrix).unwrap();

    let results = matcher.search("多年生木本植物", &corpus).await.unwrap();
    let score = |text: &str| results.iter().find(|r| r.text == text).unwrap().score;
    let woody = score("灌木").max(score("乔木"));
    assert!(
        woody > score("草本"),
        "woody habits should outrank 草本: {results:?}"
    );
}

#[tokio::test]
#[ignore = "requires the downloaded embedding model"]
async fn precomputed_rows_match_live_embeddings() {
    let config = TraitSenseConfig::default();
    let provider = create_provider(&config.embedding, &|_, _| {}).unwrap();
    let corpus = sample_corpus();
    let matrix = embed_corpus(provider.as_ref(), &corpus, 3, |_, _| {}).unwrap();
    assert_eq!(matrix.dims(), 512);

    for (i, entry) in corpus.iter().enumerate() {
        let live = provider.embed(&entry.r#trait).unwrap();
        let sim = traitsense::ranking::cosine_similarity(&live, &matrix.row(i).to_vec());
        assert!(sim > 0.99, "row {i} ({}) similarity {sim}", entry.r#trait);
    }
}
