//! Offline corpus construction and artifact generation.
//!
//! Turns the plant family dataset into the artifact pair the runtime loads:
//! every description field is split into trait phrases, embedded in batches,
//! and written as `precomputedTraits.json` plus `precomputedEmbeddings.bin`
//! with row `i` of the binary belonging to `traits[i]`.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::artifacts::{TraitMetadata, EMBEDDINGS_FILE, TRAITS_FILE};
use crate::corpus::{split_traits, EmbeddingMatrix, TraitCorpusEntry};
use crate::embedding::EmbeddingProvider;

pub const DEFAULT_BATCH_SIZE: usize = 100;

/// One family record from the dataset. Fields other than these are ignored.
#[derive(Debug, Clone, Deserialize)]
pub struct FamilyRecord {
    pub id: String,
    #[serde(rename = "identificationModule", default)]
    pub identification: String,
    #[serde(rename = "memoryModule", default)]
    pub memory: String,
}

/// Read the family dataset, a JSON array of [`FamilyRecord`]s.
pub fn load_families(path: &Path) -> Result<Vec<FamilyRecord>> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("failed to parse {}", path.display()))
}

/// Build the trait corpus in dataset order.
///
/// Identification phrases come before memory phrases; a phrase repeated within
/// one family is kept once, at its first position.
pub fn build_corpus(families: &[FamilyRecord]) -> Vec<TraitCorpusEntry> {
    let mut corpus = Vec::new();
    for family in families {
        let mut seen = HashSet::new();
        let phrases = split_traits(&family.identification)
            .into_iter()
            .chain(split_traits(&family.memory));
        for phrase in phrases {
            if seen.insert(phrase.clone()) {
                corpus.push(TraitCorpusEntry::new(family.id.clone(), phrase));
            }
        }
    }
    corpus
}

/// Embed every trait in order, `batch_size` at a time. `on_batch` receives
/// `(rows done, total)` after each batch.
pub fn embed_corpus(
    provider: &dyn EmbeddingProvider,
    corpus: &[TraitCorpusEntry],
    batch_size: usize,
    mut on_batch: impl FnMut(usize, usize),
) -> Result<EmbeddingMatrix> {
    anyhow::ensure!(batch_size > 0, "batch size must be positive");
    let dims = provider.dimensions();
    let total = corpus.len();
    let mut rows = Vec::with_capacity(total);

    for (n, chunk) in corpus.chunks(batch_size).enumerate() {
        let texts: Vec<&str> = chunk.iter().map(|e| e.r#trait.as_str()).collect();
        let embedded = provider
            .embed_batch(&texts)
            .with_context(|| format!("embedding batch {} failed", n + 1))?;
        anyhow::ensure!(
            embedded.len() == texts.len(),
            "provider returned {} vectors for a batch of {}",
            embedded.len(),
            texts.len()
        );
        rows.extend(embedded);
        tracing::debug!(batch = n + 1, done = rows.len(), total, "embedded batch");
        on_batch(rows.len(), total);
    }

    Ok(EmbeddingMatrix::from_rows(rows, dims)?)
}

/// Paths written by [`write_artifacts`].
#[derive(Debug, Clone)]
pub struct WrittenArtifacts {
    pub traits: PathBuf,
    pub embeddings: PathBuf,
}

/// Write the artifact pair into `dir`, creating it if needed.
pub fn write_artifacts(
    dir: &Path,
    corpus: &[TraitCorpusEntry],
    matrix: &EmbeddingMatrix,
) -> Result<WrittenArtifacts> {
    anyhow::ensure!(
        corpus.len() == matrix.rows(),
        "corpus has {} traits but the matrix has {} rows",
        corpus.len(),
        matrix.rows()
    );
    std::fs::create_dir_all(dir)
        .with_context(|| format!("failed to create output dir: {}", dir.display()))?;

    let metadata = TraitMetadata {
        traits: corpus.to_vec(),
        dims: matrix.dims(),
    };
    let traits = dir.join(TRAITS_FILE);
    let json = serde_json::to_vec(&metadata).context("failed to serialize trait metadata")?;
    std::fs::write(&traits, json)
        .with_context(|| format!("failed to write {}", traits.display()))?;

    let embeddings = dir.join(EMBEDDINGS_FILE);
    std::fs::write(&embeddings, matrix.to_le_bytes())
        .with_context(|| format!("failed to write {}", embeddings.display()))?;

    tracing::info!(
        traits = corpus.len(),
        dims = matrix.dims(),
        dir = %dir.display(),
        "artifacts written"
    );
    Ok(WrittenArtifacts { traits, embeddings })
}
