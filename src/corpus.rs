//! Trait corpus types and the corpus embedding cache.
//!
//! A corpus is an ordered list of trait phrases. Its embeddings live in an
//! [`EmbeddingMatrix`] whose row `i` belongs to phrase `i`. [`CorpusStore`]
//! hands out matrices for a requested corpus, preferring the precomputed matrix
//! supplied at init, then the last on-demand result, and only then embedding.

use std::collections::HashSet;
use std::sync::Arc;

use ndarray::{Array2, ArrayView1, ArrayView2};
use serde::{Deserialize, Serialize};

use crate::embedding::EmbeddingProvider;
use crate::error::{Error, Result};

/// Characters that separate candidate trait phrases in family descriptions.
pub const TRAIT_DELIMITERS: &[char] = &['。', '；', '，', ',', ';'];

/// One descriptive phrase tied to a taxonomic family.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TraitCorpusEntry {
    #[serde(rename = "familyId")]
    pub family_id: String,
    pub r#trait: String,
}

impl TraitCorpusEntry {
    pub fn new(family_id: impl Into<String>, r#trait: impl Into<String>) -> Self {
        Self {
            family_id: family_id.into(),
            r#trait: r#trait.into(),
        }
    }
}

/// Split free text into trimmed, non-empty, de-duplicated phrases, keeping
/// first-occurrence order.
pub fn split_traits(text: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    text.split(TRAIT_DELIMITERS)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .filter(|s| seen.insert(s.to_string()))
        .map(str::to_string)
        .collect()
}

/// The phrase texts of a corpus, in row order.
pub fn corpus_texts(entries: &[TraitCorpusEntry]) -> Vec<String> {
    entries.iter().map(|e| e.r#trait.clone()).collect()
}

/// `N × D` row-major matrix of unit vectors.
#[derive(Debug, Clone, PartialEq)]
pub struct EmbeddingMatrix {
    data: Array2<f32>,
}

impl EmbeddingMatrix {
    pub fn new(data: Array2<f32>) -> Self {
        Self { data }
    }

    /// A matrix with no rows.
    pub fn empty(dims: usize) -> Self {
        Self {
            data: Array2::zeros((0, dims)),
        }
    }

    /// Stack equally sized vectors into a matrix.
    pub fn from_rows(rows: Vec<Vec<f32>>, dims: usize) -> Result<Self> {
        let n = rows.len();
        if let Some(bad) = rows.iter().find(|r| r.len() != dims) {
            return Err(Error::Embedding(format!(
                "embedding has {} dimensions, expected {dims}",
                bad.len()
            )));
        }
        let flat: Vec<f32> = rows.into_iter().flatten().collect();
        let data = Array2::from_shape_vec((n, dims), flat)
            .map_err(|e| Error::Embedding(format!("bad embedding shape: {e}")))?;
        Ok(Self { data })
    }

    /// Decode raw little-endian f32s, `dims` per row.
    pub fn from_le_bytes(bytes: &[u8], dims: usize) -> Result<Self> {
        if dims == 0 {
            return Err(Error::InvalidArtifact("embedding dims must be positive".into()));
        }
        let row_bytes = dims
            .checked_mul(std::mem::size_of::<f32>())
            .ok_or_else(|| Error::InvalidArtifact(format!("embedding dims {dims} is too large")))?;
        if bytes.len() % row_bytes != 0 {
            return Err(Error::InvalidArtifact(format!(
                "embedding buffer of {} bytes is not a whole number of {dims}-dim rows",
                bytes.len()
            )));
        }
        let flat: Vec<f32> = bytes
            .chunks_exact(4)
            .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect();
        let data = Array2::from_shape_vec((bytes.len() / row_bytes, dims), flat)
            .map_err(|e| Error::InvalidArtifact(format!("bad embedding shape: {e}")))?;
        Ok(Self { data })
    }

    /// Encode as raw little-endian f32s in row-major order.
    pub fn to_le_bytes(&self) -> Vec<u8> {
        self.data.iter().flat_map(|x| x.to_le_bytes()).collect()
    }

    pub fn rows(&self) -> usize {
        self.data.nrows()
    }

    pub fn dims(&self) -> usize {
        self.data.ncols()
    }

    pub fn is_empty(&self) -> bool {
        self.rows() == 0
    }

    pub fn row(&self, i: usize) -> ArrayView1<'_, f32> {
        self.data.row(i)
    }

    pub fn view(&self) -> ArrayView2<'_, f32> {
        self.data.view()
    }
}

/// Cheap structural fingerprint of a corpus: `(length, first text, last text)`.
///
/// This is an O(1) approximation, not a content hash. Two corpora with the same
/// length and endpoints but different middles compare equal. The reference
/// corpus is fixed per deployment, so the check is adequate there; a corpus that
/// mutates in place between calls would need a real content hash.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheValidityKey {
    len: usize,
    first: Option<String>,
    last: Option<String>,
}

impl CacheValidityKey {
    pub fn of<S: AsRef<str>>(corpus: &[S]) -> Self {
        Self {
            len: corpus.len(),
            first: corpus.first().map(|s| s.as_ref().to_string()),
            last: corpus.last().map(|s| s.as_ref().to_string()),
        }
    }
}

/// The matrix shipped with the precomputed artifacts, keyed by its trait list.
#[derive(Debug, Clone)]
pub struct PrecomputedCorpus {
    key: CacheValidityKey,
    matrix: Arc<EmbeddingMatrix>,
}

impl PrecomputedCorpus {
    pub fn new(traits: &[TraitCorpusEntry], matrix: EmbeddingMatrix) -> Result<Self> {
        if matrix.rows() != traits.len() {
            return Err(Error::InvalidArtifact(format!(
                "{} trait rows but {} embedding rows",
                traits.len(),
                matrix.rows()
            )));
        }
        Ok(Self {
            key: CacheValidityKey::of(&corpus_texts(traits)),
            matrix: Arc::new(matrix),
        })
    }

    pub fn dims(&self) -> usize {
        self.matrix.dims()
    }

    pub fn len(&self) -> usize {
        self.matrix.rows()
    }

    pub fn is_empty(&self) -> bool {
        self.matrix.is_empty()
    }

    /// The precomputed matrix, if `key` describes the same corpus.
    pub fn lookup(&self, key: &CacheValidityKey) -> Result<Arc<EmbeddingMatrix>> {
        if &self.key == key {
            Ok(Arc::clone(&self.matrix))
        } else {
            Err(Error::CorpusMismatch)
        }
    }
}

/// Corpus embedding cache owned by the worker.
#[derive(Default)]
pub struct CorpusStore {
    precomputed: Option<PrecomputedCorpus>,
    cached: Option<(CacheValidityKey, Arc<EmbeddingMatrix>)>,
}

impl CorpusStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_precomputed(&mut self, precomputed: PrecomputedCorpus) {
        tracing::info!(
            rows = precomputed.len(),
            dims = precomputed.dims(),
            "precomputed corpus installed"
        );
        self.precomputed = Some(precomputed);
    }

    pub fn precomputed(&self) -> Option<&PrecomputedCorpus> {
        self.precomputed.as_ref()
    }

    /// Embeddings for `corpus`, row `i` for `corpus[i]`.
    pub fn corpus_embeddings<S: AsRef<str>>(
        &mut self,
        corpus: &[S],
        provider: &dyn EmbeddingProvider,
    ) -> Result<Arc<EmbeddingMatrix>> {
        if corpus.is_empty() {
            return Ok(Arc::new(EmbeddingMatrix::empty(provider.dimensions())));
        }

        let key = CacheValidityKey::of(corpus);
        match self.lookup_cached(&key) {
            Ok(matrix) => return Ok(matrix),
            Err(Error::CorpusMismatch) => {}
            Err(other) => return Err(other),
        }

        tracing::info!(rows = corpus.len(), "corpus not precomputed, embedding on demand");
        let texts: Vec<&str> = corpus.iter().map(|s| s.as_ref()).collect();
        let rows = provider
            .embed_batch(&texts)
            .map_err(|e| Error::Embedding(format!("{e:#}")))?;
        if rows.len() != corpus.len() {
            return Err(Error::Embedding(format!(
                "provider returned {} embeddings for {} texts",
                rows.len(),
                corpus.len()
            )));
        }
        let matrix = Arc::new(EmbeddingMatrix::from_rows(rows, provider.dimensions())?);
        self.cached = Some((key, Arc::clone(&matrix)));
        Ok(matrix)
    }

    fn lookup_cached(&self, key: &CacheValidityKey) -> Result<Arc<EmbeddingMatrix>> {
        if let Some(matrix) = self.precomputed.as_ref().and_then(|p| p.lookup(key).ok()) {
            return Ok(matrix);
        }
        match &self.cached {
            Some((cached_key, matrix)) if cached_key == key => Ok(Arc::clone(matrix)),
            _ => Err(Error::CorpusMismatch),
        }
    }
}
