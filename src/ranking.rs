//! Cosine similarity ranking over a corpus embedding matrix.
//!
//! Vectors are unit-norm, so cosine similarity is a dot product. The ranker
//! never filters: it returns every corpus row, best first, and leaves cutoffs
//! to the caller (see [`crate::policy`]).

use ndarray::ArrayView1;
use serde::{Deserialize, Serialize};

use crate::corpus::EmbeddingMatrix;
use crate::error::{Error, Result};

/// One scored corpus row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimilarityResult {
    #[serde(rename = "corpusId")]
    pub corpus_index: usize,
    pub score: f32,
    pub text: String,
}

/// Score every corpus row against `query`, highest first. Rows with exactly
/// equal scores keep corpus order.
pub fn rank<S: AsRef<str>>(
    query: ArrayView1<'_, f32>,
    corpus: &EmbeddingMatrix,
    texts: &[S],
) -> Result<Vec<SimilarityResult>> {
    if corpus.is_empty() || texts.is_empty() {
        return Ok(Vec::new());
    }
    if corpus.rows() != texts.len() {
        return Err(Error::Embedding(format!(
            "{} corpus texts but {} embedding rows",
            texts.len(),
            corpus.rows()
        )));
    }
    if query.len() != corpus.dims() {
        return Err(Error::Embedding(format!(
            "query has {} dimensions, corpus has {}",
            query.len(),
            corpus.dims()
        )));
    }

    let scores = corpus.view().dot(&query);
    let mut results: Vec<SimilarityResult> = scores
        .iter()
        .zip(texts)
        .enumerate()
        .map(|(i, (&score, text))| SimilarityResult {
            corpus_index: i,
            score,
            text: text.as_ref().to_string(),
        })
        .collect();

    // sort_by is stable: equal scores stay in corpus order
    results.sort_by(|a, b| b.score.total_cmp(&a.score));
    Ok(results)
}

/// [`rank`] for each row of `queries`, sharing one corpus matrix.
pub fn rank_batch<S: AsRef<str>>(
    queries: &EmbeddingMatrix,
    corpus: &EmbeddingMatrix,
    texts: &[S],
) -> Result<Vec<Vec<SimilarityResult>>> {
    queries
        .view()
        .rows()
        .into_iter()
        .map(|q| rank(q, corpus, texts))
        .collect()
}

/// Cosine similarity of two arbitrary vectors. Zero if either has zero norm.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}
