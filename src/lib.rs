//! Local semantic trait matching for free-text plant identification.
//!
//! traitsense embeds short plant-feature descriptions ("叶对生", "茎四棱形") with a
//! local sentence-embedding model, compares them against a precomputed corpus of
//! taxonomic trait phrases, and ranks the corpus by cosine similarity.
//!
//! # Architecture
//!
//! - **Embeddings**: local ONNX Runtime with bge-small-zh-v1.5 (512 dimensions),
//!   mean-pooled and L2-normalized. Weights are only ever read from a local directory.
//! - **Worker**: all model loading and tensor math run on one background thread;
//!   callers talk to it through a typed request/reply protocol keyed by correlation id.
//! - **Initialization**: a staged pipeline (fetch artifacts with retry, hand the
//!   embedding buffer to the worker, load the model, mark ready) that coalesces
//!   concurrent callers and reports progress.
//! - **Policy**: score thresholds for the free-text identifier and the quiz answer
//!   judge live with the callers, not in the ranker.
//!
//! # Modules
//!
//! - [`config`]: Configuration loading from TOML files and environment variables
//! - [`embedding`]: Text-to-vector embedding pipeline via ONNX Runtime
//! - [`corpus`]: Trait corpus types, embedding matrices, and the corpus embedding cache
//! - [`ranking`]: Cosine similarity ranking
//! - [`worker`]: Background execution host and its message protocol
//! - [`artifacts`]: Precomputed artifact formats and fetching with retry
//! - [`engine`]: The [`TraitMatcher`] coordinator and its initialization state machine
//! - [`precompute`]: Offline corpus construction and artifact generation
//! - [`policy`]: Identifier and answer-judge thresholds

pub mod artifacts;
pub mod config;
pub mod corpus;
pub mod embedding;
pub mod engine;
pub mod error;
pub mod policy;
pub mod precompute;
pub mod ranking;
pub mod worker;

use std::sync::Arc;

pub use engine::{InitState, TraitMatcher};
pub use error::{Error, Result};

/// Progress sink: `(percent in 0..=100, human-readable stage)`.
pub type ProgressFn = Arc<dyn Fn(f32, &str) + Send + Sync>;
