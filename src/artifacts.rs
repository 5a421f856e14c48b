//! Precomputed artifact formats and fetching.
//!
//! Two files travel together:
//!
//! - `precomputedTraits.json`: `{ "traits": [{ "familyId", "trait" }, ...], "dims": D }`
//! - `precomputedEmbeddings.bin`: little-endian f32, row-major, `N × D` values.
//!   Row `i` belongs to `traits[i]`; the binary carries no index of its own.
//!
//! Either may be served from a local directory or an `http(s)://` base URL.

use std::path::Path;
use std::time::Duration;

use futures::future::BoxFuture;
use futures::FutureExt;
use serde::{Deserialize, Serialize};

use crate::corpus::TraitCorpusEntry;
use crate::error::{Error, Result};

pub const TRAITS_FILE: &str = "precomputedTraits.json";
pub const EMBEDDINGS_FILE: &str = "precomputedEmbeddings.bin";

/// Contents of the trait metadata file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraitMetadata {
    pub traits: Vec<TraitCorpusEntry>,
    pub dims: usize,
}

/// Both artifacts, as fetched.
#[derive(Debug)]
pub struct Artifacts {
    pub metadata: TraitMetadata,
    pub embeddings: Vec<u8>,
}

/// Check that an embedding buffer of `len` bytes holds exactly one `dims`-wide
/// row per trait.
pub fn check_consistency(traits: usize, dims: usize, len: usize) -> Result<()> {
    if dims == 0 {
        return Err(Error::InvalidArtifact("dims must be positive".into()));
    }
    let expected = traits
        .checked_mul(dims)
        .and_then(|n| n.checked_mul(std::mem::size_of::<f32>()))
        .ok_or_else(|| {
            Error::InvalidArtifact(format!("{traits} traits × {dims} dims overflows usize"))
        })?;
    if len != expected {
        return Err(Error::InvalidArtifact(format!(
            "embedding buffer is {len} bytes, expected {expected} ({traits} traits × {dims} dims × 4)"
        )));
    }
    Ok(())
}

/// Where to find the two artifact files.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactSource {
    pub traits: String,
    pub embeddings: String,
}

impl ArtifactSource {
    /// Join both file names onto `base`, a directory or an `http(s)://` URL.
    pub fn new(base: &str, traits_file: &str, embeddings_file: &str) -> Self {
        Self {
            traits: join_location(base, traits_file),
            embeddings: join_location(base, embeddings_file),
        }
    }
}

fn is_remote(location: &str) -> bool {
    location.starts_with("http://") || location.starts_with("https://")
}

fn join_location(base: &str, file: &str) -> String {
    if is_remote(base) {
        format!("{}/{}", base.trim_end_matches('/'), file)
    } else {
        crate::config::expand_tilde(base)
            .join(file)
            .to_string_lossy()
            .into_owned()
    }
}

/// Bounded retry with exponential backoff.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt.
    pub retries: u32,
    /// Delay before the first retry; doubled after each.
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            retries: 3,
            base_delay: Duration::from_secs(1),
        }
    }
}

/// Reads one artifact. Errors are plain messages; [`fetch_with_retry`] decides
/// whether to try again.
pub trait ArtifactFetcher: Send + Sync {
    fn fetch<'a>(
        &'a self,
        location: &'a str,
    ) -> BoxFuture<'a, std::result::Result<Vec<u8>, String>>;
}

/// Fetches `http(s)://` locations with reqwest and everything else from disk.
#[derive(Debug, Clone, Default)]
pub struct DefaultFetcher {
    client: reqwest::Client,
}

impl DefaultFetcher {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ArtifactFetcher for DefaultFetcher {
    fn fetch<'a>(
        &'a self,
        location: &'a str,
    ) -> BoxFuture<'a, std::result::Result<Vec<u8>, String>> {
        async move {
            if is_remote(location) {
                let response = self
                    .client
                    .get(location)
                    .send()
                    .await
                    .map_err(|e| format!("request failed: {e}"))?;
                let status = response.status();
                if !status.is_success() {
                    return Err(format!("HTTP {status}"));
                }
                let bytes = response
                    .bytes()
                    .await
                    .map_err(|e| format!("error reading response: {e}"))?;
                Ok(bytes.to_vec())
            } else {
                tokio::fs::read(Path::new(location))
                    .await
                    .map_err(|e| format!("read failed: {e}"))
            }
        }
        .boxed()
    }
}

/// Fetch `location`, retrying with exponential backoff until the policy's
/// budget is spent.
pub async fn fetch_with_retry(
    fetcher: &dyn ArtifactFetcher,
    location: &str,
    policy: RetryPolicy,
) -> Result<Vec<u8>> {
    let mut delay = policy.base_delay;
    let mut attempt = 0u32;
    loop {
        attempt += 1;
        match fetcher.fetch(location).await {
            Ok(bytes) => {
                tracing::debug!(location, attempt, bytes = bytes.len(), "artifact fetched");
                return Ok(bytes);
            }
            Err(message) if attempt > policy.retries => {
                tracing::error!(
                    location,
                    attempt,
                    error = %message,
                    "artifact fetch failed, giving up"
                );
                return Err(Error::NetworkFetch {
                    location: location.to_string(),
                    attempts: attempt,
                    message,
                });
            }
            Err(message) => {
                tracing::warn!(
                    location,
                    attempt,
                    retry_in_ms = delay.as_millis() as u64,
                    error = %message,
                    "artifact fetch failed, retrying"
                );
                tokio::time::sleep(delay).await;
                delay *= 2;
            }
        }
    }
}

/// Fetch both artifacts concurrently and parse the metadata.
pub async fn load_artifacts(
    fetcher: &dyn ArtifactFetcher,
    source: &ArtifactSource,
    policy: RetryPolicy,
) -> Result<Artifacts> {
    let (traits_bytes, embeddings) = tokio::try_join!(
        fetch_with_retry(fetcher, &source.traits, policy),
        fetch_with_retry(fetcher, &source.embeddings, policy),
    )?;

    let metadata: TraitMetadata = serde_json::from_slice(&traits_bytes).map_err(|e| {
        Error::InvalidArtifact(format!("failed to parse {}: {e}", source.traits))
    })?;
    if metadata.dims == 0 {
        return Err(Error::InvalidArtifact(format!("{} declares zero dims", source.traits)));
    }

    tracing::info!(
        traits = metadata.traits.len(),
        dims = metadata.dims,
        bytes = embeddings.len(),
        "trait artifacts loaded"
    );
    Ok(Artifacts {
        metadata,
        embeddings,
    })
}
