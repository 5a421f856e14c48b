//! CLI `precompute` command: build the trait artifacts with the configured model.

use std::path::Path;

use anyhow::{Context, Result};
use indicatif::{ProgressBar, ProgressStyle};

use traitsense::config::TraitSenseConfig;
use traitsense::embedding;
use traitsense::precompute::{build_corpus, embed_corpus, load_families, write_artifacts};

/// Split the family dataset into traits, embed them, and write both artifacts to `out`.
pub async fn precompute(
    config: &TraitSenseConfig,
    families_path: &Path,
    out: &Path,
    batch_size: usize,
) -> Result<()> {
    let families = load_families(families_path)?;
    let corpus = build_corpus(&families);
    if corpus.is_empty() {
        println!("No traits found in {}.", families_path.display());
        return Ok(());
    }

    let total = corpus.len();
    println!(
        "Embedding {total} traits from {} families with model '{}'...",
        families.len(),
        config.embedding.model
    );

    let embedding_config = config.embedding.clone();
    let pb = ProgressBar::new(total as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("  {bar:40.cyan/blue} {pos}/{len} ({eta})")
            .expect("valid template")
            .progress_chars("##-"),
    );
    let bar = pb.clone();

    // Model load and inference are CPU-heavy.
    let (corpus, matrix) = tokio::task::spawn_blocking(move || -> Result<_> {
        let provider = embedding::create_provider(&embedding_config, &|_, _| {})
            .context("failed to create embedding provider")?;
        let matrix = embed_corpus(provider.as_ref(), &corpus, batch_size, |done, _| {
            bar.set_position(done as u64)
        })?;
        Ok((corpus, matrix))
    })
    .await??;

    pb.finish_and_clear();

    let written = write_artifacts(out, &corpus, &matrix)?;
    println!(
        "Wrote {total} traits × {} dims:\n  {}\n  {}",
        matrix.dims(),
        written.traits.display(),
        written.embeddings.display()
    );
    Ok(())
}
