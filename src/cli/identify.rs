use anyhow::{Context, Result};

use traitsense::config::TraitSenseConfig;

/// Identify candidate families for a free-text description from the terminal.
pub async fn identify(
    config: &TraitSenseConfig,
    query: &str,
    threshold: Option<f32>,
) -> Result<()> {
    let matcher = super::ready_matcher(config).await?;
    let corpus = matcher
        .reference_corpus()
        .context("no trait corpus installed")?;

    let threshold = threshold.unwrap_or(config.policy.identify_threshold);
    let families = matcher.identify(query, &corpus, threshold).await?;

    if families.is_empty() {
        println!("No families matched (threshold {threshold:.2}).");
        return Ok(());
    }

    println!("Found {} candidate family(ies)\n", families.len());
    for (i, family) in families.iter().take(config.policy.max_results).enumerate() {
        println!("  {}. {} (score: {:.4})", i + 1, family.family_id, family.score);
        for hit in &family.matched_traits {
            println!("     {} ~ {} ({:.4})", hit.segment, hit.trait_text, hit.score);
        }
        println!();
    }

    Ok(())
}
