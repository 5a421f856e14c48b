use anyhow::Result;

use traitsense::config::TraitSenseConfig;
use traitsense::policy;

/// Judge one quiz answer. The model is only loaded when the keyword rules
/// cannot decide.
pub async fn judge(
    config: &TraitSenseConfig,
    answer: &str,
    accepted: &[String],
    threshold: Option<f32>,
) -> Result<()> {
    let threshold = threshold.unwrap_or(config.policy.judge_threshold);
    let verdict = match policy::keyword_verdict(answer, accepted) {
        Some(verdict) => verdict,
        None => {
            let matcher = super::ready_matcher(config).await?;
            matcher.judge(answer, accepted, threshold).await?
        }
    };

    let mark = if verdict.correct { "correct" } else { "incorrect" };
    print!("{mark} ({:?}", verdict.reason);
    if let Some(score) = verdict.score {
        print!(", score {score:.4}");
    }
    if let Some(matched) = &verdict.matched {
        print!(", matched '{matched}'");
    }
    println!(")");
    Ok(())
}
