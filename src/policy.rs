//! Threshold policy applied to ranked results.
//!
//! The ranker returns every corpus entry with its raw score; deciding what
//! counts as a match belongs here.

use std::collections::HashMap;

use serde::Serialize;

use crate::corpus::TraitCorpusEntry;
use crate::ranking::SimilarityResult;

pub const DEFAULT_IDENTIFY_THRESHOLD: f32 = 0.3;
pub const DEFAULT_JUDGE_THRESHOLD: f32 = 0.4;

/// One query segment that matched a family trait.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TraitHit {
    pub segment: String,
    #[serde(rename = "trait")]
    pub trait_text: String,
    pub score: f32,
}

/// A candidate family for a free-text description.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FamilyMatch {
    #[serde(rename = "familyId")]
    pub family_id: String,
    /// Sum of the best hit per matched segment.
    pub score: f32,
    #[serde(rename = "matchedTraits")]
    pub matched_traits: Vec<TraitHit>,
}

/// Score families from per-segment rankings.
///
/// `ranked[i]` must be the ranking of `segments[i]` against `corpus`. For each
/// segment only the best hit per family counts, and only at or above
/// `threshold`. Families come back by descending score, ties by id.
pub fn identify_families(
    segments: &[String],
    ranked: &[Vec<SimilarityResult>],
    corpus: &[TraitCorpusEntry],
    threshold: f32,
) -> Vec<FamilyMatch> {
    let mut families: HashMap<&str, FamilyMatch> = HashMap::new();

    for (segment, results) in segments.iter().zip(ranked) {
        let mut seen: Vec<&str> = Vec::new();
        // Results are sorted, so the first hit per family is its best.
        for result in results.iter().take_while(|r| r.score >= threshold) {
            let Some(entry) = corpus.get(result.corpus_index) else {
                continue;
            };
            let family = entry.family_id.as_str();
            if seen.contains(&family) {
                continue;
            }
            seen.push(family);

            let slot = families.entry(family).or_insert_with(|| FamilyMatch {
                family_id: family.to_string(),
                score: 0.0,
                matched_traits: Vec::new(),
            });
            slot.score += result.score;
            slot.matched_traits.push(TraitHit {
                segment: segment.clone(),
                trait_text: entry.r#trait.clone(),
                score: result.score,
            });
        }
    }

    let mut out: Vec<FamilyMatch> = families.into_values().collect();
    out.sort_by(|a, b| {
        b.score
            .total_cmp(&a.score)
            .then_with(|| a.family_id.cmp(&b.family_id))
    });
    out
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JudgeReason {
    Empty,
    ExactMatch,
    KeywordMatch,
    /// Latin letters and digits only; not a plausible answer.
    Rejected,
    SingleCharacter,
    SemanticMatch,
    BelowThreshold,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Verdict {
    pub correct: bool,
    pub reason: JudgeReason,
    /// Best semantic score, when the semantic check ran.
    pub score: Option<f32>,
    /// The accepted answer that decided the verdict, if any.
    pub matched: Option<String>,
}

impl Verdict {
    fn new(correct: bool, reason: JudgeReason) -> Self {
        Self {
            correct,
            reason,
            score: None,
            matched: None,
        }
    }

    fn matched(mut self, answer: &str) -> Self {
        self.matched = Some(answer.to_string());
        self
    }
}

/// The string rules of the quiz judge. `None` means the semantic check decides.
pub fn keyword_verdict(answer: &str, accepted: &[String]) -> Option<Verdict> {
    let answer = answer.trim();
    if answer.is_empty() {
        return Some(Verdict::new(false, JudgeReason::Empty));
    }
    let lowered = answer.to_lowercase();
    let candidates = accepted.iter().map(|a| a.trim()).filter(|a| !a.is_empty());

    if let Some(exact) = candidates.clone().find(|a| a.to_lowercase() == lowered) {
        return Some(Verdict::new(true, JudgeReason::ExactMatch).matched(exact));
    }
    if answer.chars().all(|c| c.is_ascii_alphanumeric()) {
        return Some(Verdict::new(false, JudgeReason::Rejected));
    }
    if answer.chars().count() == 1 {
        return Some(Verdict::new(false, JudgeReason::SingleCharacter));
    }
    candidates
        .into_iter()
        .find(|a| {
            let a = a.to_lowercase();
            a.contains(&lowered) || lowered.contains(&a)
        })
        .map(|a| Verdict::new(true, JudgeReason::KeywordMatch).matched(a))
}

/// Correct iff the best-ranked accepted answer scores at least `threshold`.
pub fn semantic_verdict(ranked: &[SimilarityResult], threshold: f32) -> Verdict {
    match ranked.first() {
        Some(best) => Verdict {
            correct: best.score >= threshold,
            reason: if best.score >= threshold {
                JudgeReason::SemanticMatch
            } else {
                JudgeReason::BelowThreshold
            },
            score: Some(best.score),
            matched: Some(best.text.clone()),
        },
        None => Verdict::new(false, JudgeReason::BelowThreshold),
    }
}

/// Full judge: string rules first, then `ranked` (the answer ranked against
/// `accepted`) against `threshold`.
pub fn judge_answer(
    answer: &str,
    accepted: &[String],
    ranked: &[SimilarityResult],
    threshold: f32,
) -> Verdict {
    keyword_verdict(answer, accepted).unwrap_or_else(|| semantic_verdict(ranked, threshold))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hit(i: usize, score: f32, text: &str) -> SimilarityResult {
        SimilarityResult {
            corpus_index: i,
            score,
            text: text.to_string(),
        }
    }

    fn strings(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn families_sum_best_hit_per_segment() {
        let corpus = vec![
            TraitCorpusEntry::new("lamiaceae", "茎四棱形"),
            TraitCorpusEntry::new("lamiaceae", "叶对生"),
            TraitCorpusEntry::new("rosaceae", "花五基数"),
        ];
        let segments = strings(&["方茎", "叶子对生"]);
        let ranked = vec![
            vec![hit(0, 0.8, "茎四棱形"), hit(1, 0.5, "叶对生"), hit(2, 0.1, "花五基数")],
            vec![hit(1, 0.7, "叶对生"), hit(2, 0.35, "花五基数"), hit(0, 0.2, "茎四棱形")],
        ];

        let families = identify_families(&segments, &ranked, &corpus, 0.3);
        assert_eq!(families.len(), 2);
        assert_eq!(families[0].family_id, "lamiaceae");
        assert!((families[0].score - 1.5).abs() < 1e-6);
        assert_eq!(families[0].matched_traits.len(), 2);
        assert_eq!(families[0].matched_traits[0].trait_text, "茎四棱形");
        assert_eq!(families[1].family_id, "rosaceae");
    }

    #[test]
    fn families_below_threshold_are_dropped() {
        let corpus = vec![TraitCorpusEntry::new("poaceae", "秆圆柱形")];
        let ranked = vec![vec![hit(0, 0.29, "秆圆柱形")]];
        assert!(identify_families(&strings(&["高大乔木"]), &ranked, &corpus, 0.3).is_empty());
    }

    #[test]
    fn family_ties_break_by_id() {
        let corpus = vec![
            TraitCorpusEntry::new("b", "x"),
            TraitCorpusEntry::new("a", "y"),
        ];
        let ranked = vec![vec![hit(0, 0.5, "x"), hit(1, 0.5, "y")]];
        let families = identify_families(&strings(&["q"]), &ranked, &corpus, 0.3);
        let ids: Vec<_> = families.iter().map(|f| f.family_id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);
    }

    #[test]
    fn keyword_rules() {
        let accepted = strings(&["唇形科", "Lamiaceae"]);

        let empty = keyword_verdict("   ", &accepted).unwrap();
        assert_eq!(empty.reason, JudgeReason::Empty);
        assert!(!empty.correct);

        let exact = keyword_verdict("lamiaceae", &accepted).unwrap();
        assert!(exact.correct);
        assert_eq!(exact.reason, JudgeReason::ExactMatch);
        assert_eq!(exact.matched.as_deref(), Some("Lamiaceae"));

        let latin = keyword_verdict("lamia", &accepted).unwrap();
        assert_eq!(latin.reason, JudgeReason::Rejected);

        let single = keyword_verdict("科", &accepted).unwrap();
        assert_eq!(single.reason, JudgeReason::SingleCharacter);
        assert!(!single.correct);

        let contained = keyword_verdict("唇形", &accepted).unwrap();
        assert!(contained.correct);
        assert_eq!(contained.reason, JudgeReason::KeywordMatch);

        let containing = keyword_verdict("是唇形科植物", &accepted).unwrap();
        assert!(containing.correct);

        assert!(keyword_verdict("薄荷一类", &accepted).is_none());
    }

    #[test]
    fn blank_accepted_answers_never_match() {
        assert!(keyword_verdict("唇形科", &strings(&["", "  "])).is_none());
    }

    #[test]
    fn semantic_threshold_is_inclusive() {
        let at = semantic_verdict(&[hit(0, 0.4, "唇形科")], 0.4);
        assert!(at.correct);
        assert_eq!(at.reason, JudgeReason::SemanticMatch);

        let below = semantic_verdict(&[hit(0, 0.39, "唇形科")], 0.4);
        assert!(!below.correct);
        assert_eq!(below.score, Some(0.39));

        assert!(!semantic_verdict(&[], 0.4).correct);
    }

    #[test]
    fn judge_prefers_keyword_rules() {
        let accepted = strings(&["唇形科"]);
        let ranked = vec![hit(0, 0.1, "唇形科")];
        assert!(judge_answer("唇形科", &accepted, &ranked, 0.4).correct);
        assert!(!judge_answer("蔷薇目", &accepted, &ranked, 0.4).correct);
    }
}
