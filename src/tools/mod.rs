pub mod identify_plant;
pub mod judge_answer;
pub mod semantic_search;

use identify_plant::IdentifyPlantParams;
use judge_answer::JudgeAnswerParams;
use rmcp::handler::server::tool::ToolRouter;
use rmcp::handler::server::wrapper::Parameters;
use rmcp::{tool, tool_handler, tool_router, ServerHandler};
use semantic_search::SemanticSearchParams;
use std::sync::Arc;

use traitsense::config::TraitSenseConfig;
use traitsense::corpus::corpus_texts;
use traitsense::corpus::TraitCorpusEntry;
use traitsense::TraitMatcher;

/// The TraitSense MCP tool handler. Holds the shared matcher and config and
/// exposes all MCP tools via the `#[tool_router]` macro.
#[derive(Clone)]
pub struct TraitSenseTools {
    tool_router: ToolRouter<Self>,
    matcher: TraitMatcher,
    config: Arc<TraitSenseConfig>,
}

#[tool_router]
impl TraitSenseTools {
    pub fn new(matcher: TraitMatcher, config: Arc<TraitSenseConfig>) -> Self {
        Self {
            tool_router: Self::tool_router(),
            matcher,
            config,
        }
    }

    async fn reference_corpus(&self) -> Result<Arc<Vec<TraitCorpusEntry>>, String> {
        self.matcher
            .ensure_ready(None)
            .await
            .map_err(|e| format!("initialization failed: {e}"))?;
        self.matcher
            .reference_corpus()
            .ok_or_else(|| "no trait corpus installed".to_string())
    }

    /// Rank plant families for a free-text description.
    #[tool(description = "Identify candidate plant families from a free-text description of features (Chinese). Returns families ranked by summed trait similarity, with the traits that matched.")]
    async fn identify_plant(
        &self,
        Parameters(params): Parameters<IdentifyPlantParams>,
    ) -> Result<String, String> {
        if params.description.trim().is_empty() {
            return Err("description must not be empty".into());
        }
        let threshold = params
            .threshold
            .unwrap_or(self.config.policy.identify_threshold);
        if !(0.0..=1.0).contains(&threshold) {
            return Err("threshold must be between 0.0 and 1.0".into());
        }
        let max_results = params.max_results.unwrap_or(self.config.policy.max_results);

        tracing::info!(
            description_len = params.description.len(),
            threshold,
            "identify_plant called"
        );

        let corpus = self.reference_corpus().await?;
        let mut families = self
            .matcher
            .identify(&params.description, &corpus, threshold)
            .await
            .map_err(|e| format!("identify failed: {e}"))?;
        let total = families.len();
        families.truncate(max_results);

        Ok(serde_json::json!({
            "families": families,
            "total": total,
        })
        .to_string())
    }

    /// Judge a quiz answer.
    #[tool(description = "Judge a plant quiz answer against the accepted answers using keyword rules, then semantic similarity.")]
    async fn judge_answer(
        &self,
        Parameters(params): Parameters<JudgeAnswerParams>,
    ) -> Result<String, String> {
        if params.accepted.is_empty() {
            return Err("accepted must list at least one answer".into());
        }
        let threshold = params
            .threshold
            .unwrap_or(self.config.policy.judge_threshold);

        tracing::info!(
            answer_len = params.answer.len(),
            accepted = params.accepted.len(),
            "judge_answer called"
        );

        let verdict = self
            .matcher
            .judge(&params.answer, &params.accepted, threshold)
            .await
            .map_err(|e| format!("judge failed: {e}"))?;

        serde_json::to_string(&verdict).map_err(|e| format!("serialization failed: {e}"))
    }

    /// Raw similarity ranking.
    #[tool(description = "Rank a corpus of texts (default: the plant trait corpus) by semantic similarity to a query. Scores are cosine similarities; nothing is filtered.")]
    async fn semantic_search(
        &self,
        Parameters(params): Parameters<SemanticSearchParams>,
    ) -> Result<String, String> {
        let max_results = params.max_results.unwrap_or(self.config.policy.max_results);
        let corpus = match params.corpus {
            Some(corpus) => corpus,
            None => corpus_texts(&self.reference_corpus().await?),
        };

        tracing::info!(query = %params.query, corpus = corpus.len(), "semantic_search called");

        let mut results = self
            .matcher
            .search(&params.query, &corpus)
            .await
            .map_err(|e| format!("search failed: {e}"))?;
        let total = results.len();
        results.truncate(max_results);

        Ok(serde_json::json!({
            "results": results,
            "total": total,
        })
        .to_string())
    }
}

#[tool_handler]
impl ServerHandler for TraitSenseTools {
    fn get_info(&self) -> rmcp::model::ServerInfo {
        rmcp::model::ServerInfo {
            instructions: Some(
                "TraitSense matches plant descriptions against a corpus of family traits. \
                 Use identify_plant for free-text identification, judge_answer for quiz \
                 answers, and semantic_search for raw similarity ranking."
                    .into(),
            ),
            capabilities: rmcp::model::ServerCapabilities::builder()
                .enable_tools()
                .build(),
            ..Default::default()
        }
    }
}
