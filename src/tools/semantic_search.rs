//! MCP `semantic_search` tool parameter definition.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Parameters for the `semantic_search` MCP tool.
///
/// Without `corpus`, the installed precomputed trait corpus is searched.
#[derive(Debug, Serialize, Deserialize, JsonSchema)]
pub struct SemanticSearchParams {
    #[schemars(description = "Query text to compare against the corpus")]
    pub query: String,

    #[schemars(
        description = "Texts to rank. Omit to search the precomputed plant trait corpus."
    )]
    pub corpus: Option<Vec<String>>,

    #[schemars(description = "Maximum number of results to return. Defaults to 5.")]
    pub max_results: Option<usize>,
}
