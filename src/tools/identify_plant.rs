//! MCP `identify_plant` tool parameter definition.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Parameters for the `identify_plant` MCP tool.
#[derive(Debug, Serialize, Deserialize, JsonSchema)]
pub struct IdentifyPlantParams {
    /// Free-text description of the plant, features separated by `。；，,`.
    #[schemars(
        description = "Free-text description of the plant, e.g. '茎四棱形，叶对生，唇形花冠'. Separate features with 。；，or commas."
    )]
    pub description: String,

    /// Minimum similarity for a trait to count. Defaults to the configured identify threshold.
    #[schemars(description = "Minimum similarity (0.0-1.0) for a trait to count. Defaults to 0.3.")]
    pub threshold: Option<f32>,

    /// Maximum number of families to return.
    #[schemars(description = "Maximum number of candidate families to return. Defaults to 5.")]
    pub max_results: Option<usize>,
}
