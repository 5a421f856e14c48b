use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize, Deserialize, JsonSchema)]
pub struct JudgeAnswerParams {
    #[schemars(description = "The learner's answer")]
    pub answer: String,

    #[schemars(description = "Accepted answers for the question")]
    pub accepted: Vec<String>,

    #[schemars(description = "Minimum semantic similarity (0.0-1.0) to accept. Defaults to 0.4.")]
    pub threshold: Option<f32>,
}
