use crate::llm::types::LLMError;
use crate::task::types::Task;
use futures::future::BoxFuture;

/// Text generation collaborator used for LLM-assisted decomposition.
///
/// Implementations return the raw model output. The planner expects it to
/// contain a JSON object; anything else (including an `Err`) makes the
/// planner fall back to rule-based decomposition.
pub trait TextGenerator: Send + Sync {
    /// Generate text for `prompt` on behalf of `task`
    fn generate_text<'a>(
        &'a self,
        task: &'a Task,
        prompt: &'a str,
    ) -> BoxFuture<'a, Result<String, LLMError>>;

    /// Get provider name/identifier
    fn provider_name(&self) -> &'static str {
        "text-generator"
    }
}
