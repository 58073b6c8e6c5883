/// Errors raised by text generation collaborators
#[derive(Debug, Clone, thiserror::Error)]
pub enum LLMError {
    #[error("Rate limit exceeded: {0}")]
    RateLimit(String),
    #[error("Provider unavailable: {0}")]
    ProviderUnavailable(String),
}
