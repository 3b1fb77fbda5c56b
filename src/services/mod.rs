pub mod database;
pub mod estimator; // Estimation pipeline orchestrator
pub mod image;
pub mod invoker; // Retry/backoff around the model provider
pub mod openrouter; // OpenRouter AI service
pub mod parser;
pub mod prompt;
pub mod provider;
pub mod quota;

#[cfg(test)]
pub(crate) mod test_utils;

pub use database::{Database, MealStore};
pub use estimator::{EstimationError, EstimationService};
pub use image::{BlobStore, ImageFetcher, LocalBlobStore};
pub use invoker::ModelInvoker;
pub use openrouter::OpenRouterService;
pub use provider::ModelProvider;
pub use quota::{QuotaGate, QuotaStore};

/// At most `max_chars` characters of `text`, for logs and error messages.
pub fn preview(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let mut cut: String = text.chars().take(max_chars).collect();
    cut.push('…');
    cut
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_preview_is_bounded() {
        assert_eq!(preview("short", 10), "short");
        assert_eq!(preview("abcdefghij", 4), "abcd…");
    }
}
