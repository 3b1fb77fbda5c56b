use std::sync::Arc;
use thiserror::Error;

use crate::models::{Estimation, EstimationRequest};

use super::image::{BlobStore, FetchError, ImageFetcher};
use super::invoker::{InvocationOutcome, ModelInvoker};
use super::parser::{parse_estimation, ValidationError};
use super::prompt::build_prompt;
use super::provider::{ModelProvider, ProviderError};
use super::quota::{QuotaDecision, QuotaGate, QuotaStore};

/// Every way an estimation can fail. Nothing is committed for any of them.
#[derive(Debug, Error)]
pub enum EstimationError {
    #[error("request has neither a description nor an image")]
    RequestInvalid,

    #[error("monthly estimation limit reached ({used}/{limit})")]
    QuotaExceeded { used: i64, limit: i64 },

    #[error("image too large: {size} bytes encoded, limit {limit}")]
    PayloadTooLarge { size: usize, limit: usize },

    #[error("image fetch failed: {0}")]
    Fetch(FetchError),

    #[error("model provider rejected the request: {0}")]
    Configuration(ProviderError),

    #[error("model provider failed after {attempts} attempts: {last_error}")]
    TransientUpstream { attempts: u32, last_error: ProviderError },

    #[error("model response failed validation: {0}")]
    Validation(#[from] ValidationError),

    /// Quota store or other collaborator failure.
    #[error("internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl From<FetchError> for EstimationError {
    fn from(err: FetchError) -> Self {
        match err {
            FetchError::PayloadTooLarge { size, limit } => EstimationError::PayloadTooLarge { size, limit },
            other => EstimationError::Fetch(other),
        }
    }
}

impl EstimationError {
    /// Short machine-readable name of the failure kind.
    pub fn kind(&self) -> &'static str {
        match self {
            EstimationError::RequestInvalid => "request_invalid",
            EstimationError::QuotaExceeded { .. } => "quota_exceeded",
            EstimationError::PayloadTooLarge { .. } => "payload_too_large",
            EstimationError::Fetch(_) => "fetch_error",
            EstimationError::Configuration(_) => "configuration_error",
            EstimationError::TransientUpstream { .. } => "transient_upstream_error",
            EstimationError::Validation(_) => "validation_error",
            EstimationError::Internal(_) => "internal_error",
        }
    }

    /// Message safe to show the end user.
    pub fn user_message(&self) -> String {
        match self {
            EstimationError::RequestInvalid => {
                "Please provide a meal description or a photo.".to_string()
            }
            EstimationError::QuotaExceeded { limit, .. } => format!(
                "You have reached your limit of {} estimates this month. Upgrade for unlimited estimates.",
                limit
            ),
            EstimationError::PayloadTooLarge { .. } => {
                "The photo is too large. Please send a smaller image.".to_string()
            }
            EstimationError::Fetch(_) => {
                "We could not read the photo. Please upload it again.".to_string()
            }
            EstimationError::Configuration(_) => {
                "The estimation service is unavailable right now.".to_string()
            }
            EstimationError::TransientUpstream { .. } => {
                "The estimation service is busy. Please try again in a moment.".to_string()
            }
            EstimationError::Validation(_) => {
                "We could not estimate this meal. Please provide a clearer description or photo.".to_string()
            }
            EstimationError::Internal(_) => "Something went wrong. Please try again.".to_string(),
        }
    }
}

/// Runs the estimation pipeline against injected collaborators.
pub struct EstimationService {
    quota: QuotaGate,
    images: ImageFetcher,
    invoker: ModelInvoker,
}

impl EstimationService {
    pub fn new(
        quota_store: Arc<dyn QuotaStore>,
        blob_store: Arc<dyn BlobStore>,
        provider: Arc<dyn ModelProvider>,
        monthly_limit: i64,
    ) -> Self {
        Self::from_parts(
            QuotaGate::new(quota_store, monthly_limit),
            ImageFetcher::new(blob_store),
            ModelInvoker::new(provider),
        )
    }

    pub fn from_parts(quota: QuotaGate, images: ImageFetcher, invoker: ModelInvoker) -> Self {
        Self {
            quota,
            images,
            invoker,
        }
    }

    pub async fn estimate(
        &self,
        user_id: &str,
        request: &EstimationRequest,
    ) -> Result<Estimation, EstimationError> {
        log::info!(
            "📨 Estimate for {} | description: {} | image: {:?}",
            user_id,
            request.description().is_some(),
            request.image_ref()
        );

        let decision = self.quota.check_and_reserve(user_id).await?;
        if let QuotaDecision::Exceeded { used, limit } = decision {
            return Err(EstimationError::QuotaExceeded { used, limit });
        }

        if !request.has_input() {
            log::warn!("Rejecting empty estimation request from {}", user_id);
            return Err(EstimationError::RequestInvalid);
        }

        let image = match request.image_ref() {
            Some(image_ref) => Some(self.images.fetch(image_ref).await?),
            None => None,
        };

        let prompt = build_prompt(request.description(), image.is_some());

        let invocation = self.invoker.invoke(&prompt, image.as_ref()).await;
        let attempts = invocation.attempt_count();

        let raw = match invocation.outcome {
            InvocationOutcome::Success(raw) => raw,
            InvocationOutcome::Fatal(error) => return Err(EstimationError::Configuration(error)),
            InvocationOutcome::Exhausted(last_error) => {
                return Err(EstimationError::TransientUpstream { attempts, last_error })
            }
        };

        let result = match parse_estimation(&raw) {
            Ok(result) => result,
            Err(err) => {
                log::warn!("Model output for {} failed validation: {}", user_id, err);
                return Err(err.into());
            }
        };

        self.quota.commit(user_id, decision).await?;
        log::info!(
            "✅ Estimate for {}: {:.0} kcal after {} attempt(s)",
            user_id, result.macros.calories, attempts
        );

        Ok(Estimation {
            result,
            attempts: invocation.attempts,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::NUTRIENT_KEYS;
    use crate::services::image::MAX_ENCODED_IMAGE_BYTES;
    use crate::services::provider::ProviderErrorKind;
    use crate::services::test_utils::{
        valid_completion, InMemoryBlobStore, InMemoryQuotaStore, MockModelProvider, MockReply,
    };

    const LIMIT: i64 = 10;

    struct Harness {
        quota: Arc<InMemoryQuotaStore>,
        blobs: Arc<InMemoryBlobStore>,
        provider: Arc<MockModelProvider>,
        service: EstimationService,
    }

    fn harness(replies: Vec<MockReply>) -> Harness {
        let quota = Arc::new(InMemoryQuotaStore::new());
        let blobs = Arc::new(InMemoryBlobStore::new());
        let provider = Arc::new(MockModelProvider::new(replies));
        let service = EstimationService::new(quota.clone(), blobs.clone(), provider.clone(), LIMIT);
        Harness {
            quota,
            blobs,
            provider,
            service,
        }
    }

    fn transient() -> MockReply {
        MockReply::Error(ProviderError::new(ProviderErrorKind::Upstream, "502 bad gateway"))
    }

    fn text_request(description: &str) -> EstimationRequest {
        EstimationRequest::new(Some(description.to_string()), None)
    }

    #[tokio::test(start_paused = true)]
    async fn test_description_only_success() {
        let h = harness(vec![MockReply::Text(valid_completion(None))]);

        let estimation = h
            .service
            .estimate("alice", &text_request("grilled chicken salad"))
            .await
            .unwrap();

        let json = serde_json::to_value(&estimation.result).unwrap();
        for key in NUTRIENT_KEYS {
            assert!(json["macros"][key].is_number());
            assert!(json["explanation"][key].is_string());
        }
        assert_eq!(json["macros"].as_object().unwrap().len(), 5);
        assert_eq!(json["explanation"].as_object().unwrap().len(), 5);
        assert_eq!(estimation.attempt_count(), 1);
        assert_eq!(h.quota.increments("alice"), 1);

        let prompts = h.provider.prompts();
        assert_eq!(prompts.len(), 1);
        assert!(prompts[0].0.contains("grilled chicken salad"));
        assert!(!prompts[0].1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_image_only_recovers_after_transient_failures() {
        let h = harness(vec![
            transient(),
            transient(),
            MockReply::Text(valid_completion(Some("Bowl of oatmeal with berries"))),
        ]);
        h.blobs.insert("breakfast.jpg", vec![1, 2, 3, 4]);

        let request = EstimationRequest::new(None, Some("breakfast.jpg".to_string()));
        let estimation = h.service.estimate("bob", &request).await.unwrap();

        assert_eq!(estimation.attempt_count(), 3);
        assert_eq!(
            estimation.result.generated_description.as_deref(),
            Some("Bowl of oatmeal with berries")
        );
        assert_eq!(h.quota.increments("bob"), 1);
        assert!(h.provider.prompts().iter().all(|(_, has_image)| *has_image));
    }

    #[tokio::test(start_paused = true)]
    async fn test_prose_response_is_validation_error() {
        let h = harness(vec![MockReply::Text(
            "This looks like a healthy meal of roughly 500 calories.".to_string(),
        )]);

        let err = h
            .service
            .estimate("carol", &text_request("pasta"))
            .await
            .unwrap_err();

        assert!(matches!(err, EstimationError::Validation(ValidationError::NoJsonFound { .. })));
        assert_eq!(h.quota.increments("carol"), 0);
        assert_eq!(h.provider.call_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_quota_exceeded_skips_provider() {
        let h = harness(vec![MockReply::Text(valid_completion(None))]);
        h.quota.set_usage("dave", LIMIT, false);

        let err = h.service.estimate("dave", &text_request("burger")).await.unwrap_err();

        assert!(matches!(err, EstimationError::QuotaExceeded { used: LIMIT, limit: LIMIT }));
        assert_eq!(h.provider.call_count(), 0);
        assert_eq!(h.quota.increments("dave"), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unlimited_user_over_limit_succeeds_without_increment() {
        let h = harness(vec![MockReply::Text(valid_completion(None))]);
        h.quota.set_usage("erin", LIMIT * 5, true);

        h.service.estimate("erin", &text_request("burger")).await.unwrap();
        assert_eq!(h.quota.increments("erin"), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_water_names_macros() {
        let completion = valid_completion(None).replace(", \"water\": 300", "");
        let h = harness(vec![MockReply::Text(completion)]);

        let err = h.service.estimate("frank", &text_request("rice")).await.unwrap_err();

        match err {
            EstimationError::Validation(ValidationError::IncompleteMacros { fields }) => {
                assert_eq!(fields, vec!["water".to_string()])
            }
            other => panic!("expected IncompleteMacros, got {:?}", other),
        }
        assert_eq!(h.quota.increments("frank"), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_request_is_rejected_before_provider() {
        let h = harness(vec![MockReply::Text(valid_completion(None))]);

        let err = h
            .service
            .estimate("gina", &EstimationRequest::new(Some("  ".to_string()), None))
            .await
            .unwrap_err();

        assert!(matches!(err, EstimationError::RequestInvalid));
        assert_eq!(h.provider.call_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_oversized_image_rejected_before_provider() {
        let h = harness(vec![MockReply::Text(valid_completion(None))]);
        // 16 MiB raw encodes to just over 21 MiB
        h.blobs.insert("huge.png", vec![0u8; 16 * 1024 * 1024]);

        let request = EstimationRequest::new(Some("pizza".to_string()), Some("huge.png".to_string()));
        let err = h.service.estimate("hank", &request).await.unwrap_err();

        match err {
            EstimationError::PayloadTooLarge { size, limit } => {
                assert!(size > MAX_ENCODED_IMAGE_BYTES);
                assert_eq!(limit, MAX_ENCODED_IMAGE_BYTES);
            }
            other => panic!("expected PayloadTooLarge, got {:?}", other),
        }
        assert_eq!(h.provider.call_count(), 0);
        assert_eq!(h.quota.increments("hank"), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_image_is_fetch_error() {
        let h = harness(vec![MockReply::Text(valid_completion(None))]);

        let request = EstimationRequest::new(None, Some("gone.jpg".to_string()));
        let err = h.service.estimate("ivy", &request).await.unwrap_err();

        assert!(matches!(err, EstimationError::Fetch(FetchError::Unavailable { .. })));
        assert_eq!(err.kind(), "fetch_error");
        assert_eq!(h.provider.call_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fatal_provider_error_is_not_retried() {
        let h = harness(vec![
            MockReply::Error(ProviderError::new(ProviderErrorKind::UpstreamQuota, "credits exhausted")),
            MockReply::Text(valid_completion(None)),
        ]);

        let err = h.service.estimate("jack", &text_request("soup")).await.unwrap_err();

        assert!(matches!(err, EstimationError::Configuration(_)));
        assert_eq!(h.provider.call_count(), 1);
        assert_eq!(h.quota.increments("jack"), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_retries_carry_attempt_count() {
        let h = harness(vec![transient(), transient(), transient()]);

        let err = h.service.estimate("kim", &text_request("soup")).await.unwrap_err();

        match err {
            EstimationError::TransientUpstream { attempts, ref last_error } => {
                assert_eq!(attempts, 3);
                assert_eq!(last_error.kind, ProviderErrorKind::Upstream);
            }
            ref other => panic!("expected TransientUpstream, got {:?}", other),
        }
        assert!(err.user_message().contains("try again"));
        assert_eq!(h.provider.call_count(), 3);
        assert_eq!(h.quota.increments("kim"), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_repeated_success_commits_once_per_call() {
        let h = harness(vec![
            transient(),
            MockReply::Text(valid_completion(None)),
            MockReply::Text(valid_completion(None)),
        ]);

        h.service.estimate("lee", &text_request("toast")).await.unwrap();
        h.service.estimate("lee", &text_request("toast")).await.unwrap();

        assert_eq!(h.quota.increments("lee"), 2);
        assert_eq!(h.provider.call_count(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_estimate_commits_nothing() {
        let h = harness(vec![MockReply::Hang]);

        let result = tokio::time::timeout(
            std::time::Duration::from_secs(1),
            h.service.estimate("mia", &text_request("stew")),
        )
        .await;

        assert!(result.is_err());
        assert_eq!(h.quota.increments("mia"), 0);
    }

    #[test]
    fn test_user_messages_are_distinct() {
        let errors = vec![
            EstimationError::RequestInvalid,
            EstimationError::QuotaExceeded { used: 10, limit: 10 },
            EstimationError::PayloadTooLarge { size: 2, limit: 1 },
            EstimationError::Fetch(FetchError::Empty("a.jpg".to_string())),
            EstimationError::Configuration(ProviderError::new(ProviderErrorKind::Authentication, "x")),
            EstimationError::TransientUpstream {
                attempts: 3,
                last_error: ProviderError::new(ProviderErrorKind::Network, "x"),
            },
            EstimationError::Validation(ValidationError::NoJsonFound { preview: String::new() }),
        ];

        let messages: std::collections::HashSet<String> =
            errors.iter().map(|e| e.user_message()).collect();
        assert_eq!(messages.len(), errors.len());
        assert!(errors[1].user_message().contains("limit"));
        assert!(errors[6].user_message().contains("clearer description"));
    }
}
