use std::sync::Arc;
use std::time::Duration;

use crate::models::{AttemptOutcome, ModelAttempt};

use super::image::ImagePart;
use super::provider::{ModelProvider, ProviderError, ProviderErrorKind};

pub const MAX_ATTEMPTS: u32 = 3;
pub const BASE_BACKOFF: Duration = Duration::from_millis(1000);
/// Upper bound on a single provider call.
pub const DEFAULT_ATTEMPT_TIMEOUT: Duration = Duration::from_secs(60);

/// Delay before the attempt following attempt `n`: `2^(n-1)` seconds.
pub fn backoff_delay(attempt: u32) -> Duration {
    BASE_BACKOFF * 2u32.pow(attempt.saturating_sub(1))
}

#[derive(Debug)]
enum InvokerState {
    Attempting(u32),
    Success(String),
    FatalFailure(ProviderError),
    ExhaustedFailure(ProviderError),
}

/// Terminal state of one invocation.
#[derive(Debug)]
pub enum InvocationOutcome {
    Success(String),
    Fatal(ProviderError),
    Exhausted(ProviderError),
}

#[derive(Debug)]
pub struct Invocation {
    pub outcome: InvocationOutcome,
    pub attempts: Vec<ModelAttempt>,
    /// Backoff waits actually taken, in order.
    pub backoffs: Vec<Duration>,
}

impl Invocation {
    pub fn attempt_count(&self) -> u32 {
        self.attempts.len() as u32
    }
}

/// Calls the model provider with retry and exponential backoff.
pub struct ModelInvoker {
    provider: Arc<dyn ModelProvider>,
    max_attempts: u32,
    attempt_timeout: Duration,
}

impl ModelInvoker {
    pub fn new(provider: Arc<dyn ModelProvider>) -> Self {
        Self {
            provider,
            max_attempts: MAX_ATTEMPTS,
            attempt_timeout: DEFAULT_ATTEMPT_TIMEOUT,
        }
    }

    pub fn with_attempt_timeout(mut self, attempt_timeout: Duration) -> Self {
        self.attempt_timeout = attempt_timeout;
        self
    }

    pub async fn invoke(&self, prompt: &str, image: Option<&ImagePart>) -> Invocation {
        let mut attempts = Vec::new();
        let mut backoffs = Vec::new();
        let mut state = InvokerState::Attempting(1);

        loop {
            state = match state {
                InvokerState::Attempting(n) => {
                    log::info!("Model attempt {}/{}", n, self.max_attempts);

                    match self.attempt(prompt, image).await {
                        Ok(text) => {
                            attempts.push(ModelAttempt {
                                attempt_number: n,
                                outcome: AttemptOutcome::Success,
                            });
                            InvokerState::Success(text)
                        }
                        Err(error) if error.is_fatal() => {
                            log::error!("Model attempt {} failed fatally: {}", n, error);
                            attempts.push(ModelAttempt {
                                attempt_number: n,
                                outcome: AttemptOutcome::FatalFailure,
                            });
                            InvokerState::FatalFailure(error)
                        }
                        Err(error) => {
                            attempts.push(ModelAttempt {
                                attempt_number: n,
                                outcome: AttemptOutcome::RetryableFailure,
                            });

                            if n >= self.max_attempts {
                                log::error!("Model attempts exhausted after {}: {}", n, error);
                                InvokerState::ExhaustedFailure(error)
                            } else {
                                let delay = backoff_delay(n);
                                log::warn!(
                                    "Model attempt {} failed ({}), retrying in {} ms",
                                    n,
                                    error,
                                    delay.as_millis()
                                );
                                tokio::time::sleep(delay).await;
                                backoffs.push(delay);
                                InvokerState::Attempting(n + 1)
                            }
                        }
                    }
                }
                InvokerState::Success(text) => {
                    return Invocation {
                        outcome: InvocationOutcome::Success(text),
                        attempts,
                        backoffs,
                    }
                }
                InvokerState::FatalFailure(error) => {
                    return Invocation {
                        outcome: InvocationOutcome::Fatal(error),
                        attempts,
                        backoffs,
                    }
                }
                InvokerState::ExhaustedFailure(error) => {
                    return Invocation {
                        outcome: InvocationOutcome::Exhausted(error),
                        attempts,
                        backoffs,
                    }
                }
            };
        }
    }

    async fn attempt(&self, prompt: &str, image: Option<&ImagePart>) -> Result<String, ProviderError> {
        match tokio::time::timeout(self.attempt_timeout, self.provider.invoke(prompt, image)).await {
            Ok(result) => result,
            Err(_) => Err(ProviderError::new(
                ProviderErrorKind::Timeout,
                format!("no response within {} s", self.attempt_timeout.as_secs()),
            )),
        }
    }
}
