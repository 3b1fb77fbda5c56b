use anyhow::Result;
use std::sync::Arc;

use crate::models::UsageCounter;

/// Storage for the per-user monthly estimation counter.
#[async_trait::async_trait]
pub trait QuotaStore: Send + Sync {
    async fn get_usage(&self, user_id: &str) -> Result<UsageCounter>;
    /// Atomically add one to the user's counter for the current month.
    async fn increment(&self, user_id: &str) -> Result<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuotaDecision {
    Allowed { unlimited: bool },
    Exceeded { used: i64, limit: i64 },
}

/// Check-then-commit guard around a [`QuotaStore`].
pub struct QuotaGate {
    store: Arc<dyn QuotaStore>,
    monthly_limit: i64,
}

impl QuotaGate {
    pub fn new(store: Arc<dyn QuotaStore>, monthly_limit: i64) -> Self {
        Self {
            store,
            monthly_limit,
        }
    }

    pub async fn check_and_reserve(&self, user_id: &str) -> Result<QuotaDecision> {
        let usage = self.store.get_usage(user_id).await?;

        if usage.is_unlimited {
            log::debug!("Quota check for {}: unlimited", user_id);
            return Ok(QuotaDecision::Allowed { unlimited: true });
        }

        if usage.count >= self.monthly_limit {
            log::warn!(
                "User {} reached monthly estimation limit: {}/{}",
                user_id, usage.count, self.monthly_limit
            );
            return Ok(QuotaDecision::Exceeded {
                used: usage.count,
                limit: self.monthly_limit,
            });
        }

        log::debug!("Quota check for {}: {}/{}", user_id, usage.count, self.monthly_limit);
        Ok(QuotaDecision::Allowed { unlimited: false })
    }

    /// Record one successful estimation. Unlimited users are never counted.
    pub async fn commit(&self, user_id: &str, decision: QuotaDecision) -> Result<()> {
        match decision {
            QuotaDecision::Allowed { unlimited: true } => Ok(()),
            QuotaDecision::Allowed { unlimited: false } => self.store.increment(user_id).await,
            QuotaDecision::Exceeded { .. } => {
                anyhow::bail!("Cannot commit usage for {}: quota was exceeded", user_id)
            }
        }
    }
}
