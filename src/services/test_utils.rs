//! In-memory doubles for the pipeline's collaborators.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use anyhow::Result;

use crate::models::{Meal, UsageCounter};

use super::image::{BlobStore, ImagePart};
use super::provider::{ModelProvider, ProviderError, ProviderErrorKind};
use super::quota::QuotaStore;
use super::MealStore;

/// Quota store that also counts how often `increment` was called.
#[derive(Default)]
pub(crate) struct InMemoryQuotaStore {
    usage: Mutex<HashMap<String, UsageCounter>>,
    increments: Mutex<HashMap<String, usize>>,
}

impl InMemoryQuotaStore {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn set_usage(&self, user_id: &str, count: i64, is_unlimited: bool) {
        self.usage
            .lock()
            .unwrap()
            .insert(user_id.to_string(), UsageCounter { count, is_unlimited });
    }

    pub(crate) fn usage(&self, user_id: &str) -> UsageCounter {
        self.usage
            .lock()
            .unwrap()
            .get(user_id)
            .copied()
            .unwrap_or(UsageCounter {
                count: 0,
                is_unlimited: false,
            })
    }

    pub(crate) fn increments(&self, user_id: &str) -> usize {
        self.increments.lock().unwrap().get(user_id).copied().unwrap_or(0)
    }
}

#[async_trait::async_trait]
impl QuotaStore for InMemoryQuotaStore {
    async fn get_usage(&self, user_id: &str) -> Result<UsageCounter> {
        Ok(self.usage(user_id))
    }

    async fn increment(&self, user_id: &str) -> Result<()> {
        let mut usage = self.usage.lock().unwrap();
        let counter = usage.entry(user_id.to_string()).or_insert(UsageCounter {
            count: 0,
            is_unlimited: false,
        });
        counter.count += 1;
        *self.increments.lock().unwrap().entry(user_id.to_string()).or_insert(0) += 1;
        Ok(())
    }
}

#[derive(Default)]
pub(crate) struct InMemoryBlobStore {
    blobs: Mutex<HashMap<String, Vec<u8>>>,
}

impl InMemoryBlobStore {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn insert(&self, image_ref: &str, bytes: Vec<u8>) {
        self.blobs.lock().unwrap().insert(image_ref.to_string(), bytes);
    }
}

#[async_trait::async_trait]
impl BlobStore for InMemoryBlobStore {
    async fn fetch_bytes(&self, image_ref: &str) -> Result<Vec<u8>> {
        self.blobs
            .lock()
            .unwrap()
            .get(image_ref)
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("blob not found: {}", image_ref))
    }
}

pub(crate) enum MockReply {
    Text(String),
    Error(ProviderError),
    /// Never resolves; exercises timeouts and cancellation.
    Hang,
}

/// Model provider that plays back a scripted queue of replies.
///
/// Records `(prompt, has_image)` for every call. Once the queue is empty,
/// further calls fail with a network error.
pub(crate) struct MockModelProvider {
    replies: Mutex<VecDeque<MockReply>>,
    prompts: Mutex<Vec<(String, bool)>>,
}

impl MockModelProvider {
    pub(crate) fn new(replies: Vec<MockReply>) -> Self {
        Self {
            replies: Mutex::new(VecDeque::from(replies)),
            prompts: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn prompts(&self) -> Vec<(String, bool)> {
        self.prompts.lock().unwrap().clone()
    }

    pub(crate) fn call_count(&self) -> usize {
        self.prompts.lock().unwrap().len()
    }
}

#[async_trait::async_trait]
impl ModelProvider for MockModelProvider {
    async fn invoke(&self, prompt: &str, image: Option<&ImagePart>) -> Result<String, ProviderError> {
        self.prompts
            .lock()
            .unwrap()
            .push((prompt.to_string(), image.is_some()));

        let reply = self.replies.lock().unwrap().pop_front();
        match reply {
            Some(MockReply::Text(text)) => Ok(text),
            Some(MockReply::Error(error)) => Err(error),
            Some(MockReply::Hang) => std::future::pending().await,
            None => Err(ProviderError::new(ProviderErrorKind::Network, "no more mock replies")),
        }
    }
}

#[derive(Default)]
pub(crate) struct InMemoryMealStore {
    meals: Mutex<Vec<Meal>>,
}

impl InMemoryMealStore {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn meals(&self) -> Vec<Meal> {
        self.meals.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl MealStore for InMemoryMealStore {
    async fn save_meal(&self, meal: &Meal) -> Result<i64> {
        let mut meals = self.meals.lock().unwrap();
        let id = meals.len() as i64 + 1;
        let mut stored = meal.clone();
        stored.id = Some(id);
        meals.push(stored);
        Ok(id)
    }
}

/// A complete, valid model completion wrapped in a fenced block.
pub(crate) fn valid_completion(description: Option<&str>) -> String {
    let description = description
        .map(|d| format!(",\n  \"description\": \"{}\"", d))
        .unwrap_or_default();

    format!(
        "```json\n{{\n  \"macros\": {{\"calories\": 520, \"protein\": 38, \"carbs\": 30, \"fat\": 26, \"water\": 300}},\n  \
         \"explanation\": {{\"calories\": \"chicken 280 + greens 40 + dressing 200 = 520\", \
         \"protein\": \"chicken 35 + greens 3 = 38\", \"carbs\": \"greens 12 + croutons 18 = 30\", \
         \"fat\": \"chicken 8 + dressing 18 = 26\", \"water\": \"greens 220 + chicken 80 = 300\"}}{}\n}}\n```",
        description
    )
}
