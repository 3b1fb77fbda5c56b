use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Keys shared by `macros` and `explanation` in every estimation payload.
pub const NUTRIENT_KEYS: [&str; 5] = ["calories", "protein", "carbs", "fat", "water"];

/// One estimation call: a free-text description, a stored photo, or both.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EstimationRequest {
    pub description: Option<String>,
    pub image_ref: Option<String>,  // Blob store reference (file name)
}

impl EstimationRequest {
    pub fn new(description: Option<String>, image_ref: Option<String>) -> Self {
        Self {
            description,
            image_ref,
        }
    }

    /// Description with surrounding whitespace removed; blank counts as absent.
    pub fn description(&self) -> Option<&str> {
        self.description
            .as_deref()
            .map(str::trim)
            .filter(|d| !d.is_empty())
    }

    pub fn image_ref(&self) -> Option<&str> {
        self.image_ref
            .as_deref()
            .map(str::trim)
            .filter(|r| !r.is_empty())
    }

    pub fn has_input(&self) -> bool {
        self.description().is_some() || self.image_ref().is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MacroBreakdown {
    pub calories: f64,
    pub protein: f64,  // grams
    pub carbs: f64,    // grams
    pub fat: f64,      // grams
    pub water: f64,    // ml
}

/// Per-nutrient derivation text; each string should add up to the matching macro.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Explanation {
    pub calories: String,
    pub protein: String,
    pub carbs: String,
    pub fat: String,
    pub water: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EstimationResult {
    pub macros: MacroBreakdown,
    pub explanation: Explanation,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub generated_description: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AttemptOutcome {
    Success,
    RetryableFailure,
    FatalFailure,
}

impl std::fmt::Display for AttemptOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            AttemptOutcome::Success => "success",
            AttemptOutcome::RetryableFailure => "retryable-failure",
            AttemptOutcome::FatalFailure => "fatal-failure",
        };
        write!(f, "{}", s)
    }
}

/// A single provider call made while estimating. Never persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelAttempt {
    pub attempt_number: u32,
    pub outcome: AttemptOutcome,
}

/// A validated estimation together with the provider attempts it took.
#[derive(Debug, Clone, Serialize)]
pub struct Estimation {
    pub result: EstimationResult,
    pub attempts: Vec<ModelAttempt>,
}

impl Estimation {
    pub fn attempt_count(&self) -> u32 {
        self.attempts.len() as u32
    }
}

/// Snapshot of a user's monthly usage as reported by the quota store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageCounter {
    pub count: i64,
    pub is_unlimited: bool,  // Active subscription
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Meal {
    pub id: Option<i64>,
    pub user_id: String,
    pub macros: MacroBreakdown,
    pub explanation: Explanation,
    pub description: Option<String>,
    pub image_ref: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Meal {
    /// Build the record the caller persists after a successful estimation.
    /// A user-supplied description wins over the model-generated one.
    pub fn from_estimation(user_id: &str, request: &EstimationRequest, result: &EstimationResult) -> Self {
        let description = request
            .description()
            .map(str::to_string)
            .or_else(|| result.generated_description.clone());

        Meal {
            id: None,
            user_id: user_id.to_string(),
            macros: result.macros.clone(),
            explanation: result.explanation.clone(),
            description,
            image_ref: request.image_ref().map(str::to_string),
            created_at: Utc::now(),
        }
    }
}
