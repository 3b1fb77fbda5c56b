use std::sync::Arc;

use crate::models::{Estimation, EstimationRequest, EstimationResult, Meal};
use crate::services::{EstimationError, EstimationService, MealStore};

#[derive(Debug)]
pub struct SavedEstimate {
    pub meal_id: i64,
    pub estimation: Estimation,
}

/// Caller side of the pipeline: estimate, then persist only on success.
pub struct EstimateHandler {
    estimator: Arc<EstimationService>,
    meals: Arc<dyn MealStore>,
}

impl EstimateHandler {
    pub fn new(estimator: Arc<EstimationService>, meals: Arc<dyn MealStore>) -> Self {
        Self { estimator, meals }
    }

    pub async fn handle(
        &self,
        user_id: &str,
        request: &EstimationRequest,
    ) -> Result<SavedEstimate, EstimationError> {
        let estimation = match self.estimator.estimate(user_id, request).await {
            Ok(estimation) => estimation,
            Err(e) => {
                log::warn!("❌ Estimate for {} failed ({}): {}", user_id, e.kind(), e);
                return Err(e);
            }
        };

        let meal = Meal::from_estimation(user_id, request, &estimation.result);
        let meal_id = self.meals.save_meal(&meal).await?;
        log::info!("💾 Saved meal {} for {}", meal_id, user_id);

        Ok(SavedEstimate { meal_id, estimation })
    }
}

/// Plain-text summary of an estimate, for chat replies.
pub fn format_estimate_summary(result: &EstimationResult) -> String {
    let mut summary = String::new();

    if let Some(description) = &result.generated_description {
        summary.push_str(&format!("🍽️ {}\n\n", description));
    }

    summary.push_str(&format!(
        "🔥 Calories: {:.0} kcal\n\
         🥩 Protein: {:.1} g\n\
         🍞 Carbs: {:.1} g\n\
         🧈 Fat: {:.1} g\n\
         💧 Water: {:.0} ml",
        result.macros.calories,
        result.macros.protein,
        result.macros.carbs,
        result.macros.fat,
        result.macros.water,
    ));

    summary.push_str(&format!("\n\nHow we got there:\n• {}", result.explanation.calories));
    summary
}
