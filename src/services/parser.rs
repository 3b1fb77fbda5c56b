use serde_json::{Map, Value};
use thiserror::Error;

use crate::models::{EstimationResult, Explanation, MacroBreakdown, NUTRIENT_KEYS};

use super::preview;

/// Longest slice of raw model output carried inside an error.
const PREVIEW_CHARS: usize = 120;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    #[error("no JSON found")]
    NoJsonFound { preview: String },

    #[error("malformed JSON: {reason}")]
    MalformedJson { reason: String, preview: String },

    #[error("incomplete macros: missing or invalid {}", .fields.join(", "))]
    IncompleteMacros { fields: Vec<String> },

    #[error("incomplete explanation: missing or invalid {}", .fields.join(", "))]
    IncompleteExplanation { fields: Vec<String> },
}

/// Parse and validate a model completion into an [`EstimationResult`].
pub fn parse_estimation(raw: &str) -> Result<EstimationResult, ValidationError> {
    let json = locate_json(raw).ok_or_else(|| ValidationError::NoJsonFound {
        preview: preview(raw.trim(), PREVIEW_CHARS),
    })?;

    let payload: Map<String, Value> =
        serde_json::from_str(json).map_err(|e| ValidationError::MalformedJson {
            reason: e.to_string(),
            preview: preview(json, PREVIEW_CHARS),
        })?;

    let macros_obj = payload.get("macros").and_then(Value::as_object);
    let explanation_obj = payload.get("explanation").and_then(Value::as_object);

    let bad_macros = invalid_fields(macros_obj, |v| {
        v.as_f64().map_or(false, |n| n.is_finite() && n >= 0.0)
    });
    if !bad_macros.is_empty() {
        return Err(ValidationError::IncompleteMacros { fields: bad_macros });
    }

    let bad_explanation = invalid_fields(explanation_obj, Value::is_string);
    if !bad_explanation.is_empty() {
        return Err(ValidationError::IncompleteExplanation {
            fields: bad_explanation,
        });
    }

    // Both objects are complete past this point
    let number = |key: &str| macros_obj.and_then(|m| m.get(key)).and_then(Value::as_f64).unwrap_or_default();
    let text = |key: &str| {
        explanation_obj
            .and_then(|m| m.get(key))
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string()
    };

    let generated_description = payload
        .get("description")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|d| !d.is_empty())
        .map(str::to_string);

    Ok(EstimationResult {
        macros: MacroBreakdown {
            calories: number("calories"),
            protein: number("protein"),
            carbs: number("carbs"),
            fat: number("fat"),
            water: number("water"),
        },
        explanation: Explanation {
            calories: text("calories"),
            protein: text("protein"),
            carbs: text("carbs"),
            fat: text("fat"),
            water: text("water"),
        },
        generated_description,
    })
}

/// Nutrient keys that are absent from `object` or fail `is_valid`.
fn invalid_fields(object: Option<&Map<String, Value>>, is_valid: impl Fn(&Value) -> bool) -> Vec<String> {
    NUTRIENT_KEYS
        .iter()
        .filter(|key| !object.and_then(|o| o.get(**key)).map_or(false, &is_valid))
        .map(|key| key.to_string())
        .collect()
}

/// Find the JSON object in free text, looking inside a fenced code block
/// first.
pub fn locate_json(raw: &str) -> Option<&str> {
    if let Some(fenced) = fenced_block(raw) {
        if let Some(json) = find_object(fenced) {
            return Some(json);
        }
    }
    find_object(raw)
}

/// Body of the first ``` fenced block, without its language tag.
fn fenced_block(raw: &str) -> Option<&str> {
    let start = raw.find("```")? + 3;
    let rest = &raw[start..];
    // Skip the info string ("json") up to the end of the opening line
    let body_start = rest.find('\n').map(|i| i + 1).unwrap_or(0);
    let body = &rest[body_start..];
    let end = body.find("```").unwrap_or(body.len());
    Some(&body[..end])
}

/// First balanced `{...}` span that parses as a JSON object.
///
/// Prose such as "the format {macros, explanation}" yields balanced spans
/// that are not JSON; scanning resumes after each of them. When no span
/// parses, the first balanced one is returned so the caller can report it
/// as malformed.
fn find_object(text: &str) -> Option<&str> {
    let mut first_balanced = None;
    let mut from = 0;

    while let Some(found) = text[from..].find('{') {
        let start = from + found;
        let Some(span) = balanced_span(&text[start..]) else {
            break;
        };
        if serde_json::from_str::<Map<String, Value>>(span).is_ok() {
            return Some(span);
        }
        first_balanced.get_or_insert(span);
        from = start + span.len();
    }

    first_balanced
}

/// Balanced `{...}` prefix of `text`, ignoring braces inside string literals.
fn balanced_span(text: &str) -> Option<&str> {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, ch) in text.char_indices() {
        if in_string {
            match ch {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }

        match ch {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[..offset + 1]);
                }
            }
            _ => {}
        }
    }

    None
}
