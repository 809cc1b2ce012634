//! Turns raw provider text into a schema-checked [`PersonalityDescriptor`].
//!
//! Four stages, each attempted only if the previous one failed:
//! 1. **Parse**: strip fences, take the first `{` .. last `}` span, parse JSON.
//! 2. **Schema check**: required fields and closed sets, collecting every
//!    field error rather than stopping at the first.
//! 3. **Repair**: the heuristics in [`crate::core::repair`], then 1-2 again.
//! 4. **Partial extraction**: regex out `name`, `type` and `description` and
//!    return a low-confidence descriptor.
//!
//! Stage 4 is lossy on purpose. Its output carries a `partial-extraction`
//! source at [`PARTIAL_CONFIDENCE`] and is never cached. When every stage
//! fails the stage 1/2 error is returned unchanged.

use std::sync::LazyLock;

use chrono::{DateTime, Utc};
use regex::Regex;
use serde_json::{Map, Value};

use crate::core::descriptor::{
    CommunicationStyle, Formality, PersonalityDescriptor, PersonalityTrait, PersonalityType,
    ResearchSource, TechnicalLevel, Verbosity,
};
use crate::core::repair;
use crate::error::{PersonaError, Result};

/// Confidence attached to partially extracted descriptors.
pub const PARTIAL_CONFIDENCE: f64 = 0.3;

/// Source type marking a partial extraction.
pub const PARTIAL_SOURCE: &str = "partial-extraction";

static NAME_FIELD: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#""name"\s*:\s*"((?:[^"\\]|\\.)*)""#).unwrap());
static TYPE_FIELD: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#""type"\s*:\s*"((?:[^"\\]|\\.)*)""#).unwrap());
static DESCRIPTION_FIELD: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#""description"\s*:\s*"((?:[^"\\]|\\.)*)""#).unwrap());

/// How a descriptor was obtained.
#[derive(Debug, Clone, PartialEq)]
pub enum ValidationOutcome {
    /// Passed stages 1-2 as-is.
    Complete(PersonalityDescriptor),
    /// Passed stages 1-2 after textual repair.
    Repaired(PersonalityDescriptor),
    /// Best-effort fields only. Lower trust.
    Partial(PersonalityDescriptor),
}

impl ValidationOutcome {
    #[must_use]
    pub const fn descriptor(&self) -> &PersonalityDescriptor {
        match self {
            Self::Complete(d) | Self::Repaired(d) | Self::Partial(d) => d,
        }
    }

    #[must_use]
    pub fn into_descriptor(self) -> PersonalityDescriptor {
        match self {
            Self::Complete(d) | Self::Repaired(d) | Self::Partial(d) => d,
        }
    }

    /// Complete and repaired descriptors are full schema matches.
    #[must_use]
    pub const fn is_complete(&self) -> bool {
        !matches!(self, Self::Partial(_))
    }

    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            Self::Complete(_) => "complete",
            Self::Repaired(_) => "repaired",
            Self::Partial(_) => "partial",
        }
    }
}

// =============================================================================
// Entry points
// =============================================================================

/// Run all four stages.
///
/// # Errors
///
/// Returns the stage 1 `ParsingFailure` or stage 2 `ValidationFailure` when
/// neither repair nor partial extraction yields anything.
pub fn validate(raw: &str) -> Result<ValidationOutcome> {
    match validate_strict(raw) {
        Ok(descriptor) => Ok(ValidationOutcome::Complete(descriptor)),
        Err(original) => recover(raw).ok_or(original),
    }
}

/// Stages 1 and 2 only.
///
/// # Errors
///
/// `ParsingFailure` when no JSON object can be parsed, `ValidationFailure`
/// with every field error otherwise.
pub fn validate_strict(raw: &str) -> Result<PersonalityDescriptor> {
    let unfenced = repair::strip_code_fences(raw);
    let span = repair::json_span(&unfenced).ok_or_else(|| PersonaError::parsing(raw))?;
    let value: Value = serde_json::from_str(span).map_err(|_| PersonaError::parsing(raw))?;
    check_value(&value).map_err(|field_errors| PersonaError::validation(raw, field_errors))
}

/// Stages 3 and 4 only, for text that already failed stages 1-2.
#[must_use]
pub fn recover(raw: &str) -> Option<ValidationOutcome> {
    if let Some(value) = repair::repair_to_value(raw) {
        match check_value(&value) {
            Ok(descriptor) => return Some(ValidationOutcome::Repaired(descriptor)),
            Err(errors) => {
                tracing::debug!(errors = errors.len(), "Repaired JSON still fails schema");
            }
        }
    }
    extract_partial(raw).map(ValidationOutcome::Partial)
}

/// Stage 4: pull recognisable fields out of arbitrary text.
///
/// Requires at least a `"name"` field.
#[must_use]
pub fn extract_partial(raw: &str) -> Option<PersonalityDescriptor> {
    let capture = |re: &Regex| {
        re.captures(raw)
            .and_then(|c| c.get(1))
            .map(|m| unescape(m.as_str()))
            .filter(|s| !s.trim().is_empty())
    };

    let name = capture(&NAME_FIELD)?;
    let kind = capture(&TYPE_FIELD)
        .and_then(|t| PersonalityType::parse(&t))
        .unwrap_or(PersonalityType::Custom);
    let description = capture(&DESCRIPTION_FIELD);

    tracing::debug!(name = %name, "Using partial extraction");

    Some(PersonalityDescriptor {
        name,
        kind,
        description,
        traits: Vec::new(),
        communication_style: CommunicationStyle {
            tone: "neutral".to_string(),
            formality: Formality::Mixed,
            verbosity: Verbosity::Moderate,
            technical_level: TechnicalLevel::Intermediate,
        },
        mannerisms: Vec::new(),
        sources: vec![ResearchSource::new(PARTIAL_SOURCE, PARTIAL_CONFIDENCE)],
    })
}

fn unescape(captured: &str) -> String {
    serde_json::from_str::<String>(&format!("\"{captured}\"")).unwrap_or_else(|_| captured.to_string())
}

// =============================================================================
// Schema check
// =============================================================================

fn field<'a>(obj: &'a Map<String, Value>, keys: &[&str]) -> Option<&'a Value> {
    keys.iter().find_map(|k| obj.get(*k)).filter(|v| !v.is_null())
}

fn required_str(
    obj: &Map<String, Value>,
    keys: &[&str],
    path: &str,
    errors: &mut Vec<String>,
) -> Option<String> {
    match field(obj, keys) {
        None => {
            errors.push(format!("{path}: missing"));
            None
        }
        Some(Value::String(s)) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Some(Value::String(_)) => {
            errors.push(format!("{path}: must not be empty"));
            None
        }
        Some(_) => {
            errors.push(format!("{path}: expected a string"));
            None
        }
    }
}

fn string_list(value: Option<&Value>, path: &str, errors: &mut Vec<String>) -> Vec<String> {
    match value {
        None => Vec::new(),
        Some(Value::Array(items)) => items
            .iter()
            .enumerate()
            .filter_map(|(i, item)| match item {
                Value::String(s) => Some(s.clone()),
                _ => {
                    errors.push(format!("{path}[{i}]: expected a string"));
                    None
                }
            })
            .collect(),
        Some(_) => {
            errors.push(format!("{path}: expected an array"));
            Vec::new()
        }
    }
}

fn closed<T>(
    obj: &Map<String, Value>,
    keys: &[&str],
    path: &str,
    parse: fn(&str) -> Option<T>,
    expected: &str,
    errors: &mut Vec<String>,
) -> Option<T> {
    let raw = required_str(obj, keys, path, errors)?;
    let parsed = parse(&raw);
    if parsed.is_none() {
        errors.push(format!("{path}: \"{raw}\" is not one of {expected}"));
    }
    parsed
}

fn check_trait(index: usize, value: &Value, errors: &mut Vec<String>) -> Option<PersonalityTrait> {
    let path = format!("traits[{index}]");
    let Value::Object(obj) = value else {
        errors.push(format!("{path}: expected an object"));
        return None;
    };

    let name = required_str(obj, &["name"], &format!("{path}.name"), errors);
    let intensity = match field(obj, &["intensity"]) {
        None => {
            errors.push(format!("{path}.intensity: missing"));
            None
        }
        Some(v) => match v.as_f64() {
            Some(n) if n.fract() == 0.0 && (1.0..=10.0).contains(&n) => {
                #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
                Some(n as u8)
            }
            Some(n) => {
                errors.push(format!("{path}.intensity: must be an integer between 1 and 10 (got {n})"));
                None
            }
            None => {
                errors.push(format!("{path}.intensity: expected a number"));
                None
            }
        },
    };
    let examples = string_list(field(obj, &["examples"]), &format!("{path}.examples"), errors);

    Some(PersonalityTrait {
        name: name?,
        intensity: intensity?,
        examples,
    })
}

fn check_style(obj: &Map<String, Value>, errors: &mut Vec<String>) -> Option<CommunicationStyle> {
    let path = "communicationStyle";
    let Some(value) = field(obj, &["communicationStyle", "communication_style"]) else {
        errors.push(format!("{path}: missing"));
        return None;
    };
    let Value::Object(style) = value else {
        errors.push(format!("{path}: expected an object"));
        return None;
    };

    let tone = required_str(style, &["tone"], "communicationStyle.tone", errors);
    let formality = closed(
        style,
        &["formality"],
        "communicationStyle.formality",
        Formality::parse,
        &Formality::expected(),
        errors,
    );
    let verbosity = closed(
        style,
        &["verbosity"],
        "communicationStyle.verbosity",
        Verbosity::parse,
        &Verbosity::expected(),
        errors,
    );
    let technical_level = closed(
        style,
        &["technicalLevel", "technical_level"],
        "communicationStyle.technicalLevel",
        TechnicalLevel::parse,
        &TechnicalLevel::expected(),
        errors,
    );

    Some(CommunicationStyle {
        tone: tone?,
        formality: formality?,
        verbosity: verbosity?,
        technical_level: technical_level?,
    })
}

fn check_source(index: usize, value: &Value, errors: &mut Vec<String>) -> Option<ResearchSource> {
    let path = format!("sources[{index}]");
    let Value::Object(obj) = value else {
        errors.push(format!("{path}: expected an object"));
        return None;
    };

    let kind = required_str(obj, &["type"], &format!("{path}.type"), errors);
    let confidence = match field(obj, &["confidence"]).map(Value::as_f64) {
        None => {
            errors.push(format!("{path}.confidence: missing"));
            None
        }
        Some(Some(c)) if (0.0..=1.0).contains(&c) => Some(c),
        Some(Some(c)) => {
            errors.push(format!("{path}.confidence: must be between 0 and 1 (got {c})"));
            None
        }
        Some(None) => {
            errors.push(format!("{path}.confidence: expected a number"));
            None
        }
    };
    let timestamp = match field(obj, &["timestamp"]) {
        None => Some(Utc::now()),
        Some(Value::String(s)) => match DateTime::parse_from_rfc3339(s) {
            Ok(t) => Some(t.with_timezone(&Utc)),
            Err(_) => {
                errors.push(format!("{path}.timestamp: expected an RFC 3339 timestamp"));
                None
            }
        },
        Some(_) => {
            errors.push(format!("{path}.timestamp: expected a string"));
            None
        }
    };

    Some(ResearchSource {
        kind: kind?,
        confidence: confidence?,
        timestamp: timestamp?,
    })
}

/// Stage 2 over an already-parsed value.
///
/// # Errors
///
/// Returns every field error found.
pub fn check_value(value: &Value) -> std::result::Result<PersonalityDescriptor, Vec<String>> {
    let Value::Object(obj) = value else {
        return Err(vec!["root: expected an object".to_string()]);
    };
    let mut errors = Vec::new();

    let name = required_str(obj, &["name"], "name", &mut errors);
    let kind = closed(
        obj,
        &["type"],
        "type",
        PersonalityType::parse,
        "recognizable-person, fictional-character, archetype, custom",
        &mut errors,
    );
    let description = match field(obj, &["description"]) {
        Some(Value::String(s)) => Some(s.clone()),
        Some(_) => {
            errors.push("description: expected a string".to_string());
            None
        }
        None => None,
    };

    let traits = match field(obj, &["traits"]) {
        None => {
            errors.push("traits: missing".to_string());
            Vec::new()
        }
        Some(Value::Array(items)) => {
            if items.is_empty() {
                errors.push("traits: at least one trait is required".to_string());
            }
            items
                .iter()
                .enumerate()
                .filter_map(|(i, t)| check_trait(i, t, &mut errors))
                .collect()
        }
        Some(_) => {
            errors.push("traits: expected an array".to_string());
            Vec::new()
        }
    };

    let communication_style = check_style(obj, &mut errors);
    let mannerisms = string_list(field(obj, &["mannerisms"]), "mannerisms", &mut errors);

    let sources = match field(obj, &["sources"]) {
        None => Vec::new(),
        Some(Value::Array(items)) => items
            .iter()
            .enumerate()
            .filter_map(|(i, s)| check_source(i, s, &mut errors))
            .collect(),
        Some(_) => {
            errors.push("sources: expected an array".to_string());
            Vec::new()
        }
    };

    match (name, kind, communication_style) {
        (Some(name), Some(kind), Some(communication_style)) if errors.is_empty() => {
            Ok(PersonalityDescriptor {
                name,
                kind,
                description,
                traits,
                communication_style,
                mannerisms,
                sources,
            })
        }
        _ => Err(errors),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn valid_json() -> Value {
        json!({
            "name": "Sherlock Holmes",
            "type": "fictional-character",
            "description": "Consulting detective",
            "traits": [
                {"name": "observant", "intensity": 10, "examples": ["notices tan lines"]},
                {"name": "aloof", "intensity": 7}
            ],
            "communicationStyle": {
                "tone": "incisive",
                "formality": "formal",
                "verbosity": "moderate",
                "technicalLevel": "expert"
            },
            "mannerisms": ["steeples fingers"],
            "sources": [
                {"type": "ai-research", "confidence": 0.9, "timestamp": "2024-05-01T12:00:00Z"}
            ]
        })
    }

    #[test]
    fn strict_accepts_valid_descriptor() {
        let descriptor = validate_strict(&valid_json().to_string()).unwrap();
        assert_eq!(descriptor.name, "Sherlock Holmes");
        assert_eq!(descriptor.kind, PersonalityType::FictionalCharacter);
        assert_eq!(descriptor.traits.len(), 2);
        assert_eq!(descriptor.traits[0].examples, vec!["notices tan lines"]);
    }

    #[test]
    fn strict_strips_prose_and_fences() {
        let raw = format!(
            "Here is the profile you asked for:\n```json\n{}\n```\nLet me know!",
            valid_json()
        );
        assert!(validate_strict(&raw).is_ok());
    }

    #[test]
    fn round_trip_is_idempotent() {
        let descriptor = validate_strict(&valid_json().to_string()).unwrap();
        let text = serde_json::to_string_pretty(&descriptor).unwrap();
        let again = validate_strict(&text).unwrap();
        assert_eq!(descriptor, again);
    }

    #[test]
    fn snake_case_and_loose_enum_labels_are_accepted() {
        let raw = json!({
            "name": "Mentor",
            "type": "Archetype",
            "traits": [{"name": "patient", "intensity": 8}],
            "communication_style": {
                "tone": "warm",
                "formality": "Casual",
                "verbosity": "VERBOSE",
                "technical_level": "beginner"
            }
        });
        let descriptor = validate_strict(&raw.to_string()).unwrap();
        assert_eq!(descriptor.kind, PersonalityType::Archetype);
        assert_eq!(descriptor.communication_style.verbosity, Verbosity::Verbose);
        assert!(descriptor.sources.is_empty());
    }

    #[test]
    fn schema_errors_are_all_collected() {
        let raw = json!({
            "type": "robot",
            "traits": [{"name": "loud", "intensity": 12}],
            "communicationStyle": {"tone": "x", "formality": "formal", "verbosity": "moderate"},
            "sources": [{"type": "web", "confidence": 1.5}]
        });
        let err = validate_strict(&raw.to_string()).unwrap_err();
        let PersonaError::ValidationFailure { field_errors, .. } = err else {
            panic!("expected ValidationFailure, got {err:?}");
        };
        let joined = field_errors.join("\n");
        assert!(joined.contains("name: missing"));
        assert!(joined.contains("type: \"robot\""));
        assert!(joined.contains("traits[0].intensity"));
        assert!(joined.contains("communicationStyle.technicalLevel: missing"));
        assert!(joined.contains("sources[0].confidence"));
    }

    #[test]
    fn empty_traits_fail() {
        let mut raw = valid_json();
        raw["traits"] = json!([]);
        let err = validate_strict(&raw.to_string()).unwrap_err();
        assert!(matches!(err, PersonaError::ValidationFailure { .. }));
    }

    #[test]
    fn non_json_is_parsing_failure() {
        let err = validate_strict("not json at all").unwrap_err();
        assert!(matches!(err, PersonaError::ParsingFailure { .. }));
    }

    #[test]
    fn validate_repairs_trailing_commas() {
        let raw = valid_json().to_string();
        let broken = format!("{},}}", &raw[..raw.len() - 1]);
        let outcome = validate(&broken).unwrap();
        assert!(matches!(outcome, ValidationOutcome::Repaired(_)));
        assert!(outcome.is_complete());
    }

    #[test]
    fn validate_repairs_truncated_object() {
        let raw = valid_json().to_string();
        let truncated = &raw[..raw.len() - 1];
        let outcome = validate(truncated).unwrap();
        assert_eq!(outcome.label(), "repaired");
        assert_eq!(outcome.descriptor().name, "Sherlock Holmes");
    }

    #[test]
    fn validate_falls_back_to_partial_extraction() {
        let raw = r#"Sure! {"name": "Grumpy Cat", "type": "custom", "description": "Perpetually \"unimpressed\"", "traits": oops"#;
        let outcome = validate(raw).unwrap();
        let ValidationOutcome::Partial(descriptor) = outcome else {
            panic!("expected partial outcome");
        };
        assert_eq!(descriptor.name, "Grumpy Cat");
        assert_eq!(descriptor.kind, PersonalityType::Custom);
        assert_eq!(
            descriptor.description.as_deref(),
            Some("Perpetually \"unimpressed\"")
        );
        assert_eq!(descriptor.sources[0].kind, PARTIAL_SOURCE);
        assert!((descriptor.sources[0].confidence - PARTIAL_CONFIDENCE).abs() < f64::EPSILON);
    }

    #[test]
    fn validate_propagates_original_error() {
        let err = validate("not json at all").unwrap_err();
        assert!(matches!(err, PersonaError::ParsingFailure { .. }));

        let err = validate(r#"{"type": "robot"}"#).unwrap_err();
        let PersonaError::ValidationFailure { raw_text, field_errors } = err else {
            panic!("expected ValidationFailure");
        };
        assert_eq!(raw_text, r#"{"type": "robot"}"#);
        assert!(!field_errors.is_empty());
    }
}
