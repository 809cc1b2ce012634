//! Prompt templates for descriptor research.

use crate::core::descriptor::{Formality, PersonalityType, TechnicalLevel, Verbosity};

fn labels(values: &[&str]) -> String {
    values.join(" | ")
}

fn schema_block() -> String {
    let kinds: Vec<&str> = PersonalityType::ALL.iter().map(|t| t.as_str()).collect();
    let formality: Vec<&str> = Formality::ALL.iter().map(|v| v.as_str()).collect();
    let verbosity: Vec<&str> = Verbosity::ALL.iter().map(|v| v.as_str()).collect();
    let levels: Vec<&str> = TechnicalLevel::ALL.iter().map(|v| v.as_str()).collect();
    format!(
        r#"{{
  "name": string,
  "type": {kinds},
  "description": string,
  "traits": [{{ "name": string, "intensity": integer 1-10, "examples": [string] }}],
  "communicationStyle": {{
    "tone": string,
    "formality": {formality},
    "verbosity": {verbosity},
    "technicalLevel": {levels}
  }},
  "mannerisms": [string],
  "sources": [{{ "type": string, "confidence": number 0-1, "timestamp": RFC 3339 string }}]
}}"#,
        kinds = labels(&kinds),
        formality = labels(&formality),
        verbosity = labels(&verbosity),
        levels = labels(&levels),
    )
}

/// First-attempt prompt.
#[must_use]
pub fn research_prompt(description: &str) -> String {
    format!(
        "Research the personality described below and summarise how they think and communicate.\n\
         \n\
         Description: {description}\n\
         \n\
         Respond with a single JSON object using this shape:\n\
         {schema}\n\
         \n\
         Include at least three traits.",
        description = description.trim(),
        schema = schema_block(),
    )
}

/// Stricter prompt used once after an unrecoverable validation failure.
/// `field_errors` from the failed attempt are echoed back to the model.
#[must_use]
pub fn refined_prompt(description: &str, field_errors: &[String]) -> String {
    let mut prompt = format!(
        "Return ONLY a JSON object, with no prose and no code fences, describing this personality:\n\
         {description}\n\
         \n\
         The object must match exactly:\n\
         {schema}\n",
        description = description.trim(),
        schema = schema_block(),
    );
    if !field_errors.is_empty() {
        prompt.push_str("\nThe previous answer was rejected for these reasons:\n");
        for error in field_errors {
            prompt.push_str("- ");
            prompt.push_str(error);
            prompt.push('\n');
        }
    }
    prompt
}
