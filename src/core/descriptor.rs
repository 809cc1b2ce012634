//! Personality descriptor schema.
//!
//! Serialized form uses camelCase keys and kebab-case/lowercase enum values.
//! Deserialization also accepts snake_case keys since providers mix both.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Closed set of descriptor kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PersonalityType {
    RecognizablePerson,
    FictionalCharacter,
    Archetype,
    Custom,
}

/// Lowercase, map `_` and spaces to `-`.
fn normalize_label(value: &str) -> String {
    value
        .trim()
        .to_lowercase()
        .chars()
        .map(|c| if c == '_' || c == ' ' { '-' } else { c })
        .collect()
}

impl PersonalityType {
    pub const ALL: &'static [Self] = &[
        Self::RecognizablePerson,
        Self::FictionalCharacter,
        Self::Archetype,
        Self::Custom,
    ];

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::RecognizablePerson => "recognizable-person",
            Self::FictionalCharacter => "fictional-character",
            Self::Archetype => "archetype",
            Self::Custom => "custom",
        }
    }

    /// Lenient parse: `Fictional_Character` and `fictional character` both match.
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        let label = normalize_label(value);
        Self::ALL.iter().copied().find(|t| t.as_str() == label)
    }
}

macro_rules! closed_set {
    ($(#[$meta:meta])* $name:ident { $($variant:ident => $label:literal),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(rename_all = "lowercase")]
        pub enum $name {
            $($variant),+
        }

        impl $name {
            pub const ALL: &'static [Self] = &[$(Self::$variant),+];

            #[must_use]
            pub const fn as_str(self) -> &'static str {
                match self {
                    $(Self::$variant => $label),+
                }
            }

            #[must_use]
            pub fn parse(value: &str) -> Option<Self> {
                let label = normalize_label(value);
                Self::ALL.iter().copied().find(|v| v.as_str() == label)
            }

            /// Accepted labels, comma separated, for error messages.
            #[must_use]
            pub fn expected() -> String {
                Self::ALL.iter().map(|v| v.as_str()).collect::<Vec<_>>().join(", ")
            }
        }
    };
}

closed_set!(
    /// How formal the communication is.
    Formality { Casual => "casual", Formal => "formal", Mixed => "mixed" }
);

closed_set!(
    /// How much the persona says.
    Verbosity { Concise => "concise", Moderate => "moderate", Verbose => "verbose" }
);

closed_set!(
    /// Assumed technical depth.
    TechnicalLevel { Beginner => "beginner", Intermediate => "intermediate", Expert => "expert" }
);

/// One personality trait. `intensity` is 1..=10.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersonalityTrait {
    pub name: String,
    pub intensity: u8,
    #[serde(default)]
    pub examples: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommunicationStyle {
    pub tone: String,
    pub formality: Formality,
    pub verbosity: Verbosity,
    #[serde(alias = "technical_level")]
    pub technical_level: TechnicalLevel,
}

/// Provenance of a descriptor. `confidence` is 0.0..=1.0.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResearchSource {
    #[serde(rename = "type")]
    pub kind: String,
    pub confidence: f64,
    pub timestamp: DateTime<Utc>,
}

impl ResearchSource {
    #[must_use]
    pub fn new(kind: impl Into<String>, confidence: f64) -> Self {
        Self {
            kind: kind.into(),
            confidence,
            timestamp: Utc::now(),
        }
    }
}

/// Structured personality result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersonalityDescriptor {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: PersonalityType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub traits: Vec<PersonalityTrait>,
    #[serde(alias = "communication_style")]
    pub communication_style: CommunicationStyle,
    #[serde(default)]
    pub mannerisms: Vec<String>,
    #[serde(default)]
    pub sources: Vec<ResearchSource>,
}

impl PersonalityDescriptor {
    /// Mean source confidence, if any sources are attached.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn mean_source_confidence(&self) -> Option<f64> {
        if self.sources.is_empty() {
            return None;
        }
        let sum: f64 = self.sources.iter().map(|s| s.confidence).sum();
        Some(sum / self.sources.len() as f64)
    }
}
