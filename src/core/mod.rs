//! Provider orchestration, validation, recovery and cost accounting.

pub mod cost;
pub mod descriptor;
pub mod health;
pub mod http;
pub mod logging;
pub mod manager;
pub mod pricing;
pub mod prompt;
pub mod provider;
pub mod recovery;
pub mod repair;
pub mod research;
pub mod retry;
pub mod tasks;
pub mod validation;

pub use cost::{
    CostSummary, CostThresholds, CostTracker, CostWindow, ThresholdEntry, ThresholdReport,
    TokenUsageRecord,
};
pub use descriptor::{
    CommunicationStyle, Formality, PersonalityDescriptor, PersonalityTrait, PersonalityType,
    ResearchSource, TechnicalLevel, Verbosity,
};
pub use health::{HealthState, HealthTracker, ProviderHealth};
pub use manager::{Invocation, ManagerFailure, ProviderManager};
pub use pricing::PricingTable;
pub use provider::{ProviderDescriptor, ProviderKind, ProviderRegistry, RateLimits, Secret};
pub use recovery::{ErrorRecoveryOrchestrator, RecoveryAction, RecoveryContext, RecoveryPlan};
pub use research::{
    FallbackResearch, ProfileOrigin, ReportedError, ResearchOrchestrator, ResearchResult,
    ResearchStatus, ResearchedProfile,
};
pub use retry::RetryPolicy;
pub use tasks::BackgroundTasks;
pub use validation::ValidationOutcome;
