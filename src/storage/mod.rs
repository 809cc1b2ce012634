//! Storage for configuration and cached research results.

pub mod cache;
pub mod config;
pub mod paths;

pub use cache::{CacheStats, CachedResponse, ResponseCache, fingerprint};
pub use config::{
    CacheBackendKind, CacheSettings, Config, CostSettings, ENV_CACHE_TYPE, ENV_CALL_TIMEOUT,
    ENV_CONFIG, ENV_DEFAULT_PROVIDER, LimitSettings, PricingOverride, ProviderSettings,
    RetrySettings,
};
pub use paths::AppPaths;
