//! Model pricing and cost estimation.
//!
//! Rates are USD per 1K tokens, keyed by `(provider, model)` with both parts
//! normalised to lowercase. Unknown pairs price at zero so that local or
//! self-hosted models never block a request.

use std::collections::HashMap;

use crate::storage::config::PricingOverride;

/// Per-1K-token pricing for one provider/model pair.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ModelRates {
    /// Cost per 1K prompt tokens (USD).
    pub input_per_1k: f64,
    /// Cost per 1K completion tokens (USD).
    pub output_per_1k: f64,
}

impl ModelRates {
    #[must_use]
    pub const fn new(input_per_1k: f64, output_per_1k: f64) -> Self {
        Self {
            input_per_1k,
            output_per_1k,
        }
    }

    /// `(prompt/1000) * input + (completion/1000) * output`.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn cost(&self, prompt_tokens: u64, completion_tokens: u64) -> f64 {
        (prompt_tokens as f64 / 1_000.0) * self.input_per_1k
            + (completion_tokens as f64 / 1_000.0) * self.output_per_1k
    }
}

/// Lookup table of model rates.
#[derive(Debug, Clone)]
pub struct PricingTable {
    rates: HashMap<(String, String), ModelRates>,
}

impl Default for PricingTable {
    fn default() -> Self {
        Self::current()
    }
}

impl PricingTable {
    /// An empty table. Everything prices at zero.
    #[must_use]
    pub fn empty() -> Self {
        Self {
            rates: HashMap::new(),
        }
    }

    /// Built-in list prices.
    ///
    /// Pricing sources:
    /// - OpenAI: https://openai.com/api/pricing
    /// - Anthropic: https://www.anthropic.com/pricing
    /// - Google: https://ai.google.dev/pricing
    #[must_use]
    pub fn current() -> Self {
        let mut table = Self::empty();

        // OpenAI
        table.add_model("openai", "gpt-4o-mini", 0.000_15, 0.000_6);
        table.add_model("openai", "gpt-4o", 0.002_5, 0.01);
        table.add_model("openai", "gpt-4-turbo", 0.01, 0.03);
        table.add_model("openai", "gpt-3.5-turbo", 0.000_5, 0.001_5);

        // Anthropic
        table.add_model("anthropic", "claude-3-5-haiku-latest", 0.000_8, 0.004);
        table.add_model("anthropic", "claude-3-5-sonnet-latest", 0.003, 0.015);
        table.add_model("anthropic", "claude-3-opus-latest", 0.015, 0.075);

        // Google
        table.add_model("gemini", "gemini-1.5-flash", 0.000_075, 0.000_3);
        table.add_model("gemini", "gemini-1.5-pro", 0.001_25, 0.005);

        table
    }

    /// Layer config overrides on top of the current table.
    #[must_use]
    pub fn with_overrides(mut self, overrides: &[PricingOverride]) -> Self {
        for entry in overrides {
            self.add_model(
                &entry.provider,
                &entry.model,
                entry.input_per_1k,
                entry.output_per_1k,
            );
        }
        self
    }

    /// Insert or replace a rate.
    pub fn add_model(&mut self, provider: &str, model: &str, input_per_1k: f64, output_per_1k: f64) {
        self.rates.insert(
            (provider.to_lowercase(), model.to_lowercase()),
            ModelRates::new(input_per_1k, output_per_1k),
        );
    }

    /// Exact lookup, case-insensitive.
    #[must_use]
    pub fn get(&self, provider: &str, model: &str) -> Option<ModelRates> {
        self.rates
            .get(&(provider.to_lowercase(), model.to_lowercase()))
            .copied()
    }

    /// First match among several provider keys (configured name, then API family).
    #[must_use]
    pub fn resolve(&self, providers: &[&str], model: &str) -> Option<ModelRates> {
        providers.iter().find_map(|p| self.get(p, model))
    }

    /// Estimated cost in USD; unknown pairs cost nothing.
    #[must_use]
    pub fn estimate(
        &self,
        providers: &[&str],
        model: &str,
        prompt_tokens: u64,
        completion_tokens: u64,
    ) -> f64 {
        self.resolve(providers, model)
            .map_or(0.0, |rates| rates.cost(prompt_tokens, completion_tokens))
    }

    /// Number of priced models.
    #[must_use]
    pub fn len(&self) -> usize {
        self.rates.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rates.is_empty()
    }
}
