use std::collections::HashMap;

use tracing::debug;

use quorum_core::config::ModelPricing;
use quorum_core::types::TokenUsage;

/// Built-in per-1k-token USD rates. Keys match exactly or as a model-name prefix.
const DEFAULT_RATES: &[(&str, ModelPricing)] = &[
    ("gpt-4o", ModelPricing::new(0.0025, 0.01)),
    ("gpt-4o-mini", ModelPricing::new(0.00015, 0.0006)),
    ("gpt-4-turbo", ModelPricing::new(0.01, 0.03)),
    ("gpt-4", ModelPricing::new(0.03, 0.06)),
    ("gpt-3.5-turbo", ModelPricing::new(0.0005, 0.0015)),
    ("o1", ModelPricing::new(0.015, 0.06)),
    ("o1-mini", ModelPricing::new(0.003, 0.012)),
    ("claude-3-5-sonnet", ModelPricing::new(0.003, 0.015)),
    ("claude-3-5-haiku", ModelPricing::new(0.0008, 0.004)),
    ("claude-3-opus", ModelPricing::new(0.015, 0.075)),
    ("claude-3-sonnet", ModelPricing::new(0.003, 0.015)),
    ("claude-3-haiku", ModelPricing::new(0.00025, 0.00125)),
    ("gemini-1.5-pro", ModelPricing::new(0.00125, 0.005)),
    ("gemini-1.5-flash", ModelPricing::new(0.000075, 0.0003)),
];

/// Static pricing table keyed by model name or model-name prefix.
#[derive(Debug, Clone)]
pub struct PricingTable {
    rates: HashMap<String, ModelPricing>,
}

impl PricingTable {
    /// An empty table: every model prices at zero.
    pub fn empty() -> Self {
        Self {
            rates: HashMap::new(),
        }
    }

    /// The built-in rates merged with `overrides` (overrides win).
    pub fn with_overrides(overrides: &HashMap<String, ModelPricing>) -> Self {
        let mut table = Self::default();
        for (model, rates) in overrides {
            table.insert(model.clone(), *rates);
        }
        table
    }

    pub fn insert(&mut self, model: impl Into<String>, pricing: ModelPricing) {
        self.rates.insert(model.into(), pricing);
    }

    pub fn len(&self) -> usize {
        self.rates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rates.is_empty()
    }

    /// Resolve rates for a model: exact name first, then the longest known
    /// key that is a prefix of the model name.
    pub fn lookup(&self, model: &str) -> Option<ModelPricing> {
        if let Some(rates) = self.rates.get(model) {
            return Some(*rates);
        }
        self.rates
            .iter()
            .filter(|(key, _)| !key.is_empty() && model.starts_with(key.as_str()))
            .max_by_key(|(key, _)| key.len())
            .map(|(key, rates)| {
                debug!(model, matched = %key, "Pricing resolved by prefix");
                *rates
            })
    }

    /// Cost in USD for the given usage. Unknown models cost `0.0`.
    pub fn cost(&self, model: &str, usage: TokenUsage) -> f64 {
        match self.lookup(model) {
            Some(rates) => {
                usage.input_tokens as f64 / 1000.0 * rates.input_per_1k
                    + usage.output_tokens as f64 / 1000.0 * rates.output_per_1k
            }
            None => 0.0,
        }
    }
}

impl Default for PricingTable {
    fn default() -> Self {
        let rates = DEFAULT_RATES
            .iter()
            .map(|(model, rates)| (model.to_string(), *rates))
            .collect();
        Self { rates }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gpt_4o_cost_for_one_thousand_each() {
        let table = PricingTable::default();
        let cost = table.cost("gpt-4o", TokenUsage::new(1000, 1000));
        assert!((cost - 0.0125).abs() < 1e-12, "got {cost}");
    }

    #[test]
    fn unknown_model_costs_nothing() {
        let table = PricingTable::default();
        assert_eq!(table.lookup("mystery-model-7b"), None);
        assert_eq!(table.cost("mystery-model-7b", TokenUsage::new(5000, 5000)), 0.0);
    }

    #[test]
    fn longest_prefix_wins() {
        let table = PricingTable::default();
        // "gpt-4", "gpt-4o" and "gpt-4o-mini" are all prefixes of this name.
        let rates = table.lookup("gpt-4o-mini-2024-07-18").unwrap();
        assert_eq!(rates, ModelPricing::new(0.00015, 0.0006));

        let rates = table.lookup("gpt-4o-2024-08-06").unwrap();
        assert_eq!(rates, ModelPricing::new(0.0025, 0.01));

        let rates = table.lookup("gpt-4-0613").unwrap();
        assert_eq!(rates, ModelPricing::new(0.03, 0.06));
    }

    #[test]
    fn exact_match_beats_prefix() {
        let mut table = PricingTable::empty();
        table.insert("claude", ModelPricing::new(1.0, 1.0));
        table.insert("claude-x", ModelPricing::new(2.0, 2.0));
        assert_eq!(table.lookup("claude").unwrap().input_per_1k, 1.0);
        assert_eq!(table.lookup("claude-x-1").unwrap().input_per_1k, 2.0);
    }

    #[test]
    fn overrides_replace_defaults() {
        let mut overrides = HashMap::new();
        overrides.insert("gpt-4o".to_string(), ModelPricing::new(0.005, 0.015));
        overrides.insert("local-llama".to_string(), ModelPricing::new(0.0, 0.0));
        let table = PricingTable::with_overrides(&overrides);
        assert_eq!(table.lookup("gpt-4o").unwrap().input_per_1k, 0.005);
        assert!(table.lookup("local-llama-3").is_some());
        assert!(table.len() > overrides.len());
    }

    #[test]
    fn prompt_only_usage_ignores_output_rate() {
        let table = PricingTable::default();
        let cost = table.cost("gpt-4o", TokenUsage::new(2000, 0));
        assert!((cost - 0.005).abs() < 1e-12);
    }
}
