//! Per-model pricing table and cost calculation.
//!
//! Fetched once per process into a read-only table keyed by model id. When a
//! model is unknown, its contribution to the total cost is zero rather than
//! an error, and the caller is told which models were unpriced.

use std::collections::HashMap;

use super::events::Usage;

/// Prices are USD per million tokens.
#[derive(Debug, Clone, Copy, Default)]
pub struct ModelPrice {
    pub input: f64,
    pub cache_write_5m: f64,
    pub cache_write_1h: f64,
    pub cache_read: f64,
    pub output: f64,
}

#[derive(Debug, Clone, Default)]
pub struct PricingTable {
    prices: HashMap<String, ModelPrice>,
}

impl PricingTable {
    pub fn new(prices: HashMap<String, ModelPrice>) -> Self {
        Self { prices }
    }

    /// A small built-in table covering the model ids this engine is known
    /// to drive. Real deployments may instead fetch this from a
    /// model-metadata source; this is the fallback when that isn't wired
    /// up, not a hardcoded substitute for it.
    pub fn builtin() -> Self {
        let mut prices = HashMap::new();
        prices.insert(
            "claude-opus-4".to_string(),
            ModelPrice {
                input: 15.0,
                cache_write_5m: 18.75,
                cache_write_1h: 30.0,
                cache_read: 1.5,
                output: 75.0,
            },
        );
        prices.insert(
            "claude-sonnet-4".to_string(),
            ModelPrice {
                input: 3.0,
                cache_write_5m: 3.75,
                cache_write_1h: 6.0,
                cache_read: 0.3,
                output: 15.0,
            },
        );
        Self::new(prices)
    }

    pub fn price_for(&self, model: &str) -> Option<ModelPrice> {
        self.prices.get(model).copied()
    }
}

/// Per-model accumulated usage, keyed by model id.
#[derive(Debug, Clone, Default)]
pub struct TokenAccount {
    pub per_model: HashMap<String, AccumulatedUsage>,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct AccumulatedUsage {
    pub input: u64,
    pub cache_write_5m: u64,
    pub cache_write_1h: u64,
    pub cache_read: u64,
    pub output: u64,
    pub web_search_requests: u64,
}

impl TokenAccount {
    pub fn record(&mut self, model: &str, usage: &Usage) {
        let entry = self.per_model.entry(model.to_string()).or_default();
        entry.input += usage.input_tokens;
        let (write_5m, write_1h) = match &usage.cache_creation {
            Some(detail) => (detail.ephemeral_5m_input_tokens, detail.ephemeral_1h_input_tokens),
            None => (usage.cache_creation_5m_tokens, 0),
        };
        entry.cache_write_5m += write_5m;
        entry.cache_write_1h += write_1h;
        entry.cache_read += usage.cache_read_tokens;
        entry.output += usage.output_tokens;
        if let Some(tools) = &usage.server_tool_use {
            entry.web_search_requests += tools.web_search_requests;
        }
    }

    /// Total cost across all recorded models, plus the list of model ids
    /// that had no price and therefore contributed zero.
    pub fn cost_usd(&self, table: &PricingTable) -> (f64, Vec<String>) {
        let mut total = 0.0;
        let mut unpriced = Vec::new();
        for (model, usage) in &self.per_model {
            match table.price_for(model) {
                Some(price) => {
                    total += usage.input as f64 * price.input / 1_000_000.0;
                    total += usage.cache_write_5m as f64 * price.cache_write_5m / 1_000_000.0;
                    total += usage.cache_write_1h as f64 * price.cache_write_1h / 1_000_000.0;
                    total += usage.cache_read as f64 * price.cache_read / 1_000_000.0;
                    total += usage.output as f64 * price.output / 1_000_000.0;
                }
                None => unpriced.push(model.clone()),
            }
        }
        (total, unpriced)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::events::Usage;

    #[test]
    fn unknown_model_contributes_zero_and_is_reported() {
        let mut account = TokenAccount::default();
        account.record(
            "mystery-model",
            &Usage {
                input_tokens: 1000,
                output_tokens: 500,
                ..Default::default()
            },
        );
        let table = PricingTable::builtin();
        let (cost, unpriced) = account.cost_usd(&table);
        assert_eq!(cost, 0.0);
        assert_eq!(unpriced, vec!["mystery-model".to_string()]);
    }

    #[test]
    fn cost_sums_all_buckets_for_a_known_model() {
        let mut account = TokenAccount::default();
        account.record(
            "claude-sonnet-4",
            &Usage {
                input_tokens: 1_000_000,
                output_tokens: 1_000_000,
                cache_read_tokens: 1_000_000,
                ..Default::default()
            },
        );
        let table = PricingTable::builtin();
        let (cost, unpriced) = account.cost_usd(&table);
        assert!(unpriced.is_empty());
        assert!((cost - (3.0 + 15.0 + 0.3)).abs() < 1e-6);
    }

    #[test]
    fn cache_creation_detail_splits_5m_and_1h_buckets() {
        let mut account = TokenAccount::default();
        account.record(
            "claude-sonnet-4",
            &Usage {
                cache_creation: Some(super::super::events::CacheCreationDetail {
                    ephemeral_5m_input_tokens: 1_000_000,
                    ephemeral_1h_input_tokens: 1_000_000,
                }),
                ..Default::default()
            },
        );
        let entry = &account.per_model["claude-sonnet-4"];
        assert_eq!(entry.cache_write_5m, 1_000_000);
        assert_eq!(entry.cache_write_1h, 1_000_000);
    }
}
