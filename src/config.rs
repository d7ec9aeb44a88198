use anyhow::{anyhow, Result};
use log::warn;
use serde_json::Value;
use std::collections::HashMap;

/// Engine configuration shared by backtest replay and the live loop.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub initial_balance: f64,
    /// Fee charged on notional at entry and on net notional at exit.
    pub fee_rate: f64,
    /// Fraction of the available balance committed per new position.
    pub risk_per_trade: f64,
    /// Entry-price multiplier for ratio stops: long stops at `price * ratio`,
    /// short stops at `price * (2 - ratio)`.
    pub stop_loss_ratio: f64,
    /// Below this available balance no new position is opened.
    pub min_trade_balance: f64,

    // Raw parameters for strategy construction
    pub raw_parameters: HashMap<String, f64>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            initial_balance: 1000.0,
            fee_rate: 0.001,
            risk_per_trade: 0.1,
            stop_loss_ratio: 0.98,
            min_trade_balance: 10.0,
            raw_parameters: HashMap::new(),
        }
    }
}

impl EngineConfig {
    /// Create an EngineConfig from a parameter map
    pub fn from_parameters(parameters: &HashMap<String, f64>) -> Self {
        use crate::param_utils::*;

        Self {
            initial_balance: get_param(parameters, "initialBalance", 1000.0),
            fee_rate: get_param_clamped(parameters, "feeRate", 0.001, 0.0, 0.1),
            risk_per_trade: get_param_clamped(parameters, "riskPerTrade", 0.1, 0.0, 1.0),
            stop_loss_ratio: get_param_clamped(parameters, "stopLossRatio", 0.98, 0.5, 1.0),
            min_trade_balance: get_param(parameters, "minTradeBalance", 10.0),
            raw_parameters: parameters.clone(),
        }
    }
}

/// Parses a CLI-provided JSON object into the flat numeric parameter map the
/// engine and strategies consume. Non-numeric entries are skipped with a
/// warning; booleans coerce to 0/1.
pub fn parse_parameter_map_from_json(json: &str) -> Result<HashMap<String, f64>> {
    let raw: HashMap<String, Value> =
        serde_json::from_str(json).map_err(|error| anyhow!("Invalid parameter JSON: {}", error))?;

    let mut cleaned = HashMap::with_capacity(raw.len());
    for (key, value) in raw.into_iter() {
        if let Some(num) = value.as_f64() {
            if num.is_finite() {
                cleaned.insert(key, num);
            } else {
                warn!(
                    "Skipping parameter `{}` due to non-finite numeric value {}",
                    key, value
                );
            }
            continue;
        }

        if let Some(boolean) = value.as_bool() {
            cleaned.insert(key, if boolean { 1.0 } else { 0.0 });
            continue;
        }

        warn!(
            "Skipping parameter `{}` due to unsupported value {}",
            key, value
        );
    }

    Ok(cleaned)
}
