use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to parse tolerance config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("{0} must not be negative")]
    NegativeTolerance(&'static str),
    #[error("FX rate for '{0}' must be positive")]
    InvalidRate(String),
}

/// Matching tolerances and the FX table, supplied once at process start and
/// read-only during a reconciliation run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToleranceConfig {
    /// Absolute quantity slack per SKU, in units.
    #[serde(default = "default_qty_tolerance")]
    pub qty_tolerance_units: Decimal,
    /// Price slack as a fraction (0.02 = 2 %), applied per SKU and to the
    /// invoice total.
    #[serde(default = "default_price_tolerance")]
    pub price_tolerance_pct: Decimal,
    /// Multiplier from currency code to the base currency. A code absent
    /// here is an unknown currency.
    #[serde(default = "default_fx_rates")]
    pub fx_rates: BTreeMap<String, Decimal>,
}

fn default_qty_tolerance() -> Decimal {
    Decimal::ONE
}

fn default_price_tolerance() -> Decimal {
    // 2 %
    Decimal::new(2, 2)
}

fn default_fx_rates() -> BTreeMap<String, Decimal> {
    [
        ("USD", Decimal::ONE),
        ("EUR", Decimal::new(108, 2)),
        ("GBP", Decimal::new(127, 2)),
        ("CAD", Decimal::new(73, 2)),
        ("AUD", Decimal::new(65, 2)),
        ("INR", Decimal::new(12, 3)),
        ("JPY", Decimal::new(67, 4)),
        ("CNY", Decimal::new(14, 2)),
    ]
    .into_iter()
    .map(|(code, rate)| (code.to_string(), rate))
    .collect()
}

impl Default for ToleranceConfig {
    fn default() -> Self {
        ToleranceConfig {
            qty_tolerance_units: default_qty_tolerance(),
            price_tolerance_pct: default_price_tolerance(),
            fx_rates: default_fx_rates(),
        }
    }
}

impl ToleranceConfig {
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: ToleranceConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.qty_tolerance_units.is_sign_negative() {
            return Err(ConfigError::NegativeTolerance("qty_tolerance_units"));
        }
        if self.price_tolerance_pct.is_sign_negative() {
            return Err(ConfigError::NegativeTolerance("price_tolerance_pct"));
        }
        for (code, rate) in &self.fx_rates {
            if rate.is_sign_negative() || rate.is_zero() {
                return Err(ConfigError::InvalidRate(code.clone()));
            }
        }
        Ok(())
    }

    /// Rate-to-base for a currency code, case-insensitive. `None` marks the
    /// currency unknown — callers must skip the comparison, not assume 1:1.
    pub fn rate(&self, code: &str) -> Option<Decimal> {
        self.fx_rates.get(code.trim().to_uppercase().as_str()).copied()
    }
}
