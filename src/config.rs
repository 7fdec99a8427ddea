//! Engine configuration

use bigdecimal::BigDecimal;
use config::{Config, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::amount::Amount;
use crate::types::{ReconciliationError, ReconciliationResult};

const ENV_PREFIX: &str = "RECONCILIATION";

/// Largest exponent whose minor units still fit the `i64` range sensibly
const MAX_CURRENCY_EXPONENT: u32 = 18;

/// How a movement's sign relates to the sign of the documents that settle it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SignConvention {
    /// Documents carry the same sign as the movement
    Same,
    /// Documents carry the opposite sign (bank-side vs book-side convention)
    Opposite,
}

impl SignConvention {
    /// Whether a movement net and a documents net are compatible.
    /// A zero on either side is always compatible.
    pub fn is_compatible(&self, movement_sign: i64, documents_sign: i64) -> bool {
        if movement_sign == 0 || documents_sign == 0 {
            return true;
        }
        match self {
            SignConvention::Same => movement_sign == documents_sign,
            SignConvention::Opposite => movement_sign != documents_sign,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub sign_convention: SignConvention,
    /// Attach an `OverMatched` warning when documents exceed the movement
    pub warn_on_over_match: bool,
    /// Upper bound on documents in a single confirm/edit request
    pub max_documents_per_match: usize,
    /// Fractional digits of the tenant currency (0 for CLP, 2 for MXN)
    pub currency_exponent: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            sign_convention: SignConvention::Same,
            warn_on_over_match: true,
            max_documents_per_match: 200,
            currency_exponent: 0,
        }
    }
}

impl EngineConfig {
    /// Load from an optional TOML file, then `RECONCILIATION_*` environment variables
    pub fn load(config_path: Option<&str>) -> ReconciliationResult<Self> {
        let mut builder = Config::builder();
        if let Some(path) = config_path {
            builder = builder.add_source(File::with_name(path).required(false));
        }
        builder = builder.add_source(Environment::with_prefix(ENV_PREFIX));
        let settings: EngineConfig = builder.build()?.try_deserialize()?;
        settings.validate()?;
        Ok(settings)
    }

    /// Parse a TOML document
    pub fn from_toml_str(contents: &str) -> ReconciliationResult<Self> {
        let settings: EngineConfig = Config::builder()
            .add_source(File::from_str(contents, FileFormat::Toml))
            .build()?
            .try_deserialize()?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> ReconciliationResult<()> {
        if self.max_documents_per_match == 0 {
            return Err(ReconciliationError::Validation(
                "max_documents_per_match must be at least 1".to_string(),
            ));
        }
        if self.currency_exponent > MAX_CURRENCY_EXPONENT {
            return Err(ReconciliationError::Validation(format!(
                "currency_exponent cannot exceed {}",
                MAX_CURRENCY_EXPONENT
            )));
        }
        Ok(())
    }

    /// Parse a statement amount written in major units ("1234.50")
    pub fn parse_amount(&self, value: &str) -> ReconciliationResult<Amount> {
        let decimal = BigDecimal::from_str(value.trim()).map_err(|_| {
            ReconciliationError::Validation(format!("'{}' is not a valid amount", value))
        })?;
        Amount::from_major_units(&decimal, self.currency_exponent)
    }

    /// Render an amount in major units with the currency's fractional digits
    pub fn format_amount(&self, amount: Amount) -> String {
        amount.to_major_units(self.currency_exponent).to_string()
    }
}
