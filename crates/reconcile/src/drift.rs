use comanda_core::{CatalogItem, DriftConfig, Money};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DriftReport {
    pub mismatch: bool,
    pub system_price: Money,
    pub file_price: Option<Money>,
    /// `file - system`, signed.
    pub absolute: Option<Money>,
    /// `|file - system| / system`; `None` when the catalog price is zero.
    pub relative: Option<Decimal>,
}

pub struct DriftDetector {
    pub tolerance: Decimal,
}

impl Default for DriftDetector {
    fn default() -> Self {
        Self::from_config(&DriftConfig::default())
    }
}

impl DriftDetector {
    pub fn new(tolerance: Decimal) -> Self {
        Self { tolerance }
    }

    pub fn from_config(config: &DriftConfig) -> Self {
        Self::new(config.tolerance)
    }

    /// Compares the charged price with the matched item's current price.
    /// An unknown file price never counts as drift.
    pub fn detect(&self, file_price: Option<Money>, matched: &CatalogItem) -> DriftReport {
        let system_price = matched.price;
        let Some(file) = file_price else {
            return DriftReport {
                mismatch: false,
                system_price,
                file_price: None,
                absolute: None,
                relative: None,
            };
        };

        let absolute = file - system_price;
        let (mismatch, relative) = if system_price.is_zero() {
            (!file.is_zero(), None)
        } else {
            // A ratio too large to represent is drift by any tolerance.
            match absolute.amount().abs().checked_div(system_price.amount().abs()) {
                Some(relative) => (relative > self.tolerance, Some(relative)),
                None => (true, None),
            }
        };

        DriftReport {
            mismatch,
            system_price,
            file_price: Some(file),
            absolute: Some(absolute),
            relative,
        }
    }
}
