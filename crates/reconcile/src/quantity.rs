use comanda_core::{CatalogItem, Money, QuantityConfig, RawSalesLine, SalesLine};
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};

pub const RECOMPUTED_REASON: &str =
    "quantity recomputed from total because recorded quantity did not reconcile";
pub const MISSING_REASON: &str = "quantity recomputed from total because none was recorded";

/// The amounts of a line that inference reads. Always the raw, as-staged
/// values, so that inferring again yields the same answer.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LineAmounts {
    pub quantity: Option<Decimal>,
    pub unit_price: Option<Money>,
    pub line_total: Money,
}

impl From<&RawSalesLine> for LineAmounts {
    fn from(line: &RawSalesLine) -> Self {
        Self {
            quantity: line.quantity,
            unit_price: line.unit_price,
            line_total: line.line_total,
        }
    }
}

impl From<&SalesLine> for LineAmounts {
    fn from(line: &SalesLine) -> Self {
        Self {
            quantity: line.raw_quantity,
            unit_price: line.raw_unit_price,
            line_total: line.line_total,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuantityInference {
    pub quantity: Option<Decimal>,
    pub inferred: bool,
    pub reason: Option<String>,
    /// The recorded quantity, kept when `quantity` overwrote it.
    pub original_quantity: Option<Decimal>,
}

pub struct QuantityInferrer {
    pub tolerance: Decimal,
}

impl Default for QuantityInferrer {
    fn default() -> Self {
        Self::from_config(&QuantityConfig::default())
    }
}

impl QuantityInferrer {
    pub fn new(tolerance: Decimal) -> Self {
        Self { tolerance }
    }

    pub fn from_config(config: &QuantityConfig) -> Self {
        Self::new(config.tolerance)
    }

    /// Keeps a recorded quantity that reproduces the total at either the file
    /// price or the catalog price; otherwise derives one from the total.
    pub fn infer(&self, line: LineAmounts, matched: Option<&CatalogItem>) -> QuantityInference {
        let prices: Vec<Money> = line
            .unit_price
            .into_iter()
            .chain(matched.map(|item| item.price))
            .collect();

        if let Some(q) = line.quantity {
            if prices.iter().any(|p| self.reconciles(q, *p, line.line_total)) {
                return kept(line.quantity);
            }
        }

        let Some(ratio) = prices
            .into_iter()
            .filter(|p| !p.is_zero())
            .find_map(|p| line.line_total.amount().checked_div(p.amount()))
        else {
            return kept(line.quantity);
        };

        let mut derived = ratio.round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero);
        if derived.is_zero() && line.line_total.amount() > Decimal::ZERO {
            derived = Decimal::ONE;
        }

        if line.quantity == Some(derived) {
            return kept(line.quantity);
        }

        let reason = if line.quantity.is_some() {
            RECOMPUTED_REASON
        } else {
            MISSING_REASON
        };
        QuantityInference {
            quantity: Some(derived),
            inferred: true,
            reason: Some(reason.to_string()),
            original_quantity: line.quantity,
        }
    }

    /// An amount too large to represent never reconciles.
    fn reconciles(&self, quantity: Decimal, price: Money, total: Money) -> bool {
        let Some(diff) = price
            .amount()
            .checked_mul(quantity)
            .and_then(|expected| expected.checked_sub(total.amount()))
            .map(|d| d.abs())
        else {
            return false;
        };
        if total.is_zero() {
            return diff.is_zero();
        }
        self.tolerance
            .checked_mul(total.amount().abs())
            .is_some_and(|allowed| diff <= allowed)
    }
}

fn kept(quantity: Option<Decimal>) -> QuantityInference {
    QuantityInference {
        quantity,
        inferred: false,
        reason: None,
        original_quantity: None,
    }
}

/// The price actually charged: the recorded unit price, or total over quantity.
pub fn effective_unit_price(
    raw_unit_price: Option<Money>,
    line_total: Money,
    quantity: Option<Decimal>,
) -> Option<Money> {
    raw_unit_price.or_else(|| {
        quantity
            .filter(|q| !q.is_zero())
            .and_then(|q| line_total.amount().checked_div(q))
            .map(Money::from_decimal)
    })
}
