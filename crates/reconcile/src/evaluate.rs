use comanda_core::{CatalogItemId, LineMetadata, LineStatus, Money, ReconcileConfig};
use rust_decimal::Decimal;

use crate::catalog_index::CatalogIndex;
use crate::drift::DriftDetector;
use crate::match_engine::{MatchEngine, MatchTier};
use crate::quantity::{effective_unit_price, LineAmounts, QuantityInferrer};

/// Everything staging writes back onto a line.
#[derive(Debug, Clone, PartialEq)]
pub struct LineEvaluation {
    pub matched_item: Option<CatalogItemId>,
    pub confidence: Option<u8>,
    pub status: LineStatus,
    pub quantity: Option<Decimal>,
    pub unit_price: Option<Money>,
    pub metadata: LineMetadata,
}

/// Runs matching, quantity inference and drift detection for one line.
pub struct LineEvaluator {
    pub matcher: MatchEngine,
    pub quantities: QuantityInferrer,
    pub drift: DriftDetector,
}

impl Default for LineEvaluator {
    fn default() -> Self {
        Self::from_config(&ReconcileConfig::default())
    }
}

impl LineEvaluator {
    pub fn from_config(config: &ReconcileConfig) -> Self {
        Self {
            matcher: MatchEngine::from_config(&config.matching),
            quantities: QuantityInferrer::from_config(&config.quantity),
            drift: DriftDetector::from_config(&config.drift),
        }
    }

    /// Automatic pass: link the best suggestion when it clears the review threshold.
    pub fn evaluate(&self, description: &str, amounts: LineAmounts, catalog: &CatalogIndex) -> LineEvaluation {
        if description.trim().is_empty() {
            return self.unmatched(amounts, "missing description".to_string());
        }

        let Some(best) = self.matcher.best_match(description, catalog) else {
            return self.unmatched(amounts, "no catalog item resembles the description".to_string());
        };

        match self.matcher.tier(Some(best.confidence)) {
            MatchTier::Unmatched => self.unmatched(
                amounts,
                format!(
                    "best candidate '{}' scored {} below the review threshold",
                    best.display_name, best.confidence
                ),
            ),
            tier => {
                let status = if tier == MatchTier::Confident {
                    LineStatus::Matched
                } else {
                    LineStatus::NeedsReview
                };
                self.linked(amounts, catalog, best.catalog_item_id, best.confidence, status)
                    .unwrap_or_else(|| self.unmatched(amounts, "matched item vanished from catalog".to_string()))
            }
        }
    }

    /// Operator override: the chosen item is linked whatever its score.
    /// Returns `None` if the item is not in the catalog snapshot.
    pub fn evaluate_with(
        &self,
        description: &str,
        amounts: LineAmounts,
        catalog: &CatalogIndex,
        item: CatalogItemId,
    ) -> Option<LineEvaluation> {
        let confidence = self.matcher.confidence(description, catalog, item);
        self.linked(amounts, catalog, item, confidence, LineStatus::Matched)
    }

    /// An operator dropped the link.
    pub fn evaluate_cleared(&self, amounts: LineAmounts) -> LineEvaluation {
        self.unmatched(amounts, "match cleared by operator".to_string())
    }

    fn linked(
        &self,
        amounts: LineAmounts,
        catalog: &CatalogIndex,
        id: CatalogItemId,
        confidence: u8,
        status: LineStatus,
    ) -> Option<LineEvaluation> {
        let item = catalog.get(id)?;
        let inference = self.quantities.infer(amounts, Some(item));
        let unit_price = effective_unit_price(amounts.unit_price, amounts.line_total, inference.quantity);
        let drift = self.drift.detect(unit_price, item);

        Some(LineEvaluation {
            matched_item: Some(id),
            confidence: Some(confidence),
            status,
            quantity: inference.quantity,
            unit_price,
            metadata: LineMetadata {
                inferred_quantity: inference.inferred,
                inference_reason: inference.reason,
                price_mismatch: drift.mismatch,
                system_price: Some(drift.system_price),
                file_price: drift.file_price,
                original_quantity: inference.original_quantity,
                unmatched_reason: None,
            },
        })
    }

    fn unmatched(&self, amounts: LineAmounts, reason: String) -> LineEvaluation {
        let inference = self.quantities.infer(amounts, None);
        let unit_price = effective_unit_price(amounts.unit_price, amounts.line_total, inference.quantity);
        LineEvaluation {
            matched_item: None,
            confidence: Some(0),
            status: LineStatus::Unmatched,
            quantity: inference.quantity,
            unit_price,
            metadata: LineMetadata {
                inferred_quantity: inference.inferred,
                inference_reason: inference.reason,
                file_price: unit_price,
                original_quantity: inference.original_quantity,
                unmatched_reason: Some(reason),
                ..LineMetadata::default()
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use comanda_core::CatalogItem;

    fn catalog() -> CatalogIndex {
        CatalogIndex::new(vec![
            CatalogItem::new(1, "Bitoque", Money::from_cents(800)),
            CatalogItem::new(2, "Prego no Pão", Money::from_cents(650)),
        ])
    }

    fn amounts(quantity: Option<i64>, unit_cents: Option<i64>, total_cents: i64) -> LineAmounts {
        LineAmounts {
            quantity: quantity.map(Decimal::from),
            unit_price: unit_cents.map(Money::from_cents),
            line_total: Money::from_cents(total_cents),
        }
    }

    #[test]
    fn confident_match_with_inferred_quantity() {
        let eval = LineEvaluator::default().evaluate("Bitoque", amounts(None, None, 2400), &catalog());
        assert_eq!(eval.matched_item, Some(CatalogItemId(1)));
        assert_eq!(eval.confidence, Some(100));
        assert_eq!(eval.status, LineStatus::Matched);
        assert_eq!(eval.quantity, Some(Decimal::from(3)));
        assert_eq!(eval.unit_price, Some(Money::from_cents(800)));
        assert!(eval.metadata.inferred_quantity);
        assert!(!eval.metadata.price_mismatch);
        assert_eq!(eval.metadata.system_price, Some(Money::from_cents(800)));
    }

    #[test]
    fn typo_is_linked_for_review() {
        let eval = LineEvaluator::default().evaluate("bitok", amounts(Some(1), Some(800), 800), &catalog());
        assert_eq!(eval.matched_item, Some(CatalogItemId(1)));
        assert_eq!(eval.status, LineStatus::NeedsReview);
    }

    #[test]
    fn drift_recorded_on_line() {
        let eval = LineEvaluator::default().evaluate("Bitoque", amounts(Some(1), Some(950), 950), &catalog());
        assert!(eval.metadata.price_mismatch);
        assert_eq!(eval.metadata.file_price, Some(Money::from_cents(950)));
        assert_eq!(eval.metadata.system_price, Some(Money::from_cents(800)));
        assert!(!eval.metadata.inferred_quantity);
    }

    #[test]
    fn missing_description_is_unmatched_with_reason() {
        let eval = LineEvaluator::default().evaluate("   ", amounts(Some(2), Some(300), 600), &catalog());
        assert_eq!(eval.status, LineStatus::Unmatched);
        assert_eq!(eval.matched_item, None);
        assert_eq!(eval.metadata.unmatched_reason.as_deref(), Some("missing description"));
        assert_eq!(eval.quantity, Some(Decimal::from(2)));
    }

    #[test]
    fn no_overlap_is_unmatched() {
        let eval = LineEvaluator::default().evaluate("Água das Pedras", amounts(None, None, 200), &catalog());
        assert_eq!(eval.status, LineStatus::Unmatched);
        assert_eq!(eval.confidence, Some(0));
        assert!(!eval.metadata.price_mismatch);
        assert!(eval.metadata.system_price.is_none());
    }

    #[test]
    fn override_links_low_scoring_item() {
        let eval = LineEvaluator::default()
            .evaluate_with("Água das Pedras", amounts(None, None, 1300), &catalog(), CatalogItemId(2))
            .unwrap();
        assert_eq!(eval.matched_item, Some(CatalogItemId(2)));
        assert_eq!(eval.confidence, Some(0));
        assert_eq!(eval.status, LineStatus::Matched);
        assert_eq!(eval.quantity, Some(Decimal::from(2)));
    }

    #[test]
    fn override_with_unknown_item() {
        assert!(LineEvaluator::default()
            .evaluate_with("Bitoque", amounts(None, None, 800), &catalog(), CatalogItemId(99))
            .is_none());
    }

    #[test]
    fn override_replaces_previous_flags() {
        let evaluator = LineEvaluator::default();
        let line = amounts(Some(1), Some(650), 650);
        let auto = evaluator.evaluate("Bitoque", line, &catalog());
        assert!(auto.metadata.price_mismatch);
        let fixed = evaluator
            .evaluate_with("Bitoque", line, &catalog(), CatalogItemId(2))
            .unwrap();
        assert!(!fixed.metadata.price_mismatch);
        assert_eq!(fixed.metadata.system_price, Some(Money::from_cents(650)));
    }

    #[test]
    fn raising_review_threshold_unlinks_weak_matches() {
        let mut config = ReconcileConfig::default();
        config.matching.review_threshold = 70;
        let eval = LineEvaluator::from_config(&config).evaluate("bitok", amounts(None, None, 800), &catalog());
        assert_eq!(eval.status, LineStatus::Unmatched);
        assert!(eval.metadata.unmatched_reason.unwrap().contains("below the review threshold"));
    }
}
