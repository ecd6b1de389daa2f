pub mod catalog_index;
pub mod drift;
pub mod evaluate;
pub mod match_engine;
pub mod normalize;
pub mod quantity;

pub use catalog_index::CatalogIndex;
pub use drift::{DriftDetector, DriftReport};
pub use evaluate::{LineEvaluation, LineEvaluator};
pub use match_engine::{MatchEngine, MatchReason, MatchSuggestion, MatchTier};
pub use normalize::{normalize, normalized_phrase};
pub use quantity::{effective_unit_price, LineAmounts, QuantityInference, QuantityInferrer};
