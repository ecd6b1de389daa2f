use std::cmp::Ordering;

use comanda_core::{CatalogItemId, MatchingConfig};
use serde::{Deserialize, Serialize};
use strsim::jaro_winkler;

use crate::catalog_index::{CatalogIndex, IndexedForm};
use crate::normalize::normalize;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchReason {
    /// Normalized description equals the normalized name or alias.
    Exact,
    /// One normalized phrase contains the other as a run of whole words.
    Containment,
    /// Only token overlap (possibly fuzzy) contributed.
    TokenOverlap,
}

/// A ranked candidate. Ephemeral: produced on demand, never stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchSuggestion {
    pub catalog_item_id: CatalogItemId,
    pub display_name: String,
    pub confidence: u8,
    pub reason: MatchReason,
    /// Set when the winning spelling was an alias rather than the name.
    pub matched_alias: Option<String>,
}

/// Where a confidence lands under the configured thresholds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchTier {
    Confident,
    NeedsReview,
    Unmatched,
}

pub struct MatchEngine {
    pub overlap_weight: f64,
    pub containment_weight: f64,
    pub fuzzy_token_floor: f64,
    pub confident_threshold: u8,
    pub review_threshold: u8,
}

impl Default for MatchEngine {
    fn default() -> Self {
        Self::from_config(&MatchingConfig::default())
    }
}

impl MatchEngine {
    pub fn new(overlap_weight: f64, containment_weight: f64, fuzzy_token_floor: f64) -> Self {
        let defaults = MatchingConfig::default();
        Self {
            overlap_weight,
            containment_weight,
            fuzzy_token_floor,
            confident_threshold: defaults.confident_threshold,
            review_threshold: defaults.review_threshold,
        }
    }

    pub fn from_config(config: &MatchingConfig) -> Self {
        Self {
            overlap_weight: config.overlap_weight,
            containment_weight: config.containment_weight,
            fuzzy_token_floor: config.fuzzy_token_floor,
            confident_threshold: config.confident_threshold,
            review_threshold: config.review_threshold,
        }
    }

    /// Up to `top_n` candidates with a non-zero confidence, best first.
    ///
    /// Ties go to the shorter display name, then the lower catalog id.
    pub fn suggest(
        &self,
        description: &str,
        catalog: &CatalogIndex,
        top_n: usize,
    ) -> Vec<MatchSuggestion> {
        let query = Query::new(description);
        if query.tokens.is_empty() || top_n == 0 {
            return Vec::new();
        }

        let mut scored: Vec<MatchSuggestion> = catalog
            .indexed()
            .iter()
            .filter_map(|entry| {
                entry
                    .forms
                    .iter()
                    .map(|form| (form, self.score_form(&query, form)))
                    // max_by keeps the last maximum; iterate reversed so the name wins ties.
                    .rev()
                    .max_by_key(|(_, (confidence, _))| *confidence)
                    .filter(|(_, (confidence, _))| *confidence > 0)
                    .map(|(form, (confidence, reason))| MatchSuggestion {
                        catalog_item_id: entry.item.id,
                        display_name: entry.item.name.clone(),
                        confidence,
                        reason,
                        matched_alias: form.alias.clone(),
                    })
            })
            .collect();

        scored.sort_by(rank);
        scored.truncate(top_n);
        scored
    }

    pub fn best_match(&self, description: &str, catalog: &CatalogIndex) -> Option<MatchSuggestion> {
        self.suggest(description, catalog, 1).into_iter().next()
    }

    /// Confidence of `description` against a single item, considering its aliases.
    pub fn confidence(&self, description: &str, catalog: &CatalogIndex, id: CatalogItemId) -> u8 {
        let query = Query::new(description);
        catalog
            .indexed()
            .iter()
            .find(|entry| entry.item.id == id)
            .and_then(|entry| {
                entry
                    .forms
                    .iter()
                    .map(|form| self.score_form(&query, form).0)
                    .max()
            })
            .unwrap_or(0)
    }

    pub fn tier(&self, confidence: Option<u8>) -> MatchTier {
        match confidence {
            Some(c) if c >= self.confident_threshold && c > 0 => MatchTier::Confident,
            Some(c) if c >= self.review_threshold && c > 0 => MatchTier::NeedsReview,
            _ => MatchTier::Unmatched,
        }
    }

    fn score_form(&self, query: &Query, form: &IndexedForm) -> (u8, MatchReason) {
        if query.tokens.is_empty() || form.tokens.is_empty() {
            return (0, MatchReason::TokenOverlap);
        }

        let overlap = self.token_overlap(&query.tokens, &form.tokens);
        let contained =
            contains_tokens(&form.tokens, &query.tokens) || contains_tokens(&query.tokens, &form.tokens);
        let bonus = if contained { 1.0 } else { 0.0 };

        let raw = 100.0 * (self.overlap_weight * overlap + self.containment_weight * bonus);
        let confidence = raw.round().clamp(0.0, 100.0) as u8;

        let reason = if query.phrase == form.phrase {
            MatchReason::Exact
        } else if contained {
            MatchReason::Containment
        } else {
            MatchReason::TokenOverlap
        };
        (confidence, reason)
    }

    /// Jaccard ratio over token sets where near-identical tokens count as a
    /// partial intersection. Each token pairs with at most one on the other side.
    fn token_overlap(&self, a: &[String], b: &[String]) -> f64 {
        let mut pairs: Vec<(usize, usize, f64)> = Vec::new();
        for (i, ta) in a.iter().enumerate() {
            for (j, tb) in b.iter().enumerate() {
                if ta == tb {
                    pairs.push((i, j, 1.0));
                    continue;
                }
                let sim = jaro_winkler(ta, tb);
                if sim >= self.fuzzy_token_floor {
                    pairs.push((i, j, sim));
                }
            }
        }
        pairs.sort_by(|x, y| {
            y.2.partial_cmp(&x.2)
                .unwrap_or(Ordering::Equal)
                .then(x.0.cmp(&y.0))
                .then(x.1.cmp(&y.1))
        });

        let mut used_a = vec![false; a.len()];
        let mut used_b = vec![false; b.len()];
        let (mut weight, mut paired) = (0.0, 0usize);
        for (i, j, sim) in pairs {
            if used_a[i] || used_b[j] {
                continue;
            }
            used_a[i] = true;
            used_b[j] = true;
            weight += sim;
            paired += 1;
        }

        let union = a.len() + b.len() - paired;
        if union == 0 {
            return 0.0;
        }
        weight / union as f64
    }
}

/// Whether `inner` appears in `outer` as a run of whole tokens.
fn contains_tokens(outer: &[String], inner: &[String]) -> bool {
    !inner.is_empty() && outer.windows(inner.len()).any(|run| run == inner)
}

struct Query {
    tokens: Vec<String>,
    phrase: String,
}

impl Query {
    fn new(text: &str) -> Self {
        let mut tokens = normalize(text);
        let phrase = tokens.join(" ");
        let mut seen = std::collections::HashSet::new();
        tokens.retain(|t| seen.insert(t.clone()));
        Self { tokens, phrase }
    }
}

fn rank(a: &MatchSuggestion, b: &MatchSuggestion) -> Ordering {
    b.confidence
        .cmp(&a.confidence)
        .then_with(|| {
            a.display_name
                .chars()
                .count()
                .cmp(&b.display_name.chars().count())
        })
        .then_with(|| a.catalog_item_id.cmp(&b.catalog_item_id))
}
