use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;

use super::catalog::CatalogItemId;
use super::error::ReconcileError;
use super::money::Money;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ImportId(pub i64);

impl fmt::Display for ImportId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct LineId(pub i64);

impl fmt::Display for LineId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle of a staged batch.
///
/// `pending -> reviewing -> {approved | approved_partial | rejected | error}`,
/// plus `pending -> {rejected | error}`. Nothing leaves a terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImportStatus {
    Pending,
    Reviewing,
    Approved,
    ApprovedPartial,
    Rejected,
    Error,
}

impl ImportStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            ImportStatus::Pending => "pending",
            ImportStatus::Reviewing => "reviewing",
            ImportStatus::Approved => "approved",
            ImportStatus::ApprovedPartial => "approved_partial",
            ImportStatus::Rejected => "rejected",
            ImportStatus::Error => "error",
        }
    }

    pub fn can_transition_to(self, next: ImportStatus) -> bool {
        use ImportStatus::*;
        matches!(
            (self, next),
            (Pending, Reviewing)
                | (Pending, Rejected)
                | (Pending, Error)
                | (Reviewing, Approved)
                | (Reviewing, ApprovedPartial)
                | (Reviewing, Rejected)
                | (Reviewing, Error)
        )
    }
}

impl fmt::Display for ImportStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ImportStatus {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(ImportStatus::Pending),
            "reviewing" => Ok(ImportStatus::Reviewing),
            "approved" => Ok(ImportStatus::Approved),
            "approved_partial" => Ok(ImportStatus::ApprovedPartial),
            "rejected" => Ok(ImportStatus::Rejected),
            "error" => Ok(ImportStatus::Error),
            other => Err(format!("Unknown import status: '{other}'")),
        }
    }
}

/// Per-line state, derived from the match while reviewing and frozen at approval.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LineStatus {
    Matched,
    NeedsReview,
    Unmatched,
    Approved,
    Skipped,
}

impl LineStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            LineStatus::Matched => "matched",
            LineStatus::NeedsReview => "needs_review",
            LineStatus::Unmatched => "unmatched",
            LineStatus::Approved => "approved",
            LineStatus::Skipped => "skipped",
        }
    }
}

impl fmt::Display for LineStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for LineStatus {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "matched" => Ok(LineStatus::Matched),
            "needs_review" => Ok(LineStatus::NeedsReview),
            "unmatched" => Ok(LineStatus::Unmatched),
            "approved" => Ok(LineStatus::Approved),
            "skipped" => Ok(LineStatus::Skipped),
            other => Err(format!("Unknown line status: '{other}'")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaxLine {
    pub rate: Decimal,
    pub base: Money,
    pub amount: Money,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentSplit {
    pub method: String,
    pub amount: Money,
}

/// Aggregate figures printed on the export, as declared by the source system.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeclaredTotals {
    pub gross: Option<Money>,
    pub net: Option<Money>,
    #[serde(default)]
    pub taxes: Vec<TaxLine>,
    #[serde(default)]
    pub payments: Vec<PaymentSplit>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImportHeader {
    pub source_filename: String,
    pub sale_date: NaiveDate,
    #[serde(default)]
    pub totals: DeclaredTotals,
}

/// Largest quantity a staged line may carry.
pub const MAX_LINE_QUANTITY: Decimal = Decimal::from_parts(1_000_000, 0, 0, false, 0);
/// Largest line total or unit price a staged line may carry: one billion.
pub const MAX_LINE_AMOUNT: Decimal = Decimal::from_parts(1_000_000_000, 0, 0, false, 0);

/// One row as handed over by the file-ingestion component.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawSalesLine {
    pub line_number: u32,
    #[serde(default)]
    pub description: String,
    pub quantity: Option<Decimal>,
    pub unit_price: Option<Money>,
    pub line_total: Money,
}

impl RawSalesLine {
    /// Rejects batches that can never be staged. Amounts must be non-negative
    /// and within [`MAX_LINE_AMOUNT`], quantities within [`MAX_LINE_QUANTITY`],
    /// and line numbers unique.
    pub fn validate_batch(lines: &[RawSalesLine]) -> Result<(), ReconcileError> {
        let mut seen = HashSet::new();
        for line in lines {
            if !seen.insert(line.line_number) {
                return Err(ReconcileError::Validation(format!(
                    "duplicate line number {}",
                    line.line_number
                )));
            }
            if line.line_total.is_negative() {
                return Err(ReconcileError::Validation(format!(
                    "line {}: negative line total {}",
                    line.line_number, line.line_total
                )));
            }
            if line.unit_price.is_some_and(Money::is_negative) {
                return Err(ReconcileError::Validation(format!(
                    "line {}: negative unit price",
                    line.line_number
                )));
            }
            if line.quantity.is_some_and(|q| q.is_sign_negative() && !q.is_zero()) {
                return Err(ReconcileError::Validation(format!(
                    "line {}: negative quantity",
                    line.line_number
                )));
            }
            if line.line_total.amount() > MAX_LINE_AMOUNT
                || line.unit_price.is_some_and(|p| p.amount() > MAX_LINE_AMOUNT)
            {
                return Err(ReconcileError::Validation(format!(
                    "line {}: amount exceeds {}",
                    line.line_number, MAX_LINE_AMOUNT
                )));
            }
            if line.quantity.is_some_and(|q| q > MAX_LINE_QUANTITY) {
                return Err(ReconcileError::Validation(format!(
                    "line {}: quantity exceeds {}",
                    line.line_number, MAX_LINE_QUANTITY
                )));
            }
        }
        Ok(())
    }
}

/// Audit flags written by quantity inference and drift detection.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LineMetadata {
    pub inferred_quantity: bool,
    pub inference_reason: Option<String>,
    pub price_mismatch: bool,
    pub system_price: Option<Money>,
    pub file_price: Option<Money>,
    pub original_quantity: Option<Decimal>,
    pub unmatched_reason: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SalesLine {
    pub id: LineId,
    pub import_id: ImportId,
    pub line_number: u32,
    pub description: String,
    pub raw_quantity: Option<Decimal>,
    pub raw_unit_price: Option<Money>,
    /// Authoritative and immutable once staged.
    pub line_total: Money,
    /// Effective quantity after inference.
    pub quantity: Option<Decimal>,
    /// Effective unit price (the file price).
    pub unit_price: Option<Money>,
    pub matched_item: Option<CatalogItemId>,
    pub confidence: Option<u8>,
    pub status: LineStatus,
    pub manual_override: bool,
    pub metadata: LineMetadata,
}

impl SalesLine {
    pub fn is_linked(&self) -> bool {
        self.matched_item.is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SalesImport {
    pub id: ImportId,
    pub source_filename: String,
    pub sale_date: NaiveDate,
    pub totals: DeclaredTotals,
    pub status: ImportStatus,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A canonical, catalog-linked revenue record produced at approval.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SaleRecord {
    pub id: Option<i64>,
    pub import_id: ImportId,
    pub line_id: LineId,
    pub catalog_item_id: CatalogItemId,
    pub quantity: Decimal,
    pub unit_price: Money,
    pub line_total: Money,
    pub sale_date: NaiveDate,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApprovalOutcome {
    pub status: ImportStatus,
    pub created_count: usize,
    pub skipped_count: usize,
    pub synced_prices: Vec<CatalogItemId>,
}

impl ApprovalOutcome {
    /// Unmatched lines left out of a partial approval.
    pub fn has_warnings(&self) -> bool {
        self.skipped_count > 0
    }
}

/// Review payload: line counts plus declared-total reconciliation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImportSummary {
    pub import_id: ImportId,
    pub status: ImportStatus,
    pub line_count: usize,
    pub matched: usize,
    pub needs_review: usize,
    pub unmatched: usize,
    pub inferred_quantities: usize,
    pub price_mismatches: usize,
    pub lines_total: Money,
    pub declared_gross: Option<Money>,
    pub gross_difference: Option<Money>,
}

impl ImportSummary {
    pub fn from_lines(import: &SalesImport, lines: &[SalesLine]) -> Self {
        let count = |status: LineStatus| lines.iter().filter(|l| l.status == status).count();
        let lines_total: Money = lines.iter().map(|l| l.line_total).sum();
        let declared_gross = import.totals.gross;
        ImportSummary {
            import_id: import.id,
            status: import.status,
            line_count: lines.len(),
            matched: count(LineStatus::Matched) + count(LineStatus::Approved),
            needs_review: count(LineStatus::NeedsReview),
            unmatched: count(LineStatus::Unmatched) + count(LineStatus::Skipped),
            inferred_quantities: lines.iter().filter(|l| l.metadata.inferred_quantity).count(),
            price_mismatches: lines.iter().filter(|l| l.metadata.price_mismatch).count(),
            lines_total,
            declared_gross,
            gross_difference: declared_gross.map(|g| g - lines_total),
        }
    }
}
