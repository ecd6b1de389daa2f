pub mod catalog;
pub mod config;
pub mod error;
pub mod money;
pub mod sales;

pub use catalog::{CatalogItem, CatalogItemId, NewCatalogItem};
pub use config::{ApprovalConfig, ConfigError, DriftConfig, MatchingConfig, QuantityConfig, ReconcileConfig};
pub use error::ReconcileError;
pub use money::Money;
pub use sales::{
    ApprovalOutcome, DeclaredTotals, ImportHeader, ImportId, ImportStatus, ImportSummary, LineId,
    LineMetadata, LineStatus, PaymentSplit, RawSalesLine, SaleRecord, SalesImport, SalesLine,
    TaxLine, MAX_LINE_AMOUNT, MAX_LINE_QUANTITY,
};
