use std::time::Duration;

use comanda_core::{
    ApprovalOutcome, CatalogItemId, ImportHeader, ImportId, ImportStatus, ImportSummary, LineId,
    LineStatus, Money, RawSalesLine, ReconcileConfig, ReconcileError, SaleRecord, SalesImport, SalesLine,
};
use comanda_reconcile::{effective_unit_price, CatalogIndex, LineAmounts, LineEvaluation, LineEvaluator, MatchSuggestion};
use comanda_storage::{self as storage, DbPool, StorageError};
use rust_decimal::Decimal;
use sqlx::SqliteConnection;
use tracing::{debug, info, warn};

/// Owns the lifecycle of staged sales imports.
///
/// Every write that must not interleave with an approval starts with a
/// guarded update of the import row. SQLite grants one writer at a time, so
/// whichever transaction issues that update first runs to completion before
/// the other sees the row.
pub struct Reconciler {
    db: DbPool,
    config: ReconcileConfig,
    evaluator: LineEvaluator,
}

impl Reconciler {
    pub fn new(db: DbPool, config: ReconcileConfig) -> Self {
        let evaluator = LineEvaluator::from_config(&config);
        Self { db, config, evaluator }
    }

    pub fn db(&self) -> &DbPool {
        &self.db
    }

    /// Snapshot of the active catalog.
    pub async fn catalog(&self) -> Result<CatalogIndex, ReconcileError> {
        let items = storage::list_active_catalog_items(&self.db).await?;
        Ok(CatalogIndex::new(items))
    }

    /// Persists the raw lines, evaluates each one against the current catalog
    /// and hands the import over for review.
    pub async fn stage_import(
        &self,
        header: ImportHeader,
        lines: Vec<RawSalesLine>,
    ) -> Result<SalesImport, ReconcileError> {
        if header.source_filename.trim().is_empty() {
            return Err(ReconcileError::Validation("source filename is empty".to_string()));
        }
        RawSalesLine::validate_batch(&lines)?;

        let catalog = self.catalog().await?;

        let mut tx = self.db.begin().await.map_err(StorageError::from)?;
        let import_id = storage::insert_import(&mut tx, &header, &lines).await?;
        tx.commit().await.map_err(StorageError::from)?;
        info!(
            "Staged import {} from {} with {} lines",
            import_id,
            header.source_filename,
            lines.len()
        );

        match self.evaluate_pending(import_id, &catalog).await {
            Ok(import) => Ok(import),
            Err(e) => {
                self.mark_error(import_id, &e.to_string()).await;
                Err(e)
            }
        }
    }

    async fn evaluate_pending(
        &self,
        import_id: ImportId,
        catalog: &CatalogIndex,
    ) -> Result<SalesImport, ReconcileError> {
        let mut tx = self.db.begin().await.map_err(StorageError::from)?;
        if !storage::compare_and_set_status(&mut tx, import_id, ImportStatus::Pending, ImportStatus::Reviewing)
            .await?
        {
            return Err(status_conflict(&mut tx, import_id, ImportStatus::Pending).await);
        }

        let lines = storage::get_lines(&mut tx, import_id).await?;
        let mut unmatched = 0usize;
        for mut line in lines {
            let evaluation = self
                .evaluator
                .evaluate(&line.description, LineAmounts::from(&line), catalog);
            apply(&mut line, evaluation);
            log_evaluation(&line);
            if !line.is_linked() {
                unmatched += 1;
            }
            storage::update_line_match(&mut tx, &line).await?;
        }

        let import = storage::get_import(&mut tx, import_id)
            .await?
            .ok_or_else(|| import_not_found(import_id))?;
        tx.commit().await.map_err(StorageError::from)?;

        if unmatched > 0 {
            warn!("Import {} has {} unmatched lines awaiting review", import_id, unmatched);
        }
        Ok(import)
    }

    /// Re-runs automatic matching for every line an operator has not touched.
    pub async fn rematch(&self, import_id: ImportId) -> Result<Vec<SalesLine>, ReconcileError> {
        let catalog = self.catalog().await?;

        let mut tx = self.db.begin().await.map_err(StorageError::from)?;
        claim_reviewing(&mut tx, import_id).await?;

        let mut lines = storage::get_lines(&mut tx, import_id).await?;
        for line in lines.iter_mut().filter(|l| !l.manual_override) {
            let evaluation = self
                .evaluator
                .evaluate(&line.description, LineAmounts::from(&*line), &catalog);
            apply(line, evaluation);
            log_evaluation(line);
            storage::update_line_match(&mut tx, line).await?;
        }
        tx.commit().await.map_err(StorageError::from)?;

        info!("Re-matched import {} against {} catalog items", import_id, catalog.len());
        Ok(lines)
    }

    /// Ranked candidates for a line. Uses the stored description unless the
    /// operator typed a query. Read-only.
    pub async fn suggest_matches(
        &self,
        import_id: ImportId,
        line_id: LineId,
        query: Option<&str>,
    ) -> Result<Vec<MatchSuggestion>, ReconcileError> {
        let mut conn = self.db.acquire().await.map_err(StorageError::from)?;
        let line = storage::get_line(&mut conn, import_id, line_id)
            .await?
            .ok_or_else(|| line_not_found(import_id, line_id))?;
        drop(conn);

        let description = query.unwrap_or(&line.description);
        self.search(description).await
    }

    /// Free-text search over the active catalog.
    pub async fn search(&self, query: &str) -> Result<Vec<MatchSuggestion>, ReconcileError> {
        let catalog = self.catalog().await?;
        Ok(self
            .evaluator
            .matcher
            .suggest(query, &catalog, self.config.matching.suggestion_limit))
    }

    /// Links a line to an operator-chosen item and recomputes its quantity and
    /// drift flags against that item.
    pub async fn set_match(
        &self,
        import_id: ImportId,
        line_id: LineId,
        item_id: CatalogItemId,
    ) -> Result<SalesLine, ReconcileError> {
        let catalog = self.catalog().await?;
        if catalog.get(item_id).is_none() {
            return Err(ReconcileError::NotFound(format!("catalog item {item_id}")));
        }

        let mut tx = self.db.begin().await.map_err(StorageError::from)?;
        claim_reviewing(&mut tx, import_id).await?;

        let mut line = storage::get_line(&mut tx, import_id, line_id)
            .await?
            .ok_or_else(|| line_not_found(import_id, line_id))?;
        let evaluation = self
            .evaluator
            .evaluate_with(&line.description, LineAmounts::from(&line), &catalog, item_id)
            .ok_or_else(|| ReconcileError::NotFound(format!("catalog item {item_id}")))?;
        apply(&mut line, evaluation);
        line.manual_override = true;
        storage::update_line_match(&mut tx, &line).await?;
        tx.commit().await.map_err(StorageError::from)?;

        info!(
            "Line {} of import {} manually matched to item {}",
            line.line_number, import_id, item_id
        );
        Ok(line)
    }

    /// Drops whatever item a line is linked to. The line is skipped on approval.
    pub async fn clear_match(&self, import_id: ImportId, line_id: LineId) -> Result<SalesLine, ReconcileError> {
        let mut tx = self.db.begin().await.map_err(StorageError::from)?;
        claim_reviewing(&mut tx, import_id).await?;

        let mut line = storage::get_line(&mut tx, import_id, line_id)
            .await?
            .ok_or_else(|| line_not_found(import_id, line_id))?;
        let evaluation = self.evaluator.evaluate_cleared(LineAmounts::from(&line));
        apply(&mut line, evaluation);
        line.manual_override = true;
        storage::update_line_match(&mut tx, &line).await?;
        tx.commit().await.map_err(StorageError::from)?;

        info!("Line {} of import {} match cleared", line.line_number, import_id);
        Ok(line)
    }

    /// Commits every linked line as a sale record and optionally syncs catalog
    /// prices, all in one transaction bounded by the approval timeout.
    ///
    /// A timed-out or failed approval is rolled back and leaves the import in
    /// `reviewing`, so the call can simply be retried.
    pub async fn approve(
        &self,
        import_id: ImportId,
        price_sync: &[CatalogItemId],
    ) -> Result<ApprovalOutcome, ReconcileError> {
        let timeout_ms = self.config.approval.timeout_ms;
        match tokio::time::timeout(Duration::from_millis(timeout_ms), self.approve_now(import_id, price_sync)).await {
            Ok(result) => result,
            Err(_) => {
                warn!("Approval of import {} timed out after {} ms; rolled back", import_id, timeout_ms);
                Err(ReconcileError::Timeout(timeout_ms))
            }
        }
    }

    async fn approve_now(
        &self,
        import_id: ImportId,
        price_sync: &[CatalogItemId],
    ) -> Result<ApprovalOutcome, ReconcileError> {
        let mut tx = self.db.begin().await.map_err(|e| commit_failure(&e))?;

        let result = approve_in(&mut tx, import_id, price_sync).await;
        match result {
            Ok(outcome) => {
                tx.commit().await.map_err(|e| commit_failure(&e))?;
                info!(
                    "Approved import {} as {}: {} records created, {} lines skipped, {} prices synced",
                    import_id,
                    outcome.status,
                    outcome.created_count,
                    outcome.skipped_count,
                    outcome.synced_prices.len()
                );
                Ok(outcome)
            }
            Err(e) => {
                if let Err(rollback) = tx.rollback().await {
                    warn!("Rollback of import {} approval failed: {}", import_id, rollback);
                }
                match &e {
                    ReconcileError::CorruptStageData(message) => self.mark_error(import_id, message).await,
                    ReconcileError::CommitFailure(message) => {
                        warn!("Approval of import {} rolled back: {}", import_id, message)
                    }
                    _ => {}
                }
                Err(e)
            }
        }
    }

    /// Discards the staged lines. The import row stays behind as `rejected`.
    pub async fn reject(&self, import_id: ImportId) -> Result<(), ReconcileError> {
        let mut tx = self.db.begin().await.map_err(StorageError::from)?;
        let mut rejected = false;
        for from in [ImportStatus::Reviewing, ImportStatus::Pending] {
            if storage::compare_and_set_status(&mut tx, import_id, from, ImportStatus::Rejected).await? {
                rejected = true;
                break;
            }
        }
        if !rejected {
            return Err(status_conflict(&mut tx, import_id, ImportStatus::Reviewing).await);
        }

        let removed = storage::delete_lines(&mut tx, import_id).await?;
        tx.commit().await.map_err(StorageError::from)?;

        info!("Rejected import {}, discarded {} staged lines", import_id, removed);
        Ok(())
    }

    pub async fn get_import(&self, import_id: ImportId) -> Result<SalesImport, ReconcileError> {
        let mut conn = self.db.acquire().await.map_err(StorageError::from)?;
        storage::get_import(&mut conn, import_id)
            .await?
            .ok_or_else(|| import_not_found(import_id))
    }

    pub async fn list_imports(&self) -> Result<Vec<SalesImport>, ReconcileError> {
        let mut conn = self.db.acquire().await.map_err(StorageError::from)?;
        Ok(storage::list_imports(&mut conn).await?)
    }

    /// The review payload: every line with its suggestion and flags.
    pub async fn lines(&self, import_id: ImportId) -> Result<Vec<SalesLine>, ReconcileError> {
        let mut conn = self.db.acquire().await.map_err(StorageError::from)?;
        if storage::get_import(&mut conn, import_id).await?.is_none() {
            return Err(import_not_found(import_id));
        }
        Ok(storage::get_lines(&mut conn, import_id).await?)
    }

    pub async fn summary(&self, import_id: ImportId) -> Result<ImportSummary, ReconcileError> {
        let mut conn = self.db.acquire().await.map_err(StorageError::from)?;
        let import = storage::get_import(&mut conn, import_id)
            .await?
            .ok_or_else(|| import_not_found(import_id))?;
        let lines = storage::get_lines(&mut conn, import_id).await?;
        Ok(ImportSummary::from_lines(&import, &lines))
    }

    pub async fn sale_records(&self, import_id: ImportId) -> Result<Vec<SaleRecord>, ReconcileError> {
        let mut conn = self.db.acquire().await.map_err(StorageError::from)?;
        Ok(storage::get_sale_records(&mut conn, import_id).await?)
    }

    async fn mark_error(&self, import_id: ImportId, message: &str) {
        let marked = match self.db.acquire().await {
            Ok(mut conn) => storage::mark_import_error(&mut conn, import_id, message).await,
            Err(e) => Err(StorageError::from(e)),
        };
        match marked {
            Ok(true) => warn!("Import {} moved to error: {}", import_id, message),
            Ok(false) => debug!("Import {} already left staging; error not recorded", import_id),
            Err(e) => warn!("Could not mark import {} as error: {}", import_id, e),
        }
    }
}

async fn approve_in(
    conn: &mut SqliteConnection,
    import_id: ImportId,
    price_sync: &[CatalogItemId],
) -> Result<ApprovalOutcome, ReconcileError> {
    let Some(status) = storage::begin_approval(conn, import_id).await.map_err(approval_error)? else {
        return Err(status_conflict(conn, import_id, ImportStatus::Reviewing).await);
    };

    let import = storage::get_import(conn, import_id)
        .await
        .map_err(approval_error)?
        .ok_or_else(|| import_not_found(import_id))?;
    let lines = storage::get_lines(conn, import_id).await.map_err(approval_error)?;
    let prices = plan_price_sync(import_id, &lines, price_sync)?;

    let mut created_count = 0;
    let mut skipped_count = 0;
    for line in &lines {
        match line.matched_item {
            Some(item) => {
                storage::insert_sale_record(conn, &sale_record(&import, line, item))
                    .await
                    .map_err(approval_error)?;
                storage::set_line_status(conn, line.id, LineStatus::Approved)
                    .await
                    .map_err(approval_error)?;
                created_count += 1;
            }
            None => {
                storage::set_line_status(conn, line.id, LineStatus::Skipped)
                    .await
                    .map_err(approval_error)?;
                skipped_count += 1;
            }
        }
    }

    let mut synced_prices = Vec::with_capacity(prices.len());
    for (item, price) in prices {
        if !storage::update_catalog_item_price(conn, item, price)
            .await
            .map_err(approval_error)?
        {
            return Err(ReconcileError::NotFound(format!("catalog item {item}")));
        }
        debug!("Catalog item {} price synced to {}", item, price);
        synced_prices.push(item);
    }

    if skipped_count > 0 {
        warn!("Import {} approved partially, {} unmatched lines skipped", import_id, skipped_count);
    }

    Ok(ApprovalOutcome {
        status,
        created_count,
        skipped_count,
        synced_prices,
    })
}

/// One price per selected item: the file price of the lowest-numbered line
/// linked to it. Lines arrive in line-number order.
fn plan_price_sync(
    import_id: ImportId,
    lines: &[SalesLine],
    selection: &[CatalogItemId],
) -> Result<Vec<(CatalogItemId, Money)>, ReconcileError> {
    let mut plan: Vec<(CatalogItemId, Money)> = Vec::new();
    for &item in selection {
        if plan.iter().any(|(id, _)| *id == item) {
            continue;
        }
        let price = lines
            .iter()
            .filter(|l| l.matched_item == Some(item))
            .find_map(|l| l.metadata.file_price.or(l.unit_price))
            .ok_or_else(|| {
                ReconcileError::Validation(format!(
                    "catalog item {item} is not linked to any priced line of import {import_id}"
                ))
            })?;
        plan.push((item, price));
    }
    Ok(plan)
}

/// The price a record carries always comes from the line itself. With no
/// known quantity the line becomes one unit sold at its total.
fn sale_record(import: &SalesImport, line: &SalesLine, item: CatalogItemId) -> SaleRecord {
    let (quantity, unit_price) = match line.quantity {
        Some(quantity) => {
            let unit_price = line
                .unit_price
                .or_else(|| effective_unit_price(None, line.line_total, Some(quantity)))
                .unwrap_or(line.line_total);
            (quantity, unit_price)
        }
        None => (Decimal::ONE, line.line_total),
    };
    SaleRecord {
        id: None,
        import_id: import.id,
        line_id: line.id,
        catalog_item_id: item,
        quantity,
        unit_price,
        line_total: line.line_total,
        sale_date: import.sale_date,
    }
}

fn apply(line: &mut SalesLine, evaluation: LineEvaluation) {
    line.matched_item = evaluation.matched_item;
    line.confidence = evaluation.confidence;
    line.status = evaluation.status;
    line.quantity = evaluation.quantity;
    line.unit_price = evaluation.unit_price;
    line.metadata = evaluation.metadata;
}

fn log_evaluation(line: &SalesLine) {
    match line.matched_item {
        Some(item) => debug!(
            "Line {} '{}' -> item {} ({}%, {})",
            line.line_number,
            line.description,
            item,
            line.confidence.unwrap_or(0),
            line.status
        ),
        None => debug!(
            "Line {} '{}' unmatched: {}",
            line.line_number,
            line.description,
            line.metadata.unmatched_reason.as_deref().unwrap_or("")
        ),
    }
}

/// Takes the write lock on a `reviewing` import, or explains why not.
async fn claim_reviewing(conn: &mut SqliteConnection, import_id: ImportId) -> Result<(), ReconcileError> {
    if storage::touch_if_reviewing(conn, import_id).await? {
        Ok(())
    } else {
        Err(status_conflict(conn, import_id, ImportStatus::Reviewing).await)
    }
}

async fn status_conflict(conn: &mut SqliteConnection, import_id: ImportId, expected: ImportStatus) -> ReconcileError {
    match storage::get_import(conn, import_id).await {
        Ok(Some(import)) => ReconcileError::Conflict {
            import: import_id.0,
            expected,
            actual: import.status,
        },
        Ok(None) => import_not_found(import_id),
        Err(e) => e.into(),
    }
}

/// Inside approval only corrupt rows are permanent; anything else is a
/// rolled-back commit the caller may retry.
fn approval_error(e: StorageError) -> ReconcileError {
    if e.is_corrupt_data() {
        ReconcileError::CorruptStageData(e.to_string())
    } else {
        commit_failure(&e)
    }
}

fn commit_failure(e: &dyn std::fmt::Display) -> ReconcileError {
    ReconcileError::CommitFailure(e.to_string())
}

fn import_not_found(import_id: ImportId) -> ReconcileError {
    ReconcileError::NotFound(format!("import {import_id}"))
}

fn line_not_found(import_id: ImportId, line_id: LineId) -> ReconcileError {
    ReconcileError::NotFound(format!("line {line_id} of import {import_id}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, Utc};
    use comanda_core::{DeclaredTotals, LineMetadata};

    fn import() -> SalesImport {
        SalesImport {
            id: ImportId(7),
            source_filename: "z.csv".to_string(),
            sale_date: NaiveDate::from_ymd_opt(2026, 10, 17).unwrap(),
            totals: DeclaredTotals::default(),
            status: ImportStatus::Approved,
            error_message: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn line(id: i64, number: u32, item: Option<i64>, file_cents: Option<i64>) -> SalesLine {
        SalesLine {
            id: LineId(id),
            import_id: ImportId(7),
            line_number: number,
            description: "Bitoque".to_string(),
            raw_quantity: None,
            raw_unit_price: None,
            line_total: Money::from_cents(2400),
            quantity: Some(Decimal::from(3)),
            unit_price: file_cents.map(Money::from_cents),
            matched_item: item.map(CatalogItemId),
            confidence: Some(100),
            status: LineStatus::Matched,
            manual_override: false,
            metadata: LineMetadata {
                file_price: file_cents.map(Money::from_cents),
                ..LineMetadata::default()
            },
        }
    }

    #[test]
    fn price_sync_uses_lowest_numbered_line() {
        let lines = vec![line(10, 1, Some(1), Some(950)), line(11, 2, Some(1), Some(990))];
        let plan = plan_price_sync(ImportId(7), &lines, &[CatalogItemId(1), CatalogItemId(1)]).unwrap();
        assert_eq!(plan, vec![(CatalogItemId(1), Money::from_cents(950))]);
    }

    #[test]
    fn price_sync_of_unlinked_item_is_invalid() {
        let lines = vec![line(10, 1, Some(1), Some(950))];
        let err = plan_price_sync(ImportId(7), &lines, &[CatalogItemId(2)]).unwrap_err();
        assert!(matches!(err, ReconcileError::Validation(_)));
    }

    #[test]
    fn record_defaults_when_quantity_unknown() {
        let mut l = line(10, 1, Some(1), None);
        l.quantity = None;
        let record = sale_record(&import(), &l, CatalogItemId(1));
        assert_eq!(record.quantity, Decimal::ONE);
        assert_eq!(record.unit_price, Money::from_cents(2400));
        assert_eq!(record.sale_date, import().sale_date);
    }

    #[test]
    fn record_ignores_catalog_price_when_quantity_unknown() {
        let mut l = line(10, 1, Some(1), None);
        l.quantity = None;
        l.line_total = Money::from_cents(500);
        l.metadata.system_price = Some(Money::zero());
        let record = sale_record(&import(), &l, CatalogItemId(1));
        assert_eq!(record.quantity, Decimal::ONE);
        assert_eq!(record.unit_price, Money::from_cents(500));
        assert_eq!(record.line_total, Money::from_cents(500));
    }

    #[test]
    fn record_price_derived_from_total_over_quantity() {
        let l = line(10, 1, Some(1), None);
        let record = sale_record(&import(), &l, CatalogItemId(1));
        assert_eq!(record.quantity, Decimal::from(3));
        assert_eq!(record.unit_price, Money::from_cents(800));
    }

    #[test]
    fn storage_failures_during_approval_are_retryable() {
        let err = approval_error(StorageError::Database(sqlx::Error::PoolTimedOut));
        assert!(err.is_retryable());
        let err = approval_error(StorageError::InvalidDecimal { column: "line_total", value: "x".into() });
        assert!(matches!(err, ReconcileError::CorruptStageData(_)));
    }
}
