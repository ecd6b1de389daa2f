use chrono::{DateTime, NaiveDate, Utc};
use comanda_core::{
    CatalogItemId, DeclaredTotals, ImportHeader, ImportId, ImportStatus, LineId, LineMetadata,
    LineStatus, RawSalesLine, SalesImport, SalesLine,
};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteConnection};

use crate::decode;
use crate::error::{StorageError, StorageResult};

const IMPORT_COLUMNS: &str =
    "id, source_filename, sale_date, declared_totals, status, error_message, created_at, updated_at";

const LINE_COLUMNS: &str = "id, import_id, line_number, description, raw_quantity, raw_unit_price, \
     line_total, quantity, unit_price, matched_item_id, confidence, status, manual_override, \
     inferred_quantity, inference_reason, price_mismatch, system_price, file_price, \
     original_quantity, unmatched_reason";

fn import_from_row(row: &SqliteRow) -> StorageResult<SalesImport> {
    let totals: String = row.try_get("declared_totals")?;
    let status: String = row.try_get("status")?;
    Ok(SalesImport {
        id: ImportId(row.try_get("id")?),
        source_filename: row.try_get("source_filename")?,
        sale_date: row.try_get::<NaiveDate, _>("sale_date")?,
        totals: decode::json::<DeclaredTotals>("declared_totals", &totals)?,
        status: decode::parsed("status", &status)?,
        error_message: row.try_get("error_message")?,
        created_at: row.try_get::<DateTime<Utc>, _>("created_at")?,
        updated_at: row.try_get::<DateTime<Utc>, _>("updated_at")?,
    })
}

fn line_from_row(row: &SqliteRow) -> StorageResult<SalesLine> {
    let line_total: String = row.try_get("line_total")?;
    let status: String = row.try_get("status")?;
    let confidence: Option<i64> = row.try_get("confidence")?;
    let line_number: i64 = row.try_get("line_number")?;
    Ok(SalesLine {
        id: LineId(row.try_get("id")?),
        import_id: ImportId(row.try_get("import_id")?),
        line_number: u32::try_from(line_number).map_err(|_| StorageError::InvalidDecimal {
            column: "line_number",
            value: line_number.to_string(),
        })?,
        description: row.try_get("description")?,
        raw_quantity: decode::opt_decimal("raw_quantity", row.try_get("raw_quantity")?)?,
        raw_unit_price: decode::opt_money("raw_unit_price", row.try_get("raw_unit_price")?)?,
        line_total: decode::money("line_total", &line_total)?,
        quantity: decode::opt_decimal("quantity", row.try_get("quantity")?)?,
        unit_price: decode::opt_money("unit_price", row.try_get("unit_price")?)?,
        matched_item: row
            .try_get::<Option<i64>, _>("matched_item_id")?
            .map(CatalogItemId),
        confidence: confidence.map(|c| c.clamp(0, 100) as u8),
        status: decode::parsed::<LineStatus>("status", &status)?,
        manual_override: row.try_get("manual_override")?,
        metadata: LineMetadata {
            inferred_quantity: row.try_get("inferred_quantity")?,
            inference_reason: row.try_get("inference_reason")?,
            price_mismatch: row.try_get("price_mismatch")?,
            system_price: decode::opt_money("system_price", row.try_get("system_price")?)?,
            file_price: decode::opt_money("file_price", row.try_get("file_price")?)?,
            original_quantity: decode::opt_decimal("original_quantity", row.try_get("original_quantity")?)?,
            unmatched_reason: row.try_get("unmatched_reason")?,
        },
    })
}

/// Creates the import row in `pending` together with its raw lines.
pub async fn insert_import(
    conn: &mut SqliteConnection,
    header: &ImportHeader,
    lines: &[RawSalesLine],
) -> StorageResult<ImportId> {
    let totals = serde_json::to_string(&header.totals).map_err(|e| StorageError::InvalidJson {
        column: "declared_totals",
        message: e.to_string(),
    })?;
    let now = Utc::now();

    let id = sqlx::query(
        "INSERT INTO sales_imports (source_filename, sale_date, declared_totals, status, created_at, updated_at) \
         VALUES (?, ?, ?, ?, ?, ?)",
    )
    .bind(&header.source_filename)
    .bind(header.sale_date)
    .bind(totals)
    .bind(ImportStatus::Pending.as_str())
    .bind(now)
    .bind(now)
    .execute(&mut *conn)
    .await?
    .last_insert_rowid();

    for line in lines {
        sqlx::query(
            "INSERT INTO sales_lines (import_id, line_number, description, raw_quantity, raw_unit_price, \
             line_total, quantity, unit_price, status) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(id)
        .bind(i64::from(line.line_number))
        .bind(&line.description)
        .bind(line.quantity.map(|q| q.to_string()))
        .bind(line.unit_price.map(|p| p.to_string()))
        .bind(line.line_total.to_string())
        .bind(line.quantity.map(|q| q.to_string()))
        .bind(line.unit_price.map(|p| p.to_string()))
        .bind(LineStatus::Unmatched.as_str())
        .execute(&mut *conn)
        .await?;
    }

    Ok(ImportId(id))
}

pub async fn get_import(conn: &mut SqliteConnection, id: ImportId) -> StorageResult<Option<SalesImport>> {
    let row = sqlx::query(&format!("SELECT {IMPORT_COLUMNS} FROM sales_imports WHERE id = ?"))
        .bind(id.0)
        .fetch_optional(conn)
        .await?;
    row.as_ref().map(import_from_row).transpose()
}

/// Most recent first.
pub async fn list_imports(conn: &mut SqliteConnection) -> StorageResult<Vec<SalesImport>> {
    let rows = sqlx::query(&format!("SELECT {IMPORT_COLUMNS} FROM sales_imports ORDER BY id DESC"))
        .fetch_all(conn)
        .await?;
    rows.iter().map(import_from_row).collect()
}

/// Lines of an import in line-number order.
pub async fn get_lines(conn: &mut SqliteConnection, import_id: ImportId) -> StorageResult<Vec<SalesLine>> {
    let rows = sqlx::query(&format!(
        "SELECT {LINE_COLUMNS} FROM sales_lines WHERE import_id = ? ORDER BY line_number"
    ))
    .bind(import_id.0)
    .fetch_all(conn)
    .await?;
    rows.iter().map(line_from_row).collect()
}

pub async fn get_line(
    conn: &mut SqliteConnection,
    import_id: ImportId,
    line_id: LineId,
) -> StorageResult<Option<SalesLine>> {
    let row = sqlx::query(&format!(
        "SELECT {LINE_COLUMNS} FROM sales_lines WHERE import_id = ? AND id = ?"
    ))
    .bind(import_id.0)
    .bind(line_id.0)
    .fetch_optional(conn)
    .await?;
    row.as_ref().map(line_from_row).transpose()
}

/// Persists the match-derived fields of a line. The raw columns and the
/// line total are never rewritten.
pub async fn update_line_match(conn: &mut SqliteConnection, line: &SalesLine) -> StorageResult<()> {
    let m = &line.metadata;
    sqlx::query(
        "UPDATE sales_lines SET quantity = ?, unit_price = ?, matched_item_id = ?, confidence = ?, \
         status = ?, manual_override = ?, inferred_quantity = ?, inference_reason = ?, \
         price_mismatch = ?, system_price = ?, file_price = ?, original_quantity = ?, \
         unmatched_reason = ? WHERE id = ? AND import_id = ?",
    )
    .bind(line.quantity.map(|q| q.to_string()))
    .bind(line.unit_price.map(|p| p.to_string()))
    .bind(line.matched_item.map(|id| id.0))
    .bind(line.confidence.map(i64::from))
    .bind(line.status.as_str())
    .bind(line.manual_override)
    .bind(m.inferred_quantity)
    .bind(&m.inference_reason)
    .bind(m.price_mismatch)
    .bind(m.system_price.map(|p| p.to_string()))
    .bind(m.file_price.map(|p| p.to_string()))
    .bind(m.original_quantity.map(|q| q.to_string()))
    .bind(&m.unmatched_reason)
    .bind(line.id.0)
    .bind(line.import_id.0)
    .execute(conn)
    .await?;
    Ok(())
}

pub async fn set_line_status(conn: &mut SqliteConnection, line_id: LineId, status: LineStatus) -> StorageResult<()> {
    sqlx::query("UPDATE sales_lines SET status = ? WHERE id = ?")
        .bind(status.as_str())
        .bind(line_id.0)
        .execute(conn)
        .await?;
    Ok(())
}

/// Atomic status transition. Returns `false` when the import was not in
/// `from` (or does not exist); the caller decides which error that is.
/// Moves the import lifecycle forbids fail without touching the row.
///
/// Inside a transaction this statement also takes SQLite's write lock, so
/// every later writer waits until the transaction ends.
pub async fn compare_and_set_status(
    conn: &mut SqliteConnection,
    id: ImportId,
    from: ImportStatus,
    to: ImportStatus,
) -> StorageResult<bool> {
    if !from.can_transition_to(to) {
        return Err(StorageError::InvalidTransition { from, to });
    }
    let result = sqlx::query(
        "UPDATE sales_imports SET status = ?, updated_at = ? WHERE id = ? AND status = ?",
    )
    .bind(to.as_str())
    .bind(Utc::now())
    .bind(id.0)
    .bind(from.as_str())
    .execute(conn)
    .await?;
    Ok(result.rows_affected() == 1)
}

/// Opens an approval: moves a `reviewing` import to `approved`, or to
/// `approved_partial` when any of its lines has no catalog item. Returns the
/// new status, or `None` when the import was not `reviewing`.
///
/// Takes the write lock like [`compare_and_set_status`], so the lines it
/// looked at stay as they are until the transaction ends.
pub async fn begin_approval(conn: &mut SqliteConnection, id: ImportId) -> StorageResult<Option<ImportStatus>> {
    let status: Option<String> = sqlx::query_scalar(
        "UPDATE sales_imports SET status = CASE WHEN EXISTS \
         (SELECT 1 FROM sales_lines WHERE import_id = ?1 AND matched_item_id IS NULL) \
         THEN ?2 ELSE ?3 END, updated_at = ?4 \
         WHERE id = ?1 AND status = ?5 RETURNING status",
    )
    .bind(id.0)
    .bind(ImportStatus::ApprovedPartial.as_str())
    .bind(ImportStatus::Approved.as_str())
    .bind(Utc::now())
    .bind(ImportStatus::Reviewing.as_str())
    .fetch_optional(conn)
    .await?;
    status.map(|s| decode::parsed("status", &s)).transpose()
}

/// Claims the import row for a write while it is still `reviewing`.
pub async fn touch_if_reviewing(conn: &mut SqliteConnection, id: ImportId) -> StorageResult<bool> {
    let result = sqlx::query("UPDATE sales_imports SET updated_at = ? WHERE id = ? AND status = ?")
        .bind(Utc::now())
        .bind(id.0)
        .bind(ImportStatus::Reviewing.as_str())
        .execute(conn)
        .await?;
    Ok(result.rows_affected() == 1)
}

/// Moves a not-yet-approved import to `error`.
pub async fn mark_import_error(conn: &mut SqliteConnection, id: ImportId, message: &str) -> StorageResult<bool> {
    let result = sqlx::query(
        "UPDATE sales_imports SET status = ?, error_message = ?, updated_at = ? \
         WHERE id = ? AND status IN (?, ?)",
    )
    .bind(ImportStatus::Error.as_str())
    .bind(message)
    .bind(Utc::now())
    .bind(id.0)
    .bind(ImportStatus::Pending.as_str())
    .bind(ImportStatus::Reviewing.as_str())
    .execute(conn)
    .await?;
    Ok(result.rows_affected() == 1)
}

pub async fn delete_lines(conn: &mut SqliteConnection, import_id: ImportId) -> StorageResult<u64> {
    let result = sqlx::query("DELETE FROM sales_lines WHERE import_id = ?")
        .bind(import_id.0)
        .execute(conn)
        .await?;
    Ok(result.rows_affected())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{create_db, DbPool};
    use comanda_core::Money;
    use rust_decimal::Decimal;

    fn header() -> ImportHeader {
        ImportHeader {
            source_filename: "vendas-2026-10-17.pdf".to_string(),
            sale_date: NaiveDate::from_ymd_opt(2026, 10, 17).unwrap(),
            totals: DeclaredTotals {
                gross: Some(Money::from_cents(3200)),
                ..DeclaredTotals::default()
            },
        }
    }

    fn raw(n: u32, desc: &str, qty: Option<i64>, total: i64) -> RawSalesLine {
        RawSalesLine {
            line_number: n,
            description: desc.to_string(),
            quantity: qty.map(Decimal::from),
            unit_price: None,
            line_total: Money::from_cents(total),
        }
    }

    async fn pool() -> (tempfile::TempDir, DbPool) {
        let dir = tempfile::tempdir().unwrap();
        let pool = create_db(&dir.path().join("t.db")).await.unwrap();
        (dir, pool)
    }

    #[tokio::test]
    async fn insert_then_read_back() {
        let (_dir, pool) = pool().await;
        let mut conn = pool.acquire().await.unwrap();
        let id = insert_import(&mut conn, &header(), &[raw(2, "Prego", None, 800), raw(1, "Bitoque", Some(3), 2400)])
            .await
            .unwrap();

        let import = get_import(&mut conn, id).await.unwrap().unwrap();
        assert_eq!(import.status, ImportStatus::Pending);
        assert_eq!(import.totals.gross, Some(Money::from_cents(3200)));
        assert_eq!(import.source_filename, "vendas-2026-10-17.pdf");

        let lines = get_lines(&mut conn, id).await.unwrap();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0].line_number, 1);
        assert_eq!(lines[0].raw_quantity, Some(Decimal::from(3)));
        assert_eq!(lines[0].quantity, Some(Decimal::from(3)));
        assert_eq!(lines[1].raw_quantity, None);
        assert_eq!(lines[1].status, LineStatus::Unmatched);
    }

    #[tokio::test]
    async fn duplicate_line_numbers_rejected_by_schema() {
        let (_dir, pool) = pool().await;
        let mut conn = pool.acquire().await.unwrap();
        let result = insert_import(&mut conn, &header(), &[raw(1, "A", None, 100), raw(1, "B", None, 100)]).await;
        assert!(matches!(result, Err(StorageError::Database(_))));
    }

    #[tokio::test]
    async fn compare_and_set_only_from_expected_state() {
        let (_dir, pool) = pool().await;
        let mut conn = pool.acquire().await.unwrap();
        let id = insert_import(&mut conn, &header(), &[]).await.unwrap();

        assert!(!compare_and_set_status(&mut conn, id, ImportStatus::Reviewing, ImportStatus::Approved)
            .await
            .unwrap());
        assert!(compare_and_set_status(&mut conn, id, ImportStatus::Pending, ImportStatus::Reviewing)
            .await
            .unwrap());
        assert!(touch_if_reviewing(&mut conn, id).await.unwrap());
        assert!(compare_and_set_status(&mut conn, id, ImportStatus::Reviewing, ImportStatus::Approved)
            .await
            .unwrap());
        assert!(!touch_if_reviewing(&mut conn, id).await.unwrap());
        assert!(!mark_import_error(&mut conn, id, "late").await.unwrap());
    }

    #[tokio::test]
    async fn forbidden_transition_leaves_row_alone() {
        let (_dir, pool) = pool().await;
        let mut conn = pool.acquire().await.unwrap();
        let id = insert_import(&mut conn, &header(), &[]).await.unwrap();

        let err = compare_and_set_status(&mut conn, id, ImportStatus::Pending, ImportStatus::Approved)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            StorageError::InvalidTransition { from: ImportStatus::Pending, to: ImportStatus::Approved }
        ));
        assert_eq!(get_import(&mut conn, id).await.unwrap().unwrap().status, ImportStatus::Pending);
    }

    #[tokio::test]
    async fn begin_approval_picks_partial_when_a_line_is_unlinked() {
        let (_dir, pool) = pool().await;
        let mut conn = pool.acquire().await.unwrap();
        let partial = insert_import(&mut conn, &header(), &[raw(1, "Água", None, 200)]).await.unwrap();
        let empty = insert_import(&mut conn, &header(), &[]).await.unwrap();

        assert_eq!(begin_approval(&mut conn, partial).await.unwrap(), None);
        for id in [partial, empty] {
            compare_and_set_status(&mut conn, id, ImportStatus::Pending, ImportStatus::Reviewing)
                .await
                .unwrap();
        }
        assert_eq!(begin_approval(&mut conn, partial).await.unwrap(), Some(ImportStatus::ApprovedPartial));
        assert_eq!(begin_approval(&mut conn, empty).await.unwrap(), Some(ImportStatus::Approved));
        assert_eq!(begin_approval(&mut conn, empty).await.unwrap(), None);
    }

    #[tokio::test]
    async fn update_line_match_keeps_raw_columns() {
        let (_dir, pool) = pool().await;
        let mut conn = pool.acquire().await.unwrap();
        let item = crate::catalog::insert_catalog_item(
            &pool,
            &comanda_core::NewCatalogItem {
                name: "Bitoque".to_string(),
                aliases: vec![],
                price: Money::from_cents(800),
            },
        )
        .await
        .unwrap();
        let id = insert_import(&mut conn, &header(), &[raw(1, "Bitoque", Some(1), 2400)]).await.unwrap();

        let mut line = get_lines(&mut conn, id).await.unwrap().remove(0);
        line.quantity = Some(Decimal::from(3));
        line.matched_item = Some(item.id);
        line.confidence = Some(100);
        line.status = LineStatus::Matched;
        line.metadata.inferred_quantity = true;
        line.metadata.original_quantity = Some(Decimal::ONE);
        line.metadata.system_price = Some(Money::from_cents(800));
        update_line_match(&mut conn, &line).await.unwrap();

        let stored = get_line(&mut conn, id, line.id).await.unwrap().unwrap();
        assert_eq!(stored, line);
        assert_eq!(stored.raw_quantity, Some(Decimal::ONE));
        assert_eq!(stored.line_total, Money::from_cents(2400));
    }

    #[tokio::test]
    async fn corrupt_decimal_surfaces_as_corrupt_data() {
        let (_dir, pool) = pool().await;
        let mut conn = pool.acquire().await.unwrap();
        let id = insert_import(&mut conn, &header(), &[raw(1, "Bitoque", None, 800)]).await.unwrap();
        sqlx::query("UPDATE sales_lines SET line_total = 'oito euros'")
            .execute(&mut *conn)
            .await
            .unwrap();

        let err = get_lines(&mut conn, id).await.unwrap_err();
        assert!(err.is_corrupt_data());
    }

    #[tokio::test]
    async fn delete_lines_and_error_state() {
        let (_dir, pool) = pool().await;
        let mut conn = pool.acquire().await.unwrap();
        let id = insert_import(&mut conn, &header(), &[raw(1, "A", None, 100), raw(2, "B", None, 100)])
            .await
            .unwrap();
        assert_eq!(delete_lines(&mut conn, id).await.unwrap(), 2);
        assert!(mark_import_error(&mut conn, id, "boom").await.unwrap());
        let import = get_import(&mut conn, id).await.unwrap().unwrap();
        assert_eq!(import.status, ImportStatus::Error);
        assert_eq!(import.error_message.as_deref(), Some("boom"));
    }

    #[tokio::test]
    async fn list_newest_first() {
        let (_dir, pool) = pool().await;
        let mut conn = pool.acquire().await.unwrap();
        let a = insert_import(&mut conn, &header(), &[]).await.unwrap();
        let b = insert_import(&mut conn, &header(), &[]).await.unwrap();
        let ids: Vec<ImportId> = list_imports(&mut conn).await.unwrap().iter().map(|i| i.id).collect();
        assert_eq!(ids, vec![b, a]);
    }
}
