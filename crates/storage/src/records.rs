use chrono::{NaiveDate, Utc};
use comanda_core::{CatalogItemId, ImportId, LineId, SaleRecord};
use sqlx::SqliteConnection;

use crate::decode;
use crate::error::StorageResult;

type RecordRow = (i64, i64, i64, i64, String, String, String, NaiveDate);

/// Creates one canonical sale record. Fails if the line already produced one.
pub async fn insert_sale_record(conn: &mut SqliteConnection, record: &SaleRecord) -> StorageResult<i64> {
    let id = sqlx::query(
        "INSERT INTO sale_records (import_id, line_id, catalog_item_id, quantity, unit_price, \
         line_total, sale_date, created_at) VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(record.import_id.0)
    .bind(record.line_id.0)
    .bind(record.catalog_item_id.0)
    .bind(record.quantity.to_string())
    .bind(record.unit_price.to_string())
    .bind(record.line_total.to_string())
    .bind(record.sale_date)
    .bind(Utc::now())
    .execute(conn)
    .await?
    .last_insert_rowid();
    Ok(id)
}

pub async fn get_sale_records(conn: &mut SqliteConnection, import_id: ImportId) -> StorageResult<Vec<SaleRecord>> {
    let rows = sqlx::query_as::<_, RecordRow>(
        "SELECT id, import_id, line_id, catalog_item_id, quantity, unit_price, line_total, sale_date \
         FROM sale_records WHERE import_id = ? ORDER BY id",
    )
    .bind(import_id.0)
    .fetch_all(conn)
    .await?;

    rows.into_iter()
        .map(|r| {
            Ok(SaleRecord {
                id: Some(r.0),
                import_id: ImportId(r.1),
                line_id: LineId(r.2),
                catalog_item_id: CatalogItemId(r.3),
                quantity: decode::decimal("quantity", &r.4)?,
                unit_price: decode::money("unit_price", &r.5)?,
                line_total: decode::money("line_total", &r.6)?,
                sale_date: r.7,
            })
        })
        .collect()
}

pub async fn count_sale_records(conn: &mut SqliteConnection) -> StorageResult<i64> {
    let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM sale_records")
        .fetch_one(conn)
        .await?;
    Ok(count)
}
