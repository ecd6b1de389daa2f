use chrono::Utc;
use comanda_core::{CatalogItem, CatalogItemId, Money, NewCatalogItem};
use sqlx::SqliteConnection;

use crate::db::DbPool;
use crate::decode;
use crate::error::{StorageError, StorageResult};

type CatalogRow = (i64, String, String, String);

fn from_row(r: CatalogRow) -> StorageResult<CatalogItem> {
    Ok(CatalogItem {
        id: CatalogItemId(r.0),
        name: r.1,
        aliases: decode::json("aliases", &r.2)?,
        price: decode::money("price", &r.3)?,
    })
}

fn aliases_json(aliases: &[String]) -> StorageResult<String> {
    serde_json::to_string(aliases).map_err(|e| StorageError::InvalidJson {
        column: "aliases",
        message: e.to_string(),
    })
}

/// The catalog snapshot matching runs against.
pub async fn list_active_catalog_items(pool: &DbPool) -> StorageResult<Vec<CatalogItem>> {
    let rows = sqlx::query_as::<_, CatalogRow>(
        "SELECT id, name, aliases, price FROM catalog_items WHERE is_active = 1 ORDER BY id",
    )
    .fetch_all(pool)
    .await?;

    rows.into_iter().map(from_row).collect()
}

pub async fn get_catalog_item(
    conn: &mut SqliteConnection,
    id: CatalogItemId,
) -> StorageResult<Option<CatalogItem>> {
    let row = sqlx::query_as::<_, CatalogRow>(
        "SELECT id, name, aliases, price FROM catalog_items WHERE id = ?",
    )
    .bind(id.0)
    .fetch_optional(conn)
    .await?;

    row.map(from_row).transpose()
}

pub async fn insert_catalog_item(pool: &DbPool, item: &NewCatalogItem) -> StorageResult<CatalogItem> {
    let id = sqlx::query(
        "INSERT INTO catalog_items (name, aliases, price, updated_at) VALUES (?, ?, ?, ?)",
    )
    .bind(&item.name)
    .bind(aliases_json(&item.aliases)?)
    .bind(item.price.to_string())
    .bind(Utc::now())
    .execute(pool)
    .await?
    .last_insert_rowid();

    Ok(CatalogItem {
        id: CatalogItemId(id),
        name: item.name.clone(),
        aliases: item.aliases.clone(),
        price: item.price,
    })
}

/// Writes a new current price. Returns `false` when no such item exists.
pub async fn update_catalog_item_price(
    conn: &mut SqliteConnection,
    id: CatalogItemId,
    price: Money,
) -> StorageResult<bool> {
    let result = sqlx::query("UPDATE catalog_items SET price = ?, updated_at = ? WHERE id = ?")
        .bind(price.to_string())
        .bind(Utc::now())
        .bind(id.0)
        .execute(conn)
        .await?;
    Ok(result.rows_affected() == 1)
}

pub async fn deactivate_catalog_item(pool: &DbPool, id: CatalogItemId) -> StorageResult<bool> {
    let result = sqlx::query("UPDATE catalog_items SET is_active = 0, updated_at = ? WHERE id = ?")
        .bind(Utc::now())
        .bind(id.0)
        .execute(pool)
        .await?;
    Ok(result.rows_affected() == 1)
}
