use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::{Pool, Sqlite};
use std::path::Path;
use std::time::Duration;

pub type DbPool = Pool<Sqlite>;

const MAX_CONNECTIONS: u32 = 4;

/// Opens (creating if needed) the database and brings the schema up to date.
///
/// Every pooled connection gets WAL, foreign keys and a busy timeout, so a
/// writer waiting on another writer's transaction blocks instead of failing.
pub async fn create_db(path: &Path) -> Result<DbPool, sqlx::Error> {
    let options = SqliteConnectOptions::new()
        .filename(path)
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .synchronous(SqliteSynchronous::Normal)
        .foreign_keys(true)
        .busy_timeout(Duration::from_millis(5000))
        .pragma("cache_size", "-32000");

    let pool = SqlitePoolOptions::new()
        .max_connections(MAX_CONNECTIONS)
        .connect_with(options)
        .await?;

    run_migrations(&pool).await?;
    tracing::debug!("Opened {} with schema up to date", path.display());

    Ok(pool)
}

async fn run_migrations(pool: &DbPool) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS catalog_items (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL,
            aliases TEXT NOT NULL DEFAULT '[]',
            price TEXT NOT NULL,
            is_active INTEGER NOT NULL DEFAULT 1,
            updated_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS sales_imports (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            source_filename TEXT NOT NULL,
            sale_date TEXT NOT NULL,
            declared_totals TEXT NOT NULL,
            status TEXT NOT NULL,
            error_message TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS sales_lines (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            import_id INTEGER NOT NULL,
            line_number INTEGER NOT NULL,
            description TEXT NOT NULL,
            raw_quantity TEXT,
            raw_unit_price TEXT,
            line_total TEXT NOT NULL,
            quantity TEXT,
            unit_price TEXT,
            matched_item_id INTEGER,
            confidence INTEGER,
            status TEXT NOT NULL,
            manual_override INTEGER NOT NULL DEFAULT 0,
            inferred_quantity INTEGER NOT NULL DEFAULT 0,
            inference_reason TEXT,
            price_mismatch INTEGER NOT NULL DEFAULT 0,
            system_price TEXT,
            file_price TEXT,
            original_quantity TEXT,
            unmatched_reason TEXT,
            UNIQUE (import_id, line_number),
            FOREIGN KEY (import_id) REFERENCES sales_imports(id) ON DELETE CASCADE,
            FOREIGN KEY (matched_item_id) REFERENCES catalog_items(id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS sale_records (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            import_id INTEGER NOT NULL,
            line_id INTEGER NOT NULL UNIQUE,
            catalog_item_id INTEGER NOT NULL,
            quantity TEXT NOT NULL,
            unit_price TEXT NOT NULL,
            line_total TEXT NOT NULL,
            sale_date TEXT NOT NULL,
            created_at TEXT NOT NULL,
            FOREIGN KEY (import_id) REFERENCES sales_imports(id),
            FOREIGN KEY (line_id) REFERENCES sales_lines(id),
            FOREIGN KEY (catalog_item_id) REFERENCES catalog_items(id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_sales_lines_import ON sales_lines(import_id)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_sale_records_import ON sale_records(import_id)")
        .execute(pool)
        .await?;

    Ok(())
}
