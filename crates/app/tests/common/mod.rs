#![allow(dead_code)]

use chrono::NaiveDate;
use comanda::Reconciler;
use comanda_core::{
    CatalogItem, DeclaredTotals, ImportHeader, Money, NewCatalogItem, RawSalesLine, ReconcileConfig,
};
use comanda_storage::{create_db, insert_catalog_item, DbPool};
use rust_decimal::Decimal;
use tempfile::TempDir;

pub struct Harness {
    _dir: TempDir,
    pub pool: DbPool,
    pub reconciler: Reconciler,
    pub bitoque: CatalogItem,
    pub prego: CatalogItem,
}

impl Harness {
    pub async fn new() -> Self {
        Self::with_config(ReconcileConfig::default()).await
    }

    pub async fn with_config(config: ReconcileConfig) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let pool = create_db(&dir.path().join("comanda.db")).await.unwrap();
        let bitoque = insert_catalog_item(&pool, &item("Bitoque", 800)).await.unwrap();
        let prego = insert_catalog_item(&pool, &item("Prego no Pão", 650)).await.unwrap();
        let reconciler = Reconciler::new(pool.clone(), config);
        Harness { _dir: dir, pool, reconciler, bitoque, prego }
    }

    /// A second orchestrator over the same database.
    pub fn reconciler_with(&self, config: ReconcileConfig) -> Reconciler {
        Reconciler::new(self.pool.clone(), config)
    }
}

pub fn item(name: &str, cents: i64) -> NewCatalogItem {
    NewCatalogItem { name: name.to_string(), aliases: vec![], price: Money::from_cents(cents) }
}

pub fn header(gross_cents: Option<i64>) -> ImportHeader {
    ImportHeader {
        source_filename: "zreport-2026-10-17.pdf".to_string(),
        sale_date: NaiveDate::from_ymd_opt(2026, 10, 17).unwrap(),
        totals: DeclaredTotals {
            gross: gross_cents.map(Money::from_cents),
            ..DeclaredTotals::default()
        },
    }
}

pub fn line(number: u32, description: &str, quantity: Option<i64>, unit_cents: Option<i64>, total_cents: i64) -> RawSalesLine {
    RawSalesLine {
        line_number: number,
        description: description.to_string(),
        quantity: quantity.map(Decimal::from),
        unit_price: unit_cents.map(Money::from_cents),
        line_total: Money::from_cents(total_cents),
    }
}

/// Exact match, typo, and a line with nothing in common with the catalog.
pub fn three_lines() -> Vec<RawSalesLine> {
    vec![
        line(1, "Bitoque", Some(1), Some(800), 800),
        line(2, "bitok", Some(1), Some(800), 800),
        line(3, "Água das Pedras", Some(1), Some(200), 200),
    ]
}
