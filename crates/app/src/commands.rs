use std::path::Path;

use anyhow::Context;
use comanda::Reconciler;
use comanda_core::{CatalogItemId, ImportHeader, ImportId, LineId, NewCatalogItem, RawSalesLine};
use serde::{Deserialize, Serialize};

/// A parsed sales export as handed over by the document extractors.
#[derive(Debug, Deserialize)]
pub struct StageFile {
    #[serde(flatten)]
    pub header: ImportHeader,
    pub lines: Vec<RawSalesLine>,
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> anyhow::Result<T> {
    let content = std::fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))?;
    serde_json::from_str(&content).with_context(|| format!("Failed to parse {}", path.display()))
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

pub async fn stage(reconciler: &Reconciler, file: &Path) -> anyhow::Result<()> {
    let input: StageFile = read_json(file)?;
    let import = reconciler.stage_import(input.header, input.lines).await?;
    print_json(&reconciler.summary(import.id).await?)
}

pub async fn imports(reconciler: &Reconciler) -> anyhow::Result<()> {
    print_json(&reconciler.list_imports().await?)
}

pub async fn lines(reconciler: &Reconciler, import: i64) -> anyhow::Result<()> {
    print_json(&reconciler.lines(ImportId(import)).await?)
}

pub async fn suggest(reconciler: &Reconciler, import: i64, line: i64, query: Option<&str>) -> anyhow::Result<()> {
    let suggestions = reconciler
        .suggest_matches(ImportId(import), LineId(line), query)
        .await?;
    print_json(&suggestions)
}

pub async fn set_match(reconciler: &Reconciler, import: i64, line: i64, item: i64) -> anyhow::Result<()> {
    let line = reconciler
        .set_match(ImportId(import), LineId(line), CatalogItemId(item))
        .await?;
    print_json(&line)
}

pub async fn clear_match(reconciler: &Reconciler, import: i64, line: i64) -> anyhow::Result<()> {
    print_json(&reconciler.clear_match(ImportId(import), LineId(line)).await?)
}

pub async fn rematch(reconciler: &Reconciler, import: i64) -> anyhow::Result<()> {
    print_json(&reconciler.rematch(ImportId(import)).await?)
}

pub async fn approve(reconciler: &Reconciler, import: i64, sync: &[i64]) -> anyhow::Result<()> {
    let selection: Vec<CatalogItemId> = sync.iter().copied().map(CatalogItemId).collect();
    let outcome = reconciler.approve(ImportId(import), &selection).await?;
    if outcome.has_warnings() {
        eprintln!("{} unmatched lines were skipped", outcome.skipped_count);
    }
    print_json(&outcome)
}

pub async fn reject(reconciler: &Reconciler, import: i64) -> anyhow::Result<()> {
    reconciler.reject(ImportId(import)).await?;
    print_json(&reconciler.get_import(ImportId(import)).await?)
}

pub async fn summary(reconciler: &Reconciler, import: i64) -> anyhow::Result<()> {
    print_json(&reconciler.summary(ImportId(import)).await?)
}

pub async fn catalog_import(reconciler: &Reconciler, file: &Path) -> anyhow::Result<()> {
    let items: Vec<NewCatalogItem> = read_json(file)?;
    let mut created = Vec::with_capacity(items.len());
    for item in &items {
        created.push(comanda_storage::insert_catalog_item(reconciler.db(), item).await?);
    }
    tracing::info!("Imported {} catalog items", created.len());
    print_json(&created)
}
