use std::collections::HashMap;

use comanda_core::{CatalogItem, CatalogItemId};

use crate::normalize::normalize;

/// One searchable spelling of an item: its display name or one alias.
#[derive(Debug, Clone)]
pub(crate) struct IndexedForm {
    pub alias: Option<String>,
    pub tokens: Vec<String>,
    pub phrase: String,
}

#[derive(Debug, Clone)]
pub(crate) struct IndexedItem {
    pub item: CatalogItem,
    pub forms: Vec<IndexedForm>,
}

/// Read-only snapshot of the active catalog with names pre-normalized.
///
/// Built once per operation from the catalog store and shared by reference;
/// nothing in the engine mutates it.
#[derive(Debug, Clone, Default)]
pub struct CatalogIndex {
    items: Vec<IndexedItem>,
    by_id: HashMap<CatalogItemId, usize>,
}

impl CatalogIndex {
    pub fn new(items: Vec<CatalogItem>) -> Self {
        let mut indexed: Vec<IndexedItem> = items
            .into_iter()
            .map(|item| {
                let mut forms = vec![form(None, &item.name)];
                forms.extend(
                    item.aliases
                        .iter()
                        .map(|alias| form(Some(alias.clone()), alias)),
                );
                IndexedItem { item, forms }
            })
            .collect();
        indexed.sort_by_key(|i| i.item.id);

        let by_id = indexed
            .iter()
            .enumerate()
            .map(|(idx, i)| (i.item.id, idx))
            .collect();

        Self { items: indexed, by_id }
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn get(&self, id: CatalogItemId) -> Option<&CatalogItem> {
        self.by_id.get(&id).map(|&idx| &self.items[idx].item)
    }

    pub fn items(&self) -> impl Iterator<Item = &CatalogItem> {
        self.items.iter().map(|i| &i.item)
    }

    pub(crate) fn indexed(&self) -> &[IndexedItem] {
        &self.items
    }
}

fn form(alias: Option<String>, text: &str) -> IndexedForm {
    let mut tokens = normalize(text);
    let phrase = tokens.join(" ");
    let mut seen = std::collections::HashSet::new();
    tokens.retain(|t| seen.insert(t.clone()));
    IndexedForm { alias, tokens, phrase }
}
