use serde::{Deserialize, Serialize};
use std::fmt;

use super::money::Money;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct CatalogItemId(pub i64);

impl fmt::Display for CatalogItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A menu item as owned by the catalog store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogItem {
    pub id: CatalogItemId,
    pub name: String,
    #[serde(default)]
    pub aliases: Vec<String>,
    pub price: Money,
}

impl CatalogItem {
    pub fn new(id: i64, name: &str, price: Money) -> Self {
        CatalogItem {
            id: CatalogItemId(id),
            name: name.to_string(),
            aliases: Vec::new(),
            price,
        }
    }

    pub fn with_aliases<I, S>(mut self, aliases: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.aliases = aliases.into_iter().map(Into::into).collect();
        self
    }
}

/// Input for creating or replacing a catalog item.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewCatalogItem {
    pub name: String,
    #[serde(default)]
    pub aliases: Vec<String>,
    pub price: Money,
}
