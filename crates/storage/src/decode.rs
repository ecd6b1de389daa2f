use comanda_core::Money;
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use std::str::FromStr;

use crate::error::{StorageError, StorageResult};

pub(crate) fn decimal(column: &'static str, value: &str) -> StorageResult<Decimal> {
    Decimal::from_str(value).map_err(|_| StorageError::InvalidDecimal {
        column,
        value: value.to_string(),
    })
}

pub(crate) fn opt_decimal(column: &'static str, value: Option<String>) -> StorageResult<Option<Decimal>> {
    value.map(|v| decimal(column, &v)).transpose()
}

pub(crate) fn money(column: &'static str, value: &str) -> StorageResult<Money> {
    decimal(column, value).map(Money::from_decimal)
}

pub(crate) fn opt_money(column: &'static str, value: Option<String>) -> StorageResult<Option<Money>> {
    value.map(|v| money(column, &v)).transpose()
}

pub(crate) fn parsed<T: FromStr>(column: &'static str, value: &str) -> StorageResult<T> {
    value.parse().map_err(|_| StorageError::InvalidStatus {
        column,
        value: value.to_string(),
    })
}

pub(crate) fn json<T: DeserializeOwned>(column: &'static str, value: &str) -> StorageResult<T> {
    serde_json::from_str(value).map_err(|e| StorageError::InvalidJson {
        column,
        message: e.to_string(),
    })
}
