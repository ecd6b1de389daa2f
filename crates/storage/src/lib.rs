pub mod catalog;
pub mod db;
mod decode;
pub mod error;
pub mod imports;
pub mod records;

pub use catalog::{
    deactivate_catalog_item, get_catalog_item, insert_catalog_item, list_active_catalog_items,
    update_catalog_item_price,
};
pub use db::{create_db, DbPool};
pub use error::{StorageError, StorageResult};
pub use imports::{
    begin_approval, compare_and_set_status, delete_lines, get_import, get_line, get_lines, insert_import,
    list_imports, mark_import_error, set_line_status, touch_if_reviewing, update_line_match,
};
pub use records::{count_sale_records, get_sale_records, insert_sale_record};
