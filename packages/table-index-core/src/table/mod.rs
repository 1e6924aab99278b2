//! Queryable table index: physical tables, typed cells, and the index store.

mod cell;
mod store;
#[allow(clippy::module_inception)]
mod table;
pub(crate) mod validation;

pub use cell::CellValue;
pub use store::{InMemoryTableIndex, IndexSnapshot, TableIndexStore};
pub use table::{IndexTable, IndexedRow};
