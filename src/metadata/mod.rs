pub mod catalog;
pub mod schema;
pub mod types;

use std::collections::BTreeMap;

pub use catalog::CatalogManager;
pub use schema::{CollationInfo, ColumnDef, Database, RegionInfo, Table};
pub use types::DataType;

/// Read-only view of cluster metadata consulted by the builtin commands.
pub trait MetadataProvider: Send + Sync {
    /// Database names, sorted.
    fn list_databases(&self) -> Vec<String>;

    fn database_exists(&self, name: &str) -> bool;

    /// `None` when the database does not exist.
    fn list_tables(&self, database: &str) -> Option<Vec<Table>>;

    fn get_table(&self, database: &str, table: &str) -> Option<Table>;

    fn regions(&self, database: &str, table: &str) -> Vec<RegionInfo>;

    fn server_variables(&self) -> BTreeMap<String, String>;

    fn collations(&self) -> Vec<CollationInfo>;

    fn version_comment(&self) -> String;
}
