use std::collections::BTreeMap;
use std::sync::Arc;

use dashmap::DashMap;
use tracing::info;

use super::schema::{CollationInfo, Database, RegionInfo, Table};
use super::MetadataProvider;

/// In-memory metadata store.
pub struct CatalogManager {
    databases: DashMap<String, Arc<Database>>,
    regions: DashMap<(String, String), Vec<RegionInfo>>,
    variables: BTreeMap<String, String>,
    collations: Vec<CollationInfo>,
    version_comment: String,
}

impl CatalogManager {
    pub fn new() -> Self {
        Self {
            databases: DashMap::new(),
            regions: DashMap::new(),
            variables: default_variables(),
            collations: default_collations(),
            version_comment: "sqlproxy-fe".to_string(),
        }
    }

    /// Catalog holding the system databases every client expects.
    pub fn with_system_databases() -> Self {
        let catalog = Self::new();
        catalog.add_database(Database::new("information_schema"));
        catalog.add_database(Database::new("mysql"));
        catalog
    }

    pub fn with_version_comment(mut self, comment: impl Into<String>) -> Self {
        self.version_comment = comment.into();
        self.variables
            .insert("version_comment".to_string(), self.version_comment.clone());
        self
    }

    pub fn add_database(&self, db: Database) {
        let name = db.name.clone();
        info!(database = %name, tables = db.tables.len(), "adding database to catalog");
        self.databases.insert(name, Arc::new(db));
    }

    pub fn get_database(&self, name: &str) -> Option<Arc<Database>> {
        self.databases.get(name).map(|entry| entry.value().clone())
    }

    pub fn set_regions(&self, db_name: &str, table_name: &str, regions: Vec<RegionInfo>) {
        self.regions
            .insert((db_name.to_string(), table_name.to_string()), regions);
    }
}

impl Default for CatalogManager {
    fn default() -> Self {
        Self::new()
    }
}

impl MetadataProvider for CatalogManager {
    fn list_databases(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .databases
            .iter()
            .map(|entry| entry.key().clone())
            .collect();
        names.sort();
        names
    }

    fn database_exists(&self, name: &str) -> bool {
        self.databases.contains_key(name)
    }

    fn list_tables(&self, database: &str) -> Option<Vec<Table>> {
        let db = self.get_database(database)?;
        Some(db.tables.values().cloned().collect())
    }

    fn get_table(&self, database: &str, table: &str) -> Option<Table> {
        self.get_database(database)?.get_table(table).cloned()
    }

    fn regions(&self, database: &str, table: &str) -> Vec<RegionInfo> {
        self.regions
            .get(&(database.to_string(), table.to_string()))
            .map(|entry| entry.value().clone())
            .unwrap_or_default()
    }

    fn server_variables(&self) -> BTreeMap<String, String> {
        self.variables.clone()
    }

    fn collations(&self) -> Vec<CollationInfo> {
        self.collations.clone()
    }

    fn version_comment(&self) -> String {
        self.version_comment.clone()
    }
}

fn default_variables() -> BTreeMap<String, String> {
    [
        ("auto_increment_increment", "1"),
        ("autocommit", "ON"),
        ("character_set_client", "utf8"),
        ("character_set_connection", "utf8"),
        ("character_set_results", "utf8"),
        ("character_set_server", "utf8"),
        ("collation_connection", "utf8_general_ci"),
        ("collation_server", "utf8_general_ci"),
        ("interactive_timeout", "28800"),
        ("lower_case_table_names", "0"),
        ("max_allowed_packet", "67108864"),
        ("net_write_timeout", "60"),
        ("sql_mode", ""),
        ("system_time_zone", "UTC"),
        ("time_zone", "SYSTEM"),
        ("transaction_isolation", "REPEATABLE-READ"),
        ("tx_isolation", "REPEATABLE-READ"),
        ("version", "5.7.99"),
        ("version_comment", "sqlproxy-fe"),
        ("wait_timeout", "28800"),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v.to_string()))
    .collect()
}

fn default_collations() -> Vec<CollationInfo> {
    vec![
        CollationInfo::new("utf8_general_ci", "utf8", 33, true),
        CollationInfo::new("utf8_bin", "utf8", 83, false),
        CollationInfo::new("utf8mb4_general_ci", "utf8mb4", 45, true),
        CollationInfo::new("utf8mb4_bin", "utf8mb4", 46, false),
        CollationInfo::new("latin1_swedish_ci", "latin1", 8, true),
        CollationInfo::new("binary", "binary", 63, true),
    ]
}
