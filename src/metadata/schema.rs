use std::collections::BTreeMap;
use std::fmt::Write as _;

use serde::{Deserialize, Serialize};

use crate::mysql::resultset::ResultField;
use super::types::DataType;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ColumnDef {
    pub name: String,
    pub data_type: DataType,
    pub nullable: bool,
    pub default_value: Option<String>,
    pub comment: Option<String>,
    pub auto_increment: bool,
    pub primary_key: bool,
}

impl ColumnDef {
    pub fn new(name: impl Into<String>, data_type: DataType) -> Self {
        Self {
            name: name.into(),
            data_type,
            nullable: true,
            default_value: None,
            comment: None,
            auto_increment: false,
            primary_key: false,
        }
    }

    pub fn not_null(mut self) -> Self {
        self.nullable = false;
        self
    }

    pub fn primary_key(mut self) -> Self {
        self.primary_key = true;
        self.nullable = false;
        self
    }

    pub fn default(mut self, value: impl Into<String>) -> Self {
        self.default_value = Some(value.into());
        self
    }

    pub fn comment(mut self, comment: impl Into<String>) -> Self {
        self.comment = Some(comment.into());
        self
    }

    pub fn auto_increment(mut self) -> Self {
        self.auto_increment = true;
        self
    }

    pub fn to_result_field(&self) -> ResultField {
        let field = ResultField::new(self.name.clone(), self.data_type.to_column_type());
        if self.nullable {
            field
        } else {
            field.not_null()
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Table {
    pub name: String,
    pub columns: Vec<ColumnDef>,
    pub primary_keys: Vec<String>,
    pub engine: String,
    pub comment: Option<String>,
    pub row_count: u64,
}

impl Table {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            columns: Vec::new(),
            primary_keys: Vec::new(),
            engine: "InnoDB".to_string(),
            comment: None,
            row_count: 0,
        }
    }

    pub fn add_column(mut self, column: ColumnDef) -> Self {
        if column.primary_key && !self.primary_keys.contains(&column.name) {
            self.primary_keys.push(column.name.clone());
        }
        self.columns.push(column);
        self
    }

    pub fn with_columns(mut self, columns: Vec<ColumnDef>) -> Self {
        for column in columns {
            self = self.add_column(column);
        }
        self
    }

    pub fn with_comment(mut self, comment: impl Into<String>) -> Self {
        self.comment = Some(comment.into());
        self
    }

    /// `CREATE TABLE` statement reconstructed from the schema.
    pub fn create_statement(&self) -> String {
        let mut sql = format!("CREATE TABLE `{}` (\n", self.name);

        let mut lines: Vec<String> = self
            .columns
            .iter()
            .map(|c| {
                let mut line = format!("  `{}` {}", c.name, c.data_type);
                if !c.nullable {
                    line.push_str(" NOT NULL");
                }
                if c.auto_increment {
                    line.push_str(" AUTO_INCREMENT");
                }
                if let Some(default) = &c.default_value {
                    let _ = write!(line, " DEFAULT '{}'", default);
                }
                if let Some(comment) = &c.comment {
                    let _ = write!(line, " COMMENT '{}'", comment);
                }
                line
            })
            .collect();

        if !self.primary_keys.is_empty() {
            let keys: Vec<String> = self.primary_keys.iter().map(|k| format!("`{}`", k)).collect();
            lines.push(format!("  PRIMARY KEY ({})", keys.join(", ")));
        }

        sql.push_str(&lines.join(",\n"));
        let _ = write!(sql, "\n) ENGINE={}", self.engine);
        if let Some(comment) = &self.comment {
            let _ = write!(sql, " COMMENT='{}'", comment);
        }
        sql
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Database {
    pub name: String,
    pub tables: BTreeMap<String, Table>,
    pub comment: Option<String>,
}

impl Database {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            tables: BTreeMap::new(),
            comment: None,
        }
    }

    pub fn with_table(mut self, table: Table) -> Self {
        self.add_table(table);
        self
    }

    pub fn add_table(&mut self, table: Table) {
        self.tables.insert(table.name.clone(), table);
    }

    pub fn get_table(&self, name: &str) -> Option<&Table> {
        self.tables.get(name)
    }
}

/// Placement of one key range of a table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegionInfo {
    pub region_id: u64,
    pub table: String,
    pub start_key: String,
    pub end_key: String,
    pub leader: String,
    pub peers: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollationInfo {
    pub collation: String,
    pub charset: String,
    pub id: u16,
    pub is_default: bool,
    pub compiled: bool,
    pub sortlen: u32,
}

impl CollationInfo {
    pub fn new(collation: &str, charset: &str, id: u16, is_default: bool) -> Self {
        Self {
            collation: collation.to_string(),
            charset: charset.to_string(),
            id,
            is_default,
            compiled: true,
            sortlen: 1,
        }
    }
}
