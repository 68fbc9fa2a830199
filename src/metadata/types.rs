use std::fmt;

use serde::{Deserialize, Serialize};

use crate::mysql::protocol::ColumnType;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum DataType {
    // Integer types
    TinyInt,
    SmallInt,
    Int,
    BigInt,

    // Floating point
    Float,
    Double,
    Decimal { precision: u8, scale: u8 },

    // String types
    Char { length: u32 },
    Varchar { length: u32 },
    String,
    Text,

    // Date/Time
    Date,
    DateTime,
    Timestamp,

    Boolean,

    // Binary
    Binary,
    Varbinary { length: u32 },

    Json,
}

impl DataType {
    pub fn to_column_type(&self) -> ColumnType {
        match self {
            DataType::TinyInt | DataType::Boolean => ColumnType::Tiny,
            DataType::SmallInt => ColumnType::Short,
            DataType::Int => ColumnType::Long,
            DataType::BigInt => ColumnType::LongLong,
            DataType::Float => ColumnType::Float,
            DataType::Double => ColumnType::Double,
            DataType::Decimal { .. } => ColumnType::NewDecimal,
            DataType::Char { .. } => ColumnType::String,
            DataType::Varchar { .. } => ColumnType::VarChar,
            DataType::String => ColumnType::VarString,
            DataType::Text | DataType::Binary | DataType::Varbinary { .. } => ColumnType::Blob,
            DataType::Date => ColumnType::Date,
            DataType::DateTime => ColumnType::DateTime,
            DataType::Timestamp => ColumnType::Timestamp,
            DataType::Json => ColumnType::Json,
        }
    }

    pub fn default_length(&self) -> u32 {
        match self {
            DataType::TinyInt => 4,
            DataType::SmallInt => 6,
            DataType::Int => 11,
            DataType::BigInt => 20,
            DataType::Float => 12,
            DataType::Double => 22,
            DataType::Decimal { precision, scale } => *precision as u32 + *scale as u32 + 2,
            DataType::Char { length } => *length,
            DataType::Varchar { length } => *length,
            DataType::String | DataType::Text | DataType::Json => 65535,
            DataType::Date => 10,
            DataType::DateTime | DataType::Timestamp => 19,
            DataType::Boolean => 1,
            DataType::Binary => 255,
            DataType::Varbinary { length } => *length,
        }
    }
}

/// SQL spelling used by `SHOW CREATE TABLE` and `SHOW FULL COLUMNS`.
impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DataType::TinyInt => write!(f, "tinyint(4)"),
            DataType::SmallInt => write!(f, "smallint(6)"),
            DataType::Int => write!(f, "int(11)"),
            DataType::BigInt => write!(f, "bigint(20)"),
            DataType::Float => write!(f, "float"),
            DataType::Double => write!(f, "double"),
            DataType::Decimal { precision, scale } => write!(f, "decimal({},{})", precision, scale),
            DataType::Char { length } => write!(f, "char({})", length),
            DataType::Varchar { length } => write!(f, "varchar({})", length),
            DataType::String => write!(f, "string"),
            DataType::Text => write!(f, "text"),
            DataType::Date => write!(f, "date"),
            DataType::DateTime => write!(f, "datetime"),
            DataType::Timestamp => write!(f, "timestamp"),
            DataType::Boolean => write!(f, "boolean"),
            DataType::Binary => write!(f, "binary"),
            DataType::Varbinary { length } => write!(f, "varbinary({})", length),
            DataType::Json => write!(f, "json"),
        }
    }
}
