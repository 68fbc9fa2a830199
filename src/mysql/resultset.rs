//! Result set encoding.
//!
//! Encodes query results into MySQL text-protocol payloads:
//! 1. Column count
//! 2. Column definitions (one per field)
//! 3. EOF (skipped under CLIENT_DEPRECATE_EOF)
//! 4. Rows
//! 5. EOF, or OK with a 0xFE header under CLIENT_DEPRECATE_EOF
//!
//! Encoding is pure: it returns payloads and the caller hands them to the
//! framer, which assigns sequence ids.

use bytes::{BufMut, Bytes, BytesMut};

use crate::error::ProxyError;
use super::packet::{ColumnDefinition, EofPacket, ErrPacket, OkPacket, ResultRow};
use super::protocol::*;

/// Column metadata.
#[derive(Debug, Clone, PartialEq)]
pub struct ResultField {
    pub name: String,
    pub column_type: ColumnType,
    pub nullable: bool,
    /// Owning `(schema, table)` for columns that come from a catalog table.
    pub origin: Option<(String, String)>,
}

impl ResultField {
    pub fn new(name: impl Into<String>, column_type: ColumnType) -> Self {
        Self {
            name: name.into(),
            column_type,
            nullable: true,
            origin: None,
        }
    }

    pub fn not_null(mut self) -> Self {
        self.nullable = false;
        self
    }

    pub fn from_table(mut self, schema: impl Into<String>, table: impl Into<String>) -> Self {
        self.origin = Some((schema.into(), table.into()));
        self
    }

    pub fn to_column_definition(&self) -> ColumnDefinition {
        let mut column = ColumnDefinition::new(self.name.clone(), self.column_type);
        if let Some((schema, table)) = &self.origin {
            column = column.with_table(schema, table);
        }
        if !self.nullable {
            column.flags |= NOT_NULL_FLAG;
        }
        column
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ResultEncoder {
    deprecate_eof: bool,
}

impl ResultEncoder {
    pub fn new(client_capabilities: u32) -> Self {
        Self {
            deprecate_eof: client_capabilities & server_capabilities() & CLIENT_DEPRECATE_EOF != 0,
        }
    }

    pub fn encode(
        &self,
        fields: &[ResultField],
        rows: &[ResultRow],
        status_flags: u16,
        warnings: u16,
    ) -> Vec<Bytes> {
        let mut payloads = Vec::with_capacity(fields.len() + rows.len() + 3);

        let mut count = BytesMut::with_capacity(9);
        write_lenenc_int(&mut count, fields.len() as u64);
        payloads.push(count.freeze());

        for field in fields {
            payloads.push(field.to_column_definition().encode());
        }

        if !self.deprecate_eof {
            payloads.push(EofPacket::new(warnings, status_flags).encode());
        }

        for row in rows {
            debug_assert_eq!(row.values.len(), fields.len());
            payloads.push(row.encode());
        }

        if self.deprecate_eof {
            let ok = OkPacket {
                affected_rows: rows.len() as u64,
                last_insert_id: 0,
                status_flags,
                warnings,
                info: String::new(),
            };
            payloads.push(ok.encode_as_eof());
        } else {
            payloads.push(EofPacket::new(warnings, status_flags).encode());
        }

        payloads
    }

    /// Response to `COM_FIELD_LIST`: column definitions and a terminator,
    /// without the column count.
    pub fn encode_field_list(&self, fields: &[ResultField], status_flags: u16) -> Vec<Bytes> {
        let mut payloads: Vec<Bytes> = fields
            .iter()
            .map(|f| f.to_column_definition().encode_for_field_list())
            .collect();

        if self.deprecate_eof {
            let ok = OkPacket { status_flags, ..OkPacket::new() };
            payloads.push(ok.encode_as_eof());
        } else {
            payloads.push(EofPacket::new(0, status_flags).encode());
        }
        payloads
    }

    pub fn encode_ok(&self, affected_rows: u64, last_insert_id: u64, status_flags: u16) -> Bytes {
        OkPacket {
            affected_rows,
            last_insert_id,
            status_flags,
            warnings: 0,
            info: String::new(),
        }
        .encode()
    }

    pub fn encode_error(&self, error: &ProxyError) -> Bytes {
        let (code, sql_state) = error.mysql_error();
        let message = match error {
            ProxyError::Planner(e) => e.message.clone(),
            other => other.to_string(),
        };
        ErrPacket::new(code, sql_state, message).encode()
    }

    /// Plain-text reply used by `COM_STATISTICS`.
    pub fn encode_text(&self, text: &str) -> Bytes {
        let mut buf = BytesMut::with_capacity(text.len());
        buf.put_slice(text.as_bytes());
        buf.freeze()
    }
}
