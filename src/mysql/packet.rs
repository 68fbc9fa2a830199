use bytes::{Buf, BufMut, Bytes, BytesMut};
use rand::distributions::Alphanumeric;
use rand::Rng;

use crate::error::{ProxyError, Result};
use super::protocol::*;

/// One wire frame: payload plus the sequence id from its header.
#[derive(Debug, Clone)]
pub struct Packet {
    pub sequence_id: u8,
    pub payload: Bytes,
}

impl Packet {
    pub fn new(sequence_id: u8, payload: Bytes) -> Self {
        Self { sequence_id, payload }
    }

    /// Encodes a single frame. Payloads longer than `MAX_PAYLOAD_LEN` go
    /// through `PacketFramer::queue_payload`, which splits them.
    pub fn encode(&self) -> BytesMut {
        let mut buf = BytesMut::with_capacity(4 + self.payload.len());
        put_header(&mut buf, self.payload.len(), self.sequence_id);
        buf.put_slice(&self.payload);
        buf
    }

    pub fn decode(buf: &mut BytesMut) -> Result<Option<Self>> {
        if buf.len() < 4 {
            return Ok(None);
        }

        let (len, sequence_id) = parse_header(&buf[..4]);

        if buf.len() < 4 + len {
            return Ok(None);
        }

        buf.advance(4);
        let payload = buf.split_to(len).freeze();

        Ok(Some(Packet { sequence_id, payload }))
    }
}

pub fn put_header(buf: &mut BytesMut, len: usize, sequence_id: u8) {
    debug_assert!(len <= MAX_PAYLOAD_LEN);
    buf.put_uint_le(len as u64, 3);
    buf.put_u8(sequence_id);
}

pub fn parse_header(header: &[u8]) -> (usize, u8) {
    let len = (header[0] as usize) | ((header[1] as usize) << 8) | ((header[2] as usize) << 16);
    (len, header[3])
}

/// Protocol-10 greeting sent as soon as a client connects.
pub struct HandshakePacket {
    pub protocol_version: u8,
    pub server_version: String,
    pub connection_id: u32,
    pub auth_plugin_data: Vec<u8>,
    pub capability_flags: u32,
    pub character_set: u8,
    pub status_flags: u16,
    pub auth_plugin_name: String,
}

impl HandshakePacket {
    pub fn new(connection_id: u32, server_version: &str) -> Self {
        let auth_plugin_data: Vec<u8> = rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(SCRAMBLE_LEN)
            .collect();

        Self {
            protocol_version: PROTOCOL_VERSION,
            server_version: server_version.to_string(),
            connection_id,
            auth_plugin_data,
            capability_flags: server_capabilities(),
            character_set: UTF8_GENERAL_CI,
            status_flags: SERVER_STATUS_AUTOCOMMIT,
            auth_plugin_name: AUTH_PLUGIN_NAME.to_string(),
        }
    }

    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::new();

        buf.put_u8(self.protocol_version);
        write_null_terminated_str(&mut buf, &self.server_version);
        buf.put_u32_le(self.connection_id);

        // first 8 salt bytes, NUL
        buf.put_slice(&self.auth_plugin_data[0..8]);
        buf.put_u8(0);

        buf.put_u16_le((self.capability_flags & 0xffff) as u16);
        buf.put_u8(self.character_set);
        buf.put_u16_le(self.status_flags);
        // high capability word
        buf.put_u16_le(((self.capability_flags >> 16) & 0xffff) as u16);

        buf.put_u8(self.auth_plugin_data.len() as u8 + 1);
        buf.put_bytes(0, 10);

        // rest of the salt, NUL
        buf.put_slice(&self.auth_plugin_data[8..SCRAMBLE_LEN]);
        buf.put_u8(0);

        write_null_terminated_str(&mut buf, &self.auth_plugin_name);

        buf.freeze()
    }

    pub fn salt(&self) -> &[u8] {
        &self.auth_plugin_data
    }
}

/// Login request answering the greeting.
#[derive(Debug)]
pub struct HandshakeResponse {
    pub capability_flags: u32,
    pub max_packet_size: u32,
    pub character_set: u8,
    pub username: String,
    pub auth_response: Vec<u8>,
    pub database: Option<String>,
    pub auth_plugin_name: Option<String>,
}

impl HandshakeResponse {
    pub fn decode(mut payload: Bytes) -> Result<Self> {
        if payload.len() < 32 {
            return Err(ProxyError::InvalidPacket("Handshake response too short".to_string()));
        }

        let capability_flags = payload.get_u32_le();
        let max_packet_size = payload.get_u32_le();
        let character_set = payload.get_u8();

        payload.advance(23);

        let username = read_null_terminated_string(&mut payload)
            .ok_or_else(|| ProxyError::InvalidPacket("Invalid username".to_string()))?;

        let auth_response = if capability_flags & CLIENT_PLUGIN_AUTH_LENENC_CLIENT_DATA != 0 {
            let len = read_lenenc_int(&mut payload)
                .ok_or_else(|| ProxyError::InvalidPacket("Invalid auth response length".to_string()))? as usize;
            if payload.remaining() < len {
                return Err(ProxyError::InvalidPacket("Auth response too short".to_string()));
            }
            payload.copy_to_bytes(len).to_vec()
        } else if capability_flags & CLIENT_SECURE_CONNECTION != 0 {
            if !payload.has_remaining() {
                return Err(ProxyError::InvalidPacket("Missing auth response".to_string()));
            }
            let len = payload.get_u8() as usize;
            if payload.remaining() < len {
                return Err(ProxyError::InvalidPacket("Auth response too short".to_string()));
            }
            payload.copy_to_bytes(len).to_vec()
        } else {
            read_null_terminated_string(&mut payload)
                .ok_or_else(|| ProxyError::InvalidPacket("Invalid auth response".to_string()))?
                .into_bytes()
        };

        let database = if capability_flags & CLIENT_CONNECT_WITH_DB != 0 {
            read_null_terminated_string(&mut payload).filter(|db| !db.is_empty())
        } else {
            None
        };

        let auth_plugin_name = if capability_flags & CLIENT_PLUGIN_AUTH != 0 {
            read_null_terminated_string(&mut payload)
        } else {
            None
        };

        Ok(Self {
            capability_flags,
            max_packet_size,
            character_set,
            username,
            auth_response,
            database,
            auth_plugin_name,
        })
    }
}

pub struct OkPacket {
    pub affected_rows: u64,
    pub last_insert_id: u64,
    pub status_flags: u16,
    pub warnings: u16,
    pub info: String,
}

impl OkPacket {
    pub fn new() -> Self {
        Self {
            affected_rows: 0,
            last_insert_id: 0,
            status_flags: SERVER_STATUS_AUTOCOMMIT,
            warnings: 0,
            info: String::new(),
        }
    }

    pub fn encode(&self) -> Bytes {
        self.encode_with_header(OK_HEADER)
    }

    /// OK body under the EOF tag, ending a result set for deprecate-EOF clients.
    pub fn encode_as_eof(&self) -> Bytes {
        self.encode_with_header(EOF_HEADER)
    }

    fn encode_with_header(&self, header: u8) -> Bytes {
        let mut buf = BytesMut::new();

        buf.put_u8(header);
        write_lenenc_int(&mut buf, self.affected_rows);
        write_lenenc_int(&mut buf, self.last_insert_id);
        buf.put_u16_le(self.status_flags);
        buf.put_u16_le(self.warnings);

        if !self.info.is_empty() {
            buf.put_slice(self.info.as_bytes());
        }

        buf.freeze()
    }
}

impl Default for OkPacket {
    fn default() -> Self {
        Self::new()
    }
}

pub struct ErrPacket {
    pub error_code: u16,
    pub sql_state: String,
    pub error_message: String,
}

impl ErrPacket {
    pub fn new(error_code: u16, sql_state: &str, error_message: String) -> Self {
        let sql_state = if sql_state.len() == 5 { sql_state } else { "HY000" };
        Self {
            error_code,
            sql_state: sql_state.to_string(),
            error_message,
        }
    }

    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::new();

        buf.put_u8(ERR_HEADER);
        buf.put_u16_le(self.error_code);
        buf.put_u8(b'#'); // SQL state marker
        buf.put_slice(self.sql_state.as_bytes());
        buf.put_slice(self.error_message.as_bytes());

        buf.freeze()
    }
}

pub struct EofPacket {
    pub warnings: u16,
    pub status_flags: u16,
}

impl EofPacket {
    pub fn new(warnings: u16, status_flags: u16) -> Self {
        Self { warnings, status_flags }
    }

    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(5);

        buf.put_u8(EOF_HEADER);
        buf.put_u16_le(self.warnings);
        buf.put_u16_le(self.status_flags);

        buf.freeze()
    }
}

/// Protocol-41 column metadata.
#[derive(Debug, Clone)]
pub struct ColumnDefinition {
    pub catalog: String,
    pub schema: String,
    pub table: String,
    pub org_table: String,
    pub name: String,
    pub org_name: String,
    pub character_set: u16,
    pub column_length: u32,
    pub column_type: ColumnType,
    pub flags: u16,
    pub decimals: u8,
}

impl ColumnDefinition {
    pub fn new(name: String, column_type: ColumnType) -> Self {
        let mut flags = 0;
        if column_type.is_numeric() {
            flags |= NUM_FLAG | BINARY_FLAG;
        }
        Self {
            catalog: "def".to_string(),
            schema: String::new(),
            table: String::new(),
            org_table: String::new(),
            name: name.clone(),
            org_name: name,
            character_set: if column_type.is_numeric() {
                BINARY_CHARSET as u16
            } else {
                UTF8_GENERAL_CI as u16
            },
            column_length: column_type.default_length(),
            column_type,
            flags,
            decimals: 0,
        }
    }

    pub fn with_table(mut self, schema: &str, table: &str) -> Self {
        self.schema = schema.to_string();
        self.table = table.to_string();
        self.org_table = table.to_string();
        self
    }

    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::new();
        self.encode_into(&mut buf);
        buf.freeze()
    }

    /// `COM_FIELD_LIST` responses carry a trailing (empty) default value.
    pub fn encode_for_field_list(&self) -> Bytes {
        let mut buf = BytesMut::new();
        self.encode_into(&mut buf);
        buf.put_u8(NULL_MARKER);
        buf.freeze()
    }

    fn encode_into(&self, buf: &mut BytesMut) {
        write_lenenc_str(buf, &self.catalog);
        write_lenenc_str(buf, &self.schema);
        write_lenenc_str(buf, &self.table);
        write_lenenc_str(buf, &self.org_table);
        write_lenenc_str(buf, &self.name);
        write_lenenc_str(buf, &self.org_name);

        // fixed tail is always 12 bytes
        write_lenenc_int(buf, 0x0c);

        buf.put_u16_le(self.character_set);
        buf.put_u32_le(self.column_length);
        buf.put_u8(self.column_type as u8);
        buf.put_u16_le(self.flags);
        buf.put_u8(self.decimals);

        buf.put_u16(0);
    }
}

/// Text-protocol row; `None` cells go out as NULL.
#[derive(Debug, Clone, PartialEq)]
pub struct ResultRow {
    pub values: Vec<Option<String>>,
}

impl ResultRow {
    pub fn new(values: Vec<Option<String>>) -> Self {
        Self { values }
    }

    /// Row of non-null cells.
    pub fn from_strings<I, S>(values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            values: values.into_iter().map(|v| Some(v.into())).collect(),
        }
    }

    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::new();

        for value in &self.values {
            match value {
                Some(v) => write_lenenc_str(&mut buf, v),
                None => buf.put_u8(NULL_MARKER),
            }
        }

        buf.freeze()
    }
}
