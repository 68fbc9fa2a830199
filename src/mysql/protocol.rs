use bytes::{Buf, BufMut, Bytes, BytesMut};

// Largest payload a single frame can carry. A frame of exactly this length
// is continued by the next frame.
pub const MAX_PAYLOAD_LEN: usize = 0x00ff_ffff;

/// Inbound message limit once a client is authenticated; a smaller
/// `max_packet_size` from the handshake response lowers it.
pub const MAX_ALLOWED_PACKET: usize = 64 * 1024 * 1024;
/// Inbound limit before authentication. Covers user, schema, plugin name and
/// the 64 KiB connection-attribute block.
pub const MAX_HANDSHAKE_RESPONSE_LEN: usize = 96 * 1024;

pub const PROTOCOL_VERSION: u8 = 10;
pub const AUTH_PLUGIN_NAME: &str = "mysql_native_password";
pub const SCRAMBLE_LEN: usize = 20;

/// First payload byte of a client command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Sleep,
    Quit,
    InitDb,
    Query,
    FieldList,
    CreateDb,
    DropDb,
    Refresh,
    Statistics,
    ProcessInfo,
    Debug,
    Ping,
    ChangeUser,
    Unknown(u8),
}

impl From<u8> for Command {
    fn from(byte: u8) -> Self {
        match byte {
            COM_SLEEP => Command::Sleep,
            COM_QUIT => Command::Quit,
            COM_INIT_DB => Command::InitDb,
            COM_QUERY => Command::Query,
            COM_FIELD_LIST => Command::FieldList,
            COM_CREATE_DB => Command::CreateDb,
            COM_DROP_DB => Command::DropDb,
            COM_REFRESH => Command::Refresh,
            COM_STATISTICS => Command::Statistics,
            COM_PROCESS_INFO => Command::ProcessInfo,
            COM_DEBUG => Command::Debug,
            COM_PING => Command::Ping,
            COM_CHANGE_USER => Command::ChangeUser,
            b => Command::Unknown(b),
        }
    }
}

pub const COM_SLEEP: u8 = 0x00;
pub const COM_QUIT: u8 = 0x01;
pub const COM_INIT_DB: u8 = 0x02;
pub const COM_QUERY: u8 = 0x03;
pub const COM_FIELD_LIST: u8 = 0x04;
pub const COM_CREATE_DB: u8 = 0x05;
pub const COM_DROP_DB: u8 = 0x06;
pub const COM_REFRESH: u8 = 0x07;
pub const COM_STATISTICS: u8 = 0x09;
pub const COM_PROCESS_INFO: u8 = 0x0a;
pub const COM_DEBUG: u8 = 0x0d;
pub const COM_PING: u8 = 0x0e;
pub const COM_CHANGE_USER: u8 = 0x11;

// capability bits
pub const CLIENT_LONG_PASSWORD: u32 = 0x00000001;
pub const CLIENT_FOUND_ROWS: u32 = 0x00000002;
pub const CLIENT_LONG_FLAG: u32 = 0x00000004;
pub const CLIENT_CONNECT_WITH_DB: u32 = 0x00000008;
pub const CLIENT_NO_SCHEMA: u32 = 0x00000010;
pub const CLIENT_COMPRESS: u32 = 0x00000020;
pub const CLIENT_ODBC: u32 = 0x00000040;
pub const CLIENT_LOCAL_FILES: u32 = 0x00000080;
pub const CLIENT_IGNORE_SPACE: u32 = 0x00000100;
pub const CLIENT_PROTOCOL_41: u32 = 0x00000200;
pub const CLIENT_INTERACTIVE: u32 = 0x00000400;
pub const CLIENT_SSL: u32 = 0x00000800;
pub const CLIENT_IGNORE_SIGPIPE: u32 = 0x00001000;
pub const CLIENT_TRANSACTIONS: u32 = 0x00002000;
pub const CLIENT_RESERVED: u32 = 0x00004000;
pub const CLIENT_SECURE_CONNECTION: u32 = 0x00008000;
pub const CLIENT_MULTI_STATEMENTS: u32 = 0x00010000;
pub const CLIENT_MULTI_RESULTS: u32 = 0x00020000;
pub const CLIENT_PS_MULTI_RESULTS: u32 = 0x00040000;
pub const CLIENT_PLUGIN_AUTH: u32 = 0x00080000;
pub const CLIENT_CONNECT_ATTRS: u32 = 0x00100000;
pub const CLIENT_PLUGIN_AUTH_LENENC_CLIENT_DATA: u32 = 0x00200000;
pub const CLIENT_CAN_HANDLE_EXPIRED_PASSWORDS: u32 = 0x00400000;
pub const CLIENT_SESSION_TRACK: u32 = 0x00800000;
pub const CLIENT_DEPRECATE_EOF: u32 = 0x01000000;

/// Capabilities advertised in the initial handshake. No TLS, no compression.
pub fn server_capabilities() -> u32 {
    CLIENT_LONG_PASSWORD
        | CLIENT_FOUND_ROWS
        | CLIENT_LONG_FLAG
        | CLIENT_CONNECT_WITH_DB
        | CLIENT_ODBC
        | CLIENT_IGNORE_SPACE
        | CLIENT_PROTOCOL_41
        | CLIENT_INTERACTIVE
        | CLIENT_IGNORE_SIGPIPE
        | CLIENT_TRANSACTIONS
        | CLIENT_SECURE_CONNECTION
        | CLIENT_MULTI_RESULTS
        | CLIENT_PLUGIN_AUTH
        | CLIENT_PLUGIN_AUTH_LENENC_CLIENT_DATA
        | CLIENT_DEPRECATE_EOF
}

// collation ids
pub const UTF8_GENERAL_CI: u8 = 33;
pub const UTF8MB4_GENERAL_CI: u8 = 45;
pub const BINARY_CHARSET: u8 = 63;

pub const SERVER_STATUS_IN_TRANS: u16 = 0x0001;
pub const SERVER_STATUS_AUTOCOMMIT: u16 = 0x0002;

pub const NOT_NULL_FLAG: u16 = 0x0001;
pub const PRI_KEY_FLAG: u16 = 0x0002;
pub const BINARY_FLAG: u16 = 0x0080;
pub const NUM_FLAG: u16 = 0x8000;

// first byte of a response payload
pub const OK_HEADER: u8 = 0x00;
pub const EOF_HEADER: u8 = 0xfe;
pub const ERR_HEADER: u8 = 0xff;
pub const NULL_MARKER: u8 = 0xfb;

/// Wire type tag of a column definition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnType {
    Decimal = 0x00,
    Tiny = 0x01,
    Short = 0x02,
    Long = 0x03,
    Float = 0x04,
    Double = 0x05,
    Null = 0x06,
    Timestamp = 0x07,
    LongLong = 0x08,
    Int24 = 0x09,
    Date = 0x0a,
    Time = 0x0b,
    DateTime = 0x0c,
    Year = 0x0d,
    VarChar = 0x0f,
    Bit = 0x10,
    Json = 0xf5,
    NewDecimal = 0xf6,
    Enum = 0xf7,
    Set = 0xf8,
    TinyBlob = 0xf9,
    MediumBlob = 0xfa,
    LongBlob = 0xfb,
    Blob = 0xfc,
    VarString = 0xfd,
    String = 0xfe,
    Geometry = 0xff,
}

impl ColumnType {
    pub fn is_numeric(self) -> bool {
        matches!(
            self,
            ColumnType::Decimal
                | ColumnType::Tiny
                | ColumnType::Short
                | ColumnType::Long
                | ColumnType::Float
                | ColumnType::Double
                | ColumnType::LongLong
                | ColumnType::Int24
                | ColumnType::Year
                | ColumnType::NewDecimal
        )
    }

    /// Display width advertised in the column definition.
    pub fn default_length(self) -> u32 {
        match self {
            ColumnType::Tiny => 4,
            ColumnType::Short => 6,
            ColumnType::Long | ColumnType::Int24 => 11,
            ColumnType::LongLong => 21,
            ColumnType::Float => 12,
            ColumnType::Double => 22,
            ColumnType::Date => 10,
            ColumnType::DateTime | ColumnType::Timestamp => 19,
            _ => 255,
        }
    }
}

pub fn write_lenenc_int(buf: &mut BytesMut, value: u64) {
    if value < 251 {
        buf.put_u8(value as u8);
    } else if value < 65536 {
        buf.put_u8(0xfc);
        buf.put_u16_le(value as u16);
    } else if value < 16777216 {
        buf.put_u8(0xfd);
        buf.put_uint_le(value, 3);
    } else {
        buf.put_u8(0xfe);
        buf.put_u64_le(value);
    }
}

pub fn write_lenenc_str(buf: &mut BytesMut, s: &str) {
    write_lenenc_int(buf, s.len() as u64);
    buf.put_slice(s.as_bytes());
}

pub fn write_null_terminated_str(buf: &mut BytesMut, s: &str) {
    buf.put_slice(s.as_bytes());
    buf.put_u8(0);
}

pub fn read_lenenc_int(buf: &mut Bytes) -> Option<u64> {
    if buf.is_empty() {
        return None;
    }

    let first = buf.get_u8();
    match first {
        // 0xfb marks a NULL cell; as a length it reads as zero.
        0xfb => Some(0),
        0xfc => {
            if buf.remaining() < 2 {
                return None;
            }
            Some(buf.get_u16_le() as u64)
        }
        0xfd => {
            if buf.remaining() < 3 {
                return None;
            }
            Some(buf.get_uint_le(3))
        }
        0xfe => {
            if buf.remaining() < 8 {
                return None;
            }
            Some(buf.get_u64_le())
        }
        _ => Some(first as u64),
    }
}

pub fn read_null_terminated_string(buf: &mut Bytes) -> Option<String> {
    let end = buf.iter().position(|b| *b == 0)?;
    let raw = buf.split_to(end);
    buf.advance(1);
    String::from_utf8(raw.to_vec()).ok()
}

/// `mysql_native_password` client proof:
/// `sha1(pw) XOR sha1(salt ++ sha1(sha1(pw)))`. An empty password sends an
/// empty response.
pub fn scramble_password(password: &str, salt: &[u8]) -> Vec<u8> {
    use sha1::{Digest, Sha1};

    if password.is_empty() {
        return Vec::new();
    }

    let stage1 = Sha1::digest(password.as_bytes());
    let stored = Sha1::digest(stage1);
    let mask = Sha1::new().chain_update(salt).chain_update(stored).finalize();

    stage1.iter().zip(mask.iter()).map(|(a, b)| a ^ b).collect()
}

/// Checks a `mysql_native_password` auth response against the stored password.
pub fn verify_native_password(password: &str, salt: &[u8], auth_response: &[u8]) -> bool {
    scramble_password(password, salt) == auth_response
}
