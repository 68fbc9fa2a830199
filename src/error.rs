use thiserror::Error;

use crate::query::planner::PlannerError;

#[derive(Error, Debug)]
pub enum ProxyError {
    #[error("MySQL protocol error: {0}")]
    Protocol(String),

    #[error("Invalid packet: {0}")]
    InvalidPacket(String),

    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("{0}")]
    Planner(PlannerError),

    #[error("Unknown database '{0}'")]
    UnknownDatabase(String),

    #[error("No database selected")]
    NoDatabaseSelected,

    #[error("Table '{0}' doesn't exist")]
    UnknownTable(String),

    #[error("Variable '{0}' can't be set to the value of '{1}'")]
    WrongValue(String, String),

    #[error("Query was empty")]
    EmptyQuery,

    #[error("Unsupported command: {0}")]
    Unsupported(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Got a packet bigger than 'max_allowed_packet' bytes ({0} > {1})")]
    PacketTooLarge(usize, usize),

    #[error("Connection closed")]
    ConnectionClosed,
}

impl ProxyError {
    /// MySQL error code and SQLSTATE sent to the client for this error.
    pub fn mysql_error(&self) -> (u16, &str) {
        match self {
            ProxyError::Protocol(_) | ProxyError::InvalidPacket(_) => (1156, "08S01"),
            ProxyError::AuthenticationFailed(_) => (1045, "28000"),
            ProxyError::Planner(e) => (e.code, e.sql_state.as_str()),
            ProxyError::UnknownDatabase(_) => (1049, "42000"),
            ProxyError::NoDatabaseSelected => (1046, "3D000"),
            ProxyError::UnknownTable(_) => (1146, "42S02"),
            ProxyError::WrongValue(..) => (1231, "42000"),
            ProxyError::EmptyQuery => (1065, "42000"),
            ProxyError::Unsupported(_) => (1047, "08S01"),
            ProxyError::Io(_) | ProxyError::ConnectionClosed => (2013, "HY000"),
            ProxyError::PacketTooLarge(..) => (1153, "08S01"),
        }
    }

    /// Errors after which the stream can no longer carry a response.
    pub fn is_fatal_io(&self) -> bool {
        matches!(self, ProxyError::Io(_) | ProxyError::ConnectionClosed)
    }
}

impl From<PlannerError> for ProxyError {
    fn from(e: PlannerError) -> Self {
        ProxyError::Planner(e)
    }
}

pub type Result<T> = std::result::Result<T, ProxyError>;
