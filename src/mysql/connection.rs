use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::Notify;

use crate::error::ProxyError;
use crate::query::{QueryContext, SessionCtx};
use super::framer::PacketFramer;
use super::protocol::*;

/// Position of a connection in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnState {
    AuthPending,
    PacketWait,
    PacketReading,
    QueryReady,
    Dispatching,
    Responding,
    Closing,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthStatus {
    Unauthenticated,
    Authenticated,
    Failed,
}

/// Error kept for `SHOW WARNINGS`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LastError {
    pub code: u16,
    pub message: String,
}

/// Per-connection session state.
#[derive(Debug, Clone)]
pub struct Session {
    pub connection_id: u32,
    pub user: String,
    pub current_db: Option<String>,
    pub capabilities: u32,
    pub charset: String,
    pub autocommit: bool,
    pub tx_isolation: String,
    pub in_transaction: bool,
    pub auth: AuthStatus,
    pub last_error: Option<LastError>,
    /// Statements received on this connection.
    pub questions: u64,
}

impl Session {
    pub fn new(connection_id: u32) -> Self {
        Self {
            connection_id,
            user: String::new(),
            current_db: None,
            capabilities: 0,
            charset: "utf8".to_string(),
            autocommit: true,
            tx_isolation: "REPEATABLE-READ".to_string(),
            in_transaction: false,
            auth: AuthStatus::Unauthenticated,
            last_error: None,
            questions: 0,
        }
    }

    pub fn status_flags(&self) -> u16 {
        let mut flags = 0;
        if self.autocommit {
            flags |= SERVER_STATUS_AUTOCOMMIT;
        }
        if self.in_transaction {
            flags |= SERVER_STATUS_IN_TRANS;
        }
        flags
    }

    pub fn set_last_error(&mut self, error: &ProxyError) {
        let (code, _) = error.mysql_error();
        let message = match error {
            ProxyError::Planner(e) => e.message.clone(),
            other => other.to_string(),
        };
        self.last_error = Some(LastError { code, message });
    }

    pub fn to_ctx(&self) -> SessionCtx {
        SessionCtx {
            connection_id: self.connection_id,
            user: self.user.clone(),
            database: self.current_db.clone(),
            autocommit: self.autocommit,
            in_transaction: self.in_transaction,
            tx_isolation: self.tx_isolation.clone(),
            charset: self.charset.clone(),
        }
    }
}

/// Charset label for the collation id a client sends in its handshake.
pub fn charset_name(collation_id: u8) -> &'static str {
    match collation_id {
        UTF8MB4_GENERAL_CI | 46 | 224..=247 | 255 => "utf8mb4",
        BINARY_CHARSET => "binary",
        8 | 47 | 48 => "latin1",
        _ => "utf8",
    }
}

/// One client connection. Owned by the task that drives it; never shared.
pub struct Connection<S> {
    pub(crate) stream: S,
    pub(crate) framer: PacketFramer,
    pub(crate) session: Session,
    pub(crate) state: ConnState,
    /// Command message read in `PacketWait`, consumed by `QueryReady`.
    pub(crate) inbound: Option<Bytes>,
    pub(crate) query: Option<QueryContext>,
    pub(crate) salt: Vec<u8>,
    pub(crate) handshake_sent: bool,
    pub(crate) close_after_flush: bool,
    pub(crate) closed: bool,
    planner_notify: Arc<Notify>,
}

impl<S> Connection<S> {
    pub fn new(stream: S, connection_id: u32) -> Self {
        Self {
            stream,
            framer: PacketFramer::new(),
            session: Session::new(connection_id),
            state: ConnState::AuthPending,
            inbound: None,
            query: None,
            salt: Vec::new(),
            handshake_sent: false,
            close_after_flush: false,
            closed: false,
            planner_notify: Arc::new(Notify::new()),
        }
    }

    pub fn id(&self) -> u32 {
        self.session.connection_id
    }

    pub fn state(&self) -> ConnState {
        self.state
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub fn has_query(&self) -> bool {
        self.query.is_some()
    }

    pub fn stream(&self) -> &S {
        &self.stream
    }

    pub fn stream_mut(&mut self) -> &mut S {
        &mut self.stream
    }

    /// Signalled when a submitted planner request completes.
    pub fn planner_notify(&self) -> Arc<Notify> {
        self.planner_notify.clone()
    }

    /// Drops per-query state and readies the framer for the next exchange.
    pub(crate) fn reset_query(&mut self) {
        self.inbound = None;
        self.query = None;
        self.framer.reset_cycle();
    }
}
