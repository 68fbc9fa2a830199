//! Per-connection state machine.
//!
//! ```text
//! AuthPending -> PacketWait -> PacketReading* -> QueryReady -> Dispatching -> Responding -> PacketWait
//!                                  (any state) -> Closing
//! ```
//!
//! [`StateMachine::run_machine`] advances one connection until it has to wait
//! for the socket or the planner, finishes a query cycle, or closes. It never
//! blocks: whenever the stream reports `WouldBlock` it arms the event loop for
//! the readiness it needs and returns, and the next call resumes in the same
//! state with all partial progress kept in the connection.

use std::collections::HashMap;
use std::io::{Read, Write};
use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::Notify;
use tracing::{debug, info, warn};

use crate::error::{ProxyError, Result};
use crate::metadata::MetadataProvider;
use crate::metrics::MetricsRegistry;
use crate::query::{
    plan_channel, BuiltinDispatcher, PlanRequest, PlanResult, Planner, QueryClassifier,
    QueryContext, QueryOutcome, QueryType,
};
use super::connection::{charset_name, AuthStatus, ConnState, Connection, Session};
use super::framer::{FrameWrite, MessageRead};
use super::packet::{HandshakePacket, HandshakeResponse, OkPacket};
use super::protocol::*;
use super::resultset::ResultEncoder;

/// Readiness notifications a connection can wait on.
pub trait EventLoop {
    fn arm_for_read(&mut self, connection_id: u32);
    fn arm_for_write(&mut self, connection_id: u32);
    /// Wait until `notify` fires for a pending planner request.
    fn arm_for_planner(&mut self, connection_id: u32, notify: Arc<Notify>);
    fn deregister(&mut self, connection_id: u32);
}

/// Password lookup for `mysql_native_password` verification.
pub trait CredentialStore: Send + Sync {
    fn password_for(&self, user: &str) -> Option<String>;
}

impl CredentialStore for HashMap<String, String> {
    fn password_for(&self, user: &str) -> Option<String> {
        self.get(user).cloned()
    }
}

enum Step {
    Continue,
    ArmRead,
    ArmWrite,
    ArmPlanner,
    CycleDone,
}

pub struct StateMachine {
    classifier: QueryClassifier,
    dispatcher: BuiltinDispatcher,
    metadata: Arc<dyn MetadataProvider>,
    planner: Arc<dyn Planner>,
    metrics: Arc<MetricsRegistry>,
    credentials: Arc<dyn CredentialStore>,
    server_version: String,
}

impl StateMachine {
    pub fn new(
        metadata: Arc<dyn MetadataProvider>,
        planner: Arc<dyn Planner>,
        metrics: Arc<MetricsRegistry>,
        credentials: Arc<dyn CredentialStore>,
    ) -> Self {
        Self {
            classifier: QueryClassifier::new(),
            dispatcher: BuiltinDispatcher::new(metadata.clone()),
            metadata,
            planner,
            metrics,
            credentials,
            server_version: "5.7.99-sqlproxy-fe".to_string(),
        }
    }

    pub fn with_server_version(mut self, version: impl Into<String>) -> Self {
        self.server_version = version.into();
        self
    }

    pub fn metrics(&self) -> &Arc<MetricsRegistry> {
        &self.metrics
    }

    /// Advances `conn` until it suspends, completes one query cycle or
    /// closes. Returns the state it stopped in.
    ///
    /// With `shutting_down` set, a connection that is dispatching or
    /// responding finishes that query and then closes; any other connection
    /// closes immediately.
    pub fn run_machine<S: Read + Write>(
        &self,
        conn: &mut Connection<S>,
        event_loop: &mut dyn EventLoop,
        shutting_down: bool,
    ) -> ConnState {
        if conn.closed {
            return ConnState::Closing;
        }

        if shutting_down
            && !matches!(
                conn.state,
                ConnState::Dispatching | ConnState::Responding | ConnState::Closing
            )
        {
            info!(connection_id = conn.id(), state = ?conn.state, "closing idle connection for shutdown");
            conn.state = ConnState::Closing;
        }

        loop {
            let step = match conn.state {
                ConnState::AuthPending => self.step_auth(conn),
                ConnState::PacketWait | ConnState::PacketReading => self.step_read(conn),
                ConnState::QueryReady => self.step_classify(conn),
                ConnState::Dispatching => self.step_dispatch(conn),
                ConnState::Responding => self.step_respond(conn, shutting_down),
                ConnState::Closing => {
                    self.client_free(conn, event_loop);
                    return ConnState::Closing;
                }
            };

            match step {
                Ok(Step::Continue) => {}
                Ok(Step::ArmRead) => {
                    event_loop.arm_for_read(conn.id());
                    return conn.state;
                }
                Ok(Step::ArmWrite) => {
                    event_loop.arm_for_write(conn.id());
                    return conn.state;
                }
                Ok(Step::ArmPlanner) => {
                    event_loop.arm_for_planner(conn.id(), conn.planner_notify());
                    return conn.state;
                }
                Ok(Step::CycleDone) => {
                    if conn.state != ConnState::Closing {
                        return conn.state;
                    }
                }
                Err(e) => self.fail(conn, e),
            }
        }
    }

    /// Tears the connection down. Runs at most once per connection; later
    /// calls return `false`.
    pub fn client_free<S>(&self, conn: &mut Connection<S>, event_loop: &mut dyn EventLoop) -> bool {
        if conn.closed {
            return false;
        }
        conn.closed = true;
        conn.state = ConnState::Closing;

        if let Some(ctx) = conn.query.take() {
            debug!(
                connection_id = conn.id(),
                query_id = %ctx.query_id,
                "dropping in-flight query"
            );
        }
        conn.inbound = None;
        conn.framer.release();
        event_loop.deregister(conn.id());

        info!(
            connection_id = conn.id(),
            user = %conn.session.user,
            questions = conn.session.questions,
            "connection closed"
        );
        true
    }

    fn step_auth<S: Read + Write>(&self, conn: &mut Connection<S>) -> Result<Step> {
        if !conn.handshake_sent {
            let handshake = HandshakePacket::new(conn.id(), &self.server_version);
            conn.salt = handshake.salt().to_vec();
            conn.framer.set_max_message_len(MAX_HANDSHAKE_RESPONSE_LEN);
            conn.framer.queue_payload(&handshake.encode());
            conn.handshake_sent = true;
            debug!(connection_id = conn.id(), "handshake queued");
        }

        if conn.framer.has_pending_output() {
            if let FrameWrite::Suspend = conn.framer.flush(&mut conn.stream)? {
                return Ok(Step::ArmWrite);
            }
        }

        let payload = match conn.framer.read_message(&mut conn.stream)? {
            MessageRead::Message(payload) => payload,
            MessageRead::Suspend => return Ok(Step::ArmRead),
        };

        if let Err(e) = self.authenticate(conn, payload) {
            conn.session.auth = AuthStatus::Failed;
            return Err(e);
        }

        let ok = OkPacket {
            status_flags: conn.session.status_flags(),
            ..OkPacket::new()
        };
        conn.framer.queue_payload(&ok.encode());
        conn.state = ConnState::Responding;
        Ok(Step::Continue)
    }

    fn authenticate<S>(&self, conn: &mut Connection<S>, payload: Bytes) -> Result<()> {
        let response = HandshakeResponse::decode(payload)?;

        let denied = || {
            ProxyError::AuthenticationFailed(format!(
                "Access denied for user '{}' (using password: {})",
                response.username,
                if response.auth_response.is_empty() { "NO" } else { "YES" }
            ))
        };

        if response.capability_flags & CLIENT_PROTOCOL_41 == 0 {
            return Err(ProxyError::AuthenticationFailed(
                "client does not support protocol 4.1".to_string(),
            ));
        }
        if let Some(plugin) = response.auth_plugin_name.as_deref() {
            if !plugin.is_empty() && plugin != AUTH_PLUGIN_NAME {
                return Err(ProxyError::AuthenticationFailed(format!(
                    "authentication plugin '{}' is not supported",
                    plugin
                )));
            }
        }

        let password = self
            .credentials
            .password_for(&response.username)
            .ok_or_else(denied)?;
        if !verify_native_password(&password, &conn.salt, &response.auth_response) {
            warn!(connection_id = conn.id(), user = %response.username, "authentication failed");
            return Err(denied());
        }

        if let Some(db) = &response.database {
            if !self.metadata.database_exists(db) {
                return Err(ProxyError::UnknownDatabase(db.clone()));
            }
        }

        let session = &mut conn.session;
        session.user = response.username.clone();
        session.current_db = response.database.clone();
        session.capabilities = response.capability_flags;
        session.charset = charset_name(response.character_set).to_string();
        session.auth = AuthStatus::Authenticated;
        conn.framer.set_max_message_len(inbound_limit(response.max_packet_size));

        info!(
            connection_id = conn.id(),
            user = %response.username,
            database = ?response.database,
            "client authenticated"
        );
        Ok(())
    }

    fn step_read<S: Read + Write>(&self, conn: &mut Connection<S>) -> Result<Step> {
        let payload = match conn.framer.read_message(&mut conn.stream)? {
            MessageRead::Message(payload) => payload,
            MessageRead::Suspend => {
                conn.state = if conn.framer.has_partial_input() {
                    ConnState::PacketReading
                } else {
                    ConnState::PacketWait
                };
                return Ok(Step::ArmRead);
            }
        };

        if payload.is_empty() {
            return Err(ProxyError::Protocol("empty command packet".to_string()));
        }

        conn.inbound = Some(payload);
        conn.state = ConnState::QueryReady;
        Ok(Step::Continue)
    }

    fn step_classify<S>(&self, conn: &mut Connection<S>) -> Result<Step> {
        let payload = conn
            .inbound
            .take()
            .ok_or_else(|| ProxyError::Protocol("no command buffered".to_string()))?;

        let mut ctx = self.classifier.classify(payload[0], &payload[1..]);
        ctx.database = conn.session.current_db.clone();
        conn.session.questions += 1;

        debug!(
            connection_id = conn.id(),
            query_id = %ctx.query_id,
            query_type = ?ctx.query_type,
            "query received"
        );

        conn.query = Some(ctx);
        conn.state = ConnState::Dispatching;
        Ok(Step::Continue)
    }

    fn step_dispatch<S>(&self, conn: &mut Connection<S>) -> Result<Step> {
        let notify = conn.planner_notify();
        let ctx = conn
            .query
            .as_mut()
            .ok_or_else(|| ProxyError::Protocol("dispatch without a query".to_string()))?;

        let result = if let Some(handle) = ctx.planner.as_mut() {
            match handle.try_take() {
                Some(result) => planner_outcome(&mut conn.session, ctx.query_type, result),
                None => return Ok(Step::ArmPlanner),
            }
        } else if let Some(result) = self.dispatcher.try_handle(&mut conn.session, ctx) {
            result
        } else {
            let (completion, handle) = plan_channel(notify);
            ctx.planner = Some(handle);

            let request = PlanRequest {
                query_id: ctx.query_id,
                statement: ctx.sql.clone(),
                hints: ctx.hints.clone(),
                query_type: ctx.query_type,
                session: conn.session.to_ctx(),
            };
            debug!(connection_id = conn.session.connection_id, query_id = %ctx.query_id, "submitting to planner");
            self.planner.plan_and_execute(request, completion);

            // Synchronous planners have already completed; poll on the next step.
            return Ok(Step::Continue);
        };

        self.queue_response(conn, result);
        Ok(Step::Continue)
    }

    fn queue_response<S>(&self, conn: &mut Connection<S>, result: Result<QueryOutcome>) {
        let encoder = ResultEncoder::new(conn.session.capabilities);
        let status = conn.session.status_flags();
        let query_type = conn.query.as_ref().map(|ctx| ctx.query_type);

        match result {
            Ok(QueryOutcome::Close) => {
                debug!(connection_id = conn.id(), "client quit");
                conn.state = ConnState::Closing;
                return;
            }
            Ok(outcome) => {
                if query_type != Some(QueryType::ShowWarnings) {
                    conn.session.last_error = None;
                }
                match outcome {
                    QueryOutcome::ResultSet { fields, rows } => {
                        for payload in encoder.encode(&fields, &rows, status, 0) {
                            conn.framer.queue_payload(&payload);
                        }
                    }
                    QueryOutcome::Ok {
                        affected_rows,
                        last_insert_id,
                    } => {
                        conn.framer
                            .queue_payload(&encoder.encode_ok(affected_rows, last_insert_id, status));
                    }
                    QueryOutcome::FieldList(fields) => {
                        for payload in encoder.encode_field_list(&fields, status) {
                            conn.framer.queue_payload(&payload);
                        }
                    }
                    QueryOutcome::Text(text) => {
                        conn.framer.queue_payload(&encoder.encode_text(&text));
                    }
                    QueryOutcome::Close => {}
                }
            }
            Err(e) if e.is_fatal_io() => {
                conn.state = ConnState::Closing;
                return;
            }
            Err(e) => {
                let (code, _) = e.mysql_error();
                debug!(connection_id = conn.id(), code, error = %e, "query failed");
                conn.session.set_last_error(&e);
                conn.framer.queue_payload(&encoder.encode_error(&e));
            }
        }

        conn.state = ConnState::Responding;
    }

    fn step_respond<S: Read + Write>(&self, conn: &mut Connection<S>, shutting_down: bool) -> Result<Step> {
        if let FrameWrite::Suspend = conn.framer.flush(&mut conn.stream)? {
            return Ok(Step::ArmWrite);
        }

        if let Some(ctx) = conn.query.take() {
            self.finish_query(&conn.session, &ctx);
        }
        conn.reset_query();

        conn.state = if conn.close_after_flush || shutting_down {
            ConnState::Closing
        } else {
            ConnState::PacketWait
        };
        Ok(Step::CycleDone)
    }

    fn finish_query(&self, session: &Session, ctx: &QueryContext) {
        let elapsed = ctx.started.elapsed();

        if let Some(db) = &ctx.database {
            self.metrics.record(db, elapsed);
        }

        if elapsed >= self.metrics.slow_query_threshold() {
            warn!(
                connection_id = session.connection_id,
                query_id = %ctx.query_id,
                database = ?ctx.database,
                elapsed_ms = elapsed.as_millis() as u64,
                statement = %truncate(&ctx.sql, 256),
                "slow query"
            );
        } else {
            debug!(
                connection_id = session.connection_id,
                query_id = %ctx.query_id,
                elapsed_ms = elapsed.as_millis() as u64,
                "query finished"
            );
        }
    }

    /// Errors surfacing from a step are framing or authentication failures:
    /// the client gets an ERR (when the socket is still usable) and the
    /// connection closes once it is flushed.
    fn fail<S>(&self, conn: &mut Connection<S>, error: ProxyError) {
        if error.is_fatal_io() || conn.close_after_flush {
            debug!(connection_id = conn.id(), error = %error, "closing connection");
            conn.state = ConnState::Closing;
            return;
        }

        let (code, _) = error.mysql_error();
        warn!(connection_id = conn.id(), state = ?conn.state, code, error = %error, "connection error");

        let encoder = ResultEncoder::new(conn.session.capabilities);
        conn.session.set_last_error(&error);
        conn.framer.queue_payload(&encoder.encode_error(&error));
        conn.close_after_flush = true;
        conn.state = ConnState::Responding;
    }
}

fn planner_outcome(session: &mut Session, query_type: QueryType, result: PlanResult) -> Result<QueryOutcome> {
    let output = result?;
    if query_type.begins_transaction() {
        session.in_transaction = true;
    } else if query_type.ends_transaction() {
        session.in_transaction = false;
    }
    Ok(output.into())
}

/// Inbound cap after login: the client's `max_packet_size`, bounded by the
/// server maximum. Zero means the client did not say.
fn inbound_limit(client_max: u32) -> usize {
    match client_max as usize {
        0 => MAX_ALLOWED_PACKET,
        n => n.min(MAX_ALLOWED_PACKET),
    }
}

fn truncate(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use parking_lot::Mutex;

    use crate::metadata::{CatalogManager, Database, Table};
    use crate::mysql::mock_stream::client::*;
    use crate::mysql::mock_stream::MockStream;
    use crate::mysql::protocol::ColumnType;
    use crate::mysql::resultset::ResultField;
    use crate::mysql::packet::ResultRow;
    use crate::query::{PlanCompletion, PlannerError, PlannerOutput};

    #[derive(Debug, Clone, PartialEq)]
    enum Armed {
        Read,
        Write,
        Planner,
    }

    #[derive(Default)]
    struct RecordingLoop {
        armed: Vec<Armed>,
        deregistered: usize,
    }

    impl EventLoop for RecordingLoop {
        fn arm_for_read(&mut self, _: u32) {
            self.armed.push(Armed::Read);
        }
        fn arm_for_write(&mut self, _: u32) {
            self.armed.push(Armed::Write);
        }
        fn arm_for_planner(&mut self, _: u32, _: Arc<Notify>) {
            self.armed.push(Armed::Planner);
        }
        fn deregister(&mut self, _: u32) {
            self.deregistered += 1;
        }
    }

    enum Mode {
        Reply(PlanResult),
        Defer,
    }

    struct CountingPlanner {
        calls: AtomicUsize,
        mode: Mutex<Mode>,
        deferred: Mutex<Vec<PlanCompletion>>,
        statements: Mutex<Vec<PlanRequest>>,
    }

    impl CountingPlanner {
        fn replying(result: PlanResult) -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                mode: Mutex::new(Mode::Reply(result)),
                deferred: Mutex::new(Vec::new()),
                statements: Mutex::new(Vec::new()),
            })
        }

        fn deferring() -> Arc<Self> {
            let planner = Self::replying(Ok(PlannerOutput::default()));
            *planner.mode.lock() = Mode::Defer;
            planner
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl Planner for CountingPlanner {
        fn plan_and_execute(&self, request: PlanRequest, completion: PlanCompletion) {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.statements.lock().push(request);
            match &*self.mode.lock() {
                Mode::Reply(result) => completion.complete(result.clone()),
                Mode::Defer => self.deferred.lock().push(completion),
            }
        }
    }

    struct Harness {
        machine: StateMachine,
        planner: Arc<CountingPlanner>,
        conn: Connection<MockStream>,
        event_loop: RecordingLoop,
    }

    impl Harness {
        fn new(planner: Arc<CountingPlanner>) -> Self {
            let catalog = CatalogManager::with_system_databases();
            catalog.add_database(Database::new("mydb").with_table(Table::new("t")));

            let mut users = HashMap::new();
            users.insert("root".to_string(), "secret".to_string());

            let machine = StateMachine::new(
                Arc::new(catalog),
                planner.clone(),
                Arc::new(MetricsRegistry::new()),
                Arc::new(users),
            );

            Self {
                machine,
                planner,
                conn: Connection::new(MockStream::new(), 7),
                event_loop: RecordingLoop::default(),
            }
        }

        fn run(&mut self) -> ConnState {
            self.machine.run_machine(&mut self.conn, &mut self.event_loop, false)
        }

        fn run_shutdown(&mut self) -> ConnState {
            self.machine.run_machine(&mut self.conn, &mut self.event_loop, true)
        }

        fn login_with(&mut self, password: &str, database: Option<&str>, caps: u32) -> Vec<(u8, Vec<u8>)> {
            assert_eq!(self.run(), ConnState::AuthPending);
            let out = frames(&self.conn.stream.take_outbound());
            let salt = salt_from_handshake(&out[0].1);

            self.conn
                .stream
                .push_inbound(handshake_response("root", password, &salt, database, caps));
            self.run();
            frames(&self.conn.stream.take_outbound())
        }

        fn login(&mut self) {
            let out = self.login_with("secret", None, 0);
            assert_eq!(out.len(), 1);
            assert_eq!(out[0].0, 2);
            assert_eq!(out[0].1[0], OK_HEADER);
            assert_eq!(self.conn.state(), ConnState::PacketWait);
        }

        fn send(&mut self, bytes: Vec<u8>) -> Vec<(u8, Vec<u8>)> {
            self.conn.stream.push_inbound(bytes);
            self.run();
            frames(&self.conn.stream.take_outbound())
        }
    }

    #[test]
    fn test_handshake_then_auth_ok() {
        let mut h = Harness::new(CountingPlanner::deferring());
        h.login();
        assert_eq!(h.conn.session().auth, AuthStatus::Authenticated);
        assert_eq!(h.conn.session().charset, "utf8mb4");
        assert_eq!(h.event_loop.armed, vec![Armed::Read]);
    }

    #[test]
    fn test_select_one_never_reaches_planner() {
        let mut h = Harness::new(CountingPlanner::deferring());
        h.login();

        let out = h.send(query("select 1"));
        // count, definition, EOF, row, EOF
        assert_eq!(out.len(), 5);
        let seqs: Vec<u8> = out.iter().map(|(seq, _)| *seq).collect();
        assert_eq!(seqs, vec![1, 2, 3, 4, 5]);
        assert_eq!(row_values(&out[3].1), vec![Some("1".to_string())]);
        assert_eq!(h.planner.calls(), 0);
        assert_eq!(h.conn.state(), ConnState::PacketWait);
    }

    #[test]
    fn test_use_then_select_database() {
        let mut h = Harness::new(CountingPlanner::deferring());
        h.login();

        let out = h.send(query("use mydb"));
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].1[0], OK_HEADER);

        let out = h.send(query("select database()"));
        assert_eq!(row_values(&out[3].1), vec![Some("mydb".to_string())]);
        assert_eq!(h.planner.calls(), 0);
    }

    #[test]
    fn test_wrong_password_closes_after_error() {
        let mut h = Harness::new(CountingPlanner::deferring());
        let out = h.login_with("wrong", None, 0);

        assert_eq!(out.len(), 1);
        assert_eq!(out[0].0, 2);
        assert_eq!(err_code(&out[0].1), Some(1045));
        assert_eq!(h.conn.state(), ConnState::Closing);
        assert!(h.conn.is_closed());
        assert_eq!(h.event_loop.deregistered, 1);
        assert_eq!(h.conn.session().auth, AuthStatus::Failed);
    }

    #[test]
    fn test_unknown_connect_database_closes() {
        let mut h = Harness::new(CountingPlanner::deferring());
        let out = h.login_with("secret", Some("nope"), 0);

        assert_eq!(err_code(&out[0].1), Some(1049));
        assert!(h.conn.is_closed());
    }

    #[test]
    fn test_oversized_handshake_response_is_rejected() {
        let mut h = Harness::new(CountingPlanner::deferring());
        assert_eq!(h.run(), ConnState::AuthPending);
        h.conn.stream.take_outbound();

        // 200 KiB announced in the header; the payload never needs to arrive.
        let out = h.send(vec![0x00, 0x20, 0x03, 0x01]);

        assert_eq!(out.len(), 1);
        assert_eq!(out[0].0, 2);
        assert_eq!(err_code(&out[0].1), Some(1153));
        assert!(h.conn.is_closed());
    }

    #[test]
    fn test_login_applies_client_packet_limit() {
        let mut h = Harness::new(CountingPlanner::deferring());
        h.login();
        assert_eq!(h.conn.framer.max_message_len(), 16 * 1024 * 1024);

        assert_eq!(inbound_limit(0), MAX_ALLOWED_PACKET);
        assert_eq!(inbound_limit(1024), 1024);
        assert_eq!(inbound_limit(u32::MAX), MAX_ALLOWED_PACKET);
    }

    #[test]
    fn test_connect_with_database() {
        let mut h = Harness::new(CountingPlanner::deferring());
        let out = h.login_with("secret", Some("mydb"), 0);

        assert_eq!(out[0].1[0], OK_HEADER);
        assert_eq!(h.conn.session().current_db.as_deref(), Some("mydb"));
    }

    #[test]
    fn test_planner_error_keeps_connection_open() {
        let planner = CountingPlanner::replying(Err(PlannerError::new(1064, "42000", "syntax error")));
        let mut h = Harness::new(planner);
        h.login();

        let out = h.send(query("selec * from t"));
        assert_eq!(out.len(), 1);
        assert_eq!(err_code(&out[0].1), Some(1064));
        assert_eq!(h.conn.state(), ConnState::PacketWait);
        assert!(!h.conn.has_query());

        let out = h.send(query("show warnings"));
        // count, 3 definitions, EOF, row, EOF
        assert_eq!(out.len(), 7);
        assert_eq!(
            row_values(&out[5].1),
            vec![Some("Error".to_string()), Some("1064".to_string()), Some("syntax error".to_string())]
        );

        let out = h.send(query("select 1"));
        assert_eq!(out.len(), 5);
        assert_eq!(h.planner.calls(), 1);
    }

    #[test]
    fn test_planner_result_set_and_metrics() {
        let output = PlannerOutput::result_set(
            vec![ResultField::new("id", ColumnType::LongLong)],
            vec![ResultRow::from_strings(["10"]), ResultRow::from_strings(["11"])],
        );
        let mut h = Harness::new(CountingPlanner::replying(Ok(output)));
        h.login();
        h.send(query("use mydb"));

        let sql = r#"/* {"shard": 2} */ select id from t"#;
        let out = h.send(query(sql));
        assert_eq!(out.len(), 6);
        assert_eq!(row_values(&out[4].1), vec![Some("11".to_string())]);

        let requests = h.planner.statements.lock();
        assert_eq!(requests[0].statement, sql);
        assert_eq!(requests[0].hints.len(), 1);
        assert_eq!(requests[0].session.database.as_deref(), Some("mydb"));

        assert_eq!(h.machine.metrics().database_metrics("mydb").last_minute, 1);
    }

    #[test]
    fn test_async_planner_parks_and_resumes() {
        let mut h = Harness::new(CountingPlanner::deferring());
        h.login();
        h.event_loop.armed.clear();

        let out = h.send(query("insert into t values (1)"));
        assert!(out.is_empty());
        assert_eq!(h.conn.state(), ConnState::Dispatching);
        assert_eq!(h.event_loop.armed, vec![Armed::Planner]);

        // Spurious wake-up: still pending.
        h.run();
        assert_eq!(h.conn.state(), ConnState::Dispatching);

        let completion = h.planner.deferred.lock().pop().unwrap();
        completion.complete(Ok(PlannerOutput::affected(1, 42)));

        h.run();
        let out = frames(&h.conn.stream.take_outbound());
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].1, vec![OK_HEADER, 1, 42, 2, 0, 0, 0]);
        assert_eq!(h.conn.state(), ConnState::PacketWait);
        assert_eq!(h.planner.calls(), 1);
    }

    #[test]
    fn test_transaction_flags() {
        let mut h = Harness::new(CountingPlanner::replying(Ok(PlannerOutput::default())));
        h.login();

        let out = h.send(query("begin"));
        let status = u16::from_le_bytes([out[0].1[3], out[0].1[4]]);
        assert_eq!(status & SERVER_STATUS_IN_TRANS, SERVER_STATUS_IN_TRANS);
        assert!(h.conn.session().in_transaction);

        h.send(query("commit"));
        assert!(!h.conn.session().in_transaction);
    }

    #[test]
    fn test_deprecate_eof_client() {
        let mut h = Harness::new(CountingPlanner::deferring());
        let out = h.login_with("secret", None, CLIENT_DEPRECATE_EOF);
        assert_eq!(out[0].1[0], OK_HEADER);

        let out = h.send(query("select 1"));
        // count, definition, row, OK(0xFE)
        assert_eq!(out.len(), 4);
        assert_eq!(out[3].1[0], EOF_HEADER);
    }

    #[test]
    fn test_shutdown_closes_waiting_connection() {
        let mut h = Harness::new(CountingPlanner::deferring());
        h.login();

        assert_eq!(h.run_shutdown(), ConnState::Closing);
        assert!(h.conn.is_closed());
        assert_eq!(h.event_loop.deregistered, 1);
        assert!(h.conn.stream.outbound().is_empty());
    }

    #[test]
    fn test_shutdown_drains_in_flight_response() {
        let mut h = Harness::new(CountingPlanner::deferring());
        h.login();

        h.conn.stream.set_write_budget(Some(6));
        h.conn.stream.push_inbound(query("select 1"));
        assert_eq!(h.run(), ConnState::Responding);
        assert_eq!(h.event_loop.armed.last(), Some(&Armed::Write));

        h.conn.stream.set_write_budget(None);
        assert_eq!(h.run_shutdown(), ConnState::Closing);

        let out = frames(&h.conn.stream.take_outbound());
        assert_eq!(out.len(), 5);
        assert!(h.conn.is_closed());
    }

    #[test]
    fn test_shutdown_completes_parked_query() {
        let mut h = Harness::new(CountingPlanner::deferring());
        h.login();
        h.send(query("delete from t"));
        assert_eq!(h.conn.state(), ConnState::Dispatching);

        h.planner
            .deferred
            .lock()
            .pop()
            .unwrap()
            .complete(Ok(PlannerOutput::affected(3, 0)));

        assert_eq!(h.run_shutdown(), ConnState::Closing);
        let out = frames(&h.conn.stream.take_outbound());
        assert_eq!(out[0].1[..2], [OK_HEADER, 3]);
    }

    #[test]
    fn test_client_free_runs_once() {
        let mut h = Harness::new(CountingPlanner::deferring());
        h.login();
        h.send(query("update t set a = 1"));
        assert!(h.conn.has_query());

        assert!(h.machine.client_free(&mut h.conn, &mut h.event_loop));
        assert!(!h.machine.client_free(&mut h.conn, &mut h.event_loop));
        assert_eq!(h.run(), ConnState::Closing);
        assert_eq!(h.event_loop.deregistered, 1);
        assert!(!h.conn.has_query());

        // The planner may still complete after the connection is gone.
        h.planner
            .deferred
            .lock()
            .pop()
            .unwrap()
            .complete(Ok(PlannerOutput::default()));
    }

    #[test]
    fn test_out_of_order_sequence_is_protocol_error() {
        let mut h = Harness::new(CountingPlanner::deferring());
        h.login();

        let out = h.send(frame(3, &[COM_QUERY, b'x']));
        assert_eq!(err_code(&out[0].1), Some(1156));
        assert!(h.conn.is_closed());
    }

    #[test]
    fn test_client_eof_closes_without_reply() {
        let mut h = Harness::new(CountingPlanner::deferring());
        h.login();

        h.conn.stream.close();
        assert_eq!(h.run(), ConnState::Closing);
        assert!(h.conn.stream.outbound().is_empty());
        assert_eq!(h.event_loop.deregistered, 1);
    }

    #[test]
    fn test_quit_closes() {
        let mut h = Harness::new(CountingPlanner::deferring());
        h.login();

        let out = h.send(command(COM_QUIT, &[]));
        assert!(out.is_empty());
        assert!(h.conn.is_closed());
    }

    #[test]
    fn test_partial_frame_waits_in_packet_reading() {
        let mut h = Harness::new(CountingPlanner::deferring());
        h.login();

        let bytes = query("select 1");
        h.conn.stream.push_inbound(bytes[..6].to_vec());
        assert_eq!(h.run(), ConnState::PacketReading);

        let out = h.send(bytes[6..].to_vec());
        assert_eq!(out.len(), 5);
    }

    #[test]
    fn test_pipelined_commands_complete_one_cycle_per_call() {
        let mut h = Harness::new(CountingPlanner::deferring());
        h.login();
        h.event_loop.armed.clear();

        let mut bytes = query("select 1");
        bytes.extend(query("select @@session.autocommit"));
        h.conn.stream.push_inbound(bytes);

        assert_eq!(h.run(), ConnState::PacketWait);
        assert!(h.event_loop.armed.is_empty());
        assert_eq!(frames(&h.conn.stream.take_outbound()).len(), 5);

        assert_eq!(h.run(), ConnState::PacketWait);
        let out = frames(&h.conn.stream.take_outbound());
        assert_eq!(row_values(&out[3].1), vec![Some("1".to_string())]);
        assert!(h.event_loop.armed.is_empty());

        // Nothing left buffered: the next call waits for input.
        h.run();
        assert_eq!(h.event_loop.armed, vec![Armed::Read]);
    }

    #[test]
    fn test_fatal_write_closes_immediately() {
        let mut h = Harness::new(CountingPlanner::deferring());
        h.login();

        h.conn.stream.fail_writes();
        h.conn.stream.push_inbound(query("select 1"));
        assert_eq!(h.run(), ConnState::Closing);
        assert!(h.conn.is_closed());
    }
}
