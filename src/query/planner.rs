//! Planner capability.
//!
//! The planner is an opaque collaborator: it receives a statement together
//! with its hint block and a snapshot of the session, and reports the result
//! through a [`PlanCompletion`]. Synchronous planners complete before
//! `plan_and_execute` returns; asynchronous planners keep the completion and
//! fire it later from any thread. The connection that submitted the query
//! polls the paired [`PlannerHandle`] and parks on the shared `Notify` until
//! the result lands.

use std::fmt;
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::oneshot::{self, error::TryRecvError};
use tokio::sync::Notify;
use uuid::Uuid;

use crate::mysql::packet::ResultRow;
use crate::mysql::resultset::ResultField;
use super::classifier::QueryType;
use super::{HintBlock, SessionCtx};

/// Error reported by the planner. Code, SQLSTATE and message are relayed to
/// the client as-is.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlannerError {
    pub code: u16,
    pub sql_state: String,
    pub message: String,
}

impl PlannerError {
    pub fn new(code: u16, sql_state: &str, message: impl Into<String>) -> Self {
        Self {
            code,
            sql_state: sql_state.to_string(),
            message: message.into(),
        }
    }
}

impl fmt::Display for PlannerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ERROR {} ({}): {}", self.code, self.sql_state, self.message)
    }
}

impl std::error::Error for PlannerError {}

/// Rows and fields produced by the planner. An empty field list means the
/// statement produced no result set and is answered with OK.
#[derive(Debug, Clone, Default)]
pub struct PlannerOutput {
    pub fields: Vec<ResultField>,
    pub rows: Vec<ResultRow>,
    pub affected_rows: u64,
    pub last_insert_id: u64,
}

impl PlannerOutput {
    pub fn result_set(fields: Vec<ResultField>, rows: Vec<ResultRow>) -> Self {
        Self {
            fields,
            rows,
            ..Default::default()
        }
    }

    pub fn affected(affected_rows: u64, last_insert_id: u64) -> Self {
        Self {
            affected_rows,
            last_insert_id,
            ..Default::default()
        }
    }
}

pub type PlanResult = std::result::Result<PlannerOutput, PlannerError>;

#[derive(Debug, Clone)]
pub struct PlanRequest {
    pub query_id: Uuid,
    pub statement: String,
    pub hints: HintBlock,
    pub query_type: QueryType,
    pub session: SessionCtx,
}

pub trait Planner: Send + Sync {
    fn plan_and_execute(&self, request: PlanRequest, completion: PlanCompletion);
}

/// Sending half of a planner submission. Completing (or dropping) it wakes
/// the parked connection.
pub struct PlanCompletion {
    tx: Option<oneshot::Sender<PlanResult>>,
    notify: Arc<Notify>,
}

impl PlanCompletion {
    pub fn complete(mut self, result: PlanResult) {
        if let Some(tx) = self.tx.take() {
            // The receiver is gone when the connection closed mid-query.
            let _ = tx.send(result);
        }
        self.notify.notify_one();
    }
}

impl Drop for PlanCompletion {
    fn drop(&mut self) {
        if let Some(tx) = self.tx.take() {
            let _ = tx.send(Err(PlannerError::new(
                1105,
                "HY000",
                "planner dropped the query without a result",
            )));
            self.notify.notify_one();
        }
    }
}

impl fmt::Debug for PlanCompletion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PlanCompletion")
            .field("pending", &self.tx.is_some())
            .finish()
    }
}

/// Receiving half, owned by the query context of the submitting connection.
#[derive(Debug)]
pub struct PlannerHandle {
    rx: oneshot::Receiver<PlanResult>,
}

impl PlannerHandle {
    /// Non-blocking poll for the planner result.
    pub fn try_take(&mut self) -> Option<PlanResult> {
        match self.rx.try_recv() {
            Ok(result) => Some(result),
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Closed) => Some(Err(PlannerError::new(
                1105,
                "HY000",
                "planner dropped the query without a result",
            ))),
        }
    }
}

/// Creates a linked completion/handle pair that signals `notify` on completion.
pub fn plan_channel(notify: Arc<Notify>) -> (PlanCompletion, PlannerHandle) {
    let (tx, rx) = oneshot::channel();
    (
        PlanCompletion {
            tx: Some(tx),
            notify,
        },
        PlannerHandle { rx },
    )
}

/// Used when no execution engine is attached: every forwarded statement is
/// rejected.
#[derive(Debug, Default)]
pub struct UnsupportedPlanner;

impl Planner for UnsupportedPlanner {
    fn plan_and_execute(&self, request: PlanRequest, completion: PlanCompletion) {
        tracing::debug!(query_id = %request.query_id, "no execution engine attached");
        completion.complete(Err(PlannerError::new(
            1105,
            "HY000",
            format!("no execution engine available for: {}", request.statement),
        )));
    }
}
