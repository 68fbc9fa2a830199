pub mod builtin;
pub mod classifier;
pub mod planner;

pub use builtin::BuiltinDispatcher;
pub use classifier::{QueryClassifier, QueryType};
pub use planner::{
    plan_channel, PlanCompletion, PlanRequest, PlanResult, Planner, PlannerError, PlannerHandle,
    PlannerOutput, UnsupportedPlanner,
};

use std::collections::BTreeMap;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::mysql::packet::ResultRow;
use crate::mysql::resultset::ResultField;

/// Value of a single hint in a leading `/* {...} */` comment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum HintValue {
    Int(i64),
    Float(f64),
    Text(String),
}

pub type HintBlock = BTreeMap<String, HintValue>;

/// Snapshot of the session handed to the planner with each statement.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionCtx {
    pub connection_id: u32,
    pub user: String,
    pub database: Option<String>,
    pub autocommit: bool,
    pub in_transaction: bool,
    pub tx_isolation: String,
    pub charset: String,
}

impl Default for SessionCtx {
    fn default() -> Self {
        Self {
            connection_id: 0,
            user: String::new(),
            database: None,
            autocommit: true,
            in_transaction: false,
            tx_isolation: "REPEATABLE-READ".to_string(),
            charset: "utf8".to_string(),
        }
    }
}

/// Reply produced for one query cycle.
#[derive(Debug, Clone)]
pub enum QueryOutcome {
    ResultSet {
        fields: Vec<ResultField>,
        rows: Vec<ResultRow>,
    },
    Ok {
        affected_rows: u64,
        last_insert_id: u64,
    },
    /// `COM_FIELD_LIST` reply: column definitions without a column count.
    FieldList(Vec<ResultField>),
    /// Bare string payload (`COM_STATISTICS`).
    Text(String),
    /// `COM_QUIT`: no reply, the connection closes.
    Close,
}

impl QueryOutcome {
    pub fn ok() -> Self {
        QueryOutcome::Ok {
            affected_rows: 0,
            last_insert_id: 0,
        }
    }

    pub fn result_set(fields: Vec<ResultField>, rows: Vec<ResultRow>) -> Self {
        QueryOutcome::ResultSet { fields, rows }
    }
}

impl From<PlannerOutput> for QueryOutcome {
    fn from(output: PlannerOutput) -> Self {
        if output.fields.is_empty() {
            QueryOutcome::Ok {
                affected_rows: output.affected_rows,
                last_insert_id: output.last_insert_id,
            }
        } else {
            QueryOutcome::ResultSet {
                fields: output.fields,
                rows: output.rows,
            }
        }
    }
}

/// Per-cycle query state. Dropping it releases the planner handle.
#[derive(Debug)]
pub struct QueryContext {
    pub query_id: Uuid,
    pub command: u8,
    /// Statement text as received (hint comment included).
    pub sql: String,
    /// Comment-free text with whitespace collapsed and case preserved; used
    /// to pull arguments out of builtin statements.
    pub statement: String,
    /// Text following the matched keyword form (`show create table <args>`).
    pub args: String,
    pub hints: HintBlock,
    pub query_type: QueryType,
    pub database: Option<String>,
    pub started: Instant,
    pub planner: Option<PlannerHandle>,
}

impl QueryContext {
    pub fn new(command: u8, sql: String, query_type: QueryType) -> Self {
        Self {
            query_id: Uuid::new_v4(),
            command,
            statement: sql.clone(),
            args: String::new(),
            sql,
            hints: HintBlock::new(),
            query_type,
            database: None,
            started: Instant::now(),
            planner: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mysql::protocol::ColumnType;

    #[test]
    fn session_ctx_defaults_are_sane() {
        let session = SessionCtx::default();
        assert_eq!(session.database, None);
        assert!(session.autocommit);
        assert!(!session.in_transaction);
        assert_eq!(session.tx_isolation, "REPEATABLE-READ");
    }

    #[test]
    fn planner_output_without_fields_is_ok() {
        let outcome: QueryOutcome = PlannerOutput::affected(4, 9).into();
        assert!(matches!(
            outcome,
            QueryOutcome::Ok {
                affected_rows: 4,
                last_insert_id: 9
            }
        ));

        let outcome: QueryOutcome = PlannerOutput::result_set(
            vec![ResultField::new("a", ColumnType::Long)],
            vec![ResultRow::from_strings(["1"])],
        )
        .into();
        assert!(matches!(outcome, QueryOutcome::ResultSet { .. }));
    }

    #[test]
    fn hint_values_deserialize_untagged() {
        let hints: HintBlock =
            serde_json::from_str(r#"{"region": "us-east", "limit": 10, "ratio": 0.5}"#).unwrap();
        assert_eq!(hints["region"], HintValue::Text("us-east".to_string()));
        assert_eq!(hints["limit"], HintValue::Int(10));
        assert_eq!(hints["ratio"], HintValue::Float(0.5));
    }
}
