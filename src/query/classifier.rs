//! Statement classification.
//!
//! Every command packet is turned into a [`QueryContext`] tagged with a
//! [`QueryType`]. Binary commands map directly from the command byte.
//! `COM_QUERY` text is stripped of leading comments (the first JSON-object
//! comment becomes the hint block), normalized and matched against two
//! tables: whole-statement forms first, then keyword prefixes on token
//! boundaries, longest prefix first. Anything unmatched is a `Write` and goes
//! to the planner.

use std::collections::HashMap;

use lazy_static::lazy_static;
use tracing::debug;

use crate::mysql::protocol::*;
use super::{HintBlock, HintValue, QueryContext};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueryType {
    // Binary commands
    Quit,
    Ping,
    Statistics,
    FieldList,
    ChangeUser,
    InitDb,
    CreateDb,
    DropDb,
    Refresh,
    ProcessInfo,
    Debug,
    Unsupported(u8),

    // Driver session queries
    VersionComment,
    SessionAutoIncrement,
    SessionAutocommit,
    SessionTxIsolation,
    SelectDatabase,
    Select1,

    // Metadata
    ShowDatabases,
    ShowTables,
    ShowFullTables,
    ShowCreateTable,
    ShowFullColumns,
    Desc,
    ShowTableStatus,
    ShowRegion,
    ShowCollation,
    ShowWarnings,
    ShowVariables,
    ShowSessionVariables,
    Show,

    // Session
    Use,
    SetNames,
    SetCharset,
    SetCharacterSet,
    SetAutocommit,
    SetTxIsolation,
    Set,

    // Transactions
    Begin,
    Commit,
    Rollback,

    Explain,
    Kill,
    Call,
    Empty,
    Write,
}

impl QueryType {
    pub fn begins_transaction(self) -> bool {
        self == QueryType::Begin
    }

    pub fn ends_transaction(self) -> bool {
        matches!(self, QueryType::Commit | QueryType::Rollback)
    }
}

const EXACT_FORMS: &[(&str, QueryType)] = &[
    ("select @@version_comment limit 1", QueryType::VersionComment),
    ("select @@session.auto_increment_increment", QueryType::SessionAutoIncrement),
    ("select @@session.autocommit", QueryType::SessionAutocommit),
    ("select @@autocommit", QueryType::SessionAutocommit),
    ("select @@session.tx_isolation", QueryType::SessionTxIsolation),
    ("select @@session.transaction_isolation", QueryType::SessionTxIsolation),
    ("select @@tx_isolation", QueryType::SessionTxIsolation),
    ("select database()", QueryType::SelectDatabase),
    ("select 1", QueryType::Select1),
    ("show databases", QueryType::ShowDatabases),
    ("show tables", QueryType::ShowTables),
    ("show full tables", QueryType::ShowFullTables),
    ("show collation", QueryType::ShowCollation),
    ("show warnings", QueryType::ShowWarnings),
    ("show variables", QueryType::ShowVariables),
    ("show session variables", QueryType::ShowSessionVariables),
    ("show table status", QueryType::ShowTableStatus),
    ("begin", QueryType::Begin),
    ("start transaction", QueryType::Begin),
    ("commit", QueryType::Commit),
    ("rollback", QueryType::Rollback),
];

const PREFIX_FORMS: &[(&str, QueryType)] = &[
    ("show create table", QueryType::ShowCreateTable),
    ("show full columns", QueryType::ShowFullColumns),
    ("show full tables", QueryType::ShowFullTables),
    ("show table status", QueryType::ShowTableStatus),
    ("show tables", QueryType::ShowTables),
    ("show databases", QueryType::ShowDatabases),
    ("show schemas", QueryType::ShowDatabases),
    ("show session variables", QueryType::ShowSessionVariables),
    ("show variables", QueryType::ShowVariables),
    ("show collation", QueryType::ShowCollation),
    ("show warnings", QueryType::ShowWarnings),
    ("show region", QueryType::ShowRegion),
    ("set names", QueryType::SetNames),
    ("set charset", QueryType::SetCharset),
    ("set character set", QueryType::SetCharset),
    ("set character_set_client", QueryType::SetCharacterSet),
    ("set character_set_connection", QueryType::SetCharacterSet),
    ("set character_set_results", QueryType::SetCharacterSet),
    ("set autocommit", QueryType::SetAutocommit),
    ("set @@autocommit", QueryType::SetAutocommit),
    ("set session autocommit", QueryType::SetAutocommit),
    ("set @@session.autocommit", QueryType::SetAutocommit),
    ("set tx_isolation", QueryType::SetTxIsolation),
    ("set session tx_isolation", QueryType::SetTxIsolation),
    ("set @@tx_isolation", QueryType::SetTxIsolation),
    ("set @@session.tx_isolation", QueryType::SetTxIsolation),
    ("set transaction_isolation", QueryType::SetTxIsolation),
    ("set session transaction_isolation", QueryType::SetTxIsolation),
    ("set @@session.transaction_isolation", QueryType::SetTxIsolation),
    ("set transaction isolation level", QueryType::SetTxIsolation),
    ("set session transaction isolation level", QueryType::SetTxIsolation),
    ("use", QueryType::Use),
    ("desc", QueryType::Desc),
    ("describe", QueryType::Desc),
    ("explain", QueryType::Explain),
    ("kill", QueryType::Kill),
    ("call", QueryType::Call),
    ("set", QueryType::Set),
    ("show", QueryType::Show),
    ("start transaction", QueryType::Begin),
    ("begin", QueryType::Begin),
    ("commit", QueryType::Commit),
    ("rollback", QueryType::Rollback),
];

lazy_static! {
    static ref EXACT_TABLE: HashMap<&'static str, QueryType> = EXACT_FORMS.iter().copied().collect();

    // Longest prefix first; ties keep table order.
    static ref PREFIX_TABLE: Vec<(&'static str, QueryType)> = {
        let mut forms = PREFIX_FORMS.to_vec();
        forms.sort_by(|a, b| b.0.len().cmp(&a.0.len()));
        forms
    };
}

#[derive(Debug, Default, Clone, Copy)]
pub struct QueryClassifier;

impl QueryClassifier {
    pub fn new() -> Self {
        Self
    }

    /// Classifies one command packet. `body` is the payload after the
    /// command byte.
    pub fn classify(&self, command: u8, body: &[u8]) -> QueryContext {
        let text = String::from_utf8_lossy(body).into_owned();

        let query_type = match Command::from(command) {
            Command::Query => return self.classify_query(text),
            Command::Quit => QueryType::Quit,
            Command::Ping => QueryType::Ping,
            Command::Statistics => QueryType::Statistics,
            Command::FieldList => QueryType::FieldList,
            Command::ChangeUser => QueryType::ChangeUser,
            Command::InitDb => QueryType::InitDb,
            Command::CreateDb => QueryType::CreateDb,
            Command::DropDb => QueryType::DropDb,
            Command::Refresh => QueryType::Refresh,
            Command::ProcessInfo => QueryType::ProcessInfo,
            Command::Debug => QueryType::Debug,
            Command::Sleep | Command::Unknown(_) => QueryType::Unsupported(command),
        };

        QueryContext::new(command, text, query_type)
    }

    fn classify_query(&self, sql: String) -> QueryContext {
        let (hints, rest) = strip_leading_comments(&sql);
        let statement = normalize(rest);
        let (query_type, matched) = match_forms(&statement.to_ascii_lowercase());

        debug!(?query_type, hints = hints.len(), "classified statement");

        let mut ctx = QueryContext::new(COM_QUERY, sql, query_type);
        ctx.args = statement[matched..].trim().to_string();
        ctx.statement = statement;
        ctx.hints = hints;
        ctx
    }
}

/// Returns the query type and the byte length of the matched form.
fn match_forms(lowered: &str) -> (QueryType, usize) {
    if lowered.is_empty() {
        return (QueryType::Empty, 0);
    }

    if let Some(query_type) = EXACT_TABLE.get(lowered) {
        return (*query_type, lowered.len());
    }

    PREFIX_TABLE
        .iter()
        .find(|(prefix, _)| has_token_prefix(lowered, prefix))
        .map(|(prefix, query_type)| (*query_type, prefix.len()))
        .unwrap_or((QueryType::Write, 0))
}

fn has_token_prefix(text: &str, prefix: &str) -> bool {
    match text.strip_prefix(prefix) {
        Some(rest) => rest
            .chars()
            .next()
            .map_or(true, |c| !(c.is_ascii_alphanumeric() || c == '_')),
        None => false,
    }
}

/// Trims, drops trailing semicolons and collapses whitespace runs. Case is
/// preserved.
pub fn normalize(sql: &str) -> String {
    let trimmed = sql.trim().trim_end_matches(|c: char| c == ';' || c.is_whitespace());
    trimmed.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Removes leading `/* ... */` comments, stopping at `/*!` executable
/// comments. Returns the hint block parsed from the first JSON-object
/// comment and the remaining text.
pub fn strip_leading_comments(sql: &str) -> (HintBlock, &str) {
    let mut hints: Option<HintBlock> = None;
    let mut rest = sql.trim_start();

    while rest.starts_with("/*") && !rest.starts_with("/*!") {
        let Some(end) = rest[2..].find("*/") else {
            break;
        };
        let body = &rest[2..2 + end];
        if hints.is_none() {
            hints = parse_hint_block(body);
        }
        rest = rest[2 + end + 2..].trim_start();
    }

    (hints.unwrap_or_default(), rest)
}

fn parse_hint_block(body: &str) -> Option<HintBlock> {
    let serde_json::Value::Object(map) = serde_json::from_str::<serde_json::Value>(body.trim()).ok()? else {
        return None;
    };

    let hints = map
        .into_iter()
        .filter_map(|(key, value)| {
            let value = match value {
                serde_json::Value::String(s) => HintValue::Text(s),
                serde_json::Value::Number(n) => match n.as_i64() {
                    Some(i) => HintValue::Int(i),
                    None => HintValue::Float(n.as_f64()?),
                },
                _ => return None,
            };
            Some((key, value))
        })
        .collect();

    Some(hints)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn classify(sql: &str) -> QueryContext {
        QueryClassifier::new().classify(COM_QUERY, sql.as_bytes())
    }

    #[test]
    fn test_show_full_tables() {
        assert_eq!(classify("SHOW FULL TABLES").query_type, QueryType::ShowFullTables);
        assert_eq!(
            classify("show full tables from mydb like 'u%'").query_type,
            QueryType::ShowFullTables
        );
    }

    #[test]
    fn test_session_queries() {
        assert_eq!(classify("select @@session.autocommit").query_type, QueryType::SessionAutocommit);
        assert_eq!(
            classify("SELECT  @@version_comment  LIMIT 1;").query_type,
            QueryType::VersionComment
        );
        assert_eq!(classify("select 1").query_type, QueryType::Select1);
        assert_eq!(classify("SELECT DATABASE()").query_type, QueryType::SelectDatabase);
    }

    #[test]
    fn test_generic_select_is_write() {
        assert_eq!(classify("SELECT * FROM t WHERE x=1").query_type, QueryType::Write);
        assert_eq!(classify("select 1 from dual").query_type, QueryType::Write);
        assert_eq!(classify("insert into t values (1)").query_type, QueryType::Write);
    }

    #[test]
    fn test_classification_is_deterministic() {
        let sql = "show table status from db like 'x%'";
        let first = classify(sql).query_type;
        for _ in 0..10 {
            assert_eq!(classify(sql).query_type, first);
        }
        assert_eq!(first, QueryType::ShowTableStatus);
    }

    #[test]
    fn test_longest_prefix_wins() {
        assert_eq!(classify("set names utf8mb4").query_type, QueryType::SetNames);
        assert_eq!(classify("SET autocommit=0").query_type, QueryType::SetAutocommit);
        assert_eq!(
            classify("set session transaction isolation level read committed").query_type,
            QueryType::SetTxIsolation
        );
        assert_eq!(classify("set sql_mode = ''").query_type, QueryType::Set);
        assert_eq!(classify("show processlist").query_type, QueryType::Show);
        assert_eq!(classify("show create table t1").query_type, QueryType::ShowCreateTable);
    }

    #[test]
    fn test_prefix_respects_token_boundaries() {
        assert_eq!(classify("describe t").query_type, QueryType::Desc);
        assert_eq!(classify("use`mydb`").query_type, QueryType::Use);
        assert_eq!(classify("user_defined()").query_type, QueryType::Write);
        assert_eq!(classify("setx = 1").query_type, QueryType::Write);
    }

    #[test]
    fn test_transactions() {
        assert_eq!(classify("BEGIN").query_type, QueryType::Begin);
        assert_eq!(classify("start transaction read only").query_type, QueryType::Begin);
        assert_eq!(classify("commit work").query_type, QueryType::Commit);
        assert_eq!(classify("rollback").query_type, QueryType::Rollback);
    }

    #[test]
    fn test_hint_block_extracted() {
        let sql = r#"/* {"region": "eu", "shard": 3, "weight": 0.25, "flag": true} */ SELECT * FROM t"#;
        let ctx = classify(sql);

        assert_eq!(ctx.query_type, QueryType::Write);
        assert_eq!(ctx.sql, sql);
        assert_eq!(ctx.statement, "SELECT * FROM t");
        assert_eq!(ctx.hints.len(), 3);
        assert_eq!(ctx.hints["region"], HintValue::Text("eu".to_string()));
        assert_eq!(ctx.hints["shard"], HintValue::Int(3));
        assert_eq!(ctx.hints["weight"], HintValue::Float(0.25));
    }

    #[test]
    fn test_args_follow_matched_prefix() {
        let ctx = classify("SHOW CREATE TABLE `Orders`;");
        assert_eq!(ctx.args, "`Orders`");

        let ctx = classify("set autocommit=0");
        assert_eq!(ctx.args, "=0");

        let ctx = classify("select 1");
        assert_eq!(ctx.args, "");
    }

    #[test]
    fn test_plain_comments_are_skipped() {
        let ctx = classify("/* app=web */ /* {\"a\": 1} */ select 1");
        assert_eq!(ctx.query_type, QueryType::Select1);
        assert_eq!(ctx.hints["a"], HintValue::Int(1));
    }

    #[test]
    fn test_executable_comment_is_kept() {
        let ctx = classify("/*!40101 SET NAMES utf8 */");
        assert_eq!(ctx.query_type, QueryType::Write);
        assert!(ctx.hints.is_empty());
    }

    #[test]
    fn test_empty_statement() {
        assert_eq!(classify("  ;  ").query_type, QueryType::Empty);
    }

    #[test]
    fn test_binary_commands() {
        let classifier = QueryClassifier::new();
        assert_eq!(classifier.classify(COM_PING, &[]).query_type, QueryType::Ping);
        assert_eq!(classifier.classify(COM_QUIT, &[]).query_type, QueryType::Quit);

        let ctx = classifier.classify(COM_INIT_DB, b"mydb");
        assert_eq!(ctx.query_type, QueryType::InitDb);
        assert_eq!(ctx.sql, "mydb");

        assert_eq!(
            classifier.classify(0x1f, &[]).query_type,
            QueryType::Unsupported(0x1f)
        );
        assert_eq!(
            classifier.classify(COM_SLEEP, &[]).query_type,
            QueryType::Unsupported(COM_SLEEP)
        );
    }
}
