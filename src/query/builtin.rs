//! Builtin fast path.
//!
//! Driver session queries, metadata listings and session `SET`/`USE` statements are
//! answered here from the session and the metadata provider without going
//! through the planner. Dispatch is a table from [`QueryType`] to handler
//! functions; single-value answers share [`scalar_result`].

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use lazy_static::lazy_static;
use tracing::{debug, info};

use crate::error::{ProxyError, Result};
use crate::metadata::{MetadataProvider, Table};
use crate::mysql::connection::Session;
use crate::mysql::packet::ResultRow;
use crate::mysql::protocol::ColumnType;
use crate::mysql::resultset::ResultField;
use super::classifier::QueryType;
use super::{QueryContext, QueryOutcome};

type Handler = fn(&BuiltinDispatcher, &mut Session, &QueryContext) -> Result<QueryOutcome>;

lazy_static! {
    static ref HANDLERS: HashMap<QueryType, Handler> = {
        let mut table: HashMap<QueryType, Handler> = HashMap::new();

        table.insert(QueryType::VersionComment, version_comment);
        table.insert(QueryType::SessionAutoIncrement, session_auto_increment);
        table.insert(QueryType::SessionAutocommit, session_autocommit);
        table.insert(QueryType::SessionTxIsolation, session_tx_isolation);
        table.insert(QueryType::SelectDatabase, select_database);
        table.insert(QueryType::Select1, select_one);

        table.insert(QueryType::ShowDatabases, show_databases);
        table.insert(QueryType::ShowTables, show_tables);
        table.insert(QueryType::ShowFullTables, show_tables);
        table.insert(QueryType::ShowCreateTable, show_create_table);
        table.insert(QueryType::ShowFullColumns, show_full_columns);
        table.insert(QueryType::Desc, describe_table);
        table.insert(QueryType::ShowTableStatus, show_table_status);
        table.insert(QueryType::ShowRegion, show_region);
        table.insert(QueryType::ShowCollation, show_collation);
        table.insert(QueryType::ShowWarnings, show_warnings);
        table.insert(QueryType::ShowVariables, show_variables);
        table.insert(QueryType::ShowSessionVariables, show_variables);

        table.insert(QueryType::Use, use_database);
        table.insert(QueryType::InitDb, init_db);
        table.insert(QueryType::SetNames, set_charset);
        table.insert(QueryType::SetCharset, set_charset);
        table.insert(QueryType::SetCharacterSet, set_charset);
        table.insert(QueryType::SetAutocommit, set_autocommit);
        table.insert(QueryType::SetTxIsolation, set_tx_isolation);

        table.insert(QueryType::Ping, ok);
        table.insert(QueryType::Refresh, ok);
        table.insert(QueryType::Debug, ok);
        table.insert(QueryType::Statistics, statistics);
        table.insert(QueryType::FieldList, field_list);
        table.insert(QueryType::Quit, quit);
        table.insert(QueryType::Empty, empty_query);
        table.insert(QueryType::ChangeUser, unsupported);
        table.insert(QueryType::CreateDb, unsupported);
        table.insert(QueryType::DropDb, unsupported);
        table.insert(QueryType::ProcessInfo, unsupported);

        table
    };
}

pub struct BuiltinDispatcher {
    metadata: Arc<dyn MetadataProvider>,
    started: Instant,
}

impl BuiltinDispatcher {
    pub fn new(metadata: Arc<dyn MetadataProvider>) -> Self {
        Self {
            metadata,
            started: Instant::now(),
        }
    }

    /// Answers the statement if it has a builtin handler; `None` means it
    /// goes to the planner.
    pub fn try_handle(&self, session: &mut Session, ctx: &QueryContext) -> Option<Result<QueryOutcome>> {
        if let QueryType::Unsupported(command) = ctx.query_type {
            return Some(Err(ProxyError::Unsupported(format!("command 0x{:02x}", command))));
        }

        let handler = HANDLERS.get(&ctx.query_type)?;

        if takes_show_args(ctx.query_type) {
            let args = ShowArgs::parse(&ctx.args);
            let extra = args.unhandled.or_else(|| {
                if takes_target(ctx.query_type) {
                    None
                } else {
                    args.target
                }
            });
            if let Some(clause) = extra {
                debug!(query_type = ?ctx.query_type, %clause, "clause not handled locally, forwarding");
                return None;
            }
        }

        debug!(query_type = ?ctx.query_type, "handled by builtin");
        Some(handler(self, session, ctx))
    }

    fn current_db<'a>(&self, session: &'a Session, explicit: Option<&'a str>) -> Result<&'a str> {
        let db = explicit
            .or(session.current_db.as_deref())
            .ok_or(ProxyError::NoDatabaseSelected)?;
        if !self.metadata.database_exists(db) {
            return Err(ProxyError::UnknownDatabase(db.to_string()));
        }
        Ok(db)
    }

    fn table(&self, session: &Session, name: &str, explicit_db: Option<&str>) -> Result<(String, Table)> {
        let (qualifier, table_name) = split_qualified(name);
        let db = self.current_db(session, qualifier.or(explicit_db))?;
        self.metadata
            .get_table(db, table_name)
            .map(|t| (db.to_string(), t))
            .ok_or_else(|| ProxyError::UnknownTable(format!("{}.{}", db, table_name)))
    }
}

/// One-row, one-column resultset.
pub fn scalar_result(field: &str, column_type: ColumnType, value: Option<String>) -> QueryOutcome {
    QueryOutcome::result_set(
        vec![ResultField::new(field, column_type)],
        vec![ResultRow::new(vec![value])],
    )
}

fn text_fields(names: &[&str]) -> Vec<ResultField> {
    names
        .iter()
        .map(|name| ResultField::new(*name, ColumnType::VarString))
        .collect()
}

fn version_comment(d: &BuiltinDispatcher, _: &mut Session, _: &QueryContext) -> Result<QueryOutcome> {
    Ok(scalar_result(
        "@@version_comment",
        ColumnType::VarString,
        Some(d.metadata.version_comment()),
    ))
}

fn session_auto_increment(_: &BuiltinDispatcher, _: &mut Session, _: &QueryContext) -> Result<QueryOutcome> {
    Ok(scalar_result(
        "@@session.auto_increment_increment",
        ColumnType::LongLong,
        Some("1".to_string()),
    ))
}

fn session_autocommit(_: &BuiltinDispatcher, session: &mut Session, _: &QueryContext) -> Result<QueryOutcome> {
    let value = if session.autocommit { "1" } else { "0" };
    Ok(scalar_result(
        "@@session.autocommit",
        ColumnType::LongLong,
        Some(value.to_string()),
    ))
}

fn session_tx_isolation(_: &BuiltinDispatcher, session: &mut Session, _: &QueryContext) -> Result<QueryOutcome> {
    Ok(scalar_result(
        "@@session.tx_isolation",
        ColumnType::VarString,
        Some(session.tx_isolation.clone()),
    ))
}

fn select_database(_: &BuiltinDispatcher, session: &mut Session, _: &QueryContext) -> Result<QueryOutcome> {
    Ok(scalar_result(
        "DATABASE()",
        ColumnType::VarString,
        session.current_db.clone(),
    ))
}

fn select_one(_: &BuiltinDispatcher, _: &mut Session, _: &QueryContext) -> Result<QueryOutcome> {
    Ok(scalar_result("1", ColumnType::LongLong, Some("1".to_string())))
}

fn show_databases(d: &BuiltinDispatcher, _: &mut Session, ctx: &QueryContext) -> Result<QueryOutcome> {
    let args = ShowArgs::parse(&ctx.args);
    let rows = d
        .metadata
        .list_databases()
        .into_iter()
        .filter(|name| args.like_matches(name))
        .map(|name| ResultRow::from_strings([name]))
        .collect();

    Ok(QueryOutcome::result_set(text_fields(&["Database"]), rows))
}

fn show_tables(d: &BuiltinDispatcher, session: &mut Session, ctx: &QueryContext) -> Result<QueryOutcome> {
    let args = ShowArgs::parse(&ctx.args);
    let db = d.current_db(session, args.from.as_deref())?;
    let full = ctx.query_type == QueryType::ShowFullTables;

    let mut names: Vec<String> = d
        .metadata
        .list_tables(db)
        .ok_or_else(|| ProxyError::UnknownDatabase(db.to_string()))?
        .into_iter()
        .map(|t| t.name)
        .filter(|name| args.like_matches(name))
        .collect();
    names.sort();

    let column = format!("Tables_in_{}", db);
    let mut fields = vec![ResultField::new(column, ColumnType::VarString)];
    if full {
        fields.push(ResultField::new("Table_type", ColumnType::VarString));
    }

    let rows = names
        .into_iter()
        .map(|name| {
            if full {
                ResultRow::from_strings([name, "BASE TABLE".to_string()])
            } else {
                ResultRow::from_strings([name])
            }
        })
        .collect();

    Ok(QueryOutcome::result_set(fields, rows))
}

fn show_create_table(d: &BuiltinDispatcher, session: &mut Session, ctx: &QueryContext) -> Result<QueryOutcome> {
    let args = ShowArgs::parse(&ctx.args);
    let target = args.target.as_deref().ok_or(ProxyError::UnknownTable(String::new()))?;
    let (_, table) = d.table(session, target, args.from.as_deref())?;

    Ok(QueryOutcome::result_set(
        text_fields(&["Table", "Create Table"]),
        vec![ResultRow::from_strings([table.name.clone(), table.create_statement()])],
    ))
}

/// `SHOW FULL COLUMNS FROM t [FROM db]`
fn show_full_columns(d: &BuiltinDispatcher, session: &mut Session, ctx: &QueryContext) -> Result<QueryOutcome> {
    let tokens = tokenize(&ctx.args);
    let mut sources = tokens
        .iter()
        .enumerate()
        .filter(|(_, t)| t.eq_ignore_ascii_case("from") || t.eq_ignore_ascii_case("in"))
        .filter_map(|(i, _)| tokens.get(i + 1).map(String::as_str));
    let target = sources.next().ok_or(ProxyError::UnknownTable(String::new()))?;
    let explicit_db = sources.next();
    let like = like_pattern(&tokens);

    let (_, table) = d.table(session, target, explicit_db)?;

    let rows = table
        .columns
        .iter()
        .filter(|c| like.as_deref().map_or(true, |p| like_match(p, &c.name)))
        .map(|c| {
            let collation = match c.data_type.to_column_type() {
                ColumnType::VarChar | ColumnType::String | ColumnType::VarString => {
                    Some("utf8_general_ci".to_string())
                }
                _ => None,
            };
            ResultRow::new(vec![
                Some(c.name.clone()),
                Some(c.data_type.to_string()),
                collation,
                Some(yes_no(c.nullable)),
                Some(key_label(c.primary_key)),
                c.default_value.clone(),
                Some(extra_label(c.auto_increment)),
                Some("select,insert,update,references".to_string()),
                Some(c.comment.clone().unwrap_or_default()),
            ])
        })
        .collect();

    Ok(QueryOutcome::result_set(
        text_fields(&[
            "Field", "Type", "Collation", "Null", "Key", "Default", "Extra", "Privileges", "Comment",
        ]),
        rows,
    ))
}

fn describe_table(d: &BuiltinDispatcher, session: &mut Session, ctx: &QueryContext) -> Result<QueryOutcome> {
    let args = ShowArgs::parse(&ctx.args);
    let target = args.target.as_deref().ok_or(ProxyError::UnknownTable(String::new()))?;
    let (_, table) = d.table(session, target, None)?;

    let rows = table
        .columns
        .iter()
        .map(|c| {
            ResultRow::new(vec![
                Some(c.name.clone()),
                Some(c.data_type.to_string()),
                Some(yes_no(c.nullable)),
                Some(key_label(c.primary_key)),
                c.default_value.clone(),
                Some(extra_label(c.auto_increment)),
            ])
        })
        .collect();

    Ok(QueryOutcome::result_set(
        text_fields(&["Field", "Type", "Null", "Key", "Default", "Extra"]),
        rows,
    ))
}

fn show_table_status(d: &BuiltinDispatcher, session: &mut Session, ctx: &QueryContext) -> Result<QueryOutcome> {
    let args = ShowArgs::parse(&ctx.args);
    let db = d.current_db(session, args.from.as_deref())?;

    let mut tables: Vec<Table> = d
        .metadata
        .list_tables(db)
        .ok_or_else(|| ProxyError::UnknownDatabase(db.to_string()))?
        .into_iter()
        .filter(|t| args.like_matches(&t.name))
        .collect();
    tables.sort_by(|a, b| a.name.cmp(&b.name));

    let mut fields = vec![
        ResultField::new("Name", ColumnType::VarString),
        ResultField::new("Engine", ColumnType::VarString),
        ResultField::new("Version", ColumnType::LongLong),
        ResultField::new("Row_format", ColumnType::VarString),
    ];
    for name in [
        "Rows",
        "Avg_row_length",
        "Data_length",
        "Max_data_length",
        "Index_length",
        "Data_free",
        "Auto_increment",
    ] {
        fields.push(ResultField::new(name, ColumnType::LongLong));
    }
    for name in ["Create_time", "Update_time", "Check_time"] {
        fields.push(ResultField::new(name, ColumnType::DateTime));
    }
    fields.push(ResultField::new("Collation", ColumnType::VarString));
    fields.push(ResultField::new("Checksum", ColumnType::LongLong));
    fields.push(ResultField::new("Create_options", ColumnType::VarString));
    fields.push(ResultField::new("Comment", ColumnType::VarString));

    let rows = tables
        .into_iter()
        .map(|t| {
            let zero = || Some("0".to_string());
            ResultRow::new(vec![
                Some(t.name.clone()),
                Some(t.engine.clone()),
                Some("10".to_string()),
                Some("Dynamic".to_string()),
                Some(t.row_count.to_string()),
                zero(),
                zero(),
                zero(),
                zero(),
                zero(),
                None,
                None,
                None,
                None,
                Some("utf8_general_ci".to_string()),
                None,
                Some(String::new()),
                Some(t.comment.clone().unwrap_or_default()),
            ])
        })
        .collect();

    Ok(QueryOutcome::result_set(fields, rows))
}

/// `SHOW REGION <table> [FROM db]`
fn show_region(d: &BuiltinDispatcher, session: &mut Session, ctx: &QueryContext) -> Result<QueryOutcome> {
    let args = ShowArgs::parse(&ctx.args);
    let target = args.target.as_deref().ok_or(ProxyError::UnknownTable(String::new()))?;
    let (db, table) = d.table(session, target, args.from.as_deref())?;

    let rows = d
        .metadata
        .regions(&db, &table.name)
        .into_iter()
        .map(|r| {
            ResultRow::from_strings([
                r.region_id.to_string(),
                r.table,
                r.start_key,
                r.end_key,
                r.leader,
                r.peers.join(","),
            ])
        })
        .collect();

    let mut fields = vec![ResultField::new("Region_id", ColumnType::LongLong)];
    fields.extend(text_fields(&["Table", "Start_key", "End_key", "Leader", "Peers"]));
    Ok(QueryOutcome::result_set(fields, rows))
}

fn show_collation(d: &BuiltinDispatcher, _: &mut Session, ctx: &QueryContext) -> Result<QueryOutcome> {
    let args = ShowArgs::parse(&ctx.args);
    let rows = d
        .metadata
        .collations()
        .into_iter()
        .filter(|c| args.like_matches(&c.collation))
        .map(|c| {
            ResultRow::from_strings([
                c.collation,
                c.charset,
                c.id.to_string(),
                if c.is_default { "Yes" } else { "" }.to_string(),
                if c.compiled { "Yes" } else { "" }.to_string(),
                c.sortlen.to_string(),
            ])
        })
        .collect();

    Ok(QueryOutcome::result_set(
        vec![
            ResultField::new("Collation", ColumnType::VarString),
            ResultField::new("Charset", ColumnType::VarString),
            ResultField::new("Id", ColumnType::LongLong),
            ResultField::new("Default", ColumnType::VarString),
            ResultField::new("Compiled", ColumnType::VarString),
            ResultField::new("Sortlen", ColumnType::LongLong),
        ],
        rows,
    ))
}

fn show_warnings(_: &BuiltinDispatcher, session: &mut Session, _: &QueryContext) -> Result<QueryOutcome> {
    let rows = session
        .last_error
        .iter()
        .map(|e| ResultRow::from_strings(["Error".to_string(), e.code.to_string(), e.message.clone()]))
        .collect();

    Ok(QueryOutcome::result_set(
        vec![
            ResultField::new("Level", ColumnType::VarString),
            ResultField::new("Code", ColumnType::Long),
            ResultField::new("Message", ColumnType::VarString),
        ],
        rows,
    ))
}

fn show_variables(d: &BuiltinDispatcher, session: &mut Session, ctx: &QueryContext) -> Result<QueryOutcome> {
    let args = ShowArgs::parse(&ctx.args);

    let mut variables = d.metadata.server_variables();
    let autocommit = if session.autocommit { "ON" } else { "OFF" };
    variables.insert("autocommit".to_string(), autocommit.to_string());
    variables.insert("tx_isolation".to_string(), session.tx_isolation.clone());
    variables.insert("transaction_isolation".to_string(), session.tx_isolation.clone());
    for name in ["character_set_client", "character_set_connection", "character_set_results"] {
        variables.insert(name.to_string(), session.charset.clone());
    }

    let rows = variables
        .into_iter()
        .filter(|(name, _)| args.like_matches(name))
        .map(|(name, value)| ResultRow::from_strings([name, value]))
        .collect();

    Ok(QueryOutcome::result_set(text_fields(&["Variable_name", "Value"]), rows))
}

fn switch_database(d: &BuiltinDispatcher, session: &mut Session, name: &str) -> Result<QueryOutcome> {
    let name = unquote(name.trim());
    if name.is_empty() {
        return Err(ProxyError::NoDatabaseSelected);
    }
    if !d.metadata.database_exists(&name) {
        return Err(ProxyError::UnknownDatabase(name));
    }

    info!(connection_id = session.connection_id, database = %name, "changed database");
    session.current_db = Some(name);
    Ok(QueryOutcome::ok())
}

fn use_database(d: &BuiltinDispatcher, session: &mut Session, ctx: &QueryContext) -> Result<QueryOutcome> {
    switch_database(d, session, &ctx.args)
}

fn init_db(d: &BuiltinDispatcher, session: &mut Session, ctx: &QueryContext) -> Result<QueryOutcome> {
    switch_database(d, session, &ctx.sql)
}

/// `SET NAMES x [COLLATE y]`, `SET CHARSET x`, `SET CHARACTER SET x`,
/// `SET character_set_* = x`.
fn set_charset(_: &BuiltinDispatcher, session: &mut Session, ctx: &QueryContext) -> Result<QueryOutcome> {
    let value = assigned_value(&ctx.args);
    let charset = value.split_whitespace().next().map(unquote).unwrap_or_default();
    if charset.is_empty() {
        return Err(ProxyError::WrongValue("character_set_client".to_string(), value));
    }

    session.charset = if charset.eq_ignore_ascii_case("default") {
        "utf8".to_string()
    } else {
        charset.to_ascii_lowercase()
    };
    Ok(QueryOutcome::ok())
}

fn set_autocommit(_: &BuiltinDispatcher, session: &mut Session, ctx: &QueryContext) -> Result<QueryOutcome> {
    let value = unquote(&assigned_value(&ctx.args));
    session.autocommit = match value.to_ascii_lowercase().as_str() {
        "1" | "on" | "true" => true,
        "0" | "off" | "false" => false,
        _ => return Err(ProxyError::WrongValue("autocommit".to_string(), value)),
    };
    Ok(QueryOutcome::ok())
}

const ISOLATION_LEVELS: [&str; 4] = [
    "READ-UNCOMMITTED",
    "READ-COMMITTED",
    "REPEATABLE-READ",
    "SERIALIZABLE",
];

fn set_tx_isolation(_: &BuiltinDispatcher, session: &mut Session, ctx: &QueryContext) -> Result<QueryOutcome> {
    // `... isolation level read committed` spells the level as words.
    let raw = if ctx.statement.to_ascii_lowercase().contains("isolation level") {
        ctx.args.clone()
    } else {
        unquote(&assigned_value(&ctx.args))
    };

    let label = raw.trim().to_ascii_uppercase().replace(' ', "-");
    if !ISOLATION_LEVELS.contains(&label.as_str()) {
        return Err(ProxyError::WrongValue("transaction_isolation".to_string(), raw));
    }

    session.tx_isolation = label;
    Ok(QueryOutcome::ok())
}

fn ok(_: &BuiltinDispatcher, _: &mut Session, _: &QueryContext) -> Result<QueryOutcome> {
    Ok(QueryOutcome::ok())
}

fn statistics(d: &BuiltinDispatcher, session: &mut Session, _: &QueryContext) -> Result<QueryOutcome> {
    let uptime = d.started.elapsed().as_secs();
    let qps = session.questions as f64 / uptime.max(1) as f64;
    Ok(QueryOutcome::Text(format!(
        "Uptime: {}  Threads: 1  Questions: {}  Slow queries: 0  Opens: 0  Flush tables: 0  Open tables: 0  Queries per second avg: {:.3}",
        uptime, session.questions, qps
    )))
}

/// `COM_FIELD_LIST`: payload is `table\0[wildcard]`.
fn field_list(d: &BuiltinDispatcher, session: &mut Session, ctx: &QueryContext) -> Result<QueryOutcome> {
    let mut parts = ctx.sql.splitn(2, '\0');
    let table_name = parts.next().unwrap_or_default();
    let wildcard = parts.next().unwrap_or_default().trim_end_matches('\0');

    let (db, table) = d.table(session, table_name, None)?;
    let fields = table
        .columns
        .iter()
        .filter(|c| wildcard.is_empty() || like_match(wildcard, &c.name))
        .map(|c| c.to_result_field().from_table(db.as_str(), table.name.as_str()))
        .collect();

    Ok(QueryOutcome::FieldList(fields))
}

fn quit(_: &BuiltinDispatcher, _: &mut Session, _: &QueryContext) -> Result<QueryOutcome> {
    Ok(QueryOutcome::Close)
}

fn empty_query(_: &BuiltinDispatcher, _: &mut Session, _: &QueryContext) -> Result<QueryOutcome> {
    Err(ProxyError::EmptyQuery)
}

fn unsupported(_: &BuiltinDispatcher, _: &mut Session, ctx: &QueryContext) -> Result<QueryOutcome> {
    Err(ProxyError::Unsupported(format!("{:?}", ctx.query_type)))
}

fn yes_no(flag: bool) -> String {
    if flag { "YES" } else { "NO" }.to_string()
}

fn key_label(primary: bool) -> String {
    if primary { "PRI" } else { "" }.to_string()
}

fn extra_label(auto_increment: bool) -> String {
    if auto_increment { "auto_increment" } else { "" }.to_string()
}

/// Forms whose arguments are read with [`ShowArgs`]. Anything beyond
/// `[target] [FROM|IN db] [LIKE 'pattern']` goes to the planner.
fn takes_show_args(query_type: QueryType) -> bool {
    matches!(
        query_type,
        QueryType::ShowDatabases
            | QueryType::ShowTables
            | QueryType::ShowFullTables
            | QueryType::ShowCreateTable
            | QueryType::ShowFullColumns
            | QueryType::Desc
            | QueryType::ShowTableStatus
            | QueryType::ShowRegion
            | QueryType::ShowCollation
            | QueryType::ShowWarnings
            | QueryType::ShowVariables
            | QueryType::ShowSessionVariables
    )
}

/// `SHOW CREATE TABLE t`, `DESC t`, `SHOW REGION t`.
fn takes_target(query_type: QueryType) -> bool {
    matches!(
        query_type,
        QueryType::ShowCreateTable | QueryType::Desc | QueryType::ShowRegion
    )
}

/// Arguments of the list-style `SHOW` forms:
/// `[target] [FROM|IN db] [LIKE 'pattern']`.
#[derive(Debug, Default, PartialEq)]
struct ShowArgs {
    target: Option<String>,
    from: Option<String>,
    like: Option<String>,
    /// First token that fits none of the above, e.g. `WHERE`.
    unhandled: Option<String>,
}

impl ShowArgs {
    fn parse(args: &str) -> Self {
        let tokens = tokenize(args);
        let mut parsed = ShowArgs::default();
        let mut iter = tokens.into_iter();

        while let Some(token) = iter.next() {
            if token.eq_ignore_ascii_case("from") || token.eq_ignore_ascii_case("in") {
                parsed.from = iter.next().map(|db| unquote(&db));
            } else if token.eq_ignore_ascii_case("like") && parsed.like.is_none() {
                parsed.like = iter.next().map(|p| unquote(&p));
            } else if parsed.target.is_none() && parsed.like.is_none() && !is_clause_keyword(&token) {
                parsed.target = Some(token);
            } else {
                parsed.unhandled = Some(token);
                break;
            }
        }
        parsed
    }

    fn like_matches(&self, value: &str) -> bool {
        self.like.as_deref().map_or(true, |p| like_match(p, value))
    }
}

fn is_clause_keyword(token: &str) -> bool {
    ["where", "like", "limit", "order", "group"]
        .iter()
        .any(|k| token.eq_ignore_ascii_case(k))
}

fn like_pattern(tokens: &[String]) -> Option<String> {
    let pos = tokens.iter().position(|t| t.eq_ignore_ascii_case("like"))?;
    tokens.get(pos + 1).map(|p| unquote(p))
}

/// Splits on whitespace, keeping quoted strings whole.
fn tokenize(args: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut quote: Option<char> = None;

    for c in args.chars() {
        match quote {
            Some(q) => {
                current.push(c);
                if c == q {
                    quote = None;
                }
            }
            None if c == '\'' || c == '"' || c == '`' => {
                current.push(c);
                quote = Some(c);
            }
            None if c.is_whitespace() => {
                if !current.is_empty() {
                    tokens.push(std::mem::take(&mut current));
                }
            }
            None => current.push(c),
        }
    }
    if !current.is_empty() {
        tokens.push(current);
    }
    tokens
}

/// Value side of `name = value` or `name value`.
fn assigned_value(args: &str) -> String {
    let args = args.trim();
    let args = args
        .strip_prefix(":=")
        .or_else(|| args.strip_prefix('='))
        .unwrap_or(args);
    args.trim().to_string()
}

fn unquote(value: &str) -> String {
    let value = value.trim();
    for q in ['\'', '"', '`'] {
        if value.len() >= 2 && value.starts_with(q) && value.ends_with(q) {
            return value[1..value.len() - 1].to_string();
        }
    }
    value.to_string()
}

/// `db.table`, with optional backticks around either part.
fn split_qualified(name: &str) -> (Option<&str>, &str) {
    fn strip(s: &str) -> &str {
        s.trim().trim_matches('`')
    }

    match name.split_once("`.`").or_else(|| name.split_once('.')) {
        Some((db, table)) => (Some(strip(db)), strip(table)),
        None => (None, strip(name)),
    }
}

/// SQL `LIKE` with `%` and `_`, case-insensitive.
pub fn like_match(pattern: &str, value: &str) -> bool {
    let p: Vec<char> = pattern.to_lowercase().chars().collect();
    let v: Vec<char> = value.to_lowercase().chars().collect();

    let (mut pi, mut vi) = (0, 0);
    let mut backtrack: Option<(usize, usize)> = None;

    while vi < v.len() {
        if pi < p.len() && p[pi] == '\\' && pi + 1 < p.len() && p[pi + 1] == v[vi] {
            pi += 2;
            vi += 1;
        } else if pi < p.len() && (p[pi] == '_' || (p[pi] == v[vi] && p[pi] != '%')) {
            pi += 1;
            vi += 1;
        } else if pi < p.len() && p[pi] == '%' {
            backtrack = Some((pi, vi));
            pi += 1;
        } else if let Some((star, matched)) = backtrack {
            pi = star + 1;
            vi = matched + 1;
            backtrack = Some((star, matched + 1));
        } else {
            return false;
        }
    }

    p[pi..].iter().all(|c| *c == '%')
}
