use chrono::NaiveDate;
use sqlparser::ast::{
    self, AssignmentTarget, Expr, FromTable, ObjectNamePart, SetExpr, Statement, TableFactor, TableObject, Value,
    ValueWithSpan,
};
use sqlparser::dialect::PostgreSqlDialect;
use sqlparser::parser::Parser;
use ulid::Ulid;

use crate::model::*;

/// Parsed command from SQL input.
#[derive(Debug, PartialEq)]
pub enum Command {
    SelectBookings {
        filter: BookingFilter,
    },
    /// One row creates one booking; several rows are an all-or-nothing batch.
    InsertBookings {
        requests: Vec<BookingRequest>,
    },
    UpdateBooking {
        id: Ulid,
        patch: BookingPatch,
    },
    DeleteBooking {
        id: Ulid,
    },
    SelectValidation {
        request: BookingRequest,
    },
    SelectResourceStats,
    SelectFleetSummary,
    SelectCalendar {
        week_start: NaiveDate,
    },
    SelectOverview,
    SelectResources,
}

const BOOKING_COLUMNS: [&str; 4] = ["resource", "start_time", "end_time", "requested_by"];

pub fn parse_sql(sql: &str) -> Result<Command, SqlError> {
    let dialect = PostgreSqlDialect {};
    let stmts = Parser::parse_sql(&dialect, sql).map_err(|e| SqlError::Parse(e.to_string()))?;
    if stmts.is_empty() {
        return Err(SqlError::Empty);
    }

    match &stmts[0] {
        Statement::Insert(insert) => parse_insert(insert),
        Statement::Update {
            table,
            assignments,
            selection,
            ..
        } => parse_update(table, assignments, selection),
        Statement::Delete(delete) => parse_delete(delete),
        Statement::Query(query) => parse_select(query),
        other => Err(SqlError::Unsupported(format!("{other}"))),
    }
}

fn parse_insert(insert: &ast::Insert) -> Result<Command, SqlError> {
    let table = insert_table_name(insert)?;
    if table != "bookings" {
        return Err(SqlError::UnknownTable(table));
    }

    let columns: Vec<String> = if insert.columns.is_empty() {
        BOOKING_COLUMNS.iter().map(|c| c.to_string()).collect()
    } else {
        insert.columns.iter().map(|c| c.value.to_lowercase()).collect()
    };
    for col in &columns {
        if !BOOKING_COLUMNS.contains(&col.as_str()) {
            return Err(SqlError::UnknownColumn(col.clone()));
        }
    }

    let rows = extract_all_insert_rows(insert)?;
    let mut requests = Vec::with_capacity(rows.len());
    for (i, row) in rows.iter().enumerate() {
        if row.len() != columns.len() {
            return Err(SqlError::WrongArity("bookings row", columns.len(), row.len()));
        }
        let mut request = BookingRequest::default();
        for (col, expr) in columns.iter().zip(row) {
            assign_request_field(&mut request, col, expr)
                .map_err(|e| SqlError::Parse(format!("row {i}: {e}")))?;
        }
        requests.push(request);
    }
    Ok(Command::InsertBookings { requests })
}

fn assign_request_field(request: &mut BookingRequest, col: &str, expr: &Expr) -> Result<(), SqlError> {
    match col {
        "resource" => request.resource = parse_text(expr)?.unwrap_or_default(),
        "start_time" => request.start_time = parse_timestamp_expr(expr)?,
        "end_time" => request.end_time = parse_timestamp_expr(expr)?,
        "requested_by" => request.requested_by = parse_text(expr)?.unwrap_or_default(),
        _ => return Err(SqlError::UnknownColumn(col.to_string())),
    }
    Ok(())
}

fn parse_update(
    table: &ast::TableWithJoins,
    assignments: &[ast::Assignment],
    selection: &Option<Expr>,
) -> Result<Command, SqlError> {
    let name = table_factor_name(&table.relation)?;
    if name != "bookings" {
        return Err(SqlError::UnknownTable(name));
    }
    let id = extract_where_id(selection)?;

    let mut patch = BookingPatch::default();
    for assignment in assignments {
        let col = match &assignment.target {
            AssignmentTarget::ColumnName(name) => {
                object_name_last(name).ok_or_else(|| SqlError::Parse("empty column name".into()))?
            }
            AssignmentTarget::Tuple(_) => return Err(SqlError::Unsupported("tuple assignment".into())),
        };
        let value = &assignment.value;
        match col.as_str() {
            "resource" => patch.resource = Some(parse_text(value)?.unwrap_or_default()),
            "start_time" => {
                patch.start_time = Some(parse_timestamp_expr(value)?.ok_or(SqlError::NullValue("start_time"))?)
            }
            "end_time" => {
                patch.end_time = Some(parse_timestamp_expr(value)?.ok_or(SqlError::NullValue("end_time"))?)
            }
            "requested_by" => patch.requested_by = Some(parse_text(value)?.unwrap_or_default()),
            "id" | "created_at" => return Err(SqlError::ReadOnlyColumn(col)),
            _ => return Err(SqlError::UnknownColumn(col)),
        }
    }
    Ok(Command::UpdateBooking { id, patch })
}

fn parse_delete(delete: &ast::Delete) -> Result<Command, SqlError> {
    let table = delete_table_name(delete)?;
    let id = extract_where_id(&delete.selection)?;

    match table.as_str() {
        "bookings" => Ok(Command::DeleteBooking { id }),
        _ => Err(SqlError::UnknownTable(table)),
    }
}

fn parse_select(query: &ast::Query) -> Result<Command, SqlError> {
    let select = match query.body.as_ref() {
        SetExpr::Select(s) => s,
        _ => return Err(SqlError::Unsupported("non-SELECT query".into())),
    };

    if select.from.is_empty() {
        return Err(SqlError::Parse("SELECT without FROM".into()));
    }
    let table = table_factor_name(&select.from[0].relation)?;

    let mut filters = Vec::new();
    if let Some(selection) = &select.selection {
        collect_eq_filters(selection, &mut filters)?;
    }

    match table.as_str() {
        "bookings" => {
            let mut filter = BookingFilter::default();
            for (col, expr) in filters {
                match col.as_str() {
                    "resource" => filter.resource = parse_text(expr)?,
                    "date" | "day" => filter.date = Some(parse_date_expr(expr)?),
                    "status" => {
                        let raw = parse_text(expr)?.unwrap_or_default();
                        filter.status = Some(raw.parse().map_err(SqlError::Parse)?);
                    }
                    "search" => filter.search = parse_text(expr)?.filter(|s| !s.is_empty()),
                    _ => return Err(SqlError::UnknownColumn(col)),
                }
            }
            Ok(Command::SelectBookings { filter })
        }
        "validation" => {
            let mut request = BookingRequest::default();
            for (col, expr) in filters {
                assign_request_field(&mut request, &col, expr)?;
            }
            Ok(Command::SelectValidation { request })
        }
        "calendar" => {
            let mut week_start = None;
            for (col, expr) in filters {
                match col.as_str() {
                    "week_start" => week_start = Some(parse_date_expr(expr)?),
                    _ => return Err(SqlError::UnknownColumn(col)),
                }
            }
            Ok(Command::SelectCalendar {
                week_start: week_start.ok_or(SqlError::MissingFilter("week_start"))?,
            })
        }
        "resource_stats" => no_filters(filters, Command::SelectResourceStats),
        "fleet_summary" => no_filters(filters, Command::SelectFleetSummary),
        "overview" => no_filters(filters, Command::SelectOverview),
        "resources" => no_filters(filters, Command::SelectResources),
        _ => Err(SqlError::UnknownTable(table)),
    }
}

fn no_filters(filters: Vec<(String, &Expr)>, cmd: Command) -> Result<Command, SqlError> {
    match filters.into_iter().next() {
        Some((col, _)) => Err(SqlError::UnknownColumn(col)),
        None => Ok(cmd),
    }
}

/// Flatten `a = x AND (b = y AND c = z)` into column/value pairs.
fn collect_eq_filters<'a>(expr: &'a Expr, out: &mut Vec<(String, &'a Expr)>) -> Result<(), SqlError> {
    match expr {
        Expr::Nested(inner) => collect_eq_filters(inner, out),
        Expr::BinaryOp { left, op, right } => match op {
            ast::BinaryOperator::And => {
                collect_eq_filters(left, out)?;
                collect_eq_filters(right, out)
            }
            ast::BinaryOperator::Eq => {
                let col = expr_column_name(left)
                    .ok_or_else(|| SqlError::Unsupported(format!("filter on {left}")))?;
                out.push((col, right.as_ref()));
                Ok(())
            }
            other => Err(SqlError::Unsupported(format!("operator {other}"))),
        },
        other => Err(SqlError::Unsupported(format!("filter {other}"))),
    }
}

// ── Helpers ───────────────────────────────────────────────────

fn object_name_last(name: &ast::ObjectName) -> Option<String> {
    name.0.last().and_then(|part| match part {
        ObjectNamePart::Identifier(ident) => Some(ident.value.to_lowercase()),
        _ => None,
    })
}

fn insert_table_name(insert: &ast::Insert) -> Result<String, SqlError> {
    match &insert.table {
        TableObject::TableName(name) => {
            object_name_last(name).ok_or_else(|| SqlError::Parse("empty table name".into()))
        }
        _ => Err(SqlError::Parse("unsupported table object in INSERT".into())),
    }
}

fn delete_table_name(delete: &ast::Delete) -> Result<String, SqlError> {
    let tables_with_joins = match &delete.from {
        FromTable::WithFromKeyword(t) | FromTable::WithoutKeyword(t) => t,
    };
    if let Some(first) = tables_with_joins.first() {
        table_factor_name(&first.relation)
    } else {
        Err(SqlError::Parse("DELETE without table".into()))
    }
}

fn table_factor_name(tf: &TableFactor) -> Result<String, SqlError> {
    match tf {
        TableFactor::Table { name, .. } => {
            object_name_last(name).ok_or_else(|| SqlError::Parse("empty table name".into()))
        }
        _ => Err(SqlError::Parse("complex table expression".into())),
    }
}

fn extract_all_insert_rows(insert: &ast::Insert) -> Result<&[Vec<Expr>], SqlError> {
    let body = insert
        .source
        .as_ref()
        .ok_or(SqlError::Parse("no VALUES".into()))?;
    match body.body.as_ref() {
        SetExpr::Values(values) => {
            if values.rows.is_empty() {
                return Err(SqlError::Parse("empty VALUES".into()));
            }
            Ok(&values.rows)
        }
        _ => Err(SqlError::Parse("expected VALUES".into())),
    }
}

fn extract_where_id(selection: &Option<Expr>) -> Result<Ulid, SqlError> {
    let sel = selection.as_ref().ok_or(SqlError::MissingFilter("id"))?;
    match sel {
        Expr::BinaryOp {
            left,
            op: ast::BinaryOperator::Eq,
            right,
        } => {
            if expr_column_name(left).as_deref() == Some("id") {
                parse_ulid_expr(right)
            } else {
                Err(SqlError::MissingFilter("id"))
            }
        }
        _ => Err(SqlError::MissingFilter("id")),
    }
}

fn expr_column_name(expr: &Expr) -> Option<String> {
    match expr {
        Expr::Identifier(ident) => Some(ident.value.to_lowercase()),
        Expr::CompoundIdentifier(parts) => parts.last().map(|i| i.value.to_lowercase()),
        _ => None,
    }
}

fn extract_value(expr: &Expr) -> Option<&Value> {
    match expr {
        Expr::Value(ValueWithSpan { value, .. }) => Some(value),
        _ => None,
    }
}

fn parse_ulid_expr(expr: &Expr) -> Result<Ulid, SqlError> {
    if let Some(value) = extract_value(expr) {
        match value {
            Value::SingleQuotedString(s) => {
                Ulid::from_string(s).map_err(|e| SqlError::Parse(format!("bad ULID: {e}")))
            }
            _ => Err(SqlError::Parse(format!("expected string, got {value:?}"))),
        }
    } else {
        Err(SqlError::Parse(format!("expected value, got {expr:?}")))
    }
}

/// A string literal, or `None` for NULL.
fn parse_text(expr: &Expr) -> Result<Option<String>, SqlError> {
    match extract_value(expr) {
        Some(Value::Null) => Ok(None),
        Some(Value::SingleQuotedString(s)) => Ok(Some(s.clone())),
        Some(value) => Err(SqlError::Parse(format!("expected string, got {value:?}"))),
        None => Err(SqlError::Parse(format!("expected value, got {expr:?}"))),
    }
}

/// NULL and the empty string both mean "not given".
fn parse_timestamp_expr(expr: &Expr) -> Result<Option<Timestamp>, SqlError> {
    match parse_text(expr)? {
        None => Ok(None),
        Some(s) if s.trim().is_empty() => Ok(None),
        Some(s) => parse_timestamp(&s)
            .map(Some)
            .ok_or_else(|| SqlError::Parse(format!("bad timestamp: {s}"))),
    }
}

fn parse_date_expr(expr: &Expr) -> Result<NaiveDate, SqlError> {
    let s = parse_text(expr)?.unwrap_or_default();
    parse_date(&s).ok_or_else(|| SqlError::Parse(format!("bad date: {s}")))
}

// ── Errors ────────────────────────────────────────────────────

#[derive(Debug)]
pub enum SqlError {
    Parse(String),
    Empty,
    Unsupported(String),
    UnknownTable(String),
    UnknownColumn(String),
    ReadOnlyColumn(String),
    NullValue(&'static str),
    WrongArity(&'static str, usize, usize),
    MissingFilter(&'static str),
}

impl std::fmt::Display for SqlError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SqlError::Parse(s) => write!(f, "parse error: {s}"),
            SqlError::Empty => write!(f, "empty query"),
            SqlError::Unsupported(s) => write!(f, "unsupported: {s}"),
            SqlError::UnknownTable(t) => write!(f, "unknown table: {t}"),
            SqlError::UnknownColumn(c) => write!(f, "unknown column: {c}"),
            SqlError::ReadOnlyColumn(c) => write!(f, "column {c} cannot be changed"),
            SqlError::NullValue(c) => write!(f, "{c} cannot be NULL"),
            SqlError::WrongArity(t, expected, got) => {
                write!(f, "{t}: expected {expected} values, got {got}")
            }
            SqlError::MissingFilter(col) => write!(f, "missing filter: {col}"),
        }
    }
}

impl std::error::Error for SqlError {}
