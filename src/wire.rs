use std::fmt::Debug;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use futures::stream;
use futures::Sink;
use pgwire::api::auth::StartupHandler;
use pgwire::api::copy::CopyHandler;
use pgwire::api::portal::{Format, Portal};
use pgwire::api::query::{ExtendedQueryHandler, SimpleQueryHandler};
use pgwire::api::results::{
    DataRowEncoder, DescribePortalResponse, DescribeStatementResponse, FieldFormat, FieldInfo,
    QueryResponse, Response, Tag,
};
use pgwire::api::stmt::{QueryParser, StoredStatement};
use pgwire::api::store::PortalStore;
use pgwire::api::{ClientInfo, ClientPortalStore, NoopHandler, PgWireServerHandlers, Type};
use pgwire::error::{ErrorInfo, PgWireError, PgWireResult};
use pgwire::messages::data::DataRow;
use pgwire::messages::PgWireBackendMessage;
use tokio::net::TcpStream;

use crate::engine::{classify, Engine, EngineError, ValidationError, WeekGrid};
use crate::model::*;
use crate::observability::{command_label, QUERIES_TOTAL, QUERY_DURATION_SECONDS};
use crate::sql::{self, Command};

pub struct BookdeskHandler {
    engine: Arc<Engine>,
    query_parser: Arc<BookdeskQueryParser>,
}

impl BookdeskHandler {
    pub fn new(engine: Arc<Engine>) -> Self {
        Self {
            engine,
            query_parser: Arc::new(BookdeskQueryParser),
        }
    }

    /// Parse, execute and record one statement.
    async fn run(&self, sql: &str) -> PgWireResult<Response> {
        let cmd = sql::parse_sql(sql).map_err(sql_err)?;
        let label = command_label(&cmd);
        let started = Instant::now();
        let result = self.execute_command(cmd).await;
        metrics::histogram!(QUERY_DURATION_SECONDS, "command" => label)
            .record(started.elapsed().as_secs_f64());
        let status = if result.is_ok() { "ok" } else { "error" };
        metrics::counter!(QUERIES_TOTAL, "command" => label, "status" => status).increment(1);
        result
    }

    async fn execute_command(&self, cmd: Command) -> PgWireResult<Response> {
        let engine = &self.engine;
        match cmd {
            Command::SelectBookings { filter } => {
                let bookings = engine.find_bookings(&filter).await.map_err(engine_err)?;
                let now = engine.now();
                let schema = Arc::new(bookings_schema());
                let rows: Vec<PgWireResult<DataRow>> = bookings
                    .iter()
                    .map(|b| {
                        let mut encoder = DataRowEncoder::new(schema.clone());
                        encoder.encode_field(&b.id.to_string())?;
                        encoder.encode_field(&b.resource)?;
                        encoder.encode_field(&format_timestamp(&b.start_time))?;
                        encoder.encode_field(&format_timestamp(&b.end_time))?;
                        encoder.encode_field(&b.requested_by)?;
                        encoder.encode_field(&format_timestamp(&b.created_at))?;
                        encoder.encode_field(&classify(&b.span(), now).to_string())?;
                        encoder.encode_field(&b.span().format_duration())?;
                        Ok(encoder.take_row())
                    })
                    .collect();
                Ok(query_response(schema, rows))
            }
            Command::InsertBookings { mut requests } => {
                let count = if requests.len() == 1 {
                    let request = requests.remove(0);
                    engine.create_booking(request).await.map_err(engine_err)?;
                    1
                } else {
                    engine.create_bookings(requests).await.map_err(engine_err)?.len()
                };
                Ok(Response::Execution(Tag::new("INSERT").with_rows(count)))
            }
            Command::UpdateBooking { id, patch } => {
                engine.update_booking(id, patch).await.map_err(engine_err)?;
                Ok(Response::Execution(Tag::new("UPDATE").with_rows(1)))
            }
            Command::DeleteBooking { id } => {
                let removed = engine.delete_booking(id).await.map_err(engine_err)?;
                Ok(Response::Execution(Tag::new("DELETE").with_rows(usize::from(removed))))
            }
            Command::SelectValidation { request } => {
                let errors = engine.validate_request(&request).await.map_err(engine_err)?;
                let schema = Arc::new(validation_schema());
                let rows: Vec<PgWireResult<DataRow>> =
                    errors.iter().map(|e| validation_row(&schema, e)).collect();
                Ok(query_response(schema, rows))
            }
            Command::SelectResourceStats => {
                let stats = engine.resource_stats().await.map_err(engine_err)?;
                let schema = Arc::new(resource_stats_schema());
                let rows: Vec<PgWireResult<DataRow>> = stats
                    .iter()
                    .map(|s| {
                        let mut encoder = DataRowEncoder::new(schema.clone());
                        encoder.encode_field(&s.name)?;
                        encoder.encode_field(&(s.total_bookings as i64))?;
                        encoder.encode_field(&(s.upcoming_bookings as i64))?;
                        encoder.encode_field(&(s.ongoing_bookings as i64))?;
                        encoder.encode_field(&round_tenths(s.total_hours))?;
                        encoder.encode_field(&s.utilization.round())?;
                        encoder.encode_field(&s.is_active)?;
                        Ok(encoder.take_row())
                    })
                    .collect();
                Ok(query_response(schema, rows))
            }
            Command::SelectFleetSummary => {
                let summary = engine.fleet_summary().await.map_err(engine_err)?;
                let schema = Arc::new(fleet_summary_schema());
                let mut encoder = DataRowEncoder::new(schema.clone());
                encoder.encode_field(&(summary.resources as i64))?;
                encoder.encode_field(&(summary.active_resources as i64))?;
                encoder.encode_field(&summary.average_utilization.round())?;
                encoder.encode_field(&round_tenths(summary.total_hours))?;
                Ok(query_response(schema, vec![Ok(encoder.take_row())]))
            }
            Command::SelectCalendar { week_start } => {
                let grid = engine.week_calendar(week_start).await.map_err(engine_err)?;
                let schema = Arc::new(calendar_schema());
                let rows = calendar_rows(&schema, &grid);
                Ok(query_response(schema, rows))
            }
            Command::SelectOverview => {
                let o = engine.overview().await.map_err(engine_err)?;
                let schema = Arc::new(overview_schema());
                let mut encoder = DataRowEncoder::new(schema.clone());
                encoder.encode_field(&(o.total_bookings as i64))?;
                encoder.encode_field(&(o.upcoming_bookings as i64))?;
                encoder.encode_field(&(o.ongoing_bookings as i64))?;
                encoder.encode_field(&(o.today_bookings as i64))?;
                encoder.encode_field(&(o.resources_in_use as i64))?;
                Ok(query_response(schema, vec![Ok(encoder.take_row())]))
            }
            Command::SelectResources => {
                let schema = Arc::new(resources_schema());
                let rows: Vec<PgWireResult<DataRow>> = engine
                    .resources()
                    .iter()
                    .map(|name| {
                        let mut encoder = DataRowEncoder::new(schema.clone());
                        encoder.encode_field(name)?;
                        Ok(encoder.take_row())
                    })
                    .collect();
                Ok(query_response(schema, rows))
            }
        }
    }
}

fn query_response(schema: Arc<Vec<FieldInfo>>, rows: Vec<PgWireResult<DataRow>>) -> Response {
    Response::Query(QueryResponse::new(schema, stream::iter(rows)))
}

fn validation_row(schema: &Arc<Vec<FieldInfo>>, e: &ValidationError) -> PgWireResult<DataRow> {
    let mut encoder = DataRowEncoder::new(schema.clone());
    encoder.encode_field(&e.code().to_string())?;
    encoder.encode_field(&format!("{:?}", e.class()).to_lowercase())?;
    encoder.encode_field(&e.to_string())?;
    Ok(encoder.take_row())
}

/// One row per booking per occupied `(day, hour)` cell.
fn calendar_rows(schema: &Arc<Vec<FieldInfo>>, grid: &WeekGrid) -> Vec<PgWireResult<DataRow>> {
    grid.slots()
        .flat_map(|(day, hour, bookings)| {
            bookings
                .iter()
                .map(move |b| calendar_row(schema, day, hour, b))
        })
        .collect()
}

fn calendar_row(
    schema: &Arc<Vec<FieldInfo>>,
    day: chrono::NaiveDate,
    hour: u32,
    b: &Booking,
) -> PgWireResult<DataRow> {
    let mut encoder = DataRowEncoder::new(schema.clone());
    encoder.encode_field(&day.format("%Y-%m-%d").to_string())?;
    encoder.encode_field(&i64::from(hour))?;
    encoder.encode_field(&b.id.to_string())?;
    encoder.encode_field(&b.resource)?;
    encoder.encode_field(&b.requested_by)?;
    encoder.encode_field(&format_timestamp(&b.start_time))?;
    encoder.encode_field(&format_timestamp(&b.end_time))?;
    Ok(encoder.take_row())
}

fn round_tenths(x: f64) -> f64 {
    (x * 10.0).round() / 10.0
}

// ── Schemas ──────────────────────────────────────────────────────

fn field(name: &str, ty: Type) -> FieldInfo {
    FieldInfo::new(name.into(), None, None, ty, FieldFormat::Text)
}

fn bookings_schema() -> Vec<FieldInfo> {
    vec![
        field("id", Type::VARCHAR),
        field("resource", Type::VARCHAR),
        field("start_time", Type::VARCHAR),
        field("end_time", Type::VARCHAR),
        field("requested_by", Type::VARCHAR),
        field("created_at", Type::VARCHAR),
        field("status", Type::VARCHAR),
        field("duration", Type::VARCHAR),
    ]
}

fn validation_schema() -> Vec<FieldInfo> {
    vec![
        field("code", Type::VARCHAR),
        field("class", Type::VARCHAR),
        field("message", Type::VARCHAR),
    ]
}

fn resource_stats_schema() -> Vec<FieldInfo> {
    vec![
        field("name", Type::VARCHAR),
        field("total_bookings", Type::INT8),
        field("upcoming_bookings", Type::INT8),
        field("ongoing_bookings", Type::INT8),
        field("total_hours", Type::FLOAT8),
        field("utilization", Type::FLOAT8),
        field("is_active", Type::BOOL),
    ]
}

fn fleet_summary_schema() -> Vec<FieldInfo> {
    vec![
        field("resources", Type::INT8),
        field("active_resources", Type::INT8),
        field("average_utilization", Type::FLOAT8),
        field("total_hours", Type::FLOAT8),
    ]
}

fn calendar_schema() -> Vec<FieldInfo> {
    vec![
        field("day", Type::VARCHAR),
        field("hour", Type::INT8),
        field("booking_id", Type::VARCHAR),
        field("resource", Type::VARCHAR),
        field("requested_by", Type::VARCHAR),
        field("start_time", Type::VARCHAR),
        field("end_time", Type::VARCHAR),
    ]
}

fn overview_schema() -> Vec<FieldInfo> {
    vec![
        field("total_bookings", Type::INT8),
        field("upcoming_bookings", Type::INT8),
        field("ongoing_bookings", Type::INT8),
        field("today_bookings", Type::INT8),
        field("resources_in_use", Type::INT8),
    ]
}

fn resources_schema() -> Vec<FieldInfo> {
    vec![field("name", Type::VARCHAR)]
}

/// Result columns of a statement, judged from the table after `FROM`.
/// Non-SELECT statements have none.
fn result_schema(sql: &str) -> Vec<FieldInfo> {
    let lower = sql.to_lowercase();
    let mut words = lower.split_whitespace();
    if words.next() != Some("select") {
        return vec![];
    }
    let table = words
        .skip_while(|w| *w != "from")
        .nth(1)
        .map(|t| t.trim_end_matches(';'));
    match table {
        Some("bookings") => bookings_schema(),
        Some("validation") => validation_schema(),
        Some("resource_stats") => resource_stats_schema(),
        Some("fleet_summary") => fleet_summary_schema(),
        Some("calendar") => calendar_schema(),
        Some("overview") => overview_schema(),
        Some("resources") => resources_schema(),
        _ => vec![],
    }
}

#[async_trait]
impl SimpleQueryHandler for BookdeskHandler {
    async fn do_query<C>(
        &self,
        _client: &mut C,
        query: &str,
    ) -> PgWireResult<Vec<Response>>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        Ok(vec![self.run(query).await?])
    }
}

// ── Extended Query Protocol ──────────────────────────────────────

#[derive(Debug)]
pub struct BookdeskQueryParser;

#[async_trait]
impl QueryParser for BookdeskQueryParser {
    type Statement = String;

    async fn parse_sql<C>(
        &self,
        _client: &C,
        sql: &str,
        _types: &[Option<Type>],
    ) -> PgWireResult<String>
    where
        C: ClientInfo + Unpin + Send + Sync,
    {
        Ok(sql.to_string())
    }

    fn get_parameter_types(&self, stmt: &String) -> PgWireResult<Vec<Type>> {
        Ok(vec![Type::VARCHAR; count_params(stmt)])
    }

    fn get_result_schema(
        &self,
        stmt: &String,
        _column_format: Option<&Format>,
    ) -> PgWireResult<Vec<FieldInfo>> {
        Ok(result_schema(stmt))
    }
}

#[async_trait]
impl ExtendedQueryHandler for BookdeskHandler {
    type Statement = String;
    type QueryParser = BookdeskQueryParser;

    fn query_parser(&self) -> Arc<Self::QueryParser> {
        self.query_parser.clone()
    }

    async fn do_query<C>(
        &self,
        _client: &mut C,
        portal: &Portal<Self::Statement>,
        _max_rows: usize,
    ) -> PgWireResult<Response>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::PortalStore: PortalStore<Statement = Self::Statement>,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        let sql = substitute_params(portal);
        self.run(&sql).await
    }

    async fn do_describe_statement<C>(
        &self,
        _client: &mut C,
        target: &StoredStatement<Self::Statement>,
    ) -> PgWireResult<DescribeStatementResponse>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::PortalStore: PortalStore<Statement = Self::Statement>,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        let param_types = vec![Type::VARCHAR; count_params(&target.statement)];
        Ok(DescribeStatementResponse::new(
            param_types,
            result_schema(&target.statement),
        ))
    }

    async fn do_describe_portal<C>(
        &self,
        _client: &mut C,
        target: &Portal<Self::Statement>,
    ) -> PgWireResult<DescribePortalResponse>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::PortalStore: PortalStore<Statement = Self::Statement>,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        Ok(DescribePortalResponse::new(result_schema(
            &target.statement.statement,
        )))
    }
}

/// Count the highest $N parameter placeholder in the SQL string.
fn count_params(sql: &str) -> usize {
    let mut max = 0usize;
    let bytes = sql.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'$' {
            i += 1;
            let start = i;
            while i < bytes.len() && bytes[i].is_ascii_digit() {
                i += 1;
            }
            if i > start
                && let Ok(n) = sql[start..i].parse::<usize>()
            {
                max = max.max(n);
            }
        } else {
            i += 1;
        }
    }
    max
}

/// Substitute $1, $2, ... placeholders with bound parameter values (text format).
fn substitute_params(portal: &Portal<String>) -> String {
    bind_params(&portal.statement.statement, &portal.parameters[..])
}

/// Single left-to-right pass: each `$N` token is replaced once, so `$1` inside
/// a bound value is never expanded again. Tokens with no matching parameter
/// are left as written.
fn bind_params<B: AsRef<[u8]>>(sql: &str, params: &[Option<B>]) -> String {
    let bytes = sql.as_bytes();
    let mut out = String::with_capacity(sql.len());
    let mut copied = 0;
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] != b'$' {
            i += 1;
            continue;
        }
        let start = i + 1;
        let mut end = start;
        while end < bytes.len() && bytes[end].is_ascii_digit() {
            end += 1;
        }
        if end > start
            && let Ok(n) = sql[start..end].parse::<usize>()
            && let Some(param) = n.checked_sub(1).and_then(|k| params.get(k))
        {
            out.push_str(&sql[copied..i]);
            match param {
                Some(value) => {
                    let text = String::from_utf8_lossy(value.as_ref());
                    out.push('\'');
                    out.push_str(&text.replace('\'', "''"));
                    out.push('\'');
                }
                None => out.push_str("NULL"),
            }
            copied = end;
        }
        i = end;
    }
    out.push_str(&sql[copied..]);
    out
}

// ── Factory ──────────────────────────────────────────────────────

/// Connections start without authentication.
pub struct BookdeskFactory {
    handler: Arc<BookdeskHandler>,
    noop: Arc<NoopHandler>,
}

impl BookdeskFactory {
    pub fn new(engine: Arc<Engine>) -> Self {
        Self {
            handler: Arc::new(BookdeskHandler::new(engine)),
            noop: Arc::new(NoopHandler),
        }
    }
}

impl PgWireServerHandlers for BookdeskFactory {
    fn simple_query_handler(&self) -> Arc<impl SimpleQueryHandler> {
        self.handler.clone()
    }

    fn extended_query_handler(&self) -> Arc<impl ExtendedQueryHandler> {
        self.handler.clone()
    }

    fn startup_handler(&self) -> Arc<impl StartupHandler> {
        self.noop.clone()
    }

    fn copy_handler(&self) -> Arc<impl CopyHandler> {
        self.noop.clone()
    }
}

/// Serve one client until it disconnects.
pub async fn process_connection(socket: TcpStream, engine: Arc<Engine>) -> std::io::Result<()> {
    pgwire::tokio::process_socket(socket, None, BookdeskFactory::new(engine)).await
}

fn error_info(code: &str, message: String) -> PgWireError {
    PgWireError::UserError(Box::new(ErrorInfo::new(
        "ERROR".into(),
        code.into(),
        message,
    )))
}

fn engine_err(e: EngineError) -> PgWireError {
    let code = match &e {
        EngineError::Invalid(_) => "23514",
        EngineError::NotFound(_) => "02000",
        EngineError::UnknownResource(_) => "23503",
        EngineError::LimitExceeded(_) => "54000",
        EngineError::Store(_) => "58000",
    };
    error_info(code, e.to_string())
}

fn sql_err(e: sql::SqlError) -> PgWireError {
    error_info("42601", e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn result_schema_by_table() {
        assert_eq!(result_schema("SELECT * FROM bookings WHERE resource = $1").len(), 8);
        assert_eq!(result_schema("select * from resource_stats;").len(), 7);
        assert_eq!(result_schema("SELECT * FROM resources").len(), 1);
        assert!(result_schema("DELETE FROM bookings WHERE id = $1").is_empty());
        assert!(result_schema("SELECT * FROM nowhere").is_empty());
    }

    #[test]
    fn count_params_finds_highest() {
        assert_eq!(count_params("SELECT * FROM bookings"), 0);
        assert_eq!(count_params("SELECT * FROM validation WHERE resource = $1 AND start_time = $2"), 2);
        assert_eq!(count_params("x = $10 AND y = $2"), 10);
    }

    #[test]
    fn bind_params_replaces_each_token_once() {
        let sql = "INSERT INTO bookings (resource, requested_by) VALUES ($1, $2)";
        let params = [Some(b"Projector".as_slice()), Some(b"Cost $1 each".as_slice())];
        assert_eq!(
            bind_params(sql, &params),
            "INSERT INTO bookings (resource, requested_by) VALUES ('Projector', 'Cost $1 each')"
        );
    }

    #[test]
    fn bind_params_escapes_and_handles_nulls() {
        let params = [Some(b"O'Brien".as_slice()), None];
        assert_eq!(bind_params("a = $1 AND b = $2", &params), "a = 'O''Brien' AND b = NULL");
        // $10 is its own token, and unbound tokens stay put.
        let one = [Some(b"x".as_slice())];
        assert_eq!(bind_params("$1, $10, $", &one), "'x', $10, $");
    }

    #[test]
    fn rounding_for_display() {
        assert_eq!(round_tenths(4.5), 4.5);
        assert_eq!(round_tenths(1.0 / 3.0), 0.3);
        assert_eq!(round_tenths(6.66), 6.7);
    }
}
