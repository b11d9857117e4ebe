//! PostgreSQL connection implementation.
//!
//! This module provides the connection type that handles:
//! - TCP connection establishment
//! - Startup and authentication (cleartext, MD5, SCRAM-SHA-256)
//! - Simple and extended query protocols, chosen per connection
//! - Prepared statement caching for the extended protocol

use std::collections::HashMap;
use std::sync::Arc;

use bytes::BytesMut;
use log::{debug, warn};
use tokio::io::{AsyncReadExt, AsyncWriteExt, BufReader, BufWriter, ReadHalf, WriteHalf};
use tokio::net::TcpStream;

use super::error::{PgError, PgResult};
use super::interpolate::interpolate;
use super::protocol::*;
use super::scram::{ScramClient, SCRAM_SHA_256};
use super::statement::{PreparedStatement, SharedColumns, StatementCache, DEFAULT_CACHE_CAPACITY};
use super::types::{Oid, PgValue};
use crate::config::ConnTarget;

/// SQLSTATEs after which a cached statement is no longer usable.
const STALE_STATEMENT_CODES: &[&str] = &["26000", "0A000"];

/// Result format requested in every Bind.
const RESULT_FORMAT: Format = Format::Binary;

// ============================================================================
// Connection Configuration
// ============================================================================

/// How queries are sent to the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryExecMode {
    /// One Query message per call; parameters are interpolated client-side
    /// and results arrive in text format.
    SimpleProtocol,
    /// Parse and Describe once per distinct SQL text, then Bind and Execute
    /// against the cached statement; results arrive in binary format.
    CacheStatement,
}

/// PostgreSQL connection configuration.
#[derive(Debug, Clone)]
pub struct PgConfig {
    pub host: String,
    pub port: u16,
    pub database: String,
    pub user: String,
    pub password: Option<String>,
    pub application_name: Option<String>,
    pub exec_mode: QueryExecMode,
    /// Send extended-protocol parameters in binary instead of text format.
    pub binary_parameters: bool,
    pub statement_cache_capacity: usize,
}

impl PgConfig {
    /// Build a configuration from a parsed connection target.
    pub fn from_target(target: &ConnTarget) -> Self {
        Self {
            host: target.host.clone(),
            port: target.port,
            database: target.database.clone(),
            user: target.user.clone(),
            password: target.password.clone(),
            application_name: target.application_name.clone(),
            exec_mode: QueryExecMode::CacheStatement,
            binary_parameters: target.binary_parameters,
            statement_cache_capacity: DEFAULT_CACHE_CAPACITY,
        }
    }

    pub fn with_exec_mode(mut self, exec_mode: QueryExecMode) -> Self {
        self.exec_mode = exec_mode;
        self
    }
}

// ============================================================================
// Rows and Results
// ============================================================================

/// One decoded row together with its column descriptions.
#[derive(Debug, Clone)]
pub struct Row {
    columns: SharedColumns,
    values: Vec<PgValue>,
}

impl Row {
    pub fn columns(&self) -> &[FieldDescription] {
        &self.columns
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn get(&self, idx: usize) -> Option<&PgValue> {
        self.values.get(idx)
    }

    pub fn into_values(self) -> Vec<PgValue> {
        self.values
    }
}

/// Result of a query collected in memory.
#[derive(Debug, Default)]
pub struct QueryResult {
    pub rows: Vec<Row>,
    /// Command tag of the last statement (e.g. "SELECT 5")
    pub command_tag: String,
}

// ============================================================================
// Connection
// ============================================================================

/// A PostgreSQL connection.
pub struct PgConnection {
    reader: BufReader<ReadHalf<TcpStream>>,
    writer: BufWriter<WriteHalf<TcpStream>>,
    config: PgConfig,
    statement_cache: StatementCache,
    transaction_status: TransactionStatus,
    backend_pid: i32,
    /// Server parameters (e.g. server_version, client_encoding)
    parameters: HashMap<String, String>,
    closed: bool,
    read_buffer: BytesMut,
}

impl PgConnection {
    /// Connect and authenticate.
    pub async fn connect(config: PgConfig) -> PgResult<Self> {
        debug!(
            "connecting to {}:{} as {} (database {}, {:?}, binary parameters: {})",
            config.host,
            config.port,
            config.user,
            config.database,
            config.exec_mode,
            config.binary_parameters
        );

        let stream = TcpStream::connect((config.host.as_str(), config.port)).await?;
        stream.set_nodelay(true)?;

        let (read_half, write_half) = tokio::io::split(stream);

        let mut conn = Self {
            reader: BufReader::new(read_half),
            writer: BufWriter::new(write_half),
            statement_cache: StatementCache::new(config.statement_cache_capacity),
            config,
            transaction_status: TransactionStatus::Idle,
            backend_pid: 0,
            parameters: HashMap::new(),
            closed: false,
            read_buffer: BytesMut::with_capacity(32 * 1024),
        };

        conn.startup().await?;

        debug!(
            "connected: backend pid {}, server_version {}",
            conn.backend_pid,
            conn.parameter("server_version").unwrap_or("unknown")
        );
        Ok(conn)
    }

    /// Perform the startup handshake (authentication).
    async fn startup(&mut self) -> PgResult<()> {
        let mut options = vec![("client_encoding".to_string(), "UTF8".to_string())];
        if let Some(name) = &self.config.application_name {
            options.push(("application_name".to_string(), name.clone()));
        }

        let startup = StartupMessage {
            user: self.config.user.clone(),
            database: Some(self.config.database.clone()),
            options,
        };
        self.send_message(&startup).await?;

        loop {
            match self.receive_message().await? {
                BackendMessage::AuthenticationOk => {}
                BackendMessage::AuthenticationCleartextPassword => {
                    debug!("server requested cleartext password");
                    let password = self.password()?.to_string();
                    self.send_message(&PasswordMessage { password }).await?;
                }
                BackendMessage::AuthenticationMD5Password { salt } => {
                    debug!("server requested MD5 password");
                    let hash = md5_password(&self.config.user, self.password()?, &salt);
                    self.send_message(&PasswordMessage { password: hash })
                        .await?;
                }
                BackendMessage::AuthenticationSASL { mechanisms } => {
                    self.authenticate_scram(&mechanisms).await?;
                }
                BackendMessage::ParameterStatus { name, value } => {
                    self.parameters.insert(name, value);
                }
                BackendMessage::BackendKeyData { process_id, .. } => {
                    self.backend_pid = process_id;
                }
                BackendMessage::ReadyForQuery { status } => {
                    self.transaction_status = status;
                    return Ok(());
                }
                BackendMessage::ErrorResponse { fields } => {
                    return Err(PgError::from_fields(&fields));
                }
                BackendMessage::NoticeResponse { fields } => log_notice(&fields),
                other => {
                    return Err(PgError::Protocol(format!(
                        "Unexpected message during startup: {other:?}"
                    )))
                }
            }
        }
    }

    async fn authenticate_scram(&mut self, mechanisms: &[String]) -> PgResult<()> {
        if !mechanisms.iter().any(|m| m == SCRAM_SHA_256) {
            return Err(PgError::Auth(format!(
                "Server requires unsupported SASL mechanisms: {mechanisms:?}"
            )));
        }
        debug!("authenticating with {SCRAM_SHA_256}");

        let mut scram = ScramClient::new(&self.config.user, self.password()?);
        self.send_message(&SaslInitialResponseMessage {
            mechanism: SCRAM_SHA_256.to_string(),
            data: scram.client_first_message(),
        })
        .await?;

        loop {
            match self.receive_message().await? {
                BackendMessage::AuthenticationSASLContinue { data } => {
                    let client_final = scram
                        .process_server_first(&data)
                        .map_err(|e| PgError::Auth(e.to_string()))?;
                    self.send_message(&SaslResponseMessage { data: client_final })
                        .await?;
                }
                BackendMessage::AuthenticationSASLFinal { data } => {
                    return scram
                        .verify_server_final(&data)
                        .map_err(|e| PgError::Auth(e.to_string()));
                }
                BackendMessage::ErrorResponse { fields } => {
                    return Err(PgError::from_fields(&fields));
                }
                other => {
                    return Err(PgError::Protocol(format!(
                        "Unexpected message during SASL exchange: {other:?}"
                    )))
                }
            }
        }
    }

    fn password(&self) -> PgResult<&str> {
        self.config
            .password
            .as_deref()
            .ok_or_else(|| PgError::Auth("Password required".to_string()))
    }

    /// Run a query in the connection's exec mode, handing each row to `on_row`.
    ///
    /// An error from `on_row` stops further callbacks; the remaining
    /// responses are drained so the connection stays usable, then the error
    /// is returned. Returns the command tag on success.
    pub async fn query_with<F>(
        &mut self,
        query: &str,
        params: &[PgValue],
        on_row: F,
    ) -> PgResult<String>
    where
        F: FnMut(Row) -> PgResult<()>,
    {
        if self.closed {
            return Err(PgError::ConnectionClosed);
        }

        match self.config.exec_mode {
            QueryExecMode::SimpleProtocol => {
                let sql = interpolate(query, params)?;
                self.simple_query_with(&sql, on_row).await
            }
            QueryExecMode::CacheStatement => self.extended_query_with(query, params, on_row).await,
        }
    }

    /// Run a query and collect every row.
    pub async fn query(&mut self, query: &str, params: &[PgValue]) -> PgResult<QueryResult> {
        let mut rows = Vec::new();
        let command_tag = self
            .query_with(query, params, |row| {
                rows.push(row);
                Ok(())
            })
            .await?;
        Ok(QueryResult { rows, command_tag })
    }

    /// Simple query protocol: one Query message, text-format rows.
    async fn simple_query_with<F>(&mut self, query: &str, mut on_row: F) -> PgResult<String>
    where
        F: FnMut(Row) -> PgResult<()>,
    {
        debug!("simple query: {query}");
        self.send_message(&QueryMessage {
            query: query.to_string(),
        })
        .await?;

        let mut columns: SharedColumns = Arc::new(Vec::new());
        let mut command_tag = String::new();
        let mut failure: Option<PgError> = None;

        loop {
            match self.receive_message().await? {
                BackendMessage::RowDescription { fields } => {
                    columns = Arc::new(fields);
                }
                BackendMessage::DataRow { values } => {
                    if failure.is_none() {
                        let delivered = decode_row(&columns, values).and_then(&mut on_row);
                        failure = delivered.err();
                    }
                }
                BackendMessage::CommandComplete { tag } => command_tag = tag,
                BackendMessage::EmptyQueryResponse => {}
                BackendMessage::ReadyForQuery { status } => {
                    self.transaction_status = status;
                    return failure.map_or(Ok(command_tag), Err);
                }
                BackendMessage::ErrorResponse { fields } => {
                    failure.get_or_insert(PgError::from_fields(&fields));
                }
                other => self.handle_async_message(other),
            }
        }
    }

    /// Extended query protocol against a cached prepared statement.
    async fn extended_query_with<F>(
        &mut self,
        query: &str,
        params: &[PgValue],
        mut on_row: F,
    ) -> PgResult<String>
    where
        F: FnMut(Row) -> PgResult<()>,
    {
        let stmt = match self.statement_cache.get(query) {
            Some(stmt) => {
                debug!("statement cache hit: {}", stmt.name);
                stmt
            }
            None => self.prepare(query, params).await?,
        };

        if stmt.param_types.len() != params.len() {
            return Err(PgError::Protocol(format!(
                "Statement expects {} parameters, {} given",
                stmt.param_types.len(),
                params.len()
            )));
        }

        let (param_format, encoded) = self.encode_params(params)?;
        let bind = BindMessage {
            portal: String::new(),
            statement: stmt.name.clone(),
            param_formats: vec![param_format],
            params: encoded,
            result_formats: vec![RESULT_FORMAT],
        };
        self.buffer_message(&bind).await?;
        self.buffer_message(&ExecuteMessage {
            portal: String::new(),
            max_rows: 0,
        })
        .await?;
        self.buffer_message(&SyncMessage).await?;
        self.flush().await?;

        let columns = Arc::clone(&stmt.columns);
        let mut command_tag = String::new();
        let mut failure: Option<PgError> = None;

        loop {
            match self.receive_message().await? {
                BackendMessage::BindComplete => {}
                BackendMessage::DataRow { values } => {
                    if failure.is_none() {
                        let delivered = decode_row(&columns, values).and_then(&mut on_row);
                        failure = delivered.err();
                    }
                }
                BackendMessage::CommandComplete { tag } => command_tag = tag,
                BackendMessage::EmptyQueryResponse | BackendMessage::PortalSuspended => {}
                BackendMessage::ReadyForQuery { status } => {
                    self.transaction_status = status;
                    break;
                }
                BackendMessage::ErrorResponse { fields } => {
                    failure.get_or_insert(PgError::from_fields(&fields));
                }
                other => self.handle_async_message(other),
            }
        }

        match failure {
            None => Ok(command_tag),
            Some(err) => {
                if err
                    .code()
                    .is_some_and(|code| STALE_STATEMENT_CODES.contains(&code))
                {
                    debug!("dropping stale statement {}", stmt.name);
                    self.statement_cache.remove(query);
                }
                Err(err)
            }
        }
    }

    /// Parse and describe a statement, then cache it.
    ///
    /// Parameter types are taken from the values so the server binds them
    /// exactly as they will be encoded.
    pub async fn prepare(
        &mut self,
        query: &str,
        params: &[PgValue],
    ) -> PgResult<Arc<PreparedStatement>> {
        if self.closed {
            return Err(PgError::ConnectionClosed);
        }

        let name = self.statement_cache.next_statement_name();
        let param_types: Vec<Oid> = params.iter().map(PgValue::type_oid).collect();
        debug!("preparing {name}: {query}");

        self.buffer_message(&ParseMessage {
            name: name.clone(),
            query: query.to_string(),
            param_types: param_types.clone(),
        })
        .await?;
        self.buffer_message(&DescribeMessage {
            target: Target::Statement,
            name: name.clone(),
        })
        .await?;
        self.buffer_message(&SyncMessage).await?;
        self.flush().await?;

        let mut stmt = PreparedStatement::new(name, query.to_string());
        stmt.set_param_types(param_types);
        let mut failure: Option<PgError> = None;

        loop {
            match self.receive_message().await? {
                BackendMessage::ParseComplete | BackendMessage::NoData => {}
                BackendMessage::ParameterDescription { type_oids } => {
                    stmt.set_param_types(type_oids);
                }
                BackendMessage::RowDescription { fields } => {
                    stmt.set_columns(bound_columns(fields));
                }
                BackendMessage::ReadyForQuery { status } => {
                    self.transaction_status = status;
                    break;
                }
                BackendMessage::ErrorResponse { fields } => {
                    failure.get_or_insert(PgError::from_fields(&fields));
                }
                other => self.handle_async_message(other),
            }
        }

        if let Some(err) = failure {
            return Err(err);
        }

        let stmt = Arc::new(stmt);
        if let Some(evicted) = self.statement_cache.insert(Arc::clone(&stmt)) {
            self.close_statement(&evicted).await?;
        }
        Ok(stmt)
    }

    /// Release a prepared statement on the server.
    async fn close_statement(&mut self, name: &str) -> PgResult<()> {
        debug!("closing statement {name}");
        self.buffer_message(&CloseMessage {
            target: Target::Statement,
            name: name.to_string(),
        })
        .await?;
        self.buffer_message(&SyncMessage).await?;
        self.flush().await?;
        self.wait_until_ready().await
    }

    /// Encode parameters in the configured format.
    fn encode_params(&self, params: &[PgValue]) -> PgResult<(Format, Vec<Option<Vec<u8>>>)> {
        let format = if self.config.binary_parameters {
            Format::Binary
        } else {
            Format::Text
        };

        let encoded = params
            .iter()
            .map(|p| match (p.is_null(), format) {
                (true, _) => Ok(None),
                (false, Format::Binary) => Ok(Some(p.encode_binary())),
                (false, Format::Text) => p.encode_text().map(Some),
            })
            .collect::<PgResult<Vec<_>>>()?;

        Ok((format, encoded))
    }

    pub fn statement_cache(&self) -> &StatementCache {
        &self.statement_cache
    }

    /// Close the connection.
    pub async fn close(&mut self) -> PgResult<()> {
        if self.closed {
            return Ok(());
        }

        self.closed = true;
        self.send_message(&TerminateMessage).await?;
        self.writer.shutdown().await?;
        Ok(())
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub fn transaction_status(&self) -> TransactionStatus {
        self.transaction_status
    }

    pub fn backend_pid(&self) -> i32 {
        self.backend_pid
    }

    pub fn parameter(&self, name: &str) -> Option<&str> {
        self.parameters.get(name).map(String::as_str)
    }

    // ========================================================================
    // Private helpers
    // ========================================================================

    async fn send_message<M: FrontendMessage>(&mut self, msg: &M) -> PgResult<()> {
        self.buffer_message(msg).await?;
        self.flush().await
    }

    #[inline]
    async fn buffer_message<M: FrontendMessage>(&mut self, msg: &M) -> PgResult<()> {
        self.writer.write_all(&msg.encode()).await?;
        Ok(())
    }

    #[inline]
    async fn flush(&mut self) -> PgResult<()> {
        self.writer.flush().await?;
        Ok(())
    }

    async fn receive_message(&mut self) -> PgResult<BackendMessage> {
        loop {
            if let Some(total_len) = frame_len(&self.read_buffer)? {
                let mut frame = self.read_buffer.split_to(total_len).freeze();
                return BackendMessage::decode(&mut frame);
            }

            let n = self.reader.read_buf(&mut self.read_buffer).await?;
            if n == 0 {
                self.closed = true;
                return Err(PgError::ConnectionClosed);
            }
        }
    }

    /// Read until ReadyForQuery, failing on an ErrorResponse.
    async fn wait_until_ready(&mut self) -> PgResult<()> {
        let mut failure: Option<PgError> = None;
        loop {
            match self.receive_message().await? {
                BackendMessage::ReadyForQuery { status } => {
                    self.transaction_status = status;
                    return failure.map_or(Ok(()), Err);
                }
                BackendMessage::ErrorResponse { fields } => {
                    failure.get_or_insert(PgError::from_fields(&fields));
                }
                _ => {}
            }
        }
    }

    /// Messages the server may send at any time.
    fn handle_async_message(&mut self, msg: BackendMessage) {
        match msg {
            BackendMessage::NoticeResponse { fields } => log_notice(&fields),
            BackendMessage::ParameterStatus { name, value } => {
                self.parameters.insert(name, value);
            }
            BackendMessage::NotificationResponse {
                channel, payload, ..
            } => debug!("notification on {channel}: {payload}"),
            other => debug!("ignoring unexpected message: {other:?}"),
        }
    }
}

// ============================================================================
// Helper functions
// ============================================================================

/// Columns of a described statement as they arrive after Bind.
///
/// Describe(Statement) reports every column in text format since no result
/// format has been chosen yet; rows come back in [`RESULT_FORMAT`].
fn bound_columns(mut fields: Vec<FieldDescription>) -> Vec<FieldDescription> {
    for field in &mut fields {
        field.format = RESULT_FORMAT;
    }
    fields
}

/// Decode a DataRow using each column's declared format.
fn decode_row(columns: &SharedColumns, values: Vec<Option<bytes::Bytes>>) -> PgResult<Row> {
    if values.len() != columns.len() {
        return Err(PgError::Protocol(format!(
            "DataRow has {} values for {} columns",
            values.len(),
            columns.len()
        )));
    }

    let decoded = values
        .iter()
        .zip(columns.iter())
        .map(|(value, field)| match value {
            None => Ok(PgValue::Null),
            Some(data) => match field.format {
                Format::Binary => PgValue::decode_binary(field.type_oid, data),
                Format::Text => PgValue::decode_text(field.type_oid, data),
            },
        })
        .collect::<PgResult<Vec<_>>>()?;

    Ok(Row {
        columns: Arc::clone(columns),
        values: decoded,
    })
}

fn log_notice(fields: &HashMap<u8, String>) {
    warn!(
        "server notice: {} {}",
        fields.get(&b'S').map(String::as_str).unwrap_or("NOTICE"),
        fields.get(&b'M').map(String::as_str).unwrap_or_default()
    );
}

/// Compute the MD5 password response: "md5" + md5(md5(password + user) + salt).
fn md5_password(user: &str, password: &str, salt: &[u8; 4]) -> String {
    let inner = md5::compute(format!("{password}{user}"));

    let mut outer_input = format!("{inner:x}").into_bytes();
    outer_input.extend_from_slice(salt);

    format!("md5{:x}", md5::compute(&outer_input))
}
