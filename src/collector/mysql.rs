//! MySQL sessions over sqlx.
//!
//! Statements are sent as plain strings, so they go over the text protocol and
//! `SHOW ...` statements work without preparation.

use sqlx::mysql::{MySqlConnectOptions, MySqlConnection, MySqlRow};
use sqlx::{Column, ConnectOptions, Connection, Executor, Row as _};

use crate::collector::{CollectorError, Connector, QueryError, RawValue, Row, Session};
use crate::target::Target;

/// Opens one fresh connection per pipeline run.
#[derive(Debug, Clone, Copy, Default)]
pub struct MySqlConnector;

impl MySqlConnector {
    pub fn new() -> Self {
        Self
    }

    /// Connection options for `target`.
    pub fn options(target: &Target) -> MySqlConnectOptions {
        let config = target.config();
        MySqlConnectOptions::new()
            .host(&config.host)
            .port(config.port)
            .username(&config.user)
            .password(&config.password)
            .disable_statement_logging()
    }
}

#[async_trait::async_trait]
impl Connector for MySqlConnector {
    async fn connect(&self, target: &Target) -> Result<Box<dyn Session>, CollectorError> {
        let conn = Self::options(target)
            .connect()
            .await
            .map_err(|e| CollectorError::Connection {
                target: target.key().to_string(),
                message: e.to_string(),
            })?;

        tracing::trace!(target = %target.key(), "Connection opened");
        Ok(Box::new(MySqlSession { conn }))
    }
}

/// One open MySQL connection. Dropping it closes the socket.
#[derive(Debug)]
pub struct MySqlSession {
    conn: MySqlConnection,
}

/// Convert one column to a [`RawValue`].
///
/// Tries the text form first, then the numeric forms the column type allows,
/// then raw bytes.
fn decode_value(row: &MySqlRow, index: usize) -> RawValue {
    if let Ok(value) = row.try_get::<Option<String>, _>(index) {
        return value.map_or(RawValue::Null, RawValue::Text);
    }
    if let Ok(value) = row.try_get::<Option<i64>, _>(index) {
        return value.map_or(RawValue::Null, RawValue::Int);
    }
    if let Ok(value) = row.try_get::<Option<u64>, _>(index) {
        return value.map_or(RawValue::Null, RawValue::UInt);
    }
    if let Ok(value) = row.try_get::<Option<f64>, _>(index) {
        return value.map_or(RawValue::Null, RawValue::Float);
    }
    if let Ok(value) = row.try_get::<Option<Vec<u8>>, _>(index) {
        return value.map_or(RawValue::Null, |bytes| {
            RawValue::Text(String::from_utf8_lossy(&bytes).into_owned())
        });
    }
    // DECIMAL and friends arrive as text.
    row.try_get_unchecked::<Option<String>, _>(index)
        .ok()
        .flatten()
        .map_or(RawValue::Null, RawValue::Text)
}

fn convert_row(row: &MySqlRow) -> Row {
    let mut converted = Row::new();
    for column in row.columns() {
        converted.push(column.name(), decode_value(row, column.ordinal()));
    }
    converted
}

#[async_trait::async_trait]
impl Session for MySqlSession {
    async fn query(&mut self, statement: &str) -> Result<Vec<Row>, QueryError> {
        let rows = (&mut self.conn)
            .fetch_all(statement)
            .await
            .map_err(|e| QueryError::new(statement, e))?;
        Ok(rows.iter().map(convert_row).collect())
    }

    async fn close(self: Box<Self>) {
        let Self { conn } = *self;
        if let Err(e) = conn.close().await {
            tracing::debug!(error = %e, "Connection close failed");
        }
    }
}
