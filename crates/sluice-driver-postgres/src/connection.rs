//! PostgreSQL connection implementation

use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use sluice_connection::ConnectionFactory;
use sluice_core::{
    ColumnMeta, Connection, QueryResult, Result, Row, SluiceError, StatementResult, Value,
    leading_keyword, sql_preview,
};
use tokio::task::JoinHandle;
use tokio_postgres::types::ToSql;
use tokio_postgres::{Client, NoTls, Statement};

use crate::config::PostgresConfig;
use crate::tls::build_tls_connector;
use crate::values::{PgValue, postgres_to_value};

/// Readable message for a server or client error, with SQLSTATE context
fn format_postgres_error(error: &tokio_postgres::Error) -> String {
    let Some(db_error) = error.as_db_error() else {
        return error.to_string();
    };

    let mut message = db_error.message().to_string();
    let extras = [
        ("detail", db_error.detail()),
        ("hint", db_error.hint()),
        ("column", db_error.column()),
    ];
    for (label, text) in extras {
        if let Some(text) = text.filter(|t| !t.trim().is_empty()) {
            message.push_str(&format!(" ({}: {})", label, text));
        }
    }
    describe_sql_state(db_error.code().code(), message)
}

fn describe_sql_state(code: &str, message: String) -> String {
    match code {
        "23505" => format!("duplicate value violates unique constraint: {}", message),
        "23503" => format!("foreign key violation: {}", message),
        "23502" => format!("null value violates not-null constraint: {}", message),
        "22007" => format!("invalid datetime format: {}", message),
        "22P02" => format!("invalid input syntax: {}", message),
        "40001" => format!("serialization failure: {}", message),
        "40P01" => format!("deadlock detected: {}", message),
        _ => format!("{} (code: {})", message, code),
    }
}

/// Map a driver error onto the Sluice taxonomy
///
/// A dead session is a connection error so the pool discards it; errors the
/// server reported are query errors; anything else is a driver error.
fn map_error(context: &str, error: tokio_postgres::Error) -> SluiceError {
    let message = format!("{}: {}", context, format_postgres_error(&error));
    if error.is_closed() {
        SluiceError::connection(message)
    } else if error.as_db_error().is_some() {
        SluiceError::Query(message)
    } else {
        SluiceError::Driver(message)
    }
}

fn spawn_driver<F>(connection: F) -> JoinHandle<()>
where
    F: Future<Output = std::result::Result<(), tokio_postgres::Error>> + Send + 'static,
{
    tokio::spawn(async move {
        if let Err(e) = connection.await {
            tracing::error!(error = %e, "PostgreSQL connection error");
        }
    })
}

/// One PostgreSQL session
///
/// The session's socket is driven by a background task that ends when the
/// server goes away or the connection is closed.
pub struct PostgresConnection {
    client: Client,
    driver: JoinHandle<()>,
}

impl PostgresConnection {
    pub async fn connect(config: &PostgresConfig) -> Result<Self> {
        let session = config.session_config();
        tracing::info!(
            hosts = ?session.get_hosts(),
            database = ?config.database(),
            ssl_mode = %config.ssl_mode(),
            "connecting to PostgreSQL database"
        );

        let connect_error = |e: tokio_postgres::Error| {
            SluiceError::connection(format!("Failed to connect to PostgreSQL: {}", e))
        };

        let (client, driver) = if config.ssl_mode().uses_tls() {
            let tls = build_tls_connector(config.tls())?;
            let (client, connection) = session.connect(tls).await.map_err(connect_error)?;
            (client, spawn_driver(connection))
        } else {
            let (client, connection) = session.connect(NoTls).await.map_err(connect_error)?;
            (client, spawn_driver(connection))
        };

        tracing::info!(database = ?config.database(), "PostgreSQL connection established");
        Ok(Self { client, driver })
    }

    /// Prepare `sql` and coerce `params` to the parameter types it reports
    async fn prepare(&self, sql: &str, params: &[Value]) -> Result<(Statement, Vec<PgValue>)> {
        let statement = self
            .client
            .prepare(sql)
            .await
            .map_err(|e| map_error("Failed to prepare statement", e))?;
        let bound = PgValue::bind_all(params, statement.params());
        Ok((statement, bound))
    }
}

fn as_params(bound: &[PgValue]) -> Vec<&(dyn ToSql + Sync)> {
    bound.iter().map(|p| p as &(dyn ToSql + Sync)).collect()
}

#[async_trait]
impl Connection for PostgresConnection {
    fn driver_name(&self) -> &str {
        "postgresql"
    }

    #[tracing::instrument(skip(self, sql, params), fields(sql_preview = %sql_preview(sql)))]
    async fn execute(&self, sql: &str, params: &[Value]) -> Result<StatementResult> {
        let affected_rows = if params.is_empty() && is_session_command(sql) {
            self.client
                .batch_execute(sql)
                .await
                .map_err(|e| map_error("Failed to execute statement", e))?;
            0
        } else {
            let (statement, bound) = self.prepare(sql, params).await?;
            self.client
                .execute(&statement, &as_params(&bound))
                .await
                .map_err(|e| map_error("Failed to execute statement", e))?
        };

        tracing::debug!(affected_rows, "statement executed");
        Ok(StatementResult { affected_rows })
    }

    #[tracing::instrument(skip(self, sql, params), fields(sql_preview = %sql_preview(sql)))]
    async fn query(&self, sql: &str, params: &[Value]) -> Result<QueryResult> {
        let start = Instant::now();
        let (statement, bound) = self.prepare(sql, params).await?;
        let pg_rows = self
            .client
            .query(&statement, &as_params(&bound))
            .await
            .map_err(|e| map_error("Failed to execute query", e))?;

        // Column metadata comes from the statement so empty results keep it.
        let columns: Vec<ColumnMeta> = statement
            .columns()
            .iter()
            .enumerate()
            .map(|(idx, col)| ColumnMeta::new(col.name(), col.type_().name(), idx))
            .collect();
        let names: Vec<String> = columns.iter().map(|c| c.name.clone()).collect();

        let rows: Vec<Row> = pg_rows
            .iter()
            .map(|pg_row| {
                let values = (0..names.len()).map(|idx| postgres_to_value(pg_row, idx)).collect();
                Row::new(names.clone(), values)
            })
            .collect();

        let mut result = QueryResult::new(columns, rows);
        result.execution_time_ms = start.elapsed().as_millis() as u64;
        tracing::debug!(
            row_count = result.row_count(),
            execution_time_ms = result.execution_time_ms,
            "query executed"
        );
        Ok(result)
    }

    async fn close(&self) -> Result<()> {
        tracing::debug!("closing PostgreSQL connection");
        self.driver.abort();
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.client.is_closed() || self.driver.is_finished()
    }
}

/// Statements that the extended protocol cannot prepare
fn is_session_command(sql: &str) -> bool {
    matches!(
        leading_keyword(sql).as_str(),
        "begin" | "start" | "commit" | "end" | "rollback" | "savepoint" | "release" | "set"
    )
}

/// Opens PostgreSQL sessions for the connection pool
pub struct PostgresConnectionFactory {
    config: PostgresConfig,
}

impl PostgresConnectionFactory {
    pub fn new(config: PostgresConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &PostgresConfig {
        &self.config
    }
}

#[async_trait]
impl ConnectionFactory for PostgresConnectionFactory {
    async fn create(&self) -> Result<Arc<dyn Connection>> {
        let connection = PostgresConnection::connect(&self.config).await?;
        Ok(Arc::new(connection))
    }

    /// An idle session is reused only if it still answers a round-trip
    async fn validate(&self, conn: &dyn Connection) -> bool {
        if conn.is_closed() {
            return false;
        }
        match conn.query("SELECT 1", &[]).await {
            Ok(_) => true,
            Err(err) => {
                tracing::debug!(error = %err, "discarding stale PostgreSQL connection");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_sql_state_descriptions() {
        assert_eq!(
            describe_sql_state("23505", "Key (id)=(1) already exists.".into()),
            "duplicate value violates unique constraint: Key (id)=(1) already exists."
        );
        assert_eq!(
            describe_sql_state("42P01", "relation \"users\" does not exist".into()),
            "relation \"users\" does not exist (code: 42P01)"
        );
    }

    #[test]
    fn test_transaction_control_skips_prepare() {
        assert!(is_session_command("BEGIN"));
        assert!(is_session_command("  rollback"));
        assert!(is_session_command("SET statement_timeout = 5000"));
        assert!(!is_session_command("SELECT 1"));
        assert!(!is_session_command("UPDATE users SET name = $1"));
    }

    #[tokio::test]
    async fn test_unreachable_server_is_a_connection_error() {
        let config = PostgresConfig::new("127.0.0.1", 1, "app")
            .with_ssl_mode(crate::SslMode::Disable)
            .with_connect_timeout(std::time::Duration::from_millis(200));
        let factory = PostgresConnectionFactory::new(config);

        let err = factory.create().await.err().expect("nothing listens on port 1");
        assert!(matches!(err, SluiceError::Connection { .. }));
    }
}
