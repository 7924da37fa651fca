//! Individual collection steps.
//!
//! Each function issues one statement over the pipeline's session and turns the
//! rows into samples. Statements live here so the rest of the crate never
//! deals with SQL text.

use crate::collector::assembler::{Category, Sample};
use crate::collector::{QueryError, RawValue, Row, Session};

pub const SELECT_READ_ONLY: &str = "SELECT @@GLOBAL.read_only AS read_only";
pub const SHOW_SLAVE_STATUS: &str = "SHOW SLAVE STATUS";
pub const SHOW_GLOBAL_STATUS: &str = "SHOW GLOBAL STATUS";
pub const SHOW_GLOBAL_VARIABLES: &str = "SHOW GLOBAL VARIABLES";
pub const SHOW_BINARY_LOGS: &str = "SHOW BINARY LOGS";
pub const SHOW_PROCESSLIST: &str = "SHOW FULL PROCESSLIST";

/// Status variables that only ever grow.
const COUNTER_STATUS_PREFIXES: &[&str] = &[
    "Com_",
    "Handler_",
    "Bytes_",
    "Select_",
    "Sort_",
    "Created_tmp_",
    "Table_locks_",
    "Aborted_",
    "Innodb_data_",
    "Innodb_rows_",
    "Innodb_pages_",
    "Innodb_buffer_pool_read",
    "Innodb_buffer_pool_write_requests",
    "Innodb_log_write",
    "Innodb_os_log_",
    "Key_read",
    "Key_write",
    "Qcache_hits",
    "Qcache_inserts",
];

const COUNTER_STATUS_NAMES: &[&str] = &[
    "Questions",
    "Queries",
    "Connections",
    "Slow_queries",
    "Opened_files",
    "Opened_tables",
    "Opened_table_definitions",
    "Threads_created",
    "Connection_errors_max_connections",
    "Innodb_row_lock_waits",
    "Innodb_row_lock_time",
];

/// Configuration variables worth reporting.
const MONITORED_VARIABLES: &[&str] = &[
    "max_connections",
    "max_user_connections",
    "max_connect_errors",
    "open_files_limit",
    "table_open_cache",
    "table_definition_cache",
    "thread_cache_size",
    "innodb_buffer_pool_size",
    "innodb_buffer_pool_instances",
    "innodb_log_file_size",
    "innodb_io_capacity",
    "innodb_max_dirty_pages_pct",
    "innodb_flush_log_at_trx_commit",
    "innodb_thread_concurrency",
    "sync_binlog",
    "read_only",
    "super_read_only",
    "log_bin",
    "binlog_cache_size",
    "max_binlog_size",
    "expire_logs_days",
    "binlog_expire_logs_seconds",
    "long_query_time",
    "slow_query_log",
    "wait_timeout",
    "tmp_table_size",
    "max_heap_table_size",
    "key_buffer_size",
    "query_cache_size",
];

/// Slave-status columns reported unchanged.
const SLAVE_NUMERIC_COLUMNS: &[&str] = &[
    "Read_Master_Log_Pos",
    "Exec_Master_Log_Pos",
    "Relay_Log_Space",
    "Last_Errno",
    "Last_IO_Errno",
    "Last_SQL_Errno",
    "SQL_Delay",
];

/// Lag reported when replication is broken (`Seconds_Behind_Master` is NULL).
const BROKEN_REPLICATION_LAG: i64 = -1;

fn is_counter_status(name: &str) -> bool {
    COUNTER_STATUS_NAMES.contains(&name)
        || COUNTER_STATUS_PREFIXES
            .iter()
            .any(|prefix| name.starts_with(prefix))
}

/// Split `Variable_name`/`Value` rows into pairs.
fn key_values(rows: Vec<Row>) -> impl Iterator<Item = (String, RawValue)> {
    rows.into_iter().filter_map(|row| {
        let name = row.value(0)?.to_display_string();
        let value = row.value(1).cloned().unwrap_or(RawValue::Null);
        Some((name, value))
    })
}

/// Step 1: the global read-only flag.
pub async fn read_only(session: &mut dyn Session) -> Result<bool, QueryError> {
    let rows = session.query(SELECT_READ_ONLY).await?;
    let value = rows
        .first()
        .and_then(|row| row.value(0))
        .ok_or_else(|| QueryError::new(SELECT_READ_ONLY, "empty result"))?;
    crate::collector::assembler::coerce(value)
        .map(|v| v != 0.0)
        .ok_or_else(|| {
            QueryError::new(
                SELECT_READ_ONLY,
                format!("unexpected value {}", value.to_display_string()),
            )
        })
}

/// Replication state read in step 2.
#[derive(Debug, Clone, Default)]
pub struct SlaveStatus {
    /// Number of replication channels (rows).
    pub channels: usize,
    /// Per-channel samples, merged into the batch in step 7.
    pub samples: Vec<Sample>,
}

fn running_flag(row: &Row, column: &str) -> i64 {
    let running = row
        .get(column)
        .and_then(RawValue::as_text)
        .is_some_and(|v| v.eq_ignore_ascii_case("yes"));
    i64::from(running)
}

/// Step 2: replication status.
pub async fn slave_status(session: &mut dyn Session) -> Result<SlaveStatus, QueryError> {
    let rows = session.query(SHOW_SLAVE_STATUS).await?;
    let mut status = SlaveStatus {
        channels: rows.len(),
        samples: Vec::new(),
    };

    for row in &rows {
        let io = running_flag(row, "Slave_IO_Running");
        let sql = running_flag(row, "Slave_SQL_Running");
        let gauge = |field: &str, value: RawValue| Sample::gauge(Category::SlaveStatus, field, value);

        status.samples.push(gauge("Slave_IO_Running", RawValue::Int(io)));
        status.samples.push(gauge("Slave_SQL_Running", RawValue::Int(sql)));
        status
            .samples
            .push(gauge("replication_ok", RawValue::Int(io & sql)));

        let lag = match row.get("Seconds_Behind_Master") {
            None | Some(RawValue::Null) => RawValue::Int(BROKEN_REPLICATION_LAG),
            Some(value) => value.clone(),
        };
        status.samples.push(gauge("Seconds_Behind_Master", lag));

        for column in SLAVE_NUMERIC_COLUMNS {
            if let Some(value) = row.get(column) {
                status.samples.push(gauge(*column, value.clone()));
            }
        }
    }

    Ok(status)
}

/// Step 4: global status counters.
pub async fn global_status(session: &mut dyn Session) -> Result<Vec<Sample>, QueryError> {
    let rows = session.query(SHOW_GLOBAL_STATUS).await?;
    Ok(key_values(rows)
        .map(|(name, value)| {
            if is_counter_status(&name) {
                Sample::counter(Category::GlobalStatus, name, value)
            } else {
                Sample::gauge(Category::GlobalStatus, name, value)
            }
        })
        .collect())
}

/// Configuration read in step 5.
#[derive(Debug, Clone, Default)]
pub struct GlobalVariables {
    pub samples: Vec<Sample>,
    /// Whether binary logging is enabled (`log_bin`).
    pub log_bin: bool,
}

/// Step 5: monitored configuration variables.
pub async fn global_variables(session: &mut dyn Session) -> Result<GlobalVariables, QueryError> {
    let rows = session.query(SHOW_GLOBAL_VARIABLES).await?;
    let mut variables = GlobalVariables::default();

    for (name, value) in key_values(rows) {
        if name.eq_ignore_ascii_case("log_bin") {
            variables.log_bin = crate::collector::assembler::coerce(&value) == Some(1.0);
        }
        if MONITORED_VARIABLES.contains(&name.as_str()) {
            variables
                .samples
                .push(Sample::gauge(Category::GlobalVariables, name, value));
        }
    }

    Ok(variables)
}

/// Step 8: binary-log inventory. Skipped when binary logging is off.
pub async fn binary_logs(
    session: &mut dyn Session,
    enabled: bool,
) -> Result<Vec<Sample>, QueryError> {
    let (count, total) = if enabled {
        let rows = session.query(SHOW_BINARY_LOGS).await?;
        let total: u64 = rows
            .iter()
            .filter_map(|row| row.get("File_size").or_else(|| row.value(1)))
            .filter_map(crate::collector::assembler::coerce)
            .map(|size| size as u64)
            .sum();
        (rows.len() as u64, total)
    } else {
        (0, 0)
    };

    Ok(vec![
        Sample::gauge(Category::Binlog, "file_count", count),
        Sample::gauge(Category::Binlog, "total_size", total),
    ])
}

/// Step 10: the active session list.
pub async fn processlist(session: &mut dyn Session) -> Result<Vec<Row>, QueryError> {
    session.query(SHOW_PROCESSLIST).await
}
