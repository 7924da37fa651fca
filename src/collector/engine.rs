//! Storage-engine diagnostics.
//!
//! Engines expose their internal state in different shapes. Each engine gets an
//! [`EngineDiagnostics`] implementation that turns it into common samples, so
//! the pipeline never branches on the engine.

use crate::collector::assembler::{Category, Sample};
use crate::collector::{QueryError, Session};

/// Statement returning the InnoDB monitor output.
pub const SHOW_INNODB_STATUS: &str = "SHOW ENGINE INNODB STATUS";

/// Strategy reading one storage engine's internal state.
#[async_trait::async_trait]
pub trait EngineDiagnostics: Send + Sync + 'static {
    /// Engine name used in logs.
    fn name(&self) -> &str;

    /// Read the engine state over `session` and convert it to samples.
    async fn collect(&self, session: &mut dyn Session) -> Result<Vec<Sample>, QueryError>;
}

/// InnoDB monitor parser.
#[derive(Debug, Clone, Copy, Default)]
pub struct InnodbDiagnostics;

#[async_trait::async_trait]
impl EngineDiagnostics for InnodbDiagnostics {
    fn name(&self) -> &str {
        "innodb"
    }

    async fn collect(&self, session: &mut dyn Session) -> Result<Vec<Sample>, QueryError> {
        let rows = session.query(SHOW_INNODB_STATUS).await?;
        let status = rows
            .first()
            .and_then(|row| row.get("Status"))
            .and_then(|value| value.as_text())
            .ok_or_else(|| QueryError::new(SHOW_INNODB_STATUS, "no Status column in result"))?;
        Ok(parse_innodb_status(status))
    }
}

/// Integers appearing in `s`, in order.
fn numbers(s: &str) -> Vec<u64> {
    s.split(|c: char| !c.is_ascii_digit())
        .filter(|part| !part.is_empty())
        .filter_map(|part| part.parse().ok())
        .collect()
}

fn first_number(s: &str) -> Option<u64> {
    numbers(s).into_iter().next()
}

/// Parse the text of `SHOW ENGINE INNODB STATUS`.
///
/// Unknown sections are ignored; the parser tolerates both the 5.x and 8.x
/// monitor layouts for the lines it understands.
pub fn parse_innodb_status(text: &str) -> Vec<Sample> {
    let mut samples = Vec::new();
    let mut lsn = None;
    let mut checkpoint = None;

    let gauge = |field: &str, value: u64| Sample::gauge(Category::Innodb, field, value);
    let counter = |field: &str, value: u64| Sample::counter(Category::Innodb, field, value);

    for line in text.lines().map(str::trim) {
        if let Some(rest) = line.strip_prefix("History list length") {
            if let Some(v) = first_number(rest) {
                samples.push(gauge("history_list_length", v));
            }
        } else if let Some(rest) = line.strip_prefix("Log sequence number") {
            lsn = first_number(rest);
            if let Some(v) = lsn {
                samples.push(counter("log_sequence_number", v));
            }
        } else if let Some(rest) = line.strip_prefix("Log flushed up to") {
            if let Some(v) = first_number(rest) {
                samples.push(counter("log_flushed_up_to", v));
            }
        } else if let Some(rest) = line.strip_prefix("Last checkpoint at") {
            checkpoint = first_number(rest);
            if let Some(v) = checkpoint {
                samples.push(counter("last_checkpoint_at", v));
            }
        } else if let Some(rest) = line.strip_prefix("Pending normal aio reads:") {
            let (reads, writes) = rest.split_once("aio writes:").unwrap_or((rest, ""));
            samples.push(gauge("pending_normal_aio_reads", aio_pending(reads)));
            samples.push(gauge("pending_normal_aio_writes", aio_pending(writes)));
        } else if let Some(rest) = line.strip_prefix("Pending flushes (fsync) log:") {
            if let &[log, buffer_pool, ..] = numbers(rest).as_slice() {
                samples.push(gauge("pending_log_flushes", log));
                samples.push(gauge("pending_buffer_pool_flushes", buffer_pool));
            }
        } else if let Some(rest) = line.strip_prefix("Ibuf: size") {
            if let &[size, free_list, seg_size, merges, ..] = numbers(rest).as_slice() {
                samples.push(gauge("ibuf_size", size));
                samples.push(gauge("ibuf_free_list_len", free_list));
                samples.push(gauge("ibuf_seg_size", seg_size));
                samples.push(counter("ibuf_merges", merges));
            }
        } else if line.contains("queries inside InnoDB") {
            if let &[inside, queued, ..] = numbers(line).as_slice() {
                samples.push(gauge("queries_inside", inside));
                samples.push(gauge("queries_queued", queued));
            }
        } else if line.ends_with("read views open inside InnoDB") {
            if let Some(v) = first_number(line) {
                samples.push(gauge("read_views", v));
            }
        } else if let Some(rest) = line.strip_prefix("RW-shared spins") {
            push_spin_counters(&mut samples, "rw_shared", rest);
        } else if let Some(rest) = line.strip_prefix("RW-excl spins") {
            push_spin_counters(&mut samples, "rw_excl", rest);
        }
    }

    if let (Some(lsn), Some(checkpoint)) = (lsn, checkpoint) {
        samples.push(gauge("checkpoint_age", lsn.saturating_sub(checkpoint)));
    }

    samples
}

/// Pending aio count: the leading total if present (5.x), else the per-thread sum (8.x).
fn aio_pending(section: &str) -> u64 {
    let section = section.trim().trim_end_matches(',');
    match section.split_once('[') {
        Some((total, _)) if !total.trim().is_empty() => first_number(total).unwrap_or(0),
        _ => numbers(section).iter().sum(),
    }
}

fn push_spin_counters(samples: &mut Vec<Sample>, prefix: &str, rest: &str) {
    if let &[spins, rounds, os_waits, ..] = numbers(rest).as_slice() {
        samples.push(Sample::counter(Category::Innodb, format!("{prefix}_spins"), spins));
        samples.push(Sample::counter(Category::Innodb, format!("{prefix}_rounds"), rounds));
        samples.push(Sample::counter(
            Category::Innodb,
            format!("{prefix}_os_waits"),
            os_waits,
        ));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collector::RawValue;
    use crate::model::MetricKind;

    const STATUS_8X: &str = r#"
=====================================
2024-05-01 10:00:00 0x7f INNODB MONITOR OUTPUT
=====================================
----------
SEMAPHORES
----------
OS WAIT ARRAY INFO: reservation count 120
RW-shared spins 12, rounds 34, OS waits 5
RW-excl spins 7, rounds 8, OS waits 2
------------
TRANSACTIONS
------------
History list length 873
--------
FILE I/O
--------
Pending normal aio reads: [0, 2, 0, 1] , aio writes: [0, 0, 0, 0] ,
Pending flushes (fsync) log: 1; buffer pool: 3
-------------------------------------
INSERT BUFFER AND ADAPTIVE HASH INDEX
-------------------------------------
Ibuf: size 1, free list len 61, seg size 63, 9 merges
---
LOG
---
Log sequence number          2034567
Log buffer assigned up to    2034567
Log flushed up to            2034500
Last checkpoint at           2000000
--------------
ROW OPERATIONS
--------------
0 queries inside InnoDB, 4 queries in queue
2 read views open inside InnoDB
"#;

    fn value_of(samples: &[Sample], field: &str) -> Option<RawValue> {
        samples
            .iter()
            .find(|s| s.field == field)
            .map(|s| s.value.clone())
    }

    #[test]
    fn test_parse_innodb_status_8x() {
        let samples = parse_innodb_status(STATUS_8X);

        assert_eq!(value_of(&samples, "history_list_length"), Some(RawValue::UInt(873)));
        assert_eq!(value_of(&samples, "log_sequence_number"), Some(RawValue::UInt(2034567)));
        assert_eq!(value_of(&samples, "last_checkpoint_at"), Some(RawValue::UInt(2000000)));
        assert_eq!(value_of(&samples, "checkpoint_age"), Some(RawValue::UInt(34567)));
        assert_eq!(value_of(&samples, "pending_normal_aio_reads"), Some(RawValue::UInt(3)));
        assert_eq!(value_of(&samples, "pending_normal_aio_writes"), Some(RawValue::UInt(0)));
        assert_eq!(value_of(&samples, "pending_buffer_pool_flushes"), Some(RawValue::UInt(3)));
        assert_eq!(value_of(&samples, "ibuf_free_list_len"), Some(RawValue::UInt(61)));
        assert_eq!(value_of(&samples, "queries_queued"), Some(RawValue::UInt(4)));
        assert_eq!(value_of(&samples, "read_views"), Some(RawValue::UInt(2)));
        assert_eq!(value_of(&samples, "rw_excl_os_waits"), Some(RawValue::UInt(2)));

        let lsn = samples
            .iter()
            .find(|s| s.field == "log_sequence_number")
            .unwrap();
        assert_eq!(lsn.kind, MetricKind::Counter);
        assert_eq!(lsn.name(), "innodb.log_sequence_number");
    }

    #[test]
    fn test_parse_innodb_pending_aio_5x_layout() {
        let samples = parse_innodb_status(
            "Pending normal aio reads: 6 [2, 4] , aio writes: 1 [1, 0] ,\n",
        );
        assert_eq!(value_of(&samples, "pending_normal_aio_reads"), Some(RawValue::UInt(6)));
        assert_eq!(value_of(&samples, "pending_normal_aio_writes"), Some(RawValue::UInt(1)));
    }

    #[test]
    fn test_parse_innodb_status_ignores_unknown() {
        assert!(parse_innodb_status("nothing useful here\n----\n").is_empty());
    }
}
