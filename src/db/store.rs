//! SQLite database store implementation.
//!
//! The database runs in WAL mode with two connections: a writer that every
//! mutation goes through (serialized by its mutex) and a read-only connection
//! for queries, so API readers never wait on a write in progress.

use chrono::{DateTime, Duration as ChronoDuration, NaiveDateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OpenFlags, OptionalExtension, Result as SqlResult, Row};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use thiserror::Error;

use super::models::*;
use super::stats::compute_stats;

const TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.9f";

/// Database error types.
#[derive(Error, Debug)]
pub enum DbError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("Migration error: {0}")]
    Migration(String),
    #[error("connection lock poisoned")]
    Poisoned,
}

/// Thread-safe database store.
#[derive(Clone)]
pub struct Store {
    writer: Arc<Mutex<Connection>>,
    reader: Arc<Mutex<Connection>>,
}

impl Store {
    /// Open (or create) the store at the given database path.
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self, DbError> {
        let path = path.as_ref();

        let writer = Connection::open(path)?;
        writer.busy_timeout(Duration::from_secs(5))?;
        let mode: String = writer.query_row("PRAGMA journal_mode=WAL", [], |r| r.get(0))?;
        tracing::debug!("SQLite journal mode: {}", mode);
        init(&writer)?;

        let reader = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;
        reader.busy_timeout(Duration::from_secs(5))?;

        Ok(Self {
            writer: Arc::new(Mutex::new(writer)),
            reader: Arc::new(Mutex::new(reader)),
        })
    }

    fn writer(&self) -> Result<MutexGuard<'_, Connection>, DbError> {
        self.writer.lock().map_err(|_| DbError::Poisoned)
    }

    fn reader(&self) -> Result<MutexGuard<'_, Connection>, DbError> {
        self.reader.lock().map_err(|_| DbError::Poisoned)
    }

    // --- Samples ---

    /// Append a sample and return its row ID.
    pub fn record_sample(&self, sample: &Sample) -> Result<i64, DbError> {
        let conn = self.writer()?;
        conn.execute(
            "INSERT INTO metrics (target, timestamp, status_code, latency_ms, is_healthy, error_message)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                sample.target,
                fmt_time(sample.timestamp),
                sample.status_code,
                sample.latency_ms,
                sample.is_healthy,
                sample.error_detail,
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    /// Samples for a target at or after `since`, newest first.
    pub fn query_samples(&self, target: &str, since: DateTime<Utc>) -> Result<Vec<Sample>, DbError> {
        let conn = self.reader()?;
        let mut stmt = conn.prepare(
            "SELECT target, timestamp, status_code, latency_ms, is_healthy, error_message
             FROM metrics WHERE target = ?1 AND timestamp >= ?2 ORDER BY timestamp DESC",
        )?;

        let samples = stmt
            .query_map(params![target, fmt_time(since)], row_to_sample)?
            .collect::<SqlResult<Vec<_>>>()?;

        Ok(samples)
    }

    /// The most recent sample for a target.
    pub fn latest_sample(&self, target: &str) -> Result<Option<Sample>, DbError> {
        let conn = self.reader()?;
        let sample = conn
            .query_row(
                "SELECT target, timestamp, status_code, latency_ms, is_healthy, error_message
                 FROM metrics WHERE target = ?1 ORDER BY timestamp DESC LIMIT 1",
                params![target],
                row_to_sample,
            )
            .optional()?;
        Ok(sample)
    }

    /// Rolling statistics for a target over the last `hours`.
    pub fn stats(&self, target: &str, hours: i64) -> Result<Stats, DbError> {
        let since = ChronoDuration::try_hours(hours)
            .and_then(|window| Utc::now().checked_sub_signed(window))
            .unwrap_or(DateTime::UNIX_EPOCH);
        let samples = self.query_samples(target, since)?;
        Ok(compute_stats(target, hours, &samples))
    }

    // --- Alerts ---

    /// Append an alert and return its row ID.
    pub fn record_alert(&self, alert: &Alert) -> Result<i64, DbError> {
        let conn = self.writer()?;
        conn.execute(
            "INSERT INTO alerts (level, kind, target, message, timestamp, resolved)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                alert.level.as_str(),
                alert.kind.as_str(),
                alert.target,
                alert.message,
                fmt_time(alert.timestamp),
                alert.resolved,
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    /// Unresolved alerts, most severe first, then newest first.
    pub fn unresolved_alerts(&self) -> Result<Vec<Alert>, DbError> {
        let conn = self.reader()?;
        let mut stmt = conn.prepare(
            "SELECT id, level, kind, target, message, timestamp, resolved FROM alerts
             WHERE resolved = 0
             ORDER BY CASE level WHEN 'CRITICAL' THEN 2 WHEN 'WARNING' THEN 1 ELSE 0 END DESC,
                      timestamp DESC, id DESC",
        )?;

        let alerts = stmt
            .query_map([], row_to_alert)?
            .collect::<SqlResult<Vec<_>>>()?;

        Ok(alerts)
    }

    /// Mark the unresolved alerts of one kind for a target as resolved.
    /// Returns how many flipped.
    pub fn resolve_alerts(&self, target: &str, kind: AlertKind) -> Result<usize, DbError> {
        let conn = self.writer()?;
        let n = conn.execute(
            "UPDATE alerts SET resolved = 1 WHERE target = ?1 AND kind = ?2 AND resolved = 0",
            params![target, kind.as_str()],
        )?;
        Ok(n)
    }

    // --- Incidents ---

    /// Open an incident unless one is already open for the target.
    ///
    /// Returns the new incident, or `None` when an open one already exists.
    pub fn open_incident_if_none(&self, new: &NewIncident) -> Result<Option<Incident>, DbError> {
        let mut conn = self.writer()?;
        let tx = conn.transaction()?;

        let existing: Option<i64> = tx
            .query_row(
                "SELECT id FROM incidents WHERE target = ?1 AND resolved_at IS NULL",
                params![new.target],
                |r| r.get(0),
            )
            .optional()?;
        if existing.is_some() {
            return Ok(None);
        }

        tx.execute(
            "INSERT INTO incidents (target, severity, category, issue, detected_at, auto_fixed, recommendation)
             VALUES (?1, ?2, ?3, ?4, ?5, 0, ?6)",
            params![
                new.target,
                new.severity.as_str(),
                new.category.detail(),
                new.issue,
                fmt_time(new.detected_at),
                new.recommendation,
            ],
        )?;
        let id = tx.last_insert_rowid();
        let incident = select_incident(&tx, id)?;
        tx.commit()?;

        Ok(incident)
    }

    /// The open incident for a target, if any.
    pub fn open_incident(&self, target: &str) -> Result<Option<Incident>, DbError> {
        let conn = self.reader()?;
        let incident = conn
            .query_row(
                &format!("{} WHERE target = ?1 AND resolved_at IS NULL", INCIDENT_SELECT),
                params![target],
                row_to_incident,
            )
            .optional()?;
        Ok(incident)
    }

    /// Close an open incident. The first caller wins: closing an incident
    /// that is already resolved returns `None` and changes nothing.
    pub fn close_incident(
        &self,
        id: i64,
        auto_fixed: bool,
        resolution: &str,
    ) -> Result<Option<Incident>, DbError> {
        let conn = self.writer()?;
        let changed = conn.execute(
            "UPDATE incidents SET resolved_at = ?1, auto_fixed = ?2, resolution = ?3
             WHERE id = ?4 AND resolved_at IS NULL",
            params![fmt_time(Utc::now()), auto_fixed, resolution, id],
        )?;
        if changed == 0 {
            return Ok(None);
        }
        select_incident(&conn, id)
    }

    /// Incidents newest first, optionally only the open ones.
    pub fn list_incidents(&self, open_only: bool, limit: usize) -> Result<Vec<Incident>, DbError> {
        let conn = self.reader()?;
        let sql = if open_only {
            format!("{} WHERE resolved_at IS NULL ORDER BY detected_at DESC LIMIT ?1", INCIDENT_SELECT)
        } else {
            format!("{} ORDER BY detected_at DESC LIMIT ?1", INCIDENT_SELECT)
        };
        let mut stmt = conn.prepare(&sql)?;
        let incidents = stmt
            .query_map(params![limit as i64], row_to_incident)?
            .collect::<SqlResult<Vec<_>>>()?;
        Ok(incidents)
    }

    // --- Retention ---

    /// Delete samples, resolved alerts and closed incidents older than
    /// `older_than_days`. Running it twice is harmless.
    pub fn prune(&self, older_than_days: i64) -> Result<PruneReport, DbError> {
        let cutoff = ChronoDuration::try_days(older_than_days)
            .and_then(|window| Utc::now().checked_sub_signed(window))
            .unwrap_or(DateTime::UNIX_EPOCH);
        let cutoff = fmt_time(cutoff);

        let mut conn = self.writer()?;
        let tx = conn.transaction()?;
        let samples = tx.execute("DELETE FROM metrics WHERE timestamp < ?1", params![cutoff])?;
        let alerts = tx.execute(
            "DELETE FROM alerts WHERE resolved = 1 AND timestamp < ?1",
            params![cutoff],
        )?;
        let incidents = tx.execute(
            "DELETE FROM incidents WHERE resolved_at IS NOT NULL AND resolved_at < ?1",
            params![cutoff],
        )?;
        tx.commit()?;

        Ok(PruneReport {
            samples,
            alerts,
            incidents,
        })
    }

    // --- Status Page Stats ---

    /// Get database size in bytes.
    pub fn get_db_size_bytes(&self) -> Result<i64, DbError> {
        let conn = self.reader()?;
        let page_count: i64 = conn.query_row("PRAGMA page_count", [], |r| r.get(0))?;
        let page_size: i64 = conn.query_row("PRAGMA page_size", [], |r| r.get(0))?;
        Ok(page_count * page_size)
    }

    /// Total number of stored samples.
    pub fn count_samples(&self) -> Result<i64, DbError> {
        let conn = self.reader()?;
        Ok(conn.query_row("SELECT COUNT(*) FROM metrics", [], |r| r.get(0))?)
    }
}

/// Apply the embedded schema.
fn init(conn: &Connection) -> Result<(), DbError> {
    conn.execute_batch(include_str!("../../migrations/000001_init.up.sql"))
        .map_err(|e| DbError::Migration(format!("Migration 1 failed: {}", e)))?;
    Ok(())
}

const INCIDENT_SELECT: &str = "SELECT id, target, severity, category, issue, detected_at, resolved_at, \
     auto_fixed, resolution, recommendation FROM incidents";

fn select_incident(conn: &Connection, id: i64) -> Result<Option<Incident>, DbError> {
    let incident = conn
        .query_row(
            &format!("{} WHERE id = ?1", INCIDENT_SELECT),
            params![id],
            row_to_incident,
        )
        .optional()?;
    Ok(incident)
}

fn conversion_error(idx: usize, what: &str, value: &str) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, format!("invalid {}: {:?}", what, value).into())
}

fn time_column(row: &Row<'_>, idx: usize) -> SqlResult<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    parse_db_time(&raw).ok_or_else(|| conversion_error(idx, "timestamp", &raw))
}

fn row_to_sample(row: &Row<'_>) -> SqlResult<Sample> {
    Ok(Sample {
        target: row.get(0)?,
        timestamp: time_column(row, 1)?,
        status_code: row.get(2)?,
        latency_ms: row.get(3)?,
        is_healthy: row.get(4)?,
        error_detail: row.get(5)?,
    })
}

fn row_to_alert(row: &Row<'_>) -> SqlResult<Alert> {
    let level: String = row.get(1)?;
    let kind: String = row.get(2)?;
    Ok(Alert {
        id: row.get(0)?,
        level: AlertLevel::parse(&level),
        kind: AlertKind::parse(&kind),
        target: row.get(3)?,
        message: row.get(4)?,
        timestamp: time_column(row, 5)?,
        resolved: row.get(6)?,
    })
}

fn row_to_incident(row: &Row<'_>) -> SqlResult<Incident> {
    let severity: String = row.get(2)?;
    let category: String = row.get(3)?;
    let category =
        FailureCategory::from_detail(&category).ok_or_else(|| conversion_error(3, "category", &category))?;
    let resolved_at: Option<String> = row.get(6)?;
    let resolved_at = match resolved_at {
        Some(raw) => Some(parse_db_time(&raw).ok_or_else(|| conversion_error(6, "timestamp", &raw))?),
        None => None,
    };
    Ok(Incident {
        id: row.get(0)?,
        target: row.get(1)?,
        severity: Severity::parse(&severity),
        category,
        issue: row.get(4)?,
        detected_at: time_column(row, 5)?,
        resolved_at,
        auto_fixed: row.get(7)?,
        resolution: row.get(8)?,
        recommendation: row.get(9)?,
    })
}

fn fmt_time(dt: DateTime<Utc>) -> String {
    dt.format(TIME_FORMAT).to_string()
}

/// Parse a datetime string from the database.
fn parse_db_time(s: &str) -> Option<DateTime<Utc>> {
    let formats = [
        TIME_FORMAT,
        "%Y-%m-%d %H:%M:%S%.f",
        "%Y-%m-%d %H:%M:%S",
    ];

    for fmt in &formats {
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(DateTime::from_naive_utc_and_offset(dt, Utc));
        }
    }

    DateTime::parse_from_rfc3339(s)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}
