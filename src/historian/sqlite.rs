// Copyright (c) 2026 bad-antics
// Licensed under the MIT License. See LICENSE file in the project root.
// https://github.com/bad-antics/triggercalc

//! SQLite-backed historian

use anyhow::{anyhow, bail, Result};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::sync::Arc;
use tracing::{debug, info};

use super::{
    AttributeResolver, BoundaryPolicy, Historian, UpdateAction, UpdateEvent, UpdateMode,
    UpdateStream,
};
use crate::config::HistorianConfig;
use crate::core::{AttributeRef, Quality, Sample};

/// Historian stored in a single SQLite database
pub struct SqliteHistorian {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteHistorian {
    /// Open or create the database file
    pub fn open(config: &HistorianConfig) -> Result<Self> {
        if let Some(parent) = config.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(&config.path)?;

        conn.execute_batch(r#"
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA temp_store = MEMORY;
        "#)?;

        let historian = Self::with_connection(conn)?;
        info!("Historian opened at {:?}", config.path);
        Ok(historian)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        let historian = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        historian.create_tables()?;
        Ok(historian)
    }

    fn create_tables(&self) -> Result<()> {
        let conn = self.conn.lock();

        conn.execute_batch(r#"
            CREATE TABLE IF NOT EXISTS attributes (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                path TEXT NOT NULL UNIQUE,
                unit TEXT
            );

            -- Time-series values, timestamps in microseconds since the epoch
            CREATE TABLE IF NOT EXISTS samples (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                attribute_id INTEGER NOT NULL,
                ts INTEGER NOT NULL,
                value REAL NOT NULL,
                good INTEGER NOT NULL,
                unit TEXT
            );

            CREATE INDEX IF NOT EXISTS idx_samples_attr_ts ON samples(attribute_id, ts);

            -- Change log feeding update streams
            CREATE TABLE IF NOT EXISTS updates (
                seq INTEGER PRIMARY KEY AUTOINCREMENT,
                attribute_id INTEGER NOT NULL,
                action TEXT NOT NULL,
                ts INTEGER NOT NULL,
                value REAL NOT NULL,
                good INTEGER NOT NULL,
                unit TEXT
            );
        "#)?;

        Ok(())
    }

    /// Create an attribute if it does not exist yet and return its handle
    pub fn register_attribute(&self, path: &str, unit: Option<&str>) -> Result<AttributeRef> {
        let conn = self.conn.lock();

        conn.execute(
            "INSERT OR IGNORE INTO attributes (path, unit) VALUES (?1, ?2)",
            params![path, unit],
        )?;
        let id: i64 = conn.query_row(
            "SELECT id FROM attributes WHERE path = ?1",
            params![path],
            |row| row.get(0),
        )?;

        debug!("Registered attribute {} as #{}", path, id);
        Ok(AttributeRef::new(id))
    }

    /// Write a full sample, including its quality
    pub fn write_sample(&self, attr: AttributeRef, sample: &Sample, mode: UpdateMode) -> Result<()> {
        let conn = self.conn.lock();
        let tx = conn.unchecked_transaction()?;

        let ts = sample.timestamp.timestamp_micros();
        let good = sample.is_good();

        let action = match mode {
            UpdateMode::Insert => UpdateAction::Add,
            UpdateMode::Replace => {
                tx.execute(
                    "DELETE FROM samples WHERE attribute_id = ?1 AND ts = ?2",
                    params![attr.id(), ts],
                )?;
                UpdateAction::Update
            }
        };

        tx.execute(
            "INSERT INTO samples (attribute_id, ts, value, good, unit)
             VALUES (?1, ?2, ?3, ?4, COALESCE(?5, (SELECT unit FROM attributes WHERE id = ?1)))",
            params![attr.id(), ts, sample.value, good, sample.unit],
        )?;
        tx.execute(
            "INSERT INTO updates (attribute_id, action, ts, value, good, unit)
             VALUES (?1, ?2, ?3, ?4, ?5, COALESCE(?6, (SELECT unit FROM attributes WHERE id = ?1)))",
            params![attr.id(), action_name(action), ts, sample.value, good, sample.unit],
        )?;

        tx.commit()?;
        Ok(())
    }

    /// Delete every sample at `timestamp`, logging a Remove action
    pub fn remove_value(&self, attr: AttributeRef, timestamp: DateTime<Utc>) -> Result<usize> {
        let conn = self.conn.lock();
        let tx = conn.unchecked_transaction()?;
        let ts = timestamp.timestamp_micros();

        let removed = tx.execute(
            "DELETE FROM samples WHERE attribute_id = ?1 AND ts = ?2",
            params![attr.id(), ts],
        )?;
        tx.execute(
            "INSERT INTO updates (attribute_id, action, ts, value, good, unit)
             VALUES (?1, ?2, ?3, 0.0, 0, NULL)",
            params![attr.id(), action_name(UpdateAction::Remove), ts],
        )?;

        tx.commit()?;
        Ok(removed)
    }

    /// All samples of an attribute in `[start, end]`, oldest first
    pub fn query_samples(
        &self,
        attr: AttributeRef,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Sample>> {
        let conn = self.conn.lock();

        let mut stmt = conn.prepare(
            "SELECT ts, value, good, unit FROM samples
             WHERE attribute_id = ?1 AND ts >= ?2 AND ts <= ?3
             ORDER BY ts ASC, id ASC",
        )?;

        let rows = stmt.query_map(
            params![attr.id(), start.timestamp_micros(), end.timestamp_micros()],
            sample_from_row,
        )?;

        let mut results = Vec::new();
        for row in rows {
            results.push(row?);
        }
        Ok(results)
    }
}

impl Historian for SqliteHistorian {
    fn read_recent_by_count(
        &self,
        attr: AttributeRef,
        before: DateTime<Utc>,
        count: usize,
        boundary: BoundaryPolicy,
    ) -> Result<Vec<Sample>> {
        let conn = self.conn.lock();

        let op = if boundary.is_inclusive() { "<=" } else { "<" };
        let sql = format!(
            "SELECT ts, value, good, unit FROM samples
             WHERE attribute_id = ?1 AND ts {} ?2
             ORDER BY ts DESC, id DESC LIMIT ?3",
            op
        );

        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(
            params![attr.id(), before.timestamp_micros(), count as i64],
            sample_from_row,
        )?;

        let mut results = Vec::new();
        for row in rows {
            results.push(row?);
        }
        results.reverse();
        Ok(results)
    }

    fn read_latest(&self, attr: AttributeRef) -> Result<Option<Sample>> {
        let conn = self.conn.lock();

        let sample = conn
            .query_row(
                "SELECT ts, value, good, unit FROM samples
                 WHERE attribute_id = ?1 ORDER BY ts DESC, id DESC LIMIT 1",
                params![attr.id()],
                sample_from_row,
            )
            .optional()?;
        Ok(sample)
    }

    fn write_value(
        &self,
        attr: AttributeRef,
        value: f64,
        timestamp: DateTime<Utc>,
        mode: UpdateMode,
    ) -> Result<()> {
        self.write_sample(attr, &Sample::new(value, timestamp), mode)
    }

    fn subscribe(&self, attrs: &[AttributeRef]) -> Result<Box<dyn UpdateStream>> {
        let cursor: i64 = self.conn.lock().query_row(
            "SELECT COALESCE(MAX(seq), 0) FROM updates",
            [],
            |row| row.get(0),
        )?;

        debug!("Update stream opened for {} attributes at seq {}", attrs.len(), cursor);
        Ok(Box::new(SqliteUpdateStream {
            conn: self.conn.clone(),
            attrs: attrs.iter().map(|a| a.id()).collect(),
            cursor,
            closed: false,
        }))
    }
}

impl AttributeResolver for SqliteHistorian {
    fn resolve(&self, path: &str) -> Result<AttributeRef> {
        let conn = self.conn.lock();

        let id: Option<i64> = conn
            .query_row(
                "SELECT id FROM attributes WHERE path = ?1",
                params![path],
                |row| row.get(0),
            )
            .optional()?;

        id.map(AttributeRef::new)
            .ok_or_else(|| anyhow!("attribute '{}' not found", path))
    }
}

/// Change-log reader for a fixed attribute set
struct SqliteUpdateStream {
    conn: Arc<Mutex<Connection>>,
    attrs: Vec<i64>,
    cursor: i64,
    closed: bool,
}

impl UpdateStream for SqliteUpdateStream {
    fn next_batch(&mut self, max: usize) -> Result<Vec<UpdateEvent>> {
        if self.closed {
            bail!("update stream is closed");
        }
        if self.attrs.is_empty() || max == 0 {
            return Ok(Vec::new());
        }

        let ids = self
            .attrs
            .iter()
            .map(|id| id.to_string())
            .collect::<Vec<_>>()
            .join(",");
        let sql = format!(
            "SELECT seq, attribute_id, action, ts, value, good, unit FROM updates
             WHERE seq > ?1 AND attribute_id IN ({})
             ORDER BY seq ASC LIMIT ?2",
            ids
        );

        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&sql)?;
        let mut rows = stmt.query(params![self.cursor, max as i64])?;

        let mut events = Vec::new();
        let mut last_seq = self.cursor;
        while let Some(row) = rows.next()? {
            let seq: i64 = row.get(0)?;
            let action: String = row.get(2)?;
            let ts: i64 = row.get(3)?;
            let good: bool = row.get(5)?;

            events.push(UpdateEvent {
                attribute: AttributeRef::new(row.get(1)?),
                action: parse_action(&action)?,
                sample: Sample {
                    value: row.get(4)?,
                    timestamp: timestamp_from_micros(ts)?,
                    quality: if good { Quality::Good } else { Quality::Bad },
                    unit: row.get(6)?,
                },
            });
            last_seq = seq;
        }

        self.cursor = last_seq;
        Ok(events)
    }

    fn close(&mut self) -> Result<()> {
        if self.closed {
            bail!("update stream already closed");
        }
        self.closed = true;
        debug!("Update stream closed at seq {}", self.cursor);
        Ok(())
    }
}

fn sample_from_row(row: &Row<'_>) -> rusqlite::Result<Sample> {
    let ts: i64 = row.get(0)?;
    let good: bool = row.get(2)?;

    Ok(Sample {
        value: row.get(1)?,
        timestamp: DateTime::<Utc>::from_timestamp_micros(ts)
            .ok_or(rusqlite::Error::IntegralValueOutOfRange(0, ts))?,
        quality: if good { Quality::Good } else { Quality::Bad },
        unit: row.get(3)?,
    })
}

fn timestamp_from_micros(ts: i64) -> Result<DateTime<Utc>> {
    DateTime::<Utc>::from_timestamp_micros(ts).ok_or_else(|| anyhow!("timestamp {} out of range", ts))
}

fn action_name(action: UpdateAction) -> &'static str {
    match action {
        UpdateAction::Add => "add",
        UpdateAction::Update => "update",
        UpdateAction::Remove => "remove",
    }
}

fn parse_action(name: &str) -> Result<UpdateAction> {
    match name {
        "add" => Ok(UpdateAction::Add),
        "update" => Ok(UpdateAction::Update),
        "remove" => Ok(UpdateAction::Remove),
        other => Err(anyhow!("unknown update action '{}'", other)),
    }
}
