// Copyright (c) 2026 bad-antics
// Licensed under the MIT License. See LICENSE file in the project root.
// https://github.com/bad-antics/triggercalc

//! Historian interfaces - durable time-series reads, writes and update pipes

mod sqlite;

pub use sqlite::SqliteHistorian;

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::core::{AttributeRef, Sample};

/// Whether a sample exactly at the boundary timestamp is included
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BoundaryPolicy {
    Inclusive,
    Exclusive,
}

impl BoundaryPolicy {
    pub fn is_inclusive(&self) -> bool {
        matches!(self, BoundaryPolicy::Inclusive)
    }
}

/// Write semantics at an existing timestamp
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UpdateMode {
    /// Add alongside any sample already at that timestamp
    Insert,
    /// Overwrite any sample already at that timestamp
    Replace,
}

/// Change-log action of an update event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UpdateAction {
    Add,
    Update,
    Remove,
}

/// One entry from a snapshot update pipe
#[derive(Debug, Clone, PartialEq)]
pub struct UpdateEvent {
    pub attribute: AttributeRef,
    pub action: UpdateAction,
    pub sample: Sample,
}

/// Durable time-series store backing every attribute
pub trait Historian: Send + Sync {
    /// Up to `count` samples ending at `before`, oldest first.
    fn read_recent_by_count(
        &self,
        attr: AttributeRef,
        before: DateTime<Utc>,
        count: usize,
        boundary: BoundaryPolicy,
    ) -> Result<Vec<Sample>>;

    fn read_latest(&self, attr: AttributeRef) -> Result<Option<Sample>>;

    fn write_value(
        &self,
        attr: AttributeRef,
        value: f64,
        timestamp: DateTime<Utc>,
        mode: UpdateMode,
    ) -> Result<()>;

    /// Open an update pipe for `attrs`. Only changes made after this call
    /// are delivered.
    fn subscribe(&self, attrs: &[AttributeRef]) -> Result<Box<dyn UpdateStream>>;
}

/// Snapshot update pipe
pub trait UpdateStream: Send {
    /// Up to `max` events since the previous successful call, in change order.
    fn next_batch(&mut self, max: usize) -> Result<Vec<UpdateEvent>>;

    /// Release the subscription. Later reads fail.
    fn close(&mut self) -> Result<()>;
}

/// Maps `"<context>|<attribute>"` paths to handles
pub trait AttributeResolver: Send + Sync {
    fn resolve(&self, path: &str) -> Result<AttributeRef>;
}

/// Path of an attribute within a context
pub fn attribute_path(context: &str, attribute: &str) -> String {
    format!("{}|{}", context, attribute)
}
