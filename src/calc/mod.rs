// Copyright (c) 2026 bad-antics
// Licensed under the MIT License. See LICENSE file in the project root.
// https://github.com/bad-antics/triggercalc

//! Derived calculations run against a context when a trigger fires

mod gas;

pub use gas::{GasBindings, GasCalculation};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::cache::AttributeCache;
use crate::core::{AttributeRef, Context, Sample, TriggerEvent};
use crate::historian::{BoundaryPolicy, Historian, UpdateMode};

/// Unrecoverable calculation failure
#[derive(Debug, Error)]
pub enum CalcError {
    #[error(transparent)]
    Historian(#[from] anyhow::Error),
}

/// Why an invocation wrote nothing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SkipReason {
    /// A statistical input had no good samples left after trimming
    InsufficientData(AttributeRef),
    /// An instantaneous input had no good value at the trigger time
    MissingInstantaneous(AttributeRef),
    /// The formula produced NaN or infinity
    NonFiniteResult,
}

/// Why the rate-of-change output was not written
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RateSkip {
    NoPrevious,
    BadPrevious,
    ZeroElapsed,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum RateOutcome {
    Written(f64),
    Skipped(RateSkip),
}

/// Result of one invocation
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum CalcOutcome {
    Written { primary: f64, rate: RateOutcome },
    Skipped(SkipReason),
}

impl CalcOutcome {
    pub fn is_written(&self) -> bool {
        matches!(self, CalcOutcome::Written { .. })
    }
}

/// A calculation bound to one context
pub trait Calculation: Send + Sync {
    fn context(&self) -> &Context;

    fn run(&self, trigger: &TriggerEvent, data: &DataAccess<'_>) -> Result<CalcOutcome, CalcError>;
}

/// Cache-first reads with historian fallback, and write-through writes
pub struct DataAccess<'a> {
    cache: &'a AttributeCache,
    historian: &'a dyn Historian,
}

impl<'a> DataAccess<'a> {
    pub fn new(cache: &'a AttributeCache, historian: &'a dyn Historian) -> Self {
        Self { cache, historian }
    }

    /// Up to `count` samples at or before `t`, oldest first
    pub fn recent(&self, attr: AttributeRef, t: DateTime<Utc>, count: usize) -> Result<Vec<Sample>, CalcError> {
        self.read(attr, t, count, BoundaryPolicy::Inclusive)
    }

    /// The newest sample at or before `t`
    pub fn value_at(&self, attr: AttributeRef, t: DateTime<Utc>) -> Result<Option<Sample>, CalcError> {
        Ok(self.read(attr, t, 1, BoundaryPolicy::Inclusive)?.pop())
    }

    /// The newest sample strictly before `t`
    pub fn previous(&self, attr: AttributeRef, t: DateTime<Utc>) -> Result<Option<Sample>, CalcError> {
        Ok(self.read(attr, t, 1, BoundaryPolicy::Exclusive)?.pop())
    }

    /// Insert into the historian and, when tracked, into the cache so the
    /// next invocation reads it back without a historian round trip.
    pub fn write_through(&self, attr: AttributeRef, value: f64, t: DateTime<Utc>) -> Result<(), CalcError> {
        self.historian.write_value(attr, value, t, UpdateMode::Insert)?;
        // untracked outputs live only in the historian
        let _ = self.cache.ingest(attr, Sample::new(value, t));
        Ok(())
    }

    pub fn write(&self, attr: AttributeRef, value: f64, t: DateTime<Utc>) -> Result<(), CalcError> {
        self.historian.write_value(attr, value, t, UpdateMode::Insert)?;
        Ok(())
    }

    fn read(
        &self,
        attr: AttributeRef,
        t: DateTime<Utc>,
        count: usize,
        boundary: BoundaryPolicy,
    ) -> Result<Vec<Sample>, CalcError> {
        match self.cache.recent(&attr, t, count, boundary.is_inclusive()) {
            Ok(samples) if !samples.is_empty() => Ok(samples),
            _ => Ok(self.historian.read_recent_by_count(attr, t, count, boundary)?),
        }
    }
}

/// Seconds from `earlier` to `later`, microsecond resolution
pub fn elapsed_seconds(later: DateTime<Utc>, earlier: DateTime<Utc>) -> f64 {
    let delta = later - earlier;
    match delta.num_microseconds() {
        Some(us) => us as f64 / 1_000_000.0,
        None => delta.num_milliseconds() as f64 / 1_000.0,
    }
}
