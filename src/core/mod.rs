// Copyright (c) 2026 bad-antics
// Licensed under the MIT License. See LICENSE file in the project root.
// https://github.com/bad-antics/triggercalc

//! Core engine module - data model, lifecycle, polling and dispatch

mod engine;
mod poller;
mod dispatcher;

pub use engine::Engine;
pub use poller::{UpdatePoller, PollerState, TickReport};
pub use dispatcher::{Dispatcher, ContextCalculation};

use std::collections::HashSet;
use std::fmt;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Opaque handle to a resolved time-series attribute.
///
/// Identity is by handle, never by name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AttributeRef(i64);

impl AttributeRef {
    pub fn new(id: i64) -> Self {
        Self(id)
    }

    pub fn id(&self) -> i64 {
        self.0
    }
}

impl fmt::Display for AttributeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "attr#{}", self.0)
    }
}

/// Sample quality as reported by the historian
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Quality {
    Good,
    Bad,
}

/// A single time-series value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    pub value: f64,
    pub timestamp: DateTime<Utc>,
    pub quality: Quality,
    pub unit: Option<String>,
}

impl Sample {
    pub fn new(value: f64, timestamp: DateTime<Utc>) -> Self {
        Self {
            value,
            timestamp,
            quality: Quality::Good,
            unit: None,
        }
    }

    /// A Bad-quality sample; the value carries no meaning.
    pub fn bad(timestamp: DateTime<Utc>) -> Self {
        Self {
            value: 0.0,
            timestamp,
            quality: Quality::Bad,
            unit: None,
        }
    }

    pub fn with_unit(mut self, unit: &str) -> Self {
        self.unit = Some(unit.to_string());
        self
    }

    pub fn is_good(&self) -> bool {
        self.quality == Quality::Good
    }
}

/// An admitted update to a trigger attribute
#[derive(Debug, Clone, PartialEq)]
pub struct TriggerEvent {
    pub attribute: AttributeRef,
    pub timestamp: DateTime<Utc>,
    pub value: f64,
}

/// A named group of attributes forming one calculation instance
#[derive(Debug, Clone)]
pub struct Context {
    pub name: String,
    inputs: Vec<AttributeRef>,
    triggers: HashSet<AttributeRef>,
    outputs: Vec<AttributeRef>,
}

impl Context {
    /// Triggers that are not also inputs are dropped.
    pub fn new(
        name: &str,
        inputs: Vec<AttributeRef>,
        triggers: impl IntoIterator<Item = AttributeRef>,
        outputs: Vec<AttributeRef>,
    ) -> Self {
        let triggers = triggers
            .into_iter()
            .filter(|t| inputs.contains(t))
            .collect();

        Self {
            name: name.to_string(),
            inputs,
            triggers,
            outputs,
        }
    }

    pub fn inputs(&self) -> &[AttributeRef] {
        &self.inputs
    }

    pub fn outputs(&self) -> &[AttributeRef] {
        &self.outputs
    }

    pub fn triggers(&self) -> impl Iterator<Item = &AttributeRef> {
        self.triggers.iter()
    }

    pub fn is_trigger(&self, attribute: &AttributeRef) -> bool {
        self.triggers.contains(attribute)
    }

    /// Every attribute the context reads or writes
    pub fn attributes(&self) -> impl Iterator<Item = &AttributeRef> {
        self.inputs.iter().chain(self.outputs.iter())
    }
}

/// Lifecycle state of the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EngineState {
    Starting,
    Running,
    Stopping,
    Stopped,
}
