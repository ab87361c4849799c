// Copyright (c) 2026 bad-antics
// Licensed under the MIT License. See LICENSE file in the project root.
// https://github.com/bad-antics/triggercalc

//! TriggerCalc - Event-Triggered Calculation Engine
//!
//! Keeps a rolling in-memory window of time-series attributes fed by a
//! historian's update pipe, and reruns derived calculations whenever a
//! trigger attribute changes:
//! - Per-attribute time-window retention cache
//! - Iterative sigma-trimmed mean over the last N samples
//! - Ideal gas moles and molar flow rate per context
//! - Single-flight dispatch per context
//! - SQLite-backed historian with a change log for subscriptions
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      TriggerCalc Engine                     │
//! ├─────────────────────────────────────────────────────────────┤
//! │  ┌───────────┐   ┌──────────┐   ┌────────────┐              │
//! │  │ Historian │ → │  Update  │ → │ Attribute  │              │
//! │  │  updates  │   │  Poller  │   │   Cache    │              │
//! │  └───────────┘   └──────────┘   └────────────┘              │
//! │        ↑                              ↓ admitted            │
//! │        │         ┌─────────────┐  ┌──────────────┐          │
//! │        └──────── │ Calculation │ ←│  Dispatcher  │          │
//! │          writes  │  (per ctx)  │  │  (triggers)  │          │
//! │                  └─────────────┘  └──────────────┘          │
//! └─────────────────────────────────────────────────────────────┘
//! ```

#![allow(dead_code)]

pub mod core;
pub mod cache;
pub mod analysis;
pub mod historian;
pub mod calc;
pub mod config;
pub mod sensors;

// Re-exports for convenience
pub use config::Config;
pub use core::{AttributeRef, Engine, EngineState, Sample};
pub use cache::AttributeCache;
pub use historian::{AttributeResolver, Historian, SqliteHistorian};
pub use calc::{Calculation, GasCalculation};
pub use sensors::SensorSimulator;

/// TriggerCalc version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// TriggerCalc name
pub const NAME: &str = "TriggerCalc";
