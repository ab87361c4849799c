// Copyright (c) 2026 bad-antics
// Licensed under the MIT License. See LICENSE file in the project root.
// https://github.com/bad-antics/triggercalc

//! Sensor module - simulated feeds for demo runs

mod simulator;

pub use simulator::{seed_demo, SensorSimulator};
