// Copyright (c) 2026 bad-antics
// Licensed under the MIT License. See LICENSE file in the project root.
// https://github.com/bad-antics/triggercalc

//! Sensor simulator for demo/testing

use std::sync::Arc;
use std::time::Duration;
use anyhow::{anyhow, bail, Result};
use chrono::{DateTime, Utc};
use rand::prelude::*;
use rand_distr::Normal;
use tokio::sync::broadcast;
use tokio::time::interval;
use tracing::{debug, info, warn};

use crate::config::{CalculationConfig, SimulatorConfig};
use crate::core::{AttributeRef, Sample};
use crate::historian::{attribute_path, SqliteHistorian, UpdateMode};

/// One simulated measurement
struct Channel {
    attribute: AttributeRef,
    base: f64,
    noise: Normal<f64>,
    std_dev: f64,
}

/// Writes noisy readings with occasional outliers and Bad samples
pub struct SensorSimulator {
    historian: Arc<SqliteHistorian>,
    channels: Vec<Channel>,
    config: SimulatorConfig,
    rng: StdRng,
    drift: f64,
    written: u64,
}

impl SensorSimulator {
    pub fn new(historian: Arc<SqliteHistorian>, config: SimulatorConfig) -> Self {
        Self::with_rng(historian, config, StdRng::from_entropy())
    }

    /// Deterministic output for a fixed seed
    pub fn with_seed(historian: Arc<SqliteHistorian>, config: SimulatorConfig, seed: u64) -> Self {
        Self::with_rng(historian, config, StdRng::seed_from_u64(seed))
    }

    fn with_rng(historian: Arc<SqliteHistorian>, config: SimulatorConfig, rng: StdRng) -> Self {
        Self {
            historian,
            channels: Vec::new(),
            config,
            rng,
            drift: 0.0,
            written: 0,
        }
    }

    /// Simulate `attribute` around `base` with Gaussian noise
    pub fn add_channel(&mut self, attribute: AttributeRef, base: f64, std_dev: f64) -> Result<()> {
        if !std_dev.is_finite() || std_dev < 0.0 {
            bail!("noise level for {} must be finite and non-negative, got {}", attribute, std_dev);
        }
        let noise = Normal::new(0.0, std_dev)
            .map_err(|e| anyhow!("invalid noise level {} for {}: {}", std_dev, attribute, e))?;
        self.channels.push(Channel {
            attribute,
            base,
            noise,
            std_dev,
        });
        Ok(())
    }

    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    pub fn written(&self) -> u64 {
        self.written
    }

    fn generate(&mut self, index: usize, timestamp: DateTime<Utc>) -> Sample {
        if self.rng.gen::<f64>() < self.config.bad_probability {
            return Sample::bad(timestamp);
        }

        let channel = &self.channels[index];
        let mut value = channel.base + self.drift * channel.std_dev + self.rng.sample(channel.noise);

        // Spikes land well outside any sensible sigma cutoff.
        if self.rng.gen::<f64>() < self.config.outlier_probability {
            let sign = if self.rng.gen::<bool>() { 1.0 } else { -1.0 };
            value += sign * self.rng.gen_range(8.0..15.0) * channel.std_dev;
        }

        Sample::new(value, timestamp)
    }

    /// Write one sample per channel at `timestamp`
    pub fn step(&mut self, timestamp: DateTime<Utc>) -> Result<usize> {
        self.drift = (self.drift + self.rng.gen_range(-0.05..0.05)).clamp(-1.0, 1.0);

        for index in 0..self.channels.len() {
            let sample = self.generate(index, timestamp);
            let attribute = self.channels[index].attribute;
            self.historian.write_sample(attribute, &sample, UpdateMode::Insert)?;
            self.written += 1;
        }
        Ok(self.channels.len())
    }

    pub async fn run(mut self, mut shutdown: broadcast::Receiver<()>) -> Result<()> {
        let period = Duration::from_millis(self.config.write_interval_ms.max(1));
        info!("Simulating {} channels every {:?}", self.channels.len(), period);

        let mut timer = interval(period);
        loop {
            tokio::select! {
                _ = timer.tick() => {
                    if let Err(e) = self.step(Utc::now()) {
                        warn!("Simulated write failed: {}", e);
                    }
                }
                _ = shutdown.recv() => {
                    info!("Sensor simulator shutting down after {} samples", self.written);
                    break;
                }
            }
        }

        Ok(())
    }
}

/// Register every configured context, set its volume and back-fill one
/// statistical window of temperature and pressure history.
pub fn seed_demo(
    historian: Arc<SqliteHistorian>,
    calc: &CalculationConfig,
    config: SimulatorConfig,
) -> Result<SensorSimulator> {
    let mut simulator = SensorSimulator::new(historian.clone(), config);
    let now = Utc::now();

    for (i, context) in calc.contexts.iter().enumerate() {
        let path = |name: &str| attribute_path(context, name);
        let temperature = historian.register_attribute(&path(&calc.inputs.temperature.attribute), Some("K"))?;
        let pressure = historian.register_attribute(&path(&calc.inputs.pressure.attribute), Some("Torr"))?;
        let volume = historian.register_attribute(&path(&calc.inputs.volume.attribute), Some("L"))?;
        historian.register_attribute(&path(&calc.outputs.moles), Some("mol"))?;
        historian.register_attribute(&path(&calc.outputs.molar_flow_rate), Some("mol/s"))?;

        let offset = i as f64;
        historian.write_sample(volume, &Sample::new(500.0 + 50.0 * offset, now), UpdateMode::Replace)?;
        simulator.add_channel(temperature, 273.0 + 5.0 * offset, 0.5)?;
        simulator.add_channel(pressure, 2280.0 + 20.0 * offset, 4.0)?;
        debug!("Seeded demo context '{}'", context);
    }

    for n in (1..=calc.window_count as i64).rev() {
        simulator.step(now - chrono::Duration::seconds(n))?;
    }

    info!(
        "Demo historian seeded: {} contexts, {} samples",
        calc.contexts.len(),
        simulator.written()
    );
    Ok(simulator)
}
