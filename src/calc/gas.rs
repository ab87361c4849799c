// Copyright (c) 2026 bad-antics
// Licensed under the MIT License. See LICENSE file in the project root.
// https://github.com/bad-antics/triggercalc

//! Ideal-gas moles and molar flow rate
//!
//! `n = P·V / (R·T)` from trimmed means of temperature and pressure and the
//! instantaneous volume, followed by `dn/dt` against the previous result.

use anyhow::Result;
use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use super::{elapsed_seconds, CalcError, CalcOutcome, Calculation, DataAccess, RateOutcome, RateSkip, SkipReason};
use crate::analysis::TrimmedMeanEstimator;
use crate::config::CalculationConfig;
use crate::core::{AttributeRef, Context, TriggerEvent};
use crate::historian::{attribute_path, AttributeResolver};

/// Attribute handles of one gas context, resolved once at startup
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GasBindings {
    pub temperature: AttributeRef,
    pub pressure: AttributeRef,
    pub volume: AttributeRef,
    pub moles: AttributeRef,
    pub molar_flow_rate: AttributeRef,
}

impl GasBindings {
    pub fn resolve(resolver: &dyn AttributeResolver, context: &str, config: &CalculationConfig) -> Result<Self> {
        let path = |name: &str| attribute_path(context, name);

        Ok(Self {
            temperature: resolver.resolve(&path(&config.inputs.temperature.attribute))?,
            pressure: resolver.resolve(&path(&config.inputs.pressure.attribute))?,
            volume: resolver.resolve(&path(&config.inputs.volume.attribute))?,
            moles: resolver.resolve(&path(&config.outputs.moles))?,
            molar_flow_rate: resolver.resolve(&path(&config.outputs.molar_flow_rate))?,
        })
    }
}

pub struct GasCalculation {
    context: Context,
    bindings: GasBindings,
    estimator: TrimmedMeanEstimator,
    window_count: usize,
    gas_constant: f64,
}

impl GasCalculation {
    pub fn new(name: &str, bindings: GasBindings, config: &CalculationConfig) -> Self {
        let inputs = &config.inputs;
        let triggers = [
            (bindings.temperature, inputs.temperature.trigger),
            (bindings.pressure, inputs.pressure.trigger),
            (bindings.volume, inputs.volume.trigger),
        ]
        .into_iter()
        .filter(|(_, trigger)| *trigger)
        .map(|(attr, _)| attr);

        let context = Context::new(
            name,
            vec![bindings.temperature, bindings.pressure, bindings.volume],
            triggers,
            vec![bindings.moles, bindings.molar_flow_rate],
        );

        Self {
            context,
            bindings,
            estimator: TrimmedMeanEstimator::new(config.k_sigma),
            window_count: config.window_count,
            gas_constant: config.gas_constant,
        }
    }

    pub fn bindings(&self) -> &GasBindings {
        &self.bindings
    }

    fn windowed_mean(&self, data: &DataAccess<'_>, attr: AttributeRef, t: DateTime<Utc>) -> Result<Option<f64>, CalcError> {
        let samples = data.recent(attr, t, self.window_count)?;
        match self.estimator.estimate(&samples) {
            Ok(est) => {
                debug!(
                    "{}: {} trimmed mean {:.6} ({} of {} kept, {} passes)",
                    self.context.name, attr, est.mean, est.retained, samples.len(), est.passes
                );
                Ok(Some(est.mean))
            }
            Err(_) => Ok(None),
        }
    }

    fn rate_of_change(&self, data: &DataAccess<'_>, current: f64, t: DateTime<Utc>) -> Result<RateOutcome, CalcError> {
        let previous = match data.previous(self.bindings.moles, t)? {
            None => return Ok(RateOutcome::Skipped(RateSkip::NoPrevious)),
            Some(p) if !p.is_good() => return Ok(RateOutcome::Skipped(RateSkip::BadPrevious)),
            Some(p) => p,
        };

        let elapsed = elapsed_seconds(t, previous.timestamp);
        if elapsed <= 0.0 {
            return Ok(RateOutcome::Skipped(RateSkip::ZeroElapsed));
        }

        let rate = (current - previous.value) / elapsed;
        data.write(self.bindings.molar_flow_rate, rate, t)?;
        Ok(RateOutcome::Written(rate))
    }
}

impl Calculation for GasCalculation {
    fn context(&self) -> &Context {
        &self.context
    }

    fn run(&self, trigger: &TriggerEvent, data: &DataAccess<'_>) -> Result<CalcOutcome, CalcError> {
        let t = trigger.timestamp;
        let b = &self.bindings;

        let Some(temperature) = self.windowed_mean(data, b.temperature, t)? else {
            warn!("{}: insufficient temperature data at {}", self.context.name, t);
            return Ok(CalcOutcome::Skipped(SkipReason::InsufficientData(b.temperature)));
        };
        let Some(pressure) = self.windowed_mean(data, b.pressure, t)? else {
            warn!("{}: insufficient pressure data at {}", self.context.name, t);
            return Ok(CalcOutcome::Skipped(SkipReason::InsufficientData(b.pressure)));
        };

        let volume = match data.value_at(b.volume, t)? {
            Some(v) if v.is_good() => v.value,
            _ => {
                warn!("{}: no good volume value at {}", self.context.name, t);
                return Ok(CalcOutcome::Skipped(SkipReason::MissingInstantaneous(b.volume)));
            }
        };

        let moles = pressure * volume / (self.gas_constant * temperature);
        if !moles.is_finite() {
            warn!("{}: non-finite moles (T={}, P={}, V={})", self.context.name, temperature, pressure, volume);
            return Ok(CalcOutcome::Skipped(SkipReason::NonFiniteResult));
        }

        // A second trigger at the same instant has no interval to rate over.
        let repeated = matches!(data.value_at(b.moles, t)?, Some(p) if p.timestamp == t);

        data.write_through(b.moles, moles, t)?;

        let rate = if repeated {
            RateOutcome::Skipped(RateSkip::ZeroElapsed)
        } else {
            self.rate_of_change(data, moles, t)?
        };
        if let RateOutcome::Skipped(reason) = rate {
            debug!("{}: molar flow rate skipped at {}: {:?}", self.context.name, t, reason);
        }

        Ok(CalcOutcome::Written { primary: moles, rate })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::AttributeCache;
    use crate::core::Sample;
    use crate::historian::{Historian, SqliteHistorian, UpdateMode};
    use chrono::Duration;

    const R: f64 = 62.363598221529;

    fn at(secs: i64) -> DateTime<Utc> {
        DateTime::<Utc>::from_timestamp(1_700_000_000 + secs, 0).unwrap()
    }

    fn setup() -> (SqliteHistorian, GasCalculation) {
        let historian = SqliteHistorian::open_in_memory().unwrap();
        for name in ["Temperature", "Pressure", "Volume", "Moles", "MolarFlowRate"] {
            historian.register_attribute(&attribute_path("E1", name), None).unwrap();
        }
        let config = CalculationConfig::default();
        let bindings = GasBindings::resolve(&historian, "E1", &config).unwrap();
        (historian, GasCalculation::new("E1", bindings, &config))
    }

    fn trigger(calc: &GasCalculation, t: DateTime<Utc>) -> TriggerEvent {
        TriggerEvent {
            attribute: calc.bindings().temperature,
            timestamp: t,
            value: 273.0,
        }
    }

    #[test]
    fn test_triggers_follow_config() {
        let (_h, calc) = setup();
        let b = *calc.bindings();
        assert!(calc.context().is_trigger(&b.temperature));
        assert!(calc.context().is_trigger(&b.pressure));
        assert!(!calc.context().is_trigger(&b.volume));
        assert_eq!(calc.context().outputs(), &[b.moles, b.molar_flow_rate]);
    }

    #[test]
    fn test_moles_then_rate() {
        let (historian, calc) = setup();
        let b = *calc.bindings();
        historian.write_value(b.volume, 500.0, at(0), UpdateMode::Insert).unwrap();
        for s in 0..5 {
            historian.write_value(b.temperature, 273.0, at(s), UpdateMode::Insert).unwrap();
            historian.write_value(b.pressure, 2280.0, at(s), UpdateMode::Insert).unwrap();
        }

        let cache = AttributeCache::new(Duration::seconds(3600));
        cache.track(calc.context().attributes());
        let data = DataAccess::new(&cache, &historian);
        let expected = 2280.0 * 500.0 / (R * 273.0);

        let first = calc.run(&trigger(&calc, at(3)), &data).unwrap();
        match first {
            CalcOutcome::Written { primary, rate } => {
                assert!((primary - expected).abs() < 1e-9);
                assert!((primary - 66.96).abs() < 0.01);
                assert_eq!(rate, RateOutcome::Skipped(RateSkip::NoPrevious));
            }
            other => panic!("unexpected outcome {:?}", other),
        }

        let second = calc.run(&trigger(&calc, at(4)), &data).unwrap();
        assert_eq!(
            second,
            CalcOutcome::Written { primary: expected, rate: RateOutcome::Written(0.0) }
        );

        let rates = historian.query_samples(b.molar_flow_rate, at(0), at(10)).unwrap();
        assert_eq!(rates.len(), 1);
        assert_eq!(rates[0].timestamp, at(4));
        assert_eq!(historian.query_samples(b.moles, at(0), at(10)).unwrap().len(), 2);
    }

    #[test]
    fn test_same_timestamp_trigger_skips_rate() {
        let (historian, calc) = setup();
        let b = *calc.bindings();
        historian.write_value(b.volume, 500.0, at(0), UpdateMode::Insert).unwrap();
        for s in 0..3 {
            historian.write_value(b.temperature, 273.0, at(s), UpdateMode::Insert).unwrap();
            historian.write_value(b.pressure, 2280.0, at(s), UpdateMode::Insert).unwrap();
        }

        let cache = AttributeCache::new(Duration::seconds(3600));
        cache.track(calc.context().attributes());
        let data = DataAccess::new(&cache, &historian);

        calc.run(&trigger(&calc, at(1)), &data).unwrap();
        let first = calc.run(&trigger(&calc, at(2)), &data).unwrap();
        let repeat = calc.run(&trigger(&calc, at(2)), &data).unwrap();

        match (first, repeat) {
            (CalcOutcome::Written { rate: r1, .. }, CalcOutcome::Written { rate: r2, .. }) => {
                assert_eq!(r1, RateOutcome::Written(0.0));
                assert_eq!(r2, RateOutcome::Skipped(RateSkip::ZeroElapsed));
            }
            other => panic!("unexpected outcomes {:?}", other),
        }

        let rates = historian.query_samples(b.molar_flow_rate, at(0), at(10)).unwrap();
        assert_eq!(rates.len(), 1);
        assert_eq!(rates[0].timestamp, at(2));
    }

    #[test]
    fn test_no_data_skips_write() {
        let (historian, calc) = setup();
        let b = *calc.bindings();
        historian.write_value(b.volume, 500.0, at(0), UpdateMode::Insert).unwrap();
        historian.write_sample(b.temperature, &Sample::bad(at(1)), UpdateMode::Insert).unwrap();
        historian.write_value(b.pressure, 2280.0, at(1), UpdateMode::Insert).unwrap();

        let cache = AttributeCache::new(Duration::seconds(3600));
        let data = DataAccess::new(&cache, &historian);

        let outcome = calc.run(&trigger(&calc, at(1)), &data).unwrap();
        assert_eq!(outcome, CalcOutcome::Skipped(SkipReason::InsufficientData(b.temperature)));
        assert!(historian.read_latest(b.moles).unwrap().is_none());
    }

    #[test]
    fn test_bad_previous_suppresses_rate() {
        let (historian, calc) = setup();
        let b = *calc.bindings();
        historian.write_value(b.volume, 500.0, at(0), UpdateMode::Insert).unwrap();
        historian.write_value(b.temperature, 273.0, at(0), UpdateMode::Insert).unwrap();
        historian.write_value(b.pressure, 2280.0, at(0), UpdateMode::Insert).unwrap();
        historian.write_sample(b.moles, &Sample::bad(at(0)), UpdateMode::Insert).unwrap();

        let cache = AttributeCache::new(Duration::seconds(3600));
        let data = DataAccess::new(&cache, &historian);

        match calc.run(&trigger(&calc, at(1)), &data).unwrap() {
            CalcOutcome::Written { rate, .. } => {
                assert_eq!(rate, RateOutcome::Skipped(RateSkip::BadPrevious))
            }
            other => panic!("unexpected outcome {:?}", other),
        }
        assert!(historian.read_latest(b.molar_flow_rate).unwrap().is_none());
    }

    #[test]
    fn test_missing_volume_skips() {
        let (historian, calc) = setup();
        let b = *calc.bindings();
        historian.write_value(b.temperature, 273.0, at(0), UpdateMode::Insert).unwrap();
        historian.write_value(b.pressure, 2280.0, at(0), UpdateMode::Insert).unwrap();

        let cache = AttributeCache::new(Duration::seconds(3600));
        let data = DataAccess::new(&cache, &historian);

        assert_eq!(
            calc.run(&trigger(&calc, at(0)), &data).unwrap(),
            CalcOutcome::Skipped(SkipReason::MissingInstantaneous(b.volume))
        );
    }

    #[test]
    fn test_resolution_failure() {
        let historian = SqliteHistorian::open_in_memory().unwrap();
        historian.register_attribute("E2|Temperature", None).unwrap();
        assert!(GasBindings::resolve(&historian, "E2", &CalculationConfig::default()).is_err());
    }
}
