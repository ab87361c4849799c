// Copyright (c) 2026 bad-antics
// Licensed under the MIT License. See LICENSE file in the project root.
// https://github.com/bad-antics/triggercalc

//! Trigger dispatch - maps admitted samples to the calculations they fire

use std::collections::HashMap;
use std::sync::Arc;
use parking_lot::Mutex;
use tracing::{debug, info};

use super::{AttributeRef, Context, TriggerEvent};
use crate::cache::SampleAdmitted;
use crate::calc::{CalcError, CalcOutcome, Calculation, DataAccess};

/// A calculation plus its single-flight guard.
///
/// Invocations for the same context never overlap; a second caller waits
/// until the running one finishes.
pub struct ContextCalculation {
    calc: Box<dyn Calculation>,
    invocations: Mutex<u64>,
}

impl ContextCalculation {
    pub fn new(calc: Box<dyn Calculation>) -> Self {
        Self {
            calc,
            invocations: Mutex::new(0),
        }
    }

    pub fn context(&self) -> &Context {
        self.calc.context()
    }

    pub fn invoke(&self, trigger: &TriggerEvent, data: &DataAccess<'_>) -> Result<CalcOutcome, CalcError> {
        let mut invocations = self.invocations.lock();
        *invocations += 1;
        self.calc.run(trigger, data)
    }

    pub fn invocations(&self) -> u64 {
        *self.invocations.lock()
    }
}

/// Routes trigger updates to every context that lists them
pub struct Dispatcher {
    contexts: Vec<Arc<ContextCalculation>>,
    by_trigger: HashMap<AttributeRef, Vec<usize>>,
}

impl Dispatcher {
    pub fn new(calcs: Vec<Box<dyn Calculation>>) -> Self {
        let contexts: Vec<Arc<ContextCalculation>> = calcs
            .into_iter()
            .map(|c| Arc::new(ContextCalculation::new(c)))
            .collect();

        let mut by_trigger: HashMap<AttributeRef, Vec<usize>> = HashMap::new();
        for (i, ctx) in contexts.iter().enumerate() {
            for trigger in ctx.context().triggers() {
                by_trigger.entry(*trigger).or_default().push(i);
            }
        }

        info!(
            "Dispatcher ready: {} contexts, {} trigger attributes",
            contexts.len(),
            by_trigger.len()
        );

        Self { contexts, by_trigger }
    }

    pub fn contexts(&self) -> &[Arc<ContextCalculation>] {
        &self.contexts
    }

    pub fn is_trigger(&self, attr: &AttributeRef) -> bool {
        self.by_trigger.contains_key(attr)
    }

    /// Run every calculation triggered by `admitted`, in context order.
    pub fn dispatch(
        &self,
        admitted: &SampleAdmitted,
        data: &DataAccess<'_>,
    ) -> Result<Vec<CalcOutcome>, CalcError> {
        let Some(indices) = self.by_trigger.get(&admitted.attribute) else {
            return Ok(Vec::new());
        };

        let trigger = TriggerEvent {
            attribute: admitted.attribute,
            timestamp: admitted.sample.timestamp,
            value: admitted.sample.value,
        };

        let mut outcomes = Vec::with_capacity(indices.len());
        for &i in indices {
            let ctx = &self.contexts[i];
            let outcome = ctx.invoke(&trigger, data)?;
            debug!("{} triggered by {} at {}: {:?}", ctx.context().name, trigger.attribute, trigger.timestamp, outcome);
            outcomes.push(outcome);
        }
        Ok(outcomes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::AttributeCache;
    use crate::calc::SkipReason;
    use crate::core::Sample;
    use crate::historian::SqliteHistorian;
    use chrono::{DateTime, Duration, Utc};
    use std::time::Duration as StdDuration;

    /// Records start/end of each run and sleeps in between
    struct Probe {
        context: Context,
        log: Arc<Mutex<Vec<(&'static str, i64)>>>,
        delay: StdDuration,
    }

    impl Calculation for Probe {
        fn context(&self) -> &Context {
            &self.context
        }

        fn run(&self, trigger: &TriggerEvent, _data: &DataAccess<'_>) -> Result<CalcOutcome, CalcError> {
            let id = trigger.timestamp.timestamp();
            self.log.lock().push(("start", id));
            std::thread::sleep(self.delay);
            self.log.lock().push(("end", id));
            Ok(CalcOutcome::Skipped(SkipReason::NonFiniteResult))
        }
    }

    fn at(secs: i64) -> DateTime<Utc> {
        DateTime::<Utc>::from_timestamp(1_700_000_000 + secs, 0).unwrap()
    }

    fn probe(name: &str, trigger: AttributeRef, other: AttributeRef, log: Arc<Mutex<Vec<(&'static str, i64)>>>) -> Box<dyn Calculation> {
        Box::new(Probe {
            context: Context::new(name, vec![trigger, other], vec![trigger], vec![]),
            log,
            delay: StdDuration::from_millis(20),
        })
    }

    #[test]
    fn test_trigger_isolation() {
        let trigger = AttributeRef::new(1);
        let other = AttributeRef::new(2);
        let log = Arc::new(Mutex::new(Vec::new()));
        let dispatcher = Dispatcher::new(vec![probe("A", trigger, other, log.clone())]);

        let historian = SqliteHistorian::open_in_memory().unwrap();
        let cache = AttributeCache::new(Duration::seconds(60));
        let data = DataAccess::new(&cache, &historian);

        let non_trigger = SampleAdmitted { attribute: other, sample: Sample::new(1.0, at(0)) };
        assert!(dispatcher.dispatch(&non_trigger, &data).unwrap().is_empty());
        assert_eq!(dispatcher.contexts()[0].invocations(), 0);

        for s in 1..=3 {
            let update = SampleAdmitted { attribute: trigger, sample: Sample::new(1.0, at(s)) };
            assert_eq!(dispatcher.dispatch(&update, &data).unwrap().len(), 1);
        }
        assert_eq!(dispatcher.contexts()[0].invocations(), 3);
        assert_eq!(log.lock().len(), 6);
    }

    #[test]
    fn test_shared_trigger_fires_each_context_once() {
        let shared = AttributeRef::new(1);
        let log = Arc::new(Mutex::new(Vec::new()));
        let dispatcher = Dispatcher::new(vec![
            probe("A", shared, AttributeRef::new(2), log.clone()),
            probe("B", shared, AttributeRef::new(3), log.clone()),
        ]);

        let historian = SqliteHistorian::open_in_memory().unwrap();
        let cache = AttributeCache::new(Duration::seconds(60));
        let data = DataAccess::new(&cache, &historian);

        let update = SampleAdmitted { attribute: shared, sample: Sample::bad(at(0)) };
        assert_eq!(dispatcher.dispatch(&update, &data).unwrap().len(), 2);
        assert!(dispatcher.contexts().iter().all(|c| c.invocations() == 1));
    }

    #[test]
    fn test_single_flight_per_context() {
        let trigger = AttributeRef::new(1);
        let log = Arc::new(Mutex::new(Vec::new()));
        let ctx = Arc::new(ContextCalculation::new(probe("A", trigger, AttributeRef::new(2), log.clone())));

        let historian = Arc::new(SqliteHistorian::open_in_memory().unwrap());
        let cache = Arc::new(AttributeCache::new(Duration::seconds(60)));

        let handles: Vec<_> = (0..4)
            .map(|i| {
                let ctx = ctx.clone();
                let historian = historian.clone();
                let cache = cache.clone();
                std::thread::spawn(move || {
                    let data = DataAccess::new(&cache, historian.as_ref());
                    let event = TriggerEvent { attribute: trigger, timestamp: at(i), value: 0.0 };
                    ctx.invoke(&event, &data).unwrap()
                })
            })
            .collect();

        for h in handles {
            assert!(!h.join().unwrap().is_written());
        }

        let log = log.lock();
        assert_eq!(log.len(), 8);
        for pair in log.chunks(2) {
            assert_eq!(pair[0].0, "start");
            assert_eq!(pair[1].0, "end");
            assert_eq!(pair[0].1, pair[1].1);
        }
        assert_eq!(ctx.invocations(), 4);
    }
}
