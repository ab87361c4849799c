// Copyright (c) 2026 bad-antics
// Licensed under the MIT License. See LICENSE file in the project root.
// https://github.com/bad-antics/triggercalc

//! Update poller - pulls snapshot updates into the cache on a fixed timer

use std::sync::Arc;
use std::time::Duration;
use anyhow::Result;
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, mpsc};
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info};

use super::Dispatcher;
use crate::cache::{AttributeCache, SampleAdmitted};
use crate::calc::DataAccess;
use crate::historian::{Historian, UpdateAction, UpdateEvent, UpdateStream};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PollerState {
    Idle,
    Polling,
    Dispatching,
}

/// Counters for one tick
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TickReport {
    pub received: usize,
    pub ingested: usize,
    pub ignored: usize,
    pub invocations: usize,
    pub written: usize,
    pub skipped: usize,
}

pub struct UpdatePoller {
    stream: Box<dyn UpdateStream>,
    cache: Arc<AttributeCache>,
    historian: Arc<dyn Historian>,
    dispatcher: Dispatcher,
    admitted: mpsc::UnboundedReceiver<SampleAdmitted>,
    max_events: usize,
    state: PollerState,
}

impl UpdatePoller {
    pub fn new(
        stream: Box<dyn UpdateStream>,
        cache: Arc<AttributeCache>,
        historian: Arc<dyn Historian>,
        dispatcher: Dispatcher,
        max_events: usize,
    ) -> Self {
        let admitted = cache.subscribe();
        Self {
            stream,
            cache,
            historian,
            dispatcher,
            admitted,
            max_events,
            state: PollerState::Idle,
        }
    }

    pub fn state(&self) -> PollerState {
        self.state
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    /// Poll once and dispatch every admitted trigger before returning.
    pub fn tick(&mut self) -> Result<TickReport> {
        self.state = PollerState::Polling;
        let events = match self.stream.next_batch(self.max_events) {
            Ok(events) => events,
            Err(e) => {
                self.state = PollerState::Idle;
                return Err(e);
            }
        };

        self.state = PollerState::Dispatching;
        let mut report = TickReport {
            received: events.len(),
            ..Default::default()
        };

        let result = self.dispatch_events(events, &mut report);
        self.state = PollerState::Idle;
        result?;

        if report.received > 0 {
            debug!("Tick: {:?}", report);
        }
        Ok(report)
    }

    fn dispatch_events(&mut self, events: Vec<UpdateEvent>, report: &mut TickReport) -> Result<()> {
        for event in events {
            if event.action == UpdateAction::Remove {
                report.ignored += 1;
                continue;
            }

            if let Err(e) = self.cache.ingest(event.attribute, event.sample) {
                debug!("Dropped update: {}", e);
                report.ignored += 1;
                continue;
            }
            report.ingested += 1;

            // Drains the update just admitted plus any outputs the calculation wrote.
            while let Ok(admitted) = self.admitted.try_recv() {
                if !self.dispatcher.is_trigger(&admitted.attribute) {
                    continue;
                }

                let data = DataAccess::new(&self.cache, self.historian.as_ref());
                for outcome in self.dispatcher.dispatch(&admitted, &data)? {
                    report.invocations += 1;
                    if outcome.is_written() {
                        report.written += 1;
                    } else {
                        report.skipped += 1;
                    }
                }
            }
        }
        Ok(())
    }

    /// Tick on `period` until shutdown or a fatal error. A tick that overruns
    /// the period delays the next one; ticks never overlap.
    pub async fn run(mut self, period: Duration, mut shutdown: broadcast::Receiver<()>) -> (Self, Result<()>) {
        let mut timer = interval(period);
        timer.set_missed_tick_behavior(MissedTickBehavior::Skip);
        info!("Checking for updates every {:?}", period);

        let result = loop {
            tokio::select! {
                _ = timer.tick() => {
                    if let Err(e) = self.tick() {
                        break Err(e);
                    }
                }
                _ = shutdown.recv() => {
                    info!("Update poller shutting down...");
                    break Ok(());
                }
            }
        };

        (self, result)
    }

    /// Close the update subscription.
    pub fn close(&mut self) -> Result<()> {
        self.stream.close()
    }
}
