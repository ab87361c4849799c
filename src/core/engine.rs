// Copyright (c) 2026 bad-antics
// Licensed under the MIT License. See LICENSE file in the project root.
// https://github.com/bad-antics/triggercalc

//! Lifecycle controller - builds the cache and poller, runs until cancelled

use std::sync::Arc;
use std::time::Instant;
use anyhow::{anyhow, bail, Result};
use chrono::Utc;
use tokio::sync::{broadcast, RwLock};
use tracing::{error, info, warn};

use super::{Dispatcher, EngineState, UpdatePoller};
use crate::cache::AttributeCache;
use crate::calc::{Calculation, GasBindings, GasCalculation};
use crate::config::Config;
use crate::historian::{AttributeResolver, BoundaryPolicy, Historian};

/// Owns the cache, the update subscription and the poll timer of one run
pub struct Engine {
    pub config: Arc<Config>,
    historian: Arc<dyn Historian>,
    cache: Arc<AttributeCache>,
    poller: Option<UpdatePoller>,
    contexts: Vec<String>,
    state: Arc<RwLock<EngineState>>,
    start_time: Option<Instant>,
}

impl Engine {
    /// Resolve contexts, build and prime the cache, subscribe to updates.
    ///
    /// A context whose attributes fail to resolve is skipped; startup fails
    /// only when no context is left.
    pub async fn start(
        config: Config,
        historian: Arc<dyn Historian>,
        resolver: &dyn AttributeResolver,
    ) -> Result<Self> {
        info!("Starting calculation engine...");
        config.validate()?;
        let config = Arc::new(config);
        let calc_config = &config.calculation;

        let mut calcs: Vec<Box<dyn Calculation>> = Vec::new();
        let mut contexts = Vec::new();
        for name in &calc_config.contexts {
            match GasBindings::resolve(resolver, name, calc_config) {
                Ok(bindings) => {
                    calcs.push(Box::new(GasCalculation::new(name, bindings, calc_config)));
                    contexts.push(name.clone());
                }
                Err(e) => warn!("Skipping context '{}': {:#}", name, e),
            }
        }

        if calcs.is_empty() {
            bail!("none of the {} configured contexts could be resolved", calc_config.contexts.len());
        }

        let cache = Arc::new(AttributeCache::new(config.cache.window()));
        for calc in &calcs {
            cache.track(calc.context().attributes());
        }
        let tracked = cache.tracked();

        let stream = historian.subscribe(&tracked)?;

        let now = Utc::now();
        for attr in &tracked {
            let samples = historian.read_recent_by_count(
                *attr,
                now,
                calc_config.window_count,
                BoundaryPolicy::Inclusive,
            )?;
            for sample in samples {
                cache.ingest(*attr, sample)?;
            }
        }

        let poller = UpdatePoller::new(
            stream,
            cache.clone(),
            historian.clone(),
            Dispatcher::new(calcs),
            config.poller.max_events_per_period,
        );

        info!(
            "Engine started: {} contexts, {} cached attributes",
            contexts.len(),
            tracked.len()
        );

        Ok(Self {
            config,
            historian,
            cache,
            poller: Some(poller),
            contexts,
            state: Arc::new(RwLock::new(EngineState::Starting)),
            start_time: None,
        })
    }

    /// Run until `shutdown` fires or the poll loop fails.
    ///
    /// Cancellation yields `Ok(())`; any other failure is returned after
    /// teardown. An in-flight tick always completes first.
    pub async fn run(&mut self, mut shutdown: broadcast::Receiver<()>) -> Result<()> {
        let poller = self
            .poller
            .take()
            .ok_or_else(|| anyhow!("engine has already run"))?;

        *self.state.write().await = EngineState::Running;
        self.start_time = Some(Instant::now());

        let (stop_tx, stop_rx) = broadcast::channel(1);
        let mut timer = tokio::spawn(poller.run(self.config.poller.interval(), stop_rx));

        let finished = tokio::select! {
            _ = shutdown.recv() => {
                info!("Cancellation requested, stopping...");
                None
            }
            joined = &mut timer => Some(joined),
        };

        *self.state.write().await = EngineState::Stopping;

        // The timer goes first so no tick starts during teardown.
        let joined = match finished {
            Some(joined) => joined,
            None => {
                let _ = stop_tx.send(());
                timer.await
            }
        };

        let (poller, result) = match joined {
            Ok((poller, result)) => (Some(poller), result),
            Err(e) => (None, Err(anyhow!("update poller task failed: {}", e))),
        };
        info!("Timer disposed");

        if let Err(e) = &result {
            error!("Calculation loop failed: {:#}", e);
        }

        self.teardown(poller);
        *self.state.write().await = EngineState::Stopped;
        info!("Engine stopped after {}s", self.uptime());

        result
    }

    /// Release the subscription and cache. Failures are logged only.
    fn teardown(&self, poller: Option<UpdatePoller>) {
        if let Some(mut poller) = poller {
            match poller.close() {
                Ok(()) => info!("Update subscription disposed"),
                Err(e) => warn!("Error disposing update subscription: {:#}", e),
            }
        }

        self.cache.dispose();
        info!("Cache disposed");
    }

    pub async fn state(&self) -> EngineState {
        *self.state.read().await
    }

    pub fn contexts(&self) -> &[String] {
        &self.contexts
    }

    pub fn cache(&self) -> &Arc<AttributeCache> {
        &self.cache
    }

    pub fn historian(&self) -> &Arc<dyn Historian> {
        &self.historian
    }

    pub fn uptime(&self) -> u64 {
        self.start_time.map(|t| t.elapsed().as_secs()).unwrap_or(0)
    }
}
