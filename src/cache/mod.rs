// Copyright (c) 2026 bad-antics
// Licensed under the MIT License. See LICENSE file in the project root.
// https://github.com/bad-antics/triggercalc

//! Windowed attribute cache
//!
//! Keeps a bounded time span of recent samples per tracked attribute so that
//! calculations read from memory instead of round-tripping to the historian.
//! Each buffer sits behind its own lock; a write to one attribute never blocks
//! readers of another.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use chrono::{DateTime, Duration, Utc};
use parking_lot::{Mutex, RwLock};
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, trace};

use crate::core::{AttributeRef, Sample};

/// Cache lookup failures
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CacheError {
    /// The attribute is not tracked; read from the historian instead.
    #[error("attribute {0} is not cached")]
    NotCached(AttributeRef),
    #[error("no cached samples for attribute {0}")]
    NotFound(AttributeRef),
}

/// Notification sent for every sample the cache admits
#[derive(Debug, Clone, PartialEq)]
pub struct SampleAdmitted {
    pub attribute: AttributeRef,
    pub sample: Sample,
}

/// Time-bounded, timestamp-ordered samples for one attribute
#[derive(Debug, Clone)]
pub struct RetentionBuffer {
    samples: VecDeque<Sample>,
    window: Duration,
}

impl RetentionBuffer {
    pub fn new(window: Duration) -> Self {
        Self {
            samples: VecDeque::new(),
            window,
        }
    }

    /// Insert in timestamp order, then evict everything older than
    /// `newest - window`. A sample at an existing timestamp replaces it.
    ///
    /// Returns false when the sample itself fell outside the window.
    pub fn insert(&mut self, sample: Sample) -> bool {
        let timestamp = sample.timestamp;
        let pos = self
            .samples
            .iter()
            .rposition(|s| s.timestamp <= timestamp);

        match pos {
            Some(i) if self.samples[i].timestamp == timestamp => {
                self.samples[i] = sample;
            }
            Some(i) => self.samples.insert(i + 1, sample),
            None => self.samples.push_front(sample),
        }

        self.evict();
        self.samples.front().is_some_and(|s| s.timestamp <= timestamp)
    }

    fn evict(&mut self) {
        let Some(newest) = self.samples.back().map(|s| s.timestamp) else {
            return;
        };
        let cutoff = newest - self.window;

        while let Some(oldest) = self.samples.front() {
            if oldest.timestamp < cutoff {
                self.samples.pop_front();
            } else {
                break;
            }
        }
    }

    pub fn latest(&self) -> Option<&Sample> {
        self.samples.back()
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn to_vec(&self) -> Vec<Sample> {
        self.samples.iter().cloned().collect()
    }

    /// Up to `count` samples at or before `before` (strictly before when
    /// `inclusive` is false), oldest first.
    pub fn recent(&self, before: DateTime<Utc>, count: usize, inclusive: bool) -> Vec<Sample> {
        let mut out: Vec<Sample> = self
            .samples
            .iter()
            .rev()
            .filter(|s| {
                if inclusive {
                    s.timestamp <= before
                } else {
                    s.timestamp < before
                }
            })
            .take(count)
            .cloned()
            .collect();
        out.reverse();
        out
    }
}

/// Shared cache of retention buffers keyed by attribute
pub struct AttributeCache {
    window: Duration,
    buffers: RwLock<HashMap<AttributeRef, Arc<RwLock<RetentionBuffer>>>>,
    notify: Mutex<Option<mpsc::UnboundedSender<SampleAdmitted>>>,
}

impl AttributeCache {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            buffers: RwLock::new(HashMap::new()),
            notify: Mutex::new(None),
        }
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// Register attributes for caching. Already tracked attributes keep
    /// their buffers.
    pub fn track<'a>(&self, attrs: impl IntoIterator<Item = &'a AttributeRef>) {
        let mut buffers = self.buffers.write();
        for attr in attrs {
            buffers
                .entry(*attr)
                .or_insert_with(|| Arc::new(RwLock::new(RetentionBuffer::new(self.window))));
        }
        debug!("Cache tracking {} attributes", buffers.len());
    }

    pub fn is_tracked(&self, attr: &AttributeRef) -> bool {
        self.buffers.read().contains_key(attr)
    }

    pub fn tracked(&self) -> Vec<AttributeRef> {
        let mut attrs: Vec<AttributeRef> = self.buffers.read().keys().copied().collect();
        attrs.sort();
        attrs
    }

    /// Register the receiver of admission notifications. A later call
    /// replaces the previous subscriber.
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<SampleAdmitted> {
        let (tx, rx) = mpsc::unbounded_channel();
        *self.notify.lock() = Some(tx);
        rx
    }

    /// Admit a sample into its attribute's buffer. Subscribers are only
    /// told about samples that survive eviction.
    pub fn ingest(&self, attr: AttributeRef, sample: Sample) -> Result<(), CacheError> {
        let buffer = self.buffer(&attr)?;
        if !buffer.write().insert(sample.clone()) {
            trace!("Sample @ {} for {} is older than the window", sample.timestamp, attr);
            return Ok(());
        }
        trace!("Admitted {} @ {} for {}", sample.value, sample.timestamp, attr);

        if let Some(tx) = self.notify.lock().as_ref() {
            let _ = tx.send(SampleAdmitted {
                attribute: attr,
                sample,
            });
        }
        Ok(())
    }

    /// Snapshot of the current buffer, oldest first
    pub fn read(&self, attr: &AttributeRef) -> Result<Vec<Sample>, CacheError> {
        Ok(self.buffer(attr)?.read().to_vec())
    }

    pub fn latest(&self, attr: &AttributeRef) -> Result<Sample, CacheError> {
        self.buffer(attr)?
            .read()
            .latest()
            .cloned()
            .ok_or(CacheError::NotFound(*attr))
    }

    pub fn recent(
        &self,
        attr: &AttributeRef,
        before: DateTime<Utc>,
        count: usize,
        inclusive: bool,
    ) -> Result<Vec<Sample>, CacheError> {
        Ok(self.buffer(attr)?.read().recent(before, count, inclusive))
    }

    /// Drop every buffer and the notification channel.
    pub fn dispose(&self) {
        self.notify.lock().take();
        self.buffers.write().clear();
        debug!("Cache disposed");
    }

    fn buffer(&self, attr: &AttributeRef) -> Result<Arc<RwLock<RetentionBuffer>>, CacheError> {
        self.buffers
            .read()
            .get(attr)
            .cloned()
            .ok_or(CacheError::NotCached(*attr))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(secs: i64) -> DateTime<Utc> {
        DateTime::<Utc>::from_timestamp(1_700_000_000 + secs, 0).unwrap()
    }

    #[test]
    fn test_retention_window_enforced() {
        let mut buf = RetentionBuffer::new(Duration::seconds(10));
        for s in 0..50 {
            buf.insert(Sample::new(s as f64, at(s)));
        }

        let samples = buf.to_vec();
        let newest = samples.last().unwrap().timestamp;
        assert!(samples.iter().all(|s| s.timestamp >= newest - Duration::seconds(10)));
        assert_eq!(samples.len(), 11);
        assert_eq!(samples[0].value, 39.0);
    }

    #[test]
    fn test_same_timestamp_replaces() {
        let mut buf = RetentionBuffer::new(Duration::seconds(60));
        buf.insert(Sample::new(1.0, at(0)));
        buf.insert(Sample::new(2.0, at(1)));
        buf.insert(Sample::new(3.0, at(1)));

        assert_eq!(buf.len(), 2);
        assert_eq!(buf.latest().unwrap().value, 3.0);
    }

    #[test]
    fn test_late_sample_ordered() {
        let mut buf = RetentionBuffer::new(Duration::seconds(60));
        buf.insert(Sample::new(1.0, at(0)));
        buf.insert(Sample::new(3.0, at(2)));
        buf.insert(Sample::new(2.0, at(1)));

        let values: Vec<f64> = buf.to_vec().iter().map(|s| s.value).collect();
        assert_eq!(values, vec![1.0, 2.0, 3.0]);
    }

    #[test]
    fn test_recent_bounds() {
        let mut buf = RetentionBuffer::new(Duration::seconds(600));
        for s in 0..10 {
            buf.insert(Sample::new(s as f64, at(s)));
        }

        let inclusive = buf.recent(at(5), 3, true);
        assert_eq!(inclusive.iter().map(|s| s.value).collect::<Vec<_>>(), vec![3.0, 4.0, 5.0]);

        let exclusive = buf.recent(at(5), 1, false);
        assert_eq!(exclusive[0].value, 4.0);

        assert!(buf.recent(at(0), 5, false).is_empty());
    }

    #[test]
    fn test_untracked_not_cached() {
        let cache = AttributeCache::new(Duration::seconds(60));
        let attr = AttributeRef::new(7);

        assert_eq!(cache.read(&attr), Err(CacheError::NotCached(attr)));
        assert_eq!(
            cache.ingest(attr, Sample::new(1.0, at(0))),
            Err(CacheError::NotCached(attr))
        );

        cache.track(&[attr]);
        assert_eq!(cache.latest(&attr), Err(CacheError::NotFound(attr)));
        cache.ingest(attr, Sample::new(1.0, at(0))).unwrap();
        assert_eq!(cache.latest(&attr).unwrap().value, 1.0);
    }

    #[test]
    fn test_track_twice_keeps_buffer() {
        let cache = AttributeCache::new(Duration::seconds(60));
        let attr = AttributeRef::new(1);
        cache.track(&[attr]);
        cache.ingest(attr, Sample::new(5.0, at(0))).unwrap();
        cache.track(&[attr, attr]);

        assert_eq!(cache.read(&attr).unwrap().len(), 1);
        assert_eq!(cache.tracked(), vec![attr]);
    }

    #[test]
    fn test_admission_notifications() {
        let cache = AttributeCache::new(Duration::seconds(60));
        let attr = AttributeRef::new(1);
        cache.track(&[attr]);
        let mut rx = cache.subscribe();

        cache.ingest(attr, Sample::new(5.0, at(0))).unwrap();
        cache.ingest(attr, Sample::new(6.0, at(1))).unwrap();

        assert_eq!(rx.try_recv().unwrap().sample.value, 5.0);
        assert_eq!(rx.try_recv().unwrap().sample.value, 6.0);
        assert!(rx.try_recv().is_err());

        cache.dispose();
        assert!(!cache.is_tracked(&attr));
    }

    #[test]
    fn test_expired_sample_not_announced() {
        let cache = AttributeCache::new(Duration::seconds(10));
        let attr = AttributeRef::new(1);
        cache.track(&[attr]);
        let mut rx = cache.subscribe();

        cache.ingest(attr, Sample::new(1.0, at(100))).unwrap();
        cache.ingest(attr, Sample::new(2.0, at(50))).unwrap();
        cache.ingest(attr, Sample::new(3.0, at(95))).unwrap();

        assert_eq!(rx.try_recv().unwrap().sample.value, 1.0);
        assert_eq!(rx.try_recv().unwrap().sample.value, 3.0);
        assert!(rx.try_recv().is_err());
        assert_eq!(cache.read(&attr).unwrap().len(), 2);

        let mut buf = RetentionBuffer::new(Duration::seconds(10));
        assert!(buf.insert(Sample::new(1.0, at(100))));
        assert!(buf.insert(Sample::new(1.0, at(90))));
        assert!(!buf.insert(Sample::new(1.0, at(89))));
    }

    #[test]
    fn test_concurrent_ingest_and_read() {
        let cache = Arc::new(AttributeCache::new(Duration::seconds(30)));
        let a = AttributeRef::new(1);
        let b = AttributeRef::new(2);
        cache.track(&[a, b]);

        let writer = {
            let cache = cache.clone();
            std::thread::spawn(move || {
                for s in 0..2000 {
                    cache.ingest(a, Sample::new(s as f64, at(s))).unwrap();
                }
            })
        };

        for s in 0..2000 {
            cache.ingest(b, Sample::new(s as f64, at(s))).unwrap();
            let snapshot = cache.read(&a).unwrap();
            if let (Some(first), Some(last)) = (snapshot.first(), snapshot.last()) {
                assert!(first.timestamp >= last.timestamp - Duration::seconds(30));
                assert!(snapshot.windows(2).all(|w| w[0].timestamp < w[1].timestamp));
            }
        }

        writer.join().unwrap();
        assert_eq!(cache.read(&a).unwrap().len(), 31);
    }
}
