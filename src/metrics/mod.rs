//! Per-database traffic metrics.
//!
//! The registry maps a database name to its counter set. Sets are created
//! lazily on first sight and live as long as the registry. Lookups take the
//! read lock; the write lock is only taken to create a missing set, and all
//! increments happen after the map guard is released.

pub mod window;

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use serde::Serialize;

use window::WindowedCounter;

#[derive(Debug)]
pub struct DatabaseCounters {
    requests: WindowedCounter,
    latency_ms_total: AtomicU64,
    slow_queries: AtomicU64,
}

impl DatabaseCounters {
    fn new(now: Instant) -> Self {
        Self {
            requests: WindowedCounter::new(now),
            latency_ms_total: AtomicU64::new(0),
            slow_queries: AtomicU64::new(0),
        }
    }

    fn record(&self, latency: Duration, slow: bool, now: Instant) {
        self.requests.increment(now);
        self.latency_ms_total
            .fetch_add(latency.as_millis() as u64, Ordering::Relaxed);
        if slow {
            self.slow_queries.fetch_add(1, Ordering::Relaxed);
        }
    }

    fn snapshot(&self, now: Instant) -> DatabaseMetrics {
        let counts = self.requests.counts(now);
        let latency = self.latency_ms_total.load(Ordering::Relaxed);
        DatabaseMetrics {
            total: counts.total,
            last_minute: counts.last_minute,
            last_hour: counts.last_hour,
            last_day: counts.last_day,
            avg_latency_ms: if counts.total == 0 {
                0.0
            } else {
                latency as f64 / counts.total as f64
            },
            slow_queries: self.slow_queries.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct DatabaseMetrics {
    pub total: u64,
    pub last_minute: u64,
    pub last_hour: u64,
    pub last_day: u64,
    pub avg_latency_ms: f64,
    pub slow_queries: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub uptime_secs: u64,
    pub databases: BTreeMap<String, DatabaseMetrics>,
}

pub struct MetricsRegistry {
    databases: RwLock<HashMap<String, Arc<DatabaseCounters>>>,
    slow_query_threshold: Duration,
    started: Instant,
}

impl MetricsRegistry {
    pub fn new() -> Self {
        Self::with_slow_query_threshold(Duration::from_secs(1))
    }

    pub fn with_slow_query_threshold(threshold: Duration) -> Self {
        Self {
            databases: RwLock::new(HashMap::new()),
            slow_query_threshold: threshold,
            started: Instant::now(),
        }
    }

    pub fn slow_query_threshold(&self) -> Duration {
        self.slow_query_threshold
    }

    /// Counter set for `database`, created at most once.
    pub fn counters(&self, database: &str) -> Arc<DatabaseCounters> {
        if let Some(counters) = self.databases.read().get(database) {
            return counters.clone();
        }

        let mut databases = self.databases.write();
        databases
            .entry(database.to_string())
            .or_insert_with(|| Arc::new(DatabaseCounters::new(Instant::now())))
            .clone()
    }

    pub fn record(&self, database: &str, latency: Duration) {
        self.record_at(database, latency, Instant::now());
    }

    pub fn record_at(&self, database: &str, latency: Duration, now: Instant) {
        let slow = latency >= self.slow_query_threshold;
        self.counters(database).record(latency, slow, now);
    }

    /// Metrics for one database; zeros for a database never recorded.
    pub fn database_metrics(&self, database: &str) -> DatabaseMetrics {
        self.database_metrics_at(database, Instant::now())
    }

    pub fn database_metrics_at(&self, database: &str, now: Instant) -> DatabaseMetrics {
        let counters = self.databases.read().get(database).cloned();
        match counters {
            Some(counters) => counters.snapshot(now),
            None => DatabaseMetrics {
                total: 0,
                last_minute: 0,
                last_hour: 0,
                last_day: 0,
                avg_latency_ms: 0.0,
                slow_queries: 0,
            },
        }
    }

    pub fn tracked_databases(&self) -> usize {
        self.databases.read().len()
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let now = Instant::now();
        let counters: Vec<(String, Arc<DatabaseCounters>)> = self
            .databases
            .read()
            .iter()
            .map(|(name, c)| (name.clone(), c.clone()))
            .collect();

        MetricsSnapshot {
            uptime_secs: self.started.elapsed().as_secs(),
            databases: counters
                .into_iter()
                .map(|(name, c)| (name, c.snapshot(now)))
                .collect(),
        }
    }
}

impl Default for MetricsRegistry {
    fn default() -> Self {
        Self::new()
    }
}
