//! Sliding-window counters.
//!
//! A window is a ring of fixed-width buckets. The head bucket covers the
//! current slice of time; advancing the clock zeroes the buckets that fell
//! out of the window. Counts are therefore exact to bucket granularity.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;

#[derive(Debug)]
pub struct SlidingWindow {
    buckets: Vec<u64>,
    bucket_width: Duration,
    head: usize,
    head_start: Instant,
}

impl SlidingWindow {
    pub fn new(span: Duration, bucket_count: usize, now: Instant) -> Self {
        let bucket_count = bucket_count.max(1);
        Self {
            buckets: vec![0; bucket_count],
            bucket_width: span / bucket_count as u32,
            head: 0,
            head_start: now,
        }
    }

    pub fn add(&mut self, n: u64, now: Instant) {
        self.advance(now);
        self.buckets[self.head] += n;
    }

    pub fn sum(&mut self, now: Instant) -> u64 {
        self.advance(now);
        self.buckets.iter().sum()
    }

    fn advance(&mut self, now: Instant) {
        let elapsed = now.saturating_duration_since(self.head_start);
        let steps = (elapsed.as_nanos() / self.bucket_width.as_nanos().max(1)) as u64;
        if steps == 0 {
            return;
        }

        let len = self.buckets.len() as u64;
        if steps >= len {
            self.buckets.iter_mut().for_each(|b| *b = 0);
            self.head = ((self.head as u64 + steps) % len) as usize;
        } else {
            for _ in 0..steps {
                self.head = (self.head + 1) % self.buckets.len();
                self.buckets[self.head] = 0;
            }
        }
        self.head_start += self.bucket_width * steps as u32;
    }
}

/// Monotone total plus trailing minute, hour and day windows.
#[derive(Debug)]
pub struct WindowedCounter {
    total: AtomicU64,
    minute: Mutex<SlidingWindow>,
    hour: Mutex<SlidingWindow>,
    day: Mutex<SlidingWindow>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WindowCounts {
    pub total: u64,
    pub last_minute: u64,
    pub last_hour: u64,
    pub last_day: u64,
}

impl WindowedCounter {
    pub fn new(now: Instant) -> Self {
        Self {
            total: AtomicU64::new(0),
            minute: Mutex::new(SlidingWindow::new(Duration::from_secs(60), 60, now)),
            hour: Mutex::new(SlidingWindow::new(Duration::from_secs(3600), 60, now)),
            day: Mutex::new(SlidingWindow::new(Duration::from_secs(86400), 96, now)),
        }
    }

    pub fn increment(&self, now: Instant) {
        self.total.fetch_add(1, Ordering::Relaxed);
        self.minute.lock().add(1, now);
        self.hour.lock().add(1, now);
        self.day.lock().add(1, now);
    }

    pub fn total(&self) -> u64 {
        self.total.load(Ordering::Relaxed)
    }

    pub fn counts(&self, now: Instant) -> WindowCounts {
        WindowCounts {
            total: self.total(),
            last_minute: self.minute.lock().sum(now),
            last_hour: self.hour.lock().sum(now),
            last_day: self.day.lock().sum(now),
        }
    }
}
