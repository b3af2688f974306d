//! Named progress counters
//!
//! The names are part of the operational interface; the exposition
//! transport is left to whoever embeds the worker.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Default)]
pub struct Counter(AtomicU64);

impl Counter {
    pub fn add(&self, n: u64) {
        self.0.fetch_add(n, Ordering::Relaxed);
    }

    pub fn inc(&self) {
        self.add(1);
    }

    pub fn get(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}

#[derive(Debug, Default)]
pub struct Metrics {
    /// Work units started
    pub fetches: Counter,
    /// Fetches with no prior record (clones)
    pub new: Counter,
    /// Fetches of forks
    pub forks: Counter,
    /// Quiet-period sleeps taken
    pub sleep: Counter,
    /// Pops that found the queue empty
    pub emptyqueue: Counter,
    /// Fetches that produced no pack
    pub emptypack: Counter,
    /// Pack bytes received
    pub fetchbytes: Counter,
    /// Nanoseconds spent fetching non-empty packs
    pub fetchtime: Counter,
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> BTreeMap<&'static str, u64> {
        BTreeMap::from([
            ("fetches", self.fetches.get()),
            ("new", self.new.get()),
            ("forks", self.forks.get()),
            ("sleep", self.sleep.get()),
            ("emptyqueue", self.emptyqueue.get()),
            ("emptypack", self.emptypack.get()),
            ("fetchbytes", self.fetchbytes.get()),
            ("fetchtime", self.fetchtime.get()),
        ])
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(&self.snapshot()).unwrap_or_else(|_| "{}".to_string())
    }
}
