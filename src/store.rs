use std::{
    collections::HashMap,
    sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard},
};

use tracing::debug;

type DistrictValues = HashMap<String, f64>;

/// Latest aggregate per (metric, district). Last write wins and nothing is
/// kept beyond the process.
#[derive(Debug, Default)]
pub struct MetricStore {
    values: RwLock<HashMap<String, DistrictValues>>,
}

impl MetricStore {
    pub fn new() -> Self {
        Self::default()
    }

    // Every write replaces exactly one entry, so a poisoned map is still whole.
    fn read(&self) -> RwLockReadGuard<'_, HashMap<String, DistrictValues>> {
        self.values.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<String, DistrictValues>> {
        self.values.write().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn record(&self, metric: &str, district: &str, value: f64) {
        let previous = self
            .write()
            .entry(metric.to_owned())
            .or_default()
            .insert(district.to_owned(), value);
        debug!(metric, district, value, ?previous, "Recorded aggregate");
    }

    pub fn get(&self, metric: &str, district: &str) -> Option<f64> {
        self.read().get(metric)?.get(district).copied()
    }

    /// Owned copy of one metric's values.
    pub fn snapshot(&self, metric: &str) -> HashMap<String, f64> {
        self.read().get(metric).cloned().unwrap_or_default()
    }

    /// Copies several metrics under a single read lock, so the result never
    /// mixes values from before and after a concurrent upload.
    pub fn snapshot_many<S: AsRef<str>>(&self, metrics: &[S]) -> HashMap<String, DistrictValues> {
        let guard = self.read();
        metrics
            .iter()
            .map(|m| {
                let m = m.as_ref();
                (m.to_owned(), guard.get(m).cloned().unwrap_or_default())
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn last_write_wins() {
        let store = MetricStore::new();
        store.record("temperature", "ÇANKAYA", 14.0);
        store.record("temperature", "ÇANKAYA", 18.5);
        assert_eq!(store.get("temperature", "ÇANKAYA"), Some(18.5));
        assert_eq!(store.get("humidity", "ÇANKAYA"), None);
        assert_eq!(store.get("temperature", "SINCAN"), None);
    }

    #[test]
    fn snapshot_is_detached() {
        let store = MetricStore::new();
        store.record("temperature", "SINCAN", 12.0);
        let snap = store.snapshot("temperature");
        store.record("temperature", "SINCAN", 30.0);
        assert_eq!(snap.get("SINCAN"), Some(&12.0));
        assert!(store.snapshot("slope").is_empty());
    }

    #[test]
    fn snapshot_many_covers_every_metric() {
        let store = MetricStore::new();
        store.record("temperature", "MAMAK", 16.0);
        store.record("slope", "MAMAK", 4.0);
        let snap = store.snapshot_many(&["temperature", "humidity", "slope"]);
        assert_eq!(snap.len(), 3);
        assert!(snap["humidity"].is_empty());
        assert_eq!(snap["slope"]["MAMAK"], 4.0);
    }

    #[test]
    fn concurrent_writers() {
        let store = Arc::new(MetricStore::new());
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let store = store.clone();
                std::thread::spawn(move || {
                    for j in 0..100 {
                        store.record("temperature", &format!("D{}", i), j as f64);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        let snap = store.snapshot("temperature");
        assert_eq!(snap.len(), 8);
        assert!(snap.values().all(|v| *v == 99.0));
    }
}
