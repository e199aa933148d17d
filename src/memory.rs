//! Volatile record store
//!
//! Records live in a `Vec` in insertion order behind one mutex per store.

use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Instant;

use crate::Result;
use crate::maintenance::Maintenance;
use crate::predicate::Predicate;
use crate::store::{RecordStore, StoreOptions};

struct State<T> {
    records: Vec<T>,
    maintenance: Maintenance<T>,
}

impl<T: Clone> State<T> {
    /// Run the outdate sweep if one is due
    fn maintain(&mut self) {
        let Some(outdate) = self.maintenance.due(Instant::now()) else {
            return;
        };

        let removed = self.take(Some(&outdate)).len();
        self.maintenance.advance(Instant::now());
        if removed > 0 {
            tracing::debug!(removed, remaining = self.records.len(), "Swept outdated records");
        }
    }

    /// Remove and return matching records.
    ///
    /// The predicate runs over every record before anything moves, so a
    /// panic leaves `records` untouched.
    fn take(&mut self, predicate: Option<&Predicate<T>>) -> Vec<T> {
        let Some(predicate) = predicate else {
            return std::mem::take(&mut self.records);
        };

        let matched: Vec<bool> = self.records.iter().map(|r| predicate.test(r)).collect();
        let (excluded, kept): (Vec<_>, Vec<_>) = std::mem::take(&mut self.records)
            .into_iter()
            .zip(matched)
            .partition(|(_, hit)| *hit);
        self.records = kept.into_iter().map(|(record, _)| record).collect();
        excluded.into_iter().map(|(record, _)| record).collect()
    }
}

/// Thread-safe in-memory record store
pub struct MemoryStore<T> {
    state: Mutex<State<T>>,
}

impl<T: Clone> Default for MemoryStore<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Clone> MemoryStore<T> {
    /// Create an empty store without automatic eviction
    pub fn new() -> Self {
        Self::from_maintenance(Maintenance::default())
    }

    /// Create an empty store with an outdate rule and sweep cadence
    pub fn with_options(options: StoreOptions<T>) -> Result<Self> {
        Ok(Self::from_maintenance(options.into_maintenance()?))
    }

    fn from_maintenance(maintenance: Maintenance<T>) -> Self {
        Self {
            state: Mutex::new(State {
                records: Vec::new(),
                maintenance,
            }),
        }
    }

    /// Lock the store and run a due sweep.
    ///
    /// A panicking predicate poisons the mutex. Predicates only run while
    /// `records` is untouched, so the guard is recovered.
    fn maintained(&self) -> MutexGuard<'_, State<T>> {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.maintain();
        state
    }

    /// Record at `index` in insertion order
    pub fn get(&self, index: usize) -> Option<T> {
        self.maintained().records.get(index).cloned()
    }
}

impl<T> RecordStore<T> for MemoryStore<T>
where
    T: Clone + Send,
{
    fn add(&self, values: Vec<T>) -> Result<()> {
        self.maintained().records.extend(values);
        Ok(())
    }

    fn filter(&self, predicate: Option<&Predicate<T>>) -> Result<Vec<T>> {
        let state = self.maintained();
        Ok(match predicate {
            Some(predicate) => state
                .records
                .iter()
                .filter(|record| predicate.test(record))
                .cloned()
                .collect(),
            None => state.records.clone(),
        })
    }

    fn exclude(&self, predicate: Option<&Predicate<T>>) -> Result<Vec<T>> {
        Ok(self.maintained().take(predicate))
    }

    fn len(&self) -> Result<usize> {
        Ok(self.maintained().records.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{Value, json};
    use std::collections::HashSet;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    fn v_is(n: i64) -> Predicate<Value> {
        Predicate::new(move |r: &Value| r["v"] == n)
    }

    #[test]
    fn test_example_scenario() {
        let store = MemoryStore::new();
        store.add(vec![json!({"v": 1}), json!({"v": 2}), json!({"v": 3})]).unwrap();

        let above_one = Predicate::new(|r: &Value| r["v"].as_i64().unwrap_or(0) > 1);
        assert_eq!(
            store.filter(Some(&above_one)).unwrap(),
            vec![json!({"v": 2}), json!({"v": 3})]
        );

        assert_eq!(store.exclude(Some(&v_is(1))).unwrap(), vec![json!({"v": 1})]);
        assert_eq!(store.filter(None).unwrap(), vec![json!({"v": 2}), json!({"v": 3})]);

        assert_eq!(store.exclude(None).unwrap(), vec![json!({"v": 2}), json!({"v": 3})]);
        assert!(store.is_empty().unwrap());
    }

    #[test]
    fn test_insertion_order() {
        let store = MemoryStore::new();
        store.add(vec![5, 3]).unwrap();
        store.add(vec![9]).unwrap();
        store.add(vec![1, 7, 3]).unwrap();

        assert_eq!(store.filter(None).unwrap(), vec![5, 3, 9, 1, 7, 3]);
        assert_eq!(store.iter().unwrap().collect::<Vec<_>>(), vec![5, 3, 9, 1, 7, 3]);
        assert_eq!(store.get(2), Some(9));
        assert_eq!(store.get(6), None);
    }

    #[test]
    fn test_exclude_partitions() {
        let store = MemoryStore::<i32>::new();
        store.add((0..20).collect()).unwrap();

        let even = Predicate::new(|n: &i32| n % 2 == 0);
        let removed = store.exclude(Some(&even)).unwrap();
        let kept = store.filter(None).unwrap();

        assert_eq!(removed, (0..20).filter(|n| n % 2 == 0).collect::<Vec<_>>());
        assert_eq!(kept, (0..20).filter(|n| n % 2 != 0).collect::<Vec<_>>());
    }

    #[test]
    fn test_snapshot_does_not_alias() {
        let store = MemoryStore::new();
        store.add(vec![1, 2]).unwrap();

        let snapshot = store.filter(None).unwrap();
        let iter = store.iter().unwrap();
        store.exclude(None).unwrap();
        store.add(vec![3]).unwrap();

        assert_eq!(snapshot, vec![1, 2]);
        assert_eq!(iter.collect::<Vec<_>>(), vec![1, 2]);
    }

    #[test]
    fn test_full_clear_is_idempotent() {
        let store: MemoryStore<&str> = MemoryStore::new();
        assert!(store.exclude(None).unwrap().is_empty());

        store.add(vec!["a", "b"]).unwrap();
        store.exclude(None).unwrap();
        assert!(store.filter(None).unwrap().is_empty());
    }

    #[test]
    fn test_untimed_outdate_sweeps_every_call() {
        let store = MemoryStore::with_options(StoreOptions::new().outdate(v_is(2))).unwrap();
        store.add(vec![json!({"v": 1}), json!({"v": 2})]).unwrap();

        assert_eq!(store.filter(None).unwrap(), vec![json!({"v": 1})]);
    }

    #[test]
    fn test_timed_outdate() {
        let options = StoreOptions::new()
            .outdate(v_is(2))
            .timing(Duration::from_millis(300));
        let store = MemoryStore::with_options(options).unwrap();

        store.add(vec![json!({"v": 1}), json!({"v": 2}), json!({"v": 3})]).unwrap();
        assert_eq!(store.len().unwrap(), 3);

        thread::sleep(Duration::from_millis(450));
        let remaining = store.filter(None).unwrap();
        assert_eq!(remaining, vec![json!({"v": 1}), json!({"v": 3})]);
    }

    #[test]
    fn test_concurrent_add_and_clear() {
        let store = Arc::new(MemoryStore::<String>::new());
        let writers = 8;
        let per_writer = 200;

        let handles: Vec<_> = (0..writers)
            .map(|w| {
                let s = Arc::clone(&store);
                thread::spawn(move || {
                    for i in 0..per_writer {
                        s.add(vec![format!("{}-{}", w, i)]).unwrap();
                    }
                })
            })
            .collect();

        let reader = {
            let s = Arc::clone(&store);
            thread::spawn(move || {
                let mut seen = Vec::new();
                for _ in 0..100 {
                    seen.extend(s.exclude(None).unwrap());
                    thread::yield_now();
                }
                seen
            })
        };

        for h in handles {
            h.join().unwrap();
        }
        let mut seen = reader.join().unwrap();
        seen.extend(store.exclude(None).unwrap());

        let unique: HashSet<_> = seen.iter().cloned().collect();
        assert_eq!(seen.len(), writers * per_writer);
        assert_eq!(unique.len(), writers * per_writer);
    }

    #[test]
    fn test_panicking_predicate_leaves_store_usable() {
        let store = Arc::new(MemoryStore::new());
        store.add(vec![1, 2, 3]).unwrap();

        let s = Arc::clone(&store);
        let result = thread::spawn(move || {
            // Matches 1 before panicking on 2
            let boom = Predicate::new(|n: &i32| match n {
                1 => true,
                2 => panic!("bad predicate"),
                _ => false,
            });
            s.exclude(Some(&boom))
        })
        .join();

        assert!(result.is_err());
        assert_eq!(store.filter(None).unwrap(), vec![1, 2, 3]);
        assert_eq!(store.exclude(Some(&Predicate::new(|n: &i32| *n == 1))).unwrap(), vec![1]);
    }

    #[test]
    fn test_panicking_outdate_sweep_keeps_records() {
        let options = StoreOptions::new().outdate(Predicate::new(|n: &i32| match n {
            1 => true,
            3 => panic!("bad outdate rule"),
            _ => false,
        }));
        let store = Arc::new(MemoryStore::with_options(options).unwrap());

        let s = Arc::clone(&store);
        let result = thread::spawn(move || s.add(vec![1, 2, 3])).join();
        assert!(result.is_ok());

        // The sweep before this call panics on 3 after matching 1
        let s = Arc::clone(&store);
        assert!(thread::spawn(move || s.len()).join().is_err());
        let state = store.state.lock().unwrap_or_else(PoisonError::into_inner);
        assert_eq!(state.records, vec![1, 2, 3]);
    }
}
