//! Backend-independent record store contract

use std::time::{Duration, Instant};

use crate::maintenance::Maintenance;
use crate::predicate::Predicate;
use crate::{Error, Result};

/// Operations shared by the in-memory and SQLite stores.
///
/// Every call runs a due maintenance sweep first and holds the store's lock
/// for its whole duration, predicate evaluation included. Predicates must
/// therefore be quick and must never call back into the same store: doing
/// so blocks forever.
pub trait RecordStore<T>: Send + Sync {
    /// Append records in argument order
    fn add(&self, values: Vec<T>) -> Result<()>;

    /// Snapshot of records matching `predicate` (all when `None`)
    fn filter(&self, predicate: Option<&Predicate<T>>) -> Result<Vec<T>>;

    /// Remove and return records matching `predicate` (all when `None`)
    fn exclude(&self, predicate: Option<&Predicate<T>>) -> Result<Vec<T>>;

    /// Number of records currently held
    fn len(&self) -> Result<usize> {
        Ok(self.filter(None)?.len())
    }

    fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    /// Snapshot iterator in storage order; call again for a fresh snapshot
    fn iter(&self) -> Result<std::vec::IntoIter<T>> {
        Ok(self.filter(None)?.into_iter())
    }
}

/// Construction options common to both backends
#[derive(Debug, Clone)]
pub struct StoreOptions<T> {
    pub outdate: Option<Predicate<T>>,
    pub timing: Option<Duration>,
}

impl<T> Default for StoreOptions<T> {
    fn default() -> Self {
        Self {
            outdate: None,
            timing: None,
        }
    }
}

impl<T> StoreOptions<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Evict records matching `outdate` automatically
    pub fn outdate(mut self, outdate: Predicate<T>) -> Self {
        self.outdate = Some(outdate);
        self
    }

    /// Sweep at most once per `timing` instead of before every operation
    pub fn timing(mut self, timing: Duration) -> Self {
        self.timing = Some(timing);
        self
    }

    /// Validate and turn into the scheduler state
    pub(crate) fn into_maintenance(self) -> Result<Maintenance<T>> {
        if let Some(timing) = self.timing {
            if timing.is_zero() {
                return Err(Error::Config("timing must be a positive duration".into()));
            }
            if Instant::now().checked_add(timing).is_none() {
                return Err(Error::Config(format!("timing {:?} is too large", timing)));
            }
        }
        Ok(Maintenance::new(self.outdate, self.timing))
    }
}
