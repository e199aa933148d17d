//! SQL callback functions that evaluate host predicates per row
//!
//! SQLite has no notion of a Rust closure, so each connection gets two
//! scalar functions, `check_filter(value)` and `check_exclude(value)`.
//! They decode the row with the store's codec and test whichever predicate
//! is currently armed. Arming happens under the store lock through
//! [`Hooks::arm`], and the returned guard disarms on drop.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use rusqlite::Connection;
use rusqlite::functions::FunctionFlags;

use super::schema;
use crate::codec::{Codec, CodecError, Stored};
use crate::predicate::Predicate;

/// Which callback a predicate is armed for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Slot {
    Filter,
    Exclude,
}

impl Slot {
    pub fn function_name(&self) -> &'static str {
        match self {
            Slot::Filter => schema::CHECK_FILTER_FN,
            Slot::Exclude => schema::CHECK_EXCLUDE_FN,
        }
    }
}

struct Armed<T, C> {
    codec: Arc<C>,
    filter: Option<Predicate<T>>,
    exclude: Option<Predicate<T>>,
    /// First decode failure seen by a callback since arming
    fault: Option<CodecError>,
}

impl<T, C: Codec<T>> Armed<T, C> {
    fn check(&mut self, slot: Slot, raw: Stored) -> Result<bool, CodecError> {
        let predicate = match slot {
            Slot::Filter => self.filter.clone(),
            Slot::Exclude => self.exclude.clone(),
        };
        let Some(predicate) = predicate else {
            return Ok(true);
        };

        let value = self.codec.decode(raw)?;
        Ok(predicate.test(&value))
    }
}

/// Predicate slots shared by every connection of one store
pub struct Hooks<T, C> {
    inner: Arc<Mutex<Armed<T, C>>>,
}

impl<T, C> Hooks<T, C>
where
    T: 'static,
    C: Codec<T>,
{
    pub fn new(codec: Arc<C>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Armed {
                codec,
                filter: None,
                exclude: None,
                fault: None,
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Armed<T, C>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register both callback functions on a freshly opened connection
    pub fn register(&self, conn: &Connection) -> rusqlite::Result<()> {
        for slot in [Slot::Filter, Slot::Exclude] {
            let armed = Arc::clone(&self.inner);
            conn.create_scalar_function(
                slot.function_name(),
                1,
                // Not deterministic: the armed predicate changes between queries
                FunctionFlags::SQLITE_UTF8,
                move |ctx| {
                    let mut armed = armed.lock().unwrap_or_else(PoisonError::into_inner);
                    let checked = ctx
                        .get::<Stored>(0)
                        .map_err(|e| CodecError::Decode(e.to_string()))
                        .and_then(|raw| armed.check(slot, raw));
                    checked.map_err(|e| {
                        armed.fault.get_or_insert_with(|| e.clone());
                        rusqlite::Error::UserFunctionError(Box::new(e))
                    })
                },
            )?;
        }
        Ok(())
    }

    /// Arm `predicate` for `slot` until the guard is dropped.
    ///
    /// `None` leaves the slot empty, which makes the callback match every row.
    pub fn arm(&self, slot: Slot, predicate: Option<&Predicate<T>>) -> ArmGuard<'_, T, C> {
        let mut armed = self.lock();
        armed.fault = None;
        match slot {
            Slot::Filter => armed.filter = predicate.cloned(),
            Slot::Exclude => armed.exclude = predicate.cloned(),
        }
        ArmGuard { hooks: self, slot }
    }
}

/// Disarms its slot on drop
pub struct ArmGuard<'a, T: 'static, C: Codec<T>> {
    hooks: &'a Hooks<T, C>,
    slot: Slot,
}

impl<T: 'static, C: Codec<T>> ArmGuard<'_, T, C> {
    /// Decode failure raised inside a callback, if any.
    ///
    /// SQLite only carries the message of a user function error, so the
    /// typed error is kept here to tell corruption apart from engine errors.
    pub fn take_fault(&self) -> Option<CodecError> {
        self.hooks.lock().fault.take()
    }
}

impl<T: 'static, C: Codec<T>> Drop for ArmGuard<'_, T, C> {
    fn drop(&mut self) {
        let mut armed = self.hooks.lock();
        match self.slot {
            Slot::Filter => armed.filter = None,
            Slot::Exclude => armed.exclude = None,
        }
        armed.fault = None;
    }
}
