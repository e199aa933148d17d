//! Record predicates
//!
//! A single shareable closure type is used for outdate rules, filters and
//! exclusions, so the same value can be armed inside the SQLite callbacks
//! and evaluated directly by the in-memory store.

use std::fmt;
use std::sync::Arc;

/// Boolean test over one record.
pub struct Predicate<T>(Arc<dyn Fn(&T) -> bool + Send + Sync>);

impl<T> Predicate<T> {
    /// Wrap a closure as a predicate
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(&T) -> bool + Send + Sync + 'static,
    {
        Self(Arc::new(f))
    }

    /// Evaluate the predicate against a record
    #[inline]
    pub fn test(&self, record: &T) -> bool {
        (self.0)(record)
    }
}

impl<T> Clone for Predicate<T> {
    fn clone(&self) -> Self {
        Self(Arc::clone(&self.0))
    }
}

impl<T> fmt::Debug for Predicate<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Predicate(..)")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clone_shares_closure() {
        let even = Predicate::new(|n: &i32| n % 2 == 0);
        let copy = even.clone();

        assert!(even.test(&4));
        assert!(copy.test(&4));
        assert!(!copy.test(&3));
    }

    #[test]
    fn test_debug_hides_closure() {
        let small = Predicate::new(|n: &i32| *n < 10);
        assert_eq!(format!("{:?}", small), "Predicate(..)");
    }
}
