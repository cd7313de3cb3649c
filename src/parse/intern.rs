use std::collections::HashSet;
use std::sync::Arc;

use parking_lot::RwLock;

/// Thread-safe string interner. Lookups take the shared lock; only a miss
/// takes the exclusive one.
#[derive(Debug, Default)]
pub struct Interner {
    strings: RwLock<HashSet<Arc<str>>>,
}

impl Interner {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the shared copy of `s`, inserting it on first sight.
    pub fn intern(&self, s: &str) -> Arc<str> {
        if let Some(existing) = self.strings.read().get(s) {
            return Arc::clone(existing);
        }

        let mut strings = self.strings.write();
        // Another thread may have inserted between the two locks.
        if let Some(existing) = strings.get(s) {
            return Arc::clone(existing);
        }
        let interned: Arc<str> = Arc::from(s);
        strings.insert(Arc::clone(&interned));
        interned
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.strings.read().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.strings.write().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn equal_inputs_share_storage() {
        let interner = Interner::new();
        let a = interner.intern("base_rate");
        let b = interner.intern("base_rate");
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(interner.len(), 1);
    }

    #[test]
    fn distinct_inputs_are_kept_apart() {
        let interner = Interner::new();
        let a = interner.intern("weight");
        let b = interner.intern("height");
        assert_ne!(a, b);
        assert_eq!(interner.len(), 2);
    }

    #[test]
    fn clear_empties() {
        let interner = Interner::new();
        interner.intern("x");
        interner.clear();
        assert!(interner.is_empty());
    }

    #[test]
    fn concurrent_interning_converges() {
        let interner = Arc::new(Interner::new());
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let interner = Arc::clone(&interner);
                std::thread::spawn(move || interner.intern("fuel_surcharge"))
            })
            .collect();
        let results: Vec<Arc<str>> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        for r in &results[1..] {
            assert!(Arc::ptr_eq(&results[0], r));
        }
        assert_eq!(interner.len(), 1);
    }
}
