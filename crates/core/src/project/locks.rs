use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

/// One mutex per key, created on first use.
///
/// A poisoned lock is recovered rather than propagated: the guarded data is
/// `()` and the files it serializes access to are rewritten atomically.
#[derive(Debug, Default)]
pub struct KeyedLocks {
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl KeyedLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_lock<R>(&self, key: &str, f: impl FnOnce() -> R) -> R {
        let handle = self.handle(key);
        let _guard = handle.lock().unwrap_or_else(PoisonError::into_inner);
        f()
    }

    fn handle(&self, key: &str) -> Arc<Mutex<()>> {
        let mut map = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(map.entry(key.to_string()).or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;
    use std::time::Duration;

    #[test]
    fn serializes_work_for_the_same_key() {
        let locks = Arc::new(KeyedLocks::new());
        let active = Arc::new(AtomicUsize::new(0));
        let overlap = Arc::new(AtomicUsize::new(0));

        let workers: Vec<_> = (0..4)
            .map(|_| {
                let locks = Arc::clone(&locks);
                let active = Arc::clone(&active);
                let overlap = Arc::clone(&overlap);
                thread::spawn(move || {
                    locks.with_lock("novel", || {
                        if active.fetch_add(1, Ordering::SeqCst) > 0 {
                            overlap.fetch_add(1, Ordering::SeqCst);
                        }
                        thread::sleep(Duration::from_millis(5));
                        active.fetch_sub(1, Ordering::SeqCst);
                    })
                })
            })
            .collect();

        for worker in workers {
            worker.join().unwrap();
        }
        assert_eq!(overlap.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn returns_closure_value() {
        let locks = KeyedLocks::new();
        assert_eq!(locks.with_lock("a", || 42), 42);
    }
}
