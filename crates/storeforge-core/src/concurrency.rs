use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Bounds how many provisioning pipelines run at once.
#[derive(Debug)]
pub struct ProvisionGate {
    in_flight: Arc<AtomicUsize>,
    max: usize,
}

impl ProvisionGate {
    pub fn new(max: usize) -> Self {
        Self {
            in_flight: Arc::new(AtomicUsize::new(0)),
            max,
        }
    }

    pub fn max(&self) -> usize {
        self.max
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Take a slot, or `None` if all `max` slots are held.
    pub fn try_acquire(&self) -> Option<ProvisionPermit> {
        self.in_flight
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| {
                (n < self.max).then_some(n + 1)
            })
            .ok()
            .map(|_| ProvisionPermit {
                in_flight: Arc::clone(&self.in_flight),
            })
    }
}

/// One in-flight slot. Released on drop, including during unwinding.
#[derive(Debug)]
pub struct ProvisionPermit {
    in_flight: Arc<AtomicUsize>,
}

impl Drop for ProvisionPermit {
    fn drop(&mut self) {
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn acquire_up_to_max() {
        let gate = ProvisionGate::new(2);
        let a = gate.try_acquire();
        let b = gate.try_acquire();
        assert!(a.is_some());
        assert!(b.is_some());
        assert!(gate.try_acquire().is_none());
        assert_eq!(gate.in_flight(), 2);
    }

    #[test]
    fn permit_released_on_drop() {
        let gate = ProvisionGate::new(1);
        {
            let _permit = gate.try_acquire().unwrap();
            assert_eq!(gate.in_flight(), 1);
        }
        assert_eq!(gate.in_flight(), 0);
        assert!(gate.try_acquire().is_some());
    }

    #[test]
    fn permit_released_on_panic() {
        let gate = ProvisionGate::new(1);
        let permit = gate.try_acquire().unwrap();
        let result = std::thread::spawn(move || {
            let _permit = permit;
            panic!("pipeline blew up");
        })
        .join();
        assert!(result.is_err());
        assert_eq!(gate.in_flight(), 0);
    }

    #[test]
    fn zero_capacity_never_admits() {
        let gate = ProvisionGate::new(0);
        assert!(gate.try_acquire().is_none());
    }

    #[test]
    fn concurrent_acquire_never_exceeds_max() {
        let gate = Arc::new(ProvisionGate::new(3));
        let handles: Vec<_> = (0..16)
            .map(|_| {
                let gate = Arc::clone(&gate);
                std::thread::spawn(move || gate.try_acquire())
            })
            .collect();
        let permits: Vec<_> = handles
            .into_iter()
            .filter_map(|h| h.join().unwrap())
            .collect();
        assert_eq!(permits.len(), 3);
        assert_eq!(gate.in_flight(), 3);
        drop(permits);
        assert_eq!(gate.in_flight(), 0);
    }
}
