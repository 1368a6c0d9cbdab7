//! Bounded admission for task execution
//!
//! A single atomic counter guards `max_in_flight`. Acquisition never waits:
//! a full gate answers [`Admission::Rejected`] at once and the caller tells
//! the queue to come back later. Every permit gives its slot back on drop.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

#[derive(Debug)]
struct GateState {
    in_flight: AtomicUsize,
    max_in_flight: usize,
}

#[derive(Debug, Clone)]
pub struct AdmissionGate {
    state: Arc<GateState>,
}

#[derive(Debug)]
pub enum Admission {
    Permit(AdmissionPermit),
    Rejected,
}

impl Admission {
    pub fn is_rejected(&self) -> bool {
        matches!(self, Admission::Rejected)
    }
}

/// Holds one slot of the gate until dropped
#[derive(Debug)]
#[must_use = "dropping the permit releases the slot immediately"]
pub struct AdmissionPermit {
    state: Arc<GateState>,
}

impl Drop for AdmissionPermit {
    fn drop(&mut self) {
        self.state.in_flight.fetch_sub(1, Ordering::AcqRel);
    }
}

impl AdmissionGate {
    /// A gate with `max_in_flight == 0` rejects everything
    pub fn new(max_in_flight: usize) -> Self {
        Self {
            state: Arc::new(GateState {
                in_flight: AtomicUsize::new(0),
                max_in_flight,
            }),
        }
    }

    pub fn try_acquire(&self) -> Admission {
        let max = self.state.max_in_flight;
        let acquired = self
            .state
            .in_flight
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                (current < max).then_some(current + 1)
            });

        match acquired {
            Ok(_) => Admission::Permit(AdmissionPermit {
                state: Arc::clone(&self.state),
            }),
            Err(_) => Admission::Rejected,
        }
    }

    pub fn in_flight(&self) -> usize {
        self.state.in_flight.load(Ordering::Acquire)
    }

    pub fn max_in_flight(&self) -> usize {
        self.state.max_in_flight
    }

    pub fn available(&self) -> usize {
        self.max_in_flight().saturating_sub(self.in_flight())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_admits_up_to_capacity() {
        let gate = AdmissionGate::new(2);
        let a = gate.try_acquire();
        let b = gate.try_acquire();
        let c = gate.try_acquire();

        assert!(!a.is_rejected());
        assert!(!b.is_rejected());
        assert!(c.is_rejected());
        assert_eq!(gate.in_flight(), 2);
        assert_eq!(gate.available(), 0);
    }

    #[test]
    fn test_drop_releases_slot() {
        let gate = AdmissionGate::new(1);
        {
            let _permit = gate.try_acquire();
            assert_eq!(gate.in_flight(), 1);
            assert!(gate.try_acquire().is_rejected());
        }
        assert_eq!(gate.in_flight(), 0);
        assert!(!gate.try_acquire().is_rejected());
    }

    #[test]
    fn test_release_on_panic_path() {
        let gate = AdmissionGate::new(1);
        let cloned = gate.clone();
        let result = std::panic::catch_unwind(move || {
            let _permit = cloned.try_acquire();
            panic!("task blew up");
        });
        assert!(result.is_err());
        assert_eq!(gate.in_flight(), 0);
    }

    #[test]
    fn test_zero_capacity_rejects() {
        let gate = AdmissionGate::new(0);
        assert!(gate.try_acquire().is_rejected());
        assert_eq!(gate.in_flight(), 0);
    }

    #[test]
    fn test_concurrent_acquire_never_exceeds_bound() {
        let gate = AdmissionGate::new(3);
        let handles: Vec<_> = (0..16)
            .map(|_| {
                let gate = gate.clone();
                std::thread::spawn(move || match gate.try_acquire() {
                    Admission::Permit(p) => {
                        assert!(gate.in_flight() <= 3);
                        std::thread::sleep(std::time::Duration::from_millis(5));
                        drop(p);
                        true
                    }
                    Admission::Rejected => false,
                })
            })
            .collect();

        let admitted = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|ok| *ok)
            .count();
        assert!(admitted >= 3);
        assert_eq!(gate.in_flight(), 0);
    }
}
