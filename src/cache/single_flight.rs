//! Single-flight execution
//!
//! At most one computation runs per key. Callers arriving while it runs
//! wait for it and receive a clone of the same value, or `InFlightFailed`
//! carrying the leader's error text.

use std::collections::HashMap;
use std::sync::{Arc, Condvar, Mutex};

use tracing::debug;

use crate::error::{AudioChatError, Result};

enum FlightState<T> {
    Running,
    Done(std::result::Result<T, String>),
}

struct Flight<T> {
    state: Mutex<FlightState<T>>,
    done: Condvar,
}

impl<T> Flight<T> {
    fn new() -> Self {
        Self {
            state: Mutex::new(FlightState::Running),
            done: Condvar::new(),
        }
    }
}

/// How a caller got its value
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlightRole {
    /// Ran the computation
    Leader,
    /// Waited on another caller's computation
    Joined,
}

/// Per-key in-flight registry
pub struct SingleFlight<T> {
    flights: Mutex<HashMap<String, Arc<Flight<T>>>>,
}

impl<T> Default for SingleFlight<T> {
    fn default() -> Self {
        Self {
            flights: Mutex::new(HashMap::new()),
        }
    }
}

impl<T> std::fmt::Debug for SingleFlight<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SingleFlight")
            .field("in_flight", &self.in_flight())
            .finish()
    }
}

/// Publishes the leader's outcome, including when the leader panics
struct LeaderGuard<'a, T> {
    registry: &'a SingleFlight<T>,
    key: &'a str,
    flight: Arc<Flight<T>>,
    outcome: Option<std::result::Result<T, String>>,
}

impl<T> Drop for LeaderGuard<'_, T> {
    fn drop(&mut self) {
        let outcome = self
            .outcome
            .take()
            .unwrap_or_else(|| Err("leader abandoned the computation".to_string()));
        if let Ok(mut state) = self.flight.state.lock() {
            *state = FlightState::Done(outcome);
        }
        self.flight.done.notify_all();
        if let Ok(mut flights) = self.registry.flights.lock() {
            flights.remove(self.key);
        }
    }
}

impl<T> SingleFlight<T> {
    /// Number of computations currently running
    pub fn in_flight(&self) -> usize {
        self.flights.lock().map(|f| f.len()).unwrap_or(0)
    }
}

impl<T: Clone> SingleFlight<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `compute` unless a computation for `key` is already running,
    /// in which case wait for its result
    pub fn run<F>(&self, key: &str, compute: F) -> Result<(T, FlightRole)>
    where
        F: FnOnce() -> Result<T>,
    {
        let (flight, leader) = {
            let mut flights = self.flights.lock().map_err(|_| poisoned(key))?;
            match flights.get(key) {
                Some(existing) => (Arc::clone(existing), false),
                None => {
                    let flight = Arc::new(Flight::new());
                    flights.insert(key.to_string(), Arc::clone(&flight));
                    (flight, true)
                }
            }
        };

        if leader {
            let mut guard = LeaderGuard {
                registry: self,
                key,
                flight,
                outcome: None,
            };
            let result = compute();
            guard.outcome = Some(match &result {
                Ok(value) => Ok(value.clone()),
                Err(e) => Err(e.to_string()),
            });
            drop(guard);
            return result.map(|value| (value, FlightRole::Leader));
        }

        debug!(key, "joining in-flight computation");
        let mut state = flight.state.lock().map_err(|_| poisoned(key))?;
        while let FlightState::Running = *state {
            state = flight.done.wait(state).map_err(|_| poisoned(key))?;
        }
        match &*state {
            FlightState::Done(Ok(value)) => Ok((value.clone(), FlightRole::Joined)),
            FlightState::Done(Err(reason)) => Err(AudioChatError::InFlightFailed {
                key: key.to_string(),
                reason: reason.clone(),
            }),
            FlightState::Running => Err(poisoned(key)),
        }
    }
}

fn poisoned(key: &str) -> AudioChatError {
    AudioChatError::InFlightFailed {
        key: key.to_string(),
        reason: "in-flight registry lock poisoned".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Barrier;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_sequential_calls_each_compute() {
        let flights = SingleFlight::new();
        let (a, role) = flights.run("k", || Ok(1)).unwrap();
        assert_eq!((a, role), (1, FlightRole::Leader));
        let (b, _) = flights.run("k", || Ok(2)).unwrap();
        assert_eq!(b, 2);
        assert_eq!(flights.in_flight(), 0);
    }

    #[test]
    fn test_debug_for_any_value_type() {
        struct Opaque;
        let flights: SingleFlight<Opaque> = SingleFlight::default();
        assert_eq!(flights.in_flight(), 0);
        assert_eq!(format!("{:?}", flights), "SingleFlight { in_flight: 0 }");
    }

    #[test]
    fn test_concurrent_callers_share_one_computation() {
        let flights = Arc::new(SingleFlight::new());
        let computations = Arc::new(AtomicUsize::new(0));
        let barrier = Arc::new(Barrier::new(4));

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let flights = Arc::clone(&flights);
                let computations = Arc::clone(&computations);
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    barrier.wait();
                    flights
                        .run("same", || {
                            computations.fetch_add(1, Ordering::SeqCst);
                            thread::sleep(Duration::from_millis(100));
                            Ok(vec![1u8, 2, 3])
                        })
                        .unwrap()
                })
            })
            .collect();

        let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert_eq!(computations.load(Ordering::SeqCst), 1);
        assert!(results.iter().all(|(v, _)| v == &vec![1u8, 2, 3]));
        assert_eq!(
            results.iter().filter(|(_, r)| *r == FlightRole::Leader).count(),
            1
        );
    }

    #[test]
    fn test_joiners_see_leader_failure() {
        let flights: Arc<SingleFlight<u32>> = Arc::new(SingleFlight::new());
        let started = Arc::new(Barrier::new(2));

        let leader = {
            let flights = Arc::clone(&flights);
            let started = Arc::clone(&started);
            thread::spawn(move || {
                flights.run("k", || {
                    started.wait();
                    thread::sleep(Duration::from_millis(100));
                    Err(AudioChatError::Analysis {
                        reason: "boom".to_string(),
                    })
                })
            })
        };

        started.wait();
        let joined = flights.run("k", || Ok(7));
        match joined {
            Err(AudioChatError::InFlightFailed { reason, .. }) => assert!(reason.contains("boom")),
            other => panic!("unexpected {:?}", other.map(|(v, _)| v)),
        }
        assert!(leader.join().unwrap().is_err());
    }

    #[test]
    fn test_panicking_leader_releases_joiners() {
        let flights: Arc<SingleFlight<u32>> = Arc::new(SingleFlight::new());
        let started = Arc::new(Barrier::new(2));

        let leader = {
            let flights = Arc::clone(&flights);
            let started = Arc::clone(&started);
            thread::spawn(move || {
                let _ = flights.run("k", || -> Result<u32> {
                    started.wait();
                    thread::sleep(Duration::from_millis(100));
                    panic!("leader crashed");
                });
            })
        };

        started.wait();
        let joined = flights.run("k", || Ok(7));
        assert!(matches!(joined, Err(AudioChatError::InFlightFailed { .. })));
        assert!(leader.join().is_err());
        assert_eq!(flights.in_flight(), 0);
    }
}
