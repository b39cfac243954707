//! Single-flight refresh gate and its waiter queue.
//!
//! The gate has two states, [`RefreshState::Idle`] and [`RefreshState::Refreshing`].
//! The first caller to reach an idle gate becomes the refresh owner and is the
//! only one that talks to the token endpoint; everybody arriving while the gate
//! is refreshing is queued and released, in arrival order, with the owner's
//! outcome.
//!
//! All state transitions happen inside one short critical section on a
//! `parking_lot` mutex that is never held across an `.await`.
//!
//! The owner holds a [`RefreshOwnership`] guard. Releasing it (or dropping it,
//! if the owner is cancelled or panics) always returns the gate to `Idle`.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::oneshot;
use tracing::{debug, warn};

use crate::error::ClientError;

/// Refresh gate state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshState {
    Idle,
    Refreshing,
}

/// What a refresh cycle ended with, as delivered to every waiter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefreshOutcome {
    /// New bearer token, already persisted by the owner.
    Refreshed(String),
    /// The refresh failed and the session has been torn down.
    Failed(Arc<str>),
    /// The owner went away before the refresh settled. Nothing was torn down;
    /// waiters may try again.
    Abandoned,
}

/// Identifies a queued waiter.
pub type WaiterId = u64;

/// Result of trying to enter the gate.
#[derive(Debug)]
pub enum Admission {
    /// Gate was idle and is now refreshing; the caller must perform the refresh.
    Owner(RefreshOwnership),
    /// A refresh is already in flight; wait for its outcome.
    Waiter(Waiter),
}

/// Which waiters a release resolved, in the order it resolved them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReleaseReport {
    pub cycle: u64,
    pub released: Vec<WaiterId>,
}

/// Counters describing gate activity since creation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GateStats {
    pub cycles: u64,
    pub refreshed: u64,
    pub failed: u64,
    pub abandoned: u64,
    pub waiters_enqueued: u64,
    pub waiters_released: u64,
    pub waiters_timed_out: u64,
}

struct Pending {
    id: WaiterId,
    tx: oneshot::Sender<RefreshOutcome>,
}

struct GateInner {
    state: RefreshState,
    queue: VecDeque<Pending>,
    cycle: u64,
    next_waiter: WaiterId,
}

#[derive(Default)]
struct Counters {
    cycles: AtomicU64,
    refreshed: AtomicU64,
    failed: AtomicU64,
    abandoned: AtomicU64,
    waiters_enqueued: AtomicU64,
    waiters_released: AtomicU64,
    waiters_timed_out: AtomicU64,
}

/// Single-flight coordinator for credential refreshes.
pub struct RefreshGate {
    inner: Mutex<GateInner>,
    counters: Counters,
}

impl std::fmt::Debug for RefreshGate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("RefreshGate")
            .field("state", &inner.state)
            .field("queued", &inner.queue.len())
            .field("cycle", &inner.cycle)
            .finish()
    }
}

impl Default for RefreshGate {
    fn default() -> Self {
        Self {
            inner: Mutex::new(GateInner {
                state: RefreshState::Idle,
                queue: VecDeque::new(),
                cycle: 0,
                next_waiter: 0,
            }),
            counters: Counters::default(),
        }
    }
}

impl RefreshGate {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Enter the gate: become the refresh owner if idle, otherwise join the queue.
    pub fn try_become_owner(self: &Arc<Self>) -> Admission {
        let mut inner = self.inner.lock();
        match inner.state {
            RefreshState::Idle => {
                debug_assert!(inner.queue.is_empty(), "waiters queued while idle");
                inner.state = RefreshState::Refreshing;
                inner.cycle += 1;
                let cycle = inner.cycle;
                drop(inner);

                self.counters.cycles.fetch_add(1, Ordering::Relaxed);
                debug!(cycle, "Refresh gate: idle -> refreshing");

                Admission::Owner(RefreshOwnership {
                    gate: Some(Arc::clone(self)),
                    cycle,
                })
            }
            RefreshState::Refreshing => {
                let id = inner.next_waiter;
                inner.next_waiter += 1;
                let (tx, rx) = oneshot::channel();
                inner.queue.push_back(Pending { id, tx });
                let cycle = inner.cycle;
                let position = inner.queue.len();
                drop(inner);

                self.counters.waiters_enqueued.fetch_add(1, Ordering::Relaxed);
                debug!(cycle, waiter = id, position, "Refresh in flight, queued waiter");

                Admission::Waiter(Waiter {
                    gate: Arc::clone(self),
                    id,
                    cycle,
                    rx,
                })
            }
        }
    }

    /// Current state. Observational only; transitions go through
    /// [`try_become_owner`](Self::try_become_owner) and [`RefreshOwnership`].
    pub fn state(&self) -> RefreshState {
        self.inner.lock().state
    }

    /// Number of waiters currently queued.
    pub fn queued(&self) -> usize {
        self.inner.lock().queue.len()
    }

    pub fn stats(&self) -> GateStats {
        let c = &self.counters;
        GateStats {
            cycles: c.cycles.load(Ordering::Relaxed),
            refreshed: c.refreshed.load(Ordering::Relaxed),
            failed: c.failed.load(Ordering::Relaxed),
            abandoned: c.abandoned.load(Ordering::Relaxed),
            waiters_enqueued: c.waiters_enqueued.load(Ordering::Relaxed),
            waiters_released: c.waiters_released.load(Ordering::Relaxed),
            waiters_timed_out: c.waiters_timed_out.load(Ordering::Relaxed),
        }
    }

    /// Return to idle and resolve every waiter queued in this cycle.
    ///
    /// The queue is swapped out in the same critical section that flips the state,
    /// so anything enqueued afterwards belongs to the next cycle.
    fn finish(&self, cycle: u64, outcome: RefreshOutcome) -> ReleaseReport {
        let drained = {
            let mut inner = self.inner.lock();
            debug_assert_eq!(inner.state, RefreshState::Refreshing);
            debug_assert_eq!(inner.cycle, cycle);
            inner.state = RefreshState::Idle;
            std::mem::take(&mut inner.queue)
        };

        let counter = match &outcome {
            RefreshOutcome::Refreshed(_) => &self.counters.refreshed,
            RefreshOutcome::Failed(_) => &self.counters.failed,
            RefreshOutcome::Abandoned => &self.counters.abandoned,
        };
        counter.fetch_add(1, Ordering::Relaxed);

        let mut released = Vec::with_capacity(drained.len());
        for pending in drained {
            // A closed receiver means the waiter gave up; nothing to deliver.
            let _ = pending.tx.send(outcome.clone());
            released.push(pending.id);
        }
        self.counters
            .waiters_released
            .fetch_add(released.len() as u64, Ordering::Relaxed);

        debug!(cycle, waiters = released.len(), "Refresh gate: refreshing -> idle");

        ReleaseReport { cycle, released }
    }

    /// Remove a specific waiter. Returns `false` if it was already drained.
    fn remove_waiter(&self, id: WaiterId) -> bool {
        let mut inner = self.inner.lock();
        match inner.queue.iter().position(|p| p.id == id) {
            Some(index) => {
                inner.queue.remove(index);
                true
            }
            None => false,
        }
    }
}

/// Proof of being the refresh owner for one cycle.
///
/// Must be resolved with [`release`](Self::release). If dropped unresolved the
/// gate is released with [`RefreshOutcome::Abandoned`].
#[derive(Debug)]
pub struct RefreshOwnership {
    gate: Option<Arc<RefreshGate>>,
    cycle: u64,
}

impl RefreshOwnership {
    pub fn cycle(&self) -> u64 {
        self.cycle
    }

    /// Settle the cycle: gate back to idle, waiters released in FIFO order.
    pub fn release(mut self, outcome: RefreshOutcome) -> ReleaseReport {
        match self.gate.take() {
            Some(gate) => gate.finish(self.cycle, outcome),
            None => ReleaseReport {
                cycle: self.cycle,
                released: Vec::new(),
            },
        }
    }
}

impl Drop for RefreshOwnership {
    fn drop(&mut self) {
        if let Some(gate) = self.gate.take() {
            warn!(cycle = self.cycle, "Refresh owner dropped before settling, abandoning cycle");
            gate.finish(self.cycle, RefreshOutcome::Abandoned);
        }
    }
}

/// A caller queued behind an in-flight refresh.
#[derive(Debug)]
pub struct Waiter {
    gate: Arc<RefreshGate>,
    id: WaiterId,
    cycle: u64,
    rx: oneshot::Receiver<RefreshOutcome>,
}

impl Waiter {
    pub fn id(&self) -> WaiterId {
        self.id
    }

    pub fn cycle(&self) -> u64 {
        self.cycle
    }

    /// Suspend until the owner settles the cycle.
    ///
    /// With a timeout, expiry removes only this waiter from the queue and
    /// returns [`ClientError::WaitTimedOut`]; the owner's refresh carries on.
    pub async fn wait(mut self, timeout: Option<Duration>) -> Result<RefreshOutcome, ClientError> {
        let Some(timeout) = timeout else {
            return Ok((&mut self.rx).await.unwrap_or(RefreshOutcome::Abandoned));
        };

        match tokio::time::timeout(timeout, &mut self.rx).await {
            Ok(outcome) => Ok(outcome.unwrap_or(RefreshOutcome::Abandoned)),
            Err(_) => {
                if self.gate.remove_waiter(self.id) {
                    self.gate
                        .counters
                        .waiters_timed_out
                        .fetch_add(1, Ordering::Relaxed);
                    warn!(
                        cycle = self.cycle,
                        waiter = self.id,
                        ?timeout,
                        "Gave up waiting for credential refresh"
                    );
                    Err(ClientError::WaitTimedOut)
                } else {
                    // Already drained: the outcome is being delivered right now.
                    Ok((&mut self.rx).await.unwrap_or(RefreshOutcome::Abandoned))
                }
            }
        }
    }
}

impl Drop for Waiter {
    fn drop(&mut self) {
        // Cancelled before release: don't leave a dead entry in the queue.
        self.gate.remove_waiter(self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn owner(gate: &Arc<RefreshGate>) -> RefreshOwnership {
        match gate.try_become_owner() {
            Admission::Owner(o) => o,
            Admission::Waiter(_) => panic!("expected to become owner"),
        }
    }

    fn waiter(gate: &Arc<RefreshGate>) -> Waiter {
        match gate.try_become_owner() {
            Admission::Waiter(w) => w,
            Admission::Owner(_) => panic!("expected to be queued"),
        }
    }

    #[test]
    fn test_single_owner_per_cycle() {
        let gate = RefreshGate::new();
        assert_eq!(gate.state(), RefreshState::Idle);

        let o = owner(&gate);
        assert_eq!(gate.state(), RefreshState::Refreshing);

        let w1 = waiter(&gate);
        let w2 = waiter(&gate);
        assert_eq!(w1.cycle(), o.cycle());
        assert_eq!(gate.queued(), 2);

        o.release(RefreshOutcome::Refreshed("t2".into()));
        assert_eq!(gate.state(), RefreshState::Idle);
        assert_eq!(gate.queued(), 0);
        drop((w1, w2));

        let stats = gate.stats();
        assert_eq!(stats.cycles, 1);
        assert_eq!(stats.refreshed, 1);
        assert_eq!(stats.waiters_enqueued, 2);
    }

    #[tokio::test]
    async fn test_release_is_fifo() {
        let gate = RefreshGate::new();
        let o = owner(&gate);
        let a = waiter(&gate);
        let b = waiter(&gate);
        let c = waiter(&gate);
        let expected = vec![a.id(), b.id(), c.id()];

        let report = o.release(RefreshOutcome::Refreshed("t2".into()));
        assert_eq!(report.released, expected);

        for w in [a, b, c] {
            assert_eq!(
                w.wait(None).await.unwrap(),
                RefreshOutcome::Refreshed("t2".into())
            );
        }
    }

    #[tokio::test]
    async fn test_enqueue_after_release_starts_next_cycle() {
        let gate = RefreshGate::new();
        let first = owner(&gate);
        let early = waiter(&gate);
        first.release(RefreshOutcome::Failed("rejected".into()));

        // Gate is idle again, so the next caller owns a fresh cycle instead of
        // joining the one that just settled.
        let second = owner(&gate);
        assert_eq!(second.cycle(), 2);
        assert_eq!(
            early.wait(None).await.unwrap(),
            RefreshOutcome::Failed("rejected".into())
        );
        second.release(RefreshOutcome::Refreshed("t3".into()));
        assert_eq!(gate.stats().cycles, 2);
    }

    #[tokio::test]
    async fn test_dropped_owner_abandons_cycle() {
        let gate = RefreshGate::new();
        let o = owner(&gate);
        let w = waiter(&gate);

        drop(o);

        assert_eq!(gate.state(), RefreshState::Idle);
        assert_eq!(w.wait(None).await.unwrap(), RefreshOutcome::Abandoned);
        assert_eq!(gate.stats().abandoned, 1);
    }

    #[tokio::test]
    async fn test_owner_task_panic_does_not_wedge_gate() {
        let gate = RefreshGate::new();
        let o = owner(&gate);
        let w = waiter(&gate);

        fn explode(_ownership: RefreshOwnership) {
            panic!("refresh blew up");
        }

        let handle = tokio::spawn(async move { explode(o) });
        assert!(handle.await.is_err());

        assert_eq!(w.wait(None).await.unwrap(), RefreshOutcome::Abandoned);
        assert!(matches!(gate.try_become_owner(), Admission::Owner(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_waiter_timeout_removes_only_that_waiter() {
        let gate = RefreshGate::new();
        let o = owner(&gate);
        let slow = waiter(&gate);
        let patient = waiter(&gate);
        let patient_id = patient.id();

        let err = slow.wait(Some(Duration::from_millis(50))).await.unwrap_err();
        assert!(matches!(err, ClientError::WaitTimedOut));
        assert_eq!(gate.queued(), 1);
        assert_eq!(gate.state(), RefreshState::Refreshing);

        let report = o.release(RefreshOutcome::Refreshed("t2".into()));
        assert_eq!(report.released, vec![patient_id]);
        assert_eq!(
            patient.wait(Some(Duration::from_millis(50))).await.unwrap(),
            RefreshOutcome::Refreshed("t2".into())
        );
        assert_eq!(gate.stats().waiters_timed_out, 1);
    }

    #[test]
    fn test_dropped_waiter_leaves_queue() {
        let gate = RefreshGate::new();
        let _o = owner(&gate);
        let w = waiter(&gate);
        assert_eq!(gate.queued(), 1);
        drop(w);
        assert_eq!(gate.queued(), 0);
    }
}
