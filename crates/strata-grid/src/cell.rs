//! Per-cell ownership-transfer lock.
//!
//! Every cell of the grid is a [`CellSlot`]: a payload plus a fair,
//! timeout-bounded exclusive lock. Acquiring the lock checks the payload out
//! into a [`CellGuard`]; the only way to write a new payload back is to hand
//! that guard to [`CellSlot::release`]. A guard cannot be cloned, built by
//! hand, or moved to another thread, so "only the owner may write" holds by
//! construction.
//!
//! # Fairness
//!
//! Blocking acquires take a ticket and are served strictly in ticket order.
//! [`CellSlot::try_get`] never jumps the queue: it fails while anyone is
//! waiting. A waiter that times out or is cancelled removes its ticket and
//! wakes the rest of the queue so the next ticket can proceed.
//!
//! # Abandoned guards
//!
//! Dropping a guard without releasing it puts the original payload back and
//! unlocks the cell. Early returns and panics inside a task therefore never
//! leave a cell locked.

use std::collections::VecDeque;
use std::marker::PhantomData;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use tracing::warn;

use crate::error::CellError;

/// How often a blocked waiter re-checks its [`Cancellation`].
const CANCEL_POLL: Duration = Duration::from_millis(10);

/// Shared shutdown signal observed by blocked cell waits.
///
/// Cloning yields another handle to the same flag.
#[derive(Debug, Clone, Default)]
pub struct Cancellation {
    flag: Arc<AtomicBool>,
}

impl Cancellation {
    /// Create a token that has not fired.
    pub fn new() -> Self {
        Self::default()
    }

    /// Fire the token. Every current and future wait observing it fails
    /// with [`CellError::Cancelled`].
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    /// Whether the token has fired.
    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

/// Lock state protected by the slot mutex.
#[derive(Debug)]
struct SlotState<T> {
    /// The payload, `None` while checked out by the owner.
    value: Option<T>,
    /// Thread currently holding the cell.
    owner: Option<thread::ThreadId>,
    /// Tickets of blocked waiters, front is served next.
    queue: VecDeque<u64>,
    /// Next ticket to hand out.
    next_ticket: u64,
}

impl<T> SlotState<T> {
    /// Check the payload out to `thread` if the cell is free.
    fn claim(&mut self, thread: thread::ThreadId) -> Option<T> {
        if self.owner.is_some() {
            return None;
        }
        let value = self.value.take()?;
        self.owner = Some(thread);
        Some(value)
    }

    fn abandon(&mut self, ticket: u64) {
        self.queue.retain(|&t| t != ticket);
    }
}

/// A single grid cell: payload plus exclusive lock.
#[derive(Debug)]
pub struct CellSlot<T> {
    index: usize,
    state: Mutex<SlotState<T>>,
    turnover: Condvar,
}

impl<T> CellSlot<T> {
    /// Create an unlocked slot holding `value`.
    pub fn new(index: usize, value: T) -> Self {
        Self {
            index,
            state: Mutex::new(SlotState {
                value: Some(value),
                owner: None,
                queue: VecDeque::new(),
                next_ticket: 0,
            }),
            turnover: Condvar::new(),
        }
    }

    /// Linear index of this cell in its grid.
    pub const fn index(&self) -> usize {
        self.index
    }

    /// The thread currently holding the cell, if any.
    pub fn owner(&self) -> Option<thread::ThreadId> {
        self.state.lock().owner
    }

    /// Whether some thread holds the cell.
    pub fn is_locked(&self) -> bool {
        self.state.lock().owner.is_some()
    }

    /// Number of threads blocked waiting for the cell.
    pub fn queued(&self) -> usize {
        self.state.lock().queue.len()
    }

    /// Acquire the cell without blocking.
    ///
    /// Returns `None` immediately if the cell is held or other threads are
    /// already queued for it.
    pub fn try_get(&self) -> Option<CellGuard<'_, T>> {
        let mut state = self.state.lock();
        if !state.queue.is_empty() {
            return None;
        }
        let value = state.claim(thread::current().id())?;
        Some(CellGuard::new(self, value))
    }

    /// Acquire the cell, waiting in FIFO order for at most `timeout`.
    ///
    /// # Errors
    ///
    /// - [`CellError::Starvation`] if the cell could not be acquired in time.
    /// - [`CellError::Cancelled`] if `cancel` fired before acquisition.
    /// - [`CellError::AlreadyHeld`] if the calling thread already owns the cell.
    pub fn wait_get(
        &self,
        timeout: Duration,
        cancel: &Cancellation,
    ) -> Result<CellGuard<'_, T>, CellError> {
        let me = thread::current().id();
        let started = Instant::now();
        let deadline = started.checked_add(timeout);

        let mut state = self.state.lock();
        if state.owner == Some(me) {
            return Err(CellError::AlreadyHeld {
                index: self.index,
                thread: describe_current_thread(),
            });
        }

        let ticket = state.next_ticket;
        state.next_ticket = state.next_ticket.wrapping_add(1);
        state.queue.push_back(ticket);

        loop {
            if cancel.is_cancelled() {
                state.abandon(ticket);
                self.turnover.notify_all();
                return Err(CellError::Cancelled {
                    index: self.index,
                    thread: describe_current_thread(),
                });
            }

            if state.queue.front() == Some(&ticket) {
                if let Some(value) = state.claim(me) {
                    state.queue.pop_front();
                    return Ok(CellGuard::new(self, value));
                }
            }

            let now = Instant::now();
            if deadline.is_some_and(|d| now >= d) {
                state.abandon(ticket);
                self.turnover.notify_all();
                let waited_ms =
                    u64::try_from(now.duration_since(started).as_millis()).unwrap_or(u64::MAX);
                warn!(
                    cell = self.index,
                    waited_ms,
                    thread = %describe_current_thread(),
                    "cell lock starvation"
                );
                return Err(CellError::Starvation {
                    index: self.index,
                    thread: describe_current_thread(),
                    waited_ms,
                });
            }

            let poll = now.checked_add(CANCEL_POLL);
            let wake_at = match (deadline, poll) {
                (Some(d), Some(p)) => d.min(p),
                (Some(d), None) => d,
                (None, Some(p)) => p,
                (None, None) => now,
            };
            self.turnover.wait_until(&mut state, wake_at);
        }
    }

    /// Store `value` and release the lock held by `guard`.
    ///
    /// # Errors
    ///
    /// Returns [`CellError::NotOwner`] if `guard` was issued by a different
    /// slot. This slot is left untouched and the foreign guard unlocks its own
    /// cell unchanged when it is dropped.
    pub fn release(&self, guard: CellGuard<'_, T>, value: T) -> Result<(), CellError> {
        if !std::ptr::eq(guard.slot, self) {
            return Err(CellError::NotOwner {
                index: self.index,
                thread: describe_current_thread(),
            });
        }
        guard.commit(value);
        Ok(())
    }

    fn put_back(&self, value: T) {
        let mut state = self.state.lock();
        debug_assert_eq!(state.owner, Some(thread::current().id()));
        state.value = Some(value);
        state.owner = None;
        self.turnover.notify_all();
    }
}

/// Proof of ownership of one cell.
///
/// Holds the checked-out payload. Consume it with [`CellSlot::release`] (or
/// [`CellGuard::release`]) to write a new payload; drop it to put the
/// original payload back.
#[derive(Debug)]
pub struct CellGuard<'a, T> {
    slot: &'a CellSlot<T>,
    value: Option<T>,
    /// Pins the guard to the acquiring thread.
    _not_send: PhantomData<*const ()>,
}

impl<'a, T> CellGuard<'a, T> {
    const fn new(slot: &'a CellSlot<T>, value: T) -> Self {
        Self {
            slot,
            value: Some(value),
            _not_send: PhantomData,
        }
    }

    /// Linear index of the owned cell.
    pub const fn index(&self) -> usize {
        self.slot.index
    }

    /// The payload as it was when the cell was acquired.
    pub const fn value(&self) -> &T {
        match &self.value {
            Some(value) => value,
            // `value` is only emptied by `commit`/`drop`, both of which
            // consume the guard.
            None => unreachable_payload(),
        }
    }

    /// Release the cell with a new payload.
    pub fn release(self, value: T) {
        self.commit(value);
    }

    /// Release the cell, keeping the payload it had when acquired.
    pub fn release_unchanged(self) {
        drop(self);
    }

    fn commit(mut self, value: T) {
        self.value = None;
        self.slot.put_back(value);
    }
}

impl<T> Drop for CellGuard<'_, T> {
    fn drop(&mut self) {
        if let Some(value) = self.value.take() {
            self.slot.put_back(value);
        }
    }
}

#[allow(clippy::panic)]
const fn unreachable_payload<'a, T>() -> &'a T {
    panic!("cell guard payload accessed after release")
}

/// Human-readable identity of the calling thread for error messages.
pub fn describe_current_thread() -> String {
    let current = thread::current();
    match current.name() {
        Some(name) => format!("{name} ({:?})", current.id()),
        None => format!("{:?}", current.id()),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::mpsc;

    use super::*;

    const LONG: Duration = Duration::from_secs(5);

    #[test]
    fn try_get_then_release_stores_value() {
        let slot = CellSlot::new(3, 10_u32);
        let guard = slot.try_get().unwrap();
        assert_eq!(*guard.value(), 10);
        assert_eq!(guard.index(), 3);
        assert!(slot.is_locked());
        assert_eq!(slot.owner(), Some(thread::current().id()));

        slot.release(guard, 11).unwrap();
        assert!(!slot.is_locked());
        assert_eq!(*slot.try_get().unwrap().value(), 11);
    }

    #[test]
    fn try_get_fails_while_held() {
        let slot = CellSlot::new(0, ());
        let _held = slot.try_get().unwrap();
        assert!(slot.try_get().is_none());
    }

    #[test]
    fn dropped_guard_restores_value() {
        let slot = CellSlot::new(0, String::from("granite"));
        {
            let _guard = slot.try_get().unwrap();
        }
        assert!(!slot.is_locked());
        assert_eq!(slot.try_get().unwrap().value(), "granite");
    }

    #[test]
    fn release_with_foreign_guard_is_not_owner() {
        let a = CellSlot::new(0, 1_u8);
        let b = CellSlot::new(1, 2_u8);
        let guard_a = a.try_get().unwrap();

        let err = b.release(guard_a, 9).unwrap_err();
        assert!(matches!(err, CellError::NotOwner { index: 1, .. }));

        // Neither slot was written; `a` was unlocked unchanged.
        assert_eq!(*a.try_get().unwrap().value(), 1);
        assert_eq!(*b.try_get().unwrap().value(), 2);
    }

    #[test]
    fn reentrant_wait_is_rejected() {
        let slot = CellSlot::new(7, 0_u8);
        let _held = slot.wait_get(LONG, &Cancellation::new()).unwrap();
        let err = slot.wait_get(LONG, &Cancellation::new()).unwrap_err();
        assert!(matches!(err, CellError::AlreadyHeld { index: 7, .. }));
    }

    #[test]
    fn contended_wait_starves_instead_of_hanging() {
        let slot = Arc::new(CellSlot::new(5, 0_u32));
        let (held_tx, held_rx) = mpsc::channel();
        let (done_tx, done_rx) = mpsc::channel::<()>();

        let holder = {
            let slot = Arc::clone(&slot);
            thread::spawn(move || {
                let guard = slot.try_get().unwrap();
                held_tx.send(()).unwrap();
                done_rx.recv().unwrap();
                slot.release(guard, 1).unwrap();
            })
        };

        held_rx.recv().unwrap();
        let started = Instant::now();
        let err = slot
            .wait_get(Duration::from_millis(50), &Cancellation::new())
            .unwrap_err();
        assert!(started.elapsed() >= Duration::from_millis(50));
        assert!(matches!(err, CellError::Starvation { index: 5, .. }));
        assert_eq!(slot.queued(), 0);

        done_tx.send(()).unwrap();
        holder.join().unwrap();
        assert_eq!(*slot.try_get().unwrap().value(), 1);
    }

    #[test]
    fn cancellation_aborts_wait_without_acquiring() {
        let slot = Arc::new(CellSlot::new(2, 0_u32));
        let cancel = Cancellation::new();
        let held = slot.try_get().unwrap();

        let waiter = {
            let slot = Arc::clone(&slot);
            let cancel = cancel.clone();
            thread::spawn(move || slot.wait_get(LONG, &cancel).map(|g| *g.value()))
        };

        while slot.queued() == 0 {
            thread::yield_now();
        }
        cancel.cancel();
        let result = waiter.join().unwrap();
        assert!(matches!(result, Err(CellError::Cancelled { index: 2, .. })));
        assert_eq!(slot.owner(), Some(thread::current().id()));
        drop(held);
    }

    #[test]
    fn mutual_exclusion_under_contention() {
        const THREADS: usize = 8;
        const ROUNDS: usize = 200;

        let slot = Arc::new(CellSlot::new(0, 0_usize));
        let holders = Arc::new(AtomicUsize::new(0));
        let violations = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..THREADS)
            .map(|_| {
                let slot = Arc::clone(&slot);
                let holders = Arc::clone(&holders);
                let violations = Arc::clone(&violations);
                thread::spawn(move || {
                    let cancel = Cancellation::new();
                    for _ in 0..ROUNDS {
                        let guard = slot.wait_get(LONG, &cancel).unwrap();
                        if holders.fetch_add(1, Ordering::SeqCst) != 0 {
                            violations.fetch_add(1, Ordering::SeqCst);
                        }
                        let next = *guard.value() + 1;
                        holders.fetch_sub(1, Ordering::SeqCst);
                        slot.release(guard, next).unwrap();
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(violations.load(Ordering::SeqCst), 0);
        assert_eq!(*slot.try_get().unwrap().value(), THREADS * ROUNDS);
    }

    #[test]
    fn waiters_are_served_in_arrival_order() {
        let slot = Arc::new(CellSlot::new(0, Vec::<usize>::new()));
        let held = slot.try_get().unwrap();

        let mut handles = Vec::new();
        for id in 0..4 {
            let slot_for_thread = Arc::clone(&slot);
            handles.push(thread::spawn(move || {
                let guard = slot_for_thread.wait_get(LONG, &Cancellation::new()).unwrap();
                let mut order = guard.value().clone();
                order.push(id);
                slot_for_thread.release(guard, order).unwrap();
            }));
            // Queue each waiter before starting the next.
            while slot.queued() <= id {
                thread::yield_now();
            }
        }

        drop(held);
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(*slot.try_get().unwrap().value(), vec![0, 1, 2, 3]);
    }
}
