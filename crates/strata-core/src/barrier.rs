//! Pacing barrier shared by all workers of one coordinator.
//!
//! Workers park here after a tick when they are paused or in step mode.
//! Unlike [`std::sync::Barrier`], nobody is released just because enough
//! threads arrived: the coordinator decides when a generation ends, either
//! unconditionally ([`TickBarrier::release`]) or only once every live worker
//! is parked ([`TickBarrier::release_if_all_waiting`]). A parked worker can
//! also leave on its own when its `leave` predicate turns true, which is how
//! `play()` and `kill()` reach a single worker without ending the generation
//! for everybody.
//!
//! The barrier is never used for startup; workers announce that they are
//! live through a separate channel.

use parking_lot::{Condvar, Mutex};

/// How a [`TickBarrier::wait`] call ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BarrierWait {
    /// The coordinator ended the generation.
    Released,
    /// The waiter's own `leave` predicate became true.
    Interrupted,
}

#[derive(Debug)]
struct BarrierState {
    /// Workers still able to park.
    parties: usize,
    /// Workers currently parked.
    waiting: usize,
    /// Bumped every time the coordinator releases the barrier.
    generation: u64,
}

/// Reusable rendezvous sized to the live worker count.
#[derive(Debug)]
pub struct TickBarrier {
    state: Mutex<BarrierState>,
    wakeup: Condvar,
}

impl TickBarrier {
    /// Create a barrier for `parties` workers.
    pub fn new(parties: usize) -> Self {
        Self {
            state: Mutex::new(BarrierState {
                parties,
                waiting: 0,
                generation: 0,
            }),
            wakeup: Condvar::new(),
        }
    }

    /// Park until the generation ends or `leave()` returns true.
    ///
    /// `leave` is evaluated with the barrier lock held, before every sleep.
    /// Whoever flips the state it reads must call [`TickBarrier::interrupt`]
    /// afterwards so the waiter re-evaluates it.
    pub fn wait<F>(&self, mut leave: F) -> BarrierWait
    where
        F: FnMut() -> bool,
    {
        let mut state = self.state.lock();
        let generation = state.generation;
        state.waiting = state.waiting.saturating_add(1);
        loop {
            if state.generation != generation {
                return BarrierWait::Released;
            }
            if leave() {
                state.waiting = state.waiting.saturating_sub(1);
                return BarrierWait::Interrupted;
            }
            self.wakeup.wait(&mut state);
        }
    }

    /// End the current generation, releasing every parked worker.
    ///
    /// Returns how many workers were released.
    pub fn release(&self) -> usize {
        let mut state = self.state.lock();
        Self::open(&mut state, &self.wakeup)
    }

    /// End the generation only if every live worker is parked.
    pub fn release_if_all_waiting(&self) -> bool {
        self.release_if_all_waiting_then(|| {})
    }

    /// Like [`TickBarrier::release_if_all_waiting`], running `prepare`
    /// under the barrier lock just before the generation ends.
    ///
    /// No waiter can re-evaluate its `leave` predicate while `prepare`
    /// runs, so state it sets is seen by every released worker.
    pub fn release_if_all_waiting_then<F>(&self, prepare: F) -> bool
    where
        F: FnOnce(),
    {
        let mut state = self.state.lock();
        if state.parties == 0 || state.waiting < state.parties {
            return false;
        }
        prepare();
        Self::open(&mut state, &self.wakeup);
        true
    }

    /// Wake every parked worker so it re-evaluates its `leave` predicate.
    pub fn interrupt(&self) {
        let _state = self.state.lock();
        self.wakeup.notify_all();
    }

    /// Remove one worker from the party count (the worker has exited).
    pub fn retire(&self) {
        let mut state = self.state.lock();
        state.parties = state.parties.saturating_sub(1);
    }

    /// Number of workers currently parked.
    pub fn waiting(&self) -> usize {
        self.state.lock().waiting
    }

    /// Number of workers that can still park.
    pub fn parties(&self) -> usize {
        self.state.lock().parties
    }

    fn open(state: &mut BarrierState, wakeup: &Condvar) -> usize {
        let released = state.waiting;
        state.waiting = 0;
        state.generation = state.generation.wrapping_add(1);
        wakeup.notify_all();
        released
    }
}
