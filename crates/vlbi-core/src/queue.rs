//! Bounded blocking FIFO queue with enable/disable and delayed-disable.
//!
//! Mirrors `bqueue_type`: a mutex + condvar guarding a `VecDeque`, a
//! registered-waiter counter so the destructor can wait until every blocked
//! thread has left before the queue goes away.

use std::collections::VecDeque;
use std::sync::{Condvar, Mutex};

struct State<T> {
    queue: VecDeque<T>,
    capacity: usize,
    enabled: bool,
    draining: bool,
    registered: usize,
}

/// A FIFO of capacity `N` with states `{disabled, enabled, draining}`.
///
/// `push` blocks while enabled, not draining, and full. `pop` blocks while
/// enabled and empty. Both return whether they succeeded; if the queue was
/// disabled (or finished draining) while a caller was waiting, it returns
/// failure rather than blocking forever.
pub struct BoundedQueue<T> {
    state: Mutex<State<T>>,
    not_full: Condvar,
    not_empty: Condvar,
    drained: Condvar,
}

impl<T> BoundedQueue<T> {
    pub fn new(capacity: usize) -> Self {
        BoundedQueue {
            state: Mutex::new(State {
                queue: VecDeque::with_capacity(capacity.min(1024)),
                capacity,
                enabled: true,
                draining: false,
                registered: 0,
            }),
            not_full: Condvar::new(),
            not_empty: Condvar::new(),
            drained: Condvar::new(),
        }
    }

    /// Blocks while `{enabled AND not draining AND size>=capacity}`. On
    /// wake: if still enabled and not draining, pushes and returns `Ok`;
    /// otherwise returns the item back in `Err`.
    pub fn push(&self, item: T) -> Result<(), T> {
        let mut st = self.state.lock().unwrap();
        st.registered += 1;
        let result = loop {
            if st.draining || !st.enabled {
                break Err(item);
            }
            if st.queue.len() < st.capacity {
                st.queue.push_back(item);
                break Ok(());
            }
            st = self.not_full.wait(st).unwrap();
        };
        st.registered -= 1;
        self.not_empty.notify_all();
        self.drained.notify_all();
        result
    }

    /// Non-blocking variant of [`Self::push`]: fails immediately if full,
    /// draining or disabled rather than waiting.
    pub fn try_push(&self, item: T) -> Result<(), T> {
        let mut st = self.state.lock().unwrap();
        if st.draining || !st.enabled || st.queue.len() >= st.capacity {
            return Err(item);
        }
        st.queue.push_back(item);
        self.not_empty.notify_one();
        Ok(())
    }

    /// Blocks while `{enabled AND empty}`. Returns `None` once the queue is
    /// fully disabled, or once draining and empty (which also flips the
    /// queue to fully disabled for subsequent calls).
    pub fn pop(&self) -> Option<T> {
        let mut st = self.state.lock().unwrap();
        st.registered += 1;
        let result = loop {
            if let Some(item) = st.queue.pop_front() {
                if st.draining && st.queue.is_empty() {
                    st.enabled = false;
                    st.draining = false;
                }
                break Some(item);
            }
            if st.draining || !st.enabled {
                st.enabled = false;
                st.draining = false;
                break None;
            }
            st = self.not_empty.wait(st).unwrap();
        };
        st.registered -= 1;
        self.not_full.notify_all();
        self.drained.notify_all();
        result
    }

    /// Disables both sides immediately, waking all waiters with failure.
    pub fn disable(&self) {
        let mut st = self.state.lock().unwrap();
        st.enabled = false;
        st.draining = false;
        self.not_full.notify_all();
        self.not_empty.notify_all();
    }

    /// Refuses further pushes but lets pops drain the queue; once empty,
    /// pop also starts failing.
    pub fn delayed_disable(&self) {
        let mut st = self.state.lock().unwrap();
        st.draining = true;
        self.not_full.notify_all();
    }

    /// Re-enables the queue, optionally resizing capacity (used by
    /// `resize_enable_push` for interchain queues).
    pub fn enable(&self, new_capacity: Option<usize>) {
        let mut st = self.state.lock().unwrap();
        st.enabled = true;
        st.draining = false;
        if let Some(c) = new_capacity {
            st.capacity = c;
        }
        self.not_full.notify_all();
        self.not_empty.notify_all();
    }

    pub fn len(&self) -> usize {
        self.state.lock().unwrap().queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_enabled(&self) -> bool {
        let st = self.state.lock().unwrap();
        st.enabled || st.draining
    }
}

impl<T> Drop for BoundedQueue<T> {
    fn drop(&mut self) {
        self.disable();
        let st = self.state.lock().unwrap();
        let _unused = self
            .drained
            .wait_while(st, |st| st.registered > 0)
            .unwrap();
    }
}
