//! Per-device serialization token.
//!
//! A [`SerialToken`] owns the device handle. The only way to reach it is
//! through a [`TokenGuard`], so a command can never interleave with a
//! channel read on the same instrument. Waiters are granted in arrival
//! order; a waiter that gives up leaves the queue without reordering the
//! others.

use std::collections::VecDeque;
use std::ops::{Deref, DerefMut};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex, MutexGuard};
use serde::{Deserialize, Serialize};

/// Who currently holds a device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Holder {
    Sampler,
    Command,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", content = "holder", rename_all = "snake_case")]
pub enum TokenState {
    Idle,
    Held(Holder),
}

#[derive(Debug, Default)]
struct Queue {
    holder: Option<Holder>,
    waiting: VecDeque<u64>,
    next_ticket: u64,
}

impl Queue {
    fn can_take(&self, ticket: u64) -> bool {
        self.holder.is_none() && self.waiting.front() == Some(&ticket)
    }

    fn leave(&mut self, ticket: u64) {
        self.waiting.retain(|t| *t != ticket);
    }
}

pub struct SerialToken<T> {
    queue: Mutex<Queue>,
    granted: Condvar,
    resource: Mutex<T>,
}

impl<T> SerialToken<T> {
    pub fn new(resource: T) -> Self {
        Self {
            queue: Mutex::new(Queue::default()),
            granted: Condvar::new(),
            resource: Mutex::new(resource),
        }
    }

    fn enqueue(&self, queue: &mut Queue) -> u64 {
        let ticket = queue.next_ticket;
        queue.next_ticket += 1;
        queue.waiting.push_back(ticket);
        ticket
    }

    fn grant<'a>(&'a self, queue: &mut Queue, ticket: u64, who: Holder) -> TokenGuard<'a, T> {
        queue.leave(ticket);
        queue.holder = Some(who);
        TokenGuard {
            token: self,
            resource: Some(self.resource.lock()),
            holder: who,
        }
    }

    /// Wait as long as it takes for the device.
    pub fn acquire(&self, who: Holder) -> TokenGuard<'_, T> {
        let mut queue = self.queue.lock();
        let ticket = self.enqueue(&mut queue);
        while !queue.can_take(ticket) {
            self.granted.wait(&mut queue);
        }
        self.grant(&mut queue, ticket, who)
    }

    /// Wait at most `timeout`; `None` if the device was not granted in time.
    pub fn try_acquire_for(&self, who: Holder, timeout: Duration) -> Option<TokenGuard<'_, T>> {
        let deadline = Instant::now() + timeout;
        let mut queue = self.queue.lock();
        let ticket = self.enqueue(&mut queue);
        while !queue.can_take(ticket) {
            if self.granted.wait_until(&mut queue, deadline).timed_out() && !queue.can_take(ticket)
            {
                queue.leave(ticket);
                // The next waiter may now be at the front.
                self.granted.notify_all();
                return None;
            }
        }
        Some(self.grant(&mut queue, ticket, who))
    }

    pub fn state(&self) -> TokenState {
        match self.queue.lock().holder {
            Some(who) => TokenState::Held(who),
            None => TokenState::Idle,
        }
    }

    /// Number of waiters not yet granted.
    pub fn queue_len(&self) -> usize {
        self.queue.lock().waiting.len()
    }
}

/// Exclusive access to the device, released on drop.
pub struct TokenGuard<'a, T> {
    token: &'a SerialToken<T>,
    resource: Option<MutexGuard<'a, T>>,
    holder: Holder,
}

impl<T> TokenGuard<'_, T> {
    pub fn holder(&self) -> Holder {
        self.holder
    }
}

impl<T> Deref for TokenGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        // Only taken in drop.
        match &self.resource {
            Some(guard) => &**guard,
            None => unreachable!("token guard used after release"),
        }
    }
}

impl<T> DerefMut for TokenGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        match &mut self.resource {
            Some(guard) => &mut **guard,
            None => unreachable!("token guard used after release"),
        }
    }
}

impl<T> Drop for TokenGuard<'_, T> {
    fn drop(&mut self) {
        // Resource first, so the next holder never blocks on it.
        self.resource.take();
        let mut queue = self.token.queue.lock();
        queue.holder = None;
        drop(queue);
        self.token.granted.notify_all();
    }
}
