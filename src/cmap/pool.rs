//! A pool of established connections to one server address.
//!
//! Checkout blocks until an idle connection is available, a new one can be opened under
//! `max_pool_size`, or `wait_queue_timeout` elapses. Connections are handed out LIFO (the
//! most recently returned one first) since a recently-used socket is the one least likely to
//! have been closed by an idle server-side timeout.

use std::{
    sync::{Condvar, Mutex},
    time::{Duration, Instant},
};

use crate::{
    cmap::{self, conn::Connection},
    error::{Error, Result},
    options::{ClientOptions, ServerAddress},
};

const DEFAULT_MAX_POOL_SIZE: u32 = 100;

struct Idle {
    conn: Connection,
    generation: u32,
    returned_at: Instant,
}

struct State {
    idle: Vec<Idle>,
    total: u32,
    generation: u32,
}

/// A pool of connections to a single [`ServerAddress`], shared by every thread issuing
/// operations against that server.
pub(crate) struct Pool {
    address: ServerAddress,
    options: ClientOptions,
    max_pool_size: u32,
    state: Mutex<State>,
    available: Condvar,
}

impl Pool {
    pub(crate) fn new(address: ServerAddress, options: ClientOptions) -> Self {
        let max_pool_size = options.max_pool_size.unwrap_or(DEFAULT_MAX_POOL_SIZE);
        Self {
            address,
            options,
            max_pool_size,
            state: Mutex::new(State {
                idle: Vec::new(),
                total: 0,
                generation: 0,
            }),
            available: Condvar::new(),
        }
    }

    /// Checks out a ready connection, opening a new one if the pool has headroom, or blocking
    /// until another thread checks one in. Connections from a stale generation (left over from
    /// a `clear()`) or that have sat idle past `max_idle_time` are closed rather than reused.
    pub(crate) fn check_out(&self) -> Result<Connection> {
        let start = Instant::now();
        let mut state = self.state.lock().unwrap();

        loop {
            let current_generation = state.generation;
            while let Some(idle) = state.idle.pop() {
                if idle.generation != current_generation {
                    state.total -= 1;
                    continue;
                }
                if let Some(max_idle) = self.options.max_idle_time {
                    if idle.returned_at.elapsed() >= max_idle {
                        state.total -= 1;
                        continue;
                    }
                }
                return Ok(idle.conn);
            }

            if state.total < self.max_pool_size {
                state.total += 1;
                let generation = state.generation;
                drop(state);
                return cmap::establish(&self.address, &self.options)
                    .map(|(conn, _reply)| conn)
                    .map_err(|e| {
                        let mut state = self.state.lock().unwrap();
                        if state.generation == generation {
                            state.total -= 1;
                        }
                        e
                    });
            }

            let wait_queue_timeout = self.options.wait_queue_timeout;
            match wait_queue_timeout {
                Some(timeout) => {
                    let elapsed = start.elapsed();
                    if elapsed >= timeout {
                        return Err(Error::connection_checkout_timeout(self.address.to_string()));
                    }
                    let (guard, timed_out) = self
                        .available
                        .wait_timeout(state, timeout - elapsed)
                        .unwrap();
                    state = guard;
                    if timed_out.timed_out() && state.idle.is_empty() && state.total >= self.max_pool_size {
                        return Err(Error::connection_checkout_timeout(self.address.to_string()));
                    }
                }
                None => {
                    state = self.available.wait(state).unwrap();
                }
            }
        }
    }

    /// Returns a connection to the pool for reuse, or drops it (decrementing the pool's total)
    /// if it belongs to a generation that's since been cleared.
    pub(crate) fn check_in(&self, conn: Connection) {
        let mut state = self.state.lock().unwrap();
        let generation = state.generation;
        state.idle.push(Idle {
            conn,
            generation,
            returned_at: Instant::now(),
        });
        drop(state);
        self.available.notify_one();
    }

    /// Drops a connection that was checked out but must not be reused (e.g. after a network
    /// error), freeing its slot in `total`.
    pub(crate) fn discard(&self, _conn: Connection) {
        let mut state = self.state.lock().unwrap();
        state.total = state.total.saturating_sub(1);
        drop(state);
        self.available.notify_one();
    }

    /// Invalidates every connection currently idle or checked out, forcing fresh ones to be
    /// established on next checkout. Called when an operation on this address fails in a way
    /// that casts doubt on every link to it.
    pub(crate) fn clear(&self) {
        let mut state = self.state.lock().unwrap();
        state.generation += 1;
        state.total -= state.idle.len() as u32;
        state.idle.clear();
    }
}
