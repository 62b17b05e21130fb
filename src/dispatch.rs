use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use tokio::time::Instant;

use crate::host::HostKey;

/// Rotation cursor and last-dispatch timestamp for one destination host.
#[derive(Debug)]
struct DispatchState {
    /// Index into the configured egress address pool
    cursor: usize,
    /// Logical time of the most recent dispatch.
    ///
    /// May lie in the future: a reservation is written before the caller
    /// actually sleeps, so concurrent arrivals queue behind it.
    last_dispatch: Instant,
}

/// The outcome of reserving a dispatch slot for a host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct DispatchDecision {
    /// How long the caller must sleep before dispatching
    pub(crate) wait: Duration,
    /// Which pool slot the dispatch uses (0 when the pool is empty)
    pub(crate) slot: usize,
}

/// Per-host round-robin cursors and last-dispatch timestamps.
///
/// This implements a reservation-based rate limiter rather than a blocking
/// one: `reserve` claims a future dispatch slot under the lock and returns
/// immediately; the caller performs the sleep outside all locks, so one
/// host's spacing never stalls requests to other hosts.
#[derive(Debug, Default)]
pub(crate) struct DispatchRegistry {
    states: Mutex<HashMap<HostKey, DispatchState>>,
}

impl DispatchRegistry {
    /// Reserve the next dispatch slot for `host`.
    ///
    /// `required_delay` is evaluated inside the critical section; it must
    /// only take leaf-level locks (the host delay registry and the
    /// configuration store qualify).
    ///
    /// First observation of a host occupies slot 0 without advancing the
    /// cursor and without any wait. On every later call the cursor advances
    /// round-robin; spacing is enforced only on a collision, i.e. when the
    /// advanced cursor lands on the slot it started from. Advancing by one
    /// can never land on the starting slot when at least two slots exist,
    /// so only pool sizes 0 and 1 are ever rate-limited by this rule.
    pub(crate) fn reserve<F>(
        &self,
        host: &HostKey,
        pool_len: usize,
        required_delay: F,
    ) -> DispatchDecision
    where
        F: FnOnce() -> Duration,
    {
        let mut states = self.states.lock().unwrap();
        let now = Instant::now();

        match states.entry(host.clone()) {
            Entry::Vacant(vacant) => {
                vacant.insert(DispatchState {
                    cursor: 0,
                    last_dispatch: now,
                });
                DispatchDecision {
                    wait: Duration::ZERO,
                    slot: 0,
                }
            }
            Entry::Occupied(mut occupied) => {
                let state = occupied.get_mut();
                let required = required_delay();

                let previous = state.cursor;
                if pool_len > 0 {
                    state.cursor = (state.cursor + 1) % pool_len;
                }

                let mut wait = Duration::ZERO;
                if state.cursor == previous && !required.is_zero() {
                    wait = if now < state.last_dispatch {
                        // An earlier caller reserved a slot in the future;
                        // queue a full interval behind it.
                        (state.last_dispatch - now) + required
                    } else {
                        required.saturating_sub(now - state.last_dispatch)
                    };
                }

                // Reserve optimistically, before anyone sleeps.
                state.last_dispatch = now + wait;

                DispatchDecision {
                    wait,
                    slot: state.cursor,
                }
            }
        }
    }
}
