use std::collections::HashMap;
use std::sync::RwLock;
use std::time::Duration;

use crate::host::HostKey;

/// Per-destination-host overrides of minimum inter-request spacing.
///
/// Stored values only ever increase (max-merge): once a host has been slowed
/// down, a later call with a shorter delay does not speed it up again.
///
/// The registry's lock is strictly leaf-level. It is read from inside the
/// dispatch registry's critical section, so neither operation here may take
/// any other lock.
#[derive(Debug, Default)]
pub(crate) struct HostDelayRegistry {
    inner: RwLock<HashMap<HostKey, Duration>>,
}

impl HostDelayRegistry {
    /// Raise the minimum spacing for `host` to `delay`.
    ///
    /// A value below the currently stored one is ignored.
    pub(crate) fn set(&self, host: HostKey, delay: Duration) {
        let mut delays = self.inner.write().unwrap();
        let stored = delays.entry(host).or_insert(Duration::ZERO);
        if delay > *stored {
            *stored = delay;
        }
    }

    /// The stored spacing for `host`, if any override exists.
    ///
    /// Falling back to the configured default is the caller's job; doing it
    /// here would require reading the configuration under this lock.
    pub(crate) fn get(&self, host: &HostKey) -> Option<Duration> {
        self.inner.read().unwrap().get(host).copied()
    }
}
