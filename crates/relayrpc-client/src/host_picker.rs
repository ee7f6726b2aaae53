use relayrpc_common::Host;
use std::sync::atomic::{AtomicI32, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::health::HealthGate;

/// Round-robin selection over explicitly supplied direct hosts.
///
/// One picker is shared by every call made through a client, so successive
/// calls start their scan at successive positions and load spreads even when
/// each call carries its own candidate list.
#[derive(Debug, Default)]
pub struct HostPicker {
    counter: AtomicI32,
}

impl HostPicker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts the counter at `seed`.
    pub fn with_seed(seed: i32) -> Self {
        Self {
            counter: AtomicI32::new(seed),
        }
    }

    pub fn counter(&self) -> i32 {
        self.counter.load(Ordering::Relaxed)
    }

    /// Picks the first live candidate, scanning from the round-robin start.
    ///
    /// Returns `None` when `candidates` is empty or every host is down.
    pub fn pick(&self, candidates: &[Host], gate: &dyn HealthGate) -> Option<Host> {
        if candidates.is_empty() {
            return None;
        }

        let start = self.next_index() as usize % candidates.len();
        (0..candidates.len())
            .map(|offset| &candidates[(start + offset) % candidates.len()])
            .find(|host| !gate.is_down(host))
            .cloned()
    }

    /// Advances the counter; never negative.
    fn next_index(&self) -> i32 {
        let index = self.counter.fetch_add(1, Ordering::SeqCst).wrapping_add(1);
        if index >= 0 {
            return index;
        }

        // Overflowed: restart from a small clock-derived value
        self.counter.store(reseed_value(), Ordering::SeqCst);
        let index = self.counter.fetch_add(1, Ordering::SeqCst).wrapping_add(1);
        // A concurrent overflow could in theory land here negative again
        index.max(0)
    }
}

fn reseed_value() -> i32 {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.subsec_nanos())
        .unwrap_or(0);
    (nanos & 0xff) as i32
}
