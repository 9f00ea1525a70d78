//! Delta-based CPU utilization and the handle used to share it.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use crate::counters::CounterSnapshot;

/// Busy percentage between two snapshots, or `None` when the pair carries no
/// new information.
///
/// A zero or negative total delta means the counters did not advance (or went
/// backwards, e.g. after a degraded read), so there is nothing to publish.
/// The result is `floor(100 * busy / total)` in integer arithmetic and never
/// exceeds 100.
pub fn compute_utilization(previous: CounterSnapshot, current: CounterSnapshot) -> Option<u32> {
    let delta_total = current.total.checked_sub(previous.total)?;
    if delta_total == 0 {
        return None;
    }
    let delta_idle = current.idle.checked_sub(previous.idle)?;
    let busy = delta_total.saturating_sub(delta_idle);

    let percent = (u128::from(busy) * 100) / u128::from(delta_total);
    Some(percent as u32)
}

/// Most recently published utilization, shared between one sampler and any
/// number of gates.
///
/// Clones point at the same word. Reads are a single atomic load and never
/// observe a value that was not fully published.
#[derive(Clone, Debug, Default)]
pub struct SharedUtilization {
    percent: Arc<AtomicU32>,
}

impl SharedUtilization {
    /// New handle starting at 0%.
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait-free read of the last published value.
    #[inline]
    pub fn load(&self) -> u32 {
        self.percent.load(Ordering::Acquire)
    }

    /// Publish a new value. Only the sampler owning this handle should call this.
    #[inline]
    pub fn publish(&self, percent: u32) {
        self.percent.store(percent, Ordering::Release);
    }

    /// Whether two handles observe the same shared word.
    pub fn same_as(&self, other: &SharedUtilization) -> bool {
        Arc::ptr_eq(&self.percent, &other.percent)
    }
}
