use serde::{Deserialize, Serialize};

/// Point-in-time view of a queue's counters.
///
/// The two counters are read independently, so under concurrent use the
/// snapshot is approximate.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStats {
    pub pushed: u64,
    pub popped: u64,
}

impl QueueStats {
    /// Items pushed but not yet popped, as far as this snapshot can tell.
    pub fn approx_len(&self) -> u64 {
        self.pushed.saturating_sub(self.popped)
    }
}
