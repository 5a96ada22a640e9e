use std::fmt::{Display, Formatter};
use bytes::Bytes;
use rustc_hash::FxHashMap;
use tokio::task::JoinHandle;

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct TimerId(u64);

impl Display for TimerId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "T{}", self.0)
    }
}

/// What has to happen for a retransmission timer's segment to count as acknowledged
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum RetransmitTarget {
    /// handshake segment: acknowledged once the connection's own sequence number reaches
    ///  `next_sequence_no`
    Handshake { next_sequence_no: i32 },
    /// data segment: acknowledged once the peer's cumulative ack is above `sequence_no`
    Data { sequence_no: i32 },
}

/// A segment awaiting acknowledgement, together with the task that will post its next timeout
pub struct RetransmitTimer {
    pub message: Bytes,
    pub target: RetransmitTarget,
    timeout_handle: JoinHandle<()>,
}

impl Drop for RetransmitTimer {
    fn drop(&mut self) {
        self.timeout_handle.abort();
    }
}

impl RetransmitTimer {
    pub fn new(message: Bytes, target: RetransmitTarget, timeout_handle: JoinHandle<()>) -> RetransmitTimer {
        RetransmitTimer {
            message,
            target,
            timeout_handle,
        }
    }

    pub fn rearm(&mut self, timeout_handle: JoinHandle<()>) {
        self.timeout_handle.abort();
        self.timeout_handle = timeout_handle;
    }
}

/// A connection's set of pending retransmission timers. Removing a timer from the set retires
///  it, i.e. its pending timeout (if any) is cancelled.
#[derive(Default)]
pub struct RetransmitTimers {
    timers: FxHashMap<TimerId, RetransmitTimer>,
    next_id: u64,
}

impl RetransmitTimers {
    pub fn next_id(&mut self) -> TimerId {
        let result = TimerId(self.next_id);
        self.next_id += 1;
        result
    }

    pub fn insert(&mut self, id: TimerId, timer: RetransmitTimer) {
        self.timers.insert(id, timer);
    }

    pub fn get(&self, id: TimerId) -> Option<&RetransmitTimer> {
        self.timers.get(&id)
    }

    pub fn get_mut(&mut self, id: TimerId) -> Option<&mut RetransmitTimer> {
        self.timers.get_mut(&id)
    }

    pub fn retire(&mut self, id: TimerId) -> bool {
        self.timers.remove(&id).is_some()
    }

    /// returns the number of retired timers
    pub fn retire_matching(&mut self, predicate: impl Fn(&RetransmitTarget) -> bool) -> usize {
        let len_before = self.timers.len();
        self.timers.retain(|_, timer| !predicate(&timer.target));
        len_before - self.timers.len()
    }

    pub fn retire_all(&mut self) {
        self.timers.clear();
    }

    pub fn len(&self) -> usize {
        self.timers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.timers.is_empty()
    }

    pub fn contains_target(&self, target: RetransmitTarget) -> bool {
        self.timers.values().any(|t| t.target == target)
    }
}
