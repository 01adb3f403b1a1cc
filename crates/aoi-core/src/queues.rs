//! Per-sensor dual queue at the source: LCFS for freshest updates, FCFS for
//! the fragments of whichever update is currently being drained onto the
//! wire.

use std::collections::VecDeque;

use crate::frame::Frame;
use crate::policy::Policy;

/// One sensor's outgoing queues. `fcfs` always drains first: a source
/// transmits a fragment only if `fcfs` is non-empty, otherwise the LCFS
/// tail, otherwise an empty beacon.
#[derive(Debug, Default)]
pub struct SourceQueues {
    /// Complete, not-yet-sent updates, freshest at the back. Draining takes
    /// the back and discards everything else — stale updates never overtake
    /// a fresher one.
    lcfs: VecDeque<Frame>,
    /// Fragments of the update currently being drained onto the wire, in
    /// emission order.
    fcfs: VecDeque<Frame>,
}

/// What a single POLL decision produced, so the caller can log/count it
/// without re-deriving which branch fired.
#[derive(Debug, PartialEq)]
pub enum Drained {
    Fragment(Frame),
    /// A complete update taken from the LCFS tail, possibly split into
    /// fragments pushed onto `fcfs` (only the first is returned here).
    FreshUpdate(Frame),
    /// Nothing queued; caller should synthesize an empty beacon.
    Empty,
}

impl SourceQueues {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enqueue a freshly generated update at the LCFS tail.
    pub fn push_fresh(&mut self, frame: Frame) {
        self.lcfs.push_back(frame);
    }

    pub fn has_fragments(&self) -> bool {
        !self.fcfs.is_empty()
    }

    pub fn has_fresh(&self) -> bool {
        !self.lcfs.is_empty()
    }

    /// Timestamp of the current LCFS tail (the freshest queued update), if
    /// any — used by property tests asserting LCFS freshness without
    /// mutating the queue.
    pub fn freshest_timestamp(&self) -> Option<f64> {
        self.lcfs.back().map(|f| f.timestamp)
    }

    /// Drain per the POLL ordering: fragment first, else LCFS tail
    /// (splitting into fragments if oversize and pushing the remainder onto
    /// `fcfs`), else empty. Does not itself construct an empty beacon —
    /// that needs a timestamp from the caller's clock.
    ///
    /// `max_payload` bounds a single frame's payload before it must be
    /// fragmented. `policy` decides whether taking the LCFS tail clears the
    /// rest of the LCFS (MAF) or leaves it (WiFresh/None). `offset` is the
    /// source's current clock-sync offset, applied once to the LCFS tail's
    /// timestamp before any fragmentation decision — so every fragment of a
    /// split update carries the same corrected timestamp, not a
    /// per-fragment-recomputed one.
    pub fn drain_for_poll(&mut self, policy: Policy, max_payload: usize, offset: f64) -> Drained {
        if let Some(fragment) = self.fcfs.pop_front() {
            return Drained::Fragment(fragment);
        }

        let Some(mut update) = self.lcfs.pop_back() else {
            return Drained::Empty;
        };
        if policy.clears_lcfs_on_drain() {
            self.lcfs.clear();
        }
        update.timestamp += offset;

        if update.payload.len() <= max_payload {
            return Drained::FreshUpdate(update);
        }

        let fragments = split_into_fragments(&update, max_payload);
        self.fcfs.extend(fragments);
        let first = self.fcfs.pop_front().expect("split always yields at least one fragment");
        Drained::FreshUpdate(first)
    }

    /// Oldest complete update or fragment, for push-mode (`Policy::None`)
    /// baselines that send unsolicited rather than waiting for a POLL —
    /// without removing it. A non-blocking transport's send can fail with
    /// would-block and must be retried without consuming; callers must peek,
    /// attempt the send, and only call `pop_oldest_for_push` once it
    /// actually succeeds.
    pub fn peek_oldest_for_push(&self) -> Option<&Frame> {
        self.fcfs.front().or_else(|| self.lcfs.front())
    }

    /// Remove the item `peek_oldest_for_push` just returned, after a
    /// successful send. Unlike `drain_for_poll`, this never fragments —
    /// push-mode sources send whatever is queued as-is.
    pub fn pop_oldest_for_push(&mut self) -> Option<Frame> {
        self.fcfs.pop_front().or_else(|| self.lcfs.pop_front())
    }
}

fn split_into_fragments(update: &Frame, max_payload: usize) -> Vec<Frame> {
    let chunks: Vec<&[u8]> = update.payload.chunks(max_payload.max(1)).collect();
    let last = chunks.len().saturating_sub(1);
    chunks
        .into_iter()
        .enumerate()
        .map(|(i, chunk)| Frame {
            is_fragmented: i != last,
            data_type: update.data_type,
            source_id: update.source_id,
            timestamp: update.timestamp,
            payload: chunk.to_vec(),
        })
        .collect()
}
