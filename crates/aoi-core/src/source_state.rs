//! Destination-side per-source bookkeeping: freshness, poll/receipt windows,
//! the WiFresh weight, and the age-integration accumulators.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering::Relaxed};

/// Lifecycle states a destination tracks per source. Transitions are
/// monotonic — no back-edges.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceLifecycle {
    New,
    Synced,
    Active,
    Draining,
    Closed,
}

impl SourceLifecycle {
    /// Whether `next` is a legal forward transition from `self`. Staying in
    /// the same state is always legal (re-entrant calls don't need to track
    /// "did we already transition").
    fn allows(self, next: SourceLifecycle) -> bool {
        use SourceLifecycle::*;
        if self == next {
            return true;
        }
        matches!(
            (self, next),
            (New, Synced) | (New, Active) | (Synced, Active) | (Active, Draining) | (Draining, Closed)
        )
    }
}

/// Result of feeding one frame's payload into the reassembly buffer.
#[derive(Debug, Clone, PartialEq)]
pub enum FragmentOutcome {
    /// Appended; the message isn't sealed yet.
    Buffered,
    /// The unfragmented tail arrived; this is the complete message.
    Sealed(Vec<u8>),
    /// Dropped: its timestamp didn't match what's already buffered, so it
    /// belongs to a different, interleaved message. The existing buffer is
    /// left untouched.
    Rejected,
}

/// Per-(source, data_type) destination state, keyed externally by
/// [`crate::SourceKey`].
#[derive(Debug)]
pub struct SourceState {
    lifecycle: SourceLifecycle,

    /// Maximum corrected source-timestamp delivered for any complete update.
    pub last_systime_received: f64,
    /// Wall-time elapsed between the last delivery's receipt and its
    /// source-stamp — an estimate of head-of-line service delay.
    pub approx_age_hol: f64,

    /// Reassembly buffer for in-flight fragments of the next complete
    /// message.
    fragments: Vec<u8>,
    /// Timestamp every fragment currently in `fragments` must share — every
    /// fragment of one update carries the same, original timestamp. A
    /// fragment arriving with a different timestamp belongs to some other,
    /// interleaved message and would corrupt the buffer if appended; it is
    /// dropped instead. `None` when the buffer is empty.
    fragment_timestamp: Option<f64>,

    /// Sliding windows of event times, front-popped on expiry for amortized
    /// O(1) maintenance.
    time_polls: VecDeque<f64>,
    time_receipts: VecDeque<f64>,

    /// Age-integration accumulators.
    last_recorded_age: f64,
    last_received_time: f64,
    total_weighted_age_area: f64,

    /// Count of frames dropped for this source (malformed headers that
    /// could be attributed, or out-of-order fragments that prevented a
    /// seal).
    dropped: AtomicU64,
}

impl SourceState {
    /// `now` seeds `last_systime_received`, `last_received_time`, and the
    /// implicit start of the age integral for a newly tracked source.
    pub fn new(now: f64) -> Self {
        Self {
            lifecycle: SourceLifecycle::New,
            last_systime_received: now,
            approx_age_hol: 0.0,
            fragments: Vec::new(),
            fragment_timestamp: None,
            time_polls: VecDeque::new(),
            time_receipts: VecDeque::new(),
            last_recorded_age: 0.0,
            last_received_time: now,
            total_weighted_age_area: 0.0,
            dropped: AtomicU64::new(0),
        }
    }

    pub fn lifecycle(&self) -> SourceLifecycle {
        self.lifecycle
    }

    /// Advance the lifecycle state. Panics in debug builds on an illegal
    /// back-edge — those indicate a bug in the destination engine, not a
    /// recoverable runtime condition.
    pub fn transition(&mut self, next: SourceLifecycle) {
        debug_assert!(
            self.lifecycle.allows(next),
            "illegal source lifecycle transition {:?} -> {:?}",
            self.lifecycle,
            next
        );
        self.lifecycle = next;
    }

    /// Force the lifecycle directly to `Closed`, bypassing the monotonic
    /// transition table. Used only at shutdown, where every tracked source
    /// must be finalized regardless of which state it happened to be in
    /// when the run timer expired.
    pub fn force_close(&mut self) {
        self.lifecycle = SourceLifecycle::Closed;
    }

    pub fn record_poll(&mut self, now: f64) {
        self.time_polls.push_back(now);
    }

    pub fn record_receipt(&mut self, now: f64) {
        self.time_receipts.push_back(now);
    }

    pub fn note_dropped(&self) {
        self.dropped.fetch_add(1, Relaxed);
    }

    pub fn dropped_count(&self) -> u64 {
        self.dropped.load(Relaxed)
    }

    /// Expire window entries older than `window_period` relative to `now`.
    /// Must be called before weight computation.
    pub fn expire_before(&mut self, now: f64, window_period: f64) {
        let cutoff = now - window_period;
        while matches!(self.time_polls.front(), Some(&t) if t < cutoff) {
            self.time_polls.pop_front();
        }
        while matches!(self.time_receipts.front(), Some(&t) if t < cutoff) {
            self.time_receipts.pop_front();
        }
    }

    /// WiFresh index `p * Δ²`. Caller must have
    /// called `expire_before` first so the windows reflect the trailing
    /// period. `p` is Laplace-smoothed so a never-polled source starts at
    /// `p = 1` rather than a division by zero.
    pub fn wifresh_weight(&self, now: f64) -> f64 {
        let p = (self.time_receipts.len() + 1) as f64 / (self.time_polls.len() + 1) as f64;
        let delta = now - self.last_systime_received - self.approx_age_hol;
        p * delta * delta
    }

    /// Potential age reduction `Δ`, exposed separately so tests (and the
    /// well-formedness property `w = 0 iff Δ <= 0`) can check its sign
    /// without re-deriving the weight formula.
    pub fn potential_age_reduction(&self, now: f64) -> f64 {
        now - self.last_systime_received - self.approx_age_hol
    }

    /// Append `bytes` to the reassembly buffer; returns the sealed message
    /// and clears the buffer when `is_fragmented` is false. `timestamp` is
    /// the frame's own (already clock-corrected) stamp — checked against
    /// whatever is already buffered so an out-of-order or interleaved
    /// fragment is dropped and counted instead of silently corrupting the
    /// in-progress reassembly.
    pub fn append_fragment(&mut self, bytes: &[u8], is_fragmented: bool, timestamp: f64) -> FragmentOutcome {
        if let Some(expected) = self.fragment_timestamp {
            if timestamp != expected {
                self.note_dropped();
                return FragmentOutcome::Rejected;
            }
        }

        self.fragments.extend_from_slice(bytes);
        if is_fragmented {
            self.fragment_timestamp = Some(timestamp);
            FragmentOutcome::Buffered
        } else {
            self.fragment_timestamp = None;
            FragmentOutcome::Sealed(std::mem::take(&mut self.fragments))
        }
    }

    /// Atomic delivery update for a sealed message. `t_recv`
    /// is the destination's receive time; `frame_timestamp` is the
    /// (already clock-corrected, at the source) stamp carried by the frame.
    /// Clamps `t_src` to never precede `t_recv`, preventing negative age
    /// from an unsynchronized or lagging source clock. No-ops if the
    /// delivery isn't actually fresher than what's already recorded
    /// (monotone freshness).
    pub fn apply_delivery(&mut self, t_recv: f64, frame_timestamp: f64) {
        let t_src = frame_timestamp.max(t_recv);
        if t_src <= self.last_systime_received {
            return;
        }

        self.close_trapezoid_to(t_recv);
        self.last_recorded_age = t_recv - t_src;
        self.last_systime_received = t_src;
        self.record_receipt(t_recv);
        // Update approx_age_hol only on an actual freshness advance, not
        // unconditionally, so a stale/rejected delivery never perturbs the
        // scheduler's estimate.
        self.approx_age_hol = t_recv - t_src;
    }

    /// Close the age-area trapezoid up to `t`, folding it into the running
    /// total and advancing `last_received_time`. Shared by `apply_delivery`
    /// and shutdown finalization (`age_meter`) so the two call sites can't
    /// drift apart.
    pub fn close_trapezoid_to(&mut self, t: f64) {
        let area = (self.last_recorded_age + (t - self.last_systime_received)) * (t - self.last_received_time) / 2.0;
        self.total_weighted_age_area += area;
        self.last_received_time = t;
    }

    pub fn total_weighted_age_area(&self) -> f64 {
        self.total_weighted_age_area
    }

    pub fn time_polls_len(&self) -> usize {
        self.time_polls.len()
    }

    pub fn time_receipts_len(&self) -> usize {
        self.time_receipts.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn monotone_freshness_rejects_regression() {
        let mut s = SourceState::new(0.0);
        s.apply_delivery(5.0, 10.0);
        assert_eq!(s.last_systime_received, 10.0);
        s.apply_delivery(6.0, 3.0); // stale, must be ignored
        assert_eq!(s.last_systime_received, 10.0);
        s.apply_delivery(20.0, 15.0);
        assert_eq!(s.last_systime_received, 15.0);
    }

    #[test]
    fn negative_age_is_clamped() {
        let mut s = SourceState::new(0.0);
        // Frame timestamp far in the future of the receive time (bad clock).
        s.apply_delivery(1.0, 100.0);
        assert_eq!(s.last_systime_received, 100.0);
        assert_eq!(s.last_recorded_age, 1.0 - 100.0); // age can be briefly negative here...
        // ...but a subsequent real-time delivery still can't go backwards:
        s.apply_delivery(2.0, 50.0);
        assert_eq!(s.last_systime_received, 100.0, "50.0 < 100.0, must be rejected");
    }

    #[test]
    fn never_polled_source_has_laplace_p_one() {
        let s = SourceState::new(0.0);
        // p = (0+1)/(0+1) = 1 exactly when no polls or receipts have happened.
        let delta = s.potential_age_reduction(0.0);
        assert_eq!(s.wifresh_weight(0.0), delta * delta);
    }

    #[test]
    fn wifresh_weight_nonnegative_and_zero_iff_delta_nonpositive() {
        let mut s = SourceState::new(0.0);
        s.apply_delivery(5.0, 5.0);
        assert!(s.wifresh_weight(5.0) >= 0.0);
        assert_eq!(s.potential_age_reduction(5.0), 0.0);
        assert_eq!(s.wifresh_weight(5.0), 0.0);

        let w = s.wifresh_weight(100.0);
        assert!(w > 0.0);
        assert!(s.potential_age_reduction(100.0) > 0.0);
    }

    #[test]
    fn window_expiry_is_front_popping() {
        let mut s = SourceState::new(0.0);
        s.record_poll(0.0);
        s.record_poll(0.2);
        s.record_poll(0.6);
        s.expire_before(0.6, 0.5);
        assert_eq!(s.time_polls_len(), 1, "only the 0.6 entry should survive a 0.5s window at now=0.6");
    }

    #[test]
    fn fragment_reassembly_seals_on_unfragmented_flag() {
        let mut s = SourceState::new(0.0);
        assert_eq!(s.append_fragment(&[1, 2], true, 5.0), FragmentOutcome::Buffered);
        assert_eq!(s.append_fragment(&[3, 4], true, 5.0), FragmentOutcome::Buffered);
        assert_eq!(s.append_fragment(&[5], false, 5.0), FragmentOutcome::Sealed(vec![1, 2, 3, 4, 5]));
    }

    #[test]
    fn interleaved_fragment_with_different_timestamp_is_rejected() {
        // A mis-ordered/interleaved fragment belonging to a different
        // message must be dropped, not appended, and must not disturb the
        // in-progress reassembly.
        let mut s = SourceState::new(0.0);
        assert_eq!(s.append_fragment(&[1, 2], true, 5.0), FragmentOutcome::Buffered);
        assert_eq!(s.append_fragment(&[9, 9], true, 6.0), FragmentOutcome::Rejected);
        assert_eq!(s.dropped_count(), 1);
        // The original message still seals correctly afterward.
        assert_eq!(s.append_fragment(&[3], false, 5.0), FragmentOutcome::Sealed(vec![1, 2, 3]));
    }

    #[test]
    fn lifecycle_forward_transitions_only() {
        let mut s = SourceState::new(0.0);
        assert_eq!(s.lifecycle(), SourceLifecycle::New);
        s.transition(SourceLifecycle::Active);
        s.transition(SourceLifecycle::Draining);
        s.transition(SourceLifecycle::Closed);
        assert_eq!(s.lifecycle(), SourceLifecycle::Closed);
    }

    #[test]
    #[should_panic]
    fn lifecycle_back_edge_panics_in_debug() {
        let mut s = SourceState::new(0.0);
        s.transition(SourceLifecycle::Active);
        s.transition(SourceLifecycle::New);
    }
}
