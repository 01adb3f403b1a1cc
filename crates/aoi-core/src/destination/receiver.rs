//! Destination-side per-frame processing: TIME_REQUEST replies, fragment
//! reassembly, and the atomic delivery update. Free functions operating on
//! a single `SourceState` so they're testable without a socket.

use crate::frame::{DataType, Frame};
use crate::source_state::{FragmentOutcome, SourceState};

/// What handling one inbound data frame produced, so the destination engine
/// knows whether to reply (TIME_REQUEST) or trigger an immediate POLL
/// (a delivery should schedule the next poll right away).
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FrameOutcome {
    /// A TIME_REQUEST needing an immediate TIME_RESPONSE echoing `t1`.
    TimeRequest { t1: f64 },
    /// A fragment was appended to the reassembly buffer; the message isn't
    /// sealed yet.
    Buffered,
    /// A message sealed and freshness advanced.
    Delivered,
    /// A message sealed but was stale and rejected by monotone freshness —
    /// the clamp in `apply_delivery` ran but didn't move
    /// `last_systime_received`.
    Stale,
    /// A fragment was dropped because its timestamp didn't match the
    /// message already being reassembled — an out-of-order or interleaved
    /// fragment. The in-progress reassembly is untouched and no delivery is
    /// sealed.
    FragmentRejected,
}

/// Process one inbound frame for the source it belongs to. `t_recv` is the
/// destination's receive time for this frame.
pub fn handle_frame(state: &mut SourceState, frame: Frame, t_recv: f64) -> FrameOutcome {
    if frame.data_type == DataType::TimeRequest {
        return FrameOutcome::TimeRequest { t1: frame.timestamp };
    }

    // Payload bytes are opaque — reassembly only cares about length, the
    // fragmentation flag, and the shared timestamp, never content.
    match state.append_fragment(&frame.payload, frame.is_fragmented, frame.timestamp) {
        FragmentOutcome::Buffered => return FrameOutcome::Buffered,
        FragmentOutcome::Rejected => return FrameOutcome::FragmentRejected,
        FragmentOutcome::Sealed(_) => {}
    }

    let before = state.last_systime_received;
    apply_delivery(state, t_recv, frame.timestamp);
    if state.last_systime_received > before {
        FrameOutcome::Delivered
    } else {
        FrameOutcome::Stale
    }
}

/// Module-level entry point for the atomic delivery update, re-exported at
/// the crate root. Thin wrapper over `SourceState`'s own
/// method so call sites that only have `(state, t_recv, frame_timestamp)`
/// don't need to know it's implemented there.
pub fn apply_delivery(state: &mut SourceState, t_recv: f64, frame_timestamp: f64) {
    state.apply_delivery(t_recv, frame_timestamp);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::DataType;

    fn frame(data_type: DataType, fragmented: bool, ts: f64, payload: Vec<u8>) -> Frame {
        Frame { is_fragmented: fragmented, data_type, source_id: None, timestamp: ts, payload }
    }

    #[test]
    fn time_request_yields_reply_outcome_without_touching_state() {
        let mut state = SourceState::new(0.0);
        let before = state.last_systime_received;
        let outcome = handle_frame(&mut state, frame(DataType::TimeRequest, false, 12.0, vec![]), 5.0);
        assert_eq!(outcome, FrameOutcome::TimeRequest { t1: 12.0 });
        assert_eq!(state.last_systime_received, before);
    }

    #[test]
    fn single_frame_delivery_advances_freshness() {
        let mut state = SourceState::new(0.0);
        let outcome = handle_frame(&mut state, frame(DataType::Position, false, 10.0, vec![1, 2, 3]), 10.5);
        assert_eq!(outcome, FrameOutcome::Delivered);
        assert_eq!(state.last_systime_received, 10.0);
    }

    #[test]
    fn fragments_buffer_until_the_unfragmented_one_seals() {
        let mut state = SourceState::new(0.0);
        assert_eq!(handle_frame(&mut state, frame(DataType::Image, true, 10.0, vec![1, 2]), 10.1), FrameOutcome::Buffered);
        assert_eq!(handle_frame(&mut state, frame(DataType::Image, true, 10.0, vec![3, 4]), 10.2), FrameOutcome::Buffered);
        assert_eq!(state.last_systime_received, 0.0, "no delivery until the final fragment arrives");
        assert_eq!(handle_frame(&mut state, frame(DataType::Image, false, 10.0, vec![5]), 10.3), FrameOutcome::Delivered);
        assert_eq!(state.last_systime_received, 10.0);
    }

    #[test]
    fn interleaved_fragment_is_dropped_and_does_not_seal() {
        // An out-of-order/interleaved fragment (simulated here by a
        // mismatched timestamp, since single-threaded sources never
        // actually emit one out of order) must be dropped without sealing
        // or advancing freshness, and must not corrupt the in-progress
        // reassembly of the real message.
        let mut state = SourceState::new(0.0);
        assert_eq!(handle_frame(&mut state, frame(DataType::Image, true, 10.0, vec![1, 2]), 10.1), FrameOutcome::Buffered);
        assert_eq!(
            handle_frame(&mut state, frame(DataType::Image, true, 20.0, vec![9, 9]), 10.15),
            FrameOutcome::FragmentRejected
        );
        assert_eq!(state.last_systime_received, 0.0);
        assert_eq!(handle_frame(&mut state, frame(DataType::Image, false, 10.0, vec![3]), 10.2), FrameOutcome::Delivered);
        assert_eq!(state.last_systime_received, 10.0);
    }

    #[test]
    fn stale_complete_message_is_rejected_monotone() {
        let mut state = SourceState::new(0.0);
        assert_eq!(handle_frame(&mut state, frame(DataType::General, false, 100.0, vec![1]), 100.0), FrameOutcome::Delivered);
        assert_eq!(handle_frame(&mut state, frame(DataType::General, false, 50.0, vec![2]), 100.5), FrameOutcome::Stale);
        assert_eq!(state.last_systime_received, 100.0);
    }
}
