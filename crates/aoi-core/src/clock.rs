//! Symmetric clock-synchronization subprotocol. The destination is always
//! the time authority: it never keeps an offset of its own, only replies
//! with its clock and the echoed request timestamp.

/// A single smoothed offset, exponentially averaged with factor `alpha`.
/// Added to every outbound timestamp at the source.
#[derive(Debug, Clone, Copy)]
pub struct ClockOffset {
    value: f64,
    alpha: f64,
}

impl ClockOffset {
    pub fn new(alpha: f64) -> Self {
        Self { value: 0.0, alpha }
    }

    pub fn value(&self) -> f64 {
        self.value
    }

    /// Fold in one instantaneous offset sample: `offset := alpha*theta +
    /// (1-alpha)*offset`.
    pub fn update(&mut self, theta: f64) {
        self.value = self.alpha * theta + (1.0 - self.alpha) * self.value;
    }

    pub fn apply(&self, timestamp: f64) -> f64 {
        timestamp + self.value
    }
}

/// Source-side driver of the symmetric exchange: fire `sync_rounds`
/// TIME_REQUESTs every `sync_interval` seconds, and fold each
/// TIME_RESPONSE into the smoothed offset.
#[derive(Debug)]
pub struct SourceClockSync {
    pub offset: ClockOffset,
    pub sync_interval: f64,
    pub sync_rounds: u32,
    next_sync: f64,
}

impl SourceClockSync {
    pub fn new(alpha: f64, sync_interval: f64, sync_rounds: u32, now: f64, initial_jitter: f64) -> Self {
        Self {
            offset: ClockOffset::new(alpha),
            sync_interval,
            sync_rounds,
            // Randomizing the first sync deadline avoids every source in a
            // multi-source run firing its sync burst in lockstep.
            next_sync: now + initial_jitter,
        }
    }

    pub fn due(&self, now: f64) -> bool {
        now >= self.next_sync
    }

    pub fn mark_fired(&mut self, now: f64) {
        self.next_sync = now + self.sync_interval;
    }

    /// `t1` = this source's clock at send time, `t2` = this source's clock
    /// at receipt of the matching TIME_RESPONSE, `t_dest` = the
    /// destination's clock echoed in that response. Computes and folds in
    /// `theta = t_dest - (t1+t2)/2`.
    pub fn on_time_response(&mut self, t_dest: f64, t1: f64, t2: f64) {
        let theta = t_dest - (t1 + t2) / 2.0;
        self.offset.update(theta);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sync_converges_to_constant_true_offset() {
        const THETA: f64 = 2.0;
        const ALPHA: f64 = 0.02;
        let mut offset = ClockOffset::new(ALPHA);

        // Symmetric RTT means every sample equals THETA exactly; after
        // enough rounds the EMA should sit within epsilon of it.
        let rounds = ((1.0_f64 / 1e-6).ln() / ALPHA).ceil() as u32;
        for _ in 0..rounds {
            offset.update(THETA);
        }
        assert!((offset.value() - THETA).abs() < 5e-3, "offset={}", offset.value());
    }

    #[test]
    fn single_round_nudges_toward_theta_by_alpha() {
        let mut offset = ClockOffset::new(0.02);
        offset.update(10.0);
        assert!((offset.value() - 0.2).abs() < 1e-9);
    }

    #[test]
    fn apply_adds_smoothed_offset() {
        let mut offset = ClockOffset::new(1.0); // alpha=1 -> converges in one round
        offset.update(3.5);
        assert_eq!(offset.apply(100.0), 103.5);
    }

    #[test]
    fn due_respects_interval_and_jitdered_start() {
        let sync = SourceClockSync::new(0.02, 5.0, 5, 0.0, 1.2);
        assert!(!sync.due(1.0));
        assert!(sync.due(1.2));
    }

    #[test]
    fn on_time_response_matches_symmetric_formula() {
        let mut sync = SourceClockSync::new(0.02, 5.0, 5, 0.0, 0.0);
        // t1=100 (source send), t_dest=103 (destination clock), t2=102 (source receipt)
        // theta = 103 - (100+102)/2 = 2.0
        sync.on_time_response(103.0, 100.0, 102.0);
        assert!((sync.offset.value() - 0.04).abs() < 1e-9); // 0.02 * 2.0
    }
}
