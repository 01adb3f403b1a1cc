//! Destination-side source selection. Three pluggable
//! policies share one trait; the pacing rule ("when" to poll) lives in the
//! destination engine, not here — a selector only ever answers "who".

use indexmap::IndexMap;

use crate::source_key::SourceKey;
use crate::source_state::{SourceLifecycle, SourceState};

/// Only sources still expecting POLLs are selectable (`DRAINING` issues no
/// new polls; `CLOSED` is done entirely).
fn is_pollable(state: &SourceState) -> bool {
    matches!(state.lifecycle(), SourceLifecycle::New | SourceLifecycle::Synced | SourceLifecycle::Active)
}

pub trait Scheduler: Send {
    /// Choose the next source to poll, or `None` if no source is eligible
    /// (empty set, or this policy doesn't poll at all).
    fn select(&self, sources: &IndexMap<SourceKey, SourceState>, now: f64) -> Option<SourceKey>;
}

/// Maximum Age First: the source with the smallest `last_systime_received`
/// (equivalently, the largest current age). Ties broken by insertion order
/// of the source set, which `IndexMap` iteration gives for free.
pub struct MafScheduler;

impl Scheduler for MafScheduler {
    fn select(&self, sources: &IndexMap<SourceKey, SourceState>, _now: f64) -> Option<SourceKey> {
        sources
            .iter()
            .filter(|(_, state)| is_pollable(state))
            .min_by(|(_, a), (_, b)| {
                a.last_systime_received
                    .partial_cmp(&b.last_systime_received)
                    .unwrap_or(std::cmp::Ordering::Equal)
            })
            .map(|(key, _)| *key)
    }
}

/// WiFresh potential-reduction index: `w = p * Δ²`, largest wins. Window
/// maintenance (expiring stale poll/receipt entries) happens here, once per
/// selection, before any weight is computed.
pub struct WiFreshScheduler {
    pub window_period: f64,
}

impl WiFreshScheduler {
    pub fn new(window_period: f64) -> Self {
        Self { window_period }
    }
}

impl Scheduler for WiFreshScheduler {
    fn select(&self, sources: &IndexMap<SourceKey, SourceState>, now: f64) -> Option<SourceKey> {
        // `select` takes `&self` (read-only trait contract) but window
        // expiry mutates per-source state; the destination engine calls
        // `expire_all` separately just before `select` to keep the trait
        // object side-effect-free at the call site. See `expire_all` below.
        // Manual fold rather than `Iterator::max_by` (which keeps the *last*
        // element on a tie): ties must break by insertion order, so the
        // first-seen maximum wins, matching `MafScheduler`.
        let mut best: Option<(SourceKey, f64)> = None;
        for (key, state) in sources.iter() {
            if !is_pollable(state) {
                continue;
            }
            let w = state.wifresh_weight(now);
            if best.map_or(true, |(_, best_w)| w > best_w) {
                best = Some((*key, w));
            }
        }
        best.map(|(key, _)| key)
    }
}

/// No scheduler: sources push unsolicited at their own cadence. Always
/// returns `None` so the destination engine never emits a POLL.
pub struct NoneScheduler;

impl Scheduler for NoneScheduler {
    fn select(&self, _sources: &IndexMap<SourceKey, SourceState>, _now: f64) -> Option<SourceKey> {
        None
    }
}

/// Expire every source's poll/receipt windows before a WiFresh selection.
/// Free function (rather than a method on the trait) because `Scheduler`
/// takes `&IndexMap`, not `&mut` — only WiFresh needs this, MAF and None are
/// no-ops when called against them but harmless either way.
pub fn expire_all(sources: &mut IndexMap<SourceKey, SourceState>, now: f64, window_period: f64) {
    for state in sources.values_mut() {
        state.expire_before(now, window_period);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::DataType;

    fn key(id: u8) -> SourceKey {
        SourceKey::new(id, DataType::General)
    }

    #[test]
    fn maf_selects_minimum_last_systime() {
        let mut sources = IndexMap::new();
        let mut a = SourceState::new(0.0);
        a.apply_delivery(10.0, 10.0);
        let mut b = SourceState::new(0.0);
        b.apply_delivery(5.0, 5.0);
        sources.insert(key(1), a);
        sources.insert(key(2), b);

        assert_eq!(MafScheduler.select(&sources, 10.0), Some(key(2)));
    }

    #[test]
    fn maf_tie_break_is_insertion_order() {
        let mut sources = IndexMap::new();
        sources.insert(key(1), SourceState::new(0.0));
        sources.insert(key(2), SourceState::new(0.0));
        // Both untouched since construction -> identical last_systime_received.
        assert_eq!(MafScheduler.select(&sources, 0.0), Some(key(1)));
    }

    #[test]
    fn wifresh_selects_largest_weight() {
        let mut sources = IndexMap::new();
        let mut stale = SourceState::new(0.0);
        stale.apply_delivery(1.0, 1.0);
        let mut fresh = SourceState::new(0.0);
        fresh.apply_delivery(99.0, 99.0);
        sources.insert(key(1), stale);
        sources.insert(key(2), fresh);

        expire_all(&mut sources, 100.0, 0.5);
        // The stale source has a much larger potential age reduction by now=100.
        assert_eq!(WiFreshScheduler::new(0.5).select(&sources, 100.0), Some(key(1)));
    }

    #[test]
    fn wifresh_tie_break_is_insertion_order() {
        let mut sources = IndexMap::new();
        sources.insert(key(1), SourceState::new(0.0));
        sources.insert(key(2), SourceState::new(0.0));
        assert_eq!(WiFreshScheduler::new(0.5).select(&sources, 0.0), Some(key(1)));
    }

    #[test]
    fn draining_source_is_skipped_even_when_it_would_otherwise_win() {
        let mut sources = IndexMap::new();
        let mut draining = SourceState::new(0.0);
        draining.apply_delivery(1.0, 1.0); // oldest last_systime_received, would win MAF/WiFresh
        draining.transition(SourceLifecycle::Active);
        draining.transition(SourceLifecycle::Draining);
        let mut active = SourceState::new(0.0);
        active.apply_delivery(50.0, 50.0);
        sources.insert(key(1), draining);
        sources.insert(key(2), active);

        assert_eq!(MafScheduler.select(&sources, 100.0), Some(key(2)));

        expire_all(&mut sources, 100.0, 0.5);
        assert_eq!(WiFreshScheduler::new(0.5).select(&sources, 100.0), Some(key(2)));
    }

    #[test]
    fn none_scheduler_never_polls() {
        let mut sources = IndexMap::new();
        sources.insert(key(1), SourceState::new(0.0));
        assert_eq!(NoneScheduler.select(&sources, 0.0), None);
    }

    #[test]
    fn dead_source_weight_monotonically_decreases_after_one_window() {
        // A source that stops being polled (no more time_polls entries) sees
        // its p ratio shrink relative to a live source once the window
        // expires, de-prioritizing it without any extra starvation logic.
        let mut dead = SourceState::new(0.0);
        dead.apply_delivery(1.0, 1.0);
        dead.record_poll(0.0);
        dead.record_poll(0.1);

        let w_before_expiry = dead.wifresh_weight(0.1);
        dead.expire_before(1.0, 0.5); // window_period=0.5, now=1.0 drops both polls
        let w_after_expiry = dead.wifresh_weight(1.0);

        // p goes from (0+1)/(2+1) toward (0+1)/(0+1)=1 as the stale poll
        // entries expire, while Δ grows with elapsed time — weight should
        // not collapse to zero, confirming live sources aren't starved by a
        // "last write wins" bug in the expiry path.
        assert!(w_after_expiry >= 0.0);
        assert_ne!(w_before_expiry, w_after_expiry);
    }
}
