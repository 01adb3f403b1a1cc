//! Destination-side event loop: ties the receiver, the scheduler, and the
//! age meter together. One `tick` is one non-blocking pass: drain
//! everything currently readable, then decide whether to emit a POLL.

use std::collections::HashMap;

use anyhow::bail;
use indexmap::IndexMap;

use crate::age_meter::{self, AgeReport};
use crate::destination::receiver::{self, FrameOutcome};
use crate::frame::DataType;
use crate::policy::Policy;
use crate::scheduler::{self, MafScheduler, NoneScheduler, Scheduler, WiFreshScheduler};
use crate::source_key::SourceKey;
use crate::source_state::{SourceLifecycle, SourceState};
use crate::transport::{send_best_effort, Endpoint, Transport, TransportEvent, WireMessage};

/// Static, pre-registered sources (UDP mode) or the statically-known
/// `(source_id, data_type)` set a stream-mode run expects (connections
/// attach dynamically as their first frame names a `source_id`).
pub struct DestinationEngineConfig {
    pub policy: Policy,
    pub poll_interval: f64,
    pub window_period: f64,
    pub running_period: f64,
    pub strict: bool,
    pub sources: Vec<(SourceKey, Endpoint)>,
    /// Stream-mode sources declared up front (their `Endpoint` isn't known
    /// yet — only `--sources` announced them). A stream frame naming a
    /// `source_id` outside both this set and `sources` is rejected, the same
    /// as an unregistered UDP peer.
    pub declared_stream_sources: Vec<SourceKey>,
    pub now: f64,
}

pub struct DestinationEngine {
    policy: Policy,
    scheduler: Box<dyn Scheduler>,
    window_period: f64,
    poll_interval: f64,
    running_period: f64,
    strict: bool,
    start_time: f64,
    last_poll_time: f64,
    sources: IndexMap<SourceKey, SourceState>,
    endpoint_to_key: HashMap<Endpoint, SourceKey>,
    key_to_endpoint: HashMap<SourceKey, Endpoint>,
}

fn make_scheduler(policy: Policy, window_period: f64) -> Box<dyn Scheduler> {
    match policy {
        Policy::Maf => Box::new(MafScheduler),
        Policy::WiFresh => Box::new(WiFreshScheduler::new(window_period)),
        Policy::None => Box::new(NoneScheduler),
    }
}

impl DestinationEngine {
    pub fn new(cfg: DestinationEngineConfig) -> Self {
        let scheduler = make_scheduler(cfg.policy, cfg.window_period);
        let mut sources = IndexMap::new();
        let mut endpoint_to_key = HashMap::new();
        let mut key_to_endpoint = HashMap::new();
        for (key, endpoint) in cfg.sources {
            sources.insert(key, SourceState::new(cfg.now));
            endpoint_to_key.insert(endpoint, key);
            key_to_endpoint.insert(key, endpoint);
        }
        for key in cfg.declared_stream_sources {
            sources.entry(key).or_insert_with(|| SourceState::new(cfg.now));
        }
        Self {
            policy: cfg.policy,
            scheduler,
            window_period: cfg.window_period,
            poll_interval: cfg.poll_interval,
            running_period: cfg.running_period,
            strict: cfg.strict,
            start_time: cfg.now,
            last_poll_time: cfg.now,
            sources,
            endpoint_to_key,
            key_to_endpoint,
        }
    }

    pub fn sources(&self) -> &IndexMap<SourceKey, SourceState> {
        &self.sources
    }

    pub fn is_run_complete(&self, now: f64) -> bool {
        now - self.start_time >= self.running_period
    }

    /// Identify which source an inbound data frame belongs to. Stream-mode
    /// frames carry an explicit `source_id`; the first one seen from a
    /// `source_id` that was declared up front (via `--sources` or a UDP
    /// pre-registration) registers that connection's `Endpoint`, same as a
    /// declared stream source attaching for the first time. An undeclared
    /// `source_id` is rejected rather than silently adopted, so `--strict`
    /// can actually enforce a closed source set. UDP-mode frames are matched
    /// purely by the sending address, pre-registered at construction from
    /// `--sources` — address-keyed lookup is retained only as the
    /// transport-level lookup, never as the `SourceKey` itself.
    fn resolve_key(&mut self, endpoint: Endpoint, data_type: DataType, source_id: Option<u8>) -> Option<SourceKey> {
        if let Some(id) = source_id {
            let key = SourceKey::new(id, data_type);
            if !self.sources.contains_key(&key) {
                return None;
            }
            self.endpoint_to_key.entry(endpoint).or_insert(key);
            self.key_to_endpoint.entry(key).or_insert(endpoint);
            return Some(key);
        }
        self.endpoint_to_key.get(&endpoint).copied()
    }

    /// One non-blocking pass: drain every currently-readable message, then
    /// decide whether to emit a POLL. Returns `Ok(())` normally; bails (for
    /// `main` to translate into exit code 1) only on an unknown-source
    /// violation under `--strict`.
    pub fn tick(&mut self, now: f64, transport: &mut dyn Transport) -> anyhow::Result<()> {
        let mut just_delivered = false;

        while let Some(event) = transport.try_recv()? {
            let (endpoint, msg) = match event {
                TransportEvent::Message(endpoint, msg) => (endpoint, msg),
                TransportEvent::Dropped(endpoint) => {
                    match self.endpoint_to_key.get(&endpoint) {
                        Some(key) => {
                            if let Some(state) = self.sources.get(key) {
                                state.note_dropped();
                            }
                        }
                        None => tracing::debug!(?endpoint, "dropped a malformed frame from an unattributed endpoint"),
                    }
                    continue;
                }
            };
            match msg {
                WireMessage::Data(frame) if frame.data_type == DataType::TimeRequest => {
                    let reply = WireMessage::TimeResponse { t_dest: now, t1: frame.timestamp };
                    if !send_best_effort(transport, &endpoint, &reply)? {
                        tracing::debug!(?endpoint, "TIME_RESPONSE send would block, dropping reply");
                    }
                }
                WireMessage::Data(frame) => {
                    let data_type = frame.data_type;
                    let source_id = frame.source_id;
                    let Some(key) = self.resolve_key(endpoint, data_type, source_id) else {
                        tracing::warn!(?endpoint, ?data_type, "rejected frame from unregistered source");
                        if self.strict {
                            bail!("unknown source at {endpoint:?} (strict mode)");
                        }
                        continue;
                    };
                    let state = self.sources.entry(key).or_insert_with(|| SourceState::new(now));
                    if state.lifecycle() == SourceLifecycle::New {
                        state.transition(SourceLifecycle::Active);
                    }
                    match receiver::handle_frame(state, frame, now) {
                        FrameOutcome::Delivered => just_delivered = true,
                        FrameOutcome::Buffered | FrameOutcome::Stale => {}
                        FrameOutcome::FragmentRejected => {
                            tracing::debug!(?key, "dropped an interleaved/out-of-order fragment");
                        }
                        FrameOutcome::TimeRequest { .. } => {
                            unreachable!("TIME_REQUEST frames are intercepted before reaching handle_frame")
                        }
                    }
                }
                WireMessage::TimeSyncEcho(source_time) => {
                    tracing::debug!(source_time, ?endpoint, "received one-shot TIME_SYNC echo");
                }
                WireMessage::Poll(_) | WireMessage::TimeResponse { .. } | WireMessage::TimeSync => {
                    tracing::warn!(?endpoint, "destination received a source-only message kind, ignoring");
                }
            }
        }

        self.maybe_begin_draining(now);
        self.maybe_poll(now, just_delivered, transport)?;
        Ok(())
    }

    /// Pacing rule: poll whenever the interval has elapsed, or immediately
    /// after a delivery just sealed (event-driven polling). No-op under
    /// `Policy::None`, which never polls.
    fn maybe_poll(&mut self, now: f64, just_delivered: bool, transport: &mut dyn Transport) -> anyhow::Result<()> {
        if !self.policy.is_polled() {
            return Ok(());
        }
        if !(just_delivered || now - self.last_poll_time >= self.poll_interval) {
            return Ok(());
        }

        if matches!(self.policy, Policy::WiFresh) {
            scheduler::expire_all(&mut self.sources, now, self.window_period);
        }

        let Some(key) = self.scheduler.select(&self.sources, now) else {
            return Ok(());
        };
        let Some(&endpoint) = self.key_to_endpoint.get(&key) else {
            tracing::warn!(?key, "selected source has no known endpoint yet, skipping poll");
            return Ok(());
        };

        if send_best_effort(transport, &endpoint, &WireMessage::Poll(key.data_type))? {
            if let Some(state) = self.sources.get_mut(&key) {
                state.record_poll(now);
            }
            self.last_poll_time = now;
        } else {
            tracing::debug!(?key, "POLL send would block, retrying next tick");
        }
        Ok(())
    }

    /// Enter `DRAINING` for every `ACTIVE` source once the run is within one
    /// `poll_interval` of `running_period` elapsing, giving the last POLL's
    /// fragments one more interval to complete before the run ends. No new
    /// polls are issued once draining.
    fn maybe_begin_draining(&mut self, now: f64) {
        if now - self.start_time < self.running_period - self.poll_interval {
            return;
        }
        for state in self.sources.values_mut() {
            if state.lifecycle() == SourceLifecycle::Active {
                state.transition(SourceLifecycle::Draining);
            }
        }
    }

    /// Close every source's age integral up to `shutdown_time` and move the
    /// whole lifecycle to `CLOSED`, regardless of which state each source
    /// was in.
    pub fn finalize(&mut self, shutdown_time: f64) -> AgeReport {
        let report = age_meter::finalize(&mut self.sources, shutdown_time, self.running_period);
        for state in self.sources.values_mut() {
            state.force_close();
        }
        report
    }
}
