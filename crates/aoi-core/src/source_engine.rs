//! Source-side single-threaded cooperative event loop.
//! One `tick` is one loop iteration: fire a clock-sync burst if due, drain
//! whatever's readable, run every sensor's rate-gated generator, and (in
//! push-mode policies) send unsolicited.

use std::collections::HashMap;

use crate::clock::SourceClockSync;
use crate::frame::{DataType, Frame};
use crate::policy::Policy;
use crate::queues::{Drained, SourceQueues};
use crate::sensor::{Sensor, SensorConfig};
use crate::transport::{send_best_effort, Endpoint, Transport, TransportEvent, WireMessage};

pub struct SourceEngineConfig {
    pub source_id: u8,
    pub policy: Policy,
    /// Whether this transport needs `source_id` stamped onto every frame
    /// (stream mode) or not (UDP, which identifies the source by address).
    pub stream_mode: bool,
    pub max_payload: usize,
    pub destination: Endpoint,
    pub sensors: Vec<SensorConfig>,
    pub sync_alpha: f64,
    pub sync_interval: f64,
    pub sync_rounds: u32,
    pub initial_sync_jitter: f64,
    pub now: f64,
}

/// One source's full runtime state: every sensor's generator and dual
/// queue, the clock-sync driver, and the policy/transport parameters that
/// govern how a POLL (or, in push mode, a free-running send) is served.
pub struct SourceEngine {
    source_id: u8,
    policy: Policy,
    stream_mode: bool,
    max_payload: usize,
    destination: Endpoint,
    sensors: HashMap<DataType, Sensor>,
    queues: HashMap<DataType, SourceQueues>,
    clock: SourceClockSync,
}

impl SourceEngine {
    pub fn new(cfg: SourceEngineConfig) -> Self {
        let mut sensors = HashMap::new();
        let mut queues = HashMap::new();
        for sensor_cfg in cfg.sensors {
            sensors.insert(sensor_cfg.data_type, Sensor::new(sensor_cfg, cfg.now));
            queues.insert(sensor_cfg.data_type, SourceQueues::new());
        }
        Self {
            source_id: cfg.source_id,
            policy: cfg.policy,
            stream_mode: cfg.stream_mode,
            max_payload: cfg.max_payload,
            destination: cfg.destination,
            sensors,
            queues,
            clock: SourceClockSync::new(cfg.sync_alpha, cfg.sync_interval, cfg.sync_rounds, cfg.now, cfg.initial_sync_jitter),
        }
    }

    pub fn clock_offset(&self) -> f64 {
        self.clock.offset.value()
    }

    fn stamp_source_id(&self, mut frame: Frame) -> Frame {
        if self.stream_mode {
            frame.source_id = Some(self.source_id);
        }
        frame
    }

    /// One loop iteration, made of four numbered steps. `now` is
    /// this source's local clock, sampled once by the caller so every
    /// sub-step of this tick observes the same instant.
    pub fn tick(&mut self, now: f64, transport: &mut dyn Transport) -> anyhow::Result<()> {
        self.maybe_fire_sync(now, transport)?;
        self.drain_inbound(now, transport)?;
        self.generate_all(now);
        if !self.policy.is_polled() {
            self.push_oldest(transport)?;
        }
        Ok(())
    }

    /// Step 1: if the sync epoch has elapsed, fire `sync_rounds` back-to-back
    /// TIME_REQUEST frames.
    fn maybe_fire_sync(&mut self, now: f64, transport: &mut dyn Transport) -> anyhow::Result<()> {
        if !self.clock.due(now) {
            return Ok(());
        }
        for _ in 0..self.clock.sync_rounds {
            let frame = self.stamp_source_id(Frame {
                is_fragmented: false,
                data_type: DataType::TimeRequest,
                source_id: None,
                timestamp: now,
                payload: Vec::new(),
            });
            if !send_best_effort(transport, &self.destination, &WireMessage::Data(frame))? {
                tracing::debug!("TIME_REQUEST send would block, skipping remaining sync rounds this epoch");
                break;
            }
        }
        self.clock.mark_fired(now);
        Ok(())
    }

    /// Step 2: non-blocking drain of whatever's waiting — POLL dispatch,
    /// TIME_RESPONSE folding into the smoothed offset, and the
    /// destination-initiated TIME_SYNC edge case.
    fn drain_inbound(&mut self, now: f64, transport: &mut dyn Transport) -> anyhow::Result<()> {
        while let Some(event) = transport.try_recv()? {
            let (peer, msg) = match event {
                TransportEvent::Message(peer, msg) => (peer, msg),
                TransportEvent::Dropped(peer) => {
                    tracing::debug!(?peer, "dropped a malformed inbound message");
                    continue;
                }
            };
            match msg {
                WireMessage::Poll(data_type) => self.handle_poll(data_type, now, &peer, transport)?,
                WireMessage::TimeResponse { t_dest, t1 } => {
                    self.clock.on_time_response(t_dest, t1, now);
                }
                WireMessage::TimeSync => {
                    if !send_best_effort(transport, &peer, &WireMessage::TimeSyncEcho(now))? {
                        tracing::debug!(?peer, "TIME_SYNC echo send would block, dropping reply");
                    }
                }
                WireMessage::Data(frame) => {
                    tracing::warn!(data_type = ?frame.data_type, "source received an unexpected data frame, ignoring");
                }
                WireMessage::TimeSyncEcho(_) => {
                    tracing::warn!("source received a TIME_SYNC echo addressed to it, ignoring");
                }
            }
        }
        Ok(())
    }

    /// The POLL ordering decisions: fragment first, else
    /// the LCFS tail (clearing the rest under MAF, fragmenting if oversize),
    /// else an empty beacon so the scheduler's accounting of "polls served"
    /// never starves.
    fn handle_poll(&mut self, data_type: DataType, now: f64, peer: &Endpoint, transport: &mut dyn Transport) -> anyhow::Result<()> {
        let Some(queues) = self.queues.get_mut(&data_type) else {
            tracing::warn!(?data_type, "POLL for a sensor this source doesn't have, ignoring");
            return Ok(());
        };

        let offset = self.clock.offset.value();
        let frame = match queues.drain_for_poll(self.policy, self.max_payload, offset) {
            Drained::Fragment(f) => f,
            Drained::FreshUpdate(f) => f,
            Drained::Empty => Frame::empty_beacon(data_type, now + offset),
        };
        let frame = self.stamp_source_id(frame);
        if !send_best_effort(transport, peer, &WireMessage::Data(frame))? {
            tracing::debug!(?data_type, "POLL reply send would block, dropping this reply");
        }
        Ok(())
    }

    /// Step 3: every sensor's rate-gated generator, pushed onto its queue.
    fn generate_all(&mut self, now: f64) {
        for (data_type, sensor) in self.sensors.iter_mut() {
            if let Some(frame) = sensor.generate(now) {
                if let Some(queues) = self.queues.get_mut(data_type) {
                    queues.push_fresh(frame);
                }
            }
        }
    }

    /// Step 4 (push-mode baselines only, `Policy::None`): dequeue and send
    /// the oldest queued item per sensor, unsolicited. Unlike POLL handling,
    /// this never fragments — whatever is queued goes out as-is.
    fn push_oldest(&mut self, transport: &mut dyn Transport) -> anyhow::Result<()> {
        let offset = self.clock.offset.value();
        let stream_mode = self.stream_mode;
        let source_id = self.source_id;
        let destination = self.destination;
        for queues in self.queues.values_mut() {
            let Some(queued) = queues.peek_oldest_for_push() else { continue };
            let mut frame = queued.clone();
            frame.timestamp += offset;
            if stream_mode {
                frame.source_id = Some(source_id);
            }
            if send_best_effort(transport, &destination, &WireMessage::Data(frame))? {
                queues.pop_oldest_for_push();
            } else {
                tracing::debug!("push-mode send would block, leaving item queued for retry");
            }
        }
        Ok(())
    }
}
