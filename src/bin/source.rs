//! `aoi-source` — simulates one or more rate-paced sensors feeding a dual
//! LCFS/FCFS queue per data type, served on POLL (or pushed unsolicited
//! under `Policy::None`) to a single destination. Runs until killed; the
//! destination owns run-duration accounting and the final age report.

use std::time::{Duration, Instant};

use anyhow::Result;
use clap::Parser;

use aoi_core::{Endpoint, SourceEngine, SourceEngineConfig, TcpTransport, Transport, UdpTransport};
use aoi_harness::cli::{resolve_source, SourceCli, TransportKind};
use aoi_harness::logging;

fn main() -> Result<()> {
    logging::init_tracing()?;
    let params = resolve_source(SourceCli::parse())?;

    let (mut transport, destination): (Box<dyn Transport>, Endpoint) = match params.transport {
        TransportKind::Udp => (Box::new(UdpTransport::bind(0)?), Endpoint::Udp(params.destination_addr)),
        TransportKind::Tcp => (Box::new(TcpTransport::connect(params.destination_addr)?), Endpoint::Stream(0)),
    };
    let stream_mode = params.transport == TransportKind::Tcp;

    let start = Instant::now();
    let now = || start.elapsed().as_secs_f64();

    eprintln!(
        "aoi-source {} — {} sensor(s), policy={}, transport={:?} -> {}",
        params.source_id,
        params.sensors.len(),
        params.policy,
        params.transport,
        params.destination_addr
    );

    let mut engine = SourceEngine::new(SourceEngineConfig {
        source_id: params.source_id,
        policy: params.policy,
        stream_mode,
        max_payload: params.max_payload,
        destination,
        sensors: params.sensors,
        sync_alpha: params.sync_alpha,
        sync_interval: params.sync_interval,
        sync_rounds: params.sync_rounds,
        // Randomizing the first sync burst keeps a multi-source run from
        // lockstepping its TIME_REQUESTs (source_engine's own doc comment).
        initial_sync_jitter: rand::random::<f64>() * params.sync_interval,
        now: now(),
    });

    loop {
        engine.tick(now(), transport.as_mut())?;
        std::thread::sleep(Duration::from_millis(1));
    }
}
