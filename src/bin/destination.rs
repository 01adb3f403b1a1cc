//! `aoi-destination` — polls registered sources, reassembles their updates,
//! and records per-source Age-of-Information at shutdown.

use std::time::{Duration, Instant};

use anyhow::Result;
use clap::Parser;

use aoi_core::{DestinationEngine, DestinationEngineConfig, TcpTransport, Transport, UdpTransport};
use aoi_harness::cli::{resolve_destination, sources_to_endpoints, sources_to_stream_keys, DestinationCli, TransportKind};
use aoi_harness::{logging, results};

fn main() -> Result<()> {
    logging::init_tracing()?;
    let params = resolve_destination(DestinationCli::parse())?;

    let mut transport: Box<dyn Transport> = match params.transport {
        TransportKind::Udp => Box::new(UdpTransport::bind(params.listen_port)?),
        TransportKind::Tcp => Box::new(TcpTransport::listen(params.listen_port)?),
    };

    let start = Instant::now();
    let now = || start.elapsed().as_secs_f64();

    let sources = sources_to_endpoints(&params.sources);
    let declared_stream_sources = sources_to_stream_keys(&params.sources);
    eprintln!(
        "aoi-destination — {} pre-registered source(s), policy={}, transport={:?}, listening on :{}, running for {:.0}s",
        sources.len() + declared_stream_sources.len(),
        params.policy,
        params.transport,
        params.listen_port,
        params.running_period
    );

    let mut engine = DestinationEngine::new(DestinationEngineConfig {
        policy: params.policy,
        poll_interval: params.poll_interval,
        window_period: params.window_period,
        running_period: params.running_period,
        strict: params.strict,
        sources,
        declared_stream_sources,
        now: now(),
    });

    loop {
        let t = now();
        if engine.is_run_complete(t) {
            break;
        }
        engine.tick(t, transport.as_mut())?;
        std::thread::sleep(Duration::from_millis(1));
    }

    let report = engine.finalize(now());
    results::write_age_report(&params.age_record_dir, &report)?;
    eprintln!("mean AoI across {} source(s): {:.4}", report.per_source.len(), report.mean);
    Ok(())
}
