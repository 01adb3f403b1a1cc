//! CLI surface for both `aoi-destination` and `aoi-source`. Each binary gets
//! its own clap-derive struct plus a `resolve` free function that folds in
//! the optional TOML overlay from `config.rs` and applies defaults, so the
//! binaries themselves stay thin.

use std::net::{SocketAddr, ToSocketAddrs};
use std::path::PathBuf;
use std::str::FromStr;

use anyhow::{bail, Context, Result};
use aoi_core::{DataType, Endpoint, Policy, SensorConfig, SourceKey};
use clap::Parser;

use crate::config::{DestinationFileConfig, SourceFileConfig};

pub const DEFAULT_LISTEN_PORT: u16 = 9999;
pub const DEFAULT_POLICY: &str = "wifresh";
pub const DEFAULT_TRANSPORT: &str = "udp";
pub const DEFAULT_RUNNING_PERIOD: f64 = 600.0;
pub const DEFAULT_POLL_INTERVAL: f64 = 0.3;
pub const DEFAULT_WINDOW_PERIOD: f64 = 0.5;
pub const DEFAULT_MAX_PAYLOAD: usize = 1400;
pub const DEFAULT_SYNC_ALPHA: f64 = 0.02;
pub const DEFAULT_SYNC_INTERVAL: f64 = 5.0;
pub const DEFAULT_SYNC_ROUNDS: u32 = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportKind {
    Udp,
    Tcp,
}

impl FromStr for TransportKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "udp" => Ok(TransportKind::Udp),
            "tcp" => Ok(TransportKind::Tcp),
            other => Err(format!("unknown transport: {other} (expected \"udp\" or \"tcp\")")),
        }
    }
}

#[derive(Parser, Debug)]
#[clap(name = "aoi-destination", version, about = "Age-of-Information polling destination")]
pub struct DestinationCli {
    /// One entry per expected source: `source_id:data_type` (stream mode,
    /// address learned from the accepted connection) or
    /// `source_id:data_type:ip:port` (UDP mode, address fixed up front).
    #[clap(long = "sources", num_args = 0..)]
    pub sources: Vec<String>,

    #[clap(long)]
    pub listen_port: Option<u16>,

    #[clap(long)]
    pub age_record_dir: Option<PathBuf>,

    /// TOML file carrying the same fields as this struct; a flag given on
    /// the command line overrides the matching config value.
    #[clap(long)]
    pub config: Option<PathBuf>,

    #[clap(long)]
    pub policy: Option<String>,

    #[clap(long)]
    pub transport: Option<String>,

    /// Abort the run instead of silently dropping a frame from an
    /// unregistered source.
    #[clap(long)]
    pub strict: bool,

    #[clap(long)]
    pub running_period: Option<f64>,

    #[clap(long)]
    pub poll_interval: Option<f64>,

    #[clap(long)]
    pub window_period: Option<f64>,
}

#[derive(Parser, Debug)]
#[clap(name = "aoi-source", version, about = "Age-of-Information polling source")]
pub struct SourceCli {
    /// One entry per simulated sensor: `data_type:packet_size:rate`, e.g.
    /// `position:1400:10` for a 1400-byte update ten times a second.
    #[clap(long = "sensors", num_args = 0..)]
    pub sensors: Vec<String>,

    /// `ip:port` of the destination.
    #[clap(long)]
    pub destination: Option<String>,

    #[clap(long)]
    pub source_id: Option<u8>,

    #[clap(long)]
    pub config: Option<PathBuf>,

    #[clap(long)]
    pub policy: Option<String>,

    #[clap(long)]
    pub transport: Option<String>,

    #[clap(long)]
    pub max_payload: Option<usize>,

    #[clap(long)]
    pub sync_alpha: Option<f64>,

    #[clap(long)]
    pub sync_interval: Option<f64>,

    #[clap(long)]
    pub sync_rounds: Option<u32>,
}

/// A `--sources` entry, fully parsed but not yet resolved against a
/// transport kind (UDP needs the address now; stream mode doesn't).
#[derive(Debug, Clone, PartialEq)]
pub enum SourceSpec {
    Udp { key: SourceKey, addr: SocketAddr },
    Stream { key: SourceKey },
}

fn parse_source_spec(raw: &str) -> Result<SourceSpec> {
    let parts: Vec<&str> = raw.split(':').collect();
    match parts.as_slice() {
        [source_id, data_type] => {
            let key = SourceKey::new(
                source_id.parse().with_context(|| format!("bad source_id in `{raw}`"))?,
                data_type.parse().map_err(|e| anyhow::anyhow!("bad data_type in `{raw}`: {e}"))?,
            );
            Ok(SourceSpec::Stream { key })
        }
        [source_id, data_type, ip, port] => {
            let key = SourceKey::new(
                source_id.parse().with_context(|| format!("bad source_id in `{raw}`"))?,
                data_type.parse().map_err(|e| anyhow::anyhow!("bad data_type in `{raw}`: {e}"))?,
            );
            let addr: SocketAddr =
                format!("{ip}:{port}").parse().with_context(|| format!("bad ip:port in `{raw}`"))?;
            Ok(SourceSpec::Udp { key, addr })
        }
        _ => bail!("malformed --sources entry `{raw}`, expected `source_id:data_type` or `source_id:data_type:ip:port`"),
    }
}

fn parse_sensor_spec(raw: &str) -> Result<SensorConfig> {
    let parts: Vec<&str> = raw.split(':').collect();
    let [data_type, packet_size, rate] = parts.as_slice() else {
        bail!("malformed --sensors entry `{raw}`, expected `data_type:packet_size:rate`");
    };
    Ok(SensorConfig {
        data_type: data_type.parse().map_err(|e| anyhow::anyhow!("bad data_type in `{raw}`: {e}"))?,
        packet_size: packet_size.parse().with_context(|| format!("bad packet_size in `{raw}`"))?,
        rate: rate.parse().with_context(|| format!("bad rate in `{raw}`"))?,
    })
}

/// Fully resolved destination-side run parameters — everything `cli.rs`
/// and `config.rs` contribute, merged and defaulted, ready for
/// `DestinationEngineConfig` and socket setup.
pub struct DestinationParams {
    pub sources: Vec<SourceSpec>,
    pub listen_port: u16,
    pub age_record_dir: PathBuf,
    pub policy: Policy,
    pub transport: TransportKind,
    pub strict: bool,
    pub running_period: f64,
    pub poll_interval: f64,
    pub window_period: f64,
}

pub fn resolve_destination(cli: DestinationCli) -> Result<DestinationParams> {
    let file = match &cli.config {
        Some(path) => DestinationFileConfig::load(path)?,
        None => DestinationFileConfig::default(),
    };

    let source_strings = if cli.sources.is_empty() { file.sources } else { cli.sources };
    let sources = source_strings.iter().map(|s| parse_source_spec(s)).collect::<Result<Vec<_>>>()?;

    let policy_str = cli.policy.or(file.policy).unwrap_or_else(|| DEFAULT_POLICY.to_string());
    let transport_str = cli.transport.or(file.transport).unwrap_or_else(|| DEFAULT_TRANSPORT.to_string());

    Ok(DestinationParams {
        sources,
        listen_port: cli.listen_port.or(file.listen_port).unwrap_or(DEFAULT_LISTEN_PORT),
        age_record_dir: cli
            .age_record_dir
            .or_else(|| file.age_record_dir.map(PathBuf::from))
            .unwrap_or_else(|| PathBuf::from(".")),
        policy: policy_str.parse().map_err(|e: String| anyhow::anyhow!(e))?,
        transport: transport_str.parse().map_err(|e: String| anyhow::anyhow!(e))?,
        strict: cli.strict || file.strict.unwrap_or(false),
        running_period: cli.running_period.or(file.running_period).unwrap_or(DEFAULT_RUNNING_PERIOD),
        poll_interval: cli.poll_interval.or(file.poll_interval).unwrap_or(DEFAULT_POLL_INTERVAL),
        window_period: cli.window_period.or(file.window_period).unwrap_or(DEFAULT_WINDOW_PERIOD),
    })
}

/// Fully resolved source-side run parameters.
pub struct SourceParams {
    pub source_id: u8,
    pub destination_addr: SocketAddr,
    pub sensors: Vec<SensorConfig>,
    pub policy: Policy,
    pub transport: TransportKind,
    pub max_payload: usize,
    pub sync_alpha: f64,
    pub sync_interval: f64,
    pub sync_rounds: u32,
}

pub fn resolve_source(cli: SourceCli) -> Result<SourceParams> {
    let file = match &cli.config {
        Some(path) => SourceFileConfig::load(path)?,
        None => SourceFileConfig::default(),
    };

    let sensor_strings = if cli.sensors.is_empty() { file.sensors } else { cli.sensors };
    let sensors = sensor_strings.iter().map(|s| parse_sensor_spec(s)).collect::<Result<Vec<_>>>()?;

    let destination_str = cli
        .destination
        .or(file.destination)
        .context("a destination address is required (--destination ip:port or config `destination`)")?;
    let destination_addr = destination_str
        .to_socket_addrs()
        .with_context(|| format!("could not resolve destination address `{destination_str}`"))?
        .next()
        .with_context(|| format!("destination address `{destination_str}` resolved to no addresses"))?;

    let policy_str = cli.policy.or(file.policy).unwrap_or_else(|| DEFAULT_POLICY.to_string());
    let transport_str = cli.transport.or(file.transport).unwrap_or_else(|| DEFAULT_TRANSPORT.to_string());

    Ok(SourceParams {
        source_id: cli.source_id.or(file.source_id).context("a --source_id is required")?,
        destination_addr,
        sensors,
        policy: policy_str.parse().map_err(|e: String| anyhow::anyhow!(e))?,
        transport: transport_str.parse().map_err(|e: String| anyhow::anyhow!(e))?,
        max_payload: cli.max_payload.or(file.max_payload).unwrap_or(DEFAULT_MAX_PAYLOAD),
        sync_alpha: cli.sync_alpha.or(file.sync_alpha).unwrap_or(DEFAULT_SYNC_ALPHA),
        sync_interval: cli.sync_interval.or(file.sync_interval).unwrap_or(DEFAULT_SYNC_INTERVAL),
        sync_rounds: cli.sync_rounds.or(file.sync_rounds).unwrap_or(DEFAULT_SYNC_ROUNDS),
    })
}

/// Resolve `--sources` into the `(SourceKey, Endpoint)` pairs
/// `DestinationEngineConfig` wants. Stream-mode entries are left out —
/// their endpoint isn't known until the real connection registers itself
/// (`DestinationEngine::resolve_key`); only UDP entries need one up front.
pub fn sources_to_endpoints(specs: &[SourceSpec]) -> Vec<(SourceKey, Endpoint)> {
    specs
        .iter()
        .filter_map(|spec| match spec {
            SourceSpec::Udp { key, addr } => Some((*key, Endpoint::Udp(*addr))),
            SourceSpec::Stream { .. } => None,
        })
        .collect()
}

/// The stream-mode `source_id:data_type` entries from `--sources`, with no
/// endpoint attached yet — the allowlist `DestinationEngineConfig` checks
/// before letting a stream connection self-register under `--strict`.
pub fn sources_to_stream_keys(specs: &[SourceSpec]) -> Vec<SourceKey> {
    specs
        .iter()
        .filter_map(|spec| match spec {
            SourceSpec::Stream { key } => Some(*key),
            SourceSpec::Udp { .. } => None,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_stream_mode_source_spec() {
        let spec = parse_source_spec("3:position").unwrap();
        assert_eq!(spec, SourceSpec::Stream { key: SourceKey::new(3, DataType::Position) });
    }

    #[test]
    fn parses_udp_mode_source_spec() {
        let spec = parse_source_spec("3:position:127.0.0.1:9000").unwrap();
        let addr: SocketAddr = "127.0.0.1:9000".parse().unwrap();
        assert_eq!(spec, SourceSpec::Udp { key: SourceKey::new(3, DataType::Position), addr });
    }

    #[test]
    fn rejects_malformed_source_spec() {
        assert!(parse_source_spec("garbage").is_err());
    }

    #[test]
    fn parses_sensor_spec() {
        let cfg = parse_sensor_spec("position:1400:10").unwrap();
        assert_eq!(cfg.data_type, DataType::Position);
        assert_eq!(cfg.packet_size, 1400);
        assert_eq!(cfg.rate, 10.0);
    }

    #[test]
    fn sources_to_stream_keys_keeps_only_stream_entries() {
        let specs = vec![
            SourceSpec::Stream { key: SourceKey::new(3, DataType::Position) },
            SourceSpec::Udp { key: SourceKey::new(4, DataType::General), addr: "127.0.0.1:9000".parse().unwrap() },
        ];
        assert_eq!(sources_to_stream_keys(&specs), vec![SourceKey::new(3, DataType::Position)]);
    }

    #[test]
    fn cli_flags_override_file_config() {
        let file = DestinationFileConfig { policy: Some("maf".into()), ..Default::default() };
        let cli_policy = Some("wifresh".to_string());
        let policy_str = cli_policy.or(file.policy).unwrap();
        assert_eq!(policy_str, "wifresh");
    }
}
