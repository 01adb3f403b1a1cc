//! Ambient stack shared by the `aoi-destination` and `aoi-source` binaries:
//! CLI parsing, the optional TOML config overlay, logging init, and the
//! shutdown results writer. The protocol itself lives in `aoi-core`.

pub mod cli;
pub mod config;
pub mod logging;
pub mod results;
