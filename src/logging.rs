//! Shared `tracing` init for both binaries (`tracing_subscriber::fmt()` plus
//! an `EnvFilter` defaulting to `warn`). Having one copy keeps the two
//! binaries' log formatting and `RUST_LOG` handling identical instead of
//! drifting apart.

use anyhow::Result;
use tracing_subscriber::EnvFilter;

pub fn init_tracing() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("warn".parse()?))
        .init();
    Ok(())
}
