//! Shutdown results writer: one `ages_<N>sources.txt`
//! file per run, named by how many sources were tracked, holding each
//! source's mean Age-of-Information plus the run-wide mean.

use std::path::Path;

use anyhow::{Context, Result};
use aoi_core::AgeReport;

pub fn write_age_report(dir: &Path, report: &AgeReport) -> Result<()> {
    std::fs::create_dir_all(dir).with_context(|| format!("failed to create {}", dir.display()))?;

    let path = dir.join(format!("ages_{}sources.txt", report.per_source.len()));
    let mut body = String::new();
    for (key, mean_age) in &report.per_source {
        body.push_str(&format!("{key}: {mean_age}\n"));
    }
    body.push_str(&format!("Mean AOI of all data sources: {}\n", report.mean));

    std::fs::write(&path, body).with_context(|| format!("failed to write {}", path.display()))?;
    tracing::info!(path = %path.display(), sources = report.per_source.len(), "wrote age report");
    Ok(())
}
