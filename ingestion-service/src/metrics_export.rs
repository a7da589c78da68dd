use std::{io::Write, path::Path};

use anyhow::{anyhow, Result};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use once_cell::sync::OnceCell;

use crate::sinks::write_atomic;

static PROM_HANDLE: OnceCell<PrometheusHandle> = OnceCell::new();

/// Install the process-wide Prometheus recorder. Later calls are no-ops.
pub fn init() -> Result<()> {
    PROM_HANDLE
        .get_or_try_init(|| {
            PrometheusBuilder::new()
                .install_recorder()
                .map_err(|e| anyhow!("failed to install Prometheus metrics recorder: {e}"))
        })
        .map(|_| ())
}

/// Current metrics in Prometheus text format, if the recorder is installed.
pub fn render() -> Option<String> {
    PROM_HANDLE.get().map(PrometheusHandle::render)
}

/// Write a text-exposition snapshot for a node_exporter textfile collector.
pub fn write_textfile(path: &Path) -> Result<()> {
    let body = render().ok_or_else(|| anyhow!("Prometheus recorder not initialized"))?;

    write_atomic(path, |out| Ok(out.write_all(body.as_bytes())?))
}
