//! Prometheus metrics infrastructure with singleton-based initialization.
//!
//! The recorder is installed once per process. Rendering is exposed through
//! [`MetricsController::render`] so the `serve` HTTP router can mount a
//! `/metrics` route next to its own handlers; one-shot CLI invocations skip
//! installation and every `emit!` becomes a no-op.

pub mod events;

use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use snafu::prelude::*;
use std::sync::OnceLock;
use tracing::info;

use crate::error::{AlreadyInitializedSnafu, MetricsError, NotInitializedSnafu, PrometheusInitSnafu};

/// Macro for emitting metric events.
#[macro_export]
macro_rules! emit {
    ($event:expr) => {
        <_ as $crate::metrics::events::InternalEvent>::emit($event)
    };
}

/// Histogram buckets for duration metrics (in seconds).
///
/// Cluster operations take minutes, so the upper buckets reach 30 minutes.
const DURATION_BUCKETS: &[f64] = &[
    0.05, 0.25, 1.0, 5.0, 15.0, 30.0, 60.0, 120.0, 300.0, 600.0, 1200.0, 1800.0,
];

/// Global metrics controller singleton.
static CONTROLLER: OnceLock<MetricsController> = OnceLock::new();

/// Controller for the process-wide Prometheus recorder.
pub struct MetricsController {
    handle: PrometheusHandle,
}

fn install() -> Result<PrometheusHandle, MetricsError> {
    PrometheusBuilder::new()
        .set_buckets(DURATION_BUCKETS)
        .context(PrometheusInitSnafu)?
        .install_recorder()
        .context(PrometheusInitSnafu)
}

/// Install the Prometheus recorder.
///
/// # Errors
///
/// Returns an error if the recorder is already initialized or fails to install.
pub fn init_global() -> Result<(), MetricsError> {
    ensure!(CONTROLLER.get().is_none(), AlreadyInitializedSnafu);

    let handle = install()?;
    CONTROLLER
        .set(MetricsController { handle })
        .map_err(|_| AlreadyInitializedSnafu.build())?;

    info!("Metrics recorder installed");
    Ok(())
}

/// Initialize the metrics subsystem for tests.
///
/// Safe to call from many test threads: the first caller installs the
/// recorder, everyone else waits until it is visible.
pub fn init_test() {
    if CONTROLLER.get().is_some() {
        return;
    }
    match install() {
        Ok(handle) => {
            let _ = CONTROLLER.set(MetricsController { handle });
        }
        Err(_) => {
            while CONTROLLER.get().is_none() {
                std::hint::spin_loop();
            }
        }
    }
}

impl MetricsController {
    /// Get a reference to the global metrics controller.
    ///
    /// # Errors
    ///
    /// Returns an error if metrics have not been initialized.
    pub fn get() -> Result<&'static Self, MetricsError> {
        CONTROLLER.get().context(NotInitializedSnafu)
    }

    /// Render metrics in Prometheus text format.
    pub fn render(&self) -> String {
        self.handle.render()
    }
}
