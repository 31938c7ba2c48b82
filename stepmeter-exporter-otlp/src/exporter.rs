use std::{
    sync::Arc,
    thread::{self, JoinHandle},
    time::Duration,
};

use crossbeam_channel::{bounded, RecvTimeoutError, Sender};
use stepmeter::{AggregationTemporality, Clock, MeterRegistry};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::{
    config::OtlpConfig,
    converter::MetricConverter,
    data::ExportBatch,
    sink::{ExportError, MetricSink},
};

/// Errors that could occur while starting an exporter.
#[derive(Debug, Error)]
pub enum BuildError {
    /// The registry was configured differently from the exporter.
    #[error("registry {setting} is {registry} but the exporter expects {exporter}")]
    ConfigMismatch {
        /// Which setting differs.
        setting: &'static str,
        /// Registry value.
        registry: String,
        /// Exporter value.
        exporter: String,
    },

    /// Failed to spawn the publisher thread.
    #[error("failed to spawn background thread for the exporter")]
    Backend(#[source] std::io::Error),
}

/// Publishes a registry's meters to a sink.
pub struct OtlpExporter<S> {
    config: OtlpConfig,
    registry: Arc<MeterRegistry>,
    sink: S,
}

impl<S: MetricSink + 'static> OtlpExporter<S> {
    /// Creates a new `OtlpExporter`.
    pub fn new(config: OtlpConfig, registry: Arc<MeterRegistry>, sink: S) -> Self {
        Self { config, registry, sink }
    }

    /// Exporter configuration.
    pub fn config(&self) -> &OtlpConfig {
        &self.config
    }

    /// Registry being exported.
    pub fn registry(&self) -> &Arc<MeterRegistry> {
        &self.registry
    }

    /// Converts every registered meter into a batch, stamped with the registry clock's time.
    pub fn batch(&self) -> ExportBatch {
        let meters = self.registry.meters();
        let mut converter = MetricConverter::new(
            self.registry.clock().as_ref(),
            self.config.step(),
            self.config.temporality(),
            self.config.base_time_unit(),
        );
        converter.add_meters(&meters);

        ExportBatch {
            resource: self
                .config
                .resource_attributes()
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
            scope_name: self.config.scope_name().to_string(),
            metrics: converter.into_metrics(),
        }
    }

    /// Converts and hands one batch to the sink.
    ///
    /// # Errors
    ///
    /// If the sink fails. The failure is also logged.
    pub fn publish(&self) -> Result<(), ExportError> {
        let batch = self.batch();
        if batch.metrics.is_empty() {
            debug!("No metrics to publish.");
            return Ok(());
        }

        let result = self.sink.export(&batch);
        if let Err(e) = &result {
            warn!(error = %e, metrics = batch.metrics.len(), "Failed to publish metrics.");
        }
        result
    }

    /// Starts publishing on a background thread, one millisecond past every step boundary.
    ///
    /// Under delta temporality the thread rolls every meter over before publishing, so meters
    /// nobody touched during the step still close it.
    ///
    /// # Errors
    ///
    /// If the registry's step or temporality differ from the exporter's, or the thread cannot be
    /// spawned.
    pub fn spawn(self) -> Result<ExporterHandle, BuildError> {
        self.check_registry()?;

        let (shutdown_tx, shutdown_rx) = bounded::<()>(1);
        let handle = thread::Builder::new()
            .name("stepmeter-exporter-otlp".to_string())
            .spawn(move || {
                info!(step = ?self.config.step(), temporality = %self.config.temporality(), "Exporter started.");
                loop {
                    match shutdown_rx.recv_timeout(self.until_next_step()) {
                        Err(RecvTimeoutError::Timeout) => {
                            if self.config.temporality() == AggregationTemporality::Delta {
                                self.registry.pump_rollover();
                            }
                            // Failures are already logged.
                            let _ = self.publish();
                        }
                        Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                    }
                }
                self.shutdown();
            })
            .map_err(BuildError::Backend)?;

        Ok(ExporterHandle { shutdown: Some(shutdown_tx), thread: Some(handle) })
    }

    fn check_registry(&self) -> Result<(), BuildError> {
        let registry = self.registry.config();
        if registry.step() != self.config.step() {
            return Err(BuildError::ConfigMismatch {
                setting: "step",
                registry: format!("{:?}", registry.step()),
                exporter: format!("{:?}", self.config.step()),
            });
        }
        if registry.temporality() != self.config.temporality() {
            return Err(BuildError::ConfigMismatch {
                setting: "temporality",
                registry: registry.temporality().to_string(),
                exporter: self.config.temporality().to_string(),
            });
        }
        Ok(())
    }

    fn until_next_step(&self) -> Duration {
        let step_millis = (self.config.step().as_millis() as i64).max(1);
        let now = self.registry.clock().wall_time_millis();
        Duration::from_millis((step_millis - now.rem_euclid(step_millis) + 1) as u64)
    }

    fn shutdown(&self) {
        // Close the registry first so nothing registers after the final flush.
        self.registry.close();
        self.registry.close_rollover();
        let _ = self.publish();
        info!("Exporter stopped.");
    }
}

impl<S> std::fmt::Debug for OtlpExporter<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OtlpExporter").field("config", &self.config).field("registry", &self.registry).finish()
    }
}

/// Handle to a running exporter. Dropping it stops the exporter as [`shutdown`](Self::shutdown)
/// does.
#[derive(Debug)]
pub struct ExporterHandle {
    shutdown: Option<Sender<()>>,
    thread: Option<JoinHandle<()>>,
}

impl ExporterHandle {
    /// Stops the exporter and waits for it to finish.
    ///
    /// The registry is closed, every step in progress is closed, and one last batch is published.
    pub fn shutdown(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                warn!("Exporter thread panicked.");
            }
        }
    }
}

impl Drop for ExporterHandle {
    fn drop(&mut self) {
        self.stop();
    }
}
