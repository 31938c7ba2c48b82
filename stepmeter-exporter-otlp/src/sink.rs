use std::io;

use thiserror::Error;
use tracing::{debug, info};

use crate::data::{ExportBatch, MetricData};

/// Errors a sink reports back to the exporter.
#[derive(Debug, Error)]
pub enum ExportError {
    /// The receiving end refused the batch.
    #[error("batch rejected: {reason}")]
    Rejected {
        /// Why the batch was refused.
        reason: String,
    },

    /// Sending the batch failed.
    #[error("failed to send batch")]
    Io(#[from] io::Error),
}

/// Where finished batches go.
///
/// A sink owns serialization, transport and retries. The exporter only logs a failure: meter
/// state stays intact, so cumulative values recover on the next successful export, while the
/// delta of the failed step is lost.
pub trait MetricSink: Send + Sync {
    /// Hands off one batch.
    fn export(&self, batch: &ExportBatch) -> Result<(), ExportError>;
}

impl<F> MetricSink for F
where
    F: Fn(&ExportBatch) -> Result<(), ExportError> + Send + Sync,
{
    fn export(&self, batch: &ExportBatch) -> Result<(), ExportError> {
        self(batch)
    }
}

/// Writes every data point as a `tracing` event.
#[derive(Clone, Copy, Debug, Default)]
pub struct LoggingSink {
    _private: (),
}

impl LoggingSink {
    /// Creates a new `LoggingSink`.
    pub fn new() -> Self {
        Self::default()
    }
}

impl MetricSink for LoggingSink {
    fn export(&self, batch: &ExportBatch) -> Result<(), ExportError> {
        info!(scope = %batch.scope_name, metrics = batch.metrics.len(), points = batch.point_count(), "Exporting batch.");

        for metric in &batch.metrics {
            let name = metric.name.as_str();
            let unit = metric.unit.as_str();
            match &metric.data {
                MetricData::Sum { temporality, points, .. } => {
                    for point in points {
                        debug!(metric_name = name, unit, %temporality, attributes = ?point.attributes, value = point.value, "sum");
                    }
                }
                MetricData::Gauge { points } => {
                    for point in points {
                        debug!(metric_name = name, unit, attributes = ?point.attributes, value = point.value, "gauge");
                    }
                }
                MetricData::Histogram { temporality, points } => {
                    for point in points {
                        debug!(
                            metric_name = name,
                            unit,
                            %temporality,
                            attributes = ?point.attributes,
                            count = point.count,
                            sum = point.sum,
                            max = ?point.max,
                            buckets = ?point.bucket_counts,
                            exemplars = point.exemplars.len(),
                            "histogram"
                        );
                    }
                }
                MetricData::Summary { points } => {
                    for point in points {
                        debug!(
                            metric_name = name,
                            unit,
                            attributes = ?point.attributes,
                            count = point.count,
                            sum = point.sum,
                            quantiles = ?point.quantile_values,
                            "summary"
                        );
                    }
                }
            }
        }
        Ok(())
    }
}
