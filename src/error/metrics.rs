use thiserror::Error;

#[derive(Debug, Error)]
pub enum MetricsError {
    #[error("Failed to create latency histogram: {source}")]
    HistogramCreate {
        #[source]
        source: hdrhistogram::CreationError,
    },
}
