use std::time::Duration;

/// Sink for per-request gateway measurements.
///
/// The pipeline records exactly one observation per completed request. Implementations
/// must be cheap to call and safe to share across tasks.
pub trait MetricsRecorder: Send + Sync + 'static {
    /// Record a finished request for `service` (or `"unknown"` when unresolved).
    fn record_request(&self, service: &str, method: &str, status: u16, duration: Duration);

    /// Render the current state in a text exposition format.
    fn render(&self) -> eyre::Result<String>;
}

/// Recorder that drops every observation.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopMetrics;

impl MetricsRecorder for NoopMetrics {
    fn record_request(&self, _service: &str, _method: &str, _status: u16, _duration: Duration) {}

    fn render(&self) -> eyre::Result<String> {
        Ok(String::new())
    }
}
