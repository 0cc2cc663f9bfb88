use thiserror::Error;

/// Rendering failures. Text rendering is infallible; only the JSON path can
/// error.
#[derive(Debug, Error)]
pub enum ReportError {
    #[error("could not serialize report to JSON")]
    JsonSerialize {
        #[source]
        source: serde_json::Error,
    },
}
