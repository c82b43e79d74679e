use thiserror::Error;

pub type HarnessResult<T> = std::result::Result<T, HarnessError>;

/// Every failure the harness can observe, grouped by how far it is allowed to propagate.
#[derive(Debug, Error)]
pub enum HarnessError {
    /// A variant could not be encoded into command line tokens.
    #[error("invalid variant: {0}")]
    InvalidVariant(String),

    /// The process could not be started (missing working directory, spawn failure).
    #[error("failed to launch {name}: {reason}")]
    LaunchFailed { name: String, reason: String },

    /// No TCP connection could be opened before the readiness timeout.
    #[error("{name} not accepting connections on {addr} after {timeout_ms}ms")]
    ReadinessTimeout {
        name: String,
        addr: String,
        timeout_ms: u128,
    },

    /// A single benchmarked request failed. Never raised out of the load generator.
    #[error("request {index} failed: {reason}")]
    RequestFailure { index: usize, reason: String },

    #[error("no successful requests out of {attempted} attempted")]
    NoSuccessfulRequests { attempted: usize },

    #[error("degenerate latency sample: {0}")]
    DegenerateSample(String),

    #[error("failed to stop process {pid}: {reason}")]
    TeardownFailure { pid: u32, reason: String },

    #[error("datastore reset failed: {0}")]
    DatastoreResetFailure(String),

    #[error("configuration error: {0}")]
    Config(String),
}

impl HarnessError {
    /// Errors which invalidate every remaining measurement and so must abort the sweep.
    pub fn is_sweep_fatal(&self) -> bool {
        matches!(
            self,
            HarnessError::DatastoreResetFailure(_)
                | HarnessError::InvalidVariant(_)
                | HarnessError::Config(_)
        )
    }

    /// Short machine readable name used in reports.
    pub fn kind(&self) -> &'static str {
        match self {
            HarnessError::InvalidVariant(_) => "InvalidVariant",
            HarnessError::LaunchFailed { .. } => "LaunchFailed",
            HarnessError::ReadinessTimeout { .. } => "ReadinessTimeout",
            HarnessError::RequestFailure { .. } => "RequestFailure",
            HarnessError::NoSuccessfulRequests { .. } => "NoSuccessfulRequests",
            HarnessError::DegenerateSample(_) => "DegenerateSample",
            HarnessError::TeardownFailure { .. } => "TeardownFailure",
            HarnessError::DatastoreResetFailure(_) => "DatastoreResetFailure",
            HarnessError::Config(_) => "Config",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_configuration_and_reset_errors_are_sweep_fatal() {
        assert!(HarnessError::DatastoreResetFailure("boom".into()).is_sweep_fatal());
        assert!(HarnessError::InvalidVariant("X".into()).is_sweep_fatal());
        assert!(!HarnessError::NoSuccessfulRequests { attempted: 3 }.is_sweep_fatal());
        assert!(!HarnessError::DegenerateSample("empty".into()).is_sweep_fatal());
        assert!(!HarnessError::LaunchFailed {
            name: "backend-0".into(),
            reason: "no such directory".into()
        }
        .is_sweep_fatal());
    }

    #[test]
    fn kind_names_match_variants() {
        assert_eq!(
            HarnessError::NoSuccessfulRequests { attempted: 0 }.kind(),
            "NoSuccessfulRequests"
        );
        assert_eq!(
            HarnessError::TeardownFailure {
                pid: 1,
                reason: "ESRCH".into()
            }
            .kind(),
            "TeardownFailure"
        );
    }
}
