use thiserror::Error;

use crate::gateway::GatewayError;
use crate::guard::GuardError;
use crate::store::StoreError;
use printfleet_shared::BedClearanceResult;

#[derive(Debug, Error)]
pub enum OrchestratorError {
    /// Missing, or owned by someone else. The two are deliberately indistinguishable.
    #[error("{0} not found")]
    NotFound(String),
    #[error("invalid state: {0}")]
    InvalidState(String),
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("printer misconfigured: {0}")]
    MisconfiguredPrinter(String),
    #[error("bed is not clear: {}", .0.reason)]
    BedNotClear(BedClearanceResult),
    #[error("gateway error: {0}")]
    Gateway(GatewayError),
    /// The camera or the vision service failed; the printer itself may be fine.
    #[error("bed check unavailable: {0}")]
    BedCheckUnavailable(String),
    #[error("timed out: {0}")]
    Timeout(String),
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl From<GatewayError> for OrchestratorError {
    fn from(e: GatewayError) -> Self {
        match e {
            GatewayError::Timeout(_) => OrchestratorError::Timeout(e.to_string()),
            other => OrchestratorError::Gateway(other),
        }
    }
}

impl From<GuardError> for OrchestratorError {
    fn from(e: GuardError) -> Self {
        match e {
            GuardError::MisconfiguredPrinter(_) => OrchestratorError::MisconfiguredPrinter(e.to_string()),
            GuardError::Timeout(_) => OrchestratorError::Timeout(e.to_string()),
            GuardError::Snapshot(_) | GuardError::Vision(_) => OrchestratorError::BedCheckUnavailable(e.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, OrchestratorError>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_timeouts_get_their_own_variant() {
        let err: OrchestratorError = GatewayError::Timeout(Duration::from_secs(10)).into();
        assert!(matches!(err, OrchestratorError::Timeout(_)));
        let err: OrchestratorError = GuardError::Timeout(Duration::from_secs(10)).into();
        assert!(matches!(err, OrchestratorError::Timeout(_)));
        let err: OrchestratorError = GatewayError::Rejected { status: 503, body: "busy".into() }.into();
        assert_eq!(err.to_string(), "gateway error: printer rejected the request (503): busy");
    }

    #[test]
    fn test_bed_check_failures_do_not_blame_the_printer() {
        let err: OrchestratorError = GuardError::Vision("connection refused".to_string()).into();
        assert!(matches!(err, OrchestratorError::BedCheckUnavailable(_)));
        assert_eq!(err.to_string(), "bed check unavailable: vision analysis failed: connection refused");
        let err: OrchestratorError = GuardError::Snapshot("404".to_string()).into();
        assert!(!err.to_string().contains("gateway"));
    }
}
