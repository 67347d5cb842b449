//! Top-level error taxonomy and the stable exit-code contract.

use thiserror::Error;

use crate::exec::ExecError;
use crate::guardrail::GuardrailError;
use crate::session::SessionError;

/// Every way a run can end badly, tagged with the exit code it owns.
#[derive(Debug, Error)]
pub enum RalphError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("required tool not available: {0}")]
    Environment(String),

    #[error("task failed: {reason}")]
    TaskFailed { reason: String },

    #[error("gate failure during verify")]
    GateFatal,

    #[error("post-completion verification failed: {0}")]
    UiVerification(String),

    #[error("integrity check failed: {0}")]
    Tampering(String),

    #[error("run aborted by user")]
    Aborted,

    #[error("service failed to become ready: {0}")]
    ServiceStartup(String),

    #[error(transparent)]
    Exec(#[from] ExecError),

    #[error(transparent)]
    Guardrail(#[from] GuardrailError),

    #[error(transparent)]
    Session(#[from] SessionError),

    #[error(transparent)]
    Other(#[from] eyre::Report),
}

impl RalphError {
    /// The exit code this error maps to, per the CLI's stable contract.
    pub fn exit_code(&self) -> i32 {
        match self {
            RalphError::Config(_) => 2,
            RalphError::Environment(_) => 8,
            RalphError::TaskFailed { .. } => 3,
            RalphError::GateFatal => 4,
            RalphError::UiVerification(_) => 5,
            RalphError::Tampering(_) => 6,
            RalphError::Session(SessionError::TamperingDetected { .. }) => 6,
            RalphError::Aborted => 7,
            RalphError::ServiceStartup(_) => 9,
            RalphError::Exec(ExecError::SpawnError { .. }) => 8,
            RalphError::Exec(_) => 3,
            RalphError::Guardrail(_) => 3,
            RalphError::Session(_) => 3,
            RalphError::Other(_) => 2,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_codes_match_contract() {
        assert_eq!(RalphError::Config("x".into()).exit_code(), 2);
        assert_eq!(RalphError::Environment("git".into()).exit_code(), 8);
        assert_eq!(
            RalphError::TaskFailed {
                reason: "max_iterations".into()
            }
            .exit_code(),
            3
        );
        assert_eq!(RalphError::GateFatal.exit_code(), 4);
        assert_eq!(RalphError::UiVerification("x".into()).exit_code(), 5);
        assert_eq!(RalphError::Tampering("x".into()).exit_code(), 6);
        assert_eq!(RalphError::Aborted.exit_code(), 7);
        assert_eq!(RalphError::ServiceStartup("x".into()).exit_code(), 9);
    }
}
