//! fieldgrid unit binary
//!
//! One executable for every unit in the grid:
//! - `run` starts the configured role (directory server or peer loop)
//! - `generate` / `whoami` manage the local identity without the network
//! - `inbox`, `send`, `advertise` and `lookup` are one-shot peer actions

pub mod cli;
pub mod config;
pub mod node;
pub mod output;

pub use cli::Cli;
pub use config::{CliOverrides, NodeConfig, Role};
pub use output::{JsonResponse, OutputFormat, OutputFormatter};

use fg_agent::{AgentError, TransportError};
use fg_crypto::IdentityError;

/// Exit codes for CLI operations
///
/// - 0: Success
/// - 1: General error
/// - 2: Rejected - the directory refused a signed envelope
/// - 3: Connection failed - directory unreachable
/// - 4: Invalid input - bad arguments, configuration or request
/// - 5: Not found - keys, unit or message missing
/// - 6: Already exists - a keypair is already present
/// - 7: Cancelled - interrupted while waiting
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum ExitCode {
    /// Operation completed successfully (exit code 0)
    Success = 0,
    /// General error (exit code 1)
    GeneralError = 1,
    /// Envelope rejected by the directory (exit code 2)
    Rejected = 2,
    /// Directory unreachable (exit code 3)
    ConnectionFailed = 3,
    /// Invalid input provided (exit code 4)
    InvalidInput = 4,
    /// Requested item does not exist (exit code 5)
    NotFound = 5,
    /// Keypair already present (exit code 6)
    AlreadyExists = 6,
    /// Interrupted by a signal (exit code 7)
    Cancelled = 7,
}

impl From<ExitCode> for i32 {
    fn from(code: ExitCode) -> Self {
        code as i32
    }
}

impl ExitCode {
    /// Convert to process exit code
    pub fn to_exit_code(self) -> std::process::ExitCode {
        std::process::ExitCode::from(self as u8)
    }

    /// Get the exit code name as a string
    pub fn name(&self) -> &'static str {
        match self {
            ExitCode::Success => "SUCCESS",
            ExitCode::GeneralError => "GENERAL_ERROR",
            ExitCode::Rejected => "REJECTED",
            ExitCode::ConnectionFailed => "CONNECTION_FAILED",
            ExitCode::InvalidInput => "INVALID_INPUT",
            ExitCode::NotFound => "NOT_FOUND",
            ExitCode::AlreadyExists => "ALREADY_EXISTS",
            ExitCode::Cancelled => "CANCELLED",
        }
    }

    /// Get a human-readable description of the exit code
    pub fn description(&self) -> &'static str {
        match self {
            ExitCode::Success => "Operation completed successfully",
            ExitCode::GeneralError => "An unspecified error occurred",
            ExitCode::Rejected => "The directory rejected the signed envelope",
            ExitCode::ConnectionFailed => "Could not reach the directory",
            ExitCode::InvalidInput => "Invalid arguments, configuration or request",
            ExitCode::NotFound => "Keys, unit or message not found",
            ExitCode::AlreadyExists => "A keypair already exists at the target path",
            ExitCode::Cancelled => "Interrupted before completion",
        }
    }

    /// Classify a failed command by the first recognised error in its chain
    pub fn from_error(err: &anyhow::Error) -> Self {
        for cause in err.chain() {
            if let Some(e) = cause.downcast_ref::<IdentityError>() {
                return Self::from_identity(e);
            }
            if let Some(e) = cause.downcast_ref::<AgentError>() {
                return match e {
                    AgentError::Identity(e) => Self::from_identity(e),
                    AgentError::Rejected(_) => ExitCode::Rejected,
                    AgentError::Transport(e) => Self::from_transport(e),
                    AgentError::ForeignCheckpoint(_) => ExitCode::InvalidInput,
                    AgentError::Checkpoint(_) | AgentError::Encoding(_) => ExitCode::GeneralError,
                };
            }
            if let Some(e) = cause.downcast_ref::<TransportError>() {
                return Self::from_transport(e);
            }
            if cause.downcast_ref::<config::ConfigError>().is_some()
                || cause.downcast_ref::<fg_dirnode::config::ConfigError>().is_some()
            {
                return ExitCode::InvalidInput;
            }
        }
        ExitCode::GeneralError
    }

    fn from_identity(err: &IdentityError) -> Self {
        match err {
            IdentityError::NotFound(_) => ExitCode::NotFound,
            IdentityError::AlreadyExists(_) => ExitCode::AlreadyExists,
            IdentityError::Cancelled => ExitCode::Cancelled,
            _ => ExitCode::GeneralError,
        }
    }

    fn from_transport(err: &TransportError) -> Self {
        match err {
            TransportError::Unavailable(_) => ExitCode::ConnectionFailed,
            TransportError::Rejected { .. } => ExitCode::Rejected,
            TransportError::NotFound => ExitCode::NotFound,
            TransportError::Refused { .. } => ExitCode::InvalidInput,
            TransportError::BadResponse(_) => ExitCode::GeneralError,
        }
    }
}

#[cfg(test)]
mod exit_code_tests {
    use super::*;
    use fg_proto::v1::ErrorCodeV1;

    #[test]
    fn test_exit_code_values() {
        assert_eq!(ExitCode::Success as i32, 0);
        assert_eq!(ExitCode::GeneralError as i32, 1);
        assert_eq!(ExitCode::Rejected as i32, 2);
        assert_eq!(ExitCode::ConnectionFailed as i32, 3);
        assert_eq!(ExitCode::InvalidInput as i32, 4);
        assert_eq!(ExitCode::NotFound as i32, 5);
        assert_eq!(ExitCode::AlreadyExists as i32, 6);
        assert_eq!(ExitCode::Cancelled as i32, 7);
        assert_eq!(i32::from(ExitCode::Rejected), 2);
    }

    #[test]
    fn test_exit_code_names_and_descriptions() {
        let all = [
            ExitCode::Success,
            ExitCode::GeneralError,
            ExitCode::Rejected,
            ExitCode::ConnectionFailed,
            ExitCode::InvalidInput,
            ExitCode::NotFound,
            ExitCode::AlreadyExists,
            ExitCode::Cancelled,
        ];
        for code in all {
            assert!(!code.name().is_empty());
            assert!(!code.description().is_empty());
        }
        assert_eq!(ExitCode::AlreadyExists.name(), "ALREADY_EXISTS");
    }

    #[test]
    fn test_identity_errors_classified() {
        let err = anyhow::Error::new(IdentityError::AlreadyExists("/keys".into()));
        assert_eq!(ExitCode::from_error(&err), ExitCode::AlreadyExists);

        let err = anyhow::Error::new(IdentityError::NotFound("/keys".into()))
            .context("loading keys");
        assert_eq!(ExitCode::from_error(&err), ExitCode::NotFound);

        let err = anyhow::Error::new(AgentError::Identity(IdentityError::Cancelled));
        assert_eq!(ExitCode::from_error(&err), ExitCode::Cancelled);
    }

    #[test]
    fn test_transport_errors_classified() {
        let rejected = AgentError::Rejected(TransportError::Rejected {
            code: ErrorCodeV1::InvalidSignature,
            message: "bad".into(),
        });
        assert_eq!(ExitCode::from_error(&rejected.into()), ExitCode::Rejected);

        let down = AgentError::Transport(TransportError::Unavailable("refused".into()));
        assert_eq!(ExitCode::from_error(&down.into()), ExitCode::ConnectionFailed);

        let missing = anyhow::Error::new(TransportError::NotFound);
        assert_eq!(ExitCode::from_error(&missing), ExitCode::NotFound);

        let other = anyhow::anyhow!("something else");
        assert_eq!(ExitCode::from_error(&other), ExitCode::GeneralError);
    }
}
