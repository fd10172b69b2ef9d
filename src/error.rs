use std::fmt;

use thiserror::Error;

/// Stage of device work that failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Context,
    ProgramBuild,
    Allocate,
    Upload,
    Dispatch,
    Readback,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Context => "acquiring execution context",
            Stage::ProgramBuild => "building scan program",
            Stage::Allocate => "allocating memory",
            Stage::Upload => "uploading input",
            Stage::Dispatch => "dispatching scan",
            Stage::Readback => "reading back results",
        };
        f.write_str(name)
    }
}

/// Coarse classification of a [`ScanError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Usage,
    Configuration,
    Substrate,
    Liveness,
}

#[derive(Debug, Error)]
pub enum ScanError {
    #[error("usage error: {0}")]
    Usage(String),

    #[error("no compute resources found")]
    NoResources,

    #[error("resource rank {rank} out of range ({available} available)")]
    RankOutOfRange { rank: usize, available: usize },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("{stage} failed: {detail}")]
    Substrate { stage: Stage, detail: String },

    /// Only produced when a spin limit is configured.
    #[error("cluster {cluster} stalled waiting on cluster {waiting_on} after {spins} polls")]
    Stalled {
        cluster: usize,
        waiting_on: usize,
        spins: u64,
    },

    #[error("cluster {cluster} aborted after another group failed")]
    Aborted { cluster: usize },
}

impl ScanError {
    pub fn substrate(stage: Stage, detail: impl fmt::Display) -> Self {
        ScanError::Substrate {
            stage,
            detail: detail.to_string(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            ScanError::Usage(_) => ErrorKind::Usage,
            ScanError::NoResources | ScanError::RankOutOfRange { .. } | ScanError::InvalidConfig(_) => {
                ErrorKind::Configuration
            }
            ScanError::Substrate { .. } => ErrorKind::Substrate,
            ScanError::Stalled { .. } | ScanError::Aborted { .. } => ErrorKind::Liveness,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_follow_taxonomy() {
        assert_eq!(ScanError::Usage("x".into()).kind(), ErrorKind::Usage);
        assert_eq!(ScanError::NoResources.kind(), ErrorKind::Configuration);
        assert_eq!(
            ScanError::RankOutOfRange { rank: 3, available: 1 }.kind(),
            ErrorKind::Configuration
        );
        assert_eq!(
            ScanError::substrate(Stage::Readback, "lost device").kind(),
            ErrorKind::Substrate
        );
        assert_eq!(
            ScanError::Stalled { cluster: 1, waiting_on: 0, spins: 10 }.kind(),
            ErrorKind::Liveness
        );
    }

    #[test]
    fn substrate_message_names_stage() {
        let err = ScanError::substrate(Stage::ProgramBuild, "bad shader");
        assert_eq!(err.to_string(), "building scan program failed: bad shader");
    }
}
