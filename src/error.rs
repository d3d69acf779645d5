//! Unified error type for the shiku binary; maps internal errors to process exit codes.

use thiserror::Error;

/// Exit codes, sysexits-style.
const EXIT_FAILURE: i32 = 1;
const EXIT_PARTIAL: i32 = 2;
const EXIT_DATAERR: i32 = 65;
const EXIT_NOINPUT: i32 = 66;
const EXIT_SOFTWARE: i32 = 70;
const EXIT_IOERR: i32 = 74;

#[derive(Error, Debug)]
pub enum ShikuError {
    #[error("Loader error: {0}")]
    Loader(#[from] crate::ingest::loader::LoaderError),

    #[error("Storage error: {0}")]
    Storage(#[from] crate::storage::StorageError),

    #[error("Pipeline error: {0}")]
    Pipeline(#[from] crate::ingest::PipelineError),

    #[error("{0}")]
    Internal(#[from] anyhow::Error),
}

impl ShikuError {
    /// Process exit code for this error variant.
    pub fn exit_code(&self) -> i32 {
        use crate::ingest::loader::LoaderError;
        use crate::ingest::PipelineError;

        match self {
            Self::Loader(LoaderError::PathNotFound(_)) => EXIT_NOINPUT,
            Self::Loader(LoaderError::Parse { .. }) => EXIT_DATAERR,
            Self::Loader(_) => EXIT_IOERR,
            Self::Storage(_) => EXIT_IOERR,
            Self::Pipeline(PipelineError::ItemFailures { .. }) => EXIT_PARTIAL,
            Self::Pipeline(PipelineError::Flush { .. }) => EXIT_IOERR,
            Self::Pipeline(PipelineError::Task { .. }) => EXIT_SOFTWARE,
            Self::Internal(_) => EXIT_FAILURE,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::loader::LoaderError;
    use crate::ingest::PipelineError;

    #[test]
    fn test_exit_codes() {
        let missing = ShikuError::from(LoaderError::PathNotFound("/nope".into()));
        assert_eq!(missing.exit_code(), 66);

        let partial = ShikuError::from(PipelineError::ItemFailures { failed: 1, total: 9 });
        assert_eq!(partial.exit_code(), 2);
        assert_eq!(partial.to_string(), "Pipeline error: 1 of 9 items failed");

        let other = ShikuError::from(anyhow::anyhow!("boom"));
        assert_eq!(other.exit_code(), 1);
    }
}
