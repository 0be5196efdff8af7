//! Lifecycle error kinds.

use deploy_shims::ShimError;
use release_state::{ReleaseKey, StoreError};
use thiserror::Error;

use crate::versionbot::WaitError;

/// Everything a lifecycle run can fail with.
#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error("Workflow payload was missing repository object")]
    MissingRepository,

    #[error("Unsure how to proceed with event: {event}")]
    UnsupportedEvent { event: String },

    #[error("Push workflow only works with {target} branch. Event tried pushing to: {actual}")]
    UnexpectedPushRef { target: String, actual: String },

    #[error("Push to {actual} cannot be checked: no target branch configured and the payload names none")]
    MissingTargetBranch { actual: String },

    #[error("Action reached point of finalizing a release but did not find one for {key}")]
    ReleaseNotFound { key: ReleaseKey },

    #[error("{count} releases match {key}; refusing to pick one")]
    AmbiguousMatch { key: String, count: usize },

    #[error("{0}")]
    BuildExecution(ShimError),

    #[error(transparent)]
    BranchWait(#[from] WaitError),

    #[error("release store error: {0}")]
    Store(StoreError),

    #[error("{0}")]
    Finalize(ShimError),

    #[error("{0}")]
    Git(ShimError),

    #[error("failed to read release version: {0}")]
    Version(ShimError),

    #[error("failed to create git reference: {0}")]
    RefCreation(ShimError),

    #[error("failed to write step output: {0}")]
    Output(#[from] std::io::Error),
}

impl From<StoreError> for LifecycleError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Ambiguous { key, count } => LifecycleError::AmbiguousMatch { key, count },
            other => LifecycleError::Store(other),
        }
    }
}

pub type Result<T> = std::result::Result<T, LifecycleError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ambiguous_store_error_maps_to_ambiguous_match() {
        let err: LifecycleError = StoreError::Ambiguous {
            key: "org/fleet@abc".to_string(),
            count: 2,
        }
        .into();
        assert!(matches!(err, LifecycleError::AmbiguousMatch { count: 2, .. }));
    }

    #[test]
    fn push_ref_message_names_both_refs() {
        let err = LifecycleError::UnexpectedPushRef {
            target: "master".to_string(),
            actual: "refs/heads/feature".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Push workflow only works with master branch. Event tried pushing to: refs/heads/feature"
        );
    }
}
