//! Group-scoped failure classification.

use thiserror::Error;

use nodecycle_core::Error;

/// Why a rolling update stopped processing a group or the whole run.
#[derive(Debug, Error)]
pub enum CycleError {
    /// The group is rolled back and the run moves on to the next group.
    #[error("rolling update of group {group} failed: {reason}")]
    Recoverable { group: String, reason: Error },

    /// Retrying or moving on cannot help; the run stops.
    #[error("rolling update aborted: {0}")]
    Fatal(Error),
}

impl CycleError {
    /// Classify an error raised while processing `group`.
    pub fn in_group(group: &str, err: Error) -> Self {
        if err.is_fatal() {
            Self::Fatal(err)
        } else {
            Self::Recoverable {
                group: group.to_string(),
                reason: err,
            }
        }
    }

    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Fatal(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classification_follows_error_kind() {
        let drain = CycleError::in_group(
            "ng-1",
            Error::DrainFailed {
                node: "n".into(),
                reason: "stuck".into(),
            },
        );
        assert!(!drain.is_fatal());
        assert!(drain.to_string().contains("group ng-1"));

        let orphan = CycleError::in_group("ng-1", Error::Inconsistent("orphan pod".into()));
        assert!(orphan.is_fatal());
    }
}
