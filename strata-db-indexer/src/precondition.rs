//! State-precondition gate
//!
//! Decides, from the index's persisted lifecycle state, whether a build
//! invocation should build, resume, rebuild, or refuse. Evaluated once at the
//! start of every `build_index` call, inside a dedicated transaction.

use crate::error::{IndexerError, Result};
use strata_db_core::IndexState;

/// How `build_index` reacts to the index's current lifecycle state
///
/// Variants are ordered so that each builds in strictly more situations than
/// the one before it. `BuildIfDisabledContinueIfWriteOnly` is the default and
/// the right choice whenever existing index data is trusted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IndexStatePrecondition {
    /// Only build when the index is disabled; a write-only index is assumed
    /// to be someone else's build in progress
    BuildIfDisabled,
    /// Build when disabled; pick up where the range set left off when
    /// write-only
    #[default]
    BuildIfDisabledContinueIfWriteOnly,
    /// Build when disabled; discard partial data and start over when
    /// write-only
    BuildIfDisabledRebuildIfWriteOnly,
    /// Rebuild no matter the state, including tearing a readable index back
    /// to write-only
    ForceBuild,
    /// Refuse when disabled, continue when write-only; the caller is
    /// expected to have transitioned and cleared the index itself
    ErrorIfDisabledContinueIfWriteOnly,
}

/// What the gate decided
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum GateDecision {
    /// Go ahead; `clear_first` discards existing entries, range set,
    /// progress, and build marker before any building
    Proceed { clear_first: bool },
    /// The index is already readable; nothing to do
    AlreadyReadable,
    /// Another build owns the write-only state; leave it alone
    AlreadyBuilding,
}

pub(crate) fn evaluate(
    precondition: IndexStatePrecondition,
    state: IndexState,
) -> Result<GateDecision> {
    use IndexStatePrecondition::*;
    match state {
        IndexState::Disabled => match precondition {
            ErrorIfDisabledContinueIfWriteOnly => Err(IndexerError::IndexDisabled),
            _ => Ok(GateDecision::Proceed { clear_first: true }),
        },
        IndexState::WriteOnly => match precondition {
            BuildIfDisabled => Ok(GateDecision::AlreadyBuilding),
            BuildIfDisabledContinueIfWriteOnly | ErrorIfDisabledContinueIfWriteOnly => {
                Ok(GateDecision::Proceed { clear_first: false })
            }
            BuildIfDisabledRebuildIfWriteOnly | ForceBuild => {
                Ok(GateDecision::Proceed { clear_first: true })
            }
        },
        IndexState::Readable => match precondition {
            ForceBuild => Ok(GateDecision::Proceed { clear_first: true }),
            _ => Ok(GateDecision::AlreadyReadable),
        },
        IndexState::Corrupt => Err(IndexerError::StateMismatch {
            expected: "disabled, write_only, or readable",
            actual: state,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_disabled_column() {
        use IndexStatePrecondition::*;
        for p in [
            BuildIfDisabled,
            BuildIfDisabledContinueIfWriteOnly,
            BuildIfDisabledRebuildIfWriteOnly,
            ForceBuild,
        ] {
            assert_eq!(
                evaluate(p, IndexState::Disabled).unwrap(),
                GateDecision::Proceed { clear_first: true }
            );
        }
        assert!(matches!(
            evaluate(ErrorIfDisabledContinueIfWriteOnly, IndexState::Disabled),
            Err(IndexerError::IndexDisabled)
        ));
    }

    #[test]
    fn test_write_only_column() {
        use IndexStatePrecondition::*;
        assert_eq!(
            evaluate(BuildIfDisabled, IndexState::WriteOnly).unwrap(),
            GateDecision::AlreadyBuilding
        );
        assert_eq!(
            evaluate(BuildIfDisabledContinueIfWriteOnly, IndexState::WriteOnly).unwrap(),
            GateDecision::Proceed { clear_first: false }
        );
        assert_eq!(
            evaluate(BuildIfDisabledRebuildIfWriteOnly, IndexState::WriteOnly).unwrap(),
            GateDecision::Proceed { clear_first: true }
        );
        assert_eq!(
            evaluate(ForceBuild, IndexState::WriteOnly).unwrap(),
            GateDecision::Proceed { clear_first: true }
        );
        assert_eq!(
            evaluate(ErrorIfDisabledContinueIfWriteOnly, IndexState::WriteOnly).unwrap(),
            GateDecision::Proceed { clear_first: false }
        );
    }

    #[test]
    fn test_readable_column() {
        use IndexStatePrecondition::*;
        for p in [
            BuildIfDisabled,
            BuildIfDisabledContinueIfWriteOnly,
            BuildIfDisabledRebuildIfWriteOnly,
            ErrorIfDisabledContinueIfWriteOnly,
        ] {
            assert_eq!(
                evaluate(p, IndexState::Readable).unwrap(),
                GateDecision::AlreadyReadable
            );
        }
        assert_eq!(
            evaluate(ForceBuild, IndexState::Readable).unwrap(),
            GateDecision::Proceed { clear_first: true }
        );
    }

    #[test]
    fn test_corrupt_always_errors() {
        assert!(matches!(
            evaluate(IndexStatePrecondition::ForceBuild, IndexState::Corrupt),
            Err(IndexerError::StateMismatch { .. })
        ));
    }
}
