//! Shared asset model types

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Auto-tag lifecycle of a single asset
///
/// Valid transitions:
/// - `none → pending` (first dispatch)
/// - `pending → completed` / `pending → failed` (reconciliation only)
/// - `failed → pending` (retry)
///
/// Everything else, including `pending → pending`, is rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum AutoTagStatus {
    #[default]
    None,
    Pending,
    Completed,
    Failed,
}

/// Rejected status transition
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Invalid auto-tag transition: {from} -> {to}")]
pub struct TransitionError {
    pub from: AutoTagStatus,
    pub to: AutoTagStatus,
}

impl AutoTagStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AutoTagStatus::None => "none",
            AutoTagStatus::Pending => "pending",
            AutoTagStatus::Completed => "completed",
            AutoTagStatus::Failed => "failed",
        }
    }

    pub fn can_transition_to(&self, next: AutoTagStatus) -> bool {
        matches!(
            (self, next),
            (AutoTagStatus::None, AutoTagStatus::Pending)
                | (AutoTagStatus::Pending, AutoTagStatus::Completed)
                | (AutoTagStatus::Pending, AutoTagStatus::Failed)
                | (AutoTagStatus::Failed, AutoTagStatus::Pending)
        )
    }

    /// Validate and return the new status
    pub fn transition_to(&self, next: AutoTagStatus) -> Result<AutoTagStatus, TransitionError> {
        if self.can_transition_to(next) {
            Ok(next)
        } else {
            Err(TransitionError { from: *self, to: next })
        }
    }
}

impl fmt::Display for AutoTagStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AutoTagStatus {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "none" => Ok(AutoTagStatus::None),
            "pending" => Ok(AutoTagStatus::Pending),
            "completed" => Ok(AutoTagStatus::Completed),
            "failed" => Ok(AutoTagStatus::Failed),
            other => Err(crate::Error::InvalidInput(format!(
                "Unknown auto-tag status '{}'",
                other
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL: [AutoTagStatus; 4] = [
        AutoTagStatus::None,
        AutoTagStatus::Pending,
        AutoTagStatus::Completed,
        AutoTagStatus::Failed,
    ];

    #[test]
    fn test_only_four_transitions_allowed() {
        let allowed = [
            (AutoTagStatus::None, AutoTagStatus::Pending),
            (AutoTagStatus::Pending, AutoTagStatus::Completed),
            (AutoTagStatus::Pending, AutoTagStatus::Failed),
            (AutoTagStatus::Failed, AutoTagStatus::Pending),
        ];

        for from in ALL {
            for to in ALL {
                let expected = allowed.contains(&(from, to));
                assert_eq!(
                    from.can_transition_to(to),
                    expected,
                    "transition {} -> {}",
                    from,
                    to
                );
                assert_eq!(from.transition_to(to).is_ok(), expected);
            }
        }
    }

    #[test]
    fn test_rejected_transition_reports_both_ends() {
        let err = AutoTagStatus::Completed
            .transition_to(AutoTagStatus::Pending)
            .unwrap_err();
        assert_eq!(err.from, AutoTagStatus::Completed);
        assert_eq!(err.to, AutoTagStatus::Pending);
        assert_eq!(err.to_string(), "Invalid auto-tag transition: completed -> pending");
    }

    #[test]
    fn test_string_form() {
        for status in ALL {
            assert_eq!(status.as_str().parse::<AutoTagStatus>().unwrap(), status);
        }
        assert!("queued".parse::<AutoTagStatus>().is_err());
        assert_eq!(serde_json::to_string(&AutoTagStatus::Pending).unwrap(), "\"pending\"");
    }
}
