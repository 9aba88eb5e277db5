//! Report state machine with validated transitions.
//!
//! Reports only move forward, one step at a time:
//! Collecting -> Frozen -> Delivered

use recap_core::types::ReportStatus;

use crate::error::TransitionError;

/// Validate that a status transition is allowed.
///
/// Valid transitions:
/// - Collecting -> Frozen
/// - Frozen -> Delivered
pub fn validate_transition(from: ReportStatus, to: ReportStatus) -> Result<(), TransitionError> {
    let valid = matches!(
        (from, to),
        (ReportStatus::Collecting, ReportStatus::Frozen)
            | (ReportStatus::Frozen, ReportStatus::Delivered)
    );

    if valid {
        Ok(())
    } else {
        Err(TransitionError { from, to })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL: [ReportStatus; 3] = [
        ReportStatus::Collecting,
        ReportStatus::Frozen,
        ReportStatus::Delivered,
    ];

    #[test]
    fn test_collecting_to_frozen() {
        assert!(validate_transition(ReportStatus::Collecting, ReportStatus::Frozen).is_ok());
    }

    #[test]
    fn test_frozen_to_delivered() {
        assert!(validate_transition(ReportStatus::Frozen, ReportStatus::Delivered).is_ok());
    }

    #[test]
    fn test_skipping_is_invalid() {
        assert!(validate_transition(ReportStatus::Collecting, ReportStatus::Delivered).is_err());
    }

    #[test]
    fn test_backwards_is_invalid() {
        assert!(validate_transition(ReportStatus::Frozen, ReportStatus::Collecting).is_err());
        assert!(validate_transition(ReportStatus::Delivered, ReportStatus::Frozen).is_err());
        assert!(validate_transition(ReportStatus::Delivered, ReportStatus::Collecting).is_err());
    }

    #[test]
    fn test_self_transitions_invalid() {
        for status in ALL {
            assert!(validate_transition(status, status).is_err());
        }
    }

    #[test]
    fn test_all_valid_transitions_count() {
        let mut valid_count = 0;
        for from in ALL {
            for to in ALL {
                if validate_transition(from, to).is_ok() {
                    valid_count += 1;
                }
            }
        }
        assert_eq!(valid_count, 2, "Expected exactly 2 valid transitions");
    }

    #[test]
    fn test_invalid_transition_error_message() {
        let err = validate_transition(ReportStatus::Delivered, ReportStatus::Frozen).unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("delivered"));
        assert!(msg.contains("frozen"));
    }
}
