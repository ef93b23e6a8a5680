//! Status transition decisions.
//!
//! Forward progress follows `queued < sent < delivered < read`. `failed` is
//! absorbing: it overrides any other status and nothing leaves it. Duplicate
//! and regressive events are expected under out-of-order delivery and come
//! back as `apply = false`, never as errors.

use super::states::MessageStatus;
use serde::{Deserialize, Serialize};

/// Why a transition was or was not applied
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransitionKind {
    /// Incoming status is further along than the current one
    Advance,
    /// Incoming failure overrides a non-terminal status
    Fail,
    /// Incoming status equals the current one
    Duplicate,
    /// Incoming status is behind the current one
    Regression,
    /// Message already failed; nothing moves it
    Absorbed,
}

/// Outcome of [`next_status`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransitionDecision {
    pub apply: bool,
    /// Status the message holds after the decision (unchanged when not applied)
    pub new_status: MessageStatus,
    pub kind: TransitionKind,
    /// A read arrived before delivery was recorded; `delivered_at` must be backfilled
    pub backfills_delivery: bool,
}

impl TransitionDecision {
    fn applied(new_status: MessageStatus, kind: TransitionKind, backfills_delivery: bool) -> Self {
        Self {
            apply: true,
            new_status,
            kind,
            backfills_delivery,
        }
    }

    fn discarded(current: MessageStatus, kind: TransitionKind) -> Self {
        Self {
            apply: false,
            new_status: current,
            kind,
            backfills_delivery: false,
        }
    }
}

/// Decide whether `incoming` may replace `current`
pub fn next_status(current: MessageStatus, incoming: MessageStatus) -> TransitionDecision {
    if current.is_terminal() {
        return TransitionDecision::discarded(current, TransitionKind::Absorbed);
    }

    if incoming == MessageStatus::Failed {
        return TransitionDecision::applied(incoming, TransitionKind::Fail, false);
    }

    match (current.rank(), incoming.rank()) {
        (Some(have), Some(got)) if got > have => {
            let backfills_delivery =
                incoming == MessageStatus::Read && !current.implies_delivery();
            TransitionDecision::applied(incoming, TransitionKind::Advance, backfills_delivery)
        }
        (Some(have), Some(got)) if got == have => {
            TransitionDecision::discarded(current, TransitionKind::Duplicate)
        }
        _ => TransitionDecision::discarded(current, TransitionKind::Regression),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use MessageStatus::*;

    #[test]
    fn test_forward_progress_applies() {
        let decision = next_status(Sent, Delivered);
        assert!(decision.apply);
        assert_eq!(decision.new_status, Delivered);
        assert_eq!(decision.kind, TransitionKind::Advance);
        assert!(!decision.backfills_delivery);

        assert!(next_status(Queued, Sent).apply);
        assert!(next_status(Delivered, Read).apply);
    }

    #[test]
    fn test_read_after_sent_backfills_delivery() {
        let decision = next_status(Sent, Read);
        assert!(decision.apply);
        assert!(decision.backfills_delivery);

        assert!(next_status(Queued, Read).backfills_delivery);
        assert!(!next_status(Delivered, Read).backfills_delivery);
    }

    #[test]
    fn test_regressions_and_duplicates_are_discarded() {
        let regression = next_status(Read, Delivered);
        assert!(!regression.apply);
        assert_eq!(regression.new_status, Read);
        assert_eq!(regression.kind, TransitionKind::Regression);

        let duplicate = next_status(Delivered, Delivered);
        assert!(!duplicate.apply);
        assert_eq!(duplicate.kind, TransitionKind::Duplicate);

        // A provider never reports `queued`; treat it as a regression from anything
        assert!(!next_status(Sent, Queued).apply);
    }

    #[test]
    fn test_failed_overrides_any_non_terminal_status() {
        for current in [Queued, Sent, Delivered, Read] {
            let decision = next_status(current, Failed);
            assert!(decision.apply, "failed should override {current}");
            assert_eq!(decision.new_status, Failed);
            assert_eq!(decision.kind, TransitionKind::Fail);
        }
    }

    #[test]
    fn test_failed_is_absorbing() {
        for incoming in [Queued, Sent, Delivered, Read, Failed] {
            let decision = next_status(Failed, incoming);
            assert!(!decision.apply);
            assert_eq!(decision.new_status, Failed);
            assert_eq!(decision.kind, TransitionKind::Absorbed);
        }
    }
}
