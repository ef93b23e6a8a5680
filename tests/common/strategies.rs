use delivery_core::state_machine::MessageStatus;
use proptest::prelude::*;

/// Any status the provider can report
pub fn provider_status_strategy() -> impl Strategy<Value = MessageStatus> {
    prop_oneof![
        Just(MessageStatus::Sent),
        Just(MessageStatus::Delivered),
        Just(MessageStatus::Read),
        Just(MessageStatus::Failed),
    ]
}

/// Any status a stored message can hold
pub fn message_status_strategy() -> impl Strategy<Value = MessageStatus> {
    prop_oneof![Just(MessageStatus::Queued), provider_status_strategy()]
}

/// Sequences of provider events for one message, in arrival order
pub fn status_sequence_strategy() -> impl Strategy<Value = Vec<MessageStatus>> {
    prop::collection::vec(provider_status_strategy(), 1..8)
}

/// The same event list in an arbitrary arrival order, as `(status, offset)`
pub fn shuffled_lifecycle_strategy() -> impl Strategy<Value = Vec<(MessageStatus, i64)>> {
    let lifecycle = vec![
        (MessageStatus::Sent, 0),
        (MessageStatus::Delivered, 10),
        (MessageStatus::Read, 20),
    ];
    Just(lifecycle).prop_shuffle()
}

/// Per-message final statuses for a campaign of several messages
pub fn campaign_outcomes_strategy() -> impl Strategy<Value = Vec<Vec<MessageStatus>>> {
    prop::collection::vec(status_sequence_strategy(), 1..6)
}
