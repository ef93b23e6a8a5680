// State machine module for message delivery status
//
// Pure decision logic: given the status a message currently holds and an
// incoming provider status, decide whether the transition applies. The
// compare-and-apply against the store happens in `ingest::status`.

pub mod states;
pub mod transitions;

pub use states::{MessageDirection, MessageStatus};
pub use transitions::{next_status, TransitionDecision, TransitionKind};
