mod common;

use common::strategies::*;
use common::*;
use delivery_core::campaign::counters_from_messages;
use delivery_core::payload::StatusEvent;
use delivery_core::state_machine::{next_status, MessageStatus};
use delivery_core::store::prelude::*;
use delivery_core::CampaignAggregator;
use proptest::prelude::*;

fn event(external_id: &str, status: MessageStatus, offset: i64) -> StatusEvent {
    StatusEvent {
        external_id: external_id.to_string(),
        status,
        timestamp: ts(offset),
        recipient_id: None,
        pricing: None,
        error: None,
    }
}

/// Fold a sequence through the pure state machine
fn fold_statuses(statuses: &[MessageStatus]) -> MessageStatus {
    statuses
        .iter()
        .fold(MessageStatus::Queued, |current, incoming| {
            next_status(current, *incoming).new_status
        })
}

proptest! {
    /// Property: an applied transition never moves a message backwards
    #[test]
    fn applied_transitions_never_regress(
        current in message_status_strategy(),
        incoming in message_status_strategy(),
    ) {
        let decision = next_status(current, incoming);
        if decision.apply {
            prop_assert!(!current.is_terminal());
            match (current.rank(), decision.new_status.rank()) {
                (Some(have), Some(got)) => prop_assert!(got > have),
                (_, None) => prop_assert_eq!(decision.new_status, MessageStatus::Failed),
                (None, Some(_)) => prop_assert!(false, "left the failed state"),
            }
        } else {
            prop_assert_eq!(decision.new_status, current);
        }
    }

    /// Property: once failed, no sequence of events changes the status
    #[test]
    fn failed_absorbs_everything(sequence in status_sequence_strategy()) {
        let mut status = MessageStatus::Failed;
        for incoming in sequence {
            status = next_status(status, incoming).new_status;
        }
        prop_assert_eq!(status, MessageStatus::Failed);
    }

    /// Property: the final status is the highest-ranked event, or failed if any failed
    #[test]
    fn final_status_ignores_arrival_order(sequence in status_sequence_strategy()) {
        let expected = if sequence.contains(&MessageStatus::Failed) {
            MessageStatus::Failed
        } else {
            sequence
                .iter()
                .copied()
                .max_by_key(|s| s.rank())
                .unwrap_or(MessageStatus::Queued)
        };
        prop_assert_eq!(fold_statuses(&sequence), expected);
    }

    /// Property: a full lifecycle ends in `read` with delivery recorded, whatever the order
    #[test]
    fn shuffled_lifecycle_converges(events in shuffled_lifecycle_strategy()) {
        tokio_test::block_on(async {
            let harness = TestHarness::new();
            harness.outbound("wamid.A", None).await;
            let pipeline = harness.core.status_pipeline();
            for (status, offset) in &events {
                pipeline.apply(&event("wamid.A", *status, *offset)).await.unwrap();
            }

            let message = harness.message("wamid.A").await;
            assert_eq!(message.status, MessageStatus::Read);
            assert_eq!(message.read_at, Some(ts(20)));
            assert!(message.delivered_at.is_some());
        });
    }

    /// Property: incremental campaign counters equal a full recompute
    #[test]
    fn incremental_counters_match_recompute(outcomes in campaign_outcomes_strategy()) {
        tokio_test::block_on(async {
            let harness = TestHarness::new();
            let campaign_id = harness.create_campaign().await;
            let pipeline = harness.core.status_pipeline();

            let mut messages = Vec::new();
            for (i, sequence) in outcomes.iter().enumerate() {
                let external_id = format!("wamid.{i}");
                harness.outbound(&external_id, Some(campaign_id)).await;
                for (offset, status) in sequence.iter().enumerate() {
                    pipeline
                        .apply(&event(&external_id, *status, offset as i64))
                        .await
                        .unwrap();
                }
                messages.push(harness.message(&external_id).await);
            }

            let incremental = harness
                .store
                .get_campaign(campaign_id)
                .await
                .unwrap()
                .unwrap()
                .counters;
            let recomputed = CampaignAggregator::new(harness.store.clone())
                .recompute(campaign_id)
                .await
                .unwrap();

            assert_eq!(incremental, recomputed);
            assert_eq!(recomputed, counters_from_messages(&messages));
        });
    }
}
