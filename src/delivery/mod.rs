//! Message lifecycle tracking.
//!
//! Status moves `sent → delivered → read` and never back. Updates arrive over
//! an unordered, at-least-once channel, so every update is checked against the
//! current status and anything that is not strictly ahead is dropped.

use crate::MessageId;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Lifecycle position of a message. Ordered: `Sent < Delivered < Read`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryStatus {
    /// Accepted by the relay.
    Sent,
    /// Reached the recipient's client.
    Delivered,
    /// Rendered by the recipient. Terminal.
    Read,
}

impl DeliveryStatus {
    /// Whether no further transition is possible.
    pub fn is_terminal(&self) -> bool {
        matches!(self, DeliveryStatus::Read)
    }
}

/// Result of applying one status update.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Transition {
    /// The status moved forward.
    Advanced {
        /// Previous status.
        from: DeliveryStatus,
        /// New status.
        to: DeliveryStatus,
    },
    /// The update was behind or equal to the current status.
    Unchanged(DeliveryStatus),
    /// The message is not tracked here.
    Unknown,
}

impl Transition {
    /// Whether the update changed anything.
    pub fn advanced(&self) -> bool {
        matches!(self, Transition::Advanced { .. })
    }
}

/// Per-message status map with monotonic updates.
#[derive(Clone, Debug, Default)]
pub struct DeliveryTracker {
    statuses: HashMap<MessageId, DeliveryStatus>,
}

impl DeliveryTracker {
    /// An empty tracker.
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts tracking a message.
    ///
    /// If it is already tracked the further-along of the two statuses wins, so
    /// re-loading history never rolls back a status learned from an event.
    pub fn track(&mut self, message_id: MessageId, status: DeliveryStatus) -> DeliveryStatus {
        let entry = self.statuses.entry(message_id).or_insert(status);
        if status > *entry {
            *entry = status;
        }
        *entry
    }

    /// Current status, if tracked.
    pub fn status(&self, message_id: &MessageId) -> Option<DeliveryStatus> {
        self.statuses.get(message_id).copied()
    }

    /// Applies an update. Regressions and repeats are no-ops; unknown ids are ignored.
    pub fn apply(&mut self, message_id: &MessageId, status: DeliveryStatus) -> Transition {
        match self.statuses.get_mut(message_id) {
            None => Transition::Unknown,
            Some(current) if status > *current => {
                let from = *current;
                *current = status;
                Transition::Advanced { from, to: status }
            }
            Some(current) => Transition::Unchanged(*current),
        }
    }

    /// Applies the same update to many messages, returning those that advanced.
    pub fn apply_batch<'a, I>(&mut self, message_ids: I, status: DeliveryStatus) -> Vec<MessageId>
    where
        I: IntoIterator<Item = &'a MessageId>,
    {
        message_ids
            .into_iter()
            .filter(|id| self.apply(id, status).advanced())
            .copied()
            .collect()
    }

    /// Stops tracking a message.
    pub fn forget(&mut self, message_id: &MessageId) {
        self.statuses.remove(message_id);
    }

    /// Number of tracked messages.
    pub fn len(&self) -> usize {
        self.statuses.len()
    }

    /// Whether nothing is tracked.
    pub fn is_empty(&self) -> bool {
        self.statuses.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_delivered_then_sent_stays_delivered() {
        let mut tracker = DeliveryTracker::new();
        let id = MessageId::new();
        tracker.track(id, DeliveryStatus::Sent);

        assert!(tracker.apply(&id, DeliveryStatus::Delivered).advanced());
        assert_eq!(
            tracker.apply(&id, DeliveryStatus::Sent),
            Transition::Unchanged(DeliveryStatus::Delivered)
        );
        assert_eq!(tracker.status(&id), Some(DeliveryStatus::Delivered));
    }

    #[test]
    fn test_read_twice_equals_once() {
        let mut tracker = DeliveryTracker::new();
        let id = MessageId::new();
        tracker.track(id, DeliveryStatus::Sent);

        assert_eq!(
            tracker.apply(&id, DeliveryStatus::Read),
            Transition::Advanced {
                from: DeliveryStatus::Sent,
                to: DeliveryStatus::Read
            }
        );
        assert_eq!(
            tracker.apply(&id, DeliveryStatus::Read),
            Transition::Unchanged(DeliveryStatus::Read)
        );
        assert!(tracker.status(&id).unwrap().is_terminal());
    }

    #[test]
    fn test_unknown_ids_are_ignored() {
        let mut tracker = DeliveryTracker::new();
        assert_eq!(
            tracker.apply(&MessageId::new(), DeliveryStatus::Read),
            Transition::Unknown
        );
        assert!(tracker.is_empty());
    }

    #[test]
    fn test_track_never_regresses() {
        let mut tracker = DeliveryTracker::new();
        let id = MessageId::new();
        tracker.track(id, DeliveryStatus::Read);

        assert_eq!(tracker.track(id, DeliveryStatus::Sent), DeliveryStatus::Read);
    }

    #[test]
    fn test_batch_reports_only_advanced() {
        let mut tracker = DeliveryTracker::new();
        let fresh = MessageId::new();
        let already_read = MessageId::new();
        tracker.track(fresh, DeliveryStatus::Delivered);
        tracker.track(already_read, DeliveryStatus::Read);

        let advanced = tracker.apply_batch(
            &[fresh, already_read, MessageId::new()],
            DeliveryStatus::Read,
        );
        assert_eq!(advanced, vec![fresh]);
        assert_eq!(tracker.len(), 2);
    }

    fn status_strategy() -> impl Strategy<Value = DeliveryStatus> {
        prop_oneof![
            Just(DeliveryStatus::Sent),
            Just(DeliveryStatus::Delivered),
            Just(DeliveryStatus::Read),
        ]
    }

    proptest! {
        #[test]
        fn prop_any_order_converges_to_max(
            updates in proptest::collection::vec(status_strategy(), 1..16),
            seed in any::<u64>(),
        ) {
            let id = MessageId::new();

            let mut in_order = DeliveryTracker::new();
            in_order.track(id, DeliveryStatus::Sent);
            for status in &updates {
                in_order.apply(&id, *status);
            }

            // Same multiset, rotated by an arbitrary amount and reversed
            let mut shuffled = updates.clone();
            let len = shuffled.len();
            shuffled.rotate_left((seed as usize) % len);
            shuffled.reverse();

            let mut out_of_order = DeliveryTracker::new();
            out_of_order.track(id, DeliveryStatus::Sent);
            for status in &shuffled {
                out_of_order.apply(&id, *status);
            }

            let expected = updates.iter().copied().max().unwrap_or(DeliveryStatus::Sent);
            prop_assert_eq!(in_order.status(&id), Some(expected));
            prop_assert_eq!(out_of_order.status(&id), Some(expected));
        }
    }
}
