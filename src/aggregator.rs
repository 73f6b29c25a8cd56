//! # Media-Group Aggregator
//!
//! `photo`/`video` messages sharing a platform-assigned `media_group_id`
//! must not fire rules one by one. The first message of a group arms a
//! one-shot timer; each later message appends and re-arms it, so the
//! aggregate forms one full delay after the last observed fragment. When
//! the timer fires the entry is removed and exactly one synthesized
//! `media_group` event goes back onto the bus.
//!
//! The entry map is only touched inside short critical sections; the
//! removal in the timer task makes the emission at-most-once per group
//! id even if a late message races the timer.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::task::JoinHandle;

use crate::event::{ChatEvent, EventBus, Message};

struct PendingGroup {
    group_id: i64,
    messages: Vec<Arc<Message>>,
    timer: JoinHandle<()>,
}

pub struct MediaGroupAggregator {
    entries: Arc<DashMap<String, PendingGroup>>,
    bus: Arc<EventBus>,
    delay: Duration,
}

impl MediaGroupAggregator {
    pub fn new(bus: Arc<EventBus>, delay: Duration) -> Self {
        Self {
            entries: Arc::new(DashMap::new()),
            bus,
            delay,
        }
    }

    /// Add one atomic message to its media group. The first message arms
    /// the timer; later messages re-arm it, so the aggregate fires one
    /// full delay after the last observed message.
    pub fn add(&self, media_group_id: &str, group_id: i64, message: Arc<Message>) {
        match self.entries.entry(media_group_id.to_string()) {
            dashmap::mapref::entry::Entry::Occupied(mut entry) => {
                let pending = entry.get_mut();
                pending.messages.push(message);
                pending.timer.abort();
                pending.timer = self.arm_timer(media_group_id.to_string());
            }
            dashmap::mapref::entry::Entry::Vacant(vacant) => {
                let timer = self.arm_timer(media_group_id.to_string());
                vacant.insert(PendingGroup {
                    group_id,
                    messages: vec![message],
                    timer,
                });
            }
        }
    }

    fn arm_timer(&self, media_group_id: String) -> JoinHandle<()> {
        let entries = self.entries.clone();
        let bus = self.bus.clone();
        let delay = self.delay;

        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            // Removing the entry is what guarantees at-most-once emission.
            let Some((_, pending)) = entries.remove(&media_group_id) else {
                return;
            };
            tracing::debug!(
                media_group_id = %media_group_id,
                count = pending.messages.len(),
                "media group aggregated"
            );
            let event = ChatEvent::media_group(pending.group_id, pending.messages);
            if let Err(e) = bus.publish(event).await {
                tracing::error!(error = %e, "failed to publish media_group event");
            }
        })
    }

    pub fn pending_count(&self) -> usize {
        self.entries.len()
    }

    /// Drop all pending aggregations; used on dispatcher teardown.
    pub fn shutdown(&self) {
        self.entries.retain(|_, pending| {
            pending.timer.abort();
            false
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{EventTag, UserRef};

    fn photo(chat_id: i64, id: i64, media_group_id: &str) -> Arc<Message> {
        Arc::new(Message {
            id,
            chat_id,
            text: None,
            caption: None,
            from_user: Some(Arc::new(UserRef::new(7, "Ann"))),
            reply_to_message: None,
            media_group_id: Some(media_group_id.to_string()),
            date: 0,
        })
    }

    #[tokio::test]
    async fn test_single_aggregate_event_for_two_messages() {
        let bus = Arc::new(EventBus::new(16));
        let mut rx = bus.subscribe();
        let aggregator =
            MediaGroupAggregator::new(bus.clone(), Duration::from_millis(50));

        aggregator.add("X", 1, photo(1, 10, "X"));
        tokio::time::sleep(Duration::from_millis(10)).await;
        aggregator.add("X", 1, photo(1, 11, "X"));

        let event = tokio::time::timeout(Duration::from_millis(500), rx.recv())
            .await
            .expect("aggregate should fire")
            .unwrap();
        assert_eq!(event.tag, EventTag::MediaGroup);
        let messages = event.media_group.as_ref().unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].id, 10);
        assert_eq!(messages[1].id, 11);

        // Nothing else arrives.
        let extra = tokio::time::timeout(Duration::from_millis(100), rx.recv()).await;
        assert!(extra.is_err());
        assert_eq!(aggregator.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_distinct_ids_aggregate_separately() {
        let bus = Arc::new(EventBus::new(16));
        let mut rx = bus.subscribe();
        let aggregator =
            MediaGroupAggregator::new(bus.clone(), Duration::from_millis(30));

        aggregator.add("A", 1, photo(1, 1, "A"));
        aggregator.add("B", 1, photo(1, 2, "B"));
        assert_eq!(aggregator.pending_count(), 2);

        let first = tokio::time::timeout(Duration::from_millis(500), rx.recv())
            .await
            .unwrap()
            .unwrap();
        let second = tokio::time::timeout(Duration::from_millis(500), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(first.media_group.unwrap().len(), 1);
        assert_eq!(second.media_group.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_shutdown_drops_pending_timers() {
        let bus = Arc::new(EventBus::new(16));
        let mut rx = bus.subscribe();
        let aggregator =
            MediaGroupAggregator::new(bus.clone(), Duration::from_millis(30));

        aggregator.add("X", 1, photo(1, 1, "X"));
        aggregator.shutdown();
        assert_eq!(aggregator.pending_count(), 0);

        let nothing = tokio::time::timeout(Duration::from_millis(100), rx.recv()).await;
        assert!(nothing.is_err());
    }
}
