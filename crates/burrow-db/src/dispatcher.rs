use burrow_types::events::StoreEvent;
use tokio::sync::broadcast;
use tracing::trace;

const EVENT_CAPACITY: usize = 1024;

/// Fans store events out to every subscriber.
///
/// Events are sent from inside the mutating call, after its transaction has
/// committed and the connection lock is released, so a subscriber that reads
/// the store on receipt sees the committed state.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<StoreEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(EVENT_CAPACITY);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StoreEvent> {
        self.tx.subscribe()
    }

    /// Send an event. Having no subscribers is not an error.
    pub fn emit(&self, event: StoreEvent) {
        trace!(conversation_id = event.conversation_id(), "store event");
        let _ = self.tx.send(event);
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subscribers_receive_in_order() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe();

        for peer in ["a", "b"] {
            bus.emit(StoreEvent::TypingStateChanged {
                conversation_id: "c1".into(),
                peer_id: peer.into(),
                is_typing: true,
            });
        }

        for expected in ["a", "b"] {
            match rx.try_recv().unwrap() {
                StoreEvent::TypingStateChanged { peer_id, .. } => assert_eq!(peer_id, expected),
                other => panic!("unexpected event {:?}", other),
            }
        }
    }

    #[test]
    fn emit_without_subscribers_is_fine() {
        let bus = EventBus::new();
        bus.emit(StoreEvent::MessageDeleted {
            conversation_id: "c1".into(),
            message_id: "m1".into(),
        });
        assert_eq!(bus.subscriber_count(), 0);
    }
}
