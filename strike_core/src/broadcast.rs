use crossbeam_channel::{unbounded, Receiver, Sender};
use log::debug;
use strike_runtime::BroadcastEvent;

pub const BROADCAST_TOPIC: &str = "strike::broadcast";

/// Fire-and-forget event dispatcher.
///
/// Terminal transitions publish here; notification and UI layers consume
/// the receiving half outside this core. Delivery order is not guaranteed
/// and a missing consumer is not an error.
#[derive(Clone)]
pub struct Dispatcher {
    sender: Sender<BroadcastEvent>,
}

impl Dispatcher {
    pub fn channel() -> (Self, Receiver<BroadcastEvent>) {
        let (sender, receiver) = unbounded();
        (Self { sender }, receiver)
    }

    pub fn publish(&self, event: BroadcastEvent) {
        if let Ok(payload) = strike_runtime::encode_event_json(&event) {
            debug!(target: BROADCAST_TOPIC, "{}", payload);
        }
        // Disconnected receiver means nobody is listening; drop the event.
        let _ = self.sender.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn publish_delivers_to_receiver() {
        let (dispatcher, receiver) = Dispatcher::channel();
        dispatcher.publish(BroadcastEvent::MissileReady {
            missile: 3,
            owner: 1,
        });
        let event = receiver.try_recv().expect("event delivered");
        assert!(matches!(event, BroadcastEvent::MissileReady { missile: 3, .. }));
    }

    #[test]
    fn publish_without_receiver_is_silent() {
        let (dispatcher, receiver) = Dispatcher::channel();
        drop(receiver);
        dispatcher.publish(BroadcastEvent::SpyLost { spy: 1, owner: 2 });
    }
}
