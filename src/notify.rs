use dashmap::DashMap;
use tokio::sync::broadcast;
use ulid::Ulid;

use crate::model::Event;

const CHANNEL_CAPACITY: usize = 256;

/// Per-staff broadcast of committed events, feeding the SSE change feed.
pub struct NotifyHub {
    channels: DashMap<Ulid, broadcast::Sender<Event>>,
}

impl Default for NotifyHub {
    fn default() -> Self {
        Self::new()
    }
}

impl NotifyHub {
    pub fn new() -> Self {
        Self {
            channels: DashMap::new(),
        }
    }

    /// Subscribe to one staff member's events. Creates the channel if needed.
    pub fn subscribe(&self, staff_id: Ulid) -> broadcast::Receiver<Event> {
        self.channels
            .entry(staff_id)
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .subscribe()
    }

    /// No-op if nobody is listening. Channels whose last receiver is gone are dropped.
    pub fn send(&self, staff_id: Ulid, event: &Event) {
        let orphaned = match self.channels.get(&staff_id) {
            Some(sender) => sender.send(event.clone()).is_err(),
            None => false,
        };
        if orphaned {
            self.channels
                .remove_if(&staff_id, |_, sender| sender.receiver_count() == 0);
        }
    }

    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::AppointmentStatus;

    #[tokio::test]
    async fn subscriber_receives_staff_events() {
        let hub = NotifyHub::new();
        let staff_id = Ulid::new();
        let mut rx = hub.subscribe(staff_id);

        let event = Event::AppointmentStatusChanged {
            id: Ulid::new(),
            staff_id,
            status: AppointmentStatus::Cancelled,
        };
        hub.send(staff_id, &event);

        assert_eq!(rx.recv().await.unwrap(), event);
    }

    #[tokio::test]
    async fn other_staff_events_are_not_delivered() {
        let hub = NotifyHub::new();
        let watched = Ulid::new();
        let mut rx = hub.subscribe(watched);

        let other = Ulid::new();
        hub.send(
            other,
            &Event::StaffUpdated {
                id: other,
                name: "x".into(),
                timezone: "UTC".into(),
                active: true,
            },
        );
        tokio_test::assert_err!(rx.try_recv());
    }

    #[test]
    fn dropped_subscribers_release_channel() {
        let hub = NotifyHub::new();
        let staff_id = Ulid::new();
        drop(hub.subscribe(staff_id));
        assert_eq!(hub.channel_count(), 1);

        hub.send(
            staff_id,
            &Event::StaffCreated {
                id: staff_id,
                name: "x".into(),
                timezone: "UTC".into(),
            },
        );
        assert_eq!(hub.channel_count(), 0);
    }
}
