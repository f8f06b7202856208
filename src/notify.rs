use dashmap::DashMap;
use serde::Serialize;
use tokio::sync::broadcast;

use crate::model::*;

const CHANNEL_CAPACITY: usize = 256;

/// A committed change to a location's schedule. Receivers refresh their
/// cached location/customer aggregate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum ScheduleChange {
    Booked {
        location_id: LocationId,
        appointment_id: AppointmentId,
        customer_id: Option<CustomerId>,
        span: Span,
        participants: Vec<StaffId>,
    },
    Cancelled {
        location_id: LocationId,
        appointment_id: AppointmentId,
    },
}

impl ScheduleChange {
    pub fn location_id(&self) -> LocationId {
        match self {
            ScheduleChange::Booked { location_id, .. }
            | ScheduleChange::Cancelled { location_id, .. } => *location_id,
        }
    }
}

/// Broadcast hub for schedule changes, one channel per location.
pub struct NotifyHub {
    channels: DashMap<LocationId, broadcast::Sender<ScheduleChange>>,
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

    /// Subscribe to changes for a location. Creates the channel if needed.
    pub fn subscribe(&self, location_id: LocationId) -> broadcast::Receiver<ScheduleChange> {
        let sender = self
            .channels
            .entry(location_id)
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0);
        sender.subscribe()
    }

    /// Publish a change. No-op if nobody is listening.
    pub fn send(&self, change: ScheduleChange) {
        if let Some(sender) = self.channels.get(&change.location_id()) {
            let _ = sender.send(change);
        }
    }

    /// Drop a location's channel once its last receiver is gone.
    pub fn prune(&self, location_id: &LocationId) {
        self.channels
            .remove_if(location_id, |_, sender| sender.receiver_count() == 0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ulid::Ulid;

    #[tokio::test]
    async fn subscribe_and_receive() {
        let hub = NotifyHub::new();
        let location_id = Ulid::new();
        let mut rx = hub.subscribe(location_id);

        let change = ScheduleChange::Cancelled {
            location_id,
            appointment_id: Ulid::new(),
        };
        hub.send(change.clone());

        assert_eq!(rx.recv().await.unwrap(), change);
    }

    #[tokio::test]
    async fn other_locations_not_delivered() {
        let hub = NotifyHub::new();
        let mine = Ulid::new();
        let mut rx = hub.subscribe(mine);

        hub.send(ScheduleChange::Cancelled {
            location_id: Ulid::new(),
            appointment_id: Ulid::new(),
        });
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn send_without_subscribers_is_noop() {
        let hub = NotifyHub::new();
        hub.send(ScheduleChange::Cancelled {
            location_id: Ulid::new(),
            appointment_id: Ulid::new(),
        });
    }

    #[test]
    fn prune_keeps_live_channels() {
        let hub = NotifyHub::new();
        let live = Ulid::new();
        let dead = Ulid::new();
        let _rx = hub.subscribe(live);
        drop(hub.subscribe(dead));

        hub.prune(&live);
        hub.prune(&dead);
        assert!(hub.channels.contains_key(&live));
        assert!(!hub.channels.contains_key(&dead));
    }
}
