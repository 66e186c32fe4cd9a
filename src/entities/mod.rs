// MIT License - Copyright (c) 2026 Peter Wright
// Stateful views over the event stream (alarm panel, text log)

pub mod alarm_panel;
pub mod text_log;

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc;

use crate::error::SubscriberError;
use crate::event::DecodedEvent;
use crate::subscriber::{EventHandler, SubscriptionFilter};

pub use alarm_panel::{AlarmPanelEntity, AlarmState};
pub use text_log::TextLogEntity;

/// Kind of entity, used in topic names and payloads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityKind {
    Alarm,
    Log,
}

impl EntityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Alarm => "alarm",
            Self::Log => "log",
        }
    }
}

/// A piece of state derived from one account zone's events.
pub trait SiaEntity: Send + 'static {
    fn kind(&self) -> EntityKind;
    fn account(&self) -> &str;
    fn zone(&self) -> u32;

    /// Restore state persisted by a previous run.
    fn handle_last_state(&mut self, last_state: Option<&str>);

    /// Apply an event. Returns true when the event changed this entity.
    fn update_state(&mut self, event: &DecodedEvent) -> bool;

    fn state(&self) -> String;
    fn available(&self) -> bool;

    /// Events this entity wants to see.
    fn filter(&self) -> SubscriptionFilter {
        SubscriptionFilter::account(self.account()).zone(self.zone())
    }
}

/// Entities for one account: a log for zone 0, and an alarm panel plus a
/// log for each zone 1..=zones.
pub fn entities_for(account: &str, zones: u32) -> Vec<Box<dyn SiaEntity>> {
    let mut entities: Vec<Box<dyn SiaEntity>> = vec![Box::new(TextLogEntity::new(account, 0))];
    for zone in 1..=zones {
        entities.push(Box::new(AlarmPanelEntity::new(account, zone)));
        entities.push(Box::new(TextLogEntity::new(account, zone)));
    }
    entities
}

/// A state change to publish.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityUpdate {
    pub kind: EntityKind,
    pub account: String,
    pub zone: u32,
    pub state: String,
    pub available: bool,
}

pub type SharedEntity = Arc<Mutex<Box<dyn SiaEntity>>>;

/// Subscribes an entity to the receiver and forwards its state changes.
///
/// The handler only updates in-memory state and queues the change; the
/// consumer of `updates` does the I/O.
pub struct EntityHandler {
    entity: SharedEntity,
    updates: mpsc::Sender<EntityUpdate>,
}

impl EntityHandler {
    pub fn new(entity: SharedEntity, updates: mpsc::Sender<EntityUpdate>) -> Self {
        Self { entity, updates }
    }
}

impl EventHandler for EntityHandler {
    fn on_event(&self, event: &DecodedEvent) -> Result<bool, SubscriberError> {
        let update = {
            let mut entity = self.entity.lock();
            if !entity.update_state(event) {
                return Ok(false);
            }
            EntityUpdate {
                kind: entity.kind(),
                account: entity.account().to_string(),
                zone: entity.zone(),
                state: entity.state(),
                available: entity.available(),
            }
        };
        self.updates.try_send(update).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => SubscriberError::ChannelFull,
            mpsc::error::TrySendError::Closed(_) => SubscriberError::ChannelClosed,
        })?;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{EventCode, EventFlags, Qualifier};
    use crate::protocol::MessageType;
    use chrono::Utc;

    pub(crate) fn event(code: &str, zone: u32, message: Option<&str>) -> DecodedEvent {
        DecodedEvent {
            account: "1234".to_string(),
            zone,
            code: EventCode::new(code).unwrap(),
            qualifier: Qualifier::New,
            unit: Some(1),
            user: None,
            message: message.map(str::to_string),
            sequence: 1,
            received_at: Utc::now(),
            panel_time: None,
            receiver: None,
            line: None,
            extended: Vec::new(),
            message_type: MessageType::SiaDcs,
            flags: EventFlags::empty(),
        }
    }

    #[test]
    fn test_entities_for_account() {
        let entities = entities_for("1234", 2);
        let kinds: Vec<_> = entities.iter().map(|e| (e.kind(), e.zone())).collect();
        assert_eq!(
            kinds,
            vec![
                (EntityKind::Log, 0),
                (EntityKind::Alarm, 1),
                (EntityKind::Log, 1),
                (EntityKind::Alarm, 2),
                (EntityKind::Log, 2),
            ]
        );
        assert_eq!(entities[1].filter(), SubscriptionFilter::account("1234").zone(1));
    }

    #[test]
    fn test_handler_forwards_changes() {
        let (tx, mut rx) = mpsc::channel(4);
        let entity: SharedEntity = Arc::new(Mutex::new(Box::new(AlarmPanelEntity::new("1234", 1))));
        let handler = EntityHandler::new(Arc::clone(&entity), tx);

        assert!(handler.on_event(&event("CA", 1, None)).unwrap());
        assert!(!handler.on_event(&event("RP", 1, None)).unwrap());

        let update = rx.try_recv().unwrap();
        assert_eq!(update.kind, EntityKind::Alarm);
        assert_eq!(update.state, "armed_away");
        assert!(rx.try_recv().is_err());
        assert_eq!(entity.lock().state(), "armed_away");
    }
}
