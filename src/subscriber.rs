// MIT License - Copyright (c) 2026 Peter Wright
// Subscriber API: handlers, filters and handles

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc;

use crate::error::SubscriberError;
use crate::event::DecodedEvent;

/// Receives decoded events.
///
/// Called from the account's delivery task, one event at a time and in
/// wire order. Implementations must not block: hand heavy work off to a
/// channel or task. The return value never affects the panel's ACK.
pub trait EventHandler: Send + Sync + 'static {
    /// Returns `Ok(true)` when the event changed visible state.
    fn on_event(&self, event: &DecodedEvent) -> Result<bool, SubscriberError>;
}

impl<F> EventHandler for F
where
    F: Fn(&DecodedEvent) -> Result<bool, SubscriberError> + Send + Sync + 'static,
{
    fn on_event(&self, event: &DecodedEvent) -> Result<bool, SubscriberError> {
        self(event)
    }
}

/// Which accounts a subscription listens to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AccountFilter {
    Any,
    Account(String),
}

/// Selects the events a subscription receives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionFilter {
    pub account: AccountFilter,
    /// Restrict to one zone; `None` for every zone.
    pub zone: Option<u32>,
}

impl SubscriptionFilter {
    /// Every event of every account.
    pub fn all() -> Self {
        Self {
            account: AccountFilter::Any,
            zone: None,
        }
    }

    /// Every event of one account.
    pub fn account(id: impl Into<String>) -> Self {
        Self {
            account: AccountFilter::Account(id.into().to_ascii_uppercase()),
            zone: None,
        }
    }

    pub fn zone(mut self, zone: u32) -> Self {
        self.zone = Some(zone);
        self
    }

    pub fn matches(&self, event: &DecodedEvent) -> bool {
        let account = match &self.account {
            AccountFilter::Any => true,
            AccountFilter::Account(id) => *id == event.account,
        };
        account && self.zone.map_or(true, |zone| zone == event.zone)
    }
}

/// Identifies a subscription for [`crate::SiaReceiver::unsubscribe`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SubscriptionHandle {
    pub(crate) id: u64,
    pub(crate) account: Option<String>,
}

impl SubscriptionHandle {
    pub fn id(&self) -> u64 {
        self.id
    }
}

pub(crate) enum Sink {
    Handler(Box<dyn EventHandler>),
    Channel(mpsc::Sender<Arc<DecodedEvent>>),
}

/// A registered subscriber.
pub(crate) struct Subscription {
    pub(crate) id: u64,
    pub(crate) filter: SubscriptionFilter,
    sink: Sink,
    active: AtomicBool,
}

impl Subscription {
    pub(crate) fn new(id: u64, filter: SubscriptionFilter, sink: Sink) -> Self {
        Self {
            id,
            filter,
            sink,
            active: AtomicBool::new(true),
        }
    }

    pub(crate) fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    /// Stop future deliveries. A call already in progress completes.
    pub(crate) fn deactivate(&self) {
        self.active.store(false, Ordering::Release);
    }

    /// Offer one event. Panics in the handler are caught and reported.
    pub(crate) fn deliver(&self, event: &Arc<DecodedEvent>) -> Result<bool, SubscriberError> {
        if !self.is_active() || !self.filter.matches(event) {
            return Ok(false);
        }
        match &self.sink {
            Sink::Handler(handler) => {
                panic::catch_unwind(AssertUnwindSafe(|| handler.on_event(event)))
                    .unwrap_or(Err(SubscriberError::Panicked))
            }
            Sink::Channel(tx) => match tx.try_send(Arc::clone(event)) {
                Ok(()) => Ok(true),
                Err(mpsc::error::TrySendError::Full(_)) => Err(SubscriberError::ChannelFull),
                Err(mpsc::error::TrySendError::Closed(_)) => Err(SubscriberError::ChannelClosed),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{EventCode, EventFlags, Qualifier};
    use crate::protocol::MessageType;
    use chrono::Utc;
    use std::sync::atomic::AtomicUsize;

    fn event(account: &str, zone: u32) -> Arc<DecodedEvent> {
        Arc::new(DecodedEvent {
            account: account.to_string(),
            zone,
            code: EventCode::new("BA").unwrap(),
            qualifier: Qualifier::New,
            unit: Some(3),
            user: None,
            message: None,
            sequence: 1,
            received_at: Utc::now(),
            panel_time: None,
            receiver: None,
            line: None,
            extended: Vec::new(),
            message_type: MessageType::SiaDcs,
            flags: EventFlags::empty(),
        })
    }

    #[test]
    fn test_filter_matching() {
        assert!(SubscriptionFilter::all().matches(&event("1234", 2)));
        assert!(SubscriptionFilter::account("1234").matches(&event("1234", 2)));
        assert!(!SubscriptionFilter::account("1234").matches(&event("5678", 2)));
        assert!(SubscriptionFilter::account("abcd").matches(&event("ABCD", 0)));
        assert!(SubscriptionFilter::account("1234").zone(2).matches(&event("1234", 2)));
        assert!(!SubscriptionFilter::account("1234").zone(1).matches(&event("1234", 2)));
        assert!(SubscriptionFilter::all().zone(0).matches(&event("9999", 0)));
    }

    #[test]
    fn test_closure_handler() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let sub = Subscription::new(
            1,
            SubscriptionFilter::all(),
            Sink::Handler(Box::new(move |_: &DecodedEvent| -> Result<bool, SubscriberError> {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(true)
            })),
        );
        assert!(sub.deliver(&event("1234", 1)).unwrap());
        sub.deactivate();
        assert!(!sub.deliver(&event("1234", 1)).unwrap());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_panic_is_caught() {
        let sub = Subscription::new(
            1,
            SubscriptionFilter::all(),
            Sink::Handler(Box::new(|_: &DecodedEvent| -> Result<bool, SubscriberError> {
                panic!("boom")
            })),
        );
        assert!(matches!(
            sub.deliver(&event("1234", 1)),
            Err(SubscriberError::Panicked)
        ));
    }

    #[test]
    fn test_channel_sink() {
        let (tx, mut rx) = mpsc::channel(1);
        let sub = Subscription::new(1, SubscriptionFilter::all(), Sink::Channel(tx));
        assert!(sub.deliver(&event("1234", 1)).unwrap());
        assert!(matches!(
            sub.deliver(&event("1234", 2)),
            Err(SubscriberError::ChannelFull)
        ));
        assert_eq!(rx.try_recv().unwrap().zone, 1);
        drop(rx);
        assert!(matches!(
            sub.deliver(&event("1234", 3)),
            Err(SubscriberError::ChannelClosed)
        ));
    }
}
