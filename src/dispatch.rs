// MIT License - Copyright (c) 2026 Peter Wright
// Per-account event queues and subscriber fan-out

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tokio::sync::{oneshot, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::error::{Result, SiaError};
use crate::event::DecodedEvent;
use crate::subscriber::{AccountFilter, Sink, Subscription, SubscriptionFilter, SubscriptionHandle};

type SubscriberList = RwLock<Vec<Arc<Subscription>>>;

/// Counters for one account, shared by its worker and delivery task.
#[derive(Debug, Default)]
pub(crate) struct AccountCounters {
    pub(crate) received: AtomicU64,
    pub(crate) accepted: AtomicU64,
    pub(crate) rejected: AtomicU64,
    pub(crate) delivered: AtomicU64,
    pub(crate) handler_errors: AtomicU64,
}

/// Snapshot of one account's counters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AccountStats {
    pub account: String,
    /// Frames routed to the account.
    pub received: u64,
    /// Messages that passed authentication and replay checks.
    pub accepted: u64,
    pub rejected: u64,
    /// Events offered to every subscriber.
    pub delivered: u64,
    /// Events evicted from a full delivery queue.
    pub dropped: u64,
    pub handler_errors: u64,
    /// Events currently waiting for delivery.
    pub queued: usize,
    pub subscribers: usize,
}

struct Queued {
    event: Arc<DecodedEvent>,
    /// Signalled once every subscriber was offered the event.
    done: oneshot::Sender<()>,
}

/// Bounded FIFO between an account worker and its delivery task.
///
/// Pushing never waits: when full, the oldest undelivered event is
/// evicted. Its `done` sender is dropped, which releases the ACK waiting
/// on it.
pub(crate) struct DeliveryQueue {
    items: Mutex<VecDeque<Queued>>,
    capacity: usize,
    notify: Notify,
    dropped: AtomicU64,
    closed: AtomicBool,
}

impl DeliveryQueue {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            items: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity: capacity.max(1),
            notify: Notify::new(),
            dropped: AtomicU64::new(0),
            closed: AtomicBool::new(false),
        }
    }

    /// Append an event. Returns the evicted event, if any.
    fn push(&self, queued: Queued) -> Option<Arc<DecodedEvent>> {
        let evicted = {
            let mut items = self.items.lock();
            let evicted = if items.len() >= self.capacity {
                items.pop_front().map(|old| old.event)
            } else {
                None
            };
            items.push_back(queued);
            evicted
        };
        if evicted.is_some() {
            self.dropped.fetch_add(1, Ordering::Relaxed);
        }
        self.notify.notify_one();
        evicted
    }

    async fn pop(&self) -> Option<Queued> {
        loop {
            let next = self.items.lock().pop_front();
            if let Some(queued) = next {
                return Some(queued);
            }
            if self.closed.load(Ordering::Acquire) {
                return None;
            }
            self.notify.notified().await;
        }
    }

    fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.notify.notify_one();
    }

    pub(crate) fn len(&self) -> usize {
        self.items.lock().len()
    }

    pub(crate) fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

/// Everything the dispatcher keeps for one account.
pub(crate) struct AccountChannel {
    pub(crate) account: String,
    subscribers: SubscriberList,
    wildcard: Arc<SubscriberList>,
    queue: DeliveryQueue,
    pub(crate) counters: Arc<AccountCounters>,
}

impl AccountChannel {
    /// Matching, active subscribers at this instant.
    fn snapshot(&self, event: &DecodedEvent) -> Vec<Arc<Subscription>> {
        let own = self.subscribers.read();
        let wildcard = self.wildcard.read();
        own.iter()
            .chain(wildcard.iter())
            .filter(|s| s.is_active() && s.filter.matches(event))
            .cloned()
            .collect()
    }

    /// Offer one event to every matching subscriber.
    fn deliver(&self, event: &Arc<DecodedEvent>) {
        for sub in self.snapshot(event) {
            if let Err(e) = sub.deliver(event) {
                self.counters.handler_errors.fetch_add(1, Ordering::Relaxed);
                warn!(
                    "Subscriber {} failed on {} event for account {}: {}",
                    sub.id, event.code, self.account, e
                );
            }
        }
        self.counters.delivered.fetch_add(1, Ordering::Relaxed);
    }

    async fn run(self: Arc<Self>) {
        debug!("Delivery task started for account {}", self.account);
        while let Some(Queued { event, done }) = self.queue.pop().await {
            self.deliver(&event);
            let _ = done.send(());
        }
        debug!("Delivery task stopped for account {}", self.account);
    }

    fn stats(&self) -> AccountStats {
        let c = &self.counters;
        AccountStats {
            account: self.account.clone(),
            received: c.received.load(Ordering::Relaxed),
            accepted: c.accepted.load(Ordering::Relaxed),
            rejected: c.rejected.load(Ordering::Relaxed),
            delivered: c.delivered.load(Ordering::Relaxed),
            dropped: self.queue.dropped(),
            handler_errors: c.handler_errors.load(Ordering::Relaxed),
            queued: self.queue.len(),
            subscribers: self.subscribers.read().len(),
        }
    }
}

/// Routes decoded events to subscribers.
///
/// The account set is fixed at construction. There is no global lock on
/// the delivery path: each account has its own subscriber list, queue and
/// delivery task; only wildcard subscriptions are shared.
pub struct Dispatcher {
    accounts: HashMap<String, Arc<AccountChannel>>,
    wildcard: Arc<SubscriberList>,
    next_id: AtomicU64,
}

impl Dispatcher {
    pub fn new<I, S>(accounts: I, queue_capacity: usize) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let wildcard: Arc<SubscriberList> = Arc::new(RwLock::new(Vec::new()));
        let accounts = accounts
            .into_iter()
            .map(|id| {
                let id = id.into().to_ascii_uppercase();
                let channel = AccountChannel {
                    account: id.clone(),
                    subscribers: RwLock::new(Vec::new()),
                    wildcard: Arc::clone(&wildcard),
                    queue: DeliveryQueue::new(queue_capacity),
                    counters: Arc::new(AccountCounters::default()),
                };
                (id, Arc::new(channel))
            })
            .collect();
        Self {
            accounts,
            wildcard,
            next_id: AtomicU64::new(1),
        }
    }

    /// Start one delivery task per account.
    pub fn spawn_delivery(&self) -> Vec<JoinHandle<()>> {
        self.accounts
            .values()
            .map(|channel| tokio::spawn(Arc::clone(channel).run()))
            .collect()
    }

    pub(crate) fn channel(&self, account: &str) -> Option<&Arc<AccountChannel>> {
        self.accounts.get(account)
    }

    pub(crate) fn subscribe_sink(
        &self,
        filter: SubscriptionFilter,
        sink: Sink,
    ) -> Result<SubscriptionHandle> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let account = match &filter.account {
            AccountFilter::Any => None,
            AccountFilter::Account(account) => Some(account.clone()),
        };
        let list = match &account {
            None => &*self.wildcard,
            Some(account) => {
                &self
                    .accounts
                    .get(account)
                    .ok_or_else(|| SiaError::UnknownAccount {
                        account: account.clone(),
                    })?
                    .subscribers
            }
        };
        list.write().push(Arc::new(Subscription::new(id, filter, sink)));
        debug!("Subscription {} registered", id);
        Ok(SubscriptionHandle { id, account })
    }

    /// Remove a subscription. Returns `false` when it was already removed.
    pub fn unsubscribe(&self, handle: &SubscriptionHandle) -> bool {
        let list = match &handle.account {
            None => &*self.wildcard,
            Some(account) => match self.accounts.get(account) {
                Some(channel) => &channel.subscribers,
                None => return false,
            },
        };
        let mut subs = list.write();
        match subs.iter().position(|s| s.id == handle.id) {
            Some(idx) => {
                subs.remove(idx).deactivate();
                debug!("Subscription {} removed", handle.id);
                true
            }
            None => false,
        }
    }

    /// Queue an event for delivery. The returned receiver completes once
    /// every subscriber was offered the event, or errors if the event was
    /// evicted or the dispatcher closed.
    pub fn enqueue(&self, event: Arc<DecodedEvent>) -> Result<oneshot::Receiver<()>> {
        let channel = self
            .accounts
            .get(&event.account)
            .ok_or_else(|| SiaError::UnknownAccount {
                account: event.account.clone(),
            })?;
        let (done, rx) = oneshot::channel();
        if let Some(old) = channel.queue.push(Queued { event, done }) {
            warn!(
                "Delivery queue full for account {}: dropped {} event seq {:04}",
                channel.account, old.code, old.sequence
            );
        }
        Ok(rx)
    }

    pub fn stats(&self) -> Vec<AccountStats> {
        let mut stats: Vec<_> = self.accounts.values().map(|c| c.stats()).collect();
        stats.sort_by(|a, b| a.account.cmp(&b.account));
        stats
    }

    /// Stop delivery tasks once their queues drain.
    pub fn close(&self) {
        for channel in self.accounts.values() {
            channel.queue.close();
        }
    }
}
