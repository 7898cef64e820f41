//! Per-root unilateral pub/sub bus.
//!
//! Carries settle notifications and state broadcasts to subscribers
//! (triggers and client subscriptions). Items published while the caller
//! holds the root's asserted-states lock are delivered to each subscriber
//! in publish order; consecutive `settled` items may be coalesced per
//! subscriber.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use crossbeam::channel::{Receiver, Sender, TryRecvError, TrySendError};
use serde_json::Value;
use thiserror::Error;

use crate::config::PublisherLimits;

fn is_settle(payload: &Value) -> bool {
    payload.get("settled").is_some()
}

pub struct Subscription {
    receiver: Receiver<Arc<Value>>,
    settle_queued: Arc<AtomicBool>,
}

impl Subscription {
    /// The raw receiver, for use in `select!` loops. Callers must pass every
    /// item received this way to [`Subscription::acknowledge`].
    pub fn receiver(&self) -> &Receiver<Arc<Value>> {
        &self.receiver
    }

    pub fn acknowledge(&self, item: &Value) {
        if is_settle(item) {
            self.settle_queued.store(false, Ordering::Release);
        }
    }

    /// Drain everything currently queued.
    pub fn drain_pending(&self) -> Vec<Arc<Value>> {
        let mut items = Vec::new();
        loop {
            match self.receiver.try_recv() {
                Ok(item) => {
                    self.acknowledge(&item);
                    items.push(item);
                }
                Err(TryRecvError::Empty | TryRecvError::Disconnected) => break,
            }
        }
        items
    }
}

#[derive(Error, Debug)]
pub enum PublisherError {
    #[error("subscriber limit reached ({max_subscribers})")]
    SubscriberLimitReached { max_subscribers: usize },
}

struct SubscriberState {
    sender: Sender<Arc<Value>>,
    settle_queued: Arc<AtomicBool>,
}

struct PublisherState {
    limits: PublisherLimits,
    next_id: u64,
    subscribers: BTreeMap<u64, SubscriberState>,
}

#[derive(Clone)]
pub struct UnilateralPublisher {
    inner: Arc<Mutex<PublisherState>>,
}

impl UnilateralPublisher {
    pub fn new(limits: PublisherLimits) -> Self {
        Self {
            inner: Arc::new(Mutex::new(PublisherState {
                limits,
                next_id: 1,
                subscribers: BTreeMap::new(),
            })),
        }
    }

    pub fn subscribe(&self) -> Result<Subscription, PublisherError> {
        let mut state = self.inner.lock().expect("publisher lock poisoned");
        if state.subscribers.len() >= state.limits.max_subscribers {
            return Err(PublisherError::SubscriberLimitReached {
                max_subscribers: state.limits.max_subscribers,
            });
        }
        let (sender, receiver) = crossbeam::channel::bounded(state.limits.max_queue_events.max(1));
        let settle_queued = Arc::new(AtomicBool::new(false));
        let id = state.next_id;
        state.next_id += 1;
        state.subscribers.insert(
            id,
            SubscriberState {
                sender,
                settle_queued: Arc::clone(&settle_queued),
            },
        );
        Ok(Subscription {
            receiver,
            settle_queued,
        })
    }

    pub fn publish(&self, payload: Value) {
        let settle = is_settle(&payload);
        let item = Arc::new(payload);
        let mut state = self.inner.lock().expect("publisher lock poisoned");
        let mut dropped = Vec::new();
        for (id, subscriber) in &state.subscribers {
            if settle {
                // Coalesce only across *successive* settles: the previously
                // enqueued item must itself be a settle, and still undrained.
                if subscriber.settle_queued.swap(true, Ordering::AcqRel) {
                    continue;
                }
            } else {
                // Any interleaved non-settle ends the run; the next settle
                // must be delivered.
                subscriber.settle_queued.store(false, Ordering::Release);
            }
            match subscriber.sender.try_send(Arc::clone(&item)) {
                Ok(()) => {}
                Err(TrySendError::Full(_)) => {
                    tracing::warn!("dropping lagged unilateral subscriber");
                    dropped.push(*id);
                }
                Err(TrySendError::Disconnected(_)) => {
                    dropped.push(*id);
                }
            }
        }
        for id in dropped {
            state.subscribers.remove(&id);
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner
            .lock()
            .expect("publisher lock poisoned")
            .subscribers
            .len()
    }
}
