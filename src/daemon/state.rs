//! Client state assertions and the per-root assertion FIFO.
//!
//! The root owns the strong references; the client session keeps weak ones.
//! All disposition transitions happen while holding the root's
//! asserted-states lock, and only the head of a name's FIFO may broadcast.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, Weak};

use serde_json::Value;
use thiserror::Error;

use super::root::Root;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientStateDisposition {
    PendingEnter,
    Asserted,
    PendingLeave,
    Done,
}

struct AssertionShared {
    disposition: ClientStateDisposition,
    /// Enter broadcast deferred until this assertion reaches the head of
    /// its FIFO.
    enter_payload: Option<Value>,
}

pub struct ClientStateAssertion {
    pub root: Weak<Root>,
    pub name: String,
    shared: Mutex<AssertionShared>,
}

impl ClientStateAssertion {
    pub fn new(root: &Arc<Root>, name: String) -> Arc<Self> {
        Arc::new(Self {
            root: Arc::downgrade(root),
            name,
            shared: Mutex::new(AssertionShared {
                disposition: ClientStateDisposition::PendingEnter,
                enter_payload: None,
            }),
        })
    }

    pub fn disposition(&self) -> ClientStateDisposition {
        self.shared.lock().expect("assertion lock poisoned").disposition
    }

    pub fn set_disposition(&self, disposition: ClientStateDisposition) {
        self.shared
            .lock()
            .expect("assertion lock poisoned")
            .disposition = disposition;
    }

    pub fn set_enter_payload(&self, payload: Value) {
        self.shared
            .lock()
            .expect("assertion lock poisoned")
            .enter_payload = Some(payload);
    }

    pub fn take_enter_payload(&self) -> Option<Value> {
        self.shared
            .lock()
            .expect("assertion lock poisoned")
            .enter_payload
            .take()
    }
}

#[derive(Error, Debug)]
pub enum StateError {
    #[error("state {0} is already asserted")]
    AlreadyAsserted(String),
}

/// Per-name FIFOs of assertions for one root.
#[derive(Default)]
pub struct AssertedStates {
    states: HashMap<String, VecDeque<Arc<ClientStateAssertion>>>,
}

impl AssertedStates {
    /// Append an assertion. Fails while any queued entry for the name has
    /// not reached `Done`.
    pub fn queue_assertion(
        &mut self,
        assertion: Arc<ClientStateAssertion>,
    ) -> Result<(), StateError> {
        let queue = self.states.entry(assertion.name.clone()).or_default();
        if queue
            .iter()
            .any(|a| a.disposition() != ClientStateDisposition::Done)
        {
            return Err(StateError::AlreadyAsserted(assertion.name.clone()));
        }
        queue.push_back(assertion);
        Ok(())
    }

    pub fn is_front(&self, assertion: &Arc<ClientStateAssertion>) -> bool {
        self.states
            .get(&assertion.name)
            .and_then(|q| q.front())
            .is_some_and(|front| Arc::ptr_eq(front, assertion))
    }

    /// Unlink an assertion and return the new head of its FIFO, if any.
    pub fn remove_assertion(
        &mut self,
        assertion: &Arc<ClientStateAssertion>,
    ) -> Option<Arc<ClientStateAssertion>> {
        let queue = self.states.get_mut(&assertion.name)?;
        queue.retain(|a| !Arc::ptr_eq(a, assertion));
        let front = queue.front().cloned();
        if queue.is_empty() {
            self.states.remove(&assertion.name);
        }
        front
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }

    #[cfg(test)]
    pub fn queue_len(&self, name: &str) -> usize {
        self.states.get(name).map(VecDeque::len).unwrap_or(0)
    }
}
