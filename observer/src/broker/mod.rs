//! Correlate inbound notifications with the scenario steps awaiting them.
//!
//! A [Broker] receives every [Envelope] pushed to one actor. Before triggering an action, a
//! scenario registers an [Expectation] (a [CorrelationKey] plus an optional predicate) and later
//! awaits it. Each registration occupies a one-shot slot in an arena keyed by registration order:
//!
//! - [Broker::dispatch] resolves every slot whose key and predicate match, in registration order,
//!   and removes it. Redelivering the same envelope afterwards resolves nothing.
//! - An envelope that matches no slot is journaled and otherwise dropped. Late or duplicate
//!   notifications are expected once a scenario stops listening.
//! - Dropping an unresolved [Expectation] (for example, when the awaiting step times out) frees
//!   its slot.
//! - [Broker::teardown] frees every slot (waiters observe [Error::Canceled]) and clears the journal
//!   so nothing leaks into the next scenario.
//!
//! Deadlines are not enforced here. Whoever awaits an [Expectation] decides how long to wait.

use crate::{
    lifecycle::Status,
    wire::{Envelope, Kind},
    Error,
};
use futures::{channel::oneshot, FutureExt};
use std::{
    collections::BTreeMap,
    fmt,
    future::Future,
    pin::Pin,
    sync::{Arc, Mutex, Weak},
    task::{Context, Poll},
};
use tracing::debug;

mod metrics;
pub use metrics::Metrics;
mod router;
pub use router::Router;

/// The payload field used to correlate a notification.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Field {
    ReferenceId,
    RequestId,
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Field::ReferenceId => f.write_str("reference_id"),
            Field::RequestId => f.write_str("request_id"),
        }
    }
}

/// Routes an [Envelope] to the registrations waiting for it.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct CorrelationKey {
    pub kind: Kind,
    pub field: Field,
    pub value: String,
}

impl CorrelationKey {
    /// Create a key for `kind`, correlating action results by `reference_id` and everything
    /// else by `request_id`.
    pub fn new(kind: Kind, value: impl Into<String>) -> Self {
        let field = if kind.is_action_result() {
            Field::ReferenceId
        } else {
            Field::RequestId
        };
        Self {
            kind,
            field,
            value: value.into(),
        }
    }

    /// Returns whether `envelope` carries this key.
    pub fn matches(&self, envelope: &Envelope) -> bool {
        if envelope.kind() != self.kind {
            return false;
        }
        let value = match self.field {
            Field::ReferenceId => envelope.reference_id(),
            Field::RequestId => envelope.request_id(),
        };
        value == Some(self.value.as_str())
    }
}

impl fmt::Display for CorrelationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({}={})", self.kind, self.field, self.value)
    }
}

/// Additional content check applied after a [CorrelationKey] matches.
///
/// Predicates run while the broker is locked and must not call back into it.
pub type Predicate = Box<dyn Fn(&Envelope) -> bool + Send>;

/// A pending registration.
struct Slot {
    key: CorrelationKey,
    predicate: Option<Predicate>,
    responder: oneshot::Sender<Envelope>,
}

impl Slot {
    fn matches(&self, envelope: &Envelope) -> bool {
        self.key.matches(envelope) && self.predicate.as_ref().map_or(true, |p| p(envelope))
    }
}

#[derive(Default)]
struct State {
    next: u64,
    slots: BTreeMap<u64, Slot>,
    journal: Vec<Envelope>,
}

/// Receives the notification stream of one actor.
#[derive(Clone)]
pub struct Broker {
    actor: String,
    state: Arc<Mutex<State>>,
    metrics: Metrics,
}

impl Broker {
    /// Create a new [Broker] for `actor` with unregistered metrics.
    pub fn new(actor: impl Into<String>) -> Self {
        Self::with_metrics(actor, Metrics::default())
    }

    /// Create a new [Broker] for `actor` reporting to `metrics`.
    pub fn with_metrics(actor: impl Into<String>, metrics: Metrics) -> Self {
        Self {
            actor: actor.into(),
            state: Arc::new(Mutex::new(State::default())),
            metrics,
        }
    }

    /// The actor whose notifications this broker receives.
    pub fn actor(&self) -> &str {
        &self.actor
    }

    /// Register interest in the first envelope carrying `key` (and satisfying `predicate`).
    pub fn register(&self, key: CorrelationKey, predicate: Option<Predicate>) -> Expectation {
        let (responder, receiver) = oneshot::channel();
        let mut state = self.state.lock().unwrap();
        let id = state.next;
        state.next += 1;
        debug!(actor = %self.actor, id, %key, "registered expectation");
        state.slots.insert(
            id,
            Slot {
                key: key.clone(),
                predicate,
                responder,
            },
        );
        self.metrics.pending.set(state.slots.len() as i64);

        Expectation {
            id,
            actor: self.actor.clone(),
            key,
            receiver,
            state: Arc::downgrade(&self.state),
            metrics: self.metrics.clone(),
        }
    }

    /// Register interest in the first `kind` notification correlated by `value`.
    pub fn expect(&self, kind: Kind, value: impl Into<String>) -> Expectation {
        self.register(CorrelationKey::new(kind, value), None)
    }

    /// Register interest in the first `kind` notification correlated by `value` that also
    /// satisfies `predicate`.
    pub fn expect_where(
        &self,
        kind: Kind,
        value: impl Into<String>,
        predicate: impl Fn(&Envelope) -> bool + Send + 'static,
    ) -> Expectation {
        self.register(CorrelationKey::new(kind, value), Some(Box::new(predicate)))
    }

    /// Register interest in the first status update for `request_id` reporting `status` with
    /// the given `closed` flag.
    pub fn expect_status(
        &self,
        request_id: impl Into<String>,
        status: Status,
        closed: bool,
    ) -> Expectation {
        self.expect_where(Kind::RequestStatus, request_id, move |envelope| {
            envelope
                .request_status()
                .is_some_and(|s| s.status == status && s.closed == closed)
        })
    }

    /// Deliver `envelope`, returning the number of registrations it resolved.
    pub fn dispatch(&self, envelope: Envelope) -> usize {
        self.metrics.dispatched.inc();
        let mut state = self.state.lock().unwrap();

        // Find all matching slots (in registration order)
        let matched: Vec<u64> = state
            .slots
            .iter()
            .filter(|(_, slot)| slot.matches(&envelope))
            .map(|(id, _)| *id)
            .collect();

        // Resolve each matching slot once
        let mut resolved = 0;
        for id in matched {
            let Some(slot) = state.slots.remove(&id) else {
                continue;
            };
            if slot.responder.send(envelope.clone()).is_err() {
                debug!(actor = %self.actor, id, key = %slot.key, "waiter already gone");
                self.metrics.canceled.inc();
                continue;
            }
            debug!(actor = %self.actor, id, key = %slot.key, "resolved expectation");
            resolved += 1;
        }
        self.metrics.pending.set(state.slots.len() as i64);

        // Record the envelope regardless of whether anyone was waiting
        if resolved == 0 {
            debug!(
                actor = %self.actor,
                kind = %envelope.kind(),
                request_id = ?envelope.request_id(),
                reference_id = ?envelope.reference_id(),
                "no matching expectation"
            );
            self.metrics.dropped.inc();
        } else {
            self.metrics.resolved.inc_by(resolved as u64);
        }
        state.journal.push(envelope);
        resolved
    }

    /// Number of registrations awaiting an envelope.
    pub fn pending(&self) -> usize {
        self.state.lock().unwrap().slots.len()
    }

    /// Every envelope observed for `request_id`, in arrival order.
    pub fn journal(&self, request_id: &str) -> Vec<Envelope> {
        self.state
            .lock()
            .unwrap()
            .journal
            .iter()
            .filter(|e| e.request_id() == Some(request_id))
            .cloned()
            .collect()
    }

    /// Release all registrations and clear the journal, returning the number of registrations
    /// that were still pending.
    pub fn teardown(&self) -> usize {
        let mut state = self.state.lock().unwrap();
        let canceled = state.slots.len();
        state.slots.clear();
        state.journal.clear();
        self.metrics.pending.set(0);
        self.metrics.canceled.inc_by(canceled as u64);
        if canceled > 0 {
            debug!(actor = %self.actor, canceled, "released pending expectations");
        }
        canceled
    }
}

/// A one-shot future resolving to the first [Envelope] matching a registration.
///
/// Dropping an unresolved [Expectation] releases its registration.
pub struct Expectation {
    id: u64,
    actor: String,
    key: CorrelationKey,
    receiver: oneshot::Receiver<Envelope>,
    state: Weak<Mutex<State>>,
    metrics: Metrics,
}

impl Expectation {
    /// The actor whose broker holds this registration.
    pub fn actor(&self) -> &str {
        &self.actor
    }

    /// The key this registration waits on.
    pub fn key(&self) -> &CorrelationKey {
        &self.key
    }
}

impl Future for Expectation {
    type Output = Result<Envelope, Error>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match self.receiver.poll_unpin(cx) {
            Poll::Ready(Ok(envelope)) => Poll::Ready(Ok(envelope)),
            Poll::Ready(Err(oneshot::Canceled)) => Poll::Ready(Err(Error::Canceled {
                actor: self.actor.clone(),
                key: self.key.clone(),
            })),
            Poll::Pending => Poll::Pending,
        }
    }
}

impl Drop for Expectation {
    fn drop(&mut self) {
        let Some(state) = self.state.upgrade() else {
            return;
        };
        let Ok(mut state) = state.lock() else {
            return;
        };
        if state.slots.remove(&self.id).is_some() {
            debug!(actor = %self.actor, id = self.id, key = %self.key, "released expectation");
            self.metrics.canceled.inc();
            self.metrics.pending.set(state.slots.len() as i64);
        }
    }
}
