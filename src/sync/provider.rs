//! Transport contract and an in-process loopback implementation.

use serde::{Deserialize, Serialize};
use std::cell::RefCell;
use std::rc::Rc;

use super::presence::PresenceRecord;
use super::replica::{ClientId, Delta};
use crate::core::StateVector;

/// Messages exchanged between participants.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum WireMessage {
    /// Asks peers for everything newer than `state`.
    SyncRequest { from: ClientId, state: StateVector },
    Delta { from: ClientId, delta: Delta },
    Presence(PresenceRecord),
    Leave { client: ClientId },
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("connection rejected: {0}")]
    ConnectionRejected(String),
    #[error("transport is not connected")]
    NotConnected,
    #[error("failed to encode message: {0}")]
    Encode(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(u64);

pub type MessageHandler = Box<dyn FnMut(WireMessage)>;

/// Delivers messages to the other participants of a document.
///
/// Handlers are invoked for messages from other participants only.
pub trait TransportProvider {
    fn connect(&mut self) -> Result<(), TransportError>;

    fn disconnect(&mut self);

    fn is_connected(&self) -> bool;

    fn broadcast(&mut self, message: WireMessage) -> Result<(), TransportError>;

    fn subscribe(&mut self, handler: MessageHandler) -> SubscriptionId;

    fn unsubscribe(&mut self, id: SubscriptionId) -> bool;
}

pub type SharedProvider = Rc<RefCell<dyn TransportProvider>>;

#[derive(Default)]
struct Endpoint {
    connected: bool,
    handlers: Vec<(SubscriptionId, MessageHandler)>,
}

#[derive(Default)]
struct HubState {
    endpoints: Vec<Endpoint>,
    reject_reason: Option<String>,
    next_subscription: u64,
    delivered: usize,
}

/// In-process broadcast medium. Every message is JSON encoded and decoded
/// on the way through, like a real wire.
#[derive(Clone, Default)]
pub struct LoopbackHub {
    state: Rc<RefCell<HubState>>,
}

impl std::fmt::Debug for LoopbackHub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.borrow();
        f.debug_struct("LoopbackHub")
            .field("endpoints", &state.endpoints.len())
            .field("delivered", &state.delivered)
            .finish()
    }
}

impl LoopbackHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a new, disconnected endpoint on this hub.
    pub fn provider(&self) -> LoopbackProvider {
        let mut state = self.state.borrow_mut();
        state.endpoints.push(Endpoint::default());
        LoopbackProvider {
            hub: self.clone(),
            endpoint: state.endpoints.len() - 1,
        }
    }

    /// Same as [`provider`](Self::provider), behind the shared handle.
    pub fn shared_provider(&self) -> SharedProvider {
        Rc::new(RefCell::new(self.provider()))
    }

    /// Makes every later `connect` fail with `reason`; `None` accepts again.
    pub fn reject_connections(&self, reason: Option<&str>) {
        self.state.borrow_mut().reject_reason = reason.map(str::to_string);
    }

    /// Number of messages handed to handlers so far.
    pub fn delivered(&self) -> usize {
        self.state.borrow().delivered
    }
}

pub struct LoopbackProvider {
    hub: LoopbackHub,
    endpoint: usize,
}

impl std::fmt::Debug for LoopbackProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoopbackProvider")
            .field("endpoint", &self.endpoint)
            .field("connected", &self.is_connected())
            .finish()
    }
}

impl TransportProvider for LoopbackProvider {
    fn connect(&mut self) -> Result<(), TransportError> {
        let mut state = self.hub.state.borrow_mut();
        if let Some(reason) = &state.reject_reason {
            return Err(TransportError::ConnectionRejected(reason.clone()));
        }
        state.endpoints[self.endpoint].connected = true;
        Ok(())
    }

    fn disconnect(&mut self) {
        self.hub.state.borrow_mut().endpoints[self.endpoint].connected = false;
    }

    fn is_connected(&self) -> bool {
        self.hub.state.borrow().endpoints[self.endpoint].connected
    }

    fn broadcast(&mut self, message: WireMessage) -> Result<(), TransportError> {
        if !self.is_connected() {
            return Err(TransportError::NotConnected);
        }
        let payload =
            serde_json::to_string(&message).map_err(|err| TransportError::Encode(err.to_string()))?;

        let targets: Vec<usize> = {
            let state = self.hub.state.borrow();
            state
                .endpoints
                .iter()
                .enumerate()
                .filter(|(index, endpoint)| *index != self.endpoint && endpoint.connected)
                .map(|(index, _)| index)
                .collect()
        };

        for target in targets {
            // Handlers run without the hub borrowed so they may broadcast.
            let mut handlers =
                std::mem::take(&mut self.hub.state.borrow_mut().endpoints[target].handlers);
            for (_, handler) in &mut handlers {
                let decoded: WireMessage = serde_json::from_str(&payload)
                    .map_err(|err| TransportError::Encode(err.to_string()))?;
                handler(decoded);
            }
            let mut state = self.hub.state.borrow_mut();
            state.delivered += handlers.len();
            let endpoint = &mut state.endpoints[target];
            handlers.append(&mut endpoint.handlers);
            endpoint.handlers = handlers;
        }
        Ok(())
    }

    fn subscribe(&mut self, handler: MessageHandler) -> SubscriptionId {
        let mut state = self.hub.state.borrow_mut();
        let id = SubscriptionId(state.next_subscription);
        state.next_subscription += 1;
        state.endpoints[self.endpoint].handlers.push((id, handler));
        id
    }

    fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        let mut state = self.hub.state.borrow_mut();
        let handlers = &mut state.endpoints[self.endpoint].handlers;
        let before = handlers.len();
        handlers.retain(|(existing, _)| *existing != id);
        handlers.len() != before
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn collect(provider: &mut LoopbackProvider) -> Rc<RefCell<Vec<WireMessage>>> {
        let inbox = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&inbox);
        provider.subscribe(Box::new(move |message| sink.borrow_mut().push(message)));
        inbox
    }

    #[test]
    fn test_broadcast_reaches_other_connected_endpoints() {
        let hub = LoopbackHub::new();
        let mut a = hub.provider();
        let mut b = hub.provider();
        let mut c = hub.provider();
        let a_inbox = collect(&mut a);
        let b_inbox = collect(&mut b);
        let c_inbox = collect(&mut c);
        a.connect().unwrap();
        b.connect().unwrap();

        a.broadcast(WireMessage::Leave { client: 1 }).unwrap();

        assert!(a_inbox.borrow().is_empty());
        assert_eq!(*b_inbox.borrow(), vec![WireMessage::Leave { client: 1 }]);
        assert!(c_inbox.borrow().is_empty());
        assert_eq!(hub.delivered(), 1);
    }

    #[test]
    fn test_rejected_and_disconnected() {
        let hub = LoopbackHub::new();
        let mut a = hub.provider();
        hub.reject_connections(Some("offline"));
        assert_eq!(
            a.connect(),
            Err(TransportError::ConnectionRejected("offline".into()))
        );
        assert_eq!(
            a.broadcast(WireMessage::Leave { client: 1 }),
            Err(TransportError::NotConnected)
        );
        hub.reject_connections(None);
        a.connect().unwrap();
        assert!(a.is_connected());
        a.disconnect();
        assert!(!a.is_connected());
    }

    #[test]
    fn test_unsubscribe_stops_delivery() {
        let hub = LoopbackHub::new();
        let mut a = hub.provider();
        let mut b = hub.provider();
        let inbox = Rc::new(RefCell::new(0));
        let sink = Rc::clone(&inbox);
        let id = b.subscribe(Box::new(move |_| *sink.borrow_mut() += 1));
        a.connect().unwrap();
        b.connect().unwrap();
        assert!(b.unsubscribe(id));
        a.broadcast(WireMessage::Leave { client: 1 }).unwrap();
        assert_eq!(*inbox.borrow(), 0);
    }
}
