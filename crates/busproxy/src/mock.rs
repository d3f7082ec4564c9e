//! Mock sessions for testing.
//!
//! [`MockSession`] answers calls through a closure and records everything the
//! proxy layer asks of it, so suites can assert on exact wire traffic.

use std::cell::Cell;
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use deferred::Deferred;
use deferred::Drain;

use crate::session;
use crate::session::Connector;
use crate::session::EventHandler;
use crate::session::Handshake;
use crate::session::Session;

type CallHandler = Box<dyn Fn(&str, &[String]) -> session::Result<String>>;

/// One recorded `call`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedCall {
    pub procedure: String,
    pub args: Vec<String>,
}

/// A request-response mock session driven by a handler closure.
pub struct MockSession {
    handler: CallHandler,
    drain: Cell<Drain>,
    auth_failure: RefCell<Option<session::Error>>,
    calls: RefCell<Vec<RecordedCall>>,
    handshakes: RefCell<Vec<Handshake>>,
    subscriptions: RefCell<HashMap<String, EventHandler>>,
    unsubscribed: RefCell<Vec<String>>,
}

impl MockSession {
    pub fn new<F>(handler: F) -> Self
    where
        F: Fn(&str, &[String]) -> session::Result<String> + 'static,
    {
        Self {
            handler: Box::new(handler),
            drain: Cell::new(Drain::Immediate),
            auth_failure: RefCell::new(None),
            calls: RefCell::new(Vec::new()),
            handshakes: RefCell::new(Vec::new()),
            subscriptions: RefCell::new(HashMap::new()),
            unsubscribed: RefCell::new(Vec::new()),
        }
    }

    /// Settles replies through the task queue instead of inline.
    pub fn with_drain(self, drain: Drain) -> Self {
        self.drain.set(drain);
        self
    }

    /// Makes every handshake fail with `error`.
    pub fn rejecting_auth(self, error: session::Error) -> Self {
        *self.auth_failure.borrow_mut() = Some(error);
        self
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.borrow().clone()
    }

    /// Arguments of every call made to `procedure`, in order.
    pub fn calls_to(&self, procedure: &str) -> Vec<Vec<String>> {
        self.calls
            .borrow()
            .iter()
            .filter(|call| call.procedure == procedure)
            .map(|call| call.args.clone())
            .collect()
    }

    pub fn handshakes(&self) -> Vec<Handshake> {
        self.handshakes.borrow().clone()
    }

    pub fn is_subscribed(&self, topic: &str) -> bool {
        self.subscriptions.borrow().contains_key(topic)
    }

    /// Every topic passed to `unsubscribe`, including refused ones.
    pub fn unsubscribed(&self) -> Vec<String> {
        self.unsubscribed.borrow().clone()
    }

    /// Delivers `payload` to the handler subscribed on `topic`.
    ///
    /// Returns `false` when nobody is subscribed. The handler may unsubscribe
    /// itself while running.
    pub fn publish(&self, topic: &str, payload: &str) -> bool {
        let taken = self.subscriptions.borrow_mut().remove(topic);
        let Some(mut handler) = taken else {
            return false;
        };
        let seen = self.unsubscribed.borrow().len();
        handler(topic, payload);
        let dropped = self.unsubscribed.borrow()[seen..].iter().any(|t| t == topic);
        if !dropped {
            self.subscriptions.borrow_mut().entry(topic.to_string()).or_insert(handler);
        }
        true
    }
}

impl Session for MockSession {
    fn authenticate(&self, handshake: &Handshake) -> Deferred<Vec<String>, session::Error> {
        self.handshakes.borrow_mut().push(handshake.clone());
        let (deferred, resolver) = Deferred::pending();
        match self.auth_failure.borrow().clone() {
            Some(error) => resolver.reject_with(error, self.drain.get()),
            None => resolver.fulfill_with(handshake.permissions.clone(), self.drain.get()),
        }
        deferred
    }

    fn call(&self, procedure: &str, args: &[String]) -> Deferred<String, session::Error> {
        self.calls.borrow_mut().push(RecordedCall {
            procedure: procedure.to_string(),
            args: args.to_vec(),
        });
        let (deferred, resolver) = Deferred::pending();
        match (self.handler)(procedure, args) {
            Ok(reply) => resolver.fulfill_with(reply, self.drain.get()),
            Err(error) => resolver.reject_with(error, self.drain.get()),
        }
        deferred
    }

    fn subscribe(&self, topic: &str, handler: EventHandler) -> session::Result<()> {
        let mut subscriptions = self.subscriptions.borrow_mut();
        if subscriptions.contains_key(topic) {
            return Err(session::Error::Subscription(format!("already subscribed to {}", topic)));
        }
        subscriptions.insert(topic.to_string(), handler);
        Ok(())
    }

    fn unsubscribe(&self, topic: &str) -> session::Result<()> {
        self.unsubscribed.borrow_mut().push(topic.to_string());
        match self.subscriptions.borrow_mut().remove(topic) {
            Some(_) => Ok(()),
            None => Err(session::Error::Subscription(format!("not subscribed to {}", topic))),
        }
    }
}

/// Hands out one shared [`MockSession`], or fails every open.
pub struct MockConnector {
    session: Rc<MockSession>,
    failure: Option<session::Error>,
    opened: RefCell<Vec<String>>,
}

impl MockConnector {
    pub fn new(session: Rc<MockSession>) -> Self {
        Self {
            session,
            failure: None,
            opened: RefCell::new(Vec::new()),
        }
    }

    pub fn failing(session: Rc<MockSession>, error: session::Error) -> Self {
        Self {
            session,
            failure: Some(error),
            opened: RefCell::new(Vec::new()),
        }
    }

    /// URIs passed to `open`, in order.
    pub fn opened(&self) -> Vec<String> {
        self.opened.borrow().clone()
    }
}

impl Connector for MockConnector {
    fn open(&self, uri: &str) -> Deferred<Rc<dyn Session>, session::Error> {
        self.opened.borrow_mut().push(uri.to_string());
        match &self.failure {
            Some(error) => Deferred::rejected(error.clone()),
            None => {
                let session: Rc<dyn Session> = self.session.clone();
                Deferred::fulfilled(session)
            }
        }
    }
}
