//! # Signal Subscription
//!
//! Signals are registered with the bridge, which answers with a topic, and
//! then delivered as pub/sub events on that topic. Topics are deterministic,
//! so disconnecting never needs the registration reply.
//!
//! ## Invariants
//!
//! - A delivery never panics the session: decode and listener failures are
//!   logged and handed to the listener's error callback.
//! - A listener is never re-entered; an event arriving while it runs is
//!   dropped with a warning.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use deferred::Deferred;
use deferred::Resolution;
use tracing::debug;
use tracing::warn;

use crate::bus::BusKind;
use crate::codec;
use crate::codec::HookTable;
use crate::codec::Value;
use crate::dispatch;
use crate::dispatch::Endpoint;
use crate::session::EventHandler;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum Error {
    #[error("registering signal '{signal}' failed: {reason}")]
    Registration { signal: String, reason: String },
    #[error("subscription refused: {0}")]
    Subscribe(String),
    #[error("undecodable signal payload: {0}")]
    Decode(#[from] codec::Error),
    /// The listener returned an error.
    #[error("signal listener failed: {0}")]
    Handler(String),
}

pub type Result<T> = std::result::Result<T, Error>;

/// The pub/sub topic carrying `signal` of `interface` at an object.
pub fn topic(bus: BusKind, destination: &str, path: &str, interface: &str, signal: &str) -> String {
    format!("{}#{}#{}#{}#{}", bus, destination, path, interface, signal)
}

type Handler = Box<dyn FnMut(Vec<Value>) -> anyhow::Result<()>>;
type ErrorHandler = Box<dyn FnMut(Error)>;

/// Receives the positional values of each signal emission.
pub struct Listener {
    handler: Handler,
    on_error: Option<ErrorHandler>,
}

impl fmt::Debug for Listener {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Listener")
            .field("on_error", &self.on_error.is_some())
            .finish_non_exhaustive()
    }
}

impl Listener {
    pub fn new<F>(handler: F) -> Self
    where
        F: FnMut(Vec<Value>) -> anyhow::Result<()> + 'static,
    {
        Self {
            handler: Box::new(handler),
            on_error: None,
        }
    }

    /// Routes registration, decode and listener failures to `on_error`.
    pub fn on_error<F>(mut self, on_error: F) -> Self
    where
        F: FnMut(Error) + 'static,
    {
        self.on_error = Some(Box::new(on_error));
        self
    }

    fn report(&mut self, error: Error) {
        if let Some(on_error) = self.on_error.as_mut() {
            on_error(error);
        }
    }
}

/// Registers `signal` and subscribes `listener` to its topic.
///
/// Fulfils with the topic once the subscription is in place.
pub fn connect(endpoint: &Endpoint, interface: &str, signal: &str, listener: Listener) -> Deferred<String, Error> {
    let listener = Rc::new(RefCell::new(listener));
    let session = endpoint.bus().session().clone();
    let hooks = endpoint.bus().hooks().clone();
    let failed = Rc::clone(&listener);
    let failed_signal = signal.to_string();
    let signal = signal.to_string();

    dispatch::register(endpoint, interface, &signal)
        .map_err(move |error| {
            let error = Error::Registration {
                signal: failed_signal,
                reason: error.to_string(),
            };
            warn!(%error, "error registering signal");
            route(&failed, error.clone());
            error
        })
        .and_then(move |topic| {
            let handler = delivery(signal, hooks, Rc::clone(&listener));
            match session.subscribe(&topic, handler) {
                Ok(()) => {
                    debug!(%topic, "signal connected");
                    Ok(Resolution::Value(topic))
                }
                Err(error) => {
                    let error = Error::Subscribe(error.to_string());
                    warn!(%topic, %error, "error subscribing to signal");
                    route(&listener, error.clone());
                    Err(error)
                }
            }
        })
}

/// Unsubscribes from `signal`. Failures are logged and otherwise ignored.
pub fn disconnect(endpoint: &Endpoint, interface: &str, signal: &str) {
    let topic = endpoint.topic(interface, signal);
    match endpoint.bus().session().unsubscribe(&topic) {
        Ok(()) => debug!(%topic, "signal disconnected"),
        Err(error) => warn!(%topic, %error, "error disconnecting signal"),
    }
}

fn route(listener: &RefCell<Listener>, error: Error) {
    match listener.try_borrow_mut() {
        Ok(mut listener) => listener.report(error),
        Err(_) => warn!(%error, "listener busy, error dropped"),
    }
}

fn delivery(signal: String, hooks: Rc<HookTable>, listener: Rc<RefCell<Listener>>) -> EventHandler {
    Box::new(move |topic: &str, payload: &str| {
        let Ok(mut guard) = listener.try_borrow_mut() else {
            warn!(signal = %signal, topic, "signal arrived while its listener was running, dropped");
            return;
        };
        let values = match hooks.expand(payload) {
            Ok(values) => values,
            Err(error) => {
                let error = Error::Decode(error);
                warn!(signal = %signal, %error, "error decoding signal");
                return guard.report(error);
            }
        };
        if let Err(error) = (guard.handler)(values) {
            let error = Error::Handler(format!("{:#}", error));
            warn!(signal = %signal, %error, "signal listener failed");
            guard.report(error);
        }
    })
}
