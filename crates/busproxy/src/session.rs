//! # Session Abstraction
//!
//! The four primitives the proxy layer needs from a transport session.
//!
//! ## Philosophy
//!
//! - **Text-Oriented**: The session moves strings. It knows nothing about
//!   interfaces, introspection documents or tagged values.
//! - **Deferred**: Request/response primitives hand back a [`Deferred`] that the
//!   session settles when the reply arrives; the core never blocks.
//! - **Shared**: One session serves every bus handle and proxy of a connection,
//!   so implementations take `&self` and manage their own interior state.

use std::rc::Rc;

use deferred::Deferred;

/// Errors reported by the session layer.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    /// The session could not be opened or was dropped.
    #[error("connection failed: {0}")]
    Connection(String),
    /// The handshake was refused.
    #[error("authentication failed: {0}")]
    Authentication(String),
    /// The remote end answered a call with an error description.
    #[error("{0}")]
    Remote(String),
    /// A subscribe or unsubscribe request was refused.
    #[error("subscription error: {0}")]
    Subscription(String),
    /// The session was closed before the request completed.
    #[error("session closed")]
    Closed,
}

pub type Result<T> = std::result::Result<T, Error>;

/// Credentials presented during authentication.
///
/// With a `key` the session runs a challenge/response exchange and signs the
/// challenge; without one it authenticates anonymously (optionally naming
/// itself and the permissions it asks for).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Handshake {
    pub identity: Option<String>,
    pub permissions: Vec<String>,
    pub key: Option<String>,
}

impl Handshake {
    pub fn anonymous() -> Self {
        Self::default()
    }

    pub fn named(identity: impl Into<String>, permissions: Vec<String>) -> Self {
        Self {
            identity: Some(identity.into()),
            permissions,
            key: None,
        }
    }

    pub fn signed(identity: impl Into<String>, permissions: Vec<String>, key: impl Into<String>) -> Self {
        Self {
            identity: Some(identity.into()),
            permissions,
            key: Some(key.into()),
        }
    }

    pub fn is_signed(&self) -> bool {
        self.key.is_some()
    }
}

/// Receives `(topic, payload)` for every event published on a subscribed topic.
pub type EventHandler = Box<dyn FnMut(&str, &str)>;

/// An authenticated channel to the bus bridge.
pub trait Session {
    /// Runs the authentication handshake, yielding the granted permissions.
    fn authenticate(&self, handshake: &Handshake) -> Deferred<Vec<String>, Error>;

    /// Invokes a remote procedure with positional string arguments.
    ///
    /// # invariants
    /// - Fulfils with the raw reply text; never interprets it.
    /// - Rejects with [`Error::Remote`] carrying the remote description.
    fn call(&self, procedure: &str, args: &[String]) -> Deferred<String, Error>;

    /// Routes events published on `topic` to `handler`.
    fn subscribe(&self, topic: &str, handler: EventHandler) -> Result<()>;

    /// Stops routing events for `topic`.
    fn unsubscribe(&self, topic: &str) -> Result<()>;
}

/// Opens sessions.
pub trait Connector {
    fn open(&self, uri: &str) -> Deferred<Rc<dyn Session>, Error>;
}
