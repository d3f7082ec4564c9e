//! # Call Dispatcher
//!
//! The single request/response path shared by method calls and signal
//! registration.
//!
//! The dispatcher is stateless: it maps an [`Endpoint`] plus
//! `(interface, member, args)` onto exactly one session `call`, and maps the
//! reply text back onto a [`Value`] through the bus's hook table.
//!
//! ## Wire Shapes
//!
//! - `dbusSend [bus, destination, path, interface, member, encodedArgs]`
//! - `dbusRegister [bus, destination, path, interface, signal]` -> topic

use deferred::Deferred;
use deferred::Resolution;
use tracing::debug;
use tracing::warn;

use crate::bus::Bus;
use crate::codec;
use crate::codec::Value;
use crate::session;
use crate::signal;

/// Procedure carrying method calls.
pub const SEND: &str = "dbusSend";
/// Procedure registering interest in a signal.
pub const REGISTER: &str = "dbusRegister";
/// Procedure returning the bridge's version string.
pub const VERSION: &str = "getVersion";

/// Errors during remote invocation.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum Error {
    /// The remote end reported a failure; holds its description.
    #[error("{0}")]
    Remote(String),
    /// The reply text could not be expanded.
    #[error("undecodable result: {0}")]
    Decode(#[from] codec::Error),
    /// No method table entry carries this name.
    #[error("no method '{0}' on this object")]
    UnknownMethod(String),
    /// The caller passed a different number of arguments than declared.
    #[error("method '{method}' takes {expected} arguments, {found} given")]
    ArgumentCount {
        method: String,
        expected: usize,
        found: usize,
    },
}

pub type Result<T> = std::result::Result<T, Error>;

/// Where a remote object lives: bus, destination name and object path.
#[derive(Debug, Clone)]
pub struct Endpoint {
    bus: Bus,
    destination: String,
    path: String,
}

impl Endpoint {
    pub fn new(bus: Bus, destination: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            bus,
            destination: destination.into(),
            path: path.into(),
        }
    }

    pub fn bus(&self) -> &Bus {
        &self.bus
    }

    pub fn destination(&self) -> &str {
        &self.destination
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// The subscription topic of `signal` on `interface` at this endpoint.
    pub fn topic(&self, interface: &str, signal: &str) -> String {
        signal::topic(self.bus.kind(), &self.destination, &self.path, interface, signal)
    }

    fn address(&self, interface: &str, member: &str) -> Vec<String> {
        vec![
            self.bus.kind().as_str().to_string(),
            self.destination.clone(),
            self.path.clone(),
            interface.to_string(),
            member.to_string(),
        ]
    }
}

/// Invokes `interface.method(args)` and yields the first returned value.
///
/// An empty reply array yields [`Value::Null`]. `signature` is the declared
/// input signature; it is informational only.
pub fn call(
    endpoint: &Endpoint,
    interface: &str,
    method: &str,
    args: &[Value],
    signature: Option<&str>,
) -> Deferred<Value, Error> {
    let mut arglist = endpoint.address(interface, method);
    arglist.push(codec::encode_args(args));

    debug!(
        bus = %endpoint.bus.kind(),
        destination = %endpoint.destination,
        path = %endpoint.path,
        interface,
        method,
        signature = signature.unwrap_or(""),
        "calling method"
    );

    let hooks = endpoint.bus.hooks().clone();
    let failed_method = method.to_string();
    let failed_path = endpoint.path.clone();
    let decoded_method = method.to_string();

    endpoint
        .bus
        .session()
        .call(SEND, &arglist)
        .map_err(move |error: session::Error| {
            warn!(method = %failed_method, path = %failed_path, %error, "error calling method");
            Error::Remote(error.to_string())
        })
        .and_then(move |reply| match hooks.expand(&reply) {
            Ok(values) => Ok(Resolution::Value(values.into_iter().next().unwrap_or(Value::Null))),
            Err(error) => {
                warn!(method = %decoded_method, %error, "method result could not be expanded");
                Err(Error::Decode(error))
            }
        })
}

/// Registers interest in `signal`, yielding the topic to subscribe to.
///
/// The topic is the reply text, unquoted if the bridge sent a JSON string.
pub fn register(endpoint: &Endpoint, interface: &str, signal: &str) -> Deferred<String, session::Error> {
    debug!(
        bus = %endpoint.bus.kind(),
        destination = %endpoint.destination,
        path = %endpoint.path,
        interface,
        signal,
        "registering signal"
    );
    endpoint
        .bus
        .session()
        .call(REGISTER, &endpoint.address(interface, signal))
        .map(codec::reply_text)
}
