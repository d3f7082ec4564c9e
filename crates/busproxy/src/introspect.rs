//! # Introspection
//!
//! Turns an empty [`RemoteObject`] into a populated one.
//!
//! ## Steps
//!
//! 1. Call `Introspect` on the object and parse the returned document.
//! 2. Register every interface in document order. Interfaces declaring
//!    properties are pushed on a fetch stack.
//! 3. If the object implements the properties interface, pop the stack one
//!    interface at a time and call `GetAll` for it. Each call starts only
//!    after the previous one settled, so values from interfaces declared
//!    earlier overwrite the root entries of those declared later.
//! 4. Fulfil with the proxy once the stack is empty.
//!
//! A failed `GetAll` is handled according to the [`PropertyPolicy`].

use std::cell::RefCell;
use std::rc::Rc;

use deferred::Deferred;
use deferred::Resolution;
use deferred::Resolver;
use tracing::debug;
use tracing::warn;

use crate::codec::Value;
use crate::descriptor;
use crate::dispatch;
use crate::proxy::RemoteObject;

/// Interface every introspectable object implements.
pub const INTROSPECTABLE: &str = "org.freedesktop.DBus.Introspectable";
/// Interface exposing `GetAll` for property values.
pub const PROPERTIES: &str = "org.freedesktop.DBus.Properties";

const INTROSPECT: &str = "Introspect";
const GET_ALL: &str = "GetAll";

/// What to do when fetching one interface's properties fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Deserialize, serde::Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum PropertyPolicy {
    /// Log the failure and carry on with the next interface.
    #[default]
    BestEffort,
    /// Reject the whole introspection.
    FailFast,
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum Error {
    #[error("introspection call failed: {0}")]
    Call(dispatch::Error),
    /// `Introspect` answered with something other than a string.
    #[error("introspection returned a {0}, not a document")]
    NotADocument(&'static str),
    #[error(transparent)]
    Document(#[from] descriptor::Error),
    #[error("fetching properties of {interface} failed: {source}")]
    Properties {
        interface: String,
        source: dispatch::Error,
    },
    /// `GetAll` answered with something other than a dictionary.
    #[error("properties of {interface} came back as a {found}")]
    PropertiesShape { interface: String, found: &'static str },
}

pub type Result<T> = std::result::Result<T, Error>;

/// Introspects `object`, fetching properties under `policy`.
pub fn introspect(object: RemoteObject, policy: PropertyPolicy) -> Deferred<RemoteObject, Error> {
    debug!(
        destination = object.destination(),
        path = object.object_path(),
        ?policy,
        "introspecting"
    );
    object
        .call_method(INTROSPECTABLE, INTROSPECT, &[], None)
        .map_err(Error::Call)
        .and_then(move |reply| {
            let document = match reply {
                Value::Str(document) => document,
                other => return Err(Error::NotADocument(other.kind_name())),
            };
            populate(object, &document, policy)
        })
}

fn populate(
    mut object: RemoteObject,
    document: &str,
    policy: PropertyPolicy,
) -> Result<Resolution<RemoteObject, Error>> {
    let mut stack = Vec::new();
    let mut has_properties_interface = false;

    for interface in descriptor::parse(document)? {
        let name = interface.name.clone();
        let declares_properties = interface.has_properties();
        if !object.add_interface(interface) {
            continue;
        }
        if name == PROPERTIES {
            has_properties_interface = true;
        }
        if declares_properties {
            stack.push(name);
        }
    }

    debug!(
        path = object.object_path(),
        interfaces = object.interface_names().count(),
        pending = stack.len(),
        "introspection document applied"
    );

    if !has_properties_interface || stack.is_empty() {
        return Ok(Resolution::Value(object));
    }
    Ok(Resolution::Deferred(PropertyFetch::start(object, stack, policy)))
}

/// Fetches the properties of each stacked interface, one call at a time.
struct PropertyFetch {
    object: RefCell<Option<RemoteObject>>,
    stack: RefCell<Vec<String>>,
    policy: PropertyPolicy,
    resolver: Resolver<RemoteObject, Error>,
}

impl PropertyFetch {
    fn start(object: RemoteObject, stack: Vec<String>, policy: PropertyPolicy) -> Deferred<RemoteObject, Error> {
        let (deferred, resolver) = Deferred::pending();
        let fetch = Rc::new(Self {
            object: RefCell::new(Some(object)),
            stack: RefCell::new(stack),
            policy,
            resolver,
        });
        fetch.next();
        deferred
    }

    fn next(self: &Rc<Self>) {
        let popped = self.stack.borrow_mut().pop();
        let Some(interface) = popped else {
            return self.finish();
        };

        let call = {
            let guard = self.object.borrow();
            match guard.as_ref() {
                Some(object) => object.call_method(PROPERTIES, GET_ALL, &[Value::Str(interface.clone())], Some("s")),
                None => return,
            }
        };

        let on_ok = Rc::clone(self);
        let on_err = Rc::clone(self);
        let failed = interface.clone();
        call.done(
            move |value| on_ok.apply(&interface, value),
            move |source| {
                on_err.fail(Error::Properties {
                    interface: failed,
                    source,
                })
            },
        );
    }

    fn apply(self: &Rc<Self>, interface: &str, value: Value) {
        let properties = match value {
            Value::Dict(properties) => properties,
            other => {
                return self.fail(Error::PropertiesShape {
                    interface: interface.to_string(),
                    found: other.kind_name(),
                });
            }
        };
        debug!(interface, count = properties.len(), "properties fetched");
        if let Some(object) = self.object.borrow_mut().as_mut() {
            object.set_properties(interface, properties);
        }
        self.next();
    }

    fn fail(self: &Rc<Self>, error: Error) {
        match self.policy {
            PropertyPolicy::BestEffort => {
                warn!(%error, "skipping properties");
                self.next();
            }
            PropertyPolicy::FailFast => {
                warn!(%error, "introspection aborted");
                self.stack.borrow_mut().clear();
                self.object.borrow_mut().take();
                self.resolver.reject(error);
            }
        }
    }

    fn finish(&self) {
        let object = self.object.borrow_mut().take();
        if let Some(object) = object {
            debug!(path = object.object_path(), "introspection complete");
            self.resolver.fulfill(object);
        }
    }
}
