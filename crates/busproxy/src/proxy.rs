//! # Remote Object Proxy
//!
//! A local stand-in for one object path on one bus.
//!
//! The proxy owns an arena of interface entries indexed by name. Each entry
//! keeps its descriptor, its own method table and its own property values.
//! On top of that the proxy keeps a merged root method table and a merged
//! root property map, so callers can ignore interfaces when names are unique.
//!
//! ## Invariants
//!
//! - An interface entry is created once and never replaced.
//! - The first interface to claim a method name owns it in the root table.
//! - Root properties are last-writer-wins copies of the entries' values.
//! - Dispatch is a table lookup followed by [`dispatch::call`]; nothing is
//!   generated per method.

use std::collections::BTreeMap;
use std::collections::HashMap;

use deferred::Deferred;
use tracing::warn;

use crate::bus::Bus;
use crate::codec::Value;
use crate::descriptor::InterfaceDescriptor;
use crate::descriptor::MethodDescriptor;
use crate::dispatch;
use crate::dispatch::Endpoint;
use crate::introspect;
use crate::introspect::PropertyPolicy;
use crate::signal;
use crate::signal::Listener;

#[derive(Debug, Clone)]
struct InterfaceEntry {
    descriptor: InterfaceDescriptor,
    methods: HashMap<String, usize>,
    properties: HashMap<String, Value>,
}

#[derive(Debug, Clone, Copy)]
struct MethodRef {
    interface: usize,
    method: usize,
}

/// Proxy for a remote object.
#[derive(Debug, Clone)]
pub struct RemoteObject {
    endpoint: Endpoint,
    interfaces: Vec<InterfaceEntry>,
    index: HashMap<String, usize>,
    methods: HashMap<String, MethodRef>,
    properties: HashMap<String, Value>,
}

impl RemoteObject {
    pub fn new(endpoint: Endpoint) -> Self {
        Self {
            endpoint,
            interfaces: Vec::new(),
            index: HashMap::new(),
            methods: HashMap::new(),
            properties: HashMap::new(),
        }
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    pub fn bus(&self) -> &Bus {
        self.endpoint.bus()
    }

    pub fn destination(&self) -> &str {
        self.endpoint.destination()
    }

    pub fn object_path(&self) -> &str {
        self.endpoint.path()
    }

    /// Interface names in document order.
    pub fn interface_names(&self) -> impl Iterator<Item = &str> {
        self.interfaces.iter().map(|entry| entry.descriptor.name.as_str())
    }

    /// The introspected interface `name`, if any. Never re-introspects.
    pub fn interface(&self, name: &str) -> Option<InterfaceProxy<'_>> {
        let slot = *self.index.get(name)?;
        Some(InterfaceProxy {
            object: self,
            entry: &self.interfaces[slot],
        })
    }

    /// The root method table entry for `name`.
    pub fn method(&self, name: &str) -> Option<&MethodDescriptor> {
        let found = self.methods.get(name)?;
        Some(self.resolve(*found).1)
    }

    /// The interface that owns `name` in the root method table.
    pub fn method_interface(&self, name: &str) -> Option<&str> {
        let found = self.methods.get(name)?;
        Some(self.resolve(*found).0.descriptor.name.as_str())
    }

    pub fn property(&self, name: &str) -> Option<&Value> {
        self.properties.get(name)
    }

    pub fn properties(&self) -> &HashMap<String, Value> {
        &self.properties
    }

    /// Calls `name` from the root method table with exactly its declared
    /// number of arguments.
    pub fn invoke(&self, name: &str, args: Vec<Value>) -> Deferred<Value, dispatch::Error> {
        match self.methods.get(name) {
            Some(found) => {
                let (entry, method) = self.resolve(*found);
                self.dispatch(&entry.descriptor.name, method, args)
            }
            None => Deferred::rejected(dispatch::Error::UnknownMethod(name.to_string())),
        }
    }

    /// Calls any member, described or not.
    pub fn call_method(
        &self,
        interface: &str,
        method: &str,
        args: &[Value],
        signature: Option<&str>,
    ) -> Deferred<Value, dispatch::Error> {
        dispatch::call(&self.endpoint, interface, method, args, signature)
    }

    /// Introspects this proxy with the bus's property policy.
    pub fn introspect(self) -> Deferred<RemoteObject, introspect::Error> {
        let policy = self.bus().policy();
        introspect::introspect(self, policy)
    }

    pub fn introspect_with(self, policy: PropertyPolicy) -> Deferred<RemoteObject, introspect::Error> {
        introspect::introspect(self, policy)
    }

    /// Subscribes `listener` to `signal` on `interface`, yielding the topic.
    pub fn connect_to_signal(
        &self,
        interface: &str,
        signal: &str,
        listener: Listener,
    ) -> Deferred<String, signal::Error> {
        signal::connect(&self.endpoint, interface, signal, listener)
    }

    /// Unsubscribes from `signal` on `interface`. Failures are only logged.
    pub fn disconnect_signal(&self, interface: &str, signal: &str) {
        signal::disconnect(&self.endpoint, interface, signal);
    }

    /// Registers an interface. Returns `false` if the name is already taken.
    pub(crate) fn add_interface(&mut self, descriptor: InterfaceDescriptor) -> bool {
        if self.index.contains_key(&descriptor.name) {
            warn!(interface = %descriptor.name, path = %self.object_path(), "duplicate interface ignored");
            return false;
        }

        let slot = self.interfaces.len();
        let mut methods = HashMap::new();
        for (position, method) in descriptor.methods.iter().enumerate() {
            methods.insert(method.name.clone(), position);
            self.methods.entry(method.name.clone()).or_insert(MethodRef {
                interface: slot,
                method: position,
            });
        }

        self.index.insert(descriptor.name.clone(), slot);
        self.interfaces.push(InterfaceEntry {
            descriptor,
            methods,
            properties: HashMap::new(),
        });
        true
    }

    /// Stores fetched properties on `interface` and copies them to the root.
    pub(crate) fn set_properties(&mut self, interface: &str, properties: BTreeMap<String, Value>) {
        let Some(&slot) = self.index.get(interface) else {
            return;
        };
        let entry = &mut self.interfaces[slot];
        for (name, value) in properties {
            entry.properties.insert(name.clone(), value.clone());
            self.properties.insert(name, value);
        }
    }

    fn resolve(&self, found: MethodRef) -> (&InterfaceEntry, &MethodDescriptor) {
        let entry = &self.interfaces[found.interface];
        (entry, &entry.descriptor.methods[found.method])
    }

    fn dispatch(&self, interface: &str, method: &MethodDescriptor, args: Vec<Value>) -> Deferred<Value, dispatch::Error> {
        if args.len() != method.arg_count {
            return Deferred::rejected(dispatch::Error::ArgumentCount {
                method: method.name.clone(),
                expected: method.arg_count,
                found: args.len(),
            });
        }
        self.call_method(interface, &method.name, &args, Some(&method.signature))
    }
}

/// A view of one introspected interface of a [`RemoteObject`].
#[derive(Debug, Clone, Copy)]
pub struct InterfaceProxy<'a> {
    object: &'a RemoteObject,
    entry: &'a InterfaceEntry,
}

impl<'a> InterfaceProxy<'a> {
    pub fn name(&self) -> &'a str {
        &self.entry.descriptor.name
    }

    pub fn descriptor(&self) -> &'a InterfaceDescriptor {
        &self.entry.descriptor
    }

    pub fn method(&self, name: &str) -> Option<&'a MethodDescriptor> {
        let position = *self.entry.methods.get(name)?;
        Some(&self.entry.descriptor.methods[position])
    }

    pub fn property(&self, name: &str) -> Option<&'a Value> {
        self.entry.properties.get(name)
    }

    pub fn properties(&self) -> &'a HashMap<String, Value> {
        &self.entry.properties
    }

    /// Calls `name` from this interface's own method table.
    pub fn invoke(&self, name: &str, args: Vec<Value>) -> Deferred<Value, dispatch::Error> {
        match self.method(name) {
            Some(method) => self.object.dispatch(self.name(), method, args),
            None => Deferred::rejected(dispatch::Error::UnknownMethod(name.to_string())),
        }
    }

    pub fn connect_to_signal(&self, signal: &str, listener: Listener) -> Deferred<String, signal::Error> {
        self.object.connect_to_signal(self.name(), signal, listener)
    }

    pub fn disconnect_signal(&self, signal: &str) {
        self.object.disconnect_signal(self.name(), signal);
    }
}
