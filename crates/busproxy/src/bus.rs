//! Bus handles.
//!
//! A [`Bus`] names one of the two well-known buses and carries the shared
//! session plus the per-connection defaults every proxy on it inherits.

use std::fmt;
use std::rc::Rc;

use deferred::Deferred;

use crate::codec::HookTable;
use crate::dispatch::Endpoint;
use crate::introspect;
use crate::introspect::PropertyPolicy;
use crate::proxy::RemoteObject;
use crate::session::Session;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Deserialize, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BusKind {
    Session,
    System,
}

impl BusKind {
    /// The name used on the wire.
    pub fn as_str(&self) -> &'static str {
        match self {
            BusKind::Session => "session",
            BusKind::System => "system",
        }
    }
}

impl fmt::Display for BusKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One bus reached through a shared session. Immutable once built.
#[derive(Clone)]
pub struct Bus {
    kind: BusKind,
    session: Rc<dyn Session>,
    hooks: Rc<HookTable>,
    policy: PropertyPolicy,
}

impl fmt::Debug for Bus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Bus")
            .field("kind", &self.kind)
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

impl Bus {
    pub fn new(kind: BusKind, session: Rc<dyn Session>) -> Self {
        Self {
            kind,
            session,
            hooks: Rc::new(HookTable::new()),
            policy: PropertyPolicy::default(),
        }
    }

    /// Sets the property-fetch policy used by [`Bus::introspect`].
    pub fn with_policy(mut self, policy: PropertyPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Replaces the table used to expand results and signal payloads.
    pub fn with_hooks(mut self, hooks: HookTable) -> Self {
        self.hooks = Rc::new(hooks);
        self
    }

    pub fn kind(&self) -> BusKind {
        self.kind
    }

    pub fn session(&self) -> &Rc<dyn Session> {
        &self.session
    }

    pub fn hooks(&self) -> &Rc<HookTable> {
        &self.hooks
    }

    pub fn policy(&self) -> PropertyPolicy {
        self.policy
    }

    /// A proxy for `path` on `destination`, with empty method tables.
    ///
    /// Raw calls through [`RemoteObject::call_method`] work right away.
    pub fn get_object(&self, destination: &str, path: &str) -> RemoteObject {
        RemoteObject::new(Endpoint::new(self.clone(), destination, path))
    }

    /// A proxy for `path` on `destination`, introspected before it is handed out.
    pub fn introspect(&self, destination: &str, path: &str) -> Deferred<RemoteObject, introspect::Error> {
        introspect::introspect(self.get_object(destination, path), self.policy)
    }
}
