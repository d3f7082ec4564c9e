//! # busproxy
//!
//! Client-side proxies for remote message-bus objects reached through an
//! RPC/pub-sub session.
//!
//! ## Architecture
//!
//! - [`session`]: the transport seam. A [`Session`] moves strings; a
//!   [`Connector`] opens sessions.
//! - [`connect`]: opens, authenticates and version-checks a [`Connection`].
//! - [`bus`]: a [`Bus`] handle per bus kind, shared by every proxy on it.
//! - [`introspect`] and [`descriptor`]: build a [`RemoteObject`] from the
//!   object's capability document and fetch its properties.
//! - [`proxy`]: method and property tables plus typed dispatch.
//! - [`dispatch`]: the one request path every call goes through.
//! - [`signal`]: registration, subscription and delivery of signals.
//! - [`codec`]: the tagged JSON encoding of [`Value`]s.
//! - [`mock`]: an in-memory session for tests.
//!
//! Every asynchronous operation returns a [`deferred::Deferred`].

pub mod bus;
pub mod codec;
pub mod config;
pub mod connect;
pub mod descriptor;
pub mod dispatch;
pub mod introspect;
pub mod mock;
pub mod proxy;
pub mod session;
pub mod signal;

pub use bus::Bus;
pub use bus::BusKind;
pub use codec::HookTable;
pub use codec::Value;
pub use config::Config;
pub use connect::Connection;
pub use connect::Manifest;
pub use connect::connect;
pub use introspect::PropertyPolicy;
pub use proxy::InterfaceProxy;
pub use proxy::RemoteObject;
pub use session::Connector;
pub use session::Handshake;
pub use session::Session;
pub use signal::Listener;
