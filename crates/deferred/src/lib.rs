//! # deferred
//!
//! Promise-style deferred values for single-threaded, callback-driven code.
//!
//! ## Architecture
//!
//! - [`Deferred`] holds the state and continuation lists; [`Resolver`] settles it.
//! - [`Resolution`] is what a resolver accepts: a plain value or a thenable whose
//!   outcome is adopted, so chains of any depth flatten.
//! - [`scheduler`] is the per-thread task queue used for queued drains and for
//!   continuations attached after settlement.
//! - [`any`], [`every`] and [`some`] aggregate several inputs.

pub mod combinators;
pub mod deferred;
pub mod scheduler;

pub use combinators::any;
pub use combinators::every;
pub use combinators::some;
pub use deferred::Callback;
pub use deferred::Deferred;
pub use deferred::Drain;
pub use deferred::Resolution;
pub use deferred::Resolver;
pub use deferred::Status;
pub use deferred::Thenable;
