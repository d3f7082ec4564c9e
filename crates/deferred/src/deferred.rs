//! # Deferred Values
//!
//! A single-settlement future for a single-threaded, callback-driven world.
//!
//! A [`Deferred`] starts pending and settles exactly once, either fulfilled with
//! a `T` or rejected with an `E`. Callers attach continuations; the paired
//! [`Resolver`] settles the value and drains them.
//!
//! ## Invariants
//!
//! - State is monotonic: `Pending -> Fulfilled | Rejected`, never back.
//! - At most one terminal outcome is ever delivered to continuations.
//! - Continuations of one value fire in registration order.
//! - A continuation attached after settlement is queued on the task queue,
//!   never run inline.

use std::cell::Cell;
use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use tokio::sync::oneshot;

use crate::scheduler;

/// A continuation receiving a settled value or reason.
pub type Callback<V> = Box<dyn FnOnce(V)>;

/// The externally visible state of a deferred value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Pending,
    Fulfilled,
    Rejected,
}

/// How continuations are drained once a value settles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Drain {
    /// Run every continuation now, before the settling call returns.
    #[default]
    Immediate,
    /// Queue one task that runs the continuations on a later turn.
    Queued,
}

/// Anything that can hand its eventual outcome to a pair of forwarders.
///
/// Resolving a [`Deferred`] with a thenable adopts the thenable's outcome
/// instead of fulfilling with the thenable itself.
pub trait Thenable<T, E> {
    /// Registers the forwarders. Returning `Err` rejects the adopting value.
    fn then_forward(self: Box<Self>, on_fulfill: Callback<T>, on_reject: Callback<E>) -> Result<(), E>;
}

/// Input accepted by [`Resolver::resolve`].
pub enum Resolution<T, E> {
    /// A plain value, fulfilled as is.
    Value(T),
    /// Another deferred value whose outcome is adopted.
    Deferred(Deferred<T, E>),
    /// Any other thenable whose outcome is adopted.
    Thenable(Box<dyn Thenable<T, E>>),
}

impl<T, E> From<Deferred<T, E>> for Resolution<T, E> {
    fn from(deferred: Deferred<T, E>) -> Self {
        Self::Deferred(deferred)
    }
}

enum Slot<T, E> {
    Pending,
    Fulfilled(T),
    Rejected(E),
}

struct Inner<T, E> {
    slot: Slot<T, E>,
    on_fulfill: Vec<Callback<T>>,
    on_reject: Vec<Callback<E>>,
}

/// A value that will be fulfilled or rejected at most once.
///
/// Handles are cheap to clone and all observe the same state.
pub struct Deferred<T, E> {
    inner: Rc<RefCell<Inner<T, E>>>,
}

impl<T, E> Clone for Deferred<T, E> {
    fn clone(&self) -> Self {
        Self { inner: Rc::clone(&self.inner) }
    }
}

impl<T, E> fmt::Debug for Deferred<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Deferred").field("status", &self.status()).finish()
    }
}

impl<T, E> Deferred<T, E> {
    /// The current state.
    pub fn status(&self) -> Status {
        match self.inner.borrow().slot {
            Slot::Pending => Status::Pending,
            Slot::Fulfilled(_) => Status::Fulfilled,
            Slot::Rejected(_) => Status::Rejected,
        }
    }

    fn same_as(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }
}

impl<T: Clone + 'static, E: Clone + 'static> Deferred<T, E> {
    /// Creates a pending value and the resolver that settles it.
    pub fn pending() -> (Self, Resolver<T, E>) {
        let deferred = Self {
            inner: Rc::new(RefCell::new(Inner {
                slot: Slot::Pending,
                on_fulfill: Vec::new(),
                on_reject: Vec::new(),
            })),
        };
        let resolver = Resolver::new(deferred.clone());
        (deferred, resolver)
    }

    /// Creates a pending value and runs `init` with its resolver right away.
    ///
    /// An `Err` from `init` rejects the value unless `init` already settled it.
    pub fn create(init: impl FnOnce(&Resolver<T, E>) -> Result<(), E>) -> Self {
        let (deferred, resolver) = Self::pending();
        if let Err(reason) = init(&resolver) {
            resolver.reject(reason);
        }
        deferred
    }

    /// A value already fulfilled with `value`.
    pub fn fulfilled(value: T) -> Self {
        let (deferred, resolver) = Self::pending();
        resolver.fulfill_with(value, Drain::Queued);
        deferred
    }

    /// A value already rejected with `reason`.
    pub fn rejected(reason: E) -> Self {
        let (deferred, resolver) = Self::pending();
        resolver.reject_with(reason, Drain::Queued);
        deferred
    }

    /// A value resolved with `resolution`, adopting it if it is a thenable.
    pub fn resolved(resolution: Resolution<T, E>) -> Self {
        let (deferred, resolver) = Self::pending();
        resolver.resolve_with(resolution, Drain::Queued);
        deferred
    }

    /// A copy of the settled outcome, or `None` while pending.
    pub fn result(&self) -> Option<Result<T, E>> {
        match &self.inner.borrow().slot {
            Slot::Pending => None,
            Slot::Fulfilled(value) => Some(Ok(value.clone())),
            Slot::Rejected(reason) => Some(Err(reason.clone())),
        }
    }

    /// Registers continuations.
    ///
    /// While pending they are stored in order. Once settled, the matching
    /// continuation is queued on the task queue and the other is dropped.
    pub fn append_continuations(&self, on_fulfill: Option<Callback<T>>, on_reject: Option<Callback<E>>) {
        let mut guard = self.inner.borrow_mut();
        let inner = &mut *guard;
        match &inner.slot {
            Slot::Pending => {
                if let Some(callback) = on_fulfill {
                    inner.on_fulfill.push(callback);
                }
                if let Some(callback) = on_reject {
                    inner.on_reject.push(callback);
                }
            }
            Slot::Fulfilled(value) => {
                if let Some(callback) = on_fulfill {
                    let value = value.clone();
                    scheduler::schedule(move || callback(value));
                }
            }
            Slot::Rejected(reason) => {
                if let Some(callback) = on_reject {
                    let reason = reason.clone();
                    scheduler::schedule(move || callback(reason));
                }
            }
        }
    }

    /// Attaches terminal callbacks without creating a new value.
    pub fn done(&self, on_fulfill: impl FnOnce(T) + 'static, on_reject: impl FnOnce(E) + 'static) {
        self.append_continuations(Some(Box::new(on_fulfill)), Some(Box::new(on_reject)));
    }

    /// Chains both handlers, returning the value they resolve.
    ///
    /// Whatever a handler returns in `Ok` goes through [`Resolver::resolve`],
    /// so returning a deferred value re-chains onto it. An `Err` rejects.
    pub fn then<U, F, R>(&self, on_fulfill: F, on_reject: R) -> Deferred<U, E>
    where
        U: Clone + 'static,
        F: FnOnce(T) -> Result<Resolution<U, E>, E> + 'static,
        R: FnOnce(E) -> Result<Resolution<U, E>, E> + 'static,
    {
        let (next, resolver) = Deferred::pending();
        let on_ok = resolver.clone();
        self.append_continuations(
            Some(Box::new(move |value| on_ok.settle_from(on_fulfill(value)))),
            Some(Box::new(move |reason| resolver.settle_from(on_reject(reason)))),
        );
        next
    }

    /// Chains a fulfilment handler; rejections pass through unchanged.
    pub fn and_then<U, F>(&self, on_fulfill: F) -> Deferred<U, E>
    where
        U: Clone + 'static,
        F: FnOnce(T) -> Result<Resolution<U, E>, E> + 'static,
    {
        self.then(on_fulfill, Err)
    }

    /// Chains a rejection handler; fulfilments pass through unchanged.
    pub fn catch<R>(&self, on_reject: R) -> Deferred<T, E>
    where
        R: FnOnce(E) -> Result<Resolution<T, E>, E> + 'static,
    {
        self.then(|value| Ok(Resolution::Value(value)), on_reject)
    }

    /// A new value that settles exactly as this one does.
    pub fn forward(&self) -> Deferred<T, E> {
        self.then(|value| Ok(Resolution::Value(value)), Err)
    }

    pub fn map<U, F>(&self, f: F) -> Deferred<U, E>
    where
        U: Clone + 'static,
        F: FnOnce(T) -> U + 'static,
    {
        self.and_then(move |value| Ok(Resolution::Value(f(value))))
    }

    pub fn map_err<E2, F>(&self, f: F) -> Deferred<T, E2>
    where
        E2: Clone + 'static,
        F: FnOnce(E) -> E2 + 'static,
    {
        let (next, resolver) = Deferred::pending();
        let on_ok = resolver.clone();
        self.append_continuations(
            Some(Box::new(move |value| on_ok.fulfill(value))),
            Some(Box::new(move |reason| resolver.reject(f(reason)))),
        );
        next
    }

    /// Waits for the outcome from async code.
    ///
    /// Drains this thread's task queue, then sleeps until either the outcome
    /// arrives or new work is scheduled. A value that never settles parks the
    /// caller without consuming CPU.
    pub async fn settled(self) -> Result<T, E> {
        let (tx, mut rx) = oneshot::channel();
        let tx = Rc::new(Cell::new(Some(tx)));
        let tx_err = Rc::clone(&tx);
        self.append_continuations(
            Some(Box::new(move |value| {
                if let Some(tx) = tx.take() {
                    let _ = tx.send(Ok(value));
                }
            })),
            Some(Box::new(move |reason| {
                if let Some(tx) = tx_err.take() {
                    let _ = tx.send(Err(reason));
                }
            })),
        );
        loop {
            scheduler::run_until_idle();
            let woken = tokio::select! {
                biased;
                outcome = &mut rx => Some(outcome),
                _ = scheduler::work_scheduled() => None,
            };
            match woken {
                Some(Ok(outcome)) => return outcome,
                // both continuations dropped unsent: nothing can settle this value
                Some(Err(_)) => return std::future::pending().await,
                None => {}
            }
        }
    }

    fn settle(&self, outcome: Result<T, E>, drain: Drain) {
        let mut guard = self.inner.borrow_mut();
        let inner = &mut *guard;
        if !matches!(inner.slot, Slot::Pending) {
            return;
        }
        match outcome {
            Ok(value) => {
                inner.slot = Slot::Fulfilled(value.clone());
                let callbacks = std::mem::take(&mut inner.on_fulfill);
                let discarded = std::mem::take(&mut inner.on_reject);
                drop(guard);
                drop(discarded);
                run(callbacks, value, drain);
            }
            Err(reason) => {
                inner.slot = Slot::Rejected(reason.clone());
                let callbacks = std::mem::take(&mut inner.on_reject);
                let discarded = std::mem::take(&mut inner.on_fulfill);
                drop(guard);
                drop(discarded);
                run(callbacks, reason, drain);
            }
        }
    }

    fn adopt(&self, resolution: Resolution<T, E>, drain: Drain) {
        let thenable: Box<dyn Thenable<T, E>> = match resolution {
            Resolution::Value(value) => return self.settle(Ok(value), drain),
            Resolution::Deferred(inner) if inner.same_as(self) => {
                tracing::warn!("deferred value resolved with itself; it will never settle");
                return;
            }
            Resolution::Deferred(inner) => Box::new(inner),
            Resolution::Thenable(inner) => inner,
        };
        let on_ok = self.clone();
        let on_err = self.clone();
        let subscribed = thenable.then_forward(
            Box::new(move |value| on_ok.settle(Ok(value), Drain::Immediate)),
            Box::new(move |reason| on_err.settle(Err(reason), Drain::Immediate)),
        );
        if let Err(reason) = subscribed {
            self.settle(Err(reason), Drain::Immediate);
        }
    }
}

impl<T: Clone + 'static, E: Clone + 'static> Thenable<T, E> for Deferred<T, E> {
    fn then_forward(self: Box<Self>, on_fulfill: Callback<T>, on_reject: Callback<E>) -> Result<(), E> {
        self.append_continuations(Some(on_fulfill), Some(on_reject));
        Ok(())
    }
}

fn run<V: Clone + 'static>(callbacks: Vec<Callback<V>>, value: V, drain: Drain) {
    if callbacks.is_empty() {
        return;
    }
    match drain {
        Drain::Immediate => {
            for callback in callbacks {
                callback(value.clone());
            }
        }
        Drain::Queued => scheduler::schedule(move || {
            for callback in callbacks {
                callback(value.clone());
            }
        }),
    }
}

/// Settles one [`Deferred`].
///
/// Clones share a latch: the first `resolve`, `fulfill` or `reject` through
/// any clone wins and every later call is ignored, even while an adopted
/// thenable is still pending.
pub struct Resolver<T, E> {
    deferred: Deferred<T, E>,
    latch: Rc<Cell<bool>>,
}

impl<T, E> Clone for Resolver<T, E> {
    fn clone(&self) -> Self {
        Self {
            deferred: self.deferred.clone(),
            latch: Rc::clone(&self.latch),
        }
    }
}

impl<T: Clone + 'static, E: Clone + 'static> Resolver<T, E> {
    fn new(deferred: Deferred<T, E>) -> Self {
        Self {
            deferred,
            latch: Rc::new(Cell::new(false)),
        }
    }

    /// The value this resolver settles.
    pub fn deferred(&self) -> Deferred<T, E> {
        self.deferred.clone()
    }

    /// Whether a settling call has already been accepted.
    pub fn is_latched(&self) -> bool {
        self.latch.get()
    }

    /// Resolves with `resolution` unless already settled. A plain value runs
    /// continuations before returning; a thenable is adopted.
    pub fn resolve(&self, resolution: Resolution<T, E>) {
        self.resolve_with(resolution, Drain::Immediate);
    }

    /// Fulfils with a plain value, or adopts the outcome of a thenable.
    ///
    /// `drain` only applies to a plain value; adopted outcomes are forwarded
    /// as soon as the thenable delivers them.
    pub fn resolve_with(&self, resolution: Resolution<T, E>, drain: Drain) {
        if self.latch.replace(true) {
            return;
        }
        self.deferred.adopt(resolution, drain);
    }

    /// Fulfils with `value` unless already settled, running continuations
    /// before returning.
    pub fn fulfill(&self, value: T) {
        self.fulfill_with(value, Drain::Immediate);
    }

    pub fn fulfill_with(&self, value: T, drain: Drain) {
        if self.latch.replace(true) {
            return;
        }
        self.deferred.settle(Ok(value), drain);
    }

    /// Rejects with `reason` unless already settled, running continuations
    /// before returning.
    pub fn reject(&self, reason: E) {
        self.reject_with(reason, Drain::Immediate);
    }

    pub fn reject_with(&self, reason: E, drain: Drain) {
        if self.latch.replace(true) {
            return;
        }
        self.deferred.settle(Err(reason), drain);
    }

    fn settle_from(&self, outcome: Result<Resolution<T, E>, E>) {
        match outcome {
            Ok(resolution) => self.resolve(resolution),
            Err(reason) => self.reject(reason),
        }
    }
}
