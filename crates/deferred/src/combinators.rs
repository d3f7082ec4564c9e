//! # Combinators
//!
//! Aggregate several deferred-or-plain inputs into one deferred value.
//! Every input is coerced through [`Deferred::resolved`] first.
//!
//! None of these cancel anything: once the aggregate settles, the remaining
//! inputs still run to completion and their outcomes are discarded by the
//! aggregate's single-settlement guarantee.

use std::cell::Cell;
use std::cell::RefCell;
use std::rc::Rc;

use crate::deferred::Deferred;
use crate::deferred::Resolution;

/// Settles with whichever input settles first, fulfilled or rejected.
///
/// With no inputs, fulfils with `None`.
pub fn any<T, E>(inputs: impl IntoIterator<Item = Resolution<T, E>>) -> Deferred<Option<T>, E>
where
    T: Clone + 'static,
    E: Clone + 'static,
{
    let (outer, resolver) = Deferred::pending();
    let mut empty = true;
    for input in inputs {
        empty = false;
        let on_ok = resolver.clone();
        let on_err = resolver.clone();
        Deferred::resolved(input).append_continuations(
            Some(Box::new(move |value| on_ok.fulfill(Some(value)))),
            Some(Box::new(move |reason| on_err.reject(reason))),
        );
    }
    if empty {
        resolver.fulfill(None);
    }
    outer
}

/// Fulfils with every input's value, in input order, once all fulfil.
///
/// Rejects with the first rejection. With no inputs, fulfils with an empty
/// vector.
pub fn every<T, E>(inputs: impl IntoIterator<Item = Resolution<T, E>>) -> Deferred<Vec<T>, E>
where
    T: Clone + 'static,
    E: Clone + 'static,
{
    let inputs: Vec<_> = inputs.into_iter().collect();
    let (outer, resolver) = Deferred::pending();
    if inputs.is_empty() {
        resolver.fulfill(Vec::new());
        return outer;
    }

    let slots: Rc<RefCell<Vec<Option<T>>>> = Rc::new(RefCell::new(vec![None; inputs.len()]));
    let countdown = Rc::new(Cell::new(inputs.len()));

    for (index, input) in inputs.into_iter().enumerate() {
        let slots = Rc::clone(&slots);
        let countdown = Rc::clone(&countdown);
        let on_ok = resolver.clone();
        let on_err = resolver.clone();
        Deferred::resolved(input).append_continuations(
            Some(Box::new(move |value| {
                slots.borrow_mut()[index] = Some(value);
                countdown.set(countdown.get() - 1);
                if countdown.get() == 0 {
                    let values: Vec<T> = slots.borrow_mut().drain(..).flatten().collect();
                    on_ok.fulfill(values);
                }
            })),
            Some(Box::new(move |reason| on_err.reject(reason))),
        );
    }
    outer
}

/// Mirror of [`every`] for rejection.
///
/// Fulfils with the first fulfilment. Rejects with every input's reason, in
/// input order, once all reject. With no inputs, fulfils with `None`.
pub fn some<T, E>(inputs: impl IntoIterator<Item = Resolution<T, E>>) -> Deferred<Option<T>, Vec<E>>
where
    T: Clone + 'static,
    E: Clone + 'static,
{
    let inputs: Vec<_> = inputs.into_iter().collect();
    let (outer, resolver) = Deferred::pending();
    if inputs.is_empty() {
        resolver.fulfill(None);
        return outer;
    }

    let slots: Rc<RefCell<Vec<Option<E>>>> = Rc::new(RefCell::new(vec![None; inputs.len()]));
    let countdown = Rc::new(Cell::new(inputs.len()));

    for (index, input) in inputs.into_iter().enumerate() {
        let slots = Rc::clone(&slots);
        let countdown = Rc::clone(&countdown);
        let on_ok = resolver.clone();
        let on_err = resolver.clone();
        Deferred::resolved(input).append_continuations(
            Some(Box::new(move |value| on_ok.fulfill(Some(value)))),
            Some(Box::new(move |reason| {
                slots.borrow_mut()[index] = Some(reason);
                countdown.set(countdown.get() - 1);
                if countdown.get() == 0 {
                    let reasons: Vec<E> = slots.borrow_mut().drain(..).flatten().collect();
                    on_err.reject(reasons);
                }
            })),
        );
    }
    outer
}
