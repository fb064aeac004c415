//! Composition operators deriving new futures from existing ones.
//!
//! Every combinator creates a fresh internal [`Promise`] and completes it from a
//! callback on the parent future. None of them block, and none of them relax the
//! complete-at-most-once rule: combinators only control *how* the derived
//! completion is computed. Transform closures run inline on whichever
//! thread completed the parent; the derived future inherits the parent's default
//! callback context.

use std::sync::Arc;

use crate::{
    context::Context,
    future::{Future, Promise},
    outcome::{ErasedError, FutureError, Outcome},
};

/// Values that can be lifted into a [`Future`].
///
/// Lets combinator closures return a plain [`Outcome`] or [`Result`] where a future
/// is expected; the plain value is treated as an already-completed future.
pub trait IntoFuture<T: Send + Sync + 'static> {
    fn into_future(self) -> Future<T>;
}

impl<T: Send + Sync + 'static> IntoFuture<T> for Future<T> {
    fn into_future(self) -> Future<T> {
        self
    }
}

impl<T: Send + Sync + 'static> IntoFuture<T> for Outcome<T> {
    fn into_future(self) -> Future<T> {
        Future::from_outcome(self)
    }
}

impl<T: Send + Sync + 'static, E: Into<ErasedError>> IntoFuture<T> for Result<T, E> {
    fn into_future(self) -> Future<T> {
        Future::from_outcome(self.into())
    }
}

impl<T: Send + Sync + 'static> Future<T> {
    /// Creates the derived promise/future pair and wires `relay` to the parent's
    /// completion. The relay runs on the thread that completes the parent.
    fn derive<U, F>(&self, relay: F) -> Future<U>
    where
        U: Send + Sync + 'static,
        F: FnOnce(&Arc<Outcome<T>>, Promise<U>) + Send + 'static,
    {
        let promise = Promise::with_context(self.context());
        let derived = promise.future();
        self.register(
            Some(Context::immediate()),
            None,
            Box::new(move |outcome| relay(outcome, promise)),
        );
        derived
    }

    /// Transforms the success value; a failure is forwarded untouched and
    /// `transform` is never evaluated.
    pub fn map<U, F>(&self, transform: F) -> Future<U>
    where
        U: Send + Sync + 'static,
        F: FnOnce(&T) -> U + Send + 'static,
    {
        self.derive(move |outcome, promise| match &**outcome {
            Outcome::Success(value) => {
                promise.try_success(transform(value));
            }
            Outcome::Failure(error) => {
                promise.try_failure(error.clone());
            }
        })
    }

    /// Like [`map`][Future::map], for a fallible transform; an `Err` fails the
    /// derived future with that error.
    pub fn try_map<U, E, F>(&self, transform: F) -> Future<U>
    where
        U: Send + Sync + 'static,
        E: Into<ErasedError>,
        F: FnOnce(&T) -> Result<U, E> + Send + 'static,
    {
        self.derive(move |outcome, promise| match &**outcome {
            Outcome::Success(value) => {
                promise.try_complete(transform(value).into());
            }
            Outcome::Failure(error) => {
                promise.try_failure(error.clone());
            }
        })
    }

    /// Monadic bind: on success, evaluates `transform` and forwards the eventual
    /// completion of the future it returns. `transform` may also return a plain
    /// [`Outcome`] or [`Result`], which lifts to an already-completed future.
    ///
    /// On parent failure the error is forwarded and `transform` is never
    /// evaluated.
    pub fn flat_map<U, R, F>(&self, transform: F) -> Future<U>
    where
        U: Send + Sync + 'static,
        R: IntoFuture<U>,
        F: FnOnce(&T) -> R + Send + 'static,
    {
        self.derive(move |outcome, promise| match &**outcome {
            Outcome::Success(value) => {
                transform(value).into_future().forward_to(promise);
            }
            Outcome::Failure(error) => {
                promise.try_failure(error.clone());
            }
        })
    }

    /// Turns a failure into a success value; a success is forwarded untouched and
    /// `recovery` is never evaluated.
    pub fn recover<F>(&self, recovery: F) -> Future<T>
    where
        F: FnOnce(&ErasedError) -> T + Send + 'static,
    {
        self.derive(move |outcome, promise| match &**outcome {
            Outcome::Success(_) => {
                promise.complete_shared(outcome.clone());
            }
            Outcome::Failure(error) => {
                promise.try_success(recovery(error));
            }
        })
    }

    /// Like [`recover`][Future::recover], for a fallible recovery; an `Err`
    /// replaces the original failure.
    pub fn try_recover<E, F>(&self, recovery: F) -> Future<T>
    where
        E: Into<ErasedError>,
        F: FnOnce(&ErasedError) -> Result<T, E> + Send + 'static,
    {
        self.derive(move |outcome, promise| match &**outcome {
            Outcome::Success(_) => {
                promise.complete_shared(outcome.clone());
            }
            Outcome::Failure(error) => {
                promise.try_complete(recovery(error).into());
            }
        })
    }

    /// The failure-side analogue of [`flat_map`][Future::flat_map]: `recovery`
    /// returns a future (or a plain outcome) whose completion replaces the
    /// failure.
    pub fn recover_with<R, F>(&self, recovery: F) -> Future<T>
    where
        R: IntoFuture<T>,
        F: FnOnce(&ErasedError) -> R + Send + 'static,
    {
        self.derive(move |outcome, promise| match &**outcome {
            Outcome::Success(_) => {
                promise.complete_shared(outcome.clone());
            }
            Outcome::Failure(error) => {
                recovery(error).into_future().forward_to(promise);
            }
        })
    }

    /// On success, fails the derived future with [`FutureError::FilteredOut`] if
    /// `predicate` rejects the value, and forwards the value unchanged otherwise.
    /// A parent failure passes through and the predicate is never evaluated.
    pub fn filter<P>(&self, predicate: P) -> Future<T>
    where
        P: FnOnce(&T) -> bool + Send + 'static,
    {
        self.derive(move |outcome, promise| match &**outcome {
            Outcome::Success(value) => {
                if predicate(value) {
                    promise.complete_shared(outcome.clone());
                } else {
                    promise.try_failure(FutureError::FilteredOut);
                }
            }
            Outcome::Failure(_) => {
                promise.complete_shared(outcome.clone());
            }
        })
    }

    /// [`filter`][Future::filter] with the predicate negated.
    pub fn filter_not<P>(&self, predicate: P) -> Future<T>
    where
        P: FnOnce(&T) -> bool + Send + 'static,
    {
        self.filter(move |value| !predicate(value))
    }

    /// Pairs this future's value with `other`'s.
    ///
    /// Defined as `self.flat_map(|a| other.map(|b| (a, b)))`, so if `self` fails,
    /// `other` is never awaited and `self`'s error propagates; when both fail, the
    /// left error deterministically wins.
    pub fn zip<U>(&self, other: &Future<U>) -> Future<(T, U)>
    where
        T: Clone,
        U: Clone + Send + Sync + 'static,
    {
        let other = other.clone();
        self.flat_map(move |a| {
            let a = a.clone();
            other.map(move |b| (a, b.clone()))
        })
    }

    /// Returns a future equivalent to this one, except that callbacks attached
    /// without an explicit context are delivered on `context`.
    ///
    /// This does not change when or where the underlying value is computed, only
    /// where continuations are dispatched.
    pub fn settle_in(&self, context: &Context) -> Future<T> {
        Future {
            inner: self.inner.clone(),
            context: context.clone(),
        }
    }
}
