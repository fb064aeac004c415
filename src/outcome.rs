//! The two-case result of an asynchronous computation, and the type-erased
//! error container it carries on failure.

use std::{error::Error, fmt, sync::Arc};

/// What a [`Future`][crate::Future] settled to: a success value or a failure error.
///
/// Unlike a plain [`Result`], the failure case always carries a type-erased
/// [`ErasedError`], because the consumers of a future do not necessarily agree on a
/// single concrete error type. Typed observers get their error back via
/// [`ErasedError::downcast_ref`].
#[derive(Debug, Clone)]
pub enum Outcome<T> {
    Success(T),
    Failure(ErasedError),
}

impl<T> Outcome<T> {
    #[inline]
    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Success(_))
    }

    #[inline]
    pub fn is_failure(&self) -> bool {
        matches!(self, Outcome::Failure(_))
    }

    /// Returns the success value, or `None` if this is a failure.
    pub fn value(&self) -> Option<&T> {
        match self {
            Outcome::Success(value) => Some(value),
            Outcome::Failure(_) => None,
        }
    }

    /// Returns the failure error, or `None` if this is a success.
    pub fn error(&self) -> Option<&ErasedError> {
        match self {
            Outcome::Success(_) => None,
            Outcome::Failure(error) => Some(error),
        }
    }

    pub fn into_result(self) -> Result<T, ErasedError> {
        match self {
            Outcome::Success(value) => Ok(value),
            Outcome::Failure(error) => Err(error),
        }
    }
}

impl<T, E: Into<ErasedError>> From<Result<T, E>> for Outcome<T> {
    fn from(result: Result<T, E>) -> Self {
        match result {
            Ok(value) => Outcome::Success(value),
            Err(error) => Outcome::Failure(error.into()),
        }
    }
}

/// An error value boxed together with its runtime type, so that a concrete error can
/// be recovered later with a safe downcast.
///
/// Cloning is cheap; all clones share the same boxed error. [`ErasedError`]
/// deliberately does *not* implement [`Error`] itself, which keeps the blanket
/// `From<E: Error>` conversion coherent.
#[derive(Clone)]
pub struct ErasedError {
    inner: Arc<dyn Error + Send + Sync + 'static>,
}

impl ErasedError {
    pub fn new<E: Error + Send + Sync + 'static>(error: E) -> Self {
        Self {
            inner: Arc::new(error),
        }
    }

    /// Returns `true` if the boxed error is of type `E`.
    pub fn is<E: Error + 'static>(&self) -> bool {
        self.inner.is::<E>()
    }

    /// Attempts to view the boxed error as a concrete `E`.
    ///
    /// Returns `None` when the error is of a different type. A failed downcast is not
    /// an error condition; typed failure handlers use it to decide whether they are
    /// the right observer.
    pub fn downcast_ref<E: Error + 'static>(&self) -> Option<&E> {
        self.inner.downcast_ref::<E>()
    }

    /// Returns a reference to the boxed error.
    pub fn as_dyn(&self) -> &(dyn Error + 'static) {
        &*self.inner
    }
}

impl fmt::Debug for ErasedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&self.inner, f)
    }
}

impl fmt::Display for ErasedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.inner, f)
    }
}

impl<E: Error + Send + Sync + 'static> From<E> for ErasedError {
    fn from(error: E) -> Self {
        ErasedError::new(error)
    }
}

/// Failures produced by the combinator layer itself, rather than by user code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FutureError {
    /// A predicate passed to [`Future::filter`][crate::Future::filter] (or
    /// [`filter_not`][crate::Future::filter_not]) rejected a successful value.
    FilteredOut,
    /// The [`Promise`][crate::Promise] feeding a future was dropped without ever
    /// being completed, so the value can no longer arrive.
    PromiseDropped,
}

impl fmt::Display for FutureError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FutureError::FilteredOut => f.write_str("value was rejected by a filter predicate"),
            FutureError::PromiseDropped => f.write_str("promise was dropped without completing"),
        }
    }
}

impl Error for FutureError {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test::TestError;

    #[test]
    fn downcast_roundtrip() {
        let error = ErasedError::new(TestError::Recoverable);
        assert!(error.is::<TestError>());
        assert_eq!(error.downcast_ref::<TestError>(), Some(&TestError::Recoverable));
    }

    #[test]
    fn downcast_mismatch() {
        let error = ErasedError::new(TestError::Fatal);
        assert!(!error.is::<FutureError>());
        assert_eq!(error.downcast_ref::<FutureError>(), None);
    }

    #[test]
    fn outcome_from_result() {
        let ok: Outcome<i32> = Ok::<_, TestError>(7).into();
        assert_eq!(ok.value(), Some(&7));
        assert!(ok.error().is_none());

        let err: Outcome<i32> = Err::<i32, _>(TestError::Fatal).into();
        assert!(err.is_failure());
        assert_eq!(err.error().unwrap().downcast_ref(), Some(&TestError::Fatal));
    }

    #[test]
    fn display_forwards_to_boxed_error() {
        let error = ErasedError::new(FutureError::FilteredOut);
        assert_eq!(
            error.to_string(),
            FutureError::FilteredOut.to_string(),
        );
    }
}
