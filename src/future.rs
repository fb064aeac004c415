//! The Future/Promise completion cell and callback registration.

use std::{
    mem,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex,
    },
};

use crate::{
    context::{Context, Task},
    outcome::{ErasedError, FutureError, Outcome},
};

pub(crate) type Callback<T> = Box<dyn FnOnce(&Arc<Outcome<T>>) + Send + 'static>;

/// A continuation registered while the cell was still pending, together with the
/// context it will be delivered on and an optional gate.
struct Waiter<T: Send + Sync + 'static> {
    context: Context,
    token: Option<InvalidationToken>,
    callback: Callback<T>,
}

impl<T: Send + Sync + 'static> Waiter<T> {
    /// Schedules the callback on its recorded context.
    ///
    /// Token validity is checked at the moment the callback is about to run, not
    /// here; an invalidated callback is skipped, never queued for retry.
    fn submit(self, outcome: Arc<Outcome<T>>) {
        let Waiter {
            context,
            token,
            callback,
        } = self;
        let task: Task = Box::new(move || {
            if token.map_or(true, |token| token.is_valid()) {
                callback(&outcome);
            }
        });
        context.execute_task(task);
    }
}

enum State<T: Send + Sync + 'static> {
    Pending(Vec<Waiter<T>>),
    /// The completing thread is currently submitting the captured waiters.
    /// Registrations arriving in this window are queued here instead of
    /// self-submitting, so they cannot overtake earlier waiters on the same
    /// context; the completing thread drains them before switching to
    /// `Completed`.
    Draining(Arc<Outcome<T>>, Vec<Waiter<T>>),
    Completed(Arc<Outcome<T>>),
}

/// The shared completion cell. Completion happens at most once: the winning
/// thread moves `Pending → Draining → Completed` and no other transition exists.
pub(crate) struct Inner<T: Send + Sync + 'static> {
    state: Mutex<State<T>>,
}

impl<T: Send + Sync + 'static> Inner<T> {
    fn pending() -> Arc<Self> {
        Arc::new(Inner {
            state: Mutex::new(State::Pending(Vec::new())),
        })
    }

    fn completed(outcome: Outcome<T>) -> Arc<Self> {
        Arc::new(Inner {
            state: Mutex::new(State::Completed(Arc::new(outcome))),
        })
    }

    fn is_completed(&self) -> bool {
        matches!(
            *self.state.lock().unwrap(),
            State::Draining(..) | State::Completed(_)
        )
    }

    /// Attempts the `Pending → Completed` transition. The winning thread captures
    /// the waiter list and submits every waiter to its context *outside* the lock,
    /// in registration order; registrations arriving while that is in progress are
    /// queued by [`register`][Inner::register] and drained here too, so they queue
    /// behind the earlier waiters on their context instead of overtaking them.
    fn try_complete(&self, outcome: Arc<Outcome<T>>) -> bool {
        let mut waiters = {
            let mut state = self.state.lock().unwrap();
            match &mut *state {
                State::Draining(..) | State::Completed(_) => return false,
                State::Pending(waiters) => {
                    let waiters = mem::take(waiters);
                    *state = State::Draining(outcome.clone(), Vec::new());
                    waiters
                }
            }
        };
        loop {
            for waiter in waiters {
                waiter.submit(outcome.clone());
            }
            let mut state = self.state.lock().unwrap();
            match &mut *state {
                State::Draining(_, queued) => {
                    if queued.is_empty() {
                        *state = State::Completed(outcome);
                        return true;
                    }
                    waiters = mem::take(queued);
                }
                // Only the completing thread leaves the draining state.
                State::Pending(_) | State::Completed(_) => unreachable!(),
            }
        }
    }

    /// Appends a waiter, or fires it immediately if the cell has already completed.
    /// The append-or-fire decision happens under the same lock as completion, so a
    /// registration can never fall between the state check and the waiter drain.
    fn register(&self, waiter: Waiter<T>) {
        let outcome = {
            let mut state = self.state.lock().unwrap();
            match &mut *state {
                State::Pending(waiters) | State::Draining(_, waiters) => {
                    waiters.push(waiter);
                    return;
                }
                State::Completed(outcome) => outcome.clone(),
            }
        };
        waiter.submit(outcome);
    }
}

/// A shared flag that gates the delivery of registered callbacks.
///
/// Cloning shares the flag; a single token is typically shared across several
/// registrations to gate a whole chain. Validity is read at the instant each gated
/// callback would otherwise run, so toggling the flag only affects callbacks that
/// have not run yet. Invalidation does not cancel in-flight work; it only
/// suppresses delivery.
#[derive(Clone)]
pub struct InvalidationToken {
    valid: Arc<AtomicBool>,
}

impl InvalidationToken {
    /// Creates a token that is initially valid.
    pub fn new() -> Self {
        Self {
            valid: Arc::new(AtomicBool::new(true)),
        }
    }

    pub fn is_valid(&self) -> bool {
        self.valid.load(Ordering::Relaxed)
    }

    pub fn set_valid(&self, valid: bool) {
        self.valid.store(valid, Ordering::Relaxed);
    }

    /// Marks all callbacks gated by this token (that have not yet run) as skipped.
    pub fn invalidate(&self) {
        self.set_valid(false);
    }
}

impl Default for InvalidationToken {
    fn default() -> Self {
        Self::new()
    }
}

/// The one-shot writable side of a completion cell.
///
/// A [`Promise`] may be asked to complete any number of times; only the first
/// attempt succeeds and returns `true`, every later attempt is a no-op returning
/// `false`. Dropping a promise that never completed fails its future with
/// [`FutureError::PromiseDropped`], so registered callbacks are flushed rather than
/// leaked.
pub struct Promise<T: Send + Sync + 'static> {
    inner: Arc<Inner<T>>,
    context: Context,
}

impl<T: Send + Sync + 'static> Promise<T> {
    /// Creates a pending promise.
    ///
    /// The context active on the calling thread is captured as the default callback
    /// context of the derived future.
    pub fn new() -> Self {
        Self::with_context(&Context::current())
    }

    pub(crate) fn with_context(context: &Context) -> Self {
        Self {
            inner: Inner::pending(),
            context: context.clone(),
        }
    }

    /// Returns a read-only [`Future`] sharing this promise's completion cell.
    pub fn future(&self) -> Future<T> {
        Future {
            inner: self.inner.clone(),
            context: self.context.clone(),
        }
    }

    /// Attempts to complete the cell with `outcome`. Returns `true` exactly once.
    pub fn try_complete(&self, outcome: Outcome<T>) -> bool {
        self.inner.try_complete(Arc::new(outcome))
    }

    pub fn try_success(&self, value: T) -> bool {
        self.try_complete(Outcome::Success(value))
    }

    pub fn try_failure(&self, error: impl Into<ErasedError>) -> bool {
        self.try_complete(Outcome::Failure(error.into()))
    }

    /// Completes with an outcome that is already shared, forwarding the allocation
    /// instead of copying the value. Used by combinators that pass a parent's
    /// outcome through unchanged.
    pub(crate) fn complete_shared(&self, outcome: Arc<Outcome<T>>) -> bool {
        self.inner.try_complete(outcome)
    }
}

impl<T: Send + Sync + 'static> Default for Promise<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Send + Sync + 'static> Drop for Promise<T> {
    fn drop(&mut self) {
        if self.inner.is_completed() {
            return;
        }
        self.inner.try_complete(Arc::new(Outcome::Failure(ErasedError::new(
            FutureError::PromiseDropped,
        ))));
    }
}

/// A read-only handle to a value or error that becomes available at most once,
/// possibly asynchronously.
///
/// Handles are cheap to clone and share one completion cell. Callbacks can be
/// attached before or after completion; each registered callback runs exactly once,
/// on its chosen context, and callbacks attached to the same context fire in
/// registration order.
pub struct Future<T: Send + Sync + 'static> {
    pub(crate) inner: Arc<Inner<T>>,
    /// Default context for registrations that don't name one explicitly.
    pub(crate) context: Context,
}

impl<T: Send + Sync + 'static> Clone for Future<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
            context: self.context.clone(),
        }
    }
}

impl<T: Send + Sync + 'static> Future<T> {
    /// Creates an already-successful future.
    ///
    /// The context active on the calling thread is captured as the default callback
    /// context.
    pub fn from_value(value: T) -> Self {
        Self::from_outcome(Outcome::Success(value))
    }

    /// Creates an already-failed future.
    pub fn from_error(error: impl Into<ErasedError>) -> Self {
        Self::from_outcome(Outcome::Failure(error.into()))
    }

    pub fn from_outcome(outcome: Outcome<T>) -> Self {
        Self {
            inner: Inner::completed(outcome),
            context: Context::current(),
        }
    }

    /// Non-blocking snapshot of whether the cell has completed.
    pub fn is_completed(&self) -> bool {
        self.inner.is_completed()
    }

    /// The default context callbacks are delivered on when no explicit context is
    /// given. Use [`settle_in`][Future::settle_in] to derive a handle with a
    /// different one.
    pub fn context(&self) -> &Context {
        &self.context
    }

    pub(crate) fn register(
        &self,
        context: Option<Context>,
        token: Option<InvalidationToken>,
        callback: Callback<T>,
    ) {
        let context = context.unwrap_or_else(|| self.context.clone());
        self.inner.register(Waiter {
            context,
            token,
            callback,
        });
    }

    /// Forwards this future's eventual outcome into `promise`, sharing the
    /// allocation. The relay runs inline on whichever thread completes `self`.
    pub(crate) fn forward_to(&self, promise: Promise<T>) {
        self.register(
            Some(Context::immediate()),
            None,
            Box::new(move |outcome| {
                promise.complete_shared(outcome.clone());
            }),
        );
    }

    /// Registers `callback` to run on the default context once the future
    /// completes, with either outcome. Returns a handle to the same future for
    /// chaining.
    pub fn on_complete<F>(&self, callback: F) -> Future<T>
    where
        F: FnOnce(&Outcome<T>) + Send + 'static,
    {
        self.register(None, None, complete_callback(callback));
        self.clone()
    }

    /// Like [`on_complete`][Future::on_complete], but delivers on `context`.
    pub fn on_complete_in<F>(&self, context: &Context, callback: F) -> Future<T>
    where
        F: FnOnce(&Outcome<T>) + Send + 'static,
    {
        self.register(Some(context.clone()), None, complete_callback(callback));
        self.clone()
    }

    /// Like [`on_complete`][Future::on_complete], but skipped if `token` is invalid
    /// at delivery time.
    pub fn on_complete_gated<F>(&self, token: &InvalidationToken, callback: F) -> Future<T>
    where
        F: FnOnce(&Outcome<T>) + Send + 'static,
    {
        self.register(None, Some(token.clone()), complete_callback(callback));
        self.clone()
    }

    /// Registers `callback` with both an explicit delivery context and a gate.
    pub fn on_complete_in_gated<F>(
        &self,
        context: &Context,
        token: &InvalidationToken,
        callback: F,
    ) -> Future<T>
    where
        F: FnOnce(&Outcome<T>) + Send + 'static,
    {
        self.register(
            Some(context.clone()),
            Some(token.clone()),
            complete_callback(callback),
        );
        self.clone()
    }

    /// Registers `callback` to run only if the future succeeds.
    pub fn on_success<F>(&self, callback: F) -> Future<T>
    where
        F: FnOnce(&T) + Send + 'static,
    {
        self.register(None, None, success_callback(callback));
        self.clone()
    }

    pub fn on_success_in<F>(&self, context: &Context, callback: F) -> Future<T>
    where
        F: FnOnce(&T) + Send + 'static,
    {
        self.register(Some(context.clone()), None, success_callback(callback));
        self.clone()
    }

    pub fn on_success_gated<F>(&self, token: &InvalidationToken, callback: F) -> Future<T>
    where
        F: FnOnce(&T) + Send + 'static,
    {
        self.register(None, Some(token.clone()), success_callback(callback));
        self.clone()
    }

    pub fn on_success_in_gated<F>(
        &self,
        context: &Context,
        token: &InvalidationToken,
        callback: F,
    ) -> Future<T>
    where
        F: FnOnce(&T) + Send + 'static,
    {
        self.register(
            Some(context.clone()),
            Some(token.clone()),
            success_callback(callback),
        );
        self.clone()
    }

    /// Registers `callback` to run with the erased error if the future fails,
    /// whatever the concrete error type.
    pub fn on_failure<F>(&self, callback: F) -> Future<T>
    where
        F: FnOnce(&ErasedError) + Send + 'static,
    {
        self.register(None, None, failure_callback(callback));
        self.clone()
    }

    pub fn on_failure_in<F>(&self, context: &Context, callback: F) -> Future<T>
    where
        F: FnOnce(&ErasedError) + Send + 'static,
    {
        self.register(Some(context.clone()), None, failure_callback(callback));
        self.clone()
    }

    pub fn on_failure_gated<F>(&self, token: &InvalidationToken, callback: F) -> Future<T>
    where
        F: FnOnce(&ErasedError) + Send + 'static,
    {
        self.register(None, Some(token.clone()), failure_callback(callback));
        self.clone()
    }

    pub fn on_failure_in_gated<F>(
        &self,
        context: &Context,
        token: &InvalidationToken,
        callback: F,
    ) -> Future<T>
    where
        F: FnOnce(&ErasedError) + Send + 'static,
    {
        self.register(
            Some(context.clone()),
            Some(token.clone()),
            failure_callback(callback),
        );
        self.clone()
    }

    /// Registers `callback` to run only if the future fails with an error of
    /// concrete type `E`. A failure of any other type silently skips the callback;
    /// a failed downcast is not an error.
    pub fn on_failure_of<E, F>(&self, callback: F) -> Future<T>
    where
        E: std::error::Error + Send + Sync + 'static,
        F: FnOnce(&E) + Send + 'static,
    {
        self.register(
            None,
            None,
            Box::new(move |outcome| {
                if let Outcome::Failure(error) = &**outcome {
                    if let Some(error) = error.downcast_ref::<E>() {
                        callback(error);
                    }
                }
            }),
        );
        self.clone()
    }
}

fn complete_callback<T, F>(callback: F) -> Callback<T>
where
    T: Send + Sync + 'static,
    F: FnOnce(&Outcome<T>) + Send + 'static,
{
    Box::new(move |outcome| callback(outcome))
}

fn success_callback<T, F>(callback: F) -> Callback<T>
where
    T: Send + Sync + 'static,
    F: FnOnce(&T) + Send + 'static,
{
    Box::new(move |outcome| {
        if let Outcome::Success(value) = &**outcome {
            callback(value);
        }
    })
}

fn failure_callback<T, F>(callback: F) -> Callback<T>
where
    T: Send + Sync + 'static,
    F: FnOnce(&ErasedError) + Send + 'static,
{
    Box::new(move |outcome| {
        if let Outcome::Failure(error) = &**outcome {
            callback(error);
        }
    })
}

/// Runs `body` on the global parallel context and returns a future for its result.
///
/// The returned future's default callback context is the context that evaluates the
/// body.
pub fn future<T, F>(body: F) -> Future<T>
where
    T: Send + Sync + 'static,
    F: FnOnce() -> T + Send + 'static,
{
    future_in(&Context::global(), body)
}

/// Runs `body` on `context` and returns a future for its result.
pub fn future_in<T, F>(context: &Context, body: F) -> Future<T>
where
    T: Send + Sync + 'static,
    F: FnOnce() -> T + Send + 'static,
{
    let promise = Promise::with_context(context);
    let future = promise.future();
    context.execute(move || {
        promise.try_success(body());
    });
    future
}

/// Like [`future`], for a fallible body; an `Err` fails the returned future.
pub fn try_future<T, E, F>(body: F) -> Future<T>
where
    T: Send + Sync + 'static,
    E: Into<ErasedError>,
    F: FnOnce() -> Result<T, E> + Send + 'static,
{
    try_future_in(&Context::global(), body)
}

/// Like [`future_in`], for a fallible body.
pub fn try_future_in<T, E, F>(context: &Context, body: F) -> Future<T>
where
    T: Send + Sync + 'static,
    E: Into<ErasedError>,
    F: FnOnce() -> Result<T, E> + Send + 'static,
{
    let promise = Promise::with_context(context);
    let future = promise.future();
    context.execute(move || {
        promise.try_complete(body().into());
    });
    future
}
