//! Callback-based futures and promises with pluggable execution contexts.
//!
//! (if you're looking for `async`/`.await` futures, this is not that: nothing here
//! implements [`std::future::Future`] or talks to an async runtime. This library is
//! for plain threaded code that wants to hand values between threads without
//! blocking on them)
//!
//! # Overview
//!
//! This library features two main types: [`Future`] and [`Promise`]. A [`Future`]
//! is a read-only view of a value that may not exist yet; the connected [`Promise`]
//! is the write-once slot that produces it. Instead of polling or blocking,
//! consumers attach callbacks, which fire exactly once when the value (or an error)
//! arrives.
//!
//! ## Contexts
//!
//! Every callback is delivered through a [`Context`], which decides the thread it
//! runs on: [`Context::immediate`] runs callbacks inline on the completing thread,
//! [`Context::main`] serializes them onto one dedicated thread, and
//! [`Context::global`] spreads them over a small pool. Custom serial or pooled
//! contexts can be built with [`Context::builder`]. A future carries a default
//! context for its callbacks; [`Future::settle_in`] rebinds it.
//!
//! ## Combinators
//!
//! Futures compose without blocking: [`map`][Future::map] and
//! [`flat_map`][Future::flat_map] chain computations, [`recover`][Future::recover]
//! and [`recover_with`][Future::recover_with] handle errors,
//! [`filter`][Future::filter] rejects values, and [`zip`][Future::zip] joins two
//! futures into one.
//!
//! # Usage
//!
//! Running a computation on the global pool and reacting to its result:
//!
//! ```
//! use settled::future;
//! use std::sync::mpsc;
//!
//! let (tx, rx) = mpsc::channel();
//! future(|| 6 * 7)
//!     .map(|n| format!("the answer is {n}"))
//!     .on_success(move |s| tx.send(s.clone()).unwrap());
//!
//! assert_eq!(rx.recv().unwrap(), "the answer is 42");
//! ```
//!
//! Completing a [`Promise`] by hand, with callbacks delivered on the shared serial
//! context:
//!
//! ```
//! use settled::{Context, Promise};
//! use std::sync::mpsc;
//!
//! let (tx, rx) = mpsc::channel();
//! let promise = Promise::new();
//! promise
//!     .future()
//!     .settle_in(&Context::main())
//!     .on_success(move |n| tx.send(*n).unwrap());
//!
//! promise.try_success(7);
//! assert_eq!(rx.recv().unwrap(), 7);
//! ```

mod combinator;
mod context;
mod drop;
mod future;
mod outcome;
#[cfg(test)]
mod test;

pub use combinator::IntoFuture;
pub use context::{Context, ContextBuilder};
pub use future::{
    future, future_in, try_future, try_future_in, Future, InvalidationToken, Promise,
};
pub use outcome::{ErasedError, FutureError, Outcome};
