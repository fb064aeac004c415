//! Execution contexts: the places where callbacks and future bodies run.
//!
//! A [`Context`] is a cheap, cloneable handle to one of three kinds of executor:
//!
//! - *immediate* — runs a task synchronously on the calling thread; reentrant.
//! - *serial* — a dedicated worker thread draining a FIFO queue; tasks never
//!   overlap and run in submission order.
//! - *parallel* — a pool of worker threads sharing one queue; tasks may run
//!   concurrently and in any order.
//!
//! Worker threads register themselves as the *current* context, so code running on
//! a context can recover a handle to it via [`Context::current`] and stay where it
//! is.

use std::{
    cell::RefCell,
    fmt, io, mem,
    panic::resume_unwind,
    sync::{Arc, Mutex, OnceLock, Weak},
    thread::{self, JoinHandle},
};

use crossbeam_channel::{Receiver, Sender};

use crate::drop::defer;

/// A unit of work submitted to a context.
pub(crate) type Task = Box<dyn FnOnce() + Send + 'static>;

trait Executor: Send + Sync + 'static {
    fn execute(&self, task: Task);
    fn label(&self) -> &str;
}

thread_local! {
    static CURRENT: RefCell<Option<Weak<dyn Executor>>> = const { RefCell::new(None) };
}

/// A handle to a place where work can be executed.
#[derive(Clone)]
pub struct Context {
    inner: Arc<dyn Executor>,
}

impl Context {
    /// Returns the context that runs every task inline on the submitting thread.
    pub fn immediate() -> Context {
        static IMMEDIATE: OnceLock<Context> = OnceLock::new();
        IMMEDIATE
            .get_or_init(|| {
                let inner = Arc::new(Immediate {
                    this: OnceLock::new(),
                });
                // Unsize in a separate step; the annotation alone would make
                // `downgrade` itself expect an `Arc<dyn Executor>`.
                let weak = Arc::downgrade(&inner);
                let weak: Weak<dyn Executor> = weak;
                let _ = inner.this.set(weak);
                Context { inner }
            })
            .clone()
    }

    /// Returns the process-wide serial context.
    ///
    /// The worker thread is spawned on first use and lives for the rest of the
    /// process.
    pub fn main() -> Context {
        static MAIN: OnceLock<Context> = OnceLock::new();
        MAIN.get_or_init(|| {
            Context::builder()
                .name("settled-main")
                .serial()
                .expect("failed to spawn main context worker")
        })
        .clone()
    }

    /// Returns the process-wide parallel context, sized to the available
    /// parallelism.
    pub fn global() -> Context {
        static GLOBAL: OnceLock<Context> = OnceLock::new();
        GLOBAL
            .get_or_init(|| {
                let threads = thread::available_parallelism().map(usize::from).unwrap_or(2);
                Context::builder()
                    .name("settled-global")
                    .parallel(threads)
                    .expect("failed to spawn global context workers")
            })
            .clone()
    }

    /// Returns a builder that can be used to configure and spawn a custom context.
    #[inline]
    pub fn builder() -> ContextBuilder {
        ContextBuilder { name: None }
    }

    /// Resolves, at call time, the context the calling code is presently running on.
    ///
    /// On threads that do not belong to any context (for example the main thread of
    /// the process), this falls back to [`Context::immediate`].
    pub fn current() -> Context {
        CURRENT
            .with(|current| current.borrow().as_ref().and_then(Weak::upgrade))
            .map(|inner| Context { inner })
            .unwrap_or_else(Context::immediate)
    }

    /// Submits a unit of work to this context.
    ///
    /// For serial and parallel contexts this never blocks; the task is queued and
    /// the method returns. For the immediate context the task runs inline before
    /// `execute` returns.
    pub fn execute<F: FnOnce() + Send + 'static>(&self, f: F) {
        self.inner.execute(Box::new(f));
    }

    pub(crate) fn execute_task(&self, task: Task) {
        self.inner.execute(task);
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Context").field(&self.inner.label()).finish()
    }
}

/// A builder object that can be used to configure and spawn a [`Context`].
#[derive(Clone)]
pub struct ContextBuilder {
    name: Option<String>,
}

impl ContextBuilder {
    /// Sets the name of the context's worker thread(s).
    pub fn name<N: Into<String>>(self, name: N) -> Self {
        Self {
            name: Some(name.into()),
        }
    }

    /// Spawns a serial context backed by a single worker thread.
    pub fn serial(self) -> io::Result<Context> {
        Ok(Context {
            inner: Serial::spawn(self.name)?,
        })
    }

    /// Spawns a parallel context backed by `threads` worker threads sharing one
    /// queue.
    ///
    /// Threads are named after the builder's name plus their index.
    pub fn parallel(self, threads: usize) -> io::Result<Context> {
        Ok(Context {
            inner: Parallel::spawn(self.name, threads)?,
        })
    }
}

/// Worker loop shared by serial and parallel contexts.
fn run_worker(this: Weak<dyn Executor>, recv: Receiver<Task>, name: Option<String>) {
    CURRENT.with(|current| *current.borrow_mut() = Some(this));
    let _guard;
    if let Some(name) = name {
        log::trace!("context worker '{name}' starting");
        _guard = defer(move || log::trace!("context worker '{name}' exiting"));
    }
    for task in recv {
        task();
    }
}

struct Immediate {
    this: OnceLock<Weak<dyn Executor>>,
}

impl Executor for Immediate {
    fn execute(&self, task: Task) {
        let this = self.this.get().cloned();
        let prev = CURRENT.with(|current| mem::replace(&mut *current.borrow_mut(), this));
        let _restore = defer(move || {
            CURRENT.with(|current| *current.borrow_mut() = prev);
        });
        task();
    }

    fn label(&self) -> &str {
        "immediate"
    }
}

struct Serial {
    sender: Mutex<Option<Sender<Task>>>,
    handle: Mutex<Option<JoinHandle<()>>>,
    label: String,
}

impl Serial {
    fn spawn(name: Option<String>) -> io::Result<Arc<Serial>> {
        let (sender, recv) = crossbeam_channel::unbounded();
        let serial = Arc::new(Serial {
            sender: Mutex::new(Some(sender)),
            handle: Mutex::new(None),
            label: name.clone().unwrap_or_else(|| "serial".into()),
        });
        let weak = Arc::downgrade(&serial);
        let weak: Weak<dyn Executor> = weak;
        let mut builder = thread::Builder::new();
        if let Some(name) = &name {
            builder = builder.name(name.clone());
        }
        let handle = builder.spawn(move || run_worker(weak, recv, name))?;
        *serial.handle.lock().unwrap() = Some(handle);
        Ok(serial)
    }

    fn wait_for_exit(&self) {
        // Wait for the worker to exit and propagate its panic if it panicked. If the
        // last handle is dropped from the worker thread itself, the thread is
        // detached instead, since it cannot join itself.
        let handle = self.handle.lock().unwrap().take();
        if let Some(handle) = handle {
            if handle.thread().id() == thread::current().id() {
                return;
            }
            if let Err(payload) = handle.join() {
                if !thread::panicking() {
                    resume_unwind(payload);
                }
            }
        }
    }
}

impl Executor for Serial {
    fn execute(&self, task: Task) {
        let disconnected = {
            let sender = self.sender.lock().unwrap();
            sender.as_ref().unwrap().send(task).is_err()
        };
        if disconnected {
            // The worker has panicked; the channel only closes early in that case.
            // Propagates the worker's payload, unless another thread already
            // claimed the join handle, in which case we fall through and report
            // the dead context ourselves.
            self.wait_for_exit();
            panic!("task submitted to a context whose worker panicked");
        }
    }

    fn label(&self) -> &str {
        &self.label
    }
}

impl Drop for Serial {
    fn drop(&mut self) {
        // Close the channel to signal the worker to exit once the queue drains.
        drop(self.sender.lock().unwrap().take());

        self.wait_for_exit();
    }
}

struct Parallel {
    sender: Mutex<Option<Sender<Task>>>,
    handles: Mutex<Vec<JoinHandle<()>>>,
    label: String,
}

impl Parallel {
    fn spawn(name: Option<String>, threads: usize) -> io::Result<Arc<Parallel>> {
        assert_ne!(threads, 0, "thread count must be at least 1");

        let (sender, recv) = crossbeam_channel::unbounded();
        let parallel = Arc::new(Parallel {
            sender: Mutex::new(Some(sender)),
            handles: Mutex::new(Vec::with_capacity(threads)),
            label: name.clone().unwrap_or_else(|| "parallel".into()),
        });
        for i in 0..threads {
            let mut builder = thread::Builder::new();
            let thread_name = name.as_ref().map(|name| format!("{name}-{i}"));
            if let Some(thread_name) = &thread_name {
                builder = builder.name(thread_name.clone());
            }
            let weak = Arc::downgrade(&parallel);
            let weak: Weak<dyn Executor> = weak;
            let recv = recv.clone();
            let handle = builder.spawn(move || run_worker(weak, recv, thread_name))?;
            parallel.handles.lock().unwrap().push(handle);
        }
        Ok(parallel)
    }

    fn wait_for_exit(&self) {
        // Join every worker except the calling thread itself and propagate a panic
        // if one of them panicked.
        let handles = mem::take(&mut *self.handles.lock().unwrap());
        let mut payload = None;
        for handle in handles {
            if handle.thread().id() == thread::current().id() {
                continue;
            }
            if let Err(pl) = handle.join() {
                payload = Some(pl);
            }
        }
        if let Some(payload) = payload {
            if !thread::panicking() {
                resume_unwind(payload);
            }
        }
    }
}

impl Executor for Parallel {
    fn execute(&self, task: Task) {
        let disconnected = {
            let sender = self.sender.lock().unwrap();
            sender.as_ref().unwrap().send(task).is_err()
        };
        if disconnected {
            // All workers have panicked; the channel only closes early in that case.
            self.wait_for_exit();
            panic!("task submitted to a context whose worker panicked");
        }
    }

    fn label(&self) -> &str {
        &self.label
    }
}

impl Drop for Parallel {
    fn drop(&mut self) {
        drop(self.sender.lock().unwrap().take());

        self.wait_for_exit();
    }
}
