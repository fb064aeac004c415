//! Internal unit test utilities.

use std::{
    error::Error,
    fmt,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    thread,
    time::{Duration, Instant},
};

/// Upper bound on how long any single test waits for a callback to arrive.
pub const TIMEOUT: Duration = Duration::from_secs(5);

/// A two-severity error for exercising failure paths and typed downcasts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TestError {
    Recoverable,
    Fatal,
}

impl fmt::Display for TestError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TestError::Recoverable => f.write_str("recoverable test error"),
            TestError::Fatal => f.write_str("fatal test error"),
        }
    }
}

impl Error for TestError {}

/// Deliberately slow (exponential) fibonacci, used as a stand-in workload.
pub fn fibonacci(n: u64) -> u64 {
    if n < 2 {
        n
    } else {
        fibonacci(n - 1) + fibonacci(n - 2)
    }
}

/// Sets a shared flag when dropped, to observe when a value is released.
pub struct DropSignal {
    dropped: Arc<AtomicBool>,
}

impl DropSignal {
    pub fn new() -> (Self, Arc<AtomicBool>) {
        let dropped = Arc::new(AtomicBool::new(false));
        (
            Self {
                dropped: dropped.clone(),
            },
            dropped,
        )
    }
}

impl Drop for DropSignal {
    fn drop(&mut self) {
        self.dropped.store(true, Ordering::SeqCst);
    }
}

/// Spins until `condition` holds, panicking after [`TIMEOUT`].
pub fn wait_until(condition: impl Fn() -> bool) {
    let deadline = Instant::now() + TIMEOUT;
    while !condition() {
        if Instant::now() > deadline {
            panic!("timed out waiting for condition");
        }
        thread::yield_now();
    }
}
