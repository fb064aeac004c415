//! On-drop callbacks, used for worker exit logging and for restoring the
//! current-context slot after an inline task.

/// Runs its closure when it goes out of scope, including during unwinding.
#[must_use = "dropping the guard immediately runs the closure"]
pub struct Defer<F: FnOnce()> {
    cb: Option<F>,
}

impl<F: FnOnce()> Drop for Defer<F> {
    fn drop(&mut self) {
        if let Some(cb) = self.cb.take() {
            cb();
        }
    }
}

/// Defers `cb` until the returned guard is dropped.
pub fn defer<F: FnOnce()>(cb: F) -> Defer<F> {
    Defer { cb: Some(cb) }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use super::*;

    #[test]
    fn guards_run_in_reverse_declaration_order() {
        let order = Arc::new(Mutex::new(Vec::new()));
        {
            let first = order.clone();
            let _a = defer(move || first.lock().unwrap().push(1));
            let second = order.clone();
            let _b = defer(move || second.lock().unwrap().push(2));
        }
        assert_eq!(*order.lock().unwrap(), vec![2, 1]);
    }
}
