// Copyright (c) 2026 bad-antics
// Licensed under the MIT License. See LICENSE file in the project root.

//! Synchronous callback lists with per-callback failure isolation

use std::panic::{catch_unwind, AssertUnwindSafe};

use anyhow::Result;
use tracing::warn;

/// Boxed callback taking a borrowed value.
pub type Callback<T> = Box<dyn Fn(&T) -> Result<()> + Send + Sync + 'static>;

/// Ordered list of callbacks.
///
/// [`Callbacks::emit`] invokes every callback in registration order. A callback
/// that returns an error or panics is logged and skipped; the remaining
/// callbacks still run.
pub struct Callbacks<T> {
    owner: String,
    callbacks: Vec<Callback<T>>,
}

impl<T> Callbacks<T> {
    /// `owner` only labels log lines.
    pub fn new(owner: &str) -> Self {
        Self {
            owner: owner.to_string(),
            callbacks: Vec::new(),
        }
    }

    pub fn register<F>(&mut self, callback: F)
    where
        F: Fn(&T) -> Result<()> + Send + Sync + 'static,
    {
        self.callbacks.push(Box::new(callback));
    }

    pub fn register_boxed(&mut self, callback: Callback<T>) {
        self.callbacks.push(callback);
    }

    /// Deliver `value` to every callback. Returns how many succeeded.
    pub fn emit(&self, value: &T) -> usize {
        let mut delivered = 0;
        for (index, callback) in self.callbacks.iter().enumerate() {
            match catch_unwind(AssertUnwindSafe(|| callback(value))) {
                Ok(Ok(())) => delivered += 1,
                Ok(Err(e)) => {
                    warn!("[{}] callback #{} failed: {}", self.owner, index, e);
                }
                Err(_) => {
                    warn!("[{}] callback #{} panicked", self.owner, index);
                }
            }
        }
        delivered
    }

    pub fn len(&self) -> usize {
        self.callbacks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.callbacks.is_empty()
    }

    pub fn clear(&mut self) {
        self.callbacks.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_failing_callbacks_are_isolated() {
        let hits = Arc::new(AtomicUsize::new(0));
        let mut callbacks: Callbacks<u32> = Callbacks::new("test");

        callbacks.register(|_| anyhow::bail!("boom"));
        callbacks.register(|_| panic!("kaboom"));
        let counter = hits.clone();
        callbacks.register(move |v| {
            counter.fetch_add(*v as usize, Ordering::SeqCst);
            Ok(())
        });

        assert_eq!(callbacks.emit(&5), 1);
        assert_eq!(hits.load(Ordering::SeqCst), 5);
    }
}
