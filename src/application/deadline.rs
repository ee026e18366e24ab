//! Cancellation and deadlines shared by a conversion pipeline.

use std::{future::Future, time::Duration};

use tokio::{
    sync::watch,
    time::{Instant, sleep_until},
};

/// Fires every clone of its [`CancelToken`] when cancelled or dropped.
#[derive(Debug)]
pub struct CancelHandle {
    tx: watch::Sender<bool>,
}

impl CancelHandle {
    pub fn new() -> (Self, CancelToken) {
        let (tx, rx) = watch::channel(false);
        (Self { tx }, CancelToken { rx: Some(rx) })
    }

    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }
}

impl Drop for CancelHandle {
    fn drop(&mut self) {
        self.tx.send_replace(true);
    }
}

#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    rx: Option<watch::Receiver<bool>>,
}

impl CancelToken {
    /// A token that is never cancelled.
    pub fn never() -> Self {
        Self { rx: None }
    }

    pub fn is_cancelled(&self) -> bool {
        self.rx.as_ref().is_some_and(|rx| *rx.borrow())
    }

    /// Resolves once cancelled. Never resolves for [`CancelToken::never`].
    pub async fn cancelled(&self) {
        let Some(rx) = self.rx.as_ref() else {
            return std::future::pending().await;
        };
        let mut rx = rx.clone();
        // A closed channel means the handle is gone, which also counts as cancellation.
        let _ = rx.wait_for(|cancelled| *cancelled).await;
    }
}

/// The point in time after which a pipeline gives up, plus an external cancel signal.
#[derive(Debug, Clone, Default)]
pub struct Deadline {
    at: Option<Instant>,
    cancel: CancelToken,
}

/// The deadline passed or the pipeline was cancelled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Expired;

impl Deadline {
    pub fn unbounded(cancel: CancelToken) -> Self {
        Self { at: None, cancel }
    }

    /// Zero means no time limit.
    pub fn after(timeout: Duration, cancel: CancelToken) -> Self {
        let at = (!timeout.is_zero()).then(|| Instant::now() + timeout);
        Self { at, cancel }
    }

    pub fn is_expired(&self) -> bool {
        self.cancel.is_cancelled() || self.at.is_some_and(|at| Instant::now() >= at)
    }

    /// Resolves when the deadline passes or the token is cancelled.
    pub async fn expired(&self) {
        match self.at {
            Some(at) => {
                tokio::select! {
                    _ = sleep_until(at) => {}
                    _ = self.cancel.cancelled() => {}
                }
            }
            None => self.cancel.cancelled().await,
        }
    }

    /// Drive `future` unless the deadline expires first.
    pub async fn run<F: Future>(&self, future: F) -> Result<F::Output, Expired> {
        if self.is_expired() {
            return Err(Expired);
        }
        tokio::select! {
            biased;
            _ = self.expired() => Err(Expired),
            output = future => Ok(output),
        }
    }
}
