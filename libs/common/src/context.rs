//! Request-scoped context
//!
//! A [`Ctx`] travels explicitly through the call chain. It carries the ambient
//! log values merged into every log line, the request id, and the signals that
//! cancel outstanding work (a deadline and any number of cancel handles).

use futures_util::future::{BoxFuture, select_all};
use serde::Serialize;
use std::fmt::Debug;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;

use crate::log::LogBody;

/// Request-scoped handle
#[derive(Clone, Debug, Default)]
pub struct Ctx {
    values: LogBody,
    request_id: Option<String>,
    deadline: Option<Instant>,
    signals: Vec<watch::Receiver<bool>>,
}

/// Cancels every context derived from the one that created it
#[derive(Debug)]
pub struct CancelHandle(watch::Sender<bool>);

impl CancelHandle {
    pub fn cancel(&self) {
        self.0.send_replace(true);
    }
}

impl Ctx {
    /// Empty context with no deadline
    pub fn background() -> Self {
        Self::default()
    }

    /// Child context with `values` merged over the current ones
    pub fn with_values(&self, values: &LogBody) -> Self {
        let mut ctx = self.clone();
        ctx.values.merge(values);
        ctx
    }

    /// Child context with a single extra value
    pub fn with_value<T>(&self, key: &str, value: T) -> Self
    where
        T: Serialize + Debug,
    {
        let mut ctx = self.clone();
        ctx.values.insert(key, value);
        ctx
    }

    /// Child context tagged with a request id, also exposed as the `request_id` log value
    pub fn with_request_id(&self, request_id: &str) -> Self {
        let mut ctx = self.with_value("request_id", request_id);
        ctx.request_id = Some(request_id.to_string());
        ctx
    }

    /// Child context that expires after `timeout`
    pub fn with_timeout(&self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    /// Child context that expires at `deadline`, or earlier if the parent does
    pub fn with_deadline(&self, deadline: Instant) -> Self {
        let mut ctx = self.clone();
        ctx.deadline = Some(match self.deadline {
            Some(current) => current.min(deadline),
            None => deadline,
        });
        ctx
    }

    /// Child context plus the handle that cancels it
    pub fn with_cancel(&self) -> (Self, CancelHandle) {
        let (tx, rx) = watch::channel(false);
        let mut ctx = self.clone();
        ctx.signals.push(rx);
        (ctx, CancelHandle(tx))
    }

    /// Ambient log values
    pub fn values(&self) -> &LogBody {
        &self.values
    }

    pub fn request_id(&self) -> Option<&str> {
        self.request_id.as_deref()
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn is_cancelled(&self) -> bool {
        if self.deadline.is_some_and(|deadline| Instant::now() >= deadline) {
            return true;
        }
        self.signals.iter().any(|rx| *rx.borrow())
    }

    /// Resolves once the deadline passes or a cancel handle fires; never resolves otherwise
    pub async fn cancelled(&self) {
        let mut waits: Vec<BoxFuture<'static, ()>> = Vec::with_capacity(self.signals.len() + 1);

        if let Some(deadline) = self.deadline {
            waits.push(Box::pin(tokio::time::sleep_until(deadline)));
        }

        for rx in &self.signals {
            let mut rx = rx.clone();
            waits.push(Box::pin(async move {
                // A dropped handle can no longer cancel.
                let dropped = rx.wait_for(|cancelled| *cancelled).await.is_err();
                if dropped {
                    std::future::pending::<()>().await;
                }
            }));
        }

        if waits.is_empty() {
            std::future::pending::<()>().await;
        }

        select_all(waits).await;
    }
}
