//! Batch orchestrator: every account, in order, one result each.
//!
//! Owns the process-wide running flag: the manual trigger and the daily timer
//! share one orchestrator, and a second batch is rejected rather than queued.

use futures::FutureExt;
use leafcheck_core::error::{LeafcheckError, Result};
use leafcheck_core::traits::{BatchNotifier, RunSink};
use leafcheck_core::types::{Account, BatchResult, RunResult};
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use crate::runner::AccountRunner;

pub struct BatchOrchestrator {
    runner: AccountRunner,
    account_delay: Duration,
    running: AtomicBool,
    sink: Option<Arc<dyn RunSink>>,
    notifier: Option<Arc<dyn BatchNotifier>>,
}

/// Clears the running flag when the batch ends, however it ends.
struct RunningGuard<'a>(&'a AtomicBool);

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

impl BatchOrchestrator {
    pub fn new(runner: AccountRunner, account_delay: Duration) -> Self {
        Self {
            runner,
            account_delay,
            running: AtomicBool::new(false),
            sink: None,
            notifier: None,
        }
    }

    /// Persist each result as soon as it is produced.
    pub fn with_sink(mut self, sink: Arc<dyn RunSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Report the finished batch.
    pub fn with_notifier(mut self, notifier: Arc<dyn BatchNotifier>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    fn claim(&self) -> Result<()> {
        self.running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .map(|_| ())
            .map_err(|_| LeafcheckError::AlreadyRunning)
    }

    fn acquire(&self) -> Result<RunningGuard<'_>> {
        self.claim().map(|_| RunningGuard(&self.running))
    }

    /// Take the running flag now and hand back an owned permit, for callers
    /// that answer before the batch runs on a spawned task.
    pub fn reserve(self: &Arc<Self>) -> Result<BatchPermit> {
        self.claim()?;
        Ok(BatchPermit {
            orchestrator: Arc::clone(self),
        })
    }

    /// Run every account sequentially. Fails only before the first run: no
    /// accounts, or another batch already in flight.
    pub async fn try_run(&self, accounts: &[Account]) -> Result<BatchResult> {
        if accounts.is_empty() {
            return Err(LeafcheckError::Config("no accounts configured".into()));
        }
        let _guard = self.acquire()?;
        Ok(self.run_batch(accounts).await)
    }

    /// Caller holds the running flag.
    async fn run_batch(&self, accounts: &[Account]) -> BatchResult {
        tracing::info!("📋 Check-in batch started for {} account(s)", accounts.len());
        let mut batch = BatchResult::default();

        for (i, account) in accounts.iter().enumerate() {
            let result = self.run_one(account).await;

            if let Some(sink) = &self.sink
                && let Err(e) = sink.record(account, &result).await
            {
                tracing::warn!("⚠️ Failed to record result for {}: {e}", account.masked());
            }
            batch.results.push(result);

            if i + 1 < accounts.len() && !self.account_delay.is_zero() {
                tracing::debug!("Waiting {:?} before the next account", self.account_delay);
                tokio::time::sleep(self.account_delay).await;
            }
        }

        tracing::info!(
            "🏁 Check-in batch finished: {}/{} succeeded",
            batch.success_count(),
            batch.total()
        );

        if let Some(notifier) = &self.notifier {
            notifier.notify(&batch.results).await;
        }
        batch
    }

    async fn run_one(&self, account: &Account) -> RunResult {
        match AssertUnwindSafe(self.runner.run(account)).catch_unwind().await {
            Ok(outcome) => outcome.into_result(&account.email),
            Err(panic) => {
                let message = panic_message(panic.as_ref());
                tracing::error!("💥 Account run for {} panicked: {message}", account.masked());
                RunResult::failure(&account.email, format!("Account run crashed: {message}"))
            }
        }
    }
}

/// A batch slot taken by [`BatchOrchestrator::reserve`]. Dropping it without
/// running releases the slot.
pub struct BatchPermit {
    orchestrator: Arc<BatchOrchestrator>,
}

impl BatchPermit {
    pub async fn run(self, accounts: &[Account]) -> Result<BatchResult> {
        if accounts.is_empty() {
            return Err(LeafcheckError::Config("no accounts configured".into()));
        }
        Ok(self.orchestrator.run_batch(accounts).await)
    }
}

impl Drop for BatchPermit {
    fn drop(&mut self) {
        self.orchestrator.running.store(false, Ordering::SeqCst);
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
