//! Scheduler engine: fires the daily check-in batch.
//! Uses tokio::interval ticking; each tick compares the clock against the
//! precomputed next firing time.

use chrono::{DateTime, Utc};
use leafcheck_core::error::LeafcheckError;
use leafcheck_core::traits::AccountSource;
use leafcheck_runner::BatchOrchestrator;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use crate::cron::DailySchedule;

/// What a due trigger did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FireOutcome {
    Completed { success: usize, total: usize },
    /// A batch was already in flight; this trigger is dropped.
    AlreadyRunning,
    NoAccounts,
    Failed(String),
}

pub struct SchedulerEngine {
    schedule: DailySchedule,
    orchestrator: Arc<BatchOrchestrator>,
    accounts: Arc<dyn AccountSource>,
    next_run: RwLock<Option<DateTime<Utc>>>,
}

impl SchedulerEngine {
    pub fn new(
        schedule: DailySchedule,
        orchestrator: Arc<BatchOrchestrator>,
        accounts: Arc<dyn AccountSource>,
    ) -> Self {
        let next = schedule.next_after(Utc::now());
        Self {
            schedule,
            orchestrator,
            accounts,
            next_run: RwLock::new(next),
        }
    }

    pub fn schedule(&self) -> &DailySchedule {
        &self.schedule
    }

    pub fn next_run(&self) -> Option<DateTime<Utc>> {
        self.next_run.read().map(|n| *n).unwrap_or(None)
    }

    /// Fire if `now` has reached the next run time. Returns `None` when
    /// nothing was due.
    pub async fn tick_at(&self, now: DateTime<Utc>) -> Option<FireOutcome> {
        {
            let mut next = self.next_run.write().ok()?;
            match *next {
                Some(due) if now >= due => *next = self.schedule.next_after(now),
                _ => return None,
            }
        }
        Some(self.fire().await)
    }

    /// Run one batch over the current account list.
    pub async fn fire(&self) -> FireOutcome {
        tracing::info!("⏰ Scheduled check-in triggered ({})", self.schedule.describe());

        let accounts = match self.accounts.accounts().await {
            Ok(accounts) => accounts,
            Err(e) => {
                tracing::error!("❌ Could not load accounts: {e}");
                return FireOutcome::Failed(e.to_string());
            }
        };

        match self.orchestrator.try_run(&accounts).await {
            Ok(batch) => FireOutcome::Completed {
                success: batch.success_count(),
                total: batch.total(),
            },
            Err(LeafcheckError::AlreadyRunning) => {
                tracing::warn!("⏭️ Check-in already running, scheduled trigger skipped");
                FireOutcome::AlreadyRunning
            }
            Err(LeafcheckError::Config(msg)) => {
                tracing::warn!("⏭️ Scheduled trigger skipped: {msg}");
                FireOutcome::NoAccounts
            }
            Err(e) => {
                tracing::error!("❌ Scheduled check-in failed: {e}");
                FireOutcome::Failed(e.to_string())
            }
        }
    }
}

/// Spawn the scheduler loop as a background tokio task.
pub fn spawn_scheduler(
    engine: Arc<SchedulerEngine>,
    check_interval: Duration,
) -> tokio::task::JoinHandle<()> {
    tracing::info!(
        "⏰ Scheduler started: {}, next run {}",
        engine.schedule.describe(),
        engine
            .next_run()
            .map(|t| t.to_rfc3339())
            .unwrap_or_else(|| "never".into())
    );

    tokio::spawn(async move {
        let mut interval = tokio::time::interval(check_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            interval.tick().await;
            if let Some(outcome) = engine.tick_at(Utc::now()).await {
                tracing::info!(
                    "📣 Scheduled run finished: {outcome:?}, next run {:?}",
                    engine.next_run()
                );
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::TimeZone;
    use leafcheck_core::error::Result;
    use leafcheck_core::traits::{SiteAdapter, SiteSession};
    use leafcheck_core::types::Account;
    use leafcheck_runner::{AccountRunner, RunnerSettings};
    use tokio::sync::Notify;

    /// Never opens a session; optionally waits for a release signal first.
    struct NoBrowser {
        gate: Option<Arc<Notify>>,
    }

    #[async_trait]
    impl SiteAdapter for NoBrowser {
        fn name(&self) -> &str {
            "none"
        }

        async fn open_session(&self) -> Result<Box<dyn SiteSession>> {
            if let Some(gate) = &self.gate {
                gate.notified().await;
            }
            Err(LeafcheckError::Browser("no browser in tests".into()))
        }
    }

    fn engine(gate: Option<Arc<Notify>>, accounts: Vec<Account>) -> (Arc<SchedulerEngine>, Arc<BatchOrchestrator>) {
        let runner = AccountRunner::new(Arc::new(NoBrowser { gate }), RunnerSettings::default());
        let orch = Arc::new(BatchOrchestrator::new(runner, Duration::ZERO));
        let engine = SchedulerEngine::new(
            DailySchedule::at(1, 15).unwrap(),
            orch.clone(),
            Arc::new(accounts),
        );
        (Arc::new(engine), orch)
    }

    fn set_next(engine: &SchedulerEngine, at: DateTime<Utc>) {
        *engine.next_run.write().unwrap() = Some(at);
    }

    #[tokio::test]
    async fn test_not_due_does_nothing() {
        let (engine, _) = engine(None, vec![Account::new("a@b.c", "x")]);
        let due = Utc.with_ymd_and_hms(2026, 10, 18, 1, 15, 0).unwrap();
        set_next(&engine, due);

        assert_eq!(engine.tick_at(due - chrono::Duration::seconds(1)).await, None);
        assert_eq!(engine.next_run(), Some(due));
    }

    #[tokio::test]
    async fn test_due_fires_and_advances() {
        let (engine, _) = engine(None, vec![Account::new("a@b.c", "x")]);
        let due = Utc.with_ymd_and_hms(2026, 10, 18, 1, 15, 0).unwrap();
        set_next(&engine, due);

        let outcome = engine.tick_at(due).await;
        assert_eq!(outcome, Some(FireOutcome::Completed { success: 0, total: 1 }));
        assert_eq!(
            engine.next_run(),
            Some(Utc.with_ymd_and_hms(2026, 10, 19, 1, 15, 0).unwrap())
        );
    }

    #[tokio::test]
    async fn test_no_accounts_is_skipped() {
        let (engine, _) = engine(None, vec![]);
        assert_eq!(engine.fire().await, FireOutcome::NoAccounts);
    }

    #[tokio::test]
    async fn test_trigger_while_running_is_skipped() {
        let gate = Arc::new(Notify::new());
        let (engine, orch) = engine(Some(gate.clone()), vec![Account::new("a@b.c", "x")]);

        let accounts = vec![Account::new("a@b.c", "x")];
        let busy = orch.clone();
        let first = tokio::spawn(async move { busy.try_run(&accounts).await });
        while !orch.is_running() {
            tokio::task::yield_now().await;
        }

        assert_eq!(engine.fire().await, FireOutcome::AlreadyRunning);

        gate.notify_one();
        let batch = first.await.unwrap().unwrap();
        assert_eq!(batch.total(), 1);
        assert!(!orch.is_running());
    }
}
