use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use common::{Result, Store, Strategy, TradeEvent};

use crate::cron::CronSchedule;
use crate::manager::StrategyManager;

/// Fires each enabled strategy on its cron schedule.
///
/// One task per strategy. A task only observes cancellation while waiting for
/// its next fire time, so stopping never interrupts an execution in progress.
pub struct StrategyScheduler {
    store: Arc<dyn Store>,
    manager: Arc<StrategyManager>,
    jobs: Mutex<HashMap<i64, Job>>,
    reload_lock: Mutex<()>,
}

struct Job {
    schedule: CronSchedule,
    cancel: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

/// Snapshot of one scheduled job.
#[derive(Debug, Clone, PartialEq)]
pub struct JobInfo {
    pub strategy_id: i64,
    pub cron_expression: String,
}

impl StrategyScheduler {
    pub fn new(store: Arc<dyn Store>, manager: Arc<StrategyManager>) -> Self {
        Self {
            store,
            manager,
            jobs: Mutex::new(HashMap::new()),
            reload_lock: Mutex::new(()),
        }
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    /// Schedule every enabled strategy. Strategies that fail validation are
    /// logged and left out. Returns the number of jobs scheduled.
    pub async fn start(&self) -> Result<usize> {
        let strategies = self.store.get_enabled_strategies().await?;
        let mut scheduled = 0;
        for strategy in &strategies {
            match self.add_strategy(strategy).await {
                Ok(()) => scheduled += 1,
                Err(e) => error!(
                    strategy_id = strategy.id,
                    name = %strategy.name,
                    error = %e,
                    "Strategy not scheduled"
                ),
            }
        }
        info!(scheduled, total = strategies.len(), "Scheduler started");
        Ok(scheduled)
    }

    /// Cancel every job and wait for in-flight executions to finish.
    pub async fn stop(&self) {
        let jobs: Vec<(i64, Job)> = self.jobs.lock().await.drain().collect();
        let count = jobs.len();
        for (_, job) in &jobs {
            let _ = job.cancel.send(true);
        }
        for (id, job) in jobs {
            if let Err(e) = job.handle.await {
                error!(strategy_id = id, error = %e, "Job task ended abnormally");
            }
        }
        info!(jobs = count, "Scheduler stopped");
    }

    /// Stop all jobs and rebuild them from the persisted strategies.
    /// Concurrent reloads run one after another.
    pub async fn reload(&self) -> Result<usize> {
        let _guard = self.reload_lock.lock().await;
        info!("Reloading strategies");
        self.stop().await;
        self.start().await
    }

    /// Validate and schedule one strategy, replacing any existing job for it.
    pub async fn add_strategy(&self, strategy: &Strategy) -> Result<()> {
        self.manager.registry().for_strategy(strategy)?;
        let schedule = CronSchedule::parse(&strategy.cron_expression)?;

        self.remove_strategy(strategy.id).await;

        let (cancel, cancel_rx) = watch::channel(false);
        let handle = tokio::spawn(run_job(
            strategy.id,
            schedule.clone(),
            self.store.clone(),
            self.manager.clone(),
            cancel_rx,
        ));
        info!(
            strategy_id = strategy.id,
            name = %strategy.name,
            cron = %schedule,
            "Strategy scheduled"
        );
        self.jobs
            .lock()
            .await
            .insert(strategy.id, Job { schedule, cancel, handle });
        Ok(())
    }

    /// Cancel one job, waiting for an in-flight execution. Returns whether a
    /// job existed.
    pub async fn remove_strategy(&self, strategy_id: i64) -> bool {
        let job = self.jobs.lock().await.remove(&strategy_id);
        let Some(job) = job else {
            return false;
        };
        let _ = job.cancel.send(true);
        if let Err(e) = job.handle.await {
            error!(strategy_id, error = %e, "Job task ended abnormally");
        }
        info!(strategy_id, "Strategy unscheduled");
        true
    }

    /// Re-apply a changed strategy: unschedule, then schedule again if enabled.
    pub async fn update_strategy(&self, strategy: &Strategy) -> Result<()> {
        self.remove_strategy(strategy.id).await;
        if strategy.enabled {
            self.add_strategy(strategy).await?;
        }
        Ok(())
    }

    pub async fn jobs(&self) -> Vec<JobInfo> {
        let mut jobs: Vec<JobInfo> = self
            .jobs
            .lock()
            .await
            .iter()
            .map(|(id, job)| JobInfo {
                strategy_id: *id,
                cron_expression: job.schedule.expression().to_string(),
            })
            .collect();
        jobs.sort_by_key(|j| j.strategy_id);
        jobs
    }

    pub async fn is_scheduled(&self, strategy_id: i64) -> bool {
        self.jobs.lock().await.contains_key(&strategy_id)
    }
}

async fn run_job(
    strategy_id: i64,
    schedule: CronSchedule,
    store: Arc<dyn Store>,
    manager: Arc<StrategyManager>,
    mut cancel: watch::Receiver<bool>,
) {
    loop {
        if *cancel.borrow() {
            return;
        }
        let now = Utc::now();
        let Some(next) = schedule.next_after(now) else {
            warn!(strategy_id, cron = %schedule, "Cron expression never fires again");
            return;
        };
        let wait = (next - now).to_std().unwrap_or_default();
        tokio::select! {
            _ = tokio::time::sleep(wait) => {}
            changed = cancel.changed() => {
                if changed.is_err() || *cancel.borrow() {
                    return;
                }
                continue;
            }
        }

        // A panic inside the execution is contained in its own task.
        let firing = tokio::spawn(fire(
            strategy_id,
            schedule.clone(),
            store.clone(),
            manager.clone(),
        ));
        if let Err(e) = firing.await {
            error!(strategy_id, error = %e, "Strategy execution panicked");
        }
    }
}

async fn fire(
    strategy_id: i64,
    schedule: CronSchedule,
    store: Arc<dyn Store>,
    manager: Arc<StrategyManager>,
) {
    let strategy = match store.get_strategy(strategy_id).await {
        Ok(Some(s)) if s.enabled => s,
        Ok(_) => {
            debug!(strategy_id, "Strategy missing or disabled, skipping firing");
            return;
        }
        Err(e) => {
            error!(strategy_id, error = %e, "Failed to load strategy");
            return;
        }
    };

    match manager.execute_strategy(&strategy).await {
        Ok(report) => info!(
            strategy_id,
            skipped = ?report.skipped,
            buy_order_id = ?report.buy_order_id,
            sells = report.sells_placed.len(),
            failures = report.failures.len(),
            "Strategy executed"
        ),
        Err(e) => {
            error!(strategy_id, error = %e, "Strategy execution failed");
            manager.emit(TradeEvent::ExecutionFailed {
                strategy_id,
                error: e.to_string(),
            });
        }
    }

    let now = Utc::now();
    if let Err(e) = store.update_strategy_execution(strategy_id, now).await {
        error!(strategy_id, error = %e, "Failed to record execution time");
    }
    // The row may have been edited since the job was added.
    let schedule = match CronSchedule::parse(&strategy.cron_expression) {
        Ok(fresh) => fresh,
        Err(e) => {
            warn!(
                strategy_id,
                error = %e,
                cron = %schedule,
                "Stored cron no longer parses, keeping the scheduled one"
            );
            schedule
        }
    };
    // Evaluated from the previous planned time, not from now.
    let base = strategy.next_execution_at.unwrap_or(now);
    if let Some(next) = schedule.next_after(base) {
        if let Err(e) = store.update_strategy_next_execution(strategy_id, next).await {
            error!(strategy_id, error = %e, "Failed to record next execution time");
        }
    }
}
