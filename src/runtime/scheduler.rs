/// Background interval scheduler service
///
/// Registers one repeating tokio-cron-scheduler job per workflow whose entry
/// node is an interval trigger. On every tick the job checks the weekday mask,
/// then claims the current window through a marker row in SQLite, so several
/// server processes sharing a database still fire each window only once.

use crate::{
    runtime::engine::{ExecutionEngine, RunResult},
    workflow::{
        registry::{CompiledWorkflow, WorkflowRegistry, WorkflowSource},
        storage::WorkflowStorage,
        types::ExecutionContext,
    },
};
use anyhow::Result;
use chrono::{Datelike, Weekday};
use std::{collections::HashMap, sync::Arc, time::Duration};
use tokio::sync::RwLock;
use tokio_cron_scheduler::{Job, JobScheduler};
use uuid::Uuid;

/// Subtracted from the window length for the marker lifetime, so a tick that
/// fires slightly early still finds the previous marker expired
const MARKER_SLACK: Duration = Duration::from_millis(500);

/// Why a tick did not start a run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    WorkflowMissing,
    NotIntervalTriggered,
    WeekdayDisabled,
    WindowClaimed,
}

#[derive(Debug)]
pub enum TickOutcome {
    Dispatched(RunResult),
    Skipped(SkipReason),
}

/// Handle one scheduler tick for a workflow
pub async fn fire_interval(
    workflows: &dyn WorkflowSource,
    engine: &ExecutionEngine,
    storage: &WorkflowStorage,
    workflow_id: &str,
    weekday: Weekday,
) -> Result<TickOutcome> {
    let Some(workflow) = workflows.get_workflow(workflow_id) else {
        tracing::debug!("⏭️ Skipping interval tick for deleted workflow: {}", workflow_id);
        return Ok(TickOutcome::Skipped(SkipReason::WorkflowMissing));
    };
    let Some((trigger, period)) = workflow
        .interval_trigger()
        .and_then(|trigger| trigger.period().map(|period| (trigger, period)))
    else {
        return Ok(TickOutcome::Skipped(SkipReason::NotIntervalTriggered));
    };

    if !trigger.runs_on(weekday.num_days_from_sunday()) {
        tracing::debug!("📅 Interval workflow {} is disabled on {:?}", workflow_id, weekday);
        return Ok(TickOutcome::Skipped(SkipReason::WeekdayDisabled));
    }

    let ttl = period.checked_sub(MARKER_SLACK).unwrap_or(period);
    if !storage.try_acquire_interval_marker(workflow_id, ttl).await? {
        tracing::debug!("🔒 Interval window for {} already claimed", workflow_id);
        return Ok(TickOutcome::Skipped(SkipReason::WindowClaimed));
    }

    tracing::info!("🚀 Executing interval workflow: {}", workflow_id);
    let context = ExecutionContext::from_interval_trigger(workflow_id.to_string());
    Ok(TickOutcome::Dispatched(engine.run(&workflow, context).await))
}

/// Hot-reload interval scheduler service
pub struct IntervalSchedulerService {
    scheduler: Arc<RwLock<JobScheduler>>,
    /// workflow id → scheduler job, for replacement and removal
    job_uuid_map: Arc<RwLock<HashMap<String, Uuid>>>,
    registry: Arc<WorkflowRegistry>,
    engine: Arc<ExecutionEngine>,
    storage: WorkflowStorage,
}

impl IntervalSchedulerService {
    pub async fn new(
        registry: Arc<WorkflowRegistry>,
        engine: Arc<ExecutionEngine>,
        storage: WorkflowStorage,
    ) -> Result<Self> {
        let scheduler = JobScheduler::new().await?;

        Ok(Self {
            scheduler: Arc::new(RwLock::new(scheduler)),
            job_uuid_map: Arc::new(RwLock::new(HashMap::new())),
            registry,
            engine,
            storage,
        })
    }

    /// Register every interval workflow and start ticking
    pub async fn start(&self) -> Result<()> {
        tracing::info!("⏰ Starting interval scheduler service");

        self.register_all_interval_triggers().await?;

        {
            let scheduler = self.scheduler.read().await;
            scheduler.start().await?;
        }

        tracing::info!("✅ Interval scheduler started successfully");
        Ok(())
    }

    pub async fn stop(&self) -> Result<()> {
        tracing::info!("⏹️ Stopping interval scheduler service");

        self.job_uuid_map.write().await.clear();
        {
            let mut scheduler = self.scheduler.write().await;
            scheduler.shutdown().await?;
        }

        tracing::info!("✅ Interval scheduler stopped");
        Ok(())
    }

    /// Number of workflows with a registered job
    pub async fn job_count(&self) -> usize {
        self.job_uuid_map.read().await.len()
    }

    /// Replace the job of a saved workflow, or drop it if it is no longer interval-triggered
    pub async fn add_or_update_workflow_trigger(&self, workflow: &CompiledWorkflow) -> Result<()> {
        let workflow_id = workflow.id().to_string();
        self.remove_workflow_trigger(&workflow_id).await;

        let Some(trigger) = workflow.interval_trigger() else {
            tracing::debug!("📋 Workflow {} is not interval-triggered", workflow_id);
            return Ok(());
        };
        let Some(period) = trigger.period() else {
            tracing::warn!("⚠️ Workflow {} has a zero interval; not scheduling it", workflow_id);
            return Ok(());
        };

        let registry = Arc::clone(&self.registry);
        let engine = Arc::clone(&self.engine);
        let storage = self.storage.clone();
        let job_workflow_id = workflow_id.clone();

        let job = Job::new_repeated_async(period, move |_uuid, _l| {
            let workflow_id = job_workflow_id.clone();
            let registry = Arc::clone(&registry);
            let engine = Arc::clone(&engine);
            let storage = storage.clone();

            Box::pin(async move {
                tracing::debug!("🔔 Interval trigger activated for workflow {}", workflow_id);
                let weekday = chrono::Local::now().weekday();

                match fire_interval(&*registry, &engine, &storage, &workflow_id, weekday).await {
                    Ok(TickOutcome::Dispatched(result)) => tracing::info!(
                        "✅ Interval-triggered workflow finished: {} ({:?})",
                        workflow_id,
                        result.status
                    ),
                    Ok(TickOutcome::Skipped(reason)) => {
                        tracing::debug!("⏭️ Interval tick for {} skipped: {:?}", workflow_id, reason)
                    }
                    Err(e) => tracing::error!("❌ Interval tick for {} failed: {}", workflow_id, e),
                }
            })
        })?;

        let job_uuid = {
            let scheduler = self.scheduler.read().await;
            scheduler.add(job).await?
        };
        self.job_uuid_map.write().await.insert(workflow_id.clone(), job_uuid);

        tracing::info!("🔥 Scheduled workflow {} every {:?}", workflow_id, period);
        Ok(())
    }

    pub async fn remove_workflow_trigger(&self, workflow_id: &str) {
        let removed = self.job_uuid_map.write().await.remove(workflow_id);
        if let Some(job_uuid) = removed {
            let scheduler = self.scheduler.read().await;
            if let Err(e) = scheduler.remove(&job_uuid).await {
                tracing::warn!("⚠️ Failed to remove interval job for {}: {}", workflow_id, e);
            } else {
                tracing::debug!("🛑 Removed interval job for {}", workflow_id);
            }
        }
    }

    async fn register_all_interval_triggers(&self) -> Result<()> {
        let workflows = self.registry.interval_workflows();
        for workflow in &workflows {
            self.add_or_update_workflow_trigger(workflow).await?;
        }

        tracing::info!("📊 Registered {} interval triggers", workflows.len());
        Ok(())
    }
}
