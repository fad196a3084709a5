//! The job manager.
//!
//! Single owner of task lifecycle writes: submission, admission
//! forwarding, launching, status updates, goal-state kills, preemption
//! and relaunch. Every outbound ACCEPT/KILL is preceded by the store
//! commit that records the intent (write-ahead); divergence after a
//! failed call is repaired by reconciliation.

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use tracing::{debug, info, warn};

use peloton_core::{TaskDemand, TaskKey};
use peloton_driver::CallSink;
use peloton_mesos::{Call, CommandInfo, Resource, TaskId, TaskInfo, TaskStatus};
use peloton_offers::OfferPool;
use peloton_placement::{Assignment, LaunchPlan, PlacementEngine, PlacementOutcome};
use peloton_respool::{AllocationEntry, CapacityTracker, RespoolEngine};
use peloton_state::{
    JobConfig, JobRow, JobRuntime, JobState, JobType, StateStore, TaskGoalState, TaskRow,
    TaskRuntime, TaskState,
};
use tokio::sync::{mpsc, watch};

use crate::error::{JobError, JobResult};
use crate::task;

pub struct JobManager {
    store: StateStore,
    respool: Arc<RespoolEngine>,
    placement: Arc<PlacementEngine>,
    offers: Arc<OfferPool>,
    capacity: Arc<CapacityTracker>,
    sink: Arc<dyn CallSink>,
}

impl JobManager {
    pub fn new(
        store: StateStore,
        respool: Arc<RespoolEngine>,
        placement: Arc<PlacementEngine>,
        offers: Arc<OfferPool>,
        capacity: Arc<CapacityTracker>,
        sink: Arc<dyn CallSink>,
    ) -> Self {
        Self {
            store,
            respool,
            placement,
            offers,
            capacity,
            sink,
        }
    }

    // ── Submission ─────────────────────────────────────────────────

    /// Create a job and its task rows. Submitting the same job id with
    /// an identical config is a no-op returning the existing job;
    /// submitting a different config under the same id is a conflict.
    pub async fn submit_job(&self, config: JobConfig) -> JobResult<JobRow> {
        validate_job(&config)?;
        if !self.respool.has_pool(&config.pool_id) {
            return Err(JobError::InvalidInput(format!(
                "pool {} does not exist",
                config.pool_id
            )));
        }

        if let Some(existing) = self.store.get_job(&config.job_id)? {
            if existing.config == config {
                debug!(job_id = %config.job_id, "duplicate submission, returning existing job");
                return Ok(existing);
            }
            return Err(JobError::Conflict(format!(
                "job {} already exists with a different config",
                config.job_id
            )));
        }

        let now = epoch_millis();
        let goal_state = match config.r#type {
            JobType::Batch => JobState::Succeeded,
            JobType::Service => JobState::Running,
        };
        let row = JobRow {
            config: config.clone(),
            runtime: JobRuntime {
                state: JobState::Pending,
                goal_state,
                config_version: config.config_version,
                creation_time_ms: now,
                start_time_ms: None,
                completion_time_ms: None,
            },
        };
        self.store.put_job(&row)?;

        // Instance count equals the row count; ids are dense from zero.
        for instance_id in 0..config.instance_count {
            let task_row = TaskRow {
                job_id: config.job_id.clone(),
                instance_id,
                config_version: config.config_version,
                runtime: TaskRuntime::initial(&config.job_id, instance_id),
            };
            self.store.put_task(&task_row)?;
            self.persist_transition(&config.job_id, instance_id, |runtime| {
                let mut next = runtime.clone();
                next.state = TaskState::Pending;
                Some(next)
            })?;
            self.respool.enqueue(demand_for(&config, instance_id, now))?;
        }

        info!(
            job_id = %config.job_id,
            instances = config.instance_count,
            pool = %config.pool_id,
            "job submitted"
        );
        self.admit_and_forward().await?;
        Ok(row)
    }

    // ── Admission and preemption ───────────────────────────────────

    /// Pull newly admitted demands out of the resource-pool engine,
    /// persist PENDING → READY, and hand them to the placement engine.
    /// Then evaluate preemption.
    pub async fn admit_and_forward(&self) -> JobResult<()> {
        for demand in self.respool.try_admit() {
            let admitted = self.persist_transition(&demand.job_id, demand.instance_id, |runtime| {
                if runtime.state != TaskState::Pending || runtime.goal_state != TaskGoalState::Run {
                    return None;
                }
                let mut next = runtime.clone();
                next.state = TaskState::Ready;
                Some(next)
            })?;
            match admitted {
                Some(_) => self.placement.add_ready(demand),
                // Killed or otherwise moved on while queued: give the
                // allocation straight back.
                None => {
                    let _ = self.respool.release(&demand.key());
                }
            }
        }

        self.run_preemption().await
    }

    /// Kill the lowest-priority latest-started tasks of pools holding
    /// more than their entitlement while above their reservation.
    async fn run_preemption(&self) -> JobResult<()> {
        for victim in self.respool.preemption_victims() {
            let row = match self.store.get_task(&victim.key.job_id, victim.key.instance_id)? {
                Some(row) => row,
                None => continue,
            };
            // Only running work occupies physical resources worth
            // reclaiming; queued or mid-placement tasks are skipped.
            if !row.runtime.state.is_launched() || row.runtime.state == TaskState::Preempting {
                continue;
            }

            let preempting =
                self.persist_transition(&victim.key.job_id, victim.key.instance_id, |runtime| {
                    if runtime.state != row.runtime.state {
                        return None;
                    }
                    let mut next = runtime.clone();
                    next.state = TaskState::Preempting;
                    next.message = Some("preempted to honor pool entitlement".to_string());
                    Some(next)
                })?;

            if let Some(row) = preempting {
                info!(task = %victim.key, pool = %victim.pool_id, "preempting task");
                self.send_kill(&row).await;
            }
        }
        Ok(())
    }

    // ── Launching ──────────────────────────────────────────────────

    /// Consume placement outcomes until the channel closes or shutdown.
    /// Invariant violations are not absorbed: they bubble up so the
    /// supervisor can terminate the process.
    pub async fn run_outcome_loop(
        self: Arc<Self>,
        mut outcomes: mpsc::Receiver<PlacementOutcome>,
        mut shutdown: watch::Receiver<bool>,
    ) -> JobResult<()> {
        loop {
            tokio::select! {
                outcome = outcomes.recv() => {
                    let result = match outcome {
                        Some(PlacementOutcome::Plan(plan)) => self.launch_plan(plan).await,
                        Some(PlacementOutcome::Unplaced(demand)) => {
                            self.return_to_admission(demand).await
                        }
                        None => break,
                    };
                    match result {
                        Ok(()) => {}
                        Err(e @ JobError::InvariantViolation(_)) => return Err(e),
                        Err(e) => warn!(error = %e, "placement outcome handling failed"),
                    }
                }
                _ = shutdown.changed() => break,
            }
        }
        Ok(())
    }

    /// Launch a placed plan: persist each task through PLACING and
    /// LAUNCHING (write-ahead), then send one ACCEPT for the claimed
    /// offers. A claim invalidated by rescind rolls the whole plan back
    /// with no ACCEPT emitted.
    pub async fn launch_plan(&self, plan: LaunchPlan) -> JobResult<()> {
        if !self.offers.claim_valid(plan.plan_id) {
            warn!(plan_id = plan.plan_id, "claim rescinded before launch, rolling back");
            self.placement.rollback_plan(plan);
            return Ok(());
        }

        let mut task_infos = Vec::new();
        let mut launching: Vec<Assignment> = Vec::new();
        for assignment in &plan.assignments {
            let demand = &assignment.demand;
            let Some(job) = self.store.get_job(&demand.job_id)? else {
                warn!(job_id = %demand.job_id, "job vanished before launch");
                continue;
            };

            let row = self.persist_transition(&demand.job_id, demand.instance_id, |runtime| {
                if runtime.state != TaskState::Ready || runtime.goal_state != TaskGoalState::Run {
                    return None;
                }
                let mut next = runtime.clone();
                next.state = TaskState::Placing;
                Some(next)
            })?;
            if row.is_none() {
                // Killed while in the round; free its admission slot.
                let _ = self.respool.release(&demand.key());
                continue;
            }

            let hostname = plan.hostname.clone();
            let agent = plan.agent_id.clone();
            let Some(row) =
                self.persist_transition(&demand.job_id, demand.instance_id, move |runtime| {
                    let mut next = runtime.clone();
                    next.state = TaskState::Launching;
                    next.agent_id = Some(agent.clone());
                    next.host = Some(hostname.clone());
                    Some(next)
                })?
            else {
                continue;
            };

            task_infos.push(build_task_info(&job.config, &row, assignment, &plan.agent_id));
            launching.push(assignment.clone());
        }

        if task_infos.is_empty() {
            self.placement.rollback_plan(plan);
            return Ok(());
        }

        // Final rescind check between the store commit and the wire write.
        if !self.offers.claim_valid(plan.plan_id) {
            warn!(plan_id = plan.plan_id, "claim rescinded after persist, rolling back");
            for assignment in &launching {
                self.persist_transition(
                    &assignment.demand.job_id,
                    assignment.demand.instance_id,
                    |runtime| {
                        let mut next = runtime.clone();
                        next.state = TaskState::Ready;
                        next.agent_id = None;
                        next.host = None;
                        Some(next)
                    },
                )?;
            }
            self.placement.rollback_plan(plan);
            return Ok(());
        }

        // The driver stamps the live framework id on every call.
        let accept = Call::accept(None, plan.offer_ids.clone(), task_infos, None);
        match self.sink.send_call(accept).await {
            Ok(()) => {
                let _ = self.offers.complete_launch(plan.plan_id);
                for assignment in &launching {
                    let demand = &assignment.demand;
                    self.persist_transition(&demand.job_id, demand.instance_id, |runtime| {
                        let mut next = runtime.clone();
                        next.state = TaskState::Launched;
                        Some(next)
                    })?;
                    self.capacity.add_usage(&plan.agent_id, demand.resources);
                    info!(task = %demand.key(), agent = %plan.agent_id, "task launched");
                }
            }
            Err(e) => {
                // ACCEPT is not idempotent and delivery is unknown. Keep
                // the tasks in LAUNCHING; reconciliation either observes
                // them on the agent or declares them LOST and relaunches.
                warn!(plan_id = plan.plan_id, error = %e, "accept failed, leaving launch to reconciliation");
                let _ = self.offers.complete_launch(plan.plan_id);
            }
        }
        Ok(())
    }

    /// An unplaced demand exhausted its retries: back to PENDING and the
    /// admission queue.
    async fn return_to_admission(&self, demand: TaskDemand) -> JobResult<()> {
        let reverted = self.persist_transition(&demand.job_id, demand.instance_id, |runtime| {
            if runtime.state != TaskState::Ready {
                return None;
            }
            let mut next = runtime.clone();
            next.state = TaskState::Pending;
            next.message = Some("placement retries exhausted".to_string());
            Some(next)
        })?;
        if reverted.is_some() {
            self.respool.requeue(demand)?;
        }
        Ok(())
    }

    // ── Status updates ─────────────────────────────────────────────

    /// Apply one master status update: the authoritative transition for
    /// everything past LAUNCHING. Serialized per task by the handler
    /// pool. Acknowledged only after the store commit.
    pub async fn handle_status(&self, status: TaskStatus) -> JobResult<()> {
        let task_id = status.task_id_value().to_string();
        let Some((job_id, instance_id, run_number)) = peloton_core::parse_mesos_task_id(&task_id)
        else {
            warn!(%task_id, "unparseable task id in status update");
            self.acknowledge(&status).await;
            return Ok(());
        };

        let Some(row) = self.store.get_task(&job_id, instance_id)? else {
            warn!(%task_id, "status update for unknown task");
            self.acknowledge(&status).await;
            return Ok(());
        };

        // A stale run: the update describes a previous incarnation.
        if row.runtime.run_number != run_number {
            debug!(%task_id, current_run = row.runtime.run_number, "orphan status update");
            self.acknowledge(&status).await;
            return Ok(());
        }

        let target = task::state_from_mesos(status.task_state());
        if row.runtime.state == target || row.runtime.state.is_terminal() {
            self.acknowledge(&status).await;
            return Ok(());
        }

        let now = epoch_millis();
        let status_for_persist = status.clone();
        let updated = self
            .persist_transition(&job_id, instance_id, move |runtime| {
                if runtime.state == target || runtime.state.is_terminal() {
                    return None;
                }
                let mut next = runtime.clone();
                next.state = target;
                next.message = status_for_persist.message.clone();
                next.reason = status_for_persist.reason.clone();
                if let Some(agent) = &status_for_persist.agent_id {
                    next.agent_id = Some(agent.value.clone());
                }
                if target == TaskState::Running && next.start_time_ms.is_none() {
                    next.start_time_ms = Some(now);
                }
                if target.is_terminal() {
                    next.completion_time_ms = Some(now);
                }
                if target == TaskState::Failed {
                    next.failure_count += 1;
                }
                Some(next)
            })?;

        if let Some(row) = updated {
            info!(
                task = %task_id,
                state = ?row.runtime.state,
                "task transitioned"
            );
            self.apply_post_transition(&row, now).await?;
        }

        self.acknowledge(&status).await;
        Ok(())
    }

    /// Reconciler verdict: the master does not know this task.
    pub async fn mark_task_lost(&self, job_id: &str, instance_id: u32, reason: &str) -> JobResult<()> {
        let now = epoch_millis();
        let reason = reason.to_string();
        let updated = self.persist_transition(job_id, instance_id, move |runtime| {
            if runtime.state.is_terminal() {
                return None;
            }
            let mut next = runtime.clone();
            next.state = TaskState::Lost;
            next.reason = Some(reason.clone());
            next.completion_time_ms = Some(now);
            Some(next)
        })?;
        if let Some(row) = updated {
            warn!(task = %TaskKey::new(job_id, instance_id), "task lost");
            self.apply_post_transition(&row, now).await?;
        }
        Ok(())
    }

    /// Release, relaunch and job-state bookkeeping after a persisted
    /// transition.
    async fn apply_post_transition(&self, row: &TaskRow, now: u64) -> JobResult<()> {
        let key = TaskKey::new(row.job_id.clone(), row.instance_id);

        if row.runtime.state == TaskState::Running {
            self.respool.note_started(&key, row.runtime.start_time_ms.unwrap_or(now));
        }

        if row.runtime.state.is_terminal() {
            if self.respool.release(&key).is_some() {
                if let (Some(agent), Some(job)) =
                    (&row.runtime.agent_id, self.store.get_job(&row.job_id)?)
                {
                    self.capacity
                        .remove_usage(agent, job.config.task.resources);
                }
            }

            self.maybe_relaunch(row, now).await?;
            // Freed allocation may admit queued work.
            self.admit_and_forward().await?;
        }

        self.recompute_job_state(&row.job_id, now)?;
        Ok(())
    }

    /// Mint a new run when the instance is restart-eligible: failures
    /// within the budget, or any LOST run, while the goal is still RUN.
    async fn maybe_relaunch(&self, row: &TaskRow, now: u64) -> JobResult<()> {
        if row.runtime.goal_state != TaskGoalState::Run {
            return Ok(());
        }
        let Some(job) = self.store.get_job(&row.job_id)? else {
            return Ok(());
        };

        let eligible = match row.runtime.state {
            TaskState::Lost => true,
            TaskState::Failed => row.runtime.failure_count <= job.config.task.max_failures,
            // Service instances restart after being killed externally
            // only via explicit resubmission; no auto-relaunch here.
            _ => false,
        };
        if !eligible {
            return Ok(());
        }

        let job_id = row.job_id.clone();
        let instance_id = row.instance_id;
        let relaunched = self.persist_transition(&row.job_id, row.instance_id, move |runtime| {
            if !runtime.state.is_terminal() {
                return None;
            }
            Some(task::next_run(&job_id, instance_id, runtime))
        })?;

        if let Some(row) = relaunched {
            info!(
                task = %TaskKey::new(row.job_id.clone(), row.instance_id),
                run = row.runtime.run_number,
                "relaunching instance"
            );
            self.respool.enqueue(demand_for(&job.config, row.instance_id, now))?;
        }
        Ok(())
    }

    // ── Goal state (kill) ──────────────────────────────────────────

    /// Set the job's goal to KILLED and kill every live task.
    pub async fn kill_job(&self, job_id: &str) -> JobResult<()> {
        let Some(mut job) = self.store.get_job(job_id)? else {
            return Err(JobError::NotFound(format!("job {job_id}")));
        };
        job.runtime.goal_state = JobState::Killed;
        if !job.runtime.state.is_terminal() {
            job.runtime.state = JobState::Killing;
        }
        self.store.update_job_runtime(job_id, &job.runtime)?;

        for row in self.store.list_tasks_for_job(job_id)? {
            self.kill_task(job_id, row.instance_id).await?;
        }
        Ok(())
    }

    /// Drive one task toward KILLED: persist the goal first, then apply
    /// whatever the current state requires.
    pub async fn kill_task(&self, job_id: &str, instance_id: u32) -> JobResult<()> {
        let now = epoch_millis();
        let updated = self.persist_transition(job_id, instance_id, move |runtime| {
            if runtime.state.is_terminal() {
                return None;
            }
            let mut next = runtime.clone();
            next.goal_state = TaskGoalState::Killed;
            // Tasks not yet handed to the master die locally.
            match runtime.state {
                TaskState::Initialized | TaskState::Pending | TaskState::Ready => {
                    next.state = TaskState::Killed;
                    next.completion_time_ms = Some(now);
                }
                _ => {}
            }
            Some(next)
        })?;

        let Some(row) = updated else { return Ok(()) };
        let key = TaskKey::new(job_id, instance_id);

        match row.runtime.state {
            TaskState::Killed => {
                // Never reached the master: clean up scheduler-side state.
                self.respool.remove_queued(&key);
                self.placement.remove_ready(job_id, instance_id);
                let _ = self.respool.release(&key);
                self.recompute_job_state(job_id, now)?;
                self.admit_and_forward().await?;
            }
            // In-flight or running: the KILL call drives the terminal
            // transition through a status update.
            _ => self.send_kill(&row).await,
        }
        Ok(())
    }

    async fn send_kill(&self, row: &TaskRow) {
        let Some(task_id) = row.runtime.mesos_task_id.clone() else {
            return;
        };
        let call = Call::kill(None, task_id.clone(), row.runtime.agent_id.clone());
        if let Err(e) = self.sink.send_call(call).await {
            // KILL is idempotent; reconciliation re-drives it.
            warn!(task = %task_id, error = %e, "kill call failed");
        }
    }

    async fn acknowledge(&self, status: &TaskStatus) {
        let (Some(uuid), Some(agent), Some(task)) =
            (&status.uuid, &status.agent_id, &status.task_id)
        else {
            return;
        };
        let call = Call::acknowledge(None, agent.value.clone(), task.value.clone(), uuid.clone());
        if let Err(e) = self.sink.send_call(call).await {
            warn!(task = %task.value, error = %e, "acknowledge failed");
        }
    }

    // ── Job state aggregation ──────────────────────────────────────

    fn recompute_job_state(&self, job_id: &str, now: u64) -> JobResult<()> {
        let Some(mut job) = self.store.get_job(job_id)? else {
            return Ok(());
        };
        let tasks = self.store.list_tasks_for_job(job_id)?;
        if tasks.len() != job.config.instance_count as usize {
            return Err(JobError::InvariantViolation(format!(
                "job {job_id}: {} task rows for instance_count {}",
                tasks.len(),
                job.config.instance_count
            )));
        }

        let all_succeeded = tasks
            .iter()
            .all(|t| t.runtime.state == TaskState::Succeeded);
        // A task sitting in FAILED has already been denied a relaunch:
        // restart-eligible failures move straight back to PENDING.
        let any_failed = tasks.iter().any(|t| t.runtime.state == TaskState::Failed);
        let all_killed_terminal = tasks.iter().all(|t| {
            matches!(t.runtime.state, TaskState::Killed | TaskState::Lost)
        });
        let any_running = tasks.iter().any(|t| {
            matches!(
                t.runtime.state,
                TaskState::Starting | TaskState::Running | TaskState::Preempting
            )
        });

        let next = if all_succeeded && job.config.r#type == JobType::Batch {
            JobState::Succeeded
        } else if any_failed {
            JobState::Failed
        } else if all_killed_terminal {
            JobState::Killed
        } else if any_running {
            JobState::Running
        } else if job.runtime.goal_state == JobState::Killed {
            JobState::Killing
        } else {
            JobState::Pending
        };

        if any_running && job.runtime.start_time_ms.is_none() {
            job.runtime.start_time_ms = Some(now);
        }
        if next.is_terminal() && job.runtime.completion_time_ms.is_none() {
            job.runtime.completion_time_ms = Some(now);
        }
        if next != job.runtime.state {
            debug!(job_id = %job_id, state = ?next, "job state recomputed");
            job.runtime.state = next;
            self.store.update_job_runtime(job_id, &job.runtime)?;
        }
        Ok(())
    }

    // ── Recovery ───────────────────────────────────────────────────

    /// Rebuild in-memory scheduling state from the store. Runs before
    /// any scheduling decision on startup.
    pub async fn recover(&self) -> JobResult<()> {
        let now = epoch_millis();
        let mut recovered = 0usize;

        for job in self.store.list_jobs()? {
            for row in self.store.list_tasks_for_job(&job.config.job_id)? {
                if row.runtime.state.is_terminal() {
                    continue;
                }
                recovered += 1;
                let key = TaskKey::new(row.job_id.clone(), row.instance_id);
                let demand = demand_for(&job.config, row.instance_id, now);

                match row.runtime.state {
                    TaskState::Initialized => {
                        self.persist_transition(&row.job_id, row.instance_id, |runtime| {
                            let mut next = runtime.clone();
                            next.state = TaskState::Pending;
                            Some(next)
                        })?;
                        self.respool.enqueue(demand)?;
                    }
                    TaskState::Pending => {
                        self.respool.enqueue(demand)?;
                    }
                    TaskState::Ready | TaskState::Placing => {
                        // In-memory claims did not survive; back to ready.
                        self.restore_allocation(&key, &job.config, &row);
                        if row.runtime.state == TaskState::Placing {
                            self.persist_transition(&row.job_id, row.instance_id, |runtime| {
                                let mut next = runtime.clone();
                                next.state = TaskState::Ready;
                                Some(next)
                            })?;
                        }
                        self.placement.add_ready(demand);
                    }
                    TaskState::Launching
                    | TaskState::Launched
                    | TaskState::Starting
                    | TaskState::Running
                    | TaskState::Preempting => {
                        self.restore_allocation(&key, &job.config, &row);
                        if let Some(agent) = &row.runtime.agent_id {
                            self.capacity.add_usage(agent, job.config.task.resources);
                        }
                    }
                    _ => {}
                }
            }
        }

        info!(tasks = recovered, "scheduler state recovered from store");
        self.admit_and_forward().await
    }

    fn restore_allocation(&self, key: &TaskKey, config: &JobConfig, row: &TaskRow) {
        self.respool.restore_allocation(
            key.clone(),
            AllocationEntry {
                pool_id: config.pool_id.clone(),
                resources: config.task.resources,
                priority: config.priority,
                start_time_ms: row.runtime.start_time_ms.unwrap_or(0),
            },
        );
    }

    // ── Internal helpers ───────────────────────────────────────────

    /// Compare-and-set a task's runtime. `mutate` returns `None` to skip
    /// (state moved on); conflicts re-read and retry a bounded number of
    /// times.
    fn persist_transition(
        &self,
        job_id: &str,
        instance_id: u32,
        mutate: impl Fn(&TaskRuntime) -> Option<TaskRuntime>,
    ) -> JobResult<Option<TaskRow>> {
        for _ in 0..3 {
            let Some(row) = self.store.get_task(job_id, instance_id)? else {
                return Err(JobError::NotFound(format!("task {job_id}:{instance_id}")));
            };
            let Some(next) = mutate(&row.runtime) else {
                return Ok(None);
            };
            match self
                .store
                .cas_task_runtime(job_id, instance_id, row.runtime.revision, next)
            {
                Ok(row) => return Ok(Some(row)),
                Err(e) if e.is_conflict() => continue,
                Err(e) => return Err(e.into()),
            }
        }
        Err(JobError::Conflict(format!(
            "task {job_id}:{instance_id}: persistent cas contention"
        )))
    }
}

fn validate_job(config: &JobConfig) -> JobResult<()> {
    if config.job_id.is_empty() {
        return Err(JobError::InvalidInput("job id is empty".to_string()));
    }
    if config.instance_count == 0 {
        return Err(JobError::InvalidInput(
            "instance count must be at least 1".to_string(),
        ));
    }
    if config.task.command.is_empty() {
        return Err(JobError::InvalidInput("task command is empty".to_string()));
    }
    if config.pool_id.is_empty() {
        return Err(JobError::InvalidInput("pool id is empty".to_string()));
    }
    Ok(())
}

fn demand_for(config: &JobConfig, instance_id: u32, submit_time_ms: u64) -> TaskDemand {
    TaskDemand {
        job_id: config.job_id.clone(),
        instance_id,
        pool_id: config.pool_id.clone(),
        priority: config.priority,
        resources: config.task.resources,
        num_ports: config.task.num_ports,
        constraints: config.task.constraints.clone(),
        submit_time_ms,
    }
}

fn build_task_info(
    config: &JobConfig,
    row: &TaskRow,
    assignment: &Assignment,
    agent_id: &str,
) -> TaskInfo {
    let mut resources = vec![
        Resource::scalar("cpus", config.task.resources.cpu),
        Resource::scalar("mem", config.task.resources.mem_mb),
    ];
    if config.task.resources.disk_mb > 0.0 {
        resources.push(Resource::scalar("disk", config.task.resources.disk_mb));
    }
    if config.task.resources.gpu > 0.0 {
        resources.push(Resource::scalar("gpus", config.task.resources.gpu));
    }
    if !assignment.ports.is_empty() {
        resources.push(Resource::ranges("ports", &ports_to_ranges(&assignment.ports)));
    }

    TaskInfo {
        name: format!("{}-{}", config.job_id, row.instance_id),
        task_id: row.runtime.mesos_task_id.clone().map(TaskId::new),
        agent_id: Some(peloton_mesos::AgentId {
            value: agent_id.to_string(),
        }),
        resources,
        command: Some(CommandInfo::shell_command(&config.task.command)),
    }
}

/// Collapse a sorted port list into inclusive ranges.
fn ports_to_ranges(ports: &[u64]) -> Vec<(u64, u64)> {
    let mut sorted = ports.to_vec();
    sorted.sort_unstable();
    let mut ranges: Vec<(u64, u64)> = Vec::new();
    for port in sorted {
        match ranges.last_mut() {
            Some((_, end)) if *end + 1 == port => *end = port,
            _ => ranges.push((port, port)),
        }
    }
    ranges
}

fn epoch_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
