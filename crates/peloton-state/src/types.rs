//! Persisted domain types: jobs, tasks, pools and the framework identity.

use serde::{Deserialize, Serialize};

use peloton_core::{mesos_task_id, PlacementConstraints, ResourceVector};

/// Unique identifier for a job.
pub type JobId = String;

/// Unique identifier for a resource pool.
pub type PoolId = String;

// ── Framework identity ─────────────────────────────────────────────

/// Identity persisted per framework name. The framework id never changes
/// once the master has assigned it; the stream id is per subscription.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FrameworkRecord {
    pub name: String,
    pub framework_id: Option<String>,
    pub stream_id: Option<String>,
}

// ── Jobs ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobType {
    Batch,
    Service,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Initialized,
    Pending,
    Running,
    Succeeded,
    Failed,
    Killing,
    Killed,
}

impl JobState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Succeeded | JobState::Failed | JobState::Killed)
    }
}

/// Per-task template within a job config.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskSpec {
    pub command: String,
    pub resources: ResourceVector,
    #[serde(default)]
    pub num_ports: u32,
    #[serde(default)]
    pub constraints: PlacementConstraints,
    /// Relaunch budget: a task may fail this many times before the job
    /// gives up on the instance.
    #[serde(default)]
    pub max_failures: u32,
}

/// Immutable-per-version job configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobConfig {
    pub job_id: JobId,
    pub name: String,
    pub r#type: JobType,
    pub instance_count: u32,
    pub pool_id: PoolId,
    pub priority: u32,
    pub task: TaskSpec,
    pub config_version: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRuntime {
    pub state: JobState,
    pub goal_state: JobState,
    pub config_version: u64,
    pub creation_time_ms: u64,
    pub start_time_ms: Option<u64>,
    pub completion_time_ms: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRow {
    pub config: JobConfig,
    pub runtime: JobRuntime,
}

// ── Tasks ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    Initialized,
    Pending,
    Ready,
    Placing,
    Launching,
    Launched,
    Starting,
    Running,
    Succeeded,
    Failed,
    Killed,
    Lost,
    Preempting,
}

impl TaskState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskState::Succeeded | TaskState::Failed | TaskState::Killed | TaskState::Lost
        )
    }

    /// States in which the task may be running on an agent and is
    /// therefore subject to reconciliation.
    pub fn is_launched(&self) -> bool {
        matches!(
            self,
            TaskState::Launched | TaskState::Starting | TaskState::Running | TaskState::Preempting
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskGoalState {
    Run,
    Killed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskRuntime {
    pub state: TaskState,
    pub goal_state: TaskGoalState,
    /// Incremented per relaunch; part of the mesos task id.
    pub run_number: u32,
    pub mesos_task_id: Option<String>,
    pub agent_id: Option<String>,
    pub host: Option<String>,
    pub message: Option<String>,
    pub reason: Option<String>,
    pub start_time_ms: Option<u64>,
    pub completion_time_ms: Option<u64>,
    pub failure_count: u32,
    /// Store revision for compare-and-set updates.
    pub revision: u64,
}

impl TaskRuntime {
    /// Runtime for a brand-new instance: the first run is minted
    /// immediately so the in-flight mesos task id is unique from the start.
    pub fn initial(job_id: &str, instance_id: u32) -> Self {
        Self {
            state: TaskState::Initialized,
            goal_state: TaskGoalState::Run,
            run_number: 0,
            mesos_task_id: Some(mesos_task_id(job_id, instance_id, 0)),
            agent_id: None,
            host: None,
            message: None,
            reason: None,
            start_time_ms: None,
            completion_time_ms: None,
            failure_count: 0,
            revision: 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskRow {
    pub job_id: JobId,
    pub instance_id: u32,
    pub config_version: u64,
    pub runtime: TaskRuntime,
}

impl TaskRow {
    /// Composite key for the tasks table.
    pub fn table_key(&self) -> String {
        task_table_key(&self.job_id, self.instance_id)
    }
}

pub fn task_table_key(job_id: &str, instance_id: u32) -> String {
    format!("{job_id}:{instance_id}")
}

// ── Resource pools ─────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PoolPolicy {
    Fair,
    Priority,
}

impl Default for PoolPolicy {
    fn default() -> Self {
        PoolPolicy::Fair
    }
}

/// Definition of one node in the resource pool tree. `parent = None`
/// attaches the pool directly under the virtual root.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourcePoolConfig {
    pub id: PoolId,
    pub parent: Option<PoolId>,
    pub reservation: ResourceVector,
    pub limit: ResourceVector,
    pub share: f64,
    #[serde(default)]
    pub policy: PoolPolicy,
}
