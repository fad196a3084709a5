//! Scheduling vocabulary shared by the admission, placement and job
//! management crates.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::resources::ResourceVector;

/// Identifies one task instance of a job.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TaskKey {
    pub job_id: String,
    pub instance_id: u32,
}

impl TaskKey {
    pub fn new(job_id: impl Into<String>, instance_id: u32) -> Self {
        Self {
            job_id: job_id.into(),
            instance_id,
        }
    }
}

impl fmt::Display for TaskKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.job_id, self.instance_id)
    }
}

/// Format the Mesos task id for a run: `{jobID}-{instanceID}-{runNumber}`.
pub fn mesos_task_id(job_id: &str, instance_id: u32, run_number: u32) -> String {
    format!("{job_id}-{instance_id}-{run_number}")
}

/// Parse a Mesos task id back into `(job_id, instance_id, run_number)`.
///
/// Job ids may themselves contain dashes, so the instance and run are the
/// last two dash-separated components.
pub fn parse_mesos_task_id(id: &str) -> Option<(String, u32, u32)> {
    let (rest, run) = id.rsplit_once('-')?;
    let (job, instance) = rest.rsplit_once('-')?;
    if job.is_empty() {
        return None;
    }
    Some((job.to_string(), instance.parse().ok()?, run.parse().ok()?))
}

/// Hard placement constraints for one task.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PlacementConstraints {
    /// Host the task must land on.
    pub required_host: Option<String>,
    /// Hosts the task must not land on.
    pub avoid_hosts: Vec<String>,
    /// Only agents advertising gpu resources qualify.
    pub requires_gpu: bool,
    /// Agent attributes that must match exactly.
    pub required_attributes: HashMap<String, String>,
    /// Tasks sharing a group never co-locate on one host.
    pub anti_affinity_group: Option<String>,
}

impl PlacementConstraints {
    pub fn is_unconstrained(&self) -> bool {
        self.required_host.is_none()
            && self.avoid_hosts.is_empty()
            && !self.requires_gpu
            && self.required_attributes.is_empty()
            && self.anti_affinity_group.is_none()
    }
}

/// A task's resource request as it travels through admission and placement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskDemand {
    pub job_id: String,
    pub instance_id: u32,
    pub pool_id: String,
    pub priority: u32,
    pub resources: ResourceVector,
    pub num_ports: u32,
    pub constraints: PlacementConstraints,
    /// Submission time in epoch milliseconds; part of the deterministic
    /// placement ordering.
    pub submit_time_ms: u64,
}

impl TaskDemand {
    pub fn key(&self) -> TaskKey {
        TaskKey::new(self.job_id.clone(), self.instance_id)
    }

    /// Group key for placement: tasks of one job with the same affinity
    /// bucket are packed together in a round.
    pub fn placement_group(&self) -> String {
        match &self.constraints.anti_affinity_group {
            Some(group) => format!("{}/{}", self.job_id, group),
            None => self.job_id.clone(),
        }
    }
}
