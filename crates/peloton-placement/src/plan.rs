//! Launch plans produced by a placement round.

use peloton_core::TaskDemand;

/// One task's slot within a launch plan.
#[derive(Debug, Clone)]
pub struct Assignment {
    pub demand: TaskDemand,
    /// Concrete ports taken from the claimed offers' ranges.
    pub ports: Vec<u64>,
}

/// A set of claimed offers plus the tasks to launch on them; becomes one
/// ACCEPT call.
#[derive(Debug, Clone)]
pub struct LaunchPlan {
    pub plan_id: u64,
    pub agent_id: String,
    pub hostname: String,
    pub offer_ids: Vec<String>,
    pub assignments: Vec<Assignment>,
}

/// What a round decided about each demand it saw.
#[derive(Debug)]
pub enum PlacementOutcome {
    /// Offers claimed, ready for the launcher.
    Plan(LaunchPlan),
    /// Out of placement retries; the task goes back to the admission
    /// queue.
    Unplaced(TaskDemand),
}
