//! The per-task state machine.
//!
//! Terminal states are absorbing; a restart-eligible instance gets a new
//! run number and starts over from PENDING rather than reviving a
//! terminal run.

use peloton_core::mesos_task_id;
use peloton_mesos::TaskState as MesosTaskState;
use peloton_state::{TaskRuntime, TaskState};

/// Whether the scheduler itself may move a task from `from` to `to`.
/// Master-reported transitions are applied through `state_from_mesos`
/// and bypass this table (the master wins), except out of terminals.
pub fn allowed(from: TaskState, to: TaskState) -> bool {
    use TaskState::*;
    if from == to {
        return false;
    }
    match from {
        Initialized => matches!(to, Pending),
        Pending => matches!(to, Ready | Killed),
        Ready => matches!(to, Placing | Pending | Killed),
        Placing => matches!(to, Launching | Ready | Killed),
        Launching => matches!(to, Launched | Ready | Lost | Killed),
        Launched => matches!(to, Starting | Running | Succeeded | Failed | Killed | Lost | Preempting),
        Starting => matches!(to, Running | Succeeded | Failed | Killed | Lost | Preempting),
        Running => matches!(to, Succeeded | Failed | Killed | Lost | Preempting),
        Preempting => matches!(to, Killed | Failed | Lost),
        // Terminal states are absorbing.
        Succeeded | Failed | Killed | Lost => false,
    }
}

/// Map a master-reported task state onto the runtime state machine.
pub fn state_from_mesos(state: MesosTaskState) -> TaskState {
    use MesosTaskState::*;
    match state {
        TaskStaging => TaskState::Launched,
        TaskStarting => TaskState::Starting,
        TaskRunning => TaskState::Running,
        TaskKilling => TaskState::Running,
        TaskFinished => TaskState::Succeeded,
        TaskFailed | TaskError => TaskState::Failed,
        TaskKilled => TaskState::Killed,
        TaskLost | TaskDropped | TaskUnreachable | TaskGone | TaskUnknown => TaskState::Lost,
    }
}

/// Mint the next run for a restart-eligible instance: a fresh PENDING
/// runtime under an incremented run number. The previous run must be
/// terminal.
pub fn next_run(job_id: &str, instance_id: u32, previous: &TaskRuntime) -> TaskRuntime {
    debug_assert!(previous.state.is_terminal());
    let run_number = previous.run_number + 1;
    TaskRuntime {
        state: TaskState::Pending,
        goal_state: previous.goal_state,
        run_number,
        mesos_task_id: Some(mesos_task_id(job_id, instance_id, run_number)),
        agent_id: None,
        host: None,
        message: None,
        reason: None,
        start_time_ms: None,
        completion_time_ms: None,
        failure_count: previous.failure_count,
        revision: previous.revision,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn happy_path_is_allowed() {
        use TaskState::*;
        let path = [
            Initialized,
            Pending,
            Ready,
            Placing,
            Launching,
            Launched,
            Starting,
            Running,
            Succeeded,
        ];
        for pair in path.windows(2) {
            assert!(allowed(pair[0], pair[1]), "{:?} -> {:?}", pair[0], pair[1]);
        }
    }

    #[test]
    fn terminals_are_absorbing() {
        use TaskState::*;
        for terminal in [Succeeded, Failed, Killed, Lost] {
            for target in [Pending, Ready, Running, Killed, Lost] {
                assert!(!allowed(terminal, target));
            }
        }
    }

    #[test]
    fn no_self_transitions() {
        assert!(!allowed(TaskState::Running, TaskState::Running));
    }

    #[test]
    fn rollback_paths_allowed() {
        use TaskState::*;
        // Unplaced demand returns to the admission queue.
        assert!(allowed(Ready, Pending));
        // Rescinded plan rolls back to admitted-ready.
        assert!(allowed(Placing, Ready));
        assert!(allowed(Launching, Ready));
    }

    #[test]
    fn preemption_path() {
        use TaskState::*;
        assert!(allowed(Running, Preempting));
        assert!(allowed(Preempting, Killed));
        assert!(!allowed(Preempting, Running));
    }

    #[test]
    fn mesos_state_mapping() {
        assert_eq!(
            state_from_mesos(MesosTaskState::TaskFinished),
            TaskState::Succeeded
        );
        assert_eq!(
            state_from_mesos(MesosTaskState::TaskError),
            TaskState::Failed
        );
        assert_eq!(
            state_from_mesos(MesosTaskState::TaskUnreachable),
            TaskState::Lost
        );
        assert_eq!(
            state_from_mesos(MesosTaskState::TaskStaging),
            TaskState::Launched
        );
    }

    #[test]
    fn next_run_increments_and_resets() {
        let mut previous = TaskRuntime::initial("etl", 2);
        previous.state = TaskState::Failed;
        previous.failure_count = 1;
        previous.agent_id = Some("a-1".to_string());
        previous.revision = 7;

        let fresh = next_run("etl", 2, &previous);
        assert_eq!(fresh.run_number, 1);
        assert_eq!(fresh.mesos_task_id.as_deref(), Some("etl-2-1"));
        assert_eq!(fresh.state, TaskState::Pending);
        assert!(fresh.agent_id.is_none());
        assert_eq!(fresh.failure_count, 1);
    }
}
