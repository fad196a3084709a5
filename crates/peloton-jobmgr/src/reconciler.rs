//! Task reconciliation against the master.
//!
//! The first cycle after a (re)subscription is implicit: an empty task
//! list asks the master to report everything it knows. Later cycles
//! explicitly list every possibly-running task. A task whose runtime
//! revision has not moved across two consecutive cycles received no
//! update from the master and is declared LOST; the master wins every
//! disagreement because updates flow through the ordinary status path.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::watch;
use tracing::{debug, info, warn};

use peloton_core::TaskKey;
use peloton_driver::CallSink;
use peloton_mesos::Call;
use peloton_state::{StateStore, TaskRow, TaskState};

use crate::error::JobResult;
use crate::manager::JobManager;

/// Consecutive silent cycles before a task is declared LOST.
const LOST_AFTER_SILENT_CYCLES: u32 = 2;

struct WatchEntry {
    revision: u64,
    silent_cycles: u32,
}

pub struct Reconciler {
    store: StateStore,
    manager: Arc<JobManager>,
    sink: Arc<dyn CallSink>,
    interval: Duration,
    watch: Mutex<HashMap<TaskKey, WatchEntry>>,
}

impl Reconciler {
    pub fn new(
        store: StateStore,
        manager: Arc<JobManager>,
        sink: Arc<dyn CallSink>,
        interval: Duration,
    ) -> Self {
        Self {
            store,
            manager,
            sink,
            interval,
            watch: Mutex::new(HashMap::new()),
        }
    }

    /// Run reconciliation cycles until shutdown. The first cycle fires
    /// immediately (startup reconciliation), implicitly.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        info!(interval = ?self.interval, "reconciler started");

        if let Err(e) = self.implicit_cycle().await {
            warn!(error = %e, "implicit reconciliation failed");
        }

        loop {
            tokio::select! {
                _ = tokio::time::sleep(self.interval) => {
                    if let Err(e) = self.explicit_cycle().await {
                        warn!(error = %e, "reconciliation cycle failed");
                    }
                }
                _ = shutdown.changed() => {
                    debug!("reconciler shutting down");
                    break;
                }
            }
        }
    }

    /// Ask the master for everything it knows about this framework.
    pub async fn implicit_cycle(&self) -> JobResult<()> {
        debug!("implicit reconciliation");
        self.sink.send_call(Call::reconcile(None, Vec::new())).await?;
        Ok(())
    }

    /// One explicit cycle: detect tasks silent since the previous cycle,
    /// declare long-silent ones LOST, and re-request the rest.
    pub async fn explicit_cycle(&self) -> JobResult<()> {
        let rows: Vec<TaskRow> = self
            .store
            .list_nonterminal_tasks()?
            .into_iter()
            .filter(|row| watchable(row.runtime.state))
            .collect();

        let mut lost = Vec::new();
        let mut request = Vec::new();
        {
            let mut watch = self.watch.lock().unwrap();
            let mut seen: HashMap<TaskKey, ()> = HashMap::new();

            for row in &rows {
                let key = TaskKey::new(row.job_id.clone(), row.instance_id);
                seen.insert(key.clone(), ());
                let silent_cycles = match watch.get_mut(&key) {
                    Some(entry) if entry.revision == row.runtime.revision => {
                        entry.silent_cycles += 1;
                        entry.silent_cycles
                    }
                    Some(entry) => {
                        entry.revision = row.runtime.revision;
                        entry.silent_cycles = 0;
                        0
                    }
                    None => {
                        watch.insert(
                            key.clone(),
                            WatchEntry {
                                revision: row.runtime.revision,
                                silent_cycles: 0,
                            },
                        );
                        0
                    }
                };

                if silent_cycles >= LOST_AFTER_SILENT_CYCLES {
                    lost.push(key);
                } else if let Some(task_id) = &row.runtime.mesos_task_id {
                    request.push((task_id.clone(), row.runtime.agent_id.clone()));
                }
            }

            // Tasks that reached a terminal state stop being watched.
            watch.retain(|key, _| seen.contains_key(key));
            for key in &lost {
                watch.remove(key);
            }
        }

        for key in lost {
            warn!(task = %key, "task unknown to master for two cycles");
            self.manager
                .mark_task_lost(
                    &key.job_id,
                    key.instance_id,
                    "unknown to master across two reconciliation cycles",
                )
                .await?;
        }

        if !request.is_empty() {
            debug!(tasks = request.len(), "explicit reconciliation");
            self.sink.send_call(Call::reconcile(None, request)).await?;
        }
        Ok(())
    }
}

/// States the master could know about and should be reporting on.
/// LAUNCHING is included: an ACCEPT whose outcome was never observed is
/// exactly what reconciliation exists to resolve.
fn watchable(state: TaskState) -> bool {
    state == TaskState::Launching || state.is_launched()
}
