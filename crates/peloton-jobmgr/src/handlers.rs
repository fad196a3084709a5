//! Bounded worker pool for task status updates.
//!
//! Updates are hash-routed by `(job_id, instance_id)` so every update
//! for one task lands on the same worker and is processed serially;
//! different tasks proceed in parallel across the pool.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use peloton_core::parse_mesos_task_id;
use peloton_mesos::TaskStatus;

use crate::manager::JobManager;

pub struct TaskHandlerPool {
    senders: Vec<mpsc::Sender<TaskStatus>>,
    handles: Vec<JoinHandle<()>>,
}

impl TaskHandlerPool {
    /// Spawn `workers` handler loops over the given manager.
    pub fn spawn(workers: usize, manager: Arc<JobManager>) -> Self {
        assert!(workers > 0, "handler pool needs at least one worker");
        let mut senders = Vec::with_capacity(workers);
        let mut handles = Vec::with_capacity(workers);

        for worker in 0..workers {
            let (tx, mut rx) = mpsc::channel::<TaskStatus>(256);
            let manager = manager.clone();
            let handle = tokio::spawn(async move {
                while let Some(status) = rx.recv().await {
                    if let Err(e) = manager.handle_status(status).await {
                        error!(worker, error = %e, "status update failed");
                    }
                }
                debug!(worker, "task handler drained");
            });
            senders.push(tx);
            handles.push(handle);
        }

        info!(workers, "task handler pool started");
        Self { senders, handles }
    }

    /// Route a status update to its task's worker. Applies backpressure
    /// when the worker's queue is full.
    pub async fn dispatch(&self, status: TaskStatus) {
        let worker = self.route(status.task_id_value());
        if self.senders[worker].send(status).await.is_err() {
            error!(worker, "task handler worker is gone");
        }
    }

    fn route(&self, task_id: &str) -> usize {
        let mut hasher = DefaultHasher::new();
        match parse_mesos_task_id(task_id) {
            // Hash the instance identity, not the run, so relaunches of
            // one instance stay serialized on the same worker.
            Some((job_id, instance_id, _run)) => {
                job_id.hash(&mut hasher);
                instance_id.hash(&mut hasher);
            }
            None => task_id.hash(&mut hasher),
        }
        (hasher.finish() % self.senders.len() as u64) as usize
    }

    /// Close the intake and wait for in-flight writes to settle.
    pub async fn drain(self) {
        drop(self.senders);
        for handle in self.handles {
            let _ = handle.await;
        }
        info!("task handler pool drained");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pool_with_workers(n: usize) -> TaskHandlerPool {
        // Build a pool without a manager by constructing senders
        // directly; `route` only needs the sender count.
        let mut senders = Vec::new();
        for _ in 0..n {
            let (tx, _rx) = mpsc::channel(1);
            senders.push(tx);
        }
        TaskHandlerPool {
            senders,
            handles: Vec::new(),
        }
    }

    #[test]
    fn same_instance_routes_to_same_worker_across_runs() {
        let pool = pool_with_workers(8);
        let a = pool.route("etl-3-0");
        let b = pool.route("etl-3-1");
        let c = pool.route("etl-3-17");
        assert_eq!(a, b);
        assert_eq!(b, c);
    }

    #[test]
    fn route_is_stable_for_unparseable_ids() {
        let pool = pool_with_workers(8);
        assert_eq!(pool.route("garbage"), pool.route("garbage"));
    }

    #[test]
    fn route_stays_in_bounds() {
        let pool = pool_with_workers(3);
        for i in 0..100u32 {
            let id = format!("job-{i}-0");
            assert!(pool.route(&id) < 3);
        }
    }
}
