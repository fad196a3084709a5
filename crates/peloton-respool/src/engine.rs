//! Admission control and preemption over the pool tree.
//!
//! Demands queue per pool in FIFO order with priority as the secondary
//! key (higher first). A task admits when its pool's allocation plus the
//! task's demand fits the pool's entitlement; the queue is head-of-line
//! blocking, and every release re-evaluates in order.

use std::collections::HashMap;
use std::sync::RwLock;

use tracing::{debug, info};

use peloton_core::{ResourceVector, TaskDemand, TaskKey};
use peloton_state::ResourcePoolConfig;

use crate::entitlement;
use crate::error::{RespoolError, RespoolResult};
use crate::tree::PoolTree;

/// Resources charged against a pool for one admitted task.
#[derive(Debug, Clone)]
pub struct AllocationEntry {
    pub pool_id: String,
    pub resources: ResourceVector,
    pub priority: u32,
    /// Start time used for the preemption tie-break (latest started goes
    /// first); admission time until the task actually starts running.
    pub start_time_ms: u64,
}

/// A task selected for preemption.
#[derive(Debug, Clone)]
pub struct PreemptionVictim {
    pub key: TaskKey,
    pub pool_id: String,
    pub priority: u32,
    pub resources: ResourceVector,
}

#[derive(Debug)]
struct QueuedDemand {
    demand: TaskDemand,
    seq: u64,
}

struct Inner {
    tree: PoolTree,
    capacity: ResourceVector,
    queues: HashMap<String, Vec<QueuedDemand>>,
    seq: u64,
    allocations: HashMap<TaskKey, AllocationEntry>,
}

impl Inner {
    /// Rebuild per-pool aggregates from the queues and allocations, then
    /// recompute entitlements.
    fn refresh(&mut self) {
        self.tree.reset_usage();
        for (pool_id, queue) in &self.queues {
            if let Some(node) = self.tree.get_mut(pool_id) {
                for queued in queue {
                    node.demand += queued.demand.resources;
                }
            }
        }
        for entry in self.allocations.values() {
            if let Some(node) = self.tree.get_mut(&entry.pool_id) {
                node.allocation += entry.resources;
            }
        }
        entitlement::recompute(&mut self.tree, self.capacity);
    }
}

pub struct RespoolEngine {
    inner: RwLock<Inner>,
}

impl RespoolEngine {
    pub fn new(configs: Vec<ResourcePoolConfig>) -> RespoolResult<Self> {
        let tree = PoolTree::build(configs)?;
        Ok(Self {
            inner: RwLock::new(Inner {
                tree,
                capacity: ResourceVector::zero(),
                queues: HashMap::new(),
                seq: 0,
                allocations: HashMap::new(),
            }),
        })
    }

    /// Update the cluster capacity (the virtual root's limit).
    pub fn set_cluster_capacity(&self, capacity: ResourceVector) {
        let mut inner = self.inner.write().unwrap();
        inner.capacity = capacity;
        inner.refresh();
    }

    pub fn has_pool(&self, pool_id: &str) -> bool {
        self.inner.read().unwrap().tree.contains(pool_id)
    }

    /// Queue a task demand for admission.
    pub fn enqueue(&self, demand: TaskDemand) -> RespoolResult<()> {
        let mut inner = self.inner.write().unwrap();
        if !inner.tree.contains(&demand.pool_id) {
            return Err(RespoolError::UnknownPool(demand.pool_id));
        }
        let seq = inner.seq;
        inner.seq += 1;
        debug!(task = %demand.key(), pool = %demand.pool_id, "demand queued");
        let queue = inner.queues.entry(demand.pool_id.clone()).or_default();
        queue.push(QueuedDemand { demand, seq });
        // FIFO with priority as the secondary key: higher priority first,
        // arrival order within a priority.
        queue.sort_by(|a, b| b.demand.priority.cmp(&a.demand.priority).then(a.seq.cmp(&b.seq)));
        Ok(())
    }

    /// Drop a queued demand (task killed before admission). Returns true
    /// if it was queued.
    pub fn remove_queued(&self, key: &TaskKey) -> bool {
        let mut inner = self.inner.write().unwrap();
        for queue in inner.queues.values_mut() {
            if let Some(pos) = queue.iter().position(|q| q.demand.key() == *key) {
                queue.remove(pos);
                return true;
            }
        }
        false
    }

    /// Admit as many queued demands as entitlements allow, in order.
    /// Returns the newly admitted demands.
    pub fn try_admit(&self) -> Vec<TaskDemand> {
        let mut inner = self.inner.write().unwrap();
        inner.refresh();

        let mut admitted = Vec::new();
        for pool_id in inner.tree.pool_ids() {
            loop {
                let Some(head) = inner
                    .queues
                    .get(&pool_id)
                    .and_then(|q| q.first())
                    .map(|q| q.demand.clone())
                else {
                    break;
                };

                let node = inner.tree.get(&pool_id).unwrap();
                let projected = node.allocation + head.resources;
                if !projected.fits_within(&node.entitlement) {
                    // Head-of-line blocking preserves FIFO admission order.
                    break;
                }

                inner.queues.get_mut(&pool_id).unwrap().remove(0);
                let node = inner.tree.get_mut(&pool_id).unwrap();
                node.allocation = projected;
                node.demand = node.demand.subtract_clamped(&head.resources);

                inner.allocations.insert(
                    head.key(),
                    AllocationEntry {
                        pool_id: pool_id.clone(),
                        resources: head.resources,
                        priority: head.priority,
                        start_time_ms: head.submit_time_ms,
                    },
                );
                debug!(task = %head.key(), pool = %pool_id, "task admitted");
                admitted.push(head);
            }
        }
        admitted
    }

    /// Release a task's allocation back to its pool. The caller follows
    /// up with `try_admit` so waiting demands re-evaluate in order.
    pub fn release(&self, key: &TaskKey) -> Option<AllocationEntry> {
        let mut inner = self.inner.write().unwrap();
        let entry = inner.allocations.remove(key);
        if let Some(entry) = &entry {
            debug!(task = %key, pool = %entry.pool_id, "allocation released");
        }
        entry
    }

    /// Return an admitted-but-unplaceable demand to the admission queue,
    /// releasing its allocation.
    pub fn requeue(&self, demand: TaskDemand) -> RespoolResult<()> {
        let _ = self.release(&demand.key());
        info!(task = %demand.key(), "demand returned to admission queue");
        self.enqueue(demand)
    }

    /// Restore an allocation during startup recovery.
    pub fn restore_allocation(&self, key: TaskKey, entry: AllocationEntry) {
        let mut inner = self.inner.write().unwrap();
        inner.allocations.insert(key, entry);
    }

    /// Record the actual start time of a running task for the preemption
    /// tie-break.
    pub fn note_started(&self, key: &TaskKey, start_time_ms: u64) {
        let mut inner = self.inner.write().unwrap();
        if let Some(entry) = inner.allocations.get_mut(key) {
            entry.start_time_ms = start_time_ms;
        }
    }

    pub fn allocation_entry(&self, key: &TaskKey) -> Option<AllocationEntry> {
        self.inner.read().unwrap().allocations.get(key).cloned()
    }

    /// Select preemption victims: for every pool whose demand plus
    /// allocation exceeds its entitlement while the pool sits above its
    /// reservation, pick tasks above the reservation, lowest priority
    /// first, ties broken by latest start. Pools at or below reservation
    /// are never preempted.
    pub fn preemption_victims(&self) -> Vec<PreemptionVictim> {
        let mut inner = self.inner.write().unwrap();
        inner.refresh();

        let mut victims = Vec::new();
        for pool_id in inner.tree.pool_ids() {
            let node = inner.tree.get(&pool_id).unwrap();
            let pressure = (node.allocation + node.demand).subtract_clamped(&node.entitlement);
            let above_reservation = node.allocation.subtract_clamped(&node.config.reservation);
            let need = pressure.min(&above_reservation);
            if need.is_empty() {
                continue;
            }

            let mut candidates: Vec<(&TaskKey, &AllocationEntry)> = inner
                .allocations
                .iter()
                .filter(|(_, e)| e.pool_id == pool_id)
                .collect();
            candidates.sort_by(|a, b| {
                a.1.priority
                    .cmp(&b.1.priority)
                    .then(b.1.start_time_ms.cmp(&a.1.start_time_ms))
                    .then(a.0.to_string().cmp(&b.0.to_string()))
            });

            let mut freed = ResourceVector::zero();
            for (key, entry) in candidates {
                if need.subtract_clamped(&freed).is_empty() {
                    break;
                }
                freed += entry.resources;
                victims.push(PreemptionVictim {
                    key: (*key).clone(),
                    pool_id: pool_id.clone(),
                    priority: entry.priority,
                    resources: entry.resources,
                });
            }
        }

        if !victims.is_empty() {
            info!(count = victims.len(), "preemption victims selected");
        }
        victims
    }

    // ── Introspection (stats and tests) ────────────────────────────

    pub fn entitlement_of(&self, pool_id: &str) -> Option<ResourceVector> {
        self.inner
            .read()
            .unwrap()
            .tree
            .get(pool_id)
            .map(|n| n.entitlement)
    }

    pub fn allocation_of(&self, pool_id: &str) -> ResourceVector {
        let inner = self.inner.read().unwrap();
        let mut total = ResourceVector::zero();
        for entry in inner.allocations.values() {
            if entry.pool_id == pool_id {
                total += entry.resources;
            }
        }
        total
    }

    pub fn queue_len(&self, pool_id: &str) -> usize {
        self.inner
            .read()
            .unwrap()
            .queues
            .get(pool_id)
            .map(Vec::len)
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use peloton_core::PlacementConstraints;
    use peloton_state::PoolPolicy;

    fn pool(id: &str, reservation: f64, limit: f64) -> ResourcePoolConfig {
        ResourcePoolConfig {
            id: id.to_string(),
            parent: None,
            reservation: ResourceVector::new(reservation, 0.0),
            limit: ResourceVector::new(limit, f64::MAX),
            share: 1.0,
            policy: PoolPolicy::Fair,
        }
    }

    fn demand(job: &str, instance: u32, pool: &str, cpu: f64, priority: u32) -> TaskDemand {
        TaskDemand {
            job_id: job.to_string(),
            instance_id: instance,
            pool_id: pool.to_string(),
            priority,
            resources: ResourceVector::new(cpu, 0.0),
            num_ports: 0,
            constraints: PlacementConstraints::default(),
            submit_time_ms: 1000 + u64::from(instance),
        }
    }

    fn engine_with(pools: Vec<ResourcePoolConfig>, capacity_cpu: f64) -> RespoolEngine {
        let engine = RespoolEngine::new(pools).unwrap();
        engine.set_cluster_capacity(ResourceVector::new(capacity_cpu, 0.0));
        engine
    }

    #[test]
    fn admits_within_entitlement() {
        let engine = engine_with(vec![pool("p", 0.0, 100.0)], 10.0);

        engine.enqueue(demand("job", 0, "p", 4.0, 5)).unwrap();
        engine.enqueue(demand("job", 1, "p", 4.0, 5)).unwrap();
        engine.enqueue(demand("job", 2, "p", 4.0, 5)).unwrap();

        let admitted = engine.try_admit();
        // 4 + 4 fits in 10; the third stays queued head-of-line.
        assert_eq!(admitted.len(), 2);
        assert_eq!(engine.queue_len("p"), 1);
        assert_eq!(engine.allocation_of("p").cpu, 8.0);
    }

    #[test]
    fn enqueue_unknown_pool_fails() {
        let engine = engine_with(vec![pool("p", 0.0, 100.0)], 10.0);
        assert!(matches!(
            engine.enqueue(demand("job", 0, "ghost", 1.0, 5)),
            Err(RespoolError::UnknownPool(_))
        ));
    }

    #[test]
    fn priority_orders_the_queue_then_fifo() {
        let engine = engine_with(vec![pool("p", 0.0, 100.0)], 4.0);

        engine.enqueue(demand("low", 0, "p", 4.0, 1)).unwrap();
        engine.enqueue(demand("high", 0, "p", 4.0, 9)).unwrap();
        engine.enqueue(demand("high", 1, "p", 4.0, 9)).unwrap();

        // Only one 4-cpu task fits; the high-priority one wins despite
        // arriving later.
        let admitted = engine.try_admit();
        assert_eq!(admitted.len(), 1);
        assert_eq!(admitted[0].job_id, "high");
        assert_eq!(admitted[0].instance_id, 0);
    }

    #[test]
    fn release_readmits_in_order() {
        let engine = engine_with(vec![pool("p", 0.0, 100.0)], 4.0);

        engine.enqueue(demand("a", 0, "p", 4.0, 5)).unwrap();
        engine.enqueue(demand("b", 0, "p", 4.0, 5)).unwrap();

        let first = engine.try_admit();
        assert_eq!(first.len(), 1);
        assert_eq!(first[0].job_id, "a");
        assert!(engine.try_admit().is_empty());

        engine.release(&TaskKey::new("a", 0)).unwrap();
        let second = engine.try_admit();
        assert_eq!(second.len(), 1);
        assert_eq!(second[0].job_id, "b");
    }

    #[test]
    fn head_of_line_blocks_smaller_tasks() {
        let engine = engine_with(vec![pool("p", 0.0, 100.0)], 4.0);

        engine.enqueue(demand("wide", 0, "p", 10.0, 9)).unwrap();
        engine.enqueue(demand("narrow", 0, "p", 1.0, 1)).unwrap();

        // The wide head cannot admit, so nothing behind it does either.
        assert!(engine.try_admit().is_empty());
        assert_eq!(engine.queue_len("p"), 2);
    }

    #[test]
    fn remove_queued_demand() {
        let engine = engine_with(vec![pool("p", 0.0, 100.0)], 10.0);
        engine.enqueue(demand("a", 0, "p", 4.0, 5)).unwrap();

        assert!(engine.remove_queued(&TaskKey::new("a", 0)));
        assert!(!engine.remove_queued(&TaskKey::new("a", 0)));
        assert_eq!(engine.queue_len("p"), 0);
    }

    #[test]
    fn requeue_releases_and_queues() {
        let engine = engine_with(vec![pool("p", 0.0, 100.0)], 10.0);
        engine.enqueue(demand("a", 0, "p", 4.0, 5)).unwrap();
        let admitted = engine.try_admit();

        engine.requeue(admitted[0].clone()).unwrap();
        assert_eq!(engine.allocation_of("p").cpu, 0.0);
        assert_eq!(engine.queue_len("p"), 1);
    }

    /// Preemption scenario: two pools reserving 10 cpu each on a 20-cpu
    /// cluster. P1 holds 15 cpu of priority-3 tasks; P2 files 10 cpu of
    /// priority-5 demand. Exactly 5 cpu of P1's latest-started tasks are
    /// selected.
    #[test]
    fn preemption_selects_latest_started_lowest_priority() {
        let engine = engine_with(vec![pool("p1", 10.0, 100.0), pool("p2", 10.0, 100.0)], 20.0);

        // P1 currently holds three 5-cpu tasks started at t=100, 200, 300.
        for (i, started) in [(0u32, 100u64), (1, 200), (2, 300)] {
            engine.restore_allocation(
                TaskKey::new("p1-job", i),
                AllocationEntry {
                    pool_id: "p1".to_string(),
                    resources: ResourceVector::new(5.0, 0.0),
                    priority: 3,
                    start_time_ms: started,
                },
            );
        }

        // P2 wants 10 cpu at priority 5.
        engine.enqueue(demand("p2-job", 0, "p2", 5.0, 5)).unwrap();
        engine.enqueue(demand("p2-job", 1, "p2", 5.0, 5)).unwrap();

        let victims = engine.preemption_victims();
        assert_eq!(victims.len(), 1, "exactly 5 cpu above entitlement");
        // The latest-started task (t=300) goes first.
        assert_eq!(victims[0].key, TaskKey::new("p1-job", 2));
        assert_eq!(victims[0].resources.cpu, 5.0);

        // After the victim terminates and releases, P2 admits.
        engine.release(&TaskKey::new("p1-job", 2)).unwrap();
        let admitted = engine.try_admit();
        assert_eq!(admitted.len(), 2);
        assert!(admitted.iter().all(|d| d.job_id == "p2-job"));
    }

    #[test]
    fn no_preemption_at_or_below_reservation() {
        let engine = engine_with(vec![pool("p1", 10.0, 100.0), pool("p2", 10.0, 100.0)], 20.0);

        // P1 holds exactly its reservation.
        for i in 0..2u32 {
            engine.restore_allocation(
                TaskKey::new("p1-job", i),
                AllocationEntry {
                    pool_id: "p1".to_string(),
                    resources: ResourceVector::new(5.0, 0.0),
                    priority: 1,
                    start_time_ms: 100,
                },
            );
        }
        engine.enqueue(demand("p2-job", 0, "p2", 10.0, 9)).unwrap();

        assert!(engine.preemption_victims().is_empty());
    }

    #[test]
    fn allocation_never_exceeds_entitlement() {
        // Admitted allocation per pool must stay within the pool's
        // entitlement after any admission pass.
        let engine = engine_with(vec![pool("a", 0.0, 100.0), pool("b", 0.0, 100.0)], 10.0);

        for i in 0..20u32 {
            engine.enqueue(demand("ja", i, "a", 1.0, 5)).unwrap();
            engine.enqueue(demand("jb", i, "b", 1.0, 5)).unwrap();
        }
        engine.try_admit();

        for pool_id in ["a", "b"] {
            let allocation = engine.allocation_of(pool_id);
            let entitlement = engine.entitlement_of(pool_id).unwrap();
            assert!(
                allocation.fits_within(&entitlement),
                "pool {pool_id}: allocation {allocation} exceeds entitlement {entitlement}"
            );
        }
    }
}
