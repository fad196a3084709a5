//! The placement round runner.
//!
//! A round fires when offers arrive, when demand is admitted, or on the
//! periodic sweep interval. Each round freezes a snapshot of claimable
//! offers and ready demands, matches them, claims offers for successful
//! matches, and hands launch plans to the job manager's launcher. A
//! rescind that lands between snapshot and claim simply fails the claim;
//! the affected tasks return to the ready set for the next round.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::{mpsc, watch, Notify};
use tracing::{debug, info, warn};

use peloton_core::TaskDemand;
use peloton_offers::OfferPool;

use crate::placer::{aggregate_agents, plan_round, PlannedAssignment, ScoringWeights};
use crate::plan::{Assignment, LaunchPlan, PlacementOutcome};

#[derive(Debug, Clone)]
struct ReadyTask {
    demand: TaskDemand,
    retries: u32,
}

pub struct PlacementEngine {
    pool: Arc<OfferPool>,
    outcomes: mpsc::Sender<PlacementOutcome>,
    weights: ScoringWeights,
    round_interval: Duration,
    max_retries: u32,
    ready: Mutex<Vec<ReadyTask>>,
    demand_notify: Notify,
    plan_seq: AtomicU64,
}

impl PlacementEngine {
    pub fn new(
        pool: Arc<OfferPool>,
        outcomes: mpsc::Sender<PlacementOutcome>,
        weights: ScoringWeights,
        round_interval: Duration,
        max_retries: u32,
    ) -> Self {
        Self {
            pool,
            outcomes,
            weights,
            round_interval,
            max_retries,
            ready: Mutex::new(Vec::new()),
            demand_notify: Notify::new(),
            plan_seq: AtomicU64::new(1),
        }
    }

    /// Hand a newly admitted demand to the engine.
    pub fn add_ready(&self, demand: TaskDemand) {
        self.ready.lock().unwrap().push(ReadyTask { demand, retries: 0 });
        self.demand_notify.notify_one();
    }

    /// Return a demand whose launch was rolled back (rescind race or
    /// failed ACCEPT); it stays admitted and retries next round.
    pub fn return_ready(&self, demand: TaskDemand) {
        self.ready.lock().unwrap().push(ReadyTask { demand, retries: 0 });
        self.demand_notify.notify_one();
    }

    /// Drop a ready demand (task killed while awaiting placement).
    /// Returns true if it was in the ready set.
    pub fn remove_ready(&self, job_id: &str, instance_id: u32) -> bool {
        let mut ready = self.ready.lock().unwrap();
        let before = ready.len();
        ready.retain(|t| !(t.demand.job_id == job_id && t.demand.instance_id == instance_id));
        ready.len() != before
    }

    pub fn ready_count(&self) -> usize {
        self.ready.lock().unwrap().len()
    }

    /// Run rounds until shutdown.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        info!(interval = ?self.round_interval, "placement engine started");
        loop {
            tokio::select! {
                _ = self.pool.wait_for_offers() => self.run_round().await,
                _ = self.demand_notify.notified() => self.run_round().await,
                _ = tokio::time::sleep(self.round_interval) => self.run_round().await,
                _ = shutdown.changed() => {
                    debug!("placement engine shutting down");
                    break;
                }
            }
        }
    }

    /// One matching round over frozen snapshots.
    pub async fn run_round(&self) {
        let taken: Vec<ReadyTask> = {
            let mut ready = self.ready.lock().unwrap();
            std::mem::take(&mut *ready)
        };
        if taken.is_empty() {
            return;
        }

        let snapshot = self.pool.claimable_snapshot();
        if snapshot.is_empty() {
            // Nothing to match against; keep the demands ready.
            self.ready.lock().unwrap().extend(taken);
            return;
        }

        let mut retries: HashMap<(String, u32), u32> = taken
            .iter()
            .map(|t| ((t.demand.job_id.clone(), t.demand.instance_id), t.retries))
            .collect();
        let demands: Vec<TaskDemand> = taken.into_iter().map(|t| t.demand).collect();

        let agents = aggregate_agents(&snapshot);
        let (assignments, unplaced) = plan_round(&agents, &demands, &self.weights);
        debug!(
            matched = assignments.len(),
            unplaced = unplaced.len(),
            agents = agents.len(),
            "placement round finished"
        );

        // Group assignments per agent: one launch plan (one ACCEPT) each.
        let mut by_agent: HashMap<String, Vec<PlannedAssignment>> = HashMap::new();
        for assignment in assignments {
            by_agent
                .entry(assignment.agent_id.clone())
                .or_default()
                .push(assignment);
        }
        let mut agent_ids: Vec<String> = by_agent.keys().cloned().collect();
        agent_ids.sort();

        for agent_id in agent_ids {
            let group = by_agent.remove(&agent_id).unwrap();
            let offer_ids = agents
                .iter()
                .find(|a| a.agent_id == agent_id)
                .map(|a| a.offer_ids.clone())
                .unwrap_or_default();
            let hostname = group[0].hostname.clone();
            let plan_id = self.plan_seq.fetch_add(1, Ordering::Relaxed);

            match self.pool.claim(plan_id, &agent_id, &offer_ids) {
                Ok(_) => {
                    let plan = LaunchPlan {
                        plan_id,
                        agent_id,
                        hostname,
                        offer_ids,
                        assignments: group
                            .into_iter()
                            .map(|a| Assignment {
                                demand: a.demand,
                                ports: a.ports,
                            })
                            .collect(),
                    };
                    if self.outcomes.send(PlacementOutcome::Plan(plan)).await.is_err() {
                        warn!("launcher channel closed, dropping plan");
                    }
                }
                Err(e) => {
                    // Offers vanished between snapshot and claim (rescind
                    // race). The tasks stay admitted and retry.
                    warn!(%agent_id, error = %e, "claim failed, returning tasks to ready set");
                    let mut ready = self.ready.lock().unwrap();
                    for assignment in group {
                        let key = (
                            assignment.demand.job_id.clone(),
                            assignment.demand.instance_id,
                        );
                        let prior = retries.get(&key).copied().unwrap_or(0);
                        ready.push(ReadyTask {
                            demand: assignment.demand,
                            retries: prior,
                        });
                    }
                }
            }
        }

        // Unmatched demands retry until the budget runs out, then return
        // to the admission queue.
        for demand in unplaced {
            let key = (demand.job_id.clone(), demand.instance_id);
            let attempts = retries.get(&key).copied().unwrap_or(0) + 1;
            if attempts > self.max_retries {
                info!(task = %demand.key(), attempts, "placement retries exhausted");
                if self
                    .outcomes
                    .send(PlacementOutcome::Unplaced(demand))
                    .await
                    .is_err()
                {
                    warn!("launcher channel closed, dropping unplaced demand");
                }
            } else {
                self.ready.lock().unwrap().push(ReadyTask {
                    demand,
                    retries: attempts,
                });
            }
        }
    }

    /// Roll back a plan whose launch did not happen: offers return to the
    /// pool (minus any rescinded while claimed) and the tasks re-enter
    /// the ready set.
    pub fn rollback_plan(&self, plan: LaunchPlan) {
        if let Err(e) = self.pool.rollback(plan.plan_id) {
            warn!(plan_id = plan.plan_id, error = %e, "plan rollback had no claim");
        }
        // Allocations stay held: the tasks remain admitted.
        for assignment in plan.assignments {
            self.return_ready(assignment.demand);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use peloton_core::{PlacementConstraints, ResourceVector};
    use peloton_mesos::{AgentId, Offer, OfferId, Resource};

    fn wire_offer(id: &str, agent: &str, cpu: f64, mem: f64) -> Offer {
        Offer {
            id: Some(OfferId {
                value: id.to_string(),
            }),
            agent_id: Some(AgentId {
                value: agent.to_string(),
            }),
            hostname: format!("host-{agent}"),
            resources: vec![
                Resource::scalar("cpus", cpu),
                Resource::scalar("mem", mem),
                Resource::ranges("ports", &[(31000, 31999)]),
            ],
            ..Default::default()
        }
    }

    fn demand(job: &str, instance: u32, cpu: f64, mem: f64) -> TaskDemand {
        TaskDemand {
            job_id: job.to_string(),
            instance_id: instance,
            pool_id: "p".to_string(),
            priority: 5,
            resources: ResourceVector::new(cpu, mem),
            num_ports: 0,
            constraints: PlacementConstraints::default(),
            submit_time_ms: 1000 + u64::from(instance),
        }
    }

    fn test_engine(
        pool: Arc<OfferPool>,
        max_retries: u32,
    ) -> (Arc<PlacementEngine>, mpsc::Receiver<PlacementOutcome>) {
        let (tx, rx) = mpsc::channel(64);
        let engine = Arc::new(PlacementEngine::new(
            pool,
            tx,
            ScoringWeights::default(),
            Duration::from_millis(50),
            max_retries,
        ));
        (engine, rx)
    }

    #[tokio::test]
    async fn round_emits_plan_and_claims_offers() {
        let pool = Arc::new(OfferPool::new(Duration::from_secs(300)));
        pool.add_offers(&[wire_offer("o-1", "a-1", 4.0, 4096.0)]);

        let (engine, mut rx) = test_engine(pool.clone(), 3);
        engine.add_ready(demand("t", 0, 2.0, 2048.0));
        engine.run_round().await;

        match rx.try_recv().unwrap() {
            PlacementOutcome::Plan(plan) => {
                assert_eq!(plan.agent_id, "a-1");
                assert_eq!(plan.offer_ids, vec!["o-1"]);
                assert_eq!(plan.assignments.len(), 1);
                assert!(pool.claim_valid(plan.plan_id));
            }
            other => panic!("expected a plan, got {other:?}"),
        }
        assert_eq!(pool.held_count(), 0);
        assert_eq!(engine.ready_count(), 0);
    }

    #[tokio::test]
    async fn no_offers_keeps_demands_ready() {
        let pool = Arc::new(OfferPool::new(Duration::from_secs(300)));
        let (engine, mut rx) = test_engine(pool, 3);

        engine.add_ready(demand("t", 0, 2.0, 2048.0));
        engine.run_round().await;

        assert!(rx.try_recv().is_err());
        assert_eq!(engine.ready_count(), 1);
    }

    #[tokio::test]
    async fn unplaced_demand_returns_to_admission_after_retries() {
        let pool = Arc::new(OfferPool::new(Duration::from_secs(300)));
        // An offer too small for the demand, so rounds run but never match.
        pool.add_offers(&[wire_offer("o-1", "a-1", 1.0, 512.0)]);

        let (engine, mut rx) = test_engine(pool, 2);
        engine.add_ready(demand("t", 0, 8.0, 8192.0));

        // Budget is 2 retries; the third failed round gives up.
        engine.run_round().await;
        engine.run_round().await;
        assert_eq!(engine.ready_count(), 1);
        engine.run_round().await;

        match rx.try_recv().unwrap() {
            PlacementOutcome::Unplaced(demand) => assert_eq!(demand.job_id, "t"),
            other => panic!("expected unplaced, got {other:?}"),
        }
        assert_eq!(engine.ready_count(), 0);
    }

    /// Rescind race: the offer disappears after the snapshot would have
    /// been taken. The claim fails, no plan is emitted, and the task
    /// remains admitted-ready.
    #[tokio::test]
    async fn rescinded_claim_returns_tasks_to_ready() {
        let pool = Arc::new(OfferPool::new(Duration::from_secs(300)));
        pool.add_offers(&[wire_offer("o-2", "a-1", 4.0, 4096.0)]);

        let (engine, mut rx) = test_engine(pool.clone(), 3);
        engine.add_ready(demand("t", 0, 2.0, 2048.0));

        // Claim then invalidate via rescind, as the master would mid-round.
        let plan = {
            engine.run_round().await;
            match rx.try_recv().unwrap() {
                PlacementOutcome::Plan(plan) => plan,
                other => panic!("expected plan, got {other:?}"),
            }
        };
        assert_eq!(
            pool.rescind("o-2"),
            peloton_offers::RescindOutcome::InvalidatedClaim(plan.plan_id)
        );
        assert!(!pool.claim_valid(plan.plan_id));

        // The launcher sees the invalid claim and rolls the plan back.
        engine.rollback_plan(plan);
        assert_eq!(engine.ready_count(), 1);
        // The rescinded offer is gone for good: nothing to claim.
        assert_eq!(pool.held_count(), 0);
    }

    #[tokio::test]
    async fn remove_ready_drops_demand() {
        let pool = Arc::new(OfferPool::new(Duration::from_secs(300)));
        let (engine, _rx) = test_engine(pool, 3);

        engine.add_ready(demand("t", 0, 1.0, 512.0));
        assert!(engine.remove_ready("t", 0));
        assert!(!engine.remove_ready("t", 0));
        assert_eq!(engine.ready_count(), 0);
    }

    #[tokio::test]
    async fn run_loop_honors_shutdown() {
        let pool = Arc::new(OfferPool::new(Duration::from_secs(300)));
        let (engine, _rx) = test_engine(pool, 3);

        let (tx, rx) = watch::channel(false);
        let handle = tokio::spawn(engine.run(rx));
        tx.send(true).unwrap();

        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("engine should stop on shutdown")
            .unwrap();
    }
}
