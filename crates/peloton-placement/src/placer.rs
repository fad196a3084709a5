//! Pure matching logic for one placement round.
//!
//! Demands are grouped by placement group and walked in priority order;
//! agents pass hard constraints first, then a weighted pack-vs-spread
//! score picks among the survivors. Iteration orders are deterministic:
//! demands by `(priority desc, submit_time asc, job_id, instance_id)`,
//! agents by `(agent_id, offer_id)`.

use std::collections::{HashMap, HashSet};

use tracing::debug;

use peloton_core::resources::EPSILON;
use peloton_core::{ResourceVector, TaskDemand};
use peloton_offers::AgentOffers;

/// Aggregated view of one agent's claimable offers for a round.
#[derive(Debug, Clone)]
pub struct AgentSnapshot {
    pub agent_id: String,
    pub hostname: String,
    pub offer_ids: Vec<String>,
    pub resources: ResourceVector,
    pub ports: Vec<(u64, u64)>,
    pub attributes: HashMap<String, String>,
}

/// Weights for the soft scoring: pack prefers filling agents, spread
/// prefers leaving them even.
#[derive(Debug, Clone)]
pub struct ScoringWeights {
    pub pack: f64,
    pub spread: f64,
}

impl Default for ScoringWeights {
    fn default() -> Self {
        Self {
            pack: 0.7,
            spread: 0.3,
        }
    }
}

/// One matched task.
#[derive(Debug, Clone)]
pub struct PlannedAssignment {
    pub demand: TaskDemand,
    pub agent_id: String,
    pub hostname: String,
    pub ports: Vec<u64>,
}

/// Merge each agent's offers into a single capacity view, preserving the
/// `(agent_id, offer_id)` order of the snapshot.
pub fn aggregate_agents(snapshot: &[AgentOffers]) -> Vec<AgentSnapshot> {
    snapshot
        .iter()
        .map(|agent| {
            let mut resources = ResourceVector::zero();
            let mut ports = Vec::new();
            let mut attributes = HashMap::new();
            let mut offer_ids = Vec::new();
            for offer in &agent.offers {
                resources += offer.resources;
                ports.extend(offer.ports.iter().copied());
                attributes.extend(offer.attributes.clone());
                offer_ids.push(offer.id.clone());
            }
            ports.sort();
            AgentSnapshot {
                agent_id: agent.agent_id.clone(),
                hostname: agent.hostname.clone(),
                offer_ids,
                resources,
                ports,
                attributes,
            }
        })
        .collect()
}

struct AgentState {
    snapshot: AgentSnapshot,
    remaining: ResourceVector,
    free_ports: Vec<(u64, u64)>,
    total: ResourceVector,
}

/// Match demands onto agents. Returns `(assignments, unplaced)`.
pub fn plan_round(
    agents: &[AgentSnapshot],
    demands: &[TaskDemand],
    weights: &ScoringWeights,
) -> (Vec<PlannedAssignment>, Vec<TaskDemand>) {
    let mut states: Vec<AgentState> = agents
        .iter()
        .map(|snapshot| AgentState {
            remaining: snapshot.resources,
            free_ports: snapshot.ports.clone(),
            total: snapshot.resources,
            snapshot: snapshot.clone(),
        })
        .collect();

    // Deterministic demand order.
    let mut ordered: Vec<&TaskDemand> = demands.iter().collect();
    ordered.sort_by(|a, b| {
        b.priority
            .cmp(&a.priority)
            .then(a.submit_time_ms.cmp(&b.submit_time_ms))
            .then(a.job_id.cmp(&b.job_id))
            .then(a.instance_id.cmp(&b.instance_id))
    });

    // Group by placement group, first-appearance order within the sorted
    // sequence, so a whole group bin-packs together.
    let mut group_order: Vec<String> = Vec::new();
    let mut groups: HashMap<String, Vec<&TaskDemand>> = HashMap::new();
    for demand in ordered {
        let group = demand.placement_group();
        if !groups.contains_key(&group) {
            group_order.push(group.clone());
        }
        groups.entry(group).or_default().push(demand);
    }

    let mut assignments = Vec::new();
    let mut unplaced = Vec::new();
    // Hosts used per anti-affinity group, in this round and tracked
    // forward through it.
    let mut group_hosts: HashMap<String, HashSet<String>> = HashMap::new();

    for group in group_order {
        for demand in groups.remove(&group).unwrap() {
            let used_hosts = demand
                .constraints
                .anti_affinity_group
                .as_ref()
                .map(|_| group_hosts.entry(group.clone()).or_default().clone())
                .unwrap_or_default();

            let best = states
                .iter()
                .enumerate()
                .filter(|(_, state)| feasible(state, demand, &used_hosts))
                .map(|(idx, state)| (idx, score(state, demand, weights)))
                .max_by(|(ia, sa), (ib, sb)| {
                    sa.partial_cmp(sb)
                        .unwrap_or(std::cmp::Ordering::Equal)
                        // Stable tie-break: lower agent id wins.
                        .then_with(|| {
                            states[*ib]
                                .snapshot
                                .agent_id
                                .cmp(&states[*ia].snapshot.agent_id)
                        })
                });

            match best {
                Some((idx, _)) => {
                    let state = &mut states[idx];
                    // Feasibility already verified port availability.
                    let Some(ports) = take_ports(&mut state.free_ports, demand.num_ports) else {
                        unplaced.push(demand.clone());
                        continue;
                    };
                    state.remaining = state.remaining.subtract_clamped(&demand.resources);
                    if demand.constraints.anti_affinity_group.is_some() {
                        group_hosts
                            .entry(group.clone())
                            .or_default()
                            .insert(state.snapshot.hostname.clone());
                    }
                    debug!(
                        task = %demand.key(),
                        agent = %state.snapshot.agent_id,
                        "demand matched"
                    );
                    assignments.push(PlannedAssignment {
                        demand: demand.clone(),
                        agent_id: state.snapshot.agent_id.clone(),
                        hostname: state.snapshot.hostname.clone(),
                        ports,
                    });
                }
                None => unplaced.push(demand.clone()),
            }
        }
    }

    (assignments, unplaced)
}

fn feasible(state: &AgentState, demand: &TaskDemand, used_hosts: &HashSet<String>) -> bool {
    let constraints = &demand.constraints;
    let hostname = &state.snapshot.hostname;

    if let Some(required) = &constraints.required_host {
        if required != hostname {
            return false;
        }
    }
    if constraints.avoid_hosts.iter().any(|h| h == hostname) {
        return false;
    }
    if constraints.anti_affinity_group.is_some() && used_hosts.contains(hostname) {
        return false;
    }
    if constraints.requires_gpu && state.snapshot.resources.gpu < EPSILON {
        return false;
    }
    for (key, value) in &constraints.required_attributes {
        if state.snapshot.attributes.get(key) != Some(value) {
            return false;
        }
    }
    if !demand.resources.fits_within(&state.remaining) {
        return false;
    }
    available_ports(&state.free_ports) >= u64::from(demand.num_ports)
}

/// Weighted pack-vs-spread score over the agent's post-assignment
/// utilization.
fn score(state: &AgentState, demand: &TaskDemand, weights: &ScoringWeights) -> f64 {
    let after = state.remaining.subtract_clamped(&demand.resources);
    let used = state.total.subtract_clamped(&after);
    let utilization = used.dominant_share(&state.total);
    weights.pack * utilization * 100.0 + weights.spread * (1.0 - utilization) * 100.0
}

fn available_ports(ranges: &[(u64, u64)]) -> u64 {
    ranges.iter().map(|(b, e)| e.saturating_sub(*b) + 1).sum()
}

/// Take `n` concrete ports from the front of the free ranges.
fn take_ports(ranges: &mut Vec<(u64, u64)>, n: u32) -> Option<Vec<u64>> {
    let mut taken = Vec::with_capacity(n as usize);
    while taken.len() < n as usize {
        let (begin, end) = *ranges.first()?;
        taken.push(begin);
        if begin == end {
            ranges.remove(0);
        } else {
            ranges[0] = (begin + 1, end);
        }
    }
    Some(taken)
}

#[cfg(test)]
mod tests {
    use super::*;
    use peloton_core::PlacementConstraints;

    fn agent(id: &str, cpu: f64, mem: f64) -> AgentSnapshot {
        AgentSnapshot {
            agent_id: id.to_string(),
            hostname: format!("host-{id}"),
            offer_ids: vec![format!("offer-{id}")],
            resources: ResourceVector::new(cpu, mem),
            ports: vec![(31000, 31999)],
            attributes: HashMap::new(),
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

    /// Offer-match scenario: a 4-cpu/4Gi offer takes a 2-cpu/2Gi task in
    /// one round; a 1-cpu offer takes nothing and the task stays ready.
    #[test]
    fn matches_when_resources_fit() {
        let agents = [agent("a1", 4.0, 4096.0)];
        let demands = [demand("t", 1, 2.0, 2048.0)];

        let (assignments, unplaced) = plan_round(&agents, &demands, &ScoringWeights::default());
        assert_eq!(assignments.len(), 1);
        assert_eq!(assignments[0].agent_id, "a1");
        assert!(unplaced.is_empty());
    }

    #[test]
    fn too_small_offer_leaves_demand_ready() {
        let agents = [agent("a1", 1.0, 4096.0)];
        let demands = [demand("t", 1, 2.0, 2048.0)];

        let (assignments, unplaced) = plan_round(&agents, &demands, &ScoringWeights::default());
        assert!(assignments.is_empty());
        assert_eq!(unplaced.len(), 1);
        assert_eq!(unplaced[0].job_id, "t");
    }

    #[test]
    fn priority_order_wins_contention() {
        let agents = [agent("a1", 2.0, 2048.0)];
        let mut low = demand("low", 0, 2.0, 2048.0);
        low.priority = 1;
        low.submit_time_ms = 1; // Earlier submit must not beat priority.
        let mut high = demand("high", 0, 2.0, 2048.0);
        high.priority = 9;
        high.submit_time_ms = 2;

        let (assignments, unplaced) =
            plan_round(&agents, &[low, high], &ScoringWeights::default());
        assert_eq!(assignments.len(), 1);
        assert_eq!(assignments[0].demand.job_id, "high");
        assert_eq!(unplaced[0].job_id, "low");
    }

    #[test]
    fn pack_weights_fill_one_agent_first() {
        let mut used = agent("a1", 8.0, 8192.0);
        used.resources = ResourceVector::new(4.0, 4096.0);
        // a1 currently has 4 cpu free of 4 offered; a2 is a fresh 8-cpu
        // agent. With pure pack weighting, the smaller remainder wins.
        let fresh = agent("a2", 8.0, 8192.0);

        let weights = ScoringWeights {
            pack: 1.0,
            spread: 0.0,
        };
        let (assignments, _) =
            plan_round(&[used, fresh], &[demand("t", 0, 2.0, 2048.0)], &weights);
        assert_eq!(assignments[0].agent_id, "a1");
    }

    #[test]
    fn spread_weights_prefer_empty_agent() {
        let mut used = agent("a1", 8.0, 8192.0);
        used.resources = ResourceVector::new(4.0, 4096.0);
        let fresh = agent("a2", 8.0, 8192.0);

        let weights = ScoringWeights {
            pack: 0.0,
            spread: 1.0,
        };
        let (assignments, _) =
            plan_round(&[used, fresh], &[demand("t", 0, 2.0, 2048.0)], &weights);
        assert_eq!(assignments[0].agent_id, "a2");
    }

    #[test]
    fn required_host_is_hard() {
        let agents = [agent("a1", 8.0, 8192.0), agent("a2", 8.0, 8192.0)];
        let mut d = demand("t", 0, 1.0, 512.0);
        d.constraints.required_host = Some("host-a2".to_string());

        let (assignments, _) = plan_round(&agents, &[d], &ScoringWeights::default());
        assert_eq!(assignments[0].agent_id, "a2");
    }

    #[test]
    fn avoid_hosts_is_hard() {
        let agents = [agent("a1", 8.0, 8192.0)];
        let mut d = demand("t", 0, 1.0, 512.0);
        d.constraints.avoid_hosts = vec!["host-a1".to_string()];

        let (assignments, unplaced) = plan_round(&agents, &[d], &ScoringWeights::default());
        assert!(assignments.is_empty());
        assert_eq!(unplaced.len(), 1);
    }

    #[test]
    fn gpu_requirement_filters_agents() {
        let plain = agent("a1", 8.0, 8192.0);
        let mut gpu = agent("a2", 8.0, 8192.0);
        gpu.resources.gpu = 2.0;

        let mut d = demand("t", 0, 1.0, 512.0);
        d.constraints.requires_gpu = true;
        d.resources.gpu = 1.0;

        let (assignments, _) = plan_round(&[plain, gpu], &[d], &ScoringWeights::default());
        assert_eq!(assignments[0].agent_id, "a2");
    }

    #[test]
    fn attribute_match_is_exact() {
        let mut r1 = agent("a1", 8.0, 8192.0);
        r1.attributes.insert("rack".to_string(), "r1".to_string());
        let mut r2 = agent("a2", 8.0, 8192.0);
        r2.attributes.insert("rack".to_string(), "r2".to_string());

        let mut d = demand("t", 0, 1.0, 512.0);
        d.constraints
            .required_attributes
            .insert("rack".to_string(), "r2".to_string());

        let (assignments, _) = plan_round(&[r1, r2], &[d], &ScoringWeights::default());
        assert_eq!(assignments[0].agent_id, "a2");
    }

    #[test]
    fn anti_affinity_spreads_group_across_hosts() {
        let agents = [agent("a1", 8.0, 8192.0), agent("a2", 8.0, 8192.0)];
        let mut demands = Vec::new();
        for i in 0..3u32 {
            let mut d = demand("web", i, 1.0, 512.0);
            d.constraints.anti_affinity_group = Some("ha".to_string());
            demands.push(d);
        }

        let (assignments, unplaced) = plan_round(&agents, &demands, &ScoringWeights::default());
        // Two hosts, three replicas wanting distinct hosts: one is left over.
        assert_eq!(assignments.len(), 2);
        assert_eq!(unplaced.len(), 1);
        let hosts: HashSet<String> = assignments.iter().map(|a| a.hostname.clone()).collect();
        assert_eq!(hosts.len(), 2);
    }

    #[test]
    fn ports_assigned_from_offered_ranges() {
        let mut a = agent("a1", 8.0, 8192.0);
        a.ports = vec![(31000, 31001), (32000, 32000)];

        let mut d = demand("t", 0, 1.0, 512.0);
        d.num_ports = 3;

        let (assignments, _) = plan_round(&[a], &[d], &ScoringWeights::default());
        assert_eq!(assignments[0].ports, vec![31000, 31001, 32000]);
    }

    #[test]
    fn insufficient_ports_blocks_placement() {
        let mut a = agent("a1", 8.0, 8192.0);
        a.ports = vec![(31000, 31000)];

        let mut d = demand("t", 0, 1.0, 512.0);
        d.num_ports = 2;

        let (assignments, unplaced) = plan_round(&[a], &[d], &ScoringWeights::default());
        assert!(assignments.is_empty());
        assert_eq!(unplaced.len(), 1);
    }

    #[test]
    fn rounds_are_deterministic() {
        let agents = [
            agent("a1", 4.0, 4096.0),
            agent("a2", 4.0, 4096.0),
            agent("a3", 4.0, 4096.0),
        ];
        let demands: Vec<TaskDemand> =
            (0..6).map(|i| demand("batch", i, 1.0, 512.0)).collect();

        let (first, _) = plan_round(&agents, &demands, &ScoringWeights::default());
        let (second, _) = plan_round(&agents, &demands, &ScoringWeights::default());

        let layout = |assignments: &[PlannedAssignment]| {
            assignments
                .iter()
                .map(|a| (a.demand.instance_id, a.agent_id.clone()))
                .collect::<Vec<_>>()
        };
        assert_eq!(layout(&first), layout(&second));
    }

    #[test]
    fn aggregation_merges_offers_per_agent() {
        use peloton_offers::HeldOffer;
        use std::time::Instant;

        let snapshot = vec![AgentOffers {
            agent_id: "a1".to_string(),
            hostname: "host-a1".to_string(),
            offers: vec![
                HeldOffer {
                    id: "o-1".to_string(),
                    agent_id: "a1".to_string(),
                    hostname: "host-a1".to_string(),
                    resources: ResourceVector::new(2.0, 2048.0),
                    ports: vec![(31000, 31004)],
                    attributes: HashMap::new(),
                    received_at: Instant::now(),
                },
                HeldOffer {
                    id: "o-2".to_string(),
                    agent_id: "a1".to_string(),
                    hostname: "host-a1".to_string(),
                    resources: ResourceVector::new(2.0, 2048.0),
                    ports: vec![(31005, 31009)],
                    attributes: HashMap::new(),
                    received_at: Instant::now(),
                },
            ],
        }];

        let agents = aggregate_agents(&snapshot);
        assert_eq!(agents.len(), 1);
        assert_eq!(agents[0].resources.cpu, 4.0);
        assert_eq!(agents[0].offer_ids, vec!["o-1", "o-2"]);
        assert_eq!(available_ports(&agents[0].ports), 10);
    }
}
