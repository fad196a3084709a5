//! Cluster capacity estimation.
//!
//! The master never states total agent capacity outright; the tracker
//! infers it per agent as the high-water mark of offered-free plus
//! known-in-use resources, and feeds the sum to the pool tree as the
//! virtual root's limit.

use std::collections::HashMap;
use std::sync::Mutex;

use peloton_core::ResourceVector;

#[derive(Debug, Default, Clone)]
struct AgentCapacity {
    capacity: ResourceVector,
    in_use: ResourceVector,
}

#[derive(Default)]
pub struct CapacityTracker {
    agents: Mutex<HashMap<String, AgentCapacity>>,
}

impl CapacityTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an offer's free resources for an agent. Returns true when
    /// the estimated cluster capacity grew.
    pub fn observe_offer(&self, agent_id: &str, offered: ResourceVector) -> bool {
        let mut agents = self.agents.lock().unwrap();
        let entry = agents.entry(agent_id.to_string()).or_default();
        let estimate = offered + entry.in_use;
        let grown = !estimate.fits_within(&entry.capacity);
        entry.capacity = entry.capacity.max(&estimate);
        grown
    }

    /// Charge launched-task resources against an agent.
    pub fn add_usage(&self, agent_id: &str, resources: ResourceVector) {
        let mut agents = self.agents.lock().unwrap();
        let entry = agents.entry(agent_id.to_string()).or_default();
        entry.in_use += resources;
        entry.capacity = entry.capacity.max(&entry.in_use);
    }

    /// Release task resources on terminal status.
    pub fn remove_usage(&self, agent_id: &str, resources: ResourceVector) {
        let mut agents = self.agents.lock().unwrap();
        if let Some(entry) = agents.get_mut(agent_id) {
            entry.in_use = entry.in_use.subtract_clamped(&resources);
        }
    }

    /// Current cluster-wide capacity estimate.
    pub fn total_capacity(&self) -> ResourceVector {
        let agents = self.agents.lock().unwrap();
        let mut total = ResourceVector::zero();
        for entry in agents.values() {
            total += entry.capacity;
        }
        total
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capacity_grows_with_offers() {
        let tracker = CapacityTracker::new();

        assert!(tracker.observe_offer("a-1", ResourceVector::new(4.0, 4096.0)));
        assert!(tracker.observe_offer("a-2", ResourceVector::new(8.0, 8192.0)));

        let total = tracker.total_capacity();
        assert_eq!(total.cpu, 12.0);
        assert_eq!(total.mem_mb, 12288.0);
    }

    #[test]
    fn smaller_offer_does_not_shrink_estimate() {
        let tracker = CapacityTracker::new();
        tracker.observe_offer("a-1", ResourceVector::new(8.0, 8192.0));

        // A partial offer while the rest is in use must not shrink capacity.
        assert!(!tracker.observe_offer("a-1", ResourceVector::new(2.0, 1024.0)));
        assert_eq!(tracker.total_capacity().cpu, 8.0);
    }

    #[test]
    fn usage_plus_offer_reveals_full_capacity() {
        let tracker = CapacityTracker::new();
        tracker.observe_offer("a-1", ResourceVector::new(8.0, 8192.0));
        tracker.add_usage("a-1", ResourceVector::new(6.0, 6144.0));

        // Agent now offers its remaining 2 cpu; estimate stays 8.
        tracker.observe_offer("a-1", ResourceVector::new(2.0, 2048.0));
        assert_eq!(tracker.total_capacity().cpu, 8.0);

        tracker.remove_usage("a-1", ResourceVector::new(6.0, 6144.0));
        assert_eq!(tracker.total_capacity().cpu, 8.0);
    }
}
