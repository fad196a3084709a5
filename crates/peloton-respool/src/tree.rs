//! The resource-pool tree.
//!
//! Pools form a tree under a virtual root whose limit equals the cluster
//! capacity. `parent = None` in a pool definition attaches it directly
//! under the root.

use std::collections::HashMap;

use peloton_core::ResourceVector;
use peloton_state::{PoolPolicy, ResourcePoolConfig};

use crate::error::{RespoolError, RespoolResult};

/// Id of the virtual root node.
pub const ROOT_POOL: &str = "root";

#[derive(Debug, Clone)]
pub struct PoolNode {
    pub config: ResourcePoolConfig,
    pub children: Vec<String>,
    /// Derived: current admissible ceiling, recomputed on every change to
    /// demand, allocation or capacity.
    pub entitlement: ResourceVector,
    /// Sum of admitted task demands charged to this pool.
    pub allocation: ResourceVector,
    /// Sum of queued (pending-admission) demands in this pool.
    pub demand: ResourceVector,
}

impl PoolNode {
    fn new(config: ResourcePoolConfig) -> Self {
        Self {
            config,
            children: Vec::new(),
            entitlement: ResourceVector::zero(),
            allocation: ResourceVector::zero(),
            demand: ResourceVector::zero(),
        }
    }
}

#[derive(Debug)]
pub struct PoolTree {
    nodes: HashMap<String, PoolNode>,
}

impl PoolTree {
    /// Build and validate a tree from pool definitions.
    pub fn build(configs: Vec<ResourcePoolConfig>) -> RespoolResult<Self> {
        let mut nodes = HashMap::new();
        nodes.insert(
            ROOT_POOL.to_string(),
            PoolNode::new(ResourcePoolConfig {
                id: ROOT_POOL.to_string(),
                parent: None,
                reservation: ResourceVector::zero(),
                limit: ResourceVector::zero(),
                share: 1.0,
                policy: PoolPolicy::Fair,
            }),
        );

        for config in configs {
            if config.id == ROOT_POOL {
                return Err(RespoolError::ReservedId(config.id));
            }
            if !config.reservation.fits_within(&config.limit) {
                return Err(RespoolError::ReservationExceedsLimit(config.id));
            }
            if nodes.contains_key(&config.id) {
                return Err(RespoolError::DuplicatePool(config.id));
            }
            nodes.insert(config.id.clone(), PoolNode::new(config));
        }

        // Link children after all nodes exist so definition order is free.
        let ids: Vec<String> = nodes.keys().cloned().collect();
        for id in &ids {
            if id == ROOT_POOL {
                continue;
            }
            let parent = nodes[id]
                .config
                .parent
                .clone()
                .unwrap_or_else(|| ROOT_POOL.to_string());
            match nodes.get_mut(&parent) {
                Some(node) => node.children.push(id.clone()),
                None => {
                    return Err(RespoolError::MissingParent {
                        pool: id.clone(),
                        parent,
                    })
                }
            }
        }
        for node in nodes.values_mut() {
            node.children.sort();
        }

        let tree = Self { nodes };
        tree.validate()?;
        Ok(tree)
    }

    fn validate(&self) -> RespoolResult<()> {
        // Every node must be reachable from the root: anything else is a
        // cycle among non-root nodes.
        let mut seen = vec![ROOT_POOL.to_string()];
        let mut frontier = vec![ROOT_POOL.to_string()];
        while let Some(id) = frontier.pop() {
            for child in &self.nodes[&id].children {
                seen.push(child.clone());
                frontier.push(child.clone());
            }
        }
        if seen.len() != self.nodes.len() {
            let unreachable = self
                .nodes
                .keys()
                .find(|id| !seen.contains(id))
                .cloned()
                .unwrap_or_default();
            return Err(RespoolError::Unreachable(unreachable));
        }

        // Children's reservations must fit inside the parent's.
        for (id, node) in &self.nodes {
            if id == ROOT_POOL || node.children.is_empty() {
                continue;
            }
            let mut child_sum = ResourceVector::zero();
            for child in &node.children {
                child_sum += self.nodes[child].config.reservation;
            }
            if !child_sum.fits_within(&node.config.reservation) {
                return Err(RespoolError::ChildReservationsExceedParent(id.clone()));
            }
        }
        Ok(())
    }

    pub fn contains(&self, pool_id: &str) -> bool {
        self.nodes.contains_key(pool_id)
    }

    pub fn get(&self, pool_id: &str) -> Option<&PoolNode> {
        self.nodes.get(pool_id)
    }

    pub fn get_mut(&mut self, pool_id: &str) -> Option<&mut PoolNode> {
        self.nodes.get_mut(pool_id)
    }

    /// All pool ids except the root, sorted for deterministic iteration.
    pub fn pool_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .nodes
            .keys()
            .filter(|id| id.as_str() != ROOT_POOL)
            .cloned()
            .collect();
        ids.sort();
        ids
    }

    pub(crate) fn children_of(&self, pool_id: &str) -> &[String] {
        self.nodes
            .get(pool_id)
            .map(|n| n.children.as_slice())
            .unwrap_or(&[])
    }

    /// Clear all demand/allocation aggregates before re-accumulating.
    pub(crate) fn reset_usage(&mut self) {
        for node in self.nodes.values_mut() {
            node.allocation = ResourceVector::zero();
            node.demand = ResourceVector::zero();
        }
    }
}
