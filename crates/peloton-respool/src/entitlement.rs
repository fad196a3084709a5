//! Entitlement computation: share-weighted max-min with guaranteed
//! reservations, applied per resource dimension and recursed down the
//! tree with the parent's entitlement as the ceiling.
//!
//! Each pool is entitled to at least its reservation; the surplus above
//! sibling reservations is water-filled toward unmet demand in proportion
//! to `share`, capped by each pool's limit.

use std::collections::HashMap;

use peloton_core::resources::EPSILON;
use peloton_core::ResourceVector;

use crate::tree::{PoolTree, ROOT_POOL};

/// Recompute every pool's entitlement for the given cluster capacity.
/// Demand and allocation aggregates must already be up to date on the
/// tree's nodes.
pub fn recompute(tree: &mut PoolTree, capacity: ResourceVector) {
    let desired = subtree_desired(tree);

    {
        let root = tree.get_mut(ROOT_POOL).expect("root always exists");
        root.config.limit = capacity;
        root.config.reservation = capacity;
        root.entitlement = capacity;
    }

    let mut frontier = vec![ROOT_POOL.to_string()];
    while let Some(parent_id) = frontier.pop() {
        let ceiling = tree.get(&parent_id).unwrap().entitlement;
        let children: Vec<String> = tree.children_of(&parent_id).to_vec();
        if children.is_empty() {
            continue;
        }

        for dim in Dim::ALL {
            let grants = distribute(
                dim.get(&ceiling),
                &children
                    .iter()
                    .map(|id| {
                        let node = tree.get(id).unwrap();
                        SiblingInput {
                            reservation: dim.get(&node.config.reservation),
                            desired: dim.get(&desired[id]),
                            share: node.config.share,
                        }
                    })
                    .collect::<Vec<_>>(),
            );
            for (id, grant) in children.iter().zip(grants) {
                let node = tree.get_mut(id).unwrap();
                dim.set(&mut node.entitlement, grant);
            }
        }

        frontier.extend(children);
    }
}

/// What each pool's subtree would consume if fully satisfied: at least
/// the reservation, at most the limit, tracking queued demand plus
/// current allocation in between.
fn subtree_desired(tree: &PoolTree) -> HashMap<String, ResourceVector> {
    let mut desired = HashMap::new();
    fill_desired(tree, ROOT_POOL, &mut desired);
    desired
}

fn fill_desired(
    tree: &PoolTree,
    pool_id: &str,
    out: &mut HashMap<String, ResourceVector>,
) -> ResourceVector {
    let node = tree.get(pool_id).unwrap();
    let mut wanted = node.allocation + node.demand;
    for child in tree.children_of(pool_id) {
        wanted += fill_desired(tree, child, out);
    }
    let clamped = wanted
        .max(&node.config.reservation)
        .min(&node.config.limit);
    out.insert(pool_id.to_string(), clamped);
    clamped
}

struct SiblingInput {
    reservation: f64,
    desired: f64,
    share: f64,
}

/// Water-fill `ceiling` units among siblings: reservations first, then
/// the surplus in proportion to share, never past each sibling's desired.
fn distribute(ceiling: f64, siblings: &[SiblingInput]) -> Vec<f64> {
    let mut grants: Vec<f64> = siblings.iter().map(|s| s.reservation).collect();
    let reserved: f64 = grants.iter().sum();
    let mut surplus = (ceiling - reserved).max(0.0);

    let mut active: Vec<usize> = (0..siblings.len())
        .filter(|&i| siblings[i].desired > grants[i] + EPSILON && siblings[i].share > 0.0)
        .collect();

    while surplus > EPSILON && !active.is_empty() {
        let total_share: f64 = active.iter().map(|&i| siblings[i].share).sum();
        let mut given = 0.0;
        let mut still_active = Vec::new();

        for &i in &active {
            let proposal = surplus * siblings[i].share / total_share;
            let headroom = siblings[i].desired - grants[i];
            let take = proposal.min(headroom);
            grants[i] += take;
            given += take;
            if siblings[i].desired > grants[i] + EPSILON {
                still_active.push(i);
            }
        }

        surplus -= given;
        if given <= EPSILON {
            break;
        }
        active = still_active;
    }

    grants
}

/// Per-dimension access without copying vectors around.
#[derive(Clone, Copy)]
enum Dim {
    Cpu,
    Mem,
    Disk,
    Gpu,
}

impl Dim {
    const ALL: [Dim; 4] = [Dim::Cpu, Dim::Mem, Dim::Disk, Dim::Gpu];

    fn get(&self, v: &ResourceVector) -> f64 {
        match self {
            Dim::Cpu => v.cpu,
            Dim::Mem => v.mem_mb,
            Dim::Disk => v.disk_mb,
            Dim::Gpu => v.gpu,
        }
    }

    fn set(&self, v: &mut ResourceVector, value: f64) {
        match self {
            Dim::Cpu => v.cpu = value,
            Dim::Mem => v.mem_mb = value,
            Dim::Disk => v.disk_mb = value,
            Dim::Gpu => v.gpu = value,
        }
    }
}
