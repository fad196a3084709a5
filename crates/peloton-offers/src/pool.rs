//! The offer index.
//!
//! Offers are held per agent; additions and claims on one agent are
//! linearised by that agent's mutex, so claims against different agents
//! proceed in parallel. A claim moves offers out of the claimable set
//! until the launch completes (offers consumed) or the claim is rolled
//! back (offers return, TTL restarted). A rescind that lands on a claimed
//! offer invalidates the whole in-flight claim so the placement round can
//! roll its plan back.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, Instant};

use tokio::sync::Notify;
use tracing::{debug, info, warn};

use peloton_core::ResourceVector;
use peloton_mesos::Offer;

use crate::convert::held_offer_from_wire;
use crate::error::{OfferError, OfferResult};

/// One offer as held by the pool.
#[derive(Debug, Clone)]
pub struct HeldOffer {
    pub id: String,
    pub agent_id: String,
    pub hostname: String,
    pub resources: ResourceVector,
    /// Port ranges, inclusive.
    pub ports: Vec<(u64, u64)>,
    pub attributes: HashMap<String, String>,
    pub received_at: Instant,
}

/// Snapshot of one agent's claimable offers, ordered by offer id.
#[derive(Debug, Clone)]
pub struct AgentOffers {
    pub agent_id: String,
    pub hostname: String,
    pub offers: Vec<HeldOffer>,
}

/// Result of a rescind notification.
#[derive(Debug, PartialEq, Eq)]
pub enum RescindOutcome {
    /// The offer was not known (already used, declined, or never seen).
    NotHeld,
    /// The offer was held unused and has been removed.
    RemovedHeld,
    /// The offer was inside an unfinished claim; that claim is now
    /// invalid and its plan must be rolled back.
    InvalidatedClaim(u64),
}

#[derive(Debug)]
struct AgentSlot {
    hostname: String,
    offers: HashMap<String, HeldOffer>,
}

#[derive(Debug)]
struct Claim {
    offers: Vec<HeldOffer>,
    invalidated: bool,
}

pub struct OfferPool {
    agents: RwLock<HashMap<String, Arc<Mutex<AgentSlot>>>>,
    claims: Mutex<HashMap<u64, Claim>>,
    hold_ttl: Duration,
    new_offers: Notify,
}

impl OfferPool {
    pub fn new(hold_ttl: Duration) -> Self {
        Self {
            agents: RwLock::new(HashMap::new()),
            claims: Mutex::new(HashMap::new()),
            hold_ttl,
            new_offers: Notify::new(),
        }
    }

    /// Wake when offers arrive; used by the placement round runner.
    pub async fn wait_for_offers(&self) {
        self.new_offers.notified().await;
    }

    /// Store inbound offers. Malformed offers (no id/agent) are dropped.
    /// Returns the number held.
    pub fn add_offers(&self, offers: &[Offer]) -> usize {
        let now = Instant::now();
        let mut added = 0;

        for offer in offers {
            let Some(held) = held_offer_from_wire(offer, now) else {
                warn!("dropping malformed offer without id or agent id");
                continue;
            };

            let slot = self.agent_slot(&held.agent_id, &held.hostname);
            let mut slot = slot.lock().unwrap();
            slot.hostname = held.hostname.clone();
            debug!(
                offer_id = %held.id,
                agent_id = %held.agent_id,
                resources = %held.resources,
                "offer held"
            );
            slot.offers.insert(held.id.clone(), held);
            added += 1;
        }

        if added > 0 {
            self.new_offers.notify_one();
        }
        added
    }

    fn agent_slot(&self, agent_id: &str, hostname: &str) -> Arc<Mutex<AgentSlot>> {
        if let Some(slot) = self.agents.read().unwrap().get(agent_id) {
            return slot.clone();
        }
        let mut agents = self.agents.write().unwrap();
        agents
            .entry(agent_id.to_string())
            .or_insert_with(|| {
                Arc::new(Mutex::new(AgentSlot {
                    hostname: hostname.to_string(),
                    offers: HashMap::new(),
                }))
            })
            .clone()
    }

    /// Deterministic snapshot of all claimable offers, ordered by
    /// `(agent_id, offer_id)`.
    pub fn claimable_snapshot(&self) -> Vec<AgentOffers> {
        let agents = self.agents.read().unwrap();
        let mut snapshot: Vec<AgentOffers> = agents
            .iter()
            .filter_map(|(agent_id, slot)| {
                let slot = slot.lock().unwrap();
                if slot.offers.is_empty() {
                    return None;
                }
                let mut offers: Vec<HeldOffer> = slot.offers.values().cloned().collect();
                offers.sort_by(|a, b| a.id.cmp(&b.id));
                Some(AgentOffers {
                    agent_id: agent_id.clone(),
                    hostname: slot.hostname.clone(),
                    offers,
                })
            })
            .collect();
        snapshot.sort_by(|a, b| a.agent_id.cmp(&b.agent_id));
        snapshot
    }

    /// Atomically claim a set of offers on one agent for a launch plan.
    /// Either every requested offer is still held — all are moved into the
    /// claim — or the claim fails and nothing changes.
    pub fn claim(
        &self,
        plan_id: u64,
        agent_id: &str,
        offer_ids: &[String],
    ) -> OfferResult<Vec<HeldOffer>> {
        let slot = {
            let agents = self.agents.read().unwrap();
            agents
                .get(agent_id)
                .cloned()
                .ok_or_else(|| OfferError::AgentNotFound(agent_id.to_string()))?
        };
        let mut slot = slot.lock().unwrap();

        for id in offer_ids {
            if !slot.offers.contains_key(id) {
                return Err(OfferError::OfferGone(id.clone()));
            }
        }

        let claimed: Vec<HeldOffer> = offer_ids
            .iter()
            .map(|id| slot.offers.remove(id).unwrap())
            .collect();

        self.claims.lock().unwrap().insert(
            plan_id,
            Claim {
                offers: claimed.clone(),
                invalidated: false,
            },
        );
        debug!(plan_id, %agent_id, offers = claimed.len(), "offers claimed for launch");
        Ok(claimed)
    }

    /// True while a claim exists and has not been invalidated by rescind.
    pub fn claim_valid(&self, plan_id: u64) -> bool {
        self.claims
            .lock()
            .unwrap()
            .get(&plan_id)
            .map(|c| !c.invalidated)
            .unwrap_or(false)
    }

    /// Consume a claim after the ACCEPT went out: the offers reach their
    /// launched disposition. Returns the consumed offer ids.
    pub fn complete_launch(&self, plan_id: u64) -> OfferResult<Vec<String>> {
        let claim = self
            .claims
            .lock()
            .unwrap()
            .remove(&plan_id)
            .ok_or(OfferError::ClaimNotFound(plan_id))?;
        Ok(claim.offers.into_iter().map(|o| o.id).collect())
    }

    /// Roll a claim back: offers that were not rescinded while claimed
    /// return to the pool with a fresh TTL. Returns how many came back.
    pub fn rollback(&self, plan_id: u64) -> OfferResult<usize> {
        let claim = self
            .claims
            .lock()
            .unwrap()
            .remove(&plan_id)
            .ok_or(OfferError::ClaimNotFound(plan_id))?;

        let now = Instant::now();
        let mut restored = 0;
        for mut offer in claim.offers {
            offer.received_at = now;
            let slot = self.agent_slot(&offer.agent_id, &offer.hostname);
            slot.lock().unwrap().offers.insert(offer.id.clone(), offer);
            restored += 1;
        }
        if restored > 0 {
            self.new_offers.notify_one();
        }
        debug!(plan_id, restored, "claim rolled back");
        Ok(restored)
    }

    /// Handle a RESCIND from the master. Removes the offer without a
    /// decline; a rescind against a claimed-but-unlaunched offer
    /// invalidates the claim.
    pub fn rescind(&self, offer_id: &str) -> RescindOutcome {
        // Held offers first.
        {
            let agents = self.agents.read().unwrap();
            for slot in agents.values() {
                let mut slot = slot.lock().unwrap();
                if slot.offers.remove(offer_id).is_some() {
                    info!(%offer_id, "held offer rescinded");
                    return RescindOutcome::RemovedHeld;
                }
            }
        }

        // Then in-flight claims.
        let mut claims = self.claims.lock().unwrap();
        for (plan_id, claim) in claims.iter_mut() {
            if let Some(pos) = claim.offers.iter().position(|o| o.id == offer_id) {
                claim.offers.remove(pos);
                claim.invalidated = true;
                warn!(%offer_id, plan_id, "rescind invalidated an in-flight claim");
                return RescindOutcome::InvalidatedClaim(*plan_id);
            }
        }

        RescindOutcome::NotHeld
    }

    /// Remove and return every held offer older than the hold TTL.
    /// Claimed offers are exempt: their TTL was cancelled at claim time.
    pub fn take_expired(&self) -> Vec<HeldOffer> {
        let now = Instant::now();
        let mut expired = Vec::new();

        let agents = self.agents.read().unwrap();
        for slot in agents.values() {
            let mut slot = slot.lock().unwrap();
            let stale: Vec<String> = slot
                .offers
                .iter()
                .filter(|(_, o)| now.duration_since(o.received_at) >= self.hold_ttl)
                .map(|(id, _)| id.clone())
                .collect();
            for id in stale {
                if let Some(offer) = slot.offers.remove(&id) {
                    expired.push(offer);
                }
            }
        }

        expired.sort_by(|a, b| a.id.cmp(&b.id));
        expired
    }

    /// Remove and return every held offer, for the final decline during
    /// shutdown drain.
    pub fn drain_all(&self) -> Vec<HeldOffer> {
        let agents = self.agents.read().unwrap();
        let mut drained = Vec::new();
        for slot in agents.values() {
            let mut slot = slot.lock().unwrap();
            drained.extend(slot.offers.drain().map(|(_, o)| o));
        }
        drained.sort_by(|a, b| a.id.cmp(&b.id));
        drained
    }

    /// Count of currently held (claimable) offers.
    pub fn held_count(&self) -> usize {
        let agents = self.agents.read().unwrap();
        agents
            .values()
            .map(|slot| slot.lock().unwrap().offers.len())
            .sum()
    }
}
