//! The daemon's event handler: routes inbound master events into the
//! offer pool, the capacity tracker, and the job manager.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use peloton_driver::{EventHandler, HttpTransport, SchedulerDriver};
use peloton_jobmgr::{JobManager, TaskHandlerPool};
use peloton_mesos::{Offer, TaskStatus};
use peloton_offers::{held_offer_from_wire, OfferPool};
use peloton_respool::{CapacityTracker, RespoolEngine};
use peloton_state::StateStore;

pub type Driver = SchedulerDriver<HttpTransport, StateStore>;

pub struct Events {
    pub driver: Arc<Driver>,
    pub pool: Arc<OfferPool>,
    pub respool: Arc<RespoolEngine>,
    pub capacity: Arc<CapacityTracker>,
    pub manager: Arc<JobManager>,
    pub handler_pool: Arc<TaskHandlerPool>,
    /// Master-announced heartbeat interval, milliseconds; zero until
    /// SUBSCRIBED arrives.
    pub heartbeat_interval_ms: Arc<AtomicU64>,
}

#[async_trait]
impl EventHandler for Events {
    async fn on_subscribed(&self, framework_id: String, heartbeat_interval_secs: Option<f64>) {
        if let Err(e) = self.driver.handle_subscribed(&framework_id) {
            warn!(error = %e, "failed to persist confirmed framework id");
        }
        if let Some(secs) = heartbeat_interval_secs {
            self.heartbeat_interval_ms
                .store((secs * 1000.0) as u64, Ordering::Relaxed);
        }
        info!(%framework_id, "subscription confirmed");
    }

    async fn on_offers(&self, offers: Vec<Offer>) {
        // Capacity estimates first, so grown entitlements are visible to
        // the admission pass below.
        let now = Instant::now();
        let mut grown = false;
        for offer in &offers {
            if let Some(held) = held_offer_from_wire(offer, now) {
                grown |= self.capacity.observe_offer(&held.agent_id, held.resources);
            }
        }
        if grown {
            self.respool
                .set_cluster_capacity(self.capacity.total_capacity());
        }

        let held = self.pool.add_offers(&offers);
        debug!(offered = offers.len(), held, "offers received");

        if let Err(e) = self.manager.admit_and_forward().await {
            warn!(error = %e, "admission pass after offers failed");
        }
    }

    async fn on_rescind(&self, offer_id: String) {
        // A claimed offer marks its plan invalid; the launcher checks
        // claim validity before ACCEPT and rolls the plan back.
        let outcome = self.pool.rescind(&offer_id);
        debug!(%offer_id, ?outcome, "offer rescinded");
    }

    async fn on_update(&self, status: TaskStatus) {
        self.handler_pool.dispatch(status).await;
    }

    async fn on_failure(&self, agent_id: Option<String>, status: Option<i32>) {
        // Agent failures surface as LOST task updates and through
        // reconciliation; nothing to do beyond noting it.
        warn!(?agent_id, ?status, "failure event from master");
    }

    async fn on_heartbeat(&self) {
        debug!("heartbeat");
    }
}
