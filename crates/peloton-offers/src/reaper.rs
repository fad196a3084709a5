//! Background worker that declines offers which sat unused past the
//! hold TTL.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{debug, info};

use crate::pool::OfferPool;

type BoxFuture = Pin<Box<dyn Future<Output = ()> + Send>>;

/// Sink for DECLINE calls; the supervisor wires this to the driver so the
/// reaper does not depend on it directly.
pub type DeclineFn = Arc<dyn Fn(Vec<String>) -> BoxFuture + Send + Sync>;

pub struct OfferReaper {
    pool: Arc<OfferPool>,
    interval: Duration,
    decline: DeclineFn,
}

impl OfferReaper {
    pub fn new(pool: Arc<OfferPool>, interval: Duration, decline: DeclineFn) -> Self {
        Self {
            pool,
            interval,
            decline,
        }
    }

    /// Run the reap loop until shutdown.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!(interval = ?self.interval, "offer reaper started");
        loop {
            tokio::select! {
                _ = tokio::time::sleep(self.interval) => {
                    self.reap_once().await;
                }
                _ = shutdown.changed() => {
                    debug!("offer reaper shutting down");
                    break;
                }
            }
        }
    }

    /// One reap pass; exposed for tests.
    pub async fn reap_once(&self) {
        let expired = self.pool.take_expired();
        if expired.is_empty() {
            return;
        }
        let ids: Vec<String> = expired.into_iter().map(|o| o.id).collect();
        info!(count = ids.len(), "declining expired offers");
        (self.decline)(ids).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use peloton_mesos::{AgentId, Offer, OfferId, Resource};
    use std::sync::Mutex;

    fn wire_offer(id: &str) -> Offer {
        Offer {
            id: Some(OfferId {
                value: id.to_string(),
            }),
            agent_id: Some(AgentId {
                value: "a-1".to_string(),
            }),
            hostname: "h1".to_string(),
            resources: vec![Resource::scalar("cpus", 1.0)],
            ..Default::default()
        }
    }

    fn recording_decline() -> (DeclineFn, Arc<Mutex<Vec<Vec<String>>>>) {
        let declined: Arc<Mutex<Vec<Vec<String>>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = declined.clone();
        let decline: DeclineFn = Arc::new(move |ids| {
            let sink = sink.clone();
            Box::pin(async move {
                sink.lock().unwrap().push(ids);
            })
        });
        (decline, declined)
    }

    #[tokio::test]
    async fn reap_declines_expired_offers() {
        let pool = Arc::new(OfferPool::new(Duration::from_millis(0)));
        pool.add_offers(&[wire_offer("o-1"), wire_offer("o-2")]);

        let (decline, declined) = recording_decline();
        let reaper = OfferReaper::new(pool.clone(), Duration::from_millis(10), decline);

        reaper.reap_once().await;

        let batches = declined.lock().unwrap();
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0], vec!["o-1".to_string(), "o-2".to_string()]);
        assert_eq!(pool.held_count(), 0);
    }

    #[tokio::test]
    async fn reap_skips_when_nothing_expired() {
        let pool = Arc::new(OfferPool::new(Duration::from_secs(3600)));
        pool.add_offers(&[wire_offer("o-1")]);

        let (decline, declined) = recording_decline();
        let reaper = OfferReaper::new(pool.clone(), Duration::from_millis(10), decline);

        reaper.reap_once().await;
        assert!(declined.lock().unwrap().is_empty());
        assert_eq!(pool.held_count(), 1);
    }

    #[tokio::test]
    async fn run_loop_honors_shutdown() {
        let pool = Arc::new(OfferPool::new(Duration::from_secs(3600)));
        let (decline, _) = recording_decline();
        let reaper = OfferReaper::new(pool, Duration::from_secs(3600), decline);

        let (tx, rx) = watch::channel(false);
        let handle = tokio::spawn(reaper.run(rx));
        tx.send(true).unwrap();

        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("reaper should stop on shutdown")
            .unwrap();
    }
}
