//! Component construction, worker wiring, the subscription loop, and
//! the two-phase shutdown drain.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tokio::sync::{mpsc, watch};
use tracing::{error, info, warn};

use peloton_core::{Backoff, Config};
use peloton_driver::{
    basic_auth_header, run_router, CallSink, HttpTransport, RouterExit, SchedulerDriver,
};
use peloton_jobmgr::{JobManager, Reconciler, TaskHandlerPool};
use peloton_mesos::{Call, Encoding};
use peloton_offers::{DeclineFn, OfferPool, OfferReaper};
use peloton_placement::{PlacementEngine, ScoringWeights};
use peloton_respool::{CapacityTracker, RespoolEngine};
use peloton_state::{ResourcePoolConfig, StateStore};

use crate::handler::{Driver, Events};
use crate::{EXIT_CONFIG, EXIT_INTERNAL, EXIT_MASTER_UNREACHABLE, EXIT_OK, EXIT_STORE_UNAVAILABLE};

pub async fn run(
    config: Config,
    store: StateStore,
    pools: Vec<ResourcePoolConfig>,
    master: String,
) -> u8 {
    // ── Construct components ───────────────────────────────────────

    let encoding = match Encoding::from_str(&config.transport.encoding) {
        Ok(encoding) => encoding,
        Err(e) => {
            error!(error = %e, "invalid transport encoding");
            return EXIT_CONFIG;
        }
    };
    let auth_header = match basic_auth_header(
        &config.framework.principal,
        config.transport.secret_path.as_deref(),
    ) {
        Ok(header) => header,
        Err(e) => {
            error!(error = %e, "cannot read master secret file");
            return EXIT_CONFIG;
        }
    };
    let transport = match HttpTransport::new(encoding, auth_header) {
        Ok(transport) => transport,
        Err(e) => {
            error!(error = %e, "cannot build http transport");
            return EXIT_CONFIG;
        }
    };

    // Exactly one driver, owned here and shared by reference.
    let driver: Arc<Driver> = Arc::new(SchedulerDriver::new(
        transport,
        store.clone(),
        config.framework.clone(),
        encoding,
        Duration::from_millis(config.transport.call_deadline_ms),
    ));

    let respool = match RespoolEngine::new(pools) {
        Ok(engine) => Arc::new(engine),
        Err(e) => {
            error!(error = %e, "invalid resource pool tree");
            return EXIT_CONFIG;
        }
    };

    let offer_pool = Arc::new(OfferPool::new(Duration::from_secs(
        config.scheduling.offer_hold_ttl_secs,
    )));
    let capacity = Arc::new(CapacityTracker::new());

    let (outcomes_tx, outcomes_rx) = mpsc::channel(256);
    let placement = Arc::new(PlacementEngine::new(
        offer_pool.clone(),
        outcomes_tx,
        ScoringWeights::default(),
        Duration::from_millis(config.scheduling.placement_round_interval_ms),
        config.scheduling.max_placement_retries,
    ));

    let sink: Arc<dyn CallSink> = driver.clone();
    let manager = Arc::new(JobManager::new(
        store.clone(),
        respool.clone(),
        placement.clone(),
        offer_pool.clone(),
        capacity.clone(),
        sink.clone(),
    ));

    // Memory is a cache of the store: rebuild before scheduling.
    if let Err(e) = manager.recover().await {
        error!(error = %e, "recovery from store failed");
        return EXIT_STORE_UNAVAILABLE;
    }

    let handler_pool = Arc::new(TaskHandlerPool::spawn(
        config.scheduling.task_handler_workers,
        manager.clone(),
    ));

    let heartbeat_interval_ms = Arc::new(AtomicU64::new(0));
    let events = Arc::new(Events {
        driver: driver.clone(),
        pool: offer_pool.clone(),
        respool: respool.clone(),
        capacity,
        manager: manager.clone(),
        handler_pool: handler_pool.clone(),
        heartbeat_interval_ms: heartbeat_interval_ms.clone(),
    });

    // ── Long-lived workers ─────────────────────────────────────────

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    {
        let shutdown_tx = shutdown_tx.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("shutdown signal received");
                let _ = shutdown_tx.send(true);
            }
        });
    }

    let decline: DeclineFn = {
        let driver = driver.clone();
        let refuse = config.scheduling.decline_refuse_secs;
        Arc::new(move |offer_ids| {
            let driver = driver.clone();
            Box::pin(async move {
                if let Err(e) = driver.call(Call::decline(None, offer_ids, Some(refuse))).await {
                    warn!(error = %e, "decline of expired offers failed");
                }
            })
        })
    };
    let reaper = OfferReaper::new(
        offer_pool.clone(),
        Duration::from_secs((config.scheduling.offer_hold_ttl_secs / 4).max(1)),
        decline,
    );
    let reaper_handle = tokio::spawn(reaper.run(shutdown_rx.clone()));

    let placement_handle = tokio::spawn(placement.clone().run(shutdown_rx.clone()));

    let reconciler = Arc::new(Reconciler::new(
        store.clone(),
        manager.clone(),
        sink,
        Duration::from_secs(config.scheduling.reconcile_interval_secs),
    ));
    let reconciler_handle = tokio::spawn(reconciler.run(shutdown_rx.clone()));

    let mut outcome_handle = tokio::spawn(
        manager
            .clone()
            .run_outcome_loop(outcomes_rx, shutdown_rx.clone()),
    );

    // ── Subscription loop ──────────────────────────────────────────

    let liveness = Arc::new(AtomicU64::new(0));
    let mut backoff = Backoff::new(
        Duration::from_millis(config.scheduling.subscribe_backoff_base_ms),
        Duration::from_secs(30),
        config.scheduling.subscribe_retry_budget,
    );

    let exit_code = loop {
        if *shutdown_rx.borrow() {
            break EXIT_OK;
        }

        let stream = match driver.subscribe(&master).await {
            Ok(stream) => {
                backoff.reset();
                // A fresh connection starts its liveness clock now.
                liveness.store(epoch_millis(), Ordering::Relaxed);
                stream
            }
            Err(e) if e.is_fatal() => {
                error!(error = %e, "master rejected the subscription");
                break EXIT_MASTER_UNREACHABLE;
            }
            Err(e) => match backoff.next_delay() {
                Some(delay) => {
                    warn!(error = %e, ?delay, "subscribe failed, backing off");
                    let mut shutdown = shutdown_rx.clone();
                    tokio::select! {
                        _ = tokio::time::sleep(delay) => continue,
                        _ = shutdown.changed() => break EXIT_OK,
                    }
                }
                None => {
                    error!(error = %e, "master unreachable beyond retry budget");
                    break EXIT_MASTER_UNREACHABLE;
                }
            },
        };

        tokio::select! {
            exit = run_router(
                stream,
                events.clone(),
                liveness.clone(),
                shutdown_rx.clone(),
            ) => match exit {
                RouterExit::Shutdown => break EXIT_OK,
                RouterExit::StreamClosed => {
                    warn!("master closed the event stream, reconnecting");
                    let _ = driver.mark_disconnected();
                }
                RouterExit::StreamError(e) => {
                    warn!(error = %e, "event stream failed, reconnecting");
                    let _ = driver.mark_disconnected();
                }
                RouterExit::MasterError(message) => {
                    error!(%message, "master sent ERROR, subscription is dead");
                    break EXIT_MASTER_UNREACHABLE;
                }
            },
            _ = silent_stream(liveness.clone(), heartbeat_interval_ms.clone()) => {
                warn!("no events within the heartbeat grace period, reconnecting");
                let _ = driver.mark_disconnected();
            }
            result = &mut outcome_handle => {
                match result {
                    Ok(Err(e)) => {
                        error!(error = %e, "invariant violation, terminating");
                        break EXIT_INTERNAL;
                    }
                    _ => break EXIT_OK,
                }
            }
        }
    };

    // ── Two-phase drain ────────────────────────────────────────────
    // Phase one: stop intake (router exited; workers observe shutdown).
    let _ = shutdown_tx.send(true);

    // Phase two: return every held offer, settle in-flight writes, close.
    let drained: Vec<String> = offer_pool.drain_all().into_iter().map(|o| o.id).collect();
    if !drained.is_empty() {
        info!(offers = drained.len(), "declining held offers for shutdown");
        if let Err(e) = driver.call(Call::decline(None, drained, Some(5.0))).await {
            warn!(error = %e, "final decline failed");
        }
    }

    drop(events);
    match Arc::try_unwrap(handler_pool) {
        Ok(pool) => pool.drain().await,
        Err(_) => warn!("handler pool still referenced at shutdown"),
    }

    let _ = reaper_handle.await;
    let _ = placement_handle.await;
    let _ = reconciler_handle.await;
    let _ = driver.mark_disconnected();

    exit_code
}

/// Resolves when the stream has been silent for five heartbeat
/// intervals. Pends forever until SUBSCRIBED announces an interval.
async fn silent_stream(liveness: Arc<AtomicU64>, heartbeat_interval_ms: Arc<AtomicU64>) {
    loop {
        tokio::time::sleep(Duration::from_secs(5)).await;
        let interval = heartbeat_interval_ms.load(Ordering::Relaxed);
        let last = liveness.load(Ordering::Relaxed);
        if interval == 0 || last == 0 {
            continue;
        }
        let now = epoch_millis();
        if now.saturating_sub(last) > interval.saturating_mul(5) {
            return;
        }
    }
}

fn epoch_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
