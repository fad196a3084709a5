//! Event router: demultiplexes the subscription stream to a handler.
//!
//! Events are dispatched strictly in arrival order; the router holds no
//! locks across handler calls.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use futures::StreamExt;
use tokio::sync::watch;
use tracing::{debug, warn};

use peloton_mesos::{Event, EventType, Offer, TaskStatus};

use crate::driver::EventStream;
use crate::error::DriverError;

/// Receives demultiplexed events. Methods the deployment does not care
/// about keep their default no-op.
#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn on_subscribed(&self, framework_id: String, heartbeat_interval_secs: Option<f64>);
    async fn on_offers(&self, offers: Vec<Offer>);
    async fn on_rescind(&self, offer_id: String);
    async fn on_update(&self, status: TaskStatus);
    async fn on_message(&self, _agent_id: String, _data: Vec<u8>) {}
    async fn on_failure(&self, _agent_id: Option<String>, _status: Option<i32>) {}
    async fn on_heartbeat(&self) {}
}

/// Why the router loop ended.
#[derive(Debug)]
pub enum RouterExit {
    /// Shutdown signal observed.
    Shutdown,
    /// The master closed the stream; caller should reconnect.
    StreamClosed,
    /// The stream failed mid-flight; caller should reconnect.
    StreamError(DriverError),
    /// The master sent an ERROR event; the subscription is dead for good.
    MasterError(String),
}

/// Run the dispatch loop until the stream ends or shutdown fires.
///
/// `liveness` is stamped with the current epoch-milliseconds on every
/// inbound event (heartbeats included) so a watchdog can detect a silent
/// stream.
pub async fn run_router(
    mut stream: EventStream,
    handler: Arc<dyn EventHandler>,
    liveness: Arc<AtomicU64>,
    mut shutdown: watch::Receiver<bool>,
) -> RouterExit {
    loop {
        tokio::select! {
            // Dispatch in arrival order: the next event is not read until
            // the handler returns.
            next = stream.next() => {
                match next {
                    Some(Ok(event)) => {
                        liveness.store(epoch_millis(), Ordering::Relaxed);
                        if let Some(exit) = dispatch(event, handler.as_ref()).await {
                            return exit;
                        }
                    }
                    Some(Err(e)) => return RouterExit::StreamError(e),
                    None => return RouterExit::StreamClosed,
                }
            }
            _ = shutdown.changed() => {
                debug!("event router shutting down");
                return RouterExit::Shutdown;
            }
        }
    }
}

async fn dispatch(event: Event, handler: &dyn EventHandler) -> Option<RouterExit> {
    match event.event_type() {
        EventType::Subscribed => {
            if let Some(subscribed) = event.subscribed {
                let framework_id = subscribed
                    .framework_id
                    .map(|f| f.value)
                    .unwrap_or_default();
                handler
                    .on_subscribed(framework_id, subscribed.heartbeat_interval_seconds)
                    .await;
            }
        }
        EventType::Offers => {
            if let Some(offers) = event.offers {
                handler.on_offers(offers.offers).await;
            }
        }
        EventType::Rescind => {
            if let Some(offer_id) = event.rescind.and_then(|r| r.offer_id) {
                handler.on_rescind(offer_id.value).await;
            }
        }
        EventType::Update => {
            if let Some(status) = event.update.and_then(|u| u.status) {
                handler.on_update(status).await;
            }
        }
        EventType::Message => {
            if let Some(message) = event.message {
                let agent_id = message.agent_id.map(|a| a.value).unwrap_or_default();
                handler.on_message(agent_id, message.data).await;
            }
        }
        EventType::Failure => {
            if let Some(failure) = event.failure {
                handler
                    .on_failure(failure.agent_id.map(|a| a.value), failure.status)
                    .await;
            }
        }
        EventType::Error => {
            let message = event.error.map(|e| e.message).unwrap_or_default();
            return Some(RouterExit::MasterError(message));
        }
        EventType::Heartbeat => handler.on_heartbeat().await,
        EventType::Unknown => {
            warn!(raw_type = event.r#type, "dropping event of unknown type");
        }
    }
    None
}

fn epoch_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use peloton_mesos::{OfferId, TaskId, TaskState};
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingHandler {
        log: Mutex<Vec<String>>,
    }

    impl RecordingHandler {
        fn entries(&self) -> Vec<String> {
            self.log.lock().unwrap().clone()
        }

        fn push(&self, entry: String) {
            self.log.lock().unwrap().push(entry);
        }
    }

    #[async_trait]
    impl EventHandler for RecordingHandler {
        async fn on_subscribed(&self, framework_id: String, _interval: Option<f64>) {
            self.push(format!("subscribed:{framework_id}"));
        }

        async fn on_offers(&self, offers: Vec<Offer>) {
            self.push(format!("offers:{}", offers.len()));
        }

        async fn on_rescind(&self, offer_id: String) {
            self.push(format!("rescind:{offer_id}"));
        }

        async fn on_update(&self, status: TaskStatus) {
            self.push(format!("update:{}", status.task_id_value()));
        }

        async fn on_heartbeat(&self) {
            self.push("heartbeat".to_string());
        }
    }

    fn stream_of(events: Vec<Event>) -> EventStream {
        Box::pin(futures::stream::iter(events.into_iter().map(Ok)))
    }

    #[tokio::test]
    async fn dispatches_in_arrival_order() {
        let handler = Arc::new(RecordingHandler::default());
        let (_tx, rx) = watch::channel(false);
        let liveness = Arc::new(AtomicU64::new(0));

        let events = vec![
            Event::subscribed("fw-1", Some(15.0)),
            Event::offers(vec![Offer {
                id: Some(OfferId {
                    value: "o-1".to_string(),
                }),
                ..Default::default()
            }]),
            Event::heartbeat(),
            Event::update(TaskStatus {
                task_id: Some(TaskId::new("job-0-0")),
                state: TaskState::TaskRunning as i32,
                ..Default::default()
            }),
            Event::rescind("o-1"),
        ];

        let exit = run_router(stream_of(events), handler.clone(), liveness.clone(), rx).await;

        assert!(matches!(exit, RouterExit::StreamClosed));
        assert_eq!(
            handler.entries(),
            vec![
                "subscribed:fw-1",
                "offers:1",
                "heartbeat",
                "update:job-0-0",
                "rescind:o-1",
            ]
        );
        assert!(liveness.load(Ordering::Relaxed) > 0);
    }

    #[tokio::test]
    async fn master_error_ends_the_loop() {
        let handler = Arc::new(RecordingHandler::default());
        let (_tx, rx) = watch::channel(false);

        let mut error_event = Event {
            r#type: EventType::Error as i32,
            ..Default::default()
        };
        error_event.error = Some(peloton_mesos::ErrorEvent {
            message: "framework failed over".to_string(),
        });

        let events = vec![error_event, Event::heartbeat()];
        let exit = run_router(
            stream_of(events),
            handler.clone(),
            Arc::new(AtomicU64::new(0)),
            rx,
        )
        .await;

        match exit {
            RouterExit::MasterError(message) => {
                assert_eq!(message, "framework failed over");
            }
            other => panic!("unexpected exit: {other:?}"),
        }
        // The heartbeat after the error was never dispatched.
        assert!(handler.entries().is_empty());
    }

    #[tokio::test]
    async fn stream_error_surfaces() {
        let handler = Arc::new(RecordingHandler::default());
        let (_tx, rx) = watch::channel(false);

        let events: Vec<Result<Event, DriverError>> = vec![
            Ok(Event::heartbeat()),
            Err(DriverError::Transport("connection reset".to_string())),
        ];
        let stream: EventStream = Box::pin(futures::stream::iter(events));

        let exit = run_router(stream, handler.clone(), Arc::new(AtomicU64::new(0)), rx).await;
        assert!(matches!(exit, RouterExit::StreamError(_)));
        assert_eq!(handler.entries(), vec!["heartbeat"]);
    }
}
