//! The scheduler driver: one live subscription, outbound calls, and the
//! framework identity rules.
//!
//! The driver is constructed exactly once by the supervisor and passed
//! explicitly; there is no process-wide instance.

use std::pin::Pin;
use std::sync::RwLock;
use std::time::Duration;

use async_trait::async_trait;
use futures::{Stream, StreamExt};
use tracing::{info, warn};

use peloton_core::FrameworkConfig;
use peloton_mesos::{
    Call, CapabilityType, Encoding, Event, FrameworkCapability, FrameworkId, FrameworkInfo,
};

use crate::error::{DriverError, DriverResult};
use crate::identity::FrameworkInfoStore;
use crate::transport::MasterTransport;

/// Decoded inbound event stream returned by `subscribe`.
pub type EventStream = Pin<Box<dyn Stream<Item = DriverResult<Event>> + Send>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Subscribing,
    Subscribed,
}

/// Anything that can deliver a `Call` to the master. The job manager and
/// the offer reaper depend on this seam rather than on the concrete
/// driver, so tests substitute a recorder.
#[async_trait]
pub trait CallSink: Send + Sync {
    async fn send_call(&self, call: Call) -> DriverResult<()>;
}

pub struct SchedulerDriver<T: MasterTransport, S: FrameworkInfoStore> {
    transport: T,
    store: S,
    config: FrameworkConfig,
    encoding: Encoding,
    call_deadline: Duration,

    master: RwLock<Option<String>>,
    /// Authoritative cache of the subscription stream id; invalidated on
    /// disconnect together with the persisted copy.
    stream_id: RwLock<Option<String>>,
    framework_id: RwLock<Option<String>>,
    state: RwLock<ConnectionState>,
}

impl<T: MasterTransport, S: FrameworkInfoStore> SchedulerDriver<T, S> {
    pub fn new(
        transport: T,
        store: S,
        config: FrameworkConfig,
        encoding: Encoding,
        call_deadline: Duration,
    ) -> Self {
        Self {
            transport,
            store,
            config,
            encoding,
            call_deadline,
            master: RwLock::new(None),
            stream_id: RwLock::new(None),
            framework_id: RwLock::new(None),
            state: RwLock::new(ConnectionState::Disconnected),
        }
    }

    pub fn connection_state(&self) -> ConnectionState {
        *self.state.read().unwrap()
    }

    pub fn framework_name(&self) -> &str {
        &self.config.name
    }

    /// The framework id the driver is currently operating under.
    pub fn framework_id(&self) -> Option<String> {
        self.framework_id.read().unwrap().clone()
    }

    pub fn stream_id(&self) -> Option<String> {
        self.stream_id.read().unwrap().clone()
    }

    /// Open a subscription to `master` and return the decoded event stream.
    pub async fn subscribe(&self, master: &str) -> DriverResult<EventStream> {
        *self.state.write().unwrap() = ConnectionState::Subscribing;
        *self.master.write().unwrap() = Some(master.to_string());

        let framework_id = self.resolve_framework_id()?;
        let info = self.build_framework_info(&framework_id);
        let call = Call::subscribe(Some(FrameworkId::new(&framework_id)), info);
        let body = self.encoding.encode_call(&call)?;

        let connection = match self.transport.subscribe(master, body).await {
            Ok(connection) => connection,
            Err(e) => {
                *self.state.write().unwrap() = ConnectionState::Disconnected;
                return Err(e);
            }
        };

        self.store
            .save_stream_id(&self.config.name, &connection.stream_id)?;
        *self.stream_id.write().unwrap() = Some(connection.stream_id.clone());
        *self.state.write().unwrap() = ConnectionState::Subscribed;

        info!(
            %master,
            framework_id = %framework_id,
            stream_id = %connection.stream_id,
            failover_timeout = self.config.failover_timeout_secs,
            "subscribed to master"
        );

        let encoding = self.encoding;
        Ok(Box::pin(connection.frames.map(move |frame| {
            frame.and_then(|bytes| encoding.decode_event(&bytes).map_err(DriverError::from))
        })))
    }

    /// Record the framework id the master confirmed on SUBSCRIBED.
    pub fn handle_subscribed(&self, framework_id: &str) -> DriverResult<()> {
        let previous = self.framework_id.read().unwrap().clone();
        if previous.as_deref() != Some(framework_id) {
            if let Some(previous) = previous {
                warn!(
                    %previous,
                    confirmed = %framework_id,
                    "master confirmed a different framework id"
                );
            }
            self.store
                .save_framework_id(&self.config.name, framework_id)?;
            *self.framework_id.write().unwrap() = Some(framework_id.to_string());
        }
        Ok(())
    }

    /// Send a unary call on the current subscription.
    pub async fn call(&self, mut call: Call) -> DriverResult<()> {
        let master = self
            .master
            .read()
            .unwrap()
            .clone()
            .ok_or(DriverError::NotSubscribed)?;
        let stream_id = self
            .stream_id
            .read()
            .unwrap()
            .clone()
            .ok_or(DriverError::NotSubscribed)?;

        if call.framework_id.is_none() {
            call.framework_id = self
                .framework_id
                .read()
                .unwrap()
                .as_deref()
                .map(FrameworkId::new);
        }

        let body = self.encoding.encode_call(&call)?;
        self.transport
            .call(&master, body, &stream_id, self.call_deadline)
            .await
    }

    /// Drop the subscription state. The stream id is invalidated both in
    /// the cache and in the store; the framework id is preserved.
    pub fn mark_disconnected(&self) -> DriverResult<()> {
        *self.state.write().unwrap() = ConnectionState::Disconnected;
        *self.stream_id.write().unwrap() = None;
        self.store.clear_stream_id(&self.config.name)?;
        Ok(())
    }

    /// Close the current stream and re-subscribe to the same master,
    /// presenting the preserved framework id.
    pub async fn reconnect(&self) -> DriverResult<EventStream> {
        let master = self
            .master
            .read()
            .unwrap()
            .clone()
            .ok_or(DriverError::NotSubscribed)?;
        self.mark_disconnected()?;
        self.subscribe(&master).await
    }

    /// Resolve the framework id to present on SUBSCRIBE: cached value,
    /// else storage, else the deployment's fixed default so reconnection
    /// after total state loss still re-attaches.
    fn resolve_framework_id(&self) -> DriverResult<String> {
        if let Some(cached) = self.framework_id.read().unwrap().clone() {
            return Ok(cached);
        }

        let stored = self
            .store
            .framework_id(&self.config.name)?
            .filter(|v| !v.is_empty());

        let resolved = match stored {
            Some(stored) => {
                if stored != self.config.default_framework_id {
                    warn!(
                        framework_id = %stored,
                        default = %self.config.default_framework_id,
                        "stored framework id differs from deployment default"
                    );
                }
                stored
            }
            None => {
                info!(
                    default = %self.config.default_framework_id,
                    "no stored framework id, using deployment default"
                );
                self.config.default_framework_id.clone()
            }
        };

        *self.framework_id.write().unwrap() = Some(resolved.clone());
        Ok(resolved)
    }

    fn build_framework_info(&self, framework_id: &str) -> FrameworkInfo {
        let mut capabilities = Vec::new();
        if self.config.capabilities.gpu {
            capabilities.push(FrameworkCapability::new(CapabilityType::GpuResources));
        }
        if self.config.capabilities.task_killing {
            capabilities.push(FrameworkCapability::new(CapabilityType::TaskKillingState));
        }
        if self.config.capabilities.partition_aware {
            capabilities.push(FrameworkCapability::new(CapabilityType::PartitionAware));
        }
        if self.config.capabilities.revocable {
            capabilities.push(FrameworkCapability::new(CapabilityType::RevocableResources));
        }

        let host = hostname::get()
            .ok()
            .and_then(|h| h.into_string().ok())
            .unwrap_or_else(|| "localhost".to_string());

        FrameworkInfo {
            user: self.config.user.clone(),
            name: self.config.name.clone(),
            id: Some(FrameworkId::new(framework_id)),
            failover_timeout: Some(self.config.failover_timeout_secs),
            // There is no reason to run as a non-checkpointing framework.
            checkpoint: Some(true),
            role: self.config.role.clone(),
            hostname: Some(host),
            principal: if self.config.principal.is_empty() {
                None
            } else {
                Some(self.config.principal.clone())
            },
            capabilities,
        }
    }
}

#[async_trait]
impl<T: MasterTransport, S: FrameworkInfoStore> CallSink for SchedulerDriver<T, S> {
    async fn send_call(&self, call: Call) -> DriverResult<()> {
        self.call(call).await
    }
}
