//! Outbound scheduler calls (`mesos.v1.scheduler.Call`).

use serde::{Deserialize, Serialize};

use crate::messages::{AgentId, FrameworkId, FrameworkInfo, OfferId, Resource, TaskId, TaskInfo};

#[derive(
    Clone,
    Copy,
    Debug,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    ::prost::Enumeration,
    Serialize,
    Deserialize,
)]
#[repr(i32)]
pub enum CallType {
    Unknown = 0,
    Subscribe = 1,
    Teardown = 2,
    Accept = 3,
    Decline = 4,
    Revive = 5,
    Kill = 6,
    Shutdown = 7,
    Acknowledge = 8,
    Reconcile = 9,
    Message = 10,
}

#[derive(Clone, PartialEq, ::prost::Message, Serialize, Deserialize)]
#[serde(default)]
pub struct Subscribe {
    #[prost(message, optional, tag = "1")]
    pub framework_info: Option<FrameworkInfo>,
}

#[derive(Clone, PartialEq, ::prost::Message, Serialize, Deserialize)]
#[serde(default)]
pub struct Filters {
    #[prost(double, optional, tag = "1")]
    pub refuse_seconds: Option<f64>,
}

#[derive(
    Clone,
    Copy,
    Debug,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    ::prost::Enumeration,
    Serialize,
    Deserialize,
)]
#[repr(i32)]
pub enum OperationType {
    Unknown = 0,
    Launch = 1,
    Reserve = 2,
    Unreserve = 3,
    Create = 4,
    Destroy = 5,
    LaunchGroup = 6,
}

#[derive(Clone, PartialEq, ::prost::Message, Serialize, Deserialize)]
#[serde(default)]
pub struct LaunchOperation {
    #[prost(message, repeated, tag = "1")]
    pub task_infos: Vec<TaskInfo>,
}

#[derive(Clone, PartialEq, ::prost::Message, Serialize, Deserialize)]
#[serde(default)]
pub struct ReserveOperation {
    #[prost(message, repeated, tag = "1")]
    pub resources: Vec<Resource>,
}

#[derive(Clone, PartialEq, ::prost::Message, Serialize, Deserialize)]
#[serde(default)]
pub struct UnreserveOperation {
    #[prost(message, repeated, tag = "1")]
    pub resources: Vec<Resource>,
}

#[derive(Clone, PartialEq, ::prost::Message, Serialize, Deserialize)]
#[serde(default)]
pub struct OfferOperation {
    #[prost(enumeration = "OperationType", tag = "1")]
    pub r#type: i32,
    #[prost(message, optional, tag = "2")]
    pub launch: Option<LaunchOperation>,
    #[prost(message, optional, tag = "3")]
    pub reserve: Option<ReserveOperation>,
    #[prost(message, optional, tag = "4")]
    pub unreserve: Option<UnreserveOperation>,
}

#[derive(Clone, PartialEq, ::prost::Message, Serialize, Deserialize)]
#[serde(default)]
pub struct Accept {
    #[prost(message, repeated, tag = "1")]
    pub offer_ids: Vec<OfferId>,
    #[prost(message, repeated, tag = "2")]
    pub operations: Vec<OfferOperation>,
    #[prost(message, optional, tag = "3")]
    pub filters: Option<Filters>,
}

#[derive(Clone, PartialEq, ::prost::Message, Serialize, Deserialize)]
#[serde(default)]
pub struct Decline {
    #[prost(message, repeated, tag = "1")]
    pub offer_ids: Vec<OfferId>,
    #[prost(message, optional, tag = "2")]
    pub filters: Option<Filters>,
}

#[derive(Clone, PartialEq, ::prost::Message, Serialize, Deserialize)]
#[serde(default)]
pub struct Kill {
    #[prost(message, optional, tag = "1")]
    pub task_id: Option<TaskId>,
    #[prost(message, optional, tag = "2")]
    pub agent_id: Option<AgentId>,
}

#[derive(Clone, PartialEq, ::prost::Message, Serialize, Deserialize)]
#[serde(default)]
pub struct Acknowledge {
    #[prost(message, optional, tag = "1")]
    pub agent_id: Option<AgentId>,
    #[prost(message, optional, tag = "2")]
    pub task_id: Option<TaskId>,
    #[prost(bytes = "vec", tag = "3")]
    pub uuid: Vec<u8>,
}

#[derive(Clone, PartialEq, ::prost::Message, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconcileTask {
    #[prost(message, optional, tag = "1")]
    pub task_id: Option<TaskId>,
    #[prost(message, optional, tag = "2")]
    pub agent_id: Option<AgentId>,
}

#[derive(Clone, PartialEq, ::prost::Message, Serialize, Deserialize)]
#[serde(default)]
pub struct Reconcile {
    /// Empty means implicit reconciliation: the master reports every task
    /// it knows for this framework.
    #[prost(message, repeated, tag = "1")]
    pub tasks: Vec<ReconcileTask>,
}

#[derive(Clone, PartialEq, ::prost::Message, Serialize, Deserialize)]
#[serde(default)]
pub struct Call {
    #[prost(message, optional, tag = "1")]
    pub framework_id: Option<FrameworkId>,
    #[prost(enumeration = "CallType", tag = "2")]
    pub r#type: i32,
    #[prost(message, optional, tag = "3")]
    pub subscribe: Option<Subscribe>,
    #[prost(message, optional, tag = "4")]
    pub accept: Option<Accept>,
    #[prost(message, optional, tag = "5")]
    pub decline: Option<Decline>,
    #[prost(message, optional, tag = "6")]
    pub kill: Option<Kill>,
    #[prost(message, optional, tag = "8")]
    pub acknowledge: Option<Acknowledge>,
    #[prost(message, optional, tag = "9")]
    pub reconcile: Option<Reconcile>,
}

impl Call {
    pub fn call_type(&self) -> CallType {
        CallType::try_from(self.r#type).unwrap_or(CallType::Unknown)
    }

    pub fn subscribe(framework_id: Option<FrameworkId>, info: FrameworkInfo) -> Self {
        Self {
            framework_id,
            r#type: CallType::Subscribe as i32,
            subscribe: Some(Subscribe {
                framework_info: Some(info),
            }),
            ..Default::default()
        }
    }

    pub fn accept(
        framework_id: Option<FrameworkId>,
        offer_ids: Vec<String>,
        task_infos: Vec<TaskInfo>,
        refuse_seconds: Option<f64>,
    ) -> Self {
        Self {
            framework_id,
            r#type: CallType::Accept as i32,
            accept: Some(Accept {
                offer_ids: offer_ids.into_iter().map(|value| OfferId { value }).collect(),
                operations: vec![OfferOperation {
                    r#type: OperationType::Launch as i32,
                    launch: Some(LaunchOperation { task_infos }),
                    reserve: None,
                    unreserve: None,
                }],
                filters: refuse_seconds.map(|refuse_seconds| Filters {
                    refuse_seconds: Some(refuse_seconds),
                }),
            }),
            ..Default::default()
        }
    }

    pub fn decline(
        framework_id: Option<FrameworkId>,
        offer_ids: Vec<String>,
        refuse_seconds: Option<f64>,
    ) -> Self {
        Self {
            framework_id,
            r#type: CallType::Decline as i32,
            decline: Some(Decline {
                offer_ids: offer_ids.into_iter().map(|value| OfferId { value }).collect(),
                filters: refuse_seconds.map(|refuse_seconds| Filters {
                    refuse_seconds: Some(refuse_seconds),
                }),
            }),
            ..Default::default()
        }
    }

    pub fn kill(
        framework_id: Option<FrameworkId>,
        task_id: String,
        agent_id: Option<String>,
    ) -> Self {
        Self {
            framework_id,
            r#type: CallType::Kill as i32,
            kill: Some(Kill {
                task_id: Some(TaskId::new(task_id)),
                agent_id: agent_id.map(|value| AgentId { value }),
            }),
            ..Default::default()
        }
    }

    pub fn acknowledge(
        framework_id: Option<FrameworkId>,
        agent_id: String,
        task_id: String,
        uuid: Vec<u8>,
    ) -> Self {
        Self {
            framework_id,
            r#type: CallType::Acknowledge as i32,
            acknowledge: Some(Acknowledge {
                agent_id: Some(AgentId { value: agent_id }),
                task_id: Some(TaskId::new(task_id)),
                uuid,
            }),
            ..Default::default()
        }
    }

    pub fn reconcile(
        framework_id: Option<FrameworkId>,
        tasks: Vec<(String, Option<String>)>,
    ) -> Self {
        Self {
            framework_id,
            r#type: CallType::Reconcile as i32,
            reconcile: Some(Reconcile {
                tasks: tasks
                    .into_iter()
                    .map(|(task_id, agent_id)| ReconcileTask {
                        task_id: Some(TaskId::new(task_id)),
                        agent_id: agent_id.map(|value| AgentId { value }),
                    })
                    .collect(),
            }),
            ..Default::default()
        }
    }

    pub fn teardown(framework_id: FrameworkId) -> Self {
        Self {
            framework_id: Some(framework_id),
            r#type: CallType::Teardown as i32,
            ..Default::default()
        }
    }

    /// Whether the call may be blindly retried after a transport failure.
    ///
    /// ACCEPT is deliberately absent: it is retriable only while the same
    /// offer ids are still held, which the launcher must check itself.
    pub fn is_idempotent(&self) -> bool {
        matches!(
            self.call_type(),
            CallType::Kill | CallType::Decline | CallType::Reconcile | CallType::Acknowledge
        )
    }
}
