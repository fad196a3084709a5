//! Core mesos.v1 messages shared by calls and events.
//!
//! Field numbers follow the upstream mesos.proto definitions. The prost
//! `Message` derive supplies `Debug` and `Default`, so only `Clone` and
//! `PartialEq` are derived explicitly.

use serde::{Deserialize, Serialize};

#[derive(Clone, PartialEq, ::prost::Message, Serialize, Deserialize)]
#[serde(default)]
pub struct FrameworkId {
    #[prost(string, tag = "1")]
    pub value: String,
}

impl FrameworkId {
    pub fn new(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
        }
    }
}

#[derive(Clone, PartialEq, ::prost::Message, Serialize, Deserialize)]
#[serde(default)]
pub struct OfferId {
    #[prost(string, tag = "1")]
    pub value: String,
}

#[derive(Clone, PartialEq, ::prost::Message, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentId {
    #[prost(string, tag = "1")]
    pub value: String,
}

#[derive(Clone, PartialEq, ::prost::Message, Serialize, Deserialize)]
#[serde(default)]
pub struct TaskId {
    #[prost(string, tag = "1")]
    pub value: String,
}

impl TaskId {
    pub fn new(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
        }
    }
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
pub enum CapabilityType {
    Unknown = 0,
    RevocableResources = 1,
    TaskKillingState = 2,
    GpuResources = 3,
    SharedResources = 4,
    PartitionAware = 5,
}

#[derive(Clone, PartialEq, ::prost::Message, Serialize, Deserialize)]
#[serde(default)]
pub struct FrameworkCapability {
    #[prost(enumeration = "CapabilityType", tag = "1")]
    pub r#type: i32,
}

impl FrameworkCapability {
    pub fn new(r#type: CapabilityType) -> Self {
        Self {
            r#type: r#type as i32,
        }
    }
}

#[derive(Clone, PartialEq, ::prost::Message, Serialize, Deserialize)]
#[serde(default)]
pub struct FrameworkInfo {
    #[prost(string, tag = "1")]
    pub user: String,
    #[prost(string, tag = "2")]
    pub name: String,
    #[prost(message, optional, tag = "3")]
    pub id: Option<FrameworkId>,
    #[prost(double, optional, tag = "4")]
    pub failover_timeout: Option<f64>,
    #[prost(bool, optional, tag = "5")]
    pub checkpoint: Option<bool>,
    #[prost(string, optional, tag = "6")]
    pub role: Option<String>,
    #[prost(string, optional, tag = "7")]
    pub hostname: Option<String>,
    #[prost(string, optional, tag = "8")]
    pub principal: Option<String>,
    #[prost(message, repeated, tag = "10")]
    pub capabilities: Vec<FrameworkCapability>,
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
pub enum ValueType {
    Scalar = 0,
    Ranges = 1,
    Set = 2,
    Text = 3,
}

#[derive(Clone, PartialEq, ::prost::Message, Serialize, Deserialize)]
#[serde(default)]
pub struct ValueScalar {
    #[prost(double, tag = "1")]
    pub value: f64,
}

#[derive(Clone, PartialEq, ::prost::Message, Serialize, Deserialize)]
#[serde(default)]
pub struct ValueRange {
    #[prost(uint64, tag = "1")]
    pub begin: u64,
    #[prost(uint64, tag = "2")]
    pub end: u64,
}

#[derive(Clone, PartialEq, ::prost::Message, Serialize, Deserialize)]
#[serde(default)]
pub struct ValueRanges {
    #[prost(message, repeated, tag = "1")]
    pub range: Vec<ValueRange>,
}

#[derive(Clone, PartialEq, ::prost::Message, Serialize, Deserialize)]
#[serde(default)]
pub struct ValueText {
    #[prost(string, tag = "1")]
    pub value: String,
}

#[derive(Clone, PartialEq, ::prost::Message, Serialize, Deserialize)]
#[serde(default)]
pub struct Resource {
    #[prost(string, tag = "1")]
    pub name: String,
    #[prost(enumeration = "ValueType", tag = "2")]
    pub r#type: i32,
    #[prost(message, optional, tag = "3")]
    pub scalar: Option<ValueScalar>,
    #[prost(message, optional, tag = "4")]
    pub ranges: Option<ValueRanges>,
    #[prost(string, optional, tag = "6")]
    pub role: Option<String>,
}

impl Resource {
    /// A scalar resource such as `cpus`, `mem`, `disk` or `gpus`.
    pub fn scalar(name: &str, value: f64) -> Self {
        Self {
            name: name.to_string(),
            r#type: ValueType::Scalar as i32,
            scalar: Some(ValueScalar { value }),
            ranges: None,
            role: None,
        }
    }

    /// A ranges resource, in practice always `ports`.
    pub fn ranges(name: &str, ranges: &[(u64, u64)]) -> Self {
        Self {
            name: name.to_string(),
            r#type: ValueType::Ranges as i32,
            scalar: None,
            ranges: Some(ValueRanges {
                range: ranges
                    .iter()
                    .map(|&(begin, end)| ValueRange { begin, end })
                    .collect(),
            }),
            role: None,
        }
    }

    pub fn scalar_value(&self) -> f64 {
        self.scalar.as_ref().map(|s| s.value).unwrap_or(0.0)
    }
}

#[derive(Clone, PartialEq, ::prost::Message, Serialize, Deserialize)]
#[serde(default)]
pub struct Attribute {
    #[prost(string, tag = "1")]
    pub name: String,
    #[prost(enumeration = "ValueType", tag = "2")]
    pub r#type: i32,
    #[prost(message, optional, tag = "3")]
    pub scalar: Option<ValueScalar>,
    #[prost(message, optional, tag = "5")]
    pub text: Option<ValueText>,
}

impl Attribute {
    pub fn text(name: &str, value: &str) -> Self {
        Self {
            name: name.to_string(),
            r#type: ValueType::Text as i32,
            scalar: None,
            text: Some(ValueText {
                value: value.to_string(),
            }),
        }
    }
}

#[derive(Clone, PartialEq, ::prost::Message, Serialize, Deserialize)]
#[serde(default)]
pub struct Offer {
    #[prost(message, optional, tag = "1")]
    pub id: Option<OfferId>,
    #[prost(message, optional, tag = "2")]
    pub framework_id: Option<FrameworkId>,
    #[prost(message, optional, tag = "3")]
    pub agent_id: Option<AgentId>,
    #[prost(string, tag = "4")]
    pub hostname: String,
    #[prost(message, repeated, tag = "5")]
    pub resources: Vec<Resource>,
    #[prost(message, repeated, tag = "7")]
    pub attributes: Vec<Attribute>,
}

#[derive(Clone, PartialEq, ::prost::Message, Serialize, Deserialize)]
#[serde(default)]
pub struct CommandInfo {
    #[prost(bool, optional, tag = "1")]
    pub shell: Option<bool>,
    #[prost(string, optional, tag = "2")]
    pub value: Option<String>,
    #[prost(string, repeated, tag = "3")]
    pub arguments: Vec<String>,
}

impl CommandInfo {
    pub fn shell_command(command: &str) -> Self {
        Self {
            shell: Some(true),
            value: Some(command.to_string()),
            arguments: Vec::new(),
        }
    }
}

#[derive(Clone, PartialEq, ::prost::Message, Serialize, Deserialize)]
#[serde(default)]
pub struct TaskInfo {
    #[prost(string, tag = "1")]
    pub name: String,
    #[prost(message, optional, tag = "2")]
    pub task_id: Option<TaskId>,
    #[prost(message, optional, tag = "3")]
    pub agent_id: Option<AgentId>,
    #[prost(message, repeated, tag = "4")]
    pub resources: Vec<Resource>,
    #[prost(message, optional, tag = "5")]
    pub command: Option<CommandInfo>,
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
pub enum TaskState {
    TaskStarting = 0,
    TaskRunning = 1,
    TaskFinished = 2,
    TaskFailed = 3,
    TaskKilled = 4,
    TaskLost = 5,
    TaskStaging = 6,
    TaskError = 7,
    TaskKilling = 8,
    TaskDropped = 9,
    TaskUnreachable = 10,
    TaskGone = 11,
    TaskUnknown = 13,
}

#[derive(Clone, PartialEq, ::prost::Message, Serialize, Deserialize)]
#[serde(default)]
pub struct TaskStatus {
    #[prost(message, optional, tag = "1")]
    pub task_id: Option<TaskId>,
    #[prost(enumeration = "TaskState", tag = "2")]
    pub state: i32,
    #[prost(string, optional, tag = "4")]
    pub message: Option<String>,
    #[prost(message, optional, tag = "5")]
    pub agent_id: Option<AgentId>,
    #[prost(double, optional, tag = "6")]
    pub timestamp: Option<f64>,
    #[prost(string, optional, tag = "10")]
    pub reason: Option<String>,
    #[prost(bytes = "vec", optional, tag = "11")]
    pub uuid: Option<Vec<u8>>,
}

impl TaskStatus {
    pub fn task_state(&self) -> TaskState {
        TaskState::try_from(self.state).unwrap_or(TaskState::TaskUnknown)
    }

    pub fn task_id_value(&self) -> &str {
        self.task_id.as_ref().map(|t| t.value.as_str()).unwrap_or("")
    }
}
