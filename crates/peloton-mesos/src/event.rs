//! Inbound scheduler events (`mesos.v1.scheduler.Event`).

use serde::{Deserialize, Serialize};

use crate::messages::{AgentId, FrameworkId, Offer, OfferId, TaskStatus};

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
pub enum EventType {
    Unknown = 0,
    Subscribed = 1,
    Offers = 2,
    Rescind = 3,
    Update = 4,
    Message = 5,
    Failure = 6,
    Error = 7,
    Heartbeat = 8,
}

#[derive(Clone, PartialEq, ::prost::Message, Serialize, Deserialize)]
#[serde(default)]
pub struct Subscribed {
    #[prost(message, optional, tag = "1")]
    pub framework_id: Option<FrameworkId>,
    #[prost(double, optional, tag = "2")]
    pub heartbeat_interval_seconds: Option<f64>,
}

#[derive(Clone, PartialEq, ::prost::Message, Serialize, Deserialize)]
#[serde(default)]
pub struct Offers {
    #[prost(message, repeated, tag = "1")]
    pub offers: Vec<Offer>,
}

#[derive(Clone, PartialEq, ::prost::Message, Serialize, Deserialize)]
#[serde(default)]
pub struct Rescind {
    #[prost(message, optional, tag = "1")]
    pub offer_id: Option<OfferId>,
}

#[derive(Clone, PartialEq, ::prost::Message, Serialize, Deserialize)]
#[serde(default)]
pub struct Update {
    #[prost(message, optional, tag = "1")]
    pub status: Option<TaskStatus>,
}

#[derive(Clone, PartialEq, ::prost::Message, Serialize, Deserialize)]
#[serde(default)]
pub struct MessageEvent {
    #[prost(message, optional, tag = "1")]
    pub agent_id: Option<AgentId>,
    #[prost(bytes = "vec", tag = "3")]
    pub data: Vec<u8>,
}

#[derive(Clone, PartialEq, ::prost::Message, Serialize, Deserialize)]
#[serde(default)]
pub struct Failure {
    #[prost(message, optional, tag = "1")]
    pub agent_id: Option<AgentId>,
    #[prost(int32, optional, tag = "3")]
    pub status: Option<i32>,
}

#[derive(Clone, PartialEq, ::prost::Message, Serialize, Deserialize)]
#[serde(default)]
pub struct ErrorEvent {
    #[prost(string, tag = "1")]
    pub message: String,
}

#[derive(Clone, PartialEq, ::prost::Message, Serialize, Deserialize)]
#[serde(default)]
pub struct Event {
    #[prost(enumeration = "EventType", tag = "1")]
    pub r#type: i32,
    #[prost(message, optional, tag = "2")]
    pub subscribed: Option<Subscribed>,
    #[prost(message, optional, tag = "3")]
    pub offers: Option<Offers>,
    #[prost(message, optional, tag = "4")]
    pub rescind: Option<Rescind>,
    #[prost(message, optional, tag = "5")]
    pub update: Option<Update>,
    #[prost(message, optional, tag = "6")]
    pub message: Option<MessageEvent>,
    #[prost(message, optional, tag = "7")]
    pub failure: Option<Failure>,
    #[prost(message, optional, tag = "8")]
    pub error: Option<ErrorEvent>,
}

impl Event {
    pub fn event_type(&self) -> EventType {
        EventType::try_from(self.r#type).unwrap_or(EventType::Unknown)
    }

    pub fn heartbeat() -> Self {
        Self {
            r#type: EventType::Heartbeat as i32,
            ..Default::default()
        }
    }

    pub fn subscribed(framework_id: &str, heartbeat_interval_seconds: Option<f64>) -> Self {
        Self {
            r#type: EventType::Subscribed as i32,
            subscribed: Some(Subscribed {
                framework_id: Some(FrameworkId::new(framework_id)),
                heartbeat_interval_seconds,
            }),
            ..Default::default()
        }
    }

    pub fn offers(offers: Vec<Offer>) -> Self {
        Self {
            r#type: EventType::Offers as i32,
            offers: Some(Offers { offers }),
            ..Default::default()
        }
    }

    pub fn rescind(offer_id: &str) -> Self {
        Self {
            r#type: EventType::Rescind as i32,
            rescind: Some(Rescind {
                offer_id: Some(OfferId {
                    value: offer_id.to_string(),
                }),
            }),
            ..Default::default()
        }
    }

    pub fn update(status: TaskStatus) -> Self {
        Self {
            r#type: EventType::Update as i32,
            update: Some(Update {
                status: Some(status),
            }),
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::{TaskId, TaskState};
    use prost::Message;

    #[test]
    fn event_constructors_set_type() {
        assert_eq!(Event::heartbeat().event_type(), EventType::Heartbeat);
        assert_eq!(
            Event::subscribed("fw", Some(15.0)).event_type(),
            EventType::Subscribed
        );
        assert_eq!(Event::rescind("o-1").event_type(), EventType::Rescind);
    }

    #[test]
    fn update_event_round_trip() {
        let event = Event::update(TaskStatus {
            task_id: Some(TaskId::new("job-0-0")),
            state: TaskState::TaskFinished as i32,
            uuid: Some(vec![1, 2, 3]),
            ..Default::default()
        });

        let encoded = event.encode_to_vec();
        let decoded = Event::decode(encoded.as_slice()).unwrap();
        assert_eq!(decoded, event);
        assert_eq!(
            decoded.update.unwrap().status.unwrap().task_state(),
            TaskState::TaskFinished
        );
    }

    #[test]
    fn unknown_event_type_degrades() {
        let event = Event {
            r#type: 777,
            ..Default::default()
        };
        assert_eq!(event.event_type(), EventType::Unknown);
    }
}
