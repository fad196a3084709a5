//! Wire encoding negotiation: JSON or protobuf, symmetric for requests
//! and responses.

use bytes::Bytes;
use prost::Message;
use thiserror::Error;

use crate::call::Call;
use crate::event::Event;

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("json encode/decode error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("protobuf decode error: {0}")]
    ProtobufDecode(#[from] prost::DecodeError),

    #[error("unsupported encoding: {0}")]
    Unsupported(String),
}

/// The content encoding negotiated with the master.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Encoding {
    Json,
    Protobuf,
}

impl Encoding {
    pub fn from_str(s: &str) -> Result<Self, CodecError> {
        match s {
            "json" => Ok(Encoding::Json),
            "protobuf" => Ok(Encoding::Protobuf),
            other => Err(CodecError::Unsupported(other.to_string())),
        }
    }

    /// Value for both the `Content-Type` and `Accept` headers.
    pub fn content_type(&self) -> &'static str {
        match self {
            Encoding::Json => "application/json",
            Encoding::Protobuf => "application/x-protobuf",
        }
    }

    pub fn encode_call(&self, call: &Call) -> Result<Bytes, CodecError> {
        match self {
            Encoding::Json => Ok(Bytes::from(serde_json::to_vec(call)?)),
            Encoding::Protobuf => Ok(Bytes::from(call.encode_to_vec())),
        }
    }

    pub fn decode_call(&self, data: &[u8]) -> Result<Call, CodecError> {
        match self {
            Encoding::Json => Ok(serde_json::from_slice(data)?),
            Encoding::Protobuf => Ok(Call::decode(data)?),
        }
    }

    pub fn encode_event(&self, event: &Event) -> Result<Bytes, CodecError> {
        match self {
            Encoding::Json => Ok(Bytes::from(serde_json::to_vec(event)?)),
            Encoding::Protobuf => Ok(Bytes::from(event.encode_to_vec())),
        }
    }

    pub fn decode_event(&self, data: &[u8]) -> Result<Event, CodecError> {
        match self {
            Encoding::Json => Ok(serde_json::from_slice(data)?),
            Encoding::Protobuf => Ok(Event::decode(data)?),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::call::CallType;
    use crate::event::EventType;
    use crate::messages::{FrameworkId, FrameworkInfo, Offer, OfferId, Resource};

    fn sample_call() -> Call {
        Call::accept(
            Some(FrameworkId::new("fw-1")),
            vec!["o-1".to_string()],
            vec![],
            Some(3.0),
        )
    }

    fn sample_event() -> Event {
        Event::offers(vec![Offer {
            id: Some(OfferId {
                value: "o-1".to_string(),
            }),
            hostname: "h1".to_string(),
            resources: vec![Resource::scalar("cpus", 2.0)],
            ..Default::default()
        }])
    }

    #[test]
    fn parses_encoding_names() {
        assert_eq!(Encoding::from_str("json").unwrap(), Encoding::Json);
        assert_eq!(Encoding::from_str("protobuf").unwrap(), Encoding::Protobuf);
        assert!(Encoding::from_str("msgpack").is_err());
    }

    #[test]
    fn content_types() {
        assert_eq!(Encoding::Json.content_type(), "application/json");
        assert_eq!(Encoding::Protobuf.content_type(), "application/x-protobuf");
    }

    #[test]
    fn both_encodings_decode_to_same_canonical_call() {
        let call = sample_call();

        let json = Encoding::Json.encode_call(&call).unwrap();
        let pb = Encoding::Protobuf.encode_call(&call).unwrap();

        let from_json = Encoding::Json.decode_call(&json).unwrap();
        let from_pb = Encoding::Protobuf.decode_call(&pb).unwrap();

        assert_eq!(from_json, from_pb);
        assert_eq!(from_json, call);
        assert_eq!(from_json.call_type(), CallType::Accept);
    }

    #[test]
    fn both_encodings_decode_to_same_canonical_event() {
        let event = sample_event();

        let json = Encoding::Json.encode_event(&event).unwrap();
        let pb = Encoding::Protobuf.encode_event(&event).unwrap();

        let from_json = Encoding::Json.decode_event(&json).unwrap();
        let from_pb = Encoding::Protobuf.decode_event(&pb).unwrap();

        assert_eq!(from_json, from_pb);
        assert_eq!(from_json.event_type(), EventType::Offers);
    }

    #[test]
    fn every_outbound_call_round_trips_in_both_encodings() {
        let fw = Some(FrameworkId::new("fw-1"));
        let calls = vec![
            Call::subscribe(fw.clone(), FrameworkInfo::default()),
            Call::accept(fw.clone(), vec!["o-1".to_string()], vec![], Some(1.0)),
            Call::decline(fw.clone(), vec!["o-2".to_string()], Some(5.0)),
            Call::kill(fw.clone(), "t-1".to_string(), Some("a-1".to_string())),
            Call::acknowledge(fw.clone(), "a-1".into(), "t-1".into(), vec![9, 9]),
            Call::reconcile(fw.clone(), vec![("t-1".to_string(), None)]),
            Call::teardown(FrameworkId::new("fw-1")),
        ];

        for call in calls {
            let json = Encoding::Json.encode_call(&call).unwrap();
            let pb = Encoding::Protobuf.encode_call(&call).unwrap();
            let from_json = Encoding::Json.decode_call(&json).unwrap();
            let from_pb = Encoding::Protobuf.decode_call(&pb).unwrap();
            assert_eq!(from_json, call, "{:?}", call.call_type());
            assert_eq!(from_pb, call, "{:?}", call.call_type());
        }
    }

    #[test]
    fn decode_rejects_garbage() {
        assert!(Encoding::Json.decode_event(b"{not json").is_err());
        assert!(Encoding::Protobuf.decode_event(&[0xff, 0xff, 0xff]).is_err());
    }
}
