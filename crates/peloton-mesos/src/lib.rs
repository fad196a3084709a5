//! Mesos v1 HTTP scheduler API: wire messages, the JSON/protobuf codec,
//! and RecordIO stream framing.
//!
//! Message structs carry prost field annotations directly (no build-time
//! codegen) and serde derives, so the protobuf and JSON encodings share
//! one canonical in-memory form.

pub mod call;
pub mod codec;
pub mod event;
pub mod messages;
pub mod recordio;

pub use call::{
    Accept, Acknowledge, Call, CallType, Decline, Filters, Kill, LaunchOperation, OfferOperation,
    OperationType, Reconcile, ReconcileTask, ReserveOperation, Subscribe, UnreserveOperation,
};
pub use codec::{CodecError, Encoding};
pub use event::{
    ErrorEvent, Event, EventType, Failure, MessageEvent, Offers, Rescind, Subscribed, Update,
};
pub use messages::{
    AgentId, Attribute, CapabilityType, CommandInfo, FrameworkCapability, FrameworkId,
    FrameworkInfo, Offer, OfferId, Resource, TaskId, TaskInfo, TaskState, TaskStatus, ValueRange,
    ValueRanges, ValueScalar, ValueText, ValueType,
};
pub use recordio::{RecordIoDecoder, RecordIoError};
