//! Framework driver for the Mesos HTTP scheduler API.
//!
//! The driver owns the framework identity and exactly one live
//! subscription to the current master. Transport and identity persistence
//! are separate traits so tests can substitute each independently.

pub mod driver;
pub mod error;
pub mod identity;
pub mod router;
pub mod transport;

pub use driver::{CallSink, ConnectionState, EventStream, SchedulerDriver};
pub use error::{DriverError, DriverResult};
pub use identity::{FrameworkInfoStore, MemoryFrameworkStore};
pub use router::{run_router, EventHandler, RouterExit};
pub use transport::{basic_auth_header, HttpTransport, MasterTransport, SubscribeConnection};
