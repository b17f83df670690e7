#![warn(missing_docs)]

//! netsched: adaptive network request scheduler.
//!
//! Requests are weighed by priority and age, sized from the traffic of
//! earlier requests of the same kind, and admitted only while the estimated
//! traffic in flight fits the measured bandwidth.

pub mod admission;
pub mod cancel;
pub mod cli;
pub mod config;
pub mod error;
pub mod http;
pub mod operation;
pub mod priority;
pub mod queue;
pub mod request;
pub mod scheduler;
pub mod stats;
pub mod store;
pub mod traffic;
pub mod transport;

pub use cancel::CancelReason;
pub use config::{HttpConfig, SchedulerConfig};
pub use error::{Result, SchedulerError, TransportError};
pub use http::HttpTransport;
pub use operation::{Endpoint, Method, NetworkOperation, ParameterEncoding, RequestContent};
pub use priority::{RequestPriority, REQUIRED_WEIGHING};
pub use queue::RequestId;
pub use request::ScheduledRequest;
pub use scheduler::Scheduler;
pub use stats::SchedulerStats;
pub use store::{JsonFileTrafficStore, MemoryTrafficStore, TrafficRecord, TrafficStore};
pub use traffic::{Budget, TrafficModel};
pub use transport::{Progress, TransferFuture, Transport, TransportRequest, TransportResponse};
