//! AWS Lambda extension that buffers OTLP trace spans emitted by the function
//! and forwards them as a single batch to a remote collector before the
//! execution environment freezes or terminates.
//!
//! The function sends OTLP/HTTP trace exports to the local receiver, which
//! decodes them and appends the resource-span groups to a bounded in-memory
//! buffer. The Extensions API lifecycle loop drains the buffer and exports it
//! once per `INVOKE` event (under a fixed short budget) and once on `SHUTDOWN`
//! (under the time remaining until the host's deadline).

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod buffer;
pub mod codec;
pub mod config;
pub mod exporter;
pub mod lifecycle;
pub mod receiver;
pub mod runtime;

pub use buffer::{CapacityExceeded, SpanBuffer};
pub use codec::DecodeError;
pub use config::{BufferConfig, Config, ExporterConfig, LifecycleConfig, ReceiverConfig};
pub use exporter::{ExportClient, SendError};
pub use lifecycle::{
    EventType, ExtensionClient, LifecycleError, LifecycleEvent, RegisterResponse, TracingInfo,
};
pub use receiver::{HealthResponse, ReceiverHandle, TraceReceiver};
pub use runtime::{ExtensionRuntime, RuntimeError};
