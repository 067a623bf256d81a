//! # ws-remote
//!
//! Send-side engine for WebSocket remote endpoints: ordered, frame-atomic
//! writes from any number of concurrent producers onto one connection.
//!
//! The engine sits between an application's send calls and the transport
//! write half. It turns full messages, explicit fragments, and control
//! frames into RFC 6455 frames, serializes them through a single writer
//! lane, and resolves a completion per request.
//!
//! ## Architecture
//!
//! - **Protocol layer**: unmasked frame headers, payload framing, and
//!   fragmentation policies
//! - **Writer lane**: admission with a monotonic sequence under one lock,
//!   a bounded queue with backpressure, and a dedicated drain task
//! - **Completion**: one future per request, resolved exactly once,
//!   cancellable until its write starts
//!
//! ## Guarantees
//!
//! - Wire order equals admission order; frames of one request are never
//!   interleaved with another request's bytes
//! - At most one fragmented message open per connection, owned by the
//!   endpoint clone that started it; control frames interleave freely
//! - On transport failure every queued request resolves with
//!   `ConnectionClosed` in admission order, and later sends fail fast
//!
//! ## Example
//!
//! ```no_run
//! use ws_remote::RemoteEndpoint;
//!
//! # async fn run() -> ws_remote::Result<()> {
//! # let write_half = tokio::io::duplex(1024).0;
//! let (endpoint, _writer) = RemoteEndpoint::attach(write_half);
//!
//! endpoint.send_string("hello").await?;
//! endpoint.send_partial_string("fragmented ", false).await?;
//! endpoint.send_partial_string("message", true).await?;
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod protocol;

mod backpressure;
mod completion;
mod endpoint;
mod partial;
mod writer;

pub use backpressure::{BackpressureController, DEFAULT_MAX_PENDING, DEFAULT_TIMEOUT};
pub use completion::{CompletionFuture, WriteResult};
pub use endpoint::RemoteEndpoint;
pub use error::{Result, SendError, SendErrorKind};
pub use partial::PartialMessageState;
pub use writer::{
    spawn_writer_task, spawn_writer_task_default, RequestKind, WriterConfig, WriterHandle,
    DEFAULT_BACKPRESSURE_TIMEOUT, DEFAULT_CHANNEL_CAPACITY, DEFAULT_MAX_PENDING_REQUESTS,
};
