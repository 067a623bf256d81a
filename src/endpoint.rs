//! Public send API over one connection.
//!
//! A [`RemoteEndpoint`] is a cheaply cloneable façade over the writer lane.
//! Each clone carries its own handle identity, which scopes fragmented
//! messages: continuations must come from the clone that sent the first
//! fragment, so two tasks cannot corrupt each other's message by accident.
//!
//! Awaiting operations (`send_bytes`, `send_string`, the partial variants)
//! return once their frames are fully on the wire. The `_by_future`
//! variants return a [`CompletionFuture`] right after admission.
//! `send_ping`/`send_pong` return as soon as the frame is queued; it still
//! travels the same ordered lane as every other send.
//!
//! # Example
//!
//! ```no_run
//! use ws_remote::RemoteEndpoint;
//! use bytes::Bytes;
//!
//! # async fn run() -> ws_remote::Result<()> {
//! # let transport = tokio::io::duplex(1024).0;
//! let (endpoint, _writer) = RemoteEndpoint::attach(transport);
//!
//! endpoint.send_string("hello").await?;
//! let future = endpoint.send_bytes_by_future(Bytes::from_static(&[1, 2, 3])).await?;
//! future.wait().await.into_result()?;
//! # Ok(())
//! # }
//! ```

use std::sync::atomic::{AtomicU64, Ordering};

use bytes::Bytes;
use tokio::io::AsyncWrite;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::completion::CompletionFuture;
use crate::error::Result;
use crate::protocol::{encode_message, FragmentPolicy, Frame, OpCode};
use crate::writer::{spawn_writer_task, WriterConfig, WriterHandle};

/// Handle identities are process-wide so clones never collide.
static NEXT_HANDLE_ID: AtomicU64 = AtomicU64::new(1);

fn next_handle_id() -> u64 {
    NEXT_HANDLE_ID.fetch_add(1, Ordering::Relaxed)
}

/// The send side of one connection.
pub struct RemoteEndpoint {
    writer: WriterHandle,
    handle_id: u64,
    fragment_policy: FragmentPolicy,
}

impl RemoteEndpoint {
    /// Attach an endpoint to a transport write half with defaults.
    ///
    /// Returns the endpoint and the writer task handle. The task finishes
    /// when every endpoint clone is dropped (clean shutdown) or the first
    /// write fails (the lane fails, see [`crate::SendError::ConnectionClosed`]).
    pub fn attach<W>(transport: W) -> (Self, JoinHandle<Result<()>>)
    where
        W: AsyncWrite + Unpin + Send + 'static,
    {
        Self::attach_with_config(transport, WriterConfig::default(), FragmentPolicy::SingleFrame)
    }

    /// Attach with explicit lane configuration and fragmentation policy.
    pub fn attach_with_config<W>(
        transport: W,
        config: WriterConfig,
        fragment_policy: FragmentPolicy,
    ) -> (Self, JoinHandle<Result<()>>)
    where
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let (writer, task) = spawn_writer_task(transport, config);
        let handle_id = next_handle_id();
        debug!(handle_id, ?fragment_policy, "endpoint attached");
        (
            Self {
                writer,
                handle_id,
                fragment_policy,
            },
            task,
        )
    }

    /// Send a binary message and wait until it is on the wire.
    pub async fn send_bytes(&self, payload: Bytes) -> Result<()> {
        let future = self.admit_message(OpCode::Binary, payload).await?;
        future.wait().await.into_result().map(|_| ())
    }

    /// Send a binary message, returning its completion future immediately
    /// after admission.
    pub async fn send_bytes_by_future(&self, payload: Bytes) -> Result<CompletionFuture> {
        self.admit_message(OpCode::Binary, payload).await
    }

    /// Send a text message and wait until it is on the wire.
    pub async fn send_string(&self, text: &str) -> Result<()> {
        let payload = Bytes::copy_from_slice(text.as_bytes());
        let future = self.admit_message(OpCode::Text, payload).await?;
        future.wait().await.into_result().map(|_| ())
    }

    /// Send a text message, returning its completion future immediately
    /// after admission.
    pub async fn send_string_by_future(&self, text: &str) -> Result<CompletionFuture> {
        let payload = Bytes::copy_from_slice(text.as_bytes());
        self.admit_message(OpCode::Text, payload).await
    }

    /// Send one fragment of a binary message and wait for its write.
    ///
    /// The first fragment opens the message; `is_last` closes it. While
    /// open, only this clone may send further fragments, and they must
    /// stay binary. Zero-length fragments are legal, including the final
    /// one.
    pub async fn send_partial_bytes(&self, fragment: Bytes, is_last: bool) -> Result<()> {
        let future = self
            .writer
            .admit_fragment(OpCode::Binary, self.handle_id, fragment, is_last)
            .await?;
        future.wait().await.into_result().map(|_| ())
    }

    /// Send one fragment of a text message and wait for its write.
    ///
    /// Same contract as [`send_partial_bytes`](Self::send_partial_bytes),
    /// with a text opcode.
    pub async fn send_partial_string(&self, fragment: &str, is_last: bool) -> Result<()> {
        let payload = Bytes::copy_from_slice(fragment.as_bytes());
        let future = self
            .writer
            .admit_fragment(OpCode::Text, self.handle_id, payload, is_last)
            .await?;
        future.wait().await.into_result().map(|_| ())
    }

    /// Queue a ping carrying up to 125 bytes of application data.
    ///
    /// Returns once the frame is admitted; the write itself is
    /// best-effort. Ordering relative to other sends is preserved.
    pub async fn send_ping(&self, data: Bytes) -> Result<()> {
        let frame = Frame::ping(data)?;
        self.writer.admit_control(frame).await?;
        Ok(())
    }

    /// Queue a pong carrying up to 125 bytes of application data.
    ///
    /// Same admission contract as [`send_ping`](Self::send_ping).
    pub async fn send_pong(&self, data: Bytes) -> Result<()> {
        let frame = Frame::pong(data)?;
        self.writer.admit_control(frame).await?;
        Ok(())
    }

    /// Whether the connection has failed or shut down.
    pub fn is_closed(&self) -> bool {
        self.writer.is_closed()
    }

    /// Whether a fragmented message is currently open on the connection.
    pub fn has_open_message(&self) -> bool {
        self.writer.has_open_message()
    }

    /// Admitted-but-unresolved request count, across all clones.
    pub fn pending_count(&self) -> usize {
        self.writer.pending_count()
    }

    /// This clone's handle identity.
    pub fn handle_id(&self) -> u64 {
        self.handle_id
    }

    async fn admit_message(&self, opcode: OpCode, payload: Bytes) -> Result<CompletionFuture> {
        let frames = encode_message(opcode, payload, self.fragment_policy);
        self.writer.admit_full(frames).await
    }
}

impl Clone for RemoteEndpoint {
    /// Clones share the lane but get a fresh handle identity, so each
    /// clone owns its own fragmented messages.
    fn clone(&self) -> Self {
        Self {
            writer: self.writer.clone(),
            handle_id: next_handle_id(),
            fragment_policy: self.fragment_policy,
        }
    }
}
