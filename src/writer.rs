//! Single-writer lane: admission, ordering, and the drain loop.
//!
//! All sends on a connection funnel through one mpsc channel into a
//! dedicated writer task. Admission assigns a monotonic sequence number and
//! enqueues under one lock, so wire order equals admission order; the drain
//! loop writes one request at a time, keeping every request's frames
//! contiguous on the wire.
//!
//! # Architecture
//!
//! ```text
//! Producer 1 ─┐
//! Producer 2 ─┼─► admission (seq + fragment check) ─► mpsc ─► drain loop ─► Transport
//! Producer N ─┘
//! ```
//!
//! Admission is safe from any number of concurrent tasks. The sequence
//! counter, the fragmentation state, and the channel enqueue sit under a
//! single mutex, so two racing admissions are totally ordered and the
//! channel carries requests in sequence order.

use std::io::IoSlice;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, trace};

use crate::backpressure::{BackpressureController, BackpressureGuard};
use crate::completion::{completion_pair, CompletionFuture, CompletionHandle, WriteResult};
use crate::error::{Result, SendError, SendErrorKind};
use crate::partial::PartialMessageState;
use crate::protocol::{encode_fragment, Frame, HeaderBytes, OpCode};

/// Default maximum admitted-but-unresolved requests.
pub const DEFAULT_MAX_PENDING_REQUESTS: usize = 1024;

/// Default channel capacity for the request queue.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 1024;

/// Default backpressure timeout.
pub const DEFAULT_BACKPRESSURE_TIMEOUT: Duration = Duration::from_secs(5);

/// What a write request carries through the lane.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestKind {
    /// A complete text or binary message (one or more frames).
    FullMessage,
    /// One explicitly cut fragment of an open message.
    PartialFragment,
    /// Ping, pong, or close.
    Control,
}

/// One admission unit: frames written contiguously, resolved as a whole.
pub struct WriteRequest {
    /// Admission-order position, assigned under the admission lock.
    sequence: u64,
    kind: RequestKind,
    /// Frames written strictly in order, never interleaved with another
    /// request's bytes.
    frames: Vec<Frame>,
    completion: CompletionHandle,
    /// Backpressure slot, released when the request is dropped after
    /// resolution.
    _slot: BackpressureGuard,
}

impl WriteRequest {
    /// Total wire bytes this request will produce.
    fn wire_size(&self) -> usize {
        self.frames.iter().map(Frame::wire_size).sum()
    }
}

/// Configuration for the writer lane.
#[derive(Debug, Clone)]
pub struct WriterConfig {
    /// Maximum admitted-but-unresolved requests before producers wait.
    pub max_pending_requests: usize,
    /// Channel capacity for the request queue.
    pub channel_capacity: usize,
    /// How long a producer waits for a backpressure slot.
    pub backpressure_timeout: Duration,
    /// Deadline for one request's physical write. Exceeding it resolves
    /// the request with `Timeout` and fails the lane.
    pub write_deadline: Option<Duration>,
}

impl Default for WriterConfig {
    fn default() -> Self {
        Self {
            max_pending_requests: DEFAULT_MAX_PENDING_REQUESTS,
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
            backpressure_timeout: DEFAULT_BACKPRESSURE_TIMEOUT,
            write_deadline: None,
        }
    }
}

/// Admission state shared between producers and the drain loop.
#[derive(Debug)]
struct AdmissionState {
    /// Terminal once true: every admission fails with `ConnectionClosed`.
    closed: bool,
    /// Next sequence number to assign.
    next_sequence: u64,
    /// Open fragmented message, if any.
    partial: PartialMessageState,
}

/// Handle for admitting write requests into the lane.
///
/// Cheaply cloneable; clones share the sequence counter, the fragmentation
/// state, and the backpressure budget.
#[derive(Clone)]
pub struct WriterHandle {
    tx: mpsc::Sender<WriteRequest>,
    state: Arc<Mutex<AdmissionState>>,
    backpressure: BackpressureController,
}

impl WriterHandle {
    /// Admit a full message as one request.
    ///
    /// Rejected with `Protocol` while a fragmented message is open.
    pub async fn admit_full(&self, frames: Vec<Frame>) -> Result<CompletionFuture> {
        debug_assert!(!frames.is_empty());
        let (slot, permit) = self.reserve_slot().await?;

        let mut state = self.state.lock().unwrap();
        if state.closed {
            return Err(SendError::ConnectionClosed);
        }
        state.check_full_message()?;
        Ok(enqueue(
            &mut state,
            permit,
            RequestKind::FullMessage,
            frames,
            slot,
        ))
    }

    /// Admit one explicitly cut fragment.
    ///
    /// `opcode` declares the message type (`Text` or `Binary`), `owner`
    /// identifies the endpoint handle. The first fragment opens the
    /// message; `is_last` closes it. Continuations from other handles or
    /// with a different type are rejected with `Protocol`.
    pub async fn admit_fragment(
        &self,
        opcode: OpCode,
        owner: u64,
        payload: Bytes,
        is_last: bool,
    ) -> Result<CompletionFuture> {
        let (slot, permit) = self.reserve_slot().await?;

        let mut state = self.state.lock().unwrap();
        if state.closed {
            return Err(SendError::ConnectionClosed);
        }
        let is_first = state.partial.admit_fragment(opcode, owner, is_last)?;
        let frame = encode_fragment(opcode, is_first, payload, is_last);
        Ok(enqueue(
            &mut state,
            permit,
            RequestKind::PartialFragment,
            vec![frame],
            slot,
        ))
    }

    /// Admit a control frame (ping, pong, close).
    ///
    /// Exempt from the fragmentation check: control frames interleave
    /// between data frames of an open message, never inside one.
    pub async fn admit_control(&self, frame: Frame) -> Result<CompletionFuture> {
        debug_assert!(frame.is_control());
        let (slot, permit) = self.reserve_slot().await?;

        let mut state = self.state.lock().unwrap();
        if state.closed {
            return Err(SendError::ConnectionClosed);
        }
        Ok(enqueue(
            &mut state,
            permit,
            RequestKind::Control,
            vec![frame],
            slot,
        ))
    }

    /// Whether the lane has failed or shut down.
    pub fn is_closed(&self) -> bool {
        self.state.lock().unwrap().closed
    }

    /// Whether a fragmented message is currently open.
    pub fn has_open_message(&self) -> bool {
        self.state.lock().unwrap().partial.is_open()
    }

    /// Current admitted-but-unresolved request count.
    pub fn pending_count(&self) -> usize {
        self.backpressure.pending_count()
    }

    /// Reserve a backpressure slot and a channel permit.
    ///
    /// Both waits happen outside the admission lock; only the sequence
    /// assignment and enqueue are done under it.
    async fn reserve_slot(
        &self,
    ) -> Result<(BackpressureGuard, mpsc::Permit<'_, WriteRequest>)> {
        if self.is_closed() {
            return Err(SendError::ConnectionClosed);
        }

        self.backpressure.reserve().await?;
        let slot = BackpressureGuard::new(self.backpressure.clone());

        let permit = self
            .tx
            .reserve()
            .await
            .map_err(|_| SendError::ConnectionClosed)?;
        Ok((slot, permit))
    }
}

impl AdmissionState {
    fn check_full_message(&self) -> Result<()> {
        self.partial.check_full_message()
    }
}

/// Assign the next sequence and enqueue. Caller holds the admission lock.
fn enqueue(
    state: &mut AdmissionState,
    permit: mpsc::Permit<'_, WriteRequest>,
    kind: RequestKind,
    frames: Vec<Frame>,
    slot: BackpressureGuard,
) -> CompletionFuture {
    let sequence = state.next_sequence;
    state.next_sequence += 1;

    let (handle, future) = completion_pair();
    trace!(sequence, ?kind, frames = frames.len(), "request admitted");
    permit.send(WriteRequest {
        sequence,
        kind,
        frames,
        completion: handle,
        _slot: slot,
    });
    future
}

/// Spawn the writer task and return a handle for admitting requests.
///
/// `writer` is the transport write half. The task runs until every handle
/// is dropped (clean shutdown) or a write fails (lane failure, queued and
/// future requests resolve with `ConnectionClosed`).
pub fn spawn_writer_task<W>(
    writer: W,
    config: WriterConfig,
) -> (WriterHandle, JoinHandle<Result<()>>)
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (tx, rx) = mpsc::channel(config.channel_capacity);
    let state = Arc::new(Mutex::new(AdmissionState {
        closed: false,
        next_sequence: 0,
        partial: PartialMessageState::Closed,
    }));

    let handle = WriterHandle {
        tx,
        state: state.clone(),
        backpressure: BackpressureController::with_timeout(
            config.max_pending_requests,
            config.backpressure_timeout,
        ),
    };

    debug!(
        max_pending = config.max_pending_requests,
        deadline = ?config.write_deadline,
        "writer lane started"
    );
    let task = tokio::spawn(writer_loop(rx, writer, state, config.write_deadline));

    (handle, task)
}

/// Spawn the writer task with default configuration.
pub fn spawn_writer_task_default<W>(writer: W) -> (WriterHandle, JoinHandle<Result<()>>)
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    spawn_writer_task(writer, WriterConfig::default())
}

/// Drain loop: writes one request at a time, in channel (= sequence) order.
async fn writer_loop<W>(
    mut rx: mpsc::Receiver<WriteRequest>,
    mut writer: W,
    state: Arc<Mutex<AdmissionState>>,
    write_deadline: Option<Duration>,
) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    while let Some(request) = rx.recv().await {
        // Cancelled before we got here; skip without touching the wire.
        if !request.completion.begin_writing() {
            trace!(sequence = request.sequence, "skipping cancelled request");
            continue;
        }

        let wire_size = request.wire_size();
        let outcome = match write_deadline {
            Some(deadline) => {
                match tokio::time::timeout(deadline, write_request(&mut writer, &request)).await {
                    Ok(result) => result,
                    Err(_) => Err(SendError::Timeout),
                }
            }
            None => write_request(&mut writer, &request).await,
        };

        match outcome {
            Ok(()) => {
                trace!(sequence = request.sequence, wire_size, "request written");
                request.completion.resolve(WriteResult::success(wire_size));
            }
            Err(err) => {
                error!(sequence = request.sequence, %err, "write failed, failing lane");
                request.completion.resolve(WriteResult::failure(err.kind(), 0));
                drop(request);
                fail_lane(&mut rx, &state).await;
                return Err(err);
            }
        }
    }

    // All handles dropped: flush and shut down cleanly.
    state.lock().unwrap().closed = true;
    writer.shutdown().await?;
    debug!("writer lane shut down");
    Ok(())
}

/// Terminal failure: reject future admissions, then resolve everything
/// still queued with `ConnectionClosed`, in admission order.
async fn fail_lane(rx: &mut mpsc::Receiver<WriteRequest>, state: &Arc<Mutex<AdmissionState>>) {
    // Closed is set under the admission lock, so a racing producer either
    // sees it and fails fast, or its request is already in the channel and
    // gets resolved below.
    state.lock().unwrap().closed = true;
    rx.close();

    while let Some(request) = rx.recv().await {
        request
            .completion
            .resolve(WriteResult::failure(SendErrorKind::ConnectionClosed, 0));
    }
}

/// Write one request's frames with scatter/gather I/O.
///
/// All frames go into a single `write_vectored` when the transport takes
/// them; on a short write the remaining slices are rebuilt and retried
/// until the request is fully on the wire.
async fn write_request<W>(writer: &mut W, request: &WriteRequest) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let headers: Vec<HeaderBytes> = request
        .frames
        .iter()
        .map(Frame::encode_header)
        .collect();

    let mut slices: Vec<IoSlice<'_>> = Vec::with_capacity(request.frames.len() * 2);
    for (frame, header) in request.frames.iter().zip(&headers) {
        slices.push(IoSlice::new(header.as_slice()));
        if frame.payload_len() > 0 {
            slices.push(IoSlice::new(frame.payload()));
        }
    }

    let total_size = request.wire_size();
    let written = writer.write_vectored(&slices).await?;

    if written == 0 && total_size > 0 {
        return Err(SendError::Io(std::io::Error::new(
            std::io::ErrorKind::WriteZero,
            "write_vectored returned 0",
        )));
    }

    let mut total_written = written;
    while total_written < total_size {
        let remaining = build_remaining_slices(&request.frames, &headers, total_written);
        if remaining.is_empty() {
            break;
        }

        let written = writer.write_vectored(&remaining).await?;
        if written == 0 {
            return Err(SendError::Io(std::io::Error::new(
                std::io::ErrorKind::WriteZero,
                "write_vectored returned 0",
            )));
        }
        total_written += written;
    }

    writer.flush().await?;
    Ok(())
}

/// Build the IoSlice array for the bytes still unwritten after a short write.
fn build_remaining_slices<'a>(
    frames: &'a [Frame],
    headers: &'a [HeaderBytes],
    skip_bytes: usize,
) -> Vec<IoSlice<'a>> {
    let mut slices = Vec::with_capacity(frames.len() * 2);
    let mut skipped = 0;

    for (frame, header) in frames.iter().zip(headers) {
        let header_start = skipped;
        let header_end = skipped + header.len();

        if skip_bytes < header_end {
            let start_in_header = skip_bytes.saturating_sub(header_start);
            slices.push(IoSlice::new(&header.as_slice()[start_in_header..]));
        }
        skipped = header_end;

        if frame.payload_len() > 0 {
            let payload_start = skipped;
            let payload_end = skipped + frame.payload_len();

            if skip_bytes < payload_end {
                let start_in_payload = skip_bytes.saturating_sub(payload_start);
                slices.push(IoSlice::new(&frame.payload()[start_in_payload..]));
            }
            skipped = payload_end;
        }
    }

    slices
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{FragmentPolicy, FrameBuffer};
    use bytes::Bytes;
    use std::io::Cursor;
    use tokio::io::{duplex, AsyncReadExt};

    fn text_frames(s: &str) -> Vec<Frame> {
        crate::protocol::encode_message(
            OpCode::Text,
            Bytes::copy_from_slice(s.as_bytes()),
            FragmentPolicy::SingleFrame,
        )
    }

    async fn read_frames<R>(reader: &mut R, expected: usize) -> Vec<Frame>
    where
        R: tokio::io::AsyncRead + Unpin,
    {
        let mut buffer = FrameBuffer::new();
        let mut frames = Vec::new();
        let mut chunk = vec![0u8; 4096];
        while frames.len() < expected {
            let n = reader.read(&mut chunk).await.unwrap();
            assert!(n > 0, "transport closed before {} frames", expected);
            frames.extend(buffer.push(&chunk[..n]).unwrap());
        }
        frames
    }

    #[test]
    fn test_writer_config_default() {
        let config = WriterConfig::default();
        assert_eq!(config.max_pending_requests, DEFAULT_MAX_PENDING_REQUESTS);
        assert_eq!(config.channel_capacity, DEFAULT_CHANNEL_CAPACITY);
        assert_eq!(config.backpressure_timeout, DEFAULT_BACKPRESSURE_TIMEOUT);
        assert!(config.write_deadline.is_none());
    }

    #[tokio::test]
    async fn test_admit_and_write_single_message() {
        let (client, mut server) = duplex(4096);
        let (handle, _task) = spawn_writer_task_default(client);

        let future = handle.admit_full(text_frames("hello")).await.unwrap();
        let result = future.wait().await;
        assert!(result.is_success());
        assert_eq!(result.bytes_written(), 2 + 5);

        let frames = read_frames(&mut server, 1).await;
        assert_eq!(frames[0].opcode(), OpCode::Text);
        assert_eq!(frames[0].payload(), b"hello");
    }

    #[tokio::test]
    async fn test_requests_written_in_admission_order() {
        let (client, mut server) = duplex(65536);
        let (handle, _task) = spawn_writer_task_default(client);

        let mut futures = Vec::new();
        for i in 0..20 {
            let frames = text_frames(&format!("msg-{i}"));
            futures.push(handle.admit_full(frames).await.unwrap());
        }
        for future in &futures {
            assert!(future.wait().await.is_success());
        }

        let frames = read_frames(&mut server, 20).await;
        for (i, frame) in frames.iter().enumerate() {
            assert_eq!(frame.payload(), format!("msg-{i}").as_bytes());
        }
    }

    #[tokio::test]
    async fn test_fragment_owner_and_interleaved_control() {
        let (client, mut server) = duplex(4096);
        let (handle, _task) = spawn_writer_task_default(client);

        let f1 = handle
            .admit_fragment(OpCode::Text, 1, Bytes::from_static(b"Hel"), false)
            .await
            .unwrap();

        // Full messages are rejected while the message is open.
        let err = handle.admit_full(text_frames("nope")).await;
        assert!(matches!(err, Err(SendError::Protocol(_))));

        // Control frames pass through.
        let ping = handle
            .admit_control(Frame::ping(Bytes::from_static(b"hb")).unwrap())
            .await
            .unwrap();

        let f2 = handle
            .admit_fragment(OpCode::Text, 1, Bytes::from_static(b"lo"), true)
            .await
            .unwrap();

        assert!(f1.wait().await.is_success());
        assert!(ping.wait().await.is_success());
        assert!(f2.wait().await.is_success());
        assert!(!handle.has_open_message());

        let frames = read_frames(&mut server, 3).await;
        assert_eq!(frames[0].opcode(), OpCode::Text);
        assert!(!frames[0].is_final());
        assert_eq!(frames[1].opcode(), OpCode::Ping);
        assert_eq!(frames[2].opcode(), OpCode::Continuation);
        assert!(frames[2].is_final());
    }

    #[tokio::test]
    async fn test_cancel_before_write_skips_wire() {
        // A tiny transport keeps later requests pending in the queue.
        let (client, mut server) = duplex(16);
        let config = WriterConfig {
            channel_capacity: 16,
            ..WriterConfig::default()
        };
        let (handle, _task) = spawn_writer_task(client, config);

        // First request fills the tiny transport buffer and stalls the loop.
        let big = handle
            .admit_full(vec![Frame::binary(Bytes::from(vec![0u8; 64]))])
            .await
            .unwrap();

        let doomed = handle.admit_full(text_frames("cancelled")).await.unwrap();
        let survivor = handle.admit_full(text_frames("kept")).await.unwrap();
        assert!(doomed.cancel());

        let result = doomed.wait().await;
        assert_eq!(result.error_kind(), Some(SendErrorKind::Cancelled));

        // Unblock the transport and verify the cancelled frame never hit it.
        let reader = tokio::spawn(async move {
            let mut all = Vec::new();
            let mut chunk = vec![0u8; 1024];
            loop {
                let n = server.read(&mut chunk).await.unwrap();
                if n == 0 {
                    break;
                }
                all.extend_from_slice(&chunk[..n]);
            }
            all
        });

        assert!(big.wait().await.is_success());
        assert!(survivor.wait().await.is_success());
        drop(handle);

        let wire = reader.await.unwrap();
        let mut buffer = FrameBuffer::new();
        let frames = buffer.push(&wire).unwrap();
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[1].payload(), b"kept");
    }

    #[tokio::test]
    async fn test_lane_fails_on_transport_close() {
        let (client, server) = duplex(16);
        let (handle, task) = spawn_writer_task_default(client);

        // Dropping the read half makes further writes fail.
        drop(server);

        // The first admission may still be accepted; wait for resolution.
        let mut saw_failure = false;
        for i in 0..10 {
            match handle.admit_full(text_frames(&format!("m{i}"))).await {
                Ok(future) => {
                    let result = future.wait().await;
                    if !result.is_success() {
                        saw_failure = true;
                        break;
                    }
                }
                Err(SendError::ConnectionClosed) => {
                    saw_failure = true;
                    break;
                }
                Err(other) => panic!("unexpected admission error: {other}"),
            }
        }
        assert!(saw_failure);

        assert!(task.await.unwrap().is_err());
        assert!(handle.is_closed());

        // Admissions after failure fail fast.
        assert!(matches!(
            handle.admit_full(text_frames("late")).await,
            Err(SendError::ConnectionClosed)
        ));
    }

    #[tokio::test]
    async fn test_clean_shutdown_on_handle_drop() {
        let (client, _server) = duplex(4096);
        let (handle, task) = spawn_writer_task_default(client);

        drop(handle);
        assert!(task.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn test_write_deadline_times_out() {
        // 16-byte transport with no reader: the large write can never finish.
        let (client, _server) = duplex(16);
        let config = WriterConfig {
            write_deadline: Some(Duration::from_millis(20)),
            ..WriterConfig::default()
        };
        let (handle, task) = spawn_writer_task(client, config);

        let future = handle
            .admit_full(vec![Frame::binary(Bytes::from(vec![0u8; 4096]))])
            .await
            .unwrap();

        let result = future.wait().await;
        assert_eq!(result.error_kind(), Some(SendErrorKind::Timeout));

        assert!(matches!(task.await.unwrap(), Err(SendError::Timeout)));
        assert!(handle.is_closed());
    }

    #[tokio::test]
    async fn test_write_request_multi_frame_contiguous() {
        let mut buf = Cursor::new(Vec::new());
        let frames = crate::protocol::encode_message(
            OpCode::Binary,
            Bytes::from(vec![7u8; 10]),
            FragmentPolicy::MaxPayload(4),
        );
        let (handle, _future) = completion_pair();
        let controller = BackpressureController::new(8);
        controller.try_reserve().unwrap();
        let request = WriteRequest {
            sequence: 0,
            kind: RequestKind::FullMessage,
            frames,
            completion: handle,
            _slot: BackpressureGuard::new(controller),
        };

        write_request(&mut buf, &request).await.unwrap();

        let mut buffer = FrameBuffer::new();
        let parsed = buffer.push(&buf.into_inner()).unwrap();
        assert_eq!(parsed.len(), 3);
        let joined: Vec<u8> = parsed.iter().flat_map(|f| f.payload().to_vec()).collect();
        assert_eq!(joined, vec![7u8; 10]);
    }

    #[test]
    fn test_build_remaining_slices_offsets() {
        let frames = vec![Frame::text(Bytes::from_static(b"hello"))];
        let headers: Vec<HeaderBytes> = frames.iter().map(Frame::encode_header).collect();

        let slices = build_remaining_slices(&frames, &headers, 0);
        assert_eq!(slices.len(), 2);

        // Mid-header resume.
        let slices = build_remaining_slices(&frames, &headers, 1);
        assert_eq!(slices.len(), 2);
        assert_eq!(slices[0].len(), 1);
        assert_eq!(slices[1].len(), 5);

        // Header fully written, payload partially.
        let slices = build_remaining_slices(&frames, &headers, 4);
        assert_eq!(slices.len(), 1);
        assert_eq!(slices[0].len(), 3);

        // Everything written.
        let slices = build_remaining_slices(&frames, &headers, 7);
        assert!(slices.is_empty());
    }
}
