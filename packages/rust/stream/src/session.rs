//! Lifecycle of one streaming pipeline run.
//!
//! A [`PipelineSession`] opens the stream through a [`Transport`], pushes every
//! fragment through the decoder, parser, and reconciler, and reports the
//! reconciled view to a [`SessionSubscriber`]. The state machine is
//!
//! ```text
//! idle → requesting → streaming → completed | failed | cancelled
//! ```
//!
//! Everything runs on the caller's task. The only suspension points are the
//! open request and waiting for the next fragment; both race the session's
//! cancel signal.

use std::future::Future;
use std::ops::ControlFlow;
use std::sync::Arc;
use std::time::{Duration, Instant};

use edastream_shared::{EdaError, GenerateEdaRequest, Result, SessionId};
use futures::{Stream, StreamExt};
use tokio::sync::watch;
use tracing::{debug, info, instrument, warn};

use crate::decoder::FrameDecoder;
use crate::parser::{FrameDiagnostic, parse_payload};
use crate::reconciler::{BlockReconciler, BlockState};

// ---------------------------------------------------------------------------
// Seams
// ---------------------------------------------------------------------------

/// Something that can open the EDA event stream.
///
/// `open` resolves once the server has accepted the request; a non-success
/// response must come back as an error, never as a body.
pub trait Transport {
    /// One network fragment.
    type Chunk: AsRef<[u8]>;
    /// The response body as a fragment stream; ends when the connection closes.
    type Body: Stream<Item = Result<Self::Chunk>> + Unpin;

    fn open(&self, request: &GenerateEdaRequest) -> impl Future<Output = Result<Self::Body>>;
}

/// Receiver of session progress.
///
/// Per session, at most one of `on_error` / `on_complete` fires, exactly once,
/// and neither fires after a cancel.
pub trait SessionSubscriber {
    /// The reconciled view changed; `blocks` is in first-seen order.
    fn on_update(&mut self, blocks: &[BlockState]);

    /// The stream could not be opened or broke off.
    fn on_error(&mut self, error: &EdaError);

    /// The server closed the stream normally.
    fn on_complete(&mut self);

    /// A frame was dropped because it did not parse. Non-fatal.
    fn on_diagnostic(&mut self, _diagnostic: &FrameDiagnostic) {}
}

/// Subscriber built from three closures.
pub struct Callbacks<U, E, C> {
    on_update: U,
    on_error: E,
    on_complete: C,
}

impl<U, E, C> Callbacks<U, E, C>
where
    U: FnMut(&[BlockState]),
    E: FnMut(&EdaError),
    C: FnMut(),
{
    pub fn new(on_update: U, on_error: E, on_complete: C) -> Self {
        Self {
            on_update,
            on_error,
            on_complete,
        }
    }
}

impl<U, E, C> SessionSubscriber for Callbacks<U, E, C>
where
    U: FnMut(&[BlockState]),
    E: FnMut(&EdaError),
    C: FnMut(),
{
    fn on_update(&mut self, blocks: &[BlockState]) {
        (self.on_update)(blocks)
    }

    fn on_error(&mut self, error: &EdaError) {
        (self.on_error)(error)
    }

    fn on_complete(&mut self) {
        (self.on_complete)()
    }
}

// ---------------------------------------------------------------------------
// Status, outcome, report
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    Idle,
    Requesting,
    Streaming,
    Completed,
    Failed,
    Cancelled,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Requesting => "requesting",
            Self::Streaming => "streaming",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a session ended.
#[derive(Debug)]
pub enum SessionOutcome {
    Completed,
    Failed(EdaError),
    Cancelled,
}

impl SessionOutcome {
    fn status(&self) -> SessionStatus {
        match self {
            Self::Completed => SessionStatus::Completed,
            Self::Failed(_) => SessionStatus::Failed,
            Self::Cancelled => SessionStatus::Cancelled,
        }
    }
}

/// Counters collected over one session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionStats {
    /// Fragments received from the transport.
    pub fragments: u64,
    pub bytes: u64,
    /// `data:` frames handed to the parser.
    pub data_frames: u64,
    /// Frames skipped for lacking the `data:` prefix.
    pub noise_frames: u64,
    /// `data:` frames dropped because they did not parse.
    pub malformed_frames: u64,
    /// Updates merged into the reconciler.
    pub updates_applied: u64,
    /// Bytes of an unterminated final frame thrown away at end of stream.
    pub trailing_bytes_discarded: u64,
}

/// Final state of a finished session.
#[derive(Debug)]
pub struct SessionReport {
    pub id: SessionId,
    pub status: SessionStatus,
    pub outcome: SessionOutcome,
    /// Reconciled view at the moment the session ended.
    pub blocks: Vec<BlockState>,
    pub stats: SessionStats,
    pub elapsed: Duration,
}

// ---------------------------------------------------------------------------
// CancelHandle
// ---------------------------------------------------------------------------

/// Cloneable handle that aborts a session from anywhere.
///
/// Cancelling is idempotent and takes effect before the next frame is
/// forwarded; nothing else reaches the subscriber afterwards.
#[derive(Debug, Clone)]
pub struct CancelHandle {
    tx: Arc<watch::Sender<bool>>,
}

impl CancelHandle {
    pub fn cancel(&self) {
        if !self.tx.send_replace(true) {
            debug!("session cancel requested");
        }
    }

    pub fn is_cancelled(&self) -> bool {
        *self.tx.borrow()
    }
}

/// Resolves once the session is cancelled.
async fn cancelled(rx: &mut watch::Receiver<bool>) {
    // The session owns a sender for its whole run, so this only returns on cancel.
    let _ = rx.wait_for(|cancelled| *cancelled).await;
}

// ---------------------------------------------------------------------------
// PipelineSession
// ---------------------------------------------------------------------------

/// One streaming request and everything it owns: decoder, reconciler, stats.
///
/// [`run`](Self::run) consumes the session; a new pipeline run needs a new
/// session, so block state never leaks between runs.
#[derive(Debug)]
pub struct PipelineSession {
    id: SessionId,
    status: SessionStatus,
    decoder: FrameDecoder,
    reconciler: BlockReconciler,
    stats: SessionStats,
    cancel_tx: Arc<watch::Sender<bool>>,
    cancel_rx: watch::Receiver<bool>,
}

impl Default for PipelineSession {
    fn default() -> Self {
        Self::new()
    }
}

impl PipelineSession {
    pub fn new() -> Self {
        let (tx, rx) = watch::channel(false);
        Self {
            id: SessionId::new(),
            status: SessionStatus::Idle,
            decoder: FrameDecoder::new(),
            reconciler: BlockReconciler::new(),
            stats: SessionStats::default(),
            cancel_tx: Arc::new(tx),
            cancel_rx: rx,
        }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn status(&self) -> SessionStatus {
        self.status
    }

    /// Handle for aborting this session; grab it before calling [`run`](Self::run).
    pub fn cancel_handle(&self) -> CancelHandle {
        CancelHandle {
            tx: Arc::clone(&self.cancel_tx),
        }
    }

    /// Open the stream and drive it to a terminal state.
    ///
    /// Never returns an error: failures are reported through
    /// [`SessionSubscriber::on_error`] and [`SessionOutcome::Failed`].
    #[instrument(skip_all, fields(session = %self.id, csv_id = %request.csv_id))]
    pub async fn run<T, S>(
        mut self,
        transport: &T,
        request: &GenerateEdaRequest,
        subscriber: &mut S,
    ) -> SessionReport
    where
        T: Transport,
        S: SessionSubscriber + ?Sized,
    {
        let clock = Instant::now();

        self.transition(SessionStatus::Requesting);

        let mut cancel_rx = self.cancel_rx.clone();
        let opened = tokio::select! {
            biased;
            _ = cancelled(&mut cancel_rx) => None,
            result = transport.open(request) => Some(result),
        };

        let outcome = match opened {
            None => SessionOutcome::Cancelled,
            Some(Err(e)) => self.fail(e, subscriber),
            Some(Ok(body)) => self.pump(body, subscriber).await,
        };

        self.into_report(outcome, clock.elapsed())
    }

    /// Read fragments until the body ends, errors, or the session is cancelled.
    ///
    /// The body is dropped on return, which releases the connection.
    async fn pump<B, C, S>(&mut self, mut body: B, subscriber: &mut S) -> SessionOutcome
    where
        B: Stream<Item = Result<C>> + Unpin,
        C: AsRef<[u8]>,
        S: SessionSubscriber + ?Sized,
    {
        let mut cancel_rx = self.cancel_rx.clone();

        loop {
            let next = tokio::select! {
                biased;
                _ = cancelled(&mut cancel_rx) => return SessionOutcome::Cancelled,
                next = body.next() => next,
            };

            match next {
                Some(Ok(chunk)) => {
                    if self.forward(chunk.as_ref(), subscriber).is_break() {
                        return SessionOutcome::Cancelled;
                    }
                }
                Some(Err(e)) => return self.fail(e, subscriber),
                None => break,
            }
        }

        self.stats.trailing_bytes_discarded = self.decoder.finish() as u64;

        if self.is_cancelled() {
            return SessionOutcome::Cancelled;
        }
        self.transition(SessionStatus::Completed);
        subscriber.on_complete();
        SessionOutcome::Completed
    }

    /// Decode one fragment and forward every update it completes.
    fn forward<S>(&mut self, fragment: &[u8], subscriber: &mut S) -> ControlFlow<()>
    where
        S: SessionSubscriber + ?Sized,
    {
        if self.is_cancelled() {
            return ControlFlow::Break(());
        }
        if self.status == SessionStatus::Requesting {
            self.transition(SessionStatus::Streaming);
        }

        self.stats.fragments += 1;
        self.stats.bytes += fragment.len() as u64;

        let payloads = self.decoder.decode(fragment);
        self.stats.noise_frames = self.decoder.noise_dropped();

        for payload in payloads {
            // A callback may have cancelled while handling the previous frame.
            if self.is_cancelled() {
                return ControlFlow::Break(());
            }
            self.stats.data_frames += 1;

            match parse_payload(&payload) {
                Ok(update) => {
                    debug!(block_id = update.block_id, status = %update.status, "block update");
                    self.stats.updates_applied += 1;
                    let view = self.reconciler.apply(update);
                    subscriber.on_update(view);
                }
                Err(e) => {
                    self.stats.malformed_frames += 1;
                    let diagnostic = FrameDiagnostic::new(self.stats.data_frames, &payload, &e);
                    warn!(
                        session = %self.id,
                        frame = diagnostic.frame_index,
                        error = %diagnostic.error,
                        preview = %diagnostic.preview,
                        "dropping malformed frame"
                    );
                    subscriber.on_diagnostic(&diagnostic);
                }
            }
        }

        ControlFlow::Continue(())
    }

    fn fail<S>(&mut self, error: EdaError, subscriber: &mut S) -> SessionOutcome
    where
        S: SessionSubscriber + ?Sized,
    {
        if self.is_cancelled() {
            return SessionOutcome::Cancelled;
        }
        warn!(error = %error, "session failed");
        self.transition(SessionStatus::Failed);
        subscriber.on_error(&error);
        SessionOutcome::Failed(error)
    }

    fn is_cancelled(&self) -> bool {
        *self.cancel_rx.borrow()
    }

    fn transition(&mut self, next: SessionStatus) {
        debug!(from = %self.status, to = %next, "session transition");
        self.status = next;
    }

    fn into_report(mut self, outcome: SessionOutcome, elapsed: Duration) -> SessionReport {
        let status = outcome.status();
        if self.status != status {
            self.transition(status);
        }

        info!(
            status = %status,
            blocks = self.reconciler.len(),
            updates = self.stats.updates_applied,
            malformed = self.stats.malformed_frames,
            elapsed_ms = elapsed.as_millis() as u64,
            "session finished"
        );

        SessionReport {
            id: self.id,
            status,
            outcome,
            blocks: self.reconciler.into_blocks(),
            stats: self.stats,
            elapsed,
        }
    }
}
