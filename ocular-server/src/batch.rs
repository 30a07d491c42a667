// Batch controller: accumulate frames, release them to inference, emit results

use crate::error::SessionError;
use crate::protocol::{Outbound, ResultFraming};
use bytes::Bytes;
use ocular_eye::{DetectionAdapter, DetectionParams};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinSet;
use tracing::{debug, error, warn};

/// Accumulation state of the pending batch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchPhase {
    /// No frames pending
    Idle,
    /// At least one frame waiting for a release
    Accumulating,
}

/// Owns the pending batch and the batches in flight for one session.
///
/// Released batches run concurrently, but each waits for its predecessor
/// before emitting, so results leave in release order. Dropping the
/// controller aborts everything still in flight.
pub struct BatchController {
    pending: Vec<Bytes>,
    in_flight: JoinSet<Result<(), SessionError>>,
    /// Completes when the most recently released batch has emitted
    tail: Option<oneshot::Receiver<()>>,
    next_seq: u64,
    adapter: DetectionAdapter,
    outbound: mpsc::UnboundedSender<Outbound>,
    framing: ResultFraming,
}

impl BatchController {
    pub fn new(
        adapter: DetectionAdapter,
        outbound: mpsc::UnboundedSender<Outbound>,
        framing: ResultFraming,
    ) -> Self {
        Self {
            pending: Vec::new(),
            in_flight: JoinSet::new(),
            tail: None,
            next_seq: 0,
            adapter,
            outbound,
            framing,
        }
    }

    pub fn phase(&self) -> BatchPhase {
        if self.pending.is_empty() {
            BatchPhase::Idle
        } else {
            BatchPhase::Accumulating
        }
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    pub fn append(&mut self, frame: Bytes) {
        self.pending.push(frame);
    }

    /// Hand the pending frames to the adapter with `params` as their
    /// settings. Returns the batch sequence number, or `None` when nothing
    /// was pending.
    pub fn release(&mut self, params: DetectionParams) -> Option<u64> {
        if self.pending.is_empty() {
            return None;
        }

        let frames = std::mem::take(&mut self.pending);
        let seq = self.next_seq;
        self.next_seq += 1;

        let previous = self.tail.take();
        let (done_tx, done_rx) = oneshot::channel();
        self.tail = Some(done_rx);

        debug!("Releasing batch {} with {} frames", seq, frames.len());
        self.in_flight.spawn(run_batch(BatchJob {
            seq,
            frames,
            params,
            adapter: self.adapter.clone(),
            previous,
            done: done_tx,
            outbound: self.outbound.clone(),
            framing: self.framing,
        }));
        Some(seq)
    }

    /// Wait for the next in-flight batch to finish.
    ///
    /// Returns `None` immediately when nothing is in flight.
    pub async fn join_next(&mut self) -> Option<Result<(), SessionError>> {
        let joined = self.in_flight.join_next().await?;
        Some(match joined {
            Ok(outcome) => outcome,
            Err(e) if e.is_cancelled() => Ok(()),
            Err(e) => Err(SessionError::Fatal(format!("Batch task panicked: {}", e))),
        })
    }
}

struct BatchJob {
    seq: u64,
    frames: Vec<Bytes>,
    params: DetectionParams,
    adapter: DetectionAdapter,
    previous: Option<oneshot::Receiver<()>>,
    done: oneshot::Sender<()>,
    outbound: mpsc::UnboundedSender<Outbound>,
    framing: ResultFraming,
}

async fn run_batch(job: BatchJob) -> Result<(), SessionError> {
    let BatchJob {
        seq,
        frames,
        params,
        adapter,
        previous,
        done,
        outbound,
        framing,
    } = job;
    let count = frames.len();

    let result = adapter.detect_frames(frames, params).await;

    // A dropped sender means the predecessor already finished or failed
    if let Some(previous) = previous {
        let _ = previous.await;
    }

    let outcome = match result {
        Ok(batch) => {
            let mut sent = Ok(());
            for message in framing.messages(batch) {
                if outbound.send(message).is_err() {
                    sent = Err(SessionError::Transport("Outbound channel closed".to_string()));
                    break;
                }
            }
            sent
        }
        Err(e) if e.is_fatal() => {
            error!("Batch {} broke the result invariant: {}", seq, e);
            Err(SessionError::Eye(e))
        }
        Err(e) => {
            warn!("Batch {} of {} frames failed: {}", seq, count, e);
            outbound
                .send(Outbound::BatchFailed {
                    error: e.to_string(),
                    frames: count,
                })
                .map_err(|_| SessionError::Transport("Outbound channel closed".to_string()))
        }
    };

    let _ = done.send(());
    outcome
}
