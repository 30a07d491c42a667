// Session protocol behavior, driven through channels with a recording engine

use async_trait::async_trait;
use bytes::Bytes;
use image::{DynamicImage, ImageOutputFormat, RgbImage};
use ocular_eye::{DecodedImage, Detection, DetectionAdapter, DetectionEngine, DetectionParams, EyeError};
use ocular_server::debug_sink::{DebugSink, FrameStore};
use ocular_server::protocol::{ConfigUpdate, FrameResult};
use ocular_server::{run_session, Inbound, Outbound, ResultFraming, SessionContext, SessionError};
use parking_lot::Mutex;
use std::io::Cursor;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::UnboundedReceiverStream;

#[derive(Debug, Clone)]
struct Call {
    widths: Vec<u32>,
    params: DetectionParams,
}

#[derive(Clone, Copy, PartialEq)]
enum Fault {
    None,
    /// Fail the call with this index
    FailCall(usize),
    /// Return one result too few
    ShortResult,
}

/// Labels every frame `w<width>` and scores it with the batch confidence
struct RecordingEngine {
    calls: Arc<Mutex<Vec<Call>>>,
    delay: Duration,
    fault: Fault,
}

impl DetectionEngine for RecordingEngine {
    fn name(&self) -> String {
        "recording".to_string()
    }

    fn device(&self) -> String {
        "cpu".to_string()
    }

    fn predict(
        &mut self,
        images: &[DecodedImage],
        params: &DetectionParams,
    ) -> Result<Vec<Vec<Detection>>, EyeError> {
        let index = {
            let mut calls = self.calls.lock();
            calls.push(Call {
                widths: images.iter().map(|i| i.width()).collect(),
                params: params.clone(),
            });
            calls.len() - 1
        };
        std::thread::sleep(self.delay);

        if self.fault == Fault::FailCall(index) {
            return Err(EyeError::Inference("engine fault".to_string()));
        }
        let mut frames: Vec<Vec<Detection>> = images
            .iter()
            .map(|i| vec![Detection::new(format!("w{}", i.width()), params.confidence, [0.0; 4])])
            .collect();
        if self.fault == Fault::ShortResult {
            frames.pop();
        }
        Ok(frames)
    }
}

#[derive(Default)]
struct MemoryStore {
    frames: Mutex<Vec<Bytes>>,
}

#[async_trait]
impl FrameStore for MemoryStore {
    async fn store(&self, frame: Bytes) -> std::io::Result<String> {
        let mut frames = self.frames.lock();
        frames.push(frame);
        Ok(format!("{}.jpg", frames.len()))
    }
}

struct Harness {
    inbound: mpsc::UnboundedSender<Result<Inbound, SessionError>>,
    outbound: mpsc::UnboundedReceiver<Outbound>,
    task: JoinHandle<Result<(), SessionError>>,
    calls: Arc<Mutex<Vec<Call>>>,
}

struct Options {
    delay: Duration,
    fault: Fault,
    framing: ResultFraming,
    debug_sink: Option<DebugSink>,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            delay: Duration::ZERO,
            fault: Fault::None,
            framing: ResultFraming::PerFrame,
            debug_sink: None,
        }
    }
}

impl Harness {
    fn start(options: Options) -> Self {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let engine = RecordingEngine {
            calls: calls.clone(),
            delay: options.delay,
            fault: options.fault,
        };
        let ctx = SessionContext {
            adapter: DetectionAdapter::new(Box::new(engine)),
            debug_sink: options.debug_sink,
            framing: options.framing,
        };

        let (in_tx, in_rx) = mpsc::unbounded_channel();
        let (out_tx, out_rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(async move {
            run_session("test-session", UnboundedReceiverStream::new(in_rx), out_tx, ctx).await
        });

        Self {
            inbound: in_tx,
            outbound: out_rx,
            task,
            calls,
        }
    }

    fn frame(&self, width: u32) {
        self.inbound.send(Ok(Inbound::Frame(png(width)))).unwrap();
    }

    fn release(&self) {
        self.inbound.send(Ok(Inbound::Release)).unwrap();
    }

    fn configure(&self, update: ConfigUpdate) {
        self.inbound.send(Ok(Inbound::Configure(update))).unwrap();
    }

    async fn next(&mut self) -> Outbound {
        tokio::time::timeout(Duration::from_secs(5), self.outbound.recv())
            .await
            .expect("timed out waiting for outbound message")
            .expect("outbound channel closed")
    }

    async fn next_result(&mut self) -> Vec<FrameResult> {
        match self.next().await {
            Outbound::Results(entries) => entries,
            other => panic!("Expected results, got {:?}", other),
        }
    }

    async fn assert_quiet(&mut self) {
        tokio::time::sleep(Duration::from_millis(150)).await;
        if let Ok(message) = self.outbound.try_recv() {
            panic!("Expected no output, got {:?}", message);
        }
    }
}

fn png(width: u32) -> Bytes {
    let mut buf = Vec::new();
    DynamicImage::ImageRgb8(RgbImage::new(width, 2))
        .write_to(&mut Cursor::new(&mut buf), ImageOutputFormat::Png)
        .unwrap();
    Bytes::from(buf)
}

fn label(entry: &FrameResult) -> &str {
    &entry.detections[0].label
}

#[tokio::test]
async fn test_n_frames_give_n_results_in_order() {
    let mut h = Harness::start(Options::default());
    for width in [4, 2, 7, 1, 3] {
        h.frame(width);
    }
    h.release();

    let mut labels = Vec::new();
    for _ in 0..5 {
        let entries = h.next_result().await;
        assert_eq!(entries.len(), 1);
        assert!(entries[0].success);
        labels.push(label(&entries[0]).to_string());
    }
    assert_eq!(labels, vec!["w4", "w2", "w7", "w1", "w3"]);
    h.assert_quiet().await;

    let calls = h.calls.lock();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].widths, vec![4, 2, 7, 1, 3]);
}

#[tokio::test]
async fn test_update_applies_to_whole_pending_batch() {
    let mut h = Harness::start(Options::default());
    h.frame(1);
    h.frame(2);
    h.frame(3);
    h.configure(ConfigUpdate {
        keywords: Some(vec!["cup".to_string(), "phone".to_string()]),
        confidence: Some(0.3),
        ..Default::default()
    });
    h.frame(4);
    h.release();

    assert_eq!(h.next().await, Outbound::Ack);
    for _ in 0..4 {
        let entries = h.next_result().await;
        assert_eq!(entries[0].detections[0].confidence, 0.3);
    }
    h.assert_quiet().await;

    let calls = h.calls.lock();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].widths, vec![1, 2, 3, 4]);
    assert_eq!(calls[0].params.confidence, 0.3);
    assert_eq!(calls[0].params.labels, vec!["cup".to_string(), "phone".to_string()]);
}

#[tokio::test]
async fn test_update_never_reaches_released_batch() {
    let mut h = Harness::start(Options {
        delay: Duration::from_millis(50),
        ..Default::default()
    });
    h.frame(1);
    h.release();
    h.configure(ConfigUpdate {
        confidence: Some(0.9),
        ..Default::default()
    });
    h.frame(2);
    h.release();

    assert_eq!(h.next().await, Outbound::Ack);
    let first = h.next_result().await;
    let second = h.next_result().await;
    assert_eq!(label(&first[0]), "w1");
    assert_eq!(first[0].detections[0].confidence, 0.05);
    assert_eq!(label(&second[0]), "w2");
    assert_eq!(second[0].detections[0].confidence, 0.9);
}

#[tokio::test]
async fn test_empty_release_is_silent() {
    let mut h = Harness::start(Options::default());
    h.release();
    h.assert_quiet().await;
    assert!(h.calls.lock().is_empty());
}

#[tokio::test]
async fn test_back_to_back_releases() {
    let mut h = Harness::start(Options::default());
    h.frame(5);
    h.release();
    h.release();

    let entries = h.next_result().await;
    assert_eq!(label(&entries[0]), "w5");
    h.assert_quiet().await;
    assert_eq!(h.calls.lock().len(), 1);
}

#[tokio::test]
async fn test_failed_batch_does_not_affect_next() {
    let mut h = Harness::start(Options {
        fault: Fault::FailCall(0),
        ..Default::default()
    });
    h.frame(1);
    h.frame(2);
    h.release();
    h.frame(3);
    h.release();

    match h.next().await {
        Outbound::BatchFailed { error, frames } => {
            assert!(error.contains("engine fault"));
            assert_eq!(frames, 2);
        }
        other => panic!("Expected batch failure, got {:?}", other),
    }
    let entries = h.next_result().await;
    assert_eq!(label(&entries[0]), "w3");
    h.assert_quiet().await;
    assert!(!h.task.is_finished());
}

#[tokio::test]
async fn test_undecodable_frame_fails_its_batch_only() {
    let mut h = Harness::start(Options::default());
    h.frame(1);
    h.inbound
        .send(Ok(Inbound::Frame(Bytes::from_static(b"not an image"))))
        .unwrap();
    h.release();
    h.frame(6);
    h.release();

    match h.next().await {
        Outbound::BatchFailed { frames, .. } => assert_eq!(frames, 2),
        other => panic!("Expected batch failure, got {:?}", other),
    }
    let entries = h.next_result().await;
    assert_eq!(label(&entries[0]), "w6");
    // The engine never saw the broken batch
    assert_eq!(h.calls.lock().len(), 1);
}

#[tokio::test]
async fn test_save_images_gates_persistence() {
    let store = Arc::new(MemoryStore::default());
    let (sink, _worker) = DebugSink::spawn(store.clone(), 8);
    let mut saved = sink.subscribe();
    let mut h = Harness::start(Options {
        debug_sink: Some(sink),
        ..Default::default()
    });

    h.configure(ConfigUpdate {
        save_images: Some(true),
        ..Default::default()
    });
    h.frame(1);
    h.configure(ConfigUpdate {
        save_images: Some(false),
        ..Default::default()
    });
    h.frame(2);
    h.frame(3);
    h.release();

    assert_eq!(h.next().await, Outbound::Ack);
    assert_eq!(h.next().await, Outbound::Ack);
    for _ in 0..3 {
        h.next_result().await;
    }
    tokio::time::timeout(Duration::from_secs(5), saved.recv())
        .await
        .unwrap()
        .unwrap();
    h.assert_quiet().await;

    let frames = store.frames.lock();
    assert_eq!(frames.len(), 1);
    assert_eq!(frames[0], png(1));
}

#[tokio::test]
async fn test_disconnect_during_inference_is_silent() {
    let mut h = Harness::start(Options {
        delay: Duration::from_millis(300),
        ..Default::default()
    });
    h.frame(1);
    h.release();
    tokio::time::sleep(Duration::from_millis(50)).await;
    h.inbound.send(Ok(Inbound::Close)).unwrap();

    let outcome = tokio::time::timeout(Duration::from_millis(200), &mut h.task)
        .await
        .expect("session did not stop promptly")
        .unwrap();
    assert!(outcome.is_ok());

    // Every sender is gone and nothing was emitted for the aborted batch
    let next = tokio::time::timeout(Duration::from_secs(2), h.outbound.recv())
        .await
        .unwrap();
    assert!(next.is_none());
}

#[tokio::test]
async fn test_inbound_end_discards_pending_frames() {
    let mut h = Harness::start(Options::default());
    h.frame(1);
    h.frame(2);
    drop(h.inbound);

    let outcome = tokio::time::timeout(Duration::from_secs(1), &mut h.task)
        .await
        .unwrap()
        .unwrap();
    assert!(outcome.is_ok());
    assert!(h.outbound.recv().await.is_none());
    assert!(h.calls.lock().is_empty());
}

#[tokio::test]
async fn test_result_length_mismatch_is_fatal() {
    let mut h = Harness::start(Options {
        fault: Fault::ShortResult,
        ..Default::default()
    });
    h.frame(1);
    h.frame(2);
    h.release();

    let outcome = tokio::time::timeout(Duration::from_secs(5), &mut h.task)
        .await
        .unwrap()
        .unwrap();
    let err = outcome.unwrap_err();
    assert!(err.is_fatal());
    assert!(h.outbound.recv().await.is_none());
}

#[tokio::test]
async fn test_transport_error_ends_session() {
    let mut h = Harness::start(Options::default());
    h.inbound
        .send(Err(SessionError::Transport("connection reset".to_string())))
        .unwrap();

    let outcome = tokio::time::timeout(Duration::from_secs(1), &mut h.task)
        .await
        .unwrap()
        .unwrap();
    assert!(matches!(outcome, Err(SessionError::Transport(_))));
}

#[tokio::test]
async fn test_per_batch_framing() {
    let mut h = Harness::start(Options {
        framing: ResultFraming::PerBatch,
        ..Default::default()
    });
    h.frame(1);
    h.frame(2);
    h.frame(3);
    h.release();

    let entries = h.next_result().await;
    let labels: Vec<&str> = entries.iter().map(label).collect();
    assert_eq!(labels, vec!["w1", "w2", "w3"]);
    h.assert_quiet().await;
}
