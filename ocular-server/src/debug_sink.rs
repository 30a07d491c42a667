// Debug frame persistence, off the session's hot path

use async_trait::async_trait;
use bytes::Bytes;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Destination for saved frames
#[async_trait]
pub trait FrameStore: Send + Sync + 'static {
    /// Persist one frame, returning the name it was stored under
    async fn store(&self, frame: Bytes) -> std::io::Result<String>;
}

/// Writes frames as timestamped `.jpg` files in one directory
pub struct DiskFrameStore {
    dir: PathBuf,
}

impl DiskFrameStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

#[async_trait]
impl FrameStore for DiskFrameStore {
    async fn store(&self, frame: Bytes) -> std::io::Result<String> {
        tokio::fs::create_dir_all(&self.dir).await?;

        let stamp = chrono::Local::now().format("%Y%m%d-%H%M%S-%6f").to_string();
        // Frames saved within the same microsecond get a numeric suffix
        for attempt in 0..100u32 {
            let name = if attempt == 0 {
                format!("{}.jpg", stamp)
            } else {
                format!("{}-{}.jpg", stamp, attempt)
            };
            let path = self.dir.join(&name);
            match tokio::fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&path)
                .await
            {
                Ok(mut file) => {
                    file.write_all(&frame).await?;
                    file.flush().await?;
                    return Ok(name);
                }
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => continue,
                Err(e) => return Err(e),
            }
        }

        Err(std::io::Error::new(
            std::io::ErrorKind::AlreadyExists,
            format!("no free file name for {}", stamp),
        ))
    }
}

/// Fire-and-forget handle onto the debug writer task.
///
/// `persist` never waits: frames go onto a bounded queue and are dropped
/// with a warning when the writer falls behind.
#[derive(Clone)]
pub struct DebugSink {
    tx: mpsc::Sender<Bytes>,
    events: broadcast::Sender<String>,
    dropped: Arc<AtomicU64>,
}

impl DebugSink {
    /// Start the writer task. It exits once every sink handle is dropped.
    pub fn spawn(store: Arc<dyn FrameStore>, capacity: usize) -> (Self, JoinHandle<()>) {
        let (tx, mut rx) = mpsc::channel::<Bytes>(capacity.max(1));
        let (events, _) = broadcast::channel(64);
        let saved = events.clone();

        let worker = tokio::spawn(async move {
            while let Some(frame) = rx.recv().await {
                let size = frame.len();
                match store.store(frame).await {
                    Ok(name) => {
                        info!("Saved debug image {} ({} bytes)", name, size);
                        // No gallery subscribers is fine
                        let _ = saved.send(name);
                    }
                    Err(e) => warn!("Failed to save debug image: {}", e),
                }
            }
            debug!("Debug sink worker stopped");
        });

        (
            Self {
                tx,
                events,
                dropped: Arc::new(AtomicU64::new(0)),
            },
            worker,
        )
    }

    /// Queue a frame for saving without waiting
    pub fn persist(&self, frame: Bytes) {
        match self.tx.try_send(frame) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(_)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                warn!("Debug image queue full, dropping frame");
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                warn!("Debug image writer stopped, dropping frame");
            }
        }
    }

    /// Names of frames as they are written
    pub fn subscribe(&self) -> broadcast::Receiver<String> {
        self.events.subscribe()
    }

    /// Frames dropped because the queue was full or closed
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}
