use shelfgate_core::scan::{self, BarcodeReader, FaceEncoder, ScanStep, VisionError};
use shelfgate_core::{DetectedFace, FaceIndex, FrameView, IndexEntry};
use shelfgate_hw::{Frame, FrameSource};
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot, Notify};

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("vision error: {0}")]
    Vision(#[from] VisionError),
    #[error("no face detected in any captured frame")]
    NoFaceDetected,
    #[error("failed to start capture thread: {0}")]
    Spawn(std::io::Error),
    #[error("engine thread exited")]
    ChannelClosed,
}

/// The services owned by the capture thread.
pub struct Services {
    pub source: Box<dyn FrameSource + Send>,
    pub encoder: Box<dyn FaceEncoder + Send>,
    pub reader: Box<dyn BarcodeReader + Send>,
}

/// Messages sent from the front end to the engine thread.
enum EngineRequest {
    Enroll {
        frames: usize,
        reply: oneshot::Sender<Result<DetectedFace, EngineError>>,
    },
    FaceStep {
        index: Arc<FaceIndex>,
        tolerance: f64,
        reply: oneshot::Sender<Result<ScanStep<IndexEntry>, EngineError>>,
    },
    BarcodeStep {
        reply: oneshot::Sender<ScanStep<String>>,
    },
}

/// Clone-safe handle to the engine thread.
#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<EngineRequest>,
}

impl EngineHandle {
    /// Capture up to `frames` frames and return the most confident face.
    pub async fn enroll(&self, frames: usize) -> Result<DetectedFace, EngineError> {
        let (reply, rx) = oneshot::channel();
        self.send(EngineRequest::Enroll { frames, reply }).await?;
        rx.await.map_err(|_| EngineError::ChannelClosed)?
    }

    /// Read one frame and look for a registered face in it.
    pub async fn face_step(
        &self,
        index: Arc<FaceIndex>,
        tolerance: f64,
    ) -> Result<ScanStep<IndexEntry>, EngineError> {
        let (reply, rx) = oneshot::channel();
        self.send(EngineRequest::FaceStep { index, tolerance, reply }).await?;
        rx.await.map_err(|_| EngineError::ChannelClosed)?
    }

    /// Read one frame and look for a barcode in it.
    pub async fn barcode_step(&self) -> Result<ScanStep<String>, EngineError> {
        let (reply, rx) = oneshot::channel();
        self.send(EngineRequest::BarcodeStep { reply }).await?;
        rx.await.map_err(|_| EngineError::ChannelClosed)
    }

    async fn send(&self, req: EngineRequest) -> Result<(), EngineError> {
        self.tx.send(req).await.map_err(|_| EngineError::ChannelClosed)
    }
}

/// Spawn the engine on a dedicated OS thread that owns `services`.
pub fn spawn_engine(services: Services) -> Result<EngineHandle, EngineError> {
    let Services { mut source, mut encoder, reader } = services;
    tracing::info!(source = %source.describe(), "starting capture engine");

    let (tx, mut rx) = mpsc::channel::<EngineRequest>(4);

    std::thread::Builder::new()
        .name("shelfgate-engine".into())
        .spawn(move || {
            tracing::debug!("engine thread started");
            while let Some(req) = rx.blocking_recv() {
                match req {
                    EngineRequest::Enroll { frames, reply } => {
                        let _ = reply.send(run_enroll(source.as_mut(), encoder.as_mut(), frames));
                    }
                    EngineRequest::FaceStep { index, tolerance, reply } => {
                        let step = match read(source.as_mut()) {
                            Some(frame) => scan::probe_face(encoder.as_mut(), view(&frame), &index, tolerance)
                                .map_err(EngineError::from),
                            None => Ok(ScanStep::Ended),
                        };
                        let _ = reply.send(step);
                    }
                    EngineRequest::BarcodeStep { reply } => {
                        let step = match read(source.as_mut()) {
                            Some(frame) => scan::probe_barcode(reader.as_ref(), view(&frame)),
                            None => ScanStep::Ended,
                        };
                        let _ = reply.send(step);
                    }
                }
            }
            tracing::debug!("engine thread exiting");
        })
        .map_err(EngineError::Spawn)?;

    Ok(EngineHandle { tx })
}

fn view(frame: &Frame) -> FrameView<'_> {
    FrameView::new(&frame.data, frame.width, frame.height)
}

/// One frame, or `None` when the source failed; a failed read ends the scan quietly.
fn read(source: &mut (dyn FrameSource + Send)) -> Option<Frame> {
    match source.read_frame() {
        Ok(frame) => Some(frame),
        Err(e) => {
            tracing::debug!(error = %e, "frame read failed; ending scan");
            None
        }
    }
}

fn run_enroll(
    source: &mut (dyn FrameSource + Send),
    encoder: &mut (dyn FaceEncoder + Send),
    frames: usize,
) -> Result<DetectedFace, EngineError> {
    let mut captured = Vec::with_capacity(frames);
    let mut dark_skipped = 0usize;
    for _ in 0..frames {
        let Some(frame) = read(source) else { break };
        if frame.is_dark {
            tracing::trace!(sequence = frame.sequence, brightness = frame.avg_brightness(), "skipping dark frame");
            dark_skipped += 1;
            continue;
        }
        captured.push(frame);
    }
    tracing::debug!(captured = captured.len(), dark_skipped, "enroll: captured frames");

    let views: Vec<FrameView<'_>> = captured.iter().map(view).collect();
    let face = scan::best_face(encoder, &views)?.ok_or(EngineError::NoFaceDetected)?;
    tracing::info!(confidence = face.confidence, "enroll: best face selected");
    Ok(face)
}

/// Cancellation flag owned by the scanning caller, checked once per step.
#[derive(Clone, Default)]
pub struct CancelFlag(Arc<CancelInner>);

#[derive(Default)]
struct CancelInner {
    raised: AtomicBool,
    notify: Notify,
}

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn raise(&self) {
        self.0.raised.store(true, Ordering::SeqCst);
        self.0.notify.notify_waiters();
    }

    pub fn is_raised(&self) -> bool {
        self.0.raised.load(Ordering::SeqCst)
    }

    /// Resolves once the flag is raised.
    pub async fn raised(&self) {
        loop {
            let notified = self.0.notify.notified();
            if self.is_raised() {
                return;
            }
            notified.await;
        }
    }
}

/// How a scan finished.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScanEnd<T> {
    Found(T),
    Cancelled,
    TimedOut,
    /// The frame source stopped delivering frames.
    SourceEnded,
}

/// Drive `step` one frame at a time until it finds something, the source
/// ends, `cancel` is raised, or `timeout` elapses.
pub async fn run_scan<T, F, Fut>(
    cancel: &CancelFlag,
    timeout: Option<Duration>,
    mut step: F,
) -> Result<ScanEnd<T>, EngineError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<ScanStep<T>, EngineError>>,
{
    let started = Instant::now();
    let mut frames = 0u64;
    loop {
        if cancel.is_raised() {
            tracing::info!(frames, "scan cancelled");
            return Ok(ScanEnd::Cancelled);
        }
        if timeout.is_some_and(|t| started.elapsed() >= t) {
            tracing::info!(frames, "scan timed out");
            return Ok(ScanEnd::TimedOut);
        }
        frames += 1;
        match step().await? {
            ScanStep::Found(hit) => return Ok(ScanEnd::Found(hit)),
            ScanStep::Pending => continue,
            ScanStep::Ended => {
                tracing::debug!(frames, "frame source ended");
                return Ok(ScanEnd::SourceEnded);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::test_support::signature;
    use shelfgate_core::Embedding;
    use shelfgate_hw::CameraError;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Frames from a queue; errors once it is empty.
    struct QueueSource(VecDeque<Frame>);

    impl QueueSource {
        fn bright(n: usize) -> Self {
            Self((0..n).map(|i| Frame::new(vec![200u8; 16], 4, 4, i as u32)).collect())
        }
    }

    impl FrameSource for QueueSource {
        fn read_frame(&mut self) -> Result<Frame, CameraError> {
            self.0.pop_front().ok_or(CameraError::Exhausted)
        }

        fn describe(&self) -> String {
            "queue".into()
        }
    }

    /// Returns the scripted faces in order, then nothing.
    struct ScriptedEncoder(VecDeque<Vec<DetectedFace>>);

    impl FaceEncoder for ScriptedEncoder {
        fn encode(&mut self, _frame: FrameView<'_>) -> Result<Vec<DetectedFace>, VisionError> {
            Ok(self.0.pop_front().unwrap_or_default())
        }
    }

    struct ScriptedReader(Mutex<VecDeque<Vec<String>>>);

    impl BarcodeReader for ScriptedReader {
        fn decode(&self, _frame: FrameView<'_>) -> Vec<String> {
            self.0.lock().unwrap().pop_front().unwrap_or_default()
        }
    }

    fn face(embedding: Embedding, confidence: f32) -> DetectedFace {
        DetectedFace { embedding, confidence }
    }

    fn engine(
        source: QueueSource,
        faces: Vec<Vec<DetectedFace>>,
        codes: Vec<Vec<String>>,
    ) -> EngineHandle {
        spawn_engine(Services {
            source: Box::new(source),
            encoder: Box::new(ScriptedEncoder(faces.into())),
            reader: Box::new(ScriptedReader(Mutex::new(codes.into()))),
        })
        .unwrap()
    }

    fn alice_index() -> Arc<FaceIndex> {
        Arc::new(FaceIndex::build([(
            IndexEntry { person_id: 1, name: "Alice".into() },
            signature(0.0),
        )]))
    }

    #[tokio::test]
    async fn test_face_scan_finds_after_pending_frames() {
        let handle = engine(
            QueueSource::bright(5),
            vec![vec![], vec![face(signature(4.0), 0.9)], vec![face(signature(0.1), 0.8)]],
            vec![],
        );
        let index = alice_index();
        let cancel = CancelFlag::new();
        let hit = run_scan(&cancel, None, || handle.face_step(Arc::clone(&index), 0.4))
            .await
            .unwrap();
        assert!(matches!(hit, ScanEnd::Found(entry) if entry.name == "Alice"));
    }

    #[tokio::test]
    async fn test_face_scan_ends_when_source_fails() {
        let handle = engine(QueueSource::bright(2), vec![], vec![]);
        let index = alice_index();
        let cancel = CancelFlag::new();
        let hit = run_scan(&cancel, None, || handle.face_step(Arc::clone(&index), 0.4))
            .await
            .unwrap();
        assert_eq!(hit, ScanEnd::SourceEnded);
    }

    #[tokio::test]
    async fn test_scan_cancelled_by_caller() {
        let cancel = CancelFlag::new();
        let steps = std::cell::Cell::new(0);
        let end: ScanEnd<()> = run_scan(&cancel, None, || {
            steps.set(steps.get() + 1);
            if steps.get() == 3 {
                cancel.raise();
            }
            async { Ok(ScanStep::Pending) }
        })
        .await
        .unwrap();
        assert_eq!(end, ScanEnd::Cancelled);
        assert_eq!(steps.get(), 3);
    }

    #[tokio::test]
    async fn test_scan_timeout() {
        let cancel = CancelFlag::new();
        let end: ScanEnd<()> = run_scan(&cancel, Some(Duration::from_millis(20)), || async {
            tokio::time::sleep(Duration::from_millis(5)).await;
            Ok(ScanStep::Pending)
        })
        .await
        .unwrap();
        assert_eq!(end, ScanEnd::TimedOut);
    }

    #[tokio::test]
    async fn test_barcode_scan() {
        let handle = engine(
            QueueSource::bright(3),
            vec![],
            vec![vec![], vec!["96385074".into()]],
        );
        let cancel = CancelFlag::new();
        let code = run_scan(&cancel, None, || handle.barcode_step()).await.unwrap();
        assert_eq!(code, ScanEnd::Found("96385074".to_string()));
    }

    #[tokio::test]
    async fn test_enroll_picks_best_face_and_skips_dark() {
        let mut frames = QueueSource::bright(2);
        frames.0.push_front(Frame::new(vec![0u8; 16], 4, 4, 99));
        let handle = engine(
            frames,
            vec![vec![face(signature(1.0), 0.7)], vec![face(signature(2.0), 0.95)]],
            vec![],
        );
        let best = handle.enroll(5).await.unwrap();
        assert_eq!(best.embedding, signature(2.0));
    }

    #[tokio::test]
    async fn test_raised_wakes_waiter() {
        let cancel = CancelFlag::new();
        let waiter = tokio::spawn({
            let cancel = cancel.clone();
            async move { cancel.raised().await }
        });
        tokio::task::yield_now().await;
        cancel.raise();
        tokio::time::timeout(Duration::from_secs(1), waiter).await.unwrap().unwrap();
        // Already raised: returns immediately.
        cancel.raised().await;
    }

    #[tokio::test]
    async fn test_enroll_no_face() {
        let handle = engine(QueueSource::bright(3), vec![], vec![]);
        assert!(matches!(handle.enroll(3).await, Err(EngineError::NoFaceDetected)));
    }
}
