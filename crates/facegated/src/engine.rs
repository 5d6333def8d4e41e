use facegate_core::{BoundingBox, Embedding, FaceDetector, FaceRecognizer};
use std::path::Path;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("could not decode image: {0}")]
    Decode(#[from] image::ImageError),
    #[error("detector error: {0}")]
    Detector(#[from] facegate_core::detector::DetectorError),
    #[error("recognizer error: {0}")]
    Recognizer(#[from] facegate_core::recognizer::RecognizerError),
    #[error("engine thread exited")]
    ChannelClosed,
}

/// One detected face in an uploaded image.
pub struct DetectedFace {
    pub bbox: BoundingBox,
    pub embedding: Embedding,
}

/// Messages sent from HTTP handlers to the engine thread.
enum EngineRequest {
    Analyze {
        image: Vec<u8>,
        reply: oneshot::Sender<Result<Vec<DetectedFace>, EngineError>>,
    },
}

/// Clone-safe handle to the engine thread.
#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<EngineRequest>,
}

impl EngineHandle {
    /// Decode an uploaded image, detect every face in it and extract an
    /// embedding per face. Faces are ordered by descending detection
    /// confidence. An empty result means no face was found.
    pub async fn analyze(&self, image: Vec<u8>) -> Result<Vec<DetectedFace>, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(EngineRequest::Analyze {
                image,
                reply: reply_tx,
            })
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        reply_rx.await.map_err(|_| EngineError::ChannelClosed)?
    }

    /// Whether the engine is still accepting requests. Goes false if the
    /// engine thread has exited and dropped its receiver.
    pub fn is_alive(&self) -> bool {
        !self.tx.is_closed()
    }

    /// Handle backed by an in-process stub instead of the ONNX thread.
    #[cfg(test)]
    pub(crate) fn stub<F>(f: F) -> Self
    where
        F: Fn(&[u8]) -> Result<Vec<DetectedFace>, EngineError> + Send + 'static,
    {
        let (tx, mut rx) = mpsc::channel::<EngineRequest>(8);
        tokio::spawn(async move {
            while let Some(EngineRequest::Analyze { image, reply }) = rx.recv().await {
                let _ = reply.send(f(&image));
            }
        });
        Self { tx }
    }
}

/// Spawn the engine on a dedicated OS thread.
///
/// Loads both ONNX models synchronously, then enters a request loop.
/// Fails fast at startup if either model is unavailable. The sessions
/// live on one thread, so requests are serialized; the channel bound
/// provides the backpressure.
pub fn spawn_engine(scrfd_path: &Path, arcface_path: &Path) -> Result<EngineHandle, EngineError> {
    let mut detector = FaceDetector::load(scrfd_path)?;
    tracing::info!(path = %scrfd_path.display(), "SCRFD detector loaded");

    let mut recognizer = FaceRecognizer::load(arcface_path)?;
    tracing::info!(path = %arcface_path.display(), "ArcFace recognizer loaded");

    let (tx, mut rx) = mpsc::channel::<EngineRequest>(8);

    std::thread::Builder::new()
        .name("facegate-engine".into())
        .spawn(move || {
            tracing::info!("engine thread started");
            while let Some(req) = rx.blocking_recv() {
                match req {
                    EngineRequest::Analyze { image, reply } => {
                        let result = run_analyze(&mut detector, &mut recognizer, &image);
                        let _ = reply.send(result);
                    }
                }
            }
            tracing::info!("engine thread exiting");
        })
        .expect("failed to spawn engine thread");

    Ok(EngineHandle { tx })
}

/// Decode, detect and embed all faces in one uploaded image.
fn run_analyze(
    detector: &mut FaceDetector,
    recognizer: &mut FaceRecognizer,
    image: &[u8],
) -> Result<Vec<DetectedFace>, EngineError> {
    let gray = image::load_from_memory(image)?.to_luma8();
    let faces = detector.detect(&gray)?;

    tracing::debug!(
        width = gray.width(),
        height = gray.height(),
        faces = faces.len(),
        "analyzed upload"
    );

    let mut detected = Vec::with_capacity(faces.len());
    for face in faces {
        let embedding = recognizer.extract(&gray, &face)?;
        detected.push(DetectedFace {
            bbox: face,
            embedding,
        });
    }
    Ok(detected)
}
