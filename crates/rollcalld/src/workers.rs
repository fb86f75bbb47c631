//! Extraction worker pool.
//!
//! Each worker is a dedicated OS thread owning its own extractor (and so its
//! own inference sessions). Frames arrive over a bounded tokio channel shared
//! by all workers; results go back through a oneshot per request.

use async_trait::async_trait;
use rollcall_core::{
    analyze_frame, AnalyzeError, EmbeddingExtractor, FrameAnalyzer, IdentityClassifier, Recognition,
};
use std::fmt::Display;
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

#[derive(Error, Debug)]
pub enum WorkerError {
    #[error("worker {index} failed to initialise: {reason}")]
    Init { index: usize, reason: String },
    #[error("failed to spawn worker thread: {0}")]
    Spawn(#[from] std::io::Error),
}

struct Job {
    frame: Arc<[u8]>,
    reply: oneshot::Sender<Result<Recognition, AnalyzeError>>,
}

/// Handle to the pool. Dropping the last handle stops the workers once the queue drains.
pub struct WorkerPool {
    tx: mpsc::Sender<Job>,
    size: usize,
}

impl WorkerPool {
    /// Build `size` extractors with `factory` (failing fast on the first
    /// error) and start one thread per extractor.
    pub fn spawn<E, F, Err>(
        size: usize,
        classifier: Arc<dyn IdentityClassifier>,
        factory: F,
    ) -> Result<Self, WorkerError>
    where
        E: EmbeddingExtractor + Send + 'static,
        F: Fn(usize) -> Result<E, Err>,
        Err: Display,
    {
        let size = size.max(1);
        let extractors = (0..size)
            .map(|index| {
                factory(index).map_err(|e| WorkerError::Init {
                    index,
                    reason: e.to_string(),
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        let (tx, rx) = mpsc::channel::<Job>(size * 4);
        let rx = Arc::new(Mutex::new(rx));

        for (index, extractor) in extractors.into_iter().enumerate() {
            let rx = Arc::clone(&rx);
            let classifier = Arc::clone(&classifier);
            std::thread::Builder::new()
                .name(format!("rollcall-worker-{index}"))
                .spawn(move || run_worker(index, extractor, classifier, rx))?;
        }
        tracing::info!(workers = size, "extraction workers started");

        Ok(Self { tx, size })
    }

    pub fn size(&self) -> usize {
        self.size
    }
}

fn run_worker<E: EmbeddingExtractor>(
    index: usize,
    mut extractor: E,
    classifier: Arc<dyn IdentityClassifier>,
    rx: Arc<Mutex<mpsc::Receiver<Job>>>,
) {
    tracing::debug!(worker = index, "worker thread started");
    loop {
        // Only the idle worker waiting for the next job holds the lock.
        let job = match rx.lock() {
            Ok(mut rx) => rx.blocking_recv(),
            Err(_) => None,
        };
        let Some(job) = job else {
            break;
        };
        let result = analyze_frame(&mut extractor, classifier.as_ref(), &job.frame);
        // The requester may have gone away; nothing to do then.
        let _ = job.reply.send(result);
    }
    tracing::debug!(worker = index, "worker thread exiting");
}

#[async_trait]
impl FrameAnalyzer for WorkerPool {
    async fn analyze(&self, frame: Arc<[u8]>) -> Result<Recognition, AnalyzeError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Job { frame, reply })
            .await
            .map_err(|_| AnalyzeError::Unavailable("worker pool stopped".into()))?;
        rx.await
            .map_err(|_| AnalyzeError::Unavailable("worker dropped the request".into()))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rollcall_core::classifier::{GalleryEntry, KnnClassifier};
    use rollcall_core::{Embedding, ExtractError};

    /// First byte picks the gallery direction: 1 = Alice, 2 = Bob, 0 = no face.
    /// Also reports which thread served the frame.
    struct ByteExtractor {
        seen: Arc<Mutex<Vec<String>>>,
    }

    impl EmbeddingExtractor for ByteExtractor {
        type Face = u8;

        fn detect(&mut self, image: &[u8]) -> Result<Option<u8>, ExtractError> {
            if let Some(name) = std::thread::current().name() {
                self.seen.lock().unwrap().push(name.to_string());
            }
            Ok(image.first().copied().filter(|b| *b != 0))
        }

        fn embed(&mut self, face: &u8) -> Result<Option<Embedding>, ExtractError> {
            Ok(Some(match face {
                1 => Embedding::new(vec![1.0, 0.0]),
                _ => Embedding::new(vec![0.0, 1.0]),
            }))
        }
    }

    fn classifier() -> Arc<dyn IdentityClassifier> {
        Arc::new(
            KnnClassifier::new(
                vec![
                    GalleryEntry {
                        label: "Alice".into(),
                        values: vec![1.0, 0.0],
                    },
                    GalleryEntry {
                        label: "Bob".into(),
                        values: vec![0.0, 1.0],
                    },
                ],
                1,
                Some(0.5),
            )
            .unwrap(),
        )
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_pool_answers_every_request() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let pool = Arc::new(
            WorkerPool::spawn(3, classifier(), |_| {
                Ok::<_, String>(ByteExtractor { seen: seen.clone() })
            })
            .unwrap(),
        );
        assert_eq!(pool.size(), 3);

        let mut handles = Vec::new();
        for i in 0..30u8 {
            let pool = pool.clone();
            handles.push(tokio::spawn(async move {
                (i % 3, pool.analyze(Arc::from(vec![i % 3])).await.unwrap())
            }));
        }
        for handle in handles {
            let (kind, recognition) = handle.await.unwrap();
            match kind {
                0 => assert_eq!(recognition, Recognition::NoFace),
                1 => assert!(matches!(recognition, Recognition::Identified { ref label, .. } if label == "Alice")),
                _ => assert!(matches!(recognition, Recognition::Identified { ref label, .. } if label == "Bob")),
            }
        }

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 30);
        assert!(seen.iter().all(|name| name.starts_with("rollcall-worker-")));
    }

    #[test]
    fn test_factory_failure_is_reported() {
        let err = WorkerPool::spawn(2, classifier(), |index| {
            if index == 1 {
                Err("model missing")
            } else {
                Ok(ByteExtractor {
                    seen: Arc::new(Mutex::new(Vec::new())),
                })
            }
        })
        .err()
        .unwrap();
        assert!(matches!(err, WorkerError::Init { index: 1, .. }));
    }
}
