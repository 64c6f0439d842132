use crate::camera::Frame;
use crate::common::config::PipelineConfig;
use crate::common::Result;
use crate::pipeline::checks::QualityChecker;
use crate::pipeline::validator::{FrameOutcome, ValidationPipeline};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::{mpsc, Notify};
use tokio::task::JoinHandle;

struct Queue {
    frames: Mutex<VecDeque<Frame>>,
    notify: Notify,
    capacity: usize,
    dropped: AtomicU64,
    closed: AtomicBool,
}

impl Queue {
    fn pop(&self) -> Option<Frame> {
        self.frames.lock().unwrap_or_else(PoisonError::into_inner).pop_front()
    }
}

/// Hands camera frames to a single pipeline worker without ever blocking the
/// producer. When the queue is full the oldest waiting frame is dropped.
pub struct FrameDispatcher {
    queue: Arc<Queue>,
    worker: Option<JoinHandle<()>>,
}

impl FrameDispatcher {
    /// Starts the worker task. Every processed frame's outcome is sent on the
    /// returned channel.
    pub fn spawn<C: QualityChecker>(
        pipeline: Arc<ValidationPipeline<C>>,
        capacity: usize,
    ) -> (Self, mpsc::UnboundedReceiver<Result<FrameOutcome>>) {
        let queue = Arc::new(Queue {
            frames: Mutex::new(VecDeque::new()),
            notify: Notify::new(),
            capacity: capacity.max(1),
            dropped: AtomicU64::new(0),
            closed: AtomicBool::new(false),
        });
        let (tx, rx) = mpsc::unbounded_channel();

        let worker_queue = queue.clone();
        let worker = tokio::spawn(async move {
            loop {
                match worker_queue.pop() {
                    Some(frame) => {
                        let outcome = pipeline.process_frame(frame).await;
                        if let Err(e) = &outcome {
                            tracing::warn!("Frame processing failed: {}", e);
                        }
                        // Receiver gone just means nobody is listening.
                        let _ = tx.send(outcome);
                    }
                    None if worker_queue.closed.load(Ordering::Acquire) => break,
                    None => worker_queue.notify.notified().await,
                }
            }
            tracing::debug!("Frame dispatcher stopped");
        });

        (Self { queue, worker: Some(worker) }, rx)
    }

    /// Spawns with the configured queue capacity.
    pub fn from_config<C: QualityChecker>(
        pipeline: Arc<ValidationPipeline<C>>,
        config: &PipelineConfig,
    ) -> (Self, mpsc::UnboundedReceiver<Result<FrameOutcome>>) {
        Self::spawn(pipeline, config.queue_capacity)
    }

    /// Queues a frame. Returns false when a frame had to be dropped to make
    /// room, or when the dispatcher is shut down.
    pub fn offer(&self, frame: Frame) -> bool {
        if self.queue.closed.load(Ordering::Acquire) {
            return false;
        }

        let evicted = {
            let mut frames = self.queue.frames.lock().unwrap_or_else(PoisonError::into_inner);
            let evicted = if frames.len() >= self.queue.capacity {
                frames.pop_front().is_some()
            } else {
                false
            };
            frames.push_back(frame);
            evicted
        };

        if evicted {
            self.queue.dropped.fetch_add(1, Ordering::Relaxed);
            tracing::debug!("Dispatcher queue full, dropped oldest frame");
        }
        self.queue.notify.notify_one();
        !evicted
    }

    /// Frames dropped from the queue so far.
    pub fn dropped(&self) -> u64 {
        self.queue.dropped.load(Ordering::Relaxed)
    }

    pub fn pending(&self) -> usize {
        self.queue.frames.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    fn close(&self) {
        self.queue.closed.store(true, Ordering::Release);
        self.queue.notify.notify_one();
    }

    /// Stops accepting frames and waits for the queued ones to finish.
    pub async fn shutdown(mut self) {
        self.close();
        if let Some(worker) = self.worker.take() {
            if let Err(e) = worker.await {
                tracing::warn!("Frame dispatcher worker panicked: {}", e);
            }
        }
    }
}

impl Drop for FrameDispatcher {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::camera::PixelFormat;
    use crate::geometry::{CaptureWindow, FrameGeometry};
    use crate::pipeline::checks::CheckOutcome;
    use crate::storage::MemoryFrameStore;
    use image::DynamicImage;
    use tokio::sync::Semaphore;

    /// Holds every low-light check until a permit is released.
    struct Gated {
        started: mpsc::UnboundedSender<()>,
        release: Arc<Semaphore>,
    }

    impl QualityChecker for Gated {
        async fn check_low_light(&self, _: Arc<DynamicImage>) -> Result<CheckOutcome> {
            let _ = self.started.send(());
            if let Ok(permit) = self.release.acquire().await {
                permit.forget();
            }
            Ok(CheckOutcome::pass(1.0))
        }
        async fn check_liveness(&self, _: Arc<DynamicImage>) -> Result<CheckOutcome> {
            Ok(CheckOutcome::pass(1.0))
        }
        async fn perform_segmentation(&self, _: Arc<DynamicImage>) -> Result<CheckOutcome> {
            Ok(CheckOutcome::pass(1.0))
        }
        async fn check_blur(&self, _: Arc<DynamicImage>) -> Result<CheckOutcome> {
            Ok(CheckOutcome::pass(1.0))
        }
        async fn check_bright_spots(&self, _: Arc<DynamicImage>) -> Result<CheckOutcome> {
            Ok(CheckOutcome::pass(1.0))
        }
    }

    fn frame() -> Frame {
        let geometry = FrameGeometry {
            sensor_width: 32,
            sensor_height: 32,
            sensor_rotation_degrees: 0,
            device_rotation_degrees: 0,
            display_width: 32,
            display_height: 32,
        };
        Frame::new(DynamicImage::new_luma8(32, 32), PixelFormat::Gray8, geometry).unwrap()
    }

    #[tokio::test]
    async fn keeps_only_latest_frame_while_busy() {
        let (started_tx, mut started) = mpsc::unbounded_channel();
        let release = Arc::new(Semaphore::new(0));
        let pipeline = Arc::new(ValidationPipeline::new(
            &PipelineConfig::default(),
            CaptureWindow::palm(0.5, 0.5, 10.0),
            Gated { started: started_tx, release: release.clone() },
            Arc::new(MemoryFrameStore::new()),
        ));
        let (dispatcher, mut outcomes) = FrameDispatcher::spawn(pipeline, 1);

        assert!(dispatcher.offer(frame()));
        started.recv().await.unwrap();

        // Worker is inside the first frame; the queue holds one more.
        assert!(dispatcher.offer(frame()));
        assert!(!dispatcher.offer(frame()));
        assert_eq!(dispatcher.dropped(), 1);
        assert_eq!(dispatcher.pending(), 1);

        release.add_permits(2);
        dispatcher.shutdown().await;

        let mut accepted = 0;
        while let Ok(outcome) = outcomes.try_recv() {
            assert!(matches!(outcome.unwrap(), FrameOutcome::Accepted { .. }));
            accepted += 1;
        }
        assert_eq!(accepted, 2);
    }

    #[tokio::test]
    async fn queue_size_comes_from_config() {
        let (started_tx, mut started) = mpsc::unbounded_channel();
        let release = Arc::new(Semaphore::new(0));
        let config = PipelineConfig { queue_capacity: 2, ..PipelineConfig::default() };
        let pipeline = Arc::new(ValidationPipeline::new(
            &config,
            CaptureWindow::palm(0.5, 0.5, 10.0),
            Gated { started: started_tx, release: release.clone() },
            Arc::new(MemoryFrameStore::new()),
        ));
        let (dispatcher, _outcomes) = FrameDispatcher::from_config(pipeline, &config);

        assert!(dispatcher.offer(frame()));
        started.recv().await.unwrap();

        assert!(dispatcher.offer(frame()));
        assert!(dispatcher.offer(frame()));
        assert!(!dispatcher.offer(frame()));
        assert_eq!(dispatcher.pending(), 2);
        assert_eq!(dispatcher.dropped(), 1);

        release.add_permits(3);
        dispatcher.shutdown().await;
    }
}
