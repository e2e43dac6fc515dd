use std::{
    collections::BTreeMap,
    io,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    thread::JoinHandle,
    time::Duration,
};

use log::{debug, info, warn};

use crate::{
    composite::{self, Layer},
    database::{AnnotationStore, FrameIndex},
    inference::{InferenceError, SegmentationOracle},
    mask::Mask,
    observer::{FrameObserver, WorkerStatus},
    queue::{Pop, WorkReceiver},
};

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(500);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessOutcome {
    /// The frame was deleted after it was queued
    Missing,
    /// Every record has a mask and the composite was stored
    Published,
    /// Segmentation failed for some records, which stay stale
    Incomplete { failed: usize },
    /// The frame changed while it was processed. The change queued it again.
    Superseded,
}

/// Turns queued frames into masks and composites, off the UI thread
pub struct SegmentationWorker {
    store: AnnotationStore,
    oracle: Box<dyn SegmentationOracle>,
    observer: Arc<dyn FrameObserver>,
}

impl SegmentationWorker {
    pub fn new(
        store: AnnotationStore,
        oracle: Box<dyn SegmentationOracle>,
        observer: Arc<dyn FrameObserver>,
    ) -> Self {
        Self {
            store,
            oracle,
            observer,
        }
    }

    /// Segments the stale records of `frame` and renders its composite.
    /// The store is only locked to take the snapshot and to publish results.
    pub fn process_frame(&mut self, frame: FrameIndex) -> ProcessOutcome {
        let Some(snapshot) = self.store.get(frame) else {
            debug!("Frame {frame} is gone, skip");
            return ProcessOutcome::Missing;
        };

        let mut masks: BTreeMap<&str, Arc<Mask>> = BTreeMap::new();
        let mut failed = 0;
        for record in snapshot.records() {
            if let Some(mask) = record.segmentation() {
                masks.insert(record.name(), mask.clone());
                continue;
            }
            let result = self
                .oracle
                .segment(
                    snapshot.original_image(),
                    record.positive_points(),
                    record.negative_points(),
                )
                .and_then(|mask| {
                    let expected = snapshot.original_image().dimensions();
                    match mask.dimensions() {
                        actual if actual == expected => Ok(mask),
                        actual => Err(InferenceError::MaskSizeMismatch { expected, actual }),
                    }
                });
            match result {
                Ok(mask) => {
                    debug!(
                        "Segmented '{}' at frame {frame}: {} pixels",
                        record.name(),
                        mask.count()
                    );
                    let mask = Arc::new(mask);
                    self.store.write().publish_segmentation(
                        frame,
                        record.name(),
                        record.revision(),
                        mask.clone(),
                    );
                    masks.insert(record.name(), mask);
                }
                Err(e) => {
                    warn!(
                        "Segmentation of '{}' at frame {frame} failed: {e}",
                        record.name()
                    );
                    failed += 1;
                }
            }
        }
        if failed > 0 {
            return ProcessOutcome::Incomplete { failed };
        }

        let layers = snapshot.records().filter_map(|r| {
            masks.get(r.name()).map(|mask| Layer {
                mask,
                positive_points: r.positive_points(),
                negative_points: r.negative_points(),
            })
        });
        let image = Arc::new(composite::render(snapshot.original_image(), layers));

        if self
            .store
            .write()
            .publish_composite(frame, snapshot.revision(), image)
        {
            ProcessOutcome::Published
        } else {
            ProcessOutcome::Superseded
        }
    }

    pub fn spawn(
        self,
        receiver: WorkReceiver,
        poll_interval: Duration,
    ) -> io::Result<WorkerHandle> {
        let stop = Arc::new(AtomicBool::new(false));
        let thread_stop = stop.clone();
        let handle = std::thread::Builder::new()
            .name("segmentation".into())
            .spawn(move || self.run(receiver, poll_interval, &thread_stop))?;
        Ok(WorkerHandle {
            stop,
            handle: Some(handle),
        })
    }

    fn run(mut self, receiver: WorkReceiver, poll_interval: Duration, stop: &AtomicBool) {
        info!("Segmentation worker started");
        let mut idle = false;
        while !stop.load(Ordering::Acquire) {
            if !idle && receiver.is_empty() {
                self.observer.status_changed(WorkerStatus::Ready);
                idle = true;
            }
            let frame = match receiver.pop(poll_interval) {
                Pop::Frame(frame) => frame,
                Pop::Timeout => continue,
                Pop::Disconnected => {
                    info!("Work queue closed");
                    break;
                }
            };
            idle = false;
            self.observer.status_changed(WorkerStatus::Segmenting {
                remaining: receiver.len() + 1,
            });

            let outcome = self.process_frame(frame);
            debug!("Frame {frame}: {outcome:?}");
            if outcome != ProcessOutcome::Missing {
                self.observer.frame_updated(frame);
            }
        }
        info!("Segmentation worker stopped");
    }
}

/// Stops the worker when dropped
pub struct WorkerHandle {
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl WorkerHandle {
    /// The worker exits after the current frame or the next poll timeout
    pub fn signal_stop(&self) {
        self.stop.store(true, Ordering::Release);
    }

    pub fn is_finished(&self) -> bool {
        self.handle.as_ref().is_none_or(|h| h.is_finished())
    }

    pub fn stop(mut self) -> std::thread::Result<()> {
        self.signal_stop();
        match self.handle.take() {
            Some(handle) => handle.join(),
            None => Ok(()),
        }
    }
}

impl Drop for WorkerHandle {
    fn drop(&mut self) {
        self.signal_stop();
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                warn!("Segmentation worker panicked");
            }
        }
    }
}
