use std::fmt;

use crossbeam_channel::{Receiver, Sender};

use crate::database::FrameIndex;

/// Advisory progress of the segmentation worker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerStatus {
    Ready,
    Segmenting { remaining: usize },
}

impl fmt::Display for WorkerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WorkerStatus::Ready => write!(f, "Ready"),
            WorkerStatus::Segmenting { remaining: 1 } => write!(f, "Segmenting 1 frame..."),
            WorkerStatus::Segmenting { remaining } => write!(f, "Segmenting {remaining} frames..."),
        }
    }
}

/// Receives worker notifications. Called on the worker thread, so implementations
/// mustn't block.
pub trait FrameObserver: Send + Sync {
    fn frame_updated(&self, frame: FrameIndex);

    fn status_changed(&self, _status: WorkerStatus) {}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerEvent {
    FrameUpdated(FrameIndex),
    Status(WorkerStatus),
}

type Wake = Box<dyn Fn() + Send + Sync>;

/// Forwards notifications into a channel, to be drained by the UI thread
pub struct ChannelObserver {
    tx: Sender<WorkerEvent>,
    wake: Option<Wake>,
}

impl ChannelObserver {
    pub fn new(tx: Sender<WorkerEvent>) -> Self {
        Self { tx, wake: None }
    }

    /// `wake` runs after every event, e.g. to request a repaint
    pub fn with_wake(mut self, wake: impl Fn() + Send + Sync + 'static) -> Self {
        self.wake = Some(Box::new(wake));
        self
    }

    fn send(&self, event: WorkerEvent) {
        // The UI might be gone already during shutdown
        if self.tx.send(event).is_ok() {
            if let Some(wake) = &self.wake {
                wake();
            }
        }
    }
}

impl FrameObserver for ChannelObserver {
    fn frame_updated(&self, frame: FrameIndex) {
        self.send(WorkerEvent::FrameUpdated(frame));
    }

    fn status_changed(&self, status: WorkerStatus) {
        self.send(WorkerEvent::Status(status));
    }
}

pub fn observer_channel() -> (ChannelObserver, Receiver<WorkerEvent>) {
    let (tx, rx) = crossbeam_channel::unbounded();
    (ChannelObserver::new(tx), rx)
}
