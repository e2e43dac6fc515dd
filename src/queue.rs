use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};

use crate::database::FrameIndex;

/// Unbounded FIFO of frames waiting for segmentation
pub fn work_queue() -> (WorkSender, WorkReceiver) {
    let (tx, rx) = crossbeam_channel::unbounded();
    (WorkSender(tx), WorkReceiver(rx))
}

#[derive(Clone, Debug)]
pub struct WorkSender(Sender<FrameIndex>);

impl WorkSender {
    /// Never blocks. Returns false once the worker is gone.
    pub fn push(&self, frame: FrameIndex) -> bool {
        self.0.send(frame).is_ok()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pop {
    Frame(FrameIndex),
    Timeout,
    /// Every sender was dropped and the queue is drained
    Disconnected,
}

#[derive(Debug)]
pub struct WorkReceiver(Receiver<FrameIndex>);

impl WorkReceiver {
    pub fn pop(&self, timeout: Duration) -> Pop {
        match self.0.recv_timeout(timeout) {
            Ok(frame) => Pop::Frame(frame),
            Err(RecvTimeoutError::Timeout) => Pop::Timeout,
            Err(RecvTimeoutError::Disconnected) => Pop::Disconnected,
        }
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}
