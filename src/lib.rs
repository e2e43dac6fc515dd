mod app;
mod async_task;
pub mod composite;
pub mod config;
pub mod controller;
pub mod database;
pub mod inference;
pub mod mask;
pub mod observer;
pub mod queue;
pub mod storage;
pub mod video;
pub mod worker;

pub use app::{run_native, AppError};
pub use controller::{AnnotationController, Letterbox};
pub use database::{AnnotationStore, Database, Frame, FrameIndex, Point, Polarity, Record};
pub use inference::{EmptyOracle, InferenceError, SegmentationOracle};
pub use mask::Mask;
pub use observer::{ChannelObserver, FrameObserver, WorkerEvent, WorkerStatus};
pub use queue::{work_queue, WorkReceiver, WorkSender};
pub use storage::{RecordFile, StorageError};
#[cfg(feature = "ffmpeg")]
pub use video::FfmpegVideo;
pub use video::{ImageSequence, VideoSource};
pub use worker::{ProcessOutcome, SegmentationWorker, WorkerHandle};
