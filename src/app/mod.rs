use std::{io, path::Path, sync::Arc};

use crossbeam_channel::Receiver;
use eframe::egui::{
    self, Color32, ColorImage, Pos2, Rect, Sense, TextureHandle, TextureId, TextureOptions, Vec2,
};
use image::RgbImage;
use log::warn;

use crate::{
    async_task::AsyncRefTask,
    config::Config,
    controller::{AnnotationController, Letterbox},
    database::{AnnotationStore, FrameIndex, Polarity},
    inference::{EmptyOracle, SegmentationOracle},
    observer::{observer_channel, WorkerEvent, WorkerStatus},
    queue::work_queue,
    storage::{RecordFile, StorageError},
    video::{self, clamp_index, VideoSource},
    worker::{SegmentationWorker, WorkerHandle},
};

mod menu;
mod native;

pub use native::run_native;

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Can't open video {path:?}: {source}")]
    Video {
        path: std::path::PathBuf,
        source: io::Error,
    },

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("Can't start segmentation worker: {0}")]
    Worker(io::Error),
}

pub(crate) struct VideoAnnotatorApp {
    controller: AnnotationController,
    video: Box<dyn VideoSource>,
    record_file: RecordFile,
    events: Receiver<WorkerEvent>,
    status: WorkerStatus,
    names: Vec<String>,
    selected_name: usize,
    decoded: Option<(FrameIndex, Arc<RgbImage>)>,
    shown: Option<(Arc<RgbImage>, TextureHandle)>,
    save_job: AsyncRefTask<Result<(), StorageError>>,
    error: Option<String>,
    // Last, so the work queue is closed before the worker is joined
    _worker: WorkerHandle,
}

impl VideoAnnotatorApp {
    pub fn new(
        cc: &eframe::CreationContext<'_>,
        config: &Config,
        video_path: &Path,
    ) -> Result<Self, AppError> {
        let mut video = video::open(video_path, config.fps).map_err(|source| AppError::Video {
            path: video_path.into(),
            source,
        })?;
        let record_file = RecordFile::for_video(video_path);
        let database = record_file.load(video.as_mut(), config.worker.cancel_radius)?;
        let store = AnnotationStore::new(database);

        let (sender, receiver) = work_queue();
        let (observer, events) = observer_channel();
        let ctx = cc.egui_ctx.clone();
        let observer = observer.with_wake(move || ctx.request_repaint());
        let worker = SegmentationWorker::new(store.clone(), load_oracle(config), Arc::new(observer))
            .spawn(receiver, config.worker.poll_interval())
            .map_err(AppError::Worker)?;

        let controller = AnnotationController::new(store, sender);
        controller.enqueue_all();

        Ok(Self {
            controller,
            video,
            record_file,
            events,
            status: WorkerStatus::Ready,
            names: config.object_names(Path::new("names.json")),
            selected_name: 0,
            decoded: None,
            shown: None,
            save_job: AsyncRefTask::new_ready(Ok(())),
            error: None,
            _worker: worker,
        })
    }

    fn handle_worker_events(&mut self, ctx: &egui::Context) {
        let events = self.events.try_iter().collect::<Vec<_>>();
        for event in events {
            match event {
                WorkerEvent::FrameUpdated(frame) => {
                    if let Some(image) = self.controller.on_worker_done(frame) {
                        self.texture(ctx, &image);
                    }
                }
                WorkerEvent::Status(status) => self.status = status,
            }
        }
    }

    fn set_frame(&mut self, frame: FrameIndex) {
        let frame = clamp_index(frame as i64, self.video.frame_count());
        self.controller.set_current_frame(frame);
    }

    fn decoded_frame(&mut self) -> io::Result<Arc<RgbImage>> {
        let frame = self.controller.current_frame();
        match &self.decoded {
            Some((index, image)) if *index == frame => Ok(image.clone()),
            _ => {
                let image = Arc::new(self.video.read(frame)?);
                self.decoded = Some((frame, image.clone()));
                Ok(image)
            }
        }
    }

    // Uploads `image` unless it's on screen already
    fn texture(&mut self, ctx: &egui::Context, image: &Arc<RgbImage>) -> TextureId {
        if let Some((shown, handle)) = &self.shown {
            if Arc::ptr_eq(shown, image) {
                return handle.id();
            }
        }
        let handle = ctx.load_texture(
            "frame",
            ColorImage::from_rgb(
                [image.width() as usize, image.height() as usize],
                image.as_raw(),
            ),
            TextureOptions::default(),
        );
        let id = handle.id();
        self.shown = Some((image.clone(), handle));
        id
    }

    fn frame_slider_ui(&mut self, ui: &mut egui::Ui) {
        let frame_count = self.video.frame_count();
        let mut frame = self.controller.current_frame();
        ui.horizontal(|ui| {
            if ui.button("<").clicked() {
                frame = frame.saturating_sub(1);
            }
            ui.add(
                egui::Slider::new(&mut frame, 0..=frame_count.saturating_sub(1)).text("Frame"),
            );
            if ui.button(">").clicked() {
                frame = frame.saturating_add(1);
            }
            ui.label(format!("{:.2}s", frame as f32 / self.video.fps()));
        });
        self.set_frame(frame);
    }

    fn frame_ui(&mut self, ui: &mut egui::Ui) {
        let decoded = match self.decoded_frame() {
            Ok(image) => image,
            Err(e) => {
                ui.label(format!("Error: {e}"));
                return;
            }
        };
        let frame = self.controller.current_frame();
        let image = self
            .controller
            .display_image(frame)
            .unwrap_or_else(|| decoded.clone());
        let texture = self.texture(ui.ctx(), &image);

        let (viewport, response) = ui.allocate_exact_size(ui.available_size(), Sense::click());
        let image_size = Vec2::new(image.width() as f32, image.height() as f32);
        let letterbox = Letterbox::fit(image_size, viewport);
        let painter = ui.painter_at(viewport);
        painter.rect_filled(viewport, 0.0, Color32::BLACK);
        painter.image(
            texture,
            letterbox.image_rect(),
            Rect::from_min_max(Pos2::ZERO, Pos2::new(1.0, 1.0)),
            Color32::WHITE,
        );

        let polarity = if response.clicked() {
            Some(Polarity::Positive)
        } else if response.secondary_clicked() {
            Some(Polarity::Negative)
        } else {
            None
        };
        if let (Some(polarity), Some(pos), Some(name)) = (
            polarity,
            response.interact_pointer_pos(),
            self.names.get(self.selected_name),
        ) {
            self.error = self
                .controller
                .on_click(frame, &decoded, pos, viewport, polarity, name)
                .err()
                .map(|e| e.to_string());
        }
    }
}

fn load_oracle(config: &Config) -> Box<dyn SegmentationOracle> {
    #[cfg(feature = "sam")]
    {
        match crate::inference::SamSession::new(&config.sam_path) {
            Ok(session) => return Box::new(session),
            Err(e) => warn!(
                "Can't load SAM from {:?}, masks stay empty: {e}",
                config.sam_path
            ),
        }
    }
    #[cfg(not(feature = "sam"))]
    warn!(
        "Built without the sam feature, ignoring {:?}. Masks stay empty",
        config.sam_path
    );
    Box::new(EmptyOracle)
}

impl eframe::App for VideoAnnotatorApp {
    fn update(&mut self, ctx: &egui::Context, _frame: &mut eframe::Frame) {
        self.handle_worker_events(ctx);
        egui::SidePanel::right("records")
            .resizable(true)
            .show(ctx, |ui| self.menu_ui(ui));
        egui::CentralPanel::default().show(ctx, |ui| {
            self.frame_slider_ui(ui);
            self.frame_ui(ui);
        });
    }
}
