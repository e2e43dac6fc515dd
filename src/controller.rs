use std::sync::Arc;

use eframe::egui::{Pos2, Rect, Vec2};
use image::RgbImage;
use log::{debug, warn};

use crate::{
    database::{AnnotationError, AnnotationStore, FrameIndex, Point, PointChange, Polarity},
    queue::WorkSender,
};

/// Aspect preserving fit of an image into a viewport, centered with black bars
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Letterbox {
    image_size: Vec2,
    image_rect: Rect,
    scale: f32,
}

impl Letterbox {
    pub fn fit(image_size: Vec2, viewport: Rect) -> Self {
        let scale = (viewport.width() / image_size.x).min(viewport.height() / image_size.y);
        let image_rect = Rect::from_center_size(viewport.center(), image_size * scale);
        Self {
            image_size,
            image_rect,
            scale,
        }
    }

    /// Where the image is drawn
    pub fn image_rect(&self) -> Rect {
        self.image_rect
    }

    /// Source pixel below `pos`, clamped to the image
    pub fn to_image(&self, pos: Pos2) -> Point {
        let p = (pos - self.image_rect.min) / self.scale;
        Point::new(
            p.x.clamp(0.0, (self.image_size.x - 1.0).max(0.0)),
            p.y.clamp(0.0, (self.image_size.y - 1.0).max(0.0)),
        )
    }
}

/// Translates user input into store mutations and queues the affected frames
pub struct AnnotationController {
    store: AnnotationStore,
    sender: WorkSender,
    current_frame: FrameIndex,
}

impl AnnotationController {
    pub fn new(store: AnnotationStore, sender: WorkSender) -> Self {
        Self {
            store,
            sender,
            current_frame: 0,
        }
    }

    pub fn store(&self) -> &AnnotationStore {
        &self.store
    }

    pub fn current_frame(&self) -> FrameIndex {
        self.current_frame
    }

    pub fn set_current_frame(&mut self, frame: FrameIndex) {
        self.current_frame = frame;
    }

    /// `click` is in display space, `viewport` is the area the image is fit into
    pub fn on_click(
        &mut self,
        frame: FrameIndex,
        image: &Arc<RgbImage>,
        click: Pos2,
        viewport: Rect,
        polarity: Polarity,
        name: &str,
    ) -> Result<PointChange, AnnotationError> {
        let image_size = Vec2::new(image.width() as f32, image.height() as f32);
        let point = Letterbox::fit(image_size, viewport).to_image(click);
        let change = self.store.add_point(frame, name, point, polarity, image)?;
        debug!("{polarity:?} click on '{name}' at frame {frame} {point:?}: {change:?}");
        self.enqueue(frame);
        Ok(change)
    }

    /// Returns false if there was no such record
    pub fn delete_record(&mut self, frame: FrameIndex, name: &str) -> bool {
        if !self.store.remove_record(frame, name) {
            return false;
        }
        if self.store.read().get(frame).is_some() {
            self.enqueue(frame);
        }
        true
    }

    /// The image to redraw, if `frame` is on screen
    pub fn on_worker_done(&self, frame: FrameIndex) -> Option<Arc<RgbImage>> {
        (frame == self.current_frame)
            .then(|| self.display_image(frame))
            .flatten()
    }

    /// Composite if it's up to date, otherwise the captured original.
    /// `None` for frames without annotations.
    pub fn display_image(&self, frame: FrameIndex) -> Option<Arc<RgbImage>> {
        self.store
            .read()
            .get(frame)
            .map(|f| f.display_image().clone())
    }

    /// Queues every annotated frame, e.g. after loading records
    pub fn enqueue_all(&self) {
        let frames = self.store.read().frame_ids().collect::<Vec<_>>();
        for frame in frames {
            self.enqueue(frame);
        }
    }

    fn enqueue(&self, frame: FrameIndex) {
        if !self.sender.push(frame) {
            warn!("Segmentation worker is gone, frame {frame} won't be segmented");
        }
    }
}
