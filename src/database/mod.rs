use std::{collections::BTreeMap, sync::Arc};

use image::RgbImage;
use log::debug;
use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::mask::Mask;

mod record;

pub use record::{Frame, FrameIndex, Point, Polarity, Record};

/// A click closer than this to a point of the opposite polarity removes that point
pub const DEFAULT_CANCEL_RADIUS: f32 = 100.0;

#[derive(Debug, thiserror::Error, Clone, PartialEq)]
pub enum AnnotationError {
    #[error("Object name mustn't be empty")]
    EmptyName,

    #[error("Invalid point ({x}, {y})")]
    InvalidPoint { x: f32, y: f32 },
}

/// What `add_point` did to the record
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PointChange {
    Added,
    /// A nearby point of the opposite polarity was removed instead of adding the new one
    Cancelled { removed: Point },
    /// The cancellation left the record without points, so the record was dropped
    RecordRemoved { removed: Point, frame_removed: bool },
}

/// Every annotated frame of one video
#[derive(Debug)]
pub struct Database {
    frames: BTreeMap<FrameIndex, Frame>,
    cancel_radius: f32,
    // Monotonic source for record and frame revisions
    revision: u64,
    dirty: bool,
}

impl Default for Database {
    fn default() -> Self {
        Self::with_cancel_radius(DEFAULT_CANCEL_RADIUS)
    }
}

impl Database {
    pub fn with_cancel_radius(cancel_radius: f32) -> Self {
        Self {
            frames: BTreeMap::new(),
            cancel_radius,
            revision: 0,
            dirty: false,
        }
    }

    fn next_revision(&mut self) -> u64 {
        self.revision += 1;
        self.revision
    }

    /// `original_image` is only captured if `frame` wasn't annotated before
    pub fn add_point(
        &mut self,
        frame: FrameIndex,
        name: &str,
        point: Point,
        polarity: Polarity,
        original_image: &Arc<RgbImage>,
    ) -> Result<PointChange, AnnotationError> {
        if name.is_empty() {
            return Err(AnnotationError::EmptyName);
        }
        let image = self
            .frames
            .get(&frame)
            .map(|f| &f.original_image)
            .unwrap_or(original_image);
        if !point.is_valid() || point.x >= image.width() as f32 || point.y >= image.height() as f32
        {
            return Err(AnnotationError::InvalidPoint {
                x: point.x,
                y: point.y,
            });
        }

        let revision = self.next_revision();
        let cancel_radius = self.cancel_radius;
        self.dirty = true;

        let frame_data = self
            .frames
            .entry(frame)
            .or_insert_with(|| Frame::new(frame, original_image.clone(), revision));
        frame_data.revision = revision;
        frame_data.segmented_image = None;

        let record = frame_data
            .records
            .entry(name.to_string())
            .or_insert_with(|| Record::new(frame, name.to_string(), revision));
        record.revision = revision;
        record.segmentation = None;

        let opposite = record.points_mut(polarity.opposite());
        let Some(pos) = opposite
            .iter()
            .position(|other| other.distance(&point) < cancel_radius)
        else {
            record.points_mut(polarity).push(point);
            return Ok(PointChange::Added);
        };
        let removed = opposite.remove(pos);
        debug!("Point {point:?} cancels {removed:?} of '{name}' at frame {frame}");

        if !record.is_empty() {
            return Ok(PointChange::Cancelled { removed });
        }
        frame_data.records.remove(name);
        let frame_removed = frame_data.records.is_empty();
        if frame_removed {
            self.frames.remove(&frame);
        }
        Ok(PointChange::RecordRemoved {
            removed,
            frame_removed,
        })
    }

    /// Returns false if there was no such record
    pub fn remove_record(&mut self, frame: FrameIndex, name: &str) -> bool {
        let Some(frame_data) = self.frames.get_mut(&frame) else {
            return false;
        };
        if frame_data.records.remove(name).is_none() {
            return false;
        }
        self.dirty = true;
        if frame_data.records.is_empty() {
            self.frames.remove(&frame);
            return true;
        }
        let revision = self.next_revision();
        if let Some(frame_data) = self.frames.get_mut(&frame) {
            frame_data.revision = revision;
            frame_data.segmented_image = None;
        }
        true
    }

    /// Inserts a record with its points, e.g. when loading persisted annotations.
    /// The mask is left stale.
    pub fn insert_record(
        &mut self,
        frame: FrameIndex,
        name: &str,
        positive_points: Vec<Point>,
        negative_points: Vec<Point>,
        original_image: &Arc<RgbImage>,
    ) -> Result<(), AnnotationError> {
        if name.is_empty() {
            return Err(AnnotationError::EmptyName);
        }
        if let Some(p) = positive_points
            .iter()
            .chain(negative_points.iter())
            .find(|p| !p.is_valid())
        {
            return Err(AnnotationError::InvalidPoint { x: p.x, y: p.y });
        }
        let revision = self.next_revision();
        let frame_data = self
            .frames
            .entry(frame)
            .or_insert_with(|| Frame::new(frame, original_image.clone(), revision));
        frame_data.revision = revision;
        frame_data.segmented_image = None;

        let mut record = Record::new(frame, name.to_string(), revision);
        record.positive_points = positive_points;
        record.negative_points = negative_points;
        frame_data.records.insert(name.to_string(), record);
        Ok(())
    }

    pub fn get(&self, frame: FrameIndex) -> Option<&Frame> {
        self.frames.get(&frame)
    }

    pub fn frame_ids(&self) -> impl Iterator<Item = FrameIndex> + '_ {
        self.frames.keys().copied()
    }

    /// All records, ordered by frame and name
    pub fn records(&self) -> impl Iterator<Item = &Record> + '_ {
        self.frames.values().flat_map(|f| f.records.values())
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// There are changes which weren't saved yet
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn mark_saved(&mut self) {
        self.dirty = false;
    }

    pub fn mark_dirty(&mut self) {
        self.dirty = true;
    }

    /// Stores `mask` unless the record changed since `revision` was observed
    pub fn publish_segmentation(
        &mut self,
        frame: FrameIndex,
        name: &str,
        revision: u64,
        mask: Arc<Mask>,
    ) -> bool {
        match self
            .frames
            .get_mut(&frame)
            .and_then(|f| f.records.get_mut(name))
        {
            Some(record) if record.revision == revision => {
                record.segmentation = Some(mask);
                true
            }
            _ => false,
        }
    }

    /// Stores the composite unless the frame changed since `revision` was observed
    /// or any of its records is stale.
    pub fn publish_composite(
        &mut self,
        frame: FrameIndex,
        revision: u64,
        image: Arc<RgbImage>,
    ) -> bool {
        match self.frames.get_mut(&frame) {
            Some(frame_data) if frame_data.revision == revision && frame_data.is_segmented() => {
                frame_data.segmented_image = Some(image);
                true
            }
            _ => false,
        }
    }
}

/// Shared handle to the database used by the UI and the segmentation worker
#[derive(Clone, Default)]
pub struct AnnotationStore(Arc<RwLock<Database>>);

impl AnnotationStore {
    pub fn new(database: Database) -> Self {
        Self(Arc::new(RwLock::new(database)))
    }

    pub fn add_point(
        &self,
        frame: FrameIndex,
        name: &str,
        point: Point,
        polarity: Polarity,
        original_image: &Arc<RgbImage>,
    ) -> Result<PointChange, AnnotationError> {
        self.0
            .write()
            .add_point(frame, name, point, polarity, original_image)
    }

    pub fn remove_record(&self, frame: FrameIndex, name: &str) -> bool {
        self.0.write().remove_record(frame, name)
    }

    /// Snapshot of the frame. Images are shared, not copied.
    pub fn get(&self, frame: FrameIndex) -> Option<Frame> {
        self.0.read().get(frame).cloned()
    }

    pub fn read(&self) -> RwLockReadGuard<'_, Database> {
        self.0.read()
    }

    pub fn write(&self) -> RwLockWriteGuard<'_, Database> {
        self.0.write()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn image() -> Arc<RgbImage> {
        Arc::new(RgbImage::new(640, 480))
    }

    fn points(db: &Database, frame: FrameIndex, name: &str) -> (Vec<Point>, Vec<Point>) {
        let record = db.get(frame).unwrap().record(name).unwrap();
        (
            record.positive_points().to_vec(),
            record.negative_points().to_vec(),
        )
    }

    #[test]
    fn first_click_creates_frame_and_record() {
        let mut db = Database::default();
        let change = db
            .add_point(5, "cat", Point::new(100., 100.), Polarity::Positive, &image())
            .unwrap();
        assert_eq!(PointChange::Added, change);
        assert_eq!(
            (vec![Point::new(100., 100.)], vec![]),
            points(&db, 5, "cat")
        );
        let frame = db.get(5).unwrap();
        assert!(frame.record("cat").unwrap().is_stale());
        assert!(frame.segmented_image().is_none());
        assert!(db.is_dirty());
    }

    #[test]
    fn opposite_click_nearby_cancels() {
        let mut db = Database::default();
        let img = image();
        db.add_point(1, "cat", Point::new(100., 100.), Polarity::Positive, &img)
            .unwrap();
        db.add_point(1, "cat", Point::new(300., 300.), Polarity::Positive, &img)
            .unwrap();
        let change = db
            .add_point(1, "cat", Point::new(150., 120.), Polarity::Negative, &img)
            .unwrap();
        assert_eq!(
            PointChange::Cancelled {
                removed: Point::new(100., 100.)
            },
            change
        );
        assert_eq!((vec![Point::new(300., 300.)], vec![]), points(&db, 1, "cat"));
    }

    #[test]
    fn cancel_radius_is_exclusive() {
        let mut db = Database::default();
        let img = image();
        db.add_point(1, "cat", Point::new(0., 0.), Polarity::Negative, &img)
            .unwrap();
        let change = db
            .add_point(1, "cat", Point::new(100., 0.), Polarity::Positive, &img)
            .unwrap();
        assert_eq!(PointChange::Added, change);
        assert_eq!(
            (vec![Point::new(100., 0.)], vec![Point::new(0., 0.)]),
            points(&db, 1, "cat")
        );
    }

    #[test]
    fn same_polarity_never_cancels() {
        let mut db = Database::default();
        let img = image();
        db.add_point(1, "cat", Point::new(10., 10.), Polarity::Positive, &img)
            .unwrap();
        db.add_point(1, "cat", Point::new(10., 10.), Polarity::Positive, &img)
            .unwrap();
        assert_eq!(2, points(&db, 1, "cat").0.len());
    }

    #[test]
    fn cancelling_the_last_point_drops_record_and_frame() {
        let mut db = Database::default();
        let img = image();
        db.add_point(2, "cat", Point::new(10., 10.), Polarity::Positive, &img)
            .unwrap();
        db.add_point(2, "dog", Point::new(400., 10.), Polarity::Positive, &img)
            .unwrap();

        let change = db
            .add_point(2, "cat", Point::new(12., 12.), Polarity::Negative, &img)
            .unwrap();
        assert_eq!(
            PointChange::RecordRemoved {
                removed: Point::new(10., 10.),
                frame_removed: false
            },
            change
        );
        assert!(db.get(2).unwrap().record("cat").is_none());

        let change = db
            .add_point(2, "dog", Point::new(400., 12.), Polarity::Negative, &img)
            .unwrap();
        assert!(matches!(
            change,
            PointChange::RecordRemoved {
                frame_removed: true,
                ..
            }
        ));
        assert!(db.get(2).is_none());
    }

    #[test]
    fn invalid_input_leaves_store_untouched() {
        let mut db = Database::default();
        let img = image();
        assert_eq!(
            Err(AnnotationError::EmptyName),
            db.add_point(1, "", Point::new(1., 1.), Polarity::Positive, &img)
        );
        assert!(matches!(
            db.add_point(1, "cat", Point::new(f32::NAN, 1.), Polarity::Positive, &img),
            Err(AnnotationError::InvalidPoint { .. })
        ));
        assert!(matches!(
            db.add_point(1, "cat", Point::new(640., 1.), Polarity::Positive, &img),
            Err(AnnotationError::InvalidPoint { .. })
        ));
        assert!(db.is_empty());
        assert!(!db.is_dirty());
    }

    #[test]
    fn image_is_captured_once() {
        let mut db = Database::default();
        let first = image();
        let second = Arc::new(RgbImage::new(10, 10));
        db.add_point(1, "cat", Point::new(1., 1.), Polarity::Positive, &first)
            .unwrap();
        db.add_point(1, "cat", Point::new(200., 200.), Polarity::Positive, &second)
            .unwrap();
        assert!(Arc::ptr_eq(&first, db.get(1).unwrap().original_image()));
    }

    #[test]
    fn mutation_invalidates_published_results() {
        let mut db = Database::default();
        let img = image();
        db.add_point(1, "cat", Point::new(1., 1.), Polarity::Positive, &img)
            .unwrap();
        let revision = db.get(1).unwrap().revision();
        let record_revision = db.get(1).unwrap().record("cat").unwrap().revision();

        let mask = Arc::new(Mask::empty(640, 480));
        assert!(db.publish_segmentation(1, "cat", record_revision, mask));
        assert!(db.publish_composite(1, revision, img.clone()));
        assert!(db.get(1).unwrap().segmented_image().is_some());

        db.add_point(1, "cat", Point::new(300., 300.), Polarity::Positive, &img)
            .unwrap();
        let frame = db.get(1).unwrap();
        assert!(frame.record("cat").unwrap().is_stale());
        assert!(frame.segmented_image().is_none());
    }

    #[test]
    fn stale_publications_are_rejected() {
        let mut db = Database::default();
        let img = image();
        db.add_point(1, "cat", Point::new(1., 1.), Polarity::Positive, &img)
            .unwrap();
        let revision = db.get(1).unwrap().revision();
        db.add_point(1, "cat", Point::new(300., 300.), Polarity::Positive, &img)
            .unwrap();

        assert!(!db.publish_segmentation(1, "cat", revision, Arc::new(Mask::empty(640, 480))));
        let current = db.get(1).unwrap().revision();
        // Composite requires every record to carry a mask
        assert!(!db.publish_composite(1, current, img.clone()));
        assert!(!db.publish_composite(7, current, img));
    }

    #[test]
    fn remove_record_drops_empty_frame() {
        let mut db = Database::default();
        let img = image();
        db.add_point(3, "cat", Point::new(1., 1.), Polarity::Positive, &img)
            .unwrap();
        db.add_point(3, "dog", Point::new(1., 1.), Polarity::Positive, &img)
            .unwrap();
        db.mark_saved();

        assert!(db.remove_record(3, "cat"));
        assert!(db.is_dirty());
        assert!(db.get(3).is_some());
        assert!(!db.remove_record(3, "cat"));
        assert!(db.remove_record(3, "dog"));
        assert!(db.get(3).is_none());
        assert!(!db.remove_record(8, "dog"));
    }

    #[test]
    fn remove_record_invalidates_composite_of_remaining_frame() {
        let mut db = Database::default();
        let img = image();
        db.add_point(3, "cat", Point::new(1., 1.), Polarity::Positive, &img)
            .unwrap();
        db.add_point(3, "dog", Point::new(1., 1.), Polarity::Positive, &img)
            .unwrap();
        let before = db.get(3).unwrap().revision();
        let dog_revision = db.get(3).unwrap().record("dog").unwrap().revision();
        assert!(db.publish_segmentation(3, "dog", dog_revision, Arc::new(Mask::empty(640, 480))));

        assert!(db.remove_record(3, "cat"));
        let after = db.get(3).unwrap().revision();
        assert!(after > before);
        // Revisions stay unique across the database
        db.add_point(4, "cat", Point::new(1., 1.), Polarity::Positive, &img)
            .unwrap();
        assert!(db.get(4).unwrap().revision() > after);

        assert!(!db.publish_composite(3, before, img.clone()));
        assert!(db.publish_composite(3, after, img));
    }

    #[test]
    fn store_snapshots_are_detached() {
        let store = AnnotationStore::default();
        let img = image();
        store
            .add_point(1, "cat", Point::new(1., 1.), Polarity::Positive, &img)
            .unwrap();
        let snapshot = store.get(1).unwrap();
        store
            .add_point(1, "cat", Point::new(300., 1.), Polarity::Positive, &img)
            .unwrap();
        assert_eq!(1, snapshot.record("cat").unwrap().positive_points().len());
        assert_eq!(2, store.get(1).unwrap().record("cat").unwrap().positive_points().len());
    }
}
