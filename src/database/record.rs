use std::{collections::BTreeMap, sync::Arc};

use image::RgbImage;
use serde::{Deserialize, Serialize};

use crate::mask::Mask;

pub type FrameIndex = u32;

/// Pixel coordinate in source image space
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(from = "[f32; 2]", into = "[f32; 2]")]
pub struct Point {
    pub x: f32,
    pub y: f32,
}

impl Point {
    pub const fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    pub fn distance(&self, other: &Point) -> f32 {
        (self.x - other.x).hypot(self.y - other.y)
    }

    pub(crate) fn is_valid(&self) -> bool {
        self.x.is_finite() && self.y.is_finite() && self.x >= 0.0 && self.y >= 0.0
    }
}

impl From<[f32; 2]> for Point {
    fn from([x, y]: [f32; 2]) -> Self {
        Self { x, y }
    }
}

impl From<Point> for [f32; 2] {
    fn from(value: Point) -> Self {
        [value.x, value.y]
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Polarity {
    /// "This is the object"
    Positive,
    /// "This is not the object"
    Negative,
}

impl Polarity {
    pub fn opposite(self) -> Self {
        match self {
            Polarity::Positive => Polarity::Negative,
            Polarity::Negative => Polarity::Positive,
        }
    }
}

/// One named object within one frame
#[derive(Debug, Clone)]
pub struct Record {
    pub(crate) frame: FrameIndex,
    pub(crate) name: String,
    pub(crate) positive_points: Vec<Point>,
    pub(crate) negative_points: Vec<Point>,
    pub(crate) segmentation: Option<Arc<Mask>>,
    pub(crate) revision: u64,
}

impl Record {
    pub(crate) fn new(frame: FrameIndex, name: String, revision: u64) -> Self {
        Self {
            frame,
            name,
            positive_points: Vec::new(),
            negative_points: Vec::new(),
            segmentation: None,
            revision,
        }
    }

    pub fn frame(&self) -> FrameIndex {
        self.frame
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn positive_points(&self) -> &[Point] {
        &self.positive_points
    }

    pub fn negative_points(&self) -> &[Point] {
        &self.negative_points
    }

    pub(crate) fn points_mut(&mut self, polarity: Polarity) -> &mut Vec<Point> {
        match polarity {
            Polarity::Positive => &mut self.positive_points,
            Polarity::Negative => &mut self.negative_points,
        }
    }

    pub fn segmentation(&self) -> Option<&Arc<Mask>> {
        self.segmentation.as_ref()
    }

    /// The mask doesn't reflect the current points
    pub fn is_stale(&self) -> bool {
        self.segmentation.is_none()
    }

    pub fn is_empty(&self) -> bool {
        self.positive_points.is_empty() && self.negative_points.is_empty()
    }

    /// Changes whenever the points of this record change
    pub fn revision(&self) -> u64 {
        self.revision
    }
}

/// Annotation state of one video frame
#[derive(Debug, Clone)]
pub struct Frame {
    pub(crate) frame: FrameIndex,
    pub(crate) records: BTreeMap<String, Record>,
    pub(crate) original_image: Arc<RgbImage>,
    pub(crate) segmented_image: Option<Arc<RgbImage>>,
    pub(crate) revision: u64,
}

impl Frame {
    pub(crate) fn new(frame: FrameIndex, original_image: Arc<RgbImage>, revision: u64) -> Self {
        Self {
            frame,
            records: BTreeMap::new(),
            original_image,
            segmented_image: None,
            revision,
        }
    }

    pub fn index(&self) -> FrameIndex {
        self.frame
    }

    /// Records ordered by name
    pub fn records(&self) -> impl Iterator<Item = &Record> + '_ {
        self.records.values()
    }

    pub fn record(&self, name: &str) -> Option<&Record> {
        self.records.get(name)
    }

    pub fn original_image(&self) -> &Arc<RgbImage> {
        &self.original_image
    }

    pub fn segmented_image(&self) -> Option<&Arc<RgbImage>> {
        self.segmented_image.as_ref()
    }

    /// Composite if it's up to date, the captured frame otherwise
    pub fn display_image(&self) -> &Arc<RgbImage> {
        self.segmented_image.as_ref().unwrap_or(&self.original_image)
    }

    /// Every record carries a current mask
    pub fn is_segmented(&self) -> bool {
        self.records.values().all(|r| !r.is_stale())
    }

    /// Changes whenever a record of this frame is added, modified or removed
    pub fn revision(&self) -> u64 {
        self.revision
    }
}
