use std::{
    collections::HashMap,
    io::{self, Write},
    path::{Path, PathBuf},
    sync::Arc,
};

use futures::{future::BoxFuture, FutureExt};
use log::info;
use serde::{Deserialize, Serialize};

use crate::{
    database::{AnnotationError, Database, FrameIndex, Point},
    video::VideoSource,
};

const VERSION: u16 = 1;
const EXTENSION: &str = "records.json";

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("IO: {0}")]
    Io(#[from] io::Error),

    #[error("Json: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Unsupported records version {0}")]
    UnsupportedVersion(u16),

    #[error("Can't read frame {frame}: {source}")]
    Video { frame: FrameIndex, source: io::Error },

    #[error("Invalid record '{name}' at frame {frame}: {source}")]
    InvalidRecord {
        frame: FrameIndex,
        name: String,
        source: AnnotationError,
    },
}

/// Persisted form of a record. Masks aren't stored, they are recomputed on load.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredRecord {
    pub frame: FrameIndex,
    pub name: String,
    pub positive_points: Vec<Point>,
    pub negative_points: Vec<Point>,
}

impl StoredRecord {
    /// Ordered by frame and name
    pub fn collect(database: &Database) -> Vec<Self> {
        database
            .records()
            .map(|r| Self {
                frame: r.frame(),
                name: r.name().to_string(),
                positive_points: r.positive_points().to_vec(),
                negative_points: r.negative_points().to_vec(),
            })
            .collect()
    }
}

#[derive(Serialize, Deserialize)]
struct RecordsDocument {
    version: u16,
    records: Vec<StoredRecord>,
}

/// JSON file holding the records of one video
#[derive(Debug, Clone)]
pub struct RecordFile {
    path: PathBuf,
}

impl RecordFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// `clips/elephant` is stored at `clips/elephant.records.json`
    pub fn for_video(video: &Path) -> Self {
        let path = match video.file_name().and_then(|n| n.to_str()) {
            Some(name) => video.with_file_name(format!("{name}.{EXTENSION}")),
            None => video.join(EXTENSION),
        };
        Self { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Writes the records, or removes the file if there are none
    pub fn save(&self, records: Vec<StoredRecord>) -> Result<(), StorageError> {
        info!("Store {} records at: {:?}", records.len(), self.path);
        if records.is_empty() {
            return match std::fs::remove_file(&self.path) {
                Ok(_) => Ok(()),
                Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
                Err(e) => Err(e.into()),
            };
        }
        let mut f = io::BufWriter::new(std::fs::File::create(&self.path)?);
        serde_json::to_writer_pretty(
            &mut f,
            &RecordsDocument {
                version: VERSION,
                records,
            },
        )?;
        f.flush()?;
        Ok(())
    }

    /// Runs `save` on a separate thread
    /// Saves on a separate thread, which calls `on_done` after the result was sent
    pub fn save_in_background(
        &self,
        records: Vec<StoredRecord>,
        on_done: impl FnOnce() + Send + 'static,
    ) -> BoxFuture<'static, Result<(), StorageError>> {
        let (tx, rx) = futures::channel::oneshot::channel();
        let file = self.clone();
        std::thread::spawn(move || {
            let r = file.save(records);
            let _ = tx.send(r);
            on_done();
        });
        async move {
            rx.await
                .map_err(|e| StorageError::Io(io::Error::other(e)))
                .and_then(|r| r)
        }
        .boxed()
    }

    pub fn read(&self) -> Result<Vec<StoredRecord>, StorageError> {
        let f = match std::fs::File::open(&self.path) {
            Ok(f) => f,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        let document: RecordsDocument = serde_json::from_reader(io::BufReader::new(f))?;
        if document.version != VERSION {
            return Err(StorageError::UnsupportedVersion(document.version));
        }
        Ok(document.records)
    }

    /// Rebuilds the database, reading the image of every annotated frame from `video`.
    /// Every record is stale afterwards.
    pub fn load(
        &self,
        video: &mut dyn VideoSource,
        cancel_radius: f32,
    ) -> Result<Database, StorageError> {
        let records = self.read()?;
        info!("Load {} records from: {:?}", records.len(), self.path);

        let mut database = Database::with_cancel_radius(cancel_radius);
        let mut images = HashMap::new();
        for record in records {
            if record.positive_points.is_empty() && record.negative_points.is_empty() {
                continue;
            }
            let image = match images.get(&record.frame) {
                Some(image) => Arc::clone(image),
                None => {
                    let image = Arc::new(video.read(record.frame).map_err(|source| {
                        StorageError::Video {
                            frame: record.frame,
                            source,
                        }
                    })?);
                    images.insert(record.frame, image.clone());
                    image
                }
            };
            database
                .insert_record(
                    record.frame,
                    &record.name,
                    record.positive_points,
                    record.negative_points,
                    &image,
                )
                .map_err(|source| StorageError::InvalidRecord {
                    frame: record.frame,
                    name: record.name,
                    source,
                })?;
        }
        Ok(database)
    }
}
