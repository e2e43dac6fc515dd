use std::{
    fs::DirEntry,
    io,
    path::{Path, PathBuf},
};

use image::RgbImage;
use itertools::Itertools;

use crate::database::FrameIndex;

#[cfg(feature = "ffmpeg")]
mod ffmpeg;

#[cfg(feature = "ffmpeg")]
pub use ffmpeg::FfmpegVideo;

/// Source of decoded video frames
pub trait VideoSource: Send {
    fn frame_count(&self) -> FrameIndex;
    fn fps(&self) -> f32;
    fn read(&mut self, index: FrameIndex) -> io::Result<RgbImage>;
}

/// Opens a directory of frame images, or a video file when built with ffmpeg.
/// `sequence_fps` is only used for image directories, which carry no frame rate.
pub fn open(path: &Path, sequence_fps: f32) -> io::Result<Box<dyn VideoSource>> {
    if path.is_dir() {
        return Ok(Box::new(ImageSequence::open(path, sequence_fps)?));
    }
    #[cfg(feature = "ffmpeg")]
    return Ok(Box::new(FfmpegVideo::open(path)?));
    #[cfg(not(feature = "ffmpeg"))]
    return Err(io::Error::new(
        io::ErrorKind::Unsupported,
        format!("{path:?} isn't a directory of frames. Video files need the ffmpeg feature"),
    ));
}

/// Keeps a requested position within the video
pub fn clamp_index(index: i64, frame_count: FrameIndex) -> FrameIndex {
    index.clamp(0, frame_count.saturating_sub(1) as i64) as FrameIndex
}

/// A video which was decoded into a directory of images, one per frame
pub struct ImageSequence {
    frames: Vec<PathBuf>,
    fps: f32,
}

impl ImageSequence {
    pub fn open(path: impl AsRef<Path>, fps: f32) -> io::Result<Self> {
        let path = path.as_ref();
        let frames = visit_directory_files(path)
            .filter_map_ok(|entry| {
                let path = entry.path();
                is_frame_image(&path).then_some(path)
            })
            .collect::<io::Result<Vec<_>>>()?
            .into_iter()
            .sorted_unstable()
            .collect::<Vec<_>>();
        if frames.is_empty() {
            return Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("No frame images in {path:?}"),
            ));
        }
        Ok(Self { frames, fps })
    }

    pub fn frame_path(&self, index: FrameIndex) -> Option<&Path> {
        self.frames.get(index as usize).map(PathBuf::as_path)
    }
}

impl VideoSource for ImageSequence {
    fn frame_count(&self) -> FrameIndex {
        self.frames.len() as FrameIndex
    }

    fn fps(&self) -> f32 {
        self.fps
    }

    fn read(&mut self, index: FrameIndex) -> io::Result<RgbImage> {
        let path = self.frame_path(index).ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("Frame {index} is out of range ({} frames)", self.frames.len()),
            )
        })?;
        load_rgb_image(&std::fs::read(path)?)
    }
}

pub fn load_rgb_image(bytes: &[u8]) -> io::Result<RgbImage> {
    Ok(image::load_from_memory(bytes)
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?
        .to_rgb8())
}

fn is_frame_image(path: &Path) -> bool {
    matches!(
        path.extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase())
            .as_deref(),
        Some("png" | "jpg" | "jpeg" | "tif" | "tiff")
    )
}

fn visit_directory_files(
    path: impl Into<PathBuf>,
) -> Box<dyn Iterator<Item = io::Result<DirEntry>>> {
    match std::fs::read_dir(path.into()) {
        Ok(readdir) => Box::new(readdir.flat_map(
            |entry| -> Box<dyn Iterator<Item = io::Result<DirEntry>>> {
                match entry {
                    Ok(entry) => match entry.file_type() {
                        Ok(filetype) if filetype.is_dir() => visit_directory_files(entry.path()),
                        Ok(_) => Box::new(std::iter::once(Ok(entry))),
                        Err(e) => Box::new(std::iter::once(Err(e))),
                    },
                    Err(e) => Box::new(std::iter::once(Err(e))),
                }
            },
        )),
        Err(e) => Box::new(std::iter::once(Err(e))),
    }
}
