use std::{io, path::Path};

use ffmpeg::util::error::{EAGAIN, EWOULDBLOCK};
use ffmpeg_next as ffmpeg;
use image::RgbImage;
use log::debug;

use super::VideoSource;
use crate::database::FrameIndex;

/// Video file decoded with ffmpeg. Frames are numbered in decode order.
pub struct FfmpegVideo {
    input: ffmpeg::format::context::Input,
    decoder: ffmpeg::decoder::Video,
    stream_index: usize,
    frame_count: FrameIndex,
    fps: f32,
    // Index of the frame the decoder yields next
    next_index: FrameIndex,
    eof_sent: bool,
}

impl FfmpegVideo {
    pub fn open(path: impl AsRef<Path>) -> io::Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("Video {path:?} doesn't exist"),
            ));
        }
        ffmpeg::init().map_err(backend_error)?;
        let input = ffmpeg::format::input(&path).map_err(backend_error)?;

        let (stream_index, fps, frame_count, decoder) = {
            let stream = input
                .streams()
                .best(ffmpeg::media::Type::Video)
                .ok_or_else(|| {
                    io::Error::new(
                        io::ErrorKind::InvalidData,
                        format!("No video stream in {path:?}"),
                    )
                })?;
            let rate = stream.avg_frame_rate();
            let fps = match rate.denominator() {
                0 => 0.0,
                _ => f64::from(rate) as f32,
            };
            let frame_count = match stream.frames() {
                n if n > 0 => n as FrameIndex,
                _ => {
                    let seconds = stream.duration() as f64 * f64::from(stream.time_base());
                    (seconds * fps as f64).round().max(0.0) as FrameIndex
                }
            };
            let context = ffmpeg::codec::context::Context::from_parameters(stream.parameters())
                .map_err(backend_error)?;
            let decoder = context.decoder().video().map_err(backend_error)?;
            (stream.index(), fps, frame_count, decoder)
        };
        if frame_count == 0 || fps <= 0.0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("Unknown frame count or rate in {path:?}"),
            ));
        }
        debug!(
            "Opened {path:?}: {frame_count} frames at {fps:.2} fps, {}x{}",
            decoder.width(),
            decoder.height()
        );

        Ok(Self {
            input,
            decoder,
            stream_index,
            frame_count,
            fps,
            next_index: 0,
            eof_sent: false,
        })
    }

    fn rewind(&mut self) -> io::Result<()> {
        self.input.seek(0, ..1).map_err(backend_error)?;
        self.decoder.flush();
        self.next_index = 0;
        self.eof_sent = false;
        Ok(())
    }

    fn next_packet(&mut self) -> Option<ffmpeg::Packet> {
        let stream_index = self.stream_index;
        self.input
            .packets()
            .find_map(|(stream, packet)| (stream.index() == stream_index).then_some(packet))
    }

    // Feeds the decoder until it yields the frame at `index`
    fn decode_until(&mut self, index: FrameIndex) -> io::Result<ffmpeg::util::frame::Video> {
        let mut decoded = ffmpeg::util::frame::Video::empty();
        loop {
            match self.decoder.receive_frame(&mut decoded) {
                Ok(()) => {
                    let current = self.next_index;
                    self.next_index += 1;
                    if current == index {
                        return Ok(decoded);
                    }
                    continue;
                }
                Err(ffmpeg::Error::Eof) => {
                    return Err(io::Error::new(
                        io::ErrorKind::UnexpectedEof,
                        format!("Video ended after {} frames", self.next_index),
                    ));
                }
                Err(e) if is_retryable_error(&e) => {}
                Err(e) => return Err(backend_error(e)),
            }

            match self.next_packet() {
                Some(packet) => match self.decoder.send_packet(&packet) {
                    Err(e) if !is_retryable_error(&e) => return Err(backend_error(e)),
                    _ => {}
                },
                None if !self.eof_sent => {
                    self.decoder.send_eof().map_err(backend_error)?;
                    self.eof_sent = true;
                }
                None => {
                    return Err(io::Error::new(
                        io::ErrorKind::UnexpectedEof,
                        format!("Video ended after {} frames", self.next_index),
                    ));
                }
            }
        }
    }
}

impl VideoSource for FfmpegVideo {
    fn frame_count(&self) -> FrameIndex {
        self.frame_count
    }

    fn fps(&self) -> f32 {
        self.fps
    }

    fn read(&mut self, index: FrameIndex) -> io::Result<RgbImage> {
        if index >= self.frame_count {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("Frame {index} is out of range ({} frames)", self.frame_count),
            ));
        }
        if index < self.next_index {
            self.rewind()?;
        }
        let decoded = self.decode_until(index)?;

        let (width, height) = (decoded.width(), decoded.height());
        let mut scaler = ffmpeg::software::scaling::context::Context::get(
            decoded.format(),
            width,
            height,
            ffmpeg::format::pixel::Pixel::RGB24,
            width,
            height,
            ffmpeg::software::scaling::flag::Flags::BILINEAR,
        )
        .map_err(backend_error)?;
        let mut rgb = ffmpeg::util::frame::Video::empty();
        scaler.run(&decoded, &mut rgb).map_err(backend_error)?;
        rgb_image(&rgb)
    }
}

fn rgb_image(frame: &ffmpeg::util::frame::Video) -> io::Result<RgbImage> {
    let (width, height) = (frame.width(), frame.height());
    let row = width as usize * 3;
    let pixels = frame
        .data(0)
        .chunks(frame.stride(0).max(1))
        .take(height as usize)
        .flat_map(|line| line.get(..row).unwrap_or(line))
        .copied()
        .collect();
    RgbImage::from_raw(width, height, pixels).ok_or_else(|| {
        io::Error::new(
            io::ErrorKind::InvalidData,
            format!("Decoded frame is smaller than {width}x{height}"),
        )
    })
}

fn is_retryable_error(error: &ffmpeg::Error) -> bool {
    matches!(
        error,
        ffmpeg::Error::Other { errno }
            if *errno == EAGAIN || *errno == EWOULDBLOCK
    )
}

fn backend_error(error: ffmpeg::Error) -> io::Error {
    io::Error::other(error)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let Err(e) = FfmpegVideo::open(dir.path().join("missing.mp4")) else {
            panic!("Opened a missing video");
        };
        assert_eq!(io::ErrorKind::NotFound, e.kind());
    }

    #[test]
    fn garbage_file_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.mp4");
        std::fs::write(&path, b"definitely not a video").unwrap();
        assert!(FfmpegVideo::open(&path).is_err());
    }
}
