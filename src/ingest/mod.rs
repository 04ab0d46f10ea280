//! Video decoding sources.
//!
//! A decoder hands out RGB frames one at a time until end-of-stream:
//! - Local video files (feature: ffmpeg)
//! - `stub://<frames>` synthetic source (testing, dry runs)
//!
//! The underlying decode resources belong to the decoder value and are released when it
//! is dropped, so every exit path of a sampling run releases them.

#[cfg(feature = "ffmpeg")]
mod ffmpeg;
pub mod synthetic;

use anyhow::Result;

use crate::error::PipelineError;

#[cfg(feature = "ffmpeg")]
pub use self::ffmpeg::FfmpegDecoder;
pub use synthetic::SyntheticDecoder;

/// One decoded frame, packed RGB24.
#[derive(Clone, Debug)]
pub struct Frame {
    pub width: u32,
    pub height: u32,
    pub pixels: Vec<u8>,
}

impl Frame {
    pub fn new(width: u32, height: u32, pixels: Vec<u8>) -> Self {
        Self {
            width,
            height,
            pixels,
        }
    }
}

pub trait VideoDecoder {
    /// Total frame count if the container reports one.
    fn frame_count(&self) -> Option<u64>;

    /// Next frame in presentation order, `None` at end-of-stream.
    fn read_next(&mut self) -> Result<Option<Frame>>;
}

impl<D: VideoDecoder + ?Sized> VideoDecoder for Box<D> {
    fn frame_count(&self) -> Option<u64> {
        (**self).frame_count()
    }

    fn read_next(&mut self) -> Result<Option<Frame>> {
        (**self).read_next()
    }
}

/// Open a video source by path.
pub fn open_video(path: &str) -> Result<Box<dyn VideoDecoder>, PipelineError> {
    let open_error = |reason: String| PipelineError::VideoOpen {
        path: path.to_string(),
        reason,
    };

    if path.trim().is_empty() {
        return Err(open_error("empty path".to_string()));
    }
    if let Some(descriptor) = path.strip_prefix("stub://") {
        let decoder = SyntheticDecoder::from_descriptor(descriptor).map_err(|e| open_error(e.to_string()))?;
        return Ok(Box::new(decoder));
    }
    if path.contains("://") {
        return Err(open_error(
            "only local files are supported (no URL schemes)".to_string(),
        ));
    }
    if !std::path::Path::new(path).is_file() {
        return Err(open_error("no such file".to_string()));
    }

    #[cfg(feature = "ffmpeg")]
    {
        let decoder = FfmpegDecoder::open(path).map_err(|e| open_error(format!("{e:#}")))?;
        Ok(Box::new(decoder))
    }
    #[cfg(not(feature = "ffmpeg"))]
    {
        Err(open_error(
            "decoding video files requires the ffmpeg feature".to_string(),
        ))
    }
}
