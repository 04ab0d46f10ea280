//! Every-Nth-frame extraction.
//!
//! Frames are read sequentially; source frame `i` is written iff `i % step == 0`. Output
//! files are numbered by a separate counter so names stay contiguous from
//! `frame_0000` whatever the step. A failed write aborts the whole sampling run: a
//! partial frame set must not reach reconstruction.

use indicatif::{ProgressBar, ProgressStyle};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::cancel::CancelToken;
use crate::error::{PipelineError, Result};
use crate::events::{EventSink, PipelineEvent};
use crate::ingest::{Frame, VideoDecoder};

#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub enum ImageFormat {
    #[default]
    Jpg,
    Png,
}

impl ImageFormat {
    pub fn extension(self) -> &'static str {
        match self {
            ImageFormat::Jpg => "jpg",
            ImageFormat::Png => "png",
        }
    }

    fn codec(self) -> image::ImageFormat {
        match self {
            ImageFormat::Jpg => image::ImageFormat::Jpeg,
            ImageFormat::Png => image::ImageFormat::Png,
        }
    }
}

impl std::str::FromStr for ImageFormat {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "jpg" | "jpeg" => Ok(ImageFormat::Jpg),
            "png" => Ok(ImageFormat::Png),
            other => Err(format!("unsupported image format {other:?} (jpg, png)")),
        }
    }
}

/// `frame_0007.jpg` for saved index 7.
pub fn frame_file_name(saved_index: u64, format: ImageFormat) -> String {
    format!("frame_{:04}.{}", saved_index, format.extension())
}

/// A frame written to disk.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FrameSample {
    pub saved_index: u64,
    pub source_index: u64,
    pub path: PathBuf,
}

#[derive(Clone, Debug, Default)]
pub struct SampleReport {
    pub frames_read: u64,
    pub samples: Vec<FrameSample>,
}

impl SampleReport {
    pub fn saved_count(&self) -> u64 {
        self.samples.len() as u64
    }
}

/// Persists one frame.
pub trait FrameWriter {
    fn write(&mut self, frame: &Frame, path: &Path, format: ImageFormat) -> anyhow::Result<()>;
}

/// Encodes frames with the `image` crate.
#[derive(Clone, Copy, Debug, Default)]
pub struct ImageFrameWriter;

impl FrameWriter for ImageFrameWriter {
    fn write(&mut self, frame: &Frame, path: &Path, format: ImageFormat) -> anyhow::Result<()> {
        let buffer = image::RgbImage::from_raw(frame.width, frame.height, frame.pixels.clone())
            .ok_or_else(|| {
                anyhow::anyhow!(
                    "pixel buffer of {} bytes does not match {}x{} RGB",
                    frame.pixels.len(),
                    frame.width,
                    frame.height
                )
            })?;
        buffer.save_with_format(path, format.codec())?;
        Ok(())
    }
}

#[derive(Clone, Debug)]
pub struct FrameSampler {
    step: u32,
    format: ImageFormat,
    show_progress: bool,
    cancel: Option<CancelToken>,
}

impl FrameSampler {
    pub fn new(step: u32) -> Self {
        Self {
            step,
            format: ImageFormat::default(),
            show_progress: false,
            cancel: None,
        }
    }

    pub fn with_format(mut self, format: ImageFormat) -> Self {
        self.format = format;
        self
    }

    pub fn with_progress(mut self, show: bool) -> Self {
        self.show_progress = show;
        self
    }

    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = Some(cancel);
        self
    }

    pub fn step(&self) -> u32 {
        self.step
    }

    /// Sample `decoder` into `output_dir`, which must already exist.
    ///
    /// The decoder is consumed and dropped before returning, on every path.
    pub fn sample<D: VideoDecoder>(
        &self,
        mut decoder: D,
        output_dir: &Path,
        writer: &mut dyn FrameWriter,
        sink: &dyn EventSink,
    ) -> Result<SampleReport> {
        if self.step == 0 {
            return Err(PipelineError::Config("sampling step must be >= 1".to_string()));
        }
        let step = u64::from(self.step);
        let total = decoder.frame_count();
        sink.emit(&PipelineEvent::SamplingStarted {
            total_frames: total,
            step: self.step,
        });

        let progress = self.progress_bar(total);
        let mut report = SampleReport::default();

        loop {
            if self.cancel.as_ref().is_some_and(CancelToken::is_cancelled) {
                progress.abandon();
                return Err(PipelineError::Interrupted("frame sampling".to_string()));
            }
            let frame = match decoder.read_next() {
                Ok(Some(frame)) => frame,
                Ok(None) => break,
                Err(e) => {
                    progress.abandon();
                    return Err(PipelineError::Decode {
                        frames_read: report.frames_read,
                        reason: format!("{e:#}"),
                    });
                }
            };

            let source_index = report.frames_read;
            report.frames_read += 1;
            progress.inc(1);
            if source_index % step != 0 {
                continue;
            }

            let saved_index = report.saved_count();
            let path = output_dir.join(frame_file_name(saved_index, self.format));
            if let Err(e) = writer.write(&frame, &path, self.format) {
                progress.abandon();
                return Err(PipelineError::FrameWrite {
                    path,
                    reason: format!("{e:#}"),
                });
            }
            sink.emit(&PipelineEvent::FrameSaved {
                saved_index,
                source_index,
                path: path.clone(),
            });
            report.samples.push(FrameSample {
                saved_index,
                source_index,
                path,
            });
        }

        progress.finish_and_clear();
        sink.emit(&PipelineEvent::SamplingFinished {
            frames_read: report.frames_read,
            frames_saved: report.saved_count(),
        });
        Ok(report)
    }

    fn progress_bar(&self, total: Option<u64>) -> ProgressBar {
        if !self.show_progress {
            return ProgressBar::hidden();
        }
        match total {
            Some(total) => {
                let bar = ProgressBar::new(total);
                let style =
                    ProgressStyle::with_template("Extracting frames {bar:40} {pos}/{len} [{elapsed}]")
                        .unwrap_or_else(|_| ProgressStyle::default_bar());
                bar.set_style(style);
                bar
            }
            None => {
                let spinner = ProgressBar::new_spinner();
                spinner.enable_steady_tick(Duration::from_millis(120));
                let style = ProgressStyle::with_template("{spinner} Extracting frames: {pos} read")
                    .unwrap_or_else(|_| ProgressStyle::default_spinner());
                spinner.set_style(style);
                spinner
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::MemorySink;
    use crate::ingest::SyntheticDecoder;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    /// Records target paths without touching the filesystem.
    #[derive(Default)]
    struct RecordingWriter {
        paths: Vec<PathBuf>,
        fail_at: Option<usize>,
    }

    impl FrameWriter for RecordingWriter {
        fn write(&mut self, _frame: &Frame, path: &Path, _format: ImageFormat) -> anyhow::Result<()> {
            if self.fail_at == Some(self.paths.len()) {
                anyhow::bail!("disk full");
            }
            self.paths.push(path.to_path_buf());
            Ok(())
        }
    }

    fn run(total: u64, step: u32) -> SampleReport {
        let mut writer = RecordingWriter::default();
        FrameSampler::new(step)
            .sample(
                SyntheticDecoder::new(total),
                Path::new("out"),
                &mut writer,
                &MemorySink::new(),
            )
            .expect("sampling succeeds")
    }

    #[test]
    fn saves_ceil_total_over_step() {
        for step in [10u32, 17, 20, 33, 50] {
            for total in [0u64, 1, 9, 10, 11, 99, 100, 101, 257] {
                let report = run(total, step);
                let expected = total.div_ceil(u64::from(step));
                assert_eq!(report.saved_count(), expected, "total={total} step={step}");
                assert_eq!(report.frames_read, total);
            }
        }
    }

    #[test]
    fn hundred_frames_every_twentieth() {
        let report = run(100, 20);
        let sources: Vec<u64> = report.samples.iter().map(|s| s.source_index).collect();
        assert_eq!(sources, vec![0, 20, 40, 60, 80]);
        let names: Vec<String> = report
            .samples
            .iter()
            .map(|s| s.path.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(
            names,
            vec![
                "frame_0000.jpg",
                "frame_0001.jpg",
                "frame_0002.jpg",
                "frame_0003.jpg",
                "frame_0004.jpg"
            ]
        );
    }

    #[test]
    fn saved_indices_are_contiguous() {
        let report = run(263, 13);
        for (i, sample) in report.samples.iter().enumerate() {
            assert_eq!(sample.saved_index, i as u64);
            assert_eq!(sample.source_index, i as u64 * 13);
        }
    }

    #[test]
    fn write_failure_is_fatal_and_releases_decoder() {
        let released = Arc::new(AtomicBool::new(false));
        let decoder = SyntheticDecoder::new(100).with_release_flag(released.clone());
        let mut writer = RecordingWriter {
            fail_at: Some(2),
            ..RecordingWriter::default()
        };
        let err = FrameSampler::new(10)
            .sample(decoder, Path::new("out"), &mut writer, &MemorySink::new())
            .unwrap_err();
        match err {
            PipelineError::FrameWrite { path, reason } => {
                assert!(path.ends_with("frame_0002.jpg"));
                assert!(reason.contains("disk full"));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(released.load(Ordering::SeqCst));
        assert_eq!(writer.paths.len(), 2);
    }

    #[test]
    fn unknown_frame_count_still_reports_progress() {
        let sink = MemorySink::new();
        let mut writer = RecordingWriter::default();
        let report = FrameSampler::new(10)
            .sample(
                SyntheticDecoder::new(25).uncounted(),
                Path::new("out"),
                &mut writer,
                &sink,
            )
            .unwrap();
        assert_eq!(report.saved_count(), 3);
        let events = sink.events();
        assert_eq!(
            events.first(),
            Some(&PipelineEvent::SamplingStarted {
                total_frames: None,
                step: 10
            })
        );
        let saved = events
            .iter()
            .filter(|e| matches!(e, PipelineEvent::FrameSaved { .. }))
            .count();
        assert_eq!(saved, 3);
    }

    #[test]
    fn cancelled_token_stops_sampling() {
        let cancel = CancelToken::new();
        cancel.cancel();
        let mut writer = RecordingWriter::default();
        let err = FrameSampler::new(10)
            .with_cancel(cancel)
            .sample(
                SyntheticDecoder::new(50),
                Path::new("out"),
                &mut writer,
                &MemorySink::new(),
            )
            .unwrap_err();
        assert!(matches!(err, PipelineError::Interrupted(_)));
        assert!(writer.paths.is_empty());
    }

    #[test]
    fn writes_decodable_images() {
        let tmp = tempfile::tempdir().unwrap();
        let report = FrameSampler::new(10)
            .with_format(ImageFormat::Png)
            .sample(
                SyntheticDecoder::new(15),
                tmp.path(),
                &mut ImageFrameWriter,
                &MemorySink::new(),
            )
            .unwrap();
        assert_eq!(report.saved_count(), 2);
        let img = image::open(tmp.path().join("frame_0001.png")).unwrap();
        assert_eq!((img.width(), img.height()), (64, 48));
    }

    #[test]
    fn parses_format_names() {
        assert_eq!("JPEG".parse::<ImageFormat>(), Ok(ImageFormat::Jpg));
        assert_eq!("png".parse::<ImageFormat>(), Ok(ImageFormat::Png));
        assert!("gif".parse::<ImageFormat>().is_err());
    }
}
