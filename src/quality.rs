//! Quality verdict from a prior run's per-frame feature counts.
//!
//! The signal file holds one non-negative integer per line. Anything that prevents a
//! mean from being computed yields a "poor quality" verdict, which makes the next run
//! sample more densely.

use std::fs;
use std::path::{Path, PathBuf};

use crate::error::QualitySignalError;
use crate::events::{EventSink, PipelineEvent};

pub const DEFAULT_QUALITY_THRESHOLD: f64 = 1000.0;

/// Feature counts in frame order.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct QualitySignal {
    counts: Vec<u64>,
}

impl QualitySignal {
    pub fn new(counts: Vec<u64>) -> Option<Self> {
        (!counts.is_empty()).then_some(Self { counts })
    }

    pub fn counts(&self) -> &[u64] {
        &self.counts
    }

    pub fn mean(&self) -> f64 {
        let sum: u128 = self.counts.iter().map(|&c| u128::from(c)).sum();
        sum as f64 / self.counts.len() as f64
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct QualityVerdict {
    /// `None` when the signal was unusable.
    pub mean: Option<f64>,
    pub good: bool,
}

pub fn parse_signal(path: &Path, raw: &str) -> Result<QualitySignal, QualitySignalError> {
    let mut counts = Vec::new();
    for (idx, line) in raw.lines().enumerate() {
        let record = line.trim();
        if record.is_empty() {
            continue;
        }
        let count = record
            .parse::<u64>()
            .map_err(|_| QualitySignalError::Malformed {
                path: path.to_path_buf(),
                line: idx + 1,
                record: record.to_string(),
            })?;
        counts.push(count);
    }
    QualitySignal::new(counts).ok_or_else(|| QualitySignalError::Empty(path.to_path_buf()))
}

pub fn read_signal(path: &Path) -> Result<QualitySignal, QualitySignalError> {
    let raw = fs::read_to_string(path).map_err(|source| QualitySignalError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    parse_signal(path, &raw)
}

/// Full verdict; never fails. Rejected signals are reported to `sink` as warnings.
pub fn evaluate(path: &Path, threshold: f64, sink: &dyn EventSink) -> QualityVerdict {
    match read_signal(path) {
        Ok(signal) => {
            let mean = signal.mean();
            let good = mean > threshold;
            sink.emit(&PipelineEvent::QualityAssessed {
                mean,
                threshold,
                good,
            });
            QualityVerdict {
                mean: Some(mean),
                good,
            }
        }
        Err(e) => {
            sink.emit(&PipelineEvent::QualitySignalRejected {
                reason: e.to_string(),
            });
            QualityVerdict {
                mean: None,
                good: false,
            }
        }
    }
}

/// `true` iff the signal's mean feature count exceeds `threshold`.
pub fn assess(path: &Path, threshold: f64, sink: &dyn EventSink) -> bool {
    evaluate(path, threshold, sink).good
}

/// `<data_root>/<video stem>_features.txt`, used when no signal path is configured.
pub fn default_signal_path(data_root: &Path, video: &str) -> PathBuf {
    let stem = Path::new(video)
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| "video".to_string());
    data_root.join(format!("{stem}_features.txt"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::MemorySink;

    fn write_signal(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        std::io::Write::write_all(&mut file, contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn mean_above_threshold_is_good() {
        let file = write_signal("500\n1500\n2000\n");
        let sink = MemorySink::new();
        let verdict = evaluate(file.path(), 1000.0, &sink);
        assert!(verdict.good);
        let mean = verdict.mean.unwrap();
        assert!((mean - 1333.333).abs() < 0.01, "{mean}");
    }

    #[test]
    fn mean_equal_to_threshold_is_not_good() {
        let file = write_signal("1000\n1000\n");
        assert!(!assess(file.path(), 1000.0, &MemorySink::new()));
    }

    #[test]
    fn missing_file_is_poor_quality() {
        let sink = MemorySink::new();
        assert!(!assess(Path::new("/no/such/signal.txt"), 1000.0, &sink));
        assert!(matches!(
            sink.events().as_slice(),
            [PipelineEvent::QualitySignalRejected { .. }]
        ));
    }

    #[test]
    fn empty_file_is_poor_quality() {
        let file = write_signal("\n  \n");
        assert!(!assess(file.path(), 0.0, &MemorySink::new()));
    }

    #[test]
    fn non_numeric_record_is_poor_quality() {
        let file = write_signal("5000\nlots\n7000\n");
        let sink = MemorySink::new();
        assert!(!assess(file.path(), 10.0, &sink));
        match &sink.events()[0] {
            PipelineEvent::QualitySignalRejected { reason } => {
                assert!(reason.contains("line 2"), "{reason}");
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[test]
    fn negative_record_is_malformed() {
        let err = parse_signal(Path::new("s.txt"), "10\n-3\n").unwrap_err();
        assert!(matches!(err, QualitySignalError::Malformed { line: 2, .. }));
    }

    #[test]
    fn signal_path_derives_from_video_stem() {
        assert_eq!(
            default_signal_path(Path::new("data"), "/videos/my_video.mp4"),
            PathBuf::from("data/my_video_features.txt")
        );
    }
}
