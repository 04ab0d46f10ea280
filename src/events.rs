//! Structured run events.
//!
//! Components report what they do through an [`EventSink`] instead of printing.
//! [`LogSink`] forwards to the `log` facade; [`MemorySink`] records events so tests can
//! assert on diagnostics.

use std::path::PathBuf;
use std::sync::Mutex;

use crate::pipeline::{ExitState, StageKind};

#[derive(Clone, Debug, PartialEq)]
pub enum PipelineEvent {
    WorkspaceCleared {
        path: PathBuf,
    },
    WorkspaceEntryNotRemoved {
        path: PathBuf,
        reason: String,
    },
    SamplingStarted {
        total_frames: Option<u64>,
        step: u32,
    },
    FrameSaved {
        saved_index: u64,
        source_index: u64,
        path: PathBuf,
    },
    SamplingFinished {
        frames_read: u64,
        frames_saved: u64,
    },
    QualitySignalRejected {
        reason: String,
    },
    QualityAssessed {
        mean: f64,
        threshold: f64,
        good: bool,
    },
    StepAdjusted {
        previous: u32,
        next: u32,
        quality_good: bool,
    },
    StageStarted {
        stage: StageKind,
    },
    StageOutput {
        stage: StageKind,
        text: String,
    },
    StageSucceeded {
        stage: StageKind,
    },
    StageFailed {
        stage: StageKind,
        status: ExitState,
        diagnostic: String,
    },
    PointCloudReady {
        path: PathBuf,
        vertices: u64,
    },
}

pub trait EventSink {
    fn emit(&self, event: &PipelineEvent);
}

/// Forwards events to the `log` facade.
#[derive(Clone, Copy, Debug, Default)]
pub struct LogSink;

impl EventSink for LogSink {
    fn emit(&self, event: &PipelineEvent) {
        match event {
            PipelineEvent::WorkspaceCleared { path } => {
                log::info!("workspace cleared: {}", path.display());
            }
            PipelineEvent::WorkspaceEntryNotRemoved { path, reason } => {
                log::warn!("could not remove {}: {}", path.display(), reason);
            }
            PipelineEvent::SamplingStarted { total_frames, step } => match total_frames {
                Some(total) => log::info!("sampling every {step}th of {total} frames"),
                None => log::info!("sampling every {step}th frame (frame count unknown)"),
            },
            PipelineEvent::FrameSaved {
                saved_index,
                source_index,
                path,
            } => {
                log::debug!(
                    "saved frame #{saved_index} (source {source_index}) -> {}",
                    path.display()
                );
            }
            PipelineEvent::SamplingFinished {
                frames_read,
                frames_saved,
            } => {
                log::info!("extracted {frames_saved} frames out of {frames_read} read");
            }
            PipelineEvent::QualitySignalRejected { reason } => {
                log::warn!("quality signal rejected, assuming poor quality: {reason}");
            }
            PipelineEvent::QualityAssessed {
                mean,
                threshold,
                good,
            } => {
                log::info!("quality mean={mean:.2} threshold={threshold} good={good}");
            }
            PipelineEvent::StepAdjusted {
                previous,
                next,
                quality_good,
            } => {
                log::info!("sampling step {previous} -> {next} (quality good: {quality_good})");
            }
            PipelineEvent::StageStarted { stage } => log::info!("stage {stage} started"),
            PipelineEvent::StageOutput { stage, text } => {
                for line in text.lines().filter(|line| !line.trim().is_empty()) {
                    log::debug!("[{stage}] {line}");
                }
            }
            PipelineEvent::StageSucceeded { stage } => log::info!("stage {stage} succeeded"),
            PipelineEvent::StageFailed {
                stage,
                status,
                diagnostic,
            } => {
                log::error!("stage {stage} failed ({status}): {diagnostic}");
            }
            PipelineEvent::PointCloudReady { path, vertices } => {
                log::info!("point cloud ready at {} ({vertices} vertices)", path.display());
            }
        }
    }
}

/// Records every event in memory.
#[derive(Debug, Default)]
pub struct MemorySink {
    events: Mutex<Vec<PipelineEvent>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<PipelineEvent> {
        match self.events.lock() {
            Ok(events) => events.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

impl EventSink for MemorySink {
    fn emit(&self, event: &PipelineEvent) {
        match self.events.lock() {
            Ok(mut events) => events.push(event.clone()),
            Err(poisoned) => poisoned.into_inner().push(event.clone()),
        }
    }
}
