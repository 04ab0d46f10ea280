//! Error taxonomy for a reconstruction run.
//!
//! Fatal conditions (`Workspace`, `VideoOpen`, `FrameWrite`) stop the run before any
//! stage executes. `Stage` stops only the remainder of the pipeline. Quality signal
//! problems never surface here; see [`QualitySignalError`].

use std::path::PathBuf;
use thiserror::Error;

use crate::pipeline::StageFailure;

/// The workspace directory could not be brought into existence.
#[derive(Error, Debug)]
pub enum WorkspaceError {
    #[error("cannot create workspace directory {path}: {source}")]
    Create {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("workspace path {0} exists but is not a directory")]
    NotADirectory(PathBuf),
}

/// Reasons a quality signal was rejected. Recovered locally as a "poor quality" verdict.
#[derive(Error, Debug)]
pub enum QualitySignalError {
    #[error("signal source {path} unreadable: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("signal source {path} line {line}: malformed record {record:?}")]
    Malformed {
        path: PathBuf,
        line: usize,
        record: String,
    },

    #[error("signal source {0} contains no records")]
    Empty(PathBuf),
}

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Workspace(#[from] WorkspaceError),

    #[error("cannot open video {path}: {reason}")]
    VideoOpen { path: String, reason: String },

    #[error("video decode failed after {frames_read} frames: {reason}")]
    Decode { frames_read: u64, reason: String },

    #[error("failed to write frame {path}: {reason}")]
    FrameWrite { path: PathBuf, reason: String },

    #[error("frames directory {0} contains no frames")]
    NoFrames(PathBuf),

    #[error("interrupted during {0}")]
    Interrupted(String),

    #[error(transparent)]
    Stage(#[from] StageFailure),
}

impl PipelineError {
    /// Process exit code reported by the binaries for this error.
    pub fn exit_code(&self) -> u8 {
        match self {
            PipelineError::Config(_) => 2,
            PipelineError::Workspace(_) => 3,
            PipelineError::VideoOpen { .. }
            | PipelineError::Decode { .. }
            | PipelineError::NoFrames(_) => 4,
            PipelineError::FrameWrite { .. } => 5,
            PipelineError::Stage(failure) if failure.status.is_interrupted() => 130,
            PipelineError::Stage(_) => 6,
            PipelineError::Interrupted(_) => 130,
        }
    }
}

pub type Result<T> = std::result::Result<T, PipelineError>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::{ExitState, StageKind};

    #[test]
    fn stage_errors_name_the_stage() {
        let err = PipelineError::from(StageFailure {
            stage: StageKind::Matching,
            status: ExitState::Code(1),
            diagnostic: "no features".to_string(),
        });
        let msg = err.to_string();
        assert!(msg.contains("Matching"), "{msg}");
        assert!(msg.contains("no features"), "{msg}");
        assert_eq!(err.exit_code(), 6);
    }

    #[test]
    fn interrupted_stage_maps_to_sigint_code() {
        let err = PipelineError::from(StageFailure {
            stage: StageKind::Mapping,
            status: ExitState::Interrupted,
            diagnostic: String::new(),
        });
        assert_eq!(err.exit_code(), 130);
    }
}
