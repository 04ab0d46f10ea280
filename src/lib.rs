//! Video to sparse 3D reconstruction driver.
//!
//! Samples every Nth frame of a video, runs the COLMAP stages over the sampled frames,
//! and adapts N across runs from the feature-count signal of a previous attempt.
//!
//! # Module Structure
//!
//! - `workspace`: frames/output directory preparation with best-effort cleaning
//! - `ingest`: video decoders (FFmpeg, synthetic)
//! - `sampler`: every-Nth-frame extraction
//! - `quality`: quality verdict from a prior run's feature counts
//! - `controller`: bounded step adaptation
//! - `pipeline`: ordered external stages, process runner, COLMAP commands
//! - `run`: the end-to-end run used by the `reconstruct` binary

pub mod cancel;
pub mod config;
pub mod controller;
pub mod error;
pub mod events;
pub mod ingest;
pub mod pipeline;
pub mod ply;
pub mod quality;
pub mod run;
pub mod sampler;
pub mod summary;
pub mod ui;
pub mod workspace;

pub use cancel::CancelToken;
pub use config::{ConfigOverrides, PipelineConfig};
pub use controller::{next_step, StepPolicy};
pub use error::{PipelineError, QualitySignalError, WorkspaceError};
pub use events::{EventSink, LogSink, MemorySink, PipelineEvent};
pub use ingest::{open_video, Frame, SyntheticDecoder, VideoDecoder};
pub use pipeline::{
    canonical_stages, CommandOutput, CommandRunner, CommandSpec, ExitState, Orchestrator,
    PipelineStage, ProcessRunner, SfmOptions, StageFailure, StageKind, StageOutcome,
};
pub use quality::{assess, QualitySignal, QualityVerdict};
pub use run::{plan_step, run_reconstruction, RunContext, RunReport};
pub use sampler::{FrameSample, FrameSampler, FrameWriter, ImageFormat, ImageFrameWriter};
pub use summary::RunSummary;
pub use workspace::{prepare, Workspace};
