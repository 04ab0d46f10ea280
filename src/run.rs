//! One complete reconstruction run.
//!
//! assess quality -> adapt step -> open video -> prepare workspace -> sample frames ->
//! COLMAP stages -> `run.json`. Fatal errors return before any stage is launched; a
//! stage failure is returned after the summary is written.

use std::path::PathBuf;

use crate::cancel::CancelToken;
use crate::config::PipelineConfig;
use crate::error::{PipelineError, Result};
use crate::events::{EventSink, PipelineEvent};
use crate::ingest::open_video;
use crate::pipeline::colmap::{canonical_stages, validate_inputs};
use crate::pipeline::{CommandRunner, Orchestrator, StageOutcome};
use crate::ply;
use crate::quality::{self, QualityVerdict};
use crate::sampler::{FrameSampler, FrameWriter, SampleReport};
use crate::summary::{RunStatus, RunSummary};

#[derive(Clone, Debug)]
pub struct StepPlan {
    pub previous_step: u32,
    pub step: u32,
    pub verdict: QualityVerdict,
}

#[derive(Debug)]
pub struct RunReport {
    pub plan: StepPlan,
    pub sample: SampleReport,
    pub model_path: PathBuf,
    pub vertices: Option<u64>,
}

pub struct RunContext<'a> {
    pub sink: &'a dyn EventSink,
    pub cancel: CancelToken,
    pub show_progress: bool,
}

/// Choose this run's sampling step from the prior run's quality signal.
pub fn plan_step(config: &PipelineConfig, sink: &dyn EventSink) -> StepPlan {
    let previous_step = config
        .step
        .or_else(|| {
            RunSummary::load(&config.workspace.output_dir)
                .map(|summary| summary.step)
                .filter(|step| config.policy.contains(*step))
        })
        .unwrap_or_else(|| config.default_step());

    if !config.adapt {
        return StepPlan {
            previous_step,
            step: previous_step,
            verdict: QualityVerdict {
                mean: None,
                good: false,
            },
        };
    }

    let verdict = quality::evaluate(&config.signal_path(), config.quality_threshold, sink);
    let step = config.policy.next(previous_step, verdict.good);
    sink.emit(&PipelineEvent::StepAdjusted {
        previous: previous_step,
        next: step,
        quality_good: verdict.good,
    });
    StepPlan {
        previous_step,
        step,
        verdict,
    }
}

pub fn run_reconstruction<R: CommandRunner>(
    config: &PipelineConfig,
    runner: R,
    writer: &mut dyn FrameWriter,
    ctx: &RunContext<'_>,
) -> Result<RunReport> {
    let plan = plan_step(config, ctx.sink);
    let workspace = &config.workspace;

    let decoder = open_video(&config.video)?;
    workspace.prepare(config.clean, ctx.sink)?;

    let sampler = FrameSampler::new(plan.step)
        .with_format(config.image_format)
        .with_progress(ctx.show_progress)
        .with_cancel(ctx.cancel.clone());
    let sample = sampler.sample(decoder, &workspace.frames_dir, writer, ctx.sink)?;

    if sample.saved_count() == 0 {
        return Err(PipelineError::NoFrames(workspace.frames_dir.clone()));
    }
    let on_disk = validate_inputs(workspace)?;
    if on_disk as u64 > sample.saved_count() {
        log::warn!(
            "{} files in {} predate this run and will be reconstructed too (use --clean)",
            on_disk as u64 - sample.saved_count(),
            workspace.frames_dir.display()
        );
    }
    if ctx.cancel.is_cancelled() {
        return Err(PipelineError::Interrupted("frame sampling".to_string()));
    }

    let stages = canonical_stages(workspace, &config.sfm);
    let outcome = Orchestrator::new(runner).run(&stages, ctx.sink);

    let model_path = workspace.model_path();
    let mut summary = RunSummary {
        video: config.video.clone(),
        previous_step: plan.previous_step,
        step: plan.step,
        quality_mean: plan.verdict.mean,
        quality_good: plan.verdict.good,
        frames_read: sample.frames_read,
        frames_saved: sample.saved_count(),
        status: RunStatus::Succeeded,
        failed_stage: None,
        diagnostic: None,
        model_path: None,
        vertices: None,
    };

    let result = match outcome {
        StageOutcome::Success => {
            let vertices = ply::read_header(&model_path).ok().map(|h| h.vertex_count);
            summary.model_path = Some(model_path.clone());
            summary.vertices = vertices;
            Ok(RunReport {
                plan,
                sample,
                model_path,
                vertices,
            })
        }
        StageOutcome::Failure(failure) => {
            summary.status = RunStatus::StageFailed;
            summary.failed_stage = Some(failure.stage);
            summary.diagnostic = Some(failure.diagnostic.clone());
            Err(PipelineError::Stage(failure))
        }
    };

    if let Err(e) = summary.write(&workspace.output_dir) {
        log::warn!("could not write run summary: {e:#}");
    }
    result
}
