//! reconstruct - adaptive frame sampling + COLMAP sparse reconstruction
//!
//! One run:
//! 1. Reads the previous run's feature-count signal and adapts the sampling step
//! 2. Prepares the frames/output workspace (optionally clean)
//! 3. Extracts every Nth frame of the video
//! 4. Runs database creation, feature extraction, matching, mapping, PLY conversion
//! 5. Prints the point-cloud path on success
//!
//! Exit codes: 2 config, 3 workspace, 4 video, 5 frame write, 6 stage failure,
//! 130 interrupted.

use clap::Parser;
use std::io::IsTerminal;
use std::path::PathBuf;
use std::process::ExitCode;

use frame_sfm::ui::{UiMode, UiSink};
use frame_sfm::{
    run_reconstruction, CancelToken, ConfigOverrides, ImageFormat, ImageFrameWriter,
    PipelineConfig, ProcessRunner, RunContext,
};

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Input video path (`stub://<frames>` for a synthetic source).
    #[arg(long)]
    video: Option<String>,
    /// Config file (.toml, otherwise JSON). Falls back to SFM_CONFIG.
    #[arg(long)]
    config: Option<PathBuf>,
    /// Directory receiving sampled frames.
    #[arg(long)]
    images: Option<PathBuf>,
    /// Directory receiving COLMAP outputs.
    #[arg(long)]
    out: Option<PathBuf>,
    /// Previous sampling step (defaults to the last run's step, or 20).
    #[arg(long)]
    step: Option<u32>,
    /// Empty the frames and output directories first.
    #[arg(long)]
    clean: bool,
    /// Frame image format.
    #[arg(long, value_enum)]
    format: Option<ImageFormat>,
    /// Feature-count signal from a previous run.
    #[arg(long)]
    signal: Option<PathBuf>,
    /// Directory searched for `<video stem>_features.txt` when --signal is absent.
    #[arg(long)]
    data_root: Option<PathBuf>,
    /// Let COLMAP use the GPU for extraction and matching.
    #[arg(long)]
    use_gpu: bool,
    /// Mean feature count above which quality counts as good.
    #[arg(long)]
    threshold: Option<f64>,
    /// Step adjustment per run.
    #[arg(long)]
    delta: Option<u32>,
    #[arg(long)]
    min_step: Option<u32>,
    #[arg(long)]
    max_step: Option<u32>,
    /// Use the step as given, without quality adaptation.
    #[arg(long)]
    fixed_step: bool,
    /// COLMAP executable.
    #[arg(long)]
    colmap: Option<String>,
    /// More COLMAP logging during feature extraction.
    #[arg(long)]
    verbose: bool,
    /// Kill any stage running longer than this many seconds.
    #[arg(long)]
    stage_timeout: Option<u64>,
    #[arg(long, value_enum, default_value_t = UiMode::Auto)]
    ui: UiMode,
}

impl Args {
    fn overrides(&self) -> ConfigOverrides {
        ConfigOverrides {
            config_path: self.config.clone(),
            video: self.video.clone(),
            frames_dir: self.images.clone(),
            output_dir: self.out.clone(),
            step: self.step,
            clean: self.clean.then_some(true),
            image_format: self.format,
            signal_path: self.signal.clone(),
            data_root: self.data_root.clone(),
            use_gpu: self.use_gpu.then_some(true),
            quality_threshold: self.threshold,
            step_delta: self.delta,
            step_min: self.min_step,
            step_max: self.max_step,
            adapt: self.fixed_step.then_some(false),
            colmap_bin: self.colmap.clone(),
            verbose: self.verbose.then_some(true),
            stage_timeout_secs: self.stage_timeout,
        }
    }
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let config = match PipelineConfig::load(&args.overrides()) {
        Ok(config) => config,
        Err(e) => {
            log::error!("{e:#}");
            return ExitCode::from(2);
        }
    };

    let cancel = CancelToken::new();
    if let Err(e) = cancel.install_ctrlc_handler() {
        log::warn!("Ctrl-C handling unavailable: {e}");
    }

    let sink = UiSink::new(args.ui, std::io::stderr().is_terminal());
    let runner = ProcessRunner::new()
        .with_cancel(cancel.clone())
        .with_deadline(config.stage_timeout);
    let ctx = RunContext {
        sink: &sink,
        cancel,
        show_progress: sink.pretty(),
    };

    log::info!(
        "reconstructing {} (frames: {}, output: {})",
        config.video,
        config.workspace.frames_dir.display(),
        config.workspace.output_dir.display()
    );

    match run_reconstruction(&config, runner, &mut ImageFrameWriter, &ctx) {
        Ok(report) => {
            log::info!(
                "done: step {} -> {}, {} frames, {} vertices",
                report.plan.previous_step,
                report.plan.step,
                report.sample.saved_count(),
                report
                    .vertices
                    .map_or_else(|| "?".to_string(), |n| n.to_string())
            );
            println!("{}", report.model_path.display());
            ExitCode::SUCCESS
        }
        Err(e) => {
            log::error!("{e}");
            ExitCode::from(e.exit_code())
        }
    }
}
