//! run_sfm - run the COLMAP stages over an existing frames directory

use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use frame_sfm::pipeline::colmap::{validate_inputs, DEFAULT_COLMAP_BIN};
use frame_sfm::{
    canonical_stages, prepare, CancelToken, LogSink, Orchestrator, PipelineError, ProcessRunner,
    SfmOptions, StageOutcome, Workspace,
};

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Directory containing extracted images.
    #[arg(long, default_value = "./images")]
    images: PathBuf,
    /// Directory for COLMAP outputs.
    #[arg(long, default_value = "./output")]
    out: PathBuf,
    /// Use GPU for processing (if available).
    #[arg(long)]
    use_gpu: bool,
    /// Enable verbose output.
    #[arg(long)]
    verbose: bool,
    /// COLMAP executable.
    #[arg(long, env = "SFM_COLMAP_BIN", default_value = DEFAULT_COLMAP_BIN)]
    colmap: String,
    /// Kill any stage running longer than this many seconds.
    #[arg(long)]
    stage_timeout: Option<u64>,
}

fn run(args: &Args) -> Result<PathBuf, PipelineError> {
    let workspace = Workspace::new(&args.images, &args.out);
    let frames = validate_inputs(&workspace)?;
    prepare(&workspace.output_dir, false, &LogSink)?;
    log::info!("{} frames in {}", frames, workspace.frames_dir.display());

    let cancel = CancelToken::new();
    if let Err(e) = cancel.install_ctrlc_handler() {
        log::warn!("Ctrl-C handling unavailable: {e}");
    }
    let runner = ProcessRunner::new()
        .with_cancel(cancel)
        .with_deadline(args.stage_timeout.map(Duration::from_secs));
    let options = SfmOptions {
        colmap_bin: args.colmap.clone(),
        use_gpu: args.use_gpu,
        verbose: args.verbose,
    };

    let stages = canonical_stages(&workspace, &options);
    match Orchestrator::new(runner).run(&stages, &LogSink) {
        StageOutcome::Success => Ok(workspace.model_path()),
        StageOutcome::Failure(failure) => Err(failure.into()),
    }
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();
    match run(&args) {
        Ok(model) => {
            println!("{}", model.display());
            ExitCode::SUCCESS
        }
        Err(e) => {
            log::error!("{e}");
            ExitCode::from(e.exit_code())
        }
    }
}
