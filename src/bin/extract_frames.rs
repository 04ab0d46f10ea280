//! extract_frames - write every Nth video frame to a directory

use anyhow::{bail, Result};
use clap::Parser;
use std::io::IsTerminal;
use std::path::PathBuf;

use frame_sfm::{
    open_video, prepare, CancelToken, FrameSampler, ImageFormat, ImageFrameWriter, LogSink,
    StepPolicy,
};

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Path to input video.
    #[arg(long)]
    video: String,
    /// Output directory.
    #[arg(long, default_value = "images")]
    out: PathBuf,
    /// Save every N-th frame (10 to 50).
    #[arg(long, default_value_t = 20)]
    step: u32,
    /// Output image format.
    #[arg(long, value_enum, default_value_t = ImageFormat::Jpg)]
    format: ImageFormat,
    /// Empty the output directory first.
    #[arg(long)]
    clean: bool,
}

fn check_step(step: u32) -> Result<()> {
    let bounds = StepPolicy::default();
    if !bounds.contains(step) {
        bail!("step {} outside [{}, {}]", step, bounds.min, bounds.max);
    }
    Ok(())
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();
    check_step(args.step)?;

    let cancel = CancelToken::new();
    cancel.install_ctrlc_handler()?;

    let decoder = open_video(&args.video)?;
    prepare(&args.out, args.clean, &LogSink)?;

    let report = FrameSampler::new(args.step)
        .with_format(args.format)
        .with_progress(std::io::stderr().is_terminal())
        .with_cancel(cancel)
        .sample(decoder, &args.out, &mut ImageFrameWriter, &LogSink)?;

    println!(
        "Extracted {} frames to {}",
        report.saved_count(),
        args.out.display()
    );
    Ok(())
}
