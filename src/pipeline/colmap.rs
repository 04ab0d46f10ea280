//! COLMAP command descriptors for the canonical stage sequence.
//!
//! DatabaseInit -> FeatureExtraction -> Matching -> Mapping -> ModelConversion, all
//! paths derived from the run's [`Workspace`].

use std::fs;

use super::{CommandSpec, Expectation, PipelineStage, StageKind};
use crate::error::PipelineError;
use crate::workspace::Workspace;

pub const DEFAULT_COLMAP_BIN: &str = "colmap";

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SfmOptions {
    pub colmap_bin: String,
    pub use_gpu: bool,
    pub verbose: bool,
}

impl Default for SfmOptions {
    fn default() -> Self {
        Self {
            colmap_bin: DEFAULT_COLMAP_BIN.to_string(),
            use_gpu: false,
            verbose: false,
        }
    }
}

fn flag(value: bool) -> &'static str {
    if value {
        "1"
    } else {
        "0"
    }
}

pub fn canonical_stages(workspace: &Workspace, options: &SfmOptions) -> Vec<PipelineStage> {
    let colmap = || CommandSpec::new(options.colmap_bin.clone());
    let database = workspace.database_path();
    let frames = workspace.frames_dir.display().to_string();
    let database_arg = database.display().to_string();

    let database_init = colmap()
        .arg("database_creator")
        .opt("database_path", &database_arg)
        .clear(&database)
        .prepare_dir(&workspace.output_dir)
        .expect(Expectation::File(database.clone()));

    let mut feature_extraction = colmap()
        .arg("feature_extractor")
        .opt("database_path", &database_arg)
        .opt("image_path", &frames)
        .opt("ImageReader.single_camera", 1)
        .opt("SiftExtraction.use_gpu", flag(options.use_gpu));
    if options.verbose {
        feature_extraction = feature_extraction.opt("log_level", 1);
    }

    let matching = colmap()
        .arg("exhaustive_matcher")
        .opt("database_path", &database_arg)
        .opt("SiftMatching.use_gpu", flag(options.use_gpu));

    let sparse = workspace.sparse_dir();
    let mapping = colmap()
        .arg("mapper")
        .opt("database_path", &database_arg)
        .opt("image_path", &frames)
        .opt("output_path", sparse.display())
        .clear(&sparse)
        .prepare_dir(&sparse)
        .expect(Expectation::Directory(workspace.sparse_model_dir()));

    let model = workspace.model_path();
    let conversion = colmap()
        .arg("model_converter")
        .opt("input_path", workspace.sparse_model_dir().display())
        .opt("output_path", model.display())
        .opt("output_type", "PLY")
        .clear(&model)
        .expect(Expectation::PointCloud(model));

    vec![
        PipelineStage::new(StageKind::DatabaseInit, database_init),
        PipelineStage::new(StageKind::FeatureExtraction, feature_extraction),
        PipelineStage::new(StageKind::Matching, matching),
        PipelineStage::new(StageKind::Mapping, mapping),
        PipelineStage::new(StageKind::ModelConversion, conversion),
    ]
}

/// Checks the stage inputs exist before anything is launched.
pub fn validate_inputs(workspace: &Workspace) -> Result<usize, PipelineError> {
    let entries = fs::read_dir(&workspace.frames_dir).map_err(|e| {
        PipelineError::Config(format!(
            "frames directory {} is not readable: {}",
            workspace.frames_dir.display(),
            e
        ))
    })?;
    let frames = entries
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().map(|t| t.is_file()).unwrap_or(false))
        .count();
    if frames == 0 {
        return Err(PipelineError::NoFrames(workspace.frames_dir.clone()));
    }
    Ok(frames)
}
