use anyhow::{anyhow, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::controller::{StepPolicy, DEFAULT_STEP, DEFAULT_STEP_DELTA, MAX_STEP, MIN_STEP};
use crate::pipeline::colmap::{SfmOptions, DEFAULT_COLMAP_BIN};
use crate::quality::{default_signal_path, DEFAULT_QUALITY_THRESHOLD};
use crate::sampler::ImageFormat;
use crate::workspace::Workspace;

const DEFAULT_FRAMES_DIR: &str = "images";
const DEFAULT_OUTPUT_DIR: &str = "output";
const DEFAULT_DATA_ROOT: &str = "data";

pub const ENV_VARS: [&str; 8] = [
    "SFM_CONFIG",
    "SFM_VIDEO",
    "SFM_SIGNAL_PATH",
    "SFM_DATA_ROOT",
    "SFM_USE_GPU",
    "SFM_QUALITY_THRESHOLD",
    "SFM_COLMAP_BIN",
    "SFM_STAGE_TIMEOUT_SECS",
];

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct PipelineConfigFile {
    video: Option<String>,
    frames_dir: Option<PathBuf>,
    output_dir: Option<PathBuf>,
    clean: Option<bool>,
    image_format: Option<ImageFormat>,
    sampling: Option<SamplingConfigFile>,
    quality: Option<QualityConfigFile>,
    sfm: Option<SfmConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct SamplingConfigFile {
    step: Option<u32>,
    delta: Option<u32>,
    min: Option<u32>,
    max: Option<u32>,
    adapt: Option<bool>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct QualityConfigFile {
    signal_path: Option<PathBuf>,
    data_root: Option<PathBuf>,
    threshold: Option<f64>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct SfmConfigFile {
    colmap_bin: Option<String>,
    use_gpu: Option<bool>,
    verbose: Option<bool>,
    stage_timeout_secs: Option<u64>,
}

/// Values given on the command line. `None` leaves the file/env/default value alone.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub config_path: Option<PathBuf>,
    pub video: Option<String>,
    pub frames_dir: Option<PathBuf>,
    pub output_dir: Option<PathBuf>,
    pub step: Option<u32>,
    pub clean: Option<bool>,
    pub image_format: Option<ImageFormat>,
    pub signal_path: Option<PathBuf>,
    pub data_root: Option<PathBuf>,
    pub use_gpu: Option<bool>,
    pub quality_threshold: Option<f64>,
    pub step_delta: Option<u32>,
    pub step_min: Option<u32>,
    pub step_max: Option<u32>,
    pub adapt: Option<bool>,
    pub colmap_bin: Option<String>,
    pub verbose: Option<bool>,
    pub stage_timeout_secs: Option<u64>,
}

/// Immutable settings for one reconstruction run.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub video: String,
    pub workspace: Workspace,
    /// Explicitly configured step. When absent the previous run's step is used.
    pub step: Option<u32>,
    pub clean: bool,
    pub image_format: ImageFormat,
    pub signal_path: Option<PathBuf>,
    pub data_root: PathBuf,
    pub quality_threshold: f64,
    pub policy: StepPolicy,
    pub adapt: bool,
    pub sfm: SfmOptions,
    pub stage_timeout: Option<Duration>,
}

impl PipelineConfig {
    /// Defaults, then the config file (`--config` or `SFM_CONFIG`), then `SFM_*`
    /// environment variables, then command-line overrides.
    pub fn load(overrides: &ConfigOverrides) -> Result<Self> {
        let config_path = overrides
            .config_path
            .clone()
            .or_else(|| env_nonempty("SFM_CONFIG").map(PathBuf::from));
        let file_cfg = match config_path.as_deref() {
            Some(path) => Some(read_config_file(path)?),
            None => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default());
        cfg.apply_env()?;
        cfg.apply_overrides(overrides);
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: PipelineConfigFile) -> Self {
        let sampling = file.sampling.unwrap_or_default();
        let quality = file.quality.unwrap_or_default();
        let sfm = file.sfm.unwrap_or_default();
        Self {
            video: file.video.unwrap_or_default(),
            workspace: Workspace::new(
                file.frames_dir
                    .unwrap_or_else(|| PathBuf::from(DEFAULT_FRAMES_DIR)),
                file.output_dir
                    .unwrap_or_else(|| PathBuf::from(DEFAULT_OUTPUT_DIR)),
            ),
            step: sampling.step,
            clean: file.clean.unwrap_or(false),
            image_format: file.image_format.unwrap_or_default(),
            signal_path: quality.signal_path,
            data_root: quality
                .data_root
                .unwrap_or_else(|| PathBuf::from(DEFAULT_DATA_ROOT)),
            quality_threshold: quality.threshold.unwrap_or(DEFAULT_QUALITY_THRESHOLD),
            policy: StepPolicy {
                delta: sampling.delta.unwrap_or(DEFAULT_STEP_DELTA),
                min: sampling.min.unwrap_or(MIN_STEP),
                max: sampling.max.unwrap_or(MAX_STEP),
            },
            adapt: sampling.adapt.unwrap_or(true),
            sfm: SfmOptions {
                colmap_bin: sfm
                    .colmap_bin
                    .unwrap_or_else(|| DEFAULT_COLMAP_BIN.to_string()),
                use_gpu: sfm.use_gpu.unwrap_or(false),
                verbose: sfm.verbose.unwrap_or(false),
            },
            stage_timeout: sfm.stage_timeout_secs.map(Duration::from_secs),
        }
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Some(video) = env_nonempty("SFM_VIDEO") {
            self.video = video;
        }
        if let Some(path) = env_nonempty("SFM_SIGNAL_PATH") {
            self.signal_path = Some(PathBuf::from(path));
        }
        if let Some(root) = env_nonempty("SFM_DATA_ROOT") {
            self.data_root = PathBuf::from(root);
        }
        if let Some(value) = env_nonempty("SFM_USE_GPU") {
            self.sfm.use_gpu =
                parse_bool(&value).ok_or_else(|| anyhow!("SFM_USE_GPU must be a boolean"))?;
        }
        if let Some(value) = env_nonempty("SFM_QUALITY_THRESHOLD") {
            self.quality_threshold = value
                .parse()
                .map_err(|_| anyhow!("SFM_QUALITY_THRESHOLD must be a number"))?;
        }
        if let Some(bin) = env_nonempty("SFM_COLMAP_BIN") {
            self.sfm.colmap_bin = bin;
        }
        if let Some(value) = env_nonempty("SFM_STAGE_TIMEOUT_SECS") {
            let seconds: u64 = value.parse().map_err(|_| {
                anyhow!("SFM_STAGE_TIMEOUT_SECS must be an integer number of seconds")
            })?;
            self.stage_timeout = Some(Duration::from_secs(seconds));
        }
        Ok(())
    }

    fn apply_overrides(&mut self, o: &ConfigOverrides) {
        if let Some(video) = &o.video {
            self.video = video.clone();
        }
        if let Some(dir) = &o.frames_dir {
            self.workspace.frames_dir = dir.clone();
        }
        if let Some(dir) = &o.output_dir {
            self.workspace.output_dir = dir.clone();
        }
        if o.step.is_some() {
            self.step = o.step;
        }
        if let Some(clean) = o.clean {
            self.clean = clean;
        }
        if let Some(format) = o.image_format {
            self.image_format = format;
        }
        if o.signal_path.is_some() {
            self.signal_path = o.signal_path.clone();
        }
        if let Some(root) = &o.data_root {
            self.data_root = root.clone();
        }
        if let Some(use_gpu) = o.use_gpu {
            self.sfm.use_gpu = use_gpu;
        }
        if let Some(threshold) = o.quality_threshold {
            self.quality_threshold = threshold;
        }
        if let Some(delta) = o.step_delta {
            self.policy.delta = delta;
        }
        if let Some(min) = o.step_min {
            self.policy.min = min;
        }
        if let Some(max) = o.step_max {
            self.policy.max = max;
        }
        if let Some(adapt) = o.adapt {
            self.adapt = adapt;
        }
        if let Some(bin) = &o.colmap_bin {
            self.sfm.colmap_bin = bin.clone();
        }
        if let Some(verbose) = o.verbose {
            self.sfm.verbose = verbose;
        }
        if let Some(secs) = o.stage_timeout_secs {
            self.stage_timeout = Some(Duration::from_secs(secs));
        }
    }

    fn validate(&self) -> Result<()> {
        if self.video.trim().is_empty() {
            return Err(anyhow!("a video source is required (--video or SFM_VIDEO)"));
        }
        if self.policy.min == 0 {
            return Err(anyhow!("minimum sampling step must be >= 1"));
        }
        if self.policy.min > self.policy.max {
            return Err(anyhow!(
                "step bounds are inverted (min {} > max {})",
                self.policy.min,
                self.policy.max
            ));
        }
        if let Some(step) = self.step {
            if !self.policy.contains(step) {
                return Err(anyhow!(
                    "sampling step {} outside [{}, {}]",
                    step,
                    self.policy.min,
                    self.policy.max
                ));
            }
        }
        if !self.quality_threshold.is_finite() || self.quality_threshold < 0.0 {
            return Err(anyhow!("quality threshold must be a non-negative number"));
        }
        if self.sfm.colmap_bin.trim().is_empty() {
            return Err(anyhow!("colmap binary must not be empty"));
        }
        if self.stage_timeout.is_some_and(|t| t.is_zero()) {
            return Err(anyhow!("stage timeout must be greater than zero"));
        }
        Ok(())
    }

    /// Configured signal path, or `<data_root>/<video stem>_features.txt`.
    pub fn signal_path(&self) -> PathBuf {
        self.signal_path
            .clone()
            .unwrap_or_else(|| default_signal_path(&self.data_root, &self.video))
    }

    /// Step to adapt from when no previous run recorded one.
    pub fn default_step(&self) -> u32 {
        DEFAULT_STEP.clamp(self.policy.min, self.policy.max)
    }
}

fn read_config_file(path: &Path) -> Result<PipelineConfigFile> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config file {}", path.display()))?;
    let is_toml = path
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("toml"));
    let cfg = if is_toml {
        toml::from_str(&raw)
            .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    } else {
        serde_json::from_str(&raw)
            .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    };
    Ok(cfg)
}

fn env_nonempty(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_follow_documented_values() {
        let cfg = PipelineConfig::from_file(PipelineConfigFile::default());
        assert_eq!(cfg.workspace, Workspace::new("images", "output"));
        assert_eq!(cfg.step, None);
        assert_eq!(cfg.default_step(), 20);
        assert!(!cfg.clean);
        assert_eq!(cfg.quality_threshold, 1000.0);
        assert_eq!(cfg.policy, StepPolicy::default());
        assert!(cfg.adapt);
        assert_eq!(cfg.sfm, SfmOptions::default());
        assert_eq!(cfg.stage_timeout, None);
    }

    #[test]
    fn validation_rejects_bad_bounds() {
        let mut cfg = PipelineConfig::from_file(PipelineConfigFile::default());
        cfg.video = "clip.mp4".to_string();
        assert!(cfg.validate().is_ok());

        cfg.step = Some(60);
        assert!(cfg.validate().is_err());
        cfg.step = Some(30);
        cfg.policy.min = 40;
        assert!(cfg.validate().is_err());
        cfg.policy.min = 10;
        cfg.quality_threshold = f64::NAN;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn missing_video_is_rejected() {
        let cfg = PipelineConfig::from_file(PipelineConfigFile::default());
        let err = cfg.validate().unwrap_err();
        assert!(err.to_string().contains("video"));
    }

    #[test]
    fn signal_path_defaults_under_data_root() {
        let mut cfg = PipelineConfig::from_file(PipelineConfigFile::default());
        cfg.video = "/app/data/my_video.mp4".to_string();
        assert_eq!(cfg.signal_path(), PathBuf::from("data/my_video_features.txt"));
        cfg.signal_path = Some(PathBuf::from("/tmp/sig.txt"));
        assert_eq!(cfg.signal_path(), PathBuf::from("/tmp/sig.txt"));
    }

    #[test]
    fn bools_parse_loosely() {
        assert_eq!(parse_bool("Yes"), Some(true));
        assert_eq!(parse_bool("0"), Some(false));
        assert_eq!(parse_bool("maybe"), None);
    }
}
