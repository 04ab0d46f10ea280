//! `run.json`: what a run did, and where the next run picks up its step.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::pipeline::StageKind;

pub const SUMMARY_FILE: &str = "run.json";

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Succeeded,
    StageFailed,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub video: String,
    pub previous_step: u32,
    pub step: u32,
    pub quality_mean: Option<f64>,
    pub quality_good: bool,
    pub frames_read: u64,
    pub frames_saved: u64,
    pub status: RunStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failed_stage: Option<StageKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub diagnostic: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_path: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vertices: Option<u64>,
}

impl RunSummary {
    pub fn path_in(output_dir: &Path) -> PathBuf {
        output_dir.join(SUMMARY_FILE)
    }

    /// Previous run's summary, if one exists and parses.
    pub fn load(output_dir: &Path) -> Option<Self> {
        let path = Self::path_in(output_dir);
        let raw = match fs::read_to_string(&path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return None,
            Err(e) => {
                log::warn!("ignoring unreadable {}: {}", path.display(), e);
                return None;
            }
        };
        match serde_json::from_str(&raw) {
            Ok(summary) => Some(summary),
            Err(e) => {
                log::warn!("ignoring malformed {}: {}", path.display(), e);
                None
            }
        }
    }

    pub fn write(&self, output_dir: &Path) -> Result<PathBuf> {
        let path = Self::path_in(output_dir);
        let json = serde_json::to_string_pretty(self)?;
        fs::write(&path, json).with_context(|| format!("write {}", path.display()))?;
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> RunSummary {
        RunSummary {
            video: "clip.mp4".to_string(),
            previous_step: 20,
            step: 30,
            quality_mean: Some(1333.3),
            quality_good: true,
            frames_read: 300,
            frames_saved: 10,
            status: RunStatus::StageFailed,
            failed_stage: Some(StageKind::Matching),
            diagnostic: Some("no matches".to_string()),
            model_path: None,
            vertices: None,
        }
    }

    #[test]
    fn written_summary_loads_back() -> Result<()> {
        let tmp = tempfile::tempdir()?;
        sample().write(tmp.path())?;
        assert_eq!(RunSummary::load(tmp.path()), Some(sample()));
        let raw = fs::read_to_string(tmp.path().join(SUMMARY_FILE))?;
        assert!(raw.contains("\"stage_failed\""));
        assert!(!raw.contains("model_path"));
        Ok(())
    }

    #[test]
    fn missing_or_garbage_summary_is_ignored() -> Result<()> {
        let tmp = tempfile::tempdir()?;
        assert_eq!(RunSummary::load(tmp.path()), None);
        fs::write(tmp.path().join(SUMMARY_FILE), "{not json")?;
        assert_eq!(RunSummary::load(tmp.path()), None);
        Ok(())
    }
}
