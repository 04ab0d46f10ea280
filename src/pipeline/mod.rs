//! Staged SfM pipeline execution.
//!
//! Stages run strictly in order through a [`CommandRunner`]. A stage starts only when
//! every earlier stage succeeded; the first failure halts the pipeline and is returned
//! as-is. Artifacts of completed stages are left in place. There are no retries: a
//! retry is a fresh run with a different sampling step.

pub mod colmap;
pub mod runner;

use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use crate::events::{EventSink, PipelineEvent};
use crate::ply;

pub use colmap::{canonical_stages, SfmOptions};
pub use runner::{CommandOutput, CommandRunner, ProcessRunner};

/// Lines of captured output kept in a failure diagnostic.
const DIAGNOSTIC_TAIL_LINES: usize = 20;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum StageKind {
    DatabaseInit,
    FeatureExtraction,
    Matching,
    Mapping,
    ModelConversion,
}

impl StageKind {
    pub const ALL: [StageKind; 5] = [
        StageKind::DatabaseInit,
        StageKind::FeatureExtraction,
        StageKind::Matching,
        StageKind::Mapping,
        StageKind::ModelConversion,
    ];

    pub fn name(self) -> &'static str {
        match self {
            StageKind::DatabaseInit => "DatabaseInit",
            StageKind::FeatureExtraction => "FeatureExtraction",
            StageKind::Matching => "Matching",
            StageKind::Mapping => "Mapping",
            StageKind::ModelConversion => "ModelConversion",
        }
    }
}

impl fmt::Display for StageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// How an external command ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum ExitState {
    Code(i32),
    /// Terminated by a signal not sent by us.
    Signalled,
    /// Killed because the run was cancelled.
    Interrupted,
    /// Killed because the caller's deadline passed.
    TimedOut,
    /// The program could not be started, or its status could not be collected.
    NotLaunched,
}

impl ExitState {
    pub fn success(self) -> bool {
        self == ExitState::Code(0)
    }

    pub fn is_interrupted(self) -> bool {
        self == ExitState::Interrupted
    }
}

impl fmt::Display for ExitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExitState::Code(code) => write!(f, "exit code {code}"),
            ExitState::Signalled => f.write_str("killed by signal"),
            ExitState::Interrupted => f.write_str("interrupted"),
            ExitState::TimedOut => f.write_str("timed out"),
            ExitState::NotLaunched => f.write_str("not launched"),
        }
    }
}

/// Artifact a stage must leave behind for its exit to count as success.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Expectation {
    Directory(PathBuf),
    File(PathBuf),
    /// A PLY file with a parseable header and at least one vertex.
    PointCloud(PathBuf),
}

/// Typed external command: program, ordered arguments, and its success predicate.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    /// Stale outputs removed before launch, so only this invocation can satisfy `expects`.
    pub clear_paths: Vec<PathBuf>,
    /// Directories created before launch.
    pub prepare_dirs: Vec<PathBuf>,
    pub expects: Vec<Expectation>,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            clear_paths: Vec::new(),
            prepare_dirs: Vec::new(),
            expects: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// `--name value` pair.
    pub fn opt(self, name: &str, value: impl fmt::Display) -> Self {
        self.arg(format!("--{name}")).arg(value.to_string())
    }

    pub fn clear(mut self, path: impl Into<PathBuf>) -> Self {
        self.clear_paths.push(path.into());
        self
    }

    pub fn prepare_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.prepare_dirs.push(dir.into());
        self
    }

    pub fn expect(mut self, expectation: Expectation) -> Self {
        self.expects.push(expectation);
        self
    }
}

impl fmt::Display for CommandSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.program)?;
        for arg in &self.args {
            if arg.contains(char::is_whitespace) {
                write!(f, " {arg:?}")?;
            } else {
                write!(f, " {arg}")?;
            }
        }
        Ok(())
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PipelineStage {
    pub kind: StageKind,
    pub command: CommandSpec,
}

impl PipelineStage {
    pub fn new(kind: StageKind, command: CommandSpec) -> Self {
        Self { kind, command }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[error("stage {stage} failed ({status}): {diagnostic}")]
pub struct StageFailure {
    pub stage: StageKind,
    pub status: ExitState,
    pub diagnostic: String,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StageOutcome {
    Success,
    Failure(StageFailure),
}

impl StageOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, StageOutcome::Success)
    }

    pub fn into_result(self) -> Result<(), StageFailure> {
        match self {
            StageOutcome::Success => Ok(()),
            StageOutcome::Failure(failure) => Err(failure),
        }
    }
}

/// Runs stages in order, halting at the first failure.
pub struct Orchestrator<R: CommandRunner> {
    runner: R,
}

impl<R: CommandRunner> Orchestrator<R> {
    pub fn new(runner: R) -> Self {
        Self { runner }
    }

    pub fn runner(&self) -> &R {
        &self.runner
    }

    pub fn into_runner(self) -> R {
        self.runner
    }

    pub fn run(&mut self, stages: &[PipelineStage], sink: &dyn EventSink) -> StageOutcome {
        for stage in stages {
            sink.emit(&PipelineEvent::StageStarted { stage: stage.kind });
            if let Err(failure) = self.run_stage(stage, sink) {
                sink.emit(&PipelineEvent::StageFailed {
                    stage: failure.stage,
                    status: failure.status,
                    diagnostic: failure.diagnostic.clone(),
                });
                return StageOutcome::Failure(failure);
            }
            sink.emit(&PipelineEvent::StageSucceeded { stage: stage.kind });
        }
        StageOutcome::Success
    }

    fn run_stage(&mut self, stage: &PipelineStage, sink: &dyn EventSink) -> Result<(), StageFailure> {
        let fail = |status: ExitState, diagnostic: String| StageFailure {
            stage: stage.kind,
            status,
            diagnostic,
        };

        for path in &stage.command.clear_paths {
            remove_stale(path).map_err(|e| {
                fail(
                    ExitState::NotLaunched,
                    format!("cannot remove stale {}: {}", path.display(), e),
                )
            })?;
        }
        for dir in &stage.command.prepare_dirs {
            fs::create_dir_all(dir).map_err(|e| {
                fail(
                    ExitState::NotLaunched,
                    format!("cannot create {}: {}", dir.display(), e),
                )
            })?;
        }

        log::debug!("running {}", stage.command);
        let output = self.runner.run(&stage.command);
        for text in [&output.stdout, &output.stderr] {
            if !text.trim().is_empty() {
                sink.emit(&PipelineEvent::StageOutput {
                    stage: stage.kind,
                    text: text.clone(),
                });
            }
        }
        if !output.status.success() {
            return Err(fail(output.status, diagnostic_text(&output)));
        }

        for expectation in &stage.command.expects {
            check_expectation(expectation, sink).map_err(|msg| fail(output.status, msg))?;
        }
        Ok(())
    }
}

fn remove_stale(path: &Path) -> io::Result<()> {
    let result = match fs::symlink_metadata(path) {
        Ok(meta) if meta.is_dir() => fs::remove_dir_all(path),
        Ok(_) => fs::remove_file(path),
        Err(e) => Err(e),
    };
    match result {
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        other => other,
    }
}

fn check_expectation(expectation: &Expectation, sink: &dyn EventSink) -> Result<(), String> {
    match expectation {
        Expectation::Directory(path) if path.is_dir() => Ok(()),
        Expectation::Directory(path) => Err(format!("expected directory {} was not produced", path.display())),
        Expectation::File(path) if path.is_file() => Ok(()),
        Expectation::File(path) => Err(format!("expected file {} was not produced", path.display())),
        Expectation::PointCloud(path) => {
            let header = ply::read_header(path)
                .map_err(|e| format!("point cloud {} is not readable: {e:#}", path.display()))?;
            if header.vertex_count == 0 {
                return Err(format!("point cloud {} contains no vertices", path.display()));
            }
            sink.emit(&PipelineEvent::PointCloudReady {
                path: path.clone(),
                vertices: header.vertex_count,
            });
            Ok(())
        }
    }
}

/// Tail of stderr (or stdout when stderr is empty), falling back to the exit state.
fn diagnostic_text(output: &CommandOutput) -> String {
    let source = if output.stderr.trim().is_empty() {
        &output.stdout
    } else {
        &output.stderr
    };
    let lines: Vec<&str> = source.lines().filter(|l| !l.trim().is_empty()).collect();
    if lines.is_empty() {
        return output.status.to_string();
    }
    let start = lines.len().saturating_sub(DIAGNOSTIC_TAIL_LINES);
    lines[start..].join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::MemorySink;

    /// Replays canned outputs keyed by program name and records invocations.
    struct ScriptedRunner {
        failing: Vec<(&'static str, i32)>,
        invoked: Vec<String>,
    }

    impl CommandRunner for ScriptedRunner {
        fn run(&mut self, command: &CommandSpec) -> CommandOutput {
            self.invoked.push(command.program.clone());
            match self.failing.iter().find(|(p, _)| *p == command.program) {
                Some((_, code)) => CommandOutput {
                    status: ExitState::Code(*code),
                    stdout: "partial progress\n".to_string(),
                    stderr: format!("{} exploded\n", command.program),
                },
                None => CommandOutput::success(""),
            }
        }
    }

    fn stage(kind: StageKind, program: &str) -> PipelineStage {
        PipelineStage::new(kind, CommandSpec::new(program))
    }

    #[test]
    fn failure_halts_remaining_stages() {
        let mut orchestrator = Orchestrator::new(ScriptedRunner {
            failing: vec![("b", 2)],
            invoked: Vec::new(),
        });
        let stages = [
            stage(StageKind::DatabaseInit, "a"),
            stage(StageKind::FeatureExtraction, "b"),
            stage(StageKind::Matching, "c"),
        ];
        let sink = MemorySink::new();
        let outcome = orchestrator.run(&stages, &sink);

        assert_eq!(
            outcome,
            StageOutcome::Failure(StageFailure {
                stage: StageKind::FeatureExtraction,
                status: ExitState::Code(2),
                diagnostic: "b exploded".to_string(),
            })
        );
        assert_eq!(orchestrator.runner().invoked, vec!["a", "b"]);
        assert!(!sink
            .events()
            .contains(&PipelineEvent::StageStarted { stage: StageKind::Matching }));
    }

    #[test]
    fn all_stages_succeed() {
        let mut orchestrator = Orchestrator::new(ScriptedRunner {
            failing: Vec::new(),
            invoked: Vec::new(),
        });
        let stages = [stage(StageKind::DatabaseInit, "a"), stage(StageKind::Matching, "c")];
        assert!(orchestrator.run(&stages, &MemorySink::new()).is_success());
        assert_eq!(orchestrator.into_runner().invoked, vec!["a", "c"]);
    }

    #[test]
    fn missing_expected_artifact_fails_the_stage() {
        let tmp = tempfile::tempdir().unwrap();
        let mut orchestrator = Orchestrator::new(ScriptedRunner {
            failing: Vec::new(),
            invoked: Vec::new(),
        });
        let stages = [
            PipelineStage::new(
                StageKind::Mapping,
                CommandSpec::new("mapper")
                    .prepare_dir(tmp.path().join("sparse"))
                    .expect(Expectation::Directory(tmp.path().join("sparse/0"))),
            ),
            stage(StageKind::ModelConversion, "convert"),
        ];
        let outcome = orchestrator.run(&stages, &MemorySink::new());
        let failure = outcome.into_result().unwrap_err();
        assert_eq!(failure.stage, StageKind::Mapping);
        assert!(failure.diagnostic.contains("sparse/0"));
        assert!(tmp.path().join("sparse").is_dir());
        assert_eq!(orchestrator.runner().invoked, vec!["mapper"]);
    }

    #[test]
    fn stale_artifacts_do_not_satisfy_expectations() {
        let tmp = tempfile::tempdir().unwrap();
        let sparse = tmp.path().join("sparse");
        fs::create_dir_all(sparse.join("0")).unwrap();
        fs::write(sparse.join("0/points3D.bin"), b"old").unwrap();
        let mut orchestrator = Orchestrator::new(ScriptedRunner {
            failing: Vec::new(),
            invoked: Vec::new(),
        });
        let stages = [PipelineStage::new(
            StageKind::Mapping,
            CommandSpec::new("mapper")
                .clear(&sparse)
                .prepare_dir(&sparse)
                .expect(Expectation::Directory(sparse.join("0"))),
        )];

        let failure = orchestrator
            .run(&stages, &MemorySink::new())
            .into_result()
            .unwrap_err();
        assert_eq!(failure.stage, StageKind::Mapping);
        assert_eq!(failure.status, ExitState::Code(0));
        assert!(sparse.is_dir());
        assert!(!sparse.join("0").exists());
    }

    #[test]
    fn clearing_a_missing_path_is_fine() {
        let tmp = tempfile::tempdir().unwrap();
        assert!(remove_stale(&tmp.path().join("absent.ply")).is_ok());
        let file = tmp.path().join("model.ply");
        fs::write(&file, b"ply").unwrap();
        remove_stale(&file).unwrap();
        assert!(!file.exists());
    }

    #[test]
    fn diagnostic_falls_back_to_stdout_then_status() {
        let out = CommandOutput {
            status: ExitState::Code(1),
            stdout: "line one\nline two\n".to_string(),
            stderr: "  \n".to_string(),
        };
        assert_eq!(diagnostic_text(&out), "line one\nline two");

        let silent = CommandOutput {
            status: ExitState::TimedOut,
            stdout: String::new(),
            stderr: String::new(),
        };
        assert_eq!(diagnostic_text(&silent), "timed out");
    }

    #[test]
    fn diagnostic_keeps_only_the_tail() {
        let stderr: String = (0..100).map(|i| format!("line {i}\n")).collect();
        let out = CommandOutput {
            status: ExitState::Code(1),
            stdout: String::new(),
            stderr,
        };
        let text = diagnostic_text(&out);
        assert_eq!(text.lines().count(), DIAGNOSTIC_TAIL_LINES);
        assert!(text.ends_with("line 99"));
    }

    #[test]
    fn command_line_display_quotes_spaces() {
        let cmd = CommandSpec::new("colmap")
            .arg("mapper")
            .opt("image_path", "my images");
        assert_eq!(cmd.to_string(), "colmap mapper --image_path \"my images\"");
    }
}
