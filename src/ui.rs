use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use std::cell::RefCell;
use std::time::{Duration, Instant};

use crate::events::{EventSink, LogSink, PipelineEvent};
use crate::pipeline::StageKind;

#[derive(Clone, Copy, Debug, PartialEq, Eq, clap::ValueEnum)]
pub enum UiMode {
    Auto,
    Plain,
    Pretty,
}

impl UiMode {
    /// Spinners only make sense on a terminal; `plain` turns them off everywhere.
    pub fn pretty(self, is_tty: bool) -> bool {
        is_tty && self != UiMode::Plain
    }
}

/// One terminal line per running stage.
struct StageLine {
    stage: StageKind,
    started: Instant,
    spinner: Option<ProgressBar>,
}

impl StageLine {
    fn finish(self, ok: bool) {
        let mark = if ok { "✔" } else { "✖" };
        let line = format!(
            "{mark} {} ({})",
            self.stage,
            elapsed_label(self.started.elapsed())
        );
        match self.spinner {
            Some(spinner) => spinner.finish_with_message(line),
            None => eprintln!("{line}"),
        }
    }
}

/// Logs every event and tracks the stage currently running on stderr.
pub struct UiSink {
    pretty: bool,
    current: RefCell<Option<StageLine>>,
}

impl UiSink {
    pub fn new(mode: UiMode, is_tty: bool) -> Self {
        Self {
            pretty: mode.pretty(is_tty),
            current: RefCell::new(None),
        }
    }

    pub fn pretty(&self) -> bool {
        self.pretty
    }

    fn open(&self, stage: StageKind) {
        let spinner = self.pretty.then(|| {
            let spinner = ProgressBar::with_draw_target(None, ProgressDrawTarget::stderr());
            if let Ok(style) = ProgressStyle::with_template("{spinner:.cyan} {wide_msg}") {
                spinner.set_style(style);
            }
            spinner.set_message(format!("{stage} running"));
            spinner.enable_steady_tick(Duration::from_millis(100));
            spinner
        });
        if spinner.is_none() {
            eprintln!("==> {stage}");
        }
        let previous = self.current.replace(Some(StageLine {
            stage,
            started: Instant::now(),
            spinner,
        }));
        // A stage that never reported back is closed as failed.
        if let Some(line) = previous {
            line.finish(false);
        }
    }

    fn close(&self, ok: bool) {
        if let Some(line) = self.current.borrow_mut().take() {
            line.finish(ok);
        }
    }
}

impl EventSink for UiSink {
    fn emit(&self, event: &PipelineEvent) {
        LogSink.emit(event);
        match event {
            PipelineEvent::StageStarted { stage } => self.open(*stage),
            PipelineEvent::StageSucceeded { .. } => self.close(true),
            PipelineEvent::StageFailed { .. } => self.close(false),
            _ => {}
        }
    }
}

fn elapsed_label(elapsed: Duration) -> String {
    let secs = elapsed.as_secs();
    match secs {
        0 => format!("{}ms", elapsed.as_millis()),
        1..=59 => format!("{:.1}s", elapsed.as_secs_f64()),
        _ => format!("{}m{:02}s", secs / 60, secs % 60),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_mode_never_pretty() {
        assert!(!UiMode::Plain.pretty(true));
        assert!(!UiMode::Pretty.pretty(false));
        assert!(UiMode::Auto.pretty(true));
    }

    #[test]
    fn sink_tracks_stage_lifecycle() {
        let sink = UiSink::new(UiMode::Plain, false);
        sink.emit(&PipelineEvent::StageStarted {
            stage: StageKind::Matching,
        });
        assert!(sink.current.borrow().is_some());
        sink.emit(&PipelineEvent::StageSucceeded {
            stage: StageKind::Matching,
        });
        assert!(sink.current.borrow().is_none());
    }

    #[test]
    fn restarted_stage_replaces_the_open_one() {
        let sink = UiSink::new(UiMode::Plain, false);
        sink.emit(&PipelineEvent::StageStarted {
            stage: StageKind::Mapping,
        });
        sink.emit(&PipelineEvent::StageStarted {
            stage: StageKind::ModelConversion,
        });
        let current = sink.current.borrow();
        assert_eq!(current.as_ref().map(|l| l.stage), Some(StageKind::ModelConversion));
    }

    #[test]
    fn elapsed_label_scales_units() {
        assert_eq!(elapsed_label(Duration::from_millis(250)), "250ms");
        assert_eq!(elapsed_label(Duration::from_millis(1500)), "1.5s");
        assert_eq!(elapsed_label(Duration::from_secs(125)), "2m05s");
    }
}
