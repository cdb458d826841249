use std::process::ExitCode;
use std::time::Duration;

use console::style;
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};

use blogdesk_common::{
    ActivityLogRecord, ActivityStatus, BatchEvent, BatchEventKind, PipelineEvent, PipelineStep,
};
use blogdesk_stream::{
    BatchProgress, PipelineProgress, PipelineStepState, Reconciliation, StageStatus,
    StreamError, StreamOutcome, Verdict,
};

const TICK: Duration = Duration::from_millis(100);
const RECORDS_SHOWN: usize = 5;

fn spinner_style() -> ProgressStyle {
    ProgressStyle::default_spinner()
        .template("{spinner:.cyan} {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_spinner())
}

fn line_style() -> ProgressStyle {
    ProgressStyle::default_spinner()
        .template("{msg}")
        .unwrap_or_else(|_| ProgressStyle::default_spinner())
}

fn bar_style() -> ProgressStyle {
    ProgressStyle::default_bar()
        .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("#>-")
}

fn status_icon(status: StageStatus) -> &'static str {
    match status {
        StageStatus::Pending => "·",
        StageStatus::Running => "…",
        StageStatus::Completed => "✓",
        StageStatus::Error => "✗",
    }
}

fn stage_line(state: &PipelineStepState) -> String {
    let icon = status_icon(state.status);
    let icon = match state.status {
        StageStatus::Pending => style(icon).dim(),
        StageStatus::Running => style(icon).cyan(),
        StageStatus::Completed => style(icon).green(),
        StageStatus::Error => style(icon).red(),
    };
    match &state.message {
        Some(message) if !message.is_empty() => format!("{icon} {}: {message}", state.label),
        _ => format!("{icon} {}", state.label),
    }
}

/// One line per declared stage, redrawn from the reducer after every event.
pub struct PipelineView {
    progress: PipelineProgress,
    bars: Vec<(PipelineStep, ProgressBar)>,
    _multi: MultiProgress,
}

impl PipelineView {
    pub fn new() -> Self {
        let multi = MultiProgress::new();
        let progress = PipelineProgress::new();
        let bars = progress
            .steps()
            .iter()
            .map(|state| {
                let bar = multi.add(ProgressBar::new_spinner());
                bar.set_style(line_style());
                bar.set_message(stage_line(state));
                (state.step, bar)
            })
            .collect();

        Self {
            progress,
            bars,
            _multi: multi,
        }
    }

    pub fn apply(&mut self, event: &PipelineEvent) {
        self.progress.apply(event);

        for state in self.progress.steps() {
            let Some((_, bar)) = self.bars.iter().find(|(step, _)| *step == state.step) else {
                continue;
            };
            if bar.is_finished() {
                continue;
            }
            match state.status {
                StageStatus::Pending => {}
                StageStatus::Running => {
                    bar.set_style(spinner_style());
                    bar.enable_steady_tick(TICK);
                    bar.set_message(format!("{}: {}", state.label, state.message.as_deref().unwrap_or("")));
                }
                StageStatus::Completed | StageStatus::Error => {
                    bar.set_style(line_style());
                    bar.finish_with_message(stage_line(state));
                }
            }
        }
    }

    /// Freezes every line. Stages never reported stay pending.
    pub fn finish(&self) {
        for (step, bar) in &self.bars {
            if bar.is_finished() {
                continue;
            }
            bar.set_style(line_style());
            match self.progress.step(*step) {
                Some(state) => bar.abandon_with_message(stage_line(state)),
                None => bar.abandon(),
            }
        }

        if let Some(finish) = self.progress.finish() {
            let icon = if finish.is_failure() {
                style("✗").red()
            } else {
                style("✓").green()
            };
            println!("{icon} {}", finish.message());
        }
    }
}

/// Progress bar for a pending-source evaluation run.
pub struct BatchView {
    progress: BatchProgress,
    bar: ProgressBar,
    reported_failures: usize,
}

impl BatchView {
    pub fn new() -> Self {
        let bar = ProgressBar::new_spinner();
        bar.set_style(spinner_style());
        bar.enable_steady_tick(TICK);
        bar.set_message("Waiting for the evaluation run...");

        Self {
            progress: BatchProgress::new(),
            bar,
            reported_failures: 0,
        }
    }

    pub fn apply(&mut self, event: &BatchEvent) {
        self.progress.apply(event);

        if let Some(total) = self.progress.total {
            if self.bar.length() != Some(total) {
                self.bar.set_style(bar_style());
                self.bar.set_length(total);
            }
        }
        self.bar.set_position(self.progress.current);

        if let Some(message) = &self.progress.last_message {
            if event.kind == BatchEventKind::Evaluated {
                self.bar.println(format!("{} {message}", style("✓").green()));
            }
            self.bar.set_message(message.clone());
        }

        for failure in &self.progress.failures[self.reported_failures..] {
            let name = failure.source_title.as_deref().unwrap_or(&failure.source_id);
            self.bar
                .println(format!("{} {name}: {}", style("✗").red(), failure.error));
        }
        self.reported_failures = self.progress.failures.len();
    }

    pub fn finish(&self) {
        self.bar.finish_and_clear();

        match self.progress.finish() {
            Some(finish) if finish.is_failure() => {
                println!("{} {}", style("✗").red(), finish.message());
            }
            Some(finish) => println!("{} {}", style("✓").green(), finish.message()),
            None => {}
        }
        println!(
            "{} evaluated, {} selected, {} failed",
            self.progress.evaluated,
            self.progress.selected,
            self.progress.failures.len()
        );
    }
}

pub fn print_reconciliation<E>(reconciliation: &Reconciliation<E>) {
    println!();
    match &reconciliation.outcome {
        StreamOutcome::Cancelled => println!(
            "{} Detached. The run keeps going on the server.",
            style("↳").yellow()
        ),
        StreamOutcome::Unterminated => println!(
            "{} Stream closed without a final event",
            style("!").yellow()
        ),
        StreamOutcome::Finished(_) | StreamOutcome::Failed(_) => {}
    }

    let verdict = match reconciliation.verdict {
        Verdict::Succeeded => style(Verdict::Succeeded.as_str()).green(),
        Verdict::Failed => style(Verdict::Failed.as_str()).red(),
        Verdict::StillRunning => style(Verdict::StillRunning.as_str()).yellow(),
        Verdict::Unknown => style(Verdict::Unknown.as_str()).dim(),
    };
    println!("Verdict: {verdict}");

    let shown = reconciliation.records.len().min(RECORDS_SHOWN);
    if shown > 0 {
        println!("{}", style("Latest activity:").dim());
        print_records(&reconciliation.records[..shown]);
    }
}

pub fn print_records(records: &[ActivityLogRecord]) {
    for record in records {
        let status = format!("{:<8}", record.status.as_str());
        let status = match record.status {
            ActivityStatus::Success => style(status).green(),
            ActivityStatus::Error => style(status).red(),
            ActivityStatus::Running => style(status).yellow(),
        };
        println!(
            "{}  {:<9} {status} {}",
            style(record.created_at.format("%Y-%m-%d %H:%M:%S")).dim(),
            record.activity_type.as_str(),
            record.message
        );
    }
}

/// Cancelled runs never count as failures, whatever the log says.
fn run_failed<E>(reconciliation: &Reconciliation<E>) -> bool {
    !reconciliation.outcome.is_cancelled() && reconciliation.verdict == Verdict::Failed
}

pub fn exit_status<E>(reconciliation: &Reconciliation<E>) -> ExitCode {
    if run_failed(reconciliation) {
        ExitCode::from(1)
    } else {
        ExitCode::SUCCESS
    }
}

fn error_is_failure(error: &StreamError) -> bool {
    !error.is_cancelled()
}

/// Prints a request or stream error and picks the exit code for it.
pub fn report_error(error: &StreamError) -> ExitCode {
    if error.is_cancelled() {
        println!("{} Detached before the stream opened", style("↳").yellow());
    } else if error.is_unauthorized() {
        eprintln!(
            "{} Authentication required. Check ADMIN_API_KEY on the proxy.",
            style("✗").red().bold()
        );
    } else {
        eprintln!("{} {error}", style("✗").red().bold());
    }

    if error_is_failure(error) {
        ExitCode::from(1)
    } else {
        ExitCode::SUCCESS
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use blogdesk_common::StepStatus;

    fn reconciliation(
        outcome: StreamOutcome<PipelineEvent>,
        verdict: Verdict,
    ) -> Reconciliation<PipelineEvent> {
        Reconciliation {
            outcome,
            verdict,
            records: Vec::new(),
        }
    }

    #[test]
    fn in_band_failure_fails_the_command() {
        let failed = reconciliation(
            StreamOutcome::Failed(PipelineEvent::error("Pipeline already running")),
            Verdict::Failed,
        );
        assert!(run_failed(&failed));

        let finished = reconciliation(
            StreamOutcome::Finished(PipelineEvent::done("Pipeline finished")),
            Verdict::Succeeded,
        );
        assert!(!run_failed(&finished));
    }

    #[test]
    fn unterminated_run_follows_the_log() {
        assert!(run_failed(&reconciliation(StreamOutcome::Unterminated, Verdict::Failed)));
        assert!(!run_failed(&reconciliation(
            StreamOutcome::Unterminated,
            Verdict::StillRunning
        )));
        assert!(!run_failed(&reconciliation(StreamOutcome::Unterminated, Verdict::Unknown)));
    }

    #[test]
    fn cancelled_run_is_not_a_failure() {
        assert!(!run_failed(&reconciliation(StreamOutcome::Cancelled, Verdict::Failed)));
        assert!(!error_is_failure(&StreamError::Cancelled));
    }

    #[test]
    fn request_errors_are_failures() {
        assert!(error_is_failure(&StreamError::Unauthorized { status: 401 }));
        assert!(error_is_failure(&StreamError::Transport("connection refused".into())));
        assert!(error_is_failure(&StreamError::Status {
            status: 500,
            body: "boom".into()
        }));
    }

    #[test]
    fn stage_lines_carry_label_and_message() {
        console::set_colors_enabled(false);

        let mut state = PipelineStepState::pending(PipelineStep::Scrape);
        assert_eq!(stage_line(&state), "· Scrape sources");

        state.status = StageStatus::from(StepStatus::Completed);
        state.message = Some("Scraped 12 sources".into());
        assert_eq!(stage_line(&state), "✓ Scrape sources: Scraped 12 sources");

        state.status = StageStatus::Error;
        state.message = Some("Scrape failed: timeout".into());
        assert_eq!(stage_line(&state), "✗ Scrape sources: Scrape failed: timeout");
    }
}
