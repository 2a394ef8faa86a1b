//! Progress reporting for the scrape and playlist phases.
//!
//! Each phase gets an indicatif bar counting its own unit (chart weeks,
//! playlist tracks, chart songs). With `--log-only` the bars stay hidden and
//! the phase logs a progress line every so many units instead, which reads
//! better under `tail -f`.

use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

static LOG_ONLY: AtomicBool = AtomicBool::new(false);

pub fn set_log_only(value: bool) {
    LOG_ONLY.store(value, Ordering::Relaxed);
}

pub fn is_log_only() -> bool {
    LOG_ONLY.load(Ordering::Relaxed)
}

/// Run time as "42.0s", "3.5m" or "1.2h".
pub fn format_duration(d: Duration) -> String {
    let secs = d.as_secs_f64();
    if secs < 60.0 {
        format!("{:.1}s", secs)
    } else if secs < 3600.0 {
        format!("{:.1}m", secs / 60.0)
    } else {
        format!("{:.1}h", secs / 3600.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    ScrapingCharts,
    ReadingPlaylist,
    SearchingCatalog,
}

impl Phase {
    pub fn label(self) -> &'static str {
        match self {
            Phase::ScrapingCharts => "Scraping charts",
            Phase::ReadingPlaylist => "Reading playlist",
            Phase::SearchingCatalog => "Searching catalog",
        }
    }

    fn unit(self) -> &'static str {
        match self {
            Phase::ScrapingCharts => "weeks",
            Phase::ReadingPlaylist => "tracks",
            Phase::SearchingCatalog => "songs",
        }
    }

    /// Units between two progress lines in log-only mode
    fn log_every(self) -> u64 {
        match self {
            Phase::ScrapingCharts => 50,
            Phase::ReadingPlaylist => 500,
            Phase::SearchingCatalog => 100,
        }
    }

    fn bar_color(self) -> &'static str {
        match self {
            Phase::ScrapingCharts => "yellow",
            Phase::ReadingPlaylist => "cyan",
            Phase::SearchingCatalog => "green",
        }
    }
}

/// Progress of one phase. Safe to advance from worker threads.
pub struct PhaseProgress {
    phase: Phase,
    bar: ProgressBar,
    total: u64,
    done: AtomicU64,
}

impl PhaseProgress {
    pub fn start(phase: Phase, total: u64) -> Self {
        let bar = ProgressBar::new(total);
        if is_log_only() {
            bar.set_draw_target(ProgressDrawTarget::hidden());
            log::info!("[{}] {} {} to go", phase.label(), total, phase.unit());
        } else {
            let template = format!(
                "{{msg}} [{{elapsed_precise}}] [{{bar:40.{}/blue}}] \
                 {{pos}}/{{len}} {} ({{per_sec}}, ETA: {{eta}})",
                phase.bar_color(),
                phase.unit()
            );
            bar.set_style(
                ProgressStyle::default_bar()
                    .template(&template)
                    .unwrap()
                    .progress_chars("=> "),
            );
        }
        bar.set_message(phase.label());
        Self {
            phase,
            bar,
            total,
            done: AtomicU64::new(0),
        }
    }

    pub fn advance(&self) {
        let done = self.done.fetch_add(1, Ordering::Relaxed) + 1;
        self.bar.inc(1);
        if is_log_only() && should_log(done, self.total, self.phase.log_every()) {
            let pct = 100.0 * done as f64 / self.total as f64;
            log::info!(
                "[{}] {}/{} {} ({:.1}%)",
                self.phase.label(),
                done,
                self.total,
                self.phase.unit(),
                pct
            );
        }
    }

    pub fn done(&self) -> u64 {
        self.done.load(Ordering::Relaxed)
    }

    pub fn finish(&self, summary: String) {
        if is_log_only() {
            log::info!("[{}] {}", self.phase.label(), summary);
        }
        self.bar.finish_with_message(summary);
    }
}

fn should_log(done: u64, total: u64, every: u64) -> bool {
    total > 0 && (done % every.max(1) == 0 || done == total)
}
