//! Progress tracking for a mirroring run.

use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};

use indicatif::{ProgressBar, ProgressStyle};

/// Callback type for progress updates.
pub type ProgressCallback = Box<dyn Fn(&ProgressUpdate) + Send + Sync>;

/// Snapshot handed to the callback on every change.
#[derive(Debug, Clone)]
pub struct ProgressUpdate {
    pub phase: MigrationPhase,

    /// Group, project or repository just handled.
    pub current_item: Option<String>,

    pub completed: u64,

    /// Zero while the total is unknown (e.g. during the scan).
    pub total: u64,
}

/// Phases of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MigrationPhase {
    /// Checking both instances accept the session.
    Verifying = 0,
    /// Crawling the Server hierarchy.
    Scanning = 1,
    /// Creating groups and replaying memberships on Cloud.
    MirroringGroups = 2,
    /// Applying per-repository group privileges on Cloud.
    MirroringRepositories = 3,
    /// Run complete.
    Complete = 4,
}

impl MigrationPhase {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Verifying,
            1 => Self::Scanning,
            2 => Self::MirroringGroups,
            3 => Self::MirroringRepositories,
            _ => Self::Complete,
        }
    }
}

impl std::fmt::Display for MigrationPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Verifying => write!(f, "Verifying instances"),
            Self::Scanning => write!(f, "Scanning Bitbucket Server"),
            Self::MirroringGroups => write!(f, "Mirroring groups"),
            Self::MirroringRepositories => write!(f, "Mirroring repository permissions"),
            Self::Complete => write!(f, "Complete"),
        }
    }
}

/// Progress tracker shared by the scanner and the orchestrator.
#[derive(Default)]
pub struct MigrationProgress {
    phase: AtomicU8,
    completed: AtomicU64,
    total: AtomicU64,
    callback: Option<ProgressCallback>,
}

impl MigrationProgress {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a tracker that forwards every update to `callback`.
    pub fn with_callback(callback: ProgressCallback) -> Self {
        Self {
            callback: Some(callback),
            ..Self::default()
        }
    }

    /// Enter `phase`, resetting the counters.
    pub fn set_phase(&self, phase: MigrationPhase, total: u64) {
        self.phase.store(phase as u8, Ordering::SeqCst);
        self.completed.store(0, Ordering::SeqCst);
        self.total.store(total, Ordering::SeqCst);
        self.notify(None);
    }

    /// One more item done.
    pub fn increment(&self, item: Option<&str>) {
        self.completed.fetch_add(1, Ordering::SeqCst);
        self.notify(item.map(str::to_string));
    }

    pub fn current_phase(&self) -> MigrationPhase {
        MigrationPhase::from_u8(self.phase.load(Ordering::SeqCst))
    }

    fn notify(&self, current_item: Option<String>) {
        if let Some(callback) = &self.callback {
            callback(&ProgressUpdate {
                phase: self.current_phase(),
                current_item,
                completed: self.completed.load(Ordering::SeqCst),
                total: self.total.load(Ordering::SeqCst),
            });
        }
    }
}

/// Terminal progress bar driven by [`MigrationProgress`] updates.
///
/// Shows a spinner while the total is unknown and a bar otherwise.
pub struct ConsoleProgressReporter {
    bar: ProgressBar,
}

impl ConsoleProgressReporter {
    pub fn new() -> Self {
        let bar = ProgressBar::new_spinner();
        bar.enable_steady_tick(std::time::Duration::from_millis(120));
        Self { bar }
    }

    fn bar_style() -> ProgressStyle {
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("#>-")
    }

    fn spinner_style() -> ProgressStyle {
        ProgressStyle::default_spinner()
            .template("{spinner:.green} [{elapsed_precise}] {pos} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
    }

    /// Callback to hand to [`MigrationProgress::with_callback`].
    pub fn callback(&self) -> ProgressCallback {
        let bar = self.bar.clone();
        Box::new(move |update: &ProgressUpdate| {
            if update.total == 0 {
                bar.set_style(Self::spinner_style());
            } else {
                bar.set_style(Self::bar_style());
                bar.set_length(update.total);
            }
            bar.set_position(update.completed);

            match &update.current_item {
                Some(item) => bar.set_message(format!("{}: {item}", update.phase)),
                None => bar.set_message(update.phase.to_string()),
            }
        })
    }

    /// Clear the bar, e.g. before printing a report.
    pub fn clear(&self) {
        self.bar.finish_and_clear();
    }
}

impl Default for ConsoleProgressReporter {
    fn default() -> Self {
        Self::new()
    }
}
