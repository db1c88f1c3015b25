//! Progress reporting using indicatif.
//!
//! [`ProgressCallback`] is the seam between long-running phases and the
//! terminal; [`Progress`] renders one bar per phase. Bars are hidden with
//! `--quiet` and when the report is JSON.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};

use bytesize::ByteSize;
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};

/// Progress events from a long-running phase.
pub trait ProgressCallback: Send + Sync {
    /// A phase with `total` items is starting.
    fn on_phase_start(&self, phase: &str, total: usize);

    /// Item number `current` (1-based) at `path` is being processed.
    fn on_progress(&self, current: usize, path: &str);

    /// An item finished after reading `bytes`.
    fn on_item_completed(&self, _bytes: u64) {}

    /// The phase finished.
    fn on_phase_end(&self, phase: &str);
}

/// Terminal progress bars.
pub struct Progress {
    multi: MultiProgress,
    bars: Mutex<HashMap<String, ProgressBar>>,
    active: Mutex<Option<String>>,
    bytes: AtomicU64,
    hidden: bool,
}

impl Progress {
    /// Create a reporter; `hidden` suppresses all drawing.
    ///
    /// ```
    /// use trackdedup::progress::Progress;
    ///
    /// let progress = Progress::new(true);
    /// ```
    #[must_use]
    pub fn new(hidden: bool) -> Self {
        Self {
            multi: MultiProgress::new(),
            bars: Mutex::new(HashMap::new()),
            active: Mutex::new(None),
            bytes: AtomicU64::new(0),
            hidden,
        }
    }

    /// Bytes reported through [`ProgressCallback::on_item_completed`].
    #[must_use]
    pub fn bytes_processed(&self) -> u64 {
        self.bytes.load(Ordering::Relaxed)
    }

    fn style() -> ProgressStyle {
        ProgressStyle::with_template(
            "[{elapsed_precise}] {prefix:>11} [{bar:40.cyan/blue}] {pos}/{len} {msg} (ETA: {eta})",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█>-")
    }

    fn with_active<F: FnOnce(&ProgressBar)>(&self, f: F) {
        let active = self.active.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(name) = active.as_ref() {
            let bars = self.bars.lock().unwrap_or_else(PoisonError::into_inner);
            if let Some(pb) = bars.get(name) {
                f(pb);
            }
        }
    }
}

impl ProgressCallback for Progress {
    fn on_phase_start(&self, phase: &str, total: usize) {
        if self.hidden {
            return;
        }
        let pb = self.multi.add(ProgressBar::new(total as u64));
        pb.set_style(Self::style());
        pb.set_prefix(phase.to_string());
        self.bars
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(phase.to_string(), pb);
        *self.active.lock().unwrap_or_else(PoisonError::into_inner) = Some(phase.to_string());
    }

    fn on_progress(&self, current: usize, path: &str) {
        if self.hidden {
            return;
        }
        self.with_active(|pb| {
            pb.set_position(current as u64);
            pb.set_message(truncate_path(path, 30));
        });
    }

    fn on_item_completed(&self, bytes: u64) {
        self.bytes.fetch_add(bytes, Ordering::Relaxed);
    }

    fn on_phase_end(&self, phase: &str) {
        if self.hidden {
            return;
        }
        let pb = self
            .bars
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(phase);
        if let Some(pb) = pb {
            let bytes = self.bytes_processed();
            if bytes > 0 {
                pb.finish_with_message(format!("done, {} hashed", ByteSize::b(bytes)));
            } else {
                pb.finish_with_message("done");
            }
        }
        let mut active = self.active.lock().unwrap_or_else(PoisonError::into_inner);
        if active.as_deref() == Some(phase) {
            *active = None;
        }
    }
}

/// Shorten a path to its file name when it is too long to display.
fn truncate_path(path: &str, max_len: usize) -> String {
    if path.chars().count() <= max_len {
        return path.to_string();
    }
    let file_name = std::path::Path::new(path)
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();

    let count = file_name.chars().count();
    if count + 4 > max_len {
        let tail: String = file_name.chars().skip(count + 3 - max_len).collect();
        return format!("...{}", tail);
    }
    format!(".../{}", file_name)
}
