//! Integer-percent progress reporting
//!
//! Operations accept an optional callback invoked synchronously at each
//! whole-percent transition and once with 100 at completion. The callback
//! may not retain references beyond its own return.

/// Progress callback capability
pub type ProgressFn<'a> = &'a mut dyn FnMut(u32);

/// Tracks completed work against a known total and fires the callback on
/// percent transitions
pub struct Progress<'a> {
    callback: Option<ProgressFn<'a>>,
    total: u64,
    done: u64,
    last_percent: Option<u32>,
}

impl<'a> Progress<'a> {
    /// Create a tracker over `total` units of work
    pub fn new(callback: Option<ProgressFn<'a>>, total: u64) -> Self {
        Progress {
            callback,
            total,
            done: 0,
            last_percent: None,
        }
    }

    /// Record `amount` completed units
    pub fn advance(&mut self, amount: u64) {
        self.done = self.done.saturating_add(amount).min(self.total);

        if self.total == 0 {
            return;
        }

        let percent = ((self.done as f64 / self.total as f64) * 100.0) as u32;
        let percent = percent.min(100);

        if self.last_percent != Some(percent) {
            self.last_percent = Some(percent);
            if let Some(callback) = self.callback.as_mut() {
                callback(percent);
            }
        }
    }

    /// Report completion; always fires the callback with 100
    pub fn finish(&mut self) {
        if self.last_percent != Some(100) {
            self.last_percent = Some(100);
            if let Some(callback) = self.callback.as_mut() {
                callback(100);
            }
        }
    }
}
