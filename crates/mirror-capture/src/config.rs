//! Capture configuration

/// Capture engine options
#[derive(Debug, Clone)]
pub struct CaptureConfig {
    /// Scheduler budget (ms) before a task should yield
    pub long_task_ms: u64,

    /// Wrap `insertRule` / `deleteRule`
    pub intercept_rules: bool,

    /// Wrap `replace` / `replaceSync`
    pub intercept_replace: bool,

    /// Diff adopted style-sheet lists
    pub track_adopted_styles: bool,

    /// Listen for same-origin frame navigations
    pub monitor_frames: bool,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            long_task_ms: 30,
            intercept_rules: true,
            intercept_replace: true,
            track_adopted_styles: true,
            monitor_frames: true,
        }
    }
}
