//! Process lifecycle signals.
//!
//! Hosts forward these so stores can flush staged work before the process
//! is suspended or exits.

/// Lifecycle change that forces every open store to save immediately.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LifecycleEvent {
    EnteredBackground,
    WillTerminate,
}

impl LifecycleEvent {
    /// Stable name used in log lines.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::EnteredBackground => "entered_background",
            Self::WillTerminate => "will_terminate",
        }
    }
}
