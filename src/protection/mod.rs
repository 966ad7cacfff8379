//! Client protection: signal recognition and strike escalation.

pub mod monitor;
pub mod signals;

pub use monitor::{
    ContentShield, ProtectionMonitor, ReportAck, Signal, StrikeState, ViolationReport,
    ViolationReporter, LOGIN_REDIRECT,
};
pub use signals::{classify_key, devtools_suspected, KeyEvent, VisibilityTracker, WindowMetrics};
