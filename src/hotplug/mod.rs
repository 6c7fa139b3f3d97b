/// Device hotplug detection using udev
///
/// This module provides the udev-backed platform used in production and
/// the event-loop driver that wakes a watcher whenever its monitor socket
/// becomes readable.

mod subscription;
mod udev_monitor;

pub use subscription::{EventSource, run_until};
pub use udev_monitor::{UdevDevice, UdevEnumerator, UdevMonitor, UdevMonitorFilter, UdevPlatform};
