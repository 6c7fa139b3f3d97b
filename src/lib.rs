// SPDX-License-Identifier: GPL-3.0-only
//! Hotplug device discovery and diffing
//!
//! A [`DeviceWatcher`] keeps a live view of one class of devices by
//! reconciling full udev enumerations with the add/remove stream of a udev
//! monitor, and reports only net changes to its observers. Filtering is
//! supplied by a [`WatchPolicy`]; [`FilterPolicy`] covers the usual
//! subsystem/devtype/attribute/property/tag criteria.
//!
//! The watcher is single-threaded and loop-agnostic: any reactor can poll
//! [`EventSource::readiness_fd`] and call back into it. [`run_until`] is a
//! ready-made driver for a current-thread tokio runtime.

#[macro_use]
extern crate tracing;

pub mod config;
pub mod device;
pub mod error;
pub mod filter;
pub mod hotplug;
pub mod platform;
pub mod watcher;

#[cfg(test)]
mod testing;

pub use config::Config;
pub use device::{DeviceDescription, DeviceRegistry};
pub use error::{Result, WatchError};
pub use filter::{FilterPolicy, FilteredDeviceWatcher, MatchCriteria};
pub use hotplug::{EventSource, UdevPlatform, run_until};
pub use watcher::{AcceptAll, DeviceEvent, DeviceObserver, DeviceWatcher, ObserverId, WatchPolicy};
