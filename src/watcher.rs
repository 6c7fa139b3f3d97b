// SPDX-License-Identifier: GPL-3.0-only
//! Device watcher
//!
//! Keeps the registry of known devices consistent with two sources: full
//! scans from the enumerator and incremental add/remove records from the
//! monitor. Only net changes reach observers.
//!
//! # Notification ordering
//!
//! Observers receive the registry as it stands at delivery time:
//! - a removal is delivered while the device is still registered
//! - an addition is delivered once the device is registered
//!
//! During a scan every removal is delivered against the old registry, the
//! new registry is installed, then every addition is delivered against it.

use std::io;
use std::os::fd::{AsRawFd, RawFd};
use std::rc::Rc;

use crate::device::{DeviceDescription, DeviceRegistry};
use crate::error::{Result, WatchError};
use crate::hotplug::EventSource;
use crate::platform::{Action, EnumeratorFilter, MonitorFilter, MonitorSocket, Platform};

/// Filtering strategy plugged into a [`DeviceWatcher`]
///
/// The configure hooks push criteria down to the native filters; the
/// visibility check catches whatever those filters cannot express.
pub trait WatchPolicy {
    fn configure_enumerator(&self, _enumerator: &mut dyn EnumeratorFilter) -> io::Result<()> {
        Ok(())
    }

    fn configure_monitor(&self, _monitor: &mut dyn MonitorFilter) -> io::Result<()> {
        Ok(())
    }

    fn is_visible(&self, _device: &DeviceDescription) -> bool {
        true
    }
}

/// Policy that lets every device through
#[derive(Debug, Clone, Copy, Default)]
pub struct AcceptAll;

impl WatchPolicy for AcceptAll {}

/// Net change reported to observers
#[derive(Debug, Clone)]
pub enum DeviceEvent {
    Added(Rc<DeviceDescription>),
    Removed(Rc<DeviceDescription>),
}

impl DeviceEvent {
    pub fn device(&self) -> &Rc<DeviceDescription> {
        match self {
            DeviceEvent::Added(device) | DeviceEvent::Removed(device) => device,
        }
    }
}

/// Receiver of watcher notifications
pub trait DeviceObserver {
    fn on_device_event(&mut self, event: &DeviceEvent, known: &DeviceRegistry);
}

impl<F> DeviceObserver for F
where
    F: FnMut(&DeviceEvent, &DeviceRegistry),
{
    fn on_device_event(&mut self, event: &DeviceEvent, known: &DeviceRegistry) {
        self(event, known)
    }
}

/// Handle returned by [`DeviceWatcher::subscribe`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObserverId(u64);

#[derive(Default)]
struct Observers {
    next_id: u64,
    entries: Vec<(ObserverId, Box<dyn DeviceObserver>)>,
}

impl Observers {
    fn emit(&mut self, event: DeviceEvent, known: &DeviceRegistry) {
        for (_, observer) in &mut self.entries {
            observer.on_device_event(&event, known);
        }
    }
}

/// Watches one class of devices
///
/// Starts inactive. [`set_active`](Self::set_active) arms the monitor and
/// runs the initial scan; the surrounding event loop then calls
/// [`on_monitor_ready`](Self::on_monitor_ready) whenever the descriptor
/// from [`EventSource::readiness_fd`] is readable.
pub struct DeviceWatcher<P: Platform> {
    platform: P,
    policy: Box<dyn WatchPolicy>,
    known: DeviceRegistry,
    monitor: Option<P::Monitor>,
    observers: Observers,
}

impl<P: Platform> DeviceWatcher<P> {
    /// Create an inactive watcher that accepts every device
    pub fn new(platform: P) -> Self {
        Self::with_policy(platform, AcceptAll)
    }

    pub fn with_policy(platform: P, policy: impl WatchPolicy + 'static) -> Self {
        Self {
            platform,
            policy: Box::new(policy),
            known: DeviceRegistry::default(),
            monitor: None,
            observers: Observers::default(),
        }
    }

    /// Register an observer for add/remove notifications
    pub fn subscribe(&mut self, observer: impl DeviceObserver + 'static) -> ObserverId {
        let id = ObserverId(self.observers.next_id);
        self.observers.next_id += 1;
        self.observers.entries.push((id, Box::new(observer)));
        id
    }

    /// Returns `false` if the observer was not registered
    pub fn unsubscribe(&mut self, id: ObserverId) -> bool {
        let len_before = self.observers.entries.len();
        self.observers.entries.retain(|(entry, _)| *entry != id);
        self.observers.entries.len() != len_before
    }

    pub fn is_active(&self) -> bool {
        self.monitor.is_some()
    }

    /// Known devices; stale while the watcher is inactive
    pub fn known(&self) -> &DeviceRegistry {
        &self.known
    }

    pub fn get(&self, syspath: &str) -> Option<&Rc<DeviceDescription>> {
        self.known.get(syspath)
    }

    pub fn platform(&self) -> &P {
        &self.platform
    }

    /// Arm or tear down the monitor
    ///
    /// Activation arms the monitor before scanning so that changes racing
    /// with the scan are queued on the socket. If either step fails the
    /// watcher stays inactive. Deactivation drops the monitor, after which
    /// no notification is delivered; the registry is kept as it was.
    pub fn set_active(&mut self, active: bool) -> Result<()> {
        if active == self.is_active() {
            return Ok(());
        }

        if !active {
            self.monitor = None;
            info!(known = self.known.len(), "Device watcher deactivated");
            return Ok(());
        }

        let mut builder = self.platform.monitor_builder().map_err(WatchError::Monitor)?;
        self.policy
            .configure_monitor(&mut builder)
            .map_err(WatchError::Monitor)?;
        let monitor = self.platform.listen(builder).map_err(WatchError::Monitor)?;

        if let Err(err) = self.scan() {
            error!("Initial device scan failed, staying inactive: {}", err);
            return Err(err);
        }

        info!(
            fd = monitor.as_raw_fd(),
            known = self.known.len(),
            "Device watcher active"
        );
        self.monitor = Some(monitor);
        Ok(())
    }

    /// Reconcile the registry against a full enumeration
    ///
    /// Devices already known are carried forward as the same instance. On
    /// failure nothing is notified and the registry is left unchanged.
    pub fn scan(&mut self) -> Result<()> {
        let mut enumerator = self.platform.enumerator().map_err(WatchError::Enumerate)?;
        self.policy
            .configure_enumerator(&mut enumerator)
            .map_err(WatchError::Enumerate)?;
        let syspaths = self.platform.scan(enumerator).map_err(WatchError::Enumerate)?;

        let mut result = DeviceRegistry::default();
        for syspath in syspaths {
            if result.contains(&syspath) {
                continue;
            }
            if let Some(existing) = self.known.get(&syspath) {
                result.insert(syspath, Rc::clone(existing));
                continue;
            }

            let device = match self.platform.device_from_syspath(&syspath) {
                Ok(device) => device,
                Err(err) => {
                    // Unplugged between enumeration and lookup
                    debug!(%syspath, "Skipping device that vanished during scan: {}", err);
                    continue;
                }
            };
            let description = DeviceDescription::new(device);
            if self.policy.is_visible(&description) {
                result.insert(syspath, Rc::new(description));
            } else {
                trace!(%syspath, "Device rejected by policy");
            }
        }

        let removed: Vec<_> = self
            .known
            .iter()
            .filter(|(syspath, _)| !result.contains(syspath))
            .map(|(_, device)| Rc::clone(device))
            .collect();
        for device in &removed {
            debug!(syspath = %device.sys_path(), "Device removed (scan)");
            self.observers
                .emit(DeviceEvent::Removed(Rc::clone(device)), &self.known);
        }

        let previous = std::mem::replace(&mut self.known, result);

        let added: Vec<_> = self
            .known
            .iter()
            .filter(|(syspath, _)| !previous.contains(syspath))
            .map(|(_, device)| Rc::clone(device))
            .collect();
        for device in &added {
            debug!(syspath = %device.sys_path(), "Device added (scan)");
            self.observers
                .emit(DeviceEvent::Added(Rc::clone(device)), &self.known);
        }

        info!(
            known = self.known.len(),
            added = added.len(),
            removed = removed.len(),
            "Device scan complete"
        );
        Ok(())
    }

    /// Drain one pending monitor record
    ///
    /// Returns `false` when no record was available, which happens on
    /// spurious wakes and while inactive.
    pub fn on_monitor_ready(&mut self) -> bool {
        let Some(monitor) = self.monitor.as_mut() else {
            debug!("Monitor readiness reported while inactive");
            return false;
        };
        let Some(event) = monitor.receive() else {
            debug!("Monitor indicated ready but no event available");
            return false;
        };

        match event.action {
            Action::Add => {
                if self.known.contains(&event.syspath) {
                    debug!(syspath = %event.syspath, "Ignoring add for known device");
                    return true;
                }
                let description = DeviceDescription::new(event.device);
                if !self.policy.is_visible(&description) {
                    trace!(syspath = %event.syspath, "Device rejected by policy");
                    return true;
                }

                let description = Rc::new(description);
                info!(syspath = %event.syspath, "Device added");
                self.known.insert(event.syspath, Rc::clone(&description));
                self.observers
                    .emit(DeviceEvent::Added(description), &self.known);
            }
            Action::Remove => {
                let Some(device) = self.known.get(&event.syspath).cloned() else {
                    debug!(syspath = %event.syspath, "Ignoring remove for unknown device");
                    return true;
                };
                info!(syspath = %event.syspath, "Device removed");
                self.observers.emit(DeviceEvent::Removed(device), &self.known);
                self.known.remove(&event.syspath);
            }
            Action::Other(ref action) => {
                trace!(syspath = %event.syspath, %action, "Ignoring monitor event");
            }
        }
        true
    }
}

impl<P: Platform> EventSource for DeviceWatcher<P> {
    fn readiness_fd(&self) -> Option<RawFd> {
        self.monitor.as_ref().map(AsRawFd::as_raw_fd)
    }

    fn on_ready(&mut self) -> bool {
        self.on_monitor_ready()
    }

    fn refresh(&mut self) -> Result<()> {
        self.scan()
    }
}
