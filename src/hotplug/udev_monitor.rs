use std::ffi::OsStr;
use std::fmt;
use std::io;
use std::os::fd::{AsRawFd, RawFd};
use std::rc::Rc;

use crate::platform::{
    Action, EnumeratorFilter, MonitorEvent, MonitorFilter, MonitorSocket, NativeDevice, Platform,
};

fn lossy(value: &OsStr) -> String {
    value.to_string_lossy().into_owned()
}

/// Monotonic clock in microseconds, the base of `USEC_INITIALIZED`
fn monotonic_usec() -> u64 {
    let mut now = libc::timespec {
        tv_sec: 0,
        tv_nsec: 0,
    };
    let result = unsafe { libc::clock_gettime(libc::CLOCK_MONOTONIC, &mut now) };
    if result != 0 {
        return 0;
    }
    now.tv_sec as u64 * 1_000_000 + now.tv_nsec as u64 / 1_000
}

/// Udev device handle
pub struct UdevDevice(udev::Device);

impl UdevDevice {
    fn shared(device: udev::Device) -> Rc<dyn NativeDevice> {
        Rc::new(UdevDevice(device))
    }

    pub fn inner(&self) -> &udev::Device {
        &self.0
    }
}

impl fmt::Debug for UdevDevice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "UdevDevice({})", self.0.syspath().display())
    }
}

impl NativeDevice for UdevDevice {
    fn syspath(&self) -> String {
        lossy(self.0.syspath().as_os_str())
    }

    fn sysname(&self) -> Option<String> {
        Some(lossy(self.0.sysname()))
    }

    fn sysnum(&self) -> Option<String> {
        self.0.sysnum().map(|num| num.to_string())
    }

    fn devpath(&self) -> Option<String> {
        Some(lossy(self.0.devpath()))
    }

    fn devnode(&self) -> Option<String> {
        self.0.devnode().map(|node| lossy(node.as_os_str()))
    }

    fn subsystem(&self) -> Option<String> {
        self.0.subsystem().map(lossy)
    }

    fn devtype(&self) -> Option<String> {
        self.0.devtype().map(lossy)
    }

    fn driver(&self) -> Option<String> {
        self.0.driver().map(lossy)
    }

    fn is_initialized(&self) -> bool {
        self.0.is_initialized()
    }

    fn usec_since_initialized(&self) -> u64 {
        if !self.0.is_initialized() {
            return 0;
        }
        self.0
            .property_value("USEC_INITIALIZED")
            .and_then(|value| value.to_str())
            .and_then(|value| value.parse::<u64>().ok())
            .map(|initialized| monotonic_usec().saturating_sub(initialized))
            .unwrap_or(0)
    }

    fn properties(&self) -> Vec<(String, String)> {
        self.0
            .properties()
            .map(|entry| (lossy(entry.name()), lossy(entry.value())))
            .collect()
    }

    fn tags(&self) -> Vec<String> {
        self.0
            .property_value("TAGS")
            .map(|tags| {
                tags.to_string_lossy()
                    .split(':')
                    .filter(|tag| !tag.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default()
    }

    fn attributes(&self) -> Vec<(String, Option<String>)> {
        self.0
            .attributes()
            .map(|entry| {
                let name = entry.name();
                (lossy(name), self.0.attribute_value(name).map(lossy))
            })
            .collect()
    }

    fn parent(&self) -> Option<Rc<dyn NativeDevice>> {
        self.0.parent().map(UdevDevice::shared)
    }

    fn parent_with_type(
        &self,
        subsystem: Option<&str>,
        devtype: Option<&str>,
    ) -> Option<Rc<dyn NativeDevice>> {
        let found = match (subsystem, devtype) {
            (Some(subsystem), Some(devtype)) => self
                .0
                .parent_with_subsystem_devtype(subsystem, devtype)
                .ok()
                .flatten(),
            (Some(subsystem), None) => self.0.parent_with_subsystem(subsystem).ok().flatten(),
            // libudev needs a subsystem, walk the chain ourselves
            (None, devtype) => {
                let mut current = self.0.parent();
                while let Some(device) = current.as_ref() {
                    if devtype.is_none_or(|wanted| device.devtype() == Some(OsStr::new(wanted))) {
                        break;
                    }
                    current = device.parent();
                }
                current
            }
        };
        found.map(UdevDevice::shared)
    }
}

/// Udev enumerator with native matches applied
pub struct UdevEnumerator(udev::Enumerator);

impl EnumeratorFilter for UdevEnumerator {
    fn match_subsystem(&mut self, subsystem: &str) -> io::Result<()> {
        self.0.match_subsystem(subsystem)
    }

    fn match_attribute(&mut self, name: &str, value: &str) -> io::Result<()> {
        self.0.match_attribute(name, value)
    }

    fn match_property(&mut self, key: &str, value: &str) -> io::Result<()> {
        self.0.match_property(key, value)
    }

    fn match_tag(&mut self, tag: &str) -> io::Result<()> {
        self.0.match_tag(tag)
    }
}

/// Monitor under construction
///
/// `udev::MonitorBuilder` consumes itself on every match, so it is kept in
/// an option and put back after each call.
pub struct UdevMonitorFilter {
    builder: Option<udev::MonitorBuilder>,
}

impl UdevMonitorFilter {
    fn update<F>(&mut self, apply: F) -> io::Result<()>
    where
        F: FnOnce(udev::MonitorBuilder) -> io::Result<udev::MonitorBuilder>,
    {
        let builder = self.builder.take().ok_or_else(|| {
            io::Error::new(io::ErrorKind::InvalidInput, "monitor builder already failed")
        })?;
        self.builder = Some(apply(builder)?);
        Ok(())
    }
}

impl MonitorFilter for UdevMonitorFilter {
    fn match_subsystem_devtype(&mut self, subsystem: &str, devtype: Option<&str>) -> io::Result<()> {
        self.update(|builder| match devtype {
            Some(devtype) => builder.match_subsystem_devtype(subsystem, devtype),
            None => builder.match_subsystem(subsystem),
        })
    }

    fn match_tag(&mut self, tag: &str) -> io::Result<()> {
        self.update(|builder| builder.match_tag(tag))
    }
}

/// Armed udev monitor
///
/// The netlink socket is non-blocking: [`MonitorSocket::receive`] returns
/// `None` when the kernel had nothing queued.
pub struct UdevMonitor {
    socket: udev::MonitorSocket,
}

impl AsRawFd for UdevMonitor {
    fn as_raw_fd(&self) -> RawFd {
        self.socket.as_raw_fd()
    }
}

impl MonitorSocket for UdevMonitor {
    fn receive(&mut self) -> Option<MonitorEvent> {
        let event = self.socket.iter().next()?;

        debug!(
            "udev event: type={:?}, subsystem={:?}, devtype={:?}, syspath={:?}",
            event.event_type(),
            event.subsystem(),
            event.devtype(),
            event.syspath()
        );

        let action = match event.event_type() {
            udev::EventType::Add => Action::Add,
            udev::EventType::Remove => Action::Remove,
            other => Action::Other(format!("{other:?}").to_lowercase()),
        };
        let device = event.device();
        Some(MonitorEvent {
            action,
            syspath: lossy(device.syspath().as_os_str()),
            device: UdevDevice::shared(device),
        })
    }
}

/// Production platform backed by libudev
#[derive(Debug, Clone, Copy, Default)]
pub struct UdevPlatform;

impl Platform for UdevPlatform {
    type Enumerator = UdevEnumerator;
    type MonitorBuilder = UdevMonitorFilter;
    type Monitor = UdevMonitor;

    fn enumerator(&self) -> io::Result<UdevEnumerator> {
        Ok(UdevEnumerator(udev::Enumerator::new()?))
    }

    fn scan(&self, mut enumerator: UdevEnumerator) -> io::Result<Vec<String>> {
        let devices = enumerator.0.scan_devices()?;
        Ok(devices
            .map(|device| lossy(device.syspath().as_os_str()))
            .collect())
    }

    fn device_from_syspath(&self, syspath: &str) -> io::Result<Rc<dyn NativeDevice>> {
        udev::Device::from_syspath(std::path::Path::new(syspath)).map(UdevDevice::shared)
    }

    fn monitor_builder(&self) -> io::Result<UdevMonitorFilter> {
        Ok(UdevMonitorFilter {
            builder: Some(udev::MonitorBuilder::new()?),
        })
    }

    fn listen(&self, mut filter: UdevMonitorFilter) -> io::Result<UdevMonitor> {
        let builder = filter.builder.take().ok_or_else(|| {
            io::Error::new(io::ErrorKind::InvalidInput, "monitor builder already failed")
        })?;
        let socket = builder.listen()?;
        info!("Device hotplug monitoring started");
        Ok(UdevMonitor { socket })
    }
}
