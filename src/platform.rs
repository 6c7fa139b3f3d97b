// SPDX-License-Identifier: GPL-3.0-only
//! Native device boundary
//!
//! The watcher never talks to udev directly. It goes through these traits,
//! which [`crate::hotplug::UdevPlatform`] implements for the real system.
//! Enumeration and monitoring expose different filter surfaces on purpose:
//! libudev can match sysattrs and properties while scanning but only
//! subsystem/devtype and tags on the netlink monitor.

use std::fmt;
use std::io;
use std::os::fd::AsRawFd;
use std::rc::Rc;

/// One native device record
///
/// Handles are shared as `Rc<dyn NativeDevice>`. Cloning the `Rc` is the
/// counted reference descriptions keep for parent lookups. String getters
/// return `None` where the platform reports no value.
pub trait NativeDevice: fmt::Debug {
    fn syspath(&self) -> String;
    fn sysname(&self) -> Option<String>;
    fn sysnum(&self) -> Option<String>;
    fn devpath(&self) -> Option<String>;
    fn devnode(&self) -> Option<String>;
    fn subsystem(&self) -> Option<String>;
    fn devtype(&self) -> Option<String>;
    fn driver(&self) -> Option<String>;
    fn is_initialized(&self) -> bool;
    fn usec_since_initialized(&self) -> u64;

    /// Environment properties as (key, value) pairs
    fn properties(&self) -> Vec<(String, String)>;

    fn tags(&self) -> Vec<String>;

    /// Sysfs attributes, `None` when the value cannot be read
    fn attributes(&self) -> Vec<(String, Option<String>)>;

    fn parent(&self) -> Option<Rc<dyn NativeDevice>>;

    /// Closest ancestor matching both filters, `None` meaning any
    fn parent_with_type(
        &self,
        subsystem: Option<&str>,
        devtype: Option<&str>,
    ) -> Option<Rc<dyn NativeDevice>>;
}

/// Match surface available while enumerating
pub trait EnumeratorFilter {
    fn match_subsystem(&mut self, subsystem: &str) -> io::Result<()>;
    fn match_attribute(&mut self, name: &str, value: &str) -> io::Result<()>;
    fn match_property(&mut self, key: &str, value: &str) -> io::Result<()>;
    fn match_tag(&mut self, tag: &str) -> io::Result<()>;
}

/// Match surface available on the live monitor
pub trait MonitorFilter {
    fn match_subsystem_devtype(&mut self, subsystem: &str, devtype: Option<&str>) -> io::Result<()>;
    fn match_tag(&mut self, tag: &str) -> io::Result<()>;
}

/// Kernel action attached to a monitor record
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    Add,
    Remove,
    Other(String),
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Action::Add => f.write_str("add"),
            Action::Remove => f.write_str("remove"),
            Action::Other(name) => f.write_str(name),
        }
    }
}

/// One drained monitor record
#[derive(Debug)]
pub struct MonitorEvent {
    pub action: Action,
    pub syspath: String,
    pub device: Rc<dyn NativeDevice>,
}

/// Armed monitor subscription
///
/// The descriptor turns readable when at least one record is pending.
pub trait MonitorSocket: AsRawFd {
    /// Drain one pending record, `None` when nothing was ready
    fn receive(&mut self) -> Option<MonitorEvent>;
}

/// Factory for enumerators and monitors of one device backend
pub trait Platform {
    type Enumerator: EnumeratorFilter;
    type MonitorBuilder: MonitorFilter;
    type Monitor: MonitorSocket;

    fn enumerator(&self) -> io::Result<Self::Enumerator>;

    /// Run the scan, returning the syspaths of every matching device
    fn scan(&self, enumerator: Self::Enumerator) -> io::Result<Vec<String>>;

    fn device_from_syspath(&self, syspath: &str) -> io::Result<Rc<dyn NativeDevice>>;

    fn monitor_builder(&self) -> io::Result<Self::MonitorBuilder>;

    /// Arm the monitor so it starts receiving events
    fn listen(&self, builder: Self::MonitorBuilder) -> io::Result<Self::Monitor>;
}
