// SPDX-License-Identifier: GPL-3.0-only
//! In-memory platform used by the unit tests
//!
//! The fake enumerator applies every native match it is given. The fake
//! monitor honours subsystem and tag matches but ignores devtype, and is
//! backed by a socket pair so readiness can be polled like a real netlink
//! socket: one byte is written per queued record.

use std::cell::RefCell;
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::io::{self, Read, Write};
use std::os::fd::{AsRawFd, RawFd};
use std::os::unix::net::UnixStream;
use std::rc::Rc;

use crate::platform::{
    Action, EnumeratorFilter, MonitorEvent, MonitorFilter, MonitorSocket, NativeDevice, Platform,
};

#[derive(Debug, Default)]
pub struct FakeDevice {
    syspath: String,
    subsystem: Option<String>,
    devtype: Option<String>,
    properties: Vec<(String, String)>,
    tags: Vec<String>,
    attributes: Vec<(String, Option<String>)>,
    parent: Option<Rc<FakeDevice>>,
}

pub struct FakeDeviceBuilder {
    device: FakeDevice,
}

impl FakeDevice {
    #[allow(clippy::new_ret_no_self)]
    pub fn new(syspath: &str) -> FakeDeviceBuilder {
        FakeDeviceBuilder {
            device: FakeDevice {
                syspath: syspath.to_string(),
                ..Default::default()
            },
        }
    }

    fn matches(&self, subsystem: Option<&str>, devtype: Option<&str>) -> bool {
        subsystem.is_none_or(|s| self.subsystem.as_deref() == Some(s))
            && devtype.is_none_or(|d| self.devtype.as_deref() == Some(d))
    }

    fn property(&self, key: &str) -> Option<&str> {
        self.properties
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(n, _)| n == name)
            .and_then(|(_, v)| v.as_deref())
    }
}

impl FakeDeviceBuilder {
    pub fn subsystem(mut self, subsystem: &str) -> Self {
        self.device.subsystem = Some(subsystem.to_string());
        self
    }

    pub fn devtype(mut self, devtype: &str) -> Self {
        self.device.devtype = Some(devtype.to_string());
        self
    }

    pub fn property(mut self, key: &str, value: &str) -> Self {
        self.device.properties.push((key.to_string(), value.to_string()));
        self
    }

    pub fn tag(mut self, tag: &str) -> Self {
        self.device.tags.push(tag.to_string());
        self
    }

    pub fn attribute(mut self, name: &str, value: &str) -> Self {
        self.device
            .attributes
            .push((name.to_string(), Some(value.to_string())));
        self
    }

    pub fn unreadable_attribute(mut self, name: &str) -> Self {
        self.device.attributes.push((name.to_string(), None));
        self
    }

    pub fn parent(mut self, parent: Rc<FakeDevice>) -> Self {
        self.device.parent = Some(parent);
        self
    }

    pub fn build(self) -> Rc<FakeDevice> {
        Rc::new(self.device)
    }
}

impl NativeDevice for FakeDevice {
    fn syspath(&self) -> String {
        self.syspath.clone()
    }

    fn sysname(&self) -> Option<String> {
        self.syspath.rsplit('/').next().map(str::to_string)
    }

    fn sysnum(&self) -> Option<String> {
        let name = self.sysname()?;
        let digits: String = name
            .chars()
            .rev()
            .take_while(char::is_ascii_digit)
            .collect::<Vec<_>>()
            .into_iter()
            .rev()
            .collect();
        (!digits.is_empty()).then_some(digits)
    }

    fn devpath(&self) -> Option<String> {
        self.syspath.strip_prefix("/sys").map(str::to_string)
    }

    fn devnode(&self) -> Option<String> {
        None
    }

    fn subsystem(&self) -> Option<String> {
        self.subsystem.clone()
    }

    fn devtype(&self) -> Option<String> {
        self.devtype.clone()
    }

    fn driver(&self) -> Option<String> {
        None
    }

    fn is_initialized(&self) -> bool {
        true
    }

    fn usec_since_initialized(&self) -> u64 {
        0
    }

    fn properties(&self) -> Vec<(String, String)> {
        self.properties.clone()
    }

    fn tags(&self) -> Vec<String> {
        self.tags.clone()
    }

    fn attributes(&self) -> Vec<(String, Option<String>)> {
        self.attributes.clone()
    }

    fn parent(&self) -> Option<Rc<dyn NativeDevice>> {
        self.parent
            .clone()
            .map(|parent| parent as Rc<dyn NativeDevice>)
    }

    fn parent_with_type(
        &self,
        subsystem: Option<&str>,
        devtype: Option<&str>,
    ) -> Option<Rc<dyn NativeDevice>> {
        let mut current = self.parent.clone();
        while let Some(device) = current {
            if device.matches(subsystem, devtype) {
                return Some(device as Rc<dyn NativeDevice>);
            }
            current = device.parent.clone();
        }
        None
    }
}

struct MonitorChannel {
    writer: UnixStream,
    queue: VecDeque<MonitorEvent>,
    filter: FakeMonitorBuilder,
}

#[derive(Default)]
struct State {
    devices: BTreeMap<String, Rc<FakeDevice>>,
    fail_enumerate: bool,
    fail_monitor: bool,
    repeat_scan_entries: bool,
    fail_match: bool,
    vanishing: BTreeSet<String>,
    lookups: usize,
    enumerator_matches: Vec<String>,
    monitor: Option<MonitorChannel>,
}

/// Shared handle on the fake device tree
#[derive(Clone, Default)]
pub struct FakePlatform {
    state: Rc<RefCell<State>>,
}

impl FakePlatform {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a device without telling the monitor
    pub fn insert(&self, device: Rc<FakeDevice>) {
        self.state
            .borrow_mut()
            .devices
            .insert(device.syspath.clone(), device);
    }

    /// Detach a device without telling the monitor
    pub fn remove(&self, syspath: &str) -> Option<Rc<FakeDevice>> {
        self.state.borrow_mut().devices.remove(syspath)
    }

    /// Attach a device and emit an add record
    pub fn plug(&self, device: Rc<FakeDevice>) {
        self.insert(Rc::clone(&device));
        self.inject(Action::Add, device);
    }

    /// Detach a device and emit a remove record
    pub fn unplug(&self, syspath: &str) {
        if let Some(device) = self.remove(syspath) {
            self.inject(Action::Remove, device);
        }
    }

    /// Queue a raw monitor record, dropped when nothing listens
    pub fn inject(&self, action: Action, device: Rc<FakeDevice>) {
        let mut state = self.state.borrow_mut();
        let Some(channel) = state.monitor.as_mut() else {
            return;
        };
        if !channel.filter.accepts(&device) {
            return;
        }
        channel.queue.push_back(MonitorEvent {
            action,
            syspath: device.syspath.clone(),
            device,
        });
        channel
            .writer
            .write_all(&[1])
            .expect("fake monitor socket write");
    }

    /// Make the monitor readable without queueing a record
    pub fn spurious_wake(&self) {
        if let Some(channel) = self.state.borrow_mut().monitor.as_mut() {
            channel
                .writer
                .write_all(&[0])
                .expect("fake monitor socket write");
        }
    }

    pub fn set_fail_enumerate(&self, fail: bool) {
        self.state.borrow_mut().fail_enumerate = fail;
    }

    pub fn set_fail_monitor(&self, fail: bool) {
        self.state.borrow_mut().fail_monitor = fail;
    }

    /// Make every native match call fail
    pub fn set_fail_match(&self, fail: bool) {
        self.state.borrow_mut().fail_match = fail;
    }

    /// Report `syspath` from scans while failing its lookup, as if the
    /// device went away right after enumeration
    pub fn insert_vanishing(&self, syspath: &str) {
        self.state.borrow_mut().vanishing.insert(syspath.to_string());
    }

    /// Report every syspath twice from scans
    pub fn set_repeat_scan_entries(&self, repeat: bool) {
        self.state.borrow_mut().repeat_scan_entries = repeat;
    }

    /// Number of syspath lookups performed so far
    pub fn lookups(&self) -> usize {
        self.state.borrow().lookups
    }

    /// Matches given to the most recent enumerator
    pub fn enumerator_matches(&self) -> Vec<String> {
        self.state.borrow().enumerator_matches.clone()
    }

    /// Matches given to the armed monitor
    pub fn monitor_matches(&self) -> Vec<String> {
        self.state
            .borrow()
            .monitor
            .as_ref()
            .map(|channel| channel.filter.log.clone())
            .unwrap_or_default()
    }

    pub fn is_listening(&self) -> bool {
        self.state.borrow().monitor.is_some()
    }
}

#[derive(Default)]
pub struct FakeEnumerator {
    fail: bool,
    subsystems: Vec<String>,
    attributes: Vec<(String, String)>,
    properties: Vec<(String, String)>,
    tags: Vec<String>,
    log: Vec<String>,
}

impl FakeEnumerator {
    fn check(&self) -> io::Result<()> {
        if self.fail {
            return Err(io::Error::other("enumerator match rejected"));
        }
        Ok(())
    }

    fn accepts(&self, device: &FakeDevice) -> bool {
        (self.subsystems.is_empty()
            || self
                .subsystems
                .iter()
                .any(|s| device.subsystem.as_deref() == Some(s.as_str())))
            && self
                .attributes
                .iter()
                .all(|(n, v)| device.attribute(n) == Some(v.as_str()))
            && self
                .properties
                .iter()
                .all(|(k, v)| device.property(k) == Some(v.as_str()))
            && self.tags.iter().all(|t| device.tags.contains(t))
    }
}

impl EnumeratorFilter for FakeEnumerator {
    fn match_subsystem(&mut self, subsystem: &str) -> io::Result<()> {
        self.check()?;
        self.log.push(format!("subsystem={subsystem}"));
        self.subsystems.push(subsystem.to_string());
        Ok(())
    }

    fn match_attribute(&mut self, name: &str, value: &str) -> io::Result<()> {
        self.check()?;
        self.log.push(format!("attribute:{name}={value}"));
        self.attributes.push((name.to_string(), value.to_string()));
        Ok(())
    }

    fn match_property(&mut self, key: &str, value: &str) -> io::Result<()> {
        self.check()?;
        self.log.push(format!("property:{key}={value}"));
        self.properties.push((key.to_string(), value.to_string()));
        Ok(())
    }

    fn match_tag(&mut self, tag: &str) -> io::Result<()> {
        self.check()?;
        self.log.push(format!("tag={tag}"));
        self.tags.push(tag.to_string());
        Ok(())
    }
}

#[derive(Default)]
pub struct FakeMonitorBuilder {
    fail: bool,
    subsystems: Vec<String>,
    tags: Vec<String>,
    log: Vec<String>,
}

impl FakeMonitorBuilder {
    fn check(&self) -> io::Result<()> {
        if self.fail {
            return Err(io::Error::other("monitor match rejected"));
        }
        Ok(())
    }

    fn accepts(&self, device: &FakeDevice) -> bool {
        (self.subsystems.is_empty()
            || self
                .subsystems
                .iter()
                .any(|s| device.subsystem.as_deref() == Some(s.as_str())))
            && self.tags.iter().all(|t| device.tags.contains(t))
    }
}

impl MonitorFilter for FakeMonitorBuilder {
    fn match_subsystem_devtype(&mut self, subsystem: &str, devtype: Option<&str>) -> io::Result<()> {
        self.check()?;
        match devtype {
            Some(devtype) => self.log.push(format!("subsystem={subsystem}/{devtype}")),
            None => self.log.push(format!("subsystem={subsystem}")),
        }
        self.subsystems.push(subsystem.to_string());
        Ok(())
    }

    fn match_tag(&mut self, tag: &str) -> io::Result<()> {
        self.check()?;
        self.log.push(format!("tag={tag}"));
        self.tags.push(tag.to_string());
        Ok(())
    }
}

pub struct FakeMonitor {
    reader: UnixStream,
    state: Rc<RefCell<State>>,
}

impl AsRawFd for FakeMonitor {
    fn as_raw_fd(&self) -> RawFd {
        self.reader.as_raw_fd()
    }
}

impl MonitorSocket for FakeMonitor {
    fn receive(&mut self) -> Option<MonitorEvent> {
        let mut byte = [0u8; 1];
        match self.reader.read(&mut byte) {
            Ok(1) if byte[0] == 1 => {}
            _ => return None,
        }
        self.state
            .borrow_mut()
            .monitor
            .as_mut()
            .and_then(|channel| channel.queue.pop_front())
    }
}

impl Drop for FakeMonitor {
    fn drop(&mut self) {
        self.state.borrow_mut().monitor = None;
    }
}

impl Platform for FakePlatform {
    type Enumerator = FakeEnumerator;
    type MonitorBuilder = FakeMonitorBuilder;
    type Monitor = FakeMonitor;

    fn enumerator(&self) -> io::Result<FakeEnumerator> {
        if self.state.borrow().fail_enumerate {
            return Err(io::Error::other("enumeration unavailable"));
        }
        Ok(FakeEnumerator {
            fail: self.state.borrow().fail_match,
            ..Default::default()
        })
    }

    fn scan(&self, enumerator: FakeEnumerator) -> io::Result<Vec<String>> {
        let mut state = self.state.borrow_mut();
        let mut syspaths: Vec<String> = state
            .devices
            .values()
            .filter(|device| enumerator.accepts(device))
            .map(|device| device.syspath.clone())
            .collect();
        syspaths.extend(state.vanishing.iter().cloned());
        if state.repeat_scan_entries {
            syspaths.extend(syspaths.clone());
        }
        state.enumerator_matches = enumerator.log;
        Ok(syspaths)
    }

    fn device_from_syspath(&self, syspath: &str) -> io::Result<Rc<dyn NativeDevice>> {
        let mut state = self.state.borrow_mut();
        state.lookups += 1;
        state
            .devices
            .get(syspath)
            .map(|device| Rc::clone(device) as Rc<dyn NativeDevice>)
            .ok_or_else(|| io::Error::from(io::ErrorKind::NotFound))
    }

    fn monitor_builder(&self) -> io::Result<FakeMonitorBuilder> {
        if self.state.borrow().fail_monitor {
            return Err(io::Error::other("netlink unavailable"));
        }
        Ok(FakeMonitorBuilder {
            fail: self.state.borrow().fail_match,
            ..Default::default()
        })
    }

    fn listen(&self, builder: FakeMonitorBuilder) -> io::Result<FakeMonitor> {
        let (reader, writer) = UnixStream::pair()?;
        reader.set_nonblocking(true)?;
        self.state.borrow_mut().monitor = Some(MonitorChannel {
            writer,
            queue: VecDeque::new(),
            filter: builder,
        });
        Ok(FakeMonitor {
            reader,
            state: Rc::clone(&self.state),
        })
    }
}
