// SPDX-License-Identifier: GPL-3.0-only
//! Device snapshots and the registry of known devices
//!
//! A [`DeviceDescription`] copies the properties, tags and readable sysfs
//! attributes of a native device once, at construction. It never changes
//! afterwards; a device that changed is represented by a new description.
//! Identity getters read through the shared native handle and map missing
//! values to the empty string.

use std::collections::hash_map;
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::rc::Rc;

use crate::error::{Result, WatchError};
use crate::platform::NativeDevice;

/// Immutable snapshot of one device
#[derive(Clone)]
pub struct DeviceDescription {
    device: Rc<dyn NativeDevice>,
    properties: HashMap<String, String>,
    tags: BTreeSet<String>,
    attributes: HashMap<String, String>,
}

impl DeviceDescription {
    /// Snapshot a native device
    ///
    /// Attributes whose value cannot be read are left out.
    pub fn new(device: Rc<dyn NativeDevice>) -> Self {
        let properties = device.properties().into_iter().collect();
        let tags = device.tags().into_iter().collect();
        let attributes = device
            .attributes()
            .into_iter()
            .filter_map(|(name, value)| value.map(|value| (name, value)))
            .collect();

        Self {
            device,
            properties,
            tags,
            attributes,
        }
    }

    pub fn properties(&self) -> &HashMap<String, String> {
        &self.properties
    }

    pub fn tags(&self) -> &BTreeSet<String> {
        &self.tags
    }

    pub fn attributes(&self) -> &HashMap<String, String> {
        &self.attributes
    }

    pub fn property(&self, key: &str) -> Option<&str> {
        self.properties.get(key).map(String::as_str)
    }

    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes.get(name).map(String::as_str)
    }

    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.contains(tag)
    }

    /// Shared native handle backing this snapshot
    pub fn handle(&self) -> &Rc<dyn NativeDevice> {
        &self.device
    }

    /// Describe the direct parent in the device tree
    pub fn parent(&self) -> Result<DeviceDescription> {
        self.device
            .parent()
            .map(DeviceDescription::new)
            .ok_or_else(|| WatchError::NoParent {
                syspath: self.sys_path(),
            })
    }

    /// Describe the closest ancestor of the given type
    ///
    /// An empty `subsystem` or `devtype` matches anything.
    pub fn parent_with_type(&self, subsystem: &str, devtype: &str) -> Result<DeviceDescription> {
        let subsystem = (!subsystem.is_empty()).then_some(subsystem);
        let devtype = (!devtype.is_empty()).then_some(devtype);

        self.device
            .parent_with_type(subsystem, devtype)
            .map(DeviceDescription::new)
            .ok_or_else(|| WatchError::NoMatchingParent {
                syspath: self.sys_path(),
                subsystem: subsystem.map(str::to_string),
                devtype: devtype.map(str::to_string),
            })
    }

    pub fn sys_path(&self) -> String {
        self.device.syspath()
    }

    pub fn sys_name(&self) -> String {
        self.device.sysname().unwrap_or_default()
    }

    pub fn sys_num(&self) -> String {
        self.device.sysnum().unwrap_or_default()
    }

    pub fn dev_path(&self) -> String {
        self.device.devpath().unwrap_or_default()
    }

    pub fn dev_node(&self) -> String {
        self.device.devnode().unwrap_or_default()
    }

    pub fn subsystem(&self) -> String {
        self.device.subsystem().unwrap_or_default()
    }

    pub fn dev_type(&self) -> String {
        self.device.devtype().unwrap_or_default()
    }

    pub fn driver(&self) -> String {
        self.device.driver().unwrap_or_default()
    }

    pub fn is_initialized(&self) -> bool {
        self.device.is_initialized()
    }

    pub fn usec_since_initialized(&self) -> u64 {
        self.device.usec_since_initialized()
    }
}

impl fmt::Debug for DeviceDescription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceDescription")
            .field("syspath", &self.sys_path())
            .field("subsystem", &self.subsystem())
            .field("devtype", &self.dev_type())
            .field("properties", &self.properties.len())
            .field("tags", &self.tags)
            .field("attributes", &self.attributes.len())
            .finish()
    }
}

/// Known devices, keyed by syspath
///
/// Read-only outside the crate; only the watcher that owns it mutates it.
#[derive(Debug, Default)]
pub struct DeviceRegistry {
    devices: HashMap<String, Rc<DeviceDescription>>,
}

impl DeviceRegistry {
    pub fn get(&self, syspath: &str) -> Option<&Rc<DeviceDescription>> {
        self.devices.get(syspath)
    }

    pub fn contains(&self, syspath: &str) -> bool {
        self.devices.contains_key(syspath)
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    pub fn iter(&self) -> hash_map::Iter<'_, String, Rc<DeviceDescription>> {
        self.devices.iter()
    }

    pub fn syspaths(&self) -> impl Iterator<Item = &str> {
        self.devices.keys().map(String::as_str)
    }

    pub(crate) fn insert(&mut self, syspath: String, device: Rc<DeviceDescription>) {
        self.devices.insert(syspath, device);
    }

    pub(crate) fn remove(&mut self, syspath: &str) -> Option<Rc<DeviceDescription>> {
        self.devices.remove(syspath)
    }
}

impl<'a> IntoIterator for &'a DeviceRegistry {
    type Item = (&'a String, &'a Rc<DeviceDescription>);
    type IntoIter = hash_map::Iter<'a, String, Rc<DeviceDescription>>;

    fn into_iter(self) -> Self::IntoIter {
        self.devices.iter()
    }
}
