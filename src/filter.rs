// SPDX-License-Identifier: GPL-3.0-only
//! Criteria-based filtering
//!
//! Match criteria are applied in two layers. As much as possible is pushed
//! down to the native filters: subsystem, attributes, properties and tags
//! when enumerating; subsystem/devtype and tags on the monitor. Then every
//! candidate is re-checked in software for devtype, attributes and
//! properties, because the monitor cannot filter on the latter two and
//! does not reliably honour the devtype.

use std::collections::{BTreeMap, BTreeSet};
use std::io;

use crate::device::DeviceDescription;
use crate::error::{Result, WatchError};
use crate::platform::{EnumeratorFilter, MonitorFilter, Platform};
use crate::watcher::{DeviceWatcher, WatchPolicy};

/// What a device must look like to be watched
///
/// Empty `subsystem` or `devtype` match anything.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MatchCriteria {
    pub subsystem: String,
    pub devtype: String,
    /// Sysfs attribute name -> required value
    pub attributes: BTreeMap<String, String>,
    /// Udev property key -> required value
    pub properties: BTreeMap<String, String>,
    pub tags: BTreeSet<String>,
}

impl MatchCriteria {
    pub fn builder() -> MatchCriteriaBuilder {
        MatchCriteriaBuilder::default()
    }

    /// Check that every criterion can be handed to the native filters
    pub fn validate(&self) -> Result<()> {
        check_value("subsystem", &self.subsystem)?;
        check_value("devtype", &self.devtype)?;
        for (name, value) in &self.attributes {
            check_key("attribute", name)?;
            check_value("attribute value", value)?;
        }
        for (key, value) in &self.properties {
            check_key("property", key)?;
            check_value("property value", value)?;
        }
        for tag in &self.tags {
            check_key("tag", tag)?;
        }
        if !self.devtype.is_empty() && self.subsystem.is_empty() {
            warn!(
                devtype = %self.devtype,
                "devtype without subsystem cannot be filtered natively, relying on software check"
            );
        }
        Ok(())
    }

    /// `true` when nothing is filtered
    pub fn is_empty(&self) -> bool {
        self.subsystem.is_empty()
            && self.devtype.is_empty()
            && self.attributes.is_empty()
            && self.properties.is_empty()
            && self.tags.is_empty()
    }
}

fn check_key(what: &str, key: &str) -> Result<()> {
    if key.is_empty() {
        return Err(WatchError::InvalidCriteria(format!("empty {what} name")));
    }
    check_value(what, key)
}

fn check_value(what: &str, value: &str) -> Result<()> {
    if value.contains('\0') {
        return Err(WatchError::InvalidCriteria(format!(
            "{what} {value:?} contains a NUL byte"
        )));
    }
    Ok(())
}

/// Builder for [`MatchCriteria`]
#[derive(Debug, Default)]
pub struct MatchCriteriaBuilder {
    criteria: MatchCriteria,
}

impl MatchCriteriaBuilder {
    pub fn subsystem(mut self, subsystem: impl Into<String>) -> Self {
        self.criteria.subsystem = subsystem.into();
        self
    }

    pub fn devtype(mut self, devtype: impl Into<String>) -> Self {
        self.criteria.devtype = devtype.into();
        self
    }

    pub fn attribute(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.criteria.attributes.insert(name.into(), value.into());
        self
    }

    pub fn property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.criteria.properties.insert(key.into(), value.into());
        self
    }

    pub fn tag(mut self, tag: impl Into<String>) -> Self {
        self.criteria.tags.insert(tag.into());
        self
    }

    pub fn build(self) -> Result<MatchCriteria> {
        self.criteria.validate()?;
        Ok(self.criteria)
    }
}

/// [`WatchPolicy`] enforcing a fixed set of [`MatchCriteria`]
#[derive(Debug, Clone)]
pub struct FilterPolicy {
    criteria: MatchCriteria,
}

impl FilterPolicy {
    pub fn new(criteria: MatchCriteria) -> Result<Self> {
        criteria.validate()?;
        Ok(Self { criteria })
    }

    pub fn criteria(&self) -> &MatchCriteria {
        &self.criteria
    }
}

impl WatchPolicy for FilterPolicy {
    fn configure_enumerator(&self, enumerator: &mut dyn EnumeratorFilter) -> io::Result<()> {
        let criteria = &self.criteria;
        if !criteria.subsystem.is_empty() {
            enumerator.match_subsystem(&criteria.subsystem)?;
        }
        for (name, value) in &criteria.attributes {
            enumerator.match_attribute(name, value)?;
        }
        for (key, value) in &criteria.properties {
            enumerator.match_property(key, value)?;
        }
        for tag in &criteria.tags {
            enumerator.match_tag(tag)?;
        }
        Ok(())
    }

    fn configure_monitor(&self, monitor: &mut dyn MonitorFilter) -> io::Result<()> {
        let criteria = &self.criteria;
        if !criteria.subsystem.is_empty() {
            let devtype = (!criteria.devtype.is_empty()).then_some(criteria.devtype.as_str());
            monitor.match_subsystem_devtype(&criteria.subsystem, devtype)?;
        }
        for tag in &criteria.tags {
            monitor.match_tag(tag)?;
        }
        Ok(())
    }

    fn is_visible(&self, device: &DeviceDescription) -> bool {
        let criteria = &self.criteria;
        if !criteria.devtype.is_empty() && criteria.devtype != device.dev_type() {
            return false;
        }
        let attributes_match = criteria
            .attributes
            .iter()
            .all(|(name, value)| device.attribute(name) == Some(value.as_str()));
        let properties_match = criteria
            .properties
            .iter()
            .all(|(key, value)| device.property(key) == Some(value.as_str()));
        attributes_match && properties_match
    }
}

/// A [`DeviceWatcher`] driven by a [`FilterPolicy`]
pub type FilteredDeviceWatcher<P> = DeviceWatcher<P>;

impl<P: Platform> DeviceWatcher<P> {
    /// Create an inactive watcher restricted to `criteria`
    pub fn filtered(platform: P, criteria: MatchCriteria) -> Result<Self> {
        Ok(Self::with_policy(platform, FilterPolicy::new(criteria)?))
    }
}
