// SPDX-License-Identifier: GPL-3.0-only
//! Daemon configuration
//!
//! Read from a KDL document, by default
//! `$XDG_CONFIG_HOME/keyleds/devwatch.kdl`:
//!
//! ```kdl
//! rescan-interval 60
//! match {
//!     subsystem "input"
//!     devtype "input"
//!     attribute "name" "Logitech G410"
//!     property "ID_INPUT_KEYBOARD" "1"
//!     tag "uaccess"
//! }
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use kdl::{KdlDocument, KdlNode, KdlValue};
use crate::error::{Result, WatchError};
use crate::filter::MatchCriteria;

pub const CONFIG_DIR: &str = "keyleds";
pub const CONFIG_FILE: &str = "devwatch.kdl";

/// Longest accepted `rescan-interval`, one day
pub const MAX_RESCAN_INTERVAL_SECS: u64 = 24 * 60 * 60;

#[derive(Clone, Debug, PartialEq)]
pub struct Config {
    /// Seconds between full rescans, 0 disables them
    pub rescan_interval_secs: u64,
    pub criteria: MatchCriteria,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            rescan_interval_secs: 60,
            criteria: MatchCriteria::default(),
        }
    }
}

impl Config {
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join(CONFIG_DIR).join(CONFIG_FILE))
    }

    /// Load the file at `path`
    pub fn load(path: &Path) -> Result<Self> {
        Self::parse(&std::fs::read_to_string(path)?)
    }

    /// Like [`Config::load`], falling back to defaults when the file does not exist
    pub fn load_or_default(path: &Path) -> Result<Self> {
        match std::fs::read_to_string(path) {
            Ok(text) => Self::parse(&text),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                info!("No configuration at {}, using defaults", path.display());
                Ok(Self::default())
            }
            Err(err) => Err(err.into()),
        }
    }

    pub fn parse(text: &str) -> Result<Self> {
        let document: KdlDocument = text
            .parse()
            .map_err(|err: kdl::KdlError| WatchError::Config(err.to_string()))?;

        let mut config = Self::default();
        for node in document.nodes() {
            match node.name().value() {
                "rescan-interval" => {
                    let secs = single_argument(node)?
                        .as_integer()
                        .and_then(|value| u64::try_from(value).ok())
                        .filter(|secs| *secs <= MAX_RESCAN_INTERVAL_SECS)
                        .ok_or_else(|| {
                            WatchError::Config(format!(
                                "rescan-interval expects an integer between 0 and {MAX_RESCAN_INTERVAL_SECS}"
                            ))
                        })?;
                    config.rescan_interval_secs = secs;
                }
                "match" => config.criteria = parse_criteria(node)?,
                other => warn!("Ignoring unknown configuration node {:?}", other),
            }
        }

        config.criteria.validate()?;
        Ok(config)
    }

    pub fn rescan_interval(&self) -> Option<Duration> {
        (self.rescan_interval_secs > 0).then(|| Duration::from_secs(self.rescan_interval_secs))
    }
}

fn arguments(node: &KdlNode) -> Vec<&KdlValue> {
    node.entries()
        .iter()
        .filter(|entry| entry.name().is_none())
        .map(|entry| entry.value())
        .collect()
}

fn single_argument(node: &KdlNode) -> Result<&KdlValue> {
    match arguments(node).as_slice() {
        [value] => Ok(*value),
        _ => Err(WatchError::Config(format!(
            "{} expects exactly one argument",
            node.name().value()
        ))),
    }
}

fn string_arguments<const N: usize>(node: &KdlNode) -> Result<[String; N]> {
    let name = node.name().value();
    let values: Vec<String> = arguments(node)
        .into_iter()
        .map(|value| {
            value
                .as_string()
                .map(str::to_string)
                .ok_or_else(|| WatchError::Config(format!("{name} expects string arguments")))
        })
        .collect::<Result<_>>()?;
    values
        .try_into()
        .map_err(|_| WatchError::Config(format!("{name} expects {N} argument(s)")))
}

fn parse_criteria(node: &KdlNode) -> Result<MatchCriteria> {
    let mut criteria = MatchCriteria::default();
    let Some(children) = node.children() else {
        return Ok(criteria);
    };

    for child in children.nodes() {
        match child.name().value() {
            "subsystem" => {
                let [subsystem] = string_arguments(child)?;
                criteria.subsystem = subsystem;
            }
            "devtype" => {
                let [devtype] = string_arguments(child)?;
                criteria.devtype = devtype;
            }
            "attribute" => {
                let [name, value] = string_arguments(child)?;
                criteria.attributes.insert(name, value);
            }
            "property" => {
                let [key, value] = string_arguments(child)?;
                criteria.properties.insert(key, value);
            }
            "tag" => {
                let [tag] = string_arguments(child)?;
                criteria.tags.insert(tag);
            }
            other => {
                return Err(WatchError::Config(format!("unknown match criterion {other:?}")));
            }
        }
    }
    Ok(criteria)
}
