//! Label and device selectors.
//!
//! The label selector is a conjunction of label-equality constraints used by
//! the association scheduler. The device selector evaluates constraint
//! expressions over probed disks to pick an installation target.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Conjunctive label-equality constraints.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LabelSelector {
    #[serde(default)]
    pub match_labels: BTreeMap<String, String>,
}

impl LabelSelector {
    /// True when every constraint is satisfied by `labels`. An empty
    /// selector matches everything.
    pub fn matches(&self, labels: &BTreeMap<String, String>) -> bool {
        self.match_labels
            .iter()
            .all(|(k, v)| labels.get(k) == Some(v))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeviceSelectorKey {
    Name,
    Size,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeviceSelectorOp {
    In,
    NotIn,
    Lt,
    Gt,
}

/// One constraint in a device selector expression.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceSelectorRequirement {
    pub key: DeviceSelectorKey,
    pub operator: DeviceSelectorOp,
    #[serde(default)]
    pub values: Vec<String>,
}

/// A candidate installation disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Disk {
    /// Kernel name without the `/dev/` prefix (e.g. `sda`).
    pub name: String,
    pub size_bytes: u64,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SelectorError {
    /// Every disk was filtered out (or none were offered).
    #[error("no device found matching selector")]
    NoDeviceFound,

    /// Operator does not apply to the requirement's key.
    #[error("operator {operator:?} not supported for key {key:?}")]
    UnsupportedOperator {
        key: DeviceSelectorKey,
        operator: DeviceSelectorOp,
    },

    /// Size value is not a valid binary-SI quantity.
    #[error("invalid quantity '{0}'")]
    InvalidQuantity(String),
}

/// Pick an installation disk satisfying every requirement.
///
/// Requirements are a conjunction: a disk must satisfy all of them to remain
/// a candidate. The first remaining candidate (in input order) wins and is
/// returned as a `/dev/<name>` path; multiple remaining candidates are not
/// an error. An empty requirement set matches every disk.
pub fn select_device(
    requirements: &[DeviceSelectorRequirement],
    disks: &[Disk],
) -> Result<String, SelectorError> {
    for disk in disks {
        let mut candidate = true;
        for requirement in requirements {
            if !matches_requirement(requirement, disk)? {
                candidate = false;
                break;
            }
        }
        if candidate {
            return Ok(format!("/dev/{}", disk.name));
        }
    }
    Err(SelectorError::NoDeviceFound)
}

fn matches_requirement(
    requirement: &DeviceSelectorRequirement,
    disk: &Disk,
) -> Result<bool, SelectorError> {
    match (requirement.key, requirement.operator) {
        (DeviceSelectorKey::Name, DeviceSelectorOp::In) => Ok(requirement
            .values
            .iter()
            .any(|v| name_matches(v, &disk.name))),
        (DeviceSelectorKey::Name, DeviceSelectorOp::NotIn) => Ok(!requirement
            .values
            .iter()
            .any(|v| name_matches(v, &disk.name))),
        (DeviceSelectorKey::Size, DeviceSelectorOp::Lt) => {
            let mut matched = true;
            for value in &requirement.values {
                matched &= disk.size_bytes < parse_quantity(value)?;
            }
            Ok(matched)
        }
        (DeviceSelectorKey::Size, DeviceSelectorOp::Gt) => {
            let mut matched = true;
            for value in &requirement.values {
                matched &= disk.size_bytes > parse_quantity(value)?;
            }
            Ok(matched)
        }
        (key, operator) => Err(SelectorError::UnsupportedOperator { key, operator }),
    }
}

/// Values may carry the device-path prefix or not; both compare equal.
fn name_matches(value: &str, disk_name: &str) -> bool {
    value.strip_prefix("/dev/").unwrap_or(value) == disk_name
}

/// Parse a binary-SI quantity (`100Gi` = 100 * 2^30 bytes). Plain integers
/// are raw bytes.
pub fn parse_quantity(value: &str) -> Result<u64, SelectorError> {
    let value = value.trim();
    let split = value
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(value.len());
    let (digits, suffix) = value.split_at(split);

    let number: u64 = digits
        .parse()
        .map_err(|_| SelectorError::InvalidQuantity(value.to_string()))?;

    let multiplier: u64 = match suffix {
        "" => 1,
        "Ki" => 1 << 10,
        "Mi" => 1 << 20,
        "Gi" => 1 << 30,
        "Ti" => 1 << 40,
        "Pi" => 1 << 50,
        _ => return Err(SelectorError::InvalidQuantity(value.to_string())),
    };

    number
        .checked_mul(multiplier)
        .ok_or_else(|| SelectorError::InvalidQuantity(value.to_string()))
}
