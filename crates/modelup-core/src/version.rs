//! Dotted version strings as used by model version maps.
//!
//! Versions compare segment by segment. Numeric segments compare as numbers,
//! anything else compares lexically, and a numeric segment sorts before a
//! non-numeric one. Missing trailing segments count as `0`, so `1.0` and
//! `1.0.0` are the same version.

use crate::error::{Result, UpgradeError};
use std::cmp::Ordering;

/// Version assumed for a model that has never been recorded.
pub const DEFAULT_VERSION: &str = "1.0";

pub fn validate_version(version: &str) -> Result<()> {
    if version.is_empty()
        || version
            .split('.')
            .any(|seg| seg.is_empty() || seg.chars().any(char::is_whitespace))
    {
        return Err(UpgradeError::InvalidVersion(version.to_string()));
    }
    Ok(())
}

pub fn compare_versions(a: &str, b: &str) -> Ordering {
    let mut left = a.split('.');
    let mut right = b.split('.');
    loop {
        match (left.next(), right.next()) {
            (None, None) => return Ordering::Equal,
            (l, r) => {
                let ord = compare_segment(l.unwrap_or("0"), r.unwrap_or("0"));
                if ord != Ordering::Equal {
                    return ord;
                }
            }
        }
    }
}

pub fn same_version(a: &str, b: &str) -> bool {
    compare_versions(a, b) == Ordering::Equal
}

fn compare_segment(a: &str, b: &str) -> Ordering {
    match (a.parse::<u64>(), b.parse::<u64>()) {
        (Ok(x), Ok(y)) => x.cmp(&y),
        (Ok(_), Err(_)) => Ordering::Less,
        (Err(_), Ok(_)) => Ordering::Greater,
        (Err(_), Err(_)) => a.cmp(b),
    }
}
