//! Admission filter
//!
//! Decides which vendor/product pairs are tracked at all. The filter is
//! built once from configuration and never mutated afterwards.

use crate::error::{InventoryError, Result};
use std::collections::HashSet;

/// Vendor/product admission policy
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum AdmissionFilter {
    /// Every device is tracked
    #[default]
    AllowAll,
    /// Only exact (vendor id, product id) matches are tracked
    Whitelist(HashSet<(u16, u16)>),
}

impl AdmissionFilter {
    /// Build a whitelist filter from (vendor id, product id) pairs
    pub fn whitelist<I>(entries: I) -> Self
    where
        I: IntoIterator<Item = (u16, u16)>,
    {
        Self::Whitelist(entries.into_iter().collect())
    }

    /// Build a whitelist filter from `"0xVID:0xPID"` patterns
    pub fn from_patterns<S: AsRef<str>>(patterns: &[S]) -> Result<Self> {
        let entries = patterns
            .iter()
            .map(|p| parse_vid_pid(p.as_ref()))
            .collect::<Result<HashSet<_>>>()?;
        Ok(Self::Whitelist(entries))
    }

    /// Whether a device with this vendor/product pair may be tracked
    pub fn admit(&self, vendor_id: u16, product_id: u16) -> bool {
        match self {
            Self::AllowAll => true,
            Self::Whitelist(entries) => entries.contains(&(vendor_id, product_id)),
        }
    }

    pub fn is_whitelist(&self) -> bool {
        matches!(self, Self::Whitelist(_))
    }
}

/// Parse a `"0xVID:0xPID"` pattern into a (vendor id, product id) pair
///
/// Both halves need a `0x` prefix followed by 1-4 hex digits. Wildcards are
/// not accepted.
pub fn parse_vid_pid(pattern: &str) -> Result<(u16, u16)> {
    let (vid, pid) = pattern.trim().split_once(':').ok_or_else(|| {
        InventoryError::InvalidConfig(format!(
            "Invalid whitelist entry '{}', expected VID:PID (e.g., '0x1234:0x5678')",
            pattern
        ))
    })?;

    Ok((parse_hex_id(vid, "VID")?, parse_hex_id(pid, "PID")?))
}

fn parse_hex_id(id: &str, name: &str) -> Result<u16> {
    let hex_part = id
        .strip_prefix("0x")
        .or_else(|| id.strip_prefix("0X"))
        .ok_or_else(|| {
            InventoryError::InvalidConfig(format!(
                "Invalid {} '{}', must start with '0x' (e.g., '0x1234')",
                name, id
            ))
        })?;

    if hex_part.is_empty() || hex_part.len() > 4 {
        return Err(InventoryError::InvalidConfig(format!(
            "Invalid {} '{}', hex part must be 1-4 digits",
            name, id
        )));
    }

    u16::from_str_radix(hex_part, 16).map_err(|_| {
        InventoryError::InvalidConfig(format!("Invalid {} '{}', not a valid hex number", name, id))
    })
}
