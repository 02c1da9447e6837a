//! Outbound address normalization.

use parley_transport_protocol::USER_ADDRESS_SUFFIX;

use super::DispatchError;

/// Default region prefix prepended to short local numbers (Peru).
pub const DEFAULT_REGION_PREFIX: &str = "51";

/// Numbers with fewer digits than this are treated as local.
pub const DEFAULT_LOCAL_THRESHOLD: usize = 11;

/// Turns operator-supplied phone numbers into transport addresses.
#[derive(Debug, Clone)]
pub struct AddressPolicy {
    region_prefix: String,
    local_threshold: usize,
}

impl Default for AddressPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_REGION_PREFIX, DEFAULT_LOCAL_THRESHOLD)
    }
}

impl AddressPolicy {
    pub fn new(region_prefix: impl Into<String>, local_threshold: usize) -> Self {
        Self {
            region_prefix: region_prefix.into(),
            local_threshold,
        }
    }

    /// Normalize `raw` into a fully-qualified address.
    ///
    /// Qualified addresses (containing `@`) pass through unchanged. Anything
    /// else is reduced to its digits; short numbers without the region prefix
    /// get it prepended.
    pub fn normalize(&self, raw: &str) -> Result<String, DispatchError> {
        let raw = raw.trim();
        if raw.contains('@') {
            return Ok(raw.to_string());
        }

        let digits: String = raw.chars().filter(char::is_ascii_digit).collect();
        if digits.is_empty() {
            return Err(DispatchError::InvalidAddress(raw.to_string()));
        }

        let number = if digits.len() < self.local_threshold && !digits.starts_with(&self.region_prefix)
        {
            format!("{}{}", self.region_prefix, digits)
        } else {
            digits
        };
        Ok(format!("{number}{USER_ADDRESS_SUFFIX}"))
    }
}
