use crate::error::{Error, Result};
use std::fmt;
use std::ops::RangeInclusive;

/// Inclusive range of ports the allocator may hand out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortRange {
    min: u16,
    max: u16,
}

impl PortRange {
    pub fn new(min: u16, max: u16) -> Result<Self> {
        if min == 0 {
            return Err(Error::Config(
                "Port range must start at 1 or above (PORT_MIN=0)".to_string(),
            ));
        }
        if min > max {
            return Err(Error::Config(format!(
                "Invalid port range: PORT_MIN ({}) must not exceed PORT_MAX ({})",
                min, max
            )));
        }
        Ok(Self { min, max })
    }

    pub fn min(&self) -> u16 {
        self.min
    }

    pub fn max(&self) -> u16 {
        self.max
    }

    pub fn contains(&self, port: u16) -> bool {
        (self.min..=self.max).contains(&port)
    }

    /// Ports in ascending scan order.
    pub fn ports(&self) -> RangeInclusive<u16> {
        self.min..=self.max
    }
}

impl fmt::Display for PortRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.min, self.max)
    }
}
