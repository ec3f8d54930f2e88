//! USB value types shared by the streaming session and its backends

use std::fmt;

/// Vendor/product pair identifying the device a session acquires
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DeviceMatchCriteria {
    pub vendor_id: u16,
    pub product_id: u16,
}

impl DeviceMatchCriteria {
    pub const fn new(vendor_id: u16, product_id: u16) -> Self {
        Self {
            vendor_id,
            product_id,
        }
    }

    /// Whether a device descriptor's ids satisfy these criteria
    pub fn matches(&self, vendor_id: u16, product_id: u16) -> bool {
        self.vendor_id == vendor_id && self.product_id == product_id
    }
}

impl fmt::Display for DeviceMatchCriteria {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04x}:{:04x}", self.vendor_id, self.product_id)
    }
}

/// Raw platform status code
///
/// Zero means success. Non-zero values follow the IOKit `kIOReturn*`
/// numbering so that codes reported by different backends read the same.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct StatusCode(pub u32);

impl StatusCode {
    pub const SUCCESS: StatusCode = StatusCode(0);
    pub const ERROR: StatusCode = StatusCode(0xe000_02bc);
    pub const NO_MEMORY: StatusCode = StatusCode(0xe000_02bd);
    pub const NO_DEVICE: StatusCode = StatusCode(0xe000_02c0);
    pub const BAD_ARGUMENT: StatusCode = StatusCode(0xe000_02c2);
    pub const EXCLUSIVE_ACCESS: StatusCode = StatusCode(0xe000_02c5);
    pub const UNSUPPORTED: StatusCode = StatusCode(0xe000_02c7);
    pub const IO_ERROR: StatusCode = StatusCode(0xe000_02ca);
    pub const NOT_OPEN: StatusCode = StatusCode(0xe000_02cd);
    pub const TIMEOUT: StatusCode = StatusCode(0xe000_02d6);
    pub const NOT_PERMITTED: StatusCode = StatusCode(0xe000_02e2);
    pub const UNDERRUN: StatusCode = StatusCode(0xe000_02e7);
    pub const OVERRUN: StatusCode = StatusCode(0xe000_02e8);
    pub const ABORTED: StatusCode = StatusCode(0xe000_02eb);
    pub const NOT_FOUND: StatusCode = StatusCode(0xe000_02f0);
    pub const PIPE_STALLED: StatusCode = StatusCode(0xe000_404f);

    pub fn is_success(self) -> bool {
        self == Self::SUCCESS
    }
}

impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:08x}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipeDirection {
    In,
    Out,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipeTransferType {
    Control,
    Isochronous,
    Bulk,
    Interrupt,
}

/// Snapshot of one pipe's properties, taken when the pipe was queried
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PipeDescriptor {
    /// 1-based pipe index within the open interface
    pub index: u8,
    pub direction: PipeDirection,
    pub endpoint_number: u8,
    pub transfer_type: PipeTransferType,
    pub max_packet_size: u16,
    pub interval: u8,
}

impl PipeDescriptor {
    /// Endpoint address as it appears on the bus (direction bit included)
    pub fn endpoint_address(&self) -> u8 {
        match self.direction {
            PipeDirection::In => 0x80 | self.endpoint_number,
            PipeDirection::Out => self.endpoint_number,
        }
    }
}

impl fmt::Display for PipeDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "pipe {}: {:?} {:?} ep 0x{:02x} max_packet={} interval={}",
            self.index,
            self.direction,
            self.transfer_type,
            self.endpoint_address(),
            self.max_packet_size,
            self.interval
        )
    }
}

/// Parse a USB vendor or product id written as `0x1234`
pub fn parse_usb_id(value: &str) -> crate::Result<u16> {
    let invalid = |reason: &str| crate::Error::InvalidUsbId {
        value: value.to_string(),
        reason: reason.to_string(),
    };

    let hex = value
        .strip_prefix("0x")
        .or_else(|| value.strip_prefix("0X"))
        .ok_or_else(|| invalid("must start with '0x'"))?;

    if hex.is_empty() || hex.len() > 4 {
        return Err(invalid("hex part must be 1-4 digits"));
    }

    u16::from_str_radix(hex, 16).map_err(|_| invalid("not a valid hex number"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_criteria_display() {
        let criteria = DeviceMatchCriteria::new(0x15E4, 0x0053);
        assert_eq!(criteria.to_string(), "15e4:0053");
        assert!(criteria.matches(0x15e4, 0x0053));
        assert!(!criteria.matches(0x15e4, 0x0054));
    }

    #[test]
    fn test_status_code() {
        assert!(StatusCode::SUCCESS.is_success());
        assert!(!StatusCode::NOT_FOUND.is_success());
        assert_eq!(StatusCode::PIPE_STALLED.to_string(), "0xe000404f");
    }

    #[test]
    fn test_endpoint_address() {
        let mut pipe = PipeDescriptor {
            index: 1,
            direction: PipeDirection::Out,
            endpoint_number: 1,
            transfer_type: PipeTransferType::Bulk,
            max_packet_size: 64,
            interval: 0,
        };
        assert_eq!(pipe.endpoint_address(), 0x01);

        pipe.direction = PipeDirection::In;
        assert_eq!(pipe.endpoint_address(), 0x81);
    }

    #[test]
    fn test_parse_usb_id() {
        assert_eq!(parse_usb_id("0x15E4").unwrap(), 0x15e4);
        assert_eq!(parse_usb_id("0X53").unwrap(), 0x0053);
        assert!(parse_usb_id("15e4").is_err());
        assert!(parse_usb_id("0x").is_err());
        assert!(parse_usb_id("0x12345").is_err());
        assert!(parse_usb_id("0xGHIJ").is_err());
    }
}
