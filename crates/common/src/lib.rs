//! Common utilities for usb-bulk-streamer
//!
//! This crate provides the USB value types shared between the streaming
//! session and its backends, along with error handling and logging setup.

pub mod error;
pub mod logging;
pub mod usb_types;

pub use error::{Error, Result};
pub use logging::setup_logging;
pub use usb_types::{
    DeviceMatchCriteria, PipeDescriptor, PipeDirection, PipeTransferType, StatusCode,
    parse_usb_id,
};
