//! Platform USB subsystem boundary
//!
//! The session never talks to a USB stack directly. It drives these traits,
//! which mirror the handle model of the platform: generic service handles are
//! found by matching, bound into typed control interfaces, opened, used and
//! finally closed and released.
//!
//! [`crate::libusb::LibusbBackend`] implements them on top of `rusb`; the
//! scripted [`crate::test_utils::MockBackend`] implements them for tests.

use common::{DeviceMatchCriteria, PipeDescriptor, StatusCode};
use std::fmt;

/// Which half of a plugin binding failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BindStep {
    /// Instantiating the plugin for the service
    Plugin,
    /// Querying the typed interface from the plugin
    Query,
}

/// Failure to bind a service handle to a control interface
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BindError {
    pub step: BindStep,
    pub status: StatusCode,
}

impl BindError {
    pub fn plugin(status: StatusCode) -> Self {
        Self {
            step: BindStep::Plugin,
            status,
        }
    }

    pub fn query(status: StatusCode) -> Self {
        Self {
            step: BindStep::Query,
            status,
        }
    }
}

impl fmt::Display for BindError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?} step failed with {}", self.step, self.status)
    }
}

/// Entry point into the platform USB subsystem
pub trait UsbBackend {
    /// Generic registry entry for a device or an interface
    type Service;
    /// Device-level control interface
    type Device: DeviceInterface<Service = Self::Service>;
    /// Interface-level control interface
    type Interface: InterfaceInterface;

    /// All devices matching `criteria`, in enumeration order
    fn find_devices(&self, criteria: &DeviceMatchCriteria)
    -> Result<Vec<Self::Service>, StatusCode>;

    /// Bind a device service to its device control interface
    fn bind_device(&self, service: &Self::Service) -> Result<Self::Device, BindError>;

    /// Bind an interface service to its interface control interface
    fn bind_interface(&self, service: &Self::Service) -> Result<Self::Interface, BindError>;

    /// Give a service handle back to the registry
    fn release_service(&self, service: Self::Service);
}

/// Device-level control interface
pub trait DeviceInterface {
    type Service;

    /// Open the device for this client
    fn open(&mut self) -> StatusCode;

    /// Open the device, taking it from any client that currently holds it
    fn open_seize(&mut self) -> StatusCode;

    /// Select the configuration with the given index
    fn set_configuration(&mut self, index: u8) -> StatusCode;

    /// Interfaces of the current configuration, matching any class,
    /// subclass, protocol and alternate setting
    fn find_interfaces(&mut self) -> Result<Vec<Self::Service>, StatusCode>;

    fn close(&mut self) -> StatusCode;

    /// Give the handle back to the platform
    ///
    /// Called exactly once, by the owning lease; the handle is not used
    /// afterwards.
    fn release(&mut self);
}

/// Interface-level control interface
pub trait InterfaceInterface {
    /// Open the interface for pipe I/O
    fn open(&mut self) -> StatusCode;

    /// Number of endpoints (pipes) on the interface, excluding the default pipe
    fn endpoint_count(&self) -> Result<u8, StatusCode>;

    /// Properties of the pipe at the 1-based `index`
    fn pipe_properties(&self, index: u8) -> Result<PipeDescriptor, StatusCode>;

    /// Synchronous write of `bytes` to the pipe at the 1-based `pipe` index
    fn write_pipe(&mut self, pipe: u8, bytes: &[u8]) -> StatusCode;

    fn close(&mut self) -> StatusCode;

    fn release(&mut self);
}
