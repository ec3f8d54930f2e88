//! libusb backend
//!
//! Implements the platform traits with `rusb`. The device handle opened by
//! [`LibusbDevice`] is shared with the interfaces found on it, since libusb
//! claims interfaces and writes pipes through the device handle.
//!
//! Pipe indices follow the platform convention: pipe `n` is the `n`th
//! endpoint of the interface's alternate setting, counting from 1.

use crate::backend::{BindError, DeviceInterface, InterfaceInterface, UsbBackend};
use common::{DeviceMatchCriteria, PipeDescriptor, PipeDirection, PipeTransferType, StatusCode};
use rusb::{Context, Device, DeviceHandle, UsbContext};
use std::cell::RefCell;
use std::rc::Rc;
use std::time::Duration;
use tracing::{debug, warn};

type SharedHandle = Rc<RefCell<Option<DeviceHandle<Context>>>>;

/// Brief description of an attached device
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceSummary {
    pub bus_number: u8,
    pub address: u8,
    pub vendor_id: u16,
    pub product_id: u16,
}

/// Registry entry handed out by the backend
pub enum LibusbService {
    Device(Device<Context>),
    Interface(InterfaceService),
}

/// Interface found on an open device
pub struct InterfaceService {
    handle: SharedHandle,
    number: u8,
    alternate: u8,
}

pub struct LibusbBackend {
    context: Context,
    write_timeout: Duration,
}

impl LibusbBackend {
    /// Create a backend on a fresh libusb context
    ///
    /// `write_timeout` bounds every pipe write.
    pub fn new(write_timeout: Duration) -> common::Result<Self> {
        let context = Context::new()
            .map_err(|e| common::Error::Usb(format!("Failed to create libusb context: {}", e)))?;
        Ok(Self {
            context,
            write_timeout,
        })
    }

    /// Every device on every bus
    pub fn list_devices(&self) -> common::Result<Vec<DeviceSummary>> {
        let devices = self
            .context
            .devices()
            .map_err(|e| common::Error::Usb(format!("Failed to enumerate devices: {}", e)))?;

        let mut summaries = Vec::new();
        for device in devices.iter() {
            match device.device_descriptor() {
                Ok(descriptor) => summaries.push(DeviceSummary {
                    bus_number: device.bus_number(),
                    address: device.address(),
                    vendor_id: descriptor.vendor_id(),
                    product_id: descriptor.product_id(),
                }),
                Err(e) => debug!(
                    "Skipping device on bus {} address {}: {}",
                    device.bus_number(),
                    device.address(),
                    e
                ),
            }
        }
        Ok(summaries)
    }
}

impl UsbBackend for LibusbBackend {
    type Service = LibusbService;
    type Device = LibusbDevice;
    type Interface = LibusbInterface;

    fn find_devices(
        &self,
        criteria: &DeviceMatchCriteria,
    ) -> Result<Vec<Self::Service>, StatusCode> {
        let devices = self.context.devices().map_err(map_rusb_error)?;

        let matches = devices
            .iter()
            .filter(|device| {
                device
                    .device_descriptor()
                    .map(|d| criteria.matches(d.vendor_id(), d.product_id()))
                    .unwrap_or(false)
            })
            .map(LibusbService::Device)
            .collect();
        Ok(matches)
    }

    fn bind_device(&self, service: &Self::Service) -> Result<Self::Device, BindError> {
        let LibusbService::Device(device) = service else {
            return Err(BindError::plugin(StatusCode::BAD_ARGUMENT));
        };

        let descriptor = device
            .device_descriptor()
            .map_err(|e| BindError::plugin(map_rusb_error(e)))?;
        if descriptor.num_configurations() == 0 {
            return Err(BindError::query(StatusCode::UNSUPPORTED));
        }
        device
            .config_descriptor(0)
            .map_err(|e| BindError::query(map_rusb_error(e)))?;

        Ok(LibusbDevice {
            device: device.clone(),
            handle: Rc::new(RefCell::new(None)),
        })
    }

    fn bind_interface(&self, service: &Self::Service) -> Result<Self::Interface, BindError> {
        let LibusbService::Interface(service) = service else {
            return Err(BindError::plugin(StatusCode::BAD_ARGUMENT));
        };

        let config = {
            let guard = service.handle.borrow();
            let handle = guard
                .as_ref()
                .ok_or(BindError::plugin(StatusCode::NOT_OPEN))?;
            handle
                .device()
                .active_config_descriptor()
                .map_err(|e| BindError::query(map_rusb_error(e)))?
        };

        let descriptor = config
            .interfaces()
            .flat_map(|interface| interface.descriptors())
            .find(|d| {
                d.interface_number() == service.number && d.setting_number() == service.alternate
            })
            .ok_or(BindError::query(StatusCode::NOT_FOUND))?;

        let endpoints = descriptor
            .endpoint_descriptors()
            .zip(1u8..)
            .map(|(endpoint, index)| PipeDescriptor {
                index,
                direction: map_direction(endpoint.direction()),
                endpoint_number: endpoint.number(),
                transfer_type: map_transfer_type(endpoint.transfer_type()),
                max_packet_size: endpoint.max_packet_size(),
                interval: endpoint.interval(),
            })
            .collect();

        Ok(LibusbInterface {
            handle: Rc::clone(&service.handle),
            number: service.number,
            alternate: service.alternate,
            endpoints,
            claimed: false,
            write_timeout: self.write_timeout,
        })
    }

    fn release_service(&self, service: Self::Service) {
        drop(service);
    }
}

/// Device control interface backed by a libusb device handle
pub struct LibusbDevice {
    device: Device<Context>,
    handle: SharedHandle,
}

impl LibusbDevice {
    /// Interface numbers with a kernel driver bound to them
    fn interfaces_held_by_kernel(&self, handle: &DeviceHandle<Context>) -> Vec<u8> {
        let Ok(config) = self.device.active_config_descriptor() else {
            return Vec::new();
        };
        config
            .interfaces()
            .map(|interface| interface.number())
            .filter(|&number| handle.kernel_driver_active(number).unwrap_or(false))
            .collect()
    }
}

impl DeviceInterface for LibusbDevice {
    type Service = LibusbService;

    /// Open without disturbing other clients: refused while a kernel driver
    /// holds any interface
    fn open(&mut self) -> StatusCode {
        let handle = match self.device.open() {
            Ok(handle) => handle,
            Err(e) => return map_rusb_error(e),
        };

        let held = self.interfaces_held_by_kernel(&handle);
        if !held.is_empty() {
            debug!("Kernel driver holds interface(s) {:?}", held);
            return StatusCode::EXCLUSIVE_ACCESS;
        }

        *self.handle.borrow_mut() = Some(handle);
        StatusCode::SUCCESS
    }

    /// Open and let libusb detach kernel drivers from interfaces we claim
    fn open_seize(&mut self) -> StatusCode {
        let handle = match self.device.open() {
            Ok(handle) => handle,
            Err(e) => return map_rusb_error(e),
        };

        match handle.set_auto_detach_kernel_driver(true) {
            Ok(()) => debug!("Kernel drivers will be detached on claim"),
            Err(rusb::Error::NotSupported) => {
                debug!("Kernel driver detach not supported on this platform")
            }
            Err(e) => return map_rusb_error(e),
        }

        *self.handle.borrow_mut() = Some(handle);
        StatusCode::SUCCESS
    }

    fn set_configuration(&mut self, index: u8) -> StatusCode {
        let mut guard = self.handle.borrow_mut();
        let Some(handle) = guard.as_mut() else {
            return StatusCode::NOT_OPEN;
        };
        status_of(handle.set_active_configuration(index))
    }

    fn find_interfaces(&mut self) -> Result<Vec<Self::Service>, StatusCode> {
        let config = self
            .device
            .active_config_descriptor()
            .map_err(map_rusb_error)?;

        let services = config
            .interfaces()
            .flat_map(|interface| interface.descriptors())
            .map(|descriptor| {
                LibusbService::Interface(InterfaceService {
                    handle: Rc::clone(&self.handle),
                    number: descriptor.interface_number(),
                    alternate: descriptor.setting_number(),
                })
            })
            .collect();
        Ok(services)
    }

    fn close(&mut self) -> StatusCode {
        match self.handle.borrow_mut().take() {
            Some(handle) => {
                drop(handle);
                StatusCode::SUCCESS
            }
            None => StatusCode::NOT_OPEN,
        }
    }

    fn release(&mut self) {
        if self.handle.borrow_mut().take().is_some() {
            warn!("Device released while still open");
        }
        debug!(
            "Released device on bus {} address {}",
            self.device.bus_number(),
            self.device.address()
        );
    }
}

/// Interface control interface backed by the shared device handle
pub struct LibusbInterface {
    handle: SharedHandle,
    number: u8,
    alternate: u8,
    endpoints: Vec<PipeDescriptor>,
    claimed: bool,
    write_timeout: Duration,
}

impl InterfaceInterface for LibusbInterface {
    fn open(&mut self) -> StatusCode {
        let mut guard = self.handle.borrow_mut();
        let Some(handle) = guard.as_mut() else {
            return StatusCode::NOT_OPEN;
        };

        if let Err(e) = handle.claim_interface(self.number) {
            return map_rusb_error(e);
        }
        self.claimed = true;

        if self.alternate != 0 {
            if let Err(e) = handle.set_alternate_setting(self.number, self.alternate) {
                return map_rusb_error(e);
            }
        }
        StatusCode::SUCCESS
    }

    fn endpoint_count(&self) -> Result<u8, StatusCode> {
        u8::try_from(self.endpoints.len()).map_err(|_| StatusCode::OVERRUN)
    }

    fn pipe_properties(&self, index: u8) -> Result<PipeDescriptor, StatusCode> {
        index
            .checked_sub(1)
            .and_then(|i| self.endpoints.get(i as usize))
            .copied()
            .ok_or(StatusCode::BAD_ARGUMENT)
    }

    fn write_pipe(&mut self, pipe: u8, bytes: &[u8]) -> StatusCode {
        if !self.claimed {
            return StatusCode::NOT_OPEN;
        }
        let endpoint = match self.pipe_properties(pipe) {
            Ok(endpoint) => endpoint,
            Err(status) => return status,
        };
        if endpoint.direction != PipeDirection::Out {
            return StatusCode::BAD_ARGUMENT;
        }

        let guard = self.handle.borrow();
        let Some(handle) = guard.as_ref() else {
            return StatusCode::NOT_OPEN;
        };

        let address = endpoint.endpoint_address();
        let written = match endpoint.transfer_type {
            PipeTransferType::Bulk => handle.write_bulk(address, bytes, self.write_timeout),
            PipeTransferType::Interrupt => {
                handle.write_interrupt(address, bytes, self.write_timeout)
            }
            PipeTransferType::Control | PipeTransferType::Isochronous => {
                return StatusCode::UNSUPPORTED;
            }
        };

        match written {
            Ok(len) if len == bytes.len() => StatusCode::SUCCESS,
            Ok(len) => {
                debug!("Short write on pipe {}: {} of {} bytes", pipe, len, bytes.len());
                StatusCode::UNDERRUN
            }
            Err(e) => map_rusb_error(e),
        }
    }

    fn close(&mut self) -> StatusCode {
        if !self.claimed {
            return StatusCode::NOT_OPEN;
        }
        self.claimed = false;

        let mut guard = self.handle.borrow_mut();
        let Some(handle) = guard.as_mut() else {
            return StatusCode::NOT_OPEN;
        };
        status_of(handle.release_interface(self.number))
    }

    fn release(&mut self) {
        debug!(
            "Released interface {} alternate {}",
            self.number, self.alternate
        );
    }
}

fn status_of(result: rusb::Result<()>) -> StatusCode {
    match result {
        Ok(()) => StatusCode::SUCCESS,
        Err(e) => map_rusb_error(e),
    }
}

fn map_direction(direction: rusb::Direction) -> PipeDirection {
    match direction {
        rusb::Direction::In => PipeDirection::In,
        rusb::Direction::Out => PipeDirection::Out,
    }
}

fn map_transfer_type(transfer_type: rusb::TransferType) -> PipeTransferType {
    match transfer_type {
        rusb::TransferType::Control => PipeTransferType::Control,
        rusb::TransferType::Isochronous => PipeTransferType::Isochronous,
        rusb::TransferType::Bulk => PipeTransferType::Bulk,
        rusb::TransferType::Interrupt => PipeTransferType::Interrupt,
    }
}

/// Map rusb::Error to a platform status code
pub fn map_rusb_error(err: rusb::Error) -> StatusCode {
    match err {
        rusb::Error::Io => StatusCode::IO_ERROR,
        rusb::Error::InvalidParam => StatusCode::BAD_ARGUMENT,
        rusb::Error::Access => StatusCode::NOT_PERMITTED,
        rusb::Error::NoDevice => StatusCode::NO_DEVICE,
        rusb::Error::NotFound => StatusCode::NOT_FOUND,
        rusb::Error::Busy => StatusCode::EXCLUSIVE_ACCESS,
        rusb::Error::Timeout => StatusCode::TIMEOUT,
        rusb::Error::Overflow => StatusCode::OVERRUN,
        rusb::Error::Pipe => StatusCode::PIPE_STALLED,
        rusb::Error::Interrupted => StatusCode::ABORTED,
        rusb::Error::NoMem => StatusCode::NO_MEMORY,
        rusb::Error::NotSupported => StatusCode::UNSUPPORTED,
        _ => StatusCode::ERROR,
    }
}
