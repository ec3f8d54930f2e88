//! Test utilities for usb-bulk-streamer
//!
//! A scripted in-memory backend that records every platform call, plus a
//! pacer that records pauses instead of sleeping.
//!
//! # Example
//!
//! ```
//! use std::time::Duration;
//! use common::DeviceMatchCriteria;
//! use streamer::frame::Frame;
//! use streamer::session::{SessionPlan, run_session};
//! use streamer::test_utils::{MockBackend, MockDevice, MockEvent, RecordingPacer};
//!
//! let backend = MockBackend::new(vec![MockDevice::default()]);
//! let plan = SessionPlan {
//!     criteria: DeviceMatchCriteria::new(0x15e4, 0x0053),
//!     configuration: 1,
//!     pipe: 1,
//!     frame: Frame::filled(514, 0),
//!     frame_count: 3,
//!     interval: Duration::from_millis(25),
//!     probe_pipes: Vec::new(),
//!     probe_only: false,
//! };
//!
//! let outcome = run_session(&backend, &plan, &mut RecordingPacer::default());
//! assert_eq!(outcome.exit_code(), 0);
//! assert_eq!(backend.count_events(&MockEvent::WritePipe(1)), 3);
//! ```

use crate::backend::{BindError, DeviceInterface, InterfaceInterface, UsbBackend};
use crate::stream::Pacer;
use common::{DeviceMatchCriteria, PipeDescriptor, PipeDirection, PipeTransferType, StatusCode};
use std::cell::RefCell;
use std::rc::Rc;
use std::time::Duration;

/// Platform call recorded by the mock backend
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockEvent {
    FindDevices,
    BindDevice { service: u32 },
    BindInterface { service: u32 },
    ReleaseService { service: u32 },
    Open,
    OpenSeize,
    SetConfiguration(u8),
    FindInterfaces,
    CloseDevice,
    ReleaseDevice,
    OpenInterface,
    EndpointCount,
    PipeProperties(u8),
    WritePipe(u8),
    CloseInterface,
    ReleaseInterface,
}

impl MockEvent {
    /// Whether the event gives a handle back to the platform
    pub fn is_release(&self) -> bool {
        matches!(
            self,
            Self::ReleaseService { .. } | Self::ReleaseDevice | Self::ReleaseInterface
        )
    }
}

/// One endpoint of a mock interface
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MockPipe {
    pub direction: PipeDirection,
    pub endpoint_number: u8,
    pub transfer_type: PipeTransferType,
    pub max_packet_size: u16,
}

impl MockPipe {
    pub fn bulk_out(endpoint_number: u8) -> Self {
        Self {
            direction: PipeDirection::Out,
            endpoint_number,
            transfer_type: PipeTransferType::Bulk,
            max_packet_size: 64,
        }
    }

    pub fn bulk_in(endpoint_number: u8) -> Self {
        Self {
            direction: PipeDirection::In,
            ..Self::bulk_out(endpoint_number)
        }
    }

    fn descriptor(&self, index: u8) -> PipeDescriptor {
        PipeDescriptor {
            index,
            direction: self.direction,
            endpoint_number: self.endpoint_number,
            transfer_type: self.transfer_type,
            max_packet_size: self.max_packet_size,
            interval: 0,
        }
    }
}

/// Scripted behaviour of one mock device
///
/// The default is a healthy `15e4:0053` device with one interface holding a
/// single bulk OUT pipe.
#[derive(Debug, Clone)]
pub struct MockDevice {
    pub vendor_id: u16,
    pub product_id: u16,
    pub device_bind: Result<(), BindError>,
    pub open_status: StatusCode,
    pub seize_status: StatusCode,
    pub configuration_status: StatusCode,
    pub interface_iterator: Result<usize, StatusCode>,
    pub interface_bind: Result<(), BindError>,
    pub interface_open_status: StatusCode,
    pub endpoint_count_status: Option<StatusCode>,
    pub pipes: Vec<MockPipe>,
    pub failing_pipe_queries: Vec<u8>,
    /// Zero-based write calls (across all pipes) that fail
    pub failing_writes: Vec<u32>,
}

impl Default for MockDevice {
    fn default() -> Self {
        Self {
            vendor_id: 0x15e4,
            product_id: 0x0053,
            device_bind: Ok(()),
            open_status: StatusCode::SUCCESS,
            seize_status: StatusCode::SUCCESS,
            configuration_status: StatusCode::SUCCESS,
            interface_iterator: Ok(1),
            interface_bind: Ok(()),
            interface_open_status: StatusCode::SUCCESS,
            endpoint_count_status: None,
            pipes: vec![MockPipe::bulk_out(1)],
            failing_pipe_queries: Vec::new(),
            failing_writes: Vec::new(),
        }
    }
}

impl MockDevice {
    pub fn with_ids(mut self, vendor_id: u16, product_id: u16) -> Self {
        self.vendor_id = vendor_id;
        self.product_id = product_id;
        self
    }

    pub fn with_pipes(mut self, pipes: Vec<MockPipe>) -> Self {
        self.pipes = pipes;
        self
    }

    pub fn with_interfaces(mut self, count: usize) -> Self {
        self.interface_iterator = Ok(count);
        self
    }

    pub fn failing_device_bind(mut self, err: BindError) -> Self {
        self.device_bind = Err(err);
        self
    }

    pub fn failing_open(mut self, status: StatusCode) -> Self {
        self.open_status = status;
        self
    }

    pub fn failing_seize(mut self, status: StatusCode) -> Self {
        self.seize_status = status;
        self
    }

    pub fn failing_configuration(mut self, status: StatusCode) -> Self {
        self.configuration_status = status;
        self
    }

    pub fn failing_interface_iterator(mut self, status: StatusCode) -> Self {
        self.interface_iterator = Err(status);
        self
    }

    pub fn failing_interface_bind(mut self, err: BindError) -> Self {
        self.interface_bind = Err(err);
        self
    }

    pub fn failing_interface_open(mut self, status: StatusCode) -> Self {
        self.interface_open_status = status;
        self
    }

    pub fn failing_endpoint_count(mut self) -> Self {
        self.endpoint_count_status = Some(StatusCode::ERROR);
        self
    }

    pub fn failing_pipe_query(mut self, index: u8) -> Self {
        self.failing_pipe_queries.push(index);
        self
    }

    pub fn failing_writes(mut self, calls: Vec<u32>) -> Self {
        self.failing_writes = calls;
        self
    }
}

#[derive(Debug, Default)]
struct MockState {
    devices: Vec<MockDevice>,
    find_status: Option<StatusCode>,
    events: Vec<MockEvent>,
    next_service: u32,
    write_calls: u32,
    last_payload: Option<Vec<u8>>,
}

impl MockState {
    fn service(&mut self, kind: ServiceKind) -> MockService {
        self.next_service += 1;
        MockService {
            id: self.next_service,
            kind,
        }
    }
}

type SharedState = Rc<RefCell<MockState>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ServiceKind {
    Device(usize),
    Interface(usize),
}

/// Registry entry handed out by the mock backend
#[derive(Debug)]
pub struct MockService {
    id: u32,
    kind: ServiceKind,
}

/// In-memory backend replaying the scripted behaviour of its devices
#[derive(Debug, Clone)]
pub struct MockBackend {
    state: SharedState,
}

impl MockBackend {
    pub fn new(devices: Vec<MockDevice>) -> Self {
        Self {
            state: Rc::new(RefCell::new(MockState {
                devices,
                ..MockState::default()
            })),
        }
    }

    /// Make device enumeration itself fail
    pub fn failing_find(self, status: StatusCode) -> Self {
        self.state.borrow_mut().find_status = Some(status);
        self
    }

    /// Every call recorded so far
    pub fn events(&self) -> Vec<MockEvent> {
        self.state.borrow().events.clone()
    }

    pub fn count_events(&self, event: &MockEvent) -> usize {
        self.state
            .borrow()
            .events
            .iter()
            .filter(|e| *e == event)
            .count()
    }

    /// Number of handles given back to the platform
    pub fn releases(&self) -> usize {
        self.state
            .borrow()
            .events
            .iter()
            .filter(|e| e.is_release())
            .count()
    }

    /// Payload of the most recent write
    pub fn last_payload(&self) -> Option<Vec<u8>> {
        self.state.borrow().last_payload.clone()
    }

    /// Device control interface for `device`, bound without recording calls
    pub fn bound_device(&self, device: usize) -> MockDeviceInterface {
        MockDeviceInterface {
            state: Rc::clone(&self.state),
            device,
        }
    }

    /// Open interface on `device`, created without recording calls
    pub fn opened_interface(&self, device: usize) -> MockInterface {
        MockInterface {
            state: Rc::clone(&self.state),
            device,
            opened: true,
        }
    }

    fn record(&self, event: MockEvent) {
        self.state.borrow_mut().events.push(event);
    }
}

impl UsbBackend for MockBackend {
    type Service = MockService;
    type Device = MockDeviceInterface;
    type Interface = MockInterface;

    fn find_devices(
        &self,
        criteria: &DeviceMatchCriteria,
    ) -> Result<Vec<Self::Service>, StatusCode> {
        self.record(MockEvent::FindDevices);
        let mut state = self.state.borrow_mut();
        if let Some(status) = state.find_status {
            return Err(status);
        }

        let matching: Vec<usize> = state
            .devices
            .iter()
            .enumerate()
            .filter(|(_, d)| criteria.matches(d.vendor_id, d.product_id))
            .map(|(index, _)| index)
            .collect();

        Ok(matching
            .into_iter()
            .map(|index| state.service(ServiceKind::Device(index)))
            .collect())
    }

    fn bind_device(&self, service: &Self::Service) -> Result<Self::Device, BindError> {
        self.record(MockEvent::BindDevice {
            service: service.id,
        });
        let ServiceKind::Device(device) = service.kind else {
            return Err(BindError::plugin(StatusCode::BAD_ARGUMENT));
        };

        self.state.borrow().devices[device].device_bind?;
        Ok(self.bound_device(device))
    }

    fn bind_interface(&self, service: &Self::Service) -> Result<Self::Interface, BindError> {
        self.record(MockEvent::BindInterface {
            service: service.id,
        });
        let ServiceKind::Interface(device) = service.kind else {
            return Err(BindError::plugin(StatusCode::BAD_ARGUMENT));
        };

        self.state.borrow().devices[device].interface_bind?;
        Ok(MockInterface {
            state: Rc::clone(&self.state),
            device,
            opened: false,
        })
    }

    fn release_service(&self, service: Self::Service) {
        self.record(MockEvent::ReleaseService {
            service: service.id,
        });
    }
}

/// Device control interface of the mock backend
#[derive(Debug)]
pub struct MockDeviceInterface {
    state: SharedState,
    device: usize,
}

impl MockDeviceInterface {
    fn script(&self) -> MockDevice {
        self.state.borrow().devices[self.device].clone()
    }

    fn record(&self, event: MockEvent) {
        self.state.borrow_mut().events.push(event);
    }
}

impl DeviceInterface for MockDeviceInterface {
    type Service = MockService;

    fn open(&mut self) -> StatusCode {
        self.record(MockEvent::Open);
        self.script().open_status
    }

    fn open_seize(&mut self) -> StatusCode {
        self.record(MockEvent::OpenSeize);
        self.script().seize_status
    }

    fn set_configuration(&mut self, index: u8) -> StatusCode {
        self.record(MockEvent::SetConfiguration(index));
        self.script().configuration_status
    }

    fn find_interfaces(&mut self) -> Result<Vec<Self::Service>, StatusCode> {
        self.record(MockEvent::FindInterfaces);
        let count = self.script().interface_iterator?;

        let mut state = self.state.borrow_mut();
        Ok((0..count)
            .map(|_| state.service(ServiceKind::Interface(self.device)))
            .collect())
    }

    fn close(&mut self) -> StatusCode {
        self.record(MockEvent::CloseDevice);
        StatusCode::SUCCESS
    }

    fn release(&mut self) {
        self.record(MockEvent::ReleaseDevice);
    }
}

/// Interface control interface of the mock backend
#[derive(Debug)]
pub struct MockInterface {
    state: SharedState,
    device: usize,
    opened: bool,
}

impl MockInterface {
    fn script(&self) -> MockDevice {
        self.state.borrow().devices[self.device].clone()
    }

    fn record(&self, event: MockEvent) {
        self.state.borrow_mut().events.push(event);
    }
}

impl InterfaceInterface for MockInterface {
    fn open(&mut self) -> StatusCode {
        self.record(MockEvent::OpenInterface);
        let status = self.script().interface_open_status;
        self.opened = status.is_success();
        status
    }

    fn endpoint_count(&self) -> Result<u8, StatusCode> {
        self.record(MockEvent::EndpointCount);
        let script = self.script();
        match script.endpoint_count_status {
            Some(status) => Err(status),
            None => Ok(script.pipes.len() as u8),
        }
    }

    fn pipe_properties(&self, index: u8) -> Result<PipeDescriptor, StatusCode> {
        self.record(MockEvent::PipeProperties(index));
        let script = self.script();
        if script.failing_pipe_queries.contains(&index) {
            return Err(StatusCode::NOT_FOUND);
        }
        index
            .checked_sub(1)
            .and_then(|i| script.pipes.get(i as usize))
            .map(|pipe| pipe.descriptor(index))
            .ok_or(StatusCode::BAD_ARGUMENT)
    }

    fn write_pipe(&mut self, pipe: u8, bytes: &[u8]) -> StatusCode {
        self.record(MockEvent::WritePipe(pipe));
        let script = self.script();
        let mut state = self.state.borrow_mut();
        let call = state.write_calls;
        state.write_calls += 1;
        state.last_payload = Some(bytes.to_vec());

        if !self.opened {
            return StatusCode::NOT_OPEN;
        }
        let target = pipe
            .checked_sub(1)
            .and_then(|i| script.pipes.get(i as usize));
        match target {
            Some(target) if target.direction == PipeDirection::Out => {}
            _ => return StatusCode::BAD_ARGUMENT,
        }
        if script.failing_writes.contains(&call) {
            return StatusCode::IO_ERROR;
        }
        StatusCode::SUCCESS
    }

    fn close(&mut self) -> StatusCode {
        self.record(MockEvent::CloseInterface);
        if self.opened {
            self.opened = false;
            StatusCode::SUCCESS
        } else {
            StatusCode::NOT_OPEN
        }
    }

    fn release(&mut self) {
        self.record(MockEvent::ReleaseInterface);
    }
}

/// Pacer that records each pause instead of sleeping
#[derive(Debug, Default, Clone)]
pub struct RecordingPacer {
    pub pauses: Vec<Duration>,
}

impl RecordingPacer {
    /// Sum of all recorded pauses
    pub fn total(&self) -> Duration {
        self.pauses.iter().sum()
    }
}

impl Pacer for RecordingPacer {
    fn pause(&mut self, interval: Duration) {
        self.pauses.push(interval);
    }
}
