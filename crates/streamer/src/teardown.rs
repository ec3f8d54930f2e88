//! Session teardown
//!
//! Every control interface the session acquires lives in a lease. A lease
//! closes and releases its handle exactly once: either when
//! [`SessionHandles::teardown`] runs or, failing that, when the lease is
//! dropped. Handles that were never acquired have no lease, so there is
//! nothing to release for them.

use crate::backend::{DeviceInterface, InterfaceInterface};
use common::StatusCode;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandleKind {
    DeviceInterface,
    InterfaceInterface,
}

/// Record of one handle being closed and released
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HandleRelease {
    pub kind: HandleKind,
    /// Status of the close call, `None` when the handle was never opened
    pub close_status: Option<StatusCode>,
}

/// Handles released during teardown, in release order
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TeardownReport {
    pub released: Vec<HandleRelease>,
}

impl TeardownReport {
    pub fn count(&self) -> usize {
        self.released.len()
    }
}

/// Owned device control interface
pub struct DeviceLease<D: DeviceInterface> {
    device: D,
    opened: bool,
    released: bool,
}

impl<D: DeviceInterface> DeviceLease<D> {
    pub fn new(device: D) -> Self {
        Self {
            device,
            opened: false,
            released: false,
        }
    }

    /// The leased device, `None` once released
    pub fn get_mut(&mut self) -> Option<&mut D> {
        if self.released {
            None
        } else {
            Some(&mut self.device)
        }
    }

    /// Direct access while the session is still acquiring
    pub(crate) fn handle(&mut self) -> &mut D {
        &mut self.device
    }

    /// Record that an open attempt succeeded, so release closes first
    pub fn mark_opened(&mut self) {
        self.opened = true;
    }

    /// Close (if opened) and release the device; no-op after the first call
    pub fn release(&mut self) -> Option<HandleRelease> {
        if self.released {
            return None;
        }
        self.released = true;

        let close_status = if self.opened {
            let status = self.device.close();
            if status.is_success() {
                debug!("Device closed");
            } else {
                warn!("Device close returned {}", status);
            }
            Some(status)
        } else {
            None
        };
        self.device.release();
        debug!("Device interface released");

        Some(HandleRelease {
            kind: HandleKind::DeviceInterface,
            close_status,
        })
    }
}

impl<D: DeviceInterface> Drop for DeviceLease<D> {
    fn drop(&mut self) {
        self.release();
    }
}

/// Owned interface control interface
///
/// The interface is always closed before release: its open step may fail
/// without ending the session, and closing an interface that never opened
/// is harmless.
pub struct InterfaceLease<I: InterfaceInterface> {
    interface: I,
    released: bool,
}

impl<I: InterfaceInterface> InterfaceLease<I> {
    pub fn new(interface: I) -> Self {
        Self {
            interface,
            released: false,
        }
    }

    pub fn get_mut(&mut self) -> Option<&mut I> {
        if self.released {
            None
        } else {
            Some(&mut self.interface)
        }
    }

    pub(crate) fn handle(&mut self) -> &mut I {
        &mut self.interface
    }

    pub fn release(&mut self) -> Option<HandleRelease> {
        if self.released {
            return None;
        }
        self.released = true;

        let status = self.interface.close();
        debug!("USBInterfaceClose: {}", status);
        self.interface.release();
        debug!("Interface interface released");

        Some(HandleRelease {
            kind: HandleKind::InterfaceInterface,
            close_status: Some(status),
        })
    }
}

impl<I: InterfaceInterface> Drop for InterfaceLease<I> {
    fn drop(&mut self) {
        self.release();
    }
}

/// Control interfaces acquired by one session
pub struct SessionHandles<D: DeviceInterface, I: InterfaceInterface> {
    pub(crate) device: Option<DeviceLease<D>>,
    pub(crate) interface: Option<InterfaceLease<I>>,
    report: Option<TeardownReport>,
}

impl<D: DeviceInterface, I: InterfaceInterface> SessionHandles<D, I> {
    pub fn new() -> Self {
        Self {
            device: None,
            interface: None,
            report: None,
        }
    }

    pub fn interface_mut(&mut self) -> Option<&mut I> {
        self.interface.as_mut().and_then(InterfaceLease::get_mut)
    }

    /// Release everything in reverse acquisition order
    ///
    /// Runs once; later calls return the report of the first run.
    pub fn teardown(&mut self) -> TeardownReport {
        if let Some(report) = &self.report {
            return report.clone();
        }

        let mut report = TeardownReport::default();
        if let Some(release) = self.interface.take().and_then(|mut lease| lease.release()) {
            report.released.push(release);
        }
        if let Some(release) = self.device.take().and_then(|mut lease| lease.release()) {
            report.released.push(release);
        }

        info!("Teardown released {} handle(s)", report.count());
        self.report = Some(report.clone());
        report
    }
}

impl<D: DeviceInterface, I: InterfaceInterface> Default for SessionHandles<D, I> {
    fn default() -> Self {
        Self::new()
    }
}

impl<D: DeviceInterface, I: InterfaceInterface> Drop for SessionHandles<D, I> {
    fn drop(&mut self) {
        self.teardown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{MockBackend, MockDevice, MockEvent};

    #[test]
    fn test_lease_releases_once() {
        let backend = MockBackend::new(vec![MockDevice::default()]);
        let mut lease = DeviceLease::new(backend.bound_device(0));
        lease.mark_opened();

        let first = lease.release();
        assert_eq!(
            first,
            Some(HandleRelease {
                kind: HandleKind::DeviceInterface,
                close_status: Some(StatusCode::SUCCESS),
            })
        );
        assert!(lease.release().is_none());
        assert!(lease.get_mut().is_none());
        drop(lease);

        assert_eq!(backend.count_events(&MockEvent::CloseDevice), 1);
        assert_eq!(backend.count_events(&MockEvent::ReleaseDevice), 1);
    }

    #[test]
    fn test_unopened_device_is_not_closed() {
        let backend = MockBackend::new(vec![MockDevice::default()]);
        let lease = DeviceLease::new(backend.bound_device(0));
        drop(lease);

        assert_eq!(backend.count_events(&MockEvent::CloseDevice), 0);
        assert_eq!(backend.count_events(&MockEvent::ReleaseDevice), 1);
    }

    #[test]
    fn test_teardown_order_and_idempotence() {
        let backend = MockBackend::new(vec![MockDevice::default()]);
        let mut handles = SessionHandles::new();
        let mut device = DeviceLease::new(backend.bound_device(0));
        device.mark_opened();
        handles.device = Some(device);
        handles.interface = Some(InterfaceLease::new(backend.opened_interface(0)));

        let report = handles.teardown();
        assert_eq!(report.count(), 2);
        assert_eq!(report.released[0].kind, HandleKind::InterfaceInterface);
        assert_eq!(report.released[1].kind, HandleKind::DeviceInterface);
        assert_eq!(handles.teardown(), report);
        drop(handles);

        assert_eq!(
            backend.events(),
            vec![
                MockEvent::CloseInterface,
                MockEvent::ReleaseInterface,
                MockEvent::CloseDevice,
                MockEvent::ReleaseDevice,
            ]
        );
    }

    #[test]
    fn test_empty_handles_release_nothing() {
        let backend = MockBackend::new(vec![]);
        let mut handles: SessionHandles<
            crate::test_utils::MockDeviceInterface,
            crate::test_utils::MockInterface,
        > = SessionHandles::new();

        assert_eq!(handles.teardown().count(), 0);
        assert!(backend.events().is_empty());
    }
}
