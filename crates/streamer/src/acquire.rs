//! Device acquisition
//!
//! Walks a matched device from its registry entry to an open interface:
//!
//! 1. match by vendor/product id
//! 2. bind the device control interface
//! 3. open, falling back to a single seize
//! 4. select the configuration (non-fatal)
//! 5. find the first interface
//! 6. bind the interface control interface
//! 7. open the interface (non-fatal)
//!
//! Each acquired control interface is placed in a lease inside
//! [`SessionHandles`] as soon as it exists, so an early return at any step
//! leaves teardown with exactly the handles that were acquired.

use crate::backend::{DeviceInterface, InterfaceInterface, UsbBackend};
use crate::error::{BindStage, SessionError};
use crate::session::{AcquisitionStep, OpenMode, SessionOutcome, SessionPlan, StepDisposition};
use crate::teardown::{DeviceLease, InterfaceLease, SessionHandles};
use common::StatusCode;
use tracing::{debug, info, warn};

/// Run the acquisition steps, recording each into `outcome`
pub fn acquire<B: UsbBackend>(
    backend: &B,
    plan: &SessionPlan,
    handles: &mut SessionHandles<B::Device, B::Interface>,
    outcome: &mut SessionOutcome,
) -> Result<(), SessionError> {
    // 1. Match
    let service = match_device(backend, plan, outcome)?;

    // 2. Bind device interface; the service is not needed past this point
    let bound = backend.bind_device(&service);
    backend.release_service(service);
    let device = bound.map_err(|err| {
        fail(
            outcome,
            AcquisitionStep::BindDeviceInterface,
            SessionError::BindFailed {
                stage: BindStage::for_device(&err),
                status: err.status,
            },
        )
    })?;
    advance(outcome, AcquisitionStep::BindDeviceInterface, StatusCode::SUCCESS);
    info!("Got device interface");

    let lease = handles.device.insert(DeviceLease::new(device));

    // 3. Open device
    let mode = open_device(lease.handle(), outcome)?;
    lease.mark_opened();
    outcome.open_mode = Some(mode);

    let device = lease.handle();

    // 4. Configure
    let status = device.set_configuration(plan.configuration);
    info!("SetConfiguration({}): {}", plan.configuration, status);
    if status.is_success() {
        advance(outcome, AcquisitionStep::Configure, status);
    } else {
        warn!("Configuration not applied, continuing with the current one");
        outcome.degradations.configure = Some(status);
        outcome.record(AcquisitionStep::Configure, status, StepDisposition::Degraded);
    }

    // 5. Find interface
    let service = find_interface(backend, device, outcome)?;

    // 6. Bind interface interface
    let bound = backend.bind_interface(&service);
    backend.release_service(service);
    let interface = bound.map_err(|err| {
        fail(
            outcome,
            AcquisitionStep::BindInterfaceInterface,
            SessionError::BindFailed {
                stage: BindStage::for_interface(&err),
                status: err.status,
            },
        )
    })?;
    advance(outcome, AcquisitionStep::BindInterfaceInterface, StatusCode::SUCCESS);
    info!("Got interface interface");

    let interface = handles
        .interface
        .insert(InterfaceLease::new(interface))
        .handle();

    // 7. Open interface
    let status = interface.open();
    info!("USBInterfaceOpen: {}", status);
    if status.is_success() {
        advance(outcome, AcquisitionStep::OpenInterface, status);
    } else {
        warn!("Interface open failed, pipe operations will report their own errors");
        outcome.degradations.open_interface = Some(status);
        outcome.record(AcquisitionStep::OpenInterface, status, StepDisposition::Degraded);
    }

    Ok(())
}

fn match_device<B: UsbBackend>(
    backend: &B,
    plan: &SessionPlan,
    outcome: &mut SessionOutcome,
) -> Result<B::Service, SessionError> {
    let not_found = |status| SessionError::DeviceNotFound {
        criteria: plan.criteria,
        status,
    };

    let mut services = backend
        .find_devices(&plan.criteria)
        .map_err(|status| fail(outcome, AcquisitionStep::Match, not_found(status)))?;

    if services.is_empty() {
        return Err(fail(
            outcome,
            AcquisitionStep::Match,
            not_found(StatusCode::NOT_FOUND),
        ));
    }

    // First enumerated match wins; there is no further disambiguation.
    let service = services.remove(0);
    if !services.is_empty() {
        warn!(
            "{} further device(s) match {}, using the first",
            services.len(),
            plan.criteria
        );
        for extra in services {
            backend.release_service(extra);
        }
    }

    advance(outcome, AcquisitionStep::Match, StatusCode::SUCCESS);
    info!("Found device");
    Ok(service)
}

fn open_device<D: DeviceInterface>(
    device: &mut D,
    outcome: &mut SessionOutcome,
) -> Result<OpenMode, SessionError> {
    let open_status = device.open();
    if open_status.is_success() {
        advance(outcome, AcquisitionStep::OpenDevice, open_status);
        info!("Device opened");
        return Ok(OpenMode::Normal);
    }
    warn!("USBDeviceOpen failed: {}", open_status);

    let seize_status = device.open_seize();
    if seize_status.is_success() {
        advance(outcome, AcquisitionStep::OpenDevice, seize_status);
        info!("Device opened by seizing it");
        return Ok(OpenMode::Seize);
    }
    warn!("USBDeviceOpenSeize also failed: {}", seize_status);

    Err(fail(
        outcome,
        AcquisitionStep::OpenDevice,
        SessionError::OpenFailed {
            open_status,
            seize_status,
        },
    ))
}

fn find_interface<B: UsbBackend>(
    backend: &B,
    device: &mut B::Device,
    outcome: &mut SessionOutcome,
) -> Result<B::Service, SessionError> {
    let mut services = device.find_interfaces().map_err(|status| {
        fail(
            outcome,
            AcquisitionStep::FindInterface,
            SessionError::NoInterfaceFound { status },
        )
    })?;

    if services.is_empty() {
        return Err(fail(
            outcome,
            AcquisitionStep::FindInterface,
            SessionError::NoInterfaceFound {
                status: StatusCode::NOT_FOUND,
            },
        ));
    }

    let service = services.remove(0);
    debug!("Ignoring {} further interface(s)", services.len());
    for extra in services {
        backend.release_service(extra);
    }

    advance(outcome, AcquisitionStep::FindInterface, StatusCode::SUCCESS);
    Ok(service)
}

fn advance(outcome: &mut SessionOutcome, step: AcquisitionStep, status: StatusCode) {
    outcome.record(step, status, StepDisposition::Advanced);
}

fn fail(outcome: &mut SessionOutcome, step: AcquisitionStep, err: SessionError) -> SessionError {
    warn!("Step '{}' failed: {}", step, err);
    outcome.record(step, err.status(), StepDisposition::Failed);
    err
}
