//! Streaming session
//!
//! Runs acquisition, pipe resolution, optional probe writes and streaming in
//! order, then tears everything down. The returned [`SessionOutcome`] records
//! what happened at each step; it only drives the process exit code.

use crate::acquire::acquire;
use crate::backend::{DeviceInterface, InterfaceInterface, UsbBackend};
use crate::error::SessionError;
use crate::frame::Frame;
use crate::pipes::{PipeReport, resolve_pipes};
use crate::stream::{Pacer, ProbeWrite, StreamReport, probe_writes, stream};
use crate::teardown::{SessionHandles, TeardownReport};
use common::{DeviceMatchCriteria, StatusCode};
use std::fmt;
use std::time::Duration;
use tracing::{error, info};

/// Acquisition steps, in the order they run
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum AcquisitionStep {
    Match,
    BindDeviceInterface,
    OpenDevice,
    Configure,
    FindInterface,
    BindInterfaceInterface,
    OpenInterface,
}

impl fmt::Display for AcquisitionStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Match => "match",
            Self::BindDeviceInterface => "bind device interface",
            Self::OpenDevice => "open device",
            Self::Configure => "configure",
            Self::FindInterface => "find interface",
            Self::BindInterfaceInterface => "bind interface interface",
            Self::OpenInterface => "open interface",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepDisposition {
    Advanced,
    /// The step failed but the session carries on
    Degraded,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StepRecord {
    pub step: AcquisitionStep,
    pub status: StatusCode,
    pub disposition: StepDisposition,
}

/// Which open attempt got the device
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenMode {
    Normal,
    Seize,
}

/// Non-fatal step failures, with the status each one returned
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Degradations {
    pub configure: Option<StatusCode>,
    pub open_interface: Option<StatusCode>,
}

impl Degradations {
    pub fn any(&self) -> bool {
        self.configure.is_some() || self.open_interface.is_some()
    }
}

/// Everything a session needs besides the backend
#[derive(Debug, Clone)]
pub struct SessionPlan {
    pub criteria: DeviceMatchCriteria,
    pub configuration: u8,
    pub pipe: u8,
    pub frame: Frame,
    pub frame_count: u32,
    pub interval: Duration,
    /// Pipes that receive one diagnostic write before streaming
    pub probe_pipes: Vec<u8>,
    /// Stop after pipe resolution
    pub probe_only: bool,
}

/// Report of a finished session
#[derive(Debug, Clone, Default)]
pub struct SessionOutcome {
    pub steps: Vec<StepRecord>,
    pub open_mode: Option<OpenMode>,
    pub degradations: Degradations,
    pub pipes: Vec<PipeReport>,
    pub probes: Vec<ProbeWrite>,
    pub stream: Option<StreamReport>,
    pub error: Option<SessionError>,
    pub last_status: StatusCode,
    pub teardown: TeardownReport,
}

impl SessionOutcome {
    /// Furthest acquisition step that ran
    pub fn reached(&self) -> Option<AcquisitionStep> {
        self.steps.last().map(|record| record.step)
    }

    pub fn acquired(&self) -> bool {
        !self.error.as_ref().is_some_and(SessionError::is_fatal)
    }

    pub fn streamed(&self) -> bool {
        self.stream.is_some()
    }

    /// Process exit code: non-zero only when acquisition hit a fatal step
    pub fn exit_code(&self) -> u8 {
        if self.acquired() { 0 } else { 1 }
    }

    pub(crate) fn record(
        &mut self,
        step: AcquisitionStep,
        status: StatusCode,
        disposition: StepDisposition,
    ) {
        self.last_status = status;
        self.steps.push(StepRecord {
            step,
            status,
            disposition,
        });
    }
}

/// Run one session against `backend`
///
/// Teardown always runs before this returns, whatever step failed.
pub fn run_session<B, P>(backend: &B, plan: &SessionPlan, pacer: &mut P) -> SessionOutcome
where
    B: UsbBackend,
    P: Pacer,
{
    let mut outcome = SessionOutcome::default();
    let mut handles = SessionHandles::new();

    info!("Looking for device {}", plan.criteria);
    match acquire(backend, plan, &mut handles, &mut outcome) {
        Ok(()) => use_interface(&mut handles, plan, pacer, &mut outcome),
        Err(err) => {
            error!("Acquisition failed: {}", err);
            outcome.error = Some(err);
        }
    }

    outcome.teardown = handles.teardown();
    outcome
}

fn use_interface<D, I, P>(
    handles: &mut SessionHandles<D, I>,
    plan: &SessionPlan,
    pacer: &mut P,
    outcome: &mut SessionOutcome,
) where
    D: DeviceInterface,
    I: InterfaceInterface,
    P: Pacer,
{
    let Some(interface) = handles.interface_mut() else {
        return;
    };

    outcome.pipes = resolve_pipes(interface);

    if !plan.probe_pipes.is_empty() {
        outcome.probes = probe_writes(interface, &plan.probe_pipes, &plan.frame);
        if let Some(probe) = outcome.probes.last() {
            outcome.last_status = probe.status;
        }
    }

    if plan.probe_only {
        info!("Probe only, skipping streaming");
        return;
    }

    let report = stream(
        interface,
        plan.pipe,
        &plan.frame,
        plan.frame_count,
        plan.interval,
        pacer,
    );
    if report.frames_attempted > 0 {
        outcome.last_status = report.last_status;
    }
    outcome.error = report.aborted.clone();
    outcome.stream = Some(report);
}
