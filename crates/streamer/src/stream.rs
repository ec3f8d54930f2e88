//! Fixed-cadence frame streaming
//!
//! A plain blocking loop: write, pause, repeat. Only a failure of the very
//! first write stops the run; later failures are counted and the loop keeps
//! going.

use crate::backend::InterfaceInterface;
use crate::error::SessionError;
use crate::frame::Frame;
use common::StatusCode;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Blocking pause between frames
pub trait Pacer {
    fn pause(&mut self, interval: Duration);
}

/// Pacer that sleeps the current thread
#[derive(Debug, Default, Clone, Copy)]
pub struct ThreadSleep;

impl Pacer for ThreadSleep {
    fn pause(&mut self, interval: Duration) {
        std::thread::sleep(interval);
    }
}

/// Result of one streaming run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamReport {
    pub pipe: u8,
    pub frames_requested: u32,
    pub frames_attempted: u32,
    pub frames_failed: u32,
    pub last_status: StatusCode,
    /// Set when the first write failed and the run was abandoned
    pub aborted: Option<SessionError>,
}

impl StreamReport {
    pub fn frames_sent(&self) -> u32 {
        self.frames_attempted - self.frames_failed
    }
}

/// Write `frame` to `pipe` `frame_count` times, pausing `interval` after each
pub fn stream<I, P>(
    interface: &mut I,
    pipe: u8,
    frame: &Frame,
    frame_count: u32,
    interval: Duration,
    pacer: &mut P,
) -> StreamReport
where
    I: InterfaceInterface,
    P: Pacer,
{
    info!(
        "Sending {} frames of {} bytes to pipe {} every {:?}",
        frame_count,
        frame.len(),
        pipe,
        interval
    );

    let mut report = StreamReport {
        pipe,
        frames_requested: frame_count,
        frames_attempted: 0,
        frames_failed: 0,
        last_status: StatusCode::SUCCESS,
        aborted: None,
    };

    for frame_index in 0..frame_count {
        let status = interface.write_pipe(pipe, frame.as_bytes());
        report.frames_attempted += 1;
        report.last_status = status;

        if !status.is_success() {
            report.frames_failed += 1;
            if frame_index == 0 {
                warn!("WritePipe({}) failed on the first frame: {}", pipe, status);
                report.aborted = Some(SessionError::WriteFailed {
                    pipe,
                    frame_index,
                    status,
                });
                return report;
            }
            debug!("WritePipe({}) frame {} failed: {}", pipe, frame_index, status);
        }

        pacer.pause(interval);
    }

    if report.frames_failed > 0 {
        warn!(
            "{} of {} frames failed after the first",
            report.frames_failed, report.frames_attempted
        );
    }
    info!("Done: {} frames sent to pipe {}", report.frames_sent(), pipe);
    report
}

/// Status of a single diagnostic write
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProbeWrite {
    pub pipe: u8,
    pub status: StatusCode,
}

/// Write one copy of `frame` to each of `pipes`, recording every status
///
/// Failures never stop the probe; missing pipes are expected to fail.
pub fn probe_writes<I: InterfaceInterface>(
    interface: &mut I,
    pipes: &[u8],
    frame: &Frame,
) -> Vec<ProbeWrite> {
    pipes
        .iter()
        .map(|&pipe| {
            let status = interface.write_pipe(pipe, frame.as_bytes());
            let verdict = if status.is_success() { "OK" } else { "FAIL" };
            info!("WritePipe({}): {} ({})", pipe, status, verdict);
            ProbeWrite { pipe, status }
        })
        .collect()
}
