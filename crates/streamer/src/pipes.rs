//! Pipe descriptor resolution
//!
//! Diagnostic pass over the pipes of an open interface. Every index is
//! queried even when earlier ones fail; the results are only ever reported.

use crate::backend::InterfaceInterface;
use common::{PipeDescriptor, StatusCode};
use tracing::{info, warn};

/// Outcome of querying one pipe index
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PipeReport {
    pub index: u8,
    pub result: Result<PipeDescriptor, StatusCode>,
}

/// Lazy walk over pipe indices `1..=count`
pub struct PipeDescriptors<'a, I: InterfaceInterface> {
    interface: &'a I,
    next: u8,
    count: u8,
}

impl<'a, I: InterfaceInterface> PipeDescriptors<'a, I> {
    /// Query the endpoint count and prepare the walk
    ///
    /// A failed count query is returned as the error; there are then no
    /// indices to walk.
    pub fn new(interface: &'a I) -> Result<Self, StatusCode> {
        let count = interface.endpoint_count()?;
        Ok(Self {
            interface,
            next: 1,
            count,
        })
    }

    /// Endpoint count reported by the interface
    pub fn endpoint_count(&self) -> u8 {
        self.count
    }
}

impl<I: InterfaceInterface> Iterator for PipeDescriptors<'_, I> {
    type Item = PipeReport;

    fn next(&mut self) -> Option<Self::Item> {
        if self.next == 0 || self.next > self.count {
            return None;
        }
        let index = self.next;
        // Wraps to 0 after 255, which ends the walk above.
        self.next = self.next.wrapping_add(1);

        Some(PipeReport {
            index,
            result: self.interface.pipe_properties(index),
        })
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = if self.next == 0 {
            0
        } else {
            (self.count as usize + 1).saturating_sub(self.next as usize)
        };
        (remaining, Some(remaining))
    }
}

/// Enumerate and report every pipe of the interface
pub fn resolve_pipes<I: InterfaceInterface>(interface: &I) -> Vec<PipeReport> {
    let pipes = match PipeDescriptors::new(interface) {
        Ok(pipes) => pipes,
        Err(status) => {
            warn!("Endpoint count query failed: {}", status);
            return Vec::new();
        }
    };
    info!("NumEndpoints: {}", pipes.endpoint_count());

    pipes
        .inspect(|report| match &report.result {
            Ok(pipe) => info!("  {}", pipe),
            Err(status) => warn!("  pipe {}: query failed ({})", report.index, status),
        })
        .collect()
}
